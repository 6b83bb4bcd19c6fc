use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_imgbed")
}

/// Run the binary inside `dir` with an isolated home directory
fn run_cli(dir: &Path, args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .current_dir(dir)
        .env("HOME", dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run imgbed")
}

const VALID_CONFIG: &str = r#"
storage:
  endpoint: "oss-cn-hangzhou.aliyuncs.com"
  bucket_name: "pics"
  access_key_id: "LTAIexample"
  access_key_secret: "topsecretvalue"
upload:
  naming_rule: "hash"
"#;

fn setup_with_config(yaml: &str) -> TempDir {
    let td = TempDir::new().expect("tempdir");
    std::fs::write(td.path().join("config.yaml"), yaml).expect("write config");
    td
}

#[test]
fn help_lists_commands() {
    let td = TempDir::new().unwrap();
    let out = run_cli(td.path(), &["--help"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for cmd in ["init", "upload", "upload-batch", "convert", "list-files", "delete", "config"] {
        assert!(stdout.contains(cmd), "missing {cmd} in help: {stdout}");
    }
}

#[test]
fn init_writes_template_once() {
    let td = TempDir::new().unwrap();

    let first = run_cli(td.path(), &["init"]);
    assert!(first.status.success(), "init failed: {:?}", first);
    let written = std::fs::read_to_string(td.path().join("config.yaml")).unwrap();
    assert!(written.contains("bucket_name"));

    let again = run_cli(td.path(), &["init"]);
    assert_eq!(again.status.code(), Some(2));

    let forced = run_cli(td.path(), &["init", "--force"]);
    assert!(forced.status.success());
}

#[test]
fn template_placeholders_are_a_config_error() {
    let td = TempDir::new().unwrap();
    assert!(run_cli(td.path(), &["init"]).status.success());

    let out = run_cli(td.path(), &["config", "show"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("bucket_name"));
}

#[test]
fn missing_config_is_fatal() {
    let td = TempDir::new().unwrap();
    let out = run_cli(td.path(), &["upload", "a.png"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn config_show_masks_secrets() {
    let td = setup_with_config(VALID_CONFIG);
    let out = run_cli(td.path(), &["config", "show"]);
    assert!(out.status.success(), "show failed: {:?}", out);

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("\"bucket_name\": \"pics\""));
    assert!(stdout.contains("\"naming_rule\": \"hash\""));
    assert!(!stdout.contains("topsecretvalue"));
    assert!(!stdout.contains("LTAIexample"));
}

#[test]
fn explicit_config_path_is_used() {
    let td = TempDir::new().unwrap();
    let path = td.path().join("custom.yaml");
    std::fs::write(&path, VALID_CONFIG).unwrap();

    let out = run_cli(td.path(), &["--config", path.to_str().unwrap(), "config", "show"]);
    assert!(out.status.success(), "show failed: {:?}", out);
}

#[test]
fn failed_local_uploads_exit_with_one() {
    let td = setup_with_config(VALID_CONFIG);
    std::fs::write(td.path().join("notes.txt"), "not an image").unwrap();

    // neither file reaches the network: one is missing, one has a rejected extension
    let out = run_cli(td.path(), &["upload", "missing.png", "notes.txt"]);
    assert_eq!(out.status.code(), Some(1), "unexpected: {:?}", out);

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("2 failed"));
}

#[test]
fn upload_accepts_folder_and_alt() {
    let td = setup_with_config(VALID_CONFIG);

    let help = run_cli(td.path(), &["upload", "--help"]);
    let stdout = String::from_utf8_lossy(&help.stdout);
    assert!(stdout.contains("--folder") && stdout.contains("--alt"), "help: {stdout}");

    let out = run_cli(
        td.path(),
        &["upload", "--folder", "docs/shots", "--alt", "cover", "missing.png"],
    );
    assert_eq!(out.status.code(), Some(1), "unexpected: {:?}", out);
    assert!(String::from_utf8_lossy(&out.stdout).contains("1 failed"));
}

#[test]
fn no_recursive_overrides_config() {
    let td = setup_with_config(VALID_CONFIG);
    let docs = td.path().join("docs");
    std::fs::create_dir_all(docs.join("nested")).unwrap();
    std::fs::write(docs.join("a.md"), "![a](gone.png)").unwrap();
    std::fs::write(docs.join("nested").join("b.md"), "![b](gone.png)").unwrap();

    // markdown.recursive defaults to true
    let deep = run_cli(td.path(), &["convert", "docs", "--dry-run"]);
    assert_eq!(deep.status.code(), Some(1), "unexpected: {:?}", deep);
    assert!(String::from_utf8_lossy(&deep.stdout).contains("2 image(s)"));

    let flat = run_cli(td.path(), &["convert", "docs", "--dry-run", "--no-recursive"]);
    assert_eq!(flat.status.code(), Some(1), "unexpected: {:?}", flat);
    assert!(String::from_utf8_lossy(&flat.stdout).contains("1 image(s)"));

    let both = run_cli(td.path(), &["convert", "docs", "-r", "--no-recursive"]);
    assert_eq!(both.status.code(), Some(2));
}
