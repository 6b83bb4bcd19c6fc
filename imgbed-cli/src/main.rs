use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use imgbed_core::{
    Converter, ConvertOptions, ImgbedConfig, PathPrefixTemplate, ProcessReport, S3Store,
    StorageClient, UploadPipeline, UploadResult,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "imgbed", version, about = "Upload images to object storage and rewrite Markdown links")]
struct Cli {
    /// Config file (default: ./config.yaml, then ~/.imgbed/config.yaml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a starter config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Upload images and print a Markdown link for each.
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Store under this folder instead of `upload.path_prefix`.
        #[arg(long)]
        folder: Option<String>,

        /// Alt text for the printed links (default: file name without extension).
        #[arg(long)]
        alt: Option<String>,
    },

    /// Upload every image in a directory.
    UploadBatch {
        dir: PathBuf,

        /// Descend into subdirectories.
        #[arg(long, short)]
        recursive: bool,

        /// Store under this folder instead of `upload.path_prefix`.
        #[arg(long)]
        folder: Option<String>,
    },

    /// Upload the local images of Markdown files and rewrite their links.
    Convert {
        /// A Markdown file or a directory of them.
        path: PathBuf,

        /// Descend into subdirectories (default: `markdown.recursive`).
        #[arg(long, short)]
        recursive: bool,

        /// Stay in the top directory even if `markdown.recursive` is set.
        #[arg(long, conflicts_with = "recursive")]
        no_recursive: bool,

        /// Report changes without writing files.
        #[arg(long)]
        dry_run: bool,

        /// Do not keep a copy of the original.
        #[arg(long)]
        no_backup: bool,
    },

    /// List stored objects.
    ListFiles {
        #[arg(long)]
        prefix: Option<String>,

        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Delete a stored object by key.
    Delete { key: String },

    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Validate the config and check that the bucket is reachable.
    Test,
    /// Print the effective config with credentials masked.
    Show,
}

/// Whether a command completed without per-item failures
enum Outcome {
    Clean,
    Failures,
}

const CONFIG_TEMPLATE: &str = r#"# imgbed configuration
storage:
  endpoint: "oss-cn-hangzhou.aliyuncs.com"
  bucket_name: "your-bucket-name"
  access_key_id: "your-access-key-id"
  access_key_secret: "your-access-key-secret"
  # region: "oss-cn-hangzhou"
  # custom_domain: "https://img.example.com"
  # force_path_style: false

upload:
  path_prefix: "{year}{month}{day}/"
  naming_rule: "uuid"          # uuid | timestamp | original | hash
  enable_md5_check: true
  concurrent_limit: 5
  allowed_formats: [".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".bmp"]
  max_size_mb: 10
  # timeout_secs: 300

markdown:
  backup_original: true
  backup_suffix: ".bak"
  recursive: true
  remote_prefixes: []

cache:
  enabled: false
  # file_path: "~/.imgbed/dedup.jsonl"
"#;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(Outcome::Clean) => ExitCode::SUCCESS,
        Ok(Outcome::Failures) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<Outcome> {
    match cli.cmd {
        Command::Init { force } => {
            let path = cli.config.unwrap_or_else(|| PathBuf::from("config.yaml"));
            init_config(&path, force)?;
            println!("wrote {}", path.display());
            Ok(Outcome::Clean)
        }
        Command::Upload { paths, folder, alt } => {
            let config = load_config(cli.config)?;
            let pipeline = with_folder(connect(&config).await?, folder.as_deref());
            let results = pipeline.upload_batch(&paths).await;
            Ok(print_uploads(&results, alt.as_deref()))
        }
        Command::UploadBatch {
            dir,
            recursive,
            folder,
        } => {
            let config = load_config(cli.config)?;
            let pipeline = with_folder(connect(&config).await?, folder.as_deref());
            let paths = pipeline
                .discover_images(&dir, recursive)
                .with_context(|| format!("cannot scan {}", dir.display()))?;
            if paths.is_empty() {
                println!("no images found in {}", dir.display());
                return Ok(Outcome::Clean);
            }
            let results = pipeline.upload_batch(&paths).await;
            Ok(print_uploads(&results, None))
        }
        Command::Convert {
            path,
            recursive,
            no_recursive,
            dry_run,
            no_backup,
        } => {
            let config = load_config(cli.config)?;
            let pipeline = connect(&config).await?;
            let options = ConvertOptions::from_config(&config.markdown)
                .with_dry_run(dry_run)
                .with_backup(config.markdown.backup_original && !no_backup);
            let converter = Converter::from_config(pipeline, &config.markdown).with_options(options);

            let recursive = !no_recursive && (recursive || config.markdown.recursive);
            let summary = converter
                .process_path(&path, recursive)
                .await
                .with_context(|| format!("cannot convert {}", path.display()))?;

            for file in &summary.files {
                let mark = if file.changed { "updated" } else { "unchanged" };
                let mark = if dry_run && file.changed { "would update" } else { mark };
                println!("{mark}: {}", file.path.display());
                if let Some(backup) = &file.backup_path {
                    println!("  backup: {}", backup.display());
                }
            }
            Ok(print_report(&summary.report))
        }
        Command::ListFiles { prefix, limit } => {
            let config = load_config(cli.config)?;
            let store = S3Store::connect(&config.storage).await?;
            let objects = store.list(prefix.as_deref(), Some(limit)).await?;
            for object in &objects {
                let modified = object
                    .last_modified
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}\t{}\t{}\t{}", object.key, object.size_bytes, modified, object.url);
            }
            println!("{} object(s)", objects.len());
            Ok(Outcome::Clean)
        }
        Command::Delete { key } => {
            let config = load_config(cli.config)?;
            let store = S3Store::connect(&config.storage).await?;
            if store.delete(&key).await? {
                println!("deleted {key}");
                Ok(Outcome::Clean)
            } else {
                println!("not found: {key}");
                Ok(Outcome::Failures)
            }
        }
        Command::Config { action } => {
            let config = load_config(cli.config)?;
            match action {
                ConfigAction::Show => {
                    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
                }
                ConfigAction::Test => {
                    let store = S3Store::connect(&config.storage).await?;
                    store
                        .check()
                        .await
                        .with_context(|| format!("bucket '{}' is not reachable", config.storage.bucket_name))?;
                    println!("ok: bucket '{}' reachable", config.storage.bucket_name);
                }
            }
            Ok(Outcome::Clean)
        }
    }
}

/// `--config`, else `./config.yaml`, else `~/.imgbed/config.yaml`
fn discover_config(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    let local = PathBuf::from("config.yaml");
    if local.exists() {
        return Ok(local);
    }

    if let Some(home) = dirs::home_dir() {
        let global = home.join(".imgbed").join("config.yaml");
        if global.exists() {
            return Ok(global);
        }
    }

    bail!("no config file found; run `imgbed init` or pass --config")
}

fn load_config(explicit: Option<PathBuf>) -> Result<ImgbedConfig> {
    let path = discover_config(explicit)?;
    debug!(path = %path.display(), "loading config");
    ImgbedConfig::load(&path).with_context(|| format!("invalid config {}", path.display()))
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("cannot create {}", parent.display()))?;
    }
    std::fs::write(path, CONFIG_TEMPLATE).with_context(|| format!("cannot write {}", path.display()))
}

async fn connect(config: &ImgbedConfig) -> Result<UploadPipeline> {
    let store = S3Store::connect(&config.storage).await?;
    Ok(UploadPipeline::from_config(Arc::new(store), config)?)
}

/// `--folder` replaces the configured key prefix for this run
fn with_folder(pipeline: UploadPipeline, folder: Option<&str>) -> UploadPipeline {
    match folder {
        Some(folder) => pipeline.with_path_prefix(PathPrefixTemplate::folder(folder)),
        None => pipeline,
    }
}

fn print_uploads(results: &[UploadResult], alt: Option<&str>) -> Outcome {
    for success in results.iter().filter_map(UploadResult::success) {
        println!("{}", link_for(Path::new(&success.path), &success.url, alt));
    }
    print_report(&ProcessReport::from_results(results))
}

/// Markdown image link, alt text defaulting to the file stem
fn link_for(path: &Path, url: &str, alt: Option<&str>) -> String {
    let alt = match alt {
        Some(alt) => alt.to_string(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    format!("![{alt}]({url})")
}

fn print_report(report: &ProcessReport) -> Outcome {
    println!(
        "{} image(s): {} uploaded, {} reused, {} failed",
        report.total_images, report.uploaded_count, report.deduped_count, report.failed_count
    );
    if report.has_failures() {
        for failure in &report.failures {
            eprintln!("  {failure}");
        }
        Outcome::Failures
    } else {
        Outcome::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_use_alt_override_or_stem() {
        let path = Path::new("shots/Day One.png");
        assert_eq!(link_for(path, "https://h/k.png", None), "![Day One](https://h/k.png)");
        assert_eq!(link_for(path, "https://h/k.png", Some("cover")), "![cover](https://h/k.png)");
    }

    #[test]
    fn recursion_flags_conflict() {
        assert!(Cli::try_parse_from(["imgbed", "convert", "docs", "-r", "--no-recursive"]).is_err());
        let cli = Cli::try_parse_from(["imgbed", "convert", "docs", "--no-recursive"]).unwrap();
        assert!(matches!(cli.cmd, Command::Convert { no_recursive: true, recursive: false, .. }));
    }

    #[test]
    fn folder_is_accepted_by_both_upload_commands() {
        let cli = Cli::try_parse_from(["imgbed", "upload", "--folder", "blog", "--alt", "x", "a.png"]).unwrap();
        assert!(matches!(cli.cmd, Command::Upload { folder: Some(ref f), .. } if f == "blog"));
        let cli = Cli::try_parse_from(["imgbed", "upload-batch", "pics", "--folder", "blog"]).unwrap();
        assert!(matches!(cli.cmd, Command::UploadBatch { folder: Some(_), .. }));
    }
}
