use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::MarkdownDocument;
use crate::{FailureKind, ProcessReport, UploadFailure, UploadResult};

/// Rewritten document text plus what happened to each reference
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub text: String,
    pub report: ProcessReport,
}

impl RewriteOutcome {
    pub fn changed(&self, original: &str) -> bool {
        self.text != original
    }
}

/// Replace the destination of each successfully uploaded reference with its URL.
///
/// `results` is keyed by the destination exactly as written in the document.
/// References whose upload failed, or that have no result, keep their
/// original text and are listed in the report's failures. Everything outside
/// the replaced destinations is copied byte for byte.
pub fn rewrite(document: &MarkdownDocument, results: &HashMap<String, UploadResult>) -> RewriteOutcome {
    let text = document.raw_text.as_str();
    let mut out = String::with_capacity(text.len());
    let mut report = ProcessReport::new();
    let mut seen: HashSet<&Path> = HashSet::new();
    let mut cursor = 0;

    for reference in &document.image_references {
        report.total_images += 1;
        // `./x.png` and `x.png` are one image
        let first_use = seen.insert(reference.resolved_path.as_path());

        match results.get(&reference.local_path) {
            Some(UploadResult::Success(success)) => {
                out.push_str(&text[cursor..reference.path_span.start]);
                out.push_str(&escape_destination(&success.url));
                cursor = reference.path_span.end;

                if success.deduped || !first_use {
                    report.deduped_count += 1;
                } else {
                    report.uploaded_count += 1;
                }
            }
            Some(UploadResult::Failure(failure)) => {
                report.record_failure(UploadFailure::new(
                    reference.local_path.clone(),
                    failure.kind,
                    failure.message.clone(),
                ));
            }
            None => {
                report.record_failure(UploadFailure::new(
                    reference.local_path.clone(),
                    FailureKind::Process,
                    "no upload result for image reference",
                ));
            }
        }
    }

    out.push_str(&text[cursor..]);
    RewriteOutcome { text: out, report }
}

/// Keep a URL usable as a bare Markdown destination
fn escape_destination(url: &str) -> String {
    let mut escaped = String::with_capacity(url.len());
    for c in url.chars() {
        match c {
            ' ' | '(' | ')' | '<' | '>' => {
                escaped.push_str(&urlencoding::encode(c.encode_utf8(&mut [0; 4])))
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::MarkdownScanner;
    use crate::{Fingerprint, RemoteKey, UploadSuccess};
    use std::path::Path;

    fn ok(path: &str, url: &str, deduped: bool) -> UploadResult {
        UploadResult::Success(UploadSuccess {
            path: path.to_string(),
            url: url.to_string(),
            remote_key: RemoteKey::from_string(url.rsplit('/').next().unwrap_or_default().to_string()),
            fingerprint: Fingerprint::from_string("ab".into()),
            bytes_transferred: if deduped { 0 } else { 3 },
            deduped,
        })
    }

    fn doc(text: &str) -> MarkdownDocument {
        MarkdownDocument::parse(text, Some(Path::new("/docs")), &MarkdownScanner::new())
    }

    #[test]
    fn rewrites_only_local_destinations() {
        let document = doc("A ![x](./img/a.png) B ![y](http://host/b.png) C");
        let results = HashMap::from([(
            "./img/a.png".to_string(),
            ok("/docs/img/a.png", "https://bucket/images/2025/11/k1.png", false),
        )]);

        let outcome = rewrite(&document, &results);
        assert_eq!(
            outcome.text,
            "A ![x](https://bucket/images/2025/11/k1.png) B ![y](http://host/b.png) C"
        );
        assert_eq!(outcome.report.total_images, 1);
        assert_eq!(outcome.report.uploaded_count, 1);
        assert!(outcome.changed(&document.raw_text));
    }

    #[test]
    fn failed_reference_is_left_verbatim() {
        let text = "A ![x](./img/a.png) B ![y](http://host/b.png) C";
        let document = doc(text);
        let results = HashMap::from([(
            "./img/a.png".to_string(),
            UploadResult::Failure(UploadFailure::new("/docs/img/a.png", FailureKind::Io, "not found")),
        )]);

        let outcome = rewrite(&document, &results);
        assert_eq!(outcome.text, text);
        assert_eq!(outcome.report.failed_count, 1);
        assert_eq!(outcome.report.failures[0].path, "./img/a.png");
        assert_eq!(outcome.report.failures[0].kind, FailureKind::Io);
    }

    #[test]
    fn missing_result_is_a_process_failure() {
        let document = doc("![a](a.png)");
        let outcome = rewrite(&document, &HashMap::new());
        assert_eq!(outcome.text, "![a](a.png)");
        assert_eq!(outcome.report.failures[0].kind, FailureKind::Process);
    }

    #[test]
    fn titles_and_alt_text_survive() {
        let document = doc("![a *b*](<pics/a b.png> \"T\")\n![c](c.png 'x')");
        let results = HashMap::from([
            ("pics/a b.png".to_string(), ok("/docs/pics/a b.png", "https://h/1.png", false)),
            ("c.png".to_string(), ok("/docs/c.png", "https://h/2.png", true)),
        ]);
        let outcome = rewrite(&document, &results);
        assert_eq!(outcome.text, "![a *b*](<https://h/1.png> \"T\")\n![c](https://h/2.png 'x')");
        assert_eq!(outcome.report.uploaded_count, 1);
        assert_eq!(outcome.report.deduped_count, 1);
    }

    #[test]
    fn repeated_reference_counts_one_upload() {
        let document = doc("![a](x.png) ![b](x.png)");
        let results = HashMap::from([("x.png".to_string(), ok("/docs/x.png", "https://h/x.png", false))]);
        let outcome = rewrite(&document, &results);
        assert_eq!(outcome.text, "![a](https://h/x.png) ![b](https://h/x.png)");
        assert_eq!(outcome.report.total_images, 2);
        assert_eq!(outcome.report.uploaded_count, 1);
        assert_eq!(outcome.report.deduped_count, 1);
    }

    #[test]
    fn same_file_written_two_ways_counts_one_upload() {
        let document = doc("![a](./x.png) ![b](x.png) ![c](../docs/x.png)");
        let result = ok("/docs/x.png", "https://h/x.png", false);
        let results = HashMap::from([
            ("./x.png".to_string(), result.clone()),
            ("x.png".to_string(), result.clone()),
            ("../docs/x.png".to_string(), result),
        ]);
        let outcome = rewrite(&document, &results);
        assert_eq!(outcome.report.total_images, 3);
        assert_eq!(outcome.report.uploaded_count, 1);
        assert_eq!(outcome.report.deduped_count, 2);
    }

    #[test]
    fn spaced_destination_is_replaced_whole() {
        let document = doc("![a](my pic.png \"T\") ![b](my pic.png)");
        assert_eq!(document.image_references.len(), 1);

        let document = doc("![a](my pic.png)");
        let results = HashMap::from([(
            "my pic.png".to_string(),
            ok("/docs/my pic.png", "https://h/k.png", false),
        )]);
        assert_eq!(rewrite(&document, &results).text, "![a](https://h/k.png)");
    }

    #[test]
    fn urls_with_spaces_are_escaped() {
        let document = doc("![a](<my pic.png>)");
        let results = HashMap::from([(
            "my pic.png".to_string(),
            ok("/docs/my pic.png", "https://h/my pic (1).png", false),
        )]);
        assert_eq!(rewrite(&document, &results).text, "![a](<https://h/my%20pic%20%281%29.png>)");
    }
}
