use std::borrow::Cow;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};

/// A local image reference found in Markdown text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub alt_text: String,
    /// Destination exactly as written in the document
    pub local_path: String,
    /// Destination decoded and resolved against the document's directory
    pub resolved_path: PathBuf,
    /// Byte range of the whole `![alt](...)` construct
    pub span: Range<usize>,
    /// Byte range of the destination inside `span`
    pub path_span: Range<usize>,
}

/// Finds `![alt](path)` references whose destination is a local file.
///
/// Destinations with a URL scheme (`http://`, `https://`, ...), `data:` URIs,
/// protocol-relative `//host` links and any configured remote prefix are
/// skipped. Fenced and indented code blocks and inline code spans are not
/// scanned.
#[derive(Debug, Clone, Default)]
pub struct MarkdownScanner {
    remote_prefixes: Vec<String>,
}

impl MarkdownScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat destinations starting with `prefix` as already hosted
    pub fn with_remote_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        let prefix = prefix.into();
        if !prefix.is_empty() {
            self.remote_prefixes.push(prefix);
        }
        self
    }

    pub fn with_remote_prefixes<I, S>(self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        prefixes
            .into_iter()
            .fold(self, |scanner, prefix| scanner.with_remote_prefix(prefix))
    }

    pub fn is_remote(&self, destination: &str) -> bool {
        let lower = destination.to_ascii_lowercase();
        has_url_scheme(&lower)
            || lower.starts_with("data:")
            || lower.starts_with("//")
            || self
                .remote_prefixes
                .iter()
                .any(|p| destination.starts_with(p.as_str()))
    }

    /// Local image references in document order
    pub fn scan(&self, text: &str, base_dir: Option<&Path>) -> Vec<ImageReference> {
        let bytes = text.as_bytes();
        let blocks = code_blocks(text);
        let mut refs = Vec::new();
        let mut block_iter = blocks.iter().peekable();
        let mut i = 0;

        while i < bytes.len() {
            while let Some(block) = block_iter.peek() {
                if block.end <= i {
                    block_iter.next();
                } else {
                    break;
                }
            }
            if let Some(block) = block_iter.peek() {
                if block.contains(&i) {
                    i = block.end;
                    continue;
                }
            }

            match bytes[i] {
                b'\\' => i += 2,
                b'`' => i = skip_code_span(bytes, i),
                b'!' if bytes.get(i + 1) == Some(&b'[') => match parse_image(text, i) {
                    Some(parsed) => {
                        let destination = &text[parsed.path_span.clone()];
                        if !destination.is_empty() && !self.is_remote(destination) {
                            refs.push(ImageReference {
                                alt_text: text[parsed.alt_span].to_string(),
                                local_path: destination.to_string(),
                                resolved_path: resolve(destination, base_dir),
                                span: i..parsed.end,
                                path_span: parsed.path_span,
                            });
                        }
                        i = parsed.end;
                    }
                    None => i += 1,
                },
                _ => i += 1,
            }
        }

        refs
    }
}

struct ParsedImage {
    alt_span: Range<usize>,
    path_span: Range<usize>,
    end: usize,
}

/// Parse `![alt](dest "title")` starting at the `!`
fn parse_image(text: &str, start: usize) -> Option<ParsedImage> {
    let bytes = text.as_bytes();

    // alt text, brackets balanced, no blank line
    let alt_start = start + 2;
    let mut depth = 1usize;
    let mut i = alt_start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            b'\n' if bytes.get(i + 1) == Some(&b'\n') => return None,
            _ => {}
        }
        i += 1;
    }
    if i >= bytes.len() {
        return None;
    }
    let alt_span = alt_start..i;
    i += 1;

    if bytes.get(i) != Some(&b'(') {
        return None;
    }
    i = skip_inline_space(bytes, i + 1);

    let path_span = if bytes.get(i) == Some(&b'<') {
        let open = i + 1;
        let close = open + bytes[open..].iter().position(|&b| b == b'>' || b == b'\n')?;
        if bytes[close] != b'>' {
            return None;
        }
        i = close + 1;
        open..close
    } else {
        let open = i;
        let mut parens = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 1,
                b'(' => parens += 1,
                b')' if parens == 0 => break,
                b')' => parens -= 1,
                b if b.is_ascii_whitespace() || b.is_ascii_control() => break,
                _ => {}
            }
            i += 1;
        }
        let stop = i.min(bytes.len());

        // `![a](my pic.png)`: a space not followed by a title or `)` stays in the path
        if matches!(bytes.get(stop), Some(b' ' | b'\t')) {
            let next = skip_inline_space(bytes, stop);
            if !matches!(bytes.get(next), Some(b'"' | b'\'' | b'(' | b')')) {
                if let Some(close) = spaced_destination_end(bytes, stop, parens) {
                    let dest_end = open + text[open..close].trim_end().len();
                    return Some(ParsedImage {
                        alt_span,
                        path_span: open..dest_end,
                        end: close + 1,
                    });
                }
            }
        }
        open..stop
    };

    i = skip_inline_space(bytes, i);

    // optional title
    if let Some(&quote) = bytes.get(i) {
        let closing = match quote {
            b'"' => Some(b'"'),
            b'\'' => Some(b'\''),
            b'(' => Some(b')'),
            _ => None,
        };
        if let Some(closing) = closing {
            let rel = bytes[i + 1..].iter().position(|&b| b == closing)?;
            i = skip_inline_space(bytes, i + 1 + rel + 1);
        }
    }

    if bytes.get(i) != Some(&b')') {
        return None;
    }

    Some(ParsedImage {
        alt_span,
        path_span,
        end: i + 1,
    })
}

/// Closing `)` of a bare destination containing spaces, on the same line
fn spaced_destination_end(bytes: &[u8], mut i: usize, mut parens: usize) -> Option<usize> {
    while let Some(&b) = bytes.get(i) {
        match b {
            b'\\' => i += 1,
            b'(' => parens += 1,
            b')' if parens == 0 => return Some(i),
            b')' => parens -= 1,
            b'\n' | b'[' | b']' | b'"' | b'<' | b'>' => return None,
            _ => {}
        }
        i += 1;
    }
    None
}

fn skip_inline_space(bytes: &[u8], mut i: usize) -> usize {
    let mut newlines = 0;
    while let Some(&b) = bytes.get(i) {
        match b {
            b' ' | b'\t' | b'\r' => {}
            b'\n' if newlines == 0 => newlines += 1,
            _ => break,
        }
        i += 1;
    }
    i
}

/// Skip an inline code span that opens at `start`; unmatched runs are literal
fn skip_code_span(bytes: &[u8], start: usize) -> usize {
    let run = bytes[start..].iter().take_while(|&&b| b == b'`').count();
    let mut i = start + run;
    while i < bytes.len() {
        if bytes[i] == b'`' {
            let close = bytes[i..].iter().take_while(|&&b| b == b'`').count();
            if close == run {
                return i + close;
            }
            i += close;
        } else {
            i += 1;
        }
    }
    start + run
}

/// Byte ranges of code blocks in document order: fenced (``` or ~~~) with
/// their fence lines, and indented by four columns after a blank line
fn code_blocks(text: &str) -> Vec<Range<usize>> {
    let mut blocks = Vec::new();
    let mut fence: Option<(u8, usize, usize)> = None;
    let mut indented: Option<usize> = None;
    let mut prev_blank = true;
    let mut in_list = false;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let blank = line.trim().is_empty();
        let width = indent_width(line);

        if fence.is_none() {
            if let Some(start) = indented {
                if blank || width >= 4 {
                    prev_blank = blank;
                    continue;
                }
                blocks.push(start..line_start);
                indented = None;
            } else if !blank && width >= 4 && prev_blank && !in_list {
                // list item continuations are indented too
                indented = Some(line_start);
                prev_blank = false;
                continue;
            }
        }

        prev_blank = blank;
        if blank || width > 3 {
            continue;
        }

        let body = &line.as_bytes()[width..];
        let marker = body.first().copied().filter(|&b| b == b'`' || b == b'~');
        let run = marker.map_or(0, |m| body.iter().take_while(|&&b| b == m).count());

        if let Some(marker) = marker.filter(|_| run >= 3) {
            match fence {
                None => fence = Some((marker, run, line_start)),
                Some((m, len, start)) if m == marker && run >= len => {
                    if body[run..].iter().all(|b| b.is_ascii_whitespace()) {
                        blocks.push(start..offset);
                        fence = None;
                    }
                }
                Some(_) => {}
            }
            continue;
        }

        if fence.is_none() {
            in_list = is_list_item(body);
        }
    }

    if let Some(start) = indented {
        blocks.push(start..text.len());
    }
    if let Some((_, _, start)) = fence {
        blocks.push(start..text.len());
    }
    blocks
}

/// Leading whitespace in columns, tabs to the next multiple of four
fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for b in line.bytes() {
        match b {
            b' ' => width += 1,
            b'\t' => width += 4 - width % 4,
            _ => break,
        }
    }
    width
}

/// `- `, `* `, `+ `, `1. ` or `1) ` at the start of a line
fn is_list_item(body: &[u8]) -> bool {
    if matches!(body, [b'-' | b'*' | b'+', b' ' | b'\t', ..]) {
        return true;
    }
    let digits = body.iter().take_while(|b| b.is_ascii_digit()).count();
    (1..=9).contains(&digits)
        && matches!(body.get(digits..digits + 2), Some([b'.' | b')', b' ' | b'\t']))
}

/// `scheme://` at the start of a lowercased destination
fn has_url_scheme(lower: &str) -> bool {
    let Some(idx) = lower.find("://") else {
        return false;
    };
    let scheme = &lower[..idx];
    !scheme.is_empty()
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Decode and resolve a destination against the document directory
fn resolve(destination: &str, base_dir: Option<&Path>) -> PathBuf {
    // undecodable escapes are kept as written
    let decoded = urlencoding::decode(destination).unwrap_or(Cow::Borrowed(destination));
    let path = Path::new(decoded.as_ref());
    let joined = match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    };
    normalize(&joined)
}

/// Lexically remove `.` and resolvable `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> Vec<ImageReference> {
        MarkdownScanner::new().scan(text, Some(Path::new("/docs")))
    }

    #[test]
    fn finds_local_and_skips_remote() {
        let text = "A ![x](./img/a.png) B ![y](http://host/b.png) C";
        let refs = scan(text);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].alt_text, "x");
        assert_eq!(refs[0].local_path, "./img/a.png");
        assert_eq!(&text[refs[0].span.clone()], "![x](./img/a.png)");
        assert_eq!(&text[refs[0].path_span.clone()], "./img/a.png");
        assert_eq!(refs[0].resolved_path, PathBuf::from("/docs/img/a.png"));
    }

    #[test]
    fn skips_https_data_and_configured_prefixes() {
        let scanner = MarkdownScanner::new().with_remote_prefix("cdn.example.com/");
        let text = "![a](HTTPS://x/y.png) ![b](data:image/png;base64,AAA) ![c](cdn.example.com/z.png) ![d](//host/e.png)";
        assert!(scanner.scan(text, None).is_empty());
    }

    #[test]
    fn keeps_titles_and_angle_destinations() {
        let text = r#"![t](pics/a.png "Title") and ![u](<my pics/b c.png>)"#;
        let refs = scan(text);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].local_path, "pics/a.png");
        assert_eq!(refs[1].local_path, "my pics/b c.png");
        assert_eq!(refs[1].resolved_path, PathBuf::from("/docs/my pics/b c.png"));
    }

    #[test]
    fn parent_dirs_and_percent_escapes_resolve() {
        let refs = scan("![p](../assets/my%20shot.png)");
        assert_eq!(refs[0].local_path, "../assets/my%20shot.png");
        assert_eq!(refs[0].resolved_path, PathBuf::from("/assets/my shot.png"));
    }

    #[test]
    fn nested_brackets_and_parens() {
        let text = "![a [b] c](img/x(1).png)";
        let refs = scan(text);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].alt_text, "a [b] c");
        assert_eq!(refs[0].local_path, "img/x(1).png");
        assert_eq!(refs[0].span, 0..text.len());
    }

    #[test]
    fn ignores_code_fences_and_spans() {
        let text = "```md\n![a](a.png)\n```\n`![b](b.png)` ![c](c.png)\n~~~\n![d](d.png)\n~~~\n";
        let refs = scan(text);
        let paths: Vec<_> = refs.iter().map(|r| r.local_path.as_str()).collect();
        assert_eq!(paths, ["c.png"]);
    }

    #[test]
    fn plain_links_and_broken_syntax_are_ignored() {
        let text = "[link](a.png) ![no close](b.png ![empty]() \\![escaped](c.png)";
        assert!(scan(text).is_empty());
    }

    #[test]
    fn duplicate_references_are_all_reported() {
        let text = "![a](x.png)\n\n![b](x.png)";
        let refs = scan(text);
        assert_eq!(refs.len(), 2);
        assert!(refs[0].span.end <= refs[1].span.start);
    }

    #[test]
    fn multibyte_text_offsets_are_char_boundaries() {
        let text = "图片：![示例](./图/a.png)。";
        let refs = scan(text);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].alt_text, "示例");
        assert_eq!(&text[refs[0].path_span.clone()], "./图/a.png");
    }

    #[test]
    fn unclosed_fence_runs_to_end() {
        let text = "![a](a.png)\n```\n![b](b.png)\n";
        let refs = scan(text);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].local_path, "a.png");
    }

    #[test]
    fn bare_destinations_may_contain_spaces() {
        let text = "![a](my pic.png) ![b](shots/day one (2).png ) ![c](x.png \"T\")";
        let refs = scan(text);
        let paths: Vec<_> = refs.iter().map(|r| r.local_path.as_str()).collect();
        assert_eq!(paths, ["my pic.png", "shots/day one (2).png", "x.png"]);
        assert_eq!(refs[0].resolved_path, PathBuf::from("/docs/my pic.png"));
        assert_eq!(&text[refs[0].span.clone()], "![a](my pic.png)");
        assert_eq!(&text[refs[1].path_span.clone()], "shots/day one (2).png");
    }

    #[test]
    fn spaced_destination_does_not_cross_lines() {
        assert!(scan("![a](my pic.png\n)").is_empty());
    }

    #[test]
    fn invalid_escapes_are_kept() {
        let refs = scan("![a](100%zz.png) ![b](caf%C3%A9.png)");
        assert_eq!(refs[0].resolved_path, PathBuf::from("/docs/100%zz.png"));
        assert_eq!(refs[1].resolved_path, PathBuf::from("/docs/caf\u{e9}.png"));
    }

    #[test]
    fn ignores_indented_code_blocks() {
        let text = "Text\n\n    ![a](a.png)\n    more\n\n\t![t](t.png)\n![b](b.png)\nPara\n    ![c](c.png)\n\n- item\n\n    ![d](d.png)\n";
        let refs = scan(text);
        let paths: Vec<_> = refs.iter().map(|r| r.local_path.as_str()).collect();
        assert_eq!(paths, ["b.png", "c.png", "d.png"]);
    }

    #[test]
    fn windows_drive_paths_are_local() {
        let scanner = MarkdownScanner::new();
        assert!(!scanner.is_remote("C:\\pics\\a.png"));
        assert!(scanner.is_remote("ftp://host/a.png"));
    }
}
