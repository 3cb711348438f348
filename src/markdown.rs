//! Markdown parsing for placeholder discovery.
//!
//! Recognizes two kinds of placeholder:
//!
//! - inline image references `![alt](target)` (an optional `"title"` is
//!   allowed after the target) outside fenced code blocks, and
//! - scalar front-matter fields such as `image: <url>` for the keys listed
//!   in `[placeholder].front_matter_keys`.
//!
//! A target is a placeholder when it equals one of the configured sentinel
//! URLs, or when its final path segment starts with a sentinel prefix
//! (default `placeholder`, case-insensitive) and carries an image extension.
//! Query strings and fragments are ignored for the prefix rule.
//!
//! Marker spans always cover the target only, so rewriting a marker leaves
//! the alt text, title and surrounding syntax untouched.

use regex::Regex;
use std::sync::LazyLock;

use crate::config::PlaceholderConfig;
use crate::error::ParseError;
use crate::models::{Marker, MarkerContext, Span};

static IMAGE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"!\[(?P<alt>[^\]\n]*)\]\([ \t]*(?P<target>[^\s)]+)(?:[ \t]+"[^"\n]*")?[ \t]*\)"#)
        .expect("image reference pattern is valid")
});

static FRONT_MATTER_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[ \t]*(?P<key>[A-Za-z_][A-Za-z0-9_-]*)[ \t]*:[ \t]*["']?(?P<value>[^"'\s#]+)["']?[ \t]*$"#)
        .expect("front matter field pattern is valid")
});

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "webp", "svg", "avif"];

/// Decides whether an image target is a placeholder.
#[derive(Debug, Clone)]
pub struct PlaceholderMatcher {
    urls: Vec<String>,
    prefixes: Vec<String>,
    front_matter_keys: Vec<String>,
}

impl PlaceholderMatcher {
    pub fn new(urls: Vec<String>, prefixes: Vec<String>, front_matter_keys: Vec<String>) -> Self {
        Self {
            urls,
            prefixes: prefixes.into_iter().map(|p| p.to_lowercase()).collect(),
            front_matter_keys,
        }
    }

    pub fn from_config(config: &PlaceholderConfig) -> Self {
        Self::new(
            config.urls.clone(),
            config.file_prefixes.clone(),
            config.front_matter_keys.clone(),
        )
    }

    pub fn matches(&self, target: &str) -> bool {
        if self.urls.iter().any(|u| u == target) {
            return true;
        }

        let path = target.split(['?', '#']).next().unwrap_or(target);
        let file_name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
        let Some((stem, ext)) = file_name.rsplit_once('.') else {
            return false;
        };
        IMAGE_EXTENSIONS.contains(&ext)
            && self
                .prefixes
                .iter()
                .any(|p| !p.is_empty() && stem.starts_with(p.as_str()))
    }

    fn is_front_matter_key(&self, key: &str) -> bool {
        self.front_matter_keys.iter().any(|k| k == key)
    }
}

/// Parsed YAML front matter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontMatter {
    pub title: Option<String>,
    /// Byte range of the YAML body (between the fences).
    pub yaml: Span,
    /// Offset just past the closing fence line.
    pub end: usize,
}

/// Parse a leading `---` fenced YAML block, if any.
///
/// Returns `Ok(None)` when the document has no front matter. A block that
/// is opened but never closed, or whose YAML does not parse, is an error.
pub fn parse_front_matter(text: &str) -> Result<Option<FrontMatter>, ParseError> {
    let mut lines = line_spans(text);
    let Some(first) = lines.next() else {
        return Ok(None);
    };
    if text[first.start..first.end].trim_end() != "---" {
        return Ok(None);
    }

    let yaml_start = first.end;
    for line in lines {
        let content = text[line.start..line.end].trim_end();
        if content == "---" || content == "..." {
            let yaml = &text[yaml_start..line.start];
            let value: serde_yaml::Value = if yaml.trim().is_empty() {
                serde_yaml::Value::Null
            } else {
                serde_yaml::from_str(yaml).map_err(|e| ParseError::FrontMatter(e.to_string()))?
            };
            let title = value.get("title").and_then(yaml_scalar_to_string);
            return Ok(Some(FrontMatter {
                title,
                yaml: Span::new(yaml_start, line.start),
                end: line.end,
            }));
        }
    }

    Err(ParseError::UnclosedFrontMatter)
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    let s = match value {
        serde_yaml::Value::String(s) => s.trim().to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Result of parsing one document.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub title: Option<String>,
    pub markers: Vec<Marker>,
}

/// Find every placeholder marker in `text`, in document order.
pub fn extract_markers(
    document: &str,
    text: &str,
    matcher: &PlaceholderMatcher,
) -> Result<ParsedDocument, ParseError> {
    let front_matter = parse_front_matter(text)?;
    let body_start = front_matter.as_ref().map(|fm| fm.end).unwrap_or(0);
    let title = front_matter
        .as_ref()
        .and_then(|fm| fm.title.clone())
        .or_else(|| first_h1(&text[body_start..]));

    let mut markers = Vec::new();

    if let Some(fm) = &front_matter {
        for line in line_spans(&text[fm.yaml.start..fm.yaml.end]) {
            let start = fm.yaml.start + line.start;
            let end = fm.yaml.start + line.end;
            let Some(caps) = FRONT_MATTER_FIELD.captures(text[start..end].trim_end_matches(['\r', '\n'])) else {
                continue;
            };
            let (Some(key), Some(value)) = (caps.name("key"), caps.name("value")) else {
                continue;
            };
            if !matcher.is_front_matter_key(key.as_str()) || !matcher.matches(value.as_str()) {
                continue;
            }
            let span = Span::new(start + value.start(), start + value.end());
            markers.push(Marker {
                document: document.to_string(),
                span,
                line: line_number(text, span.start),
                placeholder: value.as_str().to_string(),
                alt: String::new(),
                context: MarkerContext {
                    title: title.clone(),
                    heading: None,
                    paragraph: None,
                },
            });
        }
    }

    let fences = fenced_blocks(text, body_start);
    let code_spans = inline_code_spans(text, body_start, &fences);
    for caps in IMAGE_REF.captures_iter(&text[body_start..]) {
        let (Some(whole), Some(target)) = (caps.get(0), caps.name("target")) else {
            continue;
        };
        let at = body_start + whole.start();
        if fences
            .iter()
            .chain(code_spans.iter())
            .any(|f| f.start <= at && at < f.end)
        {
            continue;
        }
        if !matcher.matches(target.as_str()) {
            continue;
        }
        let span = Span::new(body_start + target.start(), body_start + target.end());
        let alt = caps
            .name("alt")
            .map(|a| a.as_str().trim().to_string())
            .unwrap_or_default();
        markers.push(Marker {
            document: document.to_string(),
            span,
            line: line_number(text, span.start),
            placeholder: target.as_str().to_string(),
            alt,
            context: MarkerContext {
                title: title.clone(),
                heading: nearest_heading(text, body_start, at, &fences),
                paragraph: preceding_paragraph(text, body_start, at, &fences),
            },
        });
    }

    Ok(ParsedDocument { title, markers })
}

/// Byte spans of each line, including its terminator.
fn line_spans(text: &str) -> impl Iterator<Item = Span> + '_ {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |line| {
        let span = Span::new(offset, offset + line.len());
        offset += line.len();
        span
    })
}

fn line_number(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

fn line_start(text: &str, offset: usize) -> usize {
    text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

/// Byte ranges covered by fenced code blocks (``` or ~~~), starting at
/// `from`. An unterminated fence runs to the end of the text.
fn fenced_blocks(text: &str, from: usize) -> Vec<Span> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, &str)> = None;
    for line in line_spans(&text[from..]) {
        let start = from + line.start;
        let trimmed = text[start..from + line.end].trim_start();
        let fence = if trimmed.starts_with("```") {
            Some("```")
        } else if trimmed.starts_with("~~~") {
            Some("~~~")
        } else {
            None
        };
        match (open, fence) {
            (None, Some(f)) => open = Some((start, f)),
            (Some((begin, f)), Some(g)) if f == g => {
                blocks.push(Span::new(begin, from + line.end));
                open = None;
            }
            _ => {}
        }
    }
    if let Some((begin, _)) = open {
        blocks.push(Span::new(begin, text.len()));
    }
    blocks
}

/// Byte ranges of backtick code spans outside fenced blocks. A run of N
/// backticks is closed by the next run of exactly N backticks in the same
/// paragraph; an unmatched run is literal text.
fn inline_code_spans(text: &str, from: usize, fences: &[Span]) -> Vec<Span> {
    let bytes = text.as_bytes();
    let in_fence = |i: usize| fences.iter().find(|f| f.start <= i && i < f.end);
    let paragraph_break = |i: usize| {
        bytes[i] == b'\n'
            && text[i + 1..]
                .trim_start_matches([' ', '\t', '\r'])
                .starts_with('\n')
    };

    let mut spans = Vec::new();
    let mut i = from;
    while i < bytes.len() {
        if let Some(fence) = in_fence(i) {
            i = fence.end;
            continue;
        }
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }

        let open = i;
        while i < bytes.len() && bytes[i] == b'`' {
            i += 1;
        }
        let run = i - open;

        let mut j = i;
        while j < bytes.len() && in_fence(j).is_none() && !paragraph_break(j) {
            if bytes[j] != b'`' {
                j += 1;
                continue;
            }
            let close = j;
            while j < bytes.len() && bytes[j] == b'`' {
                j += 1;
            }
            if j - close == run {
                spans.push(Span::new(open, j));
                i = j;
                break;
            }
        }
    }
    spans
}

fn heading_text(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if !trimmed.starts_with('#') {
        return None;
    }
    let text = trimmed.trim_start_matches('#');
    if !text.is_empty() && !text.starts_with([' ', '\t']) {
        return None;
    }
    let text = text.trim().trim_end_matches('#').trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn first_h1(body: &str) -> Option<String> {
    body.lines().find_map(|line| {
        let trimmed = line.trim();
        if trimmed.starts_with("# ") {
            heading_text(trimmed)
        } else {
            None
        }
    })
}

fn nearest_heading(text: &str, body_start: usize, at: usize, fences: &[Span]) -> Option<String> {
    let region_end = line_start(text, at);
    let mut found = None;
    for line in line_spans(&text[body_start..region_end]) {
        let start = body_start + line.start;
        if fences.iter().any(|f| f.start <= start && start < f.end) {
            continue;
        }
        if let Some(h) = heading_text(&text[start..body_start + line.end]) {
            found = Some(h);
        }
    }
    found
}

/// The closest block of prose above the marker's line, with headings,
/// image-only lines and code removed.
fn preceding_paragraph(text: &str, body_start: usize, at: usize, fences: &[Span]) -> Option<String> {
    let region_end = line_start(text, at);
    let mut paragraphs: Vec<Vec<&str>> = vec![Vec::new()];
    for line in line_spans(&text[body_start..region_end]) {
        let start = body_start + line.start;
        let content = text[start..body_start + line.end].trim();
        let in_fence = fences.iter().any(|f| f.start <= start && start < f.end);
        if content.is_empty() || in_fence {
            if paragraphs.last().is_some_and(|p| !p.is_empty()) {
                paragraphs.push(Vec::new());
            }
            continue;
        }
        if heading_text(content).is_some() || is_image_only(content) {
            continue;
        }
        if let Some(current) = paragraphs.last_mut() {
            current.push(content);
        }
    }
    paragraphs
        .into_iter()
        .rev()
        .find(|p| !p.is_empty())
        .map(|p| IMAGE_REF.replace_all(&p.join(" "), "$alt").into_owned())
}

fn is_image_only(line: &str) -> bool {
    IMAGE_REF
        .find(line)
        .is_some_and(|m| m.start() == 0 && m.end() == line.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> PlaceholderMatcher {
        PlaceholderMatcher::from_config(&PlaceholderConfig::default())
    }

    #[test]
    fn test_matcher_recognizes_sentinels() {
        let m = matcher();
        assert!(m.matches("placeholder.jpg"));
        assert!(m.matches("../img/Placeholder-hero.PNG"));
        assert!(m.matches("https://cdn.example/placeholder.webp?w=800#top"));
        assert!(m.matches(crate::config::DEFAULT_PLACEHOLDER_URL));
        assert!(!m.matches("images/hero.png"));
        assert!(!m.matches("placeholder.txt"));
        assert!(!m.matches("placeholder"));
        assert!(!m.matches("https://cdn.example/abc123.png"));
    }

    #[test]
    fn test_single_marker_span_covers_target() {
        let text = "intro\n\n![x](placeholder.jpg)\n";
        let parsed = extract_markers("a.md", text, &matcher()).unwrap();
        assert_eq!(parsed.markers.len(), 1);
        let m = &parsed.markers[0];
        assert_eq!(&text[m.span.start..m.span.end], "placeholder.jpg");
        assert_eq!(m.alt, "x");
        assert_eq!(m.line, 3);
        assert_eq!(m.context.paragraph.as_deref(), Some("intro"));
    }

    #[test]
    fn test_collects_title_heading_and_paragraph() {
        let text = "---\ntitle: \"Rust at Scale\"\ndate: 2025-01-01\n---\n\n# Rust at Scale\n\n## Memory safety\n\nOwnership removes\nwhole classes of bugs.\n\n![diagram](placeholder.png \"fig 1\")\n";
        let parsed = extract_markers("post.md", text, &matcher()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Rust at Scale"));
        let m = &parsed.markers[0];
        assert_eq!(m.context.title.as_deref(), Some("Rust at Scale"));
        assert_eq!(m.context.heading.as_deref(), Some("Memory safety"));
        assert_eq!(
            m.context.paragraph.as_deref(),
            Some("Ownership removes whole classes of bugs.")
        );
        assert_eq!(&text[m.span.start..m.span.end], "placeholder.png");
    }

    #[test]
    fn test_title_falls_back_to_first_h1() {
        let text = "# Hello World\n\n![](placeholder.jpg)\n";
        let parsed = extract_markers("a.md", text, &matcher()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Hello World"));
    }

    #[test]
    fn test_ignores_references_inside_code_fences() {
        let text = "```md\n![x](placeholder.jpg)\n```\n\n![y](placeholder.jpg)\n";
        let parsed = extract_markers("a.md", text, &matcher()).unwrap();
        assert_eq!(parsed.markers.len(), 1);
        assert_eq!(parsed.markers[0].alt, "y");
    }

    #[test]
    fn test_ignores_references_inside_inline_code() {
        let text = "Use `![x](placeholder.jpg)` or ``![`y`](placeholder.jpg)`` in posts.\n\n![z](placeholder.jpg)\n";
        let parsed = extract_markers("a.md", text, &matcher()).unwrap();
        assert_eq!(parsed.markers.len(), 1);
        assert_eq!(parsed.markers[0].alt, "z");
    }

    #[test]
    fn test_unmatched_backtick_is_literal() {
        let text = "A stray ` tick\n\n![x](placeholder.jpg)\n\nand `code`\n";
        let parsed = extract_markers("a.md", text, &matcher()).unwrap();
        assert_eq!(parsed.markers.len(), 1);
        assert_eq!(parsed.markers[0].alt, "x");
    }

    #[test]
    fn test_front_matter_default_is_empty() {
        let fm = FrontMatter::default();
        assert_eq!(fm.yaml, Span::new(0, 0));
        assert_eq!(fm.title, None);
    }

    #[test]
    fn test_front_matter_image_field_is_a_marker() {
        let url = crate::config::DEFAULT_PLACEHOLDER_URL;
        let text = format!("---\ntitle: Post\nimage: \"{}\"\n---\nBody\n", url);
        let parsed = extract_markers("a.md", &text, &matcher()).unwrap();
        assert_eq!(parsed.markers.len(), 1);
        let m = &parsed.markers[0];
        assert_eq!(&text[m.span.start..m.span.end], url);
        assert_eq!(m.line, 3);
        assert_eq!(m.context.title.as_deref(), Some("Post"));
    }

    #[test]
    fn test_non_placeholder_images_are_not_markers() {
        let text = "![real](https://cdn.example/abc123.png)\n";
        let parsed = extract_markers("a.md", text, &matcher()).unwrap();
        assert!(parsed.markers.is_empty());
    }

    #[test]
    fn test_unclosed_front_matter_is_a_parse_error() {
        let err = extract_markers("a.md", "---\ntitle: x\n\nbody", &matcher()).unwrap_err();
        assert_eq!(err, ParseError::UnclosedFrontMatter);
    }

    #[test]
    fn test_malformed_front_matter_is_a_parse_error() {
        let err = extract_markers("a.md", "---\ntitle: [unclosed\n---\n", &matcher()).unwrap_err();
        assert!(matches!(err, ParseError::FrontMatter(_)));
    }

    #[test]
    fn test_multiple_markers_in_document_order() {
        let text = "![a](placeholder-1.png) and ![b](placeholder-2.png)\n";
        let parsed = extract_markers("a.md", text, &matcher()).unwrap();
        let alts: Vec<&str> = parsed.markers.iter().map(|m| m.alt.as_str()).collect();
        assert_eq!(alts, vec!["a", "b"]);
        assert!(parsed.markers[0].span.end <= parsed.markers[1].span.start);
    }
}
