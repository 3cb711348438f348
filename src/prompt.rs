//! Prompt synthesis.
//!
//! Turns a [`Marker`]'s context into a [`GenerationRequest`]. The function
//! is pure and deterministic, so re-running after a partial failure sends an
//! equivalent request, and it never fails: a marker with no usable context
//! falls back to the document title or its humanized file name.

use crate::config::PromptConfig;
use crate::models::{GenerationRequest, Marker};

/// Alt texts that say nothing about the wanted image.
const GENERIC_ALT: [&str; 8] = [
    "image",
    "img",
    "picture",
    "photo",
    "placeholder",
    "header",
    "cover",
    "banner",
];

const FALLBACK_SUBJECT: &str = "an abstract editorial illustration";

pub fn synthesize(marker: &Marker, config: &PromptConfig) -> GenerationRequest {
    let mut parts: Vec<String> = Vec::new();
    let candidates = [
        Some(marker.alt.as_str()).filter(|alt| !is_generic_alt(alt)),
        marker.context.title.as_deref(),
        marker.context.heading.as_deref(),
        marker.context.paragraph.as_deref(),
    ];
    for candidate in candidates.into_iter().flatten() {
        let cleaned = normalize(candidate);
        if cleaned.is_empty() {
            continue;
        }
        let lower = cleaned.to_lowercase();
        if parts.iter().any(|p| p.to_lowercase().contains(&lower)) {
            continue;
        }
        parts.push(cleaned);
    }

    let subject = if parts.is_empty() {
        humanize_file_stem(&marker.document).unwrap_or_else(|| FALLBACK_SUBJECT.to_string())
    } else {
        parts.join(". ")
    };

    let mut prompt = config.template.replace("{subject}", &subject);
    if let Some(style) = config.style.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!(" Style: {}.", style.trim()));
    }

    GenerationRequest {
        prompt: truncate_chars(&prompt, config.max_chars),
        size: config.size.clone(),
        style: config.style.clone(),
    }
}

fn is_generic_alt(alt: &str) -> bool {
    let alt = alt.trim().to_lowercase();
    alt.is_empty() || GENERIC_ALT.contains(&alt.as_str())
}

/// Strip markdown emphasis and collapse whitespace.
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '*' | '_' | '`' | '#' | '>' | '[' | ']' => ' ',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn humanize_file_stem(document: &str) -> Option<String> {
    let name = document.rsplit('/').next().unwrap_or(document);
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    let words = stem
        .split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!words.is_empty()).then_some(words)
}

/// Bound `text` to `max` characters, cutting at a word boundary when one
/// exists in the second half of the window.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .nth(max)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let window = &text[..cut];
    let boundary = window
        .rfind(char::is_whitespace)
        .filter(|&i| window[..i].chars().count() >= max / 2)
        .unwrap_or(cut);
    window[..boundary].trim_end().to_string()
}
