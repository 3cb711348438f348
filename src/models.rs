//! Core data models used throughout the backfill pipeline.
//!
//! These types represent the documents, markers, generated assets, and
//! per-marker outcomes that flow from the scanner to the run summary.

use std::fmt;
use std::path::PathBuf;

use crate::error::MarkerError;

/// Half-open byte range `start..end` into a document's text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Text surrounding a marker, used to describe the wanted image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerContext {
    /// Document title (front matter `title`, else the first H1).
    pub title: Option<String>,
    /// Nearest heading above the marker.
    pub heading: Option<String>,
    /// Nearest prose paragraph above the marker.
    pub paragraph: Option<String>,
}

/// A located placeholder occurrence.
///
/// Identity is `(document, span)`; two markers are never merged even when
/// their context is identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Document path relative to the scan root, `/`-separated.
    pub document: String,
    /// Span of the placeholder target inside the document text.
    pub span: Span,
    /// 1-based line of the span start.
    pub line: usize,
    /// Raw placeholder text found at `span`.
    pub placeholder: String,
    /// Alt text of the image reference (empty for front-matter markers).
    pub alt: String,
    pub context: MarkerContext,
}

/// A scanned document: the text snapshot plus the markers found in it.
#[derive(Debug, Clone)]
pub struct Document {
    /// Absolute (or root-joined) path on disk.
    pub path: PathBuf,
    /// Path relative to the scan root, `/`-separated.
    pub relative: String,
    pub title: Option<String>,
    /// Text as loaded; every marker span refers to this snapshot.
    pub text: String,
    pub markers: Vec<Marker>,
}

/// Prompt plus optional generation parameters for one marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Aspect ratio such as `16:9`.
    pub size: Option<String>,
    pub style: Option<String>,
}

/// Raw image returned by the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl GeneratedImage {
    /// File extension matching the MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/svg+xml" => "svg",
            "image/avif" => "avif",
            _ => "png",
        }
    }
}

/// A generated and uploaded image with a durable public URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAsset {
    pub url: String,
    pub content_type: String,
    pub byte_size: u64,
    /// Store-side identifier (content-addressed).
    pub public_id: String,
}

/// Why a marker was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The on-disk span no longer holds a placeholder.
    AlreadyResolved,
    /// The document changed on disk while it was being processed.
    RewriteConflict,
    /// The run's wall-clock budget ran out.
    RunTimeout,
    /// Another marker hit a fatal error.
    Aborted,
    /// The process received an interrupt.
    Interrupted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SkipReason::AlreadyResolved => "already resolved",
            SkipReason::RewriteConflict => "rewrite conflict",
            SkipReason::RunTimeout => "run-timeout",
            SkipReason::Aborted => "aborted",
            SkipReason::Interrupted => "interrupted",
        };
        f.write_str(label)
    }
}

/// Terminal result for one marker in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplacementOutcome {
    Success(Marker, GeneratedAsset),
    Skipped(Marker, SkipReason),
    Failed(Marker, MarkerError),
}

impl ReplacementOutcome {
    pub fn marker(&self) -> &Marker {
        match self {
            ReplacementOutcome::Success(m, _)
            | ReplacementOutcome::Skipped(m, _)
            | ReplacementOutcome::Failed(m, _) => m,
        }
    }
}
