//! Document scanner.
//!
//! Walks the scan root and yields one [`ScanEvent`] per candidate file,
//! lazily and in a deterministic order (file names sorted at every
//! directory level), so repeated runs over an unchanged tree visit markers
//! in the same order. A scan is never cached: every [`Scanner`] re-reads
//! the tree from disk.
//!
//! Files that cannot be read as UTF-8 markdown, or whose front matter is
//! malformed, become [`ScanEvent::Unreadable`] diagnostics instead of
//! failing the scan.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{Config, ScanConfig};
use crate::error::ParseError;
use crate::markdown::{extract_markers, PlaceholderMatcher};
use crate::models::{Document, Marker};

/// A file that was skipped because it could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanDiagnostic {
    /// Path relative to the scan root.
    pub document: String,
    pub error: ParseError,
}

#[derive(Debug, Clone)]
pub enum ScanEvent {
    Document(Document),
    Unreadable(ScanDiagnostic),
}

/// Lazy, finite, non-restartable walk over the document tree.
pub struct Scanner {
    root: PathBuf,
    walker: walkdir::IntoIter,
    include: GlobSet,
    exclude: GlobSet,
    matcher: PlaceholderMatcher,
}

impl Scanner {
    pub fn new(config: &ScanConfig, matcher: PlaceholderMatcher) -> Result<Self> {
        let root = &config.root;
        if !root.is_dir() {
            bail!("Scan root does not exist or is not a directory: {}", root.display());
        }

        let include = build_globset(&config.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&default_excludes)?;

        let walker = WalkDir::new(root)
            .follow_links(config.follow_symlinks)
            .sort_by_file_name()
            .into_iter();

        Ok(Self {
            root: root.clone(),
            walker,
            include,
            exclude,
            matcher,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.scan, PlaceholderMatcher::from_config(&config.placeholder))
    }

    /// Flatten into `(document path, marker)` pairs, dropping diagnostics.
    pub fn markers(self) -> impl Iterator<Item = (String, Marker)> {
        self.filter_map(|event| match event {
            ScanEvent::Document(doc) => Some(doc.markers),
            ScanEvent::Unreadable(_) => None,
        })
        .flatten()
        .map(|marker| (marker.document.clone(), marker))
    }

    fn relative(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn load(&self, path: &Path, relative: String) -> ScanEvent {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                return ScanEvent::Unreadable(ScanDiagnostic {
                    document: relative,
                    error: ParseError::Io(e.to_string()),
                })
            }
        };
        let text = match String::from_utf8(bytes) {
            Ok(t) => t,
            Err(_) => {
                return ScanEvent::Unreadable(ScanDiagnostic {
                    document: relative,
                    error: ParseError::InvalidUtf8,
                })
            }
        };

        match extract_markers(&relative, &text, &self.matcher) {
            Ok(parsed) => ScanEvent::Document(Document {
                path: path.to_path_buf(),
                relative,
                title: parsed.title,
                text,
                markers: parsed.markers,
            }),
            Err(error) => ScanEvent::Unreadable(ScanDiagnostic {
                document: relative,
                error,
            }),
        }
    }
}

impl Iterator for Scanner {
    type Item = ScanEvent;

    fn next(&mut self) -> Option<ScanEvent> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let document = e
                        .path()
                        .map(|p| self.relative(p))
                        .unwrap_or_else(|| self.root.display().to_string());
                    return Some(ScanEvent::Unreadable(ScanDiagnostic {
                        document,
                        error: ParseError::Io(e.to_string()),
                    }));
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = self.relative(entry.path());
            if self.exclude.is_match(&relative) || !self.include.is_match(&relative) {
                continue;
            }

            return Some(self.load(entry.path(), relative));
        }
    }
}

/// `backfill scan`: list every marker without calling any service.
pub fn run_scan(config: &Config) -> Result<()> {
    let scanner = Scanner::from_config(config)?;

    let mut documents = 0usize;
    let mut with_markers = 0usize;
    let mut markers = 0usize;
    let mut unreadable = Vec::new();

    println!("{:<48} {:>5}  PLACEHOLDER", "DOCUMENT", "LINE");
    for event in scanner {
        match event {
            ScanEvent::Document(doc) => {
                documents += 1;
                if !doc.markers.is_empty() {
                    with_markers += 1;
                }
                for marker in &doc.markers {
                    markers += 1;
                    println!(
                        "{:<48} {:>5}  {}",
                        marker.document, marker.line, marker.placeholder
                    );
                }
            }
            ScanEvent::Unreadable(diag) => unreadable.push(diag),
        }
    }

    for diag in &unreadable {
        println!("{}: unreadable ({})", diag.document, diag.error);
    }
    println!(
        "markers: {} in {} of {} documents ({} unreadable)",
        markers,
        with_markers,
        documents,
        unreadable.len()
    );

    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
