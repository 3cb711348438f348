//! Run summary: aggregate counts plus one line per marker.
//!
//! The summary is rendered from outcomes sorted by `(document, span start)`
//! so that two runs over the same tree with the same results produce
//! identical files, whatever order the workers finished in.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::error::FatalError;
use crate::models::ReplacementOutcome;
use crate::scan::ScanDiagnostic;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub found: usize,
    pub replaced: usize,
    pub failed: usize,
    pub skipped: usize,
    pub documents: usize,
    pub unreadable: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Documents scanned successfully, with or without markers.
    pub documents: usize,
    pub outcomes: Vec<ReplacementOutcome>,
    pub diagnostics: Vec<ScanDiagnostic>,
    pub fatal: Option<FatalError>,
}

impl RunSummary {
    pub fn counts(&self) -> Counts {
        let mut counts = Counts {
            found: self.outcomes.len(),
            documents: self.documents,
            unreadable: self.diagnostics.len(),
            ..Counts::default()
        };
        for outcome in &self.outcomes {
            match outcome {
                ReplacementOutcome::Success(..) => counts.replaced += 1,
                ReplacementOutcome::Failed(..) => counts.failed += 1,
                ReplacementOutcome::Skipped(..) => counts.skipped += 1,
            }
        }
        counts
    }

    /// Sort outcomes and diagnostics into reporting order.
    pub fn sort(&mut self) {
        self.outcomes.sort_by(|a, b| {
            let (a, b) = (a.marker(), b.marker());
            (a.document.as_str(), a.span.start).cmp(&(b.document.as_str(), b.span.start))
        });
        self.diagnostics.sort_by(|a, b| a.document.cmp(&b.document));
    }

    pub fn render(&self) -> String {
        let mut sorted = self.clone();
        sorted.sort();

        let mut out = String::new();
        for outcome in &sorted.outcomes {
            let line = match outcome {
                ReplacementOutcome::Success(m, _) => format!("{}: replaced", m.document),
                ReplacementOutcome::Failed(m, e) => format!("{}: failed ({})", m.document, e),
                ReplacementOutcome::Skipped(m, r) => format!("{}: skipped ({})", m.document, r),
            };
            out.push_str(&line);
            out.push('\n');
        }
        for diag in &sorted.diagnostics {
            out.push_str(&format!("{}: unreadable ({})\n", diag.document, diag.error));
        }
        if let Some(fatal) = &sorted.fatal {
            out.push_str(&format!("aborted: {}\n", fatal));
        }

        let c = self.counts();
        out.push_str(&format!(
            "found: {}, replaced: {}, failed: {}, skipped: {}, documents: {}, unreadable: {}\n",
            c.found, c.replaced, c.failed, c.skipped, c.documents, c.unreadable
        ));
        out
    }

    /// Write the rendered summary to `path`, replacing any previous file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, self.render())
            .with_context(|| format!("Failed to write summary: {}", path.display()))
    }
}
