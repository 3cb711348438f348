//! Span-based document rewriting.
//!
//! Replacements are applied to the text snapshot taken at scan time, in
//! descending start order, so earlier offsets stay valid while later spans
//! are spliced. Every byte outside the replaced spans is preserved.
//!
//! [`commit`] re-reads the file before writing and refuses to touch it if
//! it no longer matches the snapshot, then writes through a temporary file
//! in the same directory and renames it over the original.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::RewriteError;
use crate::models::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub span: Span,
    pub text: String,
}

impl Replacement {
    pub fn new(span: Span, text: impl Into<String>) -> Self {
        Self {
            span,
            text: text.into(),
        }
    }
}

/// Splice `replacements` into `text`.
///
/// Spans must lie on character boundaries inside `text` and must not
/// overlap. Order of the input slice does not matter.
pub fn apply_replacements(text: &str, replacements: &[Replacement]) -> Result<String, RewriteError> {
    let mut ordered: Vec<&Replacement> = replacements.iter().collect();
    ordered.sort_by(|a, b| b.span.start.cmp(&a.span.start));

    let mut limit = text.len();
    for r in &ordered {
        let Span { start, end } = r.span;
        if start > end
            || end > text.len()
            || !text.is_char_boundary(start)
            || !text.is_char_boundary(end)
        {
            return Err(RewriteError::OutOfBounds { start, end });
        }
        if end > limit {
            return Err(RewriteError::Overlap { start });
        }
        limit = start;
    }

    let mut out = text.to_string();
    for r in ordered {
        out.replace_range(r.span.start..r.span.end, &r.text);
    }
    Ok(out)
}

/// True when `span` of `text` still reads `expected`.
pub fn span_holds(text: &str, span: Span, expected: &str) -> bool {
    text.get(span.start..span.end) == Some(expected)
}

/// Rewrite `path` with `replacements` applied to `snapshot`.
///
/// Fails with [`RewriteError::Conflict`] when the file on disk differs from
/// `snapshot`. With `backup`, the current contents are first copied to
/// `<file>.bak`.
pub fn commit(
    path: &Path,
    snapshot: &str,
    replacements: &[Replacement],
    backup: bool,
) -> Result<(), RewriteError> {
    let current = fs::read_to_string(path)?;
    if current != snapshot {
        return Err(RewriteError::Conflict {
            path: path.display().to_string(),
        });
    }
    let updated = apply_replacements(snapshot, replacements)?;
    if updated == current {
        return Ok(());
    }

    if backup {
        fs::write(backup_path(path), &current)?;
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let permissions = fs::metadata(path)?.permissions();
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(updated.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    #[test]
    fn test_replaces_only_the_span() {
        let text = "intro\n![A fox](placeholder.jpg \"t\")\noutro\n";
        let start = text.find("placeholder.jpg").unwrap();
        let span = Span::new(start, start + "placeholder.jpg".len());
        let out = apply_replacements(text, &[Replacement::new(span, "https://cdn/x.png")]).unwrap();
        assert_eq!(out, "intro\n![A fox](https://cdn/x.png \"t\")\noutro\n");
    }

    #[test]
    fn test_order_of_input_does_not_matter() {
        let text = "AAA-BBB-CCC";
        let reps = vec![
            Replacement::new(Span::new(0, 3), "a"),
            Replacement::new(Span::new(8, 11), "cccc"),
            Replacement::new(Span::new(4, 7), "bb"),
        ];
        let mut reversed = reps.clone();
        reversed.reverse();
        assert_eq!(apply_replacements(text, &reps).unwrap(), "a-bb-cccc");
        assert_eq!(apply_replacements(text, &reversed).unwrap(), "a-bb-cccc");
    }

    #[test]
    fn test_rejects_overlap_and_bad_bounds() {
        let text = "héllo world";
        assert!(matches!(
            apply_replacements(text, &[Replacement::new(Span::new(0, 5), "x"), Replacement::new(Span::new(3, 8), "y")]),
            Err(RewriteError::Overlap { .. })
        ));
        assert!(matches!(
            apply_replacements(text, &[Replacement::new(Span::new(2, 4), "x")]),
            Err(RewriteError::OutOfBounds { .. })
        ));
        assert!(matches!(
            apply_replacements(text, &[Replacement::new(Span::new(5, 100), "x")]),
            Err(RewriteError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_random_documents_keep_unreplaced_bytes() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let fillers = ["plain text ", "## Heading\n", "ünïcødé ", "\r\n", "`code` ", "![real](a.png) "];
        for _ in 0..200 {
            let mut text = String::new();
            let mut expected = String::new();
            let mut reps = Vec::new();
            for i in 0..rng.random_range(1..12) {
                let filler = fillers[rng.random_range(0..fillers.len())];
                text.push_str(filler);
                expected.push_str(filler);
                if rng.random_bool(0.5) {
                    let start = text.len();
                    text.push_str("placeholder.jpg");
                    let url = format!("https://cdn.example/{}.png", i);
                    expected.push_str(&url);
                    reps.push(Replacement::new(Span::new(start, text.len()), url));
                }
            }
            if rng.random_bool(0.5) {
                reps.reverse();
            }
            assert_eq!(apply_replacements(&text, &reps).unwrap(), expected);
        }
    }

    #[test]
    fn test_commit_writes_atomically_with_backup() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("post.md");
        let text = "![](placeholder.jpg)\n";
        fs::write(&path, text).unwrap();

        commit(&path, text, &[Replacement::new(Span::new(4, 19), "https://x/y.png")], true).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "![](https://x/y.png)\n");
        assert_eq!(fs::read_to_string(tmp.path().join("post.md.bak")).unwrap(), text);
        let leftovers: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 2);
    }

    #[test]
    fn test_commit_refuses_changed_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("post.md");
        fs::write(&path, "edited by someone else").unwrap();

        let err = commit(&path, "![](placeholder.jpg)", &[Replacement::new(Span::new(4, 19), "u")], false)
            .unwrap_err();
        assert!(matches!(err, RewriteError::Conflict { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "edited by someone else");
    }

    #[test]
    fn test_span_check() {
        assert!(span_holds("![](placeholder.jpg)", Span::new(4, 19), "placeholder.jpg"));
        assert!(!span_holds("![](https://x)", Span::new(4, 19), "placeholder.jpg"));
    }
}
