//! Run coordination.
//!
//! Drives the full flow: scan → prompt → generate → upload → rewrite →
//! summary. A blocking producer walks the tree and hands whole documents
//! to a bounded channel; a pool of `run.concurrency` workers takes one
//! document at a time and processes its markers sequentially, then writes
//! the document once.
//!
//! Per marker:
//!
//! ```text
//! Found ─► Generating ─► Uploading ─► (pending rewrite) ─► Success
//!   │          │             │               │
//!   └──────────┴─────────────┴──► Failed / Skipped
//! ```
//!
//! Workers report through an append-only log channel that is drained once
//! the pool is done. Nothing else is shared between workers except the
//! pacer and the run guard.

use anyhow::{bail, Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, Credentials, PromptConfig};
use crate::error::{FatalError, GenerateError, MarkerError, RewriteError, UploadError};
use crate::generator::{create_generator, ImageGenerator};
use crate::guard::RunGuard;
use crate::models::{Document, GeneratedAsset, Marker, ReplacementOutcome, SkipReason};
use crate::pacing::Pacer;
use crate::prompt;
use crate::retry::{run_with_retry, RetryError, RetryPolicy};
use crate::rewrite::{self, Replacement};
use crate::scan::{ScanDiagnostic, ScanEvent, Scanner};
use crate::summary::RunSummary;
use crate::upload::{create_store, AssetStore};

/// The two external services a run talks to.
#[derive(Clone)]
pub struct Services {
    pub generator: Arc<dyn ImageGenerator>,
    pub store: Arc<dyn AssetStore>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Documents rewritten on disk.
    pub documents_written: usize,
}

impl RunReport {
    pub fn fatal(&self) -> Option<&FatalError> {
        self.summary.fatal.as_ref()
    }
}

enum LogEntry {
    Scanned,
    Unreadable(ScanDiagnostic),
    Outcome(ReplacementOutcome),
    Fatal(FatalError),
    Written,
}

/// Result of driving one marker up to the rewrite stage.
enum MarkerStep {
    Ready(GeneratedAsset),
    Done(ReplacementOutcome),
}

struct Worker {
    prompt: PromptConfig,
    generate_policy: RetryPolicy,
    upload_policy: RetryPolicy,
    write_backups: bool,
    services: Services,
    pacer: Pacer,
    guard: RunGuard,
    log: mpsc::UnboundedSender<LogEntry>,
}

/// Process every marker under the scan root.
///
/// Fails only when the run cannot start (bad scan root or globs). Per-marker
/// errors end up in the summary; a fatal service error stops the run early
/// and is reported through [`RunReport::fatal`].
pub async fn run(config: &Config, services: Services, guard: RunGuard) -> Result<RunReport> {
    let scanner = Scanner::from_config(config)?;
    let concurrency = config.run.concurrency.max(1);

    let (doc_tx, doc_rx) = mpsc::channel::<Document>(concurrency * 2);
    let (log_tx, mut log_rx) = mpsc::unbounded_channel::<LogEntry>();

    let producer = {
        let log = log_tx.clone();
        tokio::task::spawn_blocking(move || {
            for event in scanner {
                match event {
                    ScanEvent::Document(doc) => {
                        let _ = log.send(LogEntry::Scanned);
                        if doc.markers.is_empty() {
                            continue;
                        }
                        if doc_tx.blocking_send(doc).is_err() {
                            break;
                        }
                    }
                    ScanEvent::Unreadable(diag) => {
                        warn!(document = %diag.document, error = %diag.error, "skipping unreadable document");
                        let _ = log.send(LogEntry::Unreadable(diag));
                    }
                }
            }
        })
    };

    let worker = Arc::new(Worker {
        prompt: config.prompt.clone(),
        generate_policy: config.generator.retry_policy(),
        upload_policy: config.uploader.retry_policy(),
        write_backups: config.run.write_backups,
        services,
        pacer: Pacer::new(&config.pacing),
        guard,
        log: log_tx,
    });
    let doc_rx = Arc::new(Mutex::new(doc_rx));

    let mut pool = JoinSet::new();
    for _ in 0..concurrency {
        let worker = Arc::clone(&worker);
        let doc_rx = Arc::clone(&doc_rx);
        pool.spawn(async move {
            loop {
                let next = doc_rx.lock().await.recv().await;
                match next {
                    Some(doc) => worker.process_document(doc).await,
                    None => break,
                }
            }
        });
    }
    drop(worker);

    producer.await.context("scan task failed")?;
    while let Some(joined) = pool.join_next().await {
        joined.context("worker task failed")?;
    }

    let mut summary = RunSummary::default();
    let mut documents_written = 0;
    while let Ok(entry) = log_rx.try_recv() {
        match entry {
            LogEntry::Scanned => summary.documents += 1,
            LogEntry::Unreadable(diag) => summary.diagnostics.push(diag),
            LogEntry::Outcome(outcome) => summary.outcomes.push(outcome),
            LogEntry::Fatal(fatal) => {
                if summary.fatal.is_none() {
                    summary.fatal = Some(fatal);
                }
            }
            LogEntry::Written => documents_written += 1,
        }
    }
    summary.sort();

    Ok(RunReport {
        summary,
        documents_written,
    })
}

impl Worker {
    fn record(&self, outcome: ReplacementOutcome) {
        let _ = self.log.send(LogEntry::Outcome(outcome));
    }

    fn fatal(&self, fatal: FatalError) {
        error!(error = %fatal, "aborting run");
        self.guard.abort();
        let _ = self.log.send(LogEntry::Fatal(fatal));
    }

    async fn process_document(&self, doc: Document) {
        info!(
            document = %doc.relative,
            title = ?doc.title,
            markers = doc.markers.len(),
            "processing document"
        );

        let mut ready: Vec<(Marker, GeneratedAsset)> = Vec::new();
        for marker in &doc.markers {
            match self.process_marker(&doc, marker).await {
                MarkerStep::Ready(asset) => ready.push((marker.clone(), asset)),
                MarkerStep::Done(outcome) => self.record(outcome),
            }
        }
        if ready.is_empty() {
            return;
        }

        let replacements: Vec<Replacement> = ready
            .iter()
            .map(|(m, asset)| Replacement::new(m.span, asset.url.clone()))
            .collect();
        let path = doc.path.clone();
        let snapshot = doc.text;
        let backup = self.write_backups;
        let committed = tokio::task::spawn_blocking(move || {
            rewrite::commit(&path, &snapshot, &replacements, backup)
        })
        .await;

        match committed {
            Ok(Ok(())) => {
                info!(document = %doc.relative, replaced = ready.len(), "document rewritten");
                let _ = self.log.send(LogEntry::Written);
                for (marker, asset) in ready {
                    self.record(ReplacementOutcome::Success(marker, asset));
                }
            }
            Ok(Err(RewriteError::Conflict { .. })) => {
                warn!(document = %doc.relative, "document changed during run, not rewriting");
                for (marker, _) in ready {
                    self.record(ReplacementOutcome::Skipped(marker, SkipReason::RewriteConflict));
                }
            }
            Ok(Err(e)) => self.fail_all(&doc.relative, ready, e.to_string()),
            Err(e) => self.fail_all(&doc.relative, ready, e.to_string()),
        }
    }

    fn fail_all(&self, document: &str, ready: Vec<(Marker, GeneratedAsset)>, detail: String) {
        warn!(document = %document, error = %detail, "failed to write document");
        for (marker, _) in ready {
            self.record(ReplacementOutcome::Failed(
                marker,
                MarkerError::Write {
                    detail: detail.clone(),
                },
            ));
        }
    }

    async fn process_marker(&self, doc: &Document, marker: &Marker) -> MarkerStep {
        let skipped = |reason: SkipReason| MarkerStep::Done(ReplacementOutcome::Skipped(marker.clone(), reason));
        let failed = |error: MarkerError| {
            warn!(
                document = %marker.document,
                line = marker.line,
                error = %error,
                detail = error.detail(),
                "marker failed"
            );
            MarkerStep::Done(ReplacementOutcome::Failed(marker.clone(), error))
        };

        if let Some(reason) = self.guard.stop_reason() {
            return skipped(reason.into());
        }

        let current = match tokio::fs::read_to_string(&doc.path).await {
            Ok(text) => text,
            Err(e) => return failed(MarkerError::Read { detail: e.to_string() }),
        };
        if let Some(reason) = recheck(&current, &doc.text, marker) {
            return skipped(reason);
        }

        let request = prompt::synthesize(marker, &self.prompt);
        let generator = self.services.generator.as_ref();
        let request_ref = &request;
        let generated = run_with_retry(&self.generate_policy, &self.guard, Some(&self.pacer), move |_| {
            generator.generate(request_ref)
        })
        .await;
        let image = match generated {
            Ok(image) => image,
            Err(RetryError::Stopped(reason)) => return skipped(reason.into()),
            Err(RetryError::Permanent { error, .. }) => {
                if let GenerateError::Unauthorized { detail } = &error {
                    self.fatal(FatalError::GeneratorAuth(detail.clone()));
                } else {
                    self.pacer.record_failure().await;
                }
                return failed(MarkerError::Generate(error));
            }
            Err(RetryError::Exhausted { error, attempts }) => {
                self.pacer.record_failure().await;
                return failed(MarkerError::GenerateExhausted { error, attempts });
            }
        };

        if let Some(reason) = self.guard.stop_reason() {
            return skipped(reason.into());
        }

        let store = self.services.store.as_ref();
        let image_ref = &image;
        let uploaded = run_with_retry(&self.upload_policy, &self.guard, None, move |_| {
            store.upload(image_ref)
        })
        .await;
        let asset = match uploaded {
            Ok(asset) => asset,
            Err(RetryError::Stopped(reason)) => return skipped(reason.into()),
            Err(RetryError::Permanent { error, .. }) => {
                if let UploadError::AuthError { detail } = &error {
                    self.fatal(FatalError::StoreAuth(detail.clone()));
                } else {
                    self.pacer.record_failure().await;
                }
                return failed(MarkerError::Upload(error));
            }
            Err(RetryError::Exhausted { error, attempts }) => {
                self.pacer.record_failure().await;
                return failed(MarkerError::UploadExhausted { error, attempts });
            }
        };

        self.pacer.record_success().await;
        info!(document = %marker.document, line = marker.line, url = %asset.url, "image ready");
        MarkerStep::Ready(asset)
    }
}

/// Compare the file as it is on disk now with the scan snapshot.
///
/// A span that no longer holds the placeholder was resolved elsewhere; any
/// other change to the file means the snapshot is stale.
fn recheck(current: &str, snapshot: &str, marker: &Marker) -> Option<SkipReason> {
    if !rewrite::span_holds(current, marker.span, &marker.placeholder) {
        Some(SkipReason::AlreadyResolved)
    } else if current != snapshot {
        Some(SkipReason::RewriteConflict)
    } else {
        None
    }
}

/// Cancel `token` on the first signal from `next_signal`, then keep
/// listening. Returns `true` when a second signal arrives.
async fn watch_interrupts<F, Fut>(mut next_signal: F, token: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_signal().await.is_err() {
        return false;
    }
    warn!("interrupt received, finishing in-flight writes (interrupt again to exit now)");
    token.cancel();
    next_signal().await.is_ok()
}

/// `backfill run`: process the tree with the configured services and write
/// the summary.
pub async fn run_backfill(config: &Config) -> Result<()> {
    let credentials = Credentials::from_env()?;
    let services = Services {
        generator: create_generator(&config.generator, &credentials)?,
        store: create_store(&config.uploader, &credentials)?,
    };

    info!(
        generator = services.generator.model_name(),
        store = services.store.name(),
        "services ready"
    );

    let interrupt = CancellationToken::new();
    let ctrl_c = {
        let token = interrupt.clone();
        tokio::spawn(async move {
            if watch_interrupts(tokio::signal::ctrl_c, token).await {
                error!("second interrupt, exiting without waiting for in-flight requests");
                std::process::exit(130);
            }
        })
    };
    let guard = RunGuard::new(config.run.wall_clock()).with_interrupt(interrupt);

    let report = run(config, services, guard).await;
    ctrl_c.abort();
    let report = report?;

    let summary_path = &config.run.summary_path;
    report.summary.write_to(summary_path)?;

    let counts = report.summary.counts();
    println!("backfill {}", config.scan.root.display());
    println!("  documents: {} ({} unreadable)", counts.documents, counts.unreadable);
    println!("  markers found: {}", counts.found);
    println!("  replaced: {}", counts.replaced);
    println!("  failed: {}", counts.failed);
    println!("  skipped: {}", counts.skipped);
    println!("  documents written: {}", report.documents_written);
    println!("  summary: {}", summary_path.display());

    if let Some(fatal) = report.fatal() {
        bail!("Run aborted: {}", fatal);
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarkerContext, Span};
    use tokio::sync::Notify;

    fn marker(text: &str) -> Marker {
        let start = text.find("placeholder.jpg").unwrap();
        Marker {
            document: "a.md".to_string(),
            span: Span::new(start, start + "placeholder.jpg".len()),
            line: 1,
            placeholder: "placeholder.jpg".to_string(),
            alt: "x".to_string(),
            context: MarkerContext::default(),
        }
    }

    #[test]
    fn test_recheck_unchanged_file_proceeds() {
        let text = "intro\n![x](placeholder.jpg)\n";
        assert_eq!(recheck(text, text, &marker(text)), None);
    }

    #[test]
    fn test_recheck_resolved_span_is_already_resolved() {
        let snapshot = "intro\n![x](placeholder.jpg)\n";
        let current = "intro\n![x](https://cdn.example/a.png)\n";
        assert_eq!(
            recheck(current, snapshot, &marker(snapshot)),
            Some(SkipReason::AlreadyResolved)
        );
    }

    #[test]
    fn test_recheck_truncated_file_is_already_resolved() {
        let snapshot = "intro\n![x](placeholder.jpg)\n";
        assert_eq!(
            recheck("intro\n", snapshot, &marker(snapshot)),
            Some(SkipReason::AlreadyResolved)
        );
    }

    #[test]
    fn test_recheck_other_edit_is_a_conflict() {
        let snapshot = "intro\n![x](placeholder.jpg)\n";
        let current = "intro\n![x](placeholder.jpg)\nmore text\n";
        assert_eq!(
            recheck(current, snapshot, &marker(snapshot)),
            Some(SkipReason::RewriteConflict)
        );
    }

    #[tokio::test]
    async fn test_first_interrupt_cancels_second_exits() {
        let signals = Arc::new(Notify::new());
        let token = CancellationToken::new();
        let next_signal = {
            let signals = Arc::clone(&signals);
            move || {
                let signals = Arc::clone(&signals);
                async move {
                    signals.notified().await;
                    Ok::<(), std::io::Error>(())
                }
            }
        };
        let watcher = tokio::spawn(watch_interrupts(next_signal, token.clone()));

        signals.notify_one();
        token.cancelled().await;
        assert!(!watcher.is_finished());

        signals.notify_one();
        assert!(watcher.await.unwrap());
    }

    #[tokio::test]
    async fn test_signal_listener_failure_is_not_an_exit() {
        let token = CancellationToken::new();
        let failing = || async { Err::<(), _>(std::io::Error::other("no signal handler")) };
        assert!(!watch_interrupts(failing, token.clone()).await);
        assert!(!token.is_cancelled());
    }
}
