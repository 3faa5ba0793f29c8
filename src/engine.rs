// vault-tasks/src/engine.rs

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    error::{Result, TaskError},
    eviction::{apply_removals, plan_removals, select_for_eviction},
    layered_config::{ParseScope, TaskSettings},
    parser::{parse_corpus, parse_document, ParseOptions, ParseReport, SourceDocument},
    scheduler::{Liveness, RefreshTarget},
    store::{self, TaskStore, Toggled, NEW_DOCUMENT_HEADER},
    task::{DocumentId, Task},
    vault::Vault,
};

/// Text of a single-file source that does not exist yet.
pub const SEED_DOCUMENT: &str = "# Tasks\n\n- [ ] Add your first task here\n";

pub fn now_ms() -> i64 { chrono::Utc::now().timestamp_millis() }

/// Outcome of an eviction pass.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub documents: Vec<DocumentId>,
    /// Lines left in place because they changed since the last parse.
    pub skipped_stale: usize,
    /// Documents whose read or write failed; others were still written.
    pub failed: Vec<(DocumentId, String)>,
}

/// One task view over a vault: the current snapshot plus the mutations
/// that rewrite documents and re-parse.
///
/// The engine's [`Liveness`] is adopted by a [`RefreshScheduler`](crate::RefreshScheduler)
/// driving it. Once that scheduler is torn down, writes still complete but
/// their follow-up re-parse is skipped.
pub struct TaskEngine {
    vault: Arc<dyn Vault>,
    settings: TaskSettings,
    snapshot: RwLock<TaskStore>,
    write_lock: Mutex<()>,
    reload_lock: Mutex<()>,
    live: Liveness,
    tx: broadcast::Sender<TaskStore>,
}

impl TaskEngine {
    pub fn new(vault: Arc<dyn Vault>, settings: TaskSettings) -> Self {
        Self {
            vault,
            settings,
            snapshot: RwLock::new(TaskStore::default()),
            write_lock: Mutex::new(()),
            reload_lock: Mutex::new(()),
            live: Liveness::new(),
            tx: broadcast::channel(16).0,
        }
    }

    pub fn settings(&self) -> &TaskSettings { &self.settings }
    pub fn snapshot(&self) -> TaskStore { self.snapshot.read().clone() }
    pub fn liveness(&self) -> Liveness { self.live.clone() }

    /// Receives every new snapshot after a re-parse.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskStore> { self.tx.subscribe() }

    fn parse_options(&self) -> ParseOptions {
        ParseOptions { infer_missing_completion: self.settings.infer_missing_completion, now_ms: now_ms() }
    }

    /// Parses the configured scope without touching the snapshot.
    pub async fn load(&self) -> Result<ParseReport> {
        let opts = self.parse_options();
        match self.settings.parse_scope {
            ParseScope::SingleFile => self.load_single(opts).await,
            ParseScope::Vault => self.load_vault(opts).await,
        }
    }

    async fn load_single(&self, opts: ParseOptions) -> Result<ParseReport> {
        let id = DocumentId::new(self.settings.source_file.as_str());
        let text = match self.vault.read(&id).await {
            Ok(text) => text,
            Err(TaskError::NotFound(_)) => {
                info!(document = %id, "creating task file");
                match self.vault.create(&id, SEED_DOCUMENT).await {
                    Ok(text) => text,
                    Err(e) => return Ok(unreadable(id, e)),
                }
            }
            Err(e) => return Ok(unreadable(id, e)),
        };
        Ok(ParseReport { tasks: parse_document(&id, &text, opts), unreadable: Vec::new() })
    }

    async fn load_vault(&self, opts: ParseOptions) -> Result<ParseReport> {
        let metas = self.vault.list().await?;
        let reads = join_all(metas.iter().map(|m| self.vault.read(&m.id))).await;

        let mut docs = Vec::with_capacity(metas.len());
        let mut report = ParseReport::default();
        for (meta, res) in metas.into_iter().zip(reads) {
            match res {
                Ok(text) => docs.push(SourceDocument { id: meta.id, text, modified_ms: meta.modified_ms }),
                Err(e) => {
                    warn!(document = %meta.id, error = %e, "skipping unreadable document");
                    report.unreadable.push((meta.id, e.to_string()));
                }
            }
        }
        report.tasks = parse_corpus(&docs, opts);
        Ok(report)
    }

    /// Re-parses and replaces the snapshot, unless `live` died meanwhile.
    /// Overlapping reloads are serialized, so the last one started is the one that sticks.
    pub async fn reload(&self, live: &Liveness) -> Result<Option<ParseReport>> {
        if !live.is_alive() { return Ok(None); }
        let _guard = self.reload_lock.lock().await;
        let report = self.load().await?;
        if !live.is_alive() {
            debug!("engine torn down during parse, discarding result");
            return Ok(None);
        }
        if report.is_partial() {
            warn!(count = report.unreadable.len(), "some documents could not be read");
        }
        let store = TaskStore::new(report.tasks.clone());
        debug!(tasks = store.len(), "snapshot replaced");
        *self.snapshot.write() = store.clone();
        let _ = self.tx.send(store);
        Ok(Some(report))
    }

    pub async fn refresh(&self) -> Result<ParseReport> {
        Ok(self.reload(&Liveness::new()).await?.unwrap_or_default())
    }

    async fn refresh_after_write(&self) {
        match self.reload(&self.live).await {
            Ok(Some(_)) => {}
            Ok(None) => debug!("engine torn down, skipping re-parse after write"),
            Err(e) => warn!(error = %e, "re-parse after write failed"),
        }
    }

    /// Flips a task against the live document text and re-parses.
    pub async fn toggle(&self, task: &Task) -> Result<Toggled> {
        let toggled = {
            let _guard = self.write_lock.lock().await;
            let text = self.vault.read(&task.document_id).await?;
            let toggled = store::toggle(&text, task, now_ms())?;
            self.vault.write(&task.document_id, &toggled.new_full_text).await?;
            toggled
        };
        info!(task = %task.id, completed = toggled.new_completed, "task toggled");
        self.refresh_after_write().await;
        Ok(toggled)
    }

    /// True when `toggled` should be followed by an immediate eviction pass.
    pub fn wants_immediate_cleanup(&self, toggled: &Toggled) -> bool {
        toggled.new_completed && self.settings.immediate_cleanup()
    }

    /// Appends a task to the target document, creating it if needed.
    /// Blank input is ignored and yields `None`.
    pub async fn add(&self, raw_text: &str) -> Result<Option<DocumentId>> {
        if raw_text.trim().is_empty() { return Ok(None); }
        let id = self.settings.target_document();
        {
            let _guard = self.write_lock.lock().await;
            let current = match self.vault.read(&id).await {
                Ok(text) => text,
                Err(TaskError::NotFound(_)) => self.vault.create(&id, NEW_DOCUMENT_HEADER).await?,
                Err(e) => return Err(e),
            };
            let Some(next) = store::add(Some(current.as_str()), raw_text) else { return Ok(None) };
            self.vault.write(&id, &next).await?;
        }
        info!(document = %id, "task added");
        self.refresh_after_write().await;
        Ok(Some(id))
    }

    pub async fn delete(&self, task: &Task) -> Result<()> {
        {
            let _guard = self.write_lock.lock().await;
            let text = self.vault.read(&task.document_id).await?;
            let next = store::delete(&text, task)?;
            self.vault.write(&task.document_id, &next).await?;
        }
        info!(task = %task.id, "task deleted");
        self.refresh_after_write().await;
        Ok(())
    }

    /// Scheduled cleanup: a no-op unless auto-cleanup is enabled.
    pub async fn cleanup(&self, live: &Liveness) -> CleanupReport {
        if !self.settings.auto_cleanup_completed { return CleanupReport::default(); }
        self.evict(self.settings.retention_ms(), live).await
    }

    /// Removes completed tasks older than `retention_ms` from the snapshot's documents.
    ///
    /// Every document is re-read, and only lines still identical to the
    /// parsed task are removed. Documents are written independently.
    pub async fn evict(&self, retention_ms: i64, live: &Liveness) -> CleanupReport {
        let snapshot = self.snapshot();
        let now = now_ms();
        let selected = select_for_eviction(snapshot.tasks(), retention_ms, now);
        let plan = plan_removals(selected.iter().copied());
        let mut report = CleanupReport::default();

        for (doc, lines) in plan {
            let _guard = self.write_lock.lock().await;
            let text = match self.vault.read(&doc).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(document = %doc, error = %e, "cleanup could not read document");
                    report.failed.push((doc, e.to_string()));
                    continue;
                }
            };
            let current: Vec<&str> = text.split('\n').collect();
            let valid: Vec<usize> = lines
                .iter()
                .copied()
                .filter(|&i| {
                    snapshot
                        .by_document(&doc)
                        .any(|t| t.line_index == i && current.get(i).is_some_and(|l| *l == t.raw_line))
                })
                .collect();
            report.skipped_stale += lines.len() - valid.len();
            if valid.is_empty() { continue; }

            let next = apply_removals(&text, &valid);
            if let Err(e) = self.vault.write(&doc, &next).await {
                warn!(document = %doc, error = %e, "cleanup could not write document");
                report.failed.push((doc, e.to_string()));
                continue;
            }
            report.removed += valid.len();
            report.documents.push(doc);
        }

        if report.removed > 0 {
            info!(removed = report.removed, documents = report.documents.len(), "cleaned up completed tasks");
            if live.is_alive() {
                if let Err(e) = self.reload(live).await {
                    warn!(error = %e, "re-parse after cleanup failed");
                }
            }
        }
        report
    }
}

fn unreadable(id: DocumentId, e: TaskError) -> ParseReport {
    warn!(document = %id, error = %e, "task file unreadable");
    ParseReport { tasks: Vec::new(), unreadable: vec![(id, e.to_string())] }
}

#[async_trait]
impl RefreshTarget for TaskEngine {
    async fn refresh(&self, live: &Liveness) {
        if let Err(e) = self.reload(live).await {
            warn!(error = %e, "scheduled refresh failed");
        }
    }

    async fn cleanup(&self, live: &Liveness) {
        TaskEngine::cleanup(self, live).await;
    }

    fn liveness(&self) -> Liveness { self.live.clone() }
}
