// vault-tasks/src/watch.rs

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::{
    error::Result,
    scheduler::{ChangeEvent, ChangeNotifier},
    vault::FsVault,
};

/// Feeds filesystem changes under a vault root into a scheduler.
/// Dropping it unsubscribes.
pub struct VaultWatch {
    _watcher: RecommendedWatcher,
}

impl VaultWatch {
    pub fn start(vault: &FsVault, notifier: ChangeNotifier) -> Result<Self> {
        let v = vault.clone();
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
            let ev = match res {
                Ok(ev) => ev,
                Err(e) => { warn!(error = %e, "watch error"); return; }
            };
            for change in classify(&v, &ev) {
                if !notifier.notify(change) {
                    debug!("scheduler gone, dropping change event");
                    return;
                }
            }
        })?;
        watcher.watch(vault.root(), RecursiveMode::Recursive)?;
        debug!(root = %vault.root().display(), "watching vault");
        Ok(Self { _watcher: watcher })
    }
}

/// Maps a raw filesystem event to change events for tracked documents.
pub fn classify(vault: &FsVault, ev: &Event) -> Vec<ChangeEvent> {
    let make: fn(crate::task::DocumentId) -> ChangeEvent = match ev.kind {
        EventKind::Create(_) => ChangeEvent::Created,
        EventKind::Modify(_) => ChangeEvent::Modified,
        EventKind::Remove(_) => ChangeEvent::Deleted,
        _ => return Vec::new(),
    };
    ev.paths
        .iter()
        .filter_map(|p| vault.id_of(p))
        .filter(|id| vault.tracks(id))
        .map(make)
        .collect()
}
