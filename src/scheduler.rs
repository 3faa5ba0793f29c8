// vault-tasks/src/scheduler.rs

use async_trait::async_trait;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::{layered_config::Config, task::DocumentId};

/// Notification that a document changed outside of the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    Modified(DocumentId),
    Created(DocumentId),
    Deleted(DocumentId),
}

impl ChangeEvent {
    pub fn document(&self) -> &DocumentId {
        match self {
            Self::Modified(d) | Self::Created(d) | Self::Deleted(d) => d,
        }
    }
}

/// Handle given to change sources. Sends fail once the scheduler is gone.
#[derive(Clone, Debug)]
pub struct ChangeNotifier {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChangeNotifier {
    pub fn notify(&self, ev: ChangeEvent) -> bool { self.tx.send(ev).is_ok() }
    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}

/// Shared flag cleared on teardown; checked before any callback does work.
#[derive(Clone, Debug)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self { Self(Arc::new(AtomicBool::new(true))) }
    pub fn is_alive(&self) -> bool { self.0.load(Ordering::Acquire) }
    pub fn kill(&self) { self.0.store(false, Ordering::Release); }
}

impl Default for Liveness {
    fn default() -> Self { Self::new() }
}

/// What the scheduler drives: a full re-parse and an eviction pass.
#[async_trait]
pub trait RefreshTarget: Send + Sync {
    async fn refresh(&self, live: &Liveness);
    async fn cleanup(&self, live: &Liveness);

    /// Flag the scheduler adopts, so its teardown also reaches work the target starts on its own.
    fn liveness(&self) -> Liveness { Liveness::new() }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub debounce: Duration,
    /// `None` disables the periodic cleanup.
    pub cleanup_interval: Option<Duration>,
    pub immediate_cleanup_grace: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            cleanup_interval: None,
            immediate_cleanup_grace: Duration::from_millis(1000),
        }
    }
}

impl SchedulerOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            debounce: cfg.scheduler.debounce(),
            cleanup_interval: cfg.tasks.auto_cleanup_completed.then(|| cfg.scheduler.cleanup_interval()),
            immediate_cleanup_grace: cfg.scheduler.immediate_cleanup_grace(),
        }
    }
}

/// Decides when the target re-parses and evicts.
///
/// External changes are debounced: a burst of notifications yields one
/// refresh, `debounce` after the last of them. The cleanup timer ticks once
/// at start and then every `cleanup_interval`. Dropping the scheduler (or
/// calling [`shutdown`](Self::shutdown)) stops both timers; work already
/// running finishes, but sees a dead [`Liveness`].
pub struct RefreshScheduler {
    target: Arc<dyn RefreshTarget>,
    opts: SchedulerOptions,
    live: Liveness,
    stop_tx: watch::Sender<bool>,
    notify_tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl RefreshScheduler {
    /// Must be called inside a tokio runtime.
    pub fn start(target: Arc<dyn RefreshTarget>, opts: SchedulerOptions) -> Self {
        let live = target.liveness();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        tokio::spawn(debounce_loop(target.clone(), notify_rx, opts.debounce, live.clone(), stop_rx.clone()));
        if let Some(period) = opts.cleanup_interval {
            tokio::spawn(cleanup_loop(target.clone(), period, live.clone(), stop_rx));
        }
        debug!(?opts, "refresh scheduler started");
        Self { target, opts, live, stop_tx, notify_tx }
    }

    pub fn notifier(&self) -> ChangeNotifier { ChangeNotifier { tx: self.notify_tx.clone() } }
    pub fn liveness(&self) -> Liveness { self.live.clone() }
    pub fn options(&self) -> &SchedulerOptions { &self.opts }
    pub fn is_running(&self) -> bool { self.live.is_alive() }

    /// One eviction pass after the grace period; used when tasks are evicted as soon as they are completed.
    /// `None` once the scheduler is shut down.
    pub fn cleanup_soon(&self) -> Option<JoinHandle<()>> {
        if !self.live.is_alive() { return None; }
        let target = self.target.clone();
        let live = self.live.clone();
        let mut stop = self.stop_tx.subscribe();
        let grace = self.opts.immediate_cleanup_grace;
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = stop.changed() => return,
                _ = time::sleep(grace) => {}
            }
            if live.is_alive() { target.cleanup(&live).await; }
        }))
    }

    pub fn shutdown(&self) {
        if !self.live.is_alive() { return; }
        self.live.kill();
        self.stop_tx.send_replace(true);
        info!("refresh scheduler stopped");
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) { self.shutdown(); }
}

async fn debounce_loop(
    target: Arc<dyn RefreshTarget>,
    mut rx: mpsc::UnboundedReceiver<ChangeEvent>,
    debounce: Duration,
    live: Liveness,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let first = tokio::select! {
            _ = stop.changed() => return,
            ev = rx.recv() => match ev { Some(ev) => ev, None => return },
        };
        debug!(document = %first.document(), "change noticed, refresh pending");

        let mut coalesced = 1usize;
        let timer = time::sleep(debounce);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                _ = stop.changed() => return,
                _ = &mut timer => break,
                ev = rx.recv() => match ev {
                    Some(_) => {
                        coalesced += 1;
                        timer.as_mut().reset(Instant::now() + debounce);
                    }
                    None => break,
                },
            }
        }

        if !live.is_alive() { return; }
        debug!(coalesced, "debounced refresh");
        target.refresh(&live).await;
    }
}

async fn cleanup_loop(target: Arc<dyn RefreshTarget>, period: Duration, live: Liveness, mut stop: watch::Receiver<bool>) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.changed() => return,
            _ = ticker.tick() => {}
        }
        if !live.is_alive() { return; }
        target.cleanup(&live).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        refreshes: Mutex<Vec<Instant>>,
        cleanups: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl RefreshTarget for Recorder {
        async fn refresh(&self, _live: &Liveness) { self.refreshes.lock().push(Instant::now()); }
        async fn cleanup(&self, _live: &Liveness) { self.cleanups.lock().push(Instant::now()); }
    }

    fn opts(cleanup: Option<Duration>) -> SchedulerOptions {
        SchedulerOptions { cleanup_interval: cleanup, ..Default::default() }
    }

    fn modified(p: &str) -> ChangeEvent { ChangeEvent::Modified(DocumentId::new(p)) }

    #[tokio::test(start_paused = true)]
    async fn a_burst_of_changes_yields_one_refresh_after_the_quiet_period() {
        let rec = Arc::new(Recorder::default());
        let sched = RefreshScheduler::start(rec.clone(), opts(None));
        let n = sched.notifier();

        n.notify(modified("a.md"));
        time::sleep(Duration::from_millis(40)).await;
        n.notify(ChangeEvent::Created(DocumentId::new("b.md")));
        time::sleep(Duration::from_millis(40)).await;
        n.notify(ChangeEvent::Deleted(DocumentId::new("c.md")));
        let last = Instant::now();

        time::sleep(Duration::from_millis(499)).await;
        assert!(rec.refreshes.lock().is_empty());

        time::sleep(Duration::from_secs(2)).await;
        let refreshes = rec.refreshes.lock().clone();
        assert_eq!(refreshes.len(), 1);
        assert!(refreshes[0] >= last + Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_refresh_separately() {
        let rec = Arc::new(Recorder::default());
        let sched = RefreshScheduler::start(rec.clone(), opts(None));
        let n = sched.notifier();

        n.notify(modified("a.md"));
        time::sleep(Duration::from_secs(1)).await;
        n.notify(modified("a.md"));
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rec.refreshes.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_a_pending_refresh() {
        let rec = Arc::new(Recorder::default());
        let sched = RefreshScheduler::start(rec.clone(), opts(Some(Duration::from_secs(3600))));
        let n = sched.notifier();
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(rec.cleanups.lock().len(), 1);

        n.notify(modified("a.md"));
        time::sleep(Duration::from_millis(100)).await;
        sched.shutdown();
        assert!(!sched.is_running());

        time::sleep(Duration::from_secs(7200)).await;
        assert!(rec.refreshes.lock().is_empty());
        assert_eq!(rec.cleanups.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_runs_at_start_and_every_period() {
        let rec = Arc::new(Recorder::default());
        let _sched = RefreshScheduler::start(rec.clone(), opts(Some(Duration::from_secs(3600))));
        time::sleep(Duration::from_secs(3600 * 2 + 1)).await;
        assert_eq!(rec.cleanups.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_cleanup_timer_when_disabled() {
        let rec = Arc::new(Recorder::default());
        let _sched = RefreshScheduler::start(rec.clone(), opts(None));
        time::sleep(Duration::from_secs(3600 * 3)).await;
        assert!(rec.cleanups.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_soon_waits_for_the_grace_period() {
        let rec = Arc::new(Recorder::default());
        let sched = RefreshScheduler::start(rec.clone(), opts(None));
        let start = Instant::now();
        sched.cleanup_soon().unwrap().await.unwrap();
        let cleanups = rec.cleanups.lock().clone();
        assert_eq!(cleanups.len(), 1);
        assert!(cleanups[0] >= start + Duration::from_millis(1000));

        sched.shutdown();
        assert!(sched.cleanup_soon().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_a_pending_grace_cleanup() {
        let rec = Arc::new(Recorder::default());
        let sched = RefreshScheduler::start(rec.clone(), opts(None));
        let pending = sched.cleanup_soon().unwrap();
        time::sleep(Duration::from_millis(200)).await;
        sched.shutdown();
        pending.await.unwrap();
        assert!(rec.cleanups.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_adopts_the_target_liveness() {
        struct Shared(Liveness);
        #[async_trait]
        impl RefreshTarget for Shared {
            async fn refresh(&self, _live: &Liveness) {}
            async fn cleanup(&self, _live: &Liveness) {}
            fn liveness(&self) -> Liveness { self.0.clone() }
        }

        let live = Liveness::new();
        let sched = RefreshScheduler::start(Arc::new(Shared(live.clone())), opts(None));
        assert!(live.is_alive());
        drop(sched);
        assert!(!live.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_scheduler_closes_notifiers() {
        let rec = Arc::new(Recorder::default());
        let sched = RefreshScheduler::start(rec.clone(), opts(None));
        let n = sched.notifier();
        drop(sched);
        time::sleep(Duration::from_millis(10)).await;
        assert!(!n.notify(modified("a.md")));
        time::sleep(Duration::from_secs(1)).await;
        assert!(rec.refreshes.lock().is_empty());
    }

    #[test]
    fn options_follow_config() {
        let mut cfg = Config::default();
        assert_eq!(SchedulerOptions::from_config(&cfg).cleanup_interval, None);
        cfg.tasks.auto_cleanup_completed = true;
        cfg.scheduler.debounce_ms = 250;
        let o = SchedulerOptions::from_config(&cfg);
        assert_eq!(o.cleanup_interval, Some(Duration::from_secs(3600)));
        assert_eq!(o.debounce, Duration::from_millis(250));
    }
}
