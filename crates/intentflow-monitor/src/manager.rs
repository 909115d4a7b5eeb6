//! Monitor registry and polling loops.
//!
//! Each monitor is one tokio task driven by a ticker.  A stop request flips
//! the monitor's active flag and wakes the task, which checks the flag before
//! waiting for the next tick and again after it fires.  A poll that is
//! already running is allowed to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use intentflow_core::EventType;
use intentflow_store::DedupLedger;

use crate::error::{MonitorError, Result};
use crate::normalize::normalize;
use crate::priority::PriorityHeuristic;
use crate::provider::{EventProvider, RawItem};
use crate::sink::EventSink;
use crate::transcribe::Transcriber;

/// Poll interval used when a monitor config does not set one.
pub fn default_poll_interval(event_type: EventType) -> Duration {
    match event_type {
        EventType::Voicemail | EventType::Sms => Duration::from_secs(30),
        _ => Duration::from_secs(60),
    }
}

// ---------------------------------------------------------------------------
// Config and info
// ---------------------------------------------------------------------------

/// What one monitor watches.
#[derive(Clone)]
pub struct MonitorConfig {
    pub event_type: EventType,
    pub provider: Arc<dyn EventProvider>,
    pub poll_interval: Option<Duration>,
    /// Initial checkpoint passed to the first fetch.  Defaults to the start
    /// time.
    pub since: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("event_type", &self.event_type)
            .field("provider", &self.provider.name())
            .field("poll_interval", &self.poll_interval)
            .field("since", &self.since)
            .finish()
    }
}

impl MonitorConfig {
    pub fn new(event_type: EventType, provider: Arc<dyn EventProvider>) -> Self {
        Self {
            event_type,
            provider,
            poll_interval: None,
            since: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn interval(&self) -> Duration {
        self.poll_interval
            .unwrap_or_else(|| default_poll_interval(self.event_type))
    }
}

/// A snapshot of one monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorInfo {
    pub id: Uuid,
    pub user_id: String,
    pub source_type: EventType,
    pub provider: String,
    pub poll_interval_ms: u64,
    pub active: bool,
    pub started_at: DateTime<Utc>,
    /// Start of the last successful poll.
    pub last_check: Option<DateTime<Utc>>,
    /// Events handed to the sink.
    pub processed: u64,
    pub failed_cycles: u64,
    /// Most recent poll failure, if any.
    pub last_error: Option<String>,
}

struct MonitorState {
    id: Uuid,
    user_id: String,
    active: AtomicBool,
    stop: Notify,
    info: RwLock<MonitorInfo>,
}

impl MonitorState {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn signal_stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        // Stores a permit when the task is mid-poll.
        self.stop.notify_one();
    }

    async fn snapshot(&self) -> MonitorInfo {
        let mut info = self.info.read().await.clone();
        info.active = self.is_active();
        info
    }
}

/// Returned by [`MonitorManager::start`].
#[derive(Clone)]
pub struct MonitorHandle {
    state: Arc<MonitorState>,
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("id", &self.state.id)
            .field("active", &self.state.is_active())
            .finish()
    }
}

impl MonitorHandle {
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub async fn info(&self) -> MonitorInfo {
        self.state.snapshot().await
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct Registered {
    state: Arc<MonitorState>,
    task: JoinHandle<()>,
}

/// Owns every running monitor.
pub struct MonitorManager {
    sink: Arc<dyn EventSink>,
    ledger: DedupLedger,
    transcriber: Option<Arc<dyn Transcriber>>,
    priority: Arc<PriorityHeuristic>,
    monitors: DashMap<Uuid, Registered>,
}

impl std::fmt::Debug for MonitorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorManager")
            .field("monitors", &self.monitors.len())
            .field("ledger", &self.ledger)
            .field("transcriber", &self.transcriber.is_some())
            .finish()
    }
}

impl MonitorManager {
    pub fn new(sink: Arc<dyn EventSink>, ledger: DedupLedger) -> Self {
        Self {
            sink,
            ledger,
            transcriber: None,
            priority: Arc::new(PriorityHeuristic::default()),
            monitors: DashMap::new(),
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_priority(mut self, priority: PriorityHeuristic) -> Self {
        self.priority = Arc::new(priority);
        self
    }

    /// Start polling.  The first poll happens immediately.
    pub fn start(&self, user_id: &str, config: MonitorConfig) -> Result<MonitorHandle> {
        let interval = config.interval();
        if interval.is_zero() {
            return Err(MonitorError::InvalidConfig {
                reason: "poll interval must be positive".into(),
            });
        }

        let id = Uuid::now_v7();
        let started_at = Utc::now();
        let provider_name = config.provider.name().to_string();
        let state = Arc::new(MonitorState {
            id,
            user_id: user_id.to_string(),
            active: AtomicBool::new(true),
            stop: Notify::new(),
            info: RwLock::new(MonitorInfo {
                id,
                user_id: user_id.to_string(),
                source_type: config.event_type,
                provider: provider_name.clone(),
                poll_interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                active: true,
                started_at,
                last_check: None,
                processed: 0,
                failed_cycles: 0,
                last_error: None,
            }),
        });

        let poller = Poller {
            user_id: user_id.to_string(),
            event_type: config.event_type,
            provider: config.provider,
            interval,
            since: config.since.unwrap_or(started_at),
            state: Arc::clone(&state),
            sink: Arc::clone(&self.sink),
            ledger: self.ledger.clone(),
            transcriber: self.transcriber.clone(),
            priority: Arc::clone(&self.priority),
        };
        let task = tokio::spawn(poller.run());
        self.monitors.insert(
            id,
            Registered {
                state: Arc::clone(&state),
                task,
            },
        );

        info!(
            monitor_id = %id,
            %user_id,
            source_type = %config.event_type,
            provider = %provider_name,
            interval_ms = interval.as_millis() as u64,
            "monitor started"
        );
        Ok(MonitorHandle { state })
    }

    /// Stop a monitor and remove it from the registry.  Returns without
    /// waiting for an in-flight poll.
    pub fn stop(&self, monitor_id: Uuid) -> Result<()> {
        let Some((_, registered)) = self.monitors.remove(&monitor_id) else {
            return Err(MonitorError::NotFound {
                monitor_id: monitor_id.to_string(),
            });
        };
        registered.state.signal_stop();
        debug!(%monitor_id, "monitor stop requested");
        Ok(())
    }

    /// Stop every monitor and wait for the loops to exit.
    pub async fn stop_all(&self) {
        let ids: Vec<Uuid> = self.monitors.iter().map(|entry| *entry.key()).collect();
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, registered)) = self.monitors.remove(&id) {
                registered.state.signal_stop();
                tasks.push(registered.task);
            }
        }

        let count = tasks.len();
        for joined in futures::future::join_all(tasks).await {
            if let Err(e) = joined {
                warn!(error = %e, "monitor task ended abnormally");
            }
        }
        info!(count, "all monitors stopped");
    }

    /// Snapshots of a user's monitors, oldest first.
    pub async fn get_user_monitors(&self, user_id: &str) -> Vec<MonitorInfo> {
        let states: Vec<Arc<MonitorState>> = self
            .monitors
            .iter()
            .filter(|entry| entry.state.user_id == user_id)
            .map(|entry| Arc::clone(&entry.state))
            .collect();

        let mut infos = Vec::with_capacity(states.len());
        for state in states {
            infos.push(state.snapshot().await);
        }
        infos.sort_by_key(|info| (info.started_at, info.id));
        infos
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Poll loop
// ---------------------------------------------------------------------------

struct Poller {
    user_id: String,
    event_type: EventType,
    provider: Arc<dyn EventProvider>,
    interval: Duration,
    since: DateTime<Utc>,
    state: Arc<MonitorState>,
    sink: Arc<dyn EventSink>,
    ledger: DedupLedger,
    transcriber: Option<Arc<dyn Transcriber>>,
    priority: Arc<PriorityHeuristic>,
}

impl Poller {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if !self.state.is_active() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                () = self.state.stop.notified() => break,
            }
            if !self.state.is_active() {
                break;
            }
            self.poll().await;
        }
        debug!(monitor_id = %self.state.id, "monitor loop exited");
    }

    async fn poll(&mut self) {
        let started = Utc::now();
        match self.provider.fetch_since(self.since).await {
            Ok(items) => {
                let fetched = items.len();
                let mut accepted = 0u64;
                for item in items {
                    if self.accept(item).await {
                        accepted += 1;
                    }
                }
                self.since = started;

                let mut info = self.state.info.write().await;
                info.last_check = Some(started);
                info.processed += accepted;
                debug!(monitor_id = %self.state.id, fetched, accepted, "poll cycle complete");
            }
            Err(err) => {
                warn!(
                    monitor_id = %self.state.id,
                    provider = %self.provider.name(),
                    error = %err,
                    "poll cycle failed"
                );
                let mut info = self.state.info.write().await;
                info.failed_cycles += 1;
                info.last_error = Some(err.to_string());
            }
        }
    }

    /// Turn one item into an event and dispatch it.  Returns whether it was
    /// dispatched.
    async fn accept(&self, item: RawItem) -> bool {
        let source_id = item.source_id.clone();

        if let Some(sid) = &source_id {
            match self.ledger.contains(&self.user_id, self.event_type, sid).await {
                Ok(true) => {
                    debug!(source_id = %sid, "item already processed");
                    return false;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(source_id = %sid, error = %e, "dedup lookup failed, item deferred");
                    return false;
                }
            }
        }

        let Some(item) = self.transcribe_if_needed(item).await else {
            return false;
        };
        let Some(event) = normalize(&self.user_id, self.event_type, item, &self.priority) else {
            warn!(monitor_id = %self.state.id, "item has no usable content, skipped");
            return false;
        };

        if let Some(sid) = &source_id {
            match self.ledger.claim(&self.user_id, self.event_type, sid).await {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    warn!(source_id = %sid, error = %e, "dedup claim failed, item deferred");
                    return false;
                }
            }
        }

        debug!(
            event_id = %event.id,
            user_id = %event.user_id,
            priority = ?event.priority,
            "event accepted"
        );
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            sink.dispatch(event).await;
        });
        true
    }

    async fn transcribe_if_needed(&self, mut item: RawItem) -> Option<RawItem> {
        if self.event_type != EventType::Voicemail || item.transcript.is_some() {
            return Some(item);
        }
        let Some(audio_url) = item.audio_url.clone() else {
            warn!(
                monitor_id = %self.state.id,
                source_id = ?item.source_id,
                "voicemail has neither transcript nor audio url, skipped"
            );
            return None;
        };
        let Some(transcriber) = &self.transcriber else {
            warn!(%audio_url, "no transcriber configured, voicemail skipped");
            return None;
        };
        match transcriber.transcribe(&audio_url).await {
            Ok(text) => {
                item.transcript = Some(text);
                Some(item)
            }
            Err(e) => {
                warn!(%audio_url, error = %e, "voicemail transcription failed, skipped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use intentflow_core::{EventSource, Priority};
    use tokio::sync::mpsc;

    struct Scripted {
        replies: Mutex<VecDeque<Result<Vec<RawItem>>>>,
        repeat: Vec<RawItem>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn repeating(items: Vec<RawItem>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::new()),
                repeat: items,
                calls: AtomicUsize::new(0),
            })
        }

        fn then(self: Arc<Self>, reply: Result<Vec<RawItem>>) -> Arc<Self> {
            self.replies.lock().unwrap().push_back(reply);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch_since(&self, _since: DateTime<Utc>) -> Result<Vec<RawItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.lock().unwrap().pop_front() {
                Some(reply) => reply,
                None => Ok(self.repeat.clone()),
            }
        }
    }

    struct Channel(mpsc::UnboundedSender<EventSource>);

    #[async_trait]
    impl EventSink for Channel {
        async fn dispatch(&self, event: EventSource) {
            let _ = self.0.send(event);
        }
    }

    struct Echo;

    #[async_trait]
    impl Transcriber for Echo {
        async fn transcribe(&self, audio_url: &str) -> Result<String> {
            Ok(format!("urgent message at {audio_url}"))
        }
    }

    const FAST: Duration = Duration::from_millis(10);

    fn manager() -> (MonitorManager, mpsc::UnboundedReceiver<EventSource>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MonitorManager::new(Arc::new(Channel(tx)), DedupLedger::in_memory()), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<EventSource>) -> EventSource {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no event within 2s")
            .expect("sink closed")
    }

    async fn wait_for_calls(provider: &Scripted, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while provider.calls() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("provider not polled in time");
    }

    #[test]
    fn default_intervals_by_source() {
        assert_eq!(default_poll_interval(EventType::Email), Duration::from_secs(60));
        assert_eq!(default_poll_interval(EventType::Voicemail), Duration::from_secs(30));
        assert_eq!(default_poll_interval(EventType::Sms), Duration::from_secs(30));
        assert_eq!(default_poll_interval(EventType::Webhook), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn repeated_items_are_delivered_once() {
        let (mgr, mut rx) = manager();
        let provider = Scripted::repeating(vec![RawItem::new("m-1", "hello")]);
        mgr.start(
            "u1",
            MonitorConfig::new(EventType::Sms, provider.clone()).with_poll_interval(FAST),
        )
        .unwrap();

        let event = next(&mut rx).await;
        assert_eq!(event.source_id.as_deref(), Some("m-1"));
        wait_for_calls(&provider, 4).await;
        assert!(rx.try_recv().is_err());
        mgr.stop_all().await;
    }

    #[tokio::test]
    async fn items_without_source_id_are_never_deduplicated() {
        let (mgr, mut rx) = manager();
        let anonymous = RawItem {
            body: Some("ping".into()),
            ..RawItem::default()
        };
        let provider = Scripted::repeating(vec![anonymous]);
        mgr.start("u1", MonitorConfig::new(EventType::Webhook, provider).with_poll_interval(FAST))
            .unwrap();

        assert_eq!(next(&mut rx).await.content, "ping");
        assert_eq!(next(&mut rx).await.content, "ping");
        mgr.stop_all().await;
    }

    #[tokio::test]
    async fn failed_cycle_does_not_stop_the_loop() {
        let (mgr, mut rx) = manager();
        let provider = Scripted::repeating(vec![RawItem::new("m-1", "Important: deadline moved")])
            .then(Err(MonitorError::provider("scripted", "connection reset")));
        let config =
            MonitorConfig::new(EventType::Email, provider.clone()).with_poll_interval(FAST);
        let handle = mgr.start("u1", config).unwrap();

        let event = next(&mut rx).await;
        assert_eq!(event.priority, Priority::High);
        wait_for_calls(&provider, 3).await;

        let info = handle.info().await;
        assert_eq!(info.failed_cycles, 1);
        assert!(info.last_error.unwrap().contains("connection reset"));
        assert!(info.last_check.is_some());
        mgr.stop_all().await;
    }

    #[tokio::test]
    async fn stop_halts_polling_and_unregisters() {
        let (mgr, _rx) = manager();
        let provider = Scripted::repeating(Vec::new());
        let config =
            MonitorConfig::new(EventType::Email, provider.clone()).with_poll_interval(FAST);
        let handle = mgr.start("u1", config).unwrap();
        wait_for_calls(&provider, 2).await;

        mgr.stop(handle.id()).unwrap();
        assert!(!handle.is_active());
        assert!(mgr.get_user_monitors("u1").await.is_empty());

        tokio::time::sleep(Duration::from_millis(30)).await;
        let settled = provider.calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(provider.calls(), settled);

        assert!(matches!(mgr.stop(handle.id()), Err(MonitorError::NotFound { .. })));
    }

    #[tokio::test]
    async fn stop_is_immediate_for_idle_monitors() {
        let (mgr, _rx) = manager();
        let provider = Scripted::repeating(Vec::new());
        let handle = mgr
            .start(
                "u1",
                MonitorConfig::new(EventType::Email, provider.clone())
                    .with_poll_interval(Duration::from_secs(3600)),
            )
            .unwrap();
        wait_for_calls(&provider, 1).await;

        // The loop is parked on an hour-long tick; stop_all must not wait it out.
        tokio::time::timeout(Duration::from_secs(1), mgr.stop_all())
            .await
            .expect("stop_all blocked on an idle monitor");
        assert!(!handle.is_active());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn lists_monitors_per_user() {
        let (mgr, _rx) = manager();
        let slow = Duration::from_secs(3600);
        mgr.start("u1", MonitorConfig::new(EventType::Email, Scripted::repeating(Vec::new())))
            .unwrap();
        mgr.start(
            "u1",
            MonitorConfig::new(EventType::Voicemail, Scripted::repeating(Vec::new()))
                .with_poll_interval(slow),
        )
        .unwrap();
        mgr.start("u2", MonitorConfig::new(EventType::Sms, Scripted::repeating(Vec::new())))
            .unwrap();

        let mine = mgr.get_user_monitors("u1").await;
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].source_type, EventType::Email);
        assert_eq!(mine[0].poll_interval_ms, 60_000);
        assert_eq!(mine[1].poll_interval_ms, 3_600_000);
        assert!(mine.iter().all(|m| m.active && m.provider == "scripted"));
        assert_eq!(mgr.len(), 3);
        mgr.stop_all().await;
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn voicemail_is_transcribed_before_dispatch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mgr = MonitorManager::new(Arc::new(Channel(tx)), DedupLedger::in_memory())
            .with_transcriber(Arc::new(Echo));
        let silent = RawItem {
            source_id: Some("vm-0".into()),
            ..RawItem::default()
        };
        let recorded = RawItem {
            source_id: Some("vm-1".into()),
            audio_url: Some("https://vm.test/1.wav".into()),
            from: Some("+15550100".into()),
            ..RawItem::default()
        };
        let provider = Scripted::repeating(vec![silent, recorded]);
        let config =
            MonitorConfig::new(EventType::Voicemail, provider.clone()).with_poll_interval(FAST);
        let handle = mgr.start("u1", config).unwrap();

        let event = next(&mut rx).await;
        assert_eq!(event.source_id.as_deref(), Some("vm-1"));
        assert_eq!(event.content, "urgent message at https://vm.test/1.wav");
        assert_eq!(event.priority, Priority::Urgent);
        assert_eq!(event.metadata["caller"], "+15550100");

        wait_for_calls(&provider, 3).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.info().await.processed, 1);
        mgr.stop_all().await;
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let (mgr, _rx) = manager();
        let config = MonitorConfig::new(EventType::Email, Scripted::repeating(Vec::new()))
            .with_poll_interval(Duration::ZERO);
        assert!(matches!(mgr.start("u1", config), Err(MonitorError::InvalidConfig { .. })));
    }
}
