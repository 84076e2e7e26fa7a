//! RTD Server
//!
//! Owns the topic table and the worker thread, and answers the host's RTD
//! protocol calls.
//!
//! # Locking
//!
//! - The topic table sits behind one mutex. Inserting, removing and the
//!   worker's scan all take it.
//! - The host callback is cloned out of its lock before it is invoked, so
//!   a host that calls straight back into the server cannot deadlock.
//! - The worker sleeps on a condition variable, so terminate wakes it at
//!   once instead of waiting out the poll interval.
//!
//! Each started worker gets a fresh token. The token doubles as the
//! heartbeat answer, and a worker exits as soon as its token is no longer
//! current, which keeps a detached worker from running alongside a newer
//! one.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use super::dispatch::DispatchRegistry;
use super::join_within;
use super::topic::{RunOutcome, Topic, TopicId, TopicState};
use crate::config::RtdConfig;
use crate::error::{Error, Result};

/// Callback the host hands over in [`RtdServer::server_start`].
pub trait UpdateEvent: Send + Sync {
    /// Tell the host that new values are ready to be pulled.
    fn update_notify(&self) -> Result<()>;

    /// Tell the host how often to call [`RtdServer::heartbeat`].
    fn set_heartbeat_interval(&self, interval: Duration) -> Result<()> {
        let _ = interval;
        Ok(())
    }
}

static NEXT_WORKER_TOKEN: AtomicI32 = AtomicI32::new(1);

fn next_worker_token() -> i32 {
    loop {
        let token = NEXT_WORKER_TOKEN.fetch_add(1, Ordering::Relaxed);
        // 0 means "no worker".
        if token != 0 {
            return token;
        }
    }
}

struct Inner {
    config: RtdConfig,
    dispatch: Arc<DispatchRegistry>,
    topics: Mutex<BTreeMap<TopicId, Topic>>,
    running: AtomicBool,
    token: AtomicI32,
    callback: RwLock<Option<Arc<dyn UpdateEvent>>>,
    sleep_lock: Mutex<()>,
    wake: Condvar,
}

impl Inner {
    fn is_current(&self, token: i32) -> bool {
        self.running.load(Ordering::Acquire) && self.token.load(Ordering::Acquire) == token
    }

    fn worker_loop(&self, token: i32) {
        debug!(token, "RTD worker started");
        while self.is_current(token) {
            let changed = self.poll_topics(token);

            if changed && self.is_current(token) {
                let callback = self.callback.read().clone();
                if let Some(callback) = callback {
                    trace!(token, "notifying host");
                    if let Err(err) = callback.update_notify() {
                        warn!(token, %err, "update notification failed");
                    }
                }
            }

            let mut guard = self.sleep_lock.lock();
            if !self.is_current(token) {
                break;
            }
            self.wake.wait_for(&mut guard, self.config.poll_interval());
        }
        debug!(token, "RTD worker exited");
    }

    /// One scan of the table. Returns whether any topic has an unpublished
    /// value.
    fn poll_topics(&self, token: i32) -> bool {
        let topics = self.topics.lock();
        let mut changed = false;
        for topic in topics.values() {
            if !self.is_current(token) {
                break;
            }
            if !topic.is_running() {
                match topic.run_task() {
                    RunOutcome::Finished(status) if status != 0 => {
                        debug!(topic_id = topic.id(), status, "task returned non-zero status");
                    }
                    outcome => trace!(topic_id = topic.id(), ?outcome, "poll"),
                }
            }
            changed |= topic.has_changed();
        }
        changed
    }

    fn signal_stop(&self) {
        let _guard = self.sleep_lock.lock();
        self.running.store(false, Ordering::Release);
        self.token.store(0, Ordering::Release);
        self.wake.notify_all();
    }
}

/// The RTD server: a topic table plus the worker that keeps it fresh.
///
/// All methods take `&self`; the server can be shared between the host's
/// calling thread and anything else that needs it.
pub struct RtdServer {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RtdServer {
    pub fn new(config: RtdConfig, dispatch: Arc<DispatchRegistry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                dispatch,
                topics: Mutex::new(BTreeMap::new()),
                running: AtomicBool::new(false),
                token: AtomicI32::new(0),
                callback: RwLock::new(None),
                sleep_lock: Mutex::new(()),
                wake: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RtdConfig {
        &self.inner.config
    }

    pub fn dispatch(&self) -> &DispatchRegistry {
        &self.inner.dispatch
    }

    /// Install the host callback and start the worker if it is not running.
    ///
    /// Returns the worker token, the same value [`heartbeat`](Self::heartbeat)
    /// reports.
    pub fn server_start(&self, callback: Arc<dyn UpdateEvent>) -> Result<i32> {
        callback.set_heartbeat_interval(self.inner.config.heartbeat_interval())?;
        *self.inner.callback.write() = Some(callback);

        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let token = next_worker_token();
            self.inner.token.store(token, Ordering::Release);

            let inner = Arc::clone(&self.inner);
            let spawned = thread::Builder::new()
                .name("rtd-worker".into())
                .spawn(move || inner.worker_loop(token));
            match spawned {
                Ok(handle) => {
                    *self.worker.lock() = Some(handle);
                    info!(
                        token,
                        poll_ms = self.inner.config.poll_interval_ms,
                        "RTD server started"
                    );
                }
                Err(err) => {
                    self.inner.signal_stop();
                    return Err(Error::ThreadSpawn(err.to_string()));
                }
            }
        }

        Ok(self.heartbeat())
    }

    /// Open topic `id` with the host's parameter strings.
    ///
    /// Returns the value to show right away: the topic's default when
    /// `get_new_values` is set and a default exists.
    pub fn connect_data(
        &self,
        id: TopicId,
        strings: &[String],
        get_new_values: bool,
    ) -> Result<Option<String>> {
        let mut topics = self.inner.topics.lock();
        if topics.contains_key(&id) {
            return Err(Error::DuplicateTopic(id));
        }

        let mut topic = Topic::try_from_strings(id, strings)?
            .with_stop_grace(self.inner.config.stop_grace());
        topic.set_default(self.inner.config.connect_default.clone());
        if let Err(err) = self.inner.dispatch.resolve_and_attach(&mut topic) {
            debug!(topic_id = id, %err, "topic has no task");
        }

        let initial = (get_new_values && topic.has_default()).then(|| topic.default_value());
        topics.insert(id, topic);
        debug!(topic_id = id, args = ?strings, "topic connected");
        Ok(initial)
    }

    /// Collect every changed topic as `(id, value)` and mark it published.
    pub fn refresh_data(&self) -> Vec<(TopicId, String)> {
        if !self.is_running() {
            return Vec::new();
        }
        let missing = self.inner.config.missing_value_text.as_str();
        let topics = self.inner.topics.lock();
        let updates: Vec<_> = topics
            .values()
            .filter(|topic| topic.has_changed())
            .map(|topic| (topic.id(), topic.publish(missing)))
            .collect();
        trace!(count = updates.len(), "refresh");
        updates
    }

    /// Stop and remove topic `id`.
    pub fn disconnect_data(&self, id: TopicId) -> Result<()> {
        let topic = self
            .inner
            .topics
            .lock()
            .remove(&id)
            .ok_or(Error::UnknownTopic(id))?;
        topic.stop_task();
        debug!(topic_id = id, "topic disconnected");
        Ok(())
    }

    /// The current worker token, or 0 when the server is stopped.
    pub fn heartbeat(&self) -> i32 {
        self.inner.token.load(Ordering::Acquire)
    }

    /// Stop the worker, stop and drop every topic, and forget the callback.
    pub fn server_terminate(&self) {
        self.inner.signal_stop();

        let grace = self.inner.config.stop_grace();
        if let Some(handle) = self.worker.lock().take() {
            if !join_within(handle, grace) {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "RTD worker did not stop in time; detaching"
                );
            }
        }

        let topics = std::mem::take(&mut *self.inner.topics.lock());
        let count = topics.len();
        for topic in topics.values() {
            topic.stop_task();
        }
        drop(topics);

        *self.inner.callback.write() = None;
        if count > 0 {
            info!(topics = count, "RTD server terminated");
        } else {
            debug!("RTD server terminated");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn topic_count(&self) -> usize {
        self.inner.topics.lock().len()
    }

    pub fn contains(&self, id: TopicId) -> bool {
        self.inner.topics.lock().contains_key(&id)
    }

    pub fn topic_state(&self, id: TopicId) -> Option<TopicState> {
        self.inner.topics.lock().get(&id).map(Topic::state)
    }

    /// Current (unpublished) value of topic `id`.
    pub fn topic_value(&self, id: TopicId) -> Option<String> {
        self.inner.topics.lock().get(&id).map(Topic::value)
    }
}

impl Drop for RtdServer {
    fn drop(&mut self) {
        self.server_terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtd::TaskContext;
    use crate::value::Variant;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{OnceLock, Weak};
    use std::time::Instant;

    #[derive(Default)]
    struct CountingEvent {
        notified: AtomicUsize,
        heartbeat_ms: AtomicUsize,
    }

    impl UpdateEvent for CountingEvent {
        fn update_notify(&self) -> Result<()> {
            self.notified.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn set_heartbeat_interval(&self, interval: Duration) -> Result<()> {
            self.heartbeat_ms
                .store(interval.as_millis() as usize, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RefusingEvent;

    impl UpdateEvent for RefusingEvent {
        fn update_notify(&self) -> Result<()> {
            Ok(())
        }

        fn set_heartbeat_interval(&self, _interval: Duration) -> Result<()> {
            Err(Error::Host(1))
        }
    }

    /// Pulls values from inside the notification, the way a host that
    /// refreshes synchronously does.
    #[derive(Default)]
    struct PullingEvent {
        server: OnceLock<Weak<RtdServer>>,
        pulled: Mutex<Vec<(TopicId, String)>>,
    }

    impl UpdateEvent for PullingEvent {
        fn update_notify(&self) -> Result<()> {
            if let Some(server) = self.server.get().and_then(Weak::upgrade) {
                let updates = server.refresh_data();
                self.pulled.lock().extend(updates);
            }
            Ok(())
        }
    }

    fn fast_config() -> RtdConfig {
        RtdConfig {
            poll_interval_ms: 10,
            stop_grace_ms: 1000,
            ..RtdConfig::default()
        }
    }

    fn registry() -> Arc<DispatchRegistry> {
        let mut registry = DispatchRegistry::new();
        registry.register(
            "Hello",
            |_args: Vec<Variant>, ctx: &TaskContext| {
                ctx.set_value("Hello World");
                0
            },
            "Loading...",
            false,
        );
        registry.register("Silent", |_args: Vec<Variant>, _ctx: &TaskContext| 0, "", false);
        Arc::new(registry)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn connect_returns_function_default() {
        let server = RtdServer::new(fast_config(), registry());
        let initial = server.connect_data(1, &strings(&["Hello"]), true).unwrap();
        assert_eq!(initial.as_deref(), Some("Loading..."));

        let initial = server.connect_data(2, &strings(&["Hello"]), false).unwrap();
        assert_eq!(initial, None);
        assert_eq!(server.topic_count(), 2);
    }

    #[test]
    fn unknown_function_keeps_connect_placeholder() {
        let server = RtdServer::new(fast_config(), registry());
        let initial = server.connect_data(1, &strings(&["Nope"]), true).unwrap();
        assert_eq!(initial.as_deref(), Some("Default Value"));
        assert!(server.contains(1));
    }

    #[test]
    fn function_without_default_has_no_initial_value() {
        let server = RtdServer::new(fast_config(), registry());
        let initial = server.connect_data(1, &strings(&["Silent"]), true).unwrap();
        assert_eq!(initial, None);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let server = RtdServer::new(fast_config(), registry());
        server.connect_data(5, &strings(&["Hello"]), true).unwrap();
        let err = server.connect_data(5, &strings(&["Nope"]), true).unwrap_err();
        assert!(matches!(err, Error::DuplicateTopic(5)));
        assert_eq!(server.topic_count(), 1);
    }

    #[test]
    fn disconnect_unknown_topic_fails() {
        let server = RtdServer::new(fast_config(), registry());
        assert!(matches!(server.disconnect_data(9), Err(Error::UnknownTopic(9))));
    }

    #[test]
    fn refresh_is_empty_while_stopped() {
        let server = RtdServer::new(fast_config(), registry());
        server.connect_data(1, &strings(&["Hello"]), true).unwrap();
        assert!(server.refresh_data().is_empty());
        assert_eq!(server.heartbeat(), 0);
    }

    #[test]
    fn worker_runs_tasks_and_notifies() {
        let server = RtdServer::new(fast_config(), registry());
        let event = Arc::new(CountingEvent::default());
        let token = server.server_start(event.clone()).unwrap();
        assert_ne!(token, 0);
        assert_eq!(server.heartbeat(), token);
        assert_eq!(event.heartbeat_ms.load(Ordering::SeqCst), 15_000);

        server.connect_data(1, &strings(&["Hello"]), true).unwrap();
        assert!(wait_until(|| event.notified.load(Ordering::SeqCst) > 0));

        let updates = server.refresh_data();
        assert_eq!(updates, vec![(1, "Hello World".to_string())]);
        assert!(server.refresh_data().is_empty());

        server.server_terminate();
        assert_eq!(server.heartbeat(), 0);
        assert_eq!(server.topic_count(), 0);
    }

    #[test]
    fn starting_twice_keeps_the_worker() {
        let server = RtdServer::new(fast_config(), registry());
        let first = server.server_start(Arc::new(CountingEvent::default())).unwrap();
        let second = server.server_start(Arc::new(CountingEvent::default())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn restart_issues_a_new_token() {
        let server = RtdServer::new(fast_config(), registry());
        let first = server.server_start(Arc::new(CountingEvent::default())).unwrap();
        server.server_terminate();
        let second = server.server_start(Arc::new(CountingEvent::default())).unwrap();
        assert_ne!(first, second);
        assert!(server.is_running());
    }

    #[test]
    fn heartbeat_setup_failure_aborts_start() {
        let server = RtdServer::new(fast_config(), registry());
        assert!(server.server_start(Arc::new(RefusingEvent)).is_err());
        assert!(!server.is_running());
    }

    #[test]
    fn terminate_wakes_the_worker_promptly() {
        let config = RtdConfig {
            poll_interval_ms: 60_000,
            ..fast_config()
        };
        let server = RtdServer::new(config, registry());
        server.server_start(Arc::new(CountingEvent::default())).unwrap();
        let begun = Instant::now();
        server.server_terminate();
        assert!(begun.elapsed() < Duration::from_secs(5));
        assert!(!server.is_running());
    }

    #[test]
    fn notification_may_refresh_synchronously() {
        let server = Arc::new(RtdServer::new(fast_config(), registry()));
        let event = Arc::new(PullingEvent::default());
        let _ = event.server.set(Arc::downgrade(&server));

        server.server_start(event.clone()).unwrap();
        server.connect_data(1, &strings(&["Hello"]), false).unwrap();

        assert!(wait_until(|| !event.pulled.lock().is_empty()));
        assert_eq!(*event.pulled.lock(), vec![(1, "Hello World".to_string())]);
        server.server_terminate();
    }

    #[test]
    fn one_notification_per_cycle() {
        let config = RtdConfig {
            poll_interval_ms: 60_000,
            ..fast_config()
        };
        let server = RtdServer::new(config, registry());
        server.connect_data(1, &strings(&["Hello"]), false).unwrap();
        server.connect_data(2, &strings(&["Hello"]), false).unwrap();

        // Both topics change during the first cycle.
        let event = Arc::new(CountingEvent::default());
        server.server_start(event.clone()).unwrap();
        assert!(wait_until(|| event.notified.load(Ordering::SeqCst) > 0));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(event.notified.load(Ordering::SeqCst), 1);

        let updates = server.refresh_data();
        assert_eq!(updates.len(), 2);
        server.server_terminate();
    }
}
