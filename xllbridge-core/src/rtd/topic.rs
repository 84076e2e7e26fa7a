//! RTD Topics
//!
//! A [`Topic`] is one live subscription: the id the host assigned, the
//! parameter strings it sent, a value slot, and an optional task that
//! produces values.
//!
//! # Value slot
//!
//! The slot keeps three strings behind one lock: the current value, the
//! value last published to the host, and a default shown until the task
//! has produced something. A topic has changed exactly when current and
//! previous differ, and [`Topic::publish`] consumes the change by copying
//! current into previous.
//!
//! # Task state
//!
//! Starting and stopping a task goes through a second lock, so reading a
//! value never waits on a slow task start. An atomic running flag keeps at
//! most one execution in flight. Asynchronous tasks get a fresh thread per
//! run; the thread clears the flag and drops its own handle when done.
//!
//! Stopping is cooperative: the cancel flag is raised, waiters in
//! [`TaskContext::sleep`] wake immediately, and the thread gets a grace
//! period to return. A thread that outlives the grace period is detached
//! and can no longer touch anything but its own shared state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use super::join_within;
use crate::error::Result;
use crate::value::Variant;

/// Topic id assigned by the host.
pub type TopicId = i32;

/// Parameter strings of a topic. Most topics carry a function name and a
/// couple of arguments.
pub type TopicArgs = SmallVec<[String; 4]>;

/// Body of a topic task. Returns a status code, 0 for success.
pub type Task = Arc<dyn Fn(&TaskContext) -> i32 + Send + Sync>;

const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(250);

/// Result of [`Topic::run_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// An asynchronous run was started on its own thread.
    Started,
    /// A synchronous run completed with this status.
    Finished(i32),
    /// A run is already in flight; nothing was started.
    AlreadyRunning,
    /// No task is attached.
    NoTask,
    /// The task used up its runs.
    Exhausted,
    /// The topic was stopped.
    Stopped,
}

/// Observable task state of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Default)]
struct Values {
    current: String,
    previous: String,
    default: String,
}

/// State reachable from both the topic and its task thread.
struct Shared {
    id: TopicId,
    args: TopicArgs,
    values: Mutex<Values>,
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.wake.notify_all();
    }
}

struct TaskSlot {
    handle: Option<JoinHandle<()>>,
    remaining: u32,
    stopped: bool,
}

/// Handle a task body uses to read its parameters and publish values.
#[derive(Clone)]
pub struct TaskContext {
    shared: Arc<Shared>,
}

impl TaskContext {
    /// Id of the topic this task serves.
    pub fn id(&self) -> TopicId {
        self.shared.id
    }

    /// Parameter `index`; index 0 is the function name.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.shared.args.get(index).map(String::as_str)
    }

    /// Number of parameters, the function name included.
    pub fn arg_count(&self) -> usize {
        self.shared.args.len()
    }

    /// Replace the topic value. The host sees it on the next poll.
    pub fn set_value(&self, value: impl Into<String>) {
        self.shared.values.lock().current = value.into();
    }

    /// Store a variant, flattening arrays through the matrix codec.
    pub fn set_variant(&self, value: &Variant) {
        self.set_value(value.topic_text());
    }

    /// Current topic value.
    pub fn value(&self) -> String {
        self.shared.values.lock().current.clone()
    }

    /// Whether the topic has been stopped.
    pub fn is_cancelled(&self) -> bool {
        *self.shared.cancelled.lock()
    }

    /// Sleep for `duration` unless the topic is stopped first.
    ///
    /// Returns `false` if the topic was stopped, in which case the task
    /// should return. A duration too long to form a deadline sleeps until
    /// the topic is stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut cancelled = self.shared.cancelled.lock();
        while !*cancelled {
            match deadline {
                Some(deadline) => {
                    if self.shared.wake.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
                None => self.shared.wake.wait(&mut cancelled),
            }
        }
        !*cancelled
    }
}

/// One RTD subscription.
pub struct Topic {
    shared: Arc<Shared>,
    task: Option<Task>,
    is_async: bool,
    running: Arc<AtomicBool>,
    slot: Arc<Mutex<TaskSlot>>,
    stop_grace: Duration,
}

impl Topic {
    /// A topic with no task and no value.
    pub fn new<I, S>(id: TopicId, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_args(id, args.into_iter().map(Into::into).collect())
    }

    /// Build a topic from the host's parameter strings, reporting
    /// allocation failure instead of aborting.
    pub fn try_from_strings(id: TopicId, strings: &[String]) -> Result<Self> {
        let mut args = TopicArgs::new();
        args.try_reserve(strings.len())?;
        args.extend(strings.iter().cloned());
        Ok(Self::with_args(id, args))
    }

    fn with_args(id: TopicId, args: TopicArgs) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                args,
                values: Mutex::new(Values::default()),
                cancelled: Mutex::new(false),
                wake: Condvar::new(),
            }),
            task: None,
            is_async: false,
            running: Arc::new(AtomicBool::new(false)),
            slot: Arc::new(Mutex::new(TaskSlot {
                handle: None,
                remaining: 0,
                stopped: false,
            })),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// How long [`stop_task`](Self::stop_task) waits for a running thread.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Id assigned by the host.
    pub fn id(&self) -> TopicId {
        self.shared.id
    }

    /// All parameter strings, the function name first.
    pub fn args(&self) -> &[String] {
        &self.shared.args
    }

    /// Parameter `index`; index 0 is the function name.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.shared.args.get(index).map(String::as_str)
    }

    /// Number of parameters.
    pub fn arg_count(&self) -> usize {
        self.shared.args.len()
    }

    /// A context bound to this topic, the same one tasks receive.
    pub fn context(&self) -> TaskContext {
        TaskContext {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Attach a task that may run `runs` times.
    pub fn set_task(&mut self, task: Task, is_async: bool, runs: u32) {
        self.task = Some(task);
        self.is_async = is_async;
        self.slot.lock().remaining = runs;
    }

    /// Whether a task is attached.
    pub fn has_task(&self) -> bool {
        self.task.is_some()
    }

    /// Whether runs go to their own thread.
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Runs left before the task is spent.
    pub fn remaining_runs(&self) -> u32 {
        self.slot.lock().remaining
    }

    /// Replace the current value.
    pub fn set_value(&self, value: impl Into<String>) {
        self.shared.values.lock().current = value.into();
    }

    /// Current value, possibly not yet published.
    pub fn value(&self) -> String {
        self.shared.values.lock().current.clone()
    }

    /// Whether the current value is non-empty.
    pub fn has_value(&self) -> bool {
        !self.shared.values.lock().current.is_empty()
    }

    /// Text shown while there is no value.
    pub fn set_default(&self, value: impl Into<String>) {
        self.shared.values.lock().default = value.into();
    }

    /// The default, or the placeholder `publish` substituted for it.
    pub fn default_value(&self) -> String {
        self.shared.values.lock().default.clone()
    }

    /// Whether a non-empty default is set.
    pub fn has_default(&self) -> bool {
        !self.shared.values.lock().default.is_empty()
    }

    /// Whether the value differs from the one last published.
    pub fn has_changed(&self) -> bool {
        let values = self.shared.values.lock();
        values.previous != values.current
    }

    /// Consume the pending change and return what the host should show.
    ///
    /// An empty value counts as no value: the default is shown instead,
    /// and an empty default is replaced by `missing_text` first.
    pub fn publish(&self, missing_text: &str) -> String {
        let mut values = self.shared.values.lock();
        values.previous = values.current.clone();
        if !values.current.is_empty() {
            return values.current.clone();
        }
        if values.default.is_empty() {
            values.default = missing_text.to_string();
        }
        values.default.clone()
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stopped, running or idle, in that order of precedence.
    pub fn state(&self) -> TopicState {
        if self.slot.lock().stopped {
            TopicState::Stopped
        } else if self.is_running() {
            TopicState::Running
        } else {
            TopicState::Idle
        }
    }

    /// Start one execution of the attached task.
    ///
    /// Synchronous tasks run to completion on the calling thread.
    pub fn run_task(&self) -> RunOutcome {
        let Some(task) = self.task.clone() else {
            return RunOutcome::NoTask;
        };

        let mut slot = self.slot.lock();
        if slot.stopped {
            return RunOutcome::Stopped;
        }
        if slot.remaining == 0 {
            return RunOutcome::Exhausted;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return RunOutcome::AlreadyRunning;
        }

        let context = self.context();
        let topic_id = self.shared.id;

        if !self.is_async {
            drop(slot);
            trace!(topic_id, "running task inline");
            let status = invoke(&task, &context);
            let mut slot = self.slot.lock();
            slot.remaining = slot.remaining.saturating_sub(1);
            self.running.store(false, Ordering::Release);
            return RunOutcome::Finished(status);
        }

        let running = Arc::clone(&self.running);
        let thread_slot = Arc::clone(&self.slot);
        // The slot lock is held across the spawn, so the thread cannot
        // finish and clear its handle before the handle is stored.
        let spawned = thread::Builder::new()
            .name(format!("rtd-topic-{topic_id}"))
            .spawn(move || {
                let status = invoke(&task, &context);
                let mut slot = thread_slot.lock();
                slot.remaining = slot.remaining.saturating_sub(1);
                slot.handle = None;
                running.store(false, Ordering::Release);
                trace!(topic_id, status, "async task finished");
            });

        match spawned {
            Ok(handle) => {
                slot.handle = Some(handle);
                RunOutcome::Started
            }
            Err(err) => {
                self.running.store(false, Ordering::Release);
                warn!(topic_id, %err, "failed to spawn task thread");
                RunOutcome::Finished(-1)
            }
        }
    }

    /// Stop the task for good and wait up to the grace period for an
    /// in-flight thread to return.
    pub fn stop_task(&self) {
        self.shared.cancel();
        let handle = {
            let mut slot = self.slot.lock();
            slot.stopped = true;
            slot.handle.take()
        };
        let Some(handle) = handle else {
            return;
        };

        let topic_id = self.shared.id;
        if join_within(handle, self.stop_grace) {
            debug!(topic_id, "task stopped");
        } else {
            warn!(
                topic_id,
                grace_ms = self.stop_grace.as_millis() as u64,
                "task ignored cancellation; detaching thread"
            );
        }
    }
}

impl Drop for Topic {
    fn drop(&mut self) {
        self.stop_task();
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("id", &self.shared.id)
            .field("args", &self.shared.args)
            .field("is_async", &self.is_async)
            .field("state", &self.state())
            .finish()
    }
}

/// Run a task body, turning a panic into status -1.
fn invoke(task: &Task, context: &TaskContext) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(|| task(context))) {
        Ok(status) => status,
        Err(_) => {
            error!(topic_id = context.id(), "task panicked");
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    const MISSING: &str = "No initial value";

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
    fn args_are_kept_in_order() {
        let topic = Topic::new(1, ["Clock", "1,2"]);
        assert_eq!(topic.id(), 1);
        assert_eq!(topic.arg_count(), 2);
        assert_eq!(topic.arg(0), Some("Clock"));
        assert_eq!(topic.arg(1), Some("1,2"));
        assert_eq!(topic.arg(2), None);
    }

    #[test]
    fn change_is_edge_triggered() {
        let topic = Topic::new(1, ["f"]);
        assert!(!topic.has_changed());

        topic.set_value("A");
        assert!(topic.has_changed());
        assert_eq!(topic.publish(MISSING), "A");
        assert!(!topic.has_changed());

        // Same value again: nothing new to publish.
        topic.set_value("A");
        assert!(!topic.has_changed());

        topic.set_value("B");
        assert!(topic.has_changed());
    }

    #[test]
    fn publish_falls_back_to_placeholder() {
        let topic = Topic::new(7, Vec::<String>::new());
        assert_eq!(topic.publish(MISSING), MISSING);
        assert_eq!(topic.default_value(), MISSING);
        assert_ne!(topic.publish(MISSING), "");
    }

    #[test]
    fn publish_prefers_default_over_empty_value() {
        let topic = Topic::new(1, ["f"]);
        topic.set_default("Loading...");
        assert_eq!(topic.publish(MISSING), "Loading...");
        topic.set_value("");
        // Empty text is treated as no value.
        assert_eq!(topic.publish(MISSING), "Loading...");
    }

    #[test]
    fn no_task_means_no_run() {
        let topic = Topic::new(1, ["f"]);
        assert_eq!(topic.run_task(), RunOutcome::NoTask);
        assert_eq!(topic.state(), TopicState::Idle);
    }

    #[test]
    fn sync_task_runs_once_by_default() {
        let mut topic = Topic::new(1, ["f"]);
        topic.set_task(
            Arc::new(|ctx: &TaskContext| {
                ctx.set_value("done");
                0
            }),
            false,
            1,
        );
        assert_eq!(topic.run_task(), RunOutcome::Finished(0));
        assert_eq!(topic.value(), "done");
        assert_eq!(topic.run_task(), RunOutcome::Exhausted);
        assert_eq!(topic.remaining_runs(), 0);
    }

    #[test]
    fn second_run_while_running_is_a_no_op() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut topic = Topic::new(1, ["f"]);
        let counter = Arc::clone(&calls);
        let started_tx = Mutex::new(started_tx);
        topic.set_task(
            Arc::new(move |_ctx: &TaskContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = started_tx.lock().send(());
                let _ = release_rx.lock().recv();
                0
            }),
            true,
            5,
        );

        assert_eq!(topic.run_task(), RunOutcome::Started);
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(topic.run_task(), RunOutcome::AlreadyRunning);
        assert_eq!(topic.state(), TopicState::Running);

        release_tx.send(()).unwrap();
        assert!(wait_until(|| !topic.is_running()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(topic.remaining_runs(), 4);
    }

    #[test]
    fn stop_wakes_a_sleeping_task() {
        let mut topic = Topic::new(3, ["ticker"]).with_stop_grace(Duration::from_secs(5));
        topic.set_task(
            Arc::new(|ctx: &TaskContext| {
                let mut n = 0;
                while ctx.sleep(Duration::from_millis(10)) {
                    n += 1;
                    ctx.set_value(n.to_string());
                }
                0
            }),
            true,
            1,
        );
        assert_eq!(topic.run_task(), RunOutcome::Started);
        assert!(wait_until(|| topic.has_value()));

        topic.stop_task();
        assert_eq!(topic.state(), TopicState::Stopped);
        assert!(!topic.is_running());
        assert_eq!(topic.run_task(), RunOutcome::Stopped);
    }

    #[test]
    fn unbounded_sleep_waits_for_stop() {
        let mut topic = Topic::new(8, ["idle"]).with_stop_grace(Duration::from_secs(5));
        topic.set_task(
            Arc::new(|ctx: &TaskContext| {
                let kept_running = ctx.sleep(Duration::MAX);
                ctx.set_value(if kept_running { "timed out" } else { "woke" });
                0
            }),
            true,
            1,
        );
        assert_eq!(topic.run_task(), RunOutcome::Started);
        assert!(wait_until(|| topic.is_running()));
        thread::sleep(Duration::from_millis(20));
        assert!(!topic.has_value());

        topic.stop_task();
        assert!(!topic.is_running());
        assert_eq!(topic.value(), "woke");
    }

    #[test]
    fn stubborn_task_is_detached_after_grace() {
        let mut topic = Topic::new(4, ["stubborn"]).with_stop_grace(Duration::from_millis(20));
        topic.set_task(
            Arc::new(|_ctx: &TaskContext| {
                thread::sleep(Duration::from_millis(300));
                0
            }),
            true,
            1,
        );
        assert_eq!(topic.run_task(), RunOutcome::Started);
        let begun = Instant::now();
        topic.stop_task();
        assert!(begun.elapsed() < Duration::from_millis(250));
        assert_eq!(topic.state(), TopicState::Stopped);
    }

    #[test]
    fn panicking_task_reports_failure() {
        let mut topic = Topic::new(5, ["boom"]);
        topic.set_task(Arc::new(|_ctx: &TaskContext| -> i32 { panic!("boom") }), false, 1);
        assert_eq!(topic.run_task(), RunOutcome::Finished(-1));
        assert!(!topic.is_running());
    }

    #[test]
    fn set_variant_flattens_arrays() {
        let topic = Topic::new(6, ["f"]);
        let ctx = topic.context();
        ctx.set_variant(&Variant::list(vec![Variant::number(3.0), Variant::number(4.0)]));
        assert_eq!(topic.value(), "3,4");
        ctx.set_variant(&Variant::number(2.5));
        assert_eq!(topic.value(), "2.5");
    }

    #[test]
    fn try_from_strings_copies_args() {
        let strings = vec!["f".to_string(), "x".to_string()];
        let topic = Topic::try_from_strings(9, &strings).unwrap();
        assert_eq!(topic.args(), strings.as_slice());
    }
}
