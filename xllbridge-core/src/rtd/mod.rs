//! Real-Time Data Server
//!
//! This module implements the host's live-update protocol: the host opens
//! topics, the server keeps their values fresh, and the host pulls changed
//! values when told something moved.
//!
//! # How It Works
//!
//! 1. A worksheet function calls [`call_rtd`] with its own name and its
//!    arguments. The host turns that into a topic and calls
//!    [`RtdServer::connect_data`].
//!
//! 2. The server builds a [`Topic`], and the [`DispatchRegistry`] attaches
//!    the task registered under the topic's first parameter.
//!
//! 3. The worker thread wakes every poll interval, starts any task that is
//!    not running, and calls the host's [`UpdateEvent::update_notify`]
//!    once if any topic changed.
//!
//! 4. The host answers with [`RtdServer::refresh_data`], which hands back
//!    the changed topics and marks their values as published.
//!
//! # Threads
//!
//! One worker thread per started server, plus one short-lived thread per
//! asynchronous task run. Stops are cooperative with a bounded grace
//! period; threads that overrun it are detached.

mod call;
mod dispatch;
mod server;
mod topic;

pub use call::call_rtd;
pub use dispatch::{DispatchRegistry, RtdFunction, RtdRegistration};
pub use server::{RtdServer, UpdateEvent};
pub use topic::{RunOutcome, Task, TaskContext, Topic, TopicArgs, TopicId, TopicState};

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL: Duration = Duration::from_millis(5);

/// Join `handle` if it finishes within `grace`. Returns `false` when the
/// thread was still running and has been detached.
pub(crate) fn join_within(handle: JoinHandle<()>, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(JOIN_POLL);
    }
    if !handle.is_finished() {
        return false;
    }
    if handle.join().is_err() {
        tracing::error!("joined thread had panicked");
    }
    true
}
