//! Dispatch Registry
//!
//! Maps an RTD function name to the code that feeds its topics. The host
//! only sends strings, so the first topic parameter names the function and
//! the rest are its arguments in matrix-codec form.
//!
//! The registry is filled at startup and only read afterwards; the server
//! holds it behind an `Arc` without a lock.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::topic::{Task, TaskContext, Topic};
use crate::error::{Error, Result};
use crate::value::Variant;

/// Body of an RTD function: decoded arguments plus the topic context.
/// Returns a status code, 0 for success.
pub type RtdFunction = Arc<dyn Fn(Vec<Variant>, &TaskContext) -> i32 + Send + Sync>;

/// Everything known about one RTD function.
#[derive(Clone)]
pub struct RtdRegistration {
    pub function: RtdFunction,
    /// Shown until the function produces a value.
    pub default_text: String,
    /// Run on a dedicated thread instead of the worker thread.
    pub is_async: bool,
    /// How many times each topic runs the function.
    pub runs: u32,
}

impl std::fmt::Debug for RtdRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtdRegistration")
            .field("default_text", &self.default_text)
            .field("is_async", &self.is_async)
            .field("runs", &self.runs)
            .finish_non_exhaustive()
    }
}

/// Name-keyed table of RTD functions, in registration order.
#[derive(Debug, Default)]
pub struct DispatchRegistry {
    functions: IndexMap<String, RtdRegistration>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `name`, running once per topic.
    /// A later registration under the same name replaces this one.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        function: F,
        default_text: impl Into<String>,
        is_async: bool,
    ) where
        F: Fn(Vec<Variant>, &TaskContext) -> i32 + Send + Sync + 'static,
    {
        self.register_with_runs(name, function, default_text, is_async, 1);
    }

    /// Like [`register`](Self::register) with an explicit run count.
    pub fn register_with_runs<F>(
        &mut self,
        name: impl Into<String>,
        function: F,
        default_text: impl Into<String>,
        is_async: bool,
        runs: u32,
    ) where
        F: Fn(Vec<Variant>, &TaskContext) -> i32 + Send + Sync + 'static,
    {
        let name = name.into();
        let registration = RtdRegistration {
            function: Arc::new(function),
            default_text: default_text.into(),
            is_async,
            runs,
        };
        if self.functions.insert(name.clone(), registration).is_some() {
            debug!(function = %name, "RTD function re-registered");
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&RtdRegistration> {
        self.functions.get(name)
    }

    pub fn default_text(&self, name: &str) -> Option<&str> {
        self.functions.get(name).map(|r| r.default_text.as_str())
    }

    pub fn is_async(&self, name: &str) -> bool {
        self.functions.get(name).is_some_and(|r| r.is_async)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Attach the function named by the topic's first parameter.
    ///
    /// On success the topic's default becomes the function's default text.
    /// On failure the topic is left untouched and will only ever show its
    /// placeholder.
    pub fn resolve_and_attach(&self, topic: &mut Topic) -> Result<()> {
        let name = topic
            .arg(0)
            .ok_or(Error::MissingFunctionName(topic.id()))?
            .to_string();
        let Some(registration) = self.functions.get(&name) else {
            warn!(topic_id = topic.id(), function = %name, "unknown RTD function");
            return Err(Error::UnknownFunction(name));
        };

        topic.set_default(registration.default_text.clone());

        let function = Arc::clone(&registration.function);
        let task: Task = Arc::new(move |ctx: &TaskContext| {
            let args = (1..ctx.arg_count())
                .filter_map(|i| ctx.arg(i))
                .map(|raw| {
                    let mut value = Variant::text(raw);
                    value.deserialize();
                    value
                })
                .collect();
            function(args, ctx)
        });
        topic.set_task(task, registration.is_async, registration.runs);

        debug!(
            topic_id = topic.id(),
            function = %name,
            is_async = registration.is_async,
            "RTD function attached"
        );
        Ok(())
    }
}
