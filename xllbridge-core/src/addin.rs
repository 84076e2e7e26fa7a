//! Add-in Lifecycle
//!
//! [`Addin`] is the one object the host entry points talk to. It owns the
//! configuration and both registries, so their lifetimes are explicit:
//!
//! 1. Build the add-in, fill the registries and install any lifecycle
//!    hooks.
//! 2. [`Addin::open`] runs the open hook, then registers the worksheet
//!    functions with the host.
//! 3. [`Addin::rtd_server`] builds servers that share the dispatch
//!    registry. From then on the dispatch registry is read-only.
//! 4. [`Addin::close`] withdraws the worksheet functions, then runs the
//!    close hook.
//!
//! The host entry points return whatever status the matching hook
//! returned. Without a hook the status is [`DEFAULT_HOOK_STATUS`].

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::AddinConfig;
use crate::error::{Error, Result, XlError};
use crate::host::Host;
use crate::rtd::{DispatchRegistry, RtdServer};
use crate::udf::FunctionRegistry;
use crate::value::Variant;

/// Add-in manager query for the display name.
pub const MANAGER_INFO_NAME: i32 = 1;

/// Status reported for a lifecycle event with no hook installed.
pub const DEFAULT_HOOK_STATUS: i32 = 1;

/// User code run at a lifecycle event. The return value is handed back to
/// the host as the event's status.
pub type Hook = Arc<dyn Fn() -> i32 + Send + Sync>;

#[derive(Default)]
struct Hooks {
    open: Option<Hook>,
    close: Option<Hook>,
    add: Option<Hook>,
    remove: Option<Hook>,
}

impl Hooks {
    fn run(hook: &Option<Hook>, event: &'static str) -> i32 {
        match hook {
            Some(hook) => {
                let status = hook();
                debug!(event, status, "lifecycle hook ran");
                status
            }
            None => DEFAULT_HOOK_STATUS,
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("open", &self.open.is_some())
            .field("close", &self.close.is_some())
            .field("add", &self.add.is_some())
            .field("remove", &self.remove.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Addin {
    config: AddinConfig,
    functions: FunctionRegistry,
    dispatch: Arc<DispatchRegistry>,
    hooks: Hooks,
}

impl Addin {
    pub fn new(config: AddinConfig) -> Self {
        Self {
            config,
            functions: FunctionRegistry::new(),
            dispatch: Arc::new(DispatchRegistry::new()),
            hooks: Hooks::default(),
        }
    }

    /// Run `hook` when the add-in is opened, before any function is
    /// registered.
    pub fn on_open(&mut self, hook: impl Fn() -> i32 + Send + Sync + 'static) -> &mut Self {
        self.hooks.open = Some(Arc::new(hook));
        self
    }

    /// Run `hook` when the add-in is closed, after every function is
    /// withdrawn.
    pub fn on_close(&mut self, hook: impl Fn() -> i32 + Send + Sync + 'static) -> &mut Self {
        self.hooks.close = Some(Arc::new(hook));
        self
    }

    /// Run `hook` when the add-in is added through the add-in manager.
    pub fn on_add(&mut self, hook: impl Fn() -> i32 + Send + Sync + 'static) -> &mut Self {
        self.hooks.add = Some(Arc::new(hook));
        self
    }

    /// Run `hook` when the add-in is removed through the add-in manager.
    pub fn on_remove(&mut self, hook: impl Fn() -> i32 + Send + Sync + 'static) -> &mut Self {
        self.hooks.remove = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &AddinConfig {
        &self.config
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    pub fn dispatch(&self) -> &DispatchRegistry {
        &self.dispatch
    }

    /// Mutable access to the dispatch registry. Fails once a server built
    /// by [`rtd_server`](Self::rtd_server) shares it.
    pub fn dispatch_mut(&mut self) -> Result<&mut DispatchRegistry> {
        Arc::get_mut(&mut self.dispatch).ok_or_else(|| {
            Error::InvalidArgument("dispatch registry is shared with an RTD server".into())
        })
    }

    /// Run the open hook, then register every worksheet function.
    /// Returns the hook's status.
    pub fn open(&self, host: &dyn Host) -> i32 {
        let status = Hooks::run(&self.hooks.open, "open");
        let accepted = self.functions.register_all(host, &self.config);
        info!(
            addin = %self.config.display_name,
            functions = accepted,
            rtd_functions = self.dispatch.len(),
            status,
            "add-in opened"
        );
        status
    }

    /// Withdraw every worksheet function, then run the close hook.
    /// Returns the hook's status.
    pub fn close(&self, host: &dyn Host) -> i32 {
        let withdrawn = self.functions.unregister_all(host);
        let status = Hooks::run(&self.hooks.close, "close");
        info!(addin = %self.config.display_name, functions = withdrawn, status, "add-in closed");
        status
    }

    /// The add-in was added through the add-in manager.
    pub fn add(&self) -> i32 {
        Hooks::run(&self.hooks.add, "add")
    }

    /// The add-in was removed through the add-in manager.
    pub fn remove(&self) -> i32 {
        Hooks::run(&self.hooks.remove, "remove")
    }

    /// A new RTD server sharing this add-in's dispatch registry.
    pub fn rtd_server(&self) -> Result<RtdServer> {
        if !self.config.enable_rtd {
            return Err(Error::Config("RTD is disabled".into()));
        }
        Ok(RtdServer::new(self.config.rtd.clone(), Arc::clone(&self.dispatch)))
    }

    /// Answer the host's add-in manager: the display name for action 1,
    /// `#VALUE!` for anything else.
    pub fn manager_info(&self, action: i32) -> Variant {
        if action == MANAGER_INFO_NAME {
            Variant::text(self.config.display_name.clone())
        } else {
            Variant::error(XlError::Value)
        }
    }
}
