//! xllbridge Core
//!
//! This crate provides the runtime for spreadsheet add-ins that expose
//! worksheet functions and live (RTD) values to the host. It implements:
//!
//! - A cell value type that converts to and from the host's raw values
//! - A delimited text codec for moving arrays through string channels
//! - An RTD server: topic table, dispatch registry and worker thread
//! - The worksheet function registry and add-in lifecycle
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `host`: the raw host ABI and the [`Host`](host::Host) service trait
//! - `value`: [`Variant`] and the matrix codec
//! - `rtd`: topics, the dispatch registry, the server and the call path
//! - `udf`: worksheet function descriptions
//! - `addin`: the [`Addin`] object tying configuration and registries together
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use xllbridge_core::{Addin, AddinConfig, Variant};
//! use xllbridge_core::rtd::TaskContext;
//!
//! let mut addin = Addin::new(AddinConfig::default());
//! addin.functions_mut().register("RTDHelloWorld", 0).set_help("RTD Hello World");
//! addin.dispatch_mut()?.register(
//!     "RTDHelloWorld",
//!     |_args: Vec<Variant>, ctx: &TaskContext| {
//!         ctx.set_value("Hello World");
//!         0
//!     },
//!     "Loading...",
//!     false,
//! );
//!
//! let server = addin.rtd_server()?;
//! server.server_start(Arc::new(host_callback))?;
//! ```

pub mod addin;
pub mod config;
pub mod error;
pub mod host;
pub mod rtd;
pub mod udf;
pub mod value;

#[cfg(feature = "xll-exports")]
pub mod exports;

pub use addin::Addin;
pub use config::{AddinConfig, RtdConfig};
pub use error::{Error, Result, XlError};
pub use value::{Variant, VariantKind};
