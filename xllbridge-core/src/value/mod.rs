//! Cell Values
//!
//! This module holds the value type shared by worksheet functions and the
//! RTD server.
//!
//! - [`Variant`]: a single host cell value (empty, number, text, error,
//!   2-D array, or unresolved cell reference).
//! - [`codec`]: the delimited text format that flattens an array into one
//!   string, so arrays can travel as RTD topic parameters and results.
//!
//! # How It Works
//!
//! 1. An argument arrives from the host as a raw value and is wrapped with
//!    [`Variant::from_raw`]. References are read through the [`Host`]
//!    immediately, numbers before text.
//!
//! 2. Arrays headed for an RTD topic are flattened with
//!    [`Variant::serialize`]; the worker rebuilds them with
//!    [`Variant::deserialize`].
//!
//! 3. A result goes back to the host through [`Variant::to_raw`] or
//!    [`Variant::into_host_return`].
//!
//! [`Host`]: crate::host::Host

pub mod codec;
mod variant;

pub use variant::{format_number, Variant, VariantKind};
