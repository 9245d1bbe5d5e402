//! # multihome
//!
//! Multi-homed egress management: discover every network path a host has,
//! verify each one actually reaches the internet, and govern which path
//! serves which destination.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │               Management API (sources, policies)                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │          Source Store: active set · policies · bind history     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                    Listener (reconciliation)                    │
//! │  ┌──────────┐   provide/check   ┌──────────┐   consume_fault    │
//! │  │ Provider │ ◄──────────────── │  poll()  │ ─────────────────► │
//! │  └──────────┘                   └──────────┘        Hooker      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │      Sources (interfaces) ── dial failures ──► record_fault     │
//! └─────────────────────────────────────────────────────────────────┘
//!
//! The [`source::Listener`] periodically asks a [`source::Provider`] for the
//! current sources, admits new ones after a high-confidence check, drops the
//! ones that disappeared and re-checks any source live traffic reported as
//! failing through the [`source::Hooker`]. The [`store::SourceStore`] holds
//! the result and applies policies when a source is selected.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::significant_drop_tightening)] // Lock scopes are explicit
#![allow(clippy::option_if_let_else)]
#![allow(clippy::use_self)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::future_not_send)]
#![allow(clippy::struct_excessive_bools)]    // Interface flags
#![allow(clippy::return_self_not_must_use)]  // Builder methods don't need must_use

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod source;
pub mod store;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::metrics::{MetricsSink, NoopMetrics};
    pub use crate::source::{
        Conn, Hooker, Interface, InterfaceProvider, Listener, MergedProvider, Provider,
        SharedSource, Source, Store,
    };
    pub use crate::store::{Policy, PolicyKind, SourceStore};
    pub use crate::types::*;
}
