//! tollgate - run configured hook pipelines at git trigger points.
//!
//! A repository declares ordered pipelines of hooks in `.tollgate.yaml`.
//! tollgate installs thin scripts under `.git/hooks` that call back into
//! `tollgate run`, which selects the files a trigger touched, provisions
//! any environments the hooks need, and runs them in declaration order.

pub mod cli;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod git;
pub mod identify;
pub mod registry;
pub mod selector;
pub mod store;

pub use error::Error;
