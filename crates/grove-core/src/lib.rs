#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Dependency resolution and lockfile reconciliation engine.
//!
//! The [`pkg`] module holds the engine itself; [`config`] and [`error`] carry
//! the ambient settings and crate-level failures shared with the CLI.

pub mod config;
pub mod error;
pub mod pkg;
pub mod version;

pub use config::Config;
pub use error::Error;
pub use version::VERSION;
