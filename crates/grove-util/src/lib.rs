#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for grove.
//!
//! Pure helpers with no logging dependencies. Lockfile writes, clean-room
//! directory wipes and content hashing live here so the engine crate stays
//! free of ad-hoc filesystem code.

pub mod fs;
pub mod hash;
