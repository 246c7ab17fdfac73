#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Filesystem, path and hashing helpers shared by the modlink crates.
//!
//! Everything here is a pure function over paths or bytes; nothing logs.

pub mod fs;
pub mod hash;
pub mod path;
