//! Command implementations for the bm CLI.

pub mod deps;
pub mod info;
pub mod update;
