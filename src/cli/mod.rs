//! CLI command implementations.

pub mod config;
pub mod container;
pub mod flexvolume;
