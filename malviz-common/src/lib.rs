//! # malviz common library
//!
//! Shared code for the malviz services:
//! - Bootstrap configuration (TOML file model, storage root resolution)
//! - Common error and result types

pub mod config;
pub mod error;

pub use error::{Error, Result};
