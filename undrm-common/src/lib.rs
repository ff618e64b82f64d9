//! # UNDRM Common Library
//!
//! Shared code for the UNDRM services including:
//! - Pipeline error taxonomy
//! - Audit record model and lifecycle states
//! - Configuration loading (TOML file + environment overrides)

pub mod audit;
pub mod config;
pub mod error;

pub use error::{Error, Result};
