//! # pv-core
//!
//! Core types, traits, and error handling for pdfvar.
//!
//! This crate provides:
//! - Common error types
//! - The [`EventSource`] trait implemented by event readers
//! - The [`EventRecord`] row type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::EventSource;
pub use types::{BinId, EventRecord};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
