//! # Formats Module
//!
//! Binary encoding for persisted records.

mod record;

pub use record::*;
