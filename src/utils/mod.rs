//! Utility functions module
//!
//! This module contains name validation, date/time conversion, Azure error
//! classification and other helpers shared by the storage backends.

pub mod datetime;
pub mod helpers;
pub mod network;
pub mod sanitizer;

pub use helpers::*;
pub use sanitizer::*;
