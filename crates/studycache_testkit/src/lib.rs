//! # studycache testkit
//!
//! Test utilities for studycache.
//!
//! This crate provides:
//! - Temporary stores and a manual clock wired together
//! - An engine harness with a scripted backend
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use studycache_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_cache() {
//!     with_temp_cache(|cache, clock| {
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

#[cfg(test)]
mod scenarios;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
