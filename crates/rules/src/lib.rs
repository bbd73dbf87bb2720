//! Event routing rule tree.
//!
//! This crate provides:
//! - `Rule`: a fixed set of regex field comparisons over an enriched event
//! - `Route`: the recursive drop/match/children tree that decides fan-out
//! - `Dispatch`: the seam through which matching rules hand events to destinations

pub mod error;
pub mod route;
pub mod rule;

pub use error::{Result, RuleError};
pub use route::{Dispatch, Route};
pub use rule::{Pattern, Rule};
