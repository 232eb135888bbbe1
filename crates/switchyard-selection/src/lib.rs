//! Provider selection for Switchyard
//!
//! A sandboxed rule language ([`rule`]), a shared compiled-rule cache
//! ([`cache`]) and the [`SelectionEngine`] that combines capability filtering,
//! rule evaluation and deterministic tie-breaking.

#![deny(missing_docs)]

pub mod cache;
pub mod engine;
pub mod error;
pub mod rule;

pub use cache::RuleCache;
pub use engine::{Selection, SelectionEngine, SelectionOutcome, SelectionRequest};
pub use error::{EvalError, ParseError, RuleError, RuleFailure, SelectionError};
pub use rule::CompiledRule;
