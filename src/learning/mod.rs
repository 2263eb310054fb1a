//! Selector learning.
//!
//! The learning store remembers, per page context and normalized target,
//! which selectors actually worked, either because a fallback candidate
//! succeeded or because a human operator showed the engine the right
//! control during a handoff.
//!
//! - [`keys`] - page-context and target-key normalization
//! - [`store`] - the durable selector map
//! - [`audit`] - teaching audit records

pub mod audit;
pub mod keys;
pub mod store;

pub use audit::{AuditLog, TeachingRecord};
pub use keys::{state_key, target_key};
pub use store::{LearningStore, SelectorMap, MAX_SELECTORS_PER_TARGET, SELECTOR_MAP_FILENAME};
