//! Service layer
//!
//! Contains business logic separated from HTTP handlers:
//! the token lifecycle and the per-quiz access rule.

pub mod autologin;
pub mod rule;
