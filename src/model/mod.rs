//! Core data types for targets, repositories, vulnerabilities, and reports.
//!
//! This module contains the fundamental types used throughout sheriff:
//!
//! - [`Target`] - A user-supplied patrol target (group/org or single repo)
//! - [`Platform`] - Source-repository hosting platform
//! - [`Repository`] - A repository discovered during a patrol
//! - [`SeverityKind`] - Ordered severity taxonomy
//! - [`Vulnerability`] - A normalized scanner finding
//! - [`Report`] - Per-repository patrol outcome

mod report;
mod repository;

pub use report::*;
pub use repository::*;
