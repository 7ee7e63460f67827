//! Report generation for fleet runs
//!
//! This crate provides:
//!
//! - Terminal text for a run summary, a cleanup report and a dry-run plan
//! - JSON export of any of them

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod json;
pub mod text;

pub use json::{write_json, ReportError};
pub use text::{render_cleanup, render_outcome, render_plan, render_summary};
