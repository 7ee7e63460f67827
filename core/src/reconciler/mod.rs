//! Fleet reconciliation
//!
//! Computes, per instance type and in profile order, the delta between the
//! desired count and the running instances carrying the run tag:
//! - a shortfall is launched in one batch, tagged at creation
//! - an excess is marked oldest-first for termination, applied separately
//!
//! Keeping "compute plan" and "apply plan" apart is what lets a dry run
//! validate permissions and request shape without side effects.

mod executor;
mod plan;

pub use executor::FleetReconciler;
pub use plan::{FleetPlan, TypePlan};
