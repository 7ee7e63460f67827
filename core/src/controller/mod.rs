//! Controller for the benchmark run lifecycle
//!
//! The FleetController sequences one invocation:
//! - preflight validation of the plan against the provider
//! - reconciliation of the fleet to the profile
//! - readiness waits and benchmark runs, fanned out over a bounded pool
//! - teardown of everything the run created
//!
//! # Example
//!
//! ```ignore
//! use fleet_bench_core::{ControllerBuilder, RunMode};
//!
//! let controller = ControllerBuilder::new()
//!     .profile("t_series", profile)
//!     .compute(compute)
//!     .storage(storage)
//!     .executor(executor)
//!     .build()?;
//!
//! let outcome = controller.run_with_signal_handling(RunMode::Run).await?;
//! ```

mod aggregator;
mod builder;
mod executor;

pub use aggregator::{aggregate_scores, order_results, RunSummary, TypeScore};
pub use builder::ControllerBuilder;
pub use executor::{FleetController, RunOutcome};
