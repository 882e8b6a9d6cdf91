//! Domain logic for the streaming recommendation workflow.
//!
//! Everything in this crate is synchronous and free of I/O. A
//! [`WorkflowRun`](run::WorkflowRun) consumes already-parsed
//! [`WorkflowEvent`](events::WorkflowEvent)s one at a time and exposes
//! immutable [`Snapshot`](snapshot::Snapshot)s of its state:
//!
//! - [`stages`] -- the ordered stage registry.
//! - [`classifier`] -- maps raw failure signals to [`ErrorKind`](classifier::ErrorKind)s.
//! - [`tracker`] -- per-stage lifecycle state.
//! - [`aggregator`] -- per-stage narrative output.
//! - [`finalizer`] -- builds the final recommendation record.
//! - [`run`] -- the run aggregate and its reducer.

pub mod aggregator;
pub mod classifier;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod run;
pub mod snapshot;
pub mod stages;
pub mod tracker;
pub mod types;
