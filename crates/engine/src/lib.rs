//! Transactional photo assignment engine for Portrait.
//!
//! This crate ties the metadata store and the file store together:
//! - Assignments that claim a resource, copy its original and link it to an
//!   identity as one unit of work
//! - Reset and deletion that undo an assignment the same way
//! - Registration and read-only queries for identities and resources
//!
//! Every store or filesystem call is bounded by the configured operation
//! timeout, and an assignment can be cancelled at any point before its commit.

mod coordinator;
mod engine;
pub mod error;
mod intake;
pub mod metrics;
mod queries;
mod reset;
mod timeout;

pub use coordinator::{AssignState, Assignment};
pub use engine::Engine;
pub use error::{AssignError, AssignResult, ErrorKind};
pub use intake::{RegisteredIdentity, RegisteredResource};
pub use queries::{
    AssignmentStats, IdentitySummary, UnclaimedPage, UnclaimedResource, clamp_paging,
};
pub use tokio_util::sync::CancellationToken;
