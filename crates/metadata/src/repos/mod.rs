//! Repository traits for metadata operations.

pub mod assignments;
pub mod identities;
pub mod resources;

pub use assignments::{AssignmentRepo, AssignmentTx};
pub use identities::IdentityRepo;
pub use resources::ResourceRepo;
