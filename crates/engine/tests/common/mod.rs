//! Common test utilities and fixtures.

pub mod faults;
pub mod fixtures;

#[allow(unused_imports)]
pub use faults::*;
#[allow(unused_imports)]
pub use fixtures::*;
