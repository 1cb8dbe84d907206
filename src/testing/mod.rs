//! Testing utilities and mock implementations
//!
//! Mock transport pieces and canned messages/certificates for exercising the
//! MSH without a partner endpoint or a PKI.

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
