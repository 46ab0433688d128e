//! Dispatch error types.

use thiserror::Error;

/// Errors raised while building a resource table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A resource with the same path is already registered
    #[error("resource already registered: /{0}")]
    DuplicateResource(String),

    /// Resource declared with no allowed methods
    #[error("resource /{0} allows no methods")]
    NoMethods(String),
}
