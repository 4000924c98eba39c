//! Credential models, scope sets, and store identifiers.

pub mod credential;
pub mod id;
pub mod scope;
pub mod secret;

pub use credential::*;
pub use id::*;
pub use scope::{ScopeError, ScopeSet};
pub use secret::*;
