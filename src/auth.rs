//! Credential primitives: redacted secrets and ordered scope lists.

pub mod scope;
pub mod secret;

pub use scope::*;
pub use secret::*;
