//! Capability policy for the snippet sandbox.
//!
//! Core principle: **a snippet only sees the primitives its policy grants.**
//! Denied kinds are left out of the execution namespace entirely, and tool
//! loads are checked against an allowlist of `server/name` patterns.

mod capability;
mod error;
mod policy;

pub use capability::{CapabilityKind, CapabilityRequest};
pub use error::{Error, Result};
pub use policy::{AllowRules, Decision, DenyRules, Policy};
