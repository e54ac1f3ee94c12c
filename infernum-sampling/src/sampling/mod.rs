//! Sampling-parameter resolution.

pub mod compat;
pub mod resolve;

pub use compat::{apply_compat_rules, CompatRule, COMPAT_RULES};
pub use resolve::{
    resolve_into, resolve_request, ClampWarning, ResolvedRequest, ResolvedSamplingParams,
};
