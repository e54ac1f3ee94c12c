//! Per-request resolution of raw `(top_k, top_p)` into kernel parameters.
//!
//! For each request `i`:
//! 1. take the per-request value if the source has one per request,
//!    otherwise the broadcast value (`k = 0`, `p = 0.0` when absent);
//! 2. apply the [compatibility rules](super::compat);
//! 3. clamp `k` to `[0, k_max]` and `p` to `[0, 1]`, warning on change;
//! 4. mark the request skipped iff the final `k` is zero.
//!
//! Resolution is total: bad values are corrected, never rejected.

use std::fmt;

use crate::runtime_args::{ArgSource, RuntimeArgs};
use crate::Result;

use super::compat::apply_compat_rules;

/// An advisory diagnostic recorded when clamping changed a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClampWarning {
    TopK {
        request: usize,
        requested: u32,
        clamped: u32,
    },
    TopP {
        request: usize,
        requested: f32,
        clamped: f32,
    },
}

impl fmt::Display for ClampWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopK {
                request,
                requested,
                clamped,
            } => write!(
                f,
                "top_k ({requested}) of request {request} exceeds the supported maximum, clipped to {clamped}"
            ),
            Self::TopP {
                request,
                requested,
                clamped,
            } => write!(
                f,
                "top_p ({requested}) of request {request} is outside [0, 1], clipped to {clamped}"
            ),
        }
    }
}

/// Resolved parameters for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedRequest {
    pub top_k: u32,
    pub top_p: f32,
    pub skip: bool,
}

/// Resolve a single raw pair. Clamp diagnostics are pushed to `warnings`.
pub fn resolve_request(
    request: usize,
    raw_k: u32,
    raw_p: f32,
    k_max: u32,
    warnings: &mut Vec<ClampWarning>,
) -> ResolvedRequest {
    let (k, p) = apply_compat_rules(raw_k, raw_p);

    let top_k = k.min(k_max);
    if top_k != k {
        tracing::warn!(
            request,
            requested = k,
            clamped = top_k,
            "top_k is larger than the max supported number, clipping"
        );
        warnings.push(ClampWarning::TopK {
            request,
            requested: k,
            clamped: top_k,
        });
    }

    // NaN fails every comparison; treat it as an unrestricted nucleus.
    let top_p = if p.is_nan() { 1.0 } else { p.clamp(0.0, 1.0) };
    #[allow(clippy::float_cmp)]
    if top_p != p {
        tracing::warn!(
            request,
            requested = p,
            clamped = top_p,
            "top_p is out of range [0.0, 1.0], clipping"
        );
        warnings.push(ClampWarning::TopP {
            request,
            requested: p,
            clamped: top_p,
        });
    }

    ResolvedRequest {
        top_k,
        top_p,
        skip: top_k == 0,
    }
}

/// Resolve a whole batch into caller-provided slices.
///
/// The batch size is `top_ks.len()`; `top_ps` and `skip` must be the same
/// length. Returns every clamp diagnostic in request order.
///
/// # Panics
/// Panics if the output slices differ in length, or if a per-request source
/// is shorter than the batch.
pub fn resolve_into(
    top_k: &ArgSource<'_, u32>,
    top_p: &ArgSource<'_, f32>,
    k_max: u32,
    top_ks: &mut [u32],
    top_ps: &mut [f32],
    skip: &mut [bool],
) -> Vec<ClampWarning> {
    assert_eq!(top_ks.len(), top_ps.len(), "top_k/top_p length mismatch");
    assert_eq!(top_ks.len(), skip.len(), "top_k/skip length mismatch");

    let mut warnings = Vec::new();
    for i in 0..top_ks.len() {
        let resolved = resolve_request(i, top_k.get(i, 0), top_p.get(i, 0.0), k_max, &mut warnings);
        top_ks[i] = resolved.top_k;
        top_ps[i] = resolved.top_p;
        skip[i] = resolved.skip;
    }
    warnings
}

/// Owned resolution result for a batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedSamplingParams {
    pub top_k: Vec<u32>,
    pub top_p: Vec<f32>,
    pub skip: Vec<bool>,
    pub warnings: Vec<ClampWarning>,
}

impl ResolvedSamplingParams {
    /// Resolve `args.runtime_top_k` / `args.runtime_top_p` for `batch_size`
    /// requests.
    ///
    /// # Errors
    /// Returns `RuntimeArgSize` if either argument has a length other than
    /// 0, 1 or `batch_size`.
    pub fn resolve(batch_size: usize, args: &RuntimeArgs, k_max: u32) -> Result<Self> {
        let top_k = ArgSource::from_values("runtime_top_k", &args.runtime_top_k, batch_size)?;
        let top_p = ArgSource::from_values("runtime_top_p", &args.runtime_top_p, batch_size)?;

        let mut out = Self {
            top_k: vec![0; batch_size],
            top_p: vec![0.0; batch_size],
            skip: vec![false; batch_size],
            warnings: Vec::new(),
        };
        out.warnings = resolve_into(
            &top_k,
            &top_p,
            k_max,
            &mut out.top_k,
            &mut out.top_p,
            &mut out.skip,
        );
        Ok(out)
    }

    /// Largest resolved `top_k`, 0 for an empty batch.
    #[must_use]
    pub fn max_top_k(&self) -> u32 {
        self.top_k.iter().copied().max().unwrap_or(0)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::config::TOP_K_MAX;
    use crate::Error;
    use proptest::prelude::*;

    fn resolve_one(k: u32, p: f32) -> (ResolvedRequest, Vec<ClampWarning>) {
        let mut warnings = Vec::new();
        let r = resolve_request(0, k, p, TOP_K_MAX, &mut warnings);
        (r, warnings)
    }

    #[test]
    fn test_greedy_remap() {
        let (r, w) = resolve_one(0, 0.0);
        assert_eq!(r.top_k, 1);
        assert_eq!(r.top_p, 1.0);
        assert!(!r.skip);
        assert!(w.is_empty());
    }

    #[test]
    fn test_legacy_top_k_remap() {
        let (r, _) = resolve_one(5, 0.0);
        assert_eq!(
            r,
            ResolvedRequest {
                top_k: 5,
                top_p: 1.0,
                skip: false
            }
        );
    }

    #[test]
    fn test_top_p_only_is_skipped() {
        let (r, _) = resolve_one(0, 0.3);
        assert_eq!(r.top_k, 0);
        assert_eq!(r.top_p, 0.3);
        assert!(r.skip);
    }

    #[test]
    fn test_clamp_top_k() {
        let (r, w) = resolve_one(2000, 0.5);
        assert_eq!(r.top_k, 1024);
        assert_eq!(
            w,
            vec![ClampWarning::TopK {
                request: 0,
                requested: 2000,
                clamped: 1024
            }]
        );
    }

    #[test]
    fn test_clamp_top_p_high_and_low() {
        let (r, w) = resolve_one(4, 1.7);
        assert_eq!(r.top_p, 1.0);
        assert_eq!(w.len(), 1);

        let (r, w) = resolve_one(4, -0.2);
        assert_eq!(r.top_p, 0.0);
        assert!(matches!(w[0], ClampWarning::TopP { clamped, .. } if clamped == 0.0));
    }

    #[test]
    fn test_nan_top_p_becomes_full_mass() {
        let (r, w) = resolve_one(4, f32::NAN);
        assert_eq!(r.top_p, 1.0);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_warning_display() {
        let w = ClampWarning::TopK {
            request: 3,
            requested: 2000,
            clamped: 1024,
        };
        assert!(w.to_string().contains("request 3"));
    }

    #[test]
    fn test_resolve_batch_mixed_sources() {
        let args = RuntimeArgs::new()
            .with_top_k(vec![0, 5, 2000])
            .with_top_p(vec![0.0]);
        let r = ResolvedSamplingParams::resolve(3, &args, TOP_K_MAX).unwrap();
        assert_eq!(r.top_k, vec![1, 5, 1024]);
        assert_eq!(r.top_p, vec![1.0, 1.0, 1.0]);
        assert_eq!(r.skip, vec![false, false, false]);
        assert_eq!(r.warnings.len(), 1);
        assert_eq!(r.max_top_k(), 1024);
    }

    #[test]
    fn test_resolve_absent_sources_is_greedy() {
        let r = ResolvedSamplingParams::resolve(2, &RuntimeArgs::new(), TOP_K_MAX).unwrap();
        assert_eq!(r.top_k, vec![1, 1]);
        assert_eq!(r.top_p, vec![1.0, 1.0]);
    }

    #[test]
    fn test_resolve_rejects_bad_length() {
        let args = RuntimeArgs::new().with_top_k(vec![1, 2]);
        assert!(matches!(
            ResolvedSamplingParams::resolve(3, &args, TOP_K_MAX),
            Err(Error::RuntimeArgSize { got: 2, .. })
        ));
    }

    fn source_len(batch: usize) -> impl Strategy<Value = usize> {
        prop_oneof![Just(0usize), Just(1usize), Just(batch)]
    }

    fn batch_and_args() -> impl Strategy<Value = (usize, RuntimeArgs)> {
        (1usize..16).prop_flat_map(|batch| {
            (source_len(batch), source_len(batch)).prop_flat_map(move |(nk, np)| {
                (
                    Just(batch),
                    proptest::collection::vec(0u32..3000, nk),
                    proptest::collection::vec(-1.0f32..2.0, np),
                )
                    .prop_map(|(batch, ks, ps)| {
                        (batch, RuntimeArgs::new().with_top_k(ks).with_top_p(ps))
                    })
            })
        })
    }

    proptest! {
        #[test]
        fn prop_resolved_values_in_range((batch, args) in batch_and_args()) {
            let r = ResolvedSamplingParams::resolve(batch, &args, TOP_K_MAX).unwrap();
            prop_assert_eq!(r.top_k.len(), batch);
            for i in 0..batch {
                prop_assert!(r.top_k[i] <= TOP_K_MAX);
                prop_assert!((0.0..=1.0).contains(&r.top_p[i]));
                prop_assert_eq!(r.skip[i], r.top_k[i] == 0);
            }
        }

        #[test]
        fn prop_resolution_is_idempotent((batch, args) in batch_and_args()) {
            let a = ResolvedSamplingParams::resolve(batch, &args, TOP_K_MAX).unwrap();
            let b = ResolvedSamplingParams::resolve(batch, &args, TOP_K_MAX).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
