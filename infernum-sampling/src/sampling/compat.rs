//! Legacy `(top_k, top_p)` rewrites.
//!
//! Top-k and top-k/top-p sampling used to be separate layers. They are now
//! one, and two historic request shapes are rewritten into the merged
//! form before any clamping happens. The rules run in table order; each sees
//! the output of the previous one.

/// A single rewrite of a raw `(top_k, top_p)` pair.
#[derive(Debug, Clone, Copy)]
pub struct CompatRule {
    pub name: &'static str,
    pub applies: fn(u32, f32) -> bool,
    pub rewrite: fn(u32, f32) -> (u32, f32),
}

#[allow(clippy::float_cmp)]
fn is_greedy(k: u32, p: f32) -> bool {
    k == 0 && p == 0.0
}

fn greedy_as_top_1(_k: u32, p: f32) -> (u32, f32) {
    (1, p)
}

#[allow(clippy::float_cmp)]
fn is_pure_top_k(k: u32, p: f32) -> bool {
    k > 0 && p == 0.0
}

fn top_k_with_full_mass(k: u32, _p: f32) -> (u32, f32) {
    (k, 1.0)
}

/// Rewrite table, applied in order.
///
/// - `k == 0, p == 0`: the nucleus path cannot represent `p = 0`, which is
///   greedy decoding, so it becomes `k = 1`.
/// - `k > 0, p == 0`: old-style pure top-k, re-expressed as top-k with an
///   unrestricted nucleus (`p = 1`).
pub const COMPAT_RULES: [CompatRule; 2] = [
    CompatRule {
        name: "greedy_as_top_1",
        applies: is_greedy,
        rewrite: greedy_as_top_1,
    },
    CompatRule {
        name: "pure_top_k",
        applies: is_pure_top_k,
        rewrite: top_k_with_full_mass,
    },
];

/// Run every rule of [`COMPAT_RULES`] over `(k, p)`.
#[must_use]
pub fn apply_compat_rules(k: u32, p: f32) -> (u32, f32) {
    COMPAT_RULES.iter().fold((k, p), |(k, p), rule| {
        if (rule.applies)(k, p) {
            (rule.rewrite)(k, p)
        } else {
            (k, p)
        }
    })
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_greedy_becomes_top_1_full_mass() {
        // The first rule feeds the second: (0, 0) -> (1, 0) -> (1, 1).
        assert_eq!(apply_compat_rules(0, 0.0), (1, 1.0));
    }

    #[test]
    fn test_pure_top_k_gets_full_mass() {
        assert_eq!(apply_compat_rules(5, 0.0), (5, 1.0));
    }

    #[test]
    fn test_top_p_only_untouched() {
        assert_eq!(apply_compat_rules(0, 0.3), (0, 0.3));
    }

    #[test]
    fn test_combined_untouched() {
        assert_eq!(apply_compat_rules(40, 0.95), (40, 0.95));
    }

    #[test]
    fn test_rule_table_order() {
        let names: Vec<_> = COMPAT_RULES.iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["greedy_as_top_1", "pure_top_k"]);
        assert!((COMPAT_RULES[0].applies)(0, 0.0));
        assert!(!(COMPAT_RULES[0].applies)(1, 0.0));
        assert!((COMPAT_RULES[1].applies)(1, 0.0));
        assert!(!(COMPAT_RULES[1].applies)(1, 0.5));
    }

    #[test]
    fn test_negative_zero_counts_as_zero() {
        assert_eq!(apply_compat_rules(3, -0.0), (3, 1.0));
    }
}
