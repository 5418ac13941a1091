use precedent_core::ConfidenceLevel;
use precedent_core::citation::{EXCERPT_CHARS, excerpt};
use precedent_core::confidence::{LOW_THRESHOLD, fuse, heuristic_score, score_to_level};
use proptest::prelude::*;

proptest! {
    #[test]
    fn fuse_is_scale_invariant(
        r in 0.0f64..=1.0,
        m in 0.0f64..=1.0,
        w1 in 0.01f64..10.0,
        w2 in 0.01f64..10.0,
        k in 0.01f64..100.0,
    ) {
        let a = fuse(r, m, w1, w2);
        let b = fuse(r, m, k * w1, k * w2);
        prop_assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn fuse_stays_between_inputs(
        r in 0.0f64..=1.0,
        m in 0.0f64..=1.0,
        w1 in 0.0f64..10.0,
        w2 in 0.0f64..10.0,
    ) {
        let f = fuse(r, m, w1, w2);
        let lo = r.min(m);
        let hi = r.max(m);
        prop_assert!(f >= lo - 1e-12 && f <= hi + 1e-12, "{f} outside [{lo}, {hi}]");
    }

    #[test]
    fn level_is_monotonic(
        a in 0.0f64..=1.0,
        b in 0.0f64..=1.0,
        medium in 0.25f64..=0.75,
        gap in 0.0f64..=0.25,
    ) {
        let high = medium + gap;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(score_to_level(lo, high, medium) <= score_to_level(hi, high, medium));
    }

    #[test]
    fn below_low_threshold_is_insufficient(score in 0.0f64..LOW_THRESHOLD) {
        prop_assert_eq!(score_to_level(score, 0.75, 0.5), ConfidenceLevel::Insufficient);
    }

    #[test]
    fn heuristic_returns_known_score(text in ".{0,300}") {
        let s = heuristic_score(&text);
        prop_assert!([0.2, 0.5, 0.7, 0.9].contains(&s));
    }

    #[test]
    fn excerpt_never_exceeds_limit(text in ".{0,400}") {
        let ex = excerpt(&text);
        let n = text.chars().count();
        if n > EXCERPT_CHARS {
            prop_assert_eq!(ex.chars().count(), EXCERPT_CHARS + 3);
            prop_assert!(ex.ends_with("..."));
        } else {
            prop_assert_eq!(ex, text);
        }
    }
}
