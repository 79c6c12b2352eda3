//! Expectations built from other expectations.

use std::sync::Arc;

use rehearsal_engine::Fact;

use super::{Expectation, ExpectationResult, PredicateOptions};
use crate::compare::Comparator;
use crate::render::Renderer;

/// Passes when every sub-expectation passes.
///
/// Panics if `expectations` is empty. A single sub-expectation is returned
/// as-is.
pub fn all_of(mut expectations: Vec<Box<dyn Expectation>>) -> Box<dyn Expectation> {
    match expectations.len() {
        0 => panic!("all_of(): no sub-expectations provided"),
        1 => expectations.remove(0),
        _ => Box::new(Composite {
            criteria: "all of",
            expectations,
            verdict: |n, passed| {
                (passed < n).then(|| format!("{} of the sub-assertions failed", n - passed))
            },
        }),
    }
}

/// Passes when at least one sub-expectation passes.
///
/// Panics if `expectations` is empty. A single sub-expectation is returned
/// as-is.
pub fn any_of(mut expectations: Vec<Box<dyn Expectation>>) -> Box<dyn Expectation> {
    match expectations.len() {
        0 => panic!("any_of(): no sub-expectations provided"),
        1 => expectations.remove(0),
        _ => Box::new(Composite {
            criteria: "any of",
            expectations,
            verdict: |n, passed| {
                (passed == 0).then(|| format!("all {n} of the sub-assertions failed"))
            },
        }),
    }
}

/// Passes when no sub-expectation passes, including when there are none.
pub fn none_of(expectations: Vec<Box<dyn Expectation>>) -> Box<dyn Expectation> {
    Box::new(Composite {
        criteria: "none of",
        expectations,
        verdict: |n, passed| match passed {
            0 => None,
            _ if n == 1 => Some("the sub-assertion passed unexpectedly".to_string()),
            p => Some(format!("{p} of the sub-assertions passed unexpectedly")),
        },
    })
}

struct Composite {
    criteria: &'static str,
    expectations: Vec<Box<dyn Expectation>>,
    /// Given the number of sub-expectations and how many passed, the
    /// explanation of a failure, or `None` on success.
    verdict: fn(usize, usize) -> Option<String>,
}

impl Expectation for Composite {
    fn caption(&self) -> String {
        let captions: Vec<_> = self.expectations.iter().map(|e| e.caption()).collect();
        format!("{} ({})", self.criteria, captions.join(", "))
    }

    fn begin(&mut self, options: &PredicateOptions, comparator: Arc<dyn Comparator>) {
        for e in &mut self.expectations {
            e.begin(options, comparator.clone());
        }
    }

    fn notify(&mut self, fact: &Fact) {
        for e in &mut self.expectations {
            e.notify(fact);
        }
    }

    fn end(&mut self, renderer: &dyn Renderer) -> ExpectationResult {
        let sub_results: Vec<_> = self
            .expectations
            .iter_mut()
            .map(|e| e.end(renderer))
            .collect();
        let passed = sub_results.iter().filter(|r| r.ok).count();

        let verdict = (self.verdict)(sub_results.len(), passed);
        let mut result = ExpectationResult::new(verdict.is_none(), self.criteria);
        result.explanation = verdict.unwrap_or_default();
        result.sub_results = sub_results;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::DefaultComparator;
    use crate::render::DefaultRenderer;
    use pretty_assertions::assert_eq;

    /// Passes or fails regardless of facts.
    struct Fixed(bool);

    impl Expectation for Fixed {
        fn caption(&self) -> String {
            format!("be {}", self.0)
        }

        fn begin(&mut self, _: &PredicateOptions, _: Arc<dyn Comparator>) {}

        fn notify(&mut self, _: &Fact) {}

        fn end(&mut self, _: &dyn Renderer) -> ExpectationResult {
            ExpectationResult::new(self.0, self.caption())
        }
    }

    fn fixed(outcomes: &[bool]) -> Vec<Box<dyn Expectation>> {
        outcomes
            .iter()
            .map(|ok| Box::new(Fixed(*ok)) as Box<dyn Expectation>)
            .collect()
    }

    fn evaluate(mut e: Box<dyn Expectation>) -> ExpectationResult {
        e.begin(&PredicateOptions::default(), Arc::new(DefaultComparator));
        e.end(&DefaultRenderer)
    }

    #[test]
    fn all_of_counts_failures() {
        let r = evaluate(all_of(fixed(&[true, false, false])));
        assert!(!r.ok);
        assert_eq!(r.explanation, "2 of the sub-assertions failed");
        assert_eq!(r.sub_results.len(), 3);

        assert!(evaluate(all_of(fixed(&[true, true]))).ok);
    }

    #[test]
    fn single_sub_expectation_is_unwrapped() {
        let r = evaluate(all_of(fixed(&[false])));
        assert_eq!(r.criteria, "be false");
        assert!(r.sub_results.is_empty());
    }

    #[test]
    #[should_panic(expected = "no sub-expectations provided")]
    fn all_of_nothing_panics() {
        all_of(Vec::new());
    }

    #[test]
    fn any_of_fails_only_when_everything_fails() {
        assert!(evaluate(any_of(fixed(&[false, true]))).ok);

        let r = evaluate(any_of(fixed(&[false, false])));
        assert!(!r.ok);
        assert_eq!(r.explanation, "all 2 of the sub-assertions failed");
    }

    #[test]
    fn none_of_reports_unexpected_passes() {
        assert!(evaluate(none_of(Vec::new())).ok);
        assert!(evaluate(none_of(fixed(&[false, false]))).ok);

        let r = evaluate(none_of(fixed(&[true])));
        assert_eq!(r.explanation, "the sub-assertion passed unexpectedly");

        let r = evaluate(none_of(fixed(&[true, false, true])));
        assert_eq!(r.explanation, "2 of the sub-assertions passed unexpectedly");
    }
}
