//! Message comparison.

use rehearsal_engine::AnyMessage;
use serde_json::Value;

/// Decides whether two messages are equal for the purposes of a test.
pub trait Comparator: Send + Sync {
    fn equal(&self, a: &dyn AnyMessage, b: &dyn AnyMessage) -> bool;
}

impl<F> Comparator for F
where
    F: Fn(&dyn AnyMessage, &dyn AnyMessage) -> bool + Send + Sync,
{
    fn equal(&self, a: &dyn AnyMessage, b: &dyn AnyMessage) -> bool {
        self(a, b)
    }
}

/// Same type and equal structure, ignoring bookkeeping fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultComparator;

impl Comparator for DefaultComparator {
    fn equal(&self, a: &dyn AnyMessage, b: &dyn AnyMessage) -> bool {
        a.message_type() == b.message_type() && structure(a) == structure(b)
    }
}

/// The serialized form of `m` with its bookkeeping fields removed.
pub fn structure(m: &dyn AnyMessage) -> Value {
    let mut value = m.to_value();
    if let Value::Object(fields) = &mut value {
        for name in m.bookkeeping_fields() {
            fields.remove(*name);
        }
    }
    value
}

/// How close a produced message is to an expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Similarity {
    Unrelated,
    DifferentType,
    SameType,
    Equal,
}

pub fn similarity(
    comparator: &dyn Comparator,
    expected: &dyn AnyMessage,
    actual: &dyn AnyMessage,
) -> Similarity {
    if comparator.equal(expected, actual) {
        Similarity::Equal
    } else if expected.message_type() == actual.message_type() {
        Similarity::SameType
    } else {
        Similarity::DifferentType
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rehearsal_engine::testing::{CommandA, EventA};
    use rehearsal_engine::Message;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct Stamped {
        value: String,
        stamp: u64,
    }

    impl Message for Stamped {
        const BOOKKEEPING_FIELDS: &'static [&'static str] = &["stamp"];
    }

    fn stamped(value: &str, stamp: u64) -> Stamped {
        Stamped {
            value: value.into(),
            stamp,
        }
    }

    #[test]
    fn default_comparator_ignores_bookkeeping() {
        let a = stamped("x", 1);
        let b = stamped("x", 2);
        let c = stamped("y", 1);

        assert!(DefaultComparator.equal(&a, &b));
        assert!(!DefaultComparator.equal(&a, &c));
    }

    #[test]
    fn equal_structure_of_different_types_is_not_equal() {
        let command = CommandA::new("1");
        assert!(!DefaultComparator.equal(&command, &EventA::new("1")));
    }

    #[test]
    fn similarity_is_ordered() {
        let cmp = DefaultComparator;
        let expected = EventA::new("1");
        let similar = |actual: &dyn AnyMessage| similarity(&cmp, &expected, actual);

        assert_eq!(similar(&EventA::new("1")), Similarity::Equal);
        assert_eq!(similar(&EventA::new("2")), Similarity::SameType);
        assert_eq!(similar(&CommandA::new("1")), Similarity::DifferentType);
        assert!(Similarity::SameType > Similarity::DifferentType);
        assert!(Similarity::DifferentType > Similarity::Unrelated);
    }

    #[test]
    fn closures_are_comparators() {
        let always = |_: &dyn AnyMessage, _: &dyn AnyMessage| true;
        assert!(always.equal(&CommandA::new("1"), &EventA::new("2")));
    }
}
