//! Event-kind sensitivity classification.
//!
//! A sensitive kind is one whose misuse is costly enough that it never
//! inherits a generic permission and is never granted unbounded validity.

use std::ops::RangeInclusive;

use keygate_core::EventKind;

/// Parameterized replaceable events, all treated as sensitive.
pub const REPLACEABLE_RANGE: RangeInclusive<u16> = 30_000..=39_999;

const SENSITIVE_KINDS: &[(u16, &str)] = &[
    (0, "Overwrites your public profile (name, picture, about)."),
    (3, "Replaces your entire contact list; a bad event can erase everyone you follow."),
    (4, "Sends an encrypted direct message in your name."),
    (1059, "Sends a gift-wrapped private message in your name."),
    (1984, "Publicly reports another user or their content."),
    (10_000, "Replaces your mute list."),
    (10_002, "Changes the relays others use to find your events."),
    (10_003, "Replaces your bookmark list."),
    (10_006, "Changes which relays you block."),
    (10_007, "Changes the relays used for your searches."),
    (10_050, "Changes the relays where you receive direct messages."),
];

const REPLACEABLE_WARNING: &str =
    "Replaces an addressable event (such as long-form content or a list) published under your key.";

/// Where a request's kind falls for permission lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindClass {
    /// No kind on the request; only the generic permission applies
    Generic,
    /// Ordinary kind; may fall back to the generic permission
    Specific,
    /// Sensitive kind; generic fallback is forbidden
    Sensitive,
}

/// Whether `kind` is sensitive.
pub fn is_sensitive(kind: EventKind) -> bool {
    REPLACEABLE_RANGE.contains(&kind.value())
        || SENSITIVE_KINDS.iter().any(|(k, _)| *k == kind.value())
}

/// Human-readable rationale for a sensitive kind, for display only.
pub fn sensitive_warning(kind: EventKind) -> Option<&'static str> {
    if let Some((_, warning)) = SENSITIVE_KINDS.iter().find(|(k, _)| *k == kind.value()) {
        return Some(*warning);
    }
    REPLACEABLE_RANGE
        .contains(&kind.value())
        .then_some(REPLACEABLE_WARNING)
}

/// Classify an optional request kind.
pub fn classify(kind: Option<EventKind>) -> KindClass {
    match kind {
        None => KindClass::Generic,
        Some(kind) if is_sensitive(kind) => KindClass::Sensitive,
        Some(_) => KindClass::Specific,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn listed_kinds_are_sensitive() {
        for (kind, _) in SENSITIVE_KINDS {
            assert!(is_sensitive(EventKind::new(*kind)), "kind {kind}");
            assert!(sensitive_warning(EventKind::new(*kind)).is_some());
        }
    }

    #[test]
    fn ordinary_kinds_are_not() {
        for kind in [1, 5, 6, 7, 1111, 9735, 10_001, 29_999, 40_000, 65_535] {
            assert!(!is_sensitive(EventKind::new(kind)), "kind {kind}");
            assert_eq!(sensitive_warning(EventKind::new(kind)), None);
        }
    }

    #[test]
    fn range_bounds_are_inclusive() {
        assert!(is_sensitive(EventKind::new(30_000)));
        assert!(is_sensitive(EventKind::new(39_999)));
        assert!(!is_sensitive(EventKind::new(29_999)));
        assert!(!is_sensitive(EventKind::new(40_000)));
    }

    #[test]
    fn classification() {
        assert_eq!(classify(None), KindClass::Generic);
        assert_eq!(classify(Some(EventKind::new(1))), KindClass::Specific);
        assert_eq!(classify(Some(EventKind::new(0))), KindClass::Sensitive);
    }

    proptest! {
        #[test]
        fn range_membership(kind in any::<u16>()) {
            let in_range = (30_000..=39_999).contains(&kind);
            let listed = SENSITIVE_KINDS.iter().any(|(k, _)| *k == kind);
            prop_assert_eq!(is_sensitive(EventKind::new(kind)), in_range || listed);
            prop_assert_eq!(sensitive_warning(EventKind::new(kind)).is_some(), in_range || listed);
        }
    }
}
