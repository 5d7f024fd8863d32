//! Property-based test generators using proptest.

use eventstash_core::Consent;
use proptest::prelude::*;

/// Strategy for one event payload (never empty, fits [`crate::small_files`]).
pub fn event_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..100)
}

/// Strategy for a sequence of up to `max` events.
pub fn events_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(event_strategy(), 0..=max)
}

/// Strategy for events that are distinct and tagged with their index, so
/// order and duplicates can be checked after reading.
pub fn numbered_events_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..=max).prop_map(|bodies| {
        bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| {
                let mut event = (i as u32).to_be_bytes().to_vec();
                event.extend(body);
                event
            })
            .collect()
    })
}

/// Strategy for a consent value.
pub fn consent_strategy() -> impl Strategy<Value = Consent> {
    prop_oneof![
        Just(Consent::Pending),
        Just(Consent::Granted),
        Just(Consent::Denied),
    ]
}

/// Strategy for a `(from, to)` consent transition, identity pairs included.
pub fn transition_strategy() -> impl Strategy<Value = (Consent, Consent)> {
    (consent_strategy(), consent_strategy())
}

/// An operation against a storage, for interleaving tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Write one event.
    Write(Vec<u8>),
    /// Change consent.
    SetConsent(Consent),
}

/// Strategy for a sequence of writes interleaved with consent changes.
pub fn storage_ops_strategy(max: usize) -> impl Strategy<Value = Vec<StorageOp>> {
    prop::collection::vec(
        prop_oneof![
            4 => event_strategy().prop_map(StorageOp::Write),
            1 => consent_strategy().prop_map(StorageOp::SetConsent),
        ],
        0..=max,
    )
}

/// Default proptest configuration for storage tests.
///
/// Every case touches the filesystem, so fewer cases than proptest's default.
pub fn storage_proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 32,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn events_are_never_empty(event in event_strategy()) {
            prop_assert!(!event.is_empty());
        }

        #[test]
        fn numbered_events_are_distinct(events in numbered_events_strategy(20)) {
            for (i, event) in events.iter().enumerate() {
                prop_assert_eq!(&event[..4], &(i as u32).to_be_bytes()[..]);
            }
        }
    }
}
