//! Property-Based Tests for Zone Accounting
//!
//! # Test Properties
//!
//! 1. **Lifetime diff**: bounded, equal classes score the medium penalty,
//!    longer zone classes score their distance
//! 2. **Zone accounting**: capacity + written == max capacity across any
//!    append sequence, and failed appends leave the zone unchanged
//! 3. **Token ceilings**: open/active counts stay within their ceilings and
//!    never underflow across any acquire/release sequence

#![cfg(test)]

use std::sync::Arc;

use proptest::prelude::*;

use super::lifetime::{lifetime_diff, WriteLifetime, LIFETIME_DIFF_COULD_BE_WORSE};
use super::tokens::ZoneTokens;
use super::zone::tests::test_device;
use super::zone::Zone;
use crate::error::Error;

// =============================================================================
// Property Strategies
// =============================================================================

fn lifetime_strategy() -> impl Strategy<Value = WriteLifetime> {
    (0u8..6).prop_map(WriteLifetime::from_u8)
}

/// Append sizes in blocks of 8 bytes, some larger than a zone.
fn append_sizes_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec((0u64..160).prop_map(|blocks| blocks * 8), 1..40)
}

#[derive(Debug, Clone, Copy)]
enum TokenOp {
    TakeOpen(bool),
    PutOpen,
    TakeActive,
    PutActive,
}

fn token_ops_strategy() -> impl Strategy<Value = Vec<TokenOp>> {
    prop::collection::vec(
        prop_oneof![
            any::<bool>().prop_map(TokenOp::TakeOpen),
            Just(TokenOp::PutOpen),
            Just(TokenOp::TakeActive),
            Just(TokenOp::PutActive),
        ],
        1..200,
    )
}

// =============================================================================
// Lifetime Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_lifetime_diff_bounded(zone in lifetime_strategy(), file in lifetime_strategy()) {
        let diff = lifetime_diff(zone, file);
        prop_assert!(diff <= 100);

        if file > WriteLifetime::None {
            if zone > file {
                prop_assert_eq!(diff, (zone.as_u8() - file.as_u8()) as u32);
            } else if zone == file {
                prop_assert_eq!(diff, LIFETIME_DIFF_COULD_BE_WORSE);
            } else {
                prop_assert_eq!(diff, 100);
            }
        }
    }

    #[test]
    fn prop_unset_hint_only_matches_itself(zone in lifetime_strategy()) {
        for file in [WriteLifetime::NotSet, WriteLifetime::None] {
            let expected = if zone == file { 0 } else { 100 };
            prop_assert_eq!(lifetime_diff(zone, file), expected);
        }
    }
}

// =============================================================================
// Zone Accounting Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_append_keeps_accounting(sizes in append_sizes_strategy()) {
        let (backend, ctx) = test_device(4);
        let info = backend.zone_info(1).unwrap();
        let zone = Arc::new(Zone::new(ctx, 1, &info));
        let lease = zone.try_acquire().unwrap();

        for size in sizes {
            let before = (zone.write_pointer(), zone.capacity());
            match lease.append(&vec![0u8; size as usize]) {
                Ok(()) => prop_assert_eq!(zone.write_pointer(), before.0 + size),
                Err(Error::NoSpace(_)) => {
                    prop_assert!(size > before.1);
                    prop_assert_eq!((zone.write_pointer(), zone.capacity()), before);
                }
                Err(e) => prop_assert!(false, "unexpected error {}", e),
            }

            prop_assert_eq!(
                zone.capacity() + (zone.write_pointer() - zone.start()),
                zone.max_capacity()
            );
            prop_assert_eq!(zone.is_full(), zone.capacity() == 0);
            prop_assert_eq!(zone.is_empty(), zone.write_pointer() == zone.start());
        }
    }
}

// =============================================================================
// Token Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_token_counts_within_ceilings(
        max_open in 2u32..6,
        max_active in 1u32..6,
        ops in token_ops_strategy(),
    ) {
        let tokens = Arc::new(ZoneTokens::new(max_open, max_active));
        let mut open = Vec::new();
        let mut active = Vec::new();

        for op in ops {
            match op {
                TokenOp::TakeOpen(wal) => {
                    let limit = if wal { max_open } else { max_open - 1 };
                    // Only take when it would not block
                    if tokens.open_count() < limit {
                        open.push(tokens.wait_for_open(wal));
                    }
                }
                TokenOp::PutOpen => {
                    open.pop();
                }
                TokenOp::TakeActive => {
                    let before = tokens.active_count();
                    match tokens.try_acquire_active() {
                        Some(token) => active.push(token),
                        None => prop_assert_eq!(before, max_active),
                    }
                }
                TokenOp::PutActive => {
                    active.pop();
                }
            }

            prop_assert!(tokens.open_count() <= max_open);
            prop_assert!(tokens.active_count() <= max_active);
            prop_assert_eq!(tokens.open_count() as usize, open.len());
            prop_assert_eq!(tokens.active_count() as usize, active.len());
        }

        drop(open);
        drop(active);
        prop_assert_eq!(tokens.open_count(), 0);
        prop_assert_eq!(tokens.active_count(), 0);
    }
}
