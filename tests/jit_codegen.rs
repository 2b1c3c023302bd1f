//! Property-based tests for broadcast code generation.
//!
//! Invariants checked for arbitrary operands and tilings:
//! - program size follows the per-entry encoding lengths
//! - offsets start at zero, increase strictly and end at the code length
//! - generation is deterministic
//! - every generated program passes the decoder-based verifier

use proptest::prelude::*;

use marlin_kernels::jit::encoder::{BROADCAST_CONST_LEN, BROADCAST_ZERO_LEN, RET_LEN};
use marlin_kernels::jit::verify::verify_program;
use marlin_kernels::jit::wino_store::TAP_GROUP;
use marlin_kernels::{BlockPolicy, CodeStore, MarlinError, TilingScheme, WinoStore};

fn arb_scheme() -> impl Strategy<Value = TilingScheme> {
    prop::sample::select(TilingScheme::ALL.to_vec())
}

fn arb_policy() -> impl Strategy<Value = BlockPolicy> {
    prop_oneof![
        Just(BlockPolicy::Adaptive),
        (1usize..40).prop_map(BlockPolicy::Fixed),
    ]
}

/// `k×n` operand with roughly `zero_pct` percent zeros.
fn arb_operand() -> impl Strategy<Value = (usize, usize, Vec<f32>)> {
    (1usize..40, 1usize..40, 0u32..=100).prop_flat_map(|(k, n, zero_pct)| {
        let entry = (0u32..100, -8i32..8).prop_map(move |(roll, v)| {
            if roll < zero_pct { 0.0 } else { v as f32 * 0.75 + 0.25 }
        });
        (Just(k), Just(n), prop::collection::vec(entry, k * n))
    })
}

proptest! {
    #[test]
    fn prop_code_size_law(scheme in arb_scheme(), policy in arb_policy(), (k, n, b) in arb_operand()) {
        let store = CodeStore::new(scheme, policy);
        let (code, walk) = store.generate_b_matrix(&b, k, n).unwrap();
        let nonzero = b.iter().filter(|&&v| v != 0.0).count();
        let per_fragment = scheme.slots() * BROADCAST_ZERO_LEN + RET_LEN;
        let expected = walk.tile_count() * per_fragment
            + nonzero * (BROADCAST_CONST_LEN - BROADCAST_ZERO_LEN);
        prop_assert_eq!(code.len(), expected);
        prop_assert_eq!(store.code_size(&walk, &b), expected);
    }

    #[test]
    fn prop_offsets_monotone(scheme in arb_scheme(), (k, n, b) in arb_operand()) {
        let (code, walk) = CodeStore::new(scheme, BlockPolicy::Adaptive).generate_b_matrix(&b, k, n).unwrap();
        let offsets = code.offsets();
        prop_assert_eq!(offsets.len(), walk.tile_count() + 1);
        prop_assert_eq!(offsets[0], 0);
        prop_assert_eq!(*offsets.last().unwrap() as usize, code.len());
        prop_assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prop_generation_is_deterministic(scheme in arb_scheme(), policy in arb_policy(), (k, n, b) in arb_operand()) {
        let store = CodeStore::new(scheme, policy);
        let (first, _) = store.generate_b_matrix(&b, k, n).unwrap();
        let (second, _) = store.generate_b_matrix(&b, k, n).unwrap();
        prop_assert_eq!(first.content_hash(), second.content_hash());
        prop_assert_eq!(first.code(), second.code());
        prop_assert_eq!(first.offsets(), second.offsets());
    }

    #[test]
    fn prop_generated_code_verifies(scheme in arb_scheme(), (k, n, b) in arb_operand()) {
        let (code, _) = CodeStore::new(scheme, BlockPolicy::Adaptive).generate_b_matrix(&b, k, n).unwrap();
        prop_assert!(verify_program(code.code(), code.offsets(), scheme.slots()).is_ok());
    }

    #[test]
    fn prop_oversized_tiling_rejected(b_cols in 1usize..16, a_cols in 1usize..16) {
        let result = TilingScheme::new(b_cols, a_cols);
        if b_cols * a_cols <= 15 {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(matches!(result, Err(MarlinError::InvalidArgument(_))), "expected InvalidArgument");
        }
    }
}

#[test]
fn test_sparser_operand_gives_smaller_program() {
    let (k, n) = (32, 30);
    let dense: Vec<f32> = (0..k * n).map(|v| (v % 7 + 1) as f32).collect();
    let sparse: Vec<f32> = dense.iter().enumerate().map(|(i, &v)| if i % 4 == 0 { v } else { 0.0 }).collect();
    let store = CodeStore::new(TilingScheme::B15_A1, BlockPolicy::Fixed(64));
    let (d, _) = store.generate_b_matrix(&dense, k, n).unwrap();
    let (s, _) = store.generate_b_matrix(&sparse, k, n).unwrap();
    assert_eq!(d.fragment_count(), s.fragment_count());
    assert!(s.len() < d.len());
}

#[test]
fn test_tiling_strings() {
    assert_eq!("7x2".parse::<TilingScheme>().unwrap(), TilingScheme::B7_A2);
    assert!("4x4".parse::<TilingScheme>().is_err());
    assert!("15".parse::<TilingScheme>().is_err());
}

#[test]
fn test_winograd_filter_program() {
    let (tiles, channels, filters) = (16, 3, 2);
    let filter_t: Vec<f32> = (0..tiles * channels * filters).map(|v| if v % 3 == 0 { 0.0 } else { v as f32 }).collect();
    let (code, layout) = WinoStore.generate_b_tensor(&filter_t, tiles, channels, filters).unwrap();
    assert_eq!(layout.fragment_count(), filters * 2 * channels);
    assert_eq!(code.fragment_count(), layout.fragment_count());
    assert!(verify_program(code.code(), code.offsets(), TAP_GROUP).is_ok());
}
