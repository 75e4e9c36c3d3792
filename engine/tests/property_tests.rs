// Property-based tests for engine invariants.
//
// Four categories:
// 1. Linear address patterns: closed-form addresses and continuity
// 2. Strand splits: stream ↔ strand index round trips and trip counts
// 3. Slicer: sealed slices partition a contiguous stream by cache line
// 4. PUM bank mapping: every masked tile lands in exactly one bank split
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use std::rc::Rc;

use proptest::prelude::*;
use sfe::addr_gen::{eval_linear, is_continuous, LinearAddrGen};
use sfe::affine::{linearize, AffinePattern};
use sfe::data_move::DataMoveCompiler;
use sfe::id::DynStreamId;
use sfe::pum_command::{ComputeOp, PumCommand};
use sfe::slicer::ElementSlicer;
use sfe::strand::StrandSplit;
use sfe::topology::PumHwConfig;
use sfe::value::invariant_params;

// ── Helpers ─────────────────────────────────────────────────────────────────

fn contiguous_slicer(start: u64, elem: u64, trip: u64) -> ElementSlicer {
    ElementSlicer::new(
        DynStreamId::new(0, 1, 1).into(),
        invariant_params(&[elem, trip, start]),
        Rc::new(LinearAddrGen),
        elem,
        Some(trip),
        64,
        true,
    )
}

fn pum_compiler() -> DataMoveCompiler {
    let hw = PumHwConfig {
        wordlines: 256,
        bitlines: 16,
        arrays_per_way: 1,
        ways_per_bank: 2,
        mesh_rows: 1,
        mesh_cols: 2,
    };
    DataMoveCompiler::new(hw, vec![16], vec![4]).unwrap()
}

fn assert_bank_splits_cover(cmds: &[PumCommand], tile_nums: &[i64]) {
    for cmd in cmds {
        let mut expected: Vec<u64> = cmd
            .tile_mask
            .points()
            .iter()
            .map(|p| linearize(p, tile_nums) as u64)
            .collect();
        let mut got: Vec<u64> = cmd.bank_splits.iter().flat_map(|s| s.tiles.iter().copied()).collect();
        expected.sort_unstable();
        got.sort_unstable();
        assert_eq!(got, expected, "bank splits of {}", cmd);
    }
}

// ── Linear patterns ─────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn one_dim_closed_form(start in 0u64..1 << 40, stride in -512i64..512, trip in 1u64..256, idx in 0u64..256) {
        prop_assume!(idx < trip);
        let params = [stride as u64, trip, start];
        let expected = start.wrapping_add((stride as u64).wrapping_mul(idx));
        prop_assert_eq!(eval_linear(idx, &params), expected);
    }

    #[test]
    fn two_dim_closed_form(
        start in 0u64..1 << 40,
        s0 in -64i64..64,
        s1 in -4096i64..4096,
        t0 in 1u64..32,
        n1 in 1u64..32,
        i in 0u64..32,
        j in 0u64..32,
    ) {
        prop_assume!(i < t0 && j < n1);
        let params = [s0 as u64, t0, s1 as u64, t0 * n1, start];
        let expected = start
            .wrapping_add((s0 as u64).wrapping_mul(i))
            .wrapping_add((s1 as u64).wrapping_mul(j));
        prop_assert_eq!(eval_linear(i + j * t0, &params), expected);
    }

    #[test]
    fn dense_nest_is_continuous(elem in prop::sample::select(vec![1u64, 2, 4, 8, 16]), t0 in 1u64..64, n1 in 1u64..16) {
        let dense = invariant_params(&[elem, t0, elem * t0, t0 * n1, 0x1000]);
        prop_assert!(is_continuous(&dense, elem));
        let gapped = invariant_params(&[elem, t0, elem * t0 + 64, t0 * n1, 0x1000]);
        prop_assert!(!is_continuous(&gapped, elem));
    }
}

// ── Strand splits ───────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn interleave_round_trip(interleave in 1u64..64, strands in 1u32..16, idx in 0u64..100_000) {
        let split = StrandSplit::interleave(interleave, strands);
        let strand = split.map_stream_to_strand(idx);
        prop_assert!(strand.strand_idx < strands);
        prop_assert_eq!(split.map_strand_to_stream(strand), idx);
    }

    #[test]
    fn by_elem_round_trip(trip in 1u64..10_000, strands in 1u32..64, idx in 0u64..10_000) {
        prop_assume!(idx < trip);
        let split = StrandSplit::by_elem(trip, strands);
        prop_assert_eq!(split.map_strand_to_stream(split.map_stream_to_strand(idx)), idx);
    }

    #[test]
    fn strand_trips_sum_to_stream_trip(interleave in 1u64..64, strands in 1u32..16, trip in 0u64..10_000) {
        for split in [StrandSplit::interleave(interleave, strands), StrandSplit::by_elem(trip, strands)] {
            let total: u64 = (0..strands).map(|s| split.strand_trip_count(trip, s)).sum();
            prop_assert_eq!(total, trip);
        }
    }
}

// ── Slicer ──────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 100,
        .. ProptestConfig::default()
    })]

    #[test]
    fn contiguous_slices_partition_by_line(
        elem in prop::sample::select(vec![4u64, 8, 16]),
        first in 0u64..64,
        trip in 1u64..200,
    ) {
        let start = 0x10_0000 + first * elem;
        let mut slicer = contiguous_slicer(start, elem, trip);
        let mut slices = Vec::new();
        while slicer.peek_next_slice().lhs < trip {
            slices.push(slicer.next_slice());
        }

        let first_line = start / 64;
        let last_line = (start + elem * trip - 1) / 64;
        prop_assert_eq!(slices.len() as u64, last_line - first_line + 1);
        prop_assert_eq!(slices[0].lhs, 0);
        prop_assert_eq!(slices[slices.len() - 1].rhs, trip);
        for pair in slices.windows(2) {
            prop_assert_eq!(pair[0].rhs, pair[1].lhs);
            prop_assert_eq!(pair[0].vaddr + 64, pair[1].vaddr);
        }
        for s in &slices {
            for idx in s.lhs..s.rhs {
                prop_assert_eq!((start + idx * elem) & !63, s.vaddr);
            }
        }
        prop_assert!(!slicer.has_overflowed());
    }
}

// ── PUM bank mapping ────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 100,
        .. ProptestConfig::default()
    })]

    #[test]
    fn moves_split_every_tile_once(src in 0i64..16, dst in 0i64..16, trip in 1i64..16) {
        prop_assume!(src + trip <= 16 && dst + trip <= 16);
        let c = pum_compiler();
        let cmds = c
            .compile(&AffinePattern::new(src, vec![(1, trip)]), &AffinePattern::new(dst, vec![(1, trip)]))
            .unwrap();
        if src == dst {
            prop_assert!(cmds.is_empty());
        }
        assert_bank_splits_cover(&cmds, c.tile_nums());
    }

    #[test]
    fn compute_splits_every_tile_once(start in 0i64..16, trip in 1i64..16) {
        prop_assume!(start + trip <= 16);
        let c = pum_compiler();
        let cmds = c
            .compile_compute(ComputeOp::Add, &AffinePattern::new(start, vec![(1, trip)]), false)
            .unwrap();
        prop_assert!(!cmds.is_empty());
        let covered: i64 = cmds.iter().map(|c| c.bitline_mask.volume() * c.tile_mask.volume()).sum();
        prop_assert_eq!(covered, trip);
        assert_bank_splits_cover(&cmds, c.tile_nums());
    }
}
