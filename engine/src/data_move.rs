// data_move.rs — Data-move compiler for in-memory compute
//
// The array is tiled with one tile per SRAM array; a tile's elements lie
// along that array's bitlines. Given a source and destination pattern the
// compiler produces the commands that copy every source element onto its
// destination:
//
//   1. Strides that skip elements become stride masks.
//   2. The destination must be a canonical sub-region. The source may also
//      reuse dimensions (stride 0), which are normalized to one coordinate
//      and multicast afterwards.
//   3. The corner difference gives a per-dimension alignment. Each align
//      splits into bitline shifts inside arrays and tile moves across them.
//   4. Every command is masked down to the elements actually moving, then
//      mapped onto banks. Moves that leave a bank become network transfers.
//
// Preconditions: array sizes are divisible by tile sizes and the tiling fits
//   the hardware (checked in `new`).
// Failure modes: `PumError` for patterns that cannot be compiled. The caller
//   falls back to moving the data through the memory hierarchy.
// Side effects: none.

use std::collections::BTreeMap;

use tracing::debug;

use crate::affine::{canonical_strides, linearize, product, AffinePattern, IntVec, Rect};
use crate::error::PumError;
use crate::pum_command::{BankSplit, CmdReuse, CommandKind, ComputeOp, PumCommand, StrideMask, TileMove};
use crate::topology::PumHwConfig;

pub const DEFAULT_WORDLINE_BITS: u32 = 32;

/// One dimension's slice of a region: tiles `[t_lo, t_hi)`, bitlines
/// `[b_lo, b_hi)` inside each of those tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DimPiece {
    t_lo: i64,
    t_hi: i64,
    b_lo: i64,
    b_hi: i64,
}

#[derive(Debug, Clone)]
pub struct DataMoveCompiler {
    hw: PumHwConfig,
    array_sizes: IntVec,
    tile_sizes: IntVec,
    tile_nums: IntVec,
    bitline_strides: IntVec,
    tile_strides: IntVec,
    wordline_bits: u32,
}

impl DataMoveCompiler {
    pub fn new(hw: PumHwConfig, array_sizes: IntVec, tile_sizes: IntVec) -> Result<Self, PumError> {
        if array_sizes.is_empty() || array_sizes.len() != tile_sizes.len() {
            return Err(PumError::DimensionMismatch {
                expected: array_sizes.len(),
                got: tile_sizes.len(),
            });
        }
        for (d, (&s, &t)) in array_sizes.iter().zip(&tile_sizes).enumerate() {
            if s <= 0 || t <= 0 || s % t != 0 {
                return Err(PumError::BadTiling(format!(
                    "dim {}: array size {} is not a positive multiple of tile size {}",
                    d, s, t
                )));
            }
        }
        let tile_nums: IntVec = array_sizes.iter().zip(&tile_sizes).map(|(s, t)| s / t).collect();
        let tile_elems = product(&tile_sizes);
        if tile_elems as u64 > hw.bitlines {
            return Err(PumError::BadTiling(format!(
                "tile of {} elements exceeds {} bitlines",
                tile_elems, hw.bitlines
            )));
        }
        let tiles = product(&tile_nums);
        if tiles as u64 > hw.total_arrays() {
            return Err(PumError::BadTiling(format!(
                "{} tiles exceed {} arrays",
                tiles,
                hw.total_arrays()
            )));
        }
        Ok(Self {
            hw,
            bitline_strides: canonical_strides(&tile_sizes),
            tile_strides: canonical_strides(&tile_nums),
            tile_nums,
            array_sizes,
            tile_sizes,
            wordline_bits: DEFAULT_WORDLINE_BITS,
        })
    }

    pub fn with_wordline_bits(mut self, bits: u32) -> Self {
        self.wordline_bits = bits;
        self
    }

    pub fn array_sizes(&self) -> &[i64] {
        &self.array_sizes
    }

    pub fn tile_sizes(&self) -> &[i64] {
        &self.tile_sizes
    }

    pub fn tile_nums(&self) -> &[i64] {
        &self.tile_nums
    }

    pub fn hw(&self) -> &PumHwConfig {
        &self.hw
    }

    fn dims(&self) -> usize {
        self.array_sizes.len()
    }

    fn check_dims(&self, pattern: &AffinePattern) -> Result<(), PumError> {
        if pattern.dims() != self.dims() {
            return Err(PumError::DimensionMismatch {
                expected: self.dims(),
                got: pattern.dims(),
            });
        }
        Ok(())
    }

    fn array_desc(&self) -> String {
        let sizes: Vec<String> = self.array_sizes.iter().map(|s| s.to_string()).collect();
        sizes.join("x")
    }

    pub fn is_sub_region(&self, pattern: &AffinePattern, allow_reuse: bool) -> bool {
        pattern.is_sub_region(&self.array_sizes, allow_reuse)
    }

    // ── Stride masks ─────────────────────────────────────────────────────

    /// Rewrite dimensions whose stride is a multiple `k` of the canonical
    /// stride into dense dimensions plus a mask keeping every `k`-th
    /// element. Trip-1 dimensions take the canonical stride.
    pub fn turn_stride_into_mask(&self, pattern: &AffinePattern) -> Result<(AffinePattern, Vec<StrideMask>), PumError> {
        self.check_dims(pattern)?;
        let canonical = canonical_strides(&self.array_sizes);
        let mut out = pattern.clone();
        let mut masks = Vec::new();
        for (d, param) in out.params.iter_mut().enumerate() {
            let (stride, trip) = *param;
            let c = canonical[d];
            if trip == 1 {
                *param = (c, 1);
                continue;
            }
            if stride == 0 || stride == c || stride <= 0 || stride % c != 0 {
                continue;
            }
            let k = stride / c;
            if self.tile_sizes[d] % k != 0 {
                return Err(PumError::StrideNotMaskable {
                    dim: d,
                    stride,
                    tile: self.tile_sizes[d],
                });
            }
            let corner = (pattern.start / c) % self.array_sizes[d];
            *param = (c, (trip - 1) * k + 1);
            masks.push(StrideMask {
                dim: d,
                stride: k,
                modulo: corner % k,
            });
        }
        Ok((out, masks))
    }

    // ── Compilation ──────────────────────────────────────────────────────

    /// Compile the commands copying `src` onto `dst`.
    pub fn compile(&self, src: &AffinePattern, dst: &AffinePattern) -> Result<Vec<PumCommand>, PumError> {
        self.check_dims(src)?;
        self.check_dims(dst)?;
        let (src_m, src_masks) = self.turn_stride_into_mask(src)?;
        let (dst_m, dst_masks) = self.turn_stride_into_mask(dst)?;
        let mask_shape = |m: &[StrideMask]| m.iter().map(|m| (m.dim, m.stride)).collect::<Vec<_>>();
        if mask_shape(&src_masks) != mask_shape(&dst_masks) {
            return Err(PumError::TripMismatch {
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }
        if !self.is_sub_region(&dst_m, false) {
            return Err(PumError::NotSubRegion {
                role: "destination",
                pattern: dst.to_string(),
                array: self.array_desc(),
            });
        }
        if !self.is_sub_region(&src_m, true) {
            return Err(PumError::NotSubRegion {
                role: "source",
                pattern: src.to_string(),
                array: self.array_desc(),
            });
        }
        if src_m.trips() != dst_m.trips() {
            return Err(PumError::TripMismatch {
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }

        let reuses = self.collect_reuses(&src_m);
        let src_norm = self.remove_reuse(&src_m);
        let src_corner = src_norm.sub_region_start(&self.array_sizes);
        let dst_corner = dst_m.sub_region_start(&self.array_sizes);
        let deltas: IntVec = dst_corner.iter().zip(&src_corner).map(|(d, s)| d - s).collect();
        if deltas.iter().all(|&d| d == 0) && reuses.is_empty() {
            return Ok(Vec::new());
        }
        debug!(src = %src, dst = %dst, ?deltas, ?reuses, "compile data move");

        let region = src_norm.to_rect(&self.array_sizes);
        let multicast = reuses.iter().copied().find(|r| self.tile_sizes[r.dim] == 1);
        let expanded: Vec<CmdReuse> = reuses
            .iter()
            .copied()
            .filter(|r| Some(r.dim) != multicast.map(|m| m.dim))
            .collect();

        let mut commands = Vec::new();
        for offsets in reuse_offsets(&expanded) {
            let mut ds = deltas.clone();
            for (r, j) in expanded.iter().zip(&offsets) {
                ds[r.dim] += j;
            }
            let (cmds, cur) = self.compile_aligns(&ds, &region, multicast.map(|m| m.dim));
            commands.extend(cmds);
            if let Some(m) = multicast {
                commands.extend(self.compile_multicast(m, ds[m.dim], &cur));
            }
        }
        for cmd in &mut commands {
            cmd.stride_masks = src_masks.clone();
        }
        self.finish(commands)
    }

    /// Elementwise `op` over a sub-region already laid out in the arrays.
    pub fn compile_compute(&self, op: ComputeOp, region: &AffinePattern, reduce: bool) -> Result<Vec<PumCommand>, PumError> {
        self.check_dims(region)?;
        let (dense, masks) = self.turn_stride_into_mask(region)?;
        if !self.is_sub_region(&dense, false) {
            return Err(PumError::NotSubRegion {
                role: "compute",
                pattern: region.to_string(),
                array: self.array_desc(),
            });
        }
        let cmd = PumCommand::compute(op, reduce, Rect::full(&self.tile_sizes), Rect::full(&self.tile_nums));
        let mut commands = self.mask_by_region(&cmd, &dense.to_rect(&self.array_sizes));
        for c in &mut commands {
            c.stride_masks = masks.clone();
        }
        self.finish(commands)
    }

    /// Barrier between dependent command groups.
    pub fn append_sync(&self, commands: &mut Vec<PumCommand>) {
        let mut sync = PumCommand::sync();
        sync.wordline_bits = self.wordline_bits;
        commands.push(sync);
    }

    fn finish(&self, mut commands: Vec<PumCommand>) -> Result<Vec<PumCommand>, PumError> {
        for cmd in &mut commands {
            cmd.wordline_bits = self.wordline_bits;
        }
        self.map_to_banks(&mut commands);
        Ok(filter_empty(commands))
    }

    fn collect_reuses(&self, pattern: &AffinePattern) -> Vec<CmdReuse> {
        pattern
            .params
            .iter()
            .enumerate()
            .filter(|(_, &(stride, trip))| stride == 0 && trip > 1)
            .map(|(dim, &(_, trip))| CmdReuse { dim, count: trip })
            .collect()
    }

    fn remove_reuse(&self, pattern: &AffinePattern) -> AffinePattern {
        let canonical = canonical_strides(&self.array_sizes);
        let params = pattern
            .params
            .iter()
            .enumerate()
            .map(|(d, &(stride, trip))| if stride == 0 { (canonical[d], 1) } else { (stride, trip) })
            .collect();
        AffinePattern::new(pattern.start, params)
    }

    /// Apply aligns one dimension at a time; each later align moves the
    /// region as left by the earlier ones.
    fn compile_aligns(&self, deltas: &[i64], region: &Rect, skip_dim: Option<usize>) -> (Vec<PumCommand>, Rect) {
        let mut cur = region.clone();
        let mut commands = Vec::new();
        for (d, &delta) in deltas.iter().enumerate() {
            if Some(d) == skip_dim || delta == 0 {
                continue;
            }
            commands.extend(self.compile_align(d, delta, &cur));
            cur = cur.shift(d, delta);
        }
        (commands, cur)
    }

    /// Move `region` by `delta` elements along `dim`.
    ///
    /// With tile size `T`, `delta = q*T + r`. Bitlines `[0, T-r)` shift up
    /// by `r` then move `q` tiles; bitlines `[T-r, T)` shift down by `T-r`
    /// then move `q+1` tiles.
    fn compile_align(&self, dim: usize, delta: i64, region: &Rect) -> Vec<PumCommand> {
        let t = self.tile_sizes[dim];
        let q = delta.div_euclid(t);
        let r = delta.rem_euclid(t);
        let bs = self.bitline_strides[dim];
        let ts = self.tile_strides[dim];
        let n = self.tile_nums[dim];
        let full_b = Rect::full(&self.tile_sizes);
        let full_t = Rect::full(&self.tile_nums);

        let mut out = Vec::new();
        for (lo, hi, bshift, tshift) in [(0, t - r, r, q), (t - r, t, r - t, q + 1)] {
            if lo >= hi {
                continue;
            }
            let part = full_b.with_dim(dim, lo, hi);
            if bshift != 0 {
                let cmd = PumCommand::intra_array(part.clone(), full_t.clone(), bshift * bs);
                out.extend(self.mask_by_region(&cmd, region));
            }
            if tshift != 0 {
                let tiles = full_t.with_dim(dim, 0.max(-tshift), n.min(n - tshift));
                let cmd = PumCommand::inter_array(part.shift(dim, bshift), tiles, tshift * ts);
                out.extend(self.mask_by_region(&cmd, &region.shift(dim, bshift)));
            }
        }
        out
    }

    /// One tile-granular move repeated `reuse.count` times along `reuse.dim`.
    fn compile_multicast(&self, reuse: CmdReuse, delta: i64, region: &Rect) -> Vec<PumCommand> {
        let n = self.tile_nums[reuse.dim];
        let lo = 0.max(-delta);
        let hi = n.min(n - delta - reuse.count + 1);
        let tiles = Rect::full(&self.tile_nums).with_dim(reuse.dim, lo, hi);
        let mut cmd = PumCommand::inter_array(
            Rect::full(&self.tile_sizes),
            tiles,
            delta * self.tile_strides[reuse.dim],
        );
        cmd.reuse = Some(reuse);
        self.mask_by_region(&cmd, region)
    }

    // ── Masking ──────────────────────────────────────────────────────────

    fn dim_pieces(&self, dim: usize, lo: i64, hi: i64) -> Vec<DimPiece> {
        let t = self.tile_sizes[dim];
        let t_first = lo / t;
        let t_last = (hi - 1) / t;
        let mut pieces = Vec::new();
        if t_first == t_last {
            pieces.push(DimPiece {
                t_lo: t_first,
                t_hi: t_first + 1,
                b_lo: lo - t_first * t,
                b_hi: hi - t_first * t,
            });
            return pieces;
        }
        pieces.push(DimPiece {
            t_lo: t_first,
            t_hi: t_first + 1,
            b_lo: lo - t_first * t,
            b_hi: t,
        });
        if t_last > t_first + 1 {
            pieces.push(DimPiece {
                t_lo: t_first + 1,
                t_hi: t_last,
                b_lo: 0,
                b_hi: t,
            });
        }
        pieces.push(DimPiece {
            t_lo: t_last,
            t_hi: t_last + 1,
            b_lo: 0,
            b_hi: hi - t_last * t,
        });
        // Fold whole-tile pieces together.
        let mut merged: Vec<DimPiece> = Vec::with_capacity(pieces.len());
        for p in pieces {
            match merged.last_mut() {
                Some(m) if m.b_lo == 0 && m.b_hi == t && p.b_lo == 0 && p.b_hi == t && m.t_hi == p.t_lo => {
                    m.t_hi = p.t_hi;
                }
                _ => merged.push(p),
            }
        }
        merged
    }

    /// Restrict `cmd` to the elements of `region` (global coordinates of
    /// the positions the command reads). One command per region piece.
    fn mask_by_region(&self, cmd: &PumCommand, region: &Rect) -> Vec<PumCommand> {
        let region = region.clip(&self.array_sizes);
        if region.is_empty() {
            return Vec::new();
        }
        let per_dim: Vec<Vec<DimPiece>> = (0..self.dims())
            .map(|d| self.dim_pieces(d, region.lo[d], region.hi[d]))
            .collect();
        let mut out = Vec::new();
        for combo in cartesian(&per_dim) {
            let tiles = Rect::new(combo.iter().map(|p| p.t_lo).collect(), combo.iter().map(|p| p.t_hi).collect());
            let bitlines = Rect::new(combo.iter().map(|p| p.b_lo).collect(), combo.iter().map(|p| p.b_hi).collect());
            let tile_mask = cmd.tile_mask.intersect(&tiles);
            let bitline_mask = cmd.bitline_mask.intersect(&bitlines);
            if tile_mask.is_empty() || bitline_mask.is_empty() {
                continue;
            }
            let mut masked = cmd.clone();
            masked.tile_mask = tile_mask;
            masked.bitline_mask = bitline_mask;
            out.push(masked);
        }
        out
    }

    // ── Bank mapping ─────────────────────────────────────────────────────

    fn map_to_banks(&self, commands: &mut [PumCommand]) {
        for cmd in commands.iter_mut() {
            if matches!(cmd.kind, CommandKind::Sync) {
                continue;
            }
            let mut banks: BTreeMap<u64, BankSplit> = BTreeMap::new();
            for point in cmd.tile_mask.points() {
                let tile = linearize(&point, &self.tile_nums) as u64;
                let bank = self.hw.locate_array(tile).bank;
                let split = banks.entry(bank).or_insert_with(|| BankSplit {
                    bank,
                    tiles: Vec::new(),
                    moves: Vec::new(),
                });
                split.tiles.push(tile);
                if let CommandKind::InterArray { tile_dist } = cmd.kind {
                    let (count, step) = match cmd.reuse {
                        Some(r) => (r.count, self.tile_strides[r.dim]),
                        None => (1, 0),
                    };
                    for j in 0..count {
                        let dst_tile = (tile as i64 + tile_dist + j * step) as u64;
                        let dst_bank = self.hw.locate_array(dst_tile).bank;
                        split.moves.push(TileMove {
                            src_tile: tile,
                            dst_tile,
                            dst_bank,
                            network: dst_bank != bank,
                        });
                    }
                }
            }
            cmd.bank_splits = banks.into_values().collect();
        }
    }
}

pub fn filter_empty(commands: Vec<PumCommand>) -> Vec<PumCommand> {
    commands.into_iter().filter(|c| !c.is_empty()).collect()
}

/// Every choice of offset `0..count` for each expanded reuse dimension.
fn reuse_offsets(reuses: &[CmdReuse]) -> Vec<Vec<i64>> {
    let ranges: Vec<Vec<i64>> = reuses.iter().map(|r| (0..r.count).collect()).collect();
    cartesian(&ranges)
}

fn cartesian<T: Clone>(sets: &[Vec<T>]) -> Vec<Vec<T>> {
    let mut out: Vec<Vec<T>> = vec![Vec::new()];
    for set in sets {
        let mut next = Vec::with_capacity(out.len() * set.len());
        for prefix in &out {
            for item in set {
                let mut v = prefix.clone();
                v.push(item.clone());
                next.push(v);
            }
        }
        out = next;
    }
    out
}
