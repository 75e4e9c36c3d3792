// addr_gen.rs — Address pattern evaluation
//
// Evaluates a stream's formal parameters into an address (or value) for one
// element index. Linear patterns use the encoding
//
//     stride0, [trip_1, stride_1]*, [trip_n], start
//
// where every trip is cumulative: the product of all inner extents. The
// trailing total trip is optional for evaluation and required for decoding
// into a `LinearPattern`. Indirect and computed patterns go through a user
// `ComputeFunc`.
//
// Preconditions: linear parameter lists have at least two entries.
// Failure modes: `PatternError` for malformed patterns in analysis and
//   splitting; evaluation itself never fails (arithmetic wraps).
// Side effects: none.

use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::error::PatternError;
use crate::id::StaticId;
use crate::strand::StrandSplit;
use crate::value::{format_params, resolve_params, FormalParam, StreamValue};

// ── Generators ───────────────────────────────────────────────────────────

pub trait AddrGen: fmt::Debug {
    fn gen_addr(&self, idx: u64, params: &[StreamValue]) -> StreamValue;

    /// Cycles spent producing one value.
    fn estimated_latency(&self) -> u64 {
        1
    }

    fn is_linear(&self) -> bool {
        false
    }
}

/// Resolve `formal` through `resolver` and evaluate element `idx`.
pub fn gen_addr<F>(gen: &dyn AddrGen, idx: u64, formal: &[FormalParam], resolver: F) -> StreamValue
where
    F: FnMut(StaticId) -> StreamValue,
{
    let params = resolve_params(formal, resolver);
    gen.gen_addr(idx, &params)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinearAddrGen;

impl AddrGen for LinearAddrGen {
    fn gen_addr(&self, idx: u64, params: &[StreamValue]) -> StreamValue {
        let raw: Vec<u64> = params.iter().map(|p| p.front()).collect();
        StreamValue::from_u64(eval_linear(idx, &raw))
    }

    fn is_linear(&self) -> bool {
        true
    }
}

/// Core linear evaluation over raw parameter words.
///
/// Levels are peeled from the outermost stride inward so the running index
/// only ever shrinks. A zero trip leaves the index untouched for that level.
pub fn eval_linear(idx: u64, params: &[u64]) -> u64 {
    assert!(params.len() >= 2, "linear pattern needs at least 2 params");
    let mut start = params[params.len() - 1];
    let stride_start = if params.len() % 2 == 1 {
        params.len() - 3
    } else {
        params.len() - 2
    };
    let mut stride = params[stride_start];
    let mut nested = idx;
    let mut p = stride_start;
    while p > 1 {
        let trip = params[p - 1];
        if trip != 0 {
            start = start.wrapping_add(stride.wrapping_mul(nested / trip));
            nested %= trip;
        }
        stride = params[p - 2];
        p -= 2;
    }
    let addr = start.wrapping_add(stride.wrapping_mul(nested));
    trace!(idx, addr = format_args!("{:#x}", addr), "linear addr");
    addr
}

/// A user compute function with a fixed latency. Used both as an address
/// generator for indirect streams and as the compute kernel of
/// load/store-compute, update and reduction streams.
#[derive(Clone)]
pub struct ComputeFunc {
    pub name: String,
    pub latency: u64,
    func: Rc<dyn Fn(&[StreamValue]) -> StreamValue>,
}

impl ComputeFunc {
    pub fn new<F>(name: impl Into<String>, latency: u64, func: F) -> Self
    where
        F: Fn(&[StreamValue]) -> StreamValue + 'static,
    {
        Self {
            name: name.into(),
            latency,
            func: Rc::new(func),
        }
    }

    pub fn invoke(&self, params: &[StreamValue]) -> StreamValue {
        (self.func)(params)
    }
}

impl fmt::Debug for ComputeFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeFunc")
            .field("name", &self.name)
            .field("latency", &self.latency)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct FuncAddrGen {
    pub func: ComputeFunc,
}

impl FuncAddrGen {
    pub fn new(func: ComputeFunc) -> Self {
        Self { func }
    }
}

impl AddrGen for FuncAddrGen {
    fn gen_addr(&self, _idx: u64, params: &[StreamValue]) -> StreamValue {
        self.func.invoke(params)
    }

    fn estimated_latency(&self) -> u64 {
        self.func.latency
    }
}

// ── Linear analysis ──────────────────────────────────────────────────────

/// Reuse found inside one linear stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReuseEstimate {
    /// Bytes touched before the pattern falls back to its start.
    pub footprint: u64,
    /// Minimal number of times that footprint is revisited.
    pub count: u64,
}

fn invariant_words(formal: &[FormalParam]) -> Result<Vec<u64>, PatternError> {
    formal
        .iter()
        .enumerate()
        .map(|(i, p)| {
            p.invariant_value().ok_or_else(|| PatternError::VariantParam {
                position: i,
                params: format_params(formal),
            })
        })
        .collect()
}

/// True when the pattern walks memory without gaps.
pub fn is_continuous(formal: &[FormalParam], elem_size: u64) -> bool {
    let Ok(words) = invariant_words(formal) else {
        return false;
    };
    if words.len() < 2 {
        return false;
    }
    let stride0 = words[0];
    if stride0 > elem_size {
        return false;
    }
    let mut p = 1;
    while p + 2 < words.len() {
        if stride0.wrapping_mul(words[p]) != words[p + 1] {
            return false;
        }
        p += 2;
    }
    true
}

pub fn inner_stride(formal: &[FormalParam]) -> Option<i64> {
    formal.first()?.invariant_value().map(|v| v as i64)
}

pub fn start_addr(formal: &[FormalParam]) -> Option<u64> {
    formal.last()?.invariant_value()
}

/// Cumulative trip count of loop level `level` (1 = innermost).
pub fn nest_trip_count(formal: &[FormalParam], level: usize) -> Option<u64> {
    let known_levels = formal.len().saturating_sub(1) / 2;
    if level == 0 || level > known_levels {
        return None;
    }
    formal[(level - 1) * 2 + 1].invariant_value()
}

/// Index of the first element touching `addr`, counted along stride0.
/// `None` when `addr` lies within the first element or stride0 is not
/// positive.
pub fn first_element_for_addr(formal: &[FormalParam], elem_size: u64, addr: u64) -> Option<u64> {
    let start = start_addr(formal)?;
    let stride0 = formal.first()?.invariant_value()? as i64;
    if stride0 <= 0 || addr <= start + elem_size {
        return None;
    }
    Some((addr - start) / stride0 as u64 + 1)
}

/// Find reuse from the first zero stride.
pub fn estimate_reuse(
    formal: &[FormalParam],
    elem_size: u64,
) -> Result<Option<ReuseEstimate>, PatternError> {
    let words = invariant_words(formal)?;
    if words.len() < 2 {
        return Err(PatternError::ParamCount {
            count: words.len(),
            params: format_params(formal),
        });
    }
    let stride_end = if words.len() % 2 == 1 {
        words.len() - 2
    } else {
        words.len() - 1
    };
    let Some(reuse_idx) = (0..stride_end).step_by(2).find(|&i| words[i] == 0) else {
        return Ok(None);
    };
    let adjusted_elem_size = if reuse_idx > 0 {
        elem_size.min((words[0] as i64).unsigned_abs())
    } else {
        elem_size
    };
    let before_reuse = if reuse_idx > 0 {
        words[reuse_idx - 1]
    } else {
        1
    };
    let count = if reuse_idx + 2 < words.len() && before_reuse != 0 {
        words[reuse_idx + 1] / before_reuse
    } else {
        1
    };
    Ok(Some(ReuseEstimate {
        footprint: before_reuse * adjusted_elem_size,
        count,
    }))
}

/// Render a linear parameter list as `start:stride:ratio[%rem]:...`.
///
/// Trips are shown as ratios to the previous cumulative trip. A trip that
/// shrinks is rejected with the raw cumulative form in the message.
pub fn describe_params(formal: &[FormalParam]) -> Result<String, PatternError> {
    let words = invariant_words(formal)?;
    if words.is_empty() {
        return Err(PatternError::ParamCount {
            count: 0,
            params: String::new(),
        });
    }
    let start = words[words.len() - 1];
    let mut out = format!("{:x}", start);
    let mut raw = out.clone();
    let mut prev_trip = 1u64;
    let mut invalid = false;
    let mut i = 0;
    while i + 1 < words.len() {
        let stride = words[i] as i64;
        out.push_str(&format!(":{}", stride));
        raw.push_str(&format!(":{}", stride));
        if i + 2 < words.len() {
            let trip = words[i + 1];
            raw.push_str(&format!(":{}", trip));
            if prev_trip == 0 || trip == 0 {
                out.push_str(&format!(":{}", trip));
            } else {
                if trip < prev_trip {
                    invalid = true;
                }
                out.push_str(&format!(":{}", trip / prev_trip));
                if trip % prev_trip != 0 {
                    out.push_str(&format!("%{}", trip % prev_trip));
                }
            }
            prev_trip = trip;
        }
        i += 2;
    }
    if invalid {
        return Err(PatternError::NonMonotonicTrip { pattern: raw });
    }
    Ok(out)
}

// ── Decoded linear pattern ───────────────────────────────────────────────

/// A fully invariant linear pattern with its total trip count.
///
/// `trips[i]` is the cumulative trip through dimension `i`, so
/// `trips.last()` is the number of elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearPattern {
    pub start: u64,
    pub strides: Vec<i64>,
    pub trips: Vec<u64>,
}

impl LinearPattern {
    pub fn new(start: u64, strides: Vec<i64>, trips: Vec<u64>) -> Self {
        assert_eq!(strides.len(), trips.len(), "stride/trip count mismatch");
        Self {
            start,
            strides,
            trips,
        }
    }

    /// 1-D pattern `start : stride : trip`.
    pub fn one_dim(start: u64, stride: i64, trip: u64) -> Self {
        Self::new(start, vec![stride], vec![trip])
    }

    pub fn decode(formal: &[FormalParam]) -> Result<Self, PatternError> {
        if formal.len() < 3 || formal.len() % 2 == 0 {
            return Err(PatternError::ParamCount {
                count: formal.len(),
                params: format_params(formal),
            });
        }
        // Rejects variant params and shrinking trips.
        describe_params(formal)?;
        let words = invariant_words(formal)?;
        let dims = (words.len() - 1) / 2;
        let strides = (0..dims).map(|d| words[2 * d] as i64).collect();
        let trips = (0..dims).map(|d| words[2 * d + 1]).collect();
        Ok(Self::new(words[words.len() - 1], strides, trips))
    }

    pub fn to_params(&self) -> Vec<FormalParam> {
        let mut out = Vec::with_capacity(self.strides.len() * 2 + 1);
        for (s, t) in self.strides.iter().zip(&self.trips) {
            out.push(FormalParam::invariant(*s as u64));
            out.push(FormalParam::invariant(*t));
        }
        out.push(FormalParam::invariant(self.start));
        out
    }

    fn words(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.strides.len() * 2 + 1);
        for (s, t) in self.strides.iter().zip(&self.trips) {
            out.push(*s as u64);
            out.push(*t);
        }
        out.push(self.start);
        out
    }

    pub fn dims(&self) -> usize {
        self.strides.len()
    }

    pub fn total_trip(&self) -> u64 {
        self.trips.last().copied().unwrap_or(0)
    }

    /// Per-dimension extents, derived from the cumulative trips.
    pub fn extents(&self) -> Vec<u64> {
        let mut prev = 1;
        self.trips
            .iter()
            .map(|&t| {
                let e = if prev == 0 { 0 } else { t / prev };
                prev = t;
                e
            })
            .collect()
    }

    pub fn addr(&self, idx: u64) -> u64 {
        eval_linear(idx, &self.words())
    }

    /// Collapse a continuous pattern to `start : stride0 : total`.
    pub fn flatten(&self) -> Self {
        Self::one_dim(self.start, self.strides[0], self.total_trip())
    }

    fn unsupported(&self, reason: impl Into<String>) -> PatternError {
        PatternError::UnsupportedSplit {
            pattern: self.to_string(),
            reason: reason.into(),
        }
    }

    /// Contiguous element range `[start_elem, end_elem)` of a 1-D pattern.
    pub fn split_by_elem(&self, start_elem: u64, end_elem: u64) -> Result<Self, PatternError> {
        if self.dims() != 1 {
            return Err(self.unsupported("element split needs a 1-D pattern"));
        }
        if start_elem >= end_elem || end_elem > self.total_trip() {
            return Err(self.unsupported(format!(
                "bad element range [{}, {})",
                start_elem, end_elem
            )));
        }
        let stride = self.strides[0];
        Ok(Self::one_dim(
            self.start
                .wrapping_add((start_elem as i64).wrapping_mul(stride) as u64),
            stride,
            end_elem - start_elem,
        ))
    }

    /// Interleaved split of a 1-D pattern: strand `strand_idx` takes runs of
    /// `interleave` elements every `total_strands * interleave` elements.
    pub fn split_1d(&self, interleave: u64, total_strands: u32, strand_idx: u32) -> Result<Self, PatternError> {
        if self.dims() != 1 {
            return Err(self.unsupported("interleaved split needs a 1-D pattern"));
        }
        let split = StrandSplit::interleave(interleave, total_strands);
        let stride = self.strides[0];
        let strand_trip = split.strand_trip_count(self.total_trip(), strand_idx);
        let inner_trip = strand_trip.min(interleave);
        let strand_stride = stride.wrapping_mul((total_strands as u64 * interleave) as i64);
        let strand_start = self.start.wrapping_add(
            stride.wrapping_mul((strand_idx as u64 * interleave) as i64) as u64,
        );
        Ok(Self::new(
            strand_start,
            vec![stride, strand_stride],
            vec![inner_trip, strand_trip],
        ))
    }

    /// Split at dimension `dim` in OpenMP static style.
    ///
    /// With `I = interleave / inner` (inner = product of extents below `dim`)
    /// and `N = I * total_strands`, strand `k` starts `k * I` steps into
    /// `dim`, walks `I` steps, then jumps `N` steps. Leftover steps go to the
    /// low strands. When `dim` has fewer than `N` steps the strand holding
    /// the tail is partial and later strands are empty.
    pub fn split_at_dim(
        &self,
        dim: usize,
        interleave: u64,
        strand_idx: u32,
        total_strands: u32,
    ) -> Result<Self, PatternError> {
        if dim >= self.dims() {
            return Err(self.unsupported(format!("split dim {} out of range", dim)));
        }
        if self.trips.iter().any(|&t| t == 0) {
            return Err(self.unsupported("zero trip"));
        }
        let extents = self.extents();
        let split_trip = extents[dim];
        let split_stride = self.strides[dim];
        let inner: u64 = extents[..dim].iter().product();
        if interleave == 0 || interleave % inner != 0 {
            return Err(self.unsupported(format!(
                "interleave {} not a multiple of inner trip {}",
                interleave, inner
            )));
        }
        let intrlv_trip = interleave / inner;
        let total_intrlv_trip = intrlv_trip * total_strands as u64;
        let outermost = dim + 1 == self.dims();
        let strand = strand_idx as u64;

        let mut strand_split_trip = intrlv_trip;
        let split_out_trip;
        if total_intrlv_trip <= split_trip {
            let rem = split_trip % total_intrlv_trip;
            if rem % intrlv_trip != 0 && !outermost {
                return Err(self.unsupported(format!(
                    "remainder trip {} not a multiple of interleave trip {}",
                    rem, intrlv_trip
                )));
            }
            let remainder_strands = (rem + intrlv_trip - 1) / intrlv_trip;
            split_out_trip = split_trip / total_intrlv_trip + u64::from(strand < remainder_strands);
        } else {
            let final_strand = split_trip / intrlv_trip;
            if strand == final_strand {
                strand_split_trip = split_trip - final_strand * intrlv_trip;
            } else if strand > final_strand {
                strand_split_trip = 0;
            }
            split_out_trip = 1;
        }

        let start = self.start.wrapping_add(
            split_stride.wrapping_mul((strand * intrlv_trip) as i64) as u64,
        );
        let mut strides = self.strides[..=dim].to_vec();
        let mut trips = self.trips[..dim].to_vec();
        trips.push(strand_split_trip * inner);
        strides.push(split_stride.wrapping_mul(total_intrlv_trip as i64));
        let mut out_trip = split_out_trip * strand_split_trip * inner;
        if outermost {
            // Leftover steps that do not fill a whole interleave unit.
            let split = StrandSplit::interleave(intrlv_trip, total_strands);
            out_trip = split.strand_trip_count(split_trip, strand_idx) * inner;
        }
        trips.push(out_trip);
        for d in dim + 1..self.dims() {
            strides.push(self.strides[d]);
            let prev = *trips.last().unwrap_or(&1);
            trips.push(prev * extents[d]);
        }
        Ok(Self::new(start, strides, trips))
    }
}

impl fmt::Display for LinearPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match describe_params(&self.to_params()) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => {
                write!(f, "{:x}", self.start)?;
                for (s, t) in self.strides.iter().zip(&self.trips) {
                    write!(f, ":{}:{}", s, t)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{invariant_params, unreachable_resolver};

    fn addrs(pattern: &LinearPattern) -> Vec<u64> {
        (0..pattern.total_trip()).map(|i| pattern.addr(i)).collect()
    }

    #[test]
    fn one_dim_addresses() {
        let formal = invariant_params(&[8, 4, 0x1000]);
        let got: Vec<u64> = (0..4)
            .map(|i| gen_addr(&LinearAddrGen, i, &formal, unreachable_resolver).front())
            .collect();
        assert_eq!(got, vec![0x1000, 0x1008, 0x1010, 0x1018]);
    }

    #[test]
    fn two_dim_addresses() {
        // 3 x 2 block of a row-major array with 100-byte rows.
        let formal = invariant_params(&[4, 3, 100, 6, 0x2000]);
        let got: Vec<u64> = (0..6)
            .map(|i| gen_addr(&LinearAddrGen, i, &formal, unreachable_resolver).front())
            .collect();
        assert_eq!(
            got,
            vec![0x2000, 0x2004, 0x2008, 0x2000 + 100, 0x2004 + 100, 0x2008 + 100]
        );
    }

    #[test]
    fn without_total_trip_and_negative_stride() {
        let neg = (-8i64) as u64;
        let formal = invariant_params(&[neg, 0x100]);
        let a = gen_addr(&LinearAddrGen, 2, &formal, unreachable_resolver).front();
        assert_eq!(a, 0x100 - 16);
    }

    #[test]
    fn zero_trip_skips_level() {
        // The outer level has a zero trip so the index is not folded.
        assert_eq!(eval_linear(5, &[8, 0, 1000, 0x40]), 0x40 + 40);
    }

    #[test]
    fn base_stream_params_are_resolved() {
        let formal = vec![
            FormalParam::invariant(8),
            FormalParam::invariant(4),
            FormalParam::base(9),
        ];
        let v = gen_addr(&LinearAddrGen, 1, &formal, |id| {
            assert_eq!(id, 9);
            StreamValue::from_u64(0x500)
        });
        assert_eq!(v.front(), 0x508);
    }

    #[test]
    fn func_gen_uses_latency() {
        let func = ComputeFunc::new("add", 3, |p: &[StreamValue]| {
            StreamValue::from_u64(p[0].front() + p[1].front())
        });
        let gen = FuncAddrGen::new(func);
        let formal = invariant_params(&[2, 5]);
        assert_eq!(gen_addr(&gen, 0, &formal, unreachable_resolver).front(), 7);
        assert_eq!(gen.estimated_latency(), 3);
        assert!(!gen.is_linear());
    }

    #[test]
    fn continuity() {
        assert!(is_continuous(&invariant_params(&[8, 4, 32, 16, 0]), 8));
        assert!(!is_continuous(&invariant_params(&[8, 4, 40, 16, 0]), 8));
        assert!(!is_continuous(&invariant_params(&[16, 4, 0]), 8));
        assert!(!is_continuous(
            &[FormalParam::invariant(8), FormalParam::base(1)],
            8
        ));
    }

    #[test]
    fn reuse_estimate() {
        // Inner 4 x 8B, then stride 0 repeated 3 times.
        let formal = invariant_params(&[8, 4, 0, 12, 0x1000]);
        let r = estimate_reuse(&formal, 8).unwrap().unwrap();
        assert_eq!(r, ReuseEstimate { footprint: 32, count: 3 });

        // Innermost zero stride: one element reused for the inner trip.
        let formal = invariant_params(&[0, 5, 0x1000]);
        let r = estimate_reuse(&formal, 4).unwrap().unwrap();
        assert_eq!(r, ReuseEstimate { footprint: 4, count: 5 });

        assert_eq!(estimate_reuse(&invariant_params(&[8, 4, 0]), 8).unwrap(), None);
    }

    #[test]
    fn reuse_clamps_element_size_to_stride() {
        let formal = invariant_params(&[4, 8, 0, 16, 0]);
        let r = estimate_reuse(&formal, 8).unwrap().unwrap();
        assert_eq!(r.footprint, 32);
        assert_eq!(r.count, 2);
    }

    #[test]
    fn accessors() {
        let formal = invariant_params(&[8, 4, 32, 16, 0x1000]);
        assert_eq!(inner_stride(&formal), Some(8));
        assert_eq!(start_addr(&formal), Some(0x1000));
        assert_eq!(nest_trip_count(&formal, 1), Some(4));
        assert_eq!(nest_trip_count(&formal, 2), Some(16));
        assert_eq!(nest_trip_count(&formal, 3), None);
        assert_eq!(first_element_for_addr(&formal, 8, 0x1020), Some(5));
        assert_eq!(first_element_for_addr(&formal, 8, 0x1004), None);

        let descending = invariant_params(&[(-8i64) as u64, 0x1000]);
        assert_eq!(first_element_for_addr(&descending, 8, 0x1020), None);
    }

    #[test]
    fn describe_shows_ratios() {
        let formal = invariant_params(&[8, 4, 32, 10, 0x1000]);
        assert_eq!(describe_params(&formal).unwrap(), "1000:8:4:32:2%2");
    }

    #[test]
    fn decode_rejects_even_count_and_shrinking_trips() {
        let err = LinearPattern::decode(&invariant_params(&[8, 0x1000])).unwrap_err();
        assert!(matches!(err, PatternError::ParamCount { count: 2, .. }));
        let err = LinearPattern::decode(&invariant_params(&[8, 16, 64, 4, 0x40])).unwrap_err();
        assert_eq!(
            err,
            PatternError::NonMonotonicTrip {
                pattern: "40:8:16:64:4".to_string()
            }
        );
    }

    #[test]
    fn decode_round_trips_params() {
        let formal = invariant_params(&[8, 4, 32, 16, 0x1000]);
        let pat = LinearPattern::decode(&formal).unwrap();
        assert_eq!(pat.extents(), vec![4, 4]);
        assert_eq!(pat.to_params(), formal);
        assert_eq!(pat.to_string(), "1000:8:4:32:4");
    }

    #[test]
    fn split_by_elem_range() {
        let pat = LinearPattern::one_dim(0x1000, 8, 10);
        let s = pat.split_by_elem(3, 7).unwrap();
        assert_eq!(addrs(&s), vec![0x1018, 0x1020, 0x1028, 0x1030]);
        assert!(pat.split_by_elem(7, 7).is_err());
        assert!(pat.split_by_elem(0, 11).is_err());
    }

    #[test]
    fn split_1d_matches_interleave_mapping() {
        let pat = LinearPattern::one_dim(0, 1, 22);
        let split = StrandSplit::interleave(4, 3);
        for strand in 0..3 {
            let s = pat.split_1d(4, 3, strand).unwrap();
            let expect: Vec<u64> = (0..split.strand_trip_count(22, strand))
                .map(|e| split.map_strand_to_stream(crate::strand::StrandElemIdx::new(strand, e)))
                .collect();
            assert_eq!(addrs(&s), expect, "strand {}", strand);
        }
    }

    #[test]
    fn split_at_inner_dim_with_remainder() {
        // 10 x 3 array, split the inner dim (extent 10) by 2 over 2 strands.
        let pat = LinearPattern::new(0, vec![1, 100], vec![10, 30]);
        let s0 = pat.split_at_dim(0, 2, 0, 2).unwrap();
        let s1 = pat.split_at_dim(0, 2, 1, 2).unwrap();
        // 10 % 4 = 2 leftover steps go to strand 0.
        assert_eq!(s0.total_trip(), 18);
        assert_eq!(s1.total_trip(), 12);
        let mut all: Vec<u64> = addrs(&s0).into_iter().chain(addrs(&s1)).collect();
        all.sort_unstable();
        assert_eq!(all, addrs(&pat));
        assert_eq!(&addrs(&s1)[..4], &[2, 3, 6, 7]);
    }

    #[test]
    fn split_at_outer_dim_covers_all() {
        let pat = LinearPattern::new(0x100, vec![8, 64], vec![8, 40]);
        let mut all = Vec::new();
        for k in 0..3 {
            all.extend(addrs(&pat.split_at_dim(1, 8, k, 3).unwrap()));
        }
        all.sort_unstable();
        assert_eq!(all, addrs(&pat));
    }

    #[test]
    fn split_at_dim_short_trip_leaves_later_strands_empty() {
        // Extent 3 split by 2 over 4 strands: strand 1 holds the tail.
        let pat = LinearPattern::one_dim(0, 4, 3);
        let s0 = pat.split_at_dim(0, 2, 0, 4).unwrap();
        let s1 = pat.split_at_dim(0, 2, 1, 4).unwrap();
        let s2 = pat.split_at_dim(0, 2, 2, 4).unwrap();
        assert_eq!(addrs(&s0), vec![0, 4]);
        assert_eq!(addrs(&s1), vec![8]);
        assert_eq!(s2.total_trip(), 0);
    }

    #[test]
    fn split_at_dim_rejects_misaligned_interleave() {
        let pat = LinearPattern::new(0, vec![1, 100], vec![10, 30]);
        let err = pat.split_at_dim(1, 15, 0, 2).unwrap_err();
        assert!(matches!(err, PatternError::UnsupportedSplit { .. }));
    }
}
