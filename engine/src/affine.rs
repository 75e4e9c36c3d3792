// affine.rs — N-dimensional affine patterns and hyper-rectangles
//
// An `AffinePattern` is `start` plus per-dimension (stride, trip) pairs,
// innermost first. Unlike the linear stream encoding the trips here are
// plain extents, not cumulative products. A pattern is a canonical
// sub-region of an array of sizes `S` when dimension `i` has stride
// `S_0 * ... * S_{i-1}` and its start decomposes into a corner `P` with
// `P_i + Q_i <= S_i`.
//
// `Rect` is the coordinate-space view of a sub-region: a half-open box
// `[lo_i, hi_i)` per dimension.
//
// Side effects: none.

use std::fmt;

use crate::addr_gen::LinearPattern;

pub type IntVec = Vec<i64>;

/// Products of the inner sizes: `[1, S0, S0*S1, ...]`.
pub fn canonical_strides(sizes: &[i64]) -> IntVec {
    let mut acc = 1;
    sizes
        .iter()
        .map(|&s| {
            let c = acc;
            acc *= s;
            c
        })
        .collect()
}

pub fn product(values: &[i64]) -> i64 {
    values.iter().product()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AffinePattern {
    pub start: i64,
    pub params: Vec<(i64, i64)>,
}

impl AffinePattern {
    pub fn new(start: i64, params: Vec<(i64, i64)>) -> Self {
        Self { start, params }
    }

    pub fn from_linear(linear: &LinearPattern) -> Self {
        let params = linear
            .strides
            .iter()
            .zip(linear.extents())
            .map(|(&s, e)| (s, e as i64))
            .collect();
        Self::new(linear.start as i64, params)
    }

    pub fn dims(&self) -> usize {
        self.params.len()
    }

    pub fn strides(&self) -> IntVec {
        self.params.iter().map(|p| p.0).collect()
    }

    pub fn trips(&self) -> IntVec {
        self.params.iter().map(|p| p.1).collect()
    }

    pub fn total_trip(&self) -> i64 {
        self.params.iter().map(|p| p.1).product()
    }

    pub fn value(&self, idx: i64) -> i64 {
        let mut rem = idx;
        let mut v = self.start;
        for &(stride, trip) in &self.params {
            if trip == 0 {
                return v;
            }
            v += stride * (rem % trip);
            rem /= trip;
        }
        v
    }

    pub fn generate_all_values(&self) -> IntVec {
        (0..self.total_trip()).map(|i| self.value(i)).collect()
    }

    /// Corner of the sub-region this pattern starts at, by decomposing
    /// `start` over `array_sizes`.
    pub fn sub_region_start(&self, array_sizes: &[i64]) -> IntVec {
        let strides = canonical_strides(array_sizes);
        array_sizes
            .iter()
            .zip(&strides)
            .map(|(&s, &c)| (self.start / c) % s)
            .collect()
    }

    pub fn is_sub_region(&self, array_sizes: &[i64], allow_reuse: bool) -> bool {
        if self.dims() != array_sizes.len() || self.start < 0 || self.start >= product(array_sizes) {
            return false;
        }
        let canonical = canonical_strides(array_sizes);
        let corner = self.sub_region_start(array_sizes);
        self.params.iter().enumerate().all(|(d, &(stride, trip))| {
            if trip <= 0 {
                return false;
            }
            if stride == canonical[d] {
                corner[d] + trip <= array_sizes[d]
            } else {
                allow_reuse && stride == 0 && corner[d] < array_sizes[d]
            }
        })
    }

    pub fn construct_sub_region(array_sizes: &[i64], starts: &[i64], trips: &[i64]) -> Self {
        assert_eq!(array_sizes.len(), starts.len());
        assert_eq!(array_sizes.len(), trips.len());
        let canonical = canonical_strides(array_sizes);
        let start = starts.iter().zip(&canonical).map(|(p, c)| p * c).sum();
        let params = canonical.iter().zip(trips).map(|(&c, &q)| (c, q)).collect();
        Self::new(start, params)
    }

    /// Box covered by a sub-region pattern. Reused dimensions collapse to
    /// one coordinate.
    pub fn to_rect(&self, array_sizes: &[i64]) -> Rect {
        let corner = self.sub_region_start(array_sizes);
        let hi = corner
            .iter()
            .zip(&self.params)
            .map(|(&p, &(stride, trip))| if stride == 0 { p + 1 } else { p + trip })
            .collect();
        Rect::new(corner, hi)
    }
}

impl fmt::Display for AffinePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start)?;
        for (stride, trip) in &self.params {
            write!(f, ":{}:{}", stride, trip)?;
        }
        Ok(())
    }
}

// ── Rect ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rect {
    pub lo: IntVec,
    pub hi: IntVec,
}

impl Rect {
    pub fn new(lo: IntVec, hi: IntVec) -> Self {
        assert_eq!(lo.len(), hi.len(), "rect corner dimension mismatch");
        Self { lo, hi }
    }

    pub fn full(sizes: &[i64]) -> Self {
        Self::new(vec![0; sizes.len()], sizes.to_vec())
    }

    pub fn dims(&self) -> usize {
        self.lo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lo.iter().zip(&self.hi).any(|(l, h)| l >= h)
    }

    pub fn volume(&self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        self.lo.iter().zip(&self.hi).map(|(l, h)| h - l).product()
    }

    pub fn extent(&self, dim: usize) -> i64 {
        (self.hi[dim] - self.lo[dim]).max(0)
    }

    pub fn with_dim(&self, dim: usize, lo: i64, hi: i64) -> Self {
        let mut r = self.clone();
        r.lo[dim] = lo;
        r.hi[dim] = hi;
        r
    }

    pub fn shift(&self, dim: usize, delta: i64) -> Self {
        self.with_dim(dim, self.lo[dim] + delta, self.hi[dim] + delta)
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        assert_eq!(self.dims(), other.dims(), "rect dimension mismatch");
        let lo = self.lo.iter().zip(&other.lo).map(|(a, b)| *a.max(b)).collect();
        let hi = self.hi.iter().zip(&other.hi).map(|(a, b)| *a.min(b)).collect();
        Rect::new(lo, hi)
    }

    pub fn clip(&self, sizes: &[i64]) -> Rect {
        self.intersect(&Rect::full(sizes))
    }

    pub fn contains(&self, point: &[i64]) -> bool {
        point
            .iter()
            .zip(self.lo.iter().zip(&self.hi))
            .all(|(p, (l, h))| l <= p && p < h)
    }

    /// Every point in the box, dimension 0 varying fastest.
    pub fn points(&self) -> Vec<IntVec> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(self.volume() as usize);
        let mut cur = self.lo.clone();
        loop {
            out.push(cur.clone());
            let mut d = 0;
            loop {
                if d == self.dims() {
                    return out;
                }
                cur[d] += 1;
                if cur[d] < self.hi[d] {
                    break;
                }
                cur[d] = self.lo[d];
                d += 1;
            }
        }
    }

    /// Canonical sub-region pattern of this box inside `sizes`.
    pub fn to_pattern(&self, sizes: &[i64]) -> AffinePattern {
        let trips: IntVec = (0..self.dims()).map(|d| self.extent(d)).collect();
        AffinePattern::construct_sub_region(sizes, &self.lo, &trips)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in 0..self.dims() {
            if d > 0 {
                write!(f, "x")?;
            }
            write!(f, "[{},{})", self.lo[d], self.hi[d])?;
        }
        Ok(())
    }
}

/// Linear index of `point` with dimension 0 fastest.
pub fn linearize(point: &[i64], sizes: &[i64]) -> i64 {
    point
        .iter()
        .zip(canonical_strides(sizes))
        .map(|(p, c)| p * c)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_follow_extents() {
        // 2 x 3 block at (1, 1) of an 8-wide array.
        let pat = AffinePattern::new(9, vec![(1, 2), (8, 3)]);
        assert_eq!(pat.generate_all_values(), vec![9, 10, 17, 18, 25, 26]);
        assert_eq!(pat.total_trip(), 6);
    }

    #[test]
    fn sub_region_checks() {
        let sizes = [8, 4];
        let pat = AffinePattern::new(9, vec![(1, 2), (8, 3)]);
        assert!(pat.is_sub_region(&sizes, false));
        assert_eq!(pat.sub_region_start(&sizes), vec![1, 1]);
        // Overflows the second dimension.
        assert!(!AffinePattern::new(17, vec![(1, 2), (8, 3)]).is_sub_region(&sizes, false));
        // Reuse only with allow_reuse.
        let reuse = AffinePattern::new(9, vec![(1, 2), (0, 3)]);
        assert!(!reuse.is_sub_region(&sizes, false));
        assert!(reuse.is_sub_region(&sizes, true));
        // Wrong stride.
        assert!(!AffinePattern::new(0, vec![(2, 2), (8, 3)]).is_sub_region(&sizes, false));
    }

    #[test]
    fn construct_matches_rect() {
        let sizes = [8, 4];
        let pat = AffinePattern::construct_sub_region(&sizes, &[2, 1], &[3, 2]);
        assert_eq!(pat, AffinePattern::new(10, vec![(1, 3), (8, 2)]));
        let r = pat.to_rect(&sizes);
        assert_eq!(r, Rect::new(vec![2, 1], vec![5, 3]));
        assert_eq!(r.to_pattern(&sizes), pat);
    }

    #[test]
    fn rect_ops() {
        let a = Rect::new(vec![0, 0], vec![4, 4]);
        let b = Rect::new(vec![2, -1], vec![6, 2]);
        let i = a.intersect(&b);
        assert_eq!(i, Rect::new(vec![2, 0], vec![4, 2]));
        assert_eq!(i.volume(), 4);
        assert!(a.shift(0, 4).intersect(&a).is_empty());
        assert_eq!(i.points(), vec![vec![2, 0], vec![3, 0], vec![2, 1], vec![3, 1]]);
        assert_eq!(i.to_string(), "[2,4)x[0,2)");
        assert_eq!(linearize(&[3, 1], &[4, 4]), 7);
    }

    #[test]
    fn from_linear_uses_extents() {
        let lin = LinearPattern::new(16, vec![1, 8], vec![4, 12]);
        let pat = AffinePattern::from_linear(&lin);
        assert_eq!(pat, AffinePattern::new(16, vec![(1, 4), (8, 3)]));
        assert_eq!(pat.to_string(), "16:1:4:8:3");
    }
}
