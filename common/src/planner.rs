//! Sample-based range partitioning of the key space across reducers.
//!
//! The planner sorts a random sample of the input and picks `N - 1`
//! equidistant sample values as cut points. Reducer `i` then owns the
//! half-open range between cut `i - 1` and cut `i`, with `xi` and `xf + 1`
//! closing the two ends. Ranges are kept ordered by lower bound, which is
//! also the order their output files are concatenated in.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::rpc::worker::Range;

/// One reducer's share of the key space: `[lower, upper)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducerRange {
    pub address: String,
    pub lower: i64,
    pub upper: i64,
}

impl ReducerRange {
    pub fn contains(&self, key: i64) -> bool {
        self.lower <= key && key < self.upper
    }
}

/// Reducer ranges ordered by lower bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReducerRanges {
    ranges: Vec<ReducerRange>,
}

impl ReducerRanges {
    /// Builds the ranges from explicit entries, sorting them by lower bound.
    pub fn from_entries(mut ranges: Vec<ReducerRange>) -> Self {
        ranges.sort_by(|a, b| {
            (a.lower, a.upper, &a.address).cmp(&(b.lower, b.upper, &b.address))
        });
        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReducerRange> {
        self.ranges.iter()
    }

    /// Reducer addresses in lower-bound order.
    pub fn addresses(&self) -> Vec<String> {
        self.ranges.iter().map(|r| r.address.clone()).collect()
    }

    pub fn get(&self, address: &str) -> Option<&ReducerRange> {
        self.ranges.iter().find(|r| r.address == address)
    }

    /// Position of the range that owns `key`, if any.
    pub fn index_of(&self, key: i64) -> Option<usize> {
        // First range whose upper bound lies beyond the key.
        let index = self.ranges.partition_point(|r| r.upper <= key);
        self.ranges
            .get(index)
            .filter(|r| r.contains(key))
            .map(|_| index)
    }

    /// The range that owns `key`, if any.
    pub fn owner_of(&self, key: i64) -> Option<&ReducerRange> {
        self.index_of(key).map(|index| &self.ranges[index])
    }

    /// True when the ranges tile `[xi, xf + 1)` without gaps or overlaps.
    pub fn covers(&self, xi: i64, xf: i64) -> bool {
        let (Some(first), Some(last)) = (self.ranges.first(), self.ranges.last()) else {
            return false;
        };
        first.lower == xi
            && last.upper == xf + 1
            && self.ranges.iter().all(|r| r.lower <= r.upper)
            && self.ranges.windows(2).all(|w| w[0].upper == w[1].lower)
    }

    pub fn to_wire(&self) -> HashMap<String, Range> {
        self.ranges
            .iter()
            .map(|r| {
                (
                    r.address.clone(),
                    Range {
                        lower: r.lower,
                        upper: r.upper,
                    },
                )
            })
            .collect()
    }

    pub fn from_wire(wire: HashMap<String, Range>) -> Self {
        Self::from_entries(
            wire.into_iter()
                .map(|(address, range)| ReducerRange {
                    address,
                    lower: range.lower,
                    upper: range.upper,
                })
                .collect(),
        )
    }
}

/// Picks up to `num_reducers - 1` cut points from `sample`.
///
/// Candidates that repeat the previously kept cut are dropped, so a skewed
/// sample yields fewer cuts and callers must run with `cuts.len() + 1`
/// reducers.
pub fn cut_points(mut sample: Vec<i64>, num_reducers: usize) -> Vec<i64> {
    if num_reducers <= 1 || sample.is_empty() {
        return Vec::new();
    }
    sample.sort_unstable();

    let step = sample.len() / num_reducers;
    let mut cuts: Vec<i64> = Vec::with_capacity(num_reducers - 1);
    for i in 1..num_reducers {
        let cut = sample[i * step];
        if cuts.last() != Some(&cut) {
            cuts.push(cut);
        }
    }
    cuts
}

/// Hands consecutive ranges to `reducers` in order.
///
/// Cuts outside `(xi, xf]` would leave a reducer with an empty range and are
/// ignored. Only the first `cuts.len() + 1` reducers receive a range; the rest
/// stay idle for this job.
pub fn assign_ranges(reducers: &[String], cuts: &[i64], xi: i64, xf: i64) -> ReducerRanges {
    if reducers.is_empty() {
        return ReducerRanges::default();
    }
    let cuts: Vec<i64> = cuts.iter().copied().filter(|&cut| cut > xi && cut <= xf).collect();
    let active = (cuts.len() + 1).min(reducers.len());

    let mut bounds = Vec::with_capacity(active + 1);
    bounds.push(xi);
    bounds.extend_from_slice(&cuts[..active - 1]);
    bounds.push(xf + 1);

    let ranges = reducers
        .iter()
        .zip(bounds.windows(2))
        .map(|(address, bound)| ReducerRange {
            address: address.clone(),
            lower: bound[0],
            upper: bound[1],
        })
        .collect();
    ReducerRanges { ranges }
}

/// Cut points and range assignment in one step.
pub fn plan(sample: Vec<i64>, reducers: &[String], xi: i64, xf: i64) -> ReducerRanges {
    let cuts = cut_points(sample, reducers.len());
    assign_ranges(reducers, &cuts, xi, xf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reducers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("reducer{i}:9000")).collect()
    }

    #[test]
    fn single_reducer_owns_everything() {
        let ranges = plan(vec![3, 1, 2], &reducers(1), 1, 10);
        assert_eq!(ranges.len(), 1);
        let only = ranges.iter().next().unwrap();
        assert_eq!((only.lower, only.upper), (1, 11));
        assert!(ranges.covers(1, 10));
    }

    #[test]
    fn equidistant_cuts_from_sorted_sample() {
        let sample = vec![90, 10, 50, 70, 30, 20, 80, 40, 60, 100];
        assert_eq!(cut_points(sample.clone(), 2), vec![60]);
        // step = 3: sorted[3], sorted[6]
        assert_eq!(cut_points(sample, 3), vec![40, 70]);
    }

    #[test]
    fn uniform_sample_collapses_reducers() {
        let cuts = cut_points(vec![5, 5, 5, 5, 5], 3);
        assert_eq!(cuts, vec![5]);

        let ranges = assign_ranges(&reducers(3), &cuts, 1, 10);
        assert_eq!(ranges.len(), 2);
        let bounds: Vec<_> = ranges.iter().map(|r| (r.lower, r.upper)).collect();
        assert_eq!(bounds, vec![(1, 5), (5, 11)]);
        assert!(ranges.covers(1, 10));
    }

    #[test]
    fn cut_at_lower_bound_collapses_reducers() {
        let cuts = cut_points(vec![5, 5, 5, 5, 5, 5], 2);
        assert_eq!(cuts, vec![5]);

        let ranges = assign_ranges(&reducers(2), &cuts, 5, 10);
        assert_eq!(ranges.len(), 1);
        let only = ranges.iter().next().unwrap();
        assert_eq!((only.lower, only.upper), (5, 11));
        assert!(ranges.covers(5, 10));
        assert!(ranges.iter().all(|r| r.lower < r.upper));
    }

    #[test]
    fn sample_smaller_than_reducer_count() {
        let cuts = cut_points(vec![7, 3], 4);
        // step = 0, every candidate is the smallest sample value
        assert_eq!(cuts, vec![3]);
        let ranges = assign_ranges(&reducers(4), &cuts, 0, 9);
        assert_eq!(ranges.len(), 2);
        assert!(ranges.covers(0, 9));
    }

    #[test]
    fn empty_sample_yields_single_range() {
        assert!(cut_points(Vec::new(), 3).is_empty());
        let ranges = plan(Vec::new(), &reducers(3), -5, 5);
        assert_eq!(ranges.len(), 1);
        assert!(ranges.covers(-5, 5));
    }

    #[test]
    fn no_reducers_no_ranges() {
        let ranges = plan(vec![1, 2, 3], &[], 0, 10);
        assert!(ranges.is_empty());
        assert!(!ranges.covers(0, 10));
    }

    #[test]
    fn every_key_has_exactly_one_owner() {
        let (xi, xf) = (-20, 40);
        let sample: Vec<i64> = (0..200).map(|i| (i * 37 % 61) - 20).collect();
        let ranges = plan(sample, &reducers(5), xi, xf);
        assert!(ranges.covers(xi, xf));
        assert!(ranges.len() <= 5);

        for key in xi..=xf {
            let owners: Vec<_> = ranges.iter().filter(|r| r.contains(key)).collect();
            assert_eq!(owners.len(), 1, "key {key}");
            assert_eq!(ranges.owner_of(key).unwrap().address, owners[0].address);
        }
        assert!(ranges.owner_of(xi - 1).is_none());
        assert!(ranges.owner_of(xf + 1).is_none());
    }

    #[test]
    fn wire_conversion_restores_lower_bound_order() {
        let ranges = plan(vec![2, 4, 6, 8, 10, 12], &reducers(3), 0, 20);
        let restored = ReducerRanges::from_wire(ranges.to_wire());
        assert_eq!(restored, ranges);
        assert_eq!(restored.addresses(), reducers(3));
    }

    #[test]
    fn serializes_as_ordered_list() {
        let ranges = assign_ranges(&reducers(2), &[5], 1, 10);
        let json = serde_json::to_string(&ranges).unwrap();
        assert_eq!(
            json,
            concat!(
                r#"[{"address":"reducer0:9000","lower":1,"upper":5},"#,
                r#"{"address":"reducer1:9000","lower":5,"upper":11}]"#,
            )
        );
        let back: ReducerRanges = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ranges);
    }
}
