//! Statistics of layer/time blocks and the containers holding them.

use std::fmt;
use std::ops::RangeInclusive;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_stats::errors::EmptyInput;
use ndarray_stats::SummaryStatisticsExt;
use serde::{Deserialize, Serialize};

use crate::error::{LayerStatsError, Result};

/// An inclusive range `first..=last` of 0-based layer or time indices.
///
/// In configuration files a range is written as a two-element array, e.g. `[0, 4]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct IndexRange {
    pub first: usize,
    pub last: usize,
}

impl IndexRange {

    /// Create a range, failing if it is reversed.
    pub fn new(first: usize, last: usize) -> Result<IndexRange> {
        let range = IndexRange { first, last };
        if first > last {
            return Err(LayerStatsError::InvalidRange(format!("{} is reversed", range)));
        }
        Ok(range)
    }

    /// A range containing only `index`.
    pub fn single(index: usize) -> IndexRange {
        IndexRange { first: index, last: index }
    }

    /// One single-index range for each of the indices `0..count`.
    pub fn singletons(count: usize) -> Vec<IndexRange> {
        (0..count).map(IndexRange::single).collect()
    }

    /// Number of indices in the range. Reversed ranges are empty.
    pub fn len(&self) -> usize {
        (self.last + 1).saturating_sub(self.first)
    }

    pub fn indices(&self) -> RangeInclusive<usize> {
        self.first..=self.last
    }

    /// The smallest range covering both `self` and `other`.
    pub fn span(&self, other: &IndexRange) -> IndexRange {
        IndexRange {
            first: self.first.min(other.first),
            last: self.last.max(other.last),
        }
    }

    /// Ensure the range is not reversed and lies within `0..extent`. `what` names the range in the error.
    pub fn check(&self, extent: usize, what: &str) -> Result<()> {
        if self.first > self.last {
            return Err(LayerStatsError::InvalidRange(format!("{} {} is reversed", what, self)));
        }
        if self.last >= extent {
            return Err(LayerStatsError::InvalidRange(format!(
                "{} {} exceeds the available {} indices",
                what, self, extent
            )));
        }
        Ok(())
    }
}

impl From<(usize, usize)> for IndexRange {
    fn from(pair: (usize, usize)) -> IndexRange {
        IndexRange { first: pair.0, last: pair.1 }
    }
}

impl From<IndexRange> for (usize, usize) {
    fn from(range: IndexRange) -> (usize, usize) {
        (range.first, range.last)
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.first, self.last)
    }
}


/// Statistics of the pooled samples of one layer group and time group.
///
/// `layers` and `times` are given in original layer and time point indices. `num` counts scalar samples
/// (voxels x volumes x time points), so `sem = std / sqrt(num)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatBlock {
    pub mean: f64,
    pub std: f64,
    pub sem: f64,
    pub num: usize,
    pub layers: IndexRange,
    pub times: IndexRange,
}

impl StatBlock {
    /// Create a block, deriving the standard error from `std` and `num`.
    pub fn new(mean: f64, std: f64, num: usize, layers: IndexRange, times: IndexRange) -> StatBlock {
        StatBlock {
            mean,
            std,
            sem: std / (num as f64).sqrt(),
            num,
            layers,
            times,
        }
    }
}


/// Mean and population standard deviation of the samples.
pub(crate) fn mean_and_std(samples: &Array1<f64>) -> std::result::Result<(f64, f64), EmptyInput> {
    let mean = SummaryStatisticsExt::mean(samples)?;
    let variance = samples.central_moment(2)?;
    // Rounding can push the variance of (nearly) constant samples slightly below zero.
    Ok((mean, variance.max(0.0).sqrt()))
}


/// Block statistics arranged by (layer group, time group).
///
/// Every layer group has a block for every time group.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    blocks: Array2<StatBlock>,
}

impl AggregateResult {

    /// Wrap a 2D array of blocks, rows are layer groups and columns are time groups.
    /// Every block must be computed from at least one sample.
    pub fn from_array(blocks: Array2<StatBlock>) -> Result<AggregateResult> {
        if let Some(empty) = blocks.iter().find(|b| b.num == 0) {
            return Err(LayerStatsError::EmptyLayerGroup(empty.layers.first, empty.layers.last));
        }
        Ok(AggregateResult { blocks })
    }

    /// Build from nested rows (one per layer group). All rows must have the same length.
    pub fn from_rows(rows: Vec<Vec<StatBlock>>) -> Result<AggregateResult> {
        let num_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some(bad) = rows.iter().position(|r| r.len() != num_cols) {
            return Err(LayerStatsError::ShapeMismatch(format!(
                "layer group #{} has {} time groups, expected {}",
                bad,
                rows[bad].len(),
                num_cols
            )));
        }
        let num_rows = rows.len();
        let flat: Vec<StatBlock> = rows.into_iter().flatten().collect();
        let blocks = Array2::from_shape_vec((num_rows, num_cols), flat)
            .map_err(|e| LayerStatsError::ShapeMismatch(e.to_string()))?;
        AggregateResult::from_array(blocks)
    }

    pub fn num_layer_groups(&self) -> usize {
        self.blocks.nrows()
    }

    pub fn num_time_groups(&self) -> usize {
        self.blocks.ncols()
    }

    /// The block for the given layer group and time group, if both exist.
    pub fn get(&self, layer_group: usize, time_group: usize) -> Option<&StatBlock> {
        self.blocks.get((layer_group, time_group))
    }

    /// All time group blocks of a layer group.
    ///
    /// **Panics** if `layer_group` is out of bounds.
    pub fn layer_group(&self, layer_group: usize) -> ArrayView1<'_, StatBlock> {
        self.blocks.index_axis(Axis(0), layer_group)
    }

    /// All layer group blocks of a time group.
    ///
    /// **Panics** if `time_group` is out of bounds.
    pub fn time_group(&self, time_group: usize) -> ArrayView1<'_, StatBlock> {
        self.blocks.index_axis(Axis(1), time_group)
    }

    pub fn blocks(&self) -> &Array2<StatBlock> {
        &self.blocks
    }

    pub fn means(&self) -> Array2<f64> {
        self.blocks.map(|b| b.mean)
    }

    pub fn stds(&self) -> Array2<f64> {
        self.blocks.map(|b| b.std)
    }

    pub fn sems(&self) -> Array2<f64> {
        self.blocks.map(|b| b.sem)
    }

    /// Iterate over `((layer group, time group), block)`, layer groups outermost.
    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), &StatBlock)> {
        self.blocks.indexed_iter()
    }
}

impl fmt::Display for AggregateResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Block statistics for {} layer groups and {} time groups.",
            self.num_layer_groups(),
            self.num_time_groups()
        )
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn block(mean: f64, layer: usize, time: usize) -> StatBlock {
        StatBlock::new(mean, 2.0, 16, IndexRange::single(layer), IndexRange::single(time))
    }

    #[test]
    fn ranges_are_validated() {
        assert!(IndexRange::new(3, 2).is_err());
        let range = IndexRange::new(2, 4).unwrap();
        assert_eq!(3, range.len());
        assert_eq!(vec![2, 3, 4], range.indices().collect::<Vec<usize>>());
        assert!(range.check(5, "time group").is_ok());

        let err = range.check(4, "time group").unwrap_err();
        assert_eq!("Invalid range: time group (2, 4) exceeds the available 4 indices", err.to_string());

        let reversed = IndexRange { first: 1, last: 0 };
        assert_eq!(0, reversed.len());
        assert!(reversed.check(10, "layer group").is_err());
    }

    #[test]
    fn ranges_span_each_other() {
        let a = IndexRange::new(2, 3).unwrap();
        let b = IndexRange::new(5, 7).unwrap();
        assert_eq!(IndexRange { first: 2, last: 7 }, a.span(&b));
        assert_eq!(IndexRange::singletons(2), vec![IndexRange::single(0), IndexRange::single(1)]);
    }

    #[test]
    fn ranges_are_read_from_pairs() {
        #[derive(Deserialize)]
        struct Groups {
            groups: Vec<IndexRange>,
        }
        let parsed: Groups = toml::from_str("groups = [[0, 4], [5, 9]]").unwrap();
        assert_eq!(parsed.groups, vec![IndexRange { first: 0, last: 4 }, IndexRange { first: 5, last: 9 }]);
    }

    #[test]
    fn the_standard_error_is_derived_from_std_and_num() {
        let b = block(1.0, 0, 0);
        assert_eq!(0.5, b.sem);
        assert_eq!(b.std / (b.num as f64).sqrt(), b.sem);
    }

    #[test]
    fn mean_and_population_std_of_samples() {
        let (mean, std) = mean_and_std(&array![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_abs_diff_eq!(5.0, mean, epsilon = 1e-12);
        assert_abs_diff_eq!(2.0, std, epsilon = 1e-12);

        let (_, constant_std) = mean_and_std(&array![3.0, 3.0, 3.0]).unwrap();
        assert_eq!(0.0, constant_std);

        assert!(mean_and_std(&Array1::<f64>::zeros(0)).is_err());
    }

    #[test]
    fn aggregate_results_are_rectangular() {
        let rows = vec![
            vec![block(0.0, 0, 0), block(1.0, 0, 1)],
            vec![block(2.0, 1, 0), block(3.0, 1, 1)],
        ];
        let result = AggregateResult::from_rows(rows).unwrap();
        assert_eq!(2, result.num_layer_groups());
        assert_eq!(2, result.num_time_groups());
        assert_eq!(2.0, result.get(1, 0).unwrap().mean);
        assert!(result.get(2, 0).is_none());
        assert_eq!(result.means(), array![[0.0, 1.0], [2.0, 3.0]]);
        assert_eq!(3.0, result.time_group(1)[1].mean);
        assert_eq!(1.0, result.layer_group(0)[1].mean);
        assert_eq!(vec![(0, 0), (0, 1), (1, 0), (1, 1)], result.iter().map(|(idx, _)| idx).collect::<Vec<_>>());

        let ragged = vec![vec![block(0.0, 0, 0), block(1.0, 0, 1)], vec![block(2.0, 1, 0)]];
        assert!(matches!(AggregateResult::from_rows(ragged), Err(LayerStatsError::ShapeMismatch(_))));
    }

    #[test]
    fn blocks_without_samples_are_rejected() {
        let empty = StatBlock::new(1.0, 0.0, 0, IndexRange::single(3), IndexRange::single(0));
        let rows = vec![vec![block(0.0, 0, 0)], vec![empty.clone()]];
        assert!(matches!(AggregateResult::from_rows(rows), Err(LayerStatsError::EmptyLayerGroup(3, 3))));

        let blocks = Array2::from_shape_vec((1, 1), vec![empty]).unwrap();
        assert!(matches!(AggregateResult::from_array(blocks), Err(LayerStatsError::EmptyLayerGroup(3, 3))));
    }
}
