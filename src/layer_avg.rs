//! Layer-resolved averages of fMRI time series.
//!
//! The voxel values of one or more runs are pooled per group of layers and group of time points.
//! For each such block, the mean (relative to a baseline period), the population standard deviation
//! and the standard error of the mean are computed.

use log::debug;
use ndarray::{Array1, Array2, Array4};
use serde::{Deserialize, Serialize};

use crate::error::{LayerStatsError, Result};
use crate::layer_index::{Coord, LayerIndex};
use crate::stat_block::{mean_and_std, AggregateResult, IndexRange, StatBlock};
use crate::util::check_same_shape;

/// Parameters of a layer average computation.
///
/// Omitted layer or time groups default to one group per layer or time point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationParams {
    #[serde(default)]
    pub layer_groups: Option<Vec<IndexRange>>,
    #[serde(default)]
    pub time_groups: Option<Vec<IndexRange>>,
    /// The mean over these time points is subtracted from all block means of a layer group.
    pub baseline: IndexRange,
}

impl AggregationParams {
    pub fn new(baseline: IndexRange) -> AggregationParams {
        AggregationParams {
            layer_groups: None,
            time_groups: None,
            baseline,
        }
    }

    pub fn with_layer_groups(mut self, layer_groups: Vec<IndexRange>) -> AggregationParams {
        self.layer_groups = Some(layer_groups);
        self
    }

    pub fn with_time_groups(mut self, time_groups: Vec<IndexRange>) -> AggregationParams {
        self.time_groups = Some(time_groups);
        self
    }
}


/// Compute mean, std and sem of voxel values, split by layer groups and time groups.
///
/// All `volumes` must have the same 4D shape `(X, Y, Z, T)`, with a spatial shape matching the `index`.
/// For every layer group, the samples of all member voxels of all volumes are pooled over the time
/// points of each time group. The mean of the pooled baseline samples of the layer group is subtracted
/// from each block mean.
///
/// The result has one row per layer group and one column per time group, in the given order.
///
/// All inputs are validated before anything is computed. Fails with `ShapeMismatch` for inconsistent
/// or missing volumes, `InvalidRange` for reversed or out-of-bounds groups and baseline, and
/// `EmptyLayerGroup` if a layer group contains no voxels.
pub fn layer_averages_vs_time(volumes: &[Array4<f32>], index: &LayerIndex, params: &AggregationParams) -> Result<AggregateResult> {
    check_same_shape(volumes, "volume")?;
    let shape = volumes[0].shape();
    if shape[..3] != index.shape()[..] {
        return Err(LayerStatsError::ShapeMismatch(format!(
            "volumes have spatial shape {:?}, but the layer map has shape {:?}",
            &shape[..3],
            index.shape()
        )));
    }
    let num_times = shape[3];

    let layer_groups = params
        .layer_groups
        .clone()
        .unwrap_or_else(|| IndexRange::singletons(index.num_layers()));
    let time_groups = params
        .time_groups
        .clone()
        .unwrap_or_else(|| IndexRange::singletons(num_times));

    params.baseline.check(num_times, "baseline")?;
    for group in &layer_groups {
        group.check(index.num_layers(), "layer group")?;
    }
    for group in &time_groups {
        group.check(num_times, "time group")?;
    }

    let members = layer_groups
        .iter()
        .map(|group| {
            let coords = index.members(*group);
            if coords.is_empty() {
                Err(LayerStatsError::EmptyLayerGroup(group.first, group.last))
            } else {
                Ok(coords)
            }
        })
        .collect::<Result<Vec<Vec<Coord>>>>()?;

    debug!(
        "Averaging {} volumes of shape {:?} into {} layer groups x {} time groups",
        volumes.len(),
        shape,
        layer_groups.len(),
        time_groups.len()
    );

    let mut blocks = Vec::with_capacity(layer_groups.len() * time_groups.len());
    for (layer_group, coords) in layer_groups.iter().zip(members.iter()) {
        let samples_per_time: Vec<Vec<f64>> = (0..num_times)
            .map(|t| samples_at(volumes, coords, t))
            .collect();

        let (baseline_level, _) = pooled_stats(&samples_per_time, params.baseline, *layer_group)?;

        for time_group in &time_groups {
            let (mean, std) = pooled_stats(&samples_per_time, *time_group, *layer_group)?;
            let num = coords.len() * volumes.len() * time_group.len();
            blocks.push(StatBlock::new(mean - baseline_level, std, num, *layer_group, *time_group));
        }
    }

    let blocks = Array2::from_shape_vec((layer_groups.len(), time_groups.len()), blocks)
        .map_err(|e| LayerStatsError::ShapeMismatch(e.to_string()))?;
    AggregateResult::from_array(blocks)
}


/// The values at time point `t` of all coordinates, for each volume in turn.
fn samples_at(volumes: &[Array4<f32>], coords: &[Coord], t: usize) -> Vec<f64> {
    let mut samples = Vec::with_capacity(volumes.len() * coords.len());
    for volume in volumes {
        samples.extend(coords.iter().map(|&[x, y, z]| f64::from(volume[[x, y, z, t]])));
    }
    samples
}


/// Mean and population std of the samples of all time points in `times`.
fn pooled_stats(samples_per_time: &[Vec<f64>], times: IndexRange, layers: IndexRange) -> Result<(f64, f64)> {
    let pooled: Array1<f64> = times
        .indices()
        .flat_map(|t| samples_per_time[t].iter().cloned())
        .collect();
    mean_and_std(&pooled).map_err(|_| LayerStatsError::EmptyLayerGroup(layers.first, layers.last))
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array3, Array4};

    /// Layers along x: label 1 at x == 0, label 2 at x == 1.
    fn two_layer_index() -> LayerIndex {
        let layers = Array3::from_shape_fn((2, 2, 1), |(x, _, _)| (x + 1) as f32);
        LayerIndex::build(layers.view(), None, None).unwrap()
    }

    #[test]
    fn baseline_is_subtracted_from_a_constant_step() {
        let layers = Array3::<f32>::ones((2, 2, 2));
        let mask = Array3::<f32>::ones((2, 2, 2));
        let index = LayerIndex::build(layers.view(), Some(mask.view()), None).unwrap();
        let volume = Array4::from_shape_fn((2, 2, 2, 4), |(_, _, _, t)| if t == 0 { 1.0 } else { 3.0 });

        let params = AggregationParams::new(IndexRange::single(0))
            .with_layer_groups(vec![IndexRange::single(0)])
            .with_time_groups(vec![IndexRange::new(1, 3).unwrap()]);
        let result = layer_averages_vs_time(&[volume], &index, &params).unwrap();

        assert_eq!(1, result.num_layer_groups());
        assert_eq!(1, result.num_time_groups());
        let block = result.get(0, 0).unwrap();
        assert_eq!(2.0, block.mean);
        assert_eq!(0.0, block.std);
        assert_eq!(24, block.num);
        assert_eq!(0.0, block.sem);
        assert_eq!(IndexRange::new(1, 3).unwrap(), block.times);
    }

    #[test]
    fn defaults_are_one_group_per_layer_and_time_point() {
        let index = two_layer_index();
        let volume = Array4::from_shape_fn((2, 2, 1, 3), |(x, y, _, t)| (10 * x + y + t) as f32);
        let result = layer_averages_vs_time(&[volume], &index, &AggregationParams::new(IndexRange::single(0))).unwrap();

        assert_eq!(2, result.num_layer_groups());
        assert_eq!(3, result.num_time_groups());
        for ((layer, time), block) in result.iter() {
            assert_eq!(IndexRange::single(layer), block.layers);
            assert_eq!(IndexRange::single(time), block.times);
            assert_eq!(2, block.num);
            assert_abs_diff_eq!(time as f64, block.mean, epsilon = 1e-12);
            assert_abs_diff_eq!(0.5, block.std, epsilon = 1e-12);
            assert_eq!(block.std / (block.num as f64).sqrt(), block.sem);
        }
    }

    #[test]
    fn the_baseline_block_has_zero_mean() {
        let index = two_layer_index();
        let runs: Vec<Array4<f32>> = (0..3)
            .map(|run| Array4::from_shape_fn((2, 2, 1, 6), |(x, y, _, t)| ((x * 7 + y * 3 + t * t + run) % 5) as f32 * 0.37))
            .collect();
        let baseline = IndexRange::new(1, 3).unwrap();
        let params = AggregationParams::new(baseline)
            .with_layer_groups(vec![IndexRange::single(0), IndexRange::new(0, 1).unwrap()])
            .with_time_groups(vec![IndexRange::single(0), baseline, IndexRange::new(4, 5).unwrap()]);
        let result = layer_averages_vs_time(&runs, &index, &params).unwrap();

        for layer_group in 0..2 {
            assert_eq!(0.0, result.get(layer_group, 1).unwrap().mean);
        }
        // voxels x runs x time points
        assert_eq!(4 * 3 * 3, result.get(1, 1).unwrap().num);
        assert_eq!(2 * 3 * 2, result.get(0, 2).unwrap().num);
    }

    #[test]
    fn samples_of_all_runs_are_pooled() {
        let index = two_layer_index();
        let low = Array4::<f32>::zeros((2, 2, 1, 2));
        let high = Array4::<f32>::from_elem((2, 2, 1, 2), 2.0);
        let params = AggregationParams::new(IndexRange::single(0))
            .with_time_groups(vec![IndexRange::single(1)]);
        let result = layer_averages_vs_time(&[low.clone(), high], &index, &params).unwrap();

        let block = result.get(0, 0).unwrap();
        assert_eq!(4, block.num);
        assert_abs_diff_eq!(0.0, block.mean, epsilon = 1e-12);
        assert_abs_diff_eq!(1.0, block.std, epsilon = 1e-12);
        assert_abs_diff_eq!(0.5, block.sem, epsilon = 1e-12);

        let alone = layer_averages_vs_time(&[low], &index, &params).unwrap();
        assert_eq!(2, alone.get(0, 0).unwrap().num);
    }

    #[test]
    fn an_empty_layer_group_is_an_error() {
        let index = two_layer_index();
        let volume = Array4::<f32>::zeros((2, 2, 1, 2));
        let padded = LayerIndex::build(Array3::from_shape_fn((2, 2, 1), |(x, _, _)| (x + 1) as f32).view(), None, Some(3)).unwrap();
        let params = AggregationParams::new(IndexRange::single(0)).with_layer_groups(vec![IndexRange::single(2)]);

        let result = layer_averages_vs_time(&[volume.clone()], &padded, &params);
        assert!(matches!(result, Err(LayerStatsError::EmptyLayerGroup(2, 2))));

        // Without the explicit layer count, layer index 2 does not exist at all.
        let result = layer_averages_vs_time(&[volume], &index, &params);
        assert!(matches!(result, Err(LayerStatsError::InvalidRange(_))));
    }

    #[test]
    fn volumes_of_different_shapes_are_rejected() {
        let index = two_layer_index();
        let params = AggregationParams::new(IndexRange::single(0));
        let a = Array4::<f32>::zeros((2, 2, 1, 2));
        let b = Array4::<f32>::zeros((2, 3, 1, 2));
        let result = layer_averages_vs_time(&[a.clone(), b], &index, &params);
        assert!(matches!(result, Err(LayerStatsError::ShapeMismatch(_))));

        let wrong_space = Array4::<f32>::zeros((2, 2, 2, 2));
        let result = layer_averages_vs_time(&[wrong_space], &index, &params);
        assert!(matches!(result, Err(LayerStatsError::ShapeMismatch(_))));

        let result = layer_averages_vs_time(&[], &index, &params);
        assert!(matches!(result, Err(LayerStatsError::ShapeMismatch(_))));
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        let index = two_layer_index();
        let volume = Array4::<f32>::zeros((2, 2, 1, 4));
        let reversed = IndexRange { first: 2, last: 1 };

        let cases = vec![
            AggregationParams::new(IndexRange::single(4)),
            AggregationParams::new(reversed),
            AggregationParams::new(IndexRange::single(0)).with_time_groups(vec![IndexRange::new(2, 4).unwrap()]),
            AggregationParams::new(IndexRange::single(0)).with_time_groups(vec![reversed]),
            AggregationParams::new(IndexRange::single(0)).with_layer_groups(vec![reversed]),
        ];
        for params in cases {
            let result = layer_averages_vs_time(&[volume.clone()], &index, &params);
            assert!(matches!(result, Err(LayerStatsError::InvalidRange(_))), "{:?}", params);
        }
    }

    #[test]
    fn params_are_read_from_toml() {
        let params: AggregationParams = toml::from_str("baseline = [0, 4]\nlayer_groups = [[0, 9], [10, 19]]").unwrap();
        assert_eq!(IndexRange::new(0, 4).unwrap(), params.baseline);
        assert_eq!(2, params.layer_groups.unwrap().len());
        assert!(params.time_groups.is_none());
    }
}
