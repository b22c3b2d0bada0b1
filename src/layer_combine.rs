//! Re-binning of already aggregated block statistics into coarser layer or time groups.

use log::debug;
use ndarray::{Array1, Array2, Axis};

use crate::error::{LayerStatsError, Result};
use crate::stat_block::{mean_and_std, AggregateResult, IndexRange, StatBlock};

/// Combine several blocks into one.
///
/// The combined mean is the sample-count weighted mean of the block means. The combined variance is
/// the (unweighted, population) variance of the block means plus the weighted mean of the block variances.
/// Note that this is an approximation of the variance of the pooled samples, which is only close when the
/// blocks have similar sample counts. The ranges of the combined block span those of all blocks.
///
/// Fails with `InvalidRange` if `blocks` is empty and with `EmptyLayerGroup` if any block has no samples.
pub fn combine_blocks(blocks: &[&StatBlock]) -> Result<StatBlock> {
    let first = blocks
        .first()
        .ok_or_else(|| LayerStatsError::InvalidRange("no blocks to combine".to_string()))?;
    if let Some(empty) = blocks.iter().find(|b| b.num == 0) {
        return Err(LayerStatsError::EmptyLayerGroup(empty.layers.first, empty.layers.last));
    }
    let num: usize = blocks.iter().map(|b| b.num).sum();
    let fracs: Vec<f64> = blocks.iter().map(|b| b.num as f64 / num as f64).collect();

    let mean: f64 = blocks.iter().zip(fracs.iter()).map(|(b, frac)| b.mean * frac).sum();
    let means: Array1<f64> = blocks.iter().map(|b| b.mean).collect();
    let (_, std_of_means) = mean_and_std(&means)
        .map_err(|_| LayerStatsError::InvalidRange("no blocks to combine".to_string()))?;
    let within: f64 = blocks.iter().zip(fracs.iter()).map(|(b, frac)| b.std * b.std * frac).sum();
    let std = (std_of_means * std_of_means + within).sqrt();

    let layers = blocks.iter().fold(first.layers, |acc, b| acc.span(&b.layers));
    let times = blocks.iter().fold(first.times, |acc, b| acc.span(&b.times));
    Ok(StatBlock::new(mean, std, num, layers, times))
}


/// Recombine the layer groups or the time groups of `data` into new groups.
///
/// Exactly one of `layer_groups` and `time_groups` must be given, otherwise `AmbiguousAxis` is returned.
/// The ranges index the existing groups of that axis (0-based, inclusive). Groups not covered by any range
/// are dropped. The other axis is kept as it is.
pub fn recombine(data: &AggregateResult, layer_groups: Option<&[IndexRange]>, time_groups: Option<&[IndexRange]>) -> Result<AggregateResult> {
    let (axis, groups, what) = match (layer_groups, time_groups) {
        (Some(groups), None) => (Axis(0), groups, "layer group"),
        (None, Some(groups)) => (Axis(1), groups, "time group"),
        _ => return Err(LayerStatsError::AmbiguousAxis),
    };

    let blocks = data.blocks();
    let extent = blocks.len_of(axis);
    for group in groups {
        group.check(extent, what)?;
    }

    // Work on rows of the axis to combine; transposing handles the time axis.
    let by_row = if axis == Axis(0) { blocks.view() } else { blocks.t() };
    let num_kept = by_row.ncols();

    let mut combined = Vec::with_capacity(groups.len() * num_kept);
    for group in groups {
        for col in 0..num_kept {
            let members: Vec<&StatBlock> = group.indices().map(|row| &by_row[[row, col]]).collect();
            combined.push(combine_blocks(&members)?);
        }
    }

    let combined = Array2::from_shape_vec((groups.len(), num_kept), combined)
        .map_err(|e| LayerStatsError::ShapeMismatch(e.to_string()))?;
    let combined = if axis == Axis(0) { combined } else { combined.reversed_axes() };

    debug!("Recombined {} {}s into {}", extent, what, groups.len());
    AggregateResult::from_array(combined)
}
