//! Voxel-wise operations on whole volumes: averaging of runs and of paradigm periods, and masking.

use log::debug;
use ndarray::{azip, s, Array3, Array4, ArrayView3, Axis};

use crate::error::{LayerStatsError, Result};
use crate::util::check_same_shape;

/// Voxel-wise statistics across runs. All arrays have the shape of the input runs.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelStats {
    pub mean: Array4<f32>,
    /// Population standard deviation across runs.
    pub std: Array4<f32>,
    /// `std / sqrt(number of runs)`
    pub sem: Array4<f32>,
}


/// The element-wise average of several volumes of identical shape.
pub fn average_volumes(volumes: &[Array4<f32>]) -> Result<Array4<f32>> {
    check_same_shape(volumes, "volume")?;
    let mut sum = Array4::<f32>::zeros(volumes[0].raw_dim());
    for volume in volumes {
        sum += volume;
    }
    Ok(sum / volumes.len() as f32)
}


/// Mean, standard deviation and standard error across runs, for every voxel and frame.
pub fn voxelwise_stats(volumes: &[Array4<f32>]) -> Result<VoxelStats> {
    let mean = average_volumes(volumes)?;
    let num = volumes.len() as f32;

    let mut squared_dev = Array4::<f32>::zeros(mean.raw_dim());
    for volume in volumes {
        azip!((sq in &mut squared_dev, &v in volume, &m in &mean) *sq += (v - m) * (v - m));
    }
    let std = squared_dev.mapv(|sq| (sq / num).sqrt());
    let sem = std.mapv(|s| s / num.sqrt());
    Ok(VoxelStats { mean, std, sem })
}


/// The start time points of all repetitions of a periodic block design.
///
/// The period is the sum of the `blocks` lengths. If `skip_first` is set, the first block is skipped,
/// e.g. an initial rest block. The remaining time points must be a whole number of periods.
fn period_starts(num_times: usize, blocks: &[usize], skip_first: bool) -> Result<(usize, Vec<usize>)> {
    let period: usize = blocks.iter().sum();
    if period == 0 {
        return Err(LayerStatsError::InvalidRange(String::from("the block design has a period of 0 time points")));
    }
    let offset = if skip_first { blocks[0] } else { 0 };
    let available = num_times.saturating_sub(offset);
    if available == 0 || available % period != 0 {
        return Err(LayerStatsError::InvalidRange(format!(
            "{} time points (after skipping {}) are not a multiple of the period of {}",
            available, offset, period
        )));
    }
    let starts = (0..available / period).map(|p| offset + p * period).collect();
    Ok((period, starts))
}


/// Average a time series over the repetitions of a periodic block design.
///
/// The result has one period worth of frames, where frame `i` is the average of frame `i` of all periods.
pub fn average_periods(volume: &Array4<f32>, blocks: &[usize], skip_first: bool) -> Result<Array4<f32>> {
    let (period, starts) = period_starts(volume.len_of(Axis(3)), blocks, skip_first)?;
    let (dim_x, dim_y, dim_z, _) = volume.dim();
    let mut sum = Array4::<f32>::zeros((dim_x, dim_y, dim_z, period));
    for &start in &starts {
        sum += &volume.slice(s![.., .., .., start..start + period]);
    }
    debug!("Averaged {} periods of {} time points", starts.len(), period);
    Ok(sum / starts.len() as f32)
}


/// Split a time series into the repetitions of a periodic block design, see [`average_periods`].
pub fn split_periods(volume: &Array4<f32>, blocks: &[usize], skip_first: bool) -> Result<Vec<Array4<f32>>> {
    let (period, starts) = period_starts(volume.len_of(Axis(3)), blocks, skip_first)?;
    Ok(starts
        .iter()
        .map(|&start| volume.slice(s![.., .., .., start..start + period]).to_owned())
        .collect())
}


/// Multiply every frame of the volume with the 3D mask.
pub fn apply_mask(volume: &Array4<f32>, mask: ArrayView3<f32>) -> Result<Array4<f32>> {
    if volume.shape()[..3] != mask.shape()[..] {
        return Err(LayerStatsError::ShapeMismatch(format!(
            "volume has spatial shape {:?}, but the mask has shape {:?}",
            &volume.shape()[..3],
            mask.shape()
        )));
    }
    Ok(volume * &mask.insert_axis(Axis(3)))
}


/// The element-wise product of several masks, i.e., their intersection for binary masks.
pub fn intersect_masks(masks: &[Array3<f32>]) -> Result<Array3<f32>> {
    check_same_shape(masks, "mask")?;
    let mut product = masks[0].clone();
    for mask in &masks[1..] {
        product *= mask;
    }
    Ok(product)
}


/// Relabeling from a fuzzy c-means tissue classification (1 CSF, 2 GM, 3 WM) to the LayNii rim
/// convention (1 WM, 2 CSF, 3 GM).
pub const LAYNII_RIM_KEYS: [(f32, f32); 3] = [(1.0, 2.0), (2.0, 3.0), (3.0, 1.0)];

/// Replace tissue labels of a classification volume.
///
/// Each value equal to the first entry of a key is replaced by its second entry. If several keys match
/// a value, the last one wins. Values matching no key are kept. The result is multiplied by the `mask`,
/// if one is given.
pub fn relabel_classification(data: ArrayView3<f32>, keys: &[(f32, f32)], mask: Option<ArrayView3<f32>>) -> Result<Array3<f32>> {
    let mut relabeled = data.map(|&value| {
        keys.iter()
            .rev()
            .find(|(from, _)| *from == value)
            .map_or(value, |&(_, to)| to)
    });
    if let Some(mask) = mask {
        if mask.shape() != data.shape() {
            return Err(LayerStatsError::ShapeMismatch(format!(
                "classification has shape {:?}, but the mask has shape {:?}",
                data.shape(),
                mask.shape()
            )));
        }
        relabeled *= &mask;
    }
    debug!("Relabeled a classification of shape {:?} with {} keys", data.shape(), keys.len());
    Ok(relabeled)
}
