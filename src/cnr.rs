//! Contrast-to-noise ratio of task-based functional time series.
//!
//! The CNR (in percent) of a voxel is the absolute difference of its mean signal in two conditions,
//! divided by its standard deviation in the second, reference, condition. The reference condition should
//! be a baseline (rest) condition for the value to make sense.

use log::debug;
use ndarray::{azip, Array3, Array4, Axis};

use crate::error::{LayerStatsError, Result};
use crate::util::check_same_shape;

/// A run together with the frames belonging to the task and reference conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct CnrRun {
    pub data: Array4<f32>,
    pub condition: Vec<usize>,
    pub reference: Vec<usize>,
}


fn check_frames(frames: &[usize], num_times: usize, what: &str) -> Result<()> {
    if frames.is_empty() {
        return Err(LayerStatsError::InvalidRange(format!("{} selects no frames", what)));
    }
    if let Some(bad) = frames.iter().find(|&&f| f >= num_times) {
        return Err(LayerStatsError::InvalidRange(format!(
            "{} frame {} exceeds the available {} frames",
            what, bad, num_times
        )));
    }
    Ok(())
}


/// Compute the voxel-wise CNR in percent of one run.
///
/// `condition` and `reference` are the frame indices of the two conditions. Voxels without signal
/// variation in the reference condition get a CNR of 0.
pub fn contrast_to_noise(data: &Array4<f32>, condition: &[usize], reference: &[usize]) -> Result<Array3<f32>> {
    let num_times = data.len_of(Axis(3));
    check_frames(condition, num_times, "condition")?;
    check_frames(reference, num_times, "reference condition")?;

    let empty = || LayerStatsError::InvalidRange(String::from("no frames selected"));
    let condition_mean = data.select(Axis(3), condition).mean_axis(Axis(3)).ok_or_else(empty)?;
    let reference_data = data.select(Axis(3), reference);
    let reference_mean = reference_data.mean_axis(Axis(3)).ok_or_else(empty)?;
    let reference_std = reference_data.std_axis(Axis(3), 0.0);

    let mut cnr = Array3::<f32>::zeros(reference_std.raw_dim());
    azip!((c in &mut cnr, &cm in &condition_mean, &rm in &reference_mean, &rs in &reference_std) {
        let value = (cm - rm).abs() / rs * 100.0;
        *c = if value.is_finite() { value } else { 0.0 };
    });
    Ok(cnr)
}


/// The average CNR map over several runs, see [`contrast_to_noise`]. All runs must share their spatial shape.
pub fn mean_contrast_to_noise(runs: &[CnrRun]) -> Result<Array3<f32>> {
    let maps = runs
        .iter()
        .map(|run| contrast_to_noise(&run.data, &run.condition, &run.reference))
        .collect::<Result<Vec<Array3<f32>>>>()?;
    check_same_shape(&maps, "CNR map of a run")?;

    let mut sum = Array3::<f32>::zeros(maps[0].raw_dim());
    for map in &maps {
        sum += map;
    }
    debug!("Averaged CNR over {} runs", maps.len());
    Ok(sum / maps.len() as f32)
}


/// The frames of a condition in a block design, sorted and without duplicates.
///
/// `onsets` and `duration` of the condition's blocks are given in seconds, `tr` is the repetition time.
/// The first `skip` frames of each block are left out to account for the hemodynamic delay.
pub fn block_design_frames(onsets: &[f64], duration: f64, tr: f64, skip: usize) -> Result<Vec<usize>> {
    if !(tr > 0.0) {
        return Err(LayerStatsError::InvalidRange(format!("repetition time must be positive, got {}", tr)));
    }
    let length = (duration / tr - skip as f64).round();
    if !(length >= 1.0) {
        return Err(LayerStatsError::InvalidRange(format!(
            "blocks of {}s at TR {}s leave no frames after skipping {}",
            duration, tr, skip
        )));
    }

    let mut frames = Vec::with_capacity(onsets.len() * length as usize);
    for &onset in onsets {
        let first = (onset / tr + skip as f64).round();
        if !(first >= 0.0) {
            return Err(LayerStatsError::InvalidRange(format!("onset {}s lies before the first frame", onset)));
        }
        frames.extend((0..length as usize).map(|j| first as usize + j));
    }
    frames.sort_unstable();
    frames.dedup();
    Ok(frames)
}


/// Remove outlier frames, e.g. volumes flagged by motion correction, from a frame list.
pub fn remove_frames(frames: &mut Vec<usize>, outliers: &[usize]) {
    frames.retain(|f| !outliers.contains(f));
}
