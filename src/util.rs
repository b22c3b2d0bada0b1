//! Utility functions used in all other layerstats modules.

use std::path::Path;

use ndarray::{ArrayBase, Data, Dimension};

use crate::error::{LayerStatsError, Result};

/// Check whether the file extension ends with ".gz" or ".mgz".
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| {
            let name = a.to_string_lossy();
            name.ends_with(".gz") || name.ends_with(".mgz")
        })
        .unwrap_or(false)
}


/// Ensure that all given arrays have the same shape. An empty slice is an error, as there is
/// nothing to take a shape from.
pub fn check_same_shape<S, D>(arrays: &[ArrayBase<S, D>], what: &str) -> Result<()>
where
    S: Data,
    D: Dimension,
{
    let first = arrays.first().ok_or_else(|| {
        LayerStatsError::ShapeMismatch(format!("no {} given, at least one is required", what))
    })?;
    for (idx, arr) in arrays.iter().enumerate().skip(1) {
        if arr.shape() != first.shape() {
            return Err(LayerStatsError::ShapeMismatch(format!(
                "{} #{} has shape {:?}, but the first one has shape {:?}",
                what,
                idx,
                arr.shape(),
                first.shape()
            )));
        }
    }
    Ok(())
}
