//! Layer-resolved statistics for high-resolution functional MRI.
//!
//! Voxels are sorted into cortical depth layers using a layer map (e.g. from LayNii's `LN_GROW_LAYERS`),
//! then the signal of one or more runs is averaged per group of layers and group of time points,
//! relative to a baseline period. Aggregated blocks can later be re-binned into coarser groups.
//!
//! Volumes are read from and written to FreeSurfer MGH/MGZ files.
//!
//! ```no_run
//! use layerstats::{layer_averages_vs_time, read_mgh, AggregationParams, IndexRange, LayerIndex};
//!
//! # fn main() -> layerstats::error::Result<()> {
//! let layers = read_mgh("rim_layers.mgz")?;
//! let index = LayerIndex::from_mgh(&layers, None, None)?;
//! let run = read_mgh("run1.mgz")?.data_as_f32()?;
//! let params = AggregationParams::new(IndexRange::new(0, 9)?);
//! let result = layer_averages_vs_time(&[run], &index, &params)?;
//! println!("{}", result);
//! # Ok(())
//! # }
//! ```

pub mod cnr;
pub mod error;
pub mod fs_mgh;
pub mod layer_avg;
pub mod layer_combine;
pub mod layer_index;
pub mod stat_block;
pub mod util;
pub mod voxelwise;

pub use cnr::{contrast_to_noise, mean_contrast_to_noise, CnrRun};
pub use error::LayerStatsError;
pub use fs_mgh::{read_mgh, write_mgh, FsMgh, FsMghHeader};
pub use layer_avg::{layer_averages_vs_time, AggregationParams};
pub use layer_combine::{combine_blocks, recombine};
pub use layer_index::{Coord, LayerIndex};
pub use stat_block::{AggregateResult, IndexRange, StatBlock};
pub use voxelwise::{
    apply_mask, average_periods, average_volumes, intersect_masks, relabel_classification, split_periods, voxelwise_stats,
    VoxelStats, LAYNII_RIM_KEYS,
};
