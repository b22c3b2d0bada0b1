//! Sorting of voxel coordinates by cortical depth layer.
//!
//! The input is a layer map as produced by layer-growing tools like LayNii's `LN_GROW_LAYERS`:
//! a 3D volume in which every voxel holds its layer label, counted from 1, and 0 marks voxels
//! outside of the cortical ribbon.

use log::debug;
use ndarray::ArrayView3;

use crate::error::{LayerStatsError, Result};
use crate::fs_mgh::FsMgh;
use crate::stat_block::IndexRange;

/// A voxel coordinate `[x, y, z]`.
pub type Coord = [usize; 3];

/// Voxel coordinates grouped by layer. Layer index `i` holds all voxels with label `i + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerIndex {
    layers: Vec<Vec<Coord>>,
    shape: [usize; 3],
}

impl LayerIndex {

    /// Sort the voxels of a layer map by layer.
    ///
    /// Only voxels with a non-zero value in the `mask` (if given) are included. Layer values are
    /// truncated to integers. If `layer_count` is `None`, the maximum label present in the layer map
    /// is used, which fails with `InvalidRange` if it exceeds the number of voxels. Labels above
    /// `layer_count` are not part of any layer.
    ///
    /// Within each layer, coordinates are ordered by x, then y, then z.
    pub fn build(layers: ArrayView3<f32>, mask: Option<ArrayView3<f32>>, layer_count: Option<usize>) -> Result<LayerIndex> {
        if let Some(mask) = &mask {
            if mask.shape() != layers.shape() {
                return Err(LayerStatsError::ShapeMismatch(format!(
                    "mask has shape {:?}, but the layer map has shape {:?}",
                    mask.shape(),
                    layers.shape()
                )));
            }
        }

        let layer_count = match layer_count {
            Some(0) => return Err(LayerStatsError::InvalidRange(String::from("the layer count must be positive"))),
            Some(n) => n,
            None => {
                let max_label = layers.iter().filter_map(|&v| label_of(v)).max().unwrap_or(0);
                // Every layer needs at least one voxel carrying its label.
                if max_label > layers.len() {
                    return Err(LayerStatsError::InvalidRange(format!(
                        "the maximum layer label {} exceeds the {} voxels of the layer map",
                        max_label,
                        layers.len()
                    )));
                }
                max_label
            }
        };

        let (dim_x, dim_y, dim_z) = layers.dim();
        let mut sorted: Vec<Vec<Coord>> = vec![Vec::new(); layer_count];
        for x in 0..dim_x {
            for y in 0..dim_y {
                for z in 0..dim_z {
                    if let Some(mask) = &mask {
                        if mask[[x, y, z]] == 0.0 {
                            continue;
                        }
                    }
                    match label_of(layers[[x, y, z]]) {
                        Some(label) if label <= layer_count => sorted[label - 1].push([x, y, z]),
                        _ => {}
                    }
                }
            }
        }

        debug!(
            "Sorted {} voxels into {} layers",
            sorted.iter().map(|l| l.len()).sum::<usize>(),
            layer_count
        );
        Ok(LayerIndex { layers: sorted, shape: [dim_x, dim_y, dim_z] })
    }


    /// Sort voxels by layer, reading layer map and mask from loaded MGH volumes.
    /// Both volumes must be 3D, i.e., contain a single frame.
    pub fn from_mgh(layers: &FsMgh, mask: Option<&FsMgh>, layer_count: Option<usize>) -> Result<LayerIndex> {
        let layer_data = layers.data_as_f32()?;
        let mask_data = match mask {
            Some(m) => Some(m.data_as_f32()?),
            None => None,
        };
        for data in std::iter::once(&layer_data).chain(mask_data.iter()) {
            if data.shape()[3] != 1 {
                return Err(LayerStatsError::ShapeMismatch(format!(
                    "layer map and mask must be 3D, got {} frames",
                    data.shape()[3]
                )));
            }
        }
        let first_frame = ndarray::Axis(3);
        LayerIndex::build(
            layer_data.index_axis(first_frame, 0),
            mask_data.as_ref().map(|m| m.index_axis(first_frame, 0)),
            layer_count,
        )
    }


    /// The number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// The spatial shape of the layer map this index was built from.
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// The coordinates of the voxels in layer `layer` (0-based), if that layer exists.
    pub fn layer(&self, layer: usize) -> Option<&[Coord]> {
        self.layers.get(layer).map(|l| l.as_slice())
    }

    /// The coordinates of all voxels in the given inclusive range of layers, in layer order.
    /// Layers outside of the index contribute nothing.
    pub fn members(&self, range: IndexRange) -> Vec<Coord> {
        range
            .indices()
            .filter_map(|l| self.layers.get(l))
            .flat_map(|l| l.iter().cloned())
            .collect()
    }

    /// The total number of voxels assigned to any layer.
    pub fn num_voxels(&self) -> usize {
        self.layers.iter().map(|l| l.len()).sum()
    }
}


/// The layer label of a voxel value, if it denotes a layer at all.
fn label_of(value: f32) -> Option<usize> {
    let label = value.trunc();
    if label.is_finite() && label >= 1.0 {
        Some(label as usize)
    } else {
        None
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{Array3, Array4};

    fn demo_layers() -> Array3<f32> {
        // 3 x 2 x 2 volume with labels 0..=2 along x
        Array3::from_shape_fn((3, 2, 2), |(x, _, _)| x as f32)
    }

    #[test]
    fn voxels_are_sorted_by_layer() {
        let index = LayerIndex::build(demo_layers().view(), None, None).unwrap();

        assert_eq!(2, index.num_layers());
        assert_eq!([3, 2, 2], index.shape());
        assert_eq!(
            index.layer(0).unwrap(),
            &[[1, 0, 0], [1, 0, 1], [1, 1, 0], [1, 1, 1]]
        );
        assert_eq!(4, index.layer(1).unwrap().len());
        assert!(index.layer(2).is_none());
        assert_eq!(8, index.num_voxels());
    }

    #[test]
    fn masked_and_unlabeled_voxels_are_excluded() {
        let mut mask = Array3::<f32>::ones((3, 2, 2));
        mask[[2, 1, 1]] = 0.0;
        mask[[1, 0, 0]] = 0.0;
        let layers = demo_layers();
        let index = LayerIndex::build(layers.view(), Some(mask.view()), None).unwrap();

        for ((x, y, z), &label) in layers.indexed_iter() {
            let found: Vec<usize> = (0..index.num_layers())
                .filter(|&l| index.layer(l).unwrap().contains(&[x, y, z]))
                .collect();
            if mask[[x, y, z]] != 0.0 && label >= 1.0 {
                assert_eq!(found, vec![label as usize - 1]);
            } else {
                assert!(found.is_empty());
            }
        }
    }

    #[test]
    fn fractional_and_invalid_labels_are_truncated_or_ignored() {
        let layers = ndarray::arr3(&[[[1.9, 2.2], [-1.0, f32::NAN]]]);
        let index = LayerIndex::build(layers.view(), None, None).unwrap();
        assert_eq!(2, index.num_layers());
        assert_eq!(index.layer(0).unwrap(), &[[0, 0, 0]]);
        assert_eq!(index.layer(1).unwrap(), &[[0, 0, 1]]);
    }

    #[test]
    fn an_explicit_layer_count_limits_and_pads_the_layers() {
        let layers = demo_layers();

        let fewer = LayerIndex::build(layers.view(), None, Some(1)).unwrap();
        assert_eq!(1, fewer.num_layers());
        assert_eq!(4, fewer.num_voxels());

        let more = LayerIndex::build(layers.view(), None, Some(4)).unwrap();
        assert_eq!(4, more.num_layers());
        assert!(more.layer(3).unwrap().is_empty());

        assert!(matches!(
            LayerIndex::build(layers.view(), None, Some(0)),
            Err(LayerStatsError::InvalidRange(_))
        ));
    }

    #[test]
    fn an_implausible_maximum_label_is_rejected() {
        let mut layers = Array3::<f32>::ones((2, 2, 2));
        layers[[1, 0, 1]] = 3.0e12;
        let result = LayerIndex::build(layers.view(), None, None);
        assert!(matches!(result, Err(LayerStatsError::InvalidRange(_))));

        // With an explicit count the large label is simply outside every layer.
        let index = LayerIndex::build(layers.view(), None, Some(1)).unwrap();
        assert_eq!(7, index.num_voxels());
    }

    #[test]
    fn a_mask_of_different_shape_is_rejected() {
        let mask = Array3::<f32>::ones((3, 2, 3));
        let result = LayerIndex::build(demo_layers().view(), Some(mask.view()), None);
        assert!(matches!(result, Err(LayerStatsError::ShapeMismatch(_))));
    }

    #[test]
    fn members_of_a_layer_range_are_concatenated_in_layer_order() {
        let index = LayerIndex::build(demo_layers().view(), None, None).unwrap();
        let members = index.members(IndexRange::new(0, 1).unwrap());
        assert_eq!(8, members.len());
        assert_eq!([1, 0, 0], members[0]);
        assert_eq!([2, 0, 0], members[4]);
    }

    #[test]
    fn the_index_can_be_built_from_mgh_volumes() {
        let header = crate::fs_mgh::FsMghHeader::default();
        let layers = demo_layers().insert_axis(ndarray::Axis(3));
        let layers = FsMgh::from_f32(&header, layers);
        let index = LayerIndex::from_mgh(&layers, None, None).unwrap();
        assert_eq!(2, index.num_layers());

        let time_series = FsMgh::from_f32(&header, Array4::zeros((3, 2, 2, 2)));
        assert!(matches!(
            LayerIndex::from_mgh(&layers, Some(&time_series), None),
            Err(LayerStatsError::ShapeMismatch(_))
        ));
    }
}
