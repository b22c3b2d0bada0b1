use quick_error::quick_error;
use std::io::Error as IOError;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum LayerStatsError {
        /// Input arrays have inconsistent dimensions.
        ShapeMismatch(what: String) {
            display("Shape mismatch: {}", what)
        }

        /// A layer group (inclusive, 0-based layer indices) selects no voxels.
        EmptyLayerGroup(first: usize, last: usize) {
            display("Layer group ({}, {}) contains no voxels", first, last)
        }

        /// Reversed or out-of-bounds inclusive index range.
        InvalidRange(what: String) {
            display("Invalid range: {}", what)
        }

        /// Recombination requested on both axes at once, or on none.
        AmbiguousAxis {
            display("Exactly one of layer groups or time groups must be given for recombination")
        }

        /// Invalid MGH file: wrong format version.
        InvalidFsMghFormat {
            display("Invalid MGH file")
        }

        UnsupportedMghDataType(dtype: i32) {
            display("Unsupported MGH data type {}", dtype)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, LayerStatsError>;
