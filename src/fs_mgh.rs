//! Functions for managing FreeSurfer brain volumes in binary 'MGH' files.
//!
//! MGH is the volume format written by the FreeSurfer tools used upstream of the layer
//! analysis (bbregister, mri_convert, ...). A file holds a fixed size header, followed
//! by the voxel data in column-major order (the first dimension varies fastest, frames
//! vary slowest). Files ending in `.mgz` or `.gz` are gzip compressed.

use byteordered::ByteOrdered;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use ndarray::{Array, Array2, Array4, ShapeBuilder};

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{LayerStatsError, Result};
use crate::util::is_gz_file;

pub const MGH_VERSION: i32 = 1;

pub const MRI_UCHAR: i32 = 0;
pub const MRI_INT: i32 = 1;
pub const MRI_FLOAT: i32 = 3;
pub const MRI_SHORT: i32 = 4;

pub const MGH_DATATYPE_NAMES: [&str; 4] = ["MRI_UCHAR", "MRI_INT", "MRI_FLOAT", "MRI_SHORT"];
pub const MGH_DATATYPE_CODES: [i32; 4] = [MRI_UCHAR, MRI_INT, MRI_FLOAT, MRI_SHORT];
pub const MGH_DATA_START: usize = 284; // The index in bytes where the data part starts in an MGH file.

const MGH_FIXED_HEADER_BYTES: usize = 30; // version, 4 dims, dtype, dof (all i32) and the RAS flag (i16)
const MGH_RAS_HEADER_BYTES: usize = 60; // delta, mdc and p_xyz_c (15 f32)
const MGH_MAX_PREALLOC_VALUES: usize = 1 << 24; // Larger volumes grow their buffer while reading.

/// Models the header of a FreeSurfer MGH file containing a brain volume.
#[derive(Debug, Clone, PartialEq)]
pub struct FsMghHeader {
    pub mgh_format_version: i32,
    pub dim1len: i32,
    pub dim2len: i32,
    pub dim3len: i32,
    pub dim4len: i32, // aka "num_frames"
    pub dtype: i32,
    pub dof: i32,
    pub is_ras_good: i16,
    pub delta: [f32; 3],
    pub mdc_raw: [f32; 9],
    pub p_xyz_c: [f32; 3],
}


/// Models a FreeSurfer MGH file. Exactly one of the data fields is set, depending on `header.dtype`.
#[derive(Debug, Clone, PartialEq)]
pub struct FsMgh {
    pub header: FsMghHeader,
    pub data_mri_uchar: Option<Array4<u8>>,
    pub data_mri_float: Option<Array4<f32>>,
    pub data_mri_int: Option<Array4<i32>>,
    pub data_mri_short: Option<Array4<i16>>,
}


impl Default for FsMghHeader {
    fn default() -> FsMghHeader {
        FsMghHeader {
            mgh_format_version: MGH_VERSION,
            dim1len: 0,
            dim2len: 0,
            dim3len: 0,
            dim4len: 0,
            dtype: MRI_INT,
            dof: 0,
            is_ras_good: 0,
            delta: [0.; 3],
            mdc_raw: [0.; 9],
            p_xyz_c: [0.; 3],
        }
    }
}

/// The header of an MGH/MGZ file.
impl FsMghHeader {

    /// Read an MGH header from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsMghHeader> {
        let gz = is_gz_file(&path);
        let mut file = BufReader::new(File::open(path)?);
        if gz {
            FsMghHeader::from_reader(&mut GzDecoder::new(file))
        } else {
            FsMghHeader::from_reader(&mut file)
        }
    }


    /// Read an MGH header from the given byte stream.
    /// It is assumed that the input is currently at the start of the
    /// header. The RAS part is only consumed if the RAS flag is set.
    pub fn from_reader<S>(input: &mut S) -> Result<FsMghHeader>
    where
        S: Read,
    {
        let mut hdr = FsMghHeader::default();

        let mut input = ByteOrdered::be(input);

        hdr.mgh_format_version = input.read_i32()?;

        if hdr.mgh_format_version != MGH_VERSION {
            return Err(LayerStatsError::InvalidFsMghFormat);
        }

        hdr.dim1len = input.read_i32()?;
        hdr.dim2len = input.read_i32()?;
        hdr.dim3len = input.read_i32()?;
        hdr.dim4len = input.read_i32()?;

        hdr.dtype = input.read_i32()?;
        hdr.dof = input.read_i32()?;

        hdr.is_ras_good = input.read_i16()?;

        if hdr.is_ras_good == 1 {
            for idx in 0..3 { hdr.delta[idx] = input.read_f32()?; }
            for idx in 0..9 { hdr.mdc_raw[idx] = input.read_f32()?; }
            for idx in 0..3 { hdr.p_xyz_c[idx] = input.read_f32()?; }
        }
        Ok(hdr)
    }


    /// The volume dimensions, in the order stored in the file.
    pub fn dims(&self) -> Result<[usize; 4]> {
        let mut dims = [0usize; 4];
        for (d, &len) in dims.iter_mut().zip([self.dim1len, self.dim2len, self.dim3len, self.dim4len].iter()) {
            if len < 0 {
                return Err(LayerStatsError::InvalidFsMghFormat);
            }
            *d = len as usize;
        }
        Ok(dims)
    }


    /// The number of header bytes `from_reader` consumes for this header.
    fn num_bytes_read(&self) -> usize {
        if self.is_ras_good == 1 {
            MGH_FIXED_HEADER_BYTES + MGH_RAS_HEADER_BYTES
        } else {
            MGH_FIXED_HEADER_BYTES
        }
    }


    /// Compute the 4x4 vox2ras matrix, mapping 0-based voxel indices to scanner RAS coordinates.
    ///
    /// If the header contains no valid RAS information, FreeSurfer's defaults are used:
    /// 1mm isotropic voxels in coronal orientation, centered at the origin.
    pub fn vox2ras(&self) -> Array2<f32> {
        let (delta, mdc, p_xyz_c) = if self.is_ras_good == 1 {
            (self.delta, self.mdc_raw, self.p_xyz_c)
        } else {
            ([1.0; 3], [-1., 0., 0., 0., 0., -1., 0., 1., 0.], [0.0; 3])
        };
        let center = [
            self.dim1len as f32 / 2.0,
            self.dim2len as f32 / 2.0,
            self.dim3len as f32 / 2.0,
        ];

        let mut affine = Array2::<f32>::eye(4);
        for row in 0..3 {
            let mut p0 = p_xyz_c[row];
            for col in 0..3 {
                // mdc_raw holds the x, y and z direction cosines one after another.
                let m = mdc[col * 3 + row] * delta[col];
                affine[[row, col]] = m;
                p0 -= m * center[col];
            }
            affine[[row, 3]] = p0;
        }
        affine
    }


    fn write_to<W>(&self, output: &mut W) -> Result<()>
    where
        W: Write,
    {
        let mut output = ByteOrdered::be(output);
        output.write_i32(self.mgh_format_version)?;
        output.write_i32(self.dim1len)?;
        output.write_i32(self.dim2len)?;
        output.write_i32(self.dim3len)?;
        output.write_i32(self.dim4len)?;
        output.write_i32(self.dtype)?;
        output.write_i32(self.dof)?;
        output.write_i16(self.is_ras_good)?;
        for v in self.delta.iter().chain(self.mdc_raw.iter()).chain(self.p_xyz_c.iter()) {
            output.write_f32(*v)?;
        }
        for _ in (MGH_FIXED_HEADER_BYTES + MGH_RAS_HEADER_BYTES)..MGH_DATA_START {
            output.write_u8(0)?;
        }
        Ok(())
    }
}


/// Turn column-major file data into an array indexed as `[x, y, z, frame]`.
fn column_major_array<T>(dims: [usize; 4], data: Vec<T>) -> Result<Array4<T>> {
    Array::from_shape_vec((dims[0], dims[1], dims[2], dims[3]).f(), data)
        .map_err(|e| LayerStatsError::ShapeMismatch(format!("MGH data does not match header dimensions: {}", e)))
}


impl FsMgh {

    /// Read an MGH or MGZ file.
    /// If the file's name ends with ".mgz" or ".gz", the file is assumed to need GZip decoding.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsMgh> {
        let gz = is_gz_file(&path);
        let file = BufReader::new(File::open(&path)?);
        let mgh = if gz {
            FsMgh::from_reader(GzDecoder::new(file))?
        } else {
            FsMgh::from_reader(file)?
        };
        info!("Read MGH volume {} with dimensions {:?}", path.as_ref().display(), mgh.header.dims()?);
        Ok(mgh)
    }


    /// Read an MGH volume, header and data, from the given byte stream.
    /// The stream is only read forward, as we cannot seek in a GZ stream.
    pub fn from_reader<S>(mut input: S) -> Result<FsMgh>
    where
        S: Read,
    {
        let header = FsMghHeader::from_reader(&mut input)?;

        let to_skip = (MGH_DATA_START - header.num_bytes_read()) as u64;
        let skipped = io::copy(&mut input.by_ref().take(to_skip), &mut io::sink())?;
        if skipped != to_skip {
            return Err(LayerStatsError::InvalidFsMghFormat);
        }

        let dims = header.dims()?;
        let num_values = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or(LayerStatsError::InvalidFsMghFormat)?;
        // The header is not trusted for the allocation, a short data part fails with an IO error.
        let capacity = num_values.min(MGH_MAX_PREALLOC_VALUES);
        let mut input = ByteOrdered::be(input);

        let mut mgh = FsMgh {
            header,
            data_mri_uchar: None,
            data_mri_float: None,
            data_mri_int: None,
            data_mri_short: None,
        };

        match mgh.header.dtype {
            MRI_UCHAR => {
                let mut data = Vec::with_capacity(capacity);
                for _ in 0..num_values { data.push(input.read_u8()?); }
                mgh.data_mri_uchar = Some(column_major_array(dims, data)?);
            }
            MRI_INT => {
                let mut data = Vec::with_capacity(capacity);
                for _ in 0..num_values { data.push(input.read_i32()?); }
                mgh.data_mri_int = Some(column_major_array(dims, data)?);
            }
            MRI_FLOAT => {
                let mut data = Vec::with_capacity(capacity);
                for _ in 0..num_values { data.push(input.read_f32()?); }
                mgh.data_mri_float = Some(column_major_array(dims, data)?);
            }
            MRI_SHORT => {
                let mut data = Vec::with_capacity(capacity);
                for _ in 0..num_values { data.push(input.read_i16()?); }
                mgh.data_mri_short = Some(column_major_array(dims, data)?);
            }
            other => return Err(LayerStatsError::UnsupportedMghDataType(other)),
        }
        Ok(mgh)
    }


    /// Create a float volume from the given data, sharing the geometry (voxel size, orientation, center)
    /// of the template header. Used to save volumes derived from loaded ones.
    pub fn from_f32(template: &FsMghHeader, data: Array4<f32>) -> FsMgh {
        let shape = data.shape();
        let header = FsMghHeader {
            dim1len: shape[0] as i32,
            dim2len: shape[1] as i32,
            dim3len: shape[2] as i32,
            dim4len: shape[3] as i32,
            dtype: MRI_FLOAT,
            ..template.clone()
        };
        FsMgh {
            header,
            data_mri_uchar: None,
            data_mri_float: Some(data),
            data_mri_int: None,
            data_mri_short: None,
        }
    }


    /// The voxel data converted to `f32`, whatever type is stored in the file.
    pub fn data_as_f32(&self) -> Result<Array4<f32>> {
        if let Some(data) = &self.data_mri_float {
            Ok(data.clone())
        } else if let Some(data) = &self.data_mri_uchar {
            Ok(data.mapv(f32::from))
        } else if let Some(data) = &self.data_mri_short {
            Ok(data.mapv(f32::from))
        } else if let Some(data) = &self.data_mri_int {
            Ok(data.mapv(|v| v as f32))
        } else {
            Err(LayerStatsError::UnsupportedMghDataType(self.header.dtype))
        }
    }


    /// The vox2ras matrix of this volume, see [`FsMghHeader::vox2ras`].
    pub fn vox2ras(&self) -> Array2<f32> {
        self.header.vox2ras()
    }


    /// Write this volume to an MGH file, or to an MGZ file if the name ends with ".mgz" or ".gz".
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let gz = is_gz_file(&path);
        let mut file = BufWriter::new(File::create(&path)?);
        if gz {
            let mut encoder = GzEncoder::new(file, Compression::default());
            self.to_writer(&mut encoder)?;
            encoder.finish()?.flush()?;
        } else {
            self.to_writer(&mut file)?;
            file.flush()?;
        }
        info!("Wrote MGH volume {}", path.as_ref().display());
        Ok(())
    }


    /// Write header and data to the given byte stream. Dimensions and data type in the written
    /// header are taken from the data array that is actually present.
    pub fn to_writer<W>(&self, output: &mut W) -> Result<()>
    where
        W: Write,
    {
        let (dtype, shape) = if let Some(data) = &self.data_mri_uchar {
            (MRI_UCHAR, data.shape().to_vec())
        } else if let Some(data) = &self.data_mri_int {
            (MRI_INT, data.shape().to_vec())
        } else if let Some(data) = &self.data_mri_float {
            (MRI_FLOAT, data.shape().to_vec())
        } else if let Some(data) = &self.data_mri_short {
            (MRI_SHORT, data.shape().to_vec())
        } else {
            return Err(LayerStatsError::UnsupportedMghDataType(self.header.dtype));
        };

        let header = FsMghHeader {
            dim1len: shape[0] as i32,
            dim2len: shape[1] as i32,
            dim3len: shape[2] as i32,
            dim4len: shape[3] as i32,
            dtype,
            ..self.header.clone()
        };
        header.write_to(output)?;

        // Iterating the transposed view yields the values in column-major order.
        let mut output = ByteOrdered::be(output);
        if let Some(data) = &self.data_mri_uchar {
            for v in data.t().iter() { output.write_u8(*v)?; }
        } else if let Some(data) = &self.data_mri_int {
            for v in data.t().iter() { output.write_i32(*v)?; }
        } else if let Some(data) = &self.data_mri_float {
            for v in data.t().iter() { output.write_f32(*v)?; }
        } else if let Some(data) = &self.data_mri_short {
            for v in data.t().iter() { output.write_i16(*v)?; }
        }
        Ok(())
    }
}


/// Read an MGH or MGZ file.
pub fn read_mgh<P: AsRef<Path>>(path: P) -> Result<FsMgh> {
    FsMgh::from_file(path)
}


/// Write an MGH or MGZ file.
pub fn write_mgh<P: AsRef<Path>>(path: P, mgh: &FsMgh) -> Result<()> {
    mgh.to_file(path)
}
