// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tensor header: the typed descriptor carried inside every committed
//! slot (spec 3, "Tensor header"; spec 4.5, "Tensor and slot codecs").

use crate::error::{Error, Result};

/// Maximum number of dimensions a tensor header can describe.
pub const MAX_DIMS: usize = 8;

const TENSOR_HEADER_SCHEMA_ID: u16 = 0x5401;
const TENSOR_HEADER_TEMPLATE_ID: u16 = 1;
const TENSOR_HEADER_VERSION: u16 = 1;
const TENSOR_HEADER_BLOCK_LENGTH: u16 = 74;
/// Outer frame (8 bytes) + block.
pub const TENSOR_HEADER_WIRE_LEN: usize = 8 + TENSOR_HEADER_BLOCK_LENGTH as usize;

/// Element data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DType {
    Float32 = 1,
    Float64 = 2,
    Int32 = 3,
    Int64 = 4,
    Uint8 = 5,
    Bfloat16 = 6,
    Float16 = 7,
}

impl DType {
    pub fn elem_size(self) -> u32 {
        match self {
            Self::Float32 | Self::Int32 => 4,
            Self::Float64 | Self::Int64 => 8,
            Self::Uint8 => 1,
            Self::Bfloat16 | Self::Float16 => 2,
        }
    }

    fn from_u16(v: u16) -> Result<Self> {
        Ok(match v {
            1 => Self::Float32,
            2 => Self::Float64,
            3 => Self::Int32,
            4 => Self::Int64,
            5 => Self::Uint8,
            6 => Self::Bfloat16,
            7 => Self::Float16,
            other => return Err(Error::CodecError(format!("unknown dtype {other}"))),
        })
    }
}

/// Row- vs column-major element ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MajorOrder {
    Row = 0,
    Column = 1,
}

impl MajorOrder {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Row),
            1 => Ok(Self::Column),
            other => Err(Error::CodecError(format!("unknown major_order {other}"))),
        }
    }
}

/// Progress reporting axis for streaming producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProgressUnit {
    None = 0,
    Rows = 1,
    Columns = 2,
}

impl ProgressUnit {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::Rows),
            2 => Ok(Self::Columns),
            other => Err(Error::CodecError(format!("unknown progress_unit {other}"))),
        }
    }
}

/// `{dtype, major_order, ndims, progress_unit, progress_stride_bytes,
/// dims[MAX_DIMS], strides[MAX_DIMS]}` (spec 3, "Tensor header").
///
/// `strides` is signed so an encoder can be fed intentionally-invalid
/// negative strides for `validate` to reject (spec 8, scenario 4); a
/// validated header never carries a negative stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorHeader {
    pub dtype: DType,
    pub major_order: MajorOrder,
    pub ndims: u8,
    pub progress_unit: ProgressUnit,
    pub progress_stride_bytes: u32,
    pub dims: [u32; MAX_DIMS],
    pub strides: [i32; MAX_DIMS],
}

impl TensorHeader {
    /// Encode into a caller-provided buffer, returning the number of
    /// bytes written. `buf` must be at least `TENSOR_HEADER_WIRE_LEN`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < TENSOR_HEADER_WIRE_LEN {
            return Err(Error::CodecError("buffer too small for tensor header".into()));
        }
        let mut w = buf;
        put_u16(&mut w, TENSOR_HEADER_SCHEMA_ID);
        put_u16(&mut w, TENSOR_HEADER_TEMPLATE_ID);
        put_u16(&mut w, TENSOR_HEADER_BLOCK_LENGTH);
        put_u16(&mut w, TENSOR_HEADER_VERSION);

        put_u16(&mut w, self.dtype as u16);
        put_u8(&mut w, self.major_order as u8);
        put_u8(&mut w, self.ndims);
        put_u8(&mut w, self.progress_unit as u8);
        put_u8(&mut w, 0); // reserved pad byte, must be zero
        put_u32(&mut w, self.progress_stride_bytes);
        for i in 0..MAX_DIMS {
            let d = if i < self.ndims as usize { self.dims[i] } else { 0 };
            put_u32(&mut w, d);
        }
        for i in 0..MAX_DIMS {
            let s = if i < self.ndims as usize { self.strides[i] } else { 0 };
            put_i32(&mut w, s);
        }
        Ok(TENSOR_HEADER_WIRE_LEN)
    }

    /// Decode a tensor header from the front of `buf`, checking the
    /// schema/template identifiers and rejecting on mismatch.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < TENSOR_HEADER_WIRE_LEN {
            return Err(Error::CodecError("tensor header record truncated".into()));
        }
        let mut r = buf;
        let schema_id = take_u16(&mut r);
        let template_id = take_u16(&mut r);
        let block_length = take_u16(&mut r);
        let _version = take_u16(&mut r);

        if schema_id != TENSOR_HEADER_SCHEMA_ID || template_id != TENSOR_HEADER_TEMPLATE_ID {
            return Err(Error::CodecError("tensor header schema/template mismatch".into()));
        }
        if block_length != TENSOR_HEADER_BLOCK_LENGTH {
            return Err(Error::CodecError("tensor header block_length mismatch".into()));
        }

        let dtype = DType::from_u16(take_u16(&mut r))?;
        let major_order = MajorOrder::from_u8(take_u8(&mut r))?;
        let ndims = take_u8(&mut r);
        let progress_unit = ProgressUnit::from_u8(take_u8(&mut r))?;
        let _pad = take_u8(&mut r);
        let progress_stride_bytes = take_u32(&mut r);

        let mut dims = [0u32; MAX_DIMS];
        for d in dims.iter_mut() {
            *d = take_u32(&mut r);
        }
        let mut strides = [0i32; MAX_DIMS];
        for s in strides.iter_mut() {
            *s = take_i32(&mut r);
        }

        Ok(Self {
            dtype,
            major_order,
            ndims,
            progress_unit,
            progress_stride_bytes,
            dims,
            strides,
        })
    }

    /// Validate invariants, filling in any omitted (zero) strides from
    /// `dims` and `elem_size` per the declared major order, and return
    /// the fully-resolved header (spec 3, 8).
    pub fn validate(mut self) -> Result<Self> {
        if self.ndims == 0 || self.ndims as usize > MAX_DIMS {
            return Err(Error::Integrity(format!("invalid ndims {}", self.ndims)));
        }
        let n = self.ndims as usize;
        let elem_size = self.dtype.elem_size();
        if elem_size == 0 {
            return Err(Error::Integrity("dtype has zero element size".into()));
        }

        for i in 0..n {
            if self.dims[i] == 0 {
                return Err(Error::Integrity(format!("dims[{i}] must be > 0")));
            }
        }
        for i in n..MAX_DIMS {
            if self.dims[i] != 0 || self.strides[i] != 0 {
                return Err(Error::Integrity(format!(
                    "unused dims/strides slot {i} must be zero"
                )));
            }
        }
        for i in 0..n {
            if self.strides[i] < 0 {
                return Err(Error::Integrity(format!("strides[{i}] must be >= 0")));
            }
        }

        let any_caller_stride = self.strides[..n].iter().any(|&s| s != 0);
        if any_caller_stride {
            // Any non-zero caller-supplied stride must be >= the packed value.
            let packed = packed_strides(self.major_order, &self.dims, n, elem_size);
            for i in 0..n {
                let caller = self.strides[i];
                if caller != 0 && (caller as u32) < packed[i] {
                    return Err(Error::Integrity(format!(
                        "strides[{i}]={caller} smaller than packed stride {}",
                        packed[i]
                    )));
                }
                if caller == 0 {
                    self.strides[i] = packed[i] as i32;
                }
            }
        } else {
            let packed = packed_strides(self.major_order, &self.dims, n, elem_size);
            for i in 0..n {
                self.strides[i] = packed[i] as i32;
            }
        }

        match self.progress_unit {
            ProgressUnit::None => {
                if self.progress_stride_bytes != 0 {
                    return Err(Error::Integrity(
                        "progress_stride_bytes must be 0 for NONE".into(),
                    ));
                }
            }
            ProgressUnit::Rows => {
                if n < 1 {
                    return Err(Error::Integrity("ROWS progress requires ndims >= 1".into()));
                }
                if self.progress_stride_bytes as i32 != self.strides[0] {
                    return Err(Error::Integrity(
                        "progress_stride_bytes must equal strides[0] for ROWS".into(),
                    ));
                }
            }
            ProgressUnit::Columns => {
                if n < 2 {
                    return Err(Error::Integrity(
                        "COLUMNS progress requires ndims >= 2".into(),
                    ));
                }
                if self.progress_stride_bytes as i32 != self.strides[1] {
                    return Err(Error::Integrity(
                        "progress_stride_bytes must equal strides[1] for COLUMNS".into(),
                    ));
                }
            }
        }

        Ok(self)
    }
}

/// Row- or column-major packed strides for the first `n` dims.
fn packed_strides(order: MajorOrder, dims: &[u32; MAX_DIMS], n: usize, elem_size: u32) -> [u32; MAX_DIMS] {
    let mut out = [0u32; MAX_DIMS];
    match order {
        MajorOrder::Row => {
            out[n - 1] = elem_size;
            for i in (0..n - 1).rev() {
                out[i] = out[i + 1] * dims[i + 1];
            }
        }
        MajorOrder::Column => {
            out[0] = elem_size;
            for i in 1..n {
                out[i] = out[i - 1] * dims[i - 1];
            }
        }
    }
    out
}

fn put_u8(w: &mut &mut [u8], v: u8) {
    w[0] = v;
    *w = &mut std::mem::take(w)[1..];
}
fn put_u16(w: &mut &mut [u8], v: u16) {
    w[..2].copy_from_slice(&v.to_le_bytes());
    *w = &mut std::mem::take(w)[2..];
}
fn put_u32(w: &mut &mut [u8], v: u32) {
    w[..4].copy_from_slice(&v.to_le_bytes());
    *w = &mut std::mem::take(w)[4..];
}
fn put_i32(w: &mut &mut [u8], v: i32) {
    w[..4].copy_from_slice(&v.to_le_bytes());
    *w = &mut std::mem::take(w)[4..];
}

fn take_u8(r: &mut &[u8]) -> u8 {
    let v = r[0];
    *r = &r[1..];
    v
}
fn take_u16(r: &mut &[u8]) -> u16 {
    let v = u16::from_le_bytes([r[0], r[1]]);
    *r = &r[2..];
    v
}
fn take_u32(r: &mut &[u8]) -> u32 {
    let v = u32::from_le_bytes([r[0], r[1], r[2], r[3]]);
    *r = &r[4..];
    v
}
fn take_i32(r: &mut &[u8]) -> i32 {
    let v = i32::from_le_bytes([r[0], r[1], r[2], r[3]]);
    *r = &r[4..];
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(ndims: u8, dims: [u32; MAX_DIMS], strides: [i32; MAX_DIMS]) -> TensorHeader {
        TensorHeader {
            dtype: DType::Float32,
            major_order: MajorOrder::Row,
            ndims,
            progress_unit: ProgressUnit::None,
            progress_stride_bytes: 0,
            dims,
            strides,
        }
    }

    #[test]
    fn encode_decode_roundtrip_is_identity() {
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = 8;
        let mut strides = [0i32; MAX_DIMS];
        strides[0] = 4;
        let h = base(1, dims, strides);

        let mut buf = [0u8; TENSOR_HEADER_WIRE_LEN];
        h.encode(&mut buf).unwrap();
        let decoded = TensorHeader::decode(&buf).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn validate_fills_row_major_strides() {
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = 2;
        dims[1] = 3;
        let h = base(2, dims, [0; MAX_DIMS]);
        let v = h.validate().unwrap();
        assert_eq!(v.strides[1], 4); // elem_size
        assert_eq!(v.strides[0], 12); // strides[1] * dims[1]
    }

    #[test]
    fn validate_fills_column_major_strides() {
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = 2;
        dims[1] = 3;
        let mut h = base(2, dims, [0; MAX_DIMS]);
        h.major_order = MajorOrder::Column;
        let v = h.validate().unwrap();
        assert_eq!(v.strides[0], 4);
        assert_eq!(v.strides[1], 8);
    }

    #[test]
    fn validate_rejects_zero_ndims() {
        let h = base(0, [0; MAX_DIMS], [0; MAX_DIMS]);
        assert!(h.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_stride() {
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = 8;
        let mut strides = [0i32; MAX_DIMS];
        strides[0] = -4;
        let h = base(1, dims, strides);
        assert!(h.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_dtype_on_decode() {
        let mut buf = [0u8; TENSOR_HEADER_WIRE_LEN];
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = 8;
        let mut strides = [0i32; MAX_DIMS];
        strides[0] = 4;
        base(1, dims, strides).encode(&mut buf).unwrap();
        buf[8] = 0xFF; // corrupt dtype low byte
        buf[9] = 0xFF;
        assert!(TensorHeader::decode(&buf).is_err());
    }

    #[test]
    fn validate_accepts_caller_stride_ge_packed() {
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = 4;
        let mut strides = [0i32; MAX_DIMS];
        strides[0] = 8; // padded beyond packed (4)
        let h = base(1, dims, strides);
        let v = h.validate().unwrap();
        assert_eq!(v.strides[0], 8);
    }

    #[test]
    fn validate_rejects_caller_stride_lt_packed() {
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = 4;
        let mut strides = [0i32; MAX_DIMS];
        strides[0] = 2; // smaller than packed (4)
        let h = base(1, dims, strides);
        assert!(h.validate().is_err());
    }

    #[test]
    fn validate_rows_progress_requires_matching_stride() {
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = 2;
        dims[1] = 3;
        let mut h = base(2, dims, [0; MAX_DIMS]);
        h.progress_unit = ProgressUnit::Rows;
        h.progress_stride_bytes = 12; // strides[0] after packing
        let v = h.validate().unwrap();
        assert_eq!(v.progress_stride_bytes as i32, v.strides[0]);
    }

    #[test]
    fn validate_rejects_mismatched_progress_stride() {
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = 2;
        dims[1] = 3;
        let mut h = base(2, dims, [0; MAX_DIMS]);
        h.progress_unit = ProgressUnit::Rows;
        h.progress_stride_bytes = 999;
        assert!(h.validate().is_err());
    }

    #[test]
    fn validate_rejects_nonzero_unused_slots() {
        let mut dims = [0u32; MAX_DIMS];
        dims[0] = 8;
        dims[2] = 1; // unused slot for ndims=1 must be zero
        let h = base(1, dims, [0; MAX_DIMS]);
        assert!(h.validate().is_err());
    }
}
