//! N-dimensional numeric buffers exchanged by collectives.
//!
//! A [`Buffer`] owns its elements as little-endian bytes together with a
//! shape and an element type. Operations take buffers by value so the
//! caller cannot touch the data while the worker thread executes.

use crate::error::{CollexError, Result};
use crate::types::DataType;

/// Rust scalar types that can live in a [`Buffer`].
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DataType;

    /// Read a value from a little-endian byte slice (alignment-safe).
    fn read_le(bytes: &[u8]) -> Self;

    /// Write the value into a little-endian byte slice.
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),*) => {
        $(
            impl Element for $ty {
                const DTYPE: DataType = DataType::$dtype;

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    Self::from_le_bytes(raw)
                }

                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_element!(
    f32 => F32,
    f64 => F64,
    i8 => I8,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u32 => U32,
    u64 => U64
);

/// Owned N-dimensional buffer: shape, element type, and the raw elements.
#[derive(Clone, PartialEq)]
pub struct Buffer {
    shape: Vec<usize>,
    dtype: DataType,
    data: Vec<u8>,
}

fn numel_of(shape: &[usize]) -> usize {
    shape.iter().product()
}

impl Buffer {
    /// Build a buffer from typed values laid out in row-major order.
    pub fn from_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<Self> {
        let expected = numel_of(shape);
        if values.len() != expected {
            return Err(CollexError::ShapeMismatch {
                shape: shape.to_vec(),
                expected,
                actual: values.len(),
            });
        }
        let size = T::DTYPE.size_in_bytes();
        let mut data = vec![0u8; expected * size];
        for (chunk, v) in data.chunks_exact_mut(size).zip(values) {
            v.write_le(chunk);
        }
        Ok(Self {
            shape: shape.to_vec(),
            dtype: T::DTYPE,
            data,
        })
    }

    /// Buffer with every element set to `value`.
    pub fn full<T: Element>(shape: &[usize], value: T) -> Self {
        let size = T::DTYPE.size_in_bytes();
        let mut data = vec![0u8; numel_of(shape) * size];
        for chunk in data.chunks_exact_mut(size) {
            value.write_le(chunk);
        }
        Self {
            shape: shape.to_vec(),
            dtype: T::DTYPE,
            data,
        }
    }

    /// Zero-filled buffer. All supported element types encode zero as zero bytes.
    pub fn zeros(shape: &[usize], dtype: DataType) -> Self {
        Self {
            shape: shape.to_vec(),
            dtype,
            data: vec![0u8; numel_of(shape) * dtype.size_in_bytes()],
        }
    }

    /// Wrap raw little-endian bytes.
    pub fn from_bytes(shape: &[usize], dtype: DataType, data: Vec<u8>) -> Result<Self> {
        let expected = numel_of(shape) * dtype.size_in_bytes();
        if data.len() != expected {
            return Err(CollexError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            dtype,
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        numel_of(&self.shape)
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Copy the elements out as `T`. Fails if `T` does not match the buffer's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(CollexError::DTypeMismatch {
                expected: T::DTYPE,
                actual: self.dtype,
            });
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.size_in_bytes())
            .map(T::read_le)
            .collect())
    }

    /// True when every element equals `value`.
    pub fn all_eq<T: Element + PartialEq>(&self, value: T) -> Result<bool> {
        Ok(self.to_vec::<T>()?.into_iter().all(|v| v == value))
    }

    /// Same shape and element type, so the two can stand in for each other on the wire.
    pub fn same_layout(&self, other: &Buffer) -> bool {
        self.dtype == other.dtype && self.shape == other.shape
    }

    /// Short `dtype[d0, d1, ...]` description used in error messages.
    pub fn layout(&self) -> String {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        format!("{}[{}]", self.dtype, dims.join(", "))
    }

    /// Replace the contents with bytes received from a peer, keeping shape and dtype.
    pub(crate) fn fill_from(&mut self, bytes: Vec<u8>) -> Result<()> {
        if bytes.len() != self.data.len() {
            return Err(CollexError::BufferSizeMismatch {
                expected: self.data.len(),
                actual: bytes.len(),
            });
        }
        self.data = bytes;
        Ok(())
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_checks_element_count() {
        let err = Buffer::from_vec(&[2, 2], vec![1.0f32, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            err,
            CollexError::ShapeMismatch {
                expected: 4,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_full_and_to_vec() {
        let b = Buffer::full(&[16, 16], 3.5f32);
        assert_eq!(b.numel(), 256);
        assert_eq!(b.byte_len(), 1024);
        assert!(b.all_eq(3.5f32).unwrap());
        assert_eq!(b.dtype(), DataType::F32);
    }

    #[test]
    fn test_to_vec_rejects_wrong_type() {
        let b = Buffer::full(&[4], 1i64);
        let err = b.to_vec::<f64>().unwrap_err();
        assert!(matches!(
            err,
            CollexError::DTypeMismatch {
                expected: DataType::F64,
                actual: DataType::I64
            }
        ));
    }

    #[test]
    fn test_zeros_layout() {
        let b = Buffer::zeros(&[3, 2], DataType::U32);
        assert_eq!(b.to_vec::<u32>().unwrap(), vec![0; 6]);
        assert_eq!(b.layout(), "u32[3, 2]");
        assert!(b.same_layout(&Buffer::full(&[3, 2], 9u32)));
        assert!(!b.same_layout(&Buffer::full(&[6], 9u32)));
    }

    #[test]
    fn test_from_bytes_checks_length() {
        assert!(Buffer::from_bytes(&[2], DataType::F64, vec![0; 16]).is_ok());
        assert!(Buffer::from_bytes(&[2], DataType::F64, vec![0; 15]).is_err());
    }

    #[test]
    fn test_fill_from_keeps_layout() {
        let mut b = Buffer::zeros(&[2], DataType::I32);
        let src = Buffer::from_vec(&[2], vec![-4i32, 9]).unwrap();
        b.fill_from(src.into_bytes()).unwrap();
        assert_eq!(b.to_vec::<i32>().unwrap(), vec![-4, 9]);
        assert!(b.fill_from(vec![0; 3]).is_err());
    }

    #[test]
    fn test_scalar_shape() {
        let b = Buffer::full(&[], 7u8);
        assert_eq!(b.numel(), 1);
        assert_eq!(b.to_vec::<u8>().unwrap(), vec![7]);
    }
}
