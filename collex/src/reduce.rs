//! Shared element-wise reduction primitives used by collective algorithms.

use crate::buffer::Element;
use crate::error::{CollexError, Result};
use crate::types::{DataType, ReduceOp};

/// Trait for types that support the four reduction operations.
pub(crate) trait Reducible: Element {
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_reducible {
    (int: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Prod => a.wrapping_mul(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Prod => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

impl_reducible!(int: i8, i32, i64, u8, u32, u64);
impl_reducible!(float: f32, f64);

/// Element-wise reduce `src` into `dst`, both interpreted as `dtype` elements.
pub(crate) fn reduce_slice(dst: &mut [u8], src: &[u8], dtype: DataType, op: ReduceOp) -> Result<()> {
    if dst.len() != src.len() {
        return Err(CollexError::BufferSizeMismatch {
            expected: dst.len(),
            actual: src.len(),
        });
    }
    match dtype {
        DataType::F32 => reduce_slice_typed::<f32>(dst, src, op),
        DataType::F64 => reduce_slice_typed::<f64>(dst, src, op),
        DataType::I8 => reduce_slice_typed::<i8>(dst, src, op),
        DataType::I32 => reduce_slice_typed::<i32>(dst, src, op),
        DataType::I64 => reduce_slice_typed::<i64>(dst, src, op),
        DataType::U8 => reduce_slice_typed::<u8>(dst, src, op),
        DataType::U32 => reduce_slice_typed::<u32>(dst, src, op),
        DataType::U64 => reduce_slice_typed::<u64>(dst, src, op),
    }
    Ok(())
}

fn reduce_slice_typed<T: Reducible>(dst: &mut [u8], src: &[u8], op: ReduceOp) {
    let t_size = std::mem::size_of::<T>();
    for (d, s) in dst.chunks_exact_mut(t_size).zip(src.chunks_exact(t_size)) {
        let r = T::reduce(T::read_le(d), T::read_le(s), op);
        r.write_le(d);
    }
}
