//! Host tensors and byte-offset views into them.

use std::mem::size_of;
use tensor::digit_layout::{DigitLayout, types};

#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum MemError {
    #[error("dims {dims:?} describe {expected} elements, buffer has {found}")]
    NumelMismatch {
        dims: Vec<usize>,
        expected: usize,
        found: usize,
    },
    #[error("element type does not match the stored type")]
    DataType,
    #[error("byte offset {0} is not aligned to the element size")]
    Misaligned(usize),
    #[error("view of {numel} elements at byte offset {offset} exceeds buffer of {len} elements")]
    OutOfRange {
        offset: usize,
        numel: usize,
        len: usize,
    },
}

/// Element types a tensor can store.
pub trait Element: Copy + Default + 'static {
    const DT: DigitLayout;

    fn wrap(data: Box<[Self]>) -> Storage;
    fn slice(storage: &Storage) -> Option<&[Self]>;
    fn slice_mut(storage: &mut Storage) -> Option<&mut [Self]>;
}

#[derive(Clone, PartialEq, Debug)]
pub enum Storage {
    F32(Box<[f32]>),
    F64(Box<[f64]>),
    I64(Box<[i64]>),
}

macro_rules! element {
    ($ty:ty, $variant:ident, $dt:expr) => {
        impl Element for $ty {
            const DT: DigitLayout = $dt;

            fn wrap(data: Box<[Self]>) -> Storage {
                Storage::$variant(data)
            }

            fn slice(storage: &Storage) -> Option<&[Self]> {
                match storage {
                    Storage::$variant(data) => Some(data),
                    _ => None,
                }
            }

            fn slice_mut(storage: &mut Storage) -> Option<&mut [Self]> {
                match storage {
                    Storage::$variant(data) => Some(data),
                    _ => None,
                }
            }
        }
    };
}

element!(f32, F32, types::F32);
element!(f64, F64, types::F64);
element!(i64, I64, types::I64);

impl Storage {
    fn len(&self) -> usize {
        match self {
            Self::F32(data) => data.len(),
            Self::F64(data) => data.len(),
            Self::I64(data) => data.len(),
        }
    }

    fn dt(&self) -> DigitLayout {
        match self {
            Self::F32(_) => f32::DT,
            Self::F64(_) => f64::DT,
            Self::I64(_) => i64::DT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Tensor {
    dims: Vec<usize>,
    storage: Storage,
}

fn numel(dims: &[usize]) -> usize {
    dims.iter().product()
}

impl Tensor {
    /// Allocates a zero-filled tensor.
    pub fn zeros<T: Element>(dims: impl Into<Vec<usize>>) -> Self {
        let dims = dims.into();
        let data = vec![T::default(); numel(&dims)];
        Self {
            dims,
            storage: T::wrap(data.into()),
        }
    }

    pub fn from_vec<T: Element>(dims: impl Into<Vec<usize>>, data: Vec<T>) -> Result<Self, MemError> {
        let dims = dims.into();
        let expected = numel(&dims);
        if expected != data.len() {
            return Err(MemError::NumelMismatch {
                dims,
                expected,
                found: data.len(),
            });
        }
        Ok(Self {
            dims,
            storage: T::wrap(data.into()),
        })
    }

    #[inline]
    pub fn dt(&self) -> DigitLayout {
        self.storage.dt()
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    #[inline]
    pub fn numel(&self) -> usize {
        self.storage.len()
    }

    /// Typed element access, `None` if `T` is not the stored type.
    pub fn data<T: Element>(&self) -> Option<&[T]> {
        T::slice(&self.storage)
    }

    pub fn data_mut<T: Element>(&mut self) -> Option<&mut [T]> {
        T::slice_mut(&mut self.storage)
    }

    /// Aliases `product(dims)` elements starting `byte_offset` bytes into the storage.
    pub fn view<T: Element>(&self, dims: &[usize], byte_offset: usize) -> Result<TensorView<'_, T>, MemError> {
        let range = locate::<T>(dims, byte_offset, self.numel())?;
        let data = self.data::<T>().ok_or(MemError::DataType)?;
        Ok(TensorView {
            dims: dims.to_vec(),
            data: &data[range],
        })
    }

    /// Mutable counterpart of [`Tensor::view`].
    pub fn view_mut<T: Element>(
        &mut self,
        dims: &[usize],
        byte_offset: usize,
    ) -> Result<TensorViewMut<'_, T>, MemError> {
        let range = locate::<T>(dims, byte_offset, self.numel())?;
        let data = self.data_mut::<T>().ok_or(MemError::DataType)?;
        Ok(TensorViewMut {
            dims: dims.to_vec(),
            data: &mut data[range],
        })
    }
}

fn locate<T: Element>(
    dims: &[usize],
    byte_offset: usize,
    len: usize,
) -> Result<std::ops::Range<usize>, MemError> {
    if byte_offset % size_of::<T>() != 0 {
        return Err(MemError::Misaligned(byte_offset));
    }
    let start = byte_offset / size_of::<T>();
    let numel = numel(dims);
    match start.checked_add(numel) {
        Some(end) if end <= len => Ok(start..end),
        _ => Err(MemError::OutOfRange {
            offset: byte_offset,
            numel,
            len,
        }),
    }
}

/// Read-only alias of part of a [`Tensor`].
pub struct TensorView<'a, T> {
    dims: Vec<usize>,
    data: &'a [T],
}

/// Writable alias of part of a [`Tensor`].
pub struct TensorViewMut<'a, T> {
    dims: Vec<usize>,
    data: &'a mut [T],
}

impl<'a, T> TensorView<'a, T> {
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn data(&self) -> &'a [T] {
        self.data
    }
}

impl<T> TensorViewMut<'_, T> {
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn data(&self) -> &[T] {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        self.data
    }
}
