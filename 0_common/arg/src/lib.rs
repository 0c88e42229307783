//! Operator attribute values.

use std::collections::BTreeMap;

#[derive(Clone, PartialEq, Debug)]
pub enum Arg {
    Int(i64),
    Float(f64),
    Str(String),
    Arr(Box<[Arg]>),
    Dict(BTreeMap<String, Arg>),
}

#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum ArgError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("integer {0} does not fit the expected range")]
    OutOfRange(i64),
    #[error("expected {expected} elements, found {found}")]
    LenMismatch { expected: usize, found: usize },
    #[error("unknown value {0:?}")]
    Unknown(String),
}

impl Arg {
    pub fn int(val: impl Into<i64>) -> Self {
        Self::Int(val.into())
    }

    pub fn str(val: impl Into<String>) -> Self {
        Self::Str(val.into())
    }

    pub fn arr(vals: impl IntoIterator<Item = Arg>) -> Self {
        Self::Arr(vals.into_iter().collect())
    }

    pub fn dict<K: Into<String>>(items: impl IntoIterator<Item = (K, Arg)>) -> Self {
        Self::Dict(items.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Arr(_) => "arr",
            Self::Dict(_) => "dict",
        }
    }

    fn mismatch(&self, expected: &'static str) -> ArgError {
        ArgError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }

    /// Looks up `key` in a dictionary. Any other variant has no fields.
    pub fn get(&self, key: &str) -> Option<&Arg> {
        match self {
            Self::Dict(map) => map.get(key),
            _ => None,
        }
    }

    pub fn to_int(&self) -> Result<i64, ArgError> {
        match *self {
            Self::Int(val) => Ok(val),
            _ => Err(self.mismatch("int")),
        }
    }

    pub fn to_usize(&self) -> Result<usize, ArgError> {
        let val = self.to_int()?;
        usize::try_from(val).map_err(|_| ArgError::OutOfRange(val))
    }

    pub fn to_str(&self) -> Result<&str, ArgError> {
        match self {
            Self::Str(val) => Ok(val),
            _ => Err(self.mismatch("str")),
        }
    }

    pub fn to_arr(&self) -> Result<&[Arg], ArgError> {
        match self {
            Self::Arr(vals) => Ok(vals),
            _ => Err(self.mismatch("arr")),
        }
    }

    pub fn to_usize_vec(&self) -> Result<Vec<usize>, ArgError> {
        self.to_arr()?.iter().map(Arg::to_usize).collect()
    }

    /// Reads a fixed-length array of non-negative integers.
    pub fn to_usize_array<const N: usize>(&self) -> Result<[usize; N], ArgError> {
        let vals = self.to_usize_vec()?;
        let found = vals.len();
        vals.try_into().map_err(|_| ArgError::LenMismatch {
            expected: N,
            found,
        })
    }
}
