#![forbid(unsafe_code)]

use kp_types::{
    DType, ErrorKind, NAT, NullKind, Scalar, TypeError, cast_scalar_owned, infer_dtype,
    maybe_promote,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("take index {index} is out of bounds for length {len}")]
    TakeOutOfBounds { index: i64, len: usize },
    #[error("cannot set a value that is not among the categories: {value}")]
    NotInCategories { value: String },
    #[error("categorical code {code} is out of range for {ncategories} categories")]
    InvalidCode { code: i64, ncategories: usize },
    #[error("dtype mismatch: expected {expected}, found {found}")]
    DTypeMismatch { expected: DType, found: DType },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl ColumnError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Type(err) => err.kind(),
            Self::DTypeMismatch { .. } => ErrorKind::Type,
            _ => ErrorKind::Value,
        }
    }
}

/// Codes into a category list; `-1` marks a missing value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalArray {
    codes: Vec<i64>,
    categories: Vec<Scalar>,
    ordered: bool,
}

impl CategoricalArray {
    pub fn new(codes: Vec<i64>, categories: Vec<Scalar>, ordered: bool) -> Result<Self, ColumnError> {
        let ncategories = categories.len();
        if let Some(&code) = codes
            .iter()
            .find(|&&c| c < -1 || c >= ncategories as i64)
        {
            return Err(ColumnError::InvalidCode { code, ncategories });
        }
        Ok(Self {
            codes,
            categories,
            ordered,
        })
    }

    /// Encode `values` against a fixed category list. Missing values become
    /// code `-1`; any other value absent from `categories` is rejected.
    pub fn from_values(
        values: &[Scalar],
        categories: Vec<Scalar>,
        ordered: bool,
    ) -> Result<Self, ColumnError> {
        let codes = values
            .iter()
            .map(|value| code_for(&categories, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            codes,
            categories,
            ordered,
        })
    }

    #[must_use]
    pub fn codes(&self) -> &[i64] {
        &self.codes
    }

    #[must_use]
    pub fn categories(&self) -> &[Scalar] {
        &self.categories
    }

    #[must_use]
    pub fn ordered(&self) -> bool {
        self.ordered
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<Scalar> {
        let code = *self.codes.get(idx)?;
        Some(self.category(code))
    }

    fn category(&self, code: i64) -> Scalar {
        usize::try_from(code)
            .ok()
            .and_then(|c| self.categories.get(c).cloned())
            .unwrap_or(Scalar::Null(NullKind::Null))
    }

    fn with_codes(&self, codes: Vec<i64>) -> Self {
        Self {
            codes,
            categories: self.categories.clone(),
            ordered: self.ordered,
        }
    }

    fn same_categories(&self, other: &Self) -> bool {
        self.ordered == other.ordered
            && self.categories.len() == other.categories.len()
            && self
                .categories
                .iter()
                .zip(&other.categories)
                .all(|(a, b)| a.semantic_eq(b))
    }
}

fn code_for(categories: &[Scalar], value: &Scalar) -> Result<i64, ColumnError> {
    if value.is_missing() {
        return Ok(-1);
    }
    categories
        .iter()
        .position(|c| c.semantic_eq(value))
        .map(|p| p as i64)
        .ok_or_else(|| ColumnError::NotInCategories {
            value: value.to_string(),
        })
}

/// One column of typed storage.
///
/// Missing values are encoded per dtype: NaN for floats, [`NAT`] for
/// timestamps, `Scalar::Null` for objects and code `-1` for categoricals.
/// `Bool` and `Int64` cannot hold missing values; filling them promotes the
/// column (see [`maybe_promote`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "snake_case")]
pub enum Array {
    Bool(Vec<bool>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Object(Vec<Scalar>),
    DateTime64(Vec<i64>),
    Categorical(CategoricalArray),
}

/// Equality with missing values comparing equal to each other, which makes
/// NaN-bearing arrays usable in assertions and structural comparisons.
impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::DateTime64(a), Self::DateTime64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(x, y)| (x.is_nan() && y.is_nan()) || x == y)
            }
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.semantic_eq(y))
            }
            (Self::Categorical(a), Self::Categorical(b)) => {
                a.codes == b.codes && a.same_categories(b)
            }
            _ => false,
        }
    }
}

impl Array {
    /// Build a column of an explicit dtype, casting every value.
    pub fn from_scalars(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let out = match dtype {
            DType::Bool => Self::Bool(
                values
                    .into_iter()
                    .map(|v| match cast_scalar_owned(v, DType::Bool)? {
                        Scalar::Bool(b) => Ok(b),
                        other => Err(missing_error(&other)),
                    })
                    .collect::<Result<_, TypeError>>()?,
            ),
            DType::Int64 => Self::Int64(
                values
                    .into_iter()
                    .map(|v| match cast_scalar_owned(v, DType::Int64)? {
                        Scalar::Int64(i) => Ok(i),
                        other => Err(missing_error(&other)),
                    })
                    .collect::<Result<_, TypeError>>()?,
            ),
            DType::Float64 => Self::Float64(
                values
                    .into_iter()
                    .map(|v| match cast_scalar_owned(v, DType::Float64)? {
                        Scalar::Float64(f) => Ok(f),
                        _ => Ok(f64::NAN),
                    })
                    .collect::<Result<_, TypeError>>()?,
            ),
            DType::DateTime64 => Self::DateTime64(
                values
                    .into_iter()
                    .map(|v| match cast_scalar_owned(v, DType::DateTime64)? {
                        Scalar::DateTime64(t) => Ok(t),
                        _ => Ok(NAT),
                    })
                    .collect::<Result<_, TypeError>>()?,
            ),
            DType::Object => Self::Object(values),
            DType::Categorical => {
                return Err(TypeError::InvalidCast {
                    from: None,
                    to: DType::Categorical,
                }
                .into());
            }
        };
        Ok(out)
    }

    /// Build a column with the dtype inferred from the values.
    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values);
        Self::from_scalars(dtype, values)
    }

    /// A column of `len` copies of `fill`, typed after the fill value.
    #[must_use]
    pub fn full(len: usize, fill: &Scalar) -> Self {
        match fill {
            Scalar::Bool(v) => Self::Bool(vec![*v; len]),
            Scalar::Int64(v) => Self::Int64(vec![*v; len]),
            Scalar::Float64(v) => Self::Float64(vec![*v; len]),
            Scalar::DateTime64(v) => Self::DateTime64(vec![*v; len]),
            Scalar::Null(NullKind::NaT) => Self::DateTime64(vec![NAT; len]),
            Scalar::Null(_) => Self::Float64(vec![f64::NAN; len]),
            Scalar::Utf8(_) => Self::Object(vec![fill.clone(); len]),
        }
    }

    /// An all-missing column of the given dtype, promoted where needed.
    #[must_use]
    pub fn missing(dtype: DType, len: usize) -> Self {
        match maybe_promote(dtype, &Scalar::Null(NullKind::Null)).0 {
            DType::DateTime64 => Self::DateTime64(vec![NAT; len]),
            DType::Object | DType::Bool => Self::Object(vec![Scalar::Null(NullKind::Null); len]),
            _ => Self::Float64(vec![f64::NAN; len]),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Object(_) => DType::Object,
            Self::DateTime64(_) => DType::DateTime64,
            Self::Categorical(_) => DType::Categorical,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(d) => d.len(),
            Self::Int64(d) => d.len(),
            Self::Float64(d) => d.len(),
            Self::Object(d) => d.len(),
            Self::DateTime64(d) => d.len(),
            Self::Categorical(c) => c.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<Scalar> {
        match self {
            Self::Bool(d) => d.get(idx).map(|v| Scalar::Bool(*v)),
            Self::Int64(d) => d.get(idx).map(|v| Scalar::Int64(*v)),
            Self::Float64(d) => d.get(idx).map(|v| {
                if v.is_nan() {
                    Scalar::Null(NullKind::NaN)
                } else {
                    Scalar::Float64(*v)
                }
            }),
            Self::Object(d) => d.get(idx).cloned(),
            Self::DateTime64(d) => d.get(idx).map(|v| {
                if *v == NAT {
                    Scalar::Null(NullKind::NaT)
                } else {
                    Scalar::DateTime64(*v)
                }
            }),
            Self::Categorical(c) => c.value(idx),
        }
    }

    #[must_use]
    pub fn to_scalars(&self) -> Vec<Scalar> {
        (0..self.len()).filter_map(|i| self.value(i)).collect()
    }

    #[must_use]
    pub fn is_na(&self, idx: usize) -> bool {
        match self {
            Self::Bool(_) | Self::Int64(_) => false,
            Self::Float64(d) => d.get(idx).is_some_and(|v| v.is_nan()),
            Self::Object(d) => d.get(idx).is_some_and(Scalar::is_missing),
            Self::DateTime64(d) => d.get(idx).is_some_and(|v| *v == NAT),
            Self::Categorical(c) => c.codes.get(idx).is_some_and(|code| *code < 0),
        }
    }

    #[must_use]
    pub fn isna(&self) -> Vec<bool> {
        (0..self.len()).map(|i| self.is_na(i)).collect()
    }

    #[must_use]
    pub fn count_na(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_na(i)).count()
    }

    /// Replace missing slots with `value`, cast to the column dtype.
    /// Columns that cannot hold a missing value come back unchanged.
    pub fn fillna(&self, value: &Scalar) -> Result<Self, ColumnError> {
        let mut out = self.clone();
        if value.is_missing() {
            return Ok(out);
        }
        for idx in (0..self.len()).filter(|&i| self.is_na(i)) {
            out.set_value(idx, value)?;
        }
        Ok(out)
    }

    /// Convert to another dtype. Categoricals can be decoded but not
    /// produced here.
    pub fn cast(&self, dtype: DType) -> Result<Self, ColumnError> {
        if dtype == self.dtype() {
            return Ok(self.clone());
        }
        match (self, dtype) {
            (Self::Int64(d), DType::Float64) => Ok(Self::Float64(d.iter().map(|v| *v as f64).collect())),
            (Self::Bool(d), DType::Int64) => Ok(Self::Int64(d.iter().map(|v| i64::from(*v)).collect())),
            (Self::Bool(d), DType::Float64) => Ok(Self::Float64(
                d.iter().map(|v| if *v { 1.0 } else { 0.0 }).collect(),
            )),
            _ => Self::from_scalars(dtype, self.to_scalars()),
        }
    }

    /// Gather elements by position. Negative entries yield `fill`; the
    /// column is promoted first when `fill` does not fit its dtype.
    pub fn take(&self, indexer: &[i64], fill: &Scalar) -> Result<Self, ColumnError> {
        let len = self.len();
        let mut needs_fill = false;
        for &i in indexer {
            if i < 0 {
                needs_fill = true;
            } else if i as u64 >= len as u64 {
                return Err(ColumnError::TakeOutOfBounds { index: i, len });
            }
        }

        if !needs_fill {
            return Ok(self.gather(indexer));
        }

        let (dtype, fill) = maybe_promote(self.dtype(), fill);
        let source = if dtype == self.dtype() {
            std::borrow::Cow::Borrowed(self)
        } else {
            std::borrow::Cow::Owned(self.cast(dtype)?)
        };
        let out = match source.as_ref() {
            Self::Bool(d) => {
                let fill = matches!(fill, Scalar::Bool(true));
                Self::Bool(take_1d(d, indexer, fill))
            }
            Self::Int64(d) => {
                let fill = match fill {
                    Scalar::Int64(v) => v,
                    _ => 0,
                };
                Self::Int64(take_1d(d, indexer, fill))
            }
            Self::Float64(d) => {
                let fill = match fill {
                    Scalar::Float64(v) => v,
                    _ => f64::NAN,
                };
                Self::Float64(take_1d(d, indexer, fill))
            }
            Self::DateTime64(d) => {
                let fill = match fill {
                    Scalar::DateTime64(v) => v,
                    _ => NAT,
                };
                Self::DateTime64(take_1d(d, indexer, fill))
            }
            Self::Object(d) => Self::Object(
                indexer
                    .iter()
                    .map(|&i| if i < 0 { fill.clone() } else { d[i as usize].clone() })
                    .collect(),
            ),
            Self::Categorical(c) => {
                let fill_code = code_for(&c.categories, &fill)?;
                let codes = indexer
                    .iter()
                    .map(|&i| if i < 0 { fill_code } else { c.codes[i as usize] })
                    .collect();
                Self::Categorical(c.with_codes(codes))
            }
        };
        Ok(out)
    }

    /// Gather elements by non-negative positions; callers guarantee bounds.
    fn gather(&self, indexer: &[i64]) -> Self {
        let at = |i: &i64| *i as usize;
        match self {
            Self::Bool(d) => Self::Bool(indexer.iter().map(|i| d[at(i)]).collect()),
            Self::Int64(d) => Self::Int64(indexer.iter().map(|i| d[at(i)]).collect()),
            Self::Float64(d) => Self::Float64(indexer.iter().map(|i| d[at(i)]).collect()),
            Self::DateTime64(d) => Self::DateTime64(indexer.iter().map(|i| d[at(i)]).collect()),
            Self::Object(d) => Self::Object(indexer.iter().map(|i| d[at(i)].clone()).collect()),
            Self::Categorical(c) => {
                Self::Categorical(c.with_codes(indexer.iter().map(|i| c.codes[at(i)]).collect()))
            }
        }
    }

    /// Reorder by optional positions; `None` slots become missing.
    pub fn reindex_by_positions(&self, positions: &[Option<usize>]) -> Result<Self, ColumnError> {
        let indexer: Vec<i64> = positions
            .iter()
            .map(|slot| slot.map_or(-1, |p| p as i64))
            .collect();
        self.take(&indexer, &Scalar::Null(NullKind::Null))
    }

    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.len());
        let start = start.min(end);
        let indexer: Vec<i64> = (start as i64..end as i64).collect();
        self.gather(&indexer)
    }

    /// Overwrite one position in place. The value must fit the dtype
    /// without promotion.
    pub fn set_value(&mut self, idx: usize, value: &Scalar) -> Result<(), ColumnError> {
        let len = self.len();
        if idx >= len {
            return Err(ColumnError::TakeOutOfBounds {
                index: idx as i64,
                len,
            });
        }
        match self {
            Self::Categorical(c) => {
                c.codes[idx] = code_for(&c.categories, value)?;
            }
            Self::Object(d) => d[idx] = value.clone(),
            Self::Bool(d) => match cast_scalar_owned(value.clone(), DType::Bool)? {
                Scalar::Bool(b) => d[idx] = b,
                other => return Err(missing_error(&other).into()),
            },
            Self::Int64(d) => match cast_scalar_owned(value.clone(), DType::Int64)? {
                Scalar::Int64(v) => d[idx] = v,
                other => return Err(missing_error(&other).into()),
            },
            Self::Float64(d) => {
                d[idx] = match cast_scalar_owned(value.clone(), DType::Float64)? {
                    Scalar::Float64(v) => v,
                    _ => f64::NAN,
                }
            }
            Self::DateTime64(d) => {
                d[idx] = match cast_scalar_owned(value.clone(), DType::DateTime64)? {
                    Scalar::DateTime64(v) => v,
                    _ => NAT,
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn as_categorical(&self) -> Option<&CategoricalArray> {
        match self {
            Self::Categorical(c) => Some(c),
            _ => None,
        }
    }
}

fn missing_error(value: &Scalar) -> TypeError {
    match value {
        Scalar::Null(kind) => TypeError::ValueIsMissing { kind: *kind },
        other => TypeError::InvalidCast {
            from: other.dtype(),
            to: DType::Object,
        },
    }
}

/// Gather with a fill value for negative positions.
fn take_1d<T: Copy>(values: &[T], indexer: &[i64], fill: T) -> Vec<T> {
    indexer
        .iter()
        .map(|&i| if i < 0 { fill } else { values[i as usize] })
        .collect()
}
