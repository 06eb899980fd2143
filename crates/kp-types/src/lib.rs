#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel used by datetime storage for "not a time".
pub const NAT: i64 = i64::MIN;

/// Closed set of physical kinds a column or block can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Bool,
    Int64,
    Float64,
    Object,
    DateTime64,
    Categorical,
}

impl DType {
    /// Whether a missing value can be stored without changing dtype.
    #[must_use]
    pub fn can_hold_na(self) -> bool {
        !matches!(self, Self::Bool | Self::Int64)
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Bool | Self::Int64 | Self::Float64)
    }

    /// Blocks of this dtype may be merged with each other.
    #[must_use]
    pub fn is_consolidatable(self) -> bool {
        !matches!(self, Self::Categorical)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Object => "object",
            Self::DateTime64 => "datetime64[ns]",
            Self::Categorical => "category",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
    NaT,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    /// Nanoseconds since the unix epoch.
    DateTime64(i64),
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null(NullKind::Null), Into::into)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null(NullKind::Null) => f.write_str("None"),
            Self::Null(NullKind::NaN) => f.write_str("NaN"),
            Self::Null(NullKind::NaT) => f.write_str("NaT"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => f.write_str(v),
            Self::DateTime64(v) => write!(f, "{v}ns"),
        }
    }
}

impl Scalar {
    /// Dtype a value of this kind is stored under; `None` for untyped nulls.
    #[must_use]
    pub fn dtype(&self) -> Option<DType> {
        match self {
            Self::Null(NullKind::NaN) => Some(DType::Float64),
            Self::Null(NullKind::NaT) => Some(DType::DateTime64),
            Self::Null(NullKind::Null) => None,
            Self::Bool(_) => Some(DType::Bool),
            Self::Int64(_) => Some(DType::Int64),
            Self::Float64(_) => Some(DType::Float64),
            Self::Utf8(_) => Some(DType::Object),
            Self::DateTime64(_) => Some(DType::DateTime64),
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float64(v) => v.is_nan(),
            Self::DateTime64(v) => *v == NAT,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Null(NullKind::NaN)) || matches!(self, Self::Float64(v) if v.is_nan())
    }

    #[must_use]
    pub fn missing_for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::Float64 | DType::Int64 => Self::Null(NullKind::NaN),
            DType::DateTime64 => Self::Null(NullKind::NaT),
            DType::Bool | DType::Object | DType::Categorical => Self::Null(NullKind::Null),
        }
    }

    /// Equality that treats every missing marker as equal to every other.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self.is_missing(), other.is_missing()) {
            (true, true) => true,
            (false, false) => match (self, other) {
                (Self::Float64(a), Self::Int64(b)) | (Self::Int64(b), Self::Float64(a)) => {
                    *a == *b as f64
                }
                _ => self == other,
            },
            _ => false,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            Self::Null(kind) => Err(TypeError::ValueIsMissing { kind: *kind }),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                dtype: DType::Object,
            }),
            Self::DateTime64(v) => Err(TypeError::NonNumericValue {
                value: v.to_string(),
                dtype: DType::DateTime64,
            }),
        }
    }

    /// Ordering between two non-missing values of comparable kinds.
    ///
    /// Numbers compare numerically across bool/int/float, strings
    /// lexicographically, timestamps by instant. Any other pairing is not
    /// orderable and yields `None`.
    #[must_use]
    pub fn try_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Utf8(a), Self::Utf8(b)) => Some(a.cmp(b)),
            (Self::DateTime64(a), Self::DateTime64(b)) => Some(a.cmp(b)),
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (
                Self::Bool(_) | Self::Int64(_) | Self::Float64(_),
                Self::Bool(_) | Self::Int64(_) | Self::Float64(_),
            ) => {
                let lhs = self.to_f64().ok()?;
                let rhs = other.to_f64().ok()?;
                lhs.partial_cmp(&rhs)
            }
            _ => None,
        }
    }
}

/// Exception class an error maps onto at the crate boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Lookup failure on an absent label.
    Key,
    /// Shape, alignment or domain mismatch.
    Value,
    /// Operation unsupported for a dtype.
    Type,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("cannot cast scalar of dtype {from:?} to {to}")]
    InvalidCast { from: Option<DType>, to: DType },
    #[error("cannot cast float {value} to int64 without loss")]
    LossyFloatToInt { value: f64 },
    #[error("value {value:?} has non-numeric dtype {dtype}")]
    NonNumericValue { value: String, dtype: DType },
    #[error("value is missing ({kind:?})")]
    ValueIsMissing { kind: NullKind },
    #[error("operation '{op}' is not supported for dtype {dtype}")]
    UnsupportedOperation { op: &'static str, dtype: DType },
    #[error("operation '{op}' requires an ordered categorical")]
    UnorderedCategorical { op: &'static str },
}

impl TypeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LossyFloatToInt { .. } | Self::ValueIsMissing { .. } => ErrorKind::Value,
            _ => ErrorKind::Type,
        }
    }
}

/// Smallest dtype able to hold values of both inputs.
///
/// Mixed numeric kinds widen (bool < int64 < float64); anything involving
/// strings, or timestamps mixed with other kinds, falls back to `Object`.
#[must_use]
pub fn common_dtype(left: DType, right: DType) -> DType {
    use DType::{Bool, Float64, Int64, Object};

    match (left, right) {
        (a, b) if a == b => a,
        (Bool, Int64) | (Int64, Bool) => Int64,
        (Bool | Int64, Float64) | (Float64, Bool | Int64) => Float64,
        _ => Object,
    }
}

/// Infer the storage dtype of a sequence of scalars.
///
/// Missing values steer the result the way an untyped buffer would: integers
/// with gaps become floats, booleans with gaps become objects, and an
/// all-missing sequence is float unless it only contains NaT.
#[must_use]
pub fn infer_dtype(values: &[Scalar]) -> DType {
    let mut current: Option<DType> = None;
    let mut saw_untyped_null = false;
    for value in values {
        match value.dtype() {
            Some(dtype) => {
                current = Some(match current {
                    None => dtype,
                    Some(prev) => common_dtype(prev, dtype),
                });
            }
            None => saw_untyped_null = true,
        }
    }

    match current {
        None => DType::Float64,
        Some(DType::Int64) if saw_untyped_null || values.iter().any(Scalar::is_missing) => {
            DType::Float64
        }
        Some(DType::Bool) if saw_untyped_null => DType::Object,
        Some(dtype) => dtype,
    }
}

/// Widen `dtype` so that `fill` can be stored, returning the new dtype and
/// the fill value expressed in it.
///
/// Categorical blocks are returned unchanged; whether the fill belongs to the
/// categories is checked where the categories are known.
#[must_use]
pub fn maybe_promote(dtype: DType, fill: &Scalar) -> (DType, Scalar) {
    if fill.is_missing() {
        return match dtype {
            DType::Int64 | DType::Float64 => (DType::Float64, Scalar::Null(NullKind::NaN)),
            DType::Bool | DType::Object => (DType::Object, Scalar::Null(NullKind::Null)),
            DType::DateTime64 => (DType::DateTime64, Scalar::Null(NullKind::NaT)),
            DType::Categorical => (DType::Categorical, Scalar::Null(NullKind::Null)),
        };
    }

    match (dtype, fill) {
        (DType::Categorical, _) => (DType::Categorical, fill.clone()),
        (DType::Int64, Scalar::Int64(_)) => (DType::Int64, fill.clone()),
        (DType::Int64, Scalar::Bool(b)) => (DType::Int64, Scalar::Int64(i64::from(*b))),
        (DType::Int64 | DType::Float64, Scalar::Float64(v)) => (DType::Float64, Scalar::Float64(*v)),
        (DType::Float64, Scalar::Int64(v)) => (DType::Float64, Scalar::Float64(*v as f64)),
        (DType::Float64, Scalar::Bool(b)) => {
            (DType::Float64, Scalar::Float64(if *b { 1.0 } else { 0.0 }))
        }
        (DType::Bool, Scalar::Bool(_)) => (DType::Bool, fill.clone()),
        (DType::DateTime64, Scalar::DateTime64(_)) => (DType::DateTime64, fill.clone()),
        _ => (DType::Object, fill.clone()),
    }
}

/// Cast a scalar to a target dtype, taking ownership to avoid clones when the
/// value already has the right kind.
pub fn cast_scalar_owned(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    if value.is_missing() {
        return Ok(Scalar::missing_for_dtype(target));
    }
    let from = value.dtype();
    if from == Some(target) || target == DType::Object || target == DType::Categorical {
        return Ok(value);
    }

    match target {
        DType::Bool => match value {
            Scalar::Int64(0) => Ok(Scalar::Bool(false)),
            Scalar::Int64(1) => Ok(Scalar::Bool(true)),
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Int64 => match value {
            Scalar::Bool(v) => Ok(Scalar::Int64(i64::from(v))),
            Scalar::Float64(v) => {
                if !v.is_finite()
                    || v != v.trunc()
                    || v < i64::MIN as f64
                    || v > i64::MAX as f64
                {
                    return Err(TypeError::LossyFloatToInt { value: v });
                }
                Ok(Scalar::Int64(v as i64))
            }
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Float64 => match value {
            Scalar::Bool(v) => Ok(Scalar::Float64(if v { 1.0 } else { 0.0 })),
            Scalar::Int64(v) => Ok(Scalar::Float64(v as f64)),
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::DateTime64 => match value {
            Scalar::Int64(v) => Ok(Scalar::DateTime64(v)),
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Object | DType::Categorical => Ok(value),
    }
}

pub fn cast_scalar(value: &Scalar, target: DType) -> Result<Scalar, TypeError> {
    cast_scalar_owned(value.clone(), target)
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{
        DType, ErrorKind, NAT, NullKind, Scalar, TypeError, cast_scalar, common_dtype,
        infer_dtype, maybe_promote,
    };

    #[test]
    fn dtype_inference_coerces_numeric_values() {
        let values = vec![Scalar::Bool(true), Scalar::Int64(7), Scalar::Float64(3.5)];
        assert_eq!(infer_dtype(&values), DType::Float64);
    }

    #[test]
    fn integers_with_missing_infer_float() {
        let values = vec![Scalar::Int64(1), Scalar::Null(NullKind::Null)];
        assert_eq!(infer_dtype(&values), DType::Float64);
    }

    #[test]
    fn strings_with_missing_infer_object() {
        let values = vec![Scalar::from("a"), Scalar::Null(NullKind::Null)];
        assert_eq!(infer_dtype(&values), DType::Object);
    }

    #[test]
    fn booleans_with_missing_infer_object() {
        let values = vec![Scalar::Bool(true), Scalar::Null(NullKind::Null)];
        assert_eq!(infer_dtype(&values), DType::Object);
    }

    #[test]
    fn all_nat_infers_datetime() {
        let values = vec![Scalar::Null(NullKind::NaT), Scalar::DateTime64(10)];
        assert_eq!(infer_dtype(&values), DType::DateTime64);
        assert_eq!(infer_dtype(&[Scalar::Null(NullKind::Null)]), DType::Float64);
    }

    #[test]
    fn common_dtype_falls_back_to_object() {
        assert_eq!(common_dtype(DType::Object, DType::Int64), DType::Object);
        assert_eq!(common_dtype(DType::DateTime64, DType::Int64), DType::Object);
        assert_eq!(common_dtype(DType::Bool, DType::Int64), DType::Int64);
    }

    #[test]
    fn missing_values_get_target_missing_marker() {
        let cast = cast_scalar(&Scalar::Null(NullKind::Null), DType::Float64).expect("casts");
        assert_eq!(cast, Scalar::Null(NullKind::NaN));
        let cast = cast_scalar(&Scalar::Null(NullKind::Null), DType::DateTime64).expect("casts");
        assert_eq!(cast, Scalar::Null(NullKind::NaT));
    }

    #[test]
    fn lossy_float_cast_is_rejected() {
        let err = cast_scalar(&Scalar::Float64(1.5), DType::Int64).expect_err("must fail");
        assert_eq!(err, TypeError::LossyFloatToInt { value: 1.5 });
        assert_eq!(err.kind(), ErrorKind::Value);
    }

    #[test]
    fn semantic_eq_treats_all_missing_as_equal() {
        assert!(Scalar::Float64(f64::NAN).semantic_eq(&Scalar::Null(NullKind::NaN)));
        assert!(Scalar::DateTime64(NAT).semantic_eq(&Scalar::Null(NullKind::Null)));
        assert!(Scalar::Int64(2).semantic_eq(&Scalar::Float64(2.0)));
        assert!(!Scalar::Int64(2).semantic_eq(&Scalar::Null(NullKind::NaN)));
    }

    #[test]
    fn promote_int_with_nan_gives_float() {
        let (dtype, fill) = maybe_promote(DType::Int64, &Scalar::Null(NullKind::Null));
        assert_eq!(dtype, DType::Float64);
        assert!(fill.is_nan());
    }

    #[test]
    fn promote_bool_with_missing_gives_object() {
        let (dtype, _) = maybe_promote(DType::Bool, &Scalar::Float64(f64::NAN));
        assert_eq!(dtype, DType::Object);
    }

    #[test]
    fn promote_keeps_dtype_for_compatible_fill() {
        assert_eq!(maybe_promote(DType::Int64, &Scalar::Int64(0)).0, DType::Int64);
        assert_eq!(
            maybe_promote(DType::Float64, &Scalar::Int64(3)),
            (DType::Float64, Scalar::Float64(3.0))
        );
        assert_eq!(
            maybe_promote(DType::DateTime64, &Scalar::Null(NullKind::Null)).0,
            DType::DateTime64
        );
        assert_eq!(maybe_promote(DType::Float64, &Scalar::from("x")).0, DType::Object);
    }

    #[test]
    fn try_cmp_orders_numbers_across_kinds() {
        assert_eq!(
            Scalar::Int64(1).try_cmp(&Scalar::Float64(1.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Scalar::from("b").try_cmp(&Scalar::from("a")), Some(Ordering::Greater));
        assert_eq!(Scalar::from("b").try_cmp(&Scalar::Int64(1)), None);
    }

    #[test]
    fn dtype_display_names() {
        assert_eq!(DType::DateTime64.to_string(), "datetime64[ns]");
        assert_eq!(DType::Categorical.to_string(), "category");
    }

    #[test]
    fn scalar_serde_round_trip() {
        let value = Scalar::DateTime64(1_000);
        let json = serde_json::to_string(&value).expect("serialize");
        assert_eq!(json, r#"{"kind":"date_time64","value":1000}"#);
        let back: Scalar = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, value);
    }
}
