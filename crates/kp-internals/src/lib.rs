#![forbid(unsafe_code)]

mod block;
mod manager;

pub use block::Block;
pub use manager::{BlockLocation, BlockManager};

use kp_columnar::ColumnError;
use kp_index::{FillMethod, IndexError};
use kp_types::{DType, ErrorKind, NullKind, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Block count past which `insert` consolidates the manager.
pub const DEFAULT_CONSOLIDATE_THRESHOLD: usize = 100;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InternalsError {
    #[error("column not found: {label}")]
    KeyNotFound { label: String },
    #[error("column label {label} is not unique; use get_column_locations")]
    AmbiguousColumn { label: String },
    #[error("cannot insert {label}, already exists")]
    DuplicateInsert { label: String },
    #[error("length mismatch for {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("a block needs at least one column")]
    EmptyBlock,
    #[error("block dtype is {expected} but a column has dtype {found}")]
    DTypeMismatch { expected: DType, found: DType },
    #[error("placement {position} appears more than once")]
    OverlappingPlacement { position: usize },
    #[error("categorical blocks hold exactly one column, got {ncols}")]
    CategoricalBlockWidth { ncols: usize },
    #[error("blocks of dtype {dtype} cannot be consolidated")]
    NotConsolidatable { dtype: DType },
    #[error("fill method {method} is not supported on the column axis")]
    FillMethodOnColumns { method: FillMethod },
    #[error("indices must be in [-{len}, {len}), got {index}")]
    TakeOutOfBounds { index: i64, len: usize },
    #[error("managers must share the same row axis to merge")]
    IndexMismatch,
    #[error("columns overlap but no suffix specified: {columns}")]
    OverlappingColumns { columns: String },
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

impl InternalsError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyNotFound { .. } => ErrorKind::Key,
            Self::DTypeMismatch { .. } => ErrorKind::Type,
            Self::Index(err) => err.kind(),
            Self::Column(err) => err.kind(),
            _ => ErrorKind::Value,
        }
    }
}

/// Which manager axis an operation runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Column labels (`items`).
    Columns,
    /// Row labels (`index`).
    Rows,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReindexOptions {
    pub fill_value: Scalar,
    pub method: Option<FillMethod>,
    pub limit: Option<usize>,
}

impl Default for ReindexOptions {
    fn default() -> Self {
        Self {
            fill_value: Scalar::Null(NullKind::NaN),
            method: None,
            limit: None,
        }
    }
}

impl ReindexOptions {
    #[must_use]
    pub fn with_method(method: FillMethod) -> Self {
        Self {
            method: Some(method),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_fill(fill_value: Scalar) -> Self {
        Self {
            fill_value,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub consolidate_threshold: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            consolidate_threshold: DEFAULT_CONSOLIDATE_THRESHOLD,
        }
    }
}
