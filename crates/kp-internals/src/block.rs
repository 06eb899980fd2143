use kp_columnar::Array;
use kp_types::{DType, Scalar};

use crate::InternalsError;

/// Homogeneous two-dimensional storage: `ncols` columns of one dtype and
/// equal length.
///
/// `placement[i]` is the manager-wide column position of `columns[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    columns: Vec<Array>,
    placement: Vec<usize>,
    dtype: DType,
    nrows: usize,
}

impl Block {
    pub fn new(columns: Vec<Array>, placement: Vec<usize>) -> Result<Self, InternalsError> {
        let first = columns.first().ok_or(InternalsError::EmptyBlock)?;
        let dtype = first.dtype();
        let nrows = first.len();
        if placement.len() != columns.len() {
            return Err(InternalsError::ShapeMismatch {
                what: "block placement",
                expected: columns.len(),
                found: placement.len(),
            });
        }
        if dtype == DType::Categorical && columns.len() != 1 {
            return Err(InternalsError::CategoricalBlockWidth {
                ncols: columns.len(),
            });
        }
        for column in &columns {
            if column.dtype() != dtype {
                return Err(InternalsError::DTypeMismatch {
                    expected: dtype,
                    found: column.dtype(),
                });
            }
            if column.len() != nrows {
                return Err(InternalsError::ShapeMismatch {
                    what: "block rows",
                    expected: nrows,
                    found: column.len(),
                });
            }
        }
        let mut sorted = placement.clone();
        sorted.sort_unstable();
        if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(InternalsError::OverlappingPlacement { position: w[0] });
        }
        Ok(Self {
            columns,
            placement,
            dtype,
            nrows,
        })
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn placement(&self) -> &[usize] {
        &self.placement
    }

    #[must_use]
    pub fn columns(&self) -> &[Array] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, local: usize) -> Option<&Array> {
        self.columns.get(local)
    }

    #[must_use]
    pub fn is_consolidatable(&self) -> bool {
        self.dtype.is_consolidatable()
    }

    /// Reorder rows; negative entries produce `fill`, promoting the block
    /// dtype when `fill` does not fit it.
    pub fn take_rows(&self, indexer: &[i64], fill: &Scalar) -> Result<Self, InternalsError> {
        let columns = self
            .columns
            .iter()
            .map(|column| column.take(indexer, fill))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            dtype: columns.first().map_or(self.dtype, Array::dtype),
            columns,
            placement: self.placement.clone(),
            nrows: indexer.len(),
        })
    }

    /// Fill missing slots in every column. Int and bool blocks cannot hold
    /// a missing value and are returned as they are.
    pub fn fillna(&self, value: &Scalar) -> Result<Self, InternalsError> {
        if matches!(self.dtype, DType::Bool | DType::Int64) {
            return Ok(self.clone());
        }
        let columns = self
            .columns
            .iter()
            .map(|column| column.fillna(value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            columns,
            placement: self.placement.clone(),
            dtype: self.dtype,
            nrows: self.nrows,
        })
    }

    /// Subset of columns by local offset, placed at `placement`.
    pub fn take_columns(
        &self,
        local: &[usize],
        placement: Vec<usize>,
    ) -> Result<Self, InternalsError> {
        let columns = local
            .iter()
            .map(|&l| {
                self.columns
                    .get(l)
                    .cloned()
                    .ok_or(InternalsError::TakeOutOfBounds {
                        index: l as i64,
                        len: self.ncols(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(columns, placement)
    }

    /// Drop one column, returning the rest of the block if any remains.
    pub fn delete(&self, local: usize) -> Result<Option<Self>, InternalsError> {
        if local >= self.ncols() {
            return Err(InternalsError::TakeOutOfBounds {
                index: local as i64,
                len: self.ncols(),
            });
        }
        if self.ncols() == 1 {
            return Ok(None);
        }
        let mut columns = self.columns.clone();
        let mut placement = self.placement.clone();
        columns.remove(local);
        placement.remove(local);
        Ok(Some(Self {
            columns,
            placement,
            dtype: self.dtype,
            nrows: self.nrows,
        }))
    }

    /// Merge two blocks of one consolidatable dtype; columns come out in
    /// placement order.
    pub fn consolidate_with(&self, other: &Self) -> Result<Self, InternalsError> {
        if self.dtype != other.dtype {
            return Err(InternalsError::DTypeMismatch {
                expected: self.dtype,
                found: other.dtype,
            });
        }
        if !self.is_consolidatable() {
            return Err(InternalsError::NotConsolidatable { dtype: self.dtype });
        }
        if self.nrows != other.nrows {
            return Err(InternalsError::ShapeMismatch {
                what: "block rows",
                expected: self.nrows,
                found: other.nrows,
            });
        }
        let mut pairs: Vec<(usize, &Array)> = self
            .placement
            .iter()
            .copied()
            .zip(&self.columns)
            .chain(other.placement.iter().copied().zip(&other.columns))
            .collect();
        pairs.sort_by_key(|(p, _)| *p);
        if let Some(w) = pairs.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(InternalsError::OverlappingPlacement { position: w[0].0 });
        }
        let (placement, columns): (Vec<usize>, Vec<Array>) = pairs
            .into_iter()
            .map(|(p, c)| (p, c.clone()))
            .unzip();
        Ok(Self {
            columns,
            placement,
            dtype: self.dtype,
            nrows: self.nrows,
        })
    }

    /// Replace one column in place; it must keep the block dtype and length.
    pub(crate) fn set(&mut self, local: usize, array: Array) -> Result<(), InternalsError> {
        if array.dtype() != self.dtype {
            return Err(InternalsError::DTypeMismatch {
                expected: self.dtype,
                found: array.dtype(),
            });
        }
        if array.len() != self.nrows {
            return Err(InternalsError::ShapeMismatch {
                what: "column length",
                expected: self.nrows,
                found: array.len(),
            });
        }
        let ncols = self.ncols();
        let slot = self
            .columns
            .get_mut(local)
            .ok_or(InternalsError::TakeOutOfBounds {
                index: local as i64,
                len: ncols,
            })?;
        *slot = array;
        Ok(())
    }

    /// Rename manager positions after a column is removed at `removed`.
    pub(crate) fn shift_placement_after_delete(&mut self, removed: usize) {
        for p in &mut self.placement {
            if *p > removed {
                *p -= 1;
            }
        }
    }

    /// Rename manager positions after a column is inserted at `inserted`.
    pub(crate) fn shift_placement_for_insert(&mut self, inserted: usize) {
        for p in &mut self.placement {
            if *p >= inserted {
                *p += 1;
            }
        }
    }

    pub(crate) fn offset_placement(&mut self, by: usize) {
        for p in &mut self.placement {
            *p += by;
        }
    }
}
