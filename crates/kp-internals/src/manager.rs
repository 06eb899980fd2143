use std::collections::BTreeMap;
use std::sync::OnceLock;

use kp_columnar::Array;
use kp_index::{Index, IndexLabel, Loc};
use kp_types::{DType, NullKind, Scalar};
use tracing::{debug, trace};

use crate::{Axis, Block, InternalsError, ManagerConfig, ReindexOptions};

/// Where one manager column lives: block number and offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockLocation {
    pub block: usize,
    pub offset: usize,
}

/// Blocks plus the two axes they are laid out against.
///
/// Block placements are disjoint and cover `0..items.len()`; every block has
/// `index.len()` rows.
#[derive(Debug, Clone)]
pub struct BlockManager {
    blocks: Vec<Block>,
    items: Index,
    index: Index,
    config: ManagerConfig,
    locations: OnceLock<Vec<BlockLocation>>,
    consolidated: OnceLock<bool>,
}

impl PartialEq for BlockManager {
    fn eq(&self, other: &Self) -> bool {
        self.blocks == other.blocks && self.items == other.items && self.index == other.index
    }
}

fn form_blocks(arrays: Vec<Array>) -> Result<Vec<Block>, InternalsError> {
    let mut groups: Vec<(DType, Vec<Array>, Vec<usize>)> = Vec::new();
    for (position, array) in arrays.into_iter().enumerate() {
        let dtype = array.dtype();
        let group = if dtype.is_consolidatable() {
            groups.iter_mut().find(|(d, _, _)| *d == dtype)
        } else {
            None
        };
        match group {
            Some((_, columns, placement)) => {
                columns.push(array);
                placement.push(position);
            }
            None => groups.push((dtype, vec![array], vec![position])),
        }
    }
    groups
        .into_iter()
        .map(|(_, columns, placement)| Block::new(columns, placement))
        .collect()
}

fn consolidate_blocks(blocks: &[Block]) -> Result<Vec<Block>, InternalsError> {
    let mut out: Vec<Block> = Vec::with_capacity(blocks.len());
    for block in blocks {
        trace!(dtype = %block.dtype(), ncols = block.ncols(), "consolidate block");
        if block.is_consolidatable()
            && let Some(existing) = out.iter_mut().find(|b| b.dtype() == block.dtype())
        {
            *existing = existing.consolidate_with(block)?;
        } else {
            out.push(block.clone());
        }
    }
    Ok(out)
}

fn rename_overlap(items: &Index, overlap: &Index, suffix: &str) -> Index {
    items.map_labels(|label| {
        if overlap.contains(label) {
            IndexLabel::Utf8(format!("{label}{suffix}"))
        } else {
            label.clone()
        }
    })
}

impl BlockManager {
    /// Assemble a manager from existing blocks, checking the layout.
    pub fn new(blocks: Vec<Block>, items: Index, index: Index) -> Result<Self, InternalsError> {
        let nrows = index.len();
        let ncols = items.len();
        let mut seen = vec![false; ncols];
        for block in &blocks {
            if block.nrows() != nrows {
                return Err(InternalsError::ShapeMismatch {
                    what: "block rows",
                    expected: nrows,
                    found: block.nrows(),
                });
            }
            for &p in block.placement() {
                let slot = seen.get_mut(p).ok_or(InternalsError::TakeOutOfBounds {
                    index: p as i64,
                    len: ncols,
                })?;
                if *slot {
                    return Err(InternalsError::OverlappingPlacement { position: p });
                }
                *slot = true;
            }
        }
        let covered = seen.iter().filter(|s| **s).count();
        if covered != ncols {
            return Err(InternalsError::ShapeMismatch {
                what: "block placements",
                expected: ncols,
                found: covered,
            });
        }
        Ok(Self::from_parts(blocks, items, index, ManagerConfig::default()))
    }

    fn from_parts(blocks: Vec<Block>, items: Index, index: Index, config: ManagerConfig) -> Self {
        Self {
            blocks,
            items,
            index,
            config,
            locations: OnceLock::new(),
            consolidated: OnceLock::new(),
        }
    }

    /// One column per item, grouped into one block per dtype.
    pub fn from_arrays(items: Index, arrays: Vec<Array>, index: Index) -> Result<Self, InternalsError> {
        if arrays.len() != items.len() {
            return Err(InternalsError::ShapeMismatch {
                what: "columns",
                expected: items.len(),
                found: arrays.len(),
            });
        }
        if let Some(bad) = arrays.iter().find(|a| a.len() != index.len()) {
            return Err(InternalsError::ShapeMismatch {
                what: "column length",
                expected: index.len(),
                found: bad.len(),
            });
        }
        let blocks = form_blocks(arrays)?;
        Ok(Self::from_parts(blocks, items, index, ManagerConfig::default()))
    }

    /// Build from `(label, values)` pairs, inferring each column's dtype.
    /// Without an explicit index the rows are labelled `0..n`.
    pub fn from_mapping(
        pairs: Vec<(IndexLabel, Vec<Scalar>)>,
        index: Option<Index>,
    ) -> Result<Self, InternalsError> {
        let nrows = index
            .as_ref()
            .map(Index::len)
            .or_else(|| pairs.first().map(|(_, values)| values.len()))
            .unwrap_or(0);
        let index = index.unwrap_or_else(|| Index::range(nrows));
        let mut labels = Vec::with_capacity(pairs.len());
        let mut arrays = Vec::with_capacity(pairs.len());
        for (label, values) in pairs {
            if values.len() != nrows {
                return Err(InternalsError::ShapeMismatch {
                    what: "column length",
                    expected: nrows,
                    found: values.len(),
                });
            }
            labels.push(label);
            arrays.push(Array::from_values(values)?);
        }
        Self::from_arrays(Index::new(labels), arrays, index)
    }

    /// Build from rectangular rows.
    pub fn from_rows(
        rows: Vec<Vec<Scalar>>,
        columns: Option<Index>,
        index: Option<Index>,
    ) -> Result<Self, InternalsError> {
        let ncols = columns
            .as_ref()
            .map(Index::len)
            .or_else(|| rows.first().map(Vec::len))
            .unwrap_or(0);
        let index = match index {
            Some(index) if index.len() != rows.len() => {
                return Err(InternalsError::ShapeMismatch {
                    what: "index",
                    expected: rows.len(),
                    found: index.len(),
                });
            }
            Some(index) => index,
            None => Index::range(rows.len()),
        };
        let mut values: Vec<Vec<Scalar>> = (0..ncols).map(|_| Vec::with_capacity(rows.len())).collect();
        for row in rows {
            if row.len() != ncols {
                return Err(InternalsError::ShapeMismatch {
                    what: "row width",
                    expected: ncols,
                    found: row.len(),
                });
            }
            for (column, value) in values.iter_mut().zip(row) {
                column.push(value);
            }
        }
        let arrays = values
            .into_iter()
            .map(Array::from_values)
            .collect::<Result<Vec<_>, _>>()?;
        let items = columns.unwrap_or_else(|| Index::range(ncols));
        Self::from_arrays(items, arrays, index)
    }

    #[must_use]
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> ManagerConfig {
        self.config
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[must_use]
    pub fn items(&self) -> &Index {
        &self.items
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn axis(&self, axis: Axis) -> &Index {
        match axis {
            Axis::Columns => &self.items,
            Axis::Rows => &self.index,
        }
    }

    #[must_use]
    pub fn nblocks(&self) -> usize {
        self.blocks.len()
    }

    /// `(rows, columns)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.index.len(), self.items.len())
    }

    fn invalidate(&mut self) {
        self.locations.take();
        self.consolidated.take();
    }

    /// Block and offset of every column, by column position.
    #[must_use]
    pub fn locations(&self) -> &[BlockLocation] {
        self.locations.get_or_init(|| {
            let mut locations = vec![BlockLocation { block: 0, offset: 0 }; self.items.len()];
            for (b, block) in self.blocks.iter().enumerate() {
                for (offset, &p) in block.placement().iter().enumerate() {
                    if let Some(slot) = locations.get_mut(p) {
                        *slot = BlockLocation { block: b, offset };
                    }
                }
            }
            locations
        })
    }

    fn array_at(&self, location: BlockLocation) -> Option<&Array> {
        self.blocks.get(location.block)?.column(location.offset)
    }

    /// Location of a uniquely labelled column.
    pub fn get_column(&self, label: &IndexLabel) -> Result<BlockLocation, InternalsError> {
        match self.items.get_loc(label) {
            Ok(Loc::Single(p)) => Ok(self.locations()[p]),
            Ok(Loc::Multiple(_)) => Err(InternalsError::AmbiguousColumn {
                label: label.to_string(),
            }),
            Err(_) => Err(InternalsError::KeyNotFound {
                label: label.to_string(),
            }),
        }
    }

    /// Locations of every column carrying `label`.
    pub fn get_column_locations(
        &self,
        label: &IndexLabel,
    ) -> Result<Vec<BlockLocation>, InternalsError> {
        let positions = match self.items.get_loc(label) {
            Ok(Loc::Single(p)) => vec![p],
            Ok(Loc::Multiple(positions)) => positions,
            Err(_) => {
                return Err(InternalsError::KeyNotFound {
                    label: label.to_string(),
                });
            }
        };
        let locations = self.locations();
        Ok(positions.into_iter().map(|p| locations[p]).collect())
    }

    pub fn column(&self, label: &IndexLabel) -> Result<&Array, InternalsError> {
        let location = self.get_column(label)?;
        self.array_at(location).ok_or(InternalsError::KeyNotFound {
            label: label.to_string(),
        })
    }

    /// Column by position.
    pub fn iget(&self, position: usize) -> Result<&Array, InternalsError> {
        self.locations()
            .get(position)
            .and_then(|location| self.array_at(*location))
            .ok_or(InternalsError::TakeOutOfBounds {
                index: position as i64,
                len: self.items.len(),
            })
    }

    #[must_use]
    pub fn dtypes(&self) -> Vec<DType> {
        self.locations()
            .iter()
            .map(|location| self.blocks[location.block].dtype())
            .collect()
    }

    #[must_use]
    pub fn dtype_counts(&self) -> BTreeMap<DType, usize> {
        let mut counts = BTreeMap::new();
        for dtype in self.dtypes() {
            *counts.entry(dtype).or_insert(0) += 1;
        }
        counts
    }

    /// Cross-section of one row across all columns.
    pub fn row(&self, position: usize) -> Result<Vec<Scalar>, InternalsError> {
        if position >= self.index.len() {
            return Err(InternalsError::TakeOutOfBounds {
                index: position as i64,
                len: self.index.len(),
            });
        }
        Ok(self
            .locations()
            .iter()
            .map(|location| {
                self.array_at(*location)
                    .and_then(|array| array.value(position))
                    .unwrap_or(Scalar::Null(NullKind::Null))
            })
            .collect())
    }

    /// No two consolidatable blocks share a dtype.
    #[must_use]
    pub fn is_consolidated(&self) -> bool {
        *self.consolidated.get_or_init(|| {
            let mut dtypes: Vec<DType> = self
                .blocks
                .iter()
                .filter(|b| b.is_consolidatable())
                .map(Block::dtype)
                .collect();
            let before = dtypes.len();
            dtypes.sort_unstable();
            dtypes.dedup();
            dtypes.len() == before
        })
    }

    /// Merge blocks of equal dtype. Consolidating twice is the same as
    /// consolidating once.
    pub fn consolidate(&self) -> Result<Self, InternalsError> {
        debug!(nblocks = self.blocks.len(), "consolidate");
        if self.is_consolidated() {
            return Ok(self.clone());
        }
        let blocks = consolidate_blocks(&self.blocks)?;
        Ok(Self {
            consolidated: OnceLock::from(true),
            ..Self::from_parts(blocks, self.items.clone(), self.index.clone(), self.config)
        })
    }

    pub fn consolidate_inplace(&mut self) -> Result<(), InternalsError> {
        if self.is_consolidated() {
            return Ok(());
        }
        self.blocks = consolidate_blocks(&self.blocks)?;
        self.invalidate();
        Ok(())
    }

    fn remove_from_block(&mut self, location: BlockLocation) -> Result<(), InternalsError> {
        match self.blocks[location.block].delete(location.offset)? {
            Some(rest) => self.blocks[location.block] = rest,
            None => {
                self.blocks.remove(location.block);
            }
        }
        self.invalidate();
        Ok(())
    }

    /// Replace the column `label`, or append it when absent. A value of a
    /// different dtype moves the column to a new block.
    pub fn set(&mut self, label: IndexLabel, array: Array) -> Result<(), InternalsError> {
        if array.len() != self.index.len() {
            return Err(InternalsError::ShapeMismatch {
                what: "column length",
                expected: self.index.len(),
                found: array.len(),
            });
        }
        let position = match self.items.get_loc(&label) {
            Ok(Loc::Single(p)) => p,
            Ok(Loc::Multiple(_)) => {
                return Err(InternalsError::AmbiguousColumn {
                    label: label.to_string(),
                });
            }
            Err(_) => return self.insert(self.items.len(), label, array, false),
        };

        let location = self.locations()[position];
        let block = &mut self.blocks[location.block];
        if block.dtype() == array.dtype() && block.is_consolidatable() {
            block.set(location.offset, array)?;
        } else {
            let replacement = Block::new(vec![array], vec![position])?;
            self.remove_from_block(location)?;
            self.blocks.push(replacement);
        }
        self.invalidate();
        Ok(())
    }

    /// Insert a column at `loc`. Consolidates once the block count passes
    /// the configured threshold.
    pub fn insert(
        &mut self,
        loc: usize,
        label: IndexLabel,
        array: Array,
        allow_duplicates: bool,
    ) -> Result<(), InternalsError> {
        if !allow_duplicates && self.items.contains(&label) {
            return Err(InternalsError::DuplicateInsert {
                label: label.to_string(),
            });
        }
        if array.len() != self.index.len() {
            return Err(InternalsError::ShapeMismatch {
                what: "column length",
                expected: self.index.len(),
                found: array.len(),
            });
        }
        let items = self.items.insert(loc, label)?;
        let block = Block::new(vec![array], vec![loc])?;
        for existing in &mut self.blocks {
            existing.shift_placement_for_insert(loc);
        }
        self.blocks.push(block);
        self.items = items;
        self.invalidate();

        if self.blocks.len() > self.config.consolidate_threshold {
            debug!(
                nblocks = self.blocks.len(),
                threshold = self.config.consolidate_threshold,
                "insert crossed consolidation threshold"
            );
            self.consolidate_inplace()?;
        }
        Ok(())
    }

    /// Remove every column labelled `label`.
    pub fn delete(&mut self, label: &IndexLabel) -> Result<(), InternalsError> {
        let positions = match self.items.get_loc(label) {
            Ok(Loc::Single(p)) => vec![p],
            Ok(Loc::Multiple(positions)) => positions,
            Err(_) => {
                return Err(InternalsError::KeyNotFound {
                    label: label.to_string(),
                });
            }
        };
        for &position in positions.iter().rev() {
            let location = self.locations()[position];
            self.remove_from_block(location)?;
            for block in &mut self.blocks {
                block.shift_placement_after_delete(position);
            }
            self.items = self.items.delete(position)?;
            self.invalidate();
        }
        Ok(())
    }

    /// Conform one axis to `new_axis`, filling labels that are not present.
    pub fn reindex_axis(
        &self,
        new_axis: &Index,
        axis: Axis,
        options: &ReindexOptions,
    ) -> Result<Self, InternalsError> {
        debug!(
            ?axis,
            from = self.axis(axis).len(),
            to = new_axis.len(),
            method = ?options.method,
            "reindex_axis"
        );
        let indexer = match axis {
            Axis::Rows => self.index.reindexer(new_axis, options.method, options.limit)?,
            Axis::Columns => {
                if let Some(method) = options.method {
                    return Err(InternalsError::FillMethodOnColumns { method });
                }
                self.items.reindexer(new_axis, None, None)?
            }
        };
        self.reindex_indexer(new_axis.clone(), &indexer, axis, &options.fill_value)
    }

    /// Apply a precomputed indexer; `-1` entries become `fill`.
    pub fn reindex_indexer(
        &self,
        new_axis: Index,
        indexer: &[i64],
        axis: Axis,
        fill: &Scalar,
    ) -> Result<Self, InternalsError> {
        if indexer.len() != new_axis.len() {
            return Err(InternalsError::ShapeMismatch {
                what: "indexer",
                expected: new_axis.len(),
                found: indexer.len(),
            });
        }
        match axis {
            Axis::Rows => {
                let blocks = self
                    .blocks
                    .iter()
                    .map(|block| {
                        trace!(dtype = %block.dtype(), ncols = block.ncols(), "take rows");
                        block.take_rows(indexer, fill)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::from_parts(blocks, self.items.clone(), new_axis, self.config))
            }
            Axis::Columns => self.reindex_columns(new_axis, indexer, fill),
        }
    }

    fn reindex_columns(
        &self,
        new_items: Index,
        indexer: &[i64],
        fill: &Scalar,
    ) -> Result<Self, InternalsError> {
        let locations = self.locations();
        let mut per_block: Vec<(Vec<usize>, Vec<usize>)> = vec![(Vec::new(), Vec::new()); self.blocks.len()];
        let mut missing = Vec::new();
        for (new_pos, &src) in indexer.iter().enumerate() {
            if src < 0 {
                missing.push(new_pos);
                continue;
            }
            let location = usize::try_from(src)
                .ok()
                .and_then(|s| locations.get(s))
                .ok_or(InternalsError::TakeOutOfBounds {
                    index: src,
                    len: self.items.len(),
                })?;
            let (locals, placement) = &mut per_block[location.block];
            locals.push(location.offset);
            placement.push(new_pos);
        }

        let mut blocks = Vec::with_capacity(self.blocks.len() + 1);
        for (block, (locals, placement)) in self.blocks.iter().zip(per_block) {
            if locals.is_empty() {
                continue;
            }
            trace!(dtype = %block.dtype(), ncols = locals.len(), "take columns");
            if block.is_consolidatable() {
                blocks.push(block.take_columns(&locals, placement)?);
            } else {
                for (local, position) in locals.into_iter().zip(placement) {
                    blocks.push(block.take_columns(&[local], vec![position])?);
                }
            }
        }

        if !missing.is_empty() {
            let nrows = self.index.len();
            let columns = missing.iter().map(|_| Array::full(nrows, fill)).collect();
            blocks.push(Block::new(columns, missing)?);
            blocks = consolidate_blocks(&blocks)?;
        }
        Ok(Self::from_parts(blocks, new_items, self.index.clone(), self.config))
    }

    /// Select by position along `axis`. Negative positions count from the
    /// end; nothing is filled.
    pub fn take(&self, indexer: &[i64], axis: Axis) -> Result<Self, InternalsError> {
        let current = self.axis(axis);
        let len = current.len();
        let positions = indexer
            .iter()
            .map(|&i| {
                let j = if i < 0 { i + len as i64 } else { i };
                if j < 0 || j >= len as i64 {
                    Err(InternalsError::TakeOutOfBounds { index: i, len })
                } else {
                    Ok(j as usize)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let new_axis = current.take(&positions)?;
        let converted: Vec<i64> = positions.iter().map(|p| *p as i64).collect();
        self.reindex_indexer(new_axis, &converted, axis, &Scalar::Null(NullKind::NaN))
    }

    /// Move rows down by `periods` (up when negative), filling the vacated
    /// rows. The row axis is unchanged.
    pub fn shift(&self, periods: i64, fill: &Scalar) -> Result<Self, InternalsError> {
        let n = self.index.len() as i64;
        let indexer: Vec<i64> = (0..n)
            .map(|i| match i.checked_sub(periods) {
                Some(src) if (0..n).contains(&src) => src,
                _ => -1,
            })
            .collect();
        self.reindex_indexer(self.index.clone(), &indexer, Axis::Rows, fill)
    }

    /// Side-by-side combination of two managers over the same rows.
    /// Overlapping column labels get the suffixes appended.
    pub fn merge(&self, other: &Self, lsuffix: &str, rsuffix: &str) -> Result<Self, InternalsError> {
        if self.index != other.index {
            return Err(InternalsError::IndexMismatch);
        }
        let overlap = self.items.intersection(&other.items);
        let (left_items, right_items) = if overlap.is_empty() {
            (self.items.clone(), other.items.clone())
        } else {
            if lsuffix.is_empty() && rsuffix.is_empty() {
                let columns = overlap
                    .labels()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(InternalsError::OverlappingColumns { columns });
            }
            (
                rename_overlap(&self.items, &overlap, lsuffix),
                rename_overlap(&other.items, &overlap, rsuffix),
            )
        };

        let offset = self.items.len();
        let mut blocks = self.blocks.clone();
        blocks.extend(other.blocks.iter().cloned().map(|mut block| {
            block.offset_placement(offset);
            block
        }));
        let blocks = consolidate_blocks(&blocks)?;
        Ok(Self::from_parts(
            blocks,
            left_items.append(&right_items),
            self.index.clone(),
            self.config,
        ))
    }

    /// Fill missing values in every block that can hold them.
    pub fn fillna(&self, value: &Scalar) -> Result<Self, InternalsError> {
        debug!(nblocks = self.blocks.len(), "fillna");
        let blocks = self
            .blocks
            .iter()
            .map(|block| block.fillna(value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_parts(blocks, self.items.clone(), self.index.clone(), self.config))
    }

    /// Cast every column to `dtype` and regroup the blocks.
    pub fn astype(&self, dtype: DType) -> Result<Self, InternalsError> {
        let arrays = (0..self.items.len())
            .map(|p| Ok(self.iget(p)?.cast(dtype)?))
            .collect::<Result<Vec<_>, InternalsError>>()?;
        Ok(Self::from_parts(
            form_blocks(arrays)?,
            self.items.clone(),
            self.index.clone(),
            self.config,
        ))
    }

    /// Bool, int and float columns, in their original order.
    pub fn get_numeric_data(&self) -> Result<Self, InternalsError> {
        self.select_blocks(DType::is_numeric)
    }

    pub fn get_bool_data(&self) -> Result<Self, InternalsError> {
        self.select_blocks(|dtype| dtype == DType::Bool)
    }

    fn select_blocks(&self, keep: impl Fn(DType) -> bool) -> Result<Self, InternalsError> {
        let chosen: Vec<&Block> = self.blocks.iter().filter(|b| keep(b.dtype())).collect();
        let mut positions: Vec<usize> = chosen
            .iter()
            .flat_map(|b| b.placement().iter().copied())
            .collect();
        positions.sort_unstable();
        let mut renumber = vec![0; self.items.len()];
        for (new, &old) in positions.iter().enumerate() {
            renumber[old] = new;
        }
        let blocks = chosen
            .into_iter()
            .map(|block| {
                let local: Vec<usize> = (0..block.ncols()).collect();
                let placement = block.placement().iter().map(|&p| renumber[p]).collect();
                block.take_columns(&local, placement)
            })
            .collect::<Result<Vec<_>, _>>()?;
        trace!(kept = positions.len(), of = self.items.len(), "select blocks");
        let items = self.items.take(&positions)?;
        Ok(Self::from_parts(blocks, items, self.index.clone(), self.config))
    }

    /// Lowest dtype every column can be cast to without loss of meaning.
    /// Bool mixed with numbers, or numbers mixed with datetimes, need
    /// objects; ints mixed with floats need floats.
    #[must_use]
    pub fn interleaved_dtype(&self) -> Option<DType> {
        if self.blocks.is_empty() {
            return None;
        }
        let has = |dtype: DType| self.blocks.iter().any(|b| b.dtype() == dtype);
        let numeric = has(DType::Int64) || has(DType::Float64);
        let dtype = if has(DType::Object)
            || has(DType::Categorical)
            || (has(DType::Bool) && (numeric || has(DType::DateTime64)))
            || (numeric && has(DType::DateTime64))
        {
            DType::Object
        } else if has(DType::Bool) {
            DType::Bool
        } else if has(DType::DateTime64) {
            DType::DateTime64
        } else if has(DType::Float64) {
            DType::Float64
        } else {
            DType::Int64
        };
        Some(dtype)
    }

    /// Every column in item order, cast to [`Self::interleaved_dtype`].
    pub fn interleave(&self) -> Result<Vec<Array>, InternalsError> {
        let Some(dtype) = self.interleaved_dtype() else {
            return Ok(Vec::new());
        };
        (0..self.items.len())
            .map(|p| Ok(self.iget(p)?.cast(dtype)?))
            .collect()
    }

    /// Same labels and same column values, whatever the block layout.
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        self.items == other.items
            && self.index == other.index
            && (0..self.items.len()).all(|p| match (self.iget(p), other.iget(p)) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            })
    }
}
