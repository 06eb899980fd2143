#![forbid(unsafe_code)]

mod agg;
mod bins;
mod manager;

pub use agg::{AggFunc, AggOptions, aggregate, cumcount, cumsum, transform};
pub use bins::{BinGrouper, BinLabel, Closed, bin_edges};
pub use manager::{groupby_aggregate, resample};

use std::mem::size_of;

use bumpalo::{Bump, collections::Vec as BumpVec};
use kp_columnar::{Array, ColumnError};
use kp_hashtable::{AlgoError, FactorizeOptions, Factorized, HashTable, NA_SENTINEL, factorize};
use kp_index::{Index, IndexError, IndexLabel};
use kp_internals::InternalsError;
use kp_runtime::{DecisionAction, EvidenceLedger, RuntimePolicy};
use kp_types::{ErrorKind, NAT, NullKind, Scalar, TypeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GroupByError {
    #[error("{labels} group labels for {values} values")]
    LengthMismatch { labels: usize, values: usize },
    #[error("group label {label} is out of range for {ngroups} groups")]
    InvalidLabel { label: i64, ngroups: usize },
    #[error("bin edges must be strictly increasing")]
    NonMonotonicEdges,
    #[error("bin edges cannot contain NaT")]
    NaTEdge,
    #[error("bin frequency must be positive, got {freq}")]
    InvalidFrequency { freq: i64 },
    #[error("cannot build bins from {first} to {last}")]
    InvalidRange { first: i64, last: i64 },
    #[error("values must be sorted to compute bin offsets")]
    UnsortedValues,
    #[error("resample requires a timestamp row axis")]
    NotTimestampAxis,
    #[error("at least one group key is required")]
    NoKeys,
    #[error("unknown aggregation: {name}")]
    UnknownAggregation { name: String },
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Algo(#[from] AlgoError),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Internals(#[from] InternalsError),
}

impl GroupByError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Type(err) => err.kind(),
            Self::Algo(err) => err.kind(),
            Self::Column(err) => err.kind(),
            Self::Index(err) => err.kind(),
            Self::Internals(err) => err.kind(),
            _ => ErrorKind::Value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingOptions {
    /// Order groups by key value instead of first appearance.
    pub sort: bool,
    /// Exclude rows with a missing key. When false, missing keys form one
    /// extra group placed last.
    pub dropna: bool,
}

impl Default for GroupingOptions {
    fn default() -> Self {
        Self {
            sort: true,
            dropna: true,
        }
    }
}

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupByExecutionOptions {
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for GroupByExecutionOptions {
    fn default() -> Self {
        Self {
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

/// How a grouping computed its labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPath {
    Hash,
    Dense,
    DenseArena,
}

/// Group labels for every row plus the key value of every group.
///
/// Labels are in `0..ngroups`; excluded rows carry [`NA_SENTINEL`]. A
/// single-key grouping has one level, a composite grouping one level per
/// key; level `k` holds the `k`-th key component of each group.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouping {
    labels: Vec<i64>,
    levels: Vec<Array>,
    counts: Vec<i64>,
    sort_fallback: bool,
    path: KeyPath,
}

const DENSE_INT_KEY_RANGE_LIMIT: i128 = 65_536;

/// Scratch bytes for the dense path: one slot per bucket plus the labels.
fn estimate_groupby_intermediate_bytes(input_rows: usize, buckets: usize) -> usize {
    input_rows
        .saturating_add(buckets)
        .saturating_mul(size_of::<i64>())
}

fn dense_int64_range(keys: &[i64]) -> Option<(i64, i64)> {
    let first = *keys.first()?;
    Some(
        keys.iter()
            .fold((first, first), |(lo, hi), &k| (lo.min(k), hi.max(k))),
    )
}

struct DenseLabels {
    labels: Vec<i64>,
    uniques: Vec<i64>,
    counts: Vec<i64>,
}

/// Label `keys` through one slot per value in `min_key..`, all slots
/// starting at `-1`. The caller guarantees every key fits in `slots`.
fn dense_int64_labels(keys: &[i64], min_key: i64, sort: bool, slots: &mut [i64]) -> DenseLabels {
    let bucket = |k: i64| k.wrapping_sub(min_key) as usize;
    let mut uniques = Vec::new();
    let mut counts = Vec::new();

    if sort {
        for &k in keys {
            slots[bucket(k)] = 0;
        }
        for (b, slot) in slots.iter_mut().enumerate() {
            if *slot == 0 {
                *slot = uniques.len() as i64;
                uniques.push(min_key.wrapping_add(b as i64));
                counts.push(0);
            }
        }
        let labels = keys
            .iter()
            .map(|&k| {
                let label = slots[bucket(k)];
                counts[label as usize] += 1;
                label
            })
            .collect();
        return DenseLabels {
            labels,
            uniques,
            counts,
        };
    }

    let mut labels = Vec::with_capacity(keys.len());
    for &k in keys {
        let slot = &mut slots[bucket(k)];
        if *slot < 0 {
            *slot = uniques.len() as i64;
            uniques.push(k);
            counts.push(0);
        }
        counts[*slot as usize] += 1;
        labels.push(*slot);
    }
    DenseLabels {
        labels,
        uniques,
        counts,
    }
}

/// Label for one group key on a result axis.
fn group_label(value: &Scalar) -> IndexLabel {
    IndexLabel::from_scalar(value).unwrap_or_else(|| match value {
        Scalar::Null(NullKind::NaT) => IndexLabel::Timestamp(NAT),
        Scalar::Null(NullKind::NaN) => IndexLabel::from(f64::NAN),
        _ => IndexLabel::Utf8("NaN".to_owned()),
    })
}

impl Grouping {
    /// Group rows by the values of `key`.
    pub fn new(
        key: &Array,
        options: GroupingOptions,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Result<Self, GroupByError> {
        Self::with_execution(key, options, GroupByExecutionOptions::default(), policy, ledger)
    }

    /// [`Grouping::new`] with explicit control over the dense-key scratch
    /// arena.
    pub fn with_execution(
        key: &Array,
        options: GroupingOptions,
        exec: GroupByExecutionOptions,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Result<Self, GroupByError> {
        debug!(
            len = key.len(),
            dtype = %key.dtype(),
            sort = options.sort,
            dropna = options.dropna,
            "grouping"
        );
        if let Array::Int64(keys) = key
            && let Some(dense) = Self::dense_int64(keys, options.sort, exec, policy, ledger)
        {
            return Ok(dense);
        }

        let Factorized {
            mut labels,
            mut uniques,
            mut counts,
            sort_fallback,
        } = factorize(
            key,
            FactorizeOptions {
                sort: options.sort,
                na_sentinel: NA_SENTINEL,
            },
            policy,
            ledger,
        )?;

        if !options.dropna {
            let na_rows = labels.iter().filter(|l| **l < 0).count();
            if na_rows > 0 {
                let na_group = counts.len() as i64;
                for label in &mut labels {
                    if *label < 0 {
                        *label = na_group;
                    }
                }
                let indexer: Vec<i64> = (0..na_group).chain(std::iter::once(-1)).collect();
                uniques = uniques.take(&indexer, &Scalar::Null(NullKind::Null))?;
                counts.push(na_rows as i64);
            }
        }

        Ok(Self {
            labels,
            levels: vec![uniques],
            counts,
            sort_fallback,
            path: KeyPath::Hash,
        })
    }

    /// Dense-bucket fast path for `Int64` keys.
    ///
    /// Declines unless the key span is within [`DENSE_INT_KEY_RANGE_LIMIT`].
    /// The bucket slots live in a bump arena when the runtime admits its
    /// estimated size, and on the heap otherwise.
    fn dense_int64(
        keys: &[i64],
        sort: bool,
        exec: GroupByExecutionOptions,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Option<Self> {
        let (min_key, max_key) = dense_int64_range(keys)?;
        let span = i128::from(max_key) - i128::from(min_key) + 1;
        if span > DENSE_INT_KEY_RANGE_LIMIT {
            return None;
        }
        let bucket_len = usize::try_from(span).ok()?;
        let estimated_bytes = estimate_groupby_intermediate_bytes(keys.len(), bucket_len);
        let use_arena = exec.use_arena
            && policy.decide_arena_admission(estimated_bytes, exec.arena_budget_bytes, ledger)
                == DecisionAction::Allow;
        trace!(bucket_len, estimated_bytes, use_arena, "dense int64 grouping");

        let (dense, path) = if use_arena {
            let arena = Bump::new();
            let mut slots = BumpVec::<i64>::with_capacity_in(bucket_len, &arena);
            slots.resize(bucket_len, -1);
            (
                dense_int64_labels(keys, min_key, sort, &mut slots),
                KeyPath::DenseArena,
            )
        } else {
            let mut slots = vec![-1_i64; bucket_len];
            (dense_int64_labels(keys, min_key, sort, &mut slots), KeyPath::Dense)
        };

        Some(Self {
            labels: dense.labels,
            levels: vec![Array::Int64(dense.uniques)],
            counts: dense.counts,
            sort_fallback: false,
            path,
        })
    }

    /// Group rows by several keys at once; one group per distinct tuple.
    /// With `dropna`, a row missing any component is excluded.
    pub fn composite(
        keys: &[&Array],
        options: GroupingOptions,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Result<Self, GroupByError> {
        let (first, rest) = keys.split_first().ok_or(GroupByError::NoKeys)?;
        let mut combined = Self::new(first, options, policy, ledger)?;
        for key in rest {
            let next = Self::new(key, options, policy, ledger)?;
            combined = combined.cross(&next, options.sort)?;
        }
        Ok(combined)
    }

    fn cross(&self, other: &Self, sort: bool) -> Result<Self, GroupByError> {
        if self.labels.len() != other.labels.len() {
            return Err(GroupByError::LengthMismatch {
                labels: other.labels.len(),
                values: self.labels.len(),
            });
        }
        let width = other.ngroups() as i64;
        let codes = self.labels.iter().zip(&other.labels).map(|(&a, &b)| {
            if a < 0 || b < 0 {
                None
            } else {
                Some(a * width + b)
            }
        });
        let mut table = HashTable::<i64>::with_capacity(self.labels.len());
        let mut out = table.get_labels(codes, NA_SENTINEL);

        if sort {
            let mut order: Vec<usize> = (0..out.uniques.len()).collect();
            order.sort_by_key(|&g| out.uniques[g]);
            let mut rank = vec![0_i64; order.len()];
            for (new, &old) in order.iter().enumerate() {
                rank[old] = new as i64;
            }
            for label in &mut out.labels {
                if *label >= 0 {
                    *label = rank[*label as usize];
                }
            }
            out.first_positions = order.iter().map(|&g| out.first_positions[g]).collect();
            out.counts = order.iter().map(|&g| out.counts[g]).collect();
        }

        let mut levels = Vec::with_capacity(self.levels.len() + other.levels.len());
        for source in [self, other] {
            let representatives: Vec<i64> = out
                .first_positions
                .iter()
                .map(|&row| source.labels[row])
                .collect();
            for level in &source.levels {
                levels.push(level.take(&representatives, &Scalar::Null(NullKind::Null))?);
            }
        }

        Ok(Self {
            labels: out.labels,
            levels,
            counts: out.counts,
            sort_fallback: self.sort_fallback || other.sort_fallback,
            path: KeyPath::Hash,
        })
    }

    #[must_use]
    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    #[must_use]
    pub fn ngroups(&self) -> usize {
        self.counts.len()
    }

    /// Key values of every group, one array per key.
    #[must_use]
    pub fn levels(&self) -> &[Array] {
        &self.levels
    }

    /// Rows in each group.
    #[must_use]
    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    /// Sorted groups were requested but first-seen order was kept.
    #[must_use]
    pub fn sort_fallback(&self) -> bool {
        self.sort_fallback
    }

    #[must_use]
    pub fn path(&self) -> KeyPath {
        self.path
    }

    /// Row axis for per-group results: the group keys for a single key,
    /// positions for a composite key.
    #[must_use]
    pub fn result_index(&self) -> Index {
        match self.levels.as_slice() {
            [level] => level.to_scalars().iter().map(group_label).collect(),
            _ => Index::range(self.ngroups()),
        }
    }
}
