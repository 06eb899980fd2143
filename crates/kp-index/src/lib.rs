#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use kp_types::{ErrorKind, NAT, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A float label with a total order: every NaN is one value, ordered after
/// all numbers, and `-0.0` is `0.0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct FloatLabel(f64);

impl FloatLabel {
    #[must_use]
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            Self(f64::NAN)
        } else if value == 0.0 {
            Self(0.0)
        } else {
            Self(value)
        }
    }

    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<f64> for FloatLabel {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<FloatLabel> for f64 {
    fn from(label: FloatLabel) -> Self {
        label.0
    }
}

impl PartialEq for FloatLabel {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatLabel {}

impl std::hash::Hash for FloatLabel {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for FloatLabel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatLabel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexLabel {
    Int64(i64),
    Utf8(String),
    /// Nanoseconds since the epoch.
    Timestamp(i64),
    Float64(FloatLabel),
    Bool(bool),
}

impl IndexLabel {
    /// Label for a group key or other non-missing scalar; `None` for
    /// missing values.
    #[must_use]
    pub fn from_scalar(value: &Scalar) -> Option<Self> {
        if value.is_missing() {
            return None;
        }
        Some(match value {
            Scalar::Int64(v) => Self::Int64(*v),
            Scalar::Utf8(v) => Self::Utf8(v.clone()),
            Scalar::DateTime64(v) => Self::Timestamp(*v),
            Scalar::Bool(v) => Self::Bool(*v),
            Scalar::Float64(v) => Self::Float64(FloatLabel::new(*v)),
            Scalar::Null(_) => return None,
        })
    }

    #[must_use]
    pub fn to_scalar(&self) -> Scalar {
        match self {
            Self::Int64(v) => Scalar::Int64(*v),
            Self::Utf8(v) => Scalar::Utf8(v.clone()),
            Self::Timestamp(v) => Scalar::DateTime64(*v),
            Self::Float64(v) => Scalar::Float64(v.value()),
            Self::Bool(v) => Scalar::Bool(*v),
        }
    }

    fn same_kind(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl From<i64> for IndexLabel {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for IndexLabel {
    fn from(value: f64) -> Self {
        Self::Float64(FloatLabel::new(value))
    }
}

impl From<&str> for IndexLabel {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for IndexLabel {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl fmt::Display for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
            Self::Timestamp(v) if *v == NAT => write!(f, "NaT"),
            Self::Timestamp(v) => write!(f, "{v}ns"),
            Self::Float64(v) => write!(f, "{}", v.value()),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Detected order of an index's labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    Unsorted,
    /// Same-kind labels, ascending, duplicates allowed.
    NonDecreasing,
    /// Same-kind labels, strictly ascending.
    Increasing,
}

fn detect_sort_order(labels: &[IndexLabel]) -> SortOrder {
    let Some(first) = labels.first() else {
        return SortOrder::Increasing;
    };
    if !labels.iter().all(|l| l.same_kind(first)) {
        return SortOrder::Unsorted;
    }
    let mut strict = true;
    for w in labels.windows(2) {
        match w[0].cmp(&w[1]) {
            std::cmp::Ordering::Less => {}
            std::cmp::Ordering::Equal => strict = false,
            std::cmp::Ordering::Greater => return SortOrder::Unsorted,
        }
    }
    if strict {
        SortOrder::Increasing
    } else {
        SortOrder::NonDecreasing
    }
}

fn build_engine(labels: &[IndexLabel]) -> HashMap<IndexLabel, Vec<usize>> {
    let mut engine = HashMap::<IndexLabel, Vec<usize>>::with_capacity(labels.len());
    for (pos, label) in labels.iter().enumerate() {
        engine.entry(label.clone()).or_default().push(pos);
    }
    engine
}

/// Fill rule for labels absent from the source axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMethod {
    /// Take the nearest preceding label.
    #[serde(alias = "ffill")]
    Pad,
    /// Take the nearest following label.
    #[serde(alias = "bfill")]
    Backfill,
}

impl FromStr for FillMethod {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pad" | "ffill" => Ok(Self::Pad),
            "backfill" | "bfill" => Ok(Self::Backfill),
            other => Err(IndexError::InvalidFillMethod {
                method: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for FillMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pad => "pad",
            Self::Backfill => "backfill",
        })
    }
}

/// Result of [`Index::get_loc`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loc {
    Single(usize),
    Multiple(Vec<usize>),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("label not found: {label}")]
    KeyNotFound { label: String },
    #[error("cannot reindex from a duplicate axis")]
    DuplicateAxis,
    #[error("index must be monotonic increasing for method={method}")]
    NotMonotonic { method: FillMethod },
    #[error("invalid fill method: {method}")]
    InvalidFillMethod { method: String },
    #[error("position {position} is out of bounds for axis of length {len}")]
    OutOfBounds { position: usize, len: usize },
}

impl IndexError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyNotFound { .. } => ErrorKind::Key,
            _ => ErrorKind::Value,
        }
    }
}

/// Ordered, possibly duplicated axis labels.
///
/// Uniqueness, sort order and the label-to-positions engine are computed on
/// first use and cached. Every mutation returns a new `Index`, so the caches
/// never go stale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Index {
    labels: Vec<IndexLabel>,
    #[serde(skip)]
    duplicate_cache: OnceLock<bool>,
    #[serde(skip)]
    sort_order_cache: OnceLock<SortOrder>,
    #[serde(skip)]
    engine: OnceLock<HashMap<IndexLabel, Vec<usize>>>,
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
    }
}

impl Eq for Index {}

impl FromIterator<IndexLabel> for Index {
    fn from_iter<T: IntoIterator<Item = IndexLabel>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Index {
    #[must_use]
    pub fn new(labels: Vec<IndexLabel>) -> Self {
        Self {
            labels,
            duplicate_cache: OnceLock::new(),
            sort_order_cache: OnceLock::new(),
            engine: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn from_i64(values: Vec<i64>) -> Self {
        values.into_iter().map(IndexLabel::from).collect()
    }

    #[must_use]
    pub fn from_utf8<S: Into<String>>(values: Vec<S>) -> Self {
        values
            .into_iter()
            .map(|v| IndexLabel::Utf8(v.into()))
            .collect()
    }

    #[must_use]
    pub fn from_timestamps(values: Vec<i64>) -> Self {
        values.into_iter().map(IndexLabel::Timestamp).collect()
    }

    /// The default `0..n` row axis.
    #[must_use]
    pub fn range(len: usize) -> Self {
        Self::from_range(0, len as i64, 1)
    }

    #[must_use]
    pub fn from_range(start: i64, stop: i64, step: i64) -> Self {
        let mut labels = Vec::new();
        let mut val = start;
        while (step > 0 && val < stop) || (step < 0 && val > stop) {
            labels.push(IndexLabel::Int64(val));
            match val.checked_add(step) {
                Some(next) => val = next,
                None => break,
            }
        }
        Self::new(labels)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[IndexLabel] {
        &self.labels
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<&IndexLabel> {
        self.labels.get(position)
    }

    fn engine(&self) -> &HashMap<IndexLabel, Vec<usize>> {
        self.engine.get_or_init(|| build_engine(&self.labels))
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        *self
            .duplicate_cache
            .get_or_init(|| self.engine().len() != self.labels.len())
    }

    #[must_use]
    pub fn is_unique(&self) -> bool {
        !self.has_duplicates()
    }

    fn sort_order(&self) -> SortOrder {
        *self
            .sort_order_cache
            .get_or_init(|| detect_sort_order(&self.labels))
    }

    /// Ascending with duplicates allowed; labels must share one kind.
    #[must_use]
    pub fn is_monotonic_increasing(&self) -> bool {
        !matches!(self.sort_order(), SortOrder::Unsorted)
    }

    /// Strictly ascending.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        matches!(self.sort_order(), SortOrder::Increasing)
    }

    /// First position of `needle`. Sorted indexes use binary search.
    #[must_use]
    pub fn position(&self, needle: &IndexLabel) -> Option<usize> {
        if self.is_sorted() {
            let first = self.labels.first()?;
            if !first.same_kind(needle) {
                return None;
            }
            return self.labels.binary_search(needle).ok();
        }
        self.engine().get(needle).and_then(|p| p.first().copied())
    }

    #[must_use]
    pub fn contains(&self, label: &IndexLabel) -> bool {
        self.position(label).is_some()
    }

    /// All positions holding `label`.
    pub fn get_loc(&self, label: &IndexLabel) -> Result<Loc, IndexError> {
        match self.engine().get(label).map(Vec::as_slice) {
            Some([single]) => Ok(Loc::Single(*single)),
            Some(positions) if !positions.is_empty() => Ok(Loc::Multiple(positions.to_vec())),
            _ => Err(IndexError::KeyNotFound {
                label: label.to_string(),
            }),
        }
    }

    /// Number of times `label` occurs.
    #[must_use]
    pub fn count(&self, label: &IndexLabel) -> usize {
        self.engine().get(label).map_or(0, Vec::len)
    }

    /// Source position for every target label, `-1` where absent.
    ///
    /// Requires a unique axis. With a fill method the axis must also be
    /// monotonic increasing; absent labels take the nearest preceding
    /// (`Pad`) or following (`Backfill`) source label, at most `limit`
    /// inexact matches per source position.
    pub fn get_indexer(
        &self,
        target: &Index,
        method: Option<FillMethod>,
        limit: Option<usize>,
    ) -> Result<Vec<i64>, IndexError> {
        if self.has_duplicates() {
            return Err(IndexError::DuplicateAxis);
        }
        let Some(method) = method else {
            let engine = self.engine();
            return Ok(target
                .labels
                .iter()
                .map(|label| engine.get(label).map_or(-1, |p| p[0] as i64))
                .collect());
        };
        if !self.is_sorted() {
            return Err(IndexError::NotMonotonic { method });
        }

        let limit = limit.unwrap_or(usize::MAX);
        let mut fills = vec![0_usize; self.labels.len()];
        let kind = self.labels.first();
        let mut indexer = Vec::with_capacity(target.len());
        for label in &target.labels {
            if kind.is_none_or(|k| !k.same_kind(label)) {
                indexer.push(-1);
                continue;
            }
            let pos = match self.labels.binary_search(label) {
                Ok(exact) => {
                    indexer.push(exact as i64);
                    continue;
                }
                Err(insert_at) => match method {
                    FillMethod::Pad => insert_at.checked_sub(1),
                    FillMethod::Backfill => (insert_at < self.labels.len()).then_some(insert_at),
                },
            };
            match pos {
                Some(p) if fills[p] < limit => {
                    fills[p] += 1;
                    indexer.push(p as i64);
                }
                _ => indexer.push(-1),
            }
        }
        Ok(indexer)
    }

    /// Indexer that conforms this axis to `target`.
    ///
    /// A duplicated source axis is accepted only without a fill method and
    /// when every duplicated label occurs in `target` exactly as often as
    /// here; its k-th occurrence in `target` maps to its k-th occurrence in
    /// the source.
    pub fn reindexer(
        &self,
        target: &Index,
        method: Option<FillMethod>,
        limit: Option<usize>,
    ) -> Result<Vec<i64>, IndexError> {
        if self == target {
            return Ok((0..self.len() as i64).collect());
        }
        if self.is_unique() {
            return self.get_indexer(target, method, limit);
        }
        if method.is_some() {
            return Err(IndexError::DuplicateAxis);
        }

        let engine = self.engine();
        let mut seen = HashMap::<&IndexLabel, usize>::new();
        let mut indexer = Vec::with_capacity(target.len());
        for label in &target.labels {
            match engine.get(label) {
                None => indexer.push(-1),
                Some(positions) if positions.len() == 1 => indexer.push(positions[0] as i64),
                Some(positions) => {
                    if target.count(label) != positions.len() {
                        return Err(IndexError::DuplicateAxis);
                    }
                    let k = seen.entry(label).or_insert(0);
                    indexer.push(positions[*k] as i64);
                    *k += 1;
                }
            }
        }
        Ok(indexer)
    }

    pub fn take(&self, positions: &[usize]) -> Result<Self, IndexError> {
        positions
            .iter()
            .map(|&p| {
                self.labels
                    .get(p)
                    .cloned()
                    .ok_or(IndexError::OutOfBounds {
                        position: p,
                        len: self.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> Self {
        let end = start.saturating_add(len).min(self.labels.len());
        let start = start.min(end);
        Self::new(self.labels[start..end].to_vec())
    }

    pub fn insert(&self, loc: usize, label: IndexLabel) -> Result<Self, IndexError> {
        if loc > self.len() {
            return Err(IndexError::OutOfBounds {
                position: loc,
                len: self.len(),
            });
        }
        let mut labels = self.labels.clone();
        labels.insert(loc, label);
        Ok(Self::new(labels))
    }

    pub fn delete(&self, loc: usize) -> Result<Self, IndexError> {
        if loc >= self.len() {
            return Err(IndexError::OutOfBounds {
                position: loc,
                len: self.len(),
            });
        }
        let mut labels = self.labels.clone();
        labels.remove(loc);
        Ok(Self::new(labels))
    }

    #[must_use]
    pub fn append(&self, other: &Self) -> Self {
        self.labels
            .iter()
            .chain(other.labels.iter())
            .cloned()
            .collect()
    }

    /// Labels of `self` that also occur in `other`, first-seen order, no
    /// repeats.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let other_set = other.engine();
        let mut seen = HashMap::<&IndexLabel, ()>::new();
        self.labels
            .iter()
            .filter(|l| other_set.contains_key(*l) && seen.insert(*l, ()).is_none())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn map_labels(&self, f: impl FnMut(&IndexLabel) -> IndexLabel) -> Self {
        self.labels.iter().map(f).collect()
    }
}

#[cfg(test)]
mod tests {
    use kp_types::{NullKind, Scalar};

    use super::{FillMethod, FloatLabel, Index, IndexError, IndexLabel, Loc};

    #[test]
    fn sorted_int64_index_detected() {
        let index = Index::from_i64(vec![1, 2, 3]);
        assert!(index.is_sorted());
        assert!(index.is_monotonic_increasing());
    }

    #[test]
    fn duplicate_int64_is_monotonic_but_not_sorted() {
        let index = Index::from_i64(vec![1, 2, 2, 3]);
        assert!(!index.is_sorted());
        assert!(index.is_monotonic_increasing());
        assert!(index.has_duplicates());
    }

    #[test]
    fn unsorted_utf8_index_detected() {
        let index = Index::from_utf8(vec!["c", "a", "b"]);
        assert!(!index.is_monotonic_increasing());
        assert!(index.is_unique());
    }

    #[test]
    fn mixed_label_types_are_unsorted() {
        let index = Index::new(vec![IndexLabel::Int64(1), IndexLabel::Utf8("a".into())]);
        assert!(!index.is_monotonic_increasing());
    }

    #[test]
    fn empty_index_is_sorted() {
        assert!(Index::new(vec![]).is_sorted());
    }

    #[test]
    fn binary_search_position_sorted_int64() {
        let index = Index::from_i64(vec![10, 20, 30, 40, 50]);
        assert_eq!(index.position(&IndexLabel::Int64(10)), Some(0));
        assert_eq!(index.position(&IndexLabel::Int64(50)), Some(4));
        assert_eq!(index.position(&IndexLabel::Int64(25)), None);
        assert_eq!(index.position(&IndexLabel::Utf8("10".into())), None);
    }

    #[test]
    fn linear_fallback_for_unsorted_index() {
        let index = Index::from_i64(vec![30, 10, 20, 10]);
        assert_eq!(index.position(&IndexLabel::Int64(10)), Some(1));
        assert_eq!(index.position(&IndexLabel::Int64(99)), None);
    }

    #[test]
    fn get_loc_single_and_multiple() {
        let index = Index::from_utf8(vec!["a", "b", "a"]);
        assert_eq!(index.get_loc(&"b".into()), Ok(Loc::Single(1)));
        assert_eq!(index.get_loc(&"a".into()), Ok(Loc::Multiple(vec![0, 2])));
        let err = index.get_loc(&"z".into()).expect_err("absent");
        assert_eq!(err.kind(), kp_types::ErrorKind::Key);
    }

    #[test]
    fn exact_indexer_marks_missing() {
        let index = Index::from_i64(vec![0, 1, 2]);
        let target = Index::from_i64(vec![0, 5, 1]);
        assert_eq!(
            index.get_indexer(&target, None, None).expect("indexer"),
            vec![0, -1, 1]
        );
    }

    #[test]
    fn pad_and_backfill_indexers() {
        let index = Index::from_i64(vec![0, 10, 20]);
        let target = Index::from_i64(vec![-5, 0, 5, 15, 25]);
        assert_eq!(
            index
                .get_indexer(&target, Some(FillMethod::Pad), None)
                .expect("pad"),
            vec![-1, 0, 0, 1, 2]
        );
        assert_eq!(
            index
                .get_indexer(&target, Some(FillMethod::Backfill), None)
                .expect("backfill"),
            vec![0, 0, 1, 2, -1]
        );
    }

    #[test]
    fn pad_limit_caps_inexact_fills() {
        let index = Index::from_i64(vec![0, 10]);
        let target = Index::from_i64(vec![0, 1, 2, 3, 10, 11]);
        assert_eq!(
            index
                .get_indexer(&target, Some(FillMethod::Pad), Some(2))
                .expect("pad"),
            vec![0, 0, 0, -1, 1, 1]
        );
    }

    #[test]
    fn fill_method_requires_monotonic_axis() {
        let index = Index::from_i64(vec![2, 1]);
        let err = index
            .get_indexer(&Index::from_i64(vec![1]), Some(FillMethod::Pad), None)
            .expect_err("unsorted");
        assert_eq!(
            err,
            IndexError::NotMonotonic {
                method: FillMethod::Pad
            }
        );
    }

    #[test]
    fn identical_duplicate_axis_reindexes_to_identity() {
        let index = Index::from_utf8(vec!["a", "a", "b"]);
        assert_eq!(
            index.reindexer(&index.clone(), None, None).expect("identity"),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn duplicate_axis_with_aligned_multiplicity() {
        let index = Index::from_utf8(vec!["a", "b", "a"]);
        let target = Index::from_utf8(vec!["b", "a", "c", "a"]);
        assert_eq!(
            index.reindexer(&target, None, None).expect("aligned"),
            vec![1, 0, -1, 2]
        );
    }

    #[test]
    fn duplicate_axis_with_misaligned_multiplicity_fails() {
        let index = Index::from_utf8(vec!["a", "a"]);
        let target = Index::from_utf8(vec!["a"]);
        let err = index.reindexer(&target, None, None).expect_err("misaligned");
        assert_eq!(err, IndexError::DuplicateAxis);
        assert_eq!(err.to_string(), "cannot reindex from a duplicate axis");
    }

    #[test]
    fn fill_method_parses_aliases() {
        assert_eq!("ffill".parse::<FillMethod>(), Ok(FillMethod::Pad));
        assert_eq!("bfill".parse::<FillMethod>(), Ok(FillMethod::Backfill));
        assert!("nearest".parse::<FillMethod>().is_err());
        let method: FillMethod = serde_json::from_str(r#""ffill""#).expect("alias");
        assert_eq!(method, FillMethod::Pad);
    }

    #[test]
    fn insert_delete_and_bounds() {
        let index = Index::from_i64(vec![1, 3]);
        let inserted = index.insert(1, IndexLabel::Int64(2)).expect("insert");
        assert_eq!(inserted, Index::from_i64(vec![1, 2, 3]));
        assert!(inserted.is_sorted());
        assert!(index.insert(5, IndexLabel::Int64(9)).is_err());
        assert_eq!(inserted.delete(0).expect("delete"), Index::from_i64(vec![2, 3]));
        assert!(index.take(&[0, 2]).is_err());
    }

    #[test]
    fn intersection_keeps_left_order() {
        let left = Index::from_utf8(vec!["c", "a", "b", "a"]);
        let right = Index::from_utf8(vec!["a", "c"]);
        assert_eq!(left.intersection(&right), Index::from_utf8(vec!["c", "a"]));
    }

    #[test]
    fn labels_from_scalars() {
        assert_eq!(
            IndexLabel::from_scalar(&Scalar::DateTime64(5)),
            Some(IndexLabel::Timestamp(5))
        );
        assert_eq!(IndexLabel::from_scalar(&Scalar::Null(NullKind::NaN)), None);
        assert_eq!(IndexLabel::Timestamp(7).to_scalar(), Scalar::DateTime64(7));
        assert_eq!(
            IndexLabel::from_scalar(&Scalar::Float64(2.5)),
            Some(IndexLabel::from(2.5))
        );
        assert_eq!(
            IndexLabel::from_scalar(&Scalar::Bool(true)),
            Some(IndexLabel::Bool(true))
        );
        assert_eq!(IndexLabel::from(1.0).to_scalar(), Scalar::Float64(1.0));
    }

    #[test]
    fn float_labels_order_numerically() {
        let index: Index = [10.0, 9.0, 1.0, 2.5]
            .into_iter()
            .map(IndexLabel::from)
            .collect();
        assert!(!index.is_monotonic_increasing());
        let sorted: Index = [1.0, 2.5, 9.0, 10.0]
            .into_iter()
            .map(IndexLabel::from)
            .collect();
        assert!(sorted.is_monotonic_increasing());
        assert_eq!(sorted.position(&IndexLabel::from(9.0)), Some(2));

        let target: Index = [2.0, 12.0].into_iter().map(IndexLabel::from).collect();
        assert_eq!(
            sorted.get_indexer(&target, Some(FillMethod::Pad), None).expect("pad"),
            vec![0, 3]
        );
    }

    #[test]
    fn float_label_normalizes_zero_and_nan() {
        assert_eq!(FloatLabel::new(-0.0), FloatLabel::new(0.0));
        assert_eq!(FloatLabel::new(f64::NAN), FloatLabel::new(-f64::NAN));
        assert!(FloatLabel::new(f64::NAN) > FloatLabel::new(f64::INFINITY));
        let json = serde_json::to_string(&IndexLabel::from(1.5)).expect("serialize");
        assert_eq!(json, r#"{"kind":"float64","value":1.5}"#);
        let back: IndexLabel = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, IndexLabel::from(1.5));
    }

    #[test]
    fn range_stops_before_overflow() {
        let index = Index::from_range(i64::MAX - 2, i64::MAX, 5);
        assert_eq!(index.labels(), &[IndexLabel::Int64(i64::MAX - 2)]);
        let down = Index::from_range(i64::MIN + 1, i64::MIN, -3);
        assert_eq!(down.labels(), &[IndexLabel::Int64(i64::MIN + 1)]);
        assert!(Index::from_range(0, 10, 0).is_empty());
    }

    #[test]
    fn index_serde_skips_caches() {
        let index = Index::from_i64(vec![1, 1]);
        assert!(index.has_duplicates());
        let json = serde_json::to_string(&index).expect("serialize");
        let back: Index = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, index);
        assert!(back.has_duplicates());
    }
}
