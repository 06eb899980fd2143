#![forbid(unsafe_code)]

use std::cmp::Ordering;

use kp_columnar::{Array, CategoricalArray, ColumnError};
use kp_runtime::{DecisionAction, EvidenceLedger, RuntimePolicy};
use kp_types::{ErrorKind, NAT, NullKind, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Label given to missing values unless a caller picks another one.
pub const NA_SENTINEL: i64 = -1;

const MIN_CAPACITY: usize = 8;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AlgoError {
    #[error("'<' not supported between the unique values: {detail}")]
    Unsortable { detail: String },
    #[error("na_sentinel must be negative, got {value}")]
    InvalidSentinel { value: i64 },
    #[error(transparent)]
    Column(#[from] ColumnError),
}

impl AlgoError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsortable { .. } => ErrorKind::Type,
            Self::InvalidSentinel { .. } => ErrorKind::Value,
            Self::Column(err) => err.kind(),
        }
    }
}

/// SplitMix64 finalizer; good avalanche for integer keys.
fn mix64(value: u64, seed: u64) -> u64 {
    let mut h = value.wrapping_add(seed);
    h = (h ^ (h >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    h ^ (h >> 31)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = 0xcbf2_9ce4_8422_2325_u64;
    for b in bytes {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

/// A normalized key that can live in a [`HashTable`].
pub trait TableKey: Copy + Eq {
    fn hash_key(&self) -> u64;
}

impl TableKey for i64 {
    fn hash_key(&self) -> u64 {
        mix64(*self as u64, 0)
    }
}

/// Float key hashed by bit pattern. NaN never becomes a key, and `-0.0` is
/// folded onto `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatKey(u64);

impl FloatKey {
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_nan() {
            return None;
        }
        let value = if value == 0.0 { 0.0 } else { value };
        Some(Self(value.to_bits()))
    }

    #[must_use]
    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl TableKey for FloatKey {
    fn hash_key(&self) -> u64 {
        mix64(self.0, 0x5851_f42d_4c95_7f2d)
    }
}

/// Normalized view of a boxed value.
///
/// Integral floats are keyed as integers so that `1` and `1.0` land on the
/// same label, matching [`Scalar::semantic_eq`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKey<'a> {
    Bool(bool),
    Int64(i64),
    FloatBits(u64),
    Utf8(&'a str),
    DateTime64(i64),
}

impl<'a> ObjectKey<'a> {
    /// `None` for every missing marker.
    #[must_use]
    pub fn from_scalar(value: &'a Scalar) -> Option<Self> {
        if value.is_missing() {
            return None;
        }
        Some(match value {
            Scalar::Bool(v) => Self::Bool(*v),
            Scalar::Int64(v) => Self::Int64(*v),
            Scalar::Float64(v) => {
                if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
                    Self::Int64(*v as i64)
                } else {
                    Self::FloatBits(v.to_bits())
                }
            }
            Scalar::Utf8(v) => Self::Utf8(v.as_str()),
            Scalar::DateTime64(v) => Self::DateTime64(*v),
            Scalar::Null(_) => return None,
        })
    }
}

impl TableKey for ObjectKey<'_> {
    fn hash_key(&self) -> u64 {
        match self {
            Self::Bool(v) => mix64(u64::from(*v), 1),
            Self::Int64(v) => mix64(*v as u64, 2),
            Self::FloatBits(v) => mix64(*v, 3),
            Self::Utf8(v) => mix64(fnv1a(v.as_bytes()), 4),
            Self::DateTime64(v) => mix64(*v as u64, 5),
        }
    }
}

/// Result of labelling a key sequence against a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLabels<K> {
    pub labels: Vec<i64>,
    pub uniques: Vec<K>,
    /// Position of the first occurrence of every unique.
    pub first_positions: Vec<usize>,
    pub counts: Vec<i64>,
}

/// Open-addressing table with linear probing.
///
/// Capacity is a power of two and the load factor never exceeds one half, so
/// every scan from a home slot reaches an empty one.
#[derive(Debug, Clone)]
pub struct HashTable<K> {
    slots: Vec<Option<(K, i64)>>,
    len: usize,
}

impl<K: TableKey> Default for HashTable<K> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<K: TableKey> HashTable<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(size_hint: usize) -> Self {
        let capacity = size_hint
            .saturating_mul(2)
            .max(MIN_CAPACITY)
            .next_power_of_two();
        Self {
            slots: vec![None; capacity],
            len: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// `Ok(slot)` holding `key`, or `Err(slot)` where it would be inserted.
    fn find(&self, key: &K) -> Result<usize, usize> {
        let mask = self.slots.len() - 1;
        let mut idx = (key.hash_key() as usize) & mask;
        loop {
            match &self.slots[idx] {
                None => return Err(idx),
                Some((k, _)) if k == key => return Ok(idx),
                Some(_) => idx = (idx + 1) & mask,
            }
        }
    }

    fn reserve_one(&mut self) {
        if (self.len + 1) * 2 <= self.slots.len() {
            return;
        }
        let grown = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, vec![None; grown]);
        for (key, value) in old.into_iter().flatten() {
            if let Err(idx) = self.find(&key) {
                self.slots[idx] = Some((key, value));
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<i64> {
        let idx = self.find(key).ok()?;
        self.slots[idx].map(|(_, value)| value)
    }

    /// Value stored for `key`, inserting the next label on first sight.
    /// The flag is `true` when the key was new.
    pub fn get_or_insert(&mut self, key: K) -> (i64, bool) {
        if let Some(value) = self.get(&key) {
            return (value, false);
        }
        let label = self.len as i64;
        self.insert_new(key, label);
        (label, true)
    }

    /// Insert or overwrite.
    pub fn set(&mut self, key: K, value: i64) {
        match self.find(&key) {
            Ok(idx) => self.slots[idx] = Some((key, value)),
            Err(_) => self.insert_new(key, value),
        }
    }

    fn insert_new(&mut self, key: K, value: i64) {
        self.reserve_one();
        match self.find(&key) {
            Ok(idx) | Err(idx) => self.slots[idx] = Some((key, value)),
        }
        self.len += 1;
    }

    /// Map each key to its position; later duplicates overwrite earlier ones.
    pub fn map_locations<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = Option<K>>,
    {
        for (pos, key) in keys.into_iter().enumerate() {
            if let Some(key) = key {
                self.set(key, pos as i64);
            }
        }
    }

    /// Stored value per key, or `na_sentinel` when absent or missing.
    pub fn lookup<I>(&self, keys: I, na_sentinel: i64) -> Vec<i64>
    where
        I: IntoIterator<Item = Option<K>>,
    {
        keys.into_iter()
            .map(|key| key.and_then(|k| self.get(&k)).unwrap_or(na_sentinel))
            .collect()
    }

    /// Distinct keys in first-occurrence order.
    pub fn unique<I>(&mut self, keys: I) -> Vec<K>
    where
        I: IntoIterator<Item = Option<K>>,
    {
        let mut uniques = Vec::new();
        for key in keys.into_iter().flatten() {
            if self.get_or_insert(key).1 {
                uniques.push(key);
            }
        }
        uniques
    }

    /// Label every key with its first-occurrence rank. Missing keys get
    /// `na_sentinel` and are not counted.
    pub fn get_labels<I>(&mut self, keys: I, na_sentinel: i64) -> KeyLabels<K>
    where
        I: IntoIterator<Item = Option<K>>,
    {
        let keys = keys.into_iter();
        let mut out = KeyLabels {
            labels: Vec::with_capacity(keys.size_hint().0),
            uniques: Vec::new(),
            first_positions: Vec::new(),
            counts: Vec::new(),
        };
        for (pos, key) in keys.enumerate() {
            let Some(key) = key else {
                out.labels.push(na_sentinel);
                continue;
            };
            let (label, fresh) = self.get_or_insert(key);
            if fresh {
                out.uniques.push(key);
                out.first_positions.push(pos);
                out.counts.push(0);
            }
            out.counts[label as usize] += 1;
            out.labels.push(label);
        }
        out
    }
}

fn int_keys(values: &[i64], na: Option<i64>) -> impl Iterator<Item = Option<i64>> + '_ {
    values
        .iter()
        .map(move |v| if Some(*v) == na { None } else { Some(*v) })
}

/// Labels plus first positions for any array, dispatched on dtype.
fn label_array(values: &Array, na_sentinel: i64) -> (Vec<i64>, Vec<usize>, Vec<i64>) {
    fn parts<K>(out: KeyLabels<K>) -> (Vec<i64>, Vec<usize>, Vec<i64>) {
        (out.labels, out.first_positions, out.counts)
    }
    let n = values.len();
    match values {
        Array::Int64(v) => parts(HashTable::with_capacity(n).get_labels(int_keys(v, None), na_sentinel)),
        Array::DateTime64(v) => {
            parts(HashTable::with_capacity(n).get_labels(int_keys(v, Some(NAT)), na_sentinel))
        }
        Array::Float64(v) => parts(
            HashTable::with_capacity(n).get_labels(v.iter().map(|f| FloatKey::new(*f)), na_sentinel),
        ),
        Array::Bool(v) => parts(
            HashTable::with_capacity(n)
                .get_labels(v.iter().map(|b| Some(ObjectKey::Bool(*b))), na_sentinel),
        ),
        Array::Object(v) => parts(
            HashTable::with_capacity(n).get_labels(v.iter().map(ObjectKey::from_scalar), na_sentinel),
        ),
        Array::Categorical(c) => parts(
            HashTable::with_capacity(c.categories().len())
                .get_labels(int_keys(c.codes(), Some(-1)), na_sentinel),
        ),
    }
}

/// Ascending order of a set of distinct non-missing values, or `None` when
/// they have no common ordering.
fn sort_permutation(uniques: &Array) -> Option<Vec<usize>> {
    let mut order: Vec<usize> = (0..uniques.len()).collect();
    match uniques {
        Array::Int64(v) | Array::DateTime64(v) => order.sort_by_key(|&i| v[i]),
        Array::Float64(v) => order.sort_by(|&a, &b| v[a].total_cmp(&v[b])),
        Array::Bool(v) => order.sort_by_key(|&i| v[i]),
        Array::Categorical(c) => order.sort_by_key(|&i| c.codes()[i]),
        Array::Object(v) => {
            let mut class = None;
            for value in v {
                let this = order_class(value)?;
                if *class.get_or_insert(this) != this {
                    return None;
                }
            }
            order.sort_by(|&a, &b| v[a].try_cmp(&v[b]).unwrap_or(Ordering::Equal));
        }
    }
    Some(order)
}

/// Values in the same class are totally ordered by [`Scalar::try_cmp`].
fn order_class(value: &Scalar) -> Option<u8> {
    match value {
        Scalar::Int64(_) | Scalar::Float64(_) => Some(0),
        Scalar::Utf8(_) => Some(1),
        Scalar::DateTime64(_) => Some(2),
        Scalar::Bool(_) => Some(3),
        Scalar::Null(_) => None,
    }
}

fn describe_kinds(uniques: &Array) -> String {
    let mut kinds: Vec<&'static str> = uniques
        .to_scalars()
        .iter()
        .map(|value| match value {
            Scalar::Bool(_) => "bool",
            Scalar::Int64(_) | Scalar::Float64(_) => "number",
            Scalar::Utf8(_) => "str",
            Scalar::DateTime64(_) => "datetime",
            Scalar::Null(_) => "null",
        })
        .collect();
    kinds.sort_unstable();
    kinds.dedup();
    kinds.join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorizeOptions {
    pub sort: bool,
    pub na_sentinel: i64,
}

impl Default for FactorizeOptions {
    fn default() -> Self {
        Self {
            sort: false,
            na_sentinel: NA_SENTINEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Factorized {
    /// One label per input row; missing rows carry the sentinel.
    pub labels: Vec<i64>,
    pub uniques: Array,
    /// Occurrences of each unique, aligned with `uniques`.
    pub counts: Vec<i64>,
    /// Sorted output was requested but the uniques are kept in first-seen
    /// order because they cannot be compared.
    pub sort_fallback: bool,
}

impl Factorized {
    #[must_use]
    pub fn ngroups(&self) -> usize {
        self.uniques.len()
    }
}

/// Encode `values` as integer labels into a table of distinct values.
///
/// Every missing value maps to `options.na_sentinel` and never appears in
/// `uniques`. With `options.sort` the uniques are sorted and labels remapped;
/// when the uniques cannot be ordered the policy decides between an error and
/// keeping first-seen order.
pub fn factorize(
    values: &Array,
    options: FactorizeOptions,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> Result<Factorized, AlgoError> {
    if options.na_sentinel >= 0 {
        return Err(AlgoError::InvalidSentinel {
            value: options.na_sentinel,
        });
    }
    debug!(
        len = values.len(),
        dtype = %values.dtype(),
        sort = options.sort,
        "factorize"
    );

    let (mut labels, first_positions, mut counts) = label_array(values, options.na_sentinel);
    let first: Vec<i64> = first_positions.iter().map(|p| *p as i64).collect();
    let mut uniques = values.take(&first, &Scalar::Null(NullKind::Null))?;

    let mut sort_fallback = false;
    if options.sort && uniques.len() > 1 {
        match sort_permutation(&uniques) {
            Some(order) => {
                let mut reverse = vec![0_i64; order.len()];
                for (new, &old) in order.iter().enumerate() {
                    reverse[old] = new as i64;
                }
                for label in &mut labels {
                    if *label >= 0 {
                        *label = reverse[*label as usize];
                    }
                }
                let indexer: Vec<i64> = order.iter().map(|p| *p as i64).collect();
                uniques = uniques.take(&indexer, &Scalar::Null(NullKind::Null))?;
                counts = order.iter().map(|&old| counts[old]).collect();
            }
            None => {
                let detail = describe_kinds(&uniques);
                match policy.decide_unsortable_keys("factorize", detail.clone(), ledger) {
                    DecisionAction::Reject => return Err(AlgoError::Unsortable { detail }),
                    _ => sort_fallback = true,
                }
            }
        }
    }

    Ok(Factorized {
        labels,
        uniques,
        counts,
        sort_fallback,
    })
}

/// Distinct non-missing values in first-occurrence order.
pub fn unique(values: &Array) -> Result<Array, AlgoError> {
    let (_, first_positions, _) = label_array(values, NA_SENTINEL);
    let first: Vec<i64> = first_positions.iter().map(|p| *p as i64).collect();
    Ok(values.take(&first, &Scalar::Null(NullKind::Null))?)
}

/// For each element of `values`, its position in `to_match`, or
/// `na_sentinel` when absent or missing. Duplicates in `to_match` resolve to
/// their last position.
#[must_use]
pub fn match_values(to_match: &Array, values: &Array, na_sentinel: i64) -> Vec<i64> {
    match (to_match, values) {
        (Array::Int64(left), Array::Int64(right))
        | (Array::DateTime64(left), Array::DateTime64(right)) => {
            let na = (to_match.dtype() == kp_types::DType::DateTime64).then_some(NAT);
            let mut table = HashTable::with_capacity(left.len());
            table.map_locations(int_keys(left, na));
            table.lookup(int_keys(right, na), na_sentinel)
        }
        (Array::Float64(left), Array::Float64(right)) => {
            let mut table = HashTable::with_capacity(left.len());
            table.map_locations(left.iter().map(|v| FloatKey::new(*v)));
            table.lookup(right.iter().map(|v| FloatKey::new(*v)), na_sentinel)
        }
        _ => {
            let left = to_match.to_scalars();
            let right = values.to_scalars();
            let mut table = HashTable::with_capacity(left.len());
            table.map_locations(left.iter().map(ObjectKey::from_scalar));
            table.lookup(right.iter().map(ObjectKey::from_scalar), na_sentinel)
        }
    }
}

/// Counts of each distinct non-missing value.
///
/// With `sort` the result is ordered by count, descending unless `ascending`;
/// ties keep first-seen order. Without `sort` the order is first-seen.
pub fn value_counts(values: &Array, sort: bool, ascending: bool) -> Result<(Array, Vec<i64>), AlgoError> {
    let (_, first_positions, counts) = label_array(values, NA_SENTINEL);
    let mut order: Vec<usize> = (0..counts.len()).collect();
    if sort {
        if ascending {
            order.sort_by_key(|&i| counts[i]);
        } else {
            order.sort_by_key(|&i| std::cmp::Reverse(counts[i]));
        }
    }
    let indexer: Vec<i64> = order.iter().map(|&i| first_positions[i] as i64).collect();
    let uniques = values.take(&indexer, &Scalar::Null(NullKind::Null))?;
    Ok((uniques, order.iter().map(|&i| counts[i]).collect()))
}

/// Running occurrence number of each row within its key; missing keys get
/// the sentinel.
#[must_use]
pub fn group_position(keys: &Array) -> Vec<i64> {
    let (labels, _, counts) = label_array(keys, NA_SENTINEL);
    let mut seen = vec![0_i64; counts.len()];
    labels
        .iter()
        .map(|&label| {
            if label < 0 {
                return NA_SENTINEL;
            }
            let slot = &mut seen[label as usize];
            let pos = *slot;
            *slot += 1;
            pos
        })
        .collect()
}

/// Build a categorical whose categories are the distinct values, sorted when
/// requested and possible.
pub fn to_categorical(
    values: &Array,
    sort: bool,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> Result<CategoricalArray, AlgoError> {
    if let Array::Categorical(c) = values {
        return Ok(c.clone());
    }
    let factorized = factorize(
        values,
        FactorizeOptions {
            sort,
            na_sentinel: NA_SENTINEL,
        },
        policy,
        ledger,
    )?;
    let ordered = sort && !factorized.sort_fallback;
    Ok(CategoricalArray::new(
        factorized.labels,
        factorized.uniques.to_scalars(),
        ordered,
    )?)
}

/// How tied values share ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMethod {
    /// Mean of the positions the ties occupy.
    #[default]
    Average,
    Min,
    Max,
    /// Ties ranked in the order they appear.
    First,
}

/// Where missing values land in a ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NaOption {
    /// Missing values get a NaN rank.
    #[default]
    Keep,
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankOptions {
    pub method: RankMethod,
    pub na_option: NaOption,
    pub ascending: bool,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            method: RankMethod::Average,
            na_option: NaOption::Keep,
            ascending: true,
        }
    }
}

/// Order of two non-missing rows of one column.
fn row_cmp(values: &Array, a: usize, b: usize) -> Ordering {
    match values {
        Array::Int64(v) | Array::DateTime64(v) => v[a].cmp(&v[b]),
        Array::Float64(v) => v[a].partial_cmp(&v[b]).unwrap_or(Ordering::Equal),
        Array::Bool(v) => v[a].cmp(&v[b]),
        Array::Categorical(c) => c.codes()[a].cmp(&c.codes()[b]),
        Array::Object(v) => v[a].try_cmp(&v[b]).unwrap_or(Ordering::Equal),
    }
}

fn assign_tied(ranks: &mut [f64], rows: &[usize], before: usize, method: RankMethod) {
    let n = rows.len();
    for (k, &row) in rows.iter().enumerate() {
        ranks[row] = match method {
            RankMethod::Average => before as f64 + (n as f64 + 1.0) / 2.0,
            RankMethod::Min => (before + 1) as f64,
            RankMethod::Max => (before + n) as f64,
            RankMethod::First => (before + k + 1) as f64,
        };
    }
}

/// One-based rank of every row.
///
/// Missing rows rank as one tied group placed by `options.na_option`, or get
/// NaN under [`NaOption::Keep`]. Object columns must hold values of a single
/// comparable kind.
pub fn rank(values: &Array, options: RankOptions) -> Result<Vec<f64>, AlgoError> {
    debug!(len = values.len(), method = ?options.method, "rank");
    let missing = values.isna();
    if let Array::Object(v) = values {
        let mut class = None;
        for value in v.iter().filter(|value| !value.is_missing()) {
            let this = order_class(value);
            if *class.get_or_insert(this) != this {
                return Err(AlgoError::Unsortable {
                    detail: describe_kinds(values),
                });
            }
        }
    }

    let (na_rows, mut order): (Vec<usize>, Vec<usize>) = (0..values.len()).partition(|&i| missing[i]);
    order.sort_by(|&a, &b| {
        let ord = row_cmp(values, a, b);
        if options.ascending { ord } else { ord.reverse() }
    });

    let mut ranks = vec![f64::NAN; values.len()];
    let mut before = 0;
    if options.na_option == NaOption::Top {
        assign_tied(&mut ranks, &na_rows, 0, options.method);
        before = na_rows.len();
    }
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && row_cmp(values, order[start], order[end]) == Ordering::Equal {
            end += 1;
        }
        assign_tied(&mut ranks, &order[start..end], before + start, options.method);
        start = end;
    }
    if options.na_option == NaOption::Bottom {
        assign_tied(&mut ranks, &na_rows, order.len(), options.method);
    }
    Ok(ranks)
}

#[cfg(test)]
mod tests {
    use kp_columnar::{Array, CategoricalArray};
    use kp_runtime::{EvidenceLedger, RuntimePolicy};
    use kp_types::{NAT, NullKind, Scalar};

    use super::{
        AlgoError, FactorizeOptions, FloatKey, HashTable, NaOption, ObjectKey, RankMethod,
        RankOptions, factorize, group_position, match_values, rank, to_categorical, unique,
        value_counts,
    };

    fn strs(values: &[Option<&str>]) -> Array {
        Array::Object(
            values
                .iter()
                .map(|v| v.map_or(Scalar::Null(NullKind::Null), Scalar::from))
                .collect(),
        )
    }

    fn sorted() -> FactorizeOptions {
        FactorizeOptions {
            sort: true,
            ..FactorizeOptions::default()
        }
    }

    #[test]
    fn table_grows_and_keeps_labels() {
        let mut table = HashTable::<i64>::with_capacity(1);
        for key in 0..100 {
            assert_eq!(table.get_or_insert(key * 7), (key, true));
        }
        assert_eq!(table.len(), 100);
        assert!(table.capacity() >= 200);
        assert!(table.capacity().is_power_of_two());
        assert_eq!(table.get_or_insert(21), (3, false));
        assert_eq!(table.get(&22), None);
    }

    #[test]
    fn map_locations_keeps_last_position() {
        let mut table = HashTable::<i64>::new();
        table.map_locations([Some(5), Some(6), Some(5), None]);
        assert_eq!(table.lookup([Some(5), Some(6), Some(9), None], -1), vec![2, 1, -1, -1]);
    }

    #[test]
    fn float_keys_normalize_zero_and_reject_nan() {
        assert_eq!(FloatKey::new(-0.0), FloatKey::new(0.0));
        assert!(FloatKey::new(f64::NAN).is_none());
        assert_eq!(FloatKey::new(2.5).map(FloatKey::value), Some(2.5));
    }

    #[test]
    fn object_keys_fold_integral_floats() {
        let one = Scalar::Int64(1);
        let one_f = Scalar::Float64(1.0);
        assert_eq!(ObjectKey::from_scalar(&one), ObjectKey::from_scalar(&one_f));
        assert!(ObjectKey::from_scalar(&Scalar::DateTime64(NAT)).is_none());
    }

    #[test]
    fn factorize_strings_in_first_seen_order() {
        let values = strs(&[Some("b"), Some("a"), Some("a"), None, Some("c")]);
        let out = factorize(
            &values,
            FactorizeOptions::default(),
            &RuntimePolicy::strict(),
            &mut EvidenceLedger::new(),
        )
        .expect("factorize");
        assert_eq!(out.labels, vec![0, 1, 1, -1, 2]);
        assert_eq!(out.uniques, strs(&[Some("b"), Some("a"), Some("c")]));
        assert_eq!(out.counts, vec![1, 2, 1]);
        assert!(!out.sort_fallback);
    }

    #[test]
    fn factorize_sorted_strings() {
        let values = strs(&[Some("b"), Some("a"), Some("a"), None, Some("c")]);
        let out = factorize(&values, sorted(), &RuntimePolicy::strict(), &mut EvidenceLedger::new())
            .expect("factorize");
        assert_eq!(out.labels, vec![1, 0, 0, -1, 2]);
        assert_eq!(out.uniques, strs(&[Some("a"), Some("b"), Some("c")]));
        assert_eq!(out.counts, vec![2, 1, 1]);
    }

    #[test]
    fn factorize_sorted_ints() {
        let out = factorize(
            &Array::Int64(vec![3, 1, 2, 1]),
            sorted(),
            &RuntimePolicy::strict(),
            &mut EvidenceLedger::new(),
        )
        .expect("factorize");
        assert_eq!(out.labels, vec![2, 0, 1, 0]);
        assert_eq!(out.uniques, Array::Int64(vec![1, 2, 3]));
        assert_eq!(out.counts, vec![2, 1, 1]);
    }

    #[test]
    fn factorize_floats_collapses_nan_and_signed_zero() {
        let out = factorize(
            &Array::Float64(vec![f64::NAN, -0.0, 0.0, 1.5, f64::NAN]),
            FactorizeOptions::default(),
            &RuntimePolicy::strict(),
            &mut EvidenceLedger::new(),
        )
        .expect("factorize");
        assert_eq!(out.labels, vec![-1, 0, 0, 1, -1]);
        assert_eq!(out.ngroups(), 2);
    }

    #[test]
    fn factorize_datetimes_treats_nat_as_missing() {
        let out = factorize(
            &Array::DateTime64(vec![10, NAT, 10, 5]),
            sorted(),
            &RuntimePolicy::strict(),
            &mut EvidenceLedger::new(),
        )
        .expect("factorize");
        assert_eq!(out.labels, vec![1, -1, 1, 0]);
        assert_eq!(out.uniques, Array::DateTime64(vec![5, 10]));
    }

    #[test]
    fn factorize_preserves_custom_sentinel() {
        let out = factorize(
            &strs(&[None, Some("x")]),
            FactorizeOptions {
                sort: true,
                na_sentinel: -7,
            },
            &RuntimePolicy::strict(),
            &mut EvidenceLedger::new(),
        )
        .expect("factorize");
        assert_eq!(out.labels, vec![-7, 0]);
    }

    #[test]
    fn non_negative_sentinel_is_rejected() {
        let err = factorize(
            &Array::Int64(vec![1]),
            FactorizeOptions {
                sort: false,
                na_sentinel: 0,
            },
            &RuntimePolicy::strict(),
            &mut EvidenceLedger::new(),
        )
        .expect_err("must fail");
        assert_eq!(err, AlgoError::InvalidSentinel { value: 0 });
    }

    #[test]
    fn mixed_kinds_with_sort_fail_under_strict_policy() {
        let values = Array::Object(vec![Scalar::from("a"), Scalar::Int64(1)]);
        let mut ledger = EvidenceLedger::new();
        let err = factorize(&values, sorted(), &RuntimePolicy::strict(), &mut ledger)
            .expect_err("must fail");
        assert!(matches!(err, AlgoError::Unsortable { .. }));
        assert_eq!(err.kind(), kp_types::ErrorKind::Type);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn bools_and_numbers_do_not_sort_together() {
        let values = Array::Object(vec![Scalar::Bool(true), Scalar::Int64(1), Scalar::Int64(0)]);
        let mut ledger = EvidenceLedger::new();
        let err = factorize(&values, sorted(), &RuntimePolicy::strict(), &mut ledger)
            .expect_err("bool mixed with ints");
        assert!(matches!(err, AlgoError::Unsortable { .. }));

        let bools = Array::Object(vec![Scalar::Bool(true), Scalar::Bool(false)]);
        let out = factorize(&bools, sorted(), &RuntimePolicy::strict(), &mut ledger)
            .expect("bools alone sort");
        assert_eq!(out.labels, vec![1, 0]);
    }

    #[test]
    fn mixed_kinds_with_sort_fall_back_under_hardened_policy() {
        let values = Array::Object(vec![Scalar::from("a"), Scalar::Int64(1), Scalar::from("a")]);
        let mut ledger = EvidenceLedger::new();
        let out = factorize(&values, sorted(), &RuntimePolicy::hardened(), &mut ledger)
            .expect("factorize");
        assert!(out.sort_fallback);
        assert_eq!(out.labels, vec![0, 1, 0]);
        assert_eq!(ledger.repairs().count(), 1);
    }

    #[test]
    fn factorize_categorical_carries_categories() {
        let cat = CategoricalArray::new(
            vec![1, -1, 0, 1],
            vec![Scalar::from("lo"), Scalar::from("hi")],
            true,
        )
        .expect("categorical");
        let out = factorize(
            &Array::Categorical(cat),
            sorted(),
            &RuntimePolicy::strict(),
            &mut EvidenceLedger::new(),
        )
        .expect("factorize");
        assert_eq!(out.labels, vec![1, -1, 0, 1]);
        let uniques = out.uniques.as_categorical().expect("categorical uniques");
        assert_eq!(uniques.codes(), &[0, 1]);
        assert_eq!(uniques.categories().len(), 2);
    }

    #[test]
    fn unique_excludes_missing() {
        let out = unique(&Array::Float64(vec![2.0, f64::NAN, 2.0, 1.0])).expect("unique");
        assert_eq!(out, Array::Float64(vec![2.0, 1.0]));
    }

    #[test]
    fn match_values_uses_last_position() {
        let to_match = Array::Int64(vec![1, 2, 1]);
        let values = Array::Int64(vec![1, 3, 2]);
        assert_eq!(match_values(&to_match, &values, -1), vec![2, -1, 1]);
    }

    #[test]
    fn match_values_across_dtypes() {
        let to_match = Array::Object(vec![Scalar::from("a"), Scalar::Int64(2)]);
        let values = Array::Float64(vec![2.0, f64::NAN]);
        assert_eq!(match_values(&to_match, &values, -1), vec![1, -1]);
    }

    #[test]
    fn value_counts_orders_by_frequency() {
        let values = strs(&[Some("x"), Some("y"), Some("y"), None, Some("z"), Some("y")]);
        let (uniques, counts) = value_counts(&values, true, false).expect("value counts");
        assert_eq!(uniques, strs(&[Some("y"), Some("x"), Some("z")]));
        assert_eq!(counts, vec![3, 1, 1]);

        let (uniques, counts) = value_counts(&values, true, true).expect("value counts");
        assert_eq!(uniques, strs(&[Some("x"), Some("z"), Some("y")]));
        assert_eq!(counts, vec![1, 1, 3]);
    }

    #[test]
    fn group_position_counts_occurrences() {
        let keys = Array::Float64(vec![1.0, 2.0, 1.0, f64::NAN, 1.0]);
        assert_eq!(group_position(&keys), vec![0, 0, 1, -1, 2]);
    }

    #[test]
    fn to_categorical_sorts_levels() {
        let cat = to_categorical(
            &strs(&[Some("b"), None, Some("a")]),
            true,
            &RuntimePolicy::strict(),
            &mut EvidenceLedger::new(),
        )
        .expect("categorical");
        assert_eq!(cat.codes(), &[1, -1, 0]);
        assert_eq!(cat.categories(), &[Scalar::from("a"), Scalar::from("b")]);
        assert!(cat.ordered());
    }

    #[test]
    fn options_serde_round_trip() {
        let options: FactorizeOptions = serde_json::from_str(r#"{"sort":true}"#).expect("deserialize");
        assert_eq!(options, sorted());
    }

    #[test]
    fn rank_methods_break_ties() {
        let values = Array::Float64(vec![3.0, 1.0, f64::NAN, 1.0, 2.0]);
        let by = |method| {
            rank(
                &values,
                RankOptions {
                    method,
                    ..RankOptions::default()
                },
            )
            .expect("rank")
        };
        let nan = f64::NAN;
        let same = |a: Vec<f64>, b: Vec<f64>| {
            a.len() == b.len()
                && a.iter().zip(&b).all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
        };
        assert!(same(by(RankMethod::Average), vec![4.0, 1.5, nan, 1.5, 3.0]));
        assert!(same(by(RankMethod::Min), vec![4.0, 1.0, nan, 1.0, 3.0]));
        assert!(same(by(RankMethod::Max), vec![4.0, 2.0, nan, 2.0, 3.0]));
        assert!(same(by(RankMethod::First), vec![4.0, 1.0, nan, 2.0, 3.0]));

        let descending = RankOptions {
            ascending: false,
            ..RankOptions::default()
        };
        assert!(same(
            rank(&values, descending).expect("rank"),
            vec![1.0, 3.5, nan, 3.5, 2.0]
        ));
    }

    #[test]
    fn rank_places_missing_values() {
        let values = Array::Int64(vec![10, 30, 20]);
        assert_eq!(rank(&values, RankOptions::default()), Ok(vec![1.0, 3.0, 2.0]));

        let values = strs(&[Some("b"), None, Some("a"), None]);
        let top = RankOptions {
            na_option: NaOption::Top,
            ..RankOptions::default()
        };
        assert_eq!(rank(&values, top), Ok(vec![4.0, 1.5, 3.0, 1.5]));
        let bottom = RankOptions {
            na_option: NaOption::Bottom,
            method: RankMethod::First,
            ..RankOptions::default()
        };
        assert_eq!(rank(&values, bottom), Ok(vec![2.0, 3.0, 1.0, 4.0]));
    }

    #[test]
    fn rank_rejects_mixed_objects() {
        let values = Array::Object(vec![Scalar::from("a"), Scalar::Int64(1)]);
        let err = rank(&values, RankOptions::default()).expect_err("mixed");
        assert!(matches!(err, AlgoError::Unsortable { .. }));
        assert_eq!(err.kind(), kp_types::ErrorKind::Type);

        let options: RankOptions =
            serde_json::from_str(r#"{"method":"first","na_option":"bottom"}"#).expect("json");
        assert!(options.ascending);
        assert_eq!(options.method, RankMethod::First);
    }
}
