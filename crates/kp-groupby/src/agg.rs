use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use kp_columnar::Array;
use kp_hashtable::NA_SENTINEL;
use kp_types::{DType, NullKind, Scalar, TypeError};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::GroupByError;

/// Aggregation function selector for grouped reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Sum,
    Prod,
    Mean,
    Count,
    Min,
    Max,
    First,
    Last,
    Var,
    Std,
    Median,
}

impl AggFunc {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Prod => "prod",
            Self::Mean => "mean",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::First => "first",
            Self::Last => "last",
            Self::Var => "var",
            Self::Std => "std",
            Self::Median => "median",
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggFunc {
    type Err = GroupByError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "sum" => Self::Sum,
            "prod" => Self::Prod,
            "mean" => Self::Mean,
            "count" => Self::Count,
            "min" => Self::Min,
            "max" => Self::Max,
            "first" => Self::First,
            "last" => Self::Last,
            "var" => Self::Var,
            "std" => Self::Std,
            "median" => Self::Median,
            other => {
                return Err(GroupByError::UnknownAggregation {
                    name: other.to_owned(),
                });
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggOptions {
    /// Leave missing values out of every reduction. When false a missing
    /// value makes its group's result missing.
    pub skipna: bool,
    /// Delta degrees of freedom for `Var` and `Std`.
    pub ddof: usize,
    /// Groups with fewer valid values produce a missing result.
    pub min_count: usize,
    /// At the frame level, reduce only bool, int and float columns and
    /// leave the rest out of the result.
    pub numeric_only: bool,
}

impl Default for AggOptions {
    fn default() -> Self {
        Self {
            skipna: true,
            ddof: 1,
            min_count: 0,
            numeric_only: false,
        }
    }
}

fn check_labels(values: usize, labels: &[i64], ngroups: usize) -> Result<(), GroupByError> {
    if labels.len() != values {
        return Err(GroupByError::LengthMismatch {
            labels: labels.len(),
            values,
        });
    }
    if let Some(&label) = labels.iter().find(|&&l| l >= 0 && l as u64 >= ngroups as u64) {
        return Err(GroupByError::InvalidLabel { label, ngroups });
    }
    Ok(())
}

/// Reduce `values` per group in one pass over `labels`.
///
/// Rows with a negative label belong to no group. The result has one entry
/// per group; an empty group gives 0 for `Count` and `Sum`, 1 for `Prod`
/// and missing otherwise.
pub fn aggregate(
    values: &Array,
    labels: &[i64],
    ngroups: usize,
    func: AggFunc,
    options: AggOptions,
) -> Result<Array, GroupByError> {
    check_labels(values.len(), labels, ngroups)?;
    trace!(func = func.name(), dtype = %values.dtype(), ngroups, "aggregate");
    match func {
        AggFunc::Count => Ok(Array::Int64(count_valid(values, labels, ngroups))),
        AggFunc::First | AggFunc::Last => select(values, labels, ngroups, func, options),
        AggFunc::Min | AggFunc::Max => {
            if let Array::Categorical(c) = values
                && !c.ordered()
            {
                return Err(TypeError::UnorderedCategorical { op: func.name() }.into());
            }
            select(values, labels, ngroups, func, options)
        }
        AggFunc::Sum | AggFunc::Prod => match values {
            Array::Int64(v) => Ok(wrapping_reduce(v.iter().copied(), labels, ngroups, func, options)),
            Array::Bool(v) => Ok(wrapping_reduce(
                v.iter().map(|b| i64::from(*b)),
                labels,
                ngroups,
                func,
                options,
            )),
            other => float_reduce(other, labels, ngroups, func, options),
        },
        AggFunc::Mean | AggFunc::Var | AggFunc::Std | AggFunc::Median => {
            float_reduce(values, labels, ngroups, func, options)
        }
    }
}

fn count_valid(values: &Array, labels: &[i64], ngroups: usize) -> Vec<i64> {
    let mut counts = vec![0_i64; ngroups];
    for (row, &label) in labels.iter().enumerate() {
        if let Ok(g) = usize::try_from(label)
            && !values.is_na(row)
        {
            counts[g] += 1;
        }
    }
    counts
}

fn compare_rows(values: &Array, a: usize, b: usize, op: &'static str) -> Result<Ordering, GroupByError> {
    Ok(match values {
        Array::Bool(v) => v[a].cmp(&v[b]),
        Array::Int64(v) | Array::DateTime64(v) => v[a].cmp(&v[b]),
        Array::Float64(v) => v[a].total_cmp(&v[b]),
        Array::Categorical(c) => c.codes()[a].cmp(&c.codes()[b]),
        Array::Object(v) => v[a].try_cmp(&v[b]).ok_or(TypeError::UnsupportedOperation {
            op,
            dtype: DType::Object,
        })?,
    })
}

/// Pick one row per group (first, last, smallest or largest) and gather it.
/// Groups with no pick come out missing, promoting the dtype if needed.
fn select(
    values: &Array,
    labels: &[i64],
    ngroups: usize,
    func: AggFunc,
    options: AggOptions,
) -> Result<Array, GroupByError> {
    let mut picked = vec![-1_i64; ngroups];
    let mut valid = vec![0_usize; ngroups];
    let mut poisoned = vec![false; ngroups];

    for (row, &label) in labels.iter().enumerate() {
        let Ok(g) = usize::try_from(label) else {
            continue;
        };
        let na = values.is_na(row);
        if na && options.skipna {
            continue;
        }
        if !na {
            valid[g] += 1;
        }
        let current = picked[g];
        let replace = match func {
            AggFunc::First => current < 0,
            AggFunc::Last => true,
            _ if poisoned[g] => false,
            _ if na => {
                poisoned[g] = true;
                true
            }
            AggFunc::Min => {
                current < 0
                    || compare_rows(values, row, current as usize, func.name())? == Ordering::Less
            }
            _ => {
                current < 0
                    || compare_rows(values, row, current as usize, func.name())?
                        == Ordering::Greater
            }
        };
        if replace {
            picked[g] = row as i64;
        }
    }

    for (slot, &count) in picked.iter_mut().zip(&valid) {
        if count < options.min_count {
            *slot = -1;
        }
    }
    Ok(values.take(&picked, &Scalar::Null(NullKind::NaN))?)
}

/// Integer `Sum`/`Prod`, wrapping on overflow. Stays `Int64` unless
/// `min_count` blanks a group.
fn wrapping_reduce(
    values: impl Iterator<Item = i64>,
    labels: &[i64],
    ngroups: usize,
    func: AggFunc,
    options: AggOptions,
) -> Array {
    let identity: i64 = if func == AggFunc::Prod { 1 } else { 0 };
    let mut acc = vec![identity; ngroups];
    let mut counts = vec![0_usize; ngroups];
    for (value, &label) in values.zip(labels) {
        let Ok(g) = usize::try_from(label) else {
            continue;
        };
        counts[g] += 1;
        acc[g] = if func == AggFunc::Prod {
            acc[g].wrapping_mul(value)
        } else {
            acc[g].wrapping_add(value)
        };
    }

    if counts.iter().all(|&c| c >= options.min_count) {
        return Array::Int64(acc);
    }
    Array::Float64(
        acc.iter()
            .zip(&counts)
            .map(|(&v, &c)| if c < options.min_count { f64::NAN } else { v as f64 })
            .collect(),
    )
}

/// Running per-group state for float reductions.
#[derive(Debug, Clone, Copy)]
struct Moments {
    count: usize,
    sum: f64,
    prod: f64,
    mean: f64,
    m2: f64,
    poisoned: bool,
}

impl Default for Moments {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            prod: 1.0,
            mean: 0.0,
            m2: 0.0,
            poisoned: false,
        }
    }
}

impl Moments {
    fn push(&mut self, x: f64) {
        self.count += 1;
        self.sum += x;
        self.prod *= x;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn finish(&self, func: AggFunc, ddof: usize) -> f64 {
        let n = self.count;
        match func {
            AggFunc::Sum => self.sum,
            AggFunc::Prod => self.prod,
            AggFunc::Mean if n == 0 => f64::NAN,
            AggFunc::Mean => self.sum / n as f64,
            AggFunc::Var | AggFunc::Std if n <= ddof => f64::NAN,
            AggFunc::Var => self.m2 / (n - ddof) as f64,
            AggFunc::Std => (self.m2 / (n - ddof) as f64).sqrt(),
            _ => f64::NAN,
        }
    }
}

fn as_floats(values: &Array, func: AggFunc) -> Result<Vec<f64>, GroupByError> {
    match values {
        Array::Float64(v) => Ok(v.clone()),
        Array::Int64(v) => Ok(v.iter().map(|x| *x as f64).collect()),
        Array::Bool(v) => Ok(v.iter().map(|b| if *b { 1.0 } else { 0.0 }).collect()),
        other => Err(TypeError::UnsupportedOperation {
            op: func.name(),
            dtype: other.dtype(),
        }
        .into()),
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len().is_multiple_of(2) {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn float_reduce(
    values: &Array,
    labels: &[i64],
    ngroups: usize,
    func: AggFunc,
    options: AggOptions,
) -> Result<Array, GroupByError> {
    let floats = as_floats(values, func)?;
    let mut state = vec![Moments::default(); ngroups];
    let mut buckets: Vec<Vec<f64>> = if func == AggFunc::Median {
        vec![Vec::new(); ngroups]
    } else {
        Vec::new()
    };

    for (&x, &label) in floats.iter().zip(labels) {
        let Ok(g) = usize::try_from(label) else {
            continue;
        };
        if x.is_nan() {
            if !options.skipna {
                state[g].poisoned = true;
            }
            continue;
        }
        state[g].push(x);
        if let Some(bucket) = buckets.get_mut(g) {
            bucket.push(x);
        }
    }

    let out = state
        .iter()
        .enumerate()
        .map(|(g, moments)| {
            if moments.poisoned || moments.count < options.min_count {
                return f64::NAN;
            }
            match buckets.get_mut(g) {
                Some(bucket) => median(bucket),
                None => moments.finish(func, options.ddof),
            }
        })
        .collect();
    Ok(Array::Float64(out))
}

/// Group results broadcast back to the rows; rows outside every group are
/// missing.
pub fn transform(
    values: &Array,
    labels: &[i64],
    ngroups: usize,
    func: AggFunc,
    options: AggOptions,
) -> Result<Array, GroupByError> {
    let reduced = aggregate(values, labels, ngroups, func, options)?;
    let indexer: Vec<i64> = labels.iter().map(|&l| l.max(-1)).collect();
    Ok(reduced.take(&indexer, &Scalar::Null(NullKind::NaN))?)
}

/// Position of each row within its group, counting from 0; rows outside
/// every group get the sentinel.
#[must_use]
pub fn cumcount(labels: &[i64], ngroups: usize) -> Vec<i64> {
    let mut seen = vec![0_i64; ngroups];
    labels
        .iter()
        .map(|&label| match usize::try_from(label).ok().and_then(|g| seen.get_mut(g)) {
            Some(slot) => {
                let position = *slot;
                *slot += 1;
                position
            }
            None => NA_SENTINEL,
        })
        .collect()
}

/// Running sum within each group.
///
/// With `skipna` a missing value yields a missing row and the sum carries
/// on past it; without, the group stays missing from there on.
pub fn cumsum(
    values: &Array,
    labels: &[i64],
    ngroups: usize,
    options: AggOptions,
) -> Result<Array, GroupByError> {
    check_labels(values.len(), labels, ngroups)?;
    let ints = match values {
        Array::Int64(v) => Some(v.clone()),
        Array::Bool(v) => Some(v.iter().map(|b| i64::from(*b)).collect()),
        _ => None,
    };
    if let Some(ints) = ints
        && labels.iter().all(|l| *l >= 0)
    {
        let mut acc = vec![0_i64; ngroups];
        let out = ints
            .iter()
            .zip(labels)
            .map(|(&v, &label)| {
                let slot = &mut acc[label as usize];
                *slot = slot.wrapping_add(v);
                *slot
            })
            .collect();
        return Ok(Array::Int64(out));
    }

    let floats = as_floats(values, AggFunc::Sum)?;
    let mut acc = vec![0.0_f64; ngroups];
    let out = floats
        .iter()
        .zip(labels)
        .map(|(&x, &label)| {
            let Ok(g) = usize::try_from(label) else {
                return f64::NAN;
            };
            if x.is_nan() && options.skipna {
                return f64::NAN;
            }
            acc[g] += x;
            acc[g]
        })
        .collect();
    Ok(Array::Float64(out))
}
