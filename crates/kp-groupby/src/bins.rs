use kp_index::Index;
use kp_types::NAT;
use serde::{Deserialize, Serialize};

use crate::GroupByError;

/// Which end of each bin interval is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Closed {
    /// `[e[i], e[i+1])`
    #[default]
    Left,
    /// `(e[i], e[i+1]]`
    Right,
}

/// Which edge names a bin in results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinLabel {
    #[default]
    Left,
    Right,
}

/// Assigns timestamps to the intervals between consecutive edges.
///
/// There are `edges.len() - 1` bins and every one of them is a group, empty
/// or not. Values outside the edges, and NaT, belong to no bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinGrouper {
    edges: Vec<i64>,
    closed: Closed,
    label: BinLabel,
}

impl BinGrouper {
    pub fn new(edges: Vec<i64>, closed: Closed, label: BinLabel) -> Result<Self, GroupByError> {
        if edges.contains(&NAT) {
            return Err(GroupByError::NaTEdge);
        }
        if edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GroupByError::NonMonotonicEdges);
        }
        Ok(Self {
            edges,
            closed,
            label,
        })
    }

    /// Bins of width `freq` covering `first..=last`; see [`bin_edges`].
    pub fn from_range(
        first: i64,
        last: i64,
        freq: i64,
        closed: Closed,
        label: BinLabel,
    ) -> Result<Self, GroupByError> {
        Self::new(bin_edges(first, last, freq, closed)?, closed, label)
    }

    #[must_use]
    pub fn edges(&self) -> &[i64] {
        &self.edges
    }

    #[must_use]
    pub fn closed(&self) -> Closed {
        self.closed
    }

    #[must_use]
    pub fn label(&self) -> BinLabel {
        self.label
    }

    #[must_use]
    pub fn ngroups(&self) -> usize {
        self.edges.len().saturating_sub(1)
    }

    /// Bin of every value, `-1` when it falls in none.
    #[must_use]
    pub fn assign(&self, values: &[i64]) -> Vec<i64> {
        values
            .iter()
            .map(|&v| {
                if v == NAT {
                    return -1;
                }
                let upper = match self.closed {
                    Closed::Left => self.edges.partition_point(|e| *e <= v),
                    Closed::Right => self.edges.partition_point(|e| *e < v),
                };
                if upper == 0 || upper == self.edges.len() {
                    -1
                } else {
                    upper as i64 - 1
                }
            })
            .collect()
    }

    /// End offset of each bin within `sorted`, which must be ascending.
    ///
    /// Bin `i` covers `sorted[bins[i-1]..bins[i]]`; the rows before the
    /// first edge come before bin 0 and belong to none.
    pub fn bins(&self, sorted: &[i64]) -> Result<Vec<usize>, GroupByError> {
        if sorted.windows(2).any(|w| w[0] > w[1]) {
            return Err(GroupByError::UnsortedValues);
        }
        Ok(self
            .edges
            .iter()
            .skip(1)
            .map(|&edge| match self.closed {
                Closed::Left => sorted.partition_point(|v| *v < edge),
                Closed::Right => sorted.partition_point(|v| *v <= edge),
            })
            .collect())
    }

    /// Name of each bin, taken from its left or right edge.
    #[must_use]
    pub fn result_labels(&self) -> Vec<i64> {
        if self.edges.len() < 2 {
            return Vec::new();
        }
        match self.label {
            BinLabel::Left => self.edges[..self.edges.len() - 1].to_vec(),
            BinLabel::Right => self.edges[1..].to_vec(),
        }
    }

    #[must_use]
    pub fn result_index(&self) -> Index {
        Index::from_timestamps(self.result_labels())
    }
}

/// Edges spaced `freq` apart, aligned to multiples of `freq`, that put
/// every value of `first..=last` in some bin under `closed`.
///
/// Right-closed edges start one step below the first multiple of `freq` at
/// or above `first`, so an aligned `first` falls in the bin it closes.
pub fn bin_edges(first: i64, last: i64, freq: i64, closed: Closed) -> Result<Vec<i64>, GroupByError> {
    if freq <= 0 {
        return Err(GroupByError::InvalidFrequency { freq });
    }
    if first == NAT || last == NAT || first > last {
        return Err(GroupByError::InvalidRange { first, last });
    }
    let out_of_range = || GroupByError::InvalidRange { first, last };

    let step = i128::from(freq);
    let lo = i128::from(first);
    let hi = i128::from(last);
    let mut edge = match closed {
        Closed::Left => lo.div_euclid(step) * step,
        Closed::Right => -((-lo).div_euclid(step)) * step - step,
    };

    let mut edges = Vec::new();
    loop {
        edges.push(i64::try_from(edge).map_err(|_| out_of_range())?);
        let covered = match closed {
            Closed::Left => edge > hi,
            Closed::Right => edge >= hi,
        };
        if covered {
            break;
        }
        edge += step;
    }
    Ok(edges)
}
