#![forbid(unsafe_code)]

use std::time::Instant;

use kp_columnar::{Array, ColumnError};
use kp_groupby::{AggFunc, AggOptions, GroupByError, Grouping, GroupingOptions, aggregate};
use kp_hashtable::{AlgoError, FactorizeOptions, factorize};
use kp_index::{Index, IndexLabel};
use kp_internals::{Axis, BlockManager, InternalsError, ReindexOptions};
use kp_runtime::{EvidenceLedger, RuntimeMode, RuntimePolicy};
use kp_types::{DType, ErrorKind, NullKind, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Algo(#[from] AlgoError),
    #[error(transparent)]
    Internals(#[from] InternalsError),
    #[error(transparent)]
    GroupBy(#[from] GroupByError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Error class of a kernel failure; harness-level failures have none.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Column(err) => Some(err.kind()),
            Self::Algo(err) => Some(err.kind()),
            Self::Internals(err) => Some(err.kind()),
            Self::GroupBy(err) => Some(err.kind()),
            Self::Json(_) => None,
        }
    }
}

/// A named, typed column used to build fixture managers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureColumn {
    pub name: String,
    pub dtype: DType,
    pub values: Vec<Scalar>,
}

impl FixtureColumn {
    pub fn to_array(&self) -> Result<Array, ColumnError> {
        Array::from_scalars(self.dtype, self.values.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum FixtureOperation {
    Factorize {
        dtype: DType,
        values: Vec<Scalar>,
        #[serde(default)]
        sort: bool,
        expected_labels: Vec<i64>,
        expected_uniques: Vec<Scalar>,
    },
    ReindexRows {
        columns: Vec<FixtureColumn>,
        target: Vec<i64>,
        expected_blocks: usize,
        expected: Vec<FixtureColumn>,
    },
    GroupbyAggregate {
        keys: Vec<i64>,
        dtype: DType,
        values: Vec<Scalar>,
        func: AggFunc,
        #[serde(default)]
        options: AggOptions,
        expected: Vec<Scalar>,
    },
}

impl FixtureOperation {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Factorize { .. } => "factorize",
            Self::ReindexRows { .. } => "reindex_rows",
            Self::GroupbyAggregate { .. } => "groupby_aggregate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketFixture {
    pub case_id: String,
    pub operation: FixtureOperation,
    /// The case passes only if the kernel fails with this class of error.
    #[serde(default)]
    pub expected_error: Option<ErrorKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub operation: String,
    pub mode: RuntimeMode,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    #[serde(default)]
    pub elapsed_us: u64,
    pub evidence_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessReport {
    pub mode: RuntimeMode,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl HarnessReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0
    }

    pub fn to_json(&self) -> Result<String, HarnessError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `{'a': [1, 2, 3], 'b': [1.0, 2.0, 3.0]}` over a range row axis.
pub fn scenario_frame() -> Result<BlockManager, InternalsError> {
    BlockManager::from_arrays(
        Index::from_utf8(vec!["a", "b"]),
        vec![
            Array::Int64(vec![1, 2, 3]),
            Array::Float64(vec![1.0, 2.0, 3.0]),
        ],
        Index::range(3),
    )
}

/// Object column of strings where `None` is a missing value.
#[must_use]
pub fn utf8_array(values: &[Option<&str>]) -> Array {
    Array::Object(
        values
            .iter()
            .map(|v| v.map_or(Scalar::Null(NullKind::Null), Scalar::from))
            .collect(),
    )
}

/// Manager over a range row axis from fixture columns.
pub fn fixture_manager(columns: &[FixtureColumn]) -> Result<BlockManager, HarnessError> {
    let rows = columns.first().map_or(0, |c| c.values.len());
    let items = Index::from_utf8(columns.iter().map(|c| c.name.clone()).collect());
    let arrays = columns
        .iter()
        .map(FixtureColumn::to_array)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BlockManager::from_arrays(items, arrays, Index::range(rows))?)
}

/// The core packet: first-seen and sorted factorization, row reindexing
/// with fill, grouped sum and mean with missing values, and the strict
/// rejection of unsortable keys.
#[must_use]
pub fn core_packet() -> Vec<PacketFixture> {
    let nan = || Scalar::Null(NullKind::NaN);
    vec![
        PacketFixture {
            case_id: "factorize_first_seen".to_owned(),
            operation: FixtureOperation::Factorize {
                dtype: DType::Object,
                values: utf8_array(&[Some("b"), Some("a"), Some("a"), None, Some("c")]).to_scalars(),
                sort: false,
                expected_labels: vec![0, 1, 1, -1, 2],
                expected_uniques: vec![Scalar::from("b"), Scalar::from("a"), Scalar::from("c")],
            },
            expected_error: None,
        },
        PacketFixture {
            case_id: "factorize_sorted_int".to_owned(),
            operation: FixtureOperation::Factorize {
                dtype: DType::Int64,
                values: [3_i64, 1, 2, 1].into_iter().map(Scalar::from).collect(),
                sort: true,
                expected_labels: vec![2, 0, 1, 0],
                expected_uniques: [1_i64, 2, 3].into_iter().map(Scalar::from).collect(),
            },
            expected_error: None,
        },
        PacketFixture {
            case_id: "factorize_sorted_mixed_rejected".to_owned(),
            operation: FixtureOperation::Factorize {
                dtype: DType::Object,
                values: vec![Scalar::from("x"), Scalar::from(1_i64)],
                sort: true,
                expected_labels: vec![0, 1],
                expected_uniques: vec![Scalar::from("x"), Scalar::from(1_i64)],
            },
            expected_error: Some(ErrorKind::Type),
        },
        PacketFixture {
            case_id: "reindex_rows_fill_nan".to_owned(),
            operation: FixtureOperation::ReindexRows {
                columns: vec![
                    FixtureColumn {
                        name: "a".to_owned(),
                        dtype: DType::Int64,
                        values: [1_i64, 2, 3].into_iter().map(Scalar::from).collect(),
                    },
                    FixtureColumn {
                        name: "b".to_owned(),
                        dtype: DType::Float64,
                        values: [1.0_f64, 2.0, 3.0].into_iter().map(Scalar::from).collect(),
                    },
                ],
                target: vec![0, 5, 1],
                expected_blocks: 2,
                expected: vec![
                    FixtureColumn {
                        name: "a".to_owned(),
                        dtype: DType::Float64,
                        values: vec![Scalar::from(1.0), nan(), Scalar::from(2.0)],
                    },
                    FixtureColumn {
                        name: "b".to_owned(),
                        dtype: DType::Float64,
                        values: vec![Scalar::from(1.0), nan(), Scalar::from(2.0)],
                    },
                ],
            },
            expected_error: None,
        },
        PacketFixture {
            case_id: "groupby_sum_skipna".to_owned(),
            operation: FixtureOperation::GroupbyAggregate {
                keys: vec![0, 0, 1, 1, 2],
                dtype: DType::Float64,
                values: vec![
                    Scalar::from(1.0),
                    Scalar::from(2.0),
                    Scalar::from(3.0),
                    Scalar::from(4.0),
                    nan(),
                ],
                func: AggFunc::Sum,
                options: AggOptions::default(),
                expected: vec![Scalar::from(3.0), Scalar::from(7.0), Scalar::from(0.0)],
            },
            expected_error: None,
        },
        PacketFixture {
            case_id: "groupby_mean_skipna".to_owned(),
            operation: FixtureOperation::GroupbyAggregate {
                keys: vec![0, 0, 1, 1, 2],
                dtype: DType::Float64,
                values: vec![
                    Scalar::from(1.0),
                    Scalar::from(2.0),
                    Scalar::from(3.0),
                    Scalar::from(4.0),
                    nan(),
                ],
                func: AggFunc::Mean,
                options: AggOptions::default(),
                expected: vec![Scalar::from(1.5), Scalar::from(3.5), nan()],
            },
            expected_error: None,
        },
    ]
}

fn compare_scalars(what: &str, actual: &[Scalar], expected: &[Scalar]) -> Option<String> {
    if actual.len() != expected.len() {
        return Some(format!(
            "{what}: length {} != expected {}",
            actual.len(),
            expected.len()
        ));
    }
    actual
        .iter()
        .zip(expected)
        .position(|(a, e)| !a.semantic_eq(e))
        .map(|pos| {
            format!(
                "{what}[{pos}]: {:?} != expected {:?}",
                actual[pos], expected[pos]
            )
        })
}

/// Run the operation and describe the first difference from the
/// expectation, if any.
fn execute(
    operation: &FixtureOperation,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> Result<Option<String>, HarnessError> {
    match operation {
        FixtureOperation::Factorize {
            dtype,
            values,
            sort,
            expected_labels,
            expected_uniques,
        } => {
            let array = Array::from_scalars(*dtype, values.clone())?;
            let options = FactorizeOptions {
                sort: *sort,
                ..FactorizeOptions::default()
            };
            let out = factorize(&array, options, policy, ledger)?;
            if &out.labels != expected_labels {
                return Ok(Some(format!(
                    "labels: {:?} != expected {expected_labels:?}",
                    out.labels
                )));
            }
            Ok(compare_scalars("uniques", &out.uniques.to_scalars(), expected_uniques))
        }
        FixtureOperation::ReindexRows {
            columns,
            target,
            expected_blocks,
            expected,
        } => {
            let manager = fixture_manager(columns)?;
            if manager.nblocks() != *expected_blocks {
                return Ok(Some(format!(
                    "blocks: {} != expected {expected_blocks}",
                    manager.nblocks()
                )));
            }
            let out = manager.reindex_axis(
                &Index::from_i64(target.clone()),
                Axis::Rows,
                &ReindexOptions::default(),
            )?;
            for column in expected {
                let actual = out.column(&IndexLabel::from(column.name.as_str()))?;
                if actual.dtype() != column.dtype {
                    return Ok(Some(format!(
                        "{}: dtype {} != expected {}",
                        column.name,
                        actual.dtype(),
                        column.dtype
                    )));
                }
                if let Some(mismatch) = compare_scalars(&column.name, &actual.to_scalars(), &column.values) {
                    return Ok(Some(mismatch));
                }
            }
            Ok(None)
        }
        FixtureOperation::GroupbyAggregate {
            keys,
            dtype,
            values,
            func,
            options,
            expected,
        } => {
            let key = Array::Int64(keys.clone());
            let grouping = Grouping::new(&key, GroupingOptions::default(), policy, ledger)?;
            let values = Array::from_scalars(*dtype, values.clone())?;
            let out = aggregate(
                &values,
                grouping.labels(),
                grouping.ngroups(),
                *func,
                *options,
            )?;
            Ok(compare_scalars(func.name(), &out.to_scalars(), expected))
        }
    }
}

#[must_use]
pub fn run_case(fixture: &PacketFixture, policy: &RuntimePolicy) -> CaseResult {
    let mut ledger = EvidenceLedger::new();
    let start = Instant::now();
    let outcome = execute(&fixture.operation, policy, &mut ledger);
    let elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);

    let mismatch = match (outcome, fixture.expected_error) {
        (Ok(None), None) => None,
        (Ok(Some(mismatch)), None) => Some(mismatch),
        (Ok(_), Some(kind)) => Some(format!("expected {kind:?} error, operation succeeded")),
        (Err(err), Some(kind)) if err.kind() == Some(kind) => None,
        (Err(err), _) => Some(format!("error: {err}")),
    };
    debug!(
        case_id = %fixture.case_id,
        operation = fixture.operation.name(),
        passed = mismatch.is_none(),
        "conformance case"
    );
    CaseResult {
        case_id: fixture.case_id.clone(),
        operation: fixture.operation.name().to_owned(),
        mode: policy.mode,
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
        elapsed_us,
        evidence_records: ledger.len(),
    }
}

#[must_use]
pub fn run_packet(fixtures: &[PacketFixture], policy: &RuntimePolicy) -> HarnessReport {
    let results: Vec<CaseResult> = fixtures.iter().map(|f| run_case(f, policy)).collect();
    let passed = results
        .iter()
        .filter(|r| r.status == CaseStatus::Pass)
        .count();
    HarnessReport {
        mode: policy.mode,
        passed,
        failed: results.len() - passed,
        results,
    }
}

/// Parse a packet from its JSON form.
pub fn load_packet(json: &str) -> Result<Vec<PacketFixture>, HarnessError> {
    Ok(serde_json::from_str(json)?)
}
