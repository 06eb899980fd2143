#![forbid(unsafe_code)]

//! End-to-end scenarios across the factorizer, the block manager and the
//! grouped reductions.

use kp_columnar::Array;
use kp_conformance::{scenario_frame, utf8_array};
use kp_groupby::{AggFunc, AggOptions, Grouping, GroupingOptions, aggregate, groupby_aggregate};
use kp_hashtable::{FactorizeOptions, factorize};
use kp_index::{Index, IndexLabel};
use kp_internals::{Axis, BlockManager, ReindexOptions};
use kp_runtime::{EvidenceLedger, RuntimePolicy};
use kp_types::{DType, ErrorKind, NullKind, Scalar};

#[test]
fn factorize_keeps_first_seen_order() {
    let values = utf8_array(&[Some("b"), Some("a"), Some("a"), None, Some("c")]);
    let mut ledger = EvidenceLedger::new();
    let out = factorize(&values, FactorizeOptions::default(), &RuntimePolicy::strict(), &mut ledger)
        .expect("factorize");
    assert_eq!(out.labels, vec![0, 1, 1, -1, 2]);
    assert_eq!(out.uniques, utf8_array(&[Some("b"), Some("a"), Some("c")]));
    assert_eq!(out.counts, vec![1, 2, 1]);
    assert!(ledger.is_empty());
}

#[test]
fn sorted_factorize_relabels() {
    let values = Array::Int64(vec![3, 1, 2, 1]);
    let mut ledger = EvidenceLedger::new();
    let options = FactorizeOptions {
        sort: true,
        ..FactorizeOptions::default()
    };
    let out = factorize(&values, options, &RuntimePolicy::strict(), &mut ledger).expect("factorize");
    assert_eq!(out.labels, vec![2, 0, 1, 0]);
    assert_eq!(out.uniques, Array::Int64(vec![1, 2, 3]));
}

#[test]
fn unsortable_keys_follow_runtime_mode() {
    let values = Array::Object(vec![Scalar::from("x"), Scalar::from(1_i64), Scalar::from("x")]);
    let options = FactorizeOptions {
        sort: true,
        ..FactorizeOptions::default()
    };

    let mut ledger = EvidenceLedger::new();
    let err = factorize(&values, options, &RuntimePolicy::strict(), &mut ledger).expect_err("strict");
    assert_eq!(err.kind(), ErrorKind::Type);

    let mut ledger = EvidenceLedger::new();
    let out = factorize(&values, options, &RuntimePolicy::hardened(), &mut ledger).expect("hardened");
    assert!(out.sort_fallback);
    assert_eq!(out.labels, vec![0, 1, 0]);
    assert_eq!(ledger.repairs().count(), 1);
}

#[test]
fn mapping_frame_consolidates_and_reindexes() {
    let manager = scenario_frame().expect("manager");
    assert!(manager.is_consolidated());
    assert_eq!(manager.nblocks(), 2);
    let mut block_dtypes: Vec<_> = manager.blocks().iter().map(|b| (b.dtype(), b.ncols())).collect();
    block_dtypes.sort();
    assert_eq!(block_dtypes, vec![(DType::Int64, 1), (DType::Float64, 1)]);

    let out = manager
        .reindex_axis(
            &Index::from_i64(vec![0, 5, 1]),
            Axis::Rows,
            &ReindexOptions::with_fill(Scalar::Null(NullKind::NaN)),
        )
        .expect("reindex");
    assert_eq!(out.index(), &Index::from_i64(vec![0, 5, 1]));
    assert_eq!(
        out.column(&IndexLabel::from("a")),
        Ok(&Array::Float64(vec![1.0, f64::NAN, 2.0]))
    );
    assert_eq!(
        out.column(&IndexLabel::from("b")),
        Ok(&Array::Float64(vec![1.0, f64::NAN, 2.0]))
    );
    assert_eq!(manager.shape(), (3, 2));
}

#[test]
fn grouped_sum_skips_nan() {
    let keys = Array::Int64(vec![0, 0, 1, 1, 2]);
    let values = Array::Float64(vec![1.0, 2.0, 3.0, 4.0, f64::NAN]);
    let mut ledger = EvidenceLedger::new();
    let grouping = Grouping::new(&keys, GroupingOptions::default(), &RuntimePolicy::strict(), &mut ledger)
        .expect("grouping");
    assert_eq!(grouping.ngroups(), 3);

    let sums = aggregate(
        &values,
        grouping.labels(),
        grouping.ngroups(),
        AggFunc::Sum,
        AggOptions::default(),
    )
    .expect("sum");
    assert_eq!(sums, Array::Float64(vec![3.0, 7.0, 0.0]));

    let means = aggregate(
        &values,
        grouping.labels(),
        grouping.ngroups(),
        AggFunc::Mean,
        AggOptions::default(),
    )
    .expect("mean");
    assert_eq!(means, Array::Float64(vec![1.5, 3.5, f64::NAN]));
}

#[test]
fn grouped_frame_matches_column_kernel() {
    let manager = BlockManager::from_arrays(
        Index::from_utf8(vec!["k", "v"]),
        vec![
            Array::Int64(vec![0, 0, 1, 1, 2]),
            Array::Float64(vec![1.0, 2.0, 3.0, 4.0, f64::NAN]),
        ],
        Index::range(5),
    )
    .expect("manager");
    let mut ledger = EvidenceLedger::new();
    let out = groupby_aggregate(
        &manager,
        &[IndexLabel::from("k")],
        AggFunc::Sum,
        GroupingOptions::default(),
        AggOptions::default(),
        &RuntimePolicy::strict(),
        &mut ledger,
    )
    .expect("groupby");
    assert_eq!(out.index(), &Index::from_i64(vec![0, 1, 2]));
    assert_eq!(
        out.column(&IndexLabel::from("v")),
        Ok(&Array::Float64(vec![3.0, 7.0, 0.0]))
    );
}
