use kp_columnar::Array;
use kp_index::{Index, IndexLabel, Loc};
use kp_internals::{BlockManager, InternalsError};
use kp_runtime::{EvidenceLedger, RuntimePolicy};
use tracing::{debug, trace};

use crate::{AggFunc, AggOptions, BinGrouper, GroupByError, Grouping, GroupingOptions, aggregate};

fn key_position(items: &Index, label: &IndexLabel) -> Result<usize, GroupByError> {
    match items.get_loc(label) {
        Ok(Loc::Single(position)) => Ok(position),
        Ok(Loc::Multiple(_)) => Err(InternalsError::AmbiguousColumn {
            label: label.to_string(),
        }
        .into()),
        Err(_) => Err(InternalsError::KeyNotFound {
            label: label.to_string(),
        }
        .into()),
    }
}

/// Aggregate every non-key column, block by block, returned in column
/// order.
fn aggregate_blocks(
    manager: &BlockManager,
    skip: &[usize],
    labels: &[i64],
    ngroups: usize,
    func: AggFunc,
    options: AggOptions,
) -> Result<(Vec<IndexLabel>, Vec<Array>), GroupByError> {
    let mut results: Vec<(usize, Array)> = Vec::with_capacity(manager.items().len());
    for block in manager.blocks() {
        trace!(dtype = %block.dtype(), ncols = block.ncols(), "aggregate block");
        for (column, &position) in block.columns().iter().zip(block.placement()) {
            if skip.contains(&position) {
                continue;
            }
            results.push((position, aggregate(column, labels, ngroups, func, options)?));
        }
    }
    results.sort_by_key(|(position, _)| *position);

    let mut items = Vec::with_capacity(results.len());
    let mut arrays = Vec::with_capacity(results.len());
    for (position, array) in results {
        if let Some(label) = manager.items().get(position) {
            items.push(label.clone());
            arrays.push(array);
        }
    }
    Ok((items, arrays))
}

/// Group a manager's rows by the columns named in `by` and reduce every
/// other column with `func`.
///
/// With one key the result rows are labelled by the group keys. With
/// several keys the rows are numbered and the key columns lead the result.
pub fn groupby_aggregate(
    manager: &BlockManager,
    by: &[IndexLabel],
    func: AggFunc,
    grouping: GroupingOptions,
    options: AggOptions,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> Result<BlockManager, GroupByError> {
    debug!(
        rows = manager.index().len(),
        columns = manager.items().len(),
        nkeys = by.len(),
        func = func.name(),
        "groupby_aggregate"
    );
    if by.is_empty() {
        return Err(GroupByError::NoKeys);
    }
    let positions = by
        .iter()
        .map(|label| key_position(manager.items(), label))
        .collect::<Result<Vec<_>, _>>()?;
    let keys = positions
        .iter()
        .map(|&p| manager.iget(p))
        .collect::<Result<Vec<_>, _>>()?;
    let groups = Grouping::composite(&keys, grouping, policy, ledger)?;

    let selected;
    let values = if options.numeric_only {
        selected = manager.get_numeric_data()?;
        &selected
    } else {
        manager
    };
    let skip: Vec<usize> = by
        .iter()
        .filter_map(|label| match values.items().get_loc(label) {
            Ok(Loc::Single(position)) => Some(position),
            _ => None,
        })
        .collect();
    let (mut items, mut arrays) = aggregate_blocks(
        values,
        &skip,
        groups.labels(),
        groups.ngroups(),
        func,
        options,
    )?;

    if by.len() > 1 {
        items = by.iter().cloned().chain(items).collect();
        arrays = groups.levels().iter().cloned().chain(arrays).collect();
    }
    Ok(BlockManager::from_arrays(
        Index::new(items),
        arrays,
        groups.result_index(),
    )?
    .with_config(manager.config()))
}

/// Reduce every column over the bins of `binner`, keyed by the
/// manager's timestamp row axis. Every bin gets a row, empty or not.
pub fn resample(
    manager: &BlockManager,
    binner: &BinGrouper,
    func: AggFunc,
    options: AggOptions,
) -> Result<BlockManager, GroupByError> {
    debug!(
        rows = manager.index().len(),
        bins = binner.ngroups(),
        func = func.name(),
        "resample"
    );
    let stamps = manager
        .index()
        .labels()
        .iter()
        .map(|label| match label {
            IndexLabel::Timestamp(ts) => Ok(*ts),
            _ => Err(GroupByError::NotTimestampAxis),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let labels = binner.assign(&stamps);

    let selected;
    let values = if options.numeric_only {
        selected = manager.get_numeric_data()?;
        &selected
    } else {
        manager
    };
    let (items, arrays) = aggregate_blocks(values, &[], &labels, binner.ngroups(), func, options)?;
    Ok(BlockManager::from_arrays(Index::new(items), arrays, binner.result_index())?
        .with_config(manager.config()))
}

#[cfg(test)]
mod tests {
    use kp_columnar::Array;
    use kp_index::{Index, IndexLabel};
    use kp_internals::BlockManager;
    use kp_runtime::{EvidenceLedger, RuntimePolicy};
    use kp_types::{ErrorKind, NAT, Scalar};

    use super::{groupby_aggregate, resample};
    use crate::{AggFunc, AggOptions, BinGrouper, BinLabel, Closed, GroupByError, GroupingOptions};

    fn label(s: &str) -> IndexLabel {
        IndexLabel::from(s)
    }

    fn sales() -> BlockManager {
        BlockManager::from_arrays(
            Index::from_utf8(vec!["store", "units", "price", "region"]),
            vec![
                Array::Object(vec![
                    Scalar::from("b"),
                    Scalar::from("a"),
                    Scalar::from("b"),
                    Scalar::from("a"),
                ]),
                Array::Int64(vec![1, 2, 3, 4]),
                Array::Float64(vec![1.5, 2.5, f64::NAN, 4.0]),
                Array::Object(vec![
                    Scalar::from("n"),
                    Scalar::from("n"),
                    Scalar::from("s"),
                    Scalar::from("n"),
                ]),
            ],
            Index::range(4),
        )
        .expect("manager")
    }

    #[test]
    fn single_key_labels_rows_by_group() {
        let mut ledger = EvidenceLedger::new();
        let out = groupby_aggregate(
            &sales(),
            &[label("store")],
            AggFunc::Count,
            GroupingOptions::default(),
            AggOptions::default(),
            &RuntimePolicy::strict(),
            &mut ledger,
        )
        .expect("groupby");
        assert_eq!(out.index(), &Index::from_utf8(vec!["a", "b"]));
        assert_eq!(out.items(), &Index::from_utf8(vec!["units", "price", "region"]));
        assert_eq!(out.column(&label("units")), Ok(&Array::Int64(vec![2, 2])));
        assert_eq!(out.column(&label("price")), Ok(&Array::Int64(vec![2, 1])));
    }

    #[test]
    fn float_keys_keep_numeric_ordered_labels() {
        let manager = BlockManager::from_arrays(
            Index::from_utf8(vec!["k", "v"]),
            vec![
                Array::Float64(vec![10.0, 9.0, 1.0, 2.5, f64::NAN]),
                Array::Int64(vec![1, 2, 3, 4, 5]),
            ],
            Index::range(5),
        )
        .expect("manager");
        let mut ledger = EvidenceLedger::new();
        let out = groupby_aggregate(
            &manager,
            &[label("k")],
            AggFunc::Sum,
            GroupingOptions::default(),
            AggOptions::default(),
            &RuntimePolicy::strict(),
            &mut ledger,
        )
        .expect("groupby");
        let expected: Index = [1.0, 2.5, 9.0, 10.0].into_iter().map(IndexLabel::from).collect();
        assert_eq!(out.index(), &expected);
        assert!(out.index().is_monotonic_increasing());
        assert_eq!(out.column(&label("v")), Ok(&Array::Int64(vec![3, 4, 2, 1])));

        let kept = groupby_aggregate(
            &manager,
            &[label("k")],
            AggFunc::Count,
            GroupingOptions {
                dropna: false,
                ..GroupingOptions::default()
            },
            AggOptions::default(),
            &RuntimePolicy::strict(),
            &mut ledger,
        )
        .expect("groupby");
        assert_eq!(kept.index().get(4), Some(&IndexLabel::from(f64::NAN)));
    }

    #[test]
    fn bool_keys_label_rows_by_bool() {
        let manager = BlockManager::from_arrays(
            Index::from_utf8(vec!["flag", "v"]),
            vec![Array::Bool(vec![true, false, true]), Array::Int64(vec![1, 2, 3])],
            Index::range(3),
        )
        .expect("manager");
        let mut ledger = EvidenceLedger::new();
        let out = groupby_aggregate(
            &manager,
            &[label("flag")],
            AggFunc::Sum,
            GroupingOptions::default(),
            AggOptions::default(),
            &RuntimePolicy::strict(),
            &mut ledger,
        )
        .expect("groupby");
        assert_eq!(
            out.index().labels(),
            &[IndexLabel::Bool(false), IndexLabel::Bool(true)]
        );
        assert_eq!(out.column(&label("v")), Ok(&Array::Int64(vec![2, 4])));
    }

    #[test]
    fn numeric_reduction_over_object_column_is_type_error() {
        let mut ledger = EvidenceLedger::new();
        let err = groupby_aggregate(
            &sales(),
            &[label("store")],
            AggFunc::Sum,
            GroupingOptions::default(),
            AggOptions::default(),
            &RuntimePolicy::strict(),
            &mut ledger,
        )
        .expect_err("region is object");
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn numeric_only_leaves_object_columns_out() {
        let mut ledger = EvidenceLedger::new();
        let out = groupby_aggregate(
            &sales(),
            &[label("store")],
            AggFunc::Sum,
            GroupingOptions::default(),
            AggOptions {
                numeric_only: true,
                ..AggOptions::default()
            },
            &RuntimePolicy::strict(),
            &mut ledger,
        )
        .expect("groupby");
        assert_eq!(out.index(), &Index::from_utf8(vec!["a", "b"]));
        assert_eq!(out.items(), &Index::from_utf8(vec!["units", "price"]));
        assert_eq!(out.column(&label("units")), Ok(&Array::Int64(vec![6, 4])));
        assert_eq!(out.column(&label("price")), Ok(&Array::Float64(vec![6.5, 1.5])));
    }

    #[test]
    fn composite_keys_lead_result() {
        let mut ledger = EvidenceLedger::new();
        let out = groupby_aggregate(
            &sales(),
            &[label("region"), label("store")],
            AggFunc::Sum,
            GroupingOptions::default(),
            AggOptions::default(),
            &RuntimePolicy::strict(),
            &mut ledger,
        )
        .expect("groupby");
        assert_eq!(
            out.items(),
            &Index::from_utf8(vec!["region", "store", "units", "price"])
        );
        assert_eq!(out.index(), &Index::range(3));
        assert_eq!(
            out.column(&label("store")),
            Ok(&Array::Object(vec![Scalar::from("a"), Scalar::from("b"), Scalar::from("b")]))
        );
        assert_eq!(out.column(&label("units")), Ok(&Array::Int64(vec![6, 1, 3])));
        assert_eq!(out.column(&label("price")), Ok(&Array::Float64(vec![6.5, 1.5, 0.0])));
    }

    #[test]
    fn missing_key_column_is_key_error() {
        let mut ledger = EvidenceLedger::new();
        let err = groupby_aggregate(
            &sales(),
            &[label("nope")],
            AggFunc::Sum,
            GroupingOptions::default(),
            AggOptions::default(),
            &RuntimePolicy::strict(),
            &mut ledger,
        )
        .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Key);
    }

    #[test]
    fn resample_keeps_empty_bins() {
        let manager = BlockManager::from_arrays(
            Index::from_utf8(vec!["v"]),
            vec![Array::Float64(vec![1.0, 2.0, 3.0, 4.0])],
            Index::from_timestamps(vec![0, 5, 25, 40]),
        )
        .expect("manager");
        let binner = BinGrouper::from_range(0, 40, 10, Closed::Left, BinLabel::Left).expect("binner");
        let out = resample(&manager, &binner, AggFunc::Sum, AggOptions::default()).expect("resample");
        assert_eq!(out.index(), &Index::from_timestamps(vec![0, 10, 20, 30, 40]));
        assert_eq!(
            out.column(&label("v")),
            Ok(&Array::Float64(vec![3.0, 0.0, 3.0, 0.0, 4.0]))
        );
        let means = resample(&manager, &binner, AggFunc::Mean, AggOptions::default()).expect("mean");
        assert_eq!(
            means.column(&label("v")),
            Ok(&Array::Float64(vec![1.5, f64::NAN, 3.0, f64::NAN, 4.0]))
        );
    }

    #[test]
    fn resample_excludes_out_of_range_rows() {
        let manager = BlockManager::from_arrays(
            Index::from_utf8(vec!["v"]),
            vec![Array::Int64(vec![1, 2, 3])],
            Index::from_timestamps(vec![NAT, 3, 100]),
        )
        .expect("manager");
        let binner = BinGrouper::new(vec![0, 10], Closed::Left, BinLabel::Left).expect("binner");
        let out = resample(&manager, &binner, AggFunc::Count, AggOptions::default()).expect("resample");
        assert_eq!(out.column(&label("v")), Ok(&Array::Int64(vec![1])));
    }

    #[test]
    fn resample_needs_timestamps() {
        let binner = BinGrouper::new(vec![0, 10], Closed::Left, BinLabel::Left).expect("binner");
        assert_eq!(
            resample(&sales(), &binner, AggFunc::Count, AggOptions::default()),
            Err(GroupByError::NotTimestampAxis)
        );
    }
}
