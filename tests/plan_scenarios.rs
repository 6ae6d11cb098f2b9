//! End-to-end planning scenarios
//!
//! Each test builds a small catalog, plans one statement, and checks the
//! chosen access strategy, consumed terms and ordering flags.

use std::sync::Arc;

use rustql_planner::expr::{BinaryOp, Expr, InList};
use rustql_planner::planner::cost::{est_log, log_est, log_est_add};
use rustql_planner::planner::term::Operator;
use rustql_planner::schema::{Affinity, Column, Index, Table};
use rustql_planner::{
    DistinctMode, LevelAccess, OrderByTerm, PlannerConfig, SrcItem, WherePlanner, WhereRequest,
};

fn planner() -> WherePlanner {
    WherePlanner::new(PlannerConfig::default())
}

#[test]
fn test_equality_and_range_use_index() {
    // t1(a, b, c) with index i(a, b), 10000 rows;
    // WHERE a = 5 AND b > 2 AND b < 10
    let t1 = Table::new("t1", 10_000)
        .column(Column::new("a", Affinity::Integer))
        .column(Column::new("b", Affinity::Integer))
        .column(Column::new("c", Affinity::Integer))
        .index(Index::new("i", vec![0, 1]));
    let src = vec![SrcItem::new(Arc::new(t1), 0)];

    let filter = Expr::and(
        Expr::and(
            Expr::eq(Expr::column(0, 0), Expr::integer(5)),
            Expr::binary(BinaryOp::Gt, Expr::column(0, 1), Expr::integer(2)),
        ),
        Expr::binary(BinaryOp::Lt, Expr::column(0, 1), Expr::integer(10)),
    );
    let plan = planner()
        .plan(&WhereRequest::new(src).filter(filter))
        .unwrap();

    assert_eq!(plan.levels.len(), 1);
    let level = &plan.levels[0];
    match &level.access {
        LevelAccess::IndexScan {
            index,
            n_eq,
            range_start,
            range_end,
            covering,
        } => {
            assert_eq!(index.name, "i");
            assert_eq!(*n_eq, 1);
            assert!(!covering); // c is read but not indexed
            let start = range_start.expect("lower bound");
            let end = range_end.expect("upper bound");
            assert!(plan.term(start).e_operator.contains(Operator::GT));
            assert!(plan.term(end).e_operator.contains(Operator::LT));
        }
        other => panic!("expected index scan, got {:?}", other),
    }
    assert!(!level.reversed);
    // All three constraints are consumed by the scan
    assert_eq!(level.wloop.terms.len(), 3);
    assert!(plan.residue_terms().is_empty());
}

#[test]
fn test_join_order_by_satisfied_via_primary_keys() {
    // t1(x PRIMARY KEY, y) join t2(p PRIMARY KEY, q) on x = p,
    // ORDER BY x: outer scan of t1 in rowid order, inner rowid lookup
    // on t2, no sort
    let t1 = Table::new("t1", 1000).column(Column::new("y", Affinity::Integer));
    let t2 = Table::new("t2", 1000).column(Column::new("q", Affinity::Integer));
    let src = vec![
        SrcItem::new(Arc::new(t1), 0),
        SrcItem::new(Arc::new(t2), 1),
    ];

    let req = WhereRequest::new(src)
        .filter(Expr::eq(Expr::column(0, -1), Expr::column(1, -1)))
        .order_by(vec![OrderByTerm::asc(Expr::column(0, -1))]);
    let plan = planner().plan(&req).unwrap();

    assert!(plan.order_by_satisfied);
    assert_eq!(plan.rev_mask, 0);
    assert_eq!(plan.levels.len(), 2);
    assert_eq!(plan.levels[0].from, 0);
    assert!(matches!(plan.levels[0].access, LevelAccess::FullScan));
    match &plan.levels[1].access {
        LevelAccess::IndexScan { index, n_eq, .. } => {
            assert!(index.rowid_pk);
            assert_eq!(*n_eq, 1);
        }
        other => panic!("expected rowid lookup, got {:?}", other),
    }
}

#[test]
fn test_or_of_equalities_becomes_in() {
    // WHERE x = 1 OR x = 2 OR x = 7 is planned as x IN (1, 2, 7)
    let t = Table::new("t", 10_000)
        .column(Column::new("x", Affinity::Integer))
        .index(Index::new("i_x", vec![0]));
    let src = vec![SrcItem::new(Arc::new(t), 0)];

    let filter = Expr::or(
        Expr::or(
            Expr::eq(Expr::column(0, 0), Expr::integer(1)),
            Expr::eq(Expr::column(0, 0), Expr::integer(2)),
        ),
        Expr::eq(Expr::column(0, 0), Expr::integer(7)),
    );
    let plan = planner()
        .plan(&WhereRequest::new(src).filter(filter))
        .unwrap();

    // The original OR term was rewritten away
    let or_term = &plan.clauses.clause(plan.main_clause).terms[0];
    assert_eq!(or_term.e_operator, Operator::NOOP);

    let level = &plan.levels[0];
    match &level.access {
        LevelAccess::IndexScan { index, n_eq, .. } => {
            assert_eq!(index.name, "i_x");
            assert_eq!(*n_eq, 1);
        }
        other => panic!("expected index scan, got {:?}", other),
    }
    let consumed = plan.term(level.wloop.terms[0]);
    assert!(consumed.e_operator.contains(Operator::IN));
    match consumed.expr.as_ref() {
        Expr::In {
            list: InList::Values(v),
            ..
        } => assert_eq!(v.len(), 3),
        other => panic!("expected IN list, got {:?}", other),
    }
}

#[test]
fn test_like_prefix_drives_nocase_index() {
    // name LIKE 'abc%' with case-insensitive LIKE and a NOCASE index:
    // the synthesized range [abc, abd) drives the index and the LIKE
    // itself stays behind as a filter
    let t = Table::new("t", 10_000)
        .column(Column::new("name", Affinity::Text).collation("NOCASE"))
        .index(Index::new("i_name", vec![0]).collations(vec!["NOCASE".to_string()]));
    let src = vec![SrcItem::new(Arc::new(t), 0)];

    let plan = planner()
        .plan(&WhereRequest::new(src).filter(Expr::like(Expr::column(0, 0), "abc%")))
        .unwrap();

    let level = &plan.levels[0];
    match &level.access {
        LevelAccess::IndexScan {
            index,
            n_eq,
            range_start,
            range_end,
            ..
        } => {
            assert_eq!(index.name, "i_name");
            assert_eq!(*n_eq, 0);
            let start = plan.term(range_start.expect("lower bound"));
            let end = plan.term(range_end.expect("upper bound"));
            match (start.expr.as_ref(), end.expr.as_ref()) {
                (
                    Expr::Binary { right: lo, .. },
                    Expr::Binary {
                        left: col, right: hi, ..
                    },
                ) => {
                    assert_eq!(lo.as_ref(), &Expr::text("abc"));
                    assert_eq!(hi.as_ref(), &Expr::text("abd"));
                    assert_eq!(col.explicit_collation(), Some("NOCASE"));
                }
                other => panic!("unexpected range terms: {:?}", other),
            }
        }
        other => panic!("expected index scan, got {:?}", other),
    }
    // The original LIKE is residue until the emitter proves the range
    // subsumes it
    let residue = plan.residue_terms();
    assert_eq!(residue.len(), 1);
    assert!(matches!(
        plan.term(residue[0]).expr.as_ref(),
        Expr::Like { .. }
    ));
}

#[test]
fn test_automatic_index_for_unindexed_join() {
    // t1(a) join t2(b) on a = b with no indexes anywhere: the inner
    // loop builds a transient index instead of rescanning
    let t1 = Table::new("t1", 5000).column(Column::new("a", Affinity::Integer));
    let t2 = Table::new("t2", 10_000).column(Column::new("b", Affinity::Integer));
    let src = vec![
        SrcItem::new(Arc::new(t1), 0),
        SrcItem::new(Arc::new(t2), 1),
    ];

    let req = WhereRequest::new(src)
        .filter(Expr::eq(Expr::column(0, 0), Expr::column(1, 0)))
        .result_set(vec![Expr::column(0, 0), Expr::column(1, 0)]);
    let plan = planner().plan(&req).unwrap();

    assert_eq!(plan.levels.len(), 2);
    let inner = &plan.levels[1];
    match &inner.access {
        LevelAccess::AutoIndex { index, .. } => {
            // Leading column is the constrained one
            let inner_rows = src_rows(inner.from);
            assert_eq!(index.columns[0], 0);
            // Setup cost is the documented build formula
            assert_eq!(
                inner.wloop.r_setup,
                log_est_add(est_log(inner_rows), inner_rows) + log_est(7)
            );
        }
        other => panic!("expected auto index, got {:?}", other),
    }

    fn src_rows(from: usize) -> i16 {
        if from == 0 {
            log_est(5000)
        } else {
            log_est(10_000)
        }
    }
}

#[test]
fn test_distinct_reduced_to_unique() {
    // t(a UNIQUE NOT NULL, b); SELECT DISTINCT a, b never produces
    // duplicates, so the distinct step is dropped
    let t = Table::new("t", 1000)
        .column(Column::new("a", Affinity::Integer).not_null())
        .column(Column::new("b", Affinity::Integer))
        .index(Index::new("u_a", vec![0]).unique());
    let src = vec![SrcItem::new(Arc::new(t), 0)];

    let req = WhereRequest::new(src)
        .distinct()
        .result_set(vec![Expr::column(0, 0), Expr::column(0, 1)]);
    let plan = planner().plan(&req).unwrap();
    assert_eq!(plan.distinct, DistinctMode::Unique);
}

#[test]
fn test_indexable_or_becomes_union() {
    // WHERE a = 1 OR b = 2 with an index on each column: union of two
    // index scans with rowid dedup
    let t = Table::new("t", 100_000)
        .column(Column::new("a", Affinity::Integer))
        .column(Column::new("b", Affinity::Integer))
        .index(Index::new("i_a", vec![0]))
        .index(Index::new("i_b", vec![1]));
    let src = vec![SrcItem::new(Arc::new(t), 0)];

    let filter = Expr::or(
        Expr::eq(Expr::column(0, 0), Expr::integer(1)),
        Expr::eq(Expr::column(0, 1), Expr::integer(2)),
    );
    let plan = planner()
        .plan(&WhereRequest::new(src).filter(filter))
        .unwrap();

    match &plan.levels[0].access {
        LevelAccess::OrUnion { branches } => {
            assert_eq!(branches.len(), 2);
            let names: Vec<String> = branches
                .iter()
                .map(|b| match &b.level.access {
                    LevelAccess::IndexScan { index, .. } => index.name.clone(),
                    other => panic!("expected index scan branch, got {:?}", other),
                })
                .collect();
            assert!(names.contains(&"i_a".to_string()));
            assert!(names.contains(&"i_b".to_string()));
        }
        other => panic!("expected OR union, got {:?}", other),
    }
}

#[test]
fn test_group_by_satisfied_in_any_column_order() {
    // GROUP BY b, a over index (a, b): equivalence is enough for
    // grouping, left-to-right order is not required
    let t = Table::new("t", 10_000)
        .column(Column::new("a", Affinity::Integer).not_null())
        .column(Column::new("b", Affinity::Integer).not_null())
        .index(Index::new("i_ab", vec![0, 1]).unique());
    let src = vec![SrcItem::new(Arc::new(t), 0)];

    let req = WhereRequest::new(src)
        .group_by(vec![
            OrderByTerm::asc(Expr::column(0, 1)),
            OrderByTerm::asc(Expr::column(0, 0)),
        ])
        .result_set(vec![Expr::column(0, 0), Expr::column(0, 1)]);
    let plan = planner().plan(&req).unwrap();
    assert!(plan.order_by_satisfied);
}

#[test]
fn test_order_by_desc_runs_index_backwards() {
    let t = Table::new("t", 10_000)
        .column(Column::new("a", Affinity::Integer))
        .index(Index::new("i_a", vec![0]));
    let src = vec![SrcItem::new(Arc::new(t), 0)];

    let req = WhereRequest::new(src)
        .order_by(vec![OrderByTerm::desc(Expr::column(0, 0))])
        .result_set(vec![Expr::column(0, 0)]);
    let plan = planner().plan(&req).unwrap();

    assert!(plan.order_by_satisfied);
    assert!(plan.levels[0].reversed);
    assert_eq!(plan.rev_mask, plan.levels[0].wloop.mask_self);
}

#[test]
fn test_left_join_on_term_never_drives_left_table() {
    // t1 LEFT JOIN t2 ON t1.a = t2.b: the ON term may not drive t1's
    // index on a, even though a = ... would normally qualify
    let t1 = Table::new("t1", 10_000)
        .column(Column::new("a", Affinity::Integer))
        .index(Index::new("i_a", vec![0]));
    let t2 = Table::new("t2", 10_000).column(Column::new("b", Affinity::Integer));
    let src = vec![
        SrcItem::new(Arc::new(t1), 0),
        SrcItem::new(Arc::new(t2), 1)
            .left_join()
            .on(Expr::eq(Expr::column(0, 0), Expr::column(1, 0))),
    ];

    let plan = planner()
        .plan(&WhereRequest::new(src).result_set(vec![Expr::column(0, 0), Expr::column(1, 0)]))
        .unwrap();

    assert_eq!(plan.levels[0].from, 0);
    assert!(matches!(plan.levels[0].access, LevelAccess::FullScan));
}

#[test]
fn test_unused_left_join_table_dropped() {
    // Nothing reads t2 and the join cannot add rows (unique key match):
    // the t2 level disappears from the plan
    let t1 = Table::new("t1", 1000).column(Column::new("a", Affinity::Integer));
    let t2 = Table::new("t2", 1000)
        .column(Column::new("b", Affinity::Integer).not_null())
        .index(Index::new("u_b", vec![0]).unique());
    let src = vec![
        SrcItem::new(Arc::new(t1), 0),
        SrcItem::new(Arc::new(t2), 1)
            .left_join()
            .on(Expr::eq(Expr::column(1, 0), Expr::column(0, 0))),
    ];

    let plan = planner()
        .plan(&WhereRequest::new(src).result_set(vec![Expr::column(0, 0)]))
        .unwrap();
    assert_eq!(plan.levels.len(), 1);
    assert_eq!(plan.levels[0].from, 0);
}

#[test]
fn test_covering_index_marked() {
    let t = Table::new("t", 10_000)
        .column(Column::new("a", Affinity::Integer))
        .column(Column::new("b", Affinity::Integer))
        .column(Column::new("c", Affinity::Integer))
        .index(Index::new("i_ab", vec![0, 1]));
    let src = vec![SrcItem::new(Arc::new(t), 0)];

    let req = WhereRequest::new(src)
        .filter(Expr::eq(Expr::column(0, 0), Expr::integer(1)))
        .result_set(vec![Expr::column(0, 1)]);
    let plan = planner().plan(&req).unwrap();

    match &plan.levels[0].access {
        LevelAccess::IndexScan { covering, .. } => assert!(covering),
        other => panic!("expected index scan, got {:?}", other),
    }
}

#[test]
fn test_indexed_by_forces_named_index() {
    let t = Table::new("t", 10_000)
        .column(Column::new("a", Affinity::Integer))
        .column(Column::new("b", Affinity::Integer))
        .index(Index::new("i_a", vec![0]))
        .index(Index::new("i_b", vec![1]));
    let src = vec![SrcItem::new(Arc::new(t), 0).indexed_by("i_b")];

    // Even though i_a matches the WHERE better, INDEXED BY pins i_b
    let req = WhereRequest::new(src)
        .filter(Expr::eq(Expr::column(0, 1), Expr::integer(3)))
        .result_set(vec![Expr::column(0, 0)]);
    let plan = planner().plan(&req).unwrap();
    match &plan.levels[0].access {
        LevelAccess::IndexScan { index, .. } => assert_eq!(index.name, "i_b"),
        other => panic!("expected index scan, got {:?}", other),
    }
}

#[test]
fn test_not_indexed_forbids_all_indexes() {
    // The index on a would win easily, but NOT INDEXED restricts the
    // table to its rowid probe
    let t = Table::new("t", 10_000)
        .column(Column::new("a", Affinity::Integer))
        .index(Index::new("i_a", vec![0]));
    let src = vec![SrcItem::new(Arc::new(t), 0).not_indexed()];

    let req = WhereRequest::new(src)
        .filter(Expr::eq(Expr::column(0, 0), Expr::integer(5)))
        .result_set(vec![Expr::column(0, 0)]);
    let plan = planner().plan(&req).unwrap();

    assert!(matches!(plan.levels[0].access, LevelAccess::FullScan));
    // The equality stays behind as a filter
    assert_eq!(plan.residue_terms().len(), 1);
}

#[test]
fn test_indexed_by_unknown_index_is_an_error() {
    let t = Table::new("t", 100).column(Column::new("a", Affinity::Integer));
    let src = vec![SrcItem::new(Arc::new(t), 0).indexed_by("nope")];
    let err = planner().plan(&WhereRequest::new(src)).unwrap_err();
    assert!(err.to_string().contains("no such index"));
}

#[test]
fn test_histogram_narrows_range_estimate() {
    // With samples saying almost everything is below the bound, the
    // range loop's output estimate shrinks accordingly
    use rustql_planner::expr::Literal;
    use rustql_planner::schema::IndexSample;

    let samples = vec![
        IndexSample {
            value: Literal::Integer(100),
            n_eq: 10,
            n_lt: 9_000,
        },
        IndexSample {
            value: Literal::Integer(500),
            n_eq: 10,
            n_lt: 9_900,
        },
    ];
    let t = Table::new("t", 10_000)
        .column(Column::new("a", Affinity::Integer))
        .index(Index::new("i_a", vec![0]).samples(samples));
    let src = vec![SrcItem::new(Arc::new(t), 0)];

    let req = WhereRequest::new(src)
        .filter(Expr::binary(
            BinaryOp::Gt,
            Expr::column(0, 0),
            Expr::integer(100),
        ))
        .result_set(vec![Expr::column(0, 0)]);
    let plan = planner().plan(&req).unwrap();

    // About 990 of 10000 rows remain; far below the default quarter
    let level = &plan.levels[0];
    assert!(matches!(level.access, LevelAccess::IndexScan { .. }));
    assert!(level.wloop.n_out <= log_est(1000));
}
