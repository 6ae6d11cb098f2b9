//! Planner-wide properties: determinism, invariants over chosen paths,
//! and boundary behavior.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rustql_planner::expr::Expr;
use rustql_planner::schema::{Affinity, Column, Index, Table};
use rustql_planner::{
    LevelAccess, PlannerConfig, SrcItem, WherePlan, WherePlanner, WhereRequest,
};

fn planner() -> WherePlanner {
    WherePlanner::new(PlannerConfig::default())
}

/// Compact, comparable rendering of a plan's shape
fn summary(plan: &WherePlan) -> Vec<String> {
    plan.levels
        .iter()
        .map(|l| {
            let access = match &l.access {
                LevelAccess::FullScan => "scan".to_string(),
                LevelAccess::IndexScan { index, n_eq, .. } => {
                    format!("idx:{}:{}", index.name, n_eq)
                }
                LevelAccess::AutoIndex { .. } => "auto".to_string(),
                LevelAccess::VirtualTable { idx_num, .. } => format!("vtab:{}", idx_num),
                LevelAccess::OrUnion { branches } => format!("or:{}", branches.len()),
            };
            format!(
                "{}@{} {} rev={}",
                l.from, l.cursor, access, l.reversed
            )
        })
        .collect()
}

fn three_table_src() -> Vec<SrcItem> {
    let t1 = Table::new("t1", 50_000)
        .column(Column::new("a", Affinity::Integer))
        .index(Index::new("i1_a", vec![0]));
    let t2 = Table::new("t2", 2000)
        .column(Column::new("b", Affinity::Integer))
        .column(Column::new("c", Affinity::Integer))
        .index(Index::new("i2_b", vec![0]));
    let t3 = Table::new("t3", 100).column(Column::new("d", Affinity::Integer));
    vec![
        SrcItem::new(Arc::new(t1), 0),
        SrcItem::new(Arc::new(t2), 1),
        SrcItem::new(Arc::new(t3), 2),
    ]
}

fn three_table_filter() -> Expr {
    // t1.a = t2.b AND t2.c = t3.d AND t3.d > 0
    Expr::and(
        Expr::and(
            Expr::eq(Expr::column(0, 0), Expr::column(1, 0)),
            Expr::eq(Expr::column(1, 1), Expr::column(2, 0)),
        ),
        Expr::binary(
            rustql_planner::expr::BinaryOp::Gt,
            Expr::column(2, 0),
            Expr::integer(0),
        ),
    )
}

#[test]
fn test_path_invariants_hold() {
    let plan = planner()
        .plan(&WhereRequest::new(three_table_src()).filter(three_table_filter()))
        .unwrap();

    // Every FROM position appears exactly once
    let mut seen: Vec<usize> = plan.levels.iter().map(|l| l.from).collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 3);

    // Prerequisites point strictly at outer loops and never at the
    // loop's own table
    let mut ready = 0u64;
    for level in &plan.levels {
        let l = &level.wloop;
        assert_eq!(l.prereq & l.mask_self, 0);
        assert_eq!(l.prereq & !ready, 0, "prereq must be satisfied by outer loops");
        ready |= l.mask_self;
    }
}

#[test]
fn test_replanning_is_deterministic() {
    let p = planner();
    let req = WhereRequest::new(three_table_src()).filter(three_table_filter());
    let first = summary(&p.plan(&req).unwrap());
    for _ in 0..3 {
        let req = WhereRequest::new(three_table_src()).filter(three_table_filter());
        assert_eq!(summary(&p.plan(&req).unwrap()), first);
    }
}

#[test]
fn test_tautology_does_not_change_plan() {
    let p = planner();
    let base = p
        .plan(&WhereRequest::new(three_table_src()).filter(three_table_filter()))
        .unwrap();
    let with_tautology = p
        .plan(&WhereRequest::new(three_table_src()).filter(Expr::and(
            three_table_filter(),
            Expr::eq(Expr::integer(1), Expr::integer(1)),
        )))
        .unwrap();
    assert_eq!(summary(&base), summary(&with_tautology));
    // The tautology survives as residue, not as an error
    assert_eq!(with_tautology.residue_terms().len(), 1);
}

#[test]
fn test_conjunct_order_does_not_change_plan() {
    let p = planner();
    let forward = p
        .plan(&WhereRequest::new(three_table_src()).filter(three_table_filter()))
        .unwrap();

    // Same conjuncts, reversed
    let reversed = Expr::and(
        Expr::and(
            Expr::binary(
                rustql_planner::expr::BinaryOp::Gt,
                Expr::column(2, 0),
                Expr::integer(0),
            ),
            Expr::eq(Expr::column(1, 1), Expr::column(2, 0)),
        ),
        Expr::eq(Expr::column(0, 0), Expr::column(1, 0)),
    );
    let swapped = p
        .plan(&WhereRequest::new(three_table_src()).filter(reversed))
        .unwrap();
    assert_eq!(summary(&forward), summary(&swapped));
}

#[test]
fn test_constant_true_where_is_like_no_where() {
    let p = planner();
    let t = || {
        vec![SrcItem::new(
            Arc::new(Table::new("t", 500).column(Column::new("a", Affinity::Integer))),
            0,
        )]
    };
    let without = p.plan(&WhereRequest::new(t())).unwrap();
    let with = p
        .plan(&WhereRequest::new(t()).filter(Expr::eq(Expr::integer(1), Expr::integer(1))))
        .unwrap();
    assert_eq!(summary(&without), summary(&with));
}

#[test]
fn test_empty_in_list_plans_normally() {
    let t = Table::new("t", 1000)
        .column(Column::new("a", Affinity::Integer))
        .index(Index::new("i_a", vec![0]));
    let src = vec![SrcItem::new(Arc::new(t), 0)];
    let plan = planner()
        .plan(&WhereRequest::new(src).filter(Expr::in_values(Expr::column(0, 0), vec![])))
        .unwrap();
    // Still an index probe; it will simply find nothing at run time
    match &plan.levels[0].access {
        LevelAccess::IndexScan { n_eq, .. } => assert_eq!(*n_eq, 1),
        other => panic!("expected index scan, got {:?}", other),
    }
}

#[test]
fn test_sixty_four_tables_plan() {
    let src: Vec<SrcItem> = (0..64)
        .map(|i| {
            SrcItem::new(
                Arc::new(Table::new(format!("t{}", i), 10).column(Column::new(
                    "a",
                    Affinity::Integer,
                ))),
                i,
            )
        })
        .collect();
    let plan = planner().plan(&WhereRequest::new(src)).unwrap();
    assert_eq!(plan.levels.len(), 64);
}

#[test]
fn test_sixty_five_tables_rejected() {
    let src: Vec<SrcItem> = (0..65)
        .map(|i| {
            SrcItem::new(
                Arc::new(Table::new(format!("t{}", i), 10).column(Column::new(
                    "a",
                    Affinity::Integer,
                ))),
                i,
            )
        })
        .collect();
    let err = planner().plan(&WhereRequest::new(src)).unwrap_err();
    assert!(err.to_string().contains("64 tables"));
}

#[test]
fn test_force_reverse_output() {
    let cfg = PlannerConfig {
        reverse_order: true,
        ..PlannerConfig::default()
    };
    let t = Table::new("t", 100).column(Column::new("a", Affinity::Integer));
    let src = vec![SrcItem::new(Arc::new(t), 0)];
    let plan = WherePlanner::new(cfg)
        .plan(&WhereRequest::new(src))
        .unwrap();
    assert!(plan.levels[0].reversed);
}

#[test]
fn test_unusable_terms_are_residue_not_errors() {
    let t = Table::new("t", 1000)
        .column(Column::new("a", Affinity::Integer))
        .index(Index::new("i_a", vec![0]));
    let src = vec![SrcItem::new(Arc::new(t), 0)];

    // a != 5 cannot drive any index
    let plan = planner()
        .plan(&WhereRequest::new(src).filter(Expr::binary(
            rustql_planner::expr::BinaryOp::Ne,
            Expr::column(0, 0),
            Expr::integer(5),
        )))
        .unwrap();
    assert!(matches!(plan.levels[0].access, LevelAccess::FullScan));
    assert_eq!(plan.residue_terms().len(), 1);
}

#[test]
fn test_transitive_constant_reaches_join_column() {
    // x = y AND y = 3: the constant can seed an index on x through the
    // equivalence, so the x-side loop needs no prerequisite on y's table
    let t1 = Table::new("t1", 100_000)
        .column(Column::new("x", Affinity::Integer))
        .index(Index::new("i_x", vec![0]));
    let t2 = Table::new("t2", 100_000)
        .column(Column::new("y", Affinity::Integer))
        .index(Index::new("i_y", vec![0]));
    let src = vec![
        SrcItem::new(Arc::new(t1), 0),
        SrcItem::new(Arc::new(t2), 1),
    ];
    let filter = Expr::and(
        Expr::eq(Expr::column(0, 0), Expr::column(1, 0)),
        Expr::eq(Expr::column(1, 0), Expr::integer(3)),
    );
    let plan = planner()
        .plan(&WhereRequest::new(src).filter(filter))
        .unwrap();

    // Both levels use their index with one equality; neither is a scan
    for level in &plan.levels {
        match &level.access {
            LevelAccess::IndexScan { n_eq, .. } => assert_eq!(*n_eq, 1),
            other => panic!("expected index scans on both levels, got {:?}", other),
        }
    }
}
