//! ORDER BY satisfaction analysis
//!
//! Decides whether a candidate path produces rows already in the order
//! an ORDER BY (or GROUP BY, or DISTINCT set) requires, possibly with
//! some loops scanned backwards.
//!
//! The walk tracks *order-distinctness*: a path prefix is order-distinct
//! when no two of its row combinations agree on every ORDER BY column
//! seen so far. A loop keeps the prefix order-distinct if it yields at
//! most one row, or if the index columns it leaves unconstrained form a
//! UNIQUE NOT NULL key prefix. Once a loop breaks order-distinctness,
//! inner loops cannot contribute any further ordering.

use crate::planner::analyze::{expr_collation, expr_usage};
use crate::planner::loops::{LoopFlags, LoopPayload, WhereLoop};
use crate::planner::mask::{mask_bit, Bitmask, MaskSet, BMS};
use crate::planner::scan::find_term;
use crate::planner::term::{ClauseSet, Operator};
use crate::planner::{OrderByTerm, PlannerConfig, SrcItem};
use crate::expr::Expr;
use crate::schema::SortOrder;

/// How strictly the clause must be honored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OrderCheck {
    /// Left-to-right order and direction both matter
    OrderBy,
    /// Equivalence is enough; direction is irrelevant
    GroupBy,
    /// Equivalence is enough; used for DISTINCT reduction to a sort
    DistinctBy,
}

/// Three-valued answer: satisfied, not satisfied, or undecidable until
/// more loops are appended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Satisfied {
    Yes,
    No,
    Unknown,
}

/// Shared read-only planning state threaded through the analyzer
pub(crate) struct OrderCtx<'a> {
    pub cfg: &'a PlannerConfig,
    pub src: &'a [SrcItem],
    pub ms: &'a MaskSet,
    pub cs: &'a ClauseSet,
    pub wc: usize,
}

/// Test whether the path `prefix` extended by `last` delivers rows in
/// the requested order. `rev_mask` receives the set of loops that must
/// run backwards for the order to hold.
pub(crate) fn path_satisfies_order_by(
    ctx: &OrderCtx<'_>,
    order_by: &[OrderByTerm],
    kind: OrderCheck,
    prefix: &[&WhereLoop],
    last: &WhereLoop,
    rev_mask: &mut Bitmask,
) -> Satisfied {
    if !prefix.is_empty() && !ctx.cfg.order_by_idx_join {
        return Satisfied::No;
    }
    let n_order_by = order_by.len();
    if n_order_by > BMS - 1 {
        return Satisfied::No;
    }

    let ob_done: Bitmask = mask_bit(n_order_by) - 1;
    let mut ob_sat: Bitmask = 0;
    let mut is_order_distinct = true;
    let mut order_distinct_mask: Bitmask = 0;
    let mut ready: Bitmask = 0;

    let n_loop = prefix.len();
    let mut prev: Option<&WhereLoop> = None;

    for i_loop in 0..=n_loop {
        if !is_order_distinct || ob_sat >= ob_done {
            break;
        }
        if let Some(p) = prev {
            ready |= p.mask_self;
        }
        let wloop = if i_loop < n_loop {
            prefix[i_loop]
        } else {
            last
        };
        prev = Some(wloop);

        if wloop.flags.contains(LoopFlags::VIRTUALTABLE) {
            if let LoopPayload::VTab { ordered: true, .. } = wloop.payload {
                ob_sat = ob_done;
            }
            break;
        }

        let cursor = ctx.src[wloop.tab].cursor;
        let table = &ctx.src[wloop.tab].table;

        // An ORDER BY column pinned to a constant by an outer-loop term
        // imposes no ordering requirement
        for (i, ob) in order_by.iter().enumerate() {
            if ob_sat & mask_bit(i) != 0 {
                continue;
            }
            let obe = ob.expr.skip_collate();
            let (t, c) = match obe.column_ref() {
                Some(pair) => pair,
                None => continue,
            };
            if t != cursor {
                continue;
            }
            let found = find_term(
                ctx.cs,
                ctx.src,
                ctx.wc,
                cursor,
                c,
                !ready,
                Operator::EQ | Operator::ISNULL,
                None,
            );
            let tref = match found {
                Some(r) => r,
                None => continue,
            };
            let term = ctx.cs.term(tref);
            if term.e_operator.contains(Operator::EQ) && c >= 0 {
                let ob_coll = expr_collation(ctx.src, &ob.expr);
                let term_coll = match term.expr.as_ref() {
                    Expr::Binary { left, right, .. } => {
                        crate::planner::analyze::comparison_collation(ctx.src, left, right)
                    }
                    _ => "BINARY".to_string(),
                };
                if !ob_coll.eq_ignore_ascii_case(&term_coll) {
                    continue;
                }
            }
            ob_sat |= mask_bit(i);
        }

        if !wloop.flags.contains(LoopFlags::ONEROW) {
            let probe = match wloop.index() {
                Some(idx) => idx.clone(),
                None => return Satisfied::No,
            };
            if probe.unordered {
                return Satisfied::No;
            }
            let n_key = probe.key_count();
            // A regular index is followed by an implicit rowid tail;
            // the rowid probe is its own single column
            let n_column = if probe.rowid_pk { 1 } else { n_key + 1 };
            if !probe.rowid_pk {
                is_order_distinct = probe.unique;
            }

            let n_eq = wloop.n_eq() as usize;
            let mut rev = false;
            let mut rev_set = false;
            let mut distinct_columns = false;

            for j in 0..n_column {
                // Equality-constrained columns impose nothing; an IS
                // NULL match can repeat, which breaks distinctness
                if j < n_eq {
                    let t_op = ctx.cs.term(wloop.terms[j]).e_operator;
                    if t_op.intersects(Operator::EQ | Operator::ISNULL) {
                        if t_op.contains(Operator::ISNULL) {
                            is_order_distinct = false;
                        }
                        continue;
                    }
                }

                let (i_column, rev_idx) = if j < n_key {
                    (
                        probe.columns[j],
                        probe.sort_orders.get(j).copied().unwrap_or_default()
                            == SortOrder::Desc,
                    )
                } else {
                    (-1, false)
                };

                // An unconstrained nullable column ends distinctness
                if is_order_distinct
                    && i_column >= 0
                    && j >= n_eq
                    && !table.column_not_null(i_column)
                {
                    is_order_distinct = false;
                }

                // Find the ORDER BY term this index column satisfies.
                // Plain ORDER BY consumes strictly left to right, so
                // only the first open term is examined; GROUP BY and
                // DISTINCT accept any open term.
                let mut is_match = false;
                let mut matched = 0usize;
                for (i, ob) in order_by.iter().enumerate() {
                    if ob_sat & mask_bit(i) != 0 {
                        continue;
                    }
                    let once = kind == OrderCheck::OrderBy;
                    let obe = ob.expr.skip_collate();
                    let col_ok = match obe.column_ref() {
                        Some((t, c)) => t == cursor && c == i_column,
                        None => false,
                    };
                    if col_ok {
                        let coll_ok = if i_column >= 0 {
                            let ob_coll = expr_collation(ctx.src, &ob.expr);
                            probe
                                .collations
                                .get(j)
                                .map_or(false, |c| ob_coll.eq_ignore_ascii_case(c))
                        } else {
                            true
                        };
                        if coll_ok {
                            is_match = true;
                            matched = i;
                            break;
                        }
                    }
                    if once {
                        break;
                    }
                }

                if is_match && kind != OrderCheck::GroupBy {
                    // The scan direction, once chosen, must agree with
                    // every later term that lands on this loop
                    let want_desc = order_by[matched].desc;
                    if rev_set {
                        if (rev ^ rev_idx) != want_desc {
                            is_match = false;
                        }
                    } else {
                        rev = rev_idx ^ want_desc;
                        if rev {
                            *rev_mask |= wloop.mask_self;
                        }
                        rev_set = true;
                    }
                }
                if is_match {
                    if i_column < 0 {
                        distinct_columns = true;
                    }
                    ob_sat |= mask_bit(matched);
                } else {
                    if j == 0 || j < n_key {
                        is_order_distinct = false;
                    }
                    break;
                }
            }
            if distinct_columns {
                is_order_distinct = true;
            }
        }

        // Once this loop is known order-distinct, any ORDER BY term that
        // draws only on order-distinct loops (or constants) is satisfied
        if is_order_distinct {
            order_distinct_mask |= wloop.mask_self;
            for (i, ob) in order_by.iter().enumerate() {
                if ob_sat & mask_bit(i) != 0 {
                    continue;
                }
                let m_term = expr_usage(ctx.ms, &ob.expr);
                if m_term == 0 && !ob.expr.is_constant() {
                    continue;
                }
                if m_term & !order_distinct_mask == 0 {
                    ob_sat |= mask_bit(i);
                }
            }
        }
    }

    if ob_sat == ob_done {
        Satisfied::Yes
    } else if !is_order_distinct {
        Satisfied::No
    } else {
        Satisfied::Unknown
    }
}

// ============================================================================
// DISTINCT reduction
// ============================================================================

/// True when DISTINCT adds nothing: a single-table query where some
/// UNIQUE index has every column either in the distinct projection or
/// pinned to a constant, with all of those columns NOT NULL.
pub(crate) fn is_distinct_redundant(
    ctx: &OrderCtx<'_>,
    distinct: &[Expr],
) -> bool {
    if ctx.src.len() != 1 {
        return false;
    }
    let item = &ctx.src[0];
    let cursor = item.cursor;
    let table = &item.table;

    // The rowid is distinct by construction
    for e in distinct {
        if let Some((t, c)) = e.skip_collate().column_ref() {
            if t == cursor && c < 0 {
                return true;
            }
        }
    }

    for idx in &table.indexes {
        if !idx.unique {
            continue;
        }
        let mut all = true;
        for (j, &col) in idx.columns.iter().enumerate() {
            let constrained = find_term(
                ctx.cs,
                ctx.src,
                ctx.wc,
                cursor,
                col,
                !0,
                Operator::EQ,
                Some(idx.as_ref()),
            )
            .is_some();
            if !constrained {
                let in_projection = distinct.iter().any(|e| {
                    let obe = e.skip_collate();
                    match obe.column_ref() {
                        Some((t, c)) if t == cursor && c == col => idx
                            .collations
                            .get(j)
                            .map_or(false, |name| {
                                expr_collation(ctx.src, e).eq_ignore_ascii_case(name)
                            }),
                        _ => false,
                    }
                });
                if !in_projection || !table.column_not_null(col) {
                    all = false;
                    break;
                }
            }
        }
        if all {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::analyze::Analyzer;
    use crate::planner::term::ClauseOp;
    use crate::planner::PlannerConfig;
    use crate::schema::{Affinity, Column, Index, Table};
    use std::sync::Arc;

    fn ctx_for<'a>(
        cfg: &'a PlannerConfig,
        src: &'a [SrcItem],
        ms: &'a MaskSet,
        cs: &'a ClauseSet,
        wc: usize,
    ) -> OrderCtx<'a> {
        OrderCtx {
            cfg,
            src,
            ms,
            cs,
            wc,
        }
    }

    fn analyze_where(
        src: &[SrcItem],
        cfg: &PlannerConfig,
        e: Option<&Expr>,
    ) -> (ClauseSet, MaskSet, usize) {
        let mut ms = MaskSet::new();
        for item in src {
            ms.assign(item.cursor);
        }
        let mut cs = ClauseSet::new();
        let wc = cs.push_clause(ClauseOp::And, None);
        if let Some(e) = e {
            let mut an = Analyzer {
                cs: &mut cs,
                ms: &ms,
                src,
                cfg,
            };
            an.split(wc, e, None);
            an.analyze_all(wc);
        }
        (cs, ms, wc)
    }

    fn indexed_table() -> Table {
        Table::new("t", 10_000)
            .column(Column::new("a", Affinity::Integer).not_null())
            .column(Column::new("b", Affinity::Integer).not_null())
            .column(Column::new("c", Affinity::Text))
            .index(Index::new("i_ab", vec![0, 1]).unique())
    }

    fn loop_for_index(src: &[SrcItem], ms: &MaskSet, tab: usize, idx: &Arc<Index>) -> WhereLoop {
        WhereLoop {
            prereq: 0,
            mask_self: ms.mask_of(src[tab].cursor),
            tab,
            sort_idx: 1,
            r_setup: 0,
            r_run: 100,
            n_out: 100,
            flags: LoopFlags::INDEXED | LoopFlags::IDX_ONLY,
            terms: Vec::new(),
            payload: LoopPayload::BTree {
                n_eq: 0,
                index: Some(idx.clone()),
            },
        }
    }

    #[test]
    fn test_index_satisfies_order_by() {
        let t = indexed_table();
        let idx = t.indexes[0].clone();
        let src = vec![SrcItem::new(Arc::new(t), 0)];
        let cfg = PlannerConfig::default();
        let (cs, ms, wc) = analyze_where(&src, &cfg, None);
        let ctx = ctx_for(&cfg, &src, &ms, &cs, wc);
        let l = loop_for_index(&src, &ms, 0, &idx);

        let order = vec![
            OrderByTerm::asc(Expr::column(0, 0)),
            OrderByTerm::asc(Expr::column(0, 1)),
        ];
        let mut rev = 0;
        assert_eq!(
            path_satisfies_order_by(&ctx, &order, OrderCheck::OrderBy, &[], &l, &mut rev),
            Satisfied::Yes
        );
        assert_eq!(rev, 0);
    }

    #[test]
    fn test_descending_order_reverses_loop() {
        let t = indexed_table();
        let idx = t.indexes[0].clone();
        let src = vec![SrcItem::new(Arc::new(t), 0)];
        let cfg = PlannerConfig::default();
        let (cs, ms, wc) = analyze_where(&src, &cfg, None);
        let ctx = ctx_for(&cfg, &src, &ms, &cs, wc);
        let l = loop_for_index(&src, &ms, 0, &idx);

        let order = vec![
            OrderByTerm::desc(Expr::column(0, 0)),
            OrderByTerm::desc(Expr::column(0, 1)),
        ];
        let mut rev = 0;
        assert_eq!(
            path_satisfies_order_by(&ctx, &order, OrderCheck::OrderBy, &[], &l, &mut rev),
            Satisfied::Yes
        );
        assert_eq!(rev, l.mask_self);
    }

    #[test]
    fn test_mixed_directions_not_satisfied() {
        let t = indexed_table();
        let idx = t.indexes[0].clone();
        let src = vec![SrcItem::new(Arc::new(t), 0)];
        let cfg = PlannerConfig::default();
        let (cs, ms, wc) = analyze_where(&src, &cfg, None);
        let ctx = ctx_for(&cfg, &src, &ms, &cs, wc);
        let l = loop_for_index(&src, &ms, 0, &idx);

        let order = vec![
            OrderByTerm::asc(Expr::column(0, 0)),
            OrderByTerm::desc(Expr::column(0, 1)),
        ];
        let mut rev = 0;
        assert_eq!(
            path_satisfies_order_by(&ctx, &order, OrderCheck::OrderBy, &[], &l, &mut rev),
            Satisfied::No
        );
    }

    #[test]
    fn test_equality_pinned_column_skipped() {
        // WHERE a = 5 ORDER BY b: the index (a, b) satisfies it because
        // a is pinned by a constant
        let t = indexed_table();
        let idx = t.indexes[0].clone();
        let src = vec![SrcItem::new(Arc::new(t), 0)];
        let cfg = PlannerConfig::default();
        let e = Expr::eq(Expr::column(0, 0), Expr::integer(5));
        let (cs, ms, wc) = analyze_where(&src, &cfg, Some(&e));
        let ctx = ctx_for(&cfg, &src, &ms, &cs, wc);
        let mut l = loop_for_index(&src, &ms, 0, &idx);
        l.terms.push(crate::planner::term::TermRef { clause: wc, term: 0 });
        if let LoopPayload::BTree { n_eq, .. } = &mut l.payload {
            *n_eq = 1;
        }
        l.flags |= LoopFlags::COLUMN_EQ;

        let order = vec![OrderByTerm::asc(Expr::column(0, 1))];
        let mut rev = 0;
        assert_eq!(
            path_satisfies_order_by(&ctx, &order, OrderCheck::OrderBy, &[], &l, &mut rev),
            Satisfied::Yes
        );
    }

    #[test]
    fn test_collation_mismatch_defeats_order() {
        let t = Table::new("t", 1000)
            .column(Column::new("c", Affinity::Text))
            .index(Index::new("i_c", vec![0]));
        let idx = t.indexes[0].clone();
        let src = vec![SrcItem::new(Arc::new(t), 0)];
        let cfg = PlannerConfig::default();
        let (cs, ms, wc) = analyze_where(&src, &cfg, None);
        let ctx = ctx_for(&cfg, &src, &ms, &cs, wc);
        let l = loop_for_index(&src, &ms, 0, &idx);

        let order = vec![OrderByTerm::asc(Expr::collate(
            Expr::column(0, 0),
            "NOCASE",
        ))];
        let mut rev = 0;
        assert_eq!(
            path_satisfies_order_by(&ctx, &order, OrderCheck::OrderBy, &[], &l, &mut rev),
            Satisfied::No
        );
    }

    #[test]
    fn test_distinct_redundant_on_unique_not_null() {
        let t = Table::new("t", 1000)
            .column(Column::new("a", Affinity::Integer).not_null())
            .column(Column::new("b", Affinity::Integer))
            .index(Index::new("u_a", vec![0]).unique());
        let src = vec![SrcItem::new(Arc::new(t), 0)];
        let cfg = PlannerConfig::default();
        let (cs, ms, wc) = analyze_where(&src, &cfg, None);
        let ctx = ctx_for(&cfg, &src, &ms, &cs, wc);

        let distinct = vec![Expr::column(0, 0), Expr::column(0, 1)];
        assert!(is_distinct_redundant(&ctx, &distinct));
    }

    #[test]
    fn test_distinct_not_redundant_when_nullable() {
        let t = Table::new("t", 1000)
            .column(Column::new("a", Affinity::Integer))
            .index(Index::new("u_a", vec![0]).unique());
        let src = vec![SrcItem::new(Arc::new(t), 0)];
        let cfg = PlannerConfig::default();
        let (cs, ms, wc) = analyze_where(&src, &cfg, None);
        let ctx = ctx_for(&cfg, &src, &ms, &cs, wc);

        let distinct = vec![Expr::column(0, 0)];
        assert!(!is_distinct_redundant(&ctx, &distinct));
    }

    #[test]
    fn test_distinct_redundant_via_rowid() {
        let t = Table::new("t", 1000).column(Column::new("a", Affinity::Integer));
        let src = vec![SrcItem::new(Arc::new(t), 0)];
        let cfg = PlannerConfig::default();
        let (cs, ms, wc) = analyze_where(&src, &cfg, None);
        let ctx = ctx_for(&cfg, &src, &ms, &cs, wc);

        let distinct = vec![Expr::column(0, -1), Expr::column(0, 0)];
        assert!(is_distinct_redundant(&ctx, &distinct));
    }
}
