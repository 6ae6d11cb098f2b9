//! WHERE-clause analysis and join planning
//!
//! Given the decomposed WHERE clause of a statement, the FROM list, an
//! optional ORDER BY (or GROUP BY or DISTINCT set) and the catalog of
//! available indexes, decide in what order to visit the tables, which
//! index to use for each, and how to scan it, minimizing estimated cost
//! while preserving SQL semantics.
//!
//! The pipeline: the clause normalizer ([`analyze`]) splits and
//! classifies WHERE terms; the loop builder ([`loops`]) enumerates
//! candidate scans per table; the path solver ([`solver`]) searches join
//! orders keeping the N best prefixes; the ORDER BY analyzer ([`order`])
//! folds sort avoidance into the search. The result is a [`plan::WherePlan`]
//! handed to the code emitter.

pub mod analyze;
pub mod cost;
pub mod loops;
pub mod mask;
pub mod order;
pub mod plan;
pub mod scan;
pub mod solver;
pub mod term;
pub mod vtab;

use std::sync::Arc;

use bitflags::bitflags;

use crate::error::{Error, ErrorCode, Result};
use crate::expr::Expr;
use crate::schema::Table;

use analyze::{expr_usage, Analyzer};
use cost::LogEst;
use loops::{LoopBuilder, LoopFlags, LoopPayload, WhereLoop};
use mask::{mask_bit, Bitmask, MaskSet, BMS};
use order::{is_distinct_redundant, OrderCheck, OrderCtx};
use plan::{build_auto_index, DistinctMode, LevelAccess, OrBranch, WhereLevel, WherePlan};
use term::{ClauseOp, ClauseSet, Operator, TermRef};
use vtab::VirtualTable;

// ============================================================================
// Configuration
// ============================================================================

bitflags! {
    /// Gates on the planner's debug output
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TraceFlags: u32 {
        /// Path-solver rounds
        const SOLVER = 0x01;
        /// Candidate loop insertion
        const LOOPS = 0x02;
        /// Statistics-based estimates
        const ESTIMATE = 0x04;
    }
}

/// Planner behavior switches. Every optimization defaults to enabled;
/// `reverse_order` is a diagnostic aid and defaults off.
#[derive(Clone)]
pub struct PlannerConfig {
    /// Use histogram samples when estimating equalities and ranges
    pub stat3: bool,
    /// Consider building transient automatic indexes
    pub auto_index: bool,
    /// Prefer covering-index scans over table scans
    pub cover_idx_scan: bool,
    /// Propagate constraints across `x = y` equivalences
    pub transitive: bool,
    /// Drop LEFT JOIN tables nothing reads
    pub omit_noop_join: bool,
    /// Detect redundant DISTINCT clauses
    pub distinct_opt: bool,
    /// Let inner join loops contribute to ORDER BY satisfaction
    pub order_by_idx_join: bool,
    /// Force every scan to run backwards when there is no ORDER BY
    pub reverse_order: bool,
    /// LIKE is case sensitive (GLOB always is)
    pub case_sensitive_like: bool,
    /// Which debug prints are live
    pub trace: TraceFlags,
    /// Sink for debug prints; tracing is free when unset
    pub trace_sink: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            stat3: true,
            auto_index: true,
            cover_idx_scan: true,
            transitive: true,
            omit_noop_join: true,
            distinct_opt: true,
            order_by_idx_join: true,
            reverse_order: false,
            case_sensitive_like: false,
            trace: TraceFlags::empty(),
            trace_sink: None,
        }
    }
}

impl PlannerConfig {
    /// Emit a gated debug line; the closure only runs when the gate is
    /// open and a sink is installed
    pub(crate) fn trace(&self, flag: TraceFlags, f: impl FnOnce() -> String) {
        if self.trace.intersects(flag) {
            if let Some(sink) = &self.trace_sink {
                sink(&f());
            }
        }
    }
}

// ============================================================================
// Request model
// ============================================================================

bitflags! {
    /// Join operator connecting a FROM-list entry to its predecessors
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct JoinType: u8 {
        /// LEFT OUTER JOIN
        const LEFT = 0x01;
        /// CROSS JOIN: the author's ordering is binding
        const CROSS = 0x02;
    }
}

impl Default for JoinType {
    fn default() -> Self {
        JoinType::empty()
    }
}

/// One entry of the FROM list
pub struct SrcItem {
    /// Catalog description of the table
    pub table: Arc<Table>,
    /// Cursor number the emitter will open for it
    pub cursor: i32,
    /// How the entry joins to the entries before it
    pub join_type: JoinType,
    /// ON-clause expression, if any
    pub on_clause: Option<Expr>,
    /// INDEXED BY name; forces that index or fails
    pub indexed_by: Option<String>,
    /// NOT INDEXED; forbids all indexes
    pub not_indexed: bool,
    /// Module planning hook when the table is virtual
    pub vtab: Option<Arc<dyn VirtualTable>>,
}

impl SrcItem {
    pub fn new(table: Arc<Table>, cursor: i32) -> Self {
        SrcItem {
            table,
            cursor,
            join_type: JoinType::empty(),
            on_clause: None,
            indexed_by: None,
            not_indexed: false,
            vtab: None,
        }
    }

    pub fn left_join(mut self) -> Self {
        self.join_type |= JoinType::LEFT;
        self
    }

    pub fn cross_join(mut self) -> Self {
        self.join_type |= JoinType::CROSS;
        self
    }

    pub fn on(mut self, e: Expr) -> Self {
        self.on_clause = Some(e);
        self
    }

    pub fn indexed_by(mut self, name: impl Into<String>) -> Self {
        self.indexed_by = Some(name.into());
        self
    }

    pub fn not_indexed(mut self) -> Self {
        self.not_indexed = true;
        self
    }

    pub fn vtab(mut self, module: Arc<dyn VirtualTable>) -> Self {
        self.vtab = Some(module);
        self
    }
}

/// One ORDER BY (or GROUP BY) term
#[derive(Clone)]
pub struct OrderByTerm {
    pub expr: Expr,
    pub desc: bool,
}

impl OrderByTerm {
    pub fn asc(expr: Expr) -> Self {
        OrderByTerm { expr, desc: false }
    }

    pub fn desc(expr: Expr) -> Self {
        OrderByTerm { expr, desc: true }
    }
}

/// Everything the statement compiler hands the planner for one
/// SELECT/UPDATE/DELETE
pub struct WhereRequest {
    pub src: Vec<SrcItem>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderByTerm>,
    /// `order_by` is really a GROUP BY set: equivalence suffices
    pub group_by: bool,
    /// SELECT DISTINCT
    pub want_distinct: bool,
    /// Projection; None means every column may be read
    pub result_set: Option<Vec<Expr>>,
    /// How many times the caller expects to run the whole scan
    /// (sub-query planning), log domain
    pub n_query_loop: LogEst,
}

impl WhereRequest {
    pub fn new(src: Vec<SrcItem>) -> Self {
        WhereRequest {
            src,
            where_clause: None,
            order_by: Vec::new(),
            group_by: false,
            want_distinct: false,
            result_set: None,
            n_query_loop: 0,
        }
    }

    pub fn filter(mut self, e: Expr) -> Self {
        self.where_clause = Some(e);
        self
    }

    pub fn order_by(mut self, terms: Vec<OrderByTerm>) -> Self {
        self.order_by = terms;
        self
    }

    pub fn group_by(mut self, terms: Vec<OrderByTerm>) -> Self {
        self.order_by = terms;
        self.group_by = true;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.want_distinct = true;
        self
    }

    pub fn result_set(mut self, cols: Vec<Expr>) -> Self {
        self.result_set = Some(cols);
        self
    }
}

/// Find the FROM entry a cursor number belongs to
pub(crate) fn src_for_cursor<'a>(src: &'a [SrcItem], cursor: i32) -> Option<&'a SrcItem> {
    src.iter().find(|s| s.cursor == cursor)
}

// ============================================================================
// WherePlanner
// ============================================================================

/// The planner entry point: configure once, plan many statements
#[derive(Default)]
pub struct WherePlanner {
    config: PlannerConfig,
}

impl WherePlanner {
    pub fn new(config: PlannerConfig) -> Self {
        WherePlanner { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan one statement
    pub fn plan(&self, req: &WhereRequest) -> Result<WherePlan> {
        let cfg = &self.config;
        let src = &req.src;

        if src.len() > BMS {
            return Err(Error::with_message(
                ErrorCode::Error,
                "at most 64 tables in a join",
            ));
        }
        for item in src {
            if let Some(name) = &item.indexed_by {
                if item.table.find_index(name).is_none() {
                    return Err(Error::with_message(
                        ErrorCode::Error,
                        format!("no such index: {}", name),
                    ));
                }
            }
        }

        let mut ms = MaskSet::new();
        for item in src.iter() {
            ms.assign(item.cursor);
        }

        // Normalize the WHERE clause and the ON clauses into one term
        // array. Only LEFT JOIN ON terms carry the join marking that
        // restricts which loops they may drive.
        let mut cs = ClauseSet::new();
        let wc = cs.push_clause(ClauseOp::And, None);
        {
            let mut an = Analyzer {
                cs: &mut cs,
                ms: &ms,
                src,
                cfg,
            };
            if let Some(e) = &req.where_clause {
                an.split(wc, e, None);
            }
            for item in src.iter() {
                if let Some(on) = &item.on_clause {
                    let join = item
                        .join_type
                        .contains(JoinType::LEFT)
                        .then_some(item.cursor);
                    an.split(wc, on, join);
                }
            }
            an.analyze_all(wc);
        }

        // Which columns each table contributes, and which tables the
        // statement's output actually depends on
        let mut col_used: Vec<Bitmask> = vec![0; src.len()];
        let mut tab_used: Bitmask = 0;
        match &req.result_set {
            None => {
                col_used.iter_mut().for_each(|m| *m = !0);
                tab_used = !0;
            }
            Some(cols) => {
                for e in cols {
                    collect_col_used(src, e, &mut col_used);
                    tab_used |= expr_usage(&ms, e);
                }
            }
        }
        for ob in &req.order_by {
            collect_col_used(src, &ob.expr, &mut col_used);
            tab_used |= expr_usage(&ms, &ob.expr);
        }
        if let Some(e) = &req.where_clause {
            collect_col_used(src, e, &mut col_used);
        }
        for item in src.iter() {
            if let Some(on) = &item.on_clause {
                collect_col_used(src, on, &mut col_used);
            }
        }

        // DISTINCT: either prove it redundant, or turn the distinct set
        // into an ordering request so adjacent duplicates can be
        // squashed without a hash
        let mut distinct = if req.want_distinct {
            DistinctMode::Unordered
        } else {
            DistinctMode::None
        };
        let mut order_kind = if req.group_by {
            OrderCheck::GroupBy
        } else {
            OrderCheck::OrderBy
        };
        let mut effective_order: Vec<OrderByTerm> = req.order_by.clone();
        if req.want_distinct && cfg.distinct_opt {
            let ctx = OrderCtx {
                cfg,
                src,
                ms: &ms,
                cs: &cs,
                wc,
            };
            if let Some(cols) = &req.result_set {
                if is_distinct_redundant(&ctx, cols) {
                    distinct = DistinctMode::Unique;
                } else if req.order_by.is_empty() && !req.group_by {
                    effective_order = cols.iter().cloned().map(OrderByTerm::asc).collect();
                    order_kind = OrderCheck::DistinctBy;
                }
            }
        }

        // Candidate loops for every table
        let all_loops = {
            let mut builder = LoopBuilder::new(
                cfg,
                src,
                &ms,
                &mut cs,
                wc,
                &effective_order,
                &col_used,
            );
            builder.add_all()?;
            builder.loops
        };

        // Solve for the cheapest join order. With an ordering request
        // the first pass estimates the output size and the second one
        // prices the would-be sort with it.
        let ctx = OrderCtx {
            cfg,
            src,
            ms: &ms,
            cs: &cs,
            wc,
        };
        let pass1 = solver::solve(
            &ctx,
            &all_loops,
            &effective_order,
            order_kind,
            0,
            req.n_query_loop,
        )?;
        let best = if effective_order.is_empty() {
            pass1
        } else {
            let n_row_out = pass1.n_row;
            solver::solve(
                &ctx,
                &all_loops,
                &effective_order,
                order_kind,
                n_row_out + 1,
                req.n_query_loop,
            )?
        };

        let mut order_by_satisfied = false;
        let mut rev_mask: Bitmask = 0;
        if !effective_order.is_empty() {
            let sat = best.is_ordered_valid && best.is_ordered;
            if order_kind == OrderCheck::DistinctBy {
                if sat {
                    distinct = DistinctMode::Ordered;
                }
            } else {
                order_by_satisfied = sat;
                rev_mask = best.rev_loop;
            }
        }
        if effective_order.is_empty() && cfg.reverse_order {
            rev_mask = !0;
        }

        let mut chosen: Vec<WhereLoop> =
            best.loops.iter().map(|&i| all_loops[i].clone()).collect();

        // A LEFT JOIN table nothing reads and no live term tests can be
        // dropped from the join, provided removing it cannot change the
        // row count
        if cfg.omit_noop_join {
            while chosen.len() >= 2 {
                let last = match chosen.last() {
                    Some(l) => l,
                    None => break,
                };
                if !src[last.tab].join_type.contains(JoinType::LEFT) {
                    break;
                }
                if !req.want_distinct && !last.flags.contains(LoopFlags::ONEROW) {
                    break;
                }
                if tab_used & last.mask_self != 0 {
                    break;
                }
                let referenced = cs
                    .clause(wc)
                    .terms
                    .iter()
                    .any(|t| t.prereq_all & last.mask_self != 0 && !t.from_join);
                if referenced {
                    break;
                }
                chosen.pop();
            }
        }

        // Materialize the hand-off levels
        let mut levels = Vec::with_capacity(chosen.len());
        let mut ready: Bitmask = 0;
        for wloop in &chosen {
            let access =
                build_access(cfg, src, &mut cs, wc, &col_used, &ms, wloop, ready)?;
            levels.push(WhereLevel {
                from: wloop.tab,
                cursor: src[wloop.tab].cursor,
                wloop: wloop.clone(),
                access,
                reversed: rev_mask & wloop.mask_self != 0,
            });
            ready |= wloop.mask_self;
        }

        Ok(WherePlan {
            levels,
            order_by_satisfied,
            distinct,
            rev_mask,
            n_row_out: best.n_row,
            r_total_cost: best.r_cost,
            clauses: cs,
            main_clause: wc,
        })
    }
}

/// Record which columns of each table an expression touches. Columns
/// past the mask width share the top bit.
fn collect_col_used(src: &[SrcItem], e: &Expr, out: &mut [Bitmask]) {
    e.for_each_column(&mut |cursor, column| {
        if let Some(pos) = src.iter().position(|s| s.cursor == cursor) {
            if column >= 0 {
                out[pos] |= mask_bit((column as usize).min(BMS - 1));
            }
        }
    });
}

/// Translate a chosen loop into the emitter-facing access description
#[allow(clippy::too_many_arguments)]
fn build_access(
    cfg: &PlannerConfig,
    src: &[SrcItem],
    cs: &mut ClauseSet,
    wc: usize,
    col_used: &[Bitmask],
    ms: &MaskSet,
    wloop: &WhereLoop,
    ready: Bitmask,
) -> Result<LevelAccess> {
    if wloop.flags.contains(LoopFlags::AUTO_INDEX) {
        let index = build_auto_index(src, cs, wloop, col_used[wloop.tab]);
        return Ok(LevelAccess::AutoIndex {
            index,
            term: wloop.terms[0],
        });
    }
    if wloop.flags.contains(LoopFlags::VIRTUALTABLE) {
        if let LoopPayload::VTab {
            idx_num,
            idx_str,
            omit_mask,
            ..
        } = &wloop.payload
        {
            return Ok(LevelAccess::VirtualTable {
                idx_num: *idx_num,
                idx_str: idx_str.clone(),
                omit_mask: *omit_mask,
                args: wloop.terms.clone(),
            });
        }
    }
    if wloop.flags.contains(LoopFlags::MULTI_OR) {
        return build_or_union(cfg, src, cs, wc, col_used, ms, wloop, ready);
    }

    let index = match wloop.index() {
        Some(i) => i.clone(),
        None => return Ok(LevelAccess::FullScan),
    };
    if index.rowid_pk && wloop.n_eq() == 0 && !wloop.flags.contains(LoopFlags::COLUMN_RANGE)
    {
        return Ok(LevelAccess::FullScan);
    }
    let n_eq = wloop.n_eq();
    let mut range_start = None;
    let mut range_end = None;
    for &r in wloop.terms.iter().skip(n_eq as usize) {
        let op = cs.term(r).e_operator;
        if op.intersects(Operator::GT | Operator::GE) {
            range_start = Some(r);
        } else if op.intersects(Operator::LT | Operator::LE) {
            range_end = Some(r);
        }
    }
    Ok(LevelAccess::IndexScan {
        index,
        n_eq,
        range_start,
        range_end,
        covering: wloop.flags.contains(LoopFlags::IDX_ONLY),
    })
}

/// Re-plan each OR branch single-table and package the union
#[allow(clippy::too_many_arguments)]
fn build_or_union(
    cfg: &PlannerConfig,
    src: &[SrcItem],
    cs: &mut ClauseSet,
    wc: usize,
    col_used: &[Bitmask],
    ms: &MaskSet,
    wloop: &WhereLoop,
    ready: Bitmask,
) -> Result<LevelAccess> {
    let or_ref = wloop.terms[0];
    let or_clause = match cs.term(or_ref).or_info.as_ref() {
        Some(info) => info.clause,
        None => {
            return Err(Error::with_message(
                ErrorCode::Misuse,
                "OR-union loop names a term without an OR clause",
            ))
        }
    };
    let tab = wloop.tab;
    let cursor = src[tab].cursor;
    let is_vtab = src[tab].vtab.is_some();

    // Branches are compared by running cost alone, so a transient index
    // with its hidden setup cost must not compete here
    let branch_cfg = PlannerConfig {
        auto_index: false,
        ..cfg.clone()
    };

    let n_branches = cs.clause(or_clause).terms.len();
    let mut branches = Vec::new();
    for b in 0..n_branches {
        let branch_ref = TermRef {
            clause: or_clause,
            term: b,
        };
        let branch_wc = {
            let bt = &cs.clause(or_clause).terms[b];
            if let Some(ai) = &bt.and_info {
                ai.clause
            } else if bt.left_cursor == cursor {
                let mut t = bt.clone();
                t.parent = None;
                t.n_child = 0;
                let tmp = cs.push_clause(ClauseOp::And, Some(wc));
                cs.push_term(tmp, t);
                tmp
            } else {
                // The commuted twin of this member carries the branch
                continue;
            }
        };

        let branch_loops = {
            let mut b_builder =
                LoopBuilder::new(&branch_cfg, src, ms, cs, branch_wc, &[], col_used);
            if is_vtab {
                b_builder.add_virtual(tab, 0)?;
            } else {
                b_builder.add_btree(tab, 0)?;
            }
            b_builder.add_or(tab, 0)?;
            b_builder.loops
        };

        let mut chosen: Option<WhereLoop> = None;
        for l in branch_loops {
            if l.prereq & !ready != 0 {
                continue;
            }
            let better = match &chosen {
                None => true,
                Some(c) => l.r_run < c.r_run,
            };
            if better {
                chosen = Some(l);
            }
        }
        let chosen = chosen.ok_or_else(|| {
            Error::with_message(ErrorCode::Error, "no query solution")
        })?;

        let access = build_access(cfg, src, cs, wc, col_used, ms, &chosen, ready)?;
        branches.push(OrBranch {
            term: branch_ref,
            level: Box::new(WhereLevel {
                from: tab,
                cursor,
                wloop: chosen,
                access,
                reversed: false,
            }),
        });
    }
    Ok(LevelAccess::OrUnion { branches })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg = PlannerConfig::default();
        assert!(cfg.stat3);
        assert!(cfg.auto_index);
        assert!(cfg.transitive);
        assert!(!cfg.reverse_order);
        assert!(!cfg.case_sensitive_like);
        assert!(cfg.trace.is_empty());
    }

    #[test]
    fn test_trace_gate() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let mut cfg = PlannerConfig {
            trace: TraceFlags::SOLVER,
            ..PlannerConfig::default()
        };
        cfg.trace_sink = Some(Arc::new(|_s: &str| {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }));
        cfg.trace(TraceFlags::SOLVER, || "hit".to_string());
        cfg.trace(TraceFlags::LOOPS, || "miss".to_string());
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_collect_col_used_overflow_bit() {
        let t = Table::new("t", 10);
        let src = vec![SrcItem::new(Arc::new(t), 0)];
        let mut used = vec![0u64];
        collect_col_used(&src, &Expr::column(0, 70), &mut used);
        assert_eq!(used[0], 1u64 << (BMS - 1));
        collect_col_used(&src, &Expr::column(0, 2), &mut used);
        assert!(used[0] & 0b100 != 0);
    }
}
