//! Candidate loop enumeration
//!
//! For each FROM-list entry this module enumerates every plausible way of
//! scanning that one table: the full table scan, each index with every
//! usable prefix of leading equalities plus an optional range, a
//! build-on-the-fly automatic index, the virtual-table module's own
//! plans, and unions of index scans implementing an OR term. Each
//! candidate carries a three-part cost vector (one-time setup, running
//! cost, estimated output rows, all log-domain) and the set of tables
//! that must already be positioned before it can run.
//!
//! Insertion into the candidate list prunes dominated loops: a loop that
//! costs no less and requires no fewer prerequisites than another on the
//! same table and sort index is dropped (or replaced) on the spot, so
//! the path solver only ever sees the useful frontier.

use std::sync::Arc;

use bitflags::bitflags;

use crate::error::{Error, ErrorCode, Result};
use crate::expr::{Expr, InList, Literal};
use crate::planner::cost::{est_log, log_est, log_est_add, log_est_to_int, LogEst};
use crate::planner::mask::{mask_bit, Bitmask, MaskSet, BMS};
use crate::planner::scan::WhereScan;
use crate::planner::term::{ClauseOp, ClauseSet, Operator, TermFlags, TermRef};
use crate::planner::{JoinType, OrderByTerm, PlannerConfig, SrcItem, TraceFlags};
use crate::schema::Index;

// ============================================================================
// Loop flags
// ============================================================================

bitflags! {
    /// Properties of a candidate loop
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LoopFlags: u32 {
        /// Leading index columns constrained by ==
        const COLUMN_EQ    = 0x00000001;
        /// A range constraint follows the equality prefix
        const COLUMN_RANGE = 0x00000002;
        /// An IN constraint appears in the equality prefix
        const COLUMN_IN    = 0x00000004;
        /// An IS NULL constraint appears in the equality prefix
        const COLUMN_NULL  = 0x00000008;
        /// Range has an upper bound
        const TOP_LIMIT    = 0x00000010;
        /// Range has a lower bound
        const BTM_LIMIT    = 0x00000020;
        /// The index covers every column the query reads
        const IDX_ONLY     = 0x00000040;
        /// Scan of the rowid primary key
        const IPK          = 0x00000100;
        /// Scan uses a real index
        const INDEXED      = 0x00000200;
        /// Plan supplied by a virtual-table module
        const VIRTUALTABLE = 0x00000400;
        /// At most one row of output
        const ONEROW       = 0x00001000;
        /// Union of index scans implementing an OR term
        const MULTI_OR     = 0x00002000;
        /// Scan of a transient automatic index
        const AUTO_INDEX   = 0x00004000;
        /// Full key equality on a non-unique index
        const UNQ_WANTED   = 0x00010000;

        /// Any per-column constraint
        const CONSTRAINT = Self::COLUMN_EQ.bits()
            | Self::COLUMN_RANGE.bits()
            | Self::COLUMN_IN.bits()
            | Self::COLUMN_NULL.bits();
    }
}

// ============================================================================
// WhereLoop
// ============================================================================

/// Scan-strategy payload: b-tree probes and virtual tables carry
/// different state
#[derive(Debug, Clone)]
pub enum LoopPayload {
    BTree {
        /// Number of leading equality constraints
        n_eq: u16,
        /// The probe; None for an automatic index not yet synthesized.
        /// With AUTO_INDEX set the descriptor is planner-owned, otherwise
        /// it is shared with the catalog.
        index: Option<Arc<Index>>,
    },
    VTab {
        idx_num: i32,
        idx_str: Option<String>,
        /// Module promises output in ORDER BY order
        ordered: bool,
        /// Constraints the module will check itself (bit i covers
        /// `terms[i]`)
        omit_mask: u32,
    },
}

/// One candidate way of scanning one FROM-list table
#[derive(Debug, Clone)]
pub struct WhereLoop {
    /// Tables that must be positioned before this loop runs
    pub prereq: Bitmask,
    /// This loop's own table bit
    pub mask_self: Bitmask,
    /// Position in the FROM list
    pub tab: usize,
    /// Sorting-index ordinal; 0 when the scan cannot help ORDER BY
    pub sort_idx: u16,
    /// One-time setup cost (building an automatic index)
    pub r_setup: LogEst,
    /// Cost of running the loop once
    pub r_run: LogEst,
    /// Estimated rows of output
    pub n_out: LogEst,
    /// Property flags
    pub flags: LoopFlags,
    /// Terms consumed by the scan, in index-column order
    pub terms: Vec<TermRef>,
    /// Strategy-specific state
    pub payload: LoopPayload,
}

impl WhereLoop {
    pub(crate) fn new(tab: usize, mask_self: Bitmask) -> Self {
        WhereLoop {
            prereq: 0,
            mask_self,
            tab,
            sort_idx: 0,
            r_setup: 0,
            r_run: 0,
            n_out: 0,
            flags: LoopFlags::empty(),
            terms: Vec::new(),
            payload: LoopPayload::BTree {
                n_eq: 0,
                index: None,
            },
        }
    }

    /// Number of leading equalities for b-tree loops, 0 otherwise
    pub fn n_eq(&self) -> u16 {
        match &self.payload {
            LoopPayload::BTree { n_eq, .. } => *n_eq,
            LoopPayload::VTab { .. } => 0,
        }
    }

    /// The index driving a b-tree loop
    pub fn index(&self) -> Option<&Arc<Index>> {
        match &self.payload {
            LoopPayload::BTree { index, .. } => index.as_ref(),
            LoopPayload::VTab { .. } => None,
        }
    }

    fn set_n_eq(&mut self, value: u16) {
        if let LoopPayload::BTree { n_eq, .. } = &mut self.payload {
            *n_eq = value;
        }
    }
}

// ============================================================================
// WhereOrSet
// ============================================================================

/// Number of best OR-branch cost triples retained
const N_OR_COST: usize = 3;

/// Cost of one way of running an OR-branch scan
#[derive(Debug, Clone, Copy)]
pub(crate) struct WhereOrCost {
    pub prereq: Bitmask,
    pub r_run: LogEst,
    pub n_out: LogEst,
}

/// Bounded set of the best OR-branch costs
#[derive(Debug, Default)]
pub(crate) struct WhereOrSet {
    pub entries: Vec<WhereOrCost>,
}

impl WhereOrSet {
    pub fn new() -> Self {
        WhereOrSet {
            entries: Vec::new(),
        }
    }

    /// Insert a candidate triple, keeping at most [`N_OR_COST`] entries.
    /// A candidate subsumed by an existing entry (no cheaper, no fewer
    /// prerequisites) is dropped; an entry subsumed by the candidate is
    /// overwritten.
    pub fn insert(&mut self, prereq: Bitmask, r_run: LogEst, n_out: LogEst) -> bool {
        for p in self.entries.iter_mut() {
            if r_run <= p.r_run && prereq & p.prereq == prereq {
                p.prereq = prereq;
                p.r_run = r_run;
                p.n_out = p.n_out.min(n_out);
                return true;
            }
            if p.r_run <= r_run && p.prereq & prereq == p.prereq {
                return false;
            }
        }
        if self.entries.len() < N_OR_COST {
            self.entries.push(WhereOrCost {
                prereq,
                r_run,
                n_out,
            });
            return true;
        }
        // Replace the most expensive entry, if the candidate beats it
        let mut worst = 0;
        for (i, e) in self.entries.iter().enumerate().skip(1) {
            if e.r_run > self.entries[worst].r_run {
                worst = i;
            }
        }
        if self.entries[worst].r_run <= r_run {
            return false;
        }
        self.entries[worst] = WhereOrCost {
            prereq,
            r_run,
            n_out,
        };
        true
    }
}

// ============================================================================
// LoopBuilder
// ============================================================================

/// Outcome of comparing a template against the existing loop list
enum Placement {
    /// An existing loop dominates the template
    Discard,
    /// The template supplants the loop at this position
    Replace(usize),
    /// No comparable loop; append
    Append,
}

/// Enumerates candidate loops for every FROM-list table
pub(crate) struct LoopBuilder<'a> {
    pub cfg: &'a PlannerConfig,
    pub src: &'a [SrcItem],
    pub ms: &'a MaskSet,
    pub cs: &'a mut ClauseSet,
    /// Clause currently being planned against
    pub wc: usize,
    pub order_by: &'a [OrderByTerm],
    /// Per-table mask of columns the query reads (bit 63 = any high
    /// column)
    pub col_used: &'a [Bitmask],
    /// The accumulated candidate list
    pub loops: Vec<WhereLoop>,
    /// When planning OR branches, costs route here instead of `loops`
    or_set: Option<WhereOrSet>,
}

impl<'a> LoopBuilder<'a> {
    pub fn new(
        cfg: &'a PlannerConfig,
        src: &'a [SrcItem],
        ms: &'a MaskSet,
        cs: &'a mut ClauseSet,
        wc: usize,
        order_by: &'a [OrderByTerm],
        col_used: &'a [Bitmask],
    ) -> Self {
        LoopBuilder {
            cfg,
            src,
            ms,
            cs,
            wc,
            order_by,
            col_used,
            loops: Vec::new(),
            or_set: None,
        }
    }

    /// True while planning the branches of an OR term
    pub(crate) fn in_or_branch(&self) -> bool {
        self.or_set.is_some()
    }

    /// Enumerate loops for every table. LEFT and CROSS joins constrain
    /// the join order: such a table depends on everything to its left.
    pub fn add_all(&mut self) -> Result<()> {
        let mut m_prior: Bitmask = 0;
        let mut m_prereq: Bitmask = 0;
        let mut prior_join = JoinType::empty();
        for tab in 0..self.src.len() {
            let item = &self.src[tab];
            let join = item.join_type;
            if (join | prior_join).intersects(JoinType::LEFT | JoinType::CROSS) {
                m_prereq = m_prior;
            }
            prior_join = join;
            if item.vtab.is_some() {
                self.add_virtual(tab, m_prereq)?;
            } else {
                self.add_btree(tab, m_prereq)?;
            }
            self.add_or(tab, m_prereq)?;
            m_prior |= self.ms.mask_of(self.src[tab].cursor);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // B-tree loops
    // ------------------------------------------------------------------

    /// Enumerate table-scan, index-scan and automatic-index loops for one
    /// table
    pub fn add_btree(&mut self, tab: usize, m_prereq: Bitmask) -> Result<()> {
        let item = &self.src[tab];
        let cursor = item.cursor;
        let table = item.table.clone();
        let mask_self = self.ms.mask_of(cursor);
        let r_size = table.row_log_est;
        let r_log_size = est_log(r_size);

        // Automatic indexes: propose one for every equality term that
        // could drive an index were one to exist. Loop insertion prunes
        // them whenever a real index matches the same constraint.
        if self.or_set.is_none()
            && self.cfg.auto_index
            && item.indexed_by.is_none()
            && !item.not_indexed
        {
            let n_terms = self.cs.clause(self.wc).terms.len();
            for i in 0..n_terms {
                let tref = TermRef {
                    clause: self.wc,
                    term: i,
                };
                let term = self.cs.term(tref);
                if term.prereq_right & mask_self != 0 {
                    continue;
                }
                if !self.term_can_drive_index(tref, tab) {
                    continue;
                }
                let mut tmpl = WhereLoop::new(tab, mask_self);
                tmpl.payload = LoopPayload::BTree {
                    n_eq: 1,
                    index: None,
                };
                tmpl.terms.push(tref);
                tmpl.flags = LoopFlags::AUTO_INDEX;
                // One-time cost of building the transient index is about
                // 7*(N + log2(N)); each later lookup returns about 20
                // rows
                tmpl.r_setup = log_est_add(r_log_size, r_size) + 28;
                tmpl.n_out = 43;
                tmpl.r_run = log_est_add(r_log_size, tmpl.n_out);
                tmpl.prereq = m_prereq | self.cs.term(tref).prereq_right;
                self.insert(&tmpl);
            }
        }

        // Probe list: the rowid primary key stands in as an index, so
        // `rowid = ?` lookups and rowid-ordered scans fall out of the
        // ordinary index enumeration. INDEXED BY restricts the list.
        let rowid_probe = Arc::new(Index::rowid_pk(r_size));
        let probes: Vec<Arc<Index>> = if let Some(name) = &item.indexed_by {
            let idx = table.find_index(name).ok_or_else(|| {
                Error::with_message(
                    ErrorCode::Error,
                    format!("no such index: {}", name),
                )
            })?;
            vec![idx.clone()]
        } else if item.not_indexed {
            vec![rowid_probe]
        } else {
            std::iter::once(rowid_probe)
                .chain(table.indexes.iter().cloned())
                .collect()
        };

        for (ordinal, probe) in probes.iter().enumerate() {
            let sort_ordinal = (ordinal + 1) as u16;
            let r_size_idx = probe.row_log_est[0];
            let might_order = self.index_might_help_order_by(probe, cursor);

            let mut tmpl = WhereLoop::new(tab, mask_self);
            tmpl.prereq = m_prereq;
            tmpl.n_out = r_size_idx;
            tmpl.payload = LoopPayload::BTree {
                n_eq: 0,
                index: Some(probe.clone()),
            };

            if probe.rowid_pk {
                // Plain full table scan, cost 3*(N + log2(N))
                tmpl.flags = LoopFlags::IPK;
                tmpl.sort_idx = if might_order { sort_ordinal } else { 0 };
                tmpl.r_run = log_est_add(r_size, r_log_size) + 16;
                self.output_adjust(&mut tmpl);
                self.insert(&tmpl);
                tmpl.n_out = r_size_idx;
            } else {
                let missing = self.col_used[tab] & !columns_in_index(probe);
                tmpl.flags = if missing == 0 {
                    LoopFlags::INDEXED | LoopFlags::IDX_ONLY
                } else {
                    LoopFlags::INDEXED
                };
                // A full scan of the index visits smaller rows than the
                // table; worth it when it satisfies ORDER BY or covers
                // the query
                if might_order
                    || (missing == 0 && !probe.unordered && self.cfg.cover_idx_scan)
                {
                    tmpl.sort_idx = if might_order { sort_ordinal } else { 0 };
                    tmpl.r_run = r_size_idx + 6;
                    if missing != 0 {
                        tmpl.r_run = log_est_add(tmpl.r_run, r_size_idx + 16);
                    }
                    self.output_adjust(&mut tmpl);
                    self.insert(&tmpl);
                    tmpl.n_out = r_size_idx;
                }
            }

            tmpl.sort_idx = if might_order { sort_ordinal } else { 0 };
            self.add_btree_index(&mut tmpl, tab, probe, 0)?;
        }
        Ok(())
    }

    /// Extend a template loop by constraints on the next unconstrained
    /// column of `probe`, inserting every viable extension and recursing
    /// to add further equality columns.
    fn add_btree_index(
        &mut self,
        tmpl: &mut WhereLoop,
        tab: usize,
        probe: &Arc<Index>,
        n_in_mul: LogEst,
    ) -> Result<()> {
        let item = &self.src[tab];
        let cursor = item.cursor;
        let table = item.table.clone();

        let saved_n_eq = tmpl.n_eq();
        let saved_n_terms = tmpl.terms.len();
        let saved_flags = tmpl.flags;
        let saved_prereq = tmpl.prereq;
        let saved_n_out = tmpl.n_out;

        if saved_n_eq as usize >= probe.key_count() {
            return Ok(());
        }
        let col = probe.columns[saved_n_eq as usize];

        let mut op_mask = if tmpl.flags.contains(LoopFlags::BTM_LIMIT) {
            Operator::LT | Operator::LE
        } else if probe.rowid_pk || item.join_type.contains(JoinType::LEFT) {
            Operator::EQ
                | Operator::IN
                | Operator::GT
                | Operator::GE
                | Operator::LT
                | Operator::LE
        } else {
            Operator::EQ
                | Operator::IN
                | Operator::ISNULL
                | Operator::GT
                | Operator::GE
                | Operator::LT
                | Operator::LE
        };
        if probe.unordered {
            op_mask &= !(Operator::GT | Operator::GE | Operator::LT | Operator::LE);
        }

        tmpl.r_setup = 0;
        let r_log_size = est_log(probe.row_log_est[0]);

        let found: Vec<TermRef> = WhereScan::new(
            self.cs,
            self.src,
            self.wc,
            cursor,
            col,
            op_mask,
            Some(probe.as_ref()),
        )
        .collect();

        for tref in found {
            let (e_op, t_flags, prereq_right) = {
                let t = self.cs.term(tref);
                (t.e_operator, t.flags, t.prereq_right)
            };
            // IS NULL never matches a NOT NULL column, and the
            // manufactured `col > NULL` adds nothing there either
            if (e_op == Operator::ISNULL || t_flags.contains(TermFlags::VNULL))
                && (col < 0 || table.column_not_null(col))
            {
                continue;
            }
            if prereq_right & tmpl.mask_self != 0 {
                continue;
            }

            tmpl.flags = saved_flags;
            tmpl.set_n_eq(saved_n_eq);
            tmpl.terms.truncate(saved_n_terms);
            tmpl.terms.push(tref);
            tmpl.prereq = (saved_prereq | prereq_right) & !tmpl.mask_self;

            let mut n_in: LogEst = 0;
            let mut btm: Option<TermRef> = None;
            let mut top: Option<TermRef> = None;

            if e_op.contains(Operator::IN) {
                tmpl.flags |= LoopFlags::COLUMN_IN;
                n_in = match self.cs.term(tref).expr.as_ref() {
                    Expr::In {
                        list: InList::Subquery(_),
                        ..
                    } => 46, // the subquery is assumed to return 25 rows
                    Expr::In {
                        list: InList::Values(v),
                        ..
                    } => log_est(v.len() as u64),
                    _ => 0,
                };
            } else if e_op.contains(Operator::EQ) {
                tmpl.flags |= LoopFlags::COLUMN_EQ;
                if col < 0
                    || (n_in_mul == 0 && saved_n_eq as usize == probe.key_count() - 1)
                {
                    if col >= 0 && !probe.unique {
                        tmpl.flags |= LoopFlags::UNQ_WANTED;
                    } else {
                        tmpl.flags |= LoopFlags::ONEROW;
                    }
                }
            } else if e_op.contains(Operator::ISNULL) {
                tmpl.flags |= LoopFlags::COLUMN_NULL;
            } else if e_op.intersects(Operator::GT | Operator::GE) {
                tmpl.flags |= LoopFlags::COLUMN_RANGE | LoopFlags::BTM_LIMIT;
                btm = Some(tref);
            } else {
                debug_assert!(e_op.intersects(Operator::LT | Operator::LE));
                tmpl.flags |= LoopFlags::COLUMN_RANGE | LoopFlags::TOP_LIMIT;
                top = Some(tref);
                btm = if saved_flags.contains(LoopFlags::BTM_LIMIT) {
                    tmpl.terms
                        .len()
                        .checked_sub(2)
                        .and_then(|i| tmpl.terms.get(i))
                        .copied()
                } else {
                    None
                };
            }

            tmpl.n_out = saved_n_out;
            if tmpl.flags.contains(LoopFlags::COLUMN_RANGE) {
                self.range_scan_est(btm, top, tmpl, probe);
            } else {
                let n_eq = saved_n_eq + 1;
                tmpl.set_n_eq(n_eq);
                let mut estimated = false;
                if n_in_mul == 0
                    && self.cfg.stat3
                    && !probe.samples.is_empty()
                    && n_eq == 1
                {
                    if let Some(n) = self.sample_eq_est(tref, probe, e_op) {
                        let mut n_out = log_est(n);
                        if n_out > saved_n_out {
                            n_out = saved_n_out;
                        }
                        tmpl.n_out = n_out - n_in;
                        estimated = true;
                    }
                }
                if !estimated {
                    tmpl.n_out += probe.row_log_est[n_eq as usize]
                        - probe.row_log_est[n_eq as usize - 1];
                    if e_op.contains(Operator::ISNULL) {
                        // IS NULL matches about twice as many rows as
                        // an equality
                        tmpl.n_out += 10;
                    }
                }
            }

            // Cost of visiting the selected index rows, plus a seek, plus
            // the main-table lookups for a non-covering index
            let r_cost_idx = tmpl.n_out + 1 + idx_row_cost(probe);
            tmpl.r_run = log_est_add(r_log_size, r_cost_idx);
            if !tmpl
                .flags
                .intersects(LoopFlags::IDX_ONLY | LoopFlags::IPK)
            {
                tmpl.r_run = log_est_add(tmpl.r_run, tmpl.n_out + 16);
            }

            let n_out_unadjusted = tmpl.n_out;
            tmpl.r_run += n_in_mul + n_in;
            tmpl.n_out += n_in_mul + n_in;
            self.output_adjust(tmpl);
            self.insert(tmpl);

            if tmpl.flags.contains(LoopFlags::COLUMN_RANGE) {
                tmpl.n_out = saved_n_out;
            } else {
                tmpl.n_out = n_out_unadjusted;
            }

            if !tmpl.flags.contains(LoopFlags::TOP_LIMIT)
                && (tmpl.n_eq() as usize) < probe.key_count()
            {
                self.add_btree_index(tmpl, tab, probe, n_in_mul + n_in)?;
            }
            tmpl.n_out = saved_n_out;
        }

        tmpl.set_n_eq(saved_n_eq);
        tmpl.terms.truncate(saved_n_terms);
        tmpl.flags = saved_flags;
        tmpl.prereq = saved_prereq;
        tmpl.n_out = saved_n_out;
        Ok(())
    }

    // ------------------------------------------------------------------
    // OR-of-indexes loops
    // ------------------------------------------------------------------

    /// Build MULTI_OR loops for every OR term whose indexable set covers
    /// this table: plan each branch against the table alone, keep the
    /// best few cost triples per branch, and combine across branches.
    pub fn add_or(&mut self, tab: usize, m_prereq: Bitmask) -> Result<()> {
        let item = &self.src[tab];
        let cursor = item.cursor;
        let mask_self = self.ms.mask_of(cursor);
        let is_vtab = item.vtab.is_some();

        // Candidate OR terms in the clause being planned
        let candidates: Vec<(TermRef, usize)> = {
            let clause = self.cs.clause(self.wc);
            clause
                .terms
                .iter()
                .enumerate()
                .filter_map(|(i, t)| {
                    if !t.e_operator.contains(Operator::OR) {
                        return None;
                    }
                    let info = t.or_info.as_ref()?;
                    if info.indexable & mask_self == 0 {
                        return None;
                    }
                    Some((
                        TermRef {
                            clause: self.wc,
                            term: i,
                        },
                        info.clause,
                    ))
                })
                .collect()
        };

        let mut outer_or_set = self.or_set.take();
        let saved_wc = self.wc;

        for (or_ref, or_clause) in candidates {
            let mut sum = WhereOrSet::new();
            let mut first = true;
            let n_branches = self.cs.clause(or_clause).terms.len();

            for b in 0..n_branches {
                let branch_wc = {
                    let bt = &self.cs.clause(or_clause).terms[b];
                    if let Some(and_info) = &bt.and_info {
                        Some(and_info.clause)
                    } else if bt.left_cursor == cursor {
                        // Single-term branch: plan against a transient
                        // clause holding just that term
                        let mut t = bt.clone();
                        t.parent = None;
                        t.n_child = 0;
                        let tmp = self.cs.push_clause(ClauseOp::And, Some(saved_wc));
                        self.cs.push_term(tmp, t);
                        Some(tmp)
                    } else {
                        None
                    }
                };
                let branch_wc = match branch_wc {
                    Some(w) => w,
                    None => continue,
                };

                self.wc = branch_wc;
                self.or_set = Some(WhereOrSet::new());
                if is_vtab {
                    self.add_virtual(tab, m_prereq)?;
                } else {
                    self.add_btree(tab, m_prereq)?;
                }
                self.add_or(tab, m_prereq)?;
                let cur = self.or_set.take().unwrap_or_default();
                self.wc = saved_wc;

                if cur.entries.is_empty() {
                    sum.entries.clear();
                    break;
                }
                if first {
                    sum = cur;
                    first = false;
                } else {
                    let prev = std::mem::take(&mut sum);
                    for pe in &prev.entries {
                        for ce in &cur.entries {
                            sum.insert(
                                pe.prereq | ce.prereq,
                                log_est_add(pe.r_run, ce.r_run),
                                log_est_add(pe.n_out, ce.n_out),
                            );
                        }
                    }
                }
            }

            // Route the combined OR loops to the enclosing collector
            self.or_set = outer_or_set.take();
            for e in &sum.entries {
                let mut tmpl = WhereLoop::new(tab, mask_self);
                tmpl.terms.push(or_ref);
                tmpl.flags = LoopFlags::MULTI_OR;
                tmpl.r_setup = 0;
                tmpl.sort_idx = 0;
                // The row-set probe that removes duplicate rows costs a
                // constant factor on top of the branch scans
                tmpl.r_run = e.r_run + 18;
                tmpl.n_out = e.n_out;
                tmpl.prereq = e.prereq;
                self.insert(&tmpl);
            }
            outer_or_set = self.or_set.take();
        }

        self.or_set = outer_or_set;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Estimation helpers
    // ------------------------------------------------------------------

    /// True if an equality term could drive an index on `tab`'s table if
    /// a suitable index existed
    fn term_can_drive_index(&self, tref: TermRef, tab: usize) -> bool {
        let item = &self.src[tab];
        let term = self.cs.term(tref);
        if term.left_cursor != item.cursor {
            return false;
        }
        if !term.e_operator.contains(Operator::EQ) {
            return false;
        }
        if term.left_column < 0 {
            return false;
        }
        let aff = item.table.column_affinity(term.left_column);
        match term.expr.as_ref() {
            Expr::Binary { left, right, .. } => {
                crate::planner::analyze::index_affinity_ok(self.src, left, right, aff)
            }
            _ => true,
        }
    }

    /// True if scanning this index could produce rows in a useful order
    fn index_might_help_order_by(&self, probe: &Index, cursor: i32) -> bool {
        if probe.unordered {
            return false;
        }
        for ob in self.order_by {
            if let Some((t, c)) = ob.expr.column_ref() {
                if t != cursor {
                    continue;
                }
                if c < 0 || probe.columns.contains(&c) {
                    return true;
                }
            }
        }
        false
    }

    /// Adjust a range loop's output estimate, from histogram samples when
    /// available, otherwise by the default quarter per bound
    fn range_scan_est(
        &self,
        btm: Option<TermRef>,
        top: Option<TermRef>,
        tmpl: &mut WhereLoop,
        probe: &Index,
    ) {
        let n_out_base = tmpl.n_out;

        if self.cfg.stat3 && !probe.samples.is_empty() && tmpl.n_eq() == 0 {
            let row_count = log_est_to_int(probe.row_log_est[0]);
            let mut i_lower: u64 = 0;
            let mut i_upper: u64 = row_count;
            let mut any = false;
            if let Some(r) = btm {
                let term = self.cs.term(r);
                if !term.flags.contains(TermFlags::VNULL) {
                    if let Some(value) = rhs_literal(&term.expr) {
                        i_lower = if term.e_operator.contains(Operator::GT) {
                            rows_le(probe, value)
                        } else {
                            rows_lt(probe, value)
                        };
                        any = true;
                    }
                }
            }
            if let Some(r) = top {
                let term = self.cs.term(r);
                if let Some(value) = rhs_literal(&term.expr) {
                    i_upper = if term.e_operator.contains(Operator::LE) {
                        rows_le(probe, value)
                    } else {
                        rows_lt(probe, value)
                    };
                    any = true;
                }
            }
            if any {
                let n_diff = i_upper.saturating_sub(i_lower).max(1);
                let n_new = log_est(n_diff);
                tmpl.n_out = n_new.min(n_out_base);
                self.cfg.trace(TraceFlags::ESTIMATE, || {
                    format!(
                        "range est via samples: {}..{} of {} rows",
                        i_lower, i_upper, row_count
                    )
                });
                return;
            }
        }

        // Each bound is assumed to cut the key space to a quarter. The
        // manufactured `col > NULL` bound excludes nothing.
        let mut n_new = n_out_base;
        if let Some(r) = btm {
            if !self.cs.term(r).flags.contains(TermFlags::VNULL) {
                n_new -= 20;
            }
        }
        if top.is_some() {
            n_new -= 20;
        }
        if n_new < 10 {
            n_new = 10;
        }
        if n_new < n_out_base {
            tmpl.n_out = n_new;
        }
    }

    /// Histogram estimate for an equality or IN constraint on the first
    /// index column. Returns the estimated row count, linear domain.
    fn sample_eq_est(&self, tref: TermRef, probe: &Index, e_op: Operator) -> Option<u64> {
        let term = self.cs.term(tref);
        if e_op.contains(Operator::IN) {
            let values = match term.expr.as_ref() {
                Expr::In {
                    list: InList::Values(v),
                    ..
                } => v,
                _ => return None,
            };
            let per_value_default = log_est_to_int(*probe.row_log_est.get(1)?);
            let mut total: u64 = 0;
            for v in values {
                let lit = match v.skip_collate() {
                    Expr::Literal(l) => l,
                    _ => return None,
                };
                total += sample_n_eq(probe, lit).unwrap_or(per_value_default);
            }
            let cap = log_est_to_int(probe.row_log_est[0]);
            Some(total.min(cap))
        } else if e_op.contains(Operator::ISNULL) {
            sample_n_eq(probe, &Literal::Null)
        } else {
            let value = rhs_literal(&term.expr)?;
            sample_n_eq(probe, value)
        }
    }

    /// Shave the output estimate for every WHERE term that filters this
    /// table but is not consumed by the loop itself
    fn output_adjust(&self, tmpl: &mut WhereLoop) {
        let not_allowed = !(tmpl.prereq | tmpl.mask_self);
        let clause = self.cs.clause(self.wc);
        for (i, term) in clause.terms.iter().enumerate() {
            if term.flags.contains(TermFlags::VIRTUAL) {
                continue;
            }
            if term.prereq_all & tmpl.mask_self == 0 {
                continue;
            }
            if term.prereq_all & not_allowed != 0 {
                continue;
            }
            let consumed = tmpl.terms.iter().any(|&r| {
                if r.clause != self.wc {
                    return false;
                }
                if r.term == i {
                    return true;
                }
                self.cs.term(r).parent == Some(i)
            });
            if !consumed {
                tmpl.n_out -= 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Record a candidate loop, pruning and being pruned by comparable
    /// loops already in the list. In OR-branch mode only the cost triple
    /// is recorded.
    pub fn insert(&mut self, tmpl: &WhereLoop) {
        if let Some(or_set) = &mut self.or_set {
            if !tmpl.terms.is_empty() {
                or_set.insert(tmpl.prereq, tmpl.r_run, tmpl.n_out);
            }
            return;
        }

        let mut tmpl = tmpl.clone();
        self.adjust_cost(&mut tmpl);
        self.cfg.trace(TraceFlags::LOOPS, || {
            format!(
                "loop tab={} flags={:?} rSetup={} rRun={} nOut={} prereq={:#x}",
                tmpl.tab, tmpl.flags, tmpl.r_setup, tmpl.r_run, tmpl.n_out, tmpl.prereq
            )
        });

        match find_placement(&self.loops, 0, &tmpl) {
            Placement::Discard => {}
            Placement::Append => self.loops.push(tmpl),
            Placement::Replace(i) => {
                self.loops[i] = tmpl.clone();
                // Remove any later loops the template also supplants
                let mut j = i + 1;
                while j < self.loops.len() {
                    match find_placement(&self.loops, j, &tmpl) {
                        Placement::Replace(k) => {
                            self.loops.remove(k);
                            j = k;
                        }
                        _ => break,
                    }
                }
            }
        }
    }

    /// Nudge costs so that, among loops of one index, a loop using a
    /// proper subset of another's constraints never looks cheaper
    fn adjust_cost(&self, tmpl: &mut WhereLoop) {
        if !tmpl.flags.contains(LoopFlags::INDEXED) {
            return;
        }
        for p in &self.loops {
            if p.tab != tmpl.tab || !p.flags.contains(LoopFlags::INDEXED) {
                continue;
            }
            if cheaper_proper_subset(p, tmpl) {
                tmpl.r_run = p.r_run;
                tmpl.n_out = p.n_out - 1;
            } else if cheaper_proper_subset(tmpl, p) {
                tmpl.r_run = p.r_run;
                tmpl.n_out = p.n_out + 1;
            }
        }
    }
}

/// Compare a template against existing loops starting at `start`
fn find_placement(loops: &[WhereLoop], start: usize, tmpl: &WhereLoop) -> Placement {
    for (i, p) in loops.iter().enumerate().skip(start) {
        if p.tab != tmpl.tab || p.sort_idx != tmpl.sort_idx {
            // Loops on different tables or with different sorting
            // potential never supplant one another
            continue;
        }
        // A real index with at least one equality always beats an
        // automatic index over the same prerequisites. Auto-index loops
        // are enumerated first, so compatible candidates never carry a
        // larger setup cost than an existing loop.
        if p.flags.contains(LoopFlags::AUTO_INDEX)
            && tmpl.flags.contains(LoopFlags::INDEXED)
            && tmpl.flags.contains(LoopFlags::COLUMN_EQ)
            && p.prereq & tmpl.prereq == tmpl.prereq
        {
            return Placement::Replace(i);
        }
        // p dominates: no more dependencies, no higher cost
        if p.prereq & tmpl.prereq == p.prereq
            && p.r_setup <= tmpl.r_setup
            && p.r_run <= tmpl.r_run
            && p.n_out <= tmpl.n_out
        {
            return Placement::Discard;
        }
        // template dominates p
        if p.prereq & tmpl.prereq == tmpl.prereq
            && p.r_run >= tmpl.r_run
            && p.n_out >= tmpl.n_out
        {
            return Placement::Replace(i);
        }
    }
    Placement::Append
}

/// True if `x` uses a proper subset of `y`'s constraint terms at no
/// greater cost
fn cheaper_proper_subset(x: &WhereLoop, y: &WhereLoop) -> bool {
    if x.terms.len() >= y.terms.len() {
        return false;
    }
    if x.r_run >= y.r_run {
        if x.r_run > y.r_run {
            return false;
        }
        if x.n_out > y.n_out {
            return false;
        }
    }
    x.terms.iter().all(|t| y.terms.contains(t))
}

/// Mask of table columns present in an index (bit 63 is the overflow
/// bucket and never counts as covered)
pub(crate) fn columns_in_index(idx: &Index) -> Bitmask {
    let mut m: Bitmask = 0;
    for &c in &idx.columns {
        if c >= 0 && (c as usize) < BMS - 1 {
            m |= mask_bit(c as usize);
        }
    }
    m
}

/// Per-row cost addend for visiting index rows, standing in for the
/// index-to-table row size ratio
fn idx_row_cost(probe: &Index) -> LogEst {
    if probe.rowid_pk {
        15
    } else {
        5
    }
}

/// Right-hand-side literal of a comparison term, if there is one
fn rhs_literal(expr: &Expr) -> Option<&Literal> {
    match expr {
        Expr::Binary { right, .. } => match right.skip_collate() {
            Expr::Literal(l) => Some(l),
            _ => None,
        },
        _ => None,
    }
}

/// Rows whose first key column equals `value`, per the histogram
fn sample_n_eq(probe: &Index, value: &Literal) -> Option<u64> {
    probe
        .samples
        .iter()
        .find(|s| s.value.compare(value) == std::cmp::Ordering::Equal)
        .map(|s| s.n_eq)
}

/// Approximate count of rows with first key column < `value`
fn rows_lt(probe: &Index, value: &Literal) -> u64 {
    let mut best: u64 = 0;
    for s in &probe.samples {
        match s.value.compare(value) {
            std::cmp::Ordering::Equal => return s.n_lt,
            std::cmp::Ordering::Less => best = s.n_lt + s.n_eq,
            std::cmp::Ordering::Greater => break,
        }
    }
    best
}

/// Approximate count of rows with first key column <= `value`
fn rows_le(probe: &Index, value: &Literal) -> u64 {
    let mut best: u64 = 0;
    for s in &probe.samples {
        match s.value.compare(value) {
            std::cmp::Ordering::Greater => break,
            _ => best = s.n_lt + s.n_eq,
        }
    }
    best
}
