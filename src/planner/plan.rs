//! The plan hand-off
//!
//! Output of a planning call: one level per FROM-list table in nesting
//! order, each naming the access strategy the code emitter should
//! realize, the terms the scan consumes (so the emitter will not re-test
//! them), and the per-level reverse flag. The clause arena rides along
//! so term references stay resolvable for residue filtering.

use std::sync::Arc;

use crate::planner::cost::LogEst;
use crate::planner::loops::WhereLoop;
use crate::planner::mask::Bitmask;
use crate::planner::term::{ClauseSet, TermRef, WhereTerm};
use crate::planner::SrcItem;
use crate::schema::Index;

// ============================================================================
// Access strategies
// ============================================================================

/// One branch of an OR-union scan
#[derive(Debug)]
pub struct OrBranch {
    /// The OR-member term this branch implements
    pub term: TermRef,
    /// Single-table sub-plan for the branch
    pub level: Box<WhereLevel>,
}

/// How one join level visits its table
#[derive(Debug)]
pub enum LevelAccess {
    /// Visit every row
    FullScan,

    /// Drive a b-tree index (the rowid primary key is an index here too)
    IndexScan {
        index: Arc<Index>,
        /// Leading equality constraints
        n_eq: u16,
        /// Range lower bound, after the equality prefix
        range_start: Option<TermRef>,
        /// Range upper bound
        range_end: Option<TermRef>,
        /// The index alone covers every column read
        covering: bool,
    },

    /// Build a transient index, then drive it
    AutoIndex {
        /// Planner-synthesized descriptor: the constrained column first,
        /// then every other column the query reads
        index: Arc<Index>,
        /// The equality that makes the index worth building
        term: TermRef,
    },

    /// Let the virtual-table module run the scan
    VirtualTable {
        idx_num: i32,
        idx_str: Option<String>,
        /// Constraints the module checks itself; bit i covers argument i
        omit_mask: u32,
        /// Terms supplying scan arguments, in argument order
        args: Vec<TermRef>,
    },

    /// Run each OR branch and union the rowids through a row set
    OrUnion { branches: Vec<OrBranch> },
}

// ============================================================================
// WhereLevel / WherePlan
// ============================================================================

/// One level of the chosen nested-loop join
#[derive(Debug)]
pub struct WhereLevel {
    /// Position in the FROM list
    pub from: usize,
    /// Cursor of the table being scanned
    pub cursor: i32,
    /// The winning loop, with its flags, costs and consumed terms
    pub wloop: WhereLoop,
    /// Access strategy for the emitter
    pub access: LevelAccess,
    /// Scan runs high-to-low to satisfy the ORDER BY
    pub reversed: bool,
}

/// Outcome of DISTINCT analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistinctMode {
    /// No DISTINCT requested
    #[default]
    None,
    /// DISTINCT proven redundant; emit nothing for it
    Unique,
    /// Rows arrive grouped; duplicates are adjacent
    Ordered,
    /// Full duplicate elimination required
    Unordered,
}

/// The complete plan handed to the code emitter
#[derive(Debug)]
pub struct WherePlan {
    /// Join levels, outermost first
    pub levels: Vec<WhereLevel>,
    /// The requested ORDER BY (or GROUP BY) needs no extra sort
    pub order_by_satisfied: bool,
    /// DISTINCT analysis outcome
    pub distinct: DistinctMode,
    /// Loops to run in reverse
    pub rev_mask: Bitmask,
    /// Estimated rows out of the full join, log domain
    pub n_row_out: LogEst,
    /// Total estimated cost, log domain
    pub r_total_cost: LogEst,
    /// Term storage; all TermRefs in the plan resolve here
    pub clauses: ClauseSet,
    /// Clause id of the main WHERE conjunction
    pub main_clause: usize,
}

impl WherePlan {
    /// Resolve a term reference
    pub fn term(&self, r: TermRef) -> &WhereTerm {
        self.clauses.term(r)
    }

    /// Main-clause terms no level consumes; the emitter evaluates these
    /// as filters inside the innermost loop that has their tables ready
    pub fn residue_terms(&self) -> Vec<TermRef> {
        let consumed: Vec<TermRef> = self
            .levels
            .iter()
            .flat_map(|l| l.wloop.terms.iter().copied())
            .collect();
        self.clauses
            .clause(self.main_clause)
            .terms
            .iter()
            .enumerate()
            .filter_map(|(i, t)| {
                let r = TermRef {
                    clause: self.main_clause,
                    term: i,
                };
                if t.is_disabled() || consumed.contains(&r) {
                    return None;
                }
                Some(r)
            })
            .collect()
    }
}

// ============================================================================
// Automatic-index synthesis
// ============================================================================

/// Build the descriptor for a transient index: the constrained column
/// leads, followed by every other column of the table the query reads.
pub(crate) fn build_auto_index(
    src: &[SrcItem],
    cs: &ClauseSet,
    wloop: &WhereLoop,
    col_used: Bitmask,
) -> Arc<Index> {
    let term = cs.term(wloop.terms[0]);
    let lead = term.left_column;
    let table = &src[wloop.tab].table;

    let mut columns = vec![lead];
    for c in 0..table.columns.len() as i32 {
        if c == lead {
            continue;
        }
        let bit = (c as usize).min(crate::planner::mask::BMS - 1);
        if col_used & crate::planner::mask::mask_bit(bit) != 0 {
            columns.push(c);
        }
    }

    let collations = columns
        .iter()
        .map(|&c| table.column_collation(c).to_string())
        .collect();
    let mut idx = Index::new(format!("auto_index_{}", table.name), columns).collations(collations);
    idx.apply_default_row_est(table.row_log_est);
    Arc::new(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::planner::loops::{LoopFlags, LoopPayload};
    use crate::planner::term::{ClauseOp, Operator, TermFlags};
    use crate::schema::{Affinity, Column, Table};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_auto_index_columns() {
        let t = Table::new("t1", 1000)
            .column(Column::new("a", Affinity::Integer))
            .column(Column::new("b", Affinity::Integer))
            .column(Column::new("c", Affinity::Text).collation("NOCASE"));
        let src = vec![SrcItem::new(Arc::new(t), 0)];

        let mut cs = ClauseSet::new();
        let wc = cs.push_clause(ClauseOp::And, None);
        let mut term = WhereTerm::new(
            Expr::eq(Expr::column(0, 1), Expr::column(1, 0)),
            TermFlags::empty(),
        );
        term.left_cursor = 0;
        term.left_column = 1;
        term.e_operator = Operator::EQ;
        let ti = cs.push_term(wc, term);

        let wloop = WhereLoop {
            prereq: 0,
            mask_self: 1,
            tab: 0,
            sort_idx: 0,
            r_setup: 0,
            r_run: 0,
            n_out: 0,
            flags: LoopFlags::AUTO_INDEX,
            terms: vec![TermRef {
                clause: wc,
                term: ti,
            }],
            payload: LoopPayload::BTree {
                n_eq: 1,
                index: None,
            },
        };

        // The query reads columns a and c
        let col_used = 0b101;
        let idx = build_auto_index(&src, &cs, &wloop, col_used);
        assert_eq!(idx.columns, vec![1, 0, 2]);
        assert_eq!(idx.collations[2], "NOCASE");
        assert!(!idx.row_log_est.is_empty());
    }
}
