//! Virtual-table planning
//!
//! A virtual table chooses its own access strategy. The planner hands
//! the module the candidate constraints and the ORDER BY, and the module
//! answers with a cost, an opaque plan identity (`idx_num`/`idx_str`),
//! which constraints it wants as arguments, and whether its output comes
//! back ordered. The module is consulted in four phases, from the most
//! restricted constraint set to the full one, and every distinct plan is
//! entered as a candidate loop.

use hashbrown::HashSet;

use crate::error::{Error, ErrorCode, Result};
use crate::planner::cost::log_est_from_double;
use crate::planner::loops::{LoopBuilder, LoopFlags, LoopPayload, WhereLoop};
use crate::planner::mask::Bitmask;
use crate::planner::term::{Operator, TermRef};

// ============================================================================
// Module interface
// ============================================================================

/// Constraint operator presented to a virtual-table module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Gt,
    Le,
    Lt,
    Ge,
    Match,
    In,
}

/// One candidate constraint on a virtual-table scan
#[derive(Debug, Clone)]
pub struct IndexConstraint {
    /// Column the constraint applies to (-1 = rowid)
    pub column: i32,
    pub op: ConstraintOp,
    /// Whether the right-hand side is available in the current phase
    pub usable: bool,
}

/// One ORDER BY term presented to the module
#[derive(Debug, Clone)]
pub struct IndexOrderBy {
    pub column: i32,
    pub desc: bool,
}

/// The module's answer for one constraint
#[derive(Debug, Clone, Default)]
pub struct ConstraintUsage {
    /// 1-based position among the module's scan arguments; 0 = unused
    pub argv_index: i32,
    /// Module checks the constraint itself; the emitted loop may skip it
    pub omit: bool,
}

/// In/out block for a `best_index` call
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub constraints: Vec<IndexConstraint>,
    pub order_by: Vec<IndexOrderBy>,
    /// Module outputs, one per constraint
    pub usage: Vec<ConstraintUsage>,
    pub idx_num: i32,
    pub idx_str: Option<String>,
    pub order_by_consumed: bool,
    pub estimated_cost: f64,
}

impl IndexInfo {
    fn new(constraints: Vec<IndexConstraint>, order_by: Vec<IndexOrderBy>) -> Self {
        let n = constraints.len();
        IndexInfo {
            constraints,
            order_by,
            usage: vec![ConstraintUsage::default(); n],
            idx_num: 0,
            idx_str: None,
            order_by_consumed: false,
            // A module that does not set a cost gets a huge default so
            // that real plans always win
            estimated_cost: 5e98,
        }
    }
}

/// Planning entry point implemented by virtual-table modules
pub trait VirtualTable {
    fn best_index(&self, info: &mut IndexInfo) -> Result<()>;
}

// ============================================================================
// Loop enumeration
// ============================================================================

/// Operators a virtual table can be asked about
const VTAB_OPS: Operator = Operator::EQ
    .union(Operator::IN)
    .union(Operator::GT)
    .union(Operator::GE)
    .union(Operator::LT)
    .union(Operator::LE)
    .union(Operator::MATCH);

fn constraint_op(op: Operator) -> ConstraintOp {
    if op.contains(Operator::EQ) {
        ConstraintOp::Eq
    } else if op.contains(Operator::IN) {
        ConstraintOp::In
    } else if op.contains(Operator::GT) {
        ConstraintOp::Gt
    } else if op.contains(Operator::GE) {
        ConstraintOp::Ge
    } else if op.contains(Operator::LT) {
        ConstraintOp::Lt
    } else if op.contains(Operator::LE) {
        ConstraintOp::Le
    } else {
        ConstraintOp::Match
    }
}

impl<'a> LoopBuilder<'a> {
    /// Enumerate loops for a virtual table by calling its `best_index`
    /// method in four phases: constants without IN, constants with IN,
    /// variables without IN, then everything.
    pub fn add_virtual(&mut self, tab: usize, m_prereq: Bitmask) -> Result<()> {
        let item = &self.src[tab];
        let cursor = item.cursor;
        let vtab = match &item.vtab {
            Some(module) => module.clone(),
            None => return Ok(()),
        };
        let mask_self = self.ms.mask_of(cursor);

        // Candidate constraints: single-column terms on this cursor
        let mut term_refs: Vec<TermRef> = Vec::new();
        {
            let clause = self.cs.clause(self.wc);
            for (i, term) in clause.terms.iter().enumerate() {
                if term.left_cursor != cursor {
                    continue;
                }
                if !term.e_operator.intersects(VTAB_OPS) {
                    continue;
                }
                if term.prereq_right & mask_self != 0 {
                    continue;
                }
                term_refs.push(TermRef {
                    clause: self.wc,
                    term: i,
                });
            }
        }

        let order_by: Vec<IndexOrderBy> = if self.in_or_branch() {
            Vec::new()
        } else {
            self.order_by
                .iter()
                .filter_map(|ob| {
                    ob.expr
                        .column_ref()
                        .filter(|(t, _)| *t == cursor)
                        .map(|(_, c)| IndexOrderBy {
                            column: c,
                            desc: ob.desc,
                        })
                })
                .collect()
        };
        // Partial ORDER BY coverage is useless to the module
        let order_by = if order_by.len() == self.order_by.len() {
            order_by
        } else {
            Vec::new()
        };

        let mut seen: HashSet<(i32, Option<String>, Bitmask)> = HashSet::new();
        let mut tried: HashSet<Vec<bool>> = HashSet::new();

        for phase in 0..4 {
            let allow_in = phase % 2 == 1;
            let allow_prereq = phase >= 2;

            let constraints: Vec<IndexConstraint> = term_refs
                .iter()
                .map(|&r| {
                    let term = self.cs.term(r);
                    let is_in = term.e_operator.contains(Operator::IN);
                    let has_prereq = term.prereq_right & !m_prereq != 0;
                    IndexConstraint {
                        column: term.left_column,
                        op: constraint_op(term.e_operator),
                        usable: (allow_in || !is_in) && (allow_prereq || !has_prereq),
                    }
                })
                .collect();
            // Two phases with the same usable set would just repeat the
            // same call
            let usable_set: Vec<bool> = constraints.iter().map(|c| c.usable).collect();
            if !tried.insert(usable_set) {
                continue;
            }

            let mut info = IndexInfo::new(constraints, order_by.clone());
            vtab.best_index(&mut info)?;

            if info.usage.len() != info.constraints.len() {
                return Err(Error::with_message(
                    ErrorCode::Error,
                    format!("{}.best_index malfunction", item.table.name),
                ));
            }

            // Map argv positions back to terms
            let mut args: Vec<Option<TermRef>> = Vec::new();
            let mut omit_mask: u32 = 0;
            let mut prereq: Bitmask = m_prereq;
            let mut uses_in = false;
            for (i, usage) in info.usage.iter().enumerate() {
                if usage.argv_index <= 0 {
                    continue;
                }
                if !info.constraints[i].usable {
                    return Err(Error::with_message(
                        ErrorCode::Error,
                        format!("{}.best_index malfunction", item.table.name),
                    ));
                }
                let j = (usage.argv_index - 1) as usize;
                if args.len() <= j {
                    args.resize(j + 1, None);
                }
                if args[j].is_some() {
                    return Err(Error::with_message(
                        ErrorCode::Error,
                        format!("{}.best_index malfunction", item.table.name),
                    ));
                }
                let r = term_refs[i];
                args[j] = Some(r);
                let term = self.cs.term(r);
                prereq |= term.prereq_right;
                if term.e_operator.contains(Operator::IN) {
                    uses_in = true;
                    // The module cannot check IN membership itself
                } else if usage.omit {
                    omit_mask |= 1 << j;
                }
            }
            let terms: Vec<TermRef> = match args.into_iter().collect::<Option<Vec<_>>>() {
                Some(t) => t,
                None => {
                    return Err(Error::with_message(
                        ErrorCode::Error,
                        format!("{}.best_index malfunction", item.table.name),
                    ))
                }
            };

            if !seen.insert((info.idx_num, info.idx_str.clone(), prereq)) {
                continue;
            }

            let mut tmpl = WhereLoop::new(tab, mask_self);
            tmpl.flags = LoopFlags::VIRTUALTABLE;
            if uses_in {
                tmpl.flags |= LoopFlags::COLUMN_IN;
            }
            tmpl.terms = terms;
            tmpl.prereq = prereq & !mask_self;
            tmpl.r_setup = 0;
            tmpl.r_run = log_est_from_double(info.estimated_cost);
            // Assume a module scan returns about 25 rows
            tmpl.n_out = 46;
            tmpl.payload = LoopPayload::VTab {
                idx_num: info.idx_num,
                idx_str: info.idx_str.clone(),
                ordered: !order_by.is_empty() && info.order_by_consumed,
                omit_mask,
            };
            self.insert(&tmpl);
        }
        Ok(())
    }
}
