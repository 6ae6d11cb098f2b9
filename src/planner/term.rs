//! WHERE-clause terms and the clause arena
//!
//! The WHERE expression is split on AND into an array of terms, each
//! annotated with the operator class, the driven column (if the term has
//! the shape `column <op> expr`), and prerequisite table masks. The
//! normalizer appends *virtual* terms derived from BETWEEN, LIKE,
//! column-equality transitivity and OR analysis; a virtual term points
//! back at its parent by index, never by reference, because the term
//! array grows while analysis is still running.
//!
//! OR and AND sub-clauses are stored in the same arena as the main
//! clause and referenced by clause id, so the whole term graph is owned
//! by one planning context and freed with it.

use bitflags::bitflags;

use crate::expr::{BinaryOp, Expr};
use crate::planner::mask::Bitmask;

// ============================================================================
// Operator
// ============================================================================

bitflags! {
    /// One-hot operator classes for WHERE terms
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Operator: u16 {
        const IN     = 0x0001;
        const EQ     = 0x0002;
        const LT     = 0x0004;
        const LE     = 0x0008;
        const GT     = 0x0010;
        const GE     = 0x0020;
        const MATCH  = 0x0040;
        const ISNULL = 0x0080;
        const OR     = 0x0100;
        const AND    = 0x0200;
        /// Participates in an equivalence class (transitive `=`)
        const EQUIV  = 0x0400;
        /// Term was rewritten away (e.g. OR converted to IN)
        const NOOP   = 0x0800;

        /// Operators that constrain a single column
        const SINGLE = Self::IN.bits()
            | Self::EQ.bits()
            | Self::LT.bits()
            | Self::LE.bits()
            | Self::GT.bits()
            | Self::GE.bits()
            | Self::MATCH.bits()
            | Self::ISNULL.bits();

        /// Every operator bit
        const ALL = 0x0fff;
    }
}

impl Operator {
    /// Map a comparison operator to its one-hot class, if indexable
    pub fn from_binary_op(op: BinaryOp) -> Option<Operator> {
        match op {
            BinaryOp::Eq | BinaryOp::Is => Some(Operator::EQ),
            BinaryOp::Lt => Some(Operator::LT),
            BinaryOp::Le => Some(Operator::LE),
            BinaryOp::Gt => Some(Operator::GT),
            BinaryOp::Ge => Some(Operator::GE),
            _ => None,
        }
    }
}

// ============================================================================
// TermFlags
// ============================================================================

bitflags! {
    /// Bookkeeping flags on a WHERE term
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TermFlags: u16 {
        /// Expression synthesized by the planner
        const DYNAMIC = 0x0001;
        /// Virtual term: usable for index access, never coded as a filter
        const VIRTUAL = 0x0002;
        /// Term already evaluated by the generated loop
        const CODED   = 0x0004;
        /// Term has a virtual copy (commuted or transitive)
        const COPIED  = 0x0008;
        /// Term owns an OR sub-clause
        const ORINFO  = 0x0010;
        /// Term owns an AND sub-clause
        const ANDINFO = 0x0020;
        /// Manufactured `col > NULL` standing in for `col IS NOT NULL`;
        /// suppresses the implicit null filter
        const VNULL   = 0x0040;
    }
}

// ============================================================================
// WhereTerm
// ============================================================================

/// Reference to an OR sub-clause held in the clause arena
#[derive(Debug, Clone)]
pub struct OrInfo {
    /// Clause id of the OR members
    pub clause: usize,
    /// Tables for which every OR member could drive an index
    pub indexable: Bitmask,
}

/// Reference to an AND sub-clause held in the clause arena
#[derive(Debug, Clone)]
pub struct AndInfo {
    /// Clause id of the AND members
    pub clause: usize,
}

/// One AND-factor of a WHERE clause
#[derive(Debug, Clone)]
pub struct WhereTerm {
    /// The expression for this term
    pub expr: Box<Expr>,

    /// Bookkeeping flags
    pub flags: TermFlags,

    /// Operator class, empty if the term is not indexable
    pub e_operator: Operator,

    /// Cursor of the driven column, or -1
    pub left_cursor: i32,

    /// Column number of the driven column (-1 = rowid)
    pub left_column: i32,

    /// Tables referenced by the right-hand side
    pub prereq_right: Bitmask,

    /// Tables referenced anywhere in the term
    pub prereq_all: Bitmask,

    /// Index (within the same clause) of the term this one was derived
    /// from
    pub parent: Option<usize>,

    /// Number of derived terms pointing back at this one
    pub n_child: u16,

    /// OR sub-clause, when the term's root operator is OR
    pub or_info: Option<OrInfo>,

    /// AND sub-clause, for composite members of an OR term
    pub and_info: Option<AndInfo>,

    /// Term came from the ON clause of a LEFT JOIN
    pub from_join: bool,

    /// Cursor of the right table of that LEFT JOIN
    pub right_join_table: i32,
}

impl WhereTerm {
    pub fn new(expr: Expr, flags: TermFlags) -> Self {
        WhereTerm {
            expr: Box::new(expr),
            flags,
            e_operator: Operator::empty(),
            left_cursor: -1,
            left_column: 0,
            prereq_right: 0,
            prereq_all: 0,
            parent: None,
            n_child: 0,
            or_info: None,
            and_info: None,
            from_join: false,
            right_join_table: -1,
        }
    }

    /// True if the generated loop no longer needs to evaluate this term
    pub fn is_disabled(&self) -> bool {
        self.flags
            .intersects(TermFlags::CODED | TermFlags::VIRTUAL)
            || self.e_operator == Operator::NOOP
    }
}

// ============================================================================
// WhereClause / ClauseSet
// ============================================================================

/// Connective a clause was split on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseOp {
    And,
    Or,
}

/// An ordered sequence of terms split from one expression
#[derive(Debug)]
pub struct WhereClause {
    /// Connective the terms are joined by
    pub op: ClauseOp,
    /// Enclosing clause, for scans that continue outward
    pub outer: Option<usize>,
    /// The terms. Grows during analysis; hold indices, not references.
    pub terms: Vec<WhereTerm>,
}

/// Stable reference to a term: clause id plus position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TermRef {
    pub clause: usize,
    pub term: usize,
}

/// Arena owning every clause built during one planning call
#[derive(Debug, Default)]
pub struct ClauseSet {
    clauses: Vec<WhereClause>,
}

impl ClauseSet {
    pub fn new() -> Self {
        ClauseSet {
            clauses: Vec::new(),
        }
    }

    /// Add a clause and return its id
    pub fn push_clause(&mut self, op: ClauseOp, outer: Option<usize>) -> usize {
        self.clauses.push(WhereClause {
            op,
            outer,
            terms: Vec::new(),
        });
        self.clauses.len() - 1
    }

    pub fn clause(&self, id: usize) -> &WhereClause {
        &self.clauses[id]
    }

    pub fn clause_mut(&mut self, id: usize) -> &mut WhereClause {
        &mut self.clauses[id]
    }

    pub fn term(&self, r: TermRef) -> &WhereTerm {
        &self.clauses[r.clause].terms[r.term]
    }

    pub fn term_mut(&mut self, r: TermRef) -> &mut WhereTerm {
        &mut self.clauses[r.clause].terms[r.term]
    }

    /// Append a term to a clause and return its index within the clause
    pub fn push_term(&mut self, clause: usize, term: WhereTerm) -> usize {
        let terms = &mut self.clauses[clause].terms;
        terms.push(term);
        terms.len() - 1
    }

    /// Record that `child` was derived from `parent` (same clause)
    pub fn mark_term_as_child(&mut self, clause: usize, child: usize, parent: usize) {
        self.clauses[clause].terms[child].parent = Some(parent);
        self.clauses[clause].terms[parent].n_child += 1;
    }

    /// Mark a term as evaluated by the generated loop. When the last
    /// outstanding child of a parent term is disabled, the parent is
    /// disabled too, so a BETWEEN or LIKE original is not re-tested once
    /// both derived range terms are consumed by an index.
    pub fn disable_term(&mut self, r: TermRef) {
        let mut idx = r.term;
        loop {
            let term = &mut self.clauses[r.clause].terms[idx];
            if term.flags.contains(TermFlags::CODED) {
                break;
            }
            term.flags |= TermFlags::CODED;
            let parent = match term.parent {
                Some(p) => p,
                None => break,
            };
            let parent_term = &mut self.clauses[r.clause].terms[parent];
            parent_term.n_child -= 1;
            if parent_term.n_child != 0 {
                break;
            }
            idx = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_one_hot() {
        // Every named operator occupies a distinct bit of the 12-bit space
        let ops = [
            Operator::IN,
            Operator::EQ,
            Operator::LT,
            Operator::LE,
            Operator::GT,
            Operator::GE,
            Operator::MATCH,
            Operator::ISNULL,
            Operator::OR,
            Operator::AND,
            Operator::EQUIV,
            Operator::NOOP,
        ];
        let mut seen = Operator::empty();
        for op in ops {
            assert_eq!(op.bits().count_ones(), 1);
            assert!(!seen.intersects(op));
            seen |= op;
        }
        assert_eq!(seen, Operator::ALL);
    }

    #[test]
    fn test_disable_cascades_to_parent() {
        let mut cs = ClauseSet::new();
        let wc = cs.push_clause(ClauseOp::And, None);
        let parent = cs.push_term(wc, WhereTerm::new(Expr::integer(1), TermFlags::empty()));
        let c1 = cs.push_term(wc, WhereTerm::new(Expr::integer(2), TermFlags::VIRTUAL));
        let c2 = cs.push_term(wc, WhereTerm::new(Expr::integer(3), TermFlags::VIRTUAL));
        cs.mark_term_as_child(wc, c1, parent);
        cs.mark_term_as_child(wc, c2, parent);

        cs.disable_term(TermRef {
            clause: wc,
            term: c1,
        });
        assert!(!cs.clause(wc).terms[parent]
            .flags
            .contains(TermFlags::CODED));

        cs.disable_term(TermRef {
            clause: wc,
            term: c2,
        });
        assert!(cs.clause(wc).terms[parent]
            .flags
            .contains(TermFlags::CODED));
    }

    #[test]
    fn test_from_binary_op() {
        assert_eq!(Operator::from_binary_op(BinaryOp::Eq), Some(Operator::EQ));
        assert_eq!(Operator::from_binary_op(BinaryOp::Is), Some(Operator::EQ));
        assert_eq!(Operator::from_binary_op(BinaryOp::Ge), Some(Operator::GE));
        assert_eq!(Operator::from_binary_op(BinaryOp::Add), None);
        assert_eq!(Operator::from_binary_op(BinaryOp::Ne), None);
    }
}
