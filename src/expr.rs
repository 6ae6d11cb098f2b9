//! Resolved expression tree consumed by the planner
//!
//! The planner operates downstream of name resolution: column references
//! carry a cursor number (one per FROM-list entry) and a column index
//! rather than names. Only the shapes the planner inspects are modeled;
//! anything else lands in [`Expr::Function`] and is carried opaquely as a
//! residual filter.

use std::cmp::Ordering;

use crate::planner::mask::Bitmask;

// ============================================================================
// Literal
// ============================================================================

/// A literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Integer(i64),
    Real(f64),
    String(String),
    Blob(Vec<u8>),
}

impl Literal {
    /// Storage-class rank used when comparing values of different types:
    /// NULL, then numbers, then text, then blobs.
    fn type_rank(&self) -> u8 {
        match self {
            Literal::Null => 0,
            Literal::Integer(_) | Literal::Real(_) => 1,
            Literal::String(_) => 2,
            Literal::Blob(_) => 3,
        }
    }

    /// Total order over literal values, used for histogram estimates
    pub fn compare(&self, other: &Literal) -> Ordering {
        let (ra, rb) = (self.type_rank(), other.type_rank());
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Literal::Null, Literal::Null) => Ordering::Equal,
            (Literal::Integer(a), Literal::Integer(b)) => a.cmp(b),
            (Literal::Real(a), Literal::Real(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Literal::Integer(a), Literal::Real(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Literal::Real(a), Literal::Integer(b)) => {
                a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal)
            }
            (Literal::String(a), Literal::String(b)) => a.cmp(b),
            (Literal::Blob(a), Literal::Blob(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    IsNot,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Pattern-match operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeOp {
    Like,
    Glob,
}

// ============================================================================
// Subquery / IN list
// ============================================================================

/// Opaque handle for a subquery appearing on the right of IN.
///
/// The planner does not look inside subqueries; it only needs an identity
/// for the emitter and the set of outer cursors the subquery correlates
/// with.
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    /// Identifier assigned by the statement compiler
    pub id: u32,
    /// Cursors of outer tables referenced by the subquery
    pub prereq: Bitmask,
}

/// Right-hand side of an IN expression
#[derive(Debug, Clone, PartialEq)]
pub enum InList {
    Values(Vec<Expr>),
    Subquery(Subquery),
}

// ============================================================================
// Expr
// ============================================================================

/// A resolved scalar expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value
    Literal(Literal),

    /// Column reference: cursor number and column index (-1 = rowid)
    Column { table: i32, column: i32 },

    /// Bound parameter
    Variable(u32),

    /// Unary operator
    Unary { op: UnaryOp, expr: Box<Expr> },

    /// Binary operator
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// BETWEEN
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    /// IN
    In {
        expr: Box<Expr>,
        list: InList,
        negated: bool,
    },

    /// LIKE / GLOB
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        escape: Option<Box<Expr>>,
        op: LikeOp,
        negated: bool,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// Opaque function call; arguments are visible for usage tracking
    Function { name: String, args: Vec<Expr> },

    /// Explicit collation override
    Collate { expr: Box<Expr>, collation: String },
}

impl Expr {
    /// Shorthand for a column reference
    pub fn column(table: i32, column: i32) -> Self {
        Expr::Column { table, column }
    }

    pub fn integer(value: i64) -> Self {
        Expr::Literal(Literal::Integer(value))
    }

    pub fn text(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(value.into()))
    }

    pub fn null() -> Self {
        Expr::Literal(Literal::Null)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::Or, left, right)
    }

    pub fn in_values(expr: Expr, values: Vec<Expr>) -> Self {
        Expr::In {
            expr: Box::new(expr),
            list: InList::Values(values),
            negated: false,
        }
    }

    pub fn between(expr: Expr, low: Expr, high: Expr) -> Self {
        Expr::Between {
            expr: Box::new(expr),
            low: Box::new(low),
            high: Box::new(high),
            negated: false,
        }
    }

    pub fn like(expr: Expr, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(expr),
            pattern: Box::new(Expr::text(pattern)),
            escape: None,
            op: LikeOp::Like,
            negated: false,
        }
    }

    pub fn is_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    pub fn is_not_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: true,
        }
    }

    pub fn collate(expr: Expr, collation: impl Into<String>) -> Self {
        Expr::Collate {
            expr: Box::new(expr),
            collation: collation.into(),
        }
    }

    /// Strip COLLATE wrappers
    pub fn skip_collate(&self) -> &Expr {
        let mut e = self;
        while let Expr::Collate { expr, .. } = e {
            e = expr;
        }
        e
    }

    /// True if the expression (collation aside) is a bare column reference
    pub fn is_column(&self) -> bool {
        matches!(self.skip_collate(), Expr::Column { .. })
    }

    /// Column reference, if the expression is one
    pub fn column_ref(&self) -> Option<(i32, i32)> {
        match self.skip_collate() {
            Expr::Column { table, column } => Some((*table, *column)),
            _ => None,
        }
    }

    /// True if the expression references no columns, variables or
    /// subqueries and therefore has the same value on every row
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Literal(_) => true,
            Expr::Column { .. } | Expr::Variable(_) => false,
            Expr::Unary { expr, .. } => expr.is_constant(),
            Expr::Binary { left, right, .. } => left.is_constant() && right.is_constant(),
            Expr::Between {
                expr, low, high, ..
            } => expr.is_constant() && low.is_constant() && high.is_constant(),
            Expr::In { expr, list, .. } => {
                expr.is_constant()
                    && match list {
                        InList::Values(values) => values.iter().all(Expr::is_constant),
                        InList::Subquery(_) => false,
                    }
            }
            Expr::Like {
                expr,
                pattern,
                escape,
                ..
            } => {
                expr.is_constant()
                    && pattern.is_constant()
                    && escape.as_ref().map_or(true, |e| e.is_constant())
            }
            Expr::IsNull { expr, .. } => expr.is_constant(),
            Expr::Function { args, .. } => args.iter().all(Expr::is_constant),
            Expr::Collate { expr, .. } => expr.is_constant(),
        }
    }

    /// The explicit COLLATE name applied to this expression, if any
    pub fn explicit_collation(&self) -> Option<&str> {
        match self {
            Expr::Collate { collation, .. } => Some(collation),
            _ => None,
        }
    }

    /// Visit every column reference in the expression
    pub fn for_each_column(&self, f: &mut impl FnMut(i32, i32)) {
        match self {
            Expr::Literal(_) | Expr::Variable(_) => {}
            Expr::Column { table, column } => f(*table, *column),
            Expr::Unary { expr, .. } => expr.for_each_column(f),
            Expr::Binary { left, right, .. } => {
                left.for_each_column(f);
                right.for_each_column(f);
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.for_each_column(f);
                low.for_each_column(f);
                high.for_each_column(f);
            }
            Expr::In { expr, list, .. } => {
                expr.for_each_column(f);
                if let InList::Values(values) = list {
                    for v in values {
                        v.for_each_column(f);
                    }
                }
            }
            Expr::Like {
                expr,
                pattern,
                escape,
                ..
            } => {
                expr.for_each_column(f);
                pattern.for_each_column(f);
                if let Some(e) = escape {
                    e.for_each_column(f);
                }
            }
            Expr::IsNull { expr, .. } => expr.for_each_column(f),
            Expr::Function { args, .. } => {
                for a in args {
                    a.for_each_column(f);
                }
            }
            Expr::Collate { expr, .. } => expr.for_each_column(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_collate() {
        let e = Expr::collate(Expr::column(0, 1), "NOCASE");
        assert_eq!(e.column_ref(), Some((0, 1)));
        assert!(e.is_column());
    }

    #[test]
    fn test_is_constant() {
        assert!(Expr::integer(5).is_constant());
        assert!(Expr::binary(BinaryOp::Add, Expr::integer(1), Expr::integer(2)).is_constant());
        assert!(!Expr::column(0, 0).is_constant());
        assert!(!Expr::Variable(1).is_constant());
        assert!(!Expr::eq(Expr::integer(1), Expr::column(0, 0)).is_constant());
    }

    #[test]
    fn test_literal_ordering() {
        use std::cmp::Ordering;
        assert_eq!(
            Literal::Null.compare(&Literal::Integer(0)),
            Ordering::Less
        );
        assert_eq!(
            Literal::Integer(3).compare(&Literal::Real(3.5)),
            Ordering::Less
        );
        assert_eq!(
            Literal::Integer(9).compare(&Literal::String("a".into())),
            Ordering::Less
        );
        assert_eq!(
            Literal::String("abc".into()).compare(&Literal::String("abd".into())),
            Ordering::Less
        );
    }
}
