//! Cost-based WHERE-clause query planner core
//!
//! This crate is the planning half of a SQL statement compiler: handed a
//! decomposed WHERE clause, the FROM list, an optional ORDER BY and a
//! catalog snapshot, it picks the join order, the index for each table
//! and the scan strategy with the lowest estimated cost, and returns a
//! plan for a code emitter to realize. Parsing, expression evaluation
//! and storage are out of scope; the crate defines the interfaces it
//! consumes instead.

pub mod error;
pub mod expr;
pub mod planner;
pub mod schema;

// Re-export main public types
pub use error::{Error, ErrorCode, Result};
pub use planner::plan::{DistinctMode, LevelAccess, OrBranch, WhereLevel, WherePlan};
pub use planner::vtab::{
    ConstraintOp, ConstraintUsage, IndexConstraint, IndexInfo, IndexOrderBy, VirtualTable,
};
pub use planner::{
    JoinType, OrderByTerm, PlannerConfig, SrcItem, TraceFlags, WherePlanner, WhereRequest,
};
