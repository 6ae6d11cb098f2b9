//! Catalog snapshot consumed by the planner
//!
//! The planner never reads storage. It works from an immutable description
//! of each table in the FROM list: columns with affinity, NOT NULL and
//! collation attributes, the set of available indexes, and optional
//! statistics gathered by an ANALYZE-style pass.

use std::sync::Arc;

use crate::expr::Literal;
use crate::planner::cost::{log_est, LogEst};

// ============================================================================
// Affinity
// ============================================================================

/// Type affinity for columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Blob,
    Text,
    Numeric,
    Integer,
    Real,
    None,
}

impl Affinity {
    /// Get affinity from a declared type name
    pub fn from_type_name(type_name: &str) -> Self {
        let upper = type_name.to_uppercase();

        if upper.contains("INT") {
            Affinity::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Affinity::Text
        } else if upper.contains("BLOB") || upper.is_empty() {
            Affinity::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    /// True for INTEGER, REAL and NUMERIC affinities
    pub fn is_numeric(&self) -> bool {
        matches!(self, Affinity::Integer | Affinity::Real | Affinity::Numeric)
    }
}

// ============================================================================
// SortOrder
// ============================================================================

/// Sort order of an index column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

// ============================================================================
// Column
// ============================================================================

/// One column of a table
#[derive(Debug, Clone)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Type affinity
    pub affinity: Affinity,
    /// NOT NULL constraint present
    pub not_null: bool,
    /// Default collation sequence name
    pub collation: String,
}

impl Column {
    pub fn new(name: impl Into<String>, affinity: Affinity) -> Self {
        Column {
            name: name.into(),
            affinity,
            not_null: false,
            collation: "BINARY".to_string(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn collation(mut self, name: impl Into<String>) -> Self {
        self.collation = name.into();
        self
    }
}

// ============================================================================
// IndexSample
// ============================================================================

/// One histogram sample for the left-most column of an index
///
/// `n_eq` is the number of rows whose left-most key equals `value`; `n_lt`
/// is the number of rows whose left-most key is strictly less. Samples are
/// kept sorted by `value`.
#[derive(Debug, Clone)]
pub struct IndexSample {
    pub value: Literal,
    pub n_eq: u64,
    pub n_lt: u64,
}

// ============================================================================
// Index
// ============================================================================

/// An index available for planning
#[derive(Debug, Clone)]
pub struct Index {
    /// Index name
    pub name: String,
    /// Indexed column numbers in order; -1 denotes the rowid
    pub columns: Vec<i32>,
    /// Per-column sort order
    pub sort_orders: Vec<SortOrder>,
    /// Per-column collation sequence names
    pub collations: Vec<String>,
    /// Is UNIQUE index
    pub unique: bool,
    /// True for the synthetic rowid primary-key probe
    pub rowid_pk: bool,
    /// True if the index does not maintain key order (hash-style)
    pub unordered: bool,
    /// Row estimates: entry 0 is the total row count, entry i the number
    /// of rows matching an equality prefix of i columns. All log-domain.
    pub row_log_est: Vec<LogEst>,
    /// Histogram samples for the left-most column, sorted by value
    pub samples: Vec<IndexSample>,
}

impl Index {
    /// Create an index over the given columns with default attributes
    pub fn new(name: impl Into<String>, columns: Vec<i32>) -> Self {
        let n = columns.len();
        Index {
            name: name.into(),
            columns,
            sort_orders: vec![SortOrder::Asc; n],
            collations: vec!["BINARY".to_string(); n],
            unique: false,
            rowid_pk: false,
            unordered: false,
            row_log_est: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn collations(mut self, names: Vec<String>) -> Self {
        self.collations = names;
        self
    }

    pub fn sort_orders(mut self, orders: Vec<SortOrder>) -> Self {
        self.sort_orders = orders;
        self
    }

    pub fn samples(mut self, samples: Vec<IndexSample>) -> Self {
        self.samples = samples;
        self
    }

    /// Explicit row estimates (log domain), entry 0 first
    pub fn row_log_est(mut self, est: Vec<LogEst>) -> Self {
        self.row_log_est = est;
        self
    }

    /// Number of key columns
    pub fn key_count(&self) -> usize {
        self.columns.len()
    }

    /// Synthetic one-column index standing in for the rowid primary key
    pub fn rowid_pk(table_rows: LogEst) -> Self {
        let mut idx = Index::new("rowid", vec![-1]);
        idx.unique = true;
        idx.rowid_pk = true;
        idx.row_log_est = vec![table_rows, 0];
        idx
    }

    /// Fill in default row estimates when ANALYZE-style data is absent.
    ///
    /// The first equality column is assumed to narrow the result to about
    /// 10 rows, the second to 9, then 8, 7, 6, and 5 for each column after
    /// the fifth. A unique index narrows a full key match to a single row.
    pub fn apply_default_row_est(&mut self, table_rows: LogEst) {
        const A_VAL: [LogEst; 5] = [33, 32, 30, 28, 26];
        let n_key = self.key_count();
        let mut a = vec![0 as LogEst; n_key + 1];
        a[0] = table_rows.max(33);
        for i in 1..=n_key {
            a[i] = if i <= A_VAL.len() { A_VAL[i - 1] } else { 23 };
        }
        if self.unique {
            a[n_key] = 0;
        }
        self.row_log_est = a;
    }
}

// ============================================================================
// Table
// ============================================================================

/// A table appearing in the FROM list
#[derive(Debug, Clone)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<Column>,
    /// Available indexes
    pub indexes: Vec<Arc<Index>>,
    /// Estimated total row count, log domain
    pub row_log_est: LogEst,
    /// Column acting as INTEGER PRIMARY KEY (rowid alias), or -1
    pub ipk: i32,
}

impl Table {
    /// Create a table with an estimated row count (linear domain)
    pub fn new(name: impl Into<String>, estimated_rows: u64) -> Self {
        Table {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            row_log_est: log_est(estimated_rows),
            ipk: -1,
        }
    }

    pub fn column(mut self, col: Column) -> Self {
        self.columns.push(col);
        self
    }

    pub fn ipk(mut self, column: i32) -> Self {
        self.ipk = column;
        self
    }

    /// Attach an index, filling in default row estimates when the given
    /// ones are missing or malformed
    pub fn index(mut self, mut idx: Index) -> Self {
        if idx.row_log_est.len() != idx.key_count() + 1 {
            idx.apply_default_row_est(self.row_log_est);
        }
        self.indexes.push(Arc::new(idx));
        self
    }

    /// Look up an index by name, case-insensitively
    pub fn find_index(&self, name: &str) -> Option<&Arc<Index>> {
        self.indexes
            .iter()
            .find(|idx| idx.name.eq_ignore_ascii_case(name))
    }

    /// Affinity of a column; the rowid has integer affinity
    pub fn column_affinity(&self, column: i32) -> Affinity {
        if column < 0 {
            return Affinity::Integer;
        }
        self.columns
            .get(column as usize)
            .map(|c| c.affinity)
            .unwrap_or(Affinity::None)
    }

    /// NOT NULL attribute of a column; the rowid is never NULL
    pub fn column_not_null(&self, column: i32) -> bool {
        if column < 0 {
            return true;
        }
        self.columns
            .get(column as usize)
            .map(|c| c.not_null)
            .unwrap_or(false)
    }

    /// Default collation of a column
    pub fn column_collation(&self, column: i32) -> &str {
        if column < 0 {
            return "BINARY";
        }
        self.columns
            .get(column as usize)
            .map(|c| c.collation.as_str())
            .unwrap_or("BINARY")
    }
}
