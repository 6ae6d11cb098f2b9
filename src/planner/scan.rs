//! Term scanner
//!
//! Given a target `(cursor, column)` and an operator mask, iterate over
//! every WHERE term usable against that target, walking outward through
//! enclosing clauses and across `x = y` equivalence classes: a scanned
//! EQUIV term whose right side is another column adds that column to the
//! working set, so constraints on any transitively-equal column surface
//! for the one being probed. The working set is capped at 11 columns,
//! which bounds the closure.

use crate::expr::Expr;
use crate::planner::analyze::{
    comparison_collation, expr_affinity, expr_collation, index_affinity_ok,
};
use crate::planner::mask::Bitmask;
use crate::planner::term::{ClauseSet, Operator, TermRef};
use crate::planner::SrcItem;
use crate::schema::{Affinity, Index};

/// Upper bound on the equivalence working set
const MAX_EQUIV: usize = 11;

/// Iterator over terms usable against one column
pub(crate) struct WhereScan<'a> {
    cs: &'a ClauseSet,
    src: &'a [SrcItem],
    /// Clause the scan started in; equivalence passes restart here
    orig_clause: usize,
    /// Clause currently being walked
    cur_clause: Option<usize>,
    /// Next term index within the current clause
    k: usize,
    op_mask: Operator,
    /// Collation the probed index column requires, when an index is given
    idx_collation: Option<String>,
    /// Affinity of the probed table column, when an index is given
    idx_affinity: Option<Affinity>,
    /// Equivalence working set of (cursor, column) pairs
    equiv: Vec<(i32, i32)>,
    /// Entry of `equiv` currently being scanned for
    i_equiv: usize,
}

impl<'a> WhereScan<'a> {
    /// Begin a scan for terms constraining `column` of `cursor`. When an
    /// index is supplied, terms must also be compatible with the index's
    /// affinity and collation on that column.
    pub fn new(
        cs: &'a ClauseSet,
        src: &'a [SrcItem],
        clause: usize,
        cursor: i32,
        column: i32,
        op_mask: Operator,
        index: Option<&Index>,
    ) -> Self {
        let mut idx_collation = None;
        let mut idx_affinity = None;
        if let Some(idx) = index {
            if column >= 0 {
                if let Some(pos) = idx.columns.iter().position(|&c| c == column) {
                    idx_collation = idx.collations.get(pos).cloned();
                }
                idx_affinity = crate::planner::src_for_cursor(src, cursor)
                    .map(|item| item.table.column_affinity(column));
            }
        }
        WhereScan {
            cs,
            src,
            orig_clause: clause,
            cur_clause: Some(clause),
            k: 0,
            op_mask,
            idx_collation,
            idx_affinity,
            equiv: vec![(cursor, column)],
            i_equiv: 0,
        }
    }

    /// Check index affinity/collation compatibility for a candidate term
    fn compatible(&self, r: TermRef) -> bool {
        let coll_name = match &self.idx_collation {
            Some(name) => name,
            None => return true,
        };
        let term = self.cs.term(r);
        if term.e_operator.contains(Operator::ISNULL) {
            return true;
        }
        match term.expr.as_ref() {
            Expr::Binary { left, right, .. } => {
                let aff = self.idx_affinity.unwrap_or(Affinity::None);
                if !index_affinity_ok(self.src, left, right, aff) {
                    return false;
                }
                comparison_collation(self.src, left, right).eq_ignore_ascii_case(coll_name)
            }
            Expr::In { expr, .. } => {
                let aff = self.idx_affinity.unwrap_or(Affinity::None);
                let lhs_aff = expr_affinity(self.src, expr);
                let ok = match lhs_aff {
                    Affinity::None | Affinity::Blob => true,
                    Affinity::Text => aff == Affinity::Text,
                    _ => aff.is_numeric(),
                };
                ok && expr_collation(self.src, expr).eq_ignore_ascii_case(coll_name)
            }
            _ => true,
        }
    }
}

impl<'a> Iterator for WhereScan<'a> {
    type Item = TermRef;

    fn next(&mut self) -> Option<TermRef> {
        while self.i_equiv < self.equiv.len() {
            let (cursor, column) = self.equiv[self.i_equiv];
            while let Some(wc) = self.cur_clause {
                let clause = self.cs.clause(wc);
                while self.k < clause.terms.len() {
                    let k = self.k;
                    self.k += 1;
                    let term = &clause.terms[k];
                    if term.left_cursor != cursor || term.left_column != column {
                        continue;
                    }
                    // Terms from an ON clause only apply to the seed
                    // column, never to columns reached by equivalence
                    if self.i_equiv > 0 && term.from_join {
                        continue;
                    }
                    // Grow the equivalence set through x = y terms
                    if term.e_operator.contains(Operator::EQUIV) && self.equiv.len() < MAX_EQUIV {
                        if let Expr::Binary { right, .. } = term.expr.as_ref() {
                            if let Some(pair) = right.column_ref() {
                                if !self.equiv.contains(&pair) {
                                    self.equiv.push(pair);
                                }
                            }
                        }
                    }
                    if !term.e_operator.intersects(self.op_mask) {
                        continue;
                    }
                    let r = TermRef {
                        clause: wc,
                        term: k,
                    };
                    if !self.compatible(r) {
                        continue;
                    }
                    // Skip equalities whose right side is the seed
                    // itself; the direct constraint is found without the
                    // round trip
                    if term.e_operator.contains(Operator::EQ) {
                        if let Expr::Binary { right, .. } = term.expr.as_ref() {
                            if right.column_ref() == Some(self.equiv[0]) {
                                continue;
                            }
                        }
                    }
                    return Some(r);
                }
                self.cur_clause = clause.outer;
                self.k = 0;
            }
            self.cur_clause = Some(self.orig_clause);
            self.k = 0;
            self.i_equiv += 1;
        }
        None
    }
}

/// Find the most useful term constraining `(cursor, column)`: one with a
/// constant right side wins, otherwise the first usable term found.
/// Terms whose prerequisites overlap `not_ready` are skipped.
pub(crate) fn find_term(
    cs: &ClauseSet,
    src: &[SrcItem],
    clause: usize,
    cursor: i32,
    column: i32,
    not_ready: Bitmask,
    op_mask: Operator,
    index: Option<&Index>,
) -> Option<TermRef> {
    let mut result: Option<TermRef> = None;
    let scan = WhereScan::new(cs, src, clause, cursor, column, op_mask, index);
    let eq_mask = op_mask & Operator::EQ;
    for r in scan {
        let term = cs.term(r);
        if term.prereq_right & not_ready != 0 {
            continue;
        }
        if term.prereq_right == 0 && term.e_operator.intersects(eq_mask) {
            return Some(r);
        }
        if result.is_none() {
            result = Some(r);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::analyze::Analyzer;
    use crate::planner::mask::MaskSet;
    use crate::planner::term::ClauseOp;
    use crate::planner::{PlannerConfig, SrcItem};
    use crate::schema::{Column, Table};
    use std::sync::Arc;

    fn setup(
        tables: Vec<Table>,
        e: &Expr,
    ) -> (ClauseSet, MaskSet, Vec<SrcItem>, usize) {
        let src: Vec<SrcItem> = tables
            .into_iter()
            .enumerate()
            .map(|(i, t)| SrcItem::new(Arc::new(t), i as i32))
            .collect();
        let mut ms = MaskSet::new();
        for item in &src {
            ms.assign(item.cursor);
        }
        let mut cs = ClauseSet::new();
        let wc = cs.push_clause(ClauseOp::And, None);
        let cfg = PlannerConfig::default();
        {
            let mut an = Analyzer {
                cs: &mut cs,
                ms: &ms,
                src: &src,
                cfg: &cfg,
            };
            an.split(wc, e, None);
            an.analyze_all(wc);
        }
        (cs, ms, src, wc)
    }

    fn int_table(name: &str, cols: &[&str]) -> Table {
        let mut t = Table::new(name, 1000);
        for c in cols {
            t = t.column(Column::new(*c, Affinity::Integer));
        }
        t
    }

    #[test]
    fn test_direct_term_found() {
        let e = Expr::eq(Expr::column(0, 1), Expr::integer(5));
        let (cs, _ms, src, wc) = setup(vec![int_table("t1", &["a", "b"])], &e);
        let found: Vec<TermRef> =
            WhereScan::new(&cs, &src, wc, 0, 1, Operator::EQ, None).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(cs.term(found[0]).left_column, 1);
    }

    #[test]
    fn test_equivalence_transitivity() {
        // x = y and y = z and z = 7: constraints on x are reachable
        // through the equivalence chain
        let e = Expr::and(
            Expr::and(
                Expr::eq(Expr::column(0, 0), Expr::column(1, 0)),
                Expr::eq(Expr::column(1, 0), Expr::column(2, 0)),
            ),
            Expr::eq(Expr::column(2, 0), Expr::integer(7)),
        );
        let (cs, _ms, src, wc) = setup(
            vec![
                int_table("t1", &["x"]),
                int_table("t2", &["y"]),
                int_table("t3", &["z"]),
            ],
            &e,
        );
        let found: Vec<TermRef> =
            WhereScan::new(&cs, &src, wc, 0, 0, Operator::EQ, None).collect();
        // The constant constraint on z must be among the results
        assert!(found.iter().any(|&r| {
            let t = cs.term(r);
            t.left_cursor == 2 && t.prereq_right == 0
        }));
    }

    #[test]
    fn test_find_term_prefers_constant_rhs() {
        // x = y (join) and x = 3 (constant): the constant wins
        let e = Expr::and(
            Expr::eq(Expr::column(0, 0), Expr::column(1, 0)),
            Expr::eq(Expr::column(0, 0), Expr::integer(3)),
        );
        let (cs, _ms, src, wc) = setup(
            vec![int_table("t1", &["x"]), int_table("t2", &["y"])],
            &e,
        );
        let r = find_term(&cs, &src, wc, 0, 0, 0, Operator::EQ, None).unwrap();
        assert_eq!(cs.term(r).prereq_right, 0);
    }

    #[test]
    fn test_find_term_honors_not_ready() {
        let e = Expr::eq(Expr::column(0, 0), Expr::column(1, 0));
        let (cs, ms, src, wc) = setup(
            vec![int_table("t1", &["x"]), int_table("t2", &["y"])],
            &e,
        );
        // t2 not positioned yet: the join term is unusable for t1
        let not_ready = ms.mask_of(1);
        assert!(find_term(&cs, &src, wc, 0, 0, not_ready, Operator::EQ, None).is_none());
    }

    #[test]
    fn test_collation_mismatch_skipped() {
        let t = Table::new("t1", 1000)
            .column(Column::new("name", Affinity::Text).collation("NOCASE"));
        let e = Expr::eq(Expr::column(0, 0), Expr::text("abc"));
        let (cs, _ms, src, wc) = setup(vec![t], &e);

        let binary_idx = Index::new("i_bin", vec![0]);
        assert!(find_term(&cs, &src, wc, 0, 0, 0, Operator::EQ, Some(&binary_idx)).is_none());

        let nocase_idx = Index::new("i_nc", vec![0]).collations(vec!["NOCASE".to_string()]);
        assert!(find_term(&cs, &src, wc, 0, 0, 0, Operator::EQ, Some(&nocase_idx)).is_some());
    }

    #[test]
    fn test_affinity_mismatch_skipped() {
        // Comparing a TEXT column to an INTEGER column has numeric
        // comparison affinity, unusable against a TEXT index column
        let t1 = Table::new("t1", 1000).column(Column::new("s", Affinity::Text));
        let t2 = Table::new("t2", 1000).column(Column::new("n", Affinity::Integer));
        let e = Expr::eq(Expr::column(0, 0), Expr::column(1, 0));
        let (cs, _ms, src, wc) = setup(vec![t1, t2], &e);
        let idx = Index::new("i_s", vec![0]);
        assert!(find_term(&cs, &src, wc, 0, 0, 0, Operator::EQ, Some(&idx)).is_none());
    }

    #[test]
    fn test_equivalence_capped() {
        // A long chain of equalities terminates; the working set is
        // bounded at 11 columns
        let mut tables = Vec::new();
        let mut e = Expr::eq(Expr::column(0, 0), Expr::column(1, 0));
        for i in 0..20 {
            tables.push(int_table(&format!("t{}", i), &["c"]));
            if i >= 2 {
                e = Expr::and(
                    e,
                    Expr::eq(Expr::column(i as i32 - 1, 0), Expr::column(i as i32, 0)),
                );
            }
        }
        let (cs, _ms, src, wc) = setup(tables, &e);
        let found: Vec<TermRef> =
            WhereScan::new(&cs, &src, wc, 0, 0, Operator::EQ, None).collect();
        // Terminates and yields a bounded number of terms
        assert!(found.len() <= 2 * MAX_EQUIV);
        let _ = cs;
    }
}
