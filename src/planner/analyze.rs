//! WHERE-clause normalization
//!
//! Splits the WHERE expression on AND, classifies each term, commutes
//! comparisons into the canonical `column <op> expr` shape, and
//! synthesizes virtual terms:
//!
//! - `a BETWEEN b AND c` adds `a>=b` and `a<=c`
//! - `col LIKE 'abc%'` adds `col>='abc'` and `col<'abd'`
//! - `x = y` with columns on both sides adds the commuted copy, tagged
//!   EQUIV so the scanner can walk equivalence classes
//! - `e1 OR e2 OR ...` is analyzed into either a single `col IN (...)`
//!   term or an indexable-OR term
//! - `x IS NOT NULL` adds `x > NULL` when histogram statistics are in use
//!
//! Virtual terms always point back at the term that produced them, by
//! index, so that consuming every child disables the parent.

use crate::expr::{BinaryOp, Expr, InList, Literal};
use crate::planner::mask::{Bitmask, MaskSet};
use crate::planner::term::{
    AndInfo, ClauseOp, ClauseSet, Operator, OrInfo, TermFlags, WhereTerm,
};
use crate::planner::{src_for_cursor, PlannerConfig, SrcItem};
use crate::schema::Affinity;

// ============================================================================
// Expression utilities
// ============================================================================

/// Compute the set of tables referenced by an expression
pub fn expr_usage(ms: &MaskSet, e: &Expr) -> Bitmask {
    match e {
        Expr::Literal(_) | Expr::Variable(_) => 0,
        Expr::Column { table, .. } => ms.mask_of(*table),
        Expr::Unary { expr, .. } => expr_usage(ms, expr),
        Expr::Binary { left, right, .. } => expr_usage(ms, left) | expr_usage(ms, right),
        Expr::Between {
            expr, low, high, ..
        } => expr_usage(ms, expr) | expr_usage(ms, low) | expr_usage(ms, high),
        Expr::In { expr, list, .. } => expr_usage(ms, expr) | in_list_usage(ms, list),
        Expr::Like {
            expr,
            pattern,
            escape,
            ..
        } => {
            let mut mask = expr_usage(ms, expr) | expr_usage(ms, pattern);
            if let Some(escape) = escape {
                mask |= expr_usage(ms, escape);
            }
            mask
        }
        Expr::IsNull { expr, .. } => expr_usage(ms, expr),
        Expr::Function { args, .. } => expr_list_usage(ms, args),
        Expr::Collate { expr, .. } => expr_usage(ms, expr),
    }
}

/// Compute a table-usage mask for an expression list
pub fn expr_list_usage(ms: &MaskSet, exprs: &[Expr]) -> Bitmask {
    exprs.iter().fold(0, |mask, e| mask | expr_usage(ms, e))
}

fn in_list_usage(ms: &MaskSet, list: &InList) -> Bitmask {
    match list {
        InList::Values(values) => expr_list_usage(ms, values),
        InList::Subquery(sub) => sub.prereq,
    }
}

/// Swap the operands of a comparison, flipping the operator
pub fn commute_comparison(e: &mut Expr) -> bool {
    let (op, left, right) = match e {
        Expr::Binary { op, left, right } => (op, left, right),
        _ => return false,
    };

    let new_op = match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Ge => BinaryOp::Le,
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Is | BinaryOp::IsNot => *op,
        _ => return false,
    };

    std::mem::swap(left, right);
    *op = new_op;
    true
}

/// Affinity of an expression: only column references carry one
pub fn expr_affinity(src: &[SrcItem], e: &Expr) -> Affinity {
    match e.skip_collate() {
        Expr::Column { table, column } => src_for_cursor(src, *table)
            .map(|item| item.table.column_affinity(*column))
            .unwrap_or(Affinity::None),
        _ => Affinity::None,
    }
}

fn has_affinity(a: Affinity) -> bool {
    !matches!(a, Affinity::None | Affinity::Blob)
}

/// Affinity that governs a comparison between two expressions
pub fn comparison_affinity(src: &[SrcItem], left: &Expr, right: &Expr) -> Affinity {
    let aff1 = expr_affinity(src, left);
    let aff2 = expr_affinity(src, right);
    if has_affinity(aff1) && has_affinity(aff2) {
        if aff1.is_numeric() || aff2.is_numeric() {
            Affinity::Numeric
        } else {
            Affinity::None
        }
    } else if has_affinity(aff1) {
        aff1
    } else if has_affinity(aff2) {
        aff2
    } else {
        Affinity::None
    }
}

/// True if a comparison term can drive an index column of the given
/// affinity
pub fn index_affinity_ok(src: &[SrcItem], left: &Expr, right: &Expr, idx_aff: Affinity) -> bool {
    match comparison_affinity(src, left, right) {
        Affinity::None | Affinity::Blob => true,
        Affinity::Text => idx_aff == Affinity::Text,
        _ => idx_aff.is_numeric(),
    }
}

/// Collation sequence governing a comparison: an explicit COLLATE on the
/// left operand wins, then one on the right, then the left column's
/// default, then the right column's.
pub fn comparison_collation(src: &[SrcItem], left: &Expr, right: &Expr) -> String {
    if let Some(name) = left.explicit_collation() {
        return name.to_string();
    }
    if let Some(name) = right.explicit_collation() {
        return name.to_string();
    }
    for e in [left, right] {
        if let Some((table, column)) = e.column_ref() {
            if let Some(item) = src_for_cursor(src, table) {
                return item.table.column_collation(column).to_string();
            }
        }
    }
    "BINARY".to_string()
}

/// Collation of a single expression (explicit COLLATE or column default)
pub fn expr_collation(src: &[SrcItem], e: &Expr) -> String {
    if let Some(name) = e.explicit_collation() {
        return name.to_string();
    }
    if let Some((table, column)) = e.column_ref() {
        if let Some(item) = src_for_cursor(src, table) {
            return item.table.column_collation(column).to_string();
        }
    }
    "BINARY".to_string()
}

// ============================================================================
// Analyzer
// ============================================================================

/// Normalizes one WHERE expression (plus LEFT JOIN ON clauses) into the
/// clause arena
pub(crate) struct Analyzer<'a> {
    pub cs: &'a mut ClauseSet,
    pub ms: &'a MaskSet,
    pub src: &'a [SrcItem],
    pub cfg: &'a PlannerConfig,
}

impl<'a> Analyzer<'a> {
    /// Recursively split an expression on the clause's connective,
    /// appending one term per factor. Terms coming from the ON clause of
    /// a LEFT JOIN carry the cursor of the join's right table.
    pub fn split(&mut self, clause: usize, e: &Expr, join_table: Option<i32>) {
        let connective = match self.cs.clause(clause).op {
            ClauseOp::And => BinaryOp::And,
            ClauseOp::Or => BinaryOp::Or,
        };
        if let Expr::Binary { op, left, right } = e {
            if *op == connective {
                self.split(clause, left, join_table);
                self.split(clause, right, join_table);
                return;
            }
        }
        let mut term = WhereTerm::new(e.clone(), TermFlags::empty());
        if let Some(cursor) = join_table {
            term.from_join = true;
            term.right_join_table = cursor;
        }
        self.cs.push_term(clause, term);
    }

    /// Analyze every term currently in the clause. Terms appended during
    /// analysis are analyzed at their point of creation, so the reverse
    /// walk over the original terms covers everything exactly once.
    pub fn analyze_all(&mut self, clause: usize) {
        let n = self.cs.clause(clause).terms.len();
        for i in (0..n).rev() {
            self.analyze_term(clause, i);
        }
    }

    /// Classify one term and synthesize whatever virtual terms it implies
    pub fn analyze_term(&mut self, wc: usize, idx: usize) {
        let expr = self.cs.clause(wc).terms[idx].expr.as_ref().clone();
        let from_join = self.cs.clause(wc).terms[idx].from_join;
        let right_join_table = self.cs.clause(wc).terms[idx].right_join_table;

        // Prerequisite masks
        let prereq_right = match &expr {
            Expr::Binary { op, right, .. } if Operator::from_binary_op(*op).is_some() => {
                expr_usage(self.ms, right)
            }
            Expr::In { list, .. } => in_list_usage(self.ms, list),
            Expr::IsNull { .. } => 0,
            _ => 0,
        };
        let mut prereq_all = expr_usage(self.ms, &expr);
        let mut extra_right: Bitmask = 0;
        if from_join {
            let x = self.ms.mask_of(right_join_table);
            prereq_all |= x;
            // An ON-clause term may not drive an index on a table to the
            // left of its join; bits are in FROM order so x-1 is exactly
            // the set of those tables.
            extra_right = x.wrapping_sub(1);
        }

        {
            let term = &mut self.cs.clause_mut(wc).terms[idx];
            term.prereq_right = prereq_right;
            term.prereq_all = prereq_all;
            term.left_cursor = -1;
            term.e_operator = Operator::empty();
        }

        let clause_op = self.cs.clause(wc).op;

        match &expr {
            Expr::Binary { op, left, right } if Operator::from_binary_op(*op).is_some() => {
                self.analyze_comparison(
                    wc,
                    idx,
                    *op,
                    left,
                    right,
                    prereq_right,
                    prereq_all,
                    extra_right,
                );
            }

            Expr::In {
                expr: lhs,
                negated: false,
                ..
            } => {
                if let Some((cursor, column)) = lhs.column_ref() {
                    // A list that references the constrained table itself
                    // cannot seed an index probe
                    let usable = prereq_right & expr_usage(self.ms, lhs) == 0;
                    let term = &mut self.cs.clause_mut(wc).terms[idx];
                    term.left_cursor = cursor;
                    term.left_column = column;
                    if usable {
                        term.e_operator = Operator::IN;
                    }
                }
            }

            Expr::IsNull {
                expr: lhs,
                negated: false,
            } => {
                if let Some((cursor, column)) = lhs.column_ref() {
                    let term = &mut self.cs.clause_mut(wc).terms[idx];
                    term.left_cursor = cursor;
                    term.left_column = column;
                    term.e_operator = Operator::ISNULL;
                }
            }

            Expr::Between {
                expr: lhs,
                low,
                high,
                negated: false,
            } if clause_op == ClauseOp::And => {
                let bounds = [(BinaryOp::Ge, low), (BinaryOp::Le, high)];
                for (op, bound) in bounds {
                    let child = Expr::binary(op, lhs.as_ref().clone(), bound.as_ref().clone());
                    let new_idx = self.insert_virtual(wc, child, from_join, right_join_table);
                    self.analyze_term(wc, new_idx);
                    self.cs.mark_term_as_child(wc, new_idx, idx);
                }
            }

            Expr::Binary {
                op: BinaryOp::Or, ..
            } if clause_op == ClauseOp::And => {
                self.analyze_or_term(wc, idx, &expr);
            }

            _ => {}
        }

        // LIKE/GLOB prefix optimization
        if clause_op == ClauseOp::And {
            if let Some(like) = self.like_bounds(&expr) {
                self.add_like_range_terms(wc, idx, like, from_join, right_join_table);
            }
        }

        // MATCH against a column becomes a virtual-table constraint
        if clause_op == ClauseOp::And {
            self.analyze_match(wc, idx, &expr);
        }

        // x IS NOT NULL manufactures x > NULL, but only when histogram
        // statistics are in play to refine the range estimate
        if self.cfg.stat3 {
            if let Expr::IsNull {
                expr: lhs,
                negated: true,
            } = &expr
            {
                if let Some((cursor, column)) = lhs.column_ref() {
                    if column >= 0 {
                        let child = Expr::binary(
                            BinaryOp::Gt,
                            lhs.as_ref().clone(),
                            Expr::Literal(Literal::Null),
                        );
                        let mut term = WhereTerm::new(
                            child,
                            TermFlags::VIRTUAL | TermFlags::DYNAMIC | TermFlags::VNULL,
                        );
                        term.prereq_right = 0;
                        term.prereq_all = prereq_all;
                        term.left_cursor = cursor;
                        term.left_column = column;
                        term.e_operator = Operator::GT;
                        let new_idx = self.cs.push_term(wc, term);
                        self.cs.mark_term_as_child(wc, new_idx, idx);
                        self.cs.clause_mut(wc).terms[idx].flags |= TermFlags::COPIED;
                    }
                }
            }
        }

        // An ON-clause term of a LEFT JOIN may not drive an index on any
        // table to the left of the join
        if extra_right != 0 {
            self.cs.clause_mut(wc).terms[idx].prereq_right |= extra_right;
        }
    }

    /// Canonicalize a comparison and synthesize the commuted copy when
    /// both sides are columns
    #[allow(clippy::too_many_arguments)]
    fn analyze_comparison(
        &mut self,
        wc: usize,
        idx: usize,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        prereq_right: Bitmask,
        prereq_all: Bitmask,
        extra_right: Bitmask,
    ) {
        let prereq_left = expr_usage(self.ms, left);
        // A right side that references the left column's own table is
        // only usable through equivalence propagation.
        let op_mask = if prereq_right & prereq_left == 0 {
            Operator::ALL
        } else {
            Operator::EQUIV
        };

        let left_col = left.column_ref();
        let right_col = right.column_ref();

        let op_class = match Operator::from_binary_op(op) {
            Some(c) => c,
            None => return,
        };

        if let Some((cursor, column)) = left_col {
            let term = &mut self.cs.clause_mut(wc).terms[idx];
            term.left_cursor = cursor;
            term.left_column = column;
            term.e_operator = op_class & op_mask;
        }

        if right_col.is_some() {
            let from_join = self.cs.clause(wc).terms[idx].from_join;
            let right_join_table = self.cs.clause(wc).terms[idx].right_join_table;
            let mut extra_op = Operator::empty();

            let target = if left_col.is_some() {
                // Both sides are columns: append a commuted virtual copy
                let dup = self.cs.clause(wc).terms[idx].expr.as_ref().clone();
                let new_idx = self.insert_virtual(wc, dup, from_join, right_join_table);
                self.cs.mark_term_as_child(wc, new_idx, idx);
                let original = &mut self.cs.clause_mut(wc).terms[idx];
                original.flags |= TermFlags::COPIED;
                if op == BinaryOp::Eq && !from_join && self.cfg.transitive {
                    original.e_operator |= Operator::EQUIV;
                    extra_op = Operator::EQUIV;
                }
                new_idx
            } else {
                // Only the right side is a column: commute in place
                idx
            };

            let term = &mut self.cs.clause_mut(wc).terms[target];
            let commuted = commute_comparison(term.expr.as_mut());
            debug_assert!(commuted);
            let (new_op, new_left) = match term.expr.as_ref() {
                Expr::Binary { op, left, .. } => (*op, left.column_ref()),
                _ => return,
            };
            let (new_class, (cursor, column)) =
                match (Operator::from_binary_op(new_op), new_left) {
                    (Some(c), Some(pair)) => (c, pair),
                    _ => return,
                };
            term.left_cursor = cursor;
            term.left_column = column;
            term.prereq_right = prereq_left | extra_right;
            term.prereq_all = prereq_all;
            term.e_operator = (new_class | extra_op) & op_mask;
        }
    }

    /// Analyze an OR term: build the member sub-clause, compute the
    /// indexable table set, and convert to IN when every member is an
    /// equality on one column.
    fn analyze_or_term(&mut self, wc: usize, idx: usize, expr: &Expr) {
        let or_clause = self.cs.push_clause(ClauseOp::Or, Some(wc));
        let from_join = self.cs.clause(wc).terms[idx].from_join;
        let right_join_table = self.cs.clause(wc).terms[idx].right_join_table;
        self.split(
            or_clause,
            expr,
            if from_join { Some(right_join_table) } else { None },
        );
        self.analyze_all(or_clause);

        // For each member, the set of tables it could constrain through
        // an index; the OR term as a whole can only help tables in the
        // intersection. Track in parallel whether every member is an
        // equality, a precondition for the IN rewrite.
        let mut indexable: Bitmask = !0;
        let mut chng_to_in: Bitmask = !0;
        let n_or = self.cs.clause(or_clause).terms.len();
        for i in (0..n_or).rev() {
            let (e_op, flags, left_cursor, parent) = {
                let t = &self.cs.clause(or_clause).terms[i];
                (t.e_operator, t.flags, t.left_cursor, t.parent)
            };
            if !e_op.intersects(Operator::SINGLE) && !e_op.contains(Operator::OR) {
                // Composite member: split it on AND; it helps any table
                // one of its factors can constrain.
                chng_to_in = 0;
                let and_clause = self.cs.push_clause(ClauseOp::And, Some(wc));
                let member = self.cs.clause(or_clause).terms[i].expr.as_ref().clone();
                self.split(
                    and_clause,
                    &member,
                    if from_join { Some(right_join_table) } else { None },
                );
                self.analyze_all(and_clause);
                let mut b: Bitmask = 0;
                for and_term in &self.cs.clause(and_clause).terms {
                    if and_term.e_operator.intersects(Operator::SINGLE | Operator::MATCH) {
                        b |= self.ms.mask_of(and_term.left_cursor);
                    }
                }
                let t = &mut self.cs.clause_mut(or_clause).terms[i];
                t.and_info = Some(AndInfo { clause: and_clause });
                t.flags |= TermFlags::ANDINFO;
                t.e_operator = Operator::AND;
                indexable &= b;
            } else if flags.contains(TermFlags::COPIED) {
                // Skip; the virtual twin is visited instead
            } else {
                let mut b = self.ms.mask_of(left_cursor);
                if flags.contains(TermFlags::VIRTUAL) {
                    if let Some(p) = parent {
                        b |= self
                            .ms
                            .mask_of(self.cs.clause(or_clause).terms[p].left_cursor);
                    }
                }
                indexable &= b;
                if !e_op.contains(Operator::EQ) {
                    chng_to_in = 0;
                } else {
                    chng_to_in &= b;
                }
            }
        }

        {
            let term = &mut self.cs.clause_mut(wc).terms[idx];
            term.or_info = Some(OrInfo {
                clause: or_clause,
                indexable,
            });
            term.flags |= TermFlags::ORINFO;
            term.e_operator = if indexable == 0 {
                Operator::empty()
            } else {
                Operator::OR
            };
        }

        if chng_to_in == 0 {
            return;
        }

        // Case 1: every member is T.c = expr for one (T, c). Try each
        // candidate column until one covers all members.
        let candidates: Vec<(i32, i32)> = {
            let mut seen = hashbrown::HashSet::new();
            let mut out = Vec::new();
            for t in &self.cs.clause(or_clause).terms {
                if t.e_operator.contains(Operator::EQ)
                    && self.ms.mask_of(t.left_cursor) & chng_to_in != 0
                    && seen.insert((t.left_cursor, t.left_column))
                {
                    out.push((t.left_cursor, t.left_column));
                }
            }
            out
        };

        'candidate: for (cursor, column) in candidates {
            let cursor_mask = self.ms.mask_of(cursor);
            let mut values: Vec<Expr> = Vec::new();
            let mut lhs: Option<Expr> = None;
            for t in &self.cs.clause(or_clause).terms {
                let usable = t.e_operator.contains(Operator::EQ)
                    && t.left_cursor == cursor
                    && t.left_column == column
                    && t.prereq_right & cursor_mask == 0;
                if usable {
                    if let Expr::Binary { left, right, .. } = t.expr.as_ref() {
                        values.push(right.as_ref().clone());
                        lhs = Some(left.as_ref().clone());
                    }
                } else if t.flags.intersects(TermFlags::COPIED | TermFlags::VIRTUAL) {
                    // Its twin carries the value
                } else {
                    continue 'candidate;
                }
            }
            let lhs = match lhs {
                Some(l) => l,
                None => continue,
            };
            let in_expr = Expr::in_values(lhs, values);
            let new_idx = self.insert_virtual(wc, in_expr, from_join, right_join_table);
            self.analyze_term(wc, new_idx);
            self.cs.mark_term_as_child(wc, new_idx, idx);
            // Case 1 trumps case 2
            self.cs.clause_mut(wc).terms[idx].e_operator = Operator::NOOP;
            return;
        }
    }

    /// Extract the optimizable prefix of a LIKE/GLOB term, if any
    fn like_bounds(&self, expr: &Expr) -> Option<LikeBounds> {
        let (lhs, pattern, op) = match expr {
            Expr::Like {
                expr,
                pattern,
                escape: None,
                op,
                negated: false,
            } => (expr, pattern, *op),
            _ => return None,
        };
        // The left side must be a column with TEXT affinity
        let (cursor, column) = lhs.column_ref()?;
        let item = src_for_cursor(self.src, cursor)?;
        if item.vtab.is_some() || item.table.column_affinity(column) != Affinity::Text {
            return None;
        }
        let text = match pattern.as_ref().skip_collate() {
            Expr::Literal(Literal::String(s)) => s,
            _ => return None,
        };
        let (match_all, match_one) = match op {
            crate::expr::LikeOp::Like => ('%', '_'),
            crate::expr::LikeOp::Glob => ('*', '?'),
        };
        let no_case = op == crate::expr::LikeOp::Like && !self.cfg.case_sensitive_like;

        let bytes = text.as_bytes();
        let mut cnt = 0;
        while cnt < bytes.len() {
            let c = bytes[cnt] as char;
            if c == match_all || c == match_one {
                break;
            }
            if op == crate::expr::LikeOp::Glob && c == '[' {
                break;
            }
            // Restrict to ASCII so byte increments stay valid text
            if !bytes[cnt].is_ascii() {
                return None;
            }
            cnt += 1;
        }
        if cnt == 0 || bytes[cnt - 1] == 0xff {
            return None;
        }
        let mut is_complete = cnt + 1 == bytes.len() && bytes[cnt] as char == match_all;

        let prefix: String = text[..cnt].to_string();
        let mut upper: Vec<u8> = prefix.clone().into_bytes();
        let last = upper.last_mut()?;
        let mut c = *last;
        if no_case {
            // An upper-bound increment that crosses the case boundary
            // cannot be trusted to keep the original term disabled
            if c == b'A' - 1 {
                is_complete = false;
            }
            c = c.to_ascii_lowercase();
        }
        *last = c + 1;

        Some(LikeBounds {
            column: lhs.as_ref().clone(),
            prefix,
            upper: String::from_utf8(upper).ok()?,
            collation: if no_case { "NOCASE" } else { "BINARY" },
            is_complete,
        })
    }

    /// Append the `col >= prefix` and `col < upper` range terms for a
    /// LIKE prefix
    fn add_like_range_terms(
        &mut self,
        wc: usize,
        idx: usize,
        like: LikeBounds,
        from_join: bool,
        right_join_table: i32,
    ) {
        let bounds = [
            (BinaryOp::Ge, like.prefix.clone()),
            (BinaryOp::Lt, like.upper.clone()),
        ];
        for (op, value) in bounds {
            let child = Expr::binary(
                op,
                Expr::collate(like.column.clone(), like.collation),
                Expr::text(value),
            );
            let new_idx = self.insert_virtual(wc, child, from_join, right_join_table);
            self.analyze_term(wc, new_idx);
            if like.is_complete {
                self.cs.mark_term_as_child(wc, new_idx, idx);
            }
        }
    }

    /// `column MATCH pattern` (spelled as a two-argument match() call)
    /// yields a virtual MATCH term for virtual-table planning
    fn analyze_match(&mut self, wc: usize, idx: usize, expr: &Expr) {
        let (pattern, column_expr) = match expr {
            Expr::Function { name, args } if name.eq_ignore_ascii_case("match") && args.len() == 2 => {
                (&args[0], &args[1])
            }
            _ => return,
        };
        let (cursor, column) = match column_expr.column_ref() {
            Some(c) => c,
            None => return,
        };
        let prereq_expr = expr_usage(self.ms, pattern);
        let prereq_column = expr_usage(self.ms, column_expr);
        if prereq_expr & prereq_column != 0 {
            return;
        }
        let prereq_all = self.cs.clause(wc).terms[idx].prereq_all;
        let mut term = WhereTerm::new(expr.clone(), TermFlags::VIRTUAL | TermFlags::DYNAMIC);
        term.prereq_right = prereq_expr;
        term.prereq_all = prereq_all;
        term.left_cursor = cursor;
        term.left_column = column;
        term.e_operator = Operator::MATCH;
        let new_idx = self.cs.push_term(wc, term);
        self.cs.mark_term_as_child(wc, new_idx, idx);
        self.cs.clause_mut(wc).terms[idx].flags |= TermFlags::COPIED;
    }

    /// Insert a synthesized term, carrying the parent's join markings
    fn insert_virtual(
        &mut self,
        wc: usize,
        expr: Expr,
        from_join: bool,
        right_join_table: i32,
    ) -> usize {
        let mut term = WhereTerm::new(expr, TermFlags::VIRTUAL | TermFlags::DYNAMIC);
        term.from_join = from_join;
        term.right_join_table = right_join_table;
        self.cs.push_term(wc, term)
    }
}

struct LikeBounds {
    column: Expr,
    prefix: String,
    upper: String,
    collation: &'static str,
    is_complete: bool,
}
