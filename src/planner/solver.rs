//! N-best path search
//!
//! Dynamic programming over join prefixes: starting from the empty path,
//! each round extends every surviving path by every loop whose
//! prerequisites are met, keeping only the best few paths per round.
//! Tracking a handful of paths instead of one avoids the classic greedy
//! trap where the cheapest first table forces an expensive join order.
//!
//! ORDER BY satisfaction is folded into the cost: a path that does not
//! deliver the requested order is charged one sort of the estimated
//! result. The caller runs the solver twice when an ORDER BY is present;
//! the first pass (no sort charge) measures the expected row count that
//! the second pass uses to price the sort.

use crate::error::{Error, ErrorCode, Result};
use crate::planner::cost::{est_log, log_est_add, LogEst};
use crate::planner::loops::WhereLoop;
use crate::planner::mask::Bitmask;
use crate::planner::order::{path_satisfies_order_by, OrderCheck, OrderCtx, Satisfied};
use crate::planner::{OrderByTerm, TraceFlags};

/// One candidate join prefix
#[derive(Debug, Clone, Default)]
pub(crate) struct WherePath {
    /// Loops included so far
    pub mask_loop: Bitmask,
    /// Loops that must run in reverse for the ORDER BY to hold
    pub rev_loop: Bitmask,
    /// Estimated rows produced by the prefix
    pub n_row: LogEst,
    /// Accumulated cost
    pub r_cost: LogEst,
    /// Path delivers the requested order (meaningful when valid)
    pub is_ordered: bool,
    /// `is_ordered` has been decided
    pub is_ordered_valid: bool,
    /// Loop list indices, outermost first
    pub loops: Vec<usize>,
}

/// Number of paths tracked per round: single-table queries need one,
/// two-way joins five, everything else ten
fn max_choice(n_loop: usize) -> usize {
    match n_loop {
        0 | 1 => 1,
        2 => 5,
        _ => 10,
    }
}

/// Search for the cheapest full path. `n_row_est` non-zero enables
/// ORDER BY analysis and prices the fallback sort at
/// `n_row_est + est_log(n_row_est)`; `n_query_loop` is the caller's
/// estimate of how many times the whole scan will run.
pub(crate) fn solve(
    ctx: &OrderCtx<'_>,
    loops: &[WhereLoop],
    order_by: &[OrderByTerm],
    order_kind: OrderCheck,
    n_row_est: LogEst,
    n_query_loop: LogEst,
) -> Result<WherePath> {
    let n_loop = ctx.src.len();
    let mx_choice = max_choice(n_loop);
    let n_order_by = if order_by.is_empty() || n_row_est == 0 {
        0
    } else {
        order_by.len()
    };

    let mut a_from: Vec<WherePath> = vec![WherePath {
        n_row: n_query_loop.min(46),
        ..WherePath::default()
    }];

    for _round in 0..n_loop {
        let mut a_to: Vec<WherePath> = Vec::with_capacity(mx_choice);
        let mut mx_cost: LogEst = 0;
        let mut mx_i: usize = 0;

        for from in &a_from {
            for (l_idx, wloop) in loops.iter().enumerate() {
                if wloop.prereq & !from.mask_loop != 0 {
                    continue;
                }
                if wloop.mask_self & from.mask_loop != 0 {
                    continue;
                }

                let mut r_cost =
                    log_est_add(wloop.r_setup, wloop.r_run + from.n_row);
                r_cost = log_est_add(r_cost, from.r_cost);
                let n_out = from.n_row + wloop.n_out;
                let mask_new = from.mask_loop | wloop.mask_self;

                let mut rev_mask = from.rev_loop;
                let mut is_ordered = from.is_ordered;
                let mut is_ordered_valid = from.is_ordered_valid;
                if n_order_by > 0 && !is_ordered_valid {
                    let prefix: Vec<&WhereLoop> =
                        from.loops.iter().map(|&i| &loops[i]).collect();
                    let mut rm: Bitmask = 0;
                    match path_satisfies_order_by(
                        ctx, order_by, order_kind, &prefix, wloop, &mut rm,
                    ) {
                        Satisfied::Yes => {
                            is_ordered = true;
                            is_ordered_valid = true;
                            rev_mask = rm;
                        }
                        Satisfied::No => {
                            is_ordered = false;
                            is_ordered_valid = true;
                            // One sort of the whole result
                            r_cost = log_est_add(
                                r_cost,
                                n_row_est + est_log(n_row_est),
                            );
                        }
                        Satisfied::Unknown => {}
                    }
                }

                // Is there already an equivalent path?
                let existing = a_to.iter().position(|to| {
                    to.mask_loop == mask_new
                        && to.is_ordered_valid == is_ordered_valid
                        && ((to.r_cost <= r_cost && to.n_row <= n_out)
                            || (to.r_cost >= r_cost && to.n_row >= n_out))
                });

                let build = |from: &WherePath| -> WherePath {
                    let mut loops_new = from.loops.clone();
                    loops_new.push(l_idx);
                    WherePath {
                        mask_loop: mask_new,
                        rev_loop: rev_mask,
                        n_row: n_out,
                        r_cost,
                        is_ordered,
                        is_ordered_valid,
                        loops: loops_new,
                    }
                };

                match existing {
                    None => {
                        if a_to.len() >= mx_choice && r_cost >= mx_cost {
                            // Not better than the worst retained path
                            continue;
                        }
                        if a_to.len() < mx_choice {
                            a_to.push(build(from));
                        } else {
                            a_to[mx_i] = build(from);
                        }
                    }
                    Some(jj) => {
                        if a_to[jj].r_cost <= r_cost && a_to[jj].n_row <= n_out {
                            // The retained equivalent is at least as good
                            continue;
                        }
                        a_to[jj] = build(from);
                    }
                }
                if a_to.len() >= mx_choice {
                    mx_i = 0;
                    mx_cost = a_to[0].r_cost;
                    for (jj, to) in a_to.iter().enumerate().skip(1) {
                        if to.r_cost > mx_cost {
                            mx_cost = to.r_cost;
                            mx_i = jj;
                        }
                    }
                }
            }
        }

        ctx.cfg.trace(TraceFlags::SOLVER, || {
            let mut s = format!("solver round: {} path(s)", a_to.len());
            for p in &a_to {
                s.push_str(&format!(
                    " [mask={:#x} cost={} rows={} ord={}]",
                    p.mask_loop,
                    p.r_cost,
                    p.n_row,
                    if !p.is_ordered_valid {
                        "?"
                    } else if p.is_ordered {
                        "y"
                    } else {
                        "n"
                    }
                ));
            }
            s
        });

        a_from = a_to;
        if a_from.is_empty() {
            return Err(Error::with_message(ErrorCode::Error, "no query solution"));
        }
    }

    // Lowest cost wins; the first found wins ties, which keeps the
    // planner deterministic
    let mut best = 0;
    for (i, p) in a_from.iter().enumerate().skip(1) {
        let cur = &a_from[best];
        if p.r_cost < cur.r_cost
            || (p.r_cost == cur.r_cost && p.n_row < cur.n_row)
        {
            best = i;
        }
    }
    Ok(a_from.swap_remove(best))
}
