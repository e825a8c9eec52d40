use chrono::NaiveDate;

use crate::model::*;

use super::state::StockState;

// ── Availability Algorithm ────────────────────────────────────────

/// Units free over the whole range: ledger total minus every overlapping hold, floored at 0.
pub fn available_quantity(stock: &StockState, range: &DateRange) -> u32 {
    let held = stock.index.overlap_count(range, stock.turnaround_days);
    stock.ledger.total().saturating_sub(held)
}

pub fn is_available(stock: &StockState, range: &DateRange, quantity: u32) -> bool {
    available_quantity(stock, range) >= quantity
}

/// Units a maintenance window could take over the range. Turnaround spacing only applies
/// between bookings.
pub fn available_for_maintenance(stock: &StockState, range: &DateRange) -> u32 {
    let held = stock.index.overlap_count(range, 0);
    stock.ledger.total().saturating_sub(held)
}

/// Per-day free quantity across `window`, as runs of consecutive days with equal free count.
///
/// Unlike [`available_quantity`], which sums every hold touching the range, this counts only
/// holds active on each day, so it is the figure to show on a calendar.
pub fn free_calendar(stock: &StockState, window: &DateRange) -> Vec<FreeSpan> {
    let held = daily_held(stock, window);
    let total = stock.ledger.total();
    let mut result: Vec<FreeSpan> = Vec::new();
    let mut cursor = window.start;

    for (range, count) in held {
        if range.start > cursor
            && let Some(prev) = range.start.pred_opt()
        {
            push_run(&mut result, DateRange::new(cursor, prev), total);
        }
        push_run(&mut result, range, total.saturating_sub(count));
        cursor = match range.end.succ_opt() {
            Some(next) => next,
            None => return result,
        };
    }
    if cursor <= window.end {
        push_run(&mut result, DateRange::new(cursor, window.end), total);
    }
    result
}

fn push_run(runs: &mut Vec<FreeSpan>, range: DateRange, free: u32) {
    if let Some(last) = runs.last_mut()
        && last.free == free
        && last.range.end.succ_opt() == Some(range.start)
    {
        last.range.end = range.end;
        return;
    }
    runs.push(FreeSpan { range, free });
}

/// Sweep-line algorithm: held quantity per day, as sorted disjoint runs with non-zero count.
/// Booking holds are extended by the stock's turnaround after they end.
pub fn daily_held(stock: &StockState, window: &DateRange) -> Vec<(DateRange, u32)> {
    let turnaround = stock.turnaround_days;
    let search = window.widen(turnaround);

    // +q on the first held day, -q on the day after the last
    let mut events: Vec<(NaiveDate, i64)> = Vec::new();
    for interval in stock.index.overlapping(&search) {
        let mut range = interval.range;
        if interval.kind.is_booking() && turnaround > 0 {
            range = DateRange::new(range.start, range.widen(turnaround).end);
        }
        let start = range.start.max(window.start);
        let end = range.end.min(window.end);
        if start > end {
            continue;
        }
        let q = i64::from(interval.quantity_held);
        events.push((start, q));
        if let Some(after) = end.succ_opt() {
            events.push((after, -q));
        }
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result: Vec<(DateRange, u32)> = Vec::new();
    let mut count: i64 = 0;
    let mut run_start: Option<NaiveDate> = None;

    let mut i = 0;
    while i < events.len() {
        let day = events[i].0;
        let before = count;
        while i < events.len() && events[i].0 == day {
            count += events[i].1;
            i += 1;
        }
        if before == count {
            continue;
        }
        if let Some(start) = run_start.take()
            && let Some(prev) = day.pred_opt()
        {
            result.push((DateRange::new(start, prev), before as u32));
        }
        if count > 0 {
            run_start = Some(day);
        }
    }
    if let Some(start) = run_start {
        result.push((DateRange::new(start, window.end), count as u32));
    }

    result
}

/// Merge sorted overlapping or touching ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && (range.start <= last.end || last.end.succ_opt() == Some(range.start))
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

/// Ranges within `window` where at least `quantity` units are free on every day.
pub fn bookable_ranges(stock: &StockState, window: &DateRange, quantity: u32) -> Vec<DateRange> {
    let runs: Vec<DateRange> = free_calendar(stock, window)
        .into_iter()
        .filter(|run| run.free >= quantity)
        .map(|run| run.range)
        .collect();
    merge_overlapping(&runs)
}
