use std::collections::HashMap;

use crate::model::*;

// ── Availability decision ────────────────────────────────────────

/// Why a request cannot be granted. Rendered as the user-facing reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Whole-space request against any overlapping reservation.
    SlotOccupied,
    /// Equipment request against an overlapping whole-space reservation.
    BookedForEvent,
    /// `remaining` is `capacity - committed` and goes negative when the
    /// ceiling was lowered below what is already committed.
    InsufficientEquipment {
        equipment: String,
        requested: u32,
        remaining: i64,
    },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::SlotOccupied => {
                write!(f, "space or its equipment are already occupied for this time slot")
            }
            Rejection::BookedForEvent => write!(f, "space is fully booked for an event/class"),
            Rejection::InsufficientEquipment {
                equipment,
                requested,
                remaining,
            } => write!(
                f,
                "not enough '{equipment}' (requested {requested}, {} left)",
                (*remaining).max(0)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Granted,
    Rejected(Rejection),
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::Granted)
    }
}

/// Decide a candidate against the reservations that overlap it.
///
/// `overlapping` must already exclude cancelled reservations and anything
/// outside the candidate's space, date and span. `capacity` is the ceiling
/// for an equipment kind in this space (0 when the space does not stock it).
pub fn decide<'a, I, F>(candidate_items: &[LineItem], overlapping: I, capacity: F) -> Decision
where
    I: IntoIterator<Item = &'a Reservation>,
    F: Fn(&str) -> u32,
{
    let overlapping: Vec<&Reservation> = overlapping.into_iter().collect();

    if candidate_items.is_empty() {
        return if overlapping.is_empty() {
            Decision::Granted
        } else {
            Decision::Rejected(Rejection::SlotOccupied)
        };
    }

    if overlapping.iter().any(|r| r.is_whole_space()) {
        return Decision::Rejected(Rejection::BookedForEvent);
    }

    for item in candidate_items {
        let committed: u64 = overlapping
            .iter()
            .map(|r| u64::from(r.committed(&item.equipment_id)))
            .sum();
        let ceiling = u64::from(capacity(&item.equipment_id));
        if committed + u64::from(item.quantity) > ceiling {
            return Decision::Rejected(Rejection::InsufficientEquipment {
                equipment: item.equipment_name.clone(),
                requested: item.quantity,
                remaining: ceiling as i64 - committed as i64,
            });
        }
    }

    Decision::Granted
}

/// Fold repeated equipment ids into one line item each, keeping first-seen order.
pub fn merge_line_items(items: Vec<LineItem>) -> Vec<LineItem> {
    let mut merged: Vec<LineItem> = Vec::with_capacity(items.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for item in items {
        match index.get(&item.equipment_id) {
            Some(&pos) => merged[pos].quantity = merged[pos].quantity.saturating_add(item.quantity),
            None => {
                index.insert(item.equipment_id.clone(), merged.len());
                merged.push(item);
            }
        }
    }
    merged
}

// ── Free windows ─────────────────────────────────────────────────

/// Whole-space free windows inside `window`, given the busy spans of the day.
pub fn free_slots(window: Span, busy: &[Span]) -> Vec<Span> {
    let mut clamped: Vec<Span> = busy
        .iter()
        .filter(|s| !s.is_empty() && s.overlaps(&window))
        .map(|s| Span::new(s.start.max(window.start), s.end.min(window.end)))
        .collect();
    clamped.sort_by_key(|s| s.start);
    let merged = merge_overlapping(&clamped);
    subtract_intervals(&[window], &merged)
}

/// Merge sorted overlapping or adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}
