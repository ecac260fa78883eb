use crate::limits::*;
use crate::model::*;
use crate::time::parse_time_of_day;

use super::availability::{decide, Decision};
use super::{EngineError, SpaceState};

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Parse both ends and require a non-empty interval.
pub(crate) fn parse_span(start: &str, end: &str) -> Result<Span, EngineError> {
    let span = Span::new(parse_time_of_day(start)?, parse_time_of_day(end)?);
    if span.is_empty() {
        return Err(EngineError::Invalid(format!(
            "start time {start} must be before end time {end}"
        )));
    }
    Ok(span)
}

pub(crate) fn validate_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

pub(crate) fn validate_id(id: &str) -> Result<(), EngineError> {
    if id.is_empty() {
        return Err(EngineError::Invalid("id must not be empty".into()));
    }
    validate_text(id, MAX_ID_LEN, "id too long")
}

/// Active reservations on the candidate's date whose span overlaps it.
pub(crate) fn overlapping<'a>(
    ss: &'a SpaceState,
    candidate: &'a Reservation,
) -> impl Iterator<Item = &'a Reservation> + 'a {
    ss.on_date(candidate.date).filter(move |r| {
        r.id != candidate.id && r.is_active() && r.span.overlaps(&candidate.span)
    })
}

/// Run the availability rules for `candidate` against the space's current
/// reservations. Caller holds the space's write lock.
pub(crate) fn check_no_conflict(ss: &SpaceState, candidate: &Reservation) -> Result<(), EngineError> {
    match decide(&candidate.items, overlapping(ss, candidate), |eq| ss.capacity_of(eq)) {
        Decision::Granted => Ok(()),
        Decision::Rejected(rejection) => Err(EngineError::Unavailable(rejection)),
    }
}
