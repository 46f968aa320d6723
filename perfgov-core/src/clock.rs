//! Deadline arithmetic on [`tokio::time::Instant`]

use std::time::Duration;

use tokio::time::Instant;

/// Roughly 30 years; stands in for "never" when a deadline overflows
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + span`, clamped to a far-future instant instead of panicking
/// when `span` is too large to represent (e.g. `Duration::MAX`)
pub(crate) fn deadline_after(start: Instant, span: Duration) -> Instant {
    start
        .checked_add(span)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}
