//! Progress curve for the upload -> submit -> poll -> fetch workflow.
//!
//! Progress is a percentage in `0..=100`. Each stage sets a fixed floor;
//! while polling, progress climbs linearly from [`PROGRESS_POLL_START`] to
//! [`PROGRESS_POLL_END`] in proportion to the polls used.

use std::time::Duration;

pub const PROGRESS_UPLOADING: u8 = 5;
pub const PROGRESS_SUBMITTED: u8 = 20;
pub const PROGRESS_POLL_START: u8 = 30;
pub const PROGRESS_POLL_END: u8 = 90;
pub const PROGRESS_FETCHING: u8 = 95;
pub const PROGRESS_COMPLETE: u8 = 100;

/// Typical end-to-end processing time, used only for the remaining-time hint.
pub const EXPECTED_PROCESSING_TIME: Duration = Duration::from_secs(150);

/// Progress after `polls_done` of `max_poll_count` polls.
pub fn poll_progress(polls_done: u32, max_poll_count: u32) -> u8 {
    if max_poll_count == 0 {
        return PROGRESS_POLL_END;
    }
    let span = u64::from(PROGRESS_POLL_END - PROGRESS_POLL_START);
    let done = u64::from(polls_done.min(max_poll_count));
    let step = span * done / u64::from(max_poll_count);
    PROGRESS_POLL_START + step as u8
}

/// Rough time left for a running job, floored at zero.
pub fn estimate_remaining(elapsed: Duration) -> Duration {
    EXPECTED_PROCESSING_TIME.saturating_sub(elapsed)
}
