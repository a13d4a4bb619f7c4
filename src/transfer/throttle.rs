//! Progress throttling shared by downloads and uploads.

use std::time::Duration;

/// When a new progress percentage is worth a UI edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// Minimum advance, in percentage points, that is always shown
    pub min_percent_delta: u8,
    /// Time after which any changed percentage is shown
    pub min_interval: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            min_percent_delta: 1,
            min_interval: Duration::from_millis(crate::config::PROGRESS_INTERVAL_MS),
        }
    }
}

impl ThrottlePolicy {
    /// Decide whether `percent` should be reported.
    ///
    /// `last_percent` is the last value shown for the current transfer and
    /// `since_last_update` the time since the user's last progress edit.
    /// An unchanged percentage is never reported again.
    ///
    /// # Examples
    ///
    /// ```
    /// use libgen_relay::transfer::ThrottlePolicy;
    /// use std::time::Duration;
    ///
    /// let policy = ThrottlePolicy { min_percent_delta: 5, min_interval: Duration::from_secs(2) };
    /// assert!(policy.should_report(0, None, Duration::ZERO));
    /// assert!(!policy.should_report(3, Some(0), Duration::from_millis(100)));
    /// assert!(policy.should_report(3, Some(0), Duration::from_secs(3)));
    /// assert!(policy.should_report(5, Some(0), Duration::ZERO));
    /// ```
    #[must_use]
    pub fn should_report(
        &self,
        percent: u8,
        last_percent: Option<u8>,
        since_last_update: Duration,
    ) -> bool {
        let Some(last) = last_percent else {
            return true;
        };
        if percent == last {
            return false;
        }
        percent.abs_diff(last) >= self.min_percent_delta
            || since_last_update >= self.min_interval
    }
}

/// Completion percentage `round(100 * done / total)`, clamped to `0..=100`.
///
/// Returns `None` when the total is unknown or zero.
///
/// # Examples
///
/// ```
/// use libgen_relay::transfer::percent_of;
/// assert_eq!(percent_of(1, Some(3)), Some(33));
/// assert_eq!(percent_of(2, Some(3)), Some(67));
/// assert_eq!(percent_of(5, None), None);
/// ```
#[must_use]
pub fn percent_of(done: u64, total: Option<u64>) -> Option<u8> {
    let total = total.filter(|t| *t > 0)?;
    let done = u128::from(done.min(total));
    let total = u128::from(total);
    // Integer round-half-up of 100 * done / total
    let percent = (done * 200 + total) / (total * 2);
    u8::try_from(percent.min(100)).ok()
}
