// Overflow-free deadline arithmetic

use std::time::Duration;

use tokio::time::Instant;

/// Stand-in for "never", roughly 30 years ahead
pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + duration`, saturating at [`FAR_FUTURE`] instead of overflowing
pub(crate) fn instant_after(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration.min(FAR_FUTURE)).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huge_durations_saturate() {
        let before = Instant::now();
        let at = instant_after(Duration::MAX);
        assert!(at >= before + FAR_FUTURE);
        assert!(at <= Instant::now() + FAR_FUTURE);
    }

    #[test]
    fn test_small_durations_exact() {
        let before = Instant::now();
        let at = instant_after(Duration::from_millis(50));
        assert!(at >= before + Duration::from_millis(50));
        assert!(at < before + Duration::from_secs(1));
    }
}
