// Lock metrics
// Recorded through the `metrics` facade; installing an exporter is up to the application

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Register metric descriptions. Call once at application startup.
pub fn describe_metrics() {
    describe_counter!(
        "dislock_acquire_total",
        "Total number of lock acquisition attempts by outcome"
    );
    describe_histogram!(
        "dislock_acquire_wait_seconds",
        "Time spent in acquire until the lock was obtained or the attempt failed"
    );
    describe_counter!(
        "dislock_release_total",
        "Total number of lock releases by outcome"
    );
    describe_counter!(
        "dislock_refresh_total",
        "Total number of lease refresh attempts by outcome"
    );
}

pub(crate) fn record_acquire(outcome: &'static str, waited: Duration) {
    counter!("dislock_acquire_total", "outcome" => outcome).increment(1);
    histogram!("dislock_acquire_wait_seconds", "outcome" => outcome).record(waited.as_secs_f64());
}

pub(crate) fn record_release(outcome: &'static str) {
    counter!("dislock_release_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_refresh(outcome: &'static str) {
    counter!("dislock_refresh_total", "outcome" => outcome).increment(1);
}
