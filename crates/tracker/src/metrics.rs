// crates/tracker/src/metrics.rs
//! Job tracking metrics.
//!
//! Recorded through the `metrics` facade; they are no-ops until the host
//! application installs a recorder (e.g. a Prometheus exporter).

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Describe all tracker metrics. Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!(
        "jobwatch_jobs_tracked_total",
        "Jobs registered with the tracker (one per job, not per subscriber)"
    );
    describe_counter!(
        "jobwatch_subscriptions_total",
        "Subscriptions created by track_job"
    );
    describe_counter!(
        "jobwatch_job_outcomes_total",
        "Terminal outcomes observed, by outcome"
    );
    describe_gauge!("jobwatch_channels_open", "Progress channels currently connected or connecting");
}

pub(crate) fn job_tracked() {
    counter!("jobwatch_jobs_tracked_total").increment(1);
}

pub(crate) fn subscription_created() {
    counter!("jobwatch_subscriptions_total").increment(1);
}

/// `outcome` is one of `completed`, `failed`, `connection_lost`.
pub(crate) fn job_outcome(outcome: &'static str) {
    counter!("jobwatch_job_outcomes_total", "outcome" => outcome).increment(1);
}

pub(crate) fn channel_opened() {
    gauge!("jobwatch_channels_open").increment(1.0);
}

pub(crate) fn channel_closed() {
    gauge!("jobwatch_channels_open").decrement(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        job_tracked();
        subscription_created();
        job_outcome("completed");
        channel_opened();
        channel_closed();
    }
}
