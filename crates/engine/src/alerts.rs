//! Operator notifications
//!
//! The producer, the nightly scheduler and the service report noteworthy
//! events through an [`AlertSink`]. The default sink writes them to the log;
//! hosts that deliver alerts elsewhere provide their own implementation.

use tracing::{error, info, warn};

/// Event worth telling an operator about.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// The backup service came up
    ServiceStarted {
        /// Database being backed up
        database: String,
        /// Human-readable capture interval
        interval: String,
    },
    /// The backup service shut down
    ServiceStopped {
        /// Database being backed up
        database: String,
    },
    /// A producer tick failed
    CaptureFailed {
        /// Database being backed up
        database: String,
        /// Failure description
        reason: String,
        /// Whether the failure may have desynchronized pointer and artifact
        critical: bool,
    },
    /// The nightly rotation scheduler started
    RotationScheduled {
        /// Configured `HH:MM`
        split_time: String,
        /// Part size limit in GiB
        max_file_size_gb: f64,
    },
    /// A rotation finished successfully
    RotationCompleted {
        /// Period folder label
        period: String,
        /// Number of parts written
        parts: usize,
        /// Total size in bytes
        total_bytes: u64,
    },
    /// A rotation failed; the artifact and state were kept
    RotationFailed {
        /// Period folder label, if it was determined
        period: Option<String>,
        /// Failure description
        reason: String,
    },
}

/// Receiver of [`Alert`]s.
///
/// `notify` is called from the producer and rotation threads and must not
/// block for long.
pub trait AlertSink: Send + Sync {
    /// Deliver one alert.
    fn notify(&self, alert: &Alert);
}

/// Sink that writes alerts to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlerts;

impl AlertSink for TracingAlerts {
    fn notify(&self, alert: &Alert) {
        match alert {
            Alert::ServiceStarted { database, interval } => {
                info!(target: "dumpcycle::service", database = %database, interval = %interval, "Backup service started");
            }
            Alert::ServiceStopped { database } => {
                info!(target: "dumpcycle::service", database = %database, "Backup service stopped");
            }
            Alert::CaptureFailed {
                database,
                reason,
                critical,
            } => {
                if *critical {
                    error!(target: "dumpcycle::producer", database = %database, critical = true, "Backup failed: {}", reason);
                } else {
                    warn!(target: "dumpcycle::producer", database = %database, "Backup failed: {}", reason);
                }
            }
            Alert::RotationScheduled {
                split_time,
                max_file_size_gb,
            } => {
                info!(target: "dumpcycle::rotation", split_time = %split_time, max_file_size_gb, "Nightly rotation scheduled");
            }
            Alert::RotationCompleted {
                period,
                parts,
                total_bytes,
            } => {
                info!(target: "dumpcycle::rotation", period = %period, parts, total_bytes, "Rotation completed");
            }
            Alert::RotationFailed { period, reason } => {
                error!(
                    target: "dumpcycle::rotation",
                    period = period.as_deref().unwrap_or("-"),
                    "Rotation failed: {}",
                    reason
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alerts_compare_by_value() {
        let scheduled = Alert::RotationScheduled {
            split_time: "00:00".to_string(),
            max_file_size_gb: 0.5,
        };
        assert_eq!(scheduled.clone(), scheduled);
        assert_ne!(
            scheduled,
            Alert::RotationScheduled {
                split_time: "00:00".to_string(),
                max_file_size_gb: 1.0,
            }
        );
    }

    #[test]
    fn tracing_sink_accepts_every_alert() {
        let sink = TracingAlerts;
        sink.notify(&Alert::CaptureFailed {
            database: "shop".to_string(),
            reason: "disk full".to_string(),
            critical: true,
        });
        sink.notify(&Alert::RotationFailed {
            period: None,
            reason: "verify: size mismatch".to_string(),
        });
    }
}
