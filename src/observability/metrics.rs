//! Thread-safe metrics collection system
//!
//! Provides atomic counters and mutex-protected collections for tracking
//! pipeline runs, step executions, PMode resolution, security processing,
//! reception awareness and transport.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Pipeline runs (atomic for high frequency)
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    runs_cancelled: AtomicU64,
    active_runs: AtomicU64,
    max_active_runs: AtomicU64,

    // PMode resolution
    resolutions_succeeded: AtomicU64,
    resolutions_failed: AtomicU64,

    // Security
    messages_signed: AtomicU64,
    signatures_verified: AtomicU64,
    signature_failures: AtomicU64,
    messages_encrypted: AtomicU64,
    messages_decrypted: AtomicU64,
    decryption_failures: AtomicU64,

    // Reception awareness
    records_tracked: AtomicU64,
    resends: AtomicU64,
    completions: AtomicU64,
    dead_letters: AtomicU64,
    commit_conflicts: AtomicU64,
    polls: AtomicU64,

    // Transport
    messages_sent: AtomicU64,
    send_failures: AtomicU64,

    // Run durations (mutex protected for complex operations)
    run_times: Mutex<Vec<u64>>, // in milliseconds

    // Per-step statistics keyed by step name
    step_stats: Mutex<HashMap<String, StepExecutionStats>>,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_cancelled: AtomicU64::new(0),
            active_runs: AtomicU64::new(0),
            max_active_runs: AtomicU64::new(0),
            resolutions_succeeded: AtomicU64::new(0),
            resolutions_failed: AtomicU64::new(0),
            messages_signed: AtomicU64::new(0),
            signatures_verified: AtomicU64::new(0),
            signature_failures: AtomicU64::new(0),
            messages_encrypted: AtomicU64::new(0),
            messages_decrypted: AtomicU64::new(0),
            decryption_failures: AtomicU64::new(0),
            records_tracked: AtomicU64::new(0),
            resends: AtomicU64::new(0),
            completions: AtomicU64::new(0),
            dead_letters: AtomicU64::new(0),
            commit_conflicts: AtomicU64::new(0),
            polls: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            run_times: Mutex::new(Vec::new()),
            step_stats: Mutex::new(HashMap::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Pipeline metrics
    pub fn pipeline_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        let active = self.active_runs.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_active_runs.fetch_max(active, Ordering::Relaxed);
    }

    pub fn pipeline_succeeded(&self, duration: Duration) {
        self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
        self.pipeline_finished(duration);
    }

    pub fn pipeline_failed(&self, duration: Duration) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        self.pipeline_finished(duration);
    }

    pub fn pipeline_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn pipeline_finished(&self, duration: Duration) {
        self.active_runs.fetch_sub(1, Ordering::Relaxed);
        if let Ok(mut times) = self.run_times.lock() {
            times.push(duration.as_millis() as u64);

            // Limit to last 1000 measurements to prevent unbounded growth
            if times.len() > 1000 {
                times.remove(0);
            }
        }
    }

    pub fn step_executed(&self, step: &str, duration: Duration, success: bool) {
        if let Ok(mut stats) = self.step_stats.lock() {
            let entry = stats
                .entry(step.to_string())
                .or_insert_with(|| StepExecutionStats {
                    name: step.to_string(),
                    executions: 0,
                    failures: 0,
                    execution_times: Vec::new(),
                });
            entry.executions += 1;
            entry.execution_times.push(duration.as_micros() as u64);
            if entry.execution_times.len() > 1000 {
                entry.execution_times.remove(0);
            }
            if !success {
                entry.failures += 1;
            }
        }
    }

    // PMode metrics
    pub fn pmode_resolved(&self) {
        self.resolutions_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pmode_resolution_failed(&self) {
        self.resolutions_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Security metrics
    pub fn message_signed(&self) {
        self.messages_signed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn signature_verified(&self) {
        self.signatures_verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn signature_failed(&self) {
        self.signature_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_encrypted(&self) {
        self.messages_encrypted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_decrypted(&self) {
        self.messages_decrypted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decryption_failed(&self) {
        self.decryption_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Reception awareness metrics
    pub fn record_tracked(&self) {
        self.records_tracked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_resent(&self) {
        self.resends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_letters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn commit_conflict(&self) {
        self.commit_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn poll_completed(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    // Transport metrics
    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.runs_started,
            &self.runs_succeeded,
            &self.runs_failed,
            &self.runs_cancelled,
            &self.active_runs,
            &self.max_active_runs,
            &self.resolutions_succeeded,
            &self.resolutions_failed,
            &self.messages_signed,
            &self.signatures_verified,
            &self.signature_failures,
            &self.messages_encrypted,
            &self.messages_decrypted,
            &self.decryption_failures,
            &self.records_tracked,
            &self.resends,
            &self.completions,
            &self.dead_letters,
            &self.commit_conflicts,
            &self.polls,
            &self.messages_sent,
            &self.send_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut times) = self.run_times.lock() {
            times.clear();
        }
        if let Ok(mut stats) = self.step_stats.lock() {
            stats.clear();
        }
    }

    /// Calculate run time statistics (pure function)
    fn calculate_run_time_statistics(&self) -> (f64, f64, f64, f64) {
        if let Ok(times) = self.run_times.lock() {
            if times.is_empty() {
                (0.0, 0.0, 0.0, 0.0)
            } else {
                let mut sorted_times = times.clone();
                sorted_times.sort_unstable();

                let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
                let p50 = percentile(&sorted_times, 50.0);
                let p95 = percentile(&sorted_times, 95.0);
                let p99 = percentile(&sorted_times, 99.0);

                (avg, p50, p95, p99)
            }
        } else {
            (0.0, 0.0, 0.0, 0.0)
        }
    }

    fn build_step_statistics(&self) -> HashMap<String, StepStatsSnapshot> {
        self.step_stats
            .lock()
            .map(|stats| {
                stats
                    .iter()
                    .map(|(name, stats)| {
                        let avg_execution_time_us = if stats.execution_times.is_empty() {
                            0.0
                        } else {
                            stats.execution_times.iter().sum::<u64>() as f64
                                / stats.execution_times.len() as f64
                        };
                        (
                            name.clone(),
                            StepStatsSnapshot {
                                name: stats.name.clone(),
                                executions: stats.executions,
                                failures: stats.failures,
                                avg_execution_time_us,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_run_time_ms, p50, p95, p99) = self.calculate_run_time_statistics();
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        MetricsSnapshot {
            pipelines: PipelineMetrics {
                runs_started: load(&self.runs_started),
                runs_succeeded: load(&self.runs_succeeded),
                runs_failed: load(&self.runs_failed),
                runs_cancelled: load(&self.runs_cancelled),
                active_runs: load(&self.active_runs),
                max_active_runs: load(&self.max_active_runs),
                avg_run_time_ms,
                run_time_p50_ms: p50,
                run_time_p95_ms: p95,
                run_time_p99_ms: p99,
                steps: self.build_step_statistics(),
            },
            pmodes: PModeMetrics {
                resolutions_succeeded: load(&self.resolutions_succeeded),
                resolutions_failed: load(&self.resolutions_failed),
            },
            security: SecurityMetrics {
                messages_signed: load(&self.messages_signed),
                signatures_verified: load(&self.signatures_verified),
                signature_failures: load(&self.signature_failures),
                messages_encrypted: load(&self.messages_encrypted),
                messages_decrypted: load(&self.messages_decrypted),
                decryption_failures: load(&self.decryption_failures),
            },
            reception_awareness: ReceptionAwarenessMetrics {
                records_tracked: load(&self.records_tracked),
                resends: load(&self.resends),
                completions: load(&self.completions),
                dead_letters: load(&self.dead_letters),
                commit_conflicts: load(&self.commit_conflicts),
                polls: load(&self.polls),
            },
            transport: TransportMetrics {
                messages_sent: load(&self.messages_sent),
                send_failures: load(&self.send_failures),
            },
            uptime_seconds: now.saturating_sub(load(&self.uptime_start)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Internal step statistics (with timing data)
#[derive(Debug)]
struct StepExecutionStats {
    name: String,
    executions: u64,
    failures: u64,
    execution_times: Vec<u64>, // microseconds
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub pipelines: PipelineMetrics,
    pub pmodes: PModeMetrics,
    pub security: SecurityMetrics,
    pub reception_awareness: ReceptionAwarenessMetrics,
    pub transport: TransportMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct PipelineMetrics {
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub runs_cancelled: u64,
    pub active_runs: u64,
    pub max_active_runs: u64,
    pub avg_run_time_ms: f64,
    pub run_time_p50_ms: f64,
    pub run_time_p95_ms: f64,
    pub run_time_p99_ms: f64,
    pub steps: HashMap<String, StepStatsSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct StepStatsSnapshot {
    pub name: String,
    pub executions: u64,
    pub failures: u64,
    pub avg_execution_time_us: f64,
}

#[derive(Debug, Serialize)]
pub struct PModeMetrics {
    pub resolutions_succeeded: u64,
    pub resolutions_failed: u64,
}

#[derive(Debug, Serialize)]
pub struct SecurityMetrics {
    pub messages_signed: u64,
    pub signatures_verified: u64,
    pub signature_failures: u64,
    pub messages_encrypted: u64,
    pub messages_decrypted: u64,
    pub decryption_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct ReceptionAwarenessMetrics {
    pub records_tracked: u64,
    pub resends: u64,
    pub completions: u64,
    pub dead_letters: u64,
    pub commit_conflicts: u64,
    pub polls: u64,
}

#[derive(Debug, Serialize)]
pub struct TransportMetrics {
    pub messages_sent: u64,
    pub send_failures: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_index = index.floor() as usize;
        let upper_index = index.ceil() as usize;
        let lower_value = sorted_data[lower_index] as f64;
        let upper_value = sorted_data[upper_index] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}
