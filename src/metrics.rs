use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowStats;

/// Runtime counters published with every heartbeat
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metrics {
    pub uptime_sec: u64,
    pub intents_total: u64,
    pub intents_success: u64,
    pub intents_failed: u64,
    /// Intents dropped because the caller is not on the allow-list
    pub intents_rejected: u64,
    /// Complete live retrievals started
    pub retrievals: u64,
    pub device_failures: u64,
    /// Reference entries replaced by update
    pub entries_replaced: u64,
    pub memory_bytes: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update memory usage from system
    pub fn update_memory(&mut self) {
        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                for line in status.lines() {
                    if line.starts_with("VmRSS:") {
                        if let Some(kb) = line.split_whitespace().nth(1) {
                            if let Ok(kb) = kb.parse::<u64>() {
                                self.memory_bytes = kb * 1024;
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.intents_total += 1;
        self.intents_success += 1;
    }

    pub fn record_failure(&mut self) {
        self.intents_total += 1;
        self.intents_failed += 1;
    }

    pub fn record_rejected(&mut self) {
        self.intents_rejected += 1;
    }

    /// Copy the workflow totals in before publishing.
    pub fn record_workflow(&mut self, stats: WorkflowStats) {
        self.retrievals = stats.retrievals;
        self.device_failures = stats.device_failures;
        self.entries_replaced = stats.entries_replaced;
    }

    /// Get success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.intents_total == 0 {
            return 100.0;
        }
        (self.intents_success as f64 / self.intents_total as f64) * 100.0
    }

    /// Heartbeat payload: every counter plus the derived success rate.
    pub fn status(&self) -> serde_json::Result<serde_json::Value> {
        let mut status = serde_json::to_value(self)?;
        status["success_rate"] = serde_json::json!(self.success_rate());
        Ok(status)
    }

    /// Increment uptime (typically called every heartbeat interval)
    pub fn increment_uptime(&mut self, seconds: u64) {
        self.uptime_sec += seconds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.uptime_sec, 0);
        assert_eq!(metrics.intents_total, 0);
        assert_eq!(metrics.success_rate(), 100.0);
    }

    #[test]
    fn test_record_outcomes() {
        let mut metrics = Metrics::new();
        metrics.record_success();
        metrics.record_success();
        metrics.record_success();
        metrics.record_failure();
        metrics.record_rejected();

        assert_eq!(metrics.intents_total, 4);
        assert_eq!(metrics.intents_failed, 1);
        assert_eq!(metrics.intents_rejected, 1);
        assert_eq!(metrics.success_rate(), 75.0);
    }

    #[test]
    fn test_uptime_accumulates() {
        let mut metrics = Metrics::new();
        metrics.increment_uptime(60);
        metrics.increment_uptime(60);
        assert_eq!(metrics.uptime_sec, 120);
    }

    #[test]
    fn test_serializes_for_heartbeat() {
        let mut metrics = Metrics::new();
        metrics.record_success();
        metrics.record_workflow(WorkflowStats {
            retrievals: 3,
            device_failures: 1,
            entries_replaced: 7,
        });
        metrics.record_failure();
        let json = metrics.status().unwrap();
        assert_eq!(json["intents_success"], 1);
        assert_eq!(json["success_rate"], 50.0);
        assert_eq!(json["retrievals"], 3);
        assert_eq!(json["entries_replaced"], 7);
        assert!(json.get("memory_bytes").is_some());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_update_memory_linux() {
        let mut metrics = Metrics::new();
        metrics.update_memory();
        assert!(metrics.memory_bytes > 0);
    }
}
