//! Per-system optimization performance tracking.
use crate::utils::now;

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::RwLock;

/// Number of records kept by the monitor
pub const MAX_RECORDS: usize = 1000;
/// Number of most recent records of a system used by the report
const REPORT_WINDOW: usize = 10;
/// Number of records listed in a report
const RECENT_LISTED: usize = 5;
/// Average convergence time (s) above which surrogates are suggested
const SLOW_CONVERGENCE: f64 = 60.;

/// Metrics of a finished run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub success: bool,
    /// Wall clock duration in seconds
    pub convergence_time: f64,
    /// Decrease of the scalarized cost from the initial point
    pub objective_improvement: f64,
    pub iterations: u64,
}

/// A tracked run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Seconds since UNIX epoch (UTC)
    pub timestamp: f64,
    pub optimization_id: String,
    pub metrics: RunMetrics,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Health::Excellent => "excellent",
            Health::Good => "good",
            Health::Fair => "fair",
            Health::Poor => "poor",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_optimizations: usize,
    pub average_convergence_time: f64,
    pub average_improvement: f64,
    pub performance_trend: Trend,
    pub system_health: Health,
}

/// Report status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ok,
    NoData,
}

/// Performance indicators of a system over its most recent runs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_summary: Option<PerformanceSummary>,
    #[serde(default)]
    pub recent_metrics: Vec<PerformanceRecord>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Keeps the last [MAX_RECORDS] run records and derives health and trend indicators
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    history: RwLock<VecDeque<PerformanceRecord>>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the metrics of a run under `optimization_id`
    pub fn track_optimization_performance(&self, optimization_id: &str, metrics: RunMetrics) {
        let record = PerformanceRecord {
            timestamp: now(),
            optimization_id: optimization_id.to_string(),
            metrics,
        };
        let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
        history.push_back(record);
        while history.len() > MAX_RECORDS {
            history.pop_front();
        }
        info!("Tracked performance for optimization {optimization_id}");
    }

    /// Number of records kept
    pub fn len(&self) -> usize {
        self.history.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Report over the last records tracked under `system_id`
    pub fn get_performance_metrics(&self, system_id: &str) -> PerformanceReport {
        let recent: Vec<PerformanceRecord> = {
            let history = self.history.read().unwrap_or_else(|e| e.into_inner());
            let mut matching: Vec<_> = history
                .iter()
                .rev()
                .filter(|r| r.optimization_id == system_id)
                .take(REPORT_WINDOW)
                .cloned()
                .collect();
            matching.reverse();
            matching
        };
        if recent.is_empty() {
            return PerformanceReport {
                status: ReportStatus::NoData,
                performance_summary: None,
                recent_metrics: vec![],
                recommendations: vec![],
            };
        }

        let times: Vec<f64> = recent.iter().map(|r| r.metrics.convergence_time).collect();
        let improvements: Vec<f64> = recent
            .iter()
            .map(|r| r.metrics.objective_improvement)
            .collect();
        let success_rate =
            recent.iter().filter(|r| r.metrics.success).count() as f64 / recent.len() as f64;
        let average_convergence_time = mean(&times);

        let mut recommendations = vec![];
        if average_convergence_time > SLOW_CONVERGENCE {
            recommendations
                .push("Consider using surrogate models to reduce computation time".to_string());
        }
        if success_rate < 0.5 {
            recommendations.push(
                "Low success rate - consider a global method (genetic_algorithm or bayesian_optimization)"
                    .to_string(),
            );
        }
        if recommendations.is_empty() {
            recommendations.push("System performing well - continue current approach".to_string());
        }

        PerformanceReport {
            status: ReportStatus::Ok,
            performance_summary: Some(PerformanceSummary {
                total_optimizations: recent.len(),
                average_convergence_time,
                average_improvement: mean(&improvements),
                performance_trend: trend(&improvements),
                system_health: health(success_rate),
            }),
            recent_metrics: recent[recent.len().saturating_sub(RECENT_LISTED)..].to_vec(),
            recommendations,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Last 3 improvements against the earlier ones, stable under 6 samples
fn trend(improvements: &[f64]) -> Trend {
    if improvements.len() < 6 {
        return Trend::Stable;
    }
    let split = improvements.len() - 3;
    let recent = mean(&improvements[split..]);
    let previous = mean(&improvements[..split]);
    if previous == 0. {
        return if recent == 0. {
            Trend::Stable
        } else {
            Trend::Improving
        };
    }
    if recent > previous * 1.1 {
        Trend::Improving
    } else if recent < previous * 0.9 {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

fn health(success_rate: f64) -> Health {
    if success_rate >= 0.9 {
        Health::Excellent
    } else if success_rate >= 0.7 {
        Health::Good
    } else if success_rate >= 0.5 {
        Health::Fair
    } else {
        Health::Poor
    }
}
