//! Optimization run records and their lifecycle.
use crate::errors::{OptimError, Result};
use crate::types::{OptimizationRequest, OptimizationResponse};
use crate::utils::now;

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Status of a run. `Pending -> Running -> {Succeeded, Failed, Cancelled}`,
/// a run is cancelled only once running, with the result it reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Whether a run in this status may move to `to`
    pub fn can_move_to(&self, to: RunStatus) -> bool {
        matches!(
            (self, to),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Succeeded)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Record of a run, immutable once terminal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRun {
    pub id: String,
    pub method: String,
    /// Request as submitted
    pub request: OptimizationRequest,
    pub status: RunStatus,
    /// Best cost trajectory of the search
    pub trajectory: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<OptimizationResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<f64>,
}

/// Registry of the runs of a solver, kept for history queries until expired
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<String, OptimizationRun>>,
    counter: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending run of `request` and returns its id
    pub fn create(&self, request: &OptimizationRequest) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("run-{n:06}");
        let run = OptimizationRun {
            id: id.clone(),
            method: request.method.clone(),
            request: request.clone(),
            status: RunStatus::Pending,
            trajectory: vec![],
            result: None,
            error: None,
            created_at: now(),
            started_at: None,
            finished_at: None,
        };
        self.write().insert(id.clone(), run);
        id
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, OptimizationRun>> {
        self.runs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, OptimizationRun>> {
        self.runs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn transition<F: FnOnce(&mut OptimizationRun)>(
        &self,
        id: &str,
        to: RunStatus,
        update: F,
    ) -> Result<()> {
        let mut runs = self.write();
        let run = runs
            .get_mut(id)
            .ok_or_else(|| OptimError::UnknownRunError(id.to_string()))?;
        if !run.status.can_move_to(to) {
            return Err(OptimError::InvalidStateTransition {
                from: run.status.to_string(),
                to: to.to_string(),
            });
        }
        debug!("Run {id}: {} -> {to}", run.status);
        run.status = to;
        if to.is_terminal() {
            run.finished_at = Some(now());
        }
        update(run);
        Ok(())
    }

    pub fn start(&self, id: &str) -> Result<()> {
        self.transition(id, RunStatus::Running, |run| run.started_at = Some(now()))
    }

    /// Stores the response of a run which produced a result, cancelled or not
    pub fn finish(&self, id: &str, response: &OptimizationResponse) -> Result<()> {
        self.transition(id, response.status, |run| {
            run.trajectory = response.convergence_metrics.best_cost_history.clone();
            run.result = Some(response.clone());
        })
    }

    pub fn fail(&self, id: &str, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.transition(id, RunStatus::Failed, |run| run.error = Some(message))
    }

    pub fn get(&self, id: &str) -> Result<OptimizationRun> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| OptimError::UnknownRunError(id.to_string()))
    }

    pub fn status(&self, id: &str) -> Result<RunStatus> {
        self.read()
            .get(id)
            .map(|run| run.status)
            .ok_or_else(|| OptimError::UnknownRunError(id.to_string()))
    }

    /// Runs ordered by creation
    pub fn list(&self) -> Vec<OptimizationRun> {
        let mut runs: Vec<_> = self.read().values().cloned().collect();
        runs.sort_by(|a, b| a.id.cmp(&b.id));
        runs
    }

    /// Removes terminal runs finished more than `max_age` seconds ago, returns their number
    pub fn expire(&self, max_age: f64) -> usize {
        let limit = now() - max_age;
        let mut runs = self.write();
        let before = runs.len();
        runs.retain(|_, run| !(run.status.is_terminal() && run.finished_at.unwrap_or(0.) <= limit));
        before - runs.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let registry = RunRegistry::new();
        let id = registry.create(&OptimizationRequest::new("gradient_descent"));
        assert_eq!(registry.status(&id).unwrap(), RunStatus::Pending);
        registry.start(&id).unwrap();
        assert!(registry.get(&id).unwrap().started_at.is_some());
        registry.fail(&id, "boom").unwrap();
        let run = registry.get(&id).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert!(run.finished_at.is_some());
        // terminal states are final
        assert!(matches!(
            registry.start(&id),
            Err(OptimError::InvalidStateTransition { .. })
        ));
        assert!(registry.fail(&id, "again").is_err());
    }

    #[test]
    fn test_transitions() {
        assert!(!RunStatus::Pending.can_move_to(RunStatus::Cancelled));
        assert!(!RunStatus::Pending.can_move_to(RunStatus::Succeeded));
        assert!(!RunStatus::Succeeded.can_move_to(RunStatus::Running));
        assert!(RunStatus::Running.can_move_to(RunStatus::Cancelled));
    }

    #[test]
    fn test_unknown_and_expire() {
        let registry = RunRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(OptimError::UnknownRunError(_))
        ));
        let a = registry.create(&OptimizationRequest::new("nsga2"));
        let b = registry.create(&OptimizationRequest::new("nsga2"));
        assert!(a < b);
        registry.start(&a).unwrap();
        registry.fail(&a, "boom").unwrap();
        assert_eq!(registry.list().len(), 2);
        // pending runs are never expired
        assert_eq!(registry.expire(-1.), 1);
        assert_eq!(registry.list()[0].id, b);
    }
}
