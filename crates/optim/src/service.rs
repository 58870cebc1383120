//! Background execution of optimization requests.
use crate::errors::{OptimError, Result};
use crate::optimizer::OptimizationSolver;
use crate::solver::CancellationToken;
use crate::types::{OptimizationRequest, OptimizationResponse};

use log::{debug, info};
use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};

/// Handle on a submitted run
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    token: CancellationToken,
    receiver: Receiver<Result<OptimizationResponse>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Requests the run to stop, it finishes with its best point so far
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the run to finish
    pub fn join(self) -> Result<OptimizationResponse> {
        self.receiver.recv().map_err(|_| {
            OptimError::CancelledError(format!("{} terminated without result", self.run_id))
        })?
    }
}

/// Runs requests of a shared [OptimizationSolver] on a dedicated thread pool
pub struct OptimizationService {
    solver: Arc<OptimizationSolver>,
    pool: rayon::ThreadPool,
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl OptimizationService {
    /// Service running at most `n_threads` requests at once, 0 meaning one per cpu
    pub fn new(solver: OptimizationSolver, n_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("tunebox-worker-{i}"))
            .build()
            .map_err(|e| OptimError::InvalidConfigError(e.to_string()))?;
        Ok(OptimizationService {
            solver: Arc::new(solver),
            pool,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn solver(&self) -> &Arc<OptimizationSolver> {
        &self.solver
    }

    /// Queues `request` and returns as soon as its run is registered
    pub fn submit(&self, request: OptimizationRequest) -> RunHandle {
        let run_id = self.solver.runs().create(&request);
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run_id.clone(), token.clone());
        let (sender, receiver) = channel();
        let solver = self.solver.clone();
        let tokens = self.tokens.clone();
        let id = run_id.clone();
        let run_token = token.clone();
        info!("Submitted {run_id} ({})", request.method);
        self.pool.spawn(move || {
            let result = solver.execute(&id, &request, run_token);
            tokens.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
            if sender.send(result).is_err() {
                debug!("{id} finished after its handle was dropped");
            }
        });
        RunHandle {
            run_id,
            token,
            receiver,
        }
    }

    /// Cancels the active run `run_id`. A queued run starts and stops at once
    /// on its initial point.
    pub fn cancel(&self, run_id: &str) -> Result<()> {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        match tokens.get(run_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(OptimError::UnknownRunError(run_id.to_string())),
        }
    }

    /// Ids of the runs not finished yet
    pub fn active_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::RunStatus;
    use crate::types::{ObjectiveSpec, ParameterSpec};
    use std::time::Duration;

    fn slow_request(solver: &OptimizationSolver) -> OptimizationRequest {
        solver.evaluator_registry().register_fn("slow", |x: &[f64]| {
            std::thread::sleep(Duration::from_millis(5));
            x[0] * x[0]
        });
        OptimizationRequest::new("genetic_algorithm")
            .parameter(ParameterSpec::new("x", 0.5, [-1., 1.]))
            .objective(ObjectiveSpec::evaluator("f", "slow"))
            .configure(|c| c.max_iterations(100_000).tolerance(1e-14).seed(0))
    }

    #[test]
    fn test_submit_and_join() {
        let service = OptimizationService::new(OptimizationSolver::new(), 2).unwrap();
        let request = OptimizationRequest::new("gradient_descent")
            .parameter(ParameterSpec::new("x", 2., [-3., 3.]))
            .objective(ObjectiveSpec::expression("f", "(x - 1)^2"));
        let handle = service.submit(request);
        let run_id = handle.run_id().to_string();
        let response = handle.join().unwrap();
        assert_eq!(response.run_id, run_id);
        assert_eq!(response.status, RunStatus::Succeeded);
        assert_eq!(
            service.solver().runs().status(&run_id).unwrap(),
            RunStatus::Succeeded
        );
        assert!(service.cancel(&run_id).is_err());
    }

    #[test]
    fn test_cancel_running() {
        let service = OptimizationService::new(OptimizationSolver::new(), 1).unwrap();
        let request = slow_request(service.solver());
        let handle = service.submit(request);
        let run_id = handle.run_id().to_string();
        while service.solver().runs().status(&run_id).unwrap() == RunStatus::Pending {
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(20));
        service.cancel(&run_id).unwrap();

        let response = handle.join().unwrap();
        assert_eq!(response.status, RunStatus::Cancelled);
        assert_eq!(response.optimization_report.status, "cancelled");
        assert!(!response.convergence_metrics.success);
        // best point so far improves on x0 = 0.5
        assert!(response.optimal_objective_value < 0.25);
        assert!(response.convergence_metrics.evaluations > 1);
        let run = service.solver().runs().get(&run_id).unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.result, Some(response));
        assert!(service.active_runs().is_empty());
    }

    #[test]
    fn test_cancel_pending() {
        // the single worker is busy, the second run waits in the queue
        let service = OptimizationService::new(OptimizationSolver::new(), 1).unwrap();
        let busy = service.submit(slow_request(service.solver()));
        let queued = service.submit(
            OptimizationRequest::new("gradient_descent")
                .parameter(ParameterSpec::new("x", 2., [-3., 3.]))
                .objective(ObjectiveSpec::expression("f", "(x - 1)^2")),
        );
        let queued_id = queued.run_id().to_string();
        assert_eq!(service.active_runs().len(), 2);
        service.cancel(&queued_id).unwrap();
        busy.cancel();

        let response = queued.join().unwrap();
        assert_eq!(response.status, RunStatus::Cancelled);
        assert_eq!(response.convergence_metrics.iterations, 0);
        assert_eq!(response.optimal_parameters["x"], 2.);
        assert!(service.solver().runs().get(&queued_id).unwrap().started_at.is_some());
        assert!(busy.join().is_ok());
    }
}
