use argmin::core::observers::Observe;
use argmin::core::{Error, State, KV};
use log::{debug, info};

/// Logs solver progress: start and end at info level, each iteration at debug level
#[derive(Clone, Debug, Default)]
pub struct LogObserver {
    run_id: String,
}

impl LogObserver {
    pub fn new(run_id: impl Into<String>) -> Self {
        LogObserver {
            run_id: run_id.into(),
        }
    }
}

impl<I> Observe<I> for LogObserver
where
    I: State<Float = f64>,
{
    fn observe_init(&mut self, name: &str, state: &I, _kv: &KV) -> Result<(), Error> {
        info!(
            "[{}] {name} started, initial best cost={:e}",
            self.run_id,
            state.get_best_cost()
        );
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        debug!(
            "[{}] iter {} cost={:e} best={:e}{}",
            self.run_id,
            state.get_iter(),
            state.get_cost(),
            state.get_best_cost(),
            if state.is_best() { " (new best)" } else { "" }
        );
        Ok(())
    }

    fn observe_final(&mut self, state: &I) -> Result<(), Error> {
        let reason = state
            .get_termination_reason()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "not terminated".to_string());
        info!(
            "[{}] stopped after {} iterations: {reason}, best cost={:e}",
            self.run_id,
            state.get_iter(),
            state.get_best_cost()
        );
        Ok(())
    }
}
