//! Request-scoped run context
//!
//! Carries the timing/reporting settings of one run explicitly into the
//! components that need them.

use std::future::Future;
use std::time::{Duration, Instant};

/// Times labelled phases of a run and optionally reports them on stderr.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    display: bool,
}

impl Timer {
    pub fn new(display: bool) -> Self {
        Self { display }
    }

    /// Await `fut`, recording how long it took under `label`
    pub async fn time<F: Future>(&self, label: &str, fut: F) -> F::Output {
        let start = Instant::now();
        let output = fut.await;
        self.report(label, start.elapsed());
        output
    }

    fn report(&self, label: &str, elapsed: Duration) {
        tracing::debug!(phase = label, elapsed_ms = elapsed.as_millis() as u64, "Phase complete");
        if self.display {
            eprintln!("{}: {:.3}s", label, elapsed.as_secs_f64());
        }
    }
}

/// Everything one run needs to know about how to report itself
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub timer: Timer,
    pub verbose: bool,
}

impl RunContext {
    pub fn new(time_report: bool, verbose: bool) -> Self {
        Self {
            timer: Timer::new(time_report),
            verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timer_passes_output_through() {
        let timer = Timer::new(false);
        let value = timer.time("phase", async { 42 }).await;
        assert_eq!(value, 42);
    }
}
