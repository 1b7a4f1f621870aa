//! Scoped driver acquisition

use crate::common::Result;

use super::Driver;

/// An acquired driver.
///
/// Release it with [`DriverSession::release`]. A session dropped without
/// release (panic, cancelled future) aborts the backend synchronously.
pub struct DriverSession<'d> {
    driver: &'d mut dyn Driver,
    released: bool,
}

impl<'d> DriverSession<'d> {
    /// Acquire `driver`. When acquisition fails part-way the driver is
    /// released again before the error is returned.
    pub async fn acquire(driver: &'d mut dyn Driver) -> Result<Self> {
        if let Err(e) = driver.acquire().await {
            if let Err(teardown) = driver.release().await {
                tracing::warn!(error = %teardown, "Release after failed acquire also failed");
            }
            return Err(e);
        }
        Ok(Self {
            driver,
            released: false,
        })
    }

    pub fn driver(&mut self) -> &mut dyn Driver {
        &mut *self.driver
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.driver.release().await
    }
}

impl Drop for DriverSession<'_> {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(debugger = self.driver.name(), "Driver session dropped without release");
            self.driver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::driver::{RawFrame, RunState};
    use crate::trace::{EvaluatedExpression, Location, Sentinels};
    use async_trait::async_trait;
    use std::path::Path;

    #[derive(Default)]
    struct Recorder {
        fail_acquire: bool,
        acquired: u32,
        released: u32,
        aborted: u32,
    }

    #[async_trait]
    impl Driver for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn version(&self) -> Option<String> {
            None
        }
        fn frames_below_main(&self) -> &[&'static str] {
            &[]
        }
        async fn acquire(&mut self) -> Result<()> {
            self.acquired += 1;
            if self.fail_acquire {
                return Err(Error::AdapterCrashed);
            }
            Ok(())
        }
        async fn release(&mut self) -> Result<()> {
            self.released += 1;
            Ok(())
        }
        fn abort(&mut self) {
            self.aborted += 1;
        }
        async fn clear_breakpoints(&mut self) -> Result<()> {
            Ok(())
        }
        async fn add_breakpoint(&mut self, _path: &Path, _line: u32) -> Result<()> {
            Ok(())
        }
        async fn launch(&mut self) -> Result<()> {
            Ok(())
        }
        async fn step(&mut self) -> Result<()> {
            Ok(())
        }
        async fn go(&mut self) -> Result<()> {
            Ok(())
        }
        async fn run_state(&mut self) -> Result<RunState> {
            Ok(RunState::Idle)
        }
        async fn stack_frames(&mut self) -> Result<Vec<RawFrame>> {
            Ok(Vec::new())
        }
        async fn last_location(&mut self) -> Result<Location> {
            Ok(Location::unknown())
        }
        async fn evaluate_expression(&mut self, expression: &str) -> Result<EvaluatedExpression> {
            const NONE: Sentinels = Sentinels {
                optimized_away: &[],
                irretrievable: &[],
            };
            Ok(EvaluatedExpression::from_error(expression, "n/a".to_string(), &NONE))
        }
    }

    #[tokio::test]
    async fn test_release_runs_once() {
        let mut driver = Recorder::default();
        let session = DriverSession::acquire(&mut driver).await.unwrap();
        session.release().await.unwrap();
        assert_eq!((driver.acquired, driver.released, driver.aborted), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_failed_acquire_still_releases() {
        let mut driver = Recorder {
            fail_acquire: true,
            ..Default::default()
        };
        assert!(DriverSession::acquire(&mut driver).await.is_err());
        assert_eq!(driver.released, 1);
    }

    #[tokio::test]
    async fn test_drop_without_release_aborts() {
        let mut driver = Recorder::default();
        {
            let mut session = DriverSession::acquire(&mut driver).await.unwrap();
            assert_eq!(session.driver().name(), "recorder");
        }
        assert_eq!((driver.released, driver.aborted), (0, 1));
    }
}
