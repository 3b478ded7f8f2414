/*!

Teardown never stops at the first failure. Each step is attempted, its outcome is logged and
recorded in a [`TeardownReport`], and the caller decides what to do with the failures (usually
nothing beyond printing them).

!*/

use log::{info, warn};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;

/// The outcome of one best-effort step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub name: String,
    /// `None` when the step succeeded.
    pub error: Option<String>,
}

impl StepReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    steps: Vec<StepReport>,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of a step that has already run.
    pub fn record<E: Display>(&mut self, name: &str, result: Result<(), E>) {
        let error = match result {
            Ok(()) => {
                info!("{}: done", name);
                None
            }
            Err(e) => {
                warn!("{}: failed, continuing: {}", name, e);
                Some(e.to_string())
            }
        };
        self.steps.push(StepReport {
            name: name.to_string(),
            error,
        });
    }

    /// Run `step` and record its result.
    pub async fn attempt<F, E>(&mut self, name: &str, step: F)
    where
        F: Future<Output = Result<(), E>>,
        E: Display,
    {
        let result = step.await;
        self.record(name, result);
    }

    /// Append the steps of another report.
    pub fn extend(&mut self, other: TeardownReport) {
        self.steps.extend(other.steps);
    }

    pub fn steps(&self) -> &[StepReport] {
        &self.steps
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|step| !step.succeeded())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}
