use serde::Serialize;
use std::fmt::{Display, Formatter};

/// One step of an `install`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanStep {
    ProvisionCluster,
    ApplyRegistry,
    WaitForRegistry,
    DeployRuntime,
}

impl Display for PlanStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let description = match self {
            PlanStep::ProvisionCluster => "provision cluster",
            PlanStep::ApplyRegistry => "apply local registry",
            PlanStep::WaitForRegistry => "wait for local registry",
            PlanStep::DeployRuntime => "deploy RapidFort Runtime",
        };
        write!(f, "{}", description)
    }
}

/// Whether the runtime can be deployed as part of `install`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeDecision {
    Deploy,
    /// Skipped, with the reason shown to the user.
    Skip(String),
}

/// The ordered steps of one `install` run. Built fresh every run, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentPlan {
    steps: Vec<PlanStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped: Option<String>,
}

impl DeploymentPlan {
    pub fn for_install(runtime: RuntimeDecision) -> Self {
        let mut steps = vec![
            PlanStep::ProvisionCluster,
            PlanStep::ApplyRegistry,
            PlanStep::WaitForRegistry,
        ];
        let skipped = match runtime {
            RuntimeDecision::Deploy => {
                steps.push(PlanStep::DeployRuntime);
                None
            }
            RuntimeDecision::Skip(reason) => Some(reason),
        };
        Self { steps, skipped }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Why the runtime step is not part of the plan.
    pub fn skipped_runtime(&self) -> Option<&str> {
        self.skipped.as_deref()
    }
}
