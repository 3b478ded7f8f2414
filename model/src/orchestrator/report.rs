use crate::provisioner::ClusterStatus;
use crate::runtime::ReleaseStatus;
use crate::target::ClusterKind;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use tabled::{Style, Table, Tabled};

/// Observed state of one component of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentState {
    Ready,
    NotReady,
    Missing,
    /// The state could not be determined.
    Unknown,
}

impl Display for ComponentState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            ComponentState::Ready => "ready",
            ComponentState::NotReady => "not ready",
            ComponentState::Missing => "missing",
            ComponentState::Unknown => "unknown",
        };
        write!(f, "{}", state)
    }
}

/// Everything `status` found. Printed as a table, or as JSON with `serde_json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub kind: ClusterKind,
    pub name: String,
    pub cluster: ClusterStatus,
    pub registry: ComponentState,
    pub runtime: ComponentState,
    pub release: Option<ReleaseStatus>,
    pub ingress: ComponentState,
}

impl StatusReport {
    /// `true` when every component is ready.
    pub fn healthy(&self) -> bool {
        self.cluster.is_ready()
            && [self.registry, self.runtime, self.ingress]
                .iter()
                .all(|state| *state == ComponentState::Ready)
    }
}

impl Display for StatusReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let table: Table = self.into();
        write!(f, "{}", table)
    }
}

impl From<&StatusReport> for Table {
    fn from(report: &StatusReport) -> Self {
        let mut rows = vec![StatusRow {
            component: format!("{} cluster '{}'", report.kind, report.name),
            state: report.cluster.to_string(),
            detail: report.cluster.version().unwrap_or_default().to_string(),
        }];
        for node in report.cluster.nodes() {
            rows.push(StatusRow {
                component: format!("  node {}", node.name),
                state: if node.ready { "ready" } else { "not ready" }.to_string(),
                detail: node.kubelet_version.clone().unwrap_or_default(),
            });
        }
        rows.push(StatusRow {
            component: "local registry".to_string(),
            state: report.registry.to_string(),
            detail: String::new(),
        });
        rows.push(StatusRow {
            component: "rapidfort runtime".to_string(),
            state: report.runtime.to_string(),
            detail: report
                .release
                .as_ref()
                .map(|release| {
                    format!(
                        "{} revision {} ({})",
                        release.name, release.version, release.info.status
                    )
                })
                .unwrap_or_default(),
        });
        rows.push(StatusRow {
            component: "ingress".to_string(),
            state: report.ingress.to_string(),
            detail: String::new(),
        });

        let mut table = Table::new(rows);
        table.with(Style::blank());
        table
    }
}

#[derive(Tabled, Default, Clone, Serialize)]
struct StatusRow {
    #[tabled(rename = "COMPONENT")]
    component: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kubectl::NodeSummary;
    use crate::runtime::ReleaseInfo;

    fn report() -> StatusReport {
        StatusReport {
            kind: ClusterKind::Rke2,
            name: "rf-rke2".to_string(),
            cluster: ClusterStatus::Running {
                version: Some("v1.28.3+rke2r1".to_string()),
                nodes: vec![NodeSummary {
                    name: "server-0".to_string(),
                    ready: true,
                    kubelet_version: Some("v1.28.3+rke2r1".to_string()),
                }],
            },
            registry: ComponentState::Ready,
            runtime: ComponentState::Ready,
            release: Some(ReleaseStatus {
                name: "rfruntime".to_string(),
                namespace: "rapidfort".to_string(),
                version: 2,
                info: ReleaseInfo {
                    status: "deployed".to_string(),
                    description: String::new(),
                },
            }),
            ingress: ComponentState::NotReady,
        }
    }

    #[test]
    fn table() {
        let table = report().to_string();
        assert!(table.contains("COMPONENT"));
        assert!(table.contains("rke2 cluster 'rf-rke2'"));
        assert!(table.contains("running (1/1 nodes ready)"));
        assert!(table.contains("node server-0"));
        assert!(table.contains("rfruntime revision 2 (deployed)"));
        assert!(table.contains("not ready"));
    }

    #[test]
    fn json() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["kind"], "rke2");
        assert_eq!(json["cluster"]["state"], "running");
        assert_eq!(json["registry"], "ready");
        assert_eq!(json["ingress"], "notReady");
        assert_eq!(json["release"]["info"]["status"], "deployed");
    }

    #[test]
    fn healthy_needs_every_component() {
        let mut report = report();
        assert!(!report.healthy());
        report.ingress = ComponentState::Ready;
        assert!(report.healthy());
    }
}
