use rfstack_model::orchestrator::ComponentState;
use rfstack_model::{ClusterKind, ClusterStatus, Orchestrator};
use selftest::{
    failure, helm_release, output, script_running_k3d, script_running_rke2, HostFixture,
    ScriptedRunner,
};
use std::sync::Arc;

fn orchestrator(fixture: &HostFixture, runner: &Arc<ScriptedRunner>) -> Orchestrator {
    Orchestrator::new(fixture.config.clone(), fixture.env(), runner.clone())
}

#[tokio::test]
async fn healthy_rke2() {
    let fixture = HostFixture::new().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    script_running_rke2(&runner);
    runner.respond(
        "helm",
        &["status", "rfruntime"],
        output(helm_release("deployed").to_string()),
    );
    let target = fixture.target(ClusterKind::Rke2);

    let report = orchestrator(&fixture, &runner)
        .status(&target)
        .await
        .unwrap();
    assert!(report.healthy(), "{}", report);
    assert_eq!(report.cluster.version(), Some("v1.28.3+rke2r1"));
    assert_eq!(report.release.as_ref().unwrap().version, 1);

    let table = report.to_string();
    assert!(table.contains("rke2 cluster 'rf-rke2'"));
    assert!(table.contains("running (1/1 nodes ready)"));
    assert!(table.contains("rfruntime revision 1 (deployed)"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["cluster"]["state"], "running");
    assert_eq!(json["runtime"], "ready");
    assert!(runner.calls_to("kubectl", &["apply"]).is_empty());
    assert!(runner.calls_to("systemctl", &["start"]).is_empty());
}

#[tokio::test]
async fn missing_release_and_registry() {
    let fixture = HostFixture::new().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    script_running_k3d(&runner, "uds");
    runner
        .respond("kubectl", &["get", "deployment", "registry"], output(""))
        .respond(
            "helm",
            &["status"],
            failure(1, "Error: release: not found"),
        );
    let target = fixture.target(ClusterKind::K3dUds);

    let report = orchestrator(&fixture, &runner)
        .status(&target)
        .await
        .unwrap();
    assert!(report.cluster.is_ready());
    assert_eq!(report.registry, ComponentState::Missing);
    assert_eq!(report.runtime, ComponentState::Missing);
    assert_eq!(report.release, None);
    assert_eq!(report.ingress, ComponentState::Ready);
    assert!(!report.healthy());
}

#[tokio::test]
async fn not_installed_reports_everything_missing() {
    let fixture = HostFixture::new().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.missing("rke2");
    let target = fixture.target(ClusterKind::Rke2);

    let report = orchestrator(&fixture, &runner)
        .status(&target)
        .await
        .unwrap();
    assert_eq!(report.cluster, ClusterStatus::NotInstalled);
    assert_eq!(report.registry, ComponentState::Missing);
    assert_eq!(report.runtime, ComponentState::Missing);
    assert_eq!(report.ingress, ComponentState::Missing);
    assert!(runner.calls_to("helm", &[]).is_empty());
    assert!(!runner.called("kubectl", &["get", "nodes"]));
}

#[tokio::test]
async fn stopped_k3d_cluster() {
    let fixture = HostFixture::new().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    script_running_k3d(&runner, "uds");
    runner.respond(
        "k3d",
        &["cluster", "list"],
        output(r#"[{"name":"uds","serversCount":1,"serversRunning":0}]"#),
    );
    let target = fixture.target(ClusterKind::K3dUds);

    let report = orchestrator(&fixture, &runner)
        .status(&target)
        .await
        .unwrap();
    assert_eq!(
        report.cluster,
        ClusterStatus::Stopped {
            version: Some("v5.6.0".to_string())
        }
    );
    assert_eq!(report.registry, ComponentState::Unknown);
    assert_eq!(report.runtime, ComponentState::Unknown);
    assert!(report.to_string().contains("stopped"));
}
