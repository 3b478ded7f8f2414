use rfstack_model::orchestrator::{Error, PlanStep};
use rfstack_model::{ClusterKind, EnvOverrides, Orchestrator};
use selftest::{
    failure, helm_release, output, registry_service, script_running_k3d, script_running_rke2,
    HostFixture, ScriptedRunner, CREDENTIALS, HOST_IP, KUBECONFIG, RKE2_VERSION_OUTPUT,
};
use std::sync::Arc;

fn orchestrator(
    fixture: &HostFixture,
    env: EnvOverrides,
    runner: &Arc<ScriptedRunner>,
) -> Orchestrator {
    Orchestrator::new(fixture.config.clone(), env, runner.clone())
}

/// `sh <tmp>/install.sh`
fn installer_runs(runner: &ScriptedRunner) -> usize {
    runner
        .calls_to("sh", &[])
        .iter()
        .filter(|call| {
            call.arguments()
                .first()
                .map(|arg| arg.ends_with("install.sh"))
                .unwrap_or(false)
        })
        .count()
}

fn applied_doc(runner: &ScriptedRunner, kind: &str) -> serde_yaml::Value {
    let needle = format!("kind: {}", kind);
    let doc = runner
        .applied()
        .into_iter()
        .find(|doc| doc.lines().any(|line| line == needle))
        .unwrap();
    serde_yaml::from_str(&doc).unwrap()
}

#[tokio::test]
async fn rke2_install_twice_changes_nothing_the_second_time() {
    let fixture = HostFixture::new().unwrap();
    fixture.write_rke2_kubeconfig().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    script_running_rke2(&runner);
    runner.appears_after_first_call("rke2", &["--version"], output(RKE2_VERSION_OUTPUT));
    let orchestrator = orchestrator(&fixture, fixture.env(), &runner);
    let target = fixture.target(ClusterKind::Rke2);

    let first = orchestrator.install(&target).await.unwrap();
    assert!(first.cluster.is_ready());
    assert_eq!(first.registry_ip.to_string(), "10.0.0.5");
    assert!(first.plan.skipped_runtime().is_some());
    assert!(!first.plan.steps().contains(&PlanStep::DeployRuntime));
    assert_eq!(installer_runs(&runner), 1);
    assert_eq!(runner.calls_to("systemctl", &["start"]).len(), 1);
    assert_eq!(runner.calls_to("sysctl", &["--system"]).len(), 1);

    let config_dir = &fixture.config.paths.rke2_config_dir;
    let config = std::fs::read_to_string(config_dir.join("config.yaml")).unwrap();
    let registries = std::fs::read_to_string(config_dir.join("registries.yaml")).unwrap();
    assert!(registries.contains("http://10.0.0.5:5000"));
    let kubeconfig = std::fs::read_to_string(&fixture.config.paths.kubeconfig).unwrap();
    assert_eq!(kubeconfig, KUBECONFIG);

    let second = orchestrator.install(&target).await.unwrap();
    assert!(second.cluster.is_ready());
    assert_eq!(installer_runs(&runner), 1);
    assert_eq!(runner.calls_to("systemctl", &["start"]).len(), 1);
    assert!(!runner.called("systemctl", &["restart"]));
    assert_eq!(runner.calls_to("sysctl", &["--system"]).len(), 1);
    assert_eq!(
        std::fs::read_to_string(config_dir.join("config.yaml")).unwrap(),
        config
    );
}

#[tokio::test]
async fn second_install_leaves_registry_and_runtime_alone() {
    let fixture = HostFixture::new().unwrap();
    fixture.write_rke2_kubeconfig().unwrap();
    fixture.write_credentials(CREDENTIALS).unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    script_running_rke2(&runner);
    runner
        .respond_seq(
            "kubectl",
            &["get", "service", "registry"],
            vec![
                output(""),
                output(registry_service(HOST_IP).to_string()),
            ],
        )
        .respond_seq(
            "helm",
            &["status", "rfruntime"],
            vec![
                failure(1, "Error: release: not found"),
                output(helm_release("deployed").to_string()),
            ],
        );
    let orchestrator = orchestrator(&fixture, fixture.env(), &runner);
    let target = fixture.target(ClusterKind::Rke2);

    let first = orchestrator.install(&target).await.unwrap();
    assert!(first.runtime.is_some());
    assert_eq!(first.current_release, None);
    let upgrades = runner.calls_to("helm", &["upgrade"]).len();
    let applies = runner.applied().len();
    let git = runner.calls_to("git", &[]).len();
    assert_eq!(upgrades, 1);
    assert!(applies > 0);

    let second = orchestrator.install(&target).await.unwrap();
    assert!(second.plan.steps().contains(&PlanStep::DeployRuntime));
    assert_eq!(second.runtime, None);
    assert_eq!(second.current_release.unwrap().version, 1);
    assert_eq!(runner.calls_to("helm", &["upgrade"]).len(), upgrades);
    assert_eq!(runner.applied().len(), applies);
    assert_eq!(runner.calls_to("git", &[]).len(), git);
}

#[tokio::test]
async fn credentials_without_helm_skip_the_runtime() {
    let fixture = HostFixture::new().unwrap();
    fixture.write_rke2_kubeconfig().unwrap();
    fixture.write_credentials(CREDENTIALS).unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    script_running_rke2(&runner);
    runner.respond("sh", &["helm"], failure(1, ""));
    let target = fixture.target(ClusterKind::Rke2);

    let summary = orchestrator(&fixture, fixture.env(), &runner)
        .install(&target)
        .await
        .unwrap();
    assert!(summary.cluster.is_ready());
    assert_eq!(summary.runtime, None);
    assert!(!summary.plan.steps().contains(&PlanStep::DeployRuntime));
    assert!(summary.plan.skipped_runtime().unwrap().contains("helm"));
    assert!(runner.calls_to("helm", &[]).is_empty());
    assert!(runner.calls_to("git", &[]).is_empty());
    assert!(!runner.applied_kinds().contains(&"Secret".to_string()));
}

#[tokio::test]
async fn registry_service_uses_local_registry_override() {
    let fixture = HostFixture::new().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    script_running_rke2(&runner);
    let env = EnvOverrides::from_vars(vec![
        ("RF_LOCAL_REGISTRY".to_string(), "192.168.1.50".to_string()),
        ("RF_HOST_IP".to_string(), "10.0.0.5".to_string()),
    ])
    .unwrap();
    let target = rfstack_model::ClusterTarget::resolve(
        ClusterKind::Rke2,
        None,
        None,
        None,
        &env,
        &fixture.config,
    );

    let summary = orchestrator(&fixture, env, &runner)
        .install(&target)
        .await
        .unwrap();
    assert_eq!(summary.registry_ip.to_string(), "192.168.1.50");

    let service = applied_doc(&runner, "Service");
    assert_eq!(
        service["spec"]["externalIPs"][0].as_str(),
        Some("192.168.1.50")
    );
    assert_eq!(service["spec"]["ports"][0]["port"].as_u64(), Some(5000));
    assert_eq!(
        runner.applied_kinds(),
        vec!["Namespace", "PersistentVolumeClaim", "Deployment", "Service"]
    );
}

#[tokio::test]
async fn registry_stops_at_first_failed_object() {
    let fixture = HostFixture::new().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    script_running_rke2(&runner);
    runner.respond_to_input(
        "kubectl",
        &["apply"],
        "kind: PersistentVolumeClaim",
        failure(1, "persistentvolumeclaims is forbidden"),
    );
    let target = fixture.target(ClusterKind::Rke2);

    let err = orchestrator(&fixture, fixture.env(), &runner)
        .install(&target)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Registry { .. }), "{}", err);
    assert_eq!(
        runner.applied_kinds(),
        vec!["Namespace", "PersistentVolumeClaim"]
    );
    // Only the check before applying, the wait never starts.
    assert_eq!(
        runner
            .calls_to("kubectl", &["get", "deployment", "registry"])
            .len(),
        1
    );
}

#[tokio::test]
async fn all_missing_tools_are_reported_together() {
    let fixture = HostFixture::new().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner
        .respond("sh", &["docker"], failure(1, ""))
        .respond("sh", &["k3d"], failure(1, ""));
    let target = fixture.target(ClusterKind::K3dUds);

    let err = orchestrator(&fixture, fixture.env(), &runner)
        .install(&target)
        .await
        .unwrap_err();
    match err {
        Error::MissingTools { tools } => assert_eq!(tools, vec!["docker", "k3d"]),
        other => panic!("unexpected error {}", other),
    }
    assert!(runner.calls_to("k3d", &[]).is_empty());
    assert!(runner.calls_to("kubectl", &[]).is_empty());
}

#[tokio::test]
async fn incomplete_credentials_fail_before_the_host_is_changed() {
    let fixture = HostFixture::new().unwrap();
    fixture.write_credentials("access_id=abc123\n").unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.missing("rke2");
    let target = fixture.target(ClusterKind::Rke2);

    let err = orchestrator(&fixture, fixture.env(), &runner)
        .install(&target)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Credentials { .. }), "{}", err);
    assert!(!runner.called("curl", &[]));
    assert!(runner.calls_to("systemctl", &[]).is_empty());
    assert!(runner.applied().is_empty());
    assert!(!fixture.config.paths.sysctl_conf.exists());
}

#[tokio::test]
async fn k3d_install_creates_the_cluster_and_deploys_the_runtime() {
    let fixture = HostFixture::new().unwrap();
    fixture.write_credentials(CREDENTIALS).unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    script_running_k3d(&runner, "uds");
    runner.respond_seq(
        "k3d",
        &["cluster", "list"],
        vec![
            output("[]"),
            output(r#"[{"name":"uds","serversCount":1,"serversRunning":1}]"#),
        ],
    );
    let target = fixture.target(ClusterKind::K3dUds);

    let summary = orchestrator(&fixture, fixture.env(), &runner)
        .install(&target)
        .await
        .unwrap();
    assert!(summary.cluster.is_ready());
    let deployed = summary.runtime.unwrap();
    assert_eq!(deployed.release, "rfruntime");
    assert!(!deployed.overrides.contains("registry"));

    let create = runner.calls_to("k3d", &["cluster", "create", "--config"]);
    assert_eq!(create.len(), 1);
    let config_path = create[0].arguments().last().unwrap().clone();
    let config: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(config_path).unwrap()).unwrap();
    assert_eq!(config["metadata"]["name"].as_str(), Some("uds"));

    let upgrade = runner.calls_to("helm", &["upgrade", "--install", "rfruntime"]);
    assert_eq!(upgrade.len(), 1);
    assert!(upgrade[0]
        .arguments()
        .contains(&"ingress.variant=uds-istio".to_string()));
    assert!(runner.applied_kinds().contains(&"Secret".to_string()));
}
