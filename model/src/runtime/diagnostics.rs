use crate::kubectl::{pod_ready, Kubectl};
use log::{debug, warn};

/// Describe every pod in `namespace` that is not ready and log the result. Returns the names
/// of those pods. Nothing here is allowed to fail the caller.
pub(crate) async fn log_unready_pods(kubectl: &Kubectl, namespace: &str) -> Vec<String> {
    let pods = match kubectl.pods(namespace, None).await {
        Ok(pods) => pods,
        Err(e) => {
            warn!("Unable to list pods in '{}': {}", namespace, e);
            return Vec::new();
        }
    };

    let mut unready = Vec::new();
    for pod in pods.iter().filter(|pod| !pod_ready(pod)) {
        let name = match &pod.metadata.name {
            Some(name) => name.clone(),
            None => continue,
        };
        let phase = pod
            .status
            .as_ref()
            .and_then(|status| status.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        warn!("Pod '{}/{}' is not ready ({})", namespace, name, phase);
        match kubectl.describe_pod(namespace, &name).await {
            Ok(description) => warn!("{}", description.trim_end()),
            Err(e) => debug!("Unable to describe pod '{}': {}", name, e),
        }
        unready.push(name);
    }
    unready
}
