use super::{namespace, ApplyOutcome, ManifestApplier, Result};
use crate::config::RegistryConfig;
use crate::constants::{
    APP_COMPONENT, APP_MANAGED_BY, APP_NAME, APP_PART_OF, LABEL_COMPONENT, MANAGER,
    REGISTRY_DATA_PATH, REGISTRY_NAME, REGISTRY_PORT,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, Namespace, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    Probe, ResourceRequirements, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use maplit::btreemap;
use std::collections::BTreeMap;
use std::net::IpAddr;

const DATA_VOLUME: &str = "data";

fn selector_labels() -> BTreeMap<String, String> {
    btreemap! {
        APP_NAME.to_string() => REGISTRY_NAME.to_string(),
    }
}

fn labels() -> BTreeMap<String, String> {
    let mut labels = selector_labels();
    labels.extend(btreemap! {
        APP_COMPONENT.to_string() => "image-registry".to_string(),
        APP_PART_OF.to_string() => MANAGER.to_string(),
        APP_MANAGED_BY.to_string() => MANAGER.to_string(),
        LABEL_COMPONENT.to_string() => REGISTRY_NAME.to_string(),
    });
    labels
}

fn metadata(namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(REGISTRY_NAME.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels()),
        ..Default::default()
    }
}

/// The in-cluster image registry: its namespace, storage, workload and service. The objects
/// are applied in that order and a failure stops the rest from being applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryBundle {
    pub namespace: Namespace,
    pub volume_claim: PersistentVolumeClaim,
    pub deployment: Deployment,
    pub service: Service,
}

impl RegistryBundle {
    pub fn new(config: &RegistryConfig, registry_ip: IpAddr) -> Self {
        let ns = config.namespace.as_str();
        Self {
            namespace: namespace(ns),
            volume_claim: volume_claim(ns, &config.storage),
            deployment: deployment(ns, &config.image),
            service: service(ns, registry_ip),
        }
    }

    /// Apply every object in order, stopping at the first failure.
    pub async fn apply(&self, applier: &ManifestApplier) -> Result<Vec<ApplyOutcome>> {
        Ok(vec![
            applier.apply(&self.namespace, None).await?,
            applier.apply(&self.volume_claim, None).await?,
            applier.apply(&self.deployment, None).await?,
            applier.apply(&self.service, None).await?,
        ])
    }
}

fn volume_claim(namespace: &str, storage: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: metadata(namespace),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(ResourceRequirements {
                requests: Some(btreemap! {
                    "storage".to_string() => Quantity(storage.to_string()),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn deployment(namespace: &str, image: &str) -> Deployment {
    Deployment {
        metadata: metadata(namespace),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels()),
                ..Default::default()
            },
            // The volume is ReadWriteOnce so the old pod has to go before the new one starts.
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: REGISTRY_NAME.to_string(),
                        image: Some(image.to_string()),
                        ports: Some(vec![ContainerPort {
                            name: Some(REGISTRY_NAME.to_string()),
                            container_port: REGISTRY_PORT,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        readiness_probe: Some(Probe {
                            http_get: Some(HTTPGetAction {
                                path: Some("/v2/".to_string()),
                                port: IntOrString::Int(REGISTRY_PORT),
                                ..Default::default()
                            }),
                            period_seconds: Some(5),
                            ..Default::default()
                        }),
                        volume_mounts: Some(vec![VolumeMount {
                            name: DATA_VOLUME.to_string(),
                            mount_path: REGISTRY_DATA_PATH.to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: DATA_VOLUME.to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: REGISTRY_NAME.to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service(namespace: &str, registry_ip: IpAddr) -> Service {
    Service {
        metadata: metadata(namespace),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels()),
            ports: Some(vec![ServicePort {
                name: Some(REGISTRY_NAME.to_string()),
                port: REGISTRY_PORT,
                target_port: Some(IntOrString::Int(REGISTRY_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            external_ips: Some(vec![registry_ip.to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
