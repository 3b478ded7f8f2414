use crate::config::ChartConfig;
use crate::constants::{CREDENTIALS_SECRET, REGISTRY_PORT, REGISTRY_REPOSITORY};
use crate::target::ClusterTarget;
use serde::Serialize;
use std::net::IpAddr;

/// A typed `--set` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HelmValue {
    /// Passed with `--set-string` so helm never reinterprets it.
    String(String),
    Bool(bool),
    /// Rendered as `{a,b}`.
    List(Vec<String>),
}

impl HelmValue {
    fn render(&self) -> String {
        match self {
            HelmValue::String(value) => escape(value),
            HelmValue::Bool(value) => value.to_string(),
            HelmValue::List(items) => {
                let items: Vec<String> = items.iter().map(|item| escape(item)).collect();
                format!("{{{}}}", items.join(","))
            }
        }
    }

    fn flag(&self) -> &'static str {
        match self {
            HelmValue::String(_) => "--set-string",
            HelmValue::Bool(_) | HelmValue::List(_) => "--set",
        }
    }
}

/// Helm splits `--set` values on commas, a backslash keeps them literal.
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ',') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Where the runtime images come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// The in-cluster registry. Images are always pulled and no pull secret is referenced.
    Local { registry_ip: IpAddr },
    /// The RapidFort registry, optionally through a pull secret.
    Upstream { pull_secret: Option<String> },
}

/// Ordered helm value overrides. Setting a key again replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValueOverrides {
    values: Vec<(String, HelmValue)>,
}

impl ValueOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// The overrides for a runtime release into `target`.
    pub fn for_runtime(
        target: &ClusterTarget,
        chart: &ChartConfig,
        images: &ImageSource,
        image_tag: Option<&str>,
    ) -> Self {
        let mut values = Self::new();
        values
            .set("clusterName", HelmValue::String(target.name.clone()))
            .set(
                "clusterCaption",
                HelmValue::String(format!("{} ({})", target.name, target.kind)),
            )
            .set(
                "credentialsSecret",
                HelmValue::String(CREDENTIALS_SECRET.to_string()),
            )
            .set("scan.enabled", HelmValue::Bool(chart.scan))
            .set("profiling.enabled", HelmValue::Bool(chart.profiling))
            .set(
                "ingress.variant",
                HelmValue::String(target.kind.ingress_variant().to_string()),
            );
        if let Some(tag) = image_tag {
            values.set("imageTag", HelmValue::String(tag.to_string()));
        }
        match images {
            ImageSource::Local { registry_ip } => {
                values
                    .set(
                        "registry",
                        HelmValue::String(format!(
                            "{}:{}/{}",
                            registry_ip, REGISTRY_PORT, REGISTRY_REPOSITORY
                        )),
                    )
                    .set("imagePullPolicy", HelmValue::String("Always".to_string()));
            }
            ImageSource::Upstream {
                pull_secret: Some(secret),
            } => {
                values.set(
                    "imagePullSecrets.names",
                    HelmValue::List(vec![secret.clone()]),
                );
            }
            ImageSource::Upstream { pull_secret: None } => {}
        }
        values
    }

    pub fn set<S: Into<String>>(&mut self, key: S, value: HelmValue) -> &mut Self {
        let key = key.into();
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.values.push((key, value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&HelmValue> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(k, _)| k.as_str())
    }

    /// Command line arguments for `helm upgrade`.
    pub fn to_args(&self) -> Vec<String> {
        self.values
            .iter()
            .flat_map(|(key, value)| {
                [
                    value.flag().to_string(),
                    format!("{}={}", key, value.render()),
                ]
            })
            .collect()
    }
}
