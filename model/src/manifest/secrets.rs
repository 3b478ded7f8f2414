use super::{PullSecretNameSnafu, PullSecretParseSnafu, PullSecretReadSnafu, Result};
use crate::constants::{
    APP_MANAGED_BY, CREDENTIALS_SECRET, KEY_ACCESS_ID, KEY_ROOT_URL, KEY_SECRET_KEY, MANAGER,
};
use crate::credentials::Credentials;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use maplit::btreemap;
use snafu::{ensure, ResultExt};
use std::path::Path;

/// The `Opaque` secret the runtime agent reads its account credentials from.
pub fn credentials_secret(namespace: &str, credentials: &Credentials) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(CREDENTIALS_SECRET.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(btreemap! {
                APP_MANAGED_BY.to_string() => MANAGER.to_string(),
            }),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(btreemap! {
            KEY_ACCESS_ID.to_string() => credentials.access_id.clone(),
            KEY_SECRET_KEY.to_string() => credentials.secret_key.clone(),
            KEY_ROOT_URL.to_string() => credentials.root_url.clone(),
        }),
        ..Default::default()
    }
}

/// Load the optional image pull secret. Returns `None` when the file does not exist. The
/// secret is moved into `namespace` whatever the file says.
pub fn load_pull_secret(path: &Path, namespace: &str) -> Result<Option<Secret>> {
    if !path.is_file() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).context(PullSecretReadSnafu { path })?;
    let mut secret: Secret =
        serde_yaml::from_str(&contents).context(PullSecretParseSnafu { path })?;
    ensure!(
        secret
            .metadata
            .name
            .as_ref()
            .map(|name| !name.is_empty())
            .unwrap_or(false),
        PullSecretNameSnafu { path }
    );
    secret.metadata.namespace = Some(namespace.to_string());
    // Server-owned fields from an exported secret would make the apply fail.
    secret.metadata.resource_version = None;
    secret.metadata.uid = None;
    secret.metadata.creation_timestamp = None;
    secret.metadata.managed_fields = None;
    Ok(Some(secret))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::manifest::Error;

    #[test]
    fn credentials_secret_keys() {
        let credentials = Credentials {
            access_id: "abc".to_string(),
            secret_key: "s3cr3t".to_string(),
            root_url: "https://us01.rapidfort.com".to_string(),
        };
        let secret = credentials_secret("rapidfort", &credentials);
        assert_eq!(secret.metadata.name.as_deref(), Some("rf-credentials"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("rapidfort"));
        let data = secret.string_data.unwrap();
        assert_eq!(data["access_id"], "abc");
        assert_eq!(data["secret_key"], "s3cr3t");
        assert_eq!(data["rf_root_url"], "https://us01.rapidfort.com");
    }

    #[test]
    fn pull_secret_namespace_is_forced() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rf-registry-secret.yaml");
        assert!(load_pull_secret(&path, "rapidfort").unwrap().is_none());

        std::fs::write(
            &path,
            r#"
apiVersion: v1
kind: Secret
metadata:
  name: rf-registry
  namespace: default
  resourceVersion: "1234"
type: kubernetes.io/dockerconfigjson
data:
  .dockerconfigjson: e30=
"#,
        )
        .unwrap();
        let secret = load_pull_secret(&path, "rapidfort").unwrap().unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("rf-registry"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("rapidfort"));
        assert_eq!(secret.metadata.resource_version, None);
        assert_eq!(
            secret.type_.as_deref(),
            Some("kubernetes.io/dockerconfigjson")
        );
    }

    #[test]
    fn pull_secret_without_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("secret.yaml");
        std::fs::write(&path, "apiVersion: v1\nkind: Secret\nmetadata: {}\n").unwrap();
        assert!(matches!(
            load_pull_secret(&path, "rapidfort").unwrap_err(),
            Error::PullSecretName { .. }
        ));

        std::fs::write(&path, "apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n").unwrap();
        assert!(matches!(
            load_pull_secret(&path, "rapidfort").unwrap_err(),
            Error::PullSecretParse { .. }
        ));
    }
}
