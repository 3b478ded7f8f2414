/// Helper macro to avoid retyping the base domain-like name of our system when creating further
/// string constants from it. When given no parameters, this returns the base domain-like name of
/// the system. When given a string literal parameter it adds `/parameter` to the end.
macro_rules! rfstack {
    () => {
        "rfstack.rapidfort.com"
    };
    ($s:literal) => {
        concat!(rfstack!(), "/", $s)
    };
}

// System identifiers
pub const MANAGER: &str = "rfstack";

// Label keys
pub const LABEL_COMPONENT: &str = rfstack!("component");

// Standard tags https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
pub const APP_NAME: &str = "app.kubernetes.io/name";
pub const APP_INSTANCE: &str = "app.kubernetes.io/instance";
pub const APP_COMPONENT: &str = "app.kubernetes.io/component";
pub const APP_PART_OF: &str = "app.kubernetes.io/part-of";
pub const APP_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

// Local registry
pub const REGISTRY_NAME: &str = "registry";
pub const REGISTRY_PORT: i32 = 5000;
pub const REGISTRY_DATA_PATH: &str = "/var/lib/registry";
pub const REGISTRY_REPOSITORY: &str = "rapidfort";

// RapidFort runtime
pub const CREDENTIALS_SECRET: &str = "rf-credentials";
pub const KEY_ACCESS_ID: &str = "access_id";
pub const KEY_SECRET_KEY: &str = "secret_key";
pub const KEY_ROOT_URL: &str = "rf_root_url";

// Read by the RKE2 installer script
pub const ENV_INSTALL_RKE2_VERSION: &str = "INSTALL_RKE2_VERSION";

// RKE2
pub const RKE2_INSTALL_URL: &str = "https://get.rke2.io";
pub const RKE2_SERVICE: &str = "rke2-server.service";

// Address used for the route based host ip lookup. Nothing is sent to it.
pub const ROUTE_PROBE_ADDRESS: &str = "1.1.1.1";

#[test]
fn rfstack_constants_macro_test() {
    assert_eq!("rfstack.rapidfort.com", rfstack!());
    assert_eq!("rfstack.rapidfort.com/component", LABEL_COMPONENT);
    assert_eq!("rfstack.rapidfort.com/foo", rfstack!("foo"));
}
