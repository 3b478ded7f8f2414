use super::error::{self, Result};
use crate::command::{CommandRunner, Invocation};
use log::{debug, info, warn};
use snafu::ResultExt;
use std::path::Path;

/// Kernel settings a single-node cluster with many pods needs.
pub(crate) const SYSCTL_SETTINGS: &[(&str, &str)] = &[
    ("fs.inotify.max_user_instances", "8192"),
    ("fs.inotify.max_user_watches", "524288"),
    ("vm.max_map_count", "262144"),
];

pub(crate) fn sysctl_contents() -> String {
    let mut contents = String::from("# Managed by rfstack\n");
    for (key, value) in SYSCTL_SETTINGS {
        contents.push_str(&format!("{} = {}\n", key, value));
    }
    contents
}

/// Write `contents` to `path` unless it already holds exactly that. Returns `true` when the
/// file was written.
pub(crate) fn write_if_changed(path: &Path, contents: &str) -> Result<bool> {
    if std::fs::read_to_string(path)
        .map(|existing| existing == contents)
        .unwrap_or(false)
    {
        debug!("'{}' is up to date", path.display());
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context(error::WriteSnafu { path: parent })?;
    }
    std::fs::write(path, contents).context(error::WriteSnafu { path })?;
    info!("Wrote '{}'", path.display());
    Ok(true)
}

/// Remove a file, treating an absent file as success.
pub(crate) fn remove_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove a directory tree, treating an absent directory as success.
pub(crate) fn remove_dir(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Persist the kernel settings and reload them. Failures are logged, never returned: the
/// cluster usually comes up without them.
pub(crate) async fn configure_sysctl(runner: &dyn CommandRunner, path: &Path) {
    match write_if_changed(path, &sysctl_contents()) {
        Ok(false) => return,
        Ok(true) => {}
        Err(e) => {
            warn!("Unable to persist kernel settings: {}", e);
            return;
        }
    }
    if let Err(e) = runner
        .run_checked(&Invocation::new("sysctl").arg("--system"))
        .await
    {
        warn!("Unable to reload kernel settings: {}", e);
    }
}
