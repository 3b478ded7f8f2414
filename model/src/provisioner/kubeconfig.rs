use super::error::{self, Result};
use super::host_files::write_if_changed;
use crate::config::Paths;
use kube::config::Kubeconfig;
use log::info;
use snafu::{ensure, ResultExt};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// What [`KubeconfigManager::restore`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restored {
    /// The saved kubeconfig was put back.
    Backup,
    /// There was no backup, so the kubeconfig we installed was removed.
    Removed,
    /// Nothing to restore and no kubeconfig of ours to remove.
    Nothing,
}

/// Installs the cluster's kubeconfig at the user's kubeconfig path. A kubeconfig that was
/// there before is saved once and put back on uninstall. A marker file records that the
/// kubeconfig at the path is ours, so it is never mistaken for the user's.
#[derive(Debug, Clone)]
pub struct KubeconfigManager {
    path: PathBuf,
    backup: PathBuf,
    marker: PathBuf,
}

impl KubeconfigManager {
    pub fn new(paths: &Paths) -> Self {
        Self {
            path: paths.kubeconfig.clone(),
            backup: paths.kubeconfig_backup.clone(),
            marker: paths.kubeconfig_marker.clone(),
        }
    }

    /// Check that `contents` is a usable kubeconfig.
    pub fn validate(contents: &str, origin: &str) -> Result<Kubeconfig> {
        let kubeconfig =
            Kubeconfig::from_yaml(contents).context(error::KubeconfigInvalidSnafu { origin })?;
        ensure!(
            !kubeconfig.clusters.is_empty(),
            error::KubeconfigEmptySnafu { origin }
        );
        Ok(kubeconfig)
    }

    /// Write `contents` to the kubeconfig path, backing up a different pre-existing file first
    /// unless we wrote that file ourselves. Returns `true` when the file changed.
    pub fn install(&self, contents: &str, origin: &str) -> Result<bool> {
        Self::validate(contents, origin)?;

        let existing = std::fs::read_to_string(&self.path).ok();
        if let Some(existing) = existing {
            if existing == contents {
                return Ok(false);
            }
            if !self.backup.exists() && !self.is_ours() {
                std::fs::copy(&self.path, &self.backup).context(
                    error::KubeconfigFileSnafu {
                        action: "back up",
                        path: &self.path,
                    },
                )?;
                info!(
                    "Saved existing kubeconfig to '{}'",
                    self.backup.display()
                );
            }
        }

        let changed = write_if_changed(&self.path, contents)?;
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600)).context(
            error::KubeconfigFileSnafu {
                action: "restrict permissions of",
                path: &self.path,
            },
        )?;
        std::fs::write(&self.marker, origin).context(error::KubeconfigFileSnafu {
            action: "mark",
            path: &self.marker,
        })?;
        info!("Installed kubeconfig at '{}'", self.path.display());
        Ok(changed)
    }

    /// `true` when the kubeconfig at the path was written by us.
    fn is_ours(&self) -> bool {
        self.marker.is_file()
    }

    fn clear_marker(&self) -> Result<()> {
        if !self.marker.exists() {
            return Ok(());
        }
        std::fs::remove_file(&self.marker).context(error::KubeconfigFileSnafu {
            action: "remove",
            path: &self.marker,
        })
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_file()
    }

    /// Put a saved kubeconfig back. Does nothing when there is no backup.
    pub fn restore_backup(&self) -> Result<bool> {
        if !self.has_backup() {
            return Ok(false);
        }
        std::fs::rename(&self.backup, &self.path).context(error::KubeconfigFileSnafu {
            action: "restore",
            path: &self.backup,
        })?;
        self.clear_marker()?;
        info!("Restored kubeconfig from '{}'", self.backup.display());
        Ok(true)
    }

    /// Put a saved kubeconfig back, or remove ours when nothing was saved. A kubeconfig we did
    /// not write is left alone.
    pub fn restore(&self) -> Result<Restored> {
        if self.restore_backup()? {
            return Ok(Restored::Backup);
        }
        if !self.is_ours() {
            return Ok(Restored::Nothing);
        }
        let removed = self.path.exists();
        if removed {
            std::fs::remove_file(&self.path).context(error::KubeconfigFileSnafu {
                action: "remove",
                path: &self.path,
            })?;
            info!("Removed kubeconfig '{}'", self.path.display());
        }
        self.clear_marker()?;
        Ok(if removed {
            Restored::Removed
        } else {
            Restored::Nothing
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: default
  cluster:
    server: https://127.0.0.1:6443
contexts:
- name: default
  context:
    cluster: default
    user: default
current-context: default
users:
- name: default
  user:
    token: abc
"#;

    fn manager(home: &Path) -> KubeconfigManager {
        KubeconfigManager::new(&Paths::for_home(home))
    }

    #[test]
    fn rejects_invalid_kubeconfig() {
        assert!(KubeconfigManager::validate("clusters: 12", "test").is_err());
        assert!(matches!(
            KubeconfigManager::validate("apiVersion: v1\nkind: Config\n", "test").unwrap_err(),
            error::Error::KubeconfigEmpty { .. }
        ));
        assert!(KubeconfigManager::validate(KUBECONFIG, "test").is_ok());
    }

    #[test]
    fn backs_up_once_and_restores() {
        let home = tempfile::TempDir::new().unwrap();
        let manager = manager(home.path());
        let paths = Paths::for_home(home.path());
        std::fs::create_dir_all(paths.kubeconfig.parent().unwrap()).unwrap();
        std::fs::write(&paths.kubeconfig, "original").unwrap();

        assert!(manager.install(KUBECONFIG, "test").unwrap());
        assert!(!manager.install(KUBECONFIG, "test").unwrap());
        let changed = KUBECONFIG.replace("abc", "def");
        assert!(manager.install(&changed, "test").unwrap());
        assert_eq!(
            std::fs::read_to_string(&paths.kubeconfig_backup).unwrap(),
            "original"
        );

        assert_eq!(manager.restore().unwrap(), Restored::Backup);
        assert_eq!(
            std::fs::read_to_string(&paths.kubeconfig).unwrap(),
            "original"
        );
        assert!(!manager.has_backup());
    }

    #[test]
    fn removes_when_nothing_was_saved() {
        let home = tempfile::TempDir::new().unwrap();
        let manager = manager(home.path());
        assert_eq!(manager.restore().unwrap(), Restored::Nothing);
        manager.install(KUBECONFIG, "test").unwrap();
        assert!(!manager.has_backup());
        assert_eq!(manager.restore().unwrap(), Restored::Removed);
        assert!(!Paths::for_home(home.path()).kubeconfig.exists());
    }

    #[test]
    fn never_saves_a_kubeconfig_it_wrote() {
        let home = tempfile::TempDir::new().unwrap();
        let manager = manager(home.path());
        let paths = Paths::for_home(home.path());
        std::fs::create_dir_all(paths.kubeconfig.parent().unwrap()).unwrap();

        assert!(manager.install(KUBECONFIG, "test").unwrap());
        let rotated = KUBECONFIG.replace("abc", "rotated");
        assert!(manager.install(&rotated, "test").unwrap());
        assert!(!manager.has_backup());

        assert_eq!(manager.restore().unwrap(), Restored::Removed);
        assert!(!paths.kubeconfig.exists());
        assert!(!paths.kubeconfig_marker.exists());
    }

    #[test]
    fn leaves_a_foreign_kubeconfig_alone() {
        let home = tempfile::TempDir::new().unwrap();
        let manager = manager(home.path());
        let paths = Paths::for_home(home.path());
        std::fs::create_dir_all(paths.kubeconfig.parent().unwrap()).unwrap();
        std::fs::write(&paths.kubeconfig, "someone else's").unwrap();

        assert_eq!(manager.restore().unwrap(), Restored::Nothing);
        assert_eq!(
            std::fs::read_to_string(&paths.kubeconfig).unwrap(),
            "someone else's"
        );
    }
}
