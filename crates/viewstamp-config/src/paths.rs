//! Path utilities and XDG directory discovery

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// XDG-compliant paths for viewstamp
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("org", "viewstamp", "viewstamp"),
        }
    }

    /// User config directory (~/.config/viewstamp/)
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("Failed to determine user config directory".to_string())
            })
    }

    /// User config file (~/.config/viewstamp/config.toml)
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// Project config file (viewstamp.toml)
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("viewstamp.toml")
    }

    /// Local override file (viewstamp.local.toml, not checked in)
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("viewstamp.local.toml")
    }

    /// Per-node data directory under a cluster data root
    pub fn node_data_dir(data_dir: impl AsRef<Path>, node_id: u8) -> PathBuf {
        data_dir.as_ref().join(format!("node-{node_id}"))
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
