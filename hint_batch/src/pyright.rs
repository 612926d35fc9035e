//! Temporary `pyrightconfig.json` for a run.

use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "pyrightconfig.json";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PyrightConfig<'a> {
    type_checking_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    venv_path: Option<&'a Path>,
    #[serde(skip_serializing_if = "Option::is_none")]
    venv: Option<&'a str>,
}

/// Writes a strict-mode `pyrightconfig.json` into the project and removes
/// it again on drop. An existing file is left untouched.
#[derive(Debug)]
pub struct PyrightConfigGuard {
    path: PathBuf,
    created: bool,
}

impl PyrightConfigGuard {
    pub fn install(project: &Path, venv: Option<&Path>) -> io::Result<Self> {
        let path = project.join(CONFIG_FILE_NAME);
        if path.exists() {
            log::info!("Keeping existing {}", path.display());
            return Ok(Self {
                path,
                created: false,
            });
        }

        // pyright wants the directory holding the venv plus the venv's name.
        let config = PyrightConfig {
            type_checking_mode: "strict",
            venv_path: venv.and_then(Path::parent),
            venv: venv.and_then(|v| v.file_name()).and_then(|n| n.to_str()),
        };
        let json = serde_json::to_string_pretty(&config)?;
        std::fs::write(&path, json)?;
        log::debug!("Wrote {}", path.display());
        Ok(Self {
            path,
            created: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created(&self) -> bool {
        self.created
    }
}

impl Drop for PyrightConfigGuard {
    fn drop(&mut self) {
        if !self.created {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_written_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let venv = dir.path().join(".venv");
        let path = dir.path().join(CONFIG_FILE_NAME);
        {
            let guard = PyrightConfigGuard::install(dir.path(), Some(&venv)).unwrap();
            assert!(guard.created());
            let config: Value =
                serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
            assert_eq!(config["typeCheckingMode"], "strict");
            assert_eq!(config["venv"], ".venv");
            assert_eq!(config["venvPath"], dir.path().to_str().unwrap());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_without_venv() {
        let dir = tempfile::tempdir().unwrap();
        let guard = PyrightConfigGuard::install(dir.path(), None).unwrap();
        let config: Value =
            serde_json::from_str(&std::fs::read_to_string(guard.path()).unwrap()).unwrap();
        assert_eq!(config, serde_json::json!({"typeCheckingMode": "strict"}));
    }

    #[test]
    fn test_existing_file_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{}").unwrap();
        {
            let guard = PyrightConfigGuard::install(dir.path(), None).unwrap();
            assert!(!guard.created());
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }
}
