//! Pod discovery and configuration.
//!
//! A pod is a directory under the pods root holding a `Dockerfile`
//! (required), a `pod.json` configuration document (optional), and a
//! `template.md` prompt preamble (optional).

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::runner::Mount;
use crate::{DispatchError, Result};

const DOCKERFILE: &str = "Dockerfile";
const CONFIG_FILE: &str = "pod.json";
const TEMPLATE_FILE: &str = "template.md";

/// A discovered pod definition.
#[derive(Debug, Clone)]
pub struct Pod {
    /// Directory name, used as the pod identifier.
    pub name: String,
    /// Absolute path to the pod directory.
    pub dir: PathBuf,
    /// Absolute path to the Dockerfile within `dir`.
    pub dockerfile: PathBuf,
    /// Contents of `template.md`; empty string if absent.
    pub template: String,
    /// Parsed from `pod.json`; defaults if the file is absent.
    pub config: PodConfig,
}

/// Optional configuration parsed from a pod's `pod.json` file.
///
/// Every field is optional; absent values fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodConfig {
    /// Docker image tag; defaults to `cldpd-<name>` when absent.
    pub image: Option<String>,
    /// Environment variables passed to the container.
    pub env: HashMap<String, String>,
    /// `--build-arg` values passed to `docker build`.
    pub build_args: HashMap<String, String>,
    /// Working directory inside the container.
    pub workdir: Option<String>,
    /// Host env var names forwarded to the container.
    pub inherit_env: Vec<String>,
    /// Bind mounts passed to the container.
    pub mounts: Vec<Mount>,
}

/// Load a single pod by name from the given pods directory.
///
/// Mount source paths beginning with `~` or `~/` are expanded to the
/// current user's home directory; `~user` forms pass through verbatim.
///
/// # Errors
///
/// - [`DispatchError::PodNotFound`] — the pod directory does not exist.
/// - [`DispatchError::InvalidPod`] — the directory exists but has no
///   Dockerfile.
/// - [`DispatchError::Config`] — `pod.json` is present but malformed, or
///   the home directory cannot be resolved for `~` expansion.
/// - [`DispatchError::Io`] — any other filesystem failure.
pub fn discover(pods_dir: &Path, name: &str) -> Result<Pod> {
    let dir = pods_dir.join(name);
    if !dir.is_dir() {
        return Err(DispatchError::PodNotFound(name.to_owned()));
    }
    if !dir.join(DOCKERFILE).is_file() {
        return Err(DispatchError::InvalidPod(format!(
            "{name}: {DOCKERFILE} not found"
        )));
    }

    let mut config = PodConfig::default();
    let config_path = dir.join(CONFIG_FILE);
    match fs::read_to_string(&config_path) {
        Ok(raw) if !raw.is_empty() => {
            config = serde_json::from_str(&raw).map_err(|err| {
                DispatchError::Config(format!("parse {}: {err}", config_path.display()))
            })?;
            expand_mount_sources(&mut config)?;
        }
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(DispatchError::Io(format!(
                "read {}: {err}",
                config_path.display()
            )));
        }
    }

    let template_path = dir.join(TEMPLATE_FILE);
    let template = match fs::read_to_string(&template_path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(err) => {
            return Err(DispatchError::Io(format!(
                "read {}: {err}",
                template_path.display()
            )));
        }
    };

    let dir = dir
        .canonicalize()
        .map_err(|err| DispatchError::Io(format!("resolve pod directory: {err}")))?;

    Ok(Pod {
        name: name.to_owned(),
        dockerfile: dir.join(DOCKERFILE),
        dir,
        template,
        config,
    })
}

/// Load all valid pods from the given pods directory.
///
/// Non-directory entries and directories without a Dockerfile are skipped.
/// The returned list is sorted by pod name.
///
/// # Errors
///
/// Returns [`DispatchError::Io`] if the directory cannot be read, and
/// propagates any non-`InvalidPod` error from [`discover`].
pub fn discover_all(pods_dir: &Path) -> Result<Vec<Pod>> {
    let entries = fs::read_dir(pods_dir)
        .map_err(|err| DispatchError::Io(format!("read pods directory: {err}")))?;

    let mut pods = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|err| DispatchError::Io(format!("read pods directory: {err}")))?;
        let file_type = entry
            .file_type()
            .map_err(|err| DispatchError::Io(format!("read pods directory: {err}")))?;
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match discover(pods_dir, &name) {
            Ok(pod) => pods.push(pod),
            Err(DispatchError::InvalidPod(reason)) => {
                debug!(pod = %name, reason = %reason, "skipping directory without a Dockerfile");
            }
            Err(err) => return Err(err),
        }
    }

    pods.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(pods)
}

/// Expand `~` / `~/` prefixes on mount sources to the user's home directory.
///
/// Docker's `-v` flag performs no shell expansion, so a literal `~` would
/// silently fail to mount. `~user` forms are left untouched.
fn expand_mount_sources(config: &mut PodConfig) -> Result<()> {
    let needs_home = config
        .mounts
        .iter()
        .any(|m| m.source == "~" || m.source.starts_with("~/"));
    if !needs_home {
        return Ok(());
    }

    let home = dirs::home_dir()
        .ok_or_else(|| DispatchError::Config("cannot resolve home directory".to_owned()))?;

    for mount in &mut config.mounts {
        if mount.source == "~" {
            mount.source = home.display().to_string();
        } else if let Some(rest) = mount.source.strip_prefix("~/") {
            mount.source = home.join(rest).display().to_string();
        }
    }
    Ok(())
}
