//! Manifest Plugin Deployer
//!
//! Installs the storage plugin by applying its Kubernetes manifests with
//! `kubectl`. A release target is checked out from the release repository
//! into a cache directory first; the working-tree target uses the manifests
//! next to the validator. Removal deletes exactly the manifests that were
//! applied, so a later redeploy starts from the working tree again.

use crate::domain::ports::{DeployTarget, PluginDeployer};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the manifest deployer
#[derive(Debug, Clone)]
pub struct DeployerConfig {
    /// kubectl binary
    pub kubectl: String,
    /// git binary
    pub git: String,
    /// Repository holding tagged plugin releases
    pub release_repo: String,
    /// Directory release checkouts are cached in
    pub release_cache: PathBuf,
    /// Checkout holding the new plugin version
    pub working_tree: PathBuf,
    /// Manifest directory relative to a checkout root
    pub manifest_dir: PathBuf,
    /// Fixture manifests relative to the working tree
    pub fixtures: Vec<PathBuf>,
    /// Namespace the plugin is installed into
    pub namespace: String,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            git: "git".to_string(),
            release_repo: "https://github.com/ceph/ceph-csi.git".to_string(),
            release_cache: std::env::temp_dir().join("ceph-csi"),
            working_tree: PathBuf::from("."),
            manifest_dir: PathBuf::from("deploy/rbd/kubernetes"),
            fixtures: Vec::new(),
            namespace: "default".to_string(),
        }
    }
}

// =============================================================================
// Kubectl Deployer
// =============================================================================

/// Deploys plugin manifests with kubectl
pub struct KubectlDeployer {
    config: DeployerConfig,
    /// Manifests applied by the last successful deploy
    applied: Mutex<Vec<PathBuf>>,
}

impl KubectlDeployer {
    pub fn new(config: DeployerConfig) -> Self {
        Self {
            config,
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Checkout root for a deploy target
    async fn checkout_root(&self, target: &DeployTarget) -> Result<PathBuf> {
        match target {
            DeployTarget::WorkingTree => Ok(self.config.working_tree.clone()),
            DeployTarget::Release(version) => self.checkout_release(version).await,
        }
    }

    /// Shallow-clone a release tag, reusing an existing checkout
    async fn checkout_release(&self, version: &str) -> Result<PathBuf> {
        let dir = self.config.release_cache.join(sanitize(version));
        if dir.join(&self.config.manifest_dir).is_dir() {
            debug!("Reusing release checkout {}", dir.display());
            return Ok(dir);
        }

        info!(
            "Checking out {} of {} into {}",
            version,
            self.config.release_repo,
            dir.display()
        );
        tokio::fs::create_dir_all(&self.config.release_cache).await?;
        let dir_arg = dir.display().to_string();
        run(
            &self.config.git,
            &[
                "clone",
                "--depth",
                "1",
                "--branch",
                version,
                &self.config.release_repo,
                &dir_arg,
            ],
            None,
        )
        .await?;
        Ok(dir)
    }

    async fn kubectl(&self, verb: &[&str], manifest: &Path) -> Result<()> {
        let raw = tokio::fs::read_to_string(manifest).await?;
        let rendered = rewrite_namespace(&raw, &self.config.namespace);
        let mut args: Vec<&str> = verb.to_vec();
        args.extend(["-n", self.config.namespace.as_str(), "-f", "-"]);
        debug!("kubectl {} {}", verb.join(" "), manifest.display());
        run(&self.config.kubectl, &args, Some(&rendered)).await
    }
}

#[async_trait]
impl PluginDeployer for KubectlDeployer {
    async fn deploy(&self, target: &DeployTarget) -> Result<()> {
        let root = self.checkout_root(target).await?;
        let manifests = manifest_files(&root.join(&self.config.manifest_dir))?;
        if manifests.is_empty() {
            return Err(Error::Deployer(format!(
                "no manifests under {}",
                root.join(&self.config.manifest_dir).display()
            )));
        }

        info!("Deploying plugin from {} ({} manifests)", target, manifests.len());
        for manifest in manifests {
            self.kubectl(&["apply"], &manifest).await?;
            // Recorded per manifest so a partial deploy is still removable
            let mut applied = self.applied.lock();
            applied.retain(|m| *m != manifest);
            applied.push(manifest);
        }
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        let pending = self.applied.lock().len();
        if pending == 0 {
            debug!("No plugin manifests applied; nothing to remove");
            return Ok(());
        }

        info!("Removing plugin ({} manifests)", pending);
        loop {
            let next = self.applied.lock().last().cloned();
            let Some(manifest) = next else {
                break;
            };
            // A failed delete stays recorded for the next removal
            self.kubectl(&["delete", "--ignore-not-found"], &manifest).await?;
            self.applied.lock().pop();
        }
        Ok(())
    }

    async fn apply_fixtures(&self) -> Result<()> {
        for fixture in &self.config.fixtures {
            let path = self.config.working_tree.join(fixture);
            info!("Applying fixture {}", path.display());
            self.kubectl(&["apply"], &path).await?;
        }
        Ok(())
    }

    async fn remove_fixtures(&self) -> Result<()> {
        for fixture in self.config.fixtures.iter().rev() {
            let path = self.config.working_tree.join(fixture);
            if let Err(e) = self.kubectl(&["delete", "--ignore-not-found"], &path).await {
                warn!("Failed to remove fixture {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}

/// YAML manifests in a directory, sorted by file name
pub fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = dir.join("*.yaml");
    let pattern = pattern.to_str().ok_or_else(|| {
        Error::Configuration(format!("non UTF-8 manifest path {}", dir.display()))
    })?;
    let paths = glob::glob(pattern)
        .map_err(|e| Error::Configuration(format!("bad manifest pattern: {}", e)))?;

    let mut files = paths
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Deployer(e.to_string()))?;
    files.sort();
    Ok(files)
}

/// Point `namespace: default` entries at the plugin namespace
pub fn rewrite_namespace(manifest: &str, namespace: &str) -> String {
    manifest
        .lines()
        .map(|line| {
            let indent = line.len() - line.trim_start().len();
            if line.trim() == "namespace: default" {
                format!("{}namespace: {}", &line[..indent], namespace)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn sanitize(version: &str) -> String {
    version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// Run a command to completion, feeding `stdin` when given
async fn run(program: &str, args: &[&str], stdin: Option<&str>) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Deployer(format!("failed to spawn {}: {}", program, e)))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes()).await?;
        // Close stdin so the child sees EOF
        drop(pipe);
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(Error::Deployer(format!(
            "{} {} exited with {}: {}",
            program,
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
