//! Site publishing: running the static build and purging the CDN copy.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::Collection;
use crate::uploads::{AssetKind, UploadManager};

/// Paths purged on every run in addition to the collection files and assets.
const STATIC_PURGE_PATHS: [&str; 2] = ["/static/js/main.js", "/static/css/main.css"];
const BRANDING_PURGE_PATHS: [&str; 3] = ["/wce-logo.png", "/nsm-logo.png", "/favicon.ico"];

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("{message}")]
    ExternalServiceFailure { message: String, stderr: String },
    #[error("Failed to list assets for purge: {0}")]
    Io(#[from] io::Error),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
    pub stdout: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurgeReport {
    pub total_files: usize,
    pub success_count: usize,
    pub failed_count: usize,
}

pub struct Publisher {
    build_command: String,
    build_dir: PathBuf,
    purge_base: String,
    client: Client,
}

impl Publisher {
    pub fn new(config: &Config) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.purge_timeout_secs))
            .build()?;

        Ok(Publisher {
            build_command: config.build_command.clone(),
            build_dir: config.build_dir.clone(),
            purge_base: config.cdn_purge_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Runs the build command to completion and hands back its stdout.
    pub async fn build(&self) -> Result<BuildOutput, PublishError> {
        info!(command = %self.build_command, dir = %self.build_dir.display(), "Running site build");

        let output = shell(&self.build_command)
            .current_dir(&self.build_dir)
            .output()
            .await
            .map_err(|e| PublishError::ExternalServiceFailure {
                message: format!("Failed to start build command: {e}"),
                stderr: String::new(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            warn!(status = %output.status, "Site build failed");
            return Err(PublishError::ExternalServiceFailure {
                message: format!("Command failed: {} ({})", self.build_command, output.status),
                stderr,
            });
        }

        info!("Site build completed");
        Ok(BuildOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    /// Purges every known path one request at a time. Failures are counted,
    /// not raised; only failing to enumerate the asset directories is an error.
    pub async fn purge_cdn(&self, uploads: &UploadManager) -> Result<PurgeReport, PublishError> {
        let targets = purge_targets(uploads)?;
        let mut report = PurgeReport {
            total_files: targets.len(),
            ..PurgeReport::default()
        };

        info!(base = %self.purge_base, files = targets.len(), "Purging CDN cache");
        for path in &targets {
            match self.purge_url(&format!("{}{}", self.purge_base, path)).await {
                Ok(()) => report.success_count += 1,
                Err(reason) => {
                    warn!(file = %path, %reason, "CDN purge failed");
                    report.failed_count += 1;
                }
            }
        }

        if let Err(reason) = self.purge_url(&self.purge_base).await {
            warn!(%reason, "CDN root purge failed");
        }

        info!(
            succeeded = report.success_count,
            failed = report.failed_count,
            "CDN purge finished"
        );
        Ok(report)
    }

    async fn purge_url(&self, url: &str) -> Result<(), String> {
        match self.client.get(url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => Ok(()),
            Ok(resp) => Err(format!("status {}", resp.status())),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Build output paths that may be cached by the CDN, in purge order.
pub fn purge_targets(uploads: &UploadManager) -> io::Result<Vec<String>> {
    let mut targets: Vec<String> = STATIC_PURGE_PATHS.iter().map(|p| p.to_string()).collect();
    targets.extend(
        Collection::ALL
            .iter()
            .map(|c| format!("/data/{}", c.file_name())),
    );
    targets.extend(BRANDING_PURGE_PATHS.iter().map(|p| p.to_string()));

    for kind in AssetKind::ALL {
        for name in uploads.list_stored(kind)? {
            targets.push(format!("/{}/{}", kind.dir_name(), name));
        }
    }
    Ok(targets)
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
