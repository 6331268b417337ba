//! Access token resolution.
//!
//! `GOOGLE_OAUTH_ACCESS_TOKEN` wins when set; otherwise the token comes from
//! `gcloud auth print-access-token`. The token is read at startup and again
//! whenever an API call is rejected with 401.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::TokenSource;
use crate::error::{PipelineError, Result};

/// Environment variable holding a ready-made OAuth access token
pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Path to the gcloud binary (overridable for unusual installs)
pub const GCLOUD_ENV: &str = "STT_INSIGHTS_GCLOUD";

/// Resolve a bearer token for the Google APIs
pub async fn access_token(wait: Duration) -> Result<String> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        let token = token.trim().to_string();
        if !token.is_empty() {
            debug!(source = TOKEN_ENV, "Using access token from environment");
            return Ok(token);
        }
    }

    let binary = std::env::var(GCLOUD_ENV).unwrap_or_else(|_| "gcloud".to_string());
    gcloud_token(&binary, wait).await
}

/// Tokens from the environment or gcloud, re-read on every request
pub struct GcloudTokens {
    wait: Duration,
}

impl GcloudTokens {
    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }
}

#[async_trait]
impl TokenSource for GcloudTokens {
    async fn token(&self) -> Result<String> {
        access_token(self.wait).await
    }
}

async fn gcloud_token(binary: &str, wait: Duration) -> Result<String> {
    let child = Command::new(binary)
        .args(["auth", "print-access-token"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            PipelineError::configuration(format!(
                "No {} set and '{}' could not be started: {}",
                TOKEN_ENV, binary, e
            ))
        })?;

    let output = timeout(wait, child.wait_with_output())
        .await
        .map_err(|_| {
            PipelineError::configuration(format!("'{}' timed out after {:?}", binary, wait))
        })?
        .map_err(|e| PipelineError::configuration(format!("'{}' failed: {}", binary, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::configuration(format!(
            "'{} auth print-access-token' exited with {}: {}",
            binary,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(PipelineError::configuration(format!(
            "'{}' printed an empty access token",
            binary
        )));
    }

    debug!(source = "gcloud", "Obtained access token");
    Ok(token)
}
