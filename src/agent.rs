//! Optional launch of the external tunnel agent.
//!
//! Deployments that sit behind an egress tunnel ship an agent binary next
//! to the relay. When a token is configured the agent is started once at
//! startup and then left alone: it is an opaque process, not supervised,
//! and its output is discarded.

use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

use crate::config::AgentConfig;

pub fn spawn_agent(config: &AgentConfig) -> Result<()> {
    let Some(token) = config.token.as_deref() else {
        return Ok(());
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(&config.binary) {
            let mut permissions = metadata.permissions();
            permissions.set_mode(permissions.mode() | 0o111);
            let _ = std::fs::set_permissions(&config.binary, permissions);
        }
    }

    let child = Command::new(&config.binary)
        .args([
            "tunnel",
            "--edge-ip-version",
            "auto",
            "--no-autoupdate",
            "--protocol",
            "http2",
            "run",
            "--token",
            token,
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to launch tunnel agent: {}", config.binary))?;

    info!(binary = %config.binary, pid = child.id(), "Tunnel agent started");
    // The child handle is dropped; the agent keeps running on its own.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_token_is_a_no_op() {
        let config = AgentConfig {
            binary: "/nonexistent/agent".to_string(),
            token: None,
        };
        assert!(spawn_agent(&config).is_ok());
    }

    #[tokio::test]
    async fn missing_binary_fails_when_token_is_set() {
        let config = AgentConfig {
            binary: "/nonexistent/agent".to_string(),
            token: Some("token".to_string()),
        };
        assert!(spawn_agent(&config).is_err());
    }
}
