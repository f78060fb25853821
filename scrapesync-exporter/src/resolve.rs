use std::{process::Stdio, time::Duration};

use serde_yaml::Value;
use tokio::process::Command;
use tracing::{debug, trace};

/// Resolves the network address of the monitored system's instance by
/// running an inventory command that prints a YAML document keyed by
/// instance name, e.g. `juju show-unit prometheus/0`.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    command: Vec<String>,
    static_address: Option<String>,
    timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("inventory command is empty")]
    EmptyCommand,
    #[error("failed to run inventory command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("inventory command did not finish within {0:?}")]
    Timeout(Duration),
    #[error("inventory command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
    #[error("inventory output is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("no address for instance {0:?} in inventory output")]
    MissingAddress(String),
}

impl AddressResolver {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            static_address: None,
            timeout,
        }
    }

    /// Skip the inventory command and always answer `address`.
    pub fn fixed(address: impl Into<String>) -> Self {
        Self {
            command: Vec::new(),
            static_address: Some(address.into()),
            timeout: Duration::ZERO,
        }
    }

    pub async fn resolve(&self, instance: &str) -> Result<String, ResolveError> {
        if let Some(address) = &self.static_address {
            return Ok(address.clone());
        }

        let (program, args) = self.command.split_first().ok_or(ResolveError::EmptyCommand)?;
        debug!(program, ?args, instance, "running inventory command");

        let output = Command::new(program)
            .args(args)
            .arg(instance)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| ResolveError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(ResolveError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!("inventory output: {stdout:?}");

        address_from_inventory(&stdout, instance)
    }
}

fn address_from_inventory(doc: &str, instance: &str) -> Result<String, ResolveError> {
    let doc: Value = serde_yaml::from_str(doc)?;

    doc.get(instance)
        .and_then(|unit| unit.get("address"))
        .and_then(Value::as_str)
        .filter(|addr| !addr.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ResolveError::MissingAddress(instance.to_owned()))
}
