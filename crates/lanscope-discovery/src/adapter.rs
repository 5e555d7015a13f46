//! The seam between the engine and individual discovery techniques

use async_trait::async_trait;
use lanscope_core::{RawObservation, Technique};
use std::net::Ipv4Addr;
use tracing::trace;

use crate::error::AdapterError;
use crate::netinfo::{LocalHost, Subnet};
use crate::scanner::ScanMode;

/// What an adapter may know about the scan it runs in
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub mode: ScanMode,
    pub local: Option<LocalHost>,
    /// Network to sweep, when one could be determined
    pub target: Option<Subnet>,
    /// Addresses already aggregated by earlier stages, in discovery order
    pub known_ips: Vec<Ipv4Addr>,
}

/// One discovery technique.
///
/// Implementations must be safe to abandon: the stage runner stops awaiting
/// `invoke` when its deadline passes and does not cancel work that was
/// already handed to the operating system.
#[async_trait]
pub trait TechniqueAdapter: Send + Sync {
    fn technique(&self) -> Technique;

    /// Human-readable form of what is executed, shown in progress events
    fn command(&self) -> String;

    async fn invoke(&self, ctx: &ScanContext) -> Result<Vec<RawObservation>, AdapterError>;
}

/// Run an external command and return its stdout
pub async fn run_command(program: &str, args: &[&str]) -> Result<String, AdapterError> {
    trace!(program = program, args = ?args, "Running command");
    let output = tokio::process::Command::new(program).args(args).output().await?;

    if !output.status.success() {
        return Err(AdapterError::Command {
            command: format!("{} {}", program, args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check whether a program is on the PATH
pub async fn is_command_available(program: &str) -> bool {
    tokio::process::Command::new("which")
        .arg(program)
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}
