//! Error types for technique adapters and manufacturer lookups

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse output: {0}")]
    Parse(String),
    #[error("Technique unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),
    #[error("Lookup failed: {0}")]
    Lookup(String),
}
