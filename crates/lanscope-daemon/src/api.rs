//! REST API handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use lanscope_discovery::{ScanMode, Subnet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::state::{AppState, ScanError};

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// Devices found by the most recent scan
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.devices().await)
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub mode: Option<ScanMode>,
}

/// Run a scan and return its ranked device list
pub async fn trigger_scan(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ScanRequest>>,
) -> impl IntoResponse {
    let mode = body.and_then(|Json(req)| req.mode);
    info!(mode = ?mode, "Manual scan triggered");

    match state.run_scan(mode).await {
        Ok(devices) => Json(serde_json::json!({
            "status": "completed",
            "mode": mode.unwrap_or(state.config.daemon.default_mode),
            "count": devices.len(),
            "devices": devices,
        }))
        .into_response(),
        Err(e @ ScanError::InProgress) => {
            (StatusCode::CONFLICT, Json(ApiError::new(e.to_string()))).into_response()
        }
    }
}

/// Get current configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.clone())
}

/// Network interface info for the UI
#[derive(Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub ip: String,
    pub mac: Option<String>,
    pub subnet: String,
    pub prefix_len: u8,
}

/// List IPv4 interfaces a scan could run from
pub async fn list_interfaces() -> impl IntoResponse {
    use network_interface::{NetworkInterface, NetworkInterfaceConfig};

    let interfaces: Vec<InterfaceInfo> = NetworkInterface::show()
        .unwrap_or_default()
        .into_iter()
        .filter(|iface| {
            !iface.name.starts_with("lo")
                && !iface.name.starts_with("docker")
                && !iface.name.starts_with("br-")
                && !iface.name.starts_with("veth")
        })
        .filter_map(|iface| {
            iface.addr.iter().find_map(|addr| match addr {
                network_interface::Addr::V4(v4) if !v4.ip.is_loopback() => {
                    let prefix_len = v4
                        .netmask
                        .map(|m| u32::from(m).count_ones() as u8)
                        .unwrap_or(24);
                    Some(InterfaceInfo {
                        name: iface.name.clone(),
                        ip: v4.ip.to_string(),
                        mac: iface.mac_addr.clone(),
                        subnet: Subnet::new(v4.ip, prefix_len).to_string(),
                        prefix_len,
                    })
                }
                _ => None,
            })
        })
        .collect();

    Json(interfaces)
}
