//! Where device descriptors come from.
//!
//! The sequencing core never fetches anything itself. Callers pick a
//! [`DeviceDirectory`], fetch once, filter, and hand the resulting descriptors to
//! the orchestrator.

use crate::config::DirectoryConfig;
use crate::device::{flatten_inventory, DeviceDescriptor, Inventory};
use crate::error::{AppResult, PumpError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Source of device descriptors.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Fetch every known device.
    async fn fetch(&self) -> AppResult<Vec<DeviceDescriptor>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Inventory service reached over HTTP(S).
///
/// Issues `GET {url}?type={device_type}` and expects the gateway-grouped JSON
/// document described in [`crate::device`]. The service runs with a self-signed
/// certificate on the control network, so certificate checks are disabled.
pub struct HttpDirectory {
    client: reqwest::Client,
    url: String,
    device_type: String,
}

impl HttpDirectory {
    /// Build a client for the configured endpoint.
    pub fn new(config: &DirectoryConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| PumpError::Directory(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            device_type: config.device_type.clone(),
        })
    }
}

#[async_trait]
impl DeviceDirectory for HttpDirectory {
    async fn fetch(&self) -> AppResult<Vec<DeviceDescriptor>> {
        debug!(url = %self.url, device_type = %self.device_type, "querying inventory");
        let inventory: Inventory = self
            .client
            .get(&self.url)
            .query(&[("type", self.device_type.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PumpError::Directory(format!("{}: {}", self.url, e)))?
            .json()
            .await
            .map_err(|e| PumpError::Directory(format!("{}: invalid inventory: {}", self.url, e)))?;

        let devices = flatten_inventory(inventory);
        info!(count = devices.len(), "inventory loaded");
        Ok(devices)
    }

    fn describe(&self) -> String {
        format!("{}?type={}", self.url, self.device_type)
    }
}

/// Inventory document as the service serves it, or a plain list of descriptors.
#[derive(Deserialize)]
#[serde(untagged)]
enum InventoryDocument {
    Grouped(Inventory),
    Flat(Vec<DeviceDescriptor>),
}

/// Inventory saved to a JSON file.
pub struct JsonFileDirectory {
    path: PathBuf,
}

impl JsonFileDirectory {
    /// Read descriptors from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DeviceDirectory for JsonFileDirectory {
    async fn fetch(&self) -> AppResult<Vec<DeviceDescriptor>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| PumpError::Directory(format!("{}: {}", self.path.display(), e)))?;
        let document: InventoryDocument = serde_json::from_str(&text)
            .map_err(|e| PumpError::Directory(format!("{}: {}", self.path.display(), e)))?;

        Ok(match document {
            InventoryDocument::Grouped(inventory) => flatten_inventory(inventory),
            InventoryDocument::Flat(devices) => devices,
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Whitespace-separated device list, one controller per line:
///
/// ```text
/// # controller    channels...
/// SI-01SA:VA-SIP20-BG  SI-01SA:VA-SIP20-ED SI-01SA:VA-SIP20-MD
/// ```
///
/// Channels are named `C1`, `C2`, ... in the order given. Blank lines and lines
/// starting with `#` are ignored.
pub struct DeviceListFile {
    path: PathBuf,
}

impl DeviceListFile {
    /// Read the list at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Parse the contents of a device list file.
pub fn parse_device_list(text: &str) -> Vec<DeviceDescriptor> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let prefix = fields.next()?;
            let channels = fields
                .enumerate()
                .map(|(i, ch)| (format!("C{}", i + 1), ch.to_string()));
            Some(DeviceDescriptor::new(prefix, channels))
        })
        .collect()
}

#[async_trait]
impl DeviceDirectory for DeviceListFile {
    async fn fetch(&self) -> AppResult<Vec<DeviceDescriptor>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| PumpError::Directory(format!("{}: {}", self.path.display(), e)))?;
        Ok(parse_device_list(&text))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fixed in-memory set of descriptors.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    devices: Vec<DeviceDescriptor>,
}

impl StaticDirectory {
    /// Serve `devices` as given.
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl DeviceDirectory for StaticDirectory {
    async fn fetch(&self) -> AppResult<Vec<DeviceDescriptor>> {
        Ok(self.devices.clone())
    }

    fn describe(&self) -> String {
        format!("{} static device(s)", self.devices.len())
    }
}
