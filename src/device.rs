//! Device descriptors as served by the inventory service.
//!
//! The inventory groups devices by gateway:
//!
//! ```json
//! {
//!   "10.128.1.11": [
//!     {"prefix": "SI-01SA:VA-SIP20-BG",
//!      "channels": {"C1": {"prefix": "SI-01SA:VA-SIP20-ED"}, "C2": {"prefix": "SI-01SA:VA-SIP20-MD"}}}
//!   ]
//! }
//! ```
//!
//! The sequencing core only ever sees the flattened `Vec<DeviceDescriptor>`.

use crate::error::{AppResult, PumpError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One channel of a pump controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// PV prefix of the channel
    pub prefix: String,
}

/// One pump controller and its channels.
///
/// Channels live in a `BTreeMap` so every pass over them uses the same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// PV prefix of the controller
    pub prefix: String,
    /// Channel name -> channel descriptor
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelDescriptor>,
}

/// Raw inventory response: gateway -> devices behind it.
pub type Inventory = BTreeMap<String, Vec<DeviceDescriptor>>;

impl DeviceDescriptor {
    /// Build a descriptor from a prefix and `(channel name, channel prefix)` pairs.
    pub fn new<I, N, P>(prefix: impl Into<String>, channels: I) -> Self
    where
        I: IntoIterator<Item = (N, P)>,
        N: Into<String>,
        P: Into<String>,
    {
        Self {
            prefix: prefix.into(),
            channels: channels
                .into_iter()
                .map(|(name, prefix)| {
                    (
                        name.into(),
                        ChannelDescriptor {
                            prefix: prefix.into(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Channel prefixes in iteration order.
    pub fn channel_prefixes(&self) -> impl Iterator<Item = &str> {
        self.channels.values().map(|ch| ch.prefix.as_str())
    }

    /// Name of the PV selecting STEP/FIXED mode on this controller.
    pub fn mode_pv(&self) -> String {
        format!("{}:Step-SP_Backend", self.prefix)
    }
}

/// Name of the voltage target PV for a channel prefix.
pub fn voltage_target_pv(channel_prefix: &str) -> String {
    format!("{}:VoltageTarget-SP", channel_prefix)
}

/// Flatten gateway -> devices into a single list, gateway order first.
pub fn flatten_inventory(inventory: Inventory) -> Vec<DeviceDescriptor> {
    inventory.into_values().flatten().collect()
}

/// Keep devices whose prefix contains `filter`. An empty filter keeps everything.
pub fn filter_by_prefix(devices: &[DeviceDescriptor], filter: &str) -> Vec<DeviceDescriptor> {
    devices
        .iter()
        .filter(|d| filter.is_empty() || d.prefix.contains(filter))
        .cloned()
        .collect()
}

/// Pick the devices named in `prefixes`, in the order given.
///
/// # Errors
///
/// Any prefix not present in `devices` is an unexpected error.
pub fn select_by_prefix(
    devices: &[DeviceDescriptor],
    prefixes: &[String],
) -> AppResult<Vec<DeviceDescriptor>> {
    prefixes
        .iter()
        .map(|wanted| {
            devices
                .iter()
                .find(|d| &d.prefix == wanted)
                .cloned()
                .ok_or_else(|| {
                    PumpError::Unexpected(format!("device '{}' not found in directory", wanted))
                })
        })
        .collect()
}

/// Reject descriptors the sequencer cannot address.
///
/// Empty device or channel prefixes, and a device appearing twice (it would get two
/// concurrent sequencers), are malformed.
pub fn validate_descriptors(devices: &[DeviceDescriptor]) -> AppResult<()> {
    let mut seen = HashSet::new();
    for device in devices {
        if device.prefix.trim().is_empty() {
            return Err(PumpError::Unexpected(
                "malformed device descriptor: empty prefix".to_string(),
            ));
        }
        if !seen.insert(device.prefix.as_str()) {
            return Err(PumpError::Unexpected(format!(
                "malformed run: device '{}' listed more than once",
                device.prefix
            )));
        }
        if let Some((name, _)) = device
            .channels
            .iter()
            .find(|(_, ch)| ch.prefix.trim().is_empty())
        {
            return Err(PumpError::Unexpected(format!(
                "malformed device descriptor '{}': channel '{}' has an empty prefix",
                device.prefix, name
            )));
        }
    }
    Ok(())
}
