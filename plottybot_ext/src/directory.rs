use crate::protocol::{DeviceEntry, DEVICES_PATH};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const LOADING_LABEL: &str = "Loading…";
pub const EMPTY_LABEL: &str = "No Devices Found";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("device list request failed: status={status} body={body}")]
    BadStatus { status: StatusCode, body: String },
    #[error("device list parse failed: {0}")]
    Parse(String),
    #[error("device list is not a name to address mapping")]
    NotAMapping,
    #[error("bad discovery url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectionError {
    #[error("device index {index} out of range 1..={count}")]
    IndexOutOfRange { index: f64, count: usize },
    #[error("unknown device: {0}")]
    UnknownDevice(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    pub text: String,
    pub value: String,
}

/// Device names and addresses, in the order the discovery endpoint listed them.
///
/// Replaced wholesale on each successful refresh, never edited in place.
#[derive(Debug, Clone, Default)]
pub struct DeviceDirectory {
    loaded: bool,
    entries: Vec<DeviceEntry>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, entries: Vec<DeviceEntry>) {
        self.entries = entries;
        self.loaded = true;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }

    pub fn menu_items(&self) -> MenuItems<'_> {
        let mode = if !self.loaded {
            MenuMode::Placeholder(LOADING_LABEL)
        } else if self.entries.is_empty() {
            MenuMode::Placeholder(EMPTY_LABEL)
        } else {
            MenuMode::Entries
        };
        MenuItems {
            entries: &self.entries,
            mode,
            pos: 0,
        }
    }

    /// `index` is 1-based and must be a whole number.
    pub fn resolve_by_index(&self, index: f64) -> Result<&DeviceEntry, SelectionError> {
        let count = self.entries.len();
        let out_of_range = SelectionError::IndexOutOfRange { index, count };
        if !index.is_finite() || index.fract() != 0.0 || index < 1.0 || index > count as f64 {
            return Err(out_of_range);
        }
        self.entries.get(index as usize - 1).ok_or(out_of_range)
    }

    pub fn resolve_by_name(&self, name: &str) -> Result<&DeviceEntry, SelectionError> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| SelectionError::UnknownDevice(name.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
enum MenuMode {
    Placeholder(&'static str),
    Entries,
}

/// Lazy menu listing; clone it to walk the menu again.
#[derive(Debug, Clone)]
pub struct MenuItems<'a> {
    entries: &'a [DeviceEntry],
    mode: MenuMode,
    pos: usize,
}

impl Iterator for MenuItems<'_> {
    type Item = MenuItem;

    fn next(&mut self) -> Option<MenuItem> {
        match self.mode {
            MenuMode::Placeholder(label) => {
                if self.pos > 0 {
                    return None;
                }
                self.pos = 1;
                Some(MenuItem {
                    text: label.to_string(),
                    value: label.to_string(),
                })
            }
            MenuMode::Entries => {
                let entry = self.entries.get(self.pos)?;
                self.pos += 1;
                Some(MenuItem {
                    text: entry.name.clone(),
                    value: entry.name.clone(),
                })
            }
        }
    }
}

/// Parses a discovery body. Entries whose address is not a string are skipped.
pub fn parse_device_list(body: &str) -> Result<Vec<DeviceEntry>, DiscoveryError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| DiscoveryError::Parse(e.to_string()))?;
    let serde_json::Value::Object(map) = value else {
        return Err(DiscoveryError::NotAMapping);
    };
    let mut entries = Vec::with_capacity(map.len());
    for (name, address) in map {
        match address {
            serde_json::Value::String(address) => entries.push(DeviceEntry { name, address }),
            other => warn!(%name, value = %other, "skipping device with non-string address"),
        }
    }
    Ok(entries)
}

#[derive(Debug, Clone)]
pub struct DirectoryClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl DirectoryClient {
    pub fn new(origin: &Url, timeout: Duration) -> Result<Self, DiscoveryError> {
        let endpoint = origin.join(DEVICES_PATH)?;
        // Discovery lives on the local network; never route it through a proxy.
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn fetch(&self) -> Result<Vec<DeviceEntry>, DiscoveryError> {
        debug!(url = %self.endpoint, "fetching device list");
        let resp = self.http.get(self.endpoint.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DiscoveryError::BadStatus { status, body });
        }
        let body = resp.text().await?;
        let entries = parse_device_list(&body)?;
        debug!(count = entries.len(), "device list fetched");
        Ok(entries)
    }
}
