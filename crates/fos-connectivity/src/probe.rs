//! Host network probe
//!
//! Connection type and reachability from the host's network interfaces.
//! Feeds a connectivity source that has no event API of its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use smol::Timer;

const SYSFS_NET: &str = "/sys/class/net";

/// Connection type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    #[default]
    Unknown,
    Ethernet,
    Wifi,
    Cellular,
    None,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ethernet => "ethernet",
            Self::Wifi => "wifi",
            Self::Cellular => "cellular",
            Self::None => "none",
        }
    }

    /// Infer from a kernel interface name
    fn from_interface(name: &str) -> Self {
        if name.starts_with("wl") {
            Self::Wifi
        } else if name.starts_with("en") || name.starts_with("eth") {
            Self::Ethernet
        } else if name.starts_with("ww") || name.starts_with("rmnet") {
            Self::Cellular
        } else {
            Self::Unknown
        }
    }
}

/// One probe reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSample {
    pub online: bool,
    pub connection_type: ConnectionType,
}

impl Default for NetworkSample {
    fn default() -> Self {
        // Without interface data, assume reachable like navigator.onLine does
        Self {
            online: true,
            connection_type: ConnectionType::Unknown,
        }
    }
}

/// Reads interface state from sysfs
#[derive(Debug, Clone)]
pub struct NetworkProbe {
    root: PathBuf,
}

impl NetworkProbe {
    pub fn new() -> Self {
        Self::with_root(SYSFS_NET)
    }

    /// Probe a different sysfs-style directory
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Take one reading. Any non-loopback interface that is up counts as
    /// online.
    pub fn sample(&self) -> NetworkSample {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!("Cannot read {}: {}", self.root.display(), err);
                return NetworkSample::default();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "lo")
            .collect();
        names.sort();

        let up = names.iter().find(|name| {
            std::fs::read_to_string(self.root.join(name).join("operstate"))
                .map(|state| state.trim() == "up")
                .unwrap_or(false)
        });

        match up {
            Some(name) => NetworkSample {
                online: true,
                connection_type: ConnectionType::from_interface(name),
            },
            None => NetworkSample {
                online: false,
                connection_type: ConnectionType::None,
            },
        }
    }

    /// Sample every `interval` and call `on_change` with the reachability
    /// whenever it flips. Runs until the returned future is dropped.
    pub async fn watch(self, interval: Duration, mut on_change: impl FnMut(bool) + Send) {
        let mut last = self.sample();
        on_change(last.online);

        loop {
            Timer::after(interval).await;
            let sample = self.sample();
            if sample.online != last.online {
                tracing::info!(
                    online = sample.online,
                    connection = sample.connection_type.as_str(),
                    "Network reachability changed"
                );
                on_change(sample.online);
            }
            last = sample;
        }
    }
}

impl Default for NetworkProbe {
    fn default() -> Self {
        Self::new()
    }
}
