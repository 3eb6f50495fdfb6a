//! Host identity: persistent device id and hardware fingerprint

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use spectre_protocol::Fingerprint;

use crate::net;

/// Environment variable overriding the directory the identity file lives under
pub const AGENT_HOME_ENV: &str = "SPECTRE_AGENT_HOME";

/// Length of a generated device id in bytes (before hex encoding)
const DEVICE_ID_BYTES: usize = 16;

/// Persisted identity of this agent installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
}

/// Path of the identity file: `$SPECTRE_AGENT_HOME/.spectre-agent/device-info.json`,
/// with the user's home directory as the fallback base
pub fn device_info_path() -> io::Result<PathBuf> {
    let base = match std::env::var_os(AGENT_HOME_ENV) {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => dirs::home_dir().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "Could not find home directory")
        })?,
    };
    Ok(base.join(".spectre-agent").join("device-info.json"))
}

/// Load the device id, generating and persisting one on first run
pub fn ensure_device_info() -> io::Result<DeviceInfo> {
    ensure_device_info_at(&device_info_path()?)
}

/// Like [`ensure_device_info`] but at an explicit path
pub fn ensure_device_info_at(path: &Path) -> io::Result<DeviceInfo> {
    if let Ok(data) = fs::read(path) {
        match serde_json::from_slice::<DeviceInfo>(&data) {
            Ok(info) if !info.device_id.is_empty() => return Ok(info),
            _ => tracing::warn!("Ignoring unreadable device info at {:?}", path),
        }
    }

    let info = DeviceInfo {
        device_id: generate_device_id(),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let payload = serde_json::to_vec_pretty(&info).map_err(io::Error::other)?;
    fs::write(path, payload)?;
    tracing::info!("Generated new device id at {:?}", path);
    Ok(info)
}

fn generate_device_id() -> String {
    let mut bytes = [0u8; DEVICE_ID_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Gather hostname, machine id, MACs and NIC names, and digest them
pub fn collect_fingerprint() -> Fingerprint {
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let machine_id = read_file_trim(Path::new("/etc/machine-id"));
    let (mac_addresses, nics) = list_interfaces();
    let fingerprint = compute_fingerprint(&hostname, &machine_id, &mac_addresses, &nics);

    Fingerprint {
        hostname,
        machine_id,
        mac_addresses,
        nics,
        fingerprint,
    }
}

/// Hex SHA-256 over the identifying fields
pub fn compute_fingerprint(hostname: &str, machine_id: &str, macs: &[String], nics: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    hasher.update(machine_id.as_bytes());
    hasher.update(macs.join(",").as_bytes());
    hasher.update(nics.join(",").as_bytes());
    hex::encode(hasher.finalize())
}

/// Read a file and trim whitespace; empty string if it can't be read
pub fn read_file_trim(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// MAC addresses and NIC names. Linux exposes both under `/sys/class/net`;
/// elsewhere only the names of interfaces with addresses are available.
fn list_interfaces() -> (Vec<String>, Vec<String>) {
    let sys = Path::new("/sys/class/net");
    let Ok(entries) = fs::read_dir(sys) else {
        return (Vec::new(), net::interface_names());
    };

    let mut nics: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    nics.sort();

    let macs = nics
        .iter()
        .map(|nic| read_file_trim(&sys.join(nic).join("address")))
        .filter(|mac| !mac.is_empty() && mac != "00:00:00:00:00:00")
        .collect();

    (macs, nics)
}
