//! Hardware and OS inventory via sysinfo

use std::path::Path;

use sysinfo::{Disks, System};

use spectre_protocol::SystemInfo;

/// Collect the static inventory. Blocking; run it off the async workers.
pub fn collect_system_info() -> SystemInfo {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_all();

    let cpu = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .unwrap_or_default();
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or_else(|_| sys.cpus().len());
    let (disk_total_bytes, disk_free_bytes) = root_disk_usage();

    SystemInfo {
        os: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
        version: System::os_version().unwrap_or_default(),
        arch: std::env::consts::ARCH.to_string(),
        cpu,
        cores,
        memory_bytes: sys.total_memory(),
        disk_total_bytes,
        disk_free_bytes,
    }
}

/// Total and available bytes of the disk holding the root filesystem,
/// or of the first disk when no root mount is listed
fn root_disk_usage() -> (u64, u64) {
    let disks = Disks::new_with_refreshed_list();
    let root = if cfg!(windows) { Path::new("C:\\") } else { Path::new("/") };

    disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == root)
        .or_else(|| disks.list().first())
        .map(|disk| (disk.total_space(), disk.available_space()))
        .unwrap_or((0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_has_basics() {
        let info = collect_system_info();
        assert!(!info.os.is_empty());
        assert_eq!(info.arch, std::env::consts::ARCH);
        assert!(info.cores >= 1);
        assert!(info.disk_free_bytes <= info.disk_total_bytes);
    }
}
