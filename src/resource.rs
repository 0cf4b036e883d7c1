//! Disk-space checks for the output volume.

use std::path::Path;

use sysinfo::Disks;
use tracing::{debug, warn};

/// Minimum free space required before starting a capture (100 MB).
pub const MIN_FREE_BYTES: u64 = 100 * 1024 * 1024;

/// Result of a disk space check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskSpaceStatus {
    /// Sufficient space available.
    Ok { available_bytes: u64 },
    /// Insufficient space.
    Insufficient {
        available_bytes: u64,
        required_bytes: u64,
    },
    /// Could not determine disk space for the path.
    Unknown,
}

impl DiskSpaceStatus {
    /// Whether recording may proceed.
    ///
    /// `Unknown` passes: a container without mount metadata should still
    /// record rather than skip every segment.
    pub fn is_sufficient(&self) -> bool {
        !matches!(self, DiskSpaceStatus::Insufficient { .. })
    }
}

/// Resource monitor answering free-space questions about the output volume.
#[derive(Debug, Default)]
pub struct ResourceMonitor {
    disks: Disks,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
        }
    }

    /// Refresh disk information.
    pub fn refresh(&mut self) {
        self.disks = Disks::new_with_refreshed_list();
    }

    /// Check free space on the volume holding `output_path`.
    pub fn check_disk_space(&mut self, output_path: &Path, required_bytes: u64) -> DiskSpaceStatus {
        self.refresh();

        match self.available_space_for_path(output_path) {
            Some(available_bytes) if available_bytes >= required_bytes => {
                debug!(
                    "Disk space OK: {} bytes available, {} bytes required",
                    available_bytes, required_bytes
                );
                DiskSpaceStatus::Ok { available_bytes }
            }
            Some(available_bytes) => {
                warn!(
                    "Insufficient disk space: {} bytes available, {} bytes required",
                    available_bytes, required_bytes
                );
                DiskSpaceStatus::Insufficient {
                    available_bytes,
                    required_bytes,
                }
            }
            None => {
                warn!(
                    "Could not determine disk space for path: {}",
                    output_path.display()
                );
                DiskSpaceStatus::Unknown
            }
        }
    }

    /// Get available space for a path.
    ///
    /// The disk with the longest matching mount point wins, so `/data/cam`
    /// resolves to `/data` rather than `/`.
    fn available_space_for_path(&self, path: &Path) -> Option<u64> {
        let path_str = path.to_string_lossy();
        let mut best_match: Option<(&sysinfo::Disk, usize)> = None;

        for disk in self.disks.list() {
            let mount_point = disk.mount_point().to_string_lossy();

            if path_str.starts_with(mount_point.as_ref()) {
                let mount_len = mount_point.len();
                if best_match.is_none_or(|(_, len)| mount_len > len) {
                    best_match = Some((disk, mount_len));
                }
            }
        }

        best_match.map(|(disk, _)| disk.available_space())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let ok = DiskSpaceStatus::Ok {
            available_bytes: 1000,
        };
        assert!(ok.is_sufficient());

        let insufficient = DiskSpaceStatus::Insufficient {
            available_bytes: 100,
            required_bytes: 1000,
        };
        assert!(!insufficient.is_sufficient());

        assert!(DiskSpaceStatus::Unknown.is_sufficient());
    }

    #[test]
    fn test_zero_requirement_never_blocks() {
        let mut monitor = ResourceMonitor::new();
        let status = monitor.check_disk_space(Path::new("/tmp"), 0);
        assert!(status.is_sufficient());
    }

    #[test]
    fn test_impossible_requirement_blocks_when_volume_known() {
        let mut monitor = ResourceMonitor::new();
        match monitor.check_disk_space(Path::new("/tmp"), u64::MAX) {
            DiskSpaceStatus::Insufficient { required_bytes, .. } => {
                assert_eq!(required_bytes, u64::MAX);
            }
            // No mount metadata in this environment; nothing to assert.
            DiskSpaceStatus::Unknown => {}
            DiskSpaceStatus::Ok { .. } => panic!("no disk can hold u64::MAX bytes"),
        }
    }
}
