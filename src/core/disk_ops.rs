use std::path::PathBuf;

use async_trait::async_trait;

use super::DiskError;

/// Raw access to the OS block-device layer.
///
/// Every method maps to a single query; interpretation of the answers lives
/// in `core::devices` so it can be exercised against a scripted probe.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    /// Block-device listing, one `KEY="value"` line per device.
    /// Partitions are only included when `include_partitions` is set.
    async fn list_block_devices(&self, include_partitions: bool) -> Result<String, DiskError>;

    /// Contents of the device's `removable` attribute
    async fn removable_attribute(&self, name: &str) -> Result<String, DiskError>;

    /// `KEY=value` property dump for the device
    async fn device_properties(&self, name: &str) -> Result<String, DiskError>;

    /// Canonical sysfs path of the device
    async fn sysfs_path(&self, name: &str) -> Result<PathBuf, DiskError>;

    /// Current mount table in `/proc/mounts` format
    async fn mount_table(&self) -> Result<String, DiskError>;

    /// Blocks until pending device events are processed
    async fn settle(&self);

    /// Checks if running with elevated privileges (root/admin)
    fn has_privileges(&self) -> bool;
}
