use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::DiskError;
use crate::core::cmd::Cmd;
use crate::core::disk_ops::SystemProbe;
use crate::utils::is_root;

/// Major numbers of IDE/SCSI/USB, MMC, NVMe and virtio-blk devices
const DEVICE_CLASSES: &str = "3,8,22,179,259";
const LSBLK_COLUMNS: &str = "NAME,SIZE,MODEL,VENDOR,TYPE,HOTPLUG,RM,LABEL,MOUNTPOINT";

const LSBLK_TIMEOUT: Duration = Duration::from_secs(5);
const UDEVADM_TIMEOUT: Duration = Duration::from_secs(3);
const MOUNTS_TIMEOUT: Duration = Duration::from_secs(3);

/// Linux probe using lsblk, udevadm, sysfs and /proc/self/mounts
pub struct LinuxProbe;

impl LinuxProbe {
    pub fn new() -> Self {
        Self
    }
}

/// Runs a short query command, giving up after `limit`
async fn capture(program: &str, args: &[&str], limit: Duration) -> Result<String, DiskError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = timeout(limit, output).await.map_err(|_| {
        DiskError::Enumeration(format!("{program} timed out after {}s", limit.as_secs()))
    })??;

    if !output.status.success() {
        return Err(DiskError::CommandFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[async_trait]
impl SystemProbe for LinuxProbe {
    async fn list_block_devices(&self, include_partitions: bool) -> Result<String, DiskError> {
        let mut args = vec!["-n", "-P", "-o", LSBLK_COLUMNS, "-I", DEVICE_CLASSES];
        if !include_partitions {
            args.push("-d");
        }
        capture("lsblk", &args, LSBLK_TIMEOUT).await
    }

    async fn removable_attribute(&self, name: &str) -> Result<String, DiskError> {
        let path = format!("/sys/block/{name}/removable");
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn device_properties(&self, name: &str) -> Result<String, DiskError> {
        let name_arg = format!("--name={name}");
        capture(
            "udevadm",
            &["info", "--query=property", &name_arg],
            UDEVADM_TIMEOUT,
        )
        .await
    }

    async fn sysfs_path(&self, name: &str) -> Result<PathBuf, DiskError> {
        // /sys/class/block also has entries for partitions, /sys/block does not
        let path = format!("/sys/class/block/{name}");
        Ok(tokio::fs::canonicalize(path).await?)
    }

    async fn mount_table(&self) -> Result<String, DiskError> {
        timeout(MOUNTS_TIMEOUT, tokio::fs::read_to_string("/proc/self/mounts"))
            .await
            .map_err(|_| DiskError::Enumeration("reading mount table timed out".to_string()))?
            .map_err(DiskError::from)
    }

    async fn settle(&self) {
        let args = ["settle".to_string(), "--timeout=5".to_string()];
        if !Cmd::new().run("udevadm", &args, true).await {
            tracing::debug!("udevadm settle did not complete cleanly");
        }
    }

    fn has_privileges(&self) -> bool {
        is_root()
    }
}
