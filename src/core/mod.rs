pub mod cmd;
pub mod devices;
pub mod disk_ops;
pub mod format;
pub mod job;

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// A block device as reported by one enumeration pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockDevice {
    /// Kernel device name (e.g. `sdb`, `nvme0n1p1`)
    pub name: String,
    pub size: String,
    pub model: String,
    pub vendor: String,
    pub label: String,
    pub kind: DeviceKind,
    pub hotplug: bool,
    pub removable: bool,
    pub mount_points: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Disk,
    Partition,
    Other,
}

impl DeviceKind {
    pub fn from_lsblk(value: &str) -> Self {
        match value {
            "disk" => DeviceKind::Disk,
            "part" => DeviceKind::Partition,
            _ => DeviceKind::Other,
        }
    }
}

/// Facts derived from a device at the moment they are asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DeviceClassification {
    pub is_removable_or_usb: bool,
    pub is_system_drive: bool,
}

/// One selectable row of the device list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayEntry {
    pub text: String,
    pub device: BlockDevice,
    pub classification: DeviceClassification,
}

/// Supported filesystem types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemType {
    Fat32,
    ExFat,
    Ntfs,
    Ext4,
}

impl FileSystemType {
    /// Token shown to the user and accepted by `format::normalize_format`
    pub fn token(&self) -> &'static str {
        match self {
            FileSystemType::Fat32 => "fat32",
            FileSystemType::ExFat => "exfat",
            FileSystemType::Ntfs => "ntfs",
            FileSystemType::Ext4 => "ext4",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FileSystemType::Fat32 => "FAT32",
            FileSystemType::ExFat => "exFAT",
            FileSystemType::Ntfs => "NTFS",
            FileSystemType::Ext4 => "ext4",
        }
    }

    pub fn options() -> Vec<FileSystemType> {
        vec![
            FileSystemType::Fat32,
            FileSystemType::ExFat,
            FileSystemType::Ntfs,
            FileSystemType::Ext4,
        ]
    }
}

/// Partition table written by the helper when partitioning is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionScheme {
    Msdos,
    Gpt,
}

impl PartitionScheme {
    pub fn display_name(&self) -> &'static str {
        match self {
            PartitionScheme::Msdos => "MSDOS",
            PartitionScheme::Gpt => "GPT",
        }
    }

    pub fn options() -> Vec<PartitionScheme> {
        vec![PartitionScheme::Msdos, PartitionScheme::Gpt]
    }
}

/// Problems with what the user selected; fixable by changing the selection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please select a USB device to format")]
    NoDeviceSelected,

    #[error("Device is no longer available: {0}")]
    UnknownDevice(String),

    #[error("Refusing to format system drive: {0}")]
    SystemDrive(String),

    #[error("The volume label '{label}' is not valid for {format}. Allowed characters: {allowed}; at most {max_len} characters")]
    InvalidLabel {
        label: String,
        format: String,
        allowed: &'static str,
        max_len: usize,
    },
}

/// Errors that can occur during disk operations
#[derive(Error, Debug)]
pub enum DiskError {
    #[error("Enumeration failed: {0}")]
    Enumeration(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Library file not found: {}", .0.display())]
    MissingHelper(PathBuf),

    #[error("A process is already running on this runner")]
    AlreadyRunning,

    #[error("A format job is already in progress")]
    JobBusy,

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Why a format job ended without success
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    #[error("Helper exited with code {code}")]
    Exit { code: i32, detail: String },

    #[error("Helper terminated abnormally")]
    Crashed { detail: String },

    #[error("Formatting was cancelled")]
    Cancelled,

    #[error("Could not start helper: {0}")]
    Spawn(String),
}

impl JobFailure {
    /// Captured stderr attached to the failure, if any
    pub fn detail(&self) -> &str {
        match self {
            JobFailure::Exit { detail, .. } | JobFailure::Crashed { detail } => detail,
            JobFailure::Cancelled | JobFailure::Spawn(_) => "",
        }
    }
}

/// Application state machine
#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    Idle,
    EditingLabel,
    ConfirmDestructive(String),
    Output,
    Error(String),
    Success(String),
}
