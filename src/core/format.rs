use std::path::PathBuf;

use super::cmd::command_line;
use super::{DiskError, DisplayEntry, ValidationError};

/// Where the privileged formatting helper is installed
pub const DEFAULT_HELPER_PATH: &str = "/usr/local/lib/formatusb/formatusb_lib";

pub const PRIMARY_WRAPPER: &str = "pkexec";
pub const FALLBACK_WRAPPER: &str = "gksu";

/// Partition-scheme token meaning "single filesystem, no partition table"
pub const NO_PARTITION_TABLE: &str = "part";

/// A fully validated invocation of the formatting helper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRequest {
    pub device: String,
    /// Filesystem driver name handed to the helper (`vfat`, `ext4`, ...)
    pub format: String,
    pub label: String,
    pub partition_scheme: String,
    /// Privilege-escalation program, `None` when already root
    pub wrapper: Option<String>,
    pub helper: PathBuf,
}

impl FormatRequest {
    /// The four positional helper arguments
    pub fn helper_args(&self) -> Vec<String> {
        vec![
            self.device.clone(),
            self.format.clone(),
            self.label.clone(),
            self.partition_scheme.clone(),
        ]
    }

    /// Program actually spawned: the wrapper if there is one, else the helper
    pub fn program(&self) -> String {
        match &self.wrapper {
            Some(wrapper) => wrapper.clone(),
            None => self.helper.display().to_string(),
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(5);
        if self.wrapper.is_some() {
            args.push(self.helper.display().to_string());
        }
        args.extend(self.helper_args());
        args
    }

    /// Human-readable command line, every argument quoted
    pub fn command_line(&self) -> String {
        command_line(&self.program(), &self.args())
    }
}

/// What the user picked on the options page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSelection {
    /// Display text of the selected device entry
    pub entry: String,
    /// Filesystem token as chosen (`fat32`, `ext4`, ...)
    pub format: String,
    pub label: String,
    pub partition_scheme: String,
    pub partitioning_enabled: bool,
}

/// Turns a `FormatSelection` into a `FormatRequest`
pub struct FormatCommandBuilder {
    helper: PathBuf,
    is_root: bool,
    wrapper_exists: fn(&str) -> bool,
}

impl FormatCommandBuilder {
    pub fn new(helper: PathBuf, is_root: bool) -> Self {
        Self {
            helper,
            is_root,
            wrapper_exists: wrapper_available,
        }
    }

    /// Replace the lookup used to decide which wrapper is installed
    #[cfg(test)]
    pub fn with_wrapper_lookup(mut self, wrapper_exists: fn(&str) -> bool) -> Self {
        self.wrapper_exists = wrapper_exists;
        self
    }

    /// Validates the selection against the current device list and assembles
    /// the helper invocation.
    pub fn build(
        &self,
        entries: &[DisplayEntry],
        selection: &FormatSelection,
    ) -> Result<FormatRequest, DiskError> {
        let device = device_name_from_entry(&selection.entry)
            .ok_or(ValidationError::NoDeviceSelected)?;

        let entry = entries
            .iter()
            .find(|entry| entry.device.name == device)
            .ok_or_else(|| ValidationError::UnknownDevice(device.clone()))?;
        if entry.classification.is_system_drive {
            return Err(ValidationError::SystemDrive(device).into());
        }

        validate_label(&selection.label, &selection.format)?;

        let format = normalize_format(&selection.format);
        let partition_scheme = if selection.partitioning_enabled {
            selection.partition_scheme.to_lowercase()
        } else {
            NO_PARTITION_TABLE.to_string()
        };
        let wrapper = resolve_wrapper(self.is_root, self.wrapper_exists);

        if !self.helper.exists() {
            tracing::error!(helper = %self.helper.display(), "Formatting helper is missing");
            return Err(DiskError::MissingHelper(self.helper.clone()));
        }

        let request = FormatRequest {
            device,
            format,
            label: selection.label.clone(),
            partition_scheme,
            wrapper,
            helper: self.helper.clone(),
        };

        tracing::info!(
            device = %request.device,
            format = %request.format,
            label = %request.label,
            "Format request built"
        );
        tracing::info!("Options: {}", request.command_line());

        Ok(request)
    }
}

/// First whitespace-delimited token of a display entry, parentheses removed
pub fn device_name_from_entry(entry: &str) -> Option<String> {
    let token = entry.split_whitespace().next()?;
    let name: String = token.chars().filter(|c| *c != '(' && *c != ')').collect();
    (!name.is_empty()).then_some(name)
}

/// `fat32` is formatted with the `vfat` driver; everything else passes through
pub fn normalize_format(format: &str) -> String {
    if format.contains("fat32") {
        "vfat".to_string()
    } else {
        format.to_string()
    }
}

/// Which privilege wrapper to put in front of the helper.
///
/// Falls back to the primary wrapper name when neither is installed.
pub fn resolve_wrapper(is_root: bool, wrapper_exists: impl Fn(&str) -> bool) -> Option<String> {
    if is_root {
        return None;
    }
    if wrapper_exists(PRIMARY_WRAPPER) {
        return Some(PRIMARY_WRAPPER.to_string());
    }
    if wrapper_exists(FALLBACK_WRAPPER) {
        return Some(FALLBACK_WRAPPER.to_string());
    }
    tracing::warn!("Neither {PRIMARY_WRAPPER} nor {FALLBACK_WRAPPER} found, trying {PRIMARY_WRAPPER}");
    Some(PRIMARY_WRAPPER.to_string())
}

fn wrapper_available(program: &str) -> bool {
    which::which(program).is_ok()
}

struct LabelRule {
    max_len: usize,
    extra: &'static [char],
    allowed: &'static str,
}

fn label_rule(format: &str) -> LabelRule {
    match format {
        "fat32" => LabelRule {
            max_len: 11,
            extra: &['_', '-'],
            allowed: "A-Z, a-z, 0-9, underscore, hyphen",
        },
        "ext4" => LabelRule {
            max_len: 16,
            extra: &['_', '.', '-'],
            allowed: "A-Z, a-z, 0-9, underscore, hyphen, period",
        },
        "ntfs" => LabelRule {
            max_len: 32,
            extra: &['_', '.', ' ', '-'],
            allowed: "A-Z, a-z, 0-9, underscore, hyphen, space, period",
        },
        "exfat" => LabelRule {
            max_len: 15,
            extra: &['_', '.', ' ', '-'],
            allowed: "A-Z, a-z, 0-9, underscore, hyphen, space, period",
        },
        _ => LabelRule {
            max_len: 16,
            extra: &['_', '.', '-'],
            allowed: "A-Z, a-z, 0-9, underscore, hyphen, period",
        },
    }
}

/// Checks a volume label against the rules of the chosen filesystem.
/// An empty label means "no label" and is always accepted.
pub fn validate_label(label: &str, format: &str) -> Result<(), ValidationError> {
    if label.is_empty() {
        return Ok(());
    }

    let rule = label_rule(format);
    let valid_chars = label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || rule.extra.contains(&c));

    if valid_chars && label.chars().count() <= rule.max_len {
        Ok(())
    } else {
        Err(ValidationError::InvalidLabel {
            label: label.to_string(),
            format: format.to_string(),
            allowed: rule.allowed,
            max_len: rule.max_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use crate::core::{BlockDevice, DeviceClassification, DeviceKind};
    use tempfile::NamedTempFile;

    fn entry(name: &str, is_system_drive: bool) -> DisplayEntry {
        DisplayEntry {
            text: format!("{name} (14.9G) [Ultra Fit] [SanDisk]"),
            device: BlockDevice {
                name: name.to_string(),
                size: "14.9G".to_string(),
                model: "Ultra Fit".to_string(),
                vendor: "SanDisk".to_string(),
                label: String::new(),
                kind: DeviceKind::Disk,
                hotplug: true,
                removable: true,
                mount_points: Vec::new(),
            },
            classification: DeviceClassification {
                is_removable_or_usb: true,
                is_system_drive,
            },
        }
    }

    fn selection(format: &str, label: &str) -> FormatSelection {
        FormatSelection {
            entry: "sdb (14.9G) [Ultra Fit] [SanDisk]".to_string(),
            format: format.to_string(),
            label: label.to_string(),
            partition_scheme: "GPT".to_string(),
            partitioning_enabled: false,
        }
    }

    fn builder(helper: &Path) -> FormatCommandBuilder {
        FormatCommandBuilder::new(helper.to_path_buf(), false).with_wrapper_lookup(|p| p == "pkexec")
    }

    #[test]
    fn test_label_rules() {
        for format in ["fat32", "ext4", "ntfs", "exfat", "btrfs"] {
            assert!(validate_label("USB-DATA", format).is_ok(), "{format}");
            assert!(validate_label("", format).is_ok(), "{format}");
        }

        let long = "ABCDEFGHIJKLMNOPQRST";
        assert!(validate_label(long, "fat32").is_err());
        assert!(validate_label(long, "ntfs").is_ok());

        assert!(validate_label("MY STICK", "exfat").is_ok());
        assert!(validate_label("MY STICK", "fat32").is_err());
        assert!(validate_label("v1.0", "fat32").is_err());
        assert!(validate_label("v1.0", "ext4").is_ok());
        assert!(validate_label("DATÄ", "ntfs").is_err());
        assert!(validate_label("ABCDEFGHIJKLMNOP", "exfat").is_err());
        assert!(validate_label("ABCDEFGHIJKLMNO", "exfat").is_ok());
    }

    #[test]
    fn test_label_validation_is_repeatable() {
        let first = validate_label("bad/label", "ext4");
        let second = validate_label("bad/label", "ext4");
        assert_eq!(first, second);
        assert!(first.is_err());
    }

    #[test]
    fn test_device_name_from_entry() {
        assert_eq!(
            device_name_from_entry("sdb (14.9G) [Ultra Fit]"),
            Some("sdb".to_string())
        );
        assert_eq!(device_name_from_entry("(sdc)"), Some("sdc".to_string()));
        assert_eq!(device_name_from_entry("   "), None);
    }

    #[test]
    fn test_normalize_format() {
        assert_eq!(normalize_format("fat32"), "vfat");
        assert_eq!(normalize_format("ext4"), "ext4");
        assert_eq!(normalize_format("exfat"), "exfat");
    }

    #[test]
    fn test_resolve_wrapper_order() {
        assert_eq!(resolve_wrapper(true, |_| true), None);
        assert_eq!(resolve_wrapper(false, |_| true), Some("pkexec".to_string()));
        assert_eq!(
            resolve_wrapper(false, |p| p == "gksu"),
            Some("gksu".to_string())
        );
        assert_eq!(resolve_wrapper(false, |_| false), Some("pkexec".to_string()));
    }

    #[test]
    fn test_build_fat32_without_partitioning() {
        let helper = NamedTempFile::new().unwrap();
        let request = builder(helper.path())
            .build(&[entry("sdb", false)], &selection("fat32", "DATA"))
            .unwrap();

        assert_eq!(
            request.helper_args(),
            vec!["sdb", "vfat", "DATA", "part"]
        );
        assert_eq!(request.program(), "pkexec");
        assert_eq!(request.args()[0], helper.path().display().to_string());
        assert_eq!(request.args().len(), 5);
    }

    #[test]
    fn test_build_uses_lowercased_scheme_when_enabled() {
        let helper = NamedTempFile::new().unwrap();
        let mut sel = selection("ext4", "backup");
        sel.partitioning_enabled = true;

        let request = builder(helper.path())
            .build(&[entry("sdb", false)], &sel)
            .unwrap();
        assert_eq!(request.partition_scheme, "gpt");
        assert_eq!(request.format, "ext4");
    }

    #[test]
    fn test_build_as_root_runs_helper_directly() {
        let helper = NamedTempFile::new().unwrap();
        let request = FormatCommandBuilder::new(helper.path().to_path_buf(), true)
            .build(&[entry("sdb", false)], &selection("ntfs", "My Files"))
            .unwrap();

        assert_eq!(request.wrapper, None);
        assert_eq!(request.program(), helper.path().display().to_string());
        assert_eq!(request.args(), vec!["sdb", "ntfs", "My Files", "part"]);
    }

    #[test]
    fn test_build_missing_helper() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("formatusb_lib");

        let result = builder(&missing).build(&[entry("sdb", false)], &selection("fat32", "DATA"));
        assert!(matches!(result, Err(DiskError::MissingHelper(path)) if path == missing));
    }

    #[test]
    fn test_build_rejects_invalid_selection() {
        let helper = NamedTempFile::new().unwrap();
        let builder = builder(helper.path());

        let mut empty = selection("fat32", "DATA");
        empty.entry = String::new();
        assert!(matches!(
            builder.build(&[entry("sdb", false)], &empty),
            Err(DiskError::Validation(ValidationError::NoDeviceSelected))
        ));

        assert!(matches!(
            builder.build(&[entry("sdc", false)], &selection("fat32", "DATA")),
            Err(DiskError::Validation(ValidationError::UnknownDevice(_)))
        ));

        assert!(matches!(
            builder.build(&[entry("sdb", true)], &selection("fat32", "DATA")),
            Err(DiskError::Validation(ValidationError::SystemDrive(_)))
        ));

        assert!(matches!(
            builder.build(&[entry("sdb", false)], &selection("fat32", "WAY-TOO-LONG-LABEL")),
            Err(DiskError::Validation(ValidationError::InvalidLabel { .. }))
        ));
    }

    #[test]
    fn test_command_line_quotes_arguments() {
        let request = FormatRequest {
            device: "sdb".to_string(),
            format: "vfat".to_string(),
            label: "USB-DATA".to_string(),
            partition_scheme: "part".to_string(),
            wrapper: Some("pkexec".to_string()),
            helper: PathBuf::from(DEFAULT_HELPER_PATH),
        };
        assert_eq!(
            request.command_line(),
            "pkexec \"/usr/local/lib/formatusb/formatusb_lib\" \"sdb\" \"vfat\" \"USB-DATA\" \"part\""
        );
    }
}
