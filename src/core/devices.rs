use std::sync::Arc;

use super::disk_ops::SystemProbe;
use super::{BlockDevice, DeviceClassification, DeviceKind, DisplayEntry};

/// Lines that parse into fewer fields than this are partial output
const MIN_FIELDS: usize = 6;

/// Discovers block devices and decides which ones may be offered for formatting
pub struct DeviceEnumerator {
    probe: Arc<dyn SystemProbe>,
}

impl DeviceEnumerator {
    pub fn new(probe: Arc<dyn SystemProbe>) -> Self {
        Self { probe }
    }

    pub fn has_privileges(&self) -> bool {
        self.probe.has_privileges()
    }

    /// Waits for the kernel to publish device changes, e.g. after formatting
    pub async fn settle(&self) {
        self.probe.settle().await;
    }

    /// Whole disks of the whitelisted device classes
    pub async fn list_block_devices(&self) -> Vec<BlockDevice> {
        self.query(false)
            .await
            .into_iter()
            .filter(|device| device.kind == DeviceKind::Disk)
            .collect()
    }

    /// Everything below the whole-disk level
    pub async fn list_partitions(&self) -> Vec<BlockDevice> {
        self.query(true)
            .await
            .into_iter()
            .filter(|device| device.kind != DeviceKind::Disk)
            .collect()
    }

    async fn query(&self, include_partitions: bool) -> Vec<BlockDevice> {
        match self.probe.list_block_devices(include_partitions).await {
            Ok(output) => parse_lsblk_output(&output),
            Err(e) => {
                tracing::warn!("Block device query failed: {e}");
                Vec::new()
            }
        }
    }

    /// True if any of the removable attribute, the udev bus properties or the
    /// sysfs path marks the device as removable or USB-attached.
    /// A check that cannot be performed counts as false.
    pub async fn is_usb_or_removable(&self, name: &str) -> bool {
        if !is_valid_device_name(name) {
            return false;
        }

        match self.probe.removable_attribute(name).await {
            Ok(value) if value.trim() == "1" => return true,
            Ok(_) => {}
            Err(e) => tracing::debug!(device = name, "removable attribute unavailable: {e}"),
        }

        match self.probe.device_properties(name).await {
            Ok(props) if props.lines().map(str::trim).any(is_usb_property) => return true,
            Ok(_) => {}
            Err(e) => tracing::debug!(device = name, "udev properties unavailable: {e}"),
        }

        match self.probe.sysfs_path(name).await {
            Ok(path) if path.to_string_lossy().contains("/usb") => return true,
            Ok(_) => {}
            Err(e) => tracing::debug!(device = name, "sysfs path unavailable: {e}"),
        }

        false
    }

    /// True if the device, or one of its partitions, is mounted at `/` or at a
    /// path containing `/boot`
    pub async fn is_system_drive(&self, name: &str) -> bool {
        let table = match self.probe.mount_table().await {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(device = name, "Mount table unavailable: {e}");
                return false;
            }
        };

        table.lines().any(|line| {
            let mut fields = line.split_whitespace();
            let (Some(source), Some(target)) = (fields.next(), fields.next()) else {
                return false;
            };
            let target = unescape_mount_field(target);
            mount_source_belongs_to(source, name) && (target == "/" || target.contains("/boot"))
        })
    }

    /// System drives are never probed for removability
    pub async fn classify(&self, name: &str) -> DeviceClassification {
        if self.is_system_drive(name).await {
            return DeviceClassification {
                is_removable_or_usb: false,
                is_system_drive: true,
            };
        }
        DeviceClassification {
            is_removable_or_usb: self.is_usb_or_removable(name).await,
            is_system_drive: false,
        }
    }

    /// Builds the selectable list from a fresh enumeration
    pub async fn build_display_list(
        &self,
        show_all_devices: bool,
        show_partitions: bool,
    ) -> Vec<DisplayEntry> {
        let source = if show_partitions {
            self.list_partitions().await
        } else {
            self.list_block_devices().await
        };
        self.filter_devices(source, show_all_devices).await
    }

    /// Drops system drives always, and non-removable devices unless
    /// `show_all_devices` is set. Source order is kept.
    pub async fn filter_devices(
        &self,
        devices: Vec<BlockDevice>,
        show_all_devices: bool,
    ) -> Vec<DisplayEntry> {
        let mut list = Vec::new();

        for device in devices {
            let classification = self.classify(&device.name).await;
            if classification.is_system_drive {
                tracing::debug!(device = %device.name, "Hiding system drive");
                continue;
            }
            if !show_all_devices && !classification.is_removable_or_usb {
                continue;
            }

            list.push(DisplayEntry {
                text: display_text(&device),
                classification,
                device,
            });
        }

        list
    }
}

/// `name (size) [model] [vendor]`, empty segments left out.
/// Partitions show their filesystem label instead.
pub fn display_text(device: &BlockDevice) -> String {
    let mut text = format!("{} ({})", device.name, device.size);

    let mut segments = vec![device.model.as_str(), device.vendor.as_str()];
    if device.kind != DeviceKind::Disk {
        segments.push(device.label.as_str());
    }
    for segment in segments.into_iter().filter(|s| !s.is_empty()) {
        text.push_str(&format!(" [{segment}]"));
    }

    text
}

/// Parse `lsblk -P` output, one device per line
pub fn parse_lsblk_output(output: &str) -> Vec<BlockDevice> {
    output.lines().filter_map(parse_lsblk_line).collect()
}

fn parse_lsblk_line(line: &str) -> Option<BlockDevice> {
    let pairs = parse_pairs(line);
    if pairs.len() < MIN_FIELDS {
        if !line.trim().is_empty() {
            tracing::debug!("Skipping partial lsblk line: {line}");
        }
        return None;
    }

    let field = |key: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.trim().to_string())
            .unwrap_or_default()
    };

    let name = field("NAME");
    if name.is_empty() {
        return None;
    }

    let mount_point = field("MOUNTPOINT");

    Some(BlockDevice {
        name,
        size: field("SIZE"),
        model: field("MODEL"),
        vendor: field("VENDOR"),
        label: field("LABEL"),
        kind: DeviceKind::from_lsblk(&field("TYPE")),
        hotplug: field("HOTPLUG") == "1",
        removable: field("RM") == "1",
        mount_points: if mount_point.is_empty() {
            Vec::new()
        } else {
            vec![mount_point]
        },
    })
}

/// Split `KEY="value" KEY2="value 2"` into pairs, decoding `\xHH` escapes
fn parse_pairs(line: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = line.trim_start();

    while let Some(eq) = rest.find("=\"") {
        let key = rest[..eq].trim().to_string();
        let after = &rest[eq + 2..];
        let Some(end) = after.find('"') else {
            break;
        };
        pairs.push((key, decode_hex_escapes(&after[..end])));
        rest = after[end + 1..].trim_start();
    }

    pairs
}

fn decode_hex_escapes(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
            if let Some(byte) = std::str::from_utf8(&bytes[i + 2..i + 4])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// /proc/mounts encodes whitespace in paths as octal escapes
fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// `/dev/sda2` belongs to `sda`, `/dev/nvme0n1p1` to `nvme0n1`, but
/// `/dev/sdaa` does not belong to `sda`
fn mount_source_belongs_to(source: &str, name: &str) -> bool {
    let Some(rest) = source.strip_prefix("/dev/") else {
        return false;
    };
    if rest == name {
        return true;
    }
    let Some(suffix) = rest.strip_prefix(name) else {
        return false;
    };

    let digits = if name.ends_with(|c: char| c.is_ascii_digit()) {
        match suffix.strip_prefix('p') {
            Some(digits) => digits,
            None => return false,
        }
    } else {
        suffix
    };

    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn is_usb_property(line: &str) -> bool {
    line == "ID_BUS=usb" || line == "ID_USB_DRIVER=usb-storage"
}

/// Device names end up in sysfs paths; keep them to plain kernel names
pub fn is_valid_device_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
