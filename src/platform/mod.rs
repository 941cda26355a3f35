pub mod linux;

use std::sync::Arc;

use crate::core::disk_ops::SystemProbe;

/// Get the probe for the running system
pub fn get_probe() -> Arc<dyn SystemProbe> {
    Arc::new(linux::LinuxProbe::new())
}
