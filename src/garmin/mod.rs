pub mod descriptor;
pub mod discovery;
pub mod properties;

use std::fmt;
use std::path::PathBuf;

use crate::error::DeviceError;

/// USB vendor id shared by Garmin mass-storage devices.
pub const GARMIN_VENDOR_ID: &str = "091e";

/// Blocking control over the volume a device was discovered on. Both calls
/// return only once the underlying OS operation has completed or failed, so
/// a device is never ejected while its files are still being read.
pub trait VolumeControl {
    fn unmount(&self) -> Result<(), DeviceError>;
    fn eject(&self) -> Result<(), DeviceError>;
}

/// One identified Garmin device. Created per discovery cycle and consumed
/// by a single backup pass; never persisted.
pub struct DeviceRecord {
    pub name: String,
    pub id: u64,
    pub mount_root: PathBuf,
    pub activities_dir: PathBuf,
    pub volume: Box<dyn VolumeControl>,
}

impl DeviceRecord {
    /// Archive container key, stable for a physical unit across runs.
    pub fn container_key(&self) -> String {
        format!("{} - {}", self.name, self.id)
    }
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("mount_root", &self.mount_root)
            .field("activities_dir", &self.activities_dir)
            .finish_non_exhaustive()
    }
}
