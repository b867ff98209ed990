use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::PathBuf;

use crate::error::DeviceError;
use crate::garmin::properties::device_properties;
use crate::garmin::{DeviceRecord, VolumeControl, descriptor};
use crate::util::run_capture;

/// External binaries the discovery layer shells out to. All of them are
/// invoked synchronously; a call returns only once the OS operation is done.
const REQUIRED_TOOLS: [&str; 4] = ["lsblk", "udevadm", "udisksctl", "findmnt"];

#[derive(Debug, Deserialize)]
struct Lsblk {
    blockdevices: Vec<BlockDev>,
}

#[derive(Debug, Deserialize)]
struct BlockDev {
    name: String,
    #[serde(rename = "type")]
    dtype: String,
    fstype: Option<String>,
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<BlockDev>,
}

/// Enumerates connected block volumes and narrows them down to Garmin
/// devices carrying a readable descriptor and an activities directory.
pub struct LinuxVolumeSource {
    vendor_id: String,
}

impl LinuxVolumeSource {
    pub fn new(vendor_id: impl Into<String>) -> Self {
        Self {
            vendor_id: vendor_id.into(),
        }
    }

    /// Enumerate candidate volumes once and return a lazy scan over them.
    /// Mounting and descriptor parsing happen per candidate as the scan
    /// advances, so a volume is only touched when its turn comes.
    pub fn scan(&self) -> Result<DeviceScan> {
        for tool in REQUIRED_TOOLS {
            which::which(tool)
                .with_context(|| format!("required tool `{tool}` not found in PATH"))?;
        }

        let json = run_capture("lsblk", &["--json", "-o", "NAME,TYPE,FSTYPE,MOUNTPOINT"])
            .context("failed to enumerate block devices")?;
        let parsed: Lsblk = serde_json::from_str(&json).context("unexpected lsblk --json output")?;

        let mut pending = VecDeque::new();
        collect_candidates(&parsed.blockdevices, &mut pending);

        Ok(DeviceScan {
            pending,
            vendor_id: self.vendor_id.clone(),
        })
    }
}

fn collect_candidates(devices: &[BlockDev], out: &mut VecDeque<UdisksVolume>) {
    for dev in devices {
        // Only entries carrying a filesystem can hold a Garmin layout.
        // Older units expose it on the whole disk, newer ones on a
        // partition.
        if dev.fstype.is_some() && (dev.dtype == "part" || dev.dtype == "disk") {
            out.push_back(UdisksVolume {
                dev: format!("/dev/{}", dev.name),
                mountpoint: dev.mountpoint.clone().map(PathBuf::from),
            });
        }
        collect_candidates(&dev.children, out);
    }
}

/// Lazy, finite sequence of identified Garmin devices. Candidates that fail
/// a discovery step are logged and skipped without stopping the scan.
pub struct DeviceScan {
    pending: VecDeque<UdisksVolume>,
    vendor_id: String,
}

impl Iterator for DeviceScan {
    type Item = DeviceRecord;

    fn next(&mut self) -> Option<DeviceRecord> {
        while let Some(volume) = self.pending.pop_front() {
            match identify(volume, &self.vendor_id) {
                Ok(Some(record)) => return Some(record),
                Ok(None) => {}
                Err(err) => log::error!("{err}"),
            }
        }
        None
    }
}

fn identify(volume: UdisksVolume, vendor_id: &str) -> Result<Option<DeviceRecord>, DeviceError> {
    let props = device_properties(&volume.dev)?;
    if props.get("ID_VENDOR_ID").map(String::as_str) != Some(vendor_id) {
        log::debug!("skipping {} (vendor mismatch)", volume.dev);
        return Ok(None);
    }

    let root = volume.ensure_mounted()?;

    let Some(descriptor_path) = descriptor::find_descriptor(&root) else {
        log::error!("couldn't find GarminDevice.xml under {}", root.display());
        return Ok(None);
    };
    let info = descriptor::parse_descriptor(&descriptor_path)?;
    log::info!("Found Garmin {}", info.name);

    let Some(activities_dir) = descriptor::find_activities_dir(&root) else {
        log::error!("couldn't find activities directory in {}", root.display());
        return Ok(None);
    };

    Ok(Some(DeviceRecord {
        name: info.name,
        id: info.id,
        mount_root: root,
        activities_dir,
        volume: Box::new(volume),
    }))
}

/// A block volume driven through `udisksctl`. Mount, unmount and power-off
/// all block until the command exits.
struct UdisksVolume {
    dev: String,
    mountpoint: Option<PathBuf>,
}

impl UdisksVolume {
    fn ensure_mounted(&self) -> Result<PathBuf, DeviceError> {
        if let Some(root) = &self.mountpoint {
            return Ok(root.clone());
        }

        log::info!("Mounting Garmin device ({})...", self.dev);
        run_capture(
            "udisksctl",
            &["mount", "-b", &self.dev, "--no-user-interaction"],
        )
        .map_err(|err| DeviceError::Mount {
            device: self.dev.clone(),
            reason: format!("{err:#}"),
        })?;

        let root = run_capture("findmnt", &["-no", "TARGET", &self.dev]).map_err(|err| {
            DeviceError::Mount {
                device: self.dev.clone(),
                reason: format!("{err:#}"),
            }
        })?;
        let root = root.trim();
        if root.is_empty() {
            return Err(DeviceError::Mount {
                device: self.dev.clone(),
                reason: "mounted but no mount point reported".to_string(),
            });
        }
        log::debug!("Mount done");
        Ok(PathBuf::from(root))
    }
}

impl VolumeControl for UdisksVolume {
    fn unmount(&self) -> Result<(), DeviceError> {
        run_capture(
            "udisksctl",
            &["unmount", "-b", &self.dev, "--no-user-interaction"],
        )
        .map_err(|err| DeviceError::Unmount {
            device: self.dev.clone(),
            reason: format!("{err:#}"),
        })?;
        log::debug!("Unmounted {}", self.dev);
        Ok(())
    }

    fn eject(&self) -> Result<(), DeviceError> {
        run_capture(
            "udisksctl",
            &["power-off", "-b", &self.dev, "--no-user-interaction"],
        )
        .map_err(|err| DeviceError::Eject {
            device: self.dev.clone(),
            reason: format!("{err:#}"),
        })?;
        log::debug!("Ejected {}", self.dev);
        Ok(())
    }
}
