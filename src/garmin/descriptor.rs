use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DeviceError;

/// Relative descriptor locations under a mount root, tried in order. The
/// two spellings correspond to different device firmware families.
const DESCRIPTOR_PATHS: [&str; 2] = ["Garmin/GarminDevice.xml", "GARMIN/GarminDevice.xml"];

/// Relative activity-directory locations, same firmware split.
const ACTIVITY_PATHS: [&str; 2] = ["Garmin/Activities", "GARMIN/ACTIVITY"];

/// Identity fields extracted from `GarminDevice.xml`. `id` is stable across
/// mounts of the same physical unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceXml {
    model: ModelXml,
    id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModelXml {
    description: String,
}

/// Locate the descriptor file under `root`, `None` when neither known
/// location exists.
pub fn find_descriptor(root: &Path) -> Option<PathBuf> {
    DESCRIPTOR_PATHS
        .iter()
        .map(|rel| root.join(rel))
        .find(|path| path.is_file())
}

pub fn parse_descriptor(path: &Path) -> Result<DeviceDescriptor, DeviceError> {
    let raw = fs::read_to_string(path).map_err(|err| DeviceError::Parse {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    parse_descriptor_xml(&raw).map_err(|reason| DeviceError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse_descriptor_xml(raw: &str) -> Result<DeviceDescriptor, String> {
    let device: DeviceXml = quick_xml::de::from_str(raw).map_err(|err| err.to_string())?;
    Ok(DeviceDescriptor {
        name: device.model.description,
        id: device.id,
    })
}

/// Resolve the activities directory under `root`, `None` when absent.
pub fn find_activities_dir(root: &Path) -> Option<PathBuf> {
    ACTIVITY_PATHS
        .iter()
        .map(|rel| root.join(rel))
        .find(|path| path.is_dir())
}
