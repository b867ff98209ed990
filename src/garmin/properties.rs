use std::collections::BTreeMap;

use crate::error::DeviceError;
use crate::util::run_capture;

/// Query OS metadata for a block device node as a property-name to value
/// mapping. No caching; called once per candidate volume during discovery.
pub fn device_properties(dev: &str) -> Result<BTreeMap<String, String>, DeviceError> {
    let output =
        run_capture("udevadm", &["info", "--query=property", dev]).map_err(|err| {
            DeviceError::Query {
                device: dev.to_string(),
                reason: format!("{err:#}"),
            }
        })?;
    Ok(parse_properties(&output))
}

fn parse_properties(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
