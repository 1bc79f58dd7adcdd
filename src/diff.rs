use std::collections::HashMap;

use crate::types::*;

/// Facet values as the hub would see them. Two snapshots are compared on
/// these strings, so float noise below the wire precision never produces
/// an event.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FacetStrings {
    temperature: String,
    setpoint: String,
    energy: String,
}

impl FacetStrings {
    fn of(room: &Room, device: &Device) -> Self {
        Self {
            temperature: room.temperature().to_protocol_string(),
            setpoint: room.setpoint().to_protocol_string(),
            energy: device.energy().to_protocol_string(),
        }
    }
}

fn index_facets(snapshot: &DeviceTreeSnapshot) -> HashMap<DeviceId, FacetStrings> {
    snapshot
        .devices()
        .map(|(_, room, device)| (device.id, FacetStrings::of(room, device)))
        .collect()
}

/// Compute the per-device facet changes between two snapshots.
///
/// With no previous snapshot every facet of every device is reported, and a
/// device missing from `previous` is reported in full. Devices that vanished
/// from `current` produce nothing.
pub fn diff(previous: Option<&DeviceTreeSnapshot>, current: &DeviceTreeSnapshot) -> Vec<ChangeEvent> {
    let previous = previous.map(index_facets).unwrap_or_default();
    let mut events = Vec::new();

    for (_, room, device) in current.devices() {
        let now = FacetStrings::of(room, device);
        let before = previous.get(&device.id);

        if before.is_none_or(|b| b.temperature != now.temperature) {
            events.push(ChangeEvent::TemperatureChanged {
                device_id: device.id,
                temp: room.temperature(),
            });
        }
        if before.is_none_or(|b| b.setpoint != now.setpoint) {
            events.push(ChangeEvent::SetpointChanged {
                device_id: device.id,
                temp: room.setpoint(),
            });
        }
        if before.is_none_or(|b| b.energy != now.energy) {
            events.push(ChangeEvent::EnergyChanged {
                device_id: device.id,
                energy: device.energy(),
            });
        }
    }

    events
}
