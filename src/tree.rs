use std::collections::HashMap;

use crate::types::*;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct Position {
    user: usize,
    home: usize,
    room: usize,
    device: usize,
}

/// A device together with the home and room that own it.
#[derive(Debug, Clone, Copy)]
pub struct Located<'a> {
    pub user: &'a User,
    pub home: &'a Home,
    pub room: &'a Room,
    pub device: &'a Device,
}

/// A committed snapshot plus a device-id index built once for it.
#[derive(Debug, Clone)]
pub struct DeviceTree {
    snapshot: DeviceTreeSnapshot,
    index: HashMap<DeviceId, Position>,
}

impl DeviceTree {
    pub fn new(snapshot: DeviceTreeSnapshot) -> Self {
        let mut index = HashMap::new();
        for (u, user) in snapshot.users.iter().enumerate() {
            for (h, home) in user.homes.iter().enumerate() {
                for (r, room) in home.rooms.iter().enumerate() {
                    for (d, device) in room.devices.iter().enumerate() {
                        index.entry(device.id).or_insert(Position {
                            user: u,
                            home: h,
                            room: r,
                            device: d,
                        });
                    }
                }
            }
        }
        Self { snapshot, index }
    }

    pub fn snapshot(&self) -> &DeviceTreeSnapshot {
        &self.snapshot
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.snapshot.devices().map(|(_, _, device)| device)
    }

    pub fn locate(&self, id: DeviceId) -> Option<Located<'_>> {
        let pos = self.index.get(&id)?;
        let user = &self.snapshot.users[pos.user];
        let home = &user.homes[pos.home];
        let room = &home.rooms[pos.room];
        let device = &room.devices[pos.device];
        Some(Located {
            user,
            home,
            room,
            device,
        })
    }

    /// Resolve a FIMP service address to a device.
    pub fn resolve(&self, address: &str) -> Result<Located<'_>> {
        address
            .parse::<DeviceId>()
            .ok()
            .and_then(|id| self.locate(id))
            .ok_or_else(|| Error::AddressNotFound(address.to_string()))
    }

    /// Record a target temperature written through the vendor API, so reads
    /// reflect it before the next poll.
    pub fn set_target_temperature(&mut self, id: DeviceId, temp: Temperature) -> bool {
        let Some(pos) = self.index.get(&id).copied() else {
            return false;
        };
        let room = &mut self.snapshot.users[pos.user].homes[pos.home].rooms[pos.room];
        room.target_temperature = temp.hundredths();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> DeviceTree {
        DeviceTree::new(DeviceTreeSnapshot {
            users: vec![User {
                id: 1,
                status: String::new(),
                homes: vec![Home {
                    id: 2,
                    name: "Home".into(),
                    rooms: vec![
                        Room {
                            id: 3,
                            name: "Kitchen".into(),
                            target_temperature: 2000,
                            devices: vec![Device {
                                id: DeviceId(40),
                                ..Default::default()
                            }],
                            ..Default::default()
                        },
                        Room {
                            id: 4,
                            name: "Bath".into(),
                            devices: vec![Device {
                                id: DeviceId(41),
                                ..Default::default()
                            }],
                            ..Default::default()
                        },
                    ],
                }],
            }],
        })
    }

    #[test]
    fn resolve_finds_home_and_room() {
        let tree = tree();
        let found = tree.resolve("41").unwrap();
        assert_eq!(found.home.id, 2);
        assert_eq!(found.room.name, "Bath");
        assert_eq!(found.device.id, DeviceId(41));
    }

    #[test]
    fn resolve_unknown_or_garbage() {
        let tree = tree();
        assert!(matches!(tree.resolve("99"), Err(Error::AddressNotFound(_))));
        assert!(matches!(tree.resolve("abc"), Err(Error::AddressNotFound(_))));
    }

    #[test]
    fn local_setpoint_write() {
        let mut tree = tree();
        assert!(tree.set_target_temperature(DeviceId(40), Temperature::from_celsius(21.5)));
        assert_eq!(tree.locate(DeviceId(40)).unwrap().room.target_temperature, 2150);
        assert!(!tree.set_target_temperature(DeviceId(99), Temperature::from_celsius(20.0)));
    }
}
