//! Single-node placement.
//!
//! There is no hash ring.  An account maps directly to the device of the
//! same name (reseller prefix removed), and every device in the ring file
//! is a candidate.  Partition numbers are just indexes into the list of
//! accounts seen so far, so they are stable only for the life of the
//! process.

use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Device name returned when an account has no device in the ring.
pub const VOLUME_NOT_IN_RING: &str = "volume_not_in_ring";

/// One device entry of the ring file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingDevice {
    pub id: u32,
    pub ip: String,
    pub port: u16,
    pub device: String,
    #[serde(default)]
    pub zone: u32,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub meta: String,
}

impl RingDevice {
    /// Node handed out for an account with no device.
    pub fn not_in_ring() -> Self {
        Self {
            id: 0,
            ip: "127.0.0.1".to_string(),
            port: 6012,
            device: VOLUME_NOT_IN_RING.to_string(),
            zone: 1,
            weight: 100.0,
            meta: String::new(),
        }
    }

    pub fn is_not_in_ring(&self) -> bool {
        self.device == VOLUME_NOT_IN_RING
    }
}

#[derive(Debug, Deserialize)]
struct RingFile {
    // Removed devices are kept as nulls so ids stay positional.
    devs: Vec<Option<RingDevice>>,
}

/// Account-to-device placement.
#[derive(Debug)]
pub struct Ring {
    devs: Vec<RingDevice>,
    reseller_prefix: String,
    accounts: Mutex<Vec<String>>,
}

impl Ring {
    pub fn new(devs: Vec<RingDevice>, reseller_prefix: impl Into<String>) -> Self {
        Self {
            devs,
            reseller_prefix: reseller_prefix.into(),
            accounts: Mutex::new(Vec::new()),
        }
    }

    /// Load a JSON ring file.  The file must exist.
    pub fn load(path: &Path, reseller_prefix: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ring file: {}", path.display()))?;
        let file: RingFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse ring file: {}", path.display()))?;
        Ok(Self::new(
            file.devs.into_iter().flatten().collect(),
            reseller_prefix,
        ))
    }

    pub fn devices(&self) -> &[RingDevice] {
        &self.devs
    }

    /// Device name for `account`: the account with the reseller prefix
    /// stripped.
    pub fn account_device<'a>(&self, account: &'a str) -> &'a str {
        account
            .strip_prefix(self.reseller_prefix.as_str())
            .unwrap_or(account)
    }

    /// Partition for `account`.  Container and object do not influence
    /// placement.
    pub fn get_part(&self, account: &str, _container: Option<&str>, _obj: Option<&str>) -> usize {
        let device = self.account_device(account);
        let mut accounts = self.accounts.lock().expect("mutex poisoned");
        match accounts.iter().position(|a| a == device) {
            Some(part) => part,
            None => {
                accounts.push(device.to_string());
                accounts.len() - 1
            }
        }
    }

    /// Nodes holding `part`: the single matching device, or the
    /// `volume_not_in_ring` sentinel.
    pub fn get_part_nodes(&self, part: usize) -> Vec<RingDevice> {
        let account = {
            let accounts = self.accounts.lock().expect("mutex poisoned");
            accounts.get(part).cloned()
        };
        let node = account.and_then(|account| {
            self.devs
                .iter()
                .find(|dev| dev.device == account)
                .cloned()
        });
        vec![node.unwrap_or_else(RingDevice::not_in_ring)]
    }

    pub fn get_nodes(
        &self,
        account: &str,
        container: Option<&str>,
        obj: Option<&str>,
    ) -> (usize, Vec<RingDevice>) {
        let part = self.get_part(account, container, obj);
        (part, self.get_part_nodes(part))
    }

    /// Handoff nodes.  A shared filesystem has none.
    pub fn get_more_nodes(&self, _part: usize) -> impl Iterator<Item = RingDevice> {
        std::iter::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: u32, name: &str) -> RingDevice {
        RingDevice {
            id,
            ip: "127.0.0.1".into(),
            port: 6010,
            device: name.into(),
            zone: 1,
            weight: 100.0,
            meta: String::new(),
        }
    }

    #[test]
    fn test_account_maps_to_device() {
        let ring = Ring::new(vec![device(0, "test"), device(1, "other")], "AUTH_");
        let (part, nodes) = ring.get_nodes("AUTH_test", Some("c"), Some("o"));
        assert_eq!(part, 0);
        assert_eq!(nodes, vec![device(0, "test")]);

        let (part, nodes) = ring.get_nodes("AUTH_other", None, None);
        assert_eq!(part, 1);
        assert_eq!(nodes[0].device, "other");

        // Stable for an account already seen.
        assert_eq!(ring.get_part("AUTH_test", None, None), 0);
    }

    #[test]
    fn test_unknown_account_gets_sentinel() {
        let ring = Ring::new(vec![device(0, "test")], "AUTH_");
        let (_, nodes) = ring.get_nodes("AUTH_ghost", None, None);
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].is_not_in_ring());
        assert_eq!(nodes[0].port, 6012);
        assert!(ring.get_part_nodes(99)[0].is_not_in_ring());
        assert_eq!(ring.get_more_nodes(0).count(), 0);
    }

    #[test]
    fn test_account_without_prefix() {
        let ring = Ring::new(vec![device(0, "vol")], "AUTH_");
        assert_eq!(ring.account_device("vol"), "vol");
        assert_eq!(ring.get_nodes("vol", None, None).1[0].device, "vol");
    }

    #[test]
    fn test_load_ring_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object.ring.json");
        std::fs::write(
            &path,
            r#"{"devs": [
                {"id": 0, "ip": "10.0.0.1", "port": 6010, "device": "vol", "zone": 1, "weight": 100.0, "meta": ""},
                null
            ]}"#,
        )
        .unwrap();
        let ring = Ring::load(&path, "AUTH_").unwrap();
        assert_eq!(ring.devices().len(), 1);
        assert_eq!(ring.devices()[0].ip, "10.0.0.1");

        assert!(Ring::load(&dir.path().join("missing.json"), "AUTH_").is_err());
        std::fs::write(&path, "not json").unwrap();
        assert!(Ring::load(&path, "AUTH_").is_err());
    }
}
