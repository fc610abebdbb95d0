//! Testbed node registry (`devices.json`).
//!
//! ```json
//! {
//!     "cent-node": {"serial": "32A", "hostname": "nuc", "IP": "192.168.5.10"},
//!     "leaf-nodes": [
//!         {"serial": "32B", "hostname": "pi", "IP": "192.168.5.11"}
//!     ]
//! }
//! ```

use std::{collections::HashSet, fs, path::Path};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub serial: String,
    /// Login used for remote commands.
    #[serde(default, alias = "hostname")]
    pub username: String,
    #[serde(default, alias = "IP")]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRegistry {
    #[serde(rename = "cent-node")]
    pub center: Node,
    #[serde(rename = "leaf-nodes", default)]
    pub leaves: Vec<Node>,
}

impl DeviceRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read device registry {}", path.display()))
            .map_err(Error::Config)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let registry: DeviceRegistry = serde_json::from_str(contents)
            .context("failed to parse device registry")
            .map_err(Error::Config)?;
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in self.nodes() {
            if node.serial.is_empty() {
                return Err(Error::Config(anyhow!("device registry entry without serial")));
            }
            if !seen.insert(node.serial.as_str()) {
                return Err(Error::Config(anyhow!(
                    "serial {} appears more than once in the device registry",
                    node.serial
                )));
            }
        }
        Ok(())
    }

    /// Center first, then leaves in file order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        std::iter::once(&self.center).chain(self.leaves.iter())
    }

    /// `(center, leaf)` serial pairs for aggregation.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.leaves
            .iter()
            .map(move |leaf| (self.center.serial.as_str(), leaf.serial.as_str()))
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.nodes().any(|node| node.serial == serial)
    }

    pub fn is_center(&self, serial: &str) -> bool {
        self.center.serial == serial
    }
}
