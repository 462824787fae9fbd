// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const SUPPORTED_SCHEMA_VERSION: &str = "1.0";

/// Default schema version for YAML topologies
fn default_schema_version() -> String {
    SUPPORTED_SCHEMA_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_quantum_us() -> u64 {
    50_000
}

/// One logical processor as discovered by the platform at boot.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UnitEntry {
    /// Opaque hardware id (affinity value, APIC id, ...).
    pub identity: u64,
    /// Set on the single unit that runs initialization.
    #[serde(default)]
    pub controller: bool,
    #[serde(default = "default_true")]
    pub healthy: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Re-check interval of the polling engine, in microseconds.
    #[serde(default = "default_poll_quantum_us")]
    pub poll_quantum_us: u64,
    /// Timeout applied by front ends when none is given (0 = unbounded).
    #[serde(default)]
    pub default_timeout_us: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            poll_quantum_us: default_poll_quantum_us(),
            default_timeout_us: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TopologyManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub units: Vec<UnitEntry>,
    #[serde(default)]
    pub coordinator: CoordinatorSettings,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Unsupported schema_version '{0}'. Supported versions: '1.0'")]
    UnsupportedSchema(String),
    #[error("Topology '{0}' declares no processing units")]
    Empty(String),
    #[error("Topology must declare exactly one controller unit, found {0}")]
    ControllerCount(usize),
    #[error("Identity {0:#x} is declared more than once")]
    DuplicateIdentity(u64),
    #[error("coordinator.poll_quantum_us must be greater than zero")]
    ZeroQuantum,
}

impl TopologyManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read topology manifest at {:?}", path))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid topology manifest {:?}", path))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Topology Manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// A flat topology of `count` units with identities `0..count`; unit 0 is the controller.
    pub fn uniform(name: &str, count: usize) -> Self {
        Self {
            schema_version: default_schema_version(),
            name: name.to_string(),
            units: (0..count)
                .map(|i| UnitEntry {
                    identity: i as u64,
                    controller: i == 0,
                    healthy: true,
                })
                .collect(),
            coordinator: CoordinatorSettings::default(),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), TopologyError> {
        if self.schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(TopologyError::UnsupportedSchema(
                self.schema_version.clone(),
            ));
        }

        if self.units.is_empty() {
            return Err(TopologyError::Empty(self.name.clone()));
        }

        let controllers = self.units.iter().filter(|u| u.controller).count();
        if controllers != 1 {
            return Err(TopologyError::ControllerCount(controllers));
        }

        let mut seen = HashSet::with_capacity(self.units.len());
        for unit in &self.units {
            if !seen.insert(unit.identity) {
                return Err(TopologyError::DuplicateIdentity(unit.identity));
            }
            if unit.controller && !unit.healthy {
                tracing::warn!(
                    "Controller unit {:#x} is marked unhealthy; health is advisory only",
                    unit.identity
                );
            }
        }

        if self.coordinator.poll_quantum_us == 0 {
            return Err(TopologyError::ZeroQuantum);
        }

        Ok(())
    }

    pub fn controller_index(&self) -> Option<usize> {
        self.units.iter().position(|u| u.controller)
    }
}
