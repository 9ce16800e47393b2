//! Controller identity derived at connect time

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Identity of the connected controller, built from its SYSTEM object.
///
/// The unique id is content-derived (a truncated digest of the
/// peer-reported name) so it stays stable across host or IP changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    prop_name: String,
    sw_version: String,
    unique_id: String,
    metric: bool,
}

impl SystemInfo {
    /// Build from the SYSTEM object's parameter map
    /// (`PROPNAME`, `VER`, `SNAME`, optional `MODE`).
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let prop_name = params
            .get("PROPNAME")
            .ok_or(Error::MissingField("PROPNAME"))?
            .clone();
        let sw_version = params.get("VER").ok_or(Error::MissingField("VER"))?.clone();
        let sname = params.get("SNAME").ok_or(Error::MissingField("SNAME"))?;
        let metric = params.get("MODE").map(String::as_str) == Some("METRIC");

        let digest = Sha256::digest(sname.as_bytes());
        let unique_id = digest[..8]
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();

        Ok(Self {
            prop_name,
            sw_version,
            unique_id,
            metric,
        })
    }

    /// Human-readable property name
    pub fn prop_name(&self) -> &str {
        &self.prop_name
    }

    /// Controller software version
    pub fn sw_version(&self) -> &str {
        &self.sw_version
    }

    /// Stable content-derived identifier (8-byte digest, hex-encoded)
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// True when the controller reports metric units
    pub fn uses_metric(&self) -> bool {
        self.metric
    }
}
