//! Device objects tracked by the model
//!
//! The controller's attribute catalog is open-ended and type-specific, so a
//! device object keeps its attributes as a string-to-string map plus a small
//! set of well-known accessors computed from the object's type and subtype.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// Circuit subtypes that represent lights
const LIGHT_SUBTYPES: &[&str] = &["LITSHO", "LIGHT", "INTELLI", "GLOW", "GLOWT", "DIMMER"];

/// One object in the controller's configuration, identified by its `objnam`.
///
/// The object type is fixed at construction; attribute values are mutable
/// through [`DeviceObject::update`] only.
#[derive(Debug, Clone)]
pub struct DeviceObject {
    objnam: String,
    objtyp: String,
    subtyp: Option<String>,
    attributes: HashMap<String, String>,
}

impl DeviceObject {
    /// Build an object from its initial parameter map. `OBJTYP` is required
    /// and promoted out of the attribute map along with `SUBTYP`.
    pub fn new(objnam: impl Into<String>, mut params: HashMap<String, String>) -> Result<Self> {
        let objtyp = params.remove("OBJTYP").ok_or(Error::MissingField("OBJTYP"))?;
        let subtyp = params.remove("SUBTYP");
        Ok(Self {
            objnam: objnam.into(),
            objtyp,
            subtyp,
            attributes: params,
        })
    }

    /// Peer-assigned stable identifier
    pub fn objnam(&self) -> &str {
        &self.objnam
    }

    /// Object category (BODY, PUMP, CIRCUIT, ...)
    pub fn objtyp(&self) -> &str {
        &self.objtyp
    }

    /// Optional refinement of the category
    pub fn subtyp(&self) -> Option<&str> {
        self.subtyp.as_deref()
    }

    /// Friendly name (`SNAME`)
    pub fn sname(&self) -> Option<&str> {
        self.get("SNAME")
    }

    /// Current status (`STATUS`)
    pub fn status(&self) -> Option<&str> {
        self.get("STATUS")
    }

    /// The status value meaning "on" for this object type
    pub fn on_value(&self) -> &str {
        if self.objtyp == "PUMP" {
            "10"
        } else {
            "ON"
        }
    }

    /// The status value meaning "off" for this object type
    pub fn off_value(&self) -> &str {
        if self.objtyp == "PUMP" {
            "4"
        } else {
            "OFF"
        }
    }

    /// True when the object is a lighting circuit
    pub fn is_light(&self) -> bool {
        self.objtyp == "CIRCUIT"
            && self
                .subtyp
                .as_deref()
                .is_some_and(|subtyp| LIGHT_SUBTYPES.contains(&subtyp))
    }

    /// True when the object is marked as featured (`FEATR`)
    pub fn is_featured(&self) -> bool {
        self.get("FEATR") == Some("ON")
    }

    /// Value of an arbitrary attribute
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Names of all attributes currently held by this object
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Number of attributes currently held
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Merge a delta of key/value pairs into the object. Values identical
    /// to an existing value are skipped. Returns whether anything changed.
    pub fn update(&mut self, delta: &HashMap<String, String>) -> bool {
        let mut changed = false;
        for (key, value) in delta {
            if self.attributes.get(key) == Some(value) {
                continue;
            }
            self.attributes.insert(key.clone(), value.clone());
            changed = true;
        }
        changed
    }
}

impl fmt::Display for DeviceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subtyp {
            Some(subtyp) => write!(f, "{} ({}/{}):", self.objnam, self.objtyp, subtyp)?,
            None => write!(f, "{} ({}):", self.objnam, self.objtyp)?,
        }
        for (key, value) in &self.attributes {
            write!(f, " {key}: {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn construction_promotes_type_fields() {
        let object = DeviceObject::new(
            "B01",
            params(&[("OBJTYP", "BODY"), ("SUBTYP", "POOL"), ("STATUS", "OFF")]),
        )
        .unwrap();

        assert_eq!(object.objtyp(), "BODY");
        assert_eq!(object.subtyp(), Some("POOL"));
        assert_eq!(object.status(), Some("OFF"));
        assert_eq!(object.get("OBJTYP"), None);
        assert_eq!(object.get("SUBTYP"), None);
    }

    #[test]
    fn construction_requires_objtyp() {
        let result = DeviceObject::new("B01", params(&[("STATUS", "OFF")]));
        assert!(matches!(result, Err(Error::MissingField("OBJTYP"))));
    }

    #[test]
    fn update_reports_changes_only() {
        let mut object =
            DeviceObject::new("B01", params(&[("OBJTYP", "BODY"), ("A", "1")])).unwrap();

        assert!(!object.update(&params(&[("A", "1")])));
        assert_eq!(object.get("A"), Some("1"));

        let mut object =
            DeviceObject::new("B02", params(&[("OBJTYP", "BODY"), ("A", "0")])).unwrap();
        assert!(object.update(&params(&[("A", "1")])));
        assert_eq!(object.get("A"), Some("1"));
    }

    #[test]
    fn update_adds_new_attributes() {
        let mut object = DeviceObject::new("B01", params(&[("OBJTYP", "BODY")])).unwrap();
        assert!(object.update(&params(&[("LOTMP", "78")])));
        assert_eq!(object.get("LOTMP"), Some("78"));
    }

    #[test]
    fn pump_status_values() {
        let pump = DeviceObject::new("P01", params(&[("OBJTYP", "PUMP")])).unwrap();
        assert_eq!(pump.on_value(), "10");
        assert_eq!(pump.off_value(), "4");

        let body = DeviceObject::new("B01", params(&[("OBJTYP", "BODY")])).unwrap();
        assert_eq!(body.on_value(), "ON");
        assert_eq!(body.off_value(), "OFF");
    }

    #[test]
    fn light_detection() {
        let light = DeviceObject::new(
            "C01",
            params(&[("OBJTYP", "CIRCUIT"), ("SUBTYP", "GLOW")]),
        )
        .unwrap();
        assert!(light.is_light());

        let aux = DeviceObject::new(
            "C02",
            params(&[("OBJTYP", "CIRCUIT"), ("SUBTYP", "GENERIC")]),
        )
        .unwrap();
        assert!(!aux.is_light());

        let pump = DeviceObject::new(
            "P01",
            params(&[("OBJTYP", "PUMP"), ("SUBTYP", "GLOW")]),
        )
        .unwrap();
        assert!(!pump.is_light());
    }
}
