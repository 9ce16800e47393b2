//! Object model: the set of tracked device objects
//!
//! Built once per connection from the inventory snapshot, then mutated only
//! through incremental updates. An admission predicate set at construction
//! decides which objects are retained at all; rejected objects never enter
//! the model and never match any later update.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::message::ObjectParams;
use crate::object::DeviceObject;
use crate::Result;

/// Predicate deciding whether an incoming object is retained
pub type AdmissionPredicate = Box<dyn Fn(&DeviceObject) -> bool + Send + Sync>;

/// Per-type whitelist of attribute names worth tracking
pub type TrackedAttributes = HashMap<String, Vec<String>>;

/// Mapping from `objnam` to [`DeviceObject`]
pub struct ObjectModel {
    objects: HashMap<String, DeviceObject>,
    admit: AdmissionPredicate,
    tracked: Option<TrackedAttributes>,
}

impl ObjectModel {
    /// Model admitting every object
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            admit: Box::new(|_| true),
            tracked: None,
        }
    }

    /// Model admitting only objects for which the predicate returns true
    pub fn with_filter(admit: impl Fn(&DeviceObject) -> bool + Send + Sync + 'static) -> Self {
        Self {
            objects: HashMap::new(),
            admit: Box::new(admit),
            tracked: None,
        }
    }

    /// Restrict the attributes requested for change tracking, per object type.
    /// Types absent from the map fall back to all attributes the object holds.
    pub fn with_tracked_attributes(mut self, tracked: TrackedAttributes) -> Self {
        self.tracked = Some(tracked);
        self
    }

    /// Add an object from its initial parameter map. A no-op if the key is
    /// already present (the controller may be started more than once per
    /// model) or if the admission predicate rejects the object.
    pub fn add_object(&mut self, objnam: &str, params: HashMap<String, String>) -> Result<()> {
        if self.objects.contains_key(objnam) {
            return Ok(());
        }
        let object = DeviceObject::new(objnam, prune(params))?;
        if (self.admit)(&object) {
            self.objects.insert(objnam.to_string(), object);
        } else {
            debug!("not adding object to model: {object}");
        }
        Ok(())
    }

    pub fn get(&self, objnam: &str) -> Option<&DeviceObject> {
        self.objects.get(objnam)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceObject> {
        self.objects.values()
    }

    /// All objects matching a type and optional subtype
    pub fn objects_by_type(&self, objtyp: &str, subtyp: Option<&str>) -> Vec<&DeviceObject> {
        self.iter()
            .filter(|object| {
                object.objtyp() == objtyp
                    && subtyp.map_or(true, |wanted| object.subtyp() == Some(wanted))
            })
            .collect()
    }

    /// Attribute names to request tracking updates for on one object:
    /// the per-type whitelist when one is configured for the object's type,
    /// otherwise every attribute the object currently holds.
    pub fn tracked_attributes(&self, object: &DeviceObject) -> Vec<String> {
        if let Some(tracked) = &self.tracked {
            if let Some(names) = tracked.get(object.objtyp()) {
                return names.clone();
            }
        }
        object.attribute_names().map(str::to_string).collect()
    }

    /// Merge a batch of incremental updates into the model, returning the
    /// names of the objects whose state actually changed. Updates for
    /// unknown objects (never admitted, or never part of the inventory)
    /// are ignored.
    pub fn apply_updates(&mut self, updates: &[ObjectParams]) -> Vec<String> {
        let mut changed = Vec::new();
        for update in updates {
            if let Some(object) = self.objects.get_mut(&update.objnam) {
                if object.update(&update.params) {
                    changed.push(update.objnam.clone());
                }
            }
        }
        changed
    }
}

impl Default for ObjectModel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObjectModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectModel")
            .field("objects", &self.objects.len())
            .field("tracked", &self.tracked)
            .finish()
    }
}

/// Drop attributes whose value equals their own name: the peer's convention
/// for "no value".
pub fn prune(params: HashMap<String, String>) -> HashMap<String, String> {
    params.into_iter().filter(|(key, value)| key != value).collect()
}

/// Recursive variant of [`prune`] for nested query answers
/// (`GetHardwareDefinition` and friends).
pub fn prune_value(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(prune_value).collect()),
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .filter(|(key, value)| value.as_str() != Some(key))
                .map(|(key, value)| (key, prune_value(value)))
                .collect(),
        ),
        other => other,
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
    fn add_object_is_idempotent() {
        let mut model = ObjectModel::new();
        model
            .add_object("B01", params(&[("OBJTYP", "BODY"), ("STATUS", "OFF")]))
            .unwrap();
        model
            .add_object("B01", params(&[("OBJTYP", "PUMP"), ("STATUS", "ON")]))
            .unwrap();

        assert_eq!(model.len(), 1);
        let object = model.get("B01").unwrap();
        assert_eq!(object.objtyp(), "BODY");
        assert_eq!(object.status(), Some("OFF"));
    }

    #[test]
    fn rejected_objects_never_appear() {
        let mut model = ObjectModel::with_filter(|object| object.objtyp() != "PANEL");
        model
            .add_object("PNL1", params(&[("OBJTYP", "PANEL")]))
            .unwrap();
        model
            .add_object("B01", params(&[("OBJTYP", "BODY"), ("STATUS", "OFF")]))
            .unwrap();

        assert_eq!(model.len(), 1);
        assert!(model.get("PNL1").is_none());

        let changed = model.apply_updates(&[ObjectParams {
            objnam: "PNL1".to_string(),
            params: params(&[("STATUS", "ON")]),
        }]);
        assert!(changed.is_empty());
    }

    #[test]
    fn apply_updates_reports_changed_objects() {
        let mut model = ObjectModel::new();
        model
            .add_object("B01", params(&[("OBJTYP", "BODY"), ("STATUS", "OFF")]))
            .unwrap();
        model
            .add_object("P01", params(&[("OBJTYP", "PUMP"), ("STATUS", "4")]))
            .unwrap();

        let changed = model.apply_updates(&[
            ObjectParams {
                objnam: "B01".to_string(),
                params: params(&[("STATUS", "ON")]),
            },
            ObjectParams {
                objnam: "P01".to_string(),
                params: params(&[("STATUS", "4")]),
            },
        ]);

        assert_eq!(changed, vec!["B01".to_string()]);
        assert_eq!(model.get("B01").unwrap().status(), Some("ON"));
    }

    #[test]
    fn self_valued_attributes_are_pruned_on_ingest() {
        let mut model = ObjectModel::new();
        model
            .add_object(
                "B01",
                params(&[("OBJTYP", "BODY"), ("LOTMP", "LOTMP"), ("HITMP", "104")]),
            )
            .unwrap();

        let object = model.get("B01").unwrap();
        assert_eq!(object.get("LOTMP"), None);
        assert_eq!(object.get("HITMP"), Some("104"));
    }

    #[test]
    fn tracked_attributes_prefer_whitelist() {
        let mut tracked = TrackedAttributes::new();
        tracked.insert("BODY".to_string(), vec!["STATUS".to_string(), "LOTMP".to_string()]);

        let mut model = ObjectModel::new().with_tracked_attributes(tracked);
        model
            .add_object(
                "B01",
                params(&[("OBJTYP", "BODY"), ("STATUS", "OFF"), ("HITMP", "104")]),
            )
            .unwrap();
        model
            .add_object("P01", params(&[("OBJTYP", "PUMP"), ("RPM", "0")]))
            .unwrap();

        let body = model.get("B01").unwrap();
        assert_eq!(
            model.tracked_attributes(body),
            vec!["STATUS".to_string(), "LOTMP".to_string()]
        );

        let pump = model.get("P01").unwrap();
        assert_eq!(model.tracked_attributes(pump), vec!["RPM".to_string()]);
    }

    #[test]
    fn objects_by_type_and_subtype() {
        let mut model = ObjectModel::new();
        model
            .add_object("B01", params(&[("OBJTYP", "BODY"), ("SUBTYP", "POOL")]))
            .unwrap();
        model
            .add_object("B02", params(&[("OBJTYP", "BODY"), ("SUBTYP", "SPA")]))
            .unwrap();

        assert_eq!(model.objects_by_type("BODY", None).len(), 2);
        let spas = model.objects_by_type("BODY", Some("SPA"));
        assert_eq!(spas.len(), 1);
        assert_eq!(spas[0].objnam(), "B02");
    }

    #[test]
    fn prune_value_recurses() {
        let value = serde_json::json!({
            "PANID": "PANID",
            "objects": [{"SNAME": "Pool", "HITMP": "HITMP"}]
        });
        let pruned = prune_value(value);
        assert_eq!(
            pruned,
            serde_json::json!({"objects": [{"SNAME": "Pool"}]})
        );
    }
}
