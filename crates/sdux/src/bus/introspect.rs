//! Interface description returned by `Introspect`.
//!
//! Every method is described by JSON Schemas generated with schemars. Type
//! definitions shared between methods (process ids, snapshots, deltas) are
//! hoisted out of the per-method schemas into one `definitions` map, and
//! `$ref`s are rewritten to point at it.

use schemars::{schema_for, JsonSchema};
use sdux_core::{SessionSnapshot, StateDelta};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bus::methods::{
    AckResponse, BusMethod, LaunchParams, LaunchResponse, LogoutParams, NoParams,
    ReloadRegistryResponse, TerminateParams, UnlockParams, INTERFACE_VERSION, SERVICE_NAME,
};

/// Description of the session interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InterfaceDescription {
    /// Service name
    pub service: String,
    /// Interface version
    pub version: u32,
    /// Methods in interface order
    pub methods: Vec<MethodDescription>,
    /// Types referenced from method schemas
    pub definitions: Map<String, Value>,
}

/// One method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MethodDescription {
    /// Wire name
    pub name: String,
    /// What the method does
    pub description: String,
    /// Schema of `params`
    pub params: Value,
    /// Schema of `result` (or of each streamed delta for `Subscribe`)
    pub result: Value,
}

impl InterfaceDescription {
    /// Find a method by name.
    pub fn method(&self, name: &str) -> Option<&MethodDescription> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Describe the whole interface.
pub fn describe() -> InterfaceDescription {
    let mut definitions = Map::new();
    let methods = BusMethod::ALL
        .into_iter()
        .map(|method| {
            let (params, result) = match method {
                BusMethod::Launch => (
                    schema::<LaunchParams>(&mut definitions),
                    schema::<LaunchResponse>(&mut definitions),
                ),
                BusMethod::Terminate => (
                    schema::<TerminateParams>(&mut definitions),
                    schema::<AckResponse>(&mut definitions),
                ),
                BusMethod::Lock => (
                    schema::<NoParams>(&mut definitions),
                    schema::<AckResponse>(&mut definitions),
                ),
                BusMethod::Unlock => (
                    schema::<UnlockParams>(&mut definitions),
                    schema::<AckResponse>(&mut definitions),
                ),
                BusMethod::Logout => (
                    schema::<LogoutParams>(&mut definitions),
                    schema::<AckResponse>(&mut definitions),
                ),
                BusMethod::QueryState => (
                    schema::<NoParams>(&mut definitions),
                    schema::<SessionSnapshot>(&mut definitions),
                ),
                BusMethod::ReloadRegistry => (
                    schema::<NoParams>(&mut definitions),
                    schema::<ReloadRegistryResponse>(&mut definitions),
                ),
                BusMethod::Subscribe => (
                    schema::<NoParams>(&mut definitions),
                    schema::<StateDelta>(&mut definitions),
                ),
                BusMethod::Introspect => (
                    schema::<NoParams>(&mut definitions),
                    schema::<InterfaceDescription>(&mut definitions),
                ),
            };
            MethodDescription {
                name: method.name().to_string(),
                description: method.description().to_string(),
                params,
                result,
            }
        })
        .collect();

    InterfaceDescription {
        service: SERVICE_NAME.to_string(),
        version: INTERFACE_VERSION,
        methods,
        definitions,
    }
}

/// Schema for `T` with its `$defs` moved into `definitions`.
fn schema<T: JsonSchema>(definitions: &mut Map<String, Value>) -> Value {
    let mut value = schema_for!(T).to_value();
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        if let Some(Value::Object(defs)) = obj.remove("$defs") {
            for (name, mut def) in defs {
                rewrite_refs(&mut def);
                definitions.entry(name).or_insert(def);
            }
        }
    }
    rewrite_refs(&mut value);
    value
}

/// Point `#/$defs/` references at `#/definitions/`.
fn rewrite_refs(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            for (key, val) in obj.iter_mut() {
                if key != "$ref" {
                    rewrite_refs(val);
                } else if let Value::String(target) = val {
                    if let Some(name) = target.strip_prefix("#/$defs/") {
                        *target = format!("#/definitions/{name}");
                    }
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(rewrite_refs),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Object(obj) => {
                for (key, val) in obj {
                    if key == "$ref" {
                        if let Some(target) = val.as_str() {
                            out.push(target.to_string());
                        }
                    } else {
                        refs(val, out);
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|v| refs(v, out)),
            _ => {}
        }
    }

    #[test]
    fn test_describes_every_method() {
        let description = describe();
        assert_eq!(description.service, "org.sdux.Session1");
        let names: Vec<&str> = description.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Launch",
                "Terminate",
                "Lock",
                "Unlock",
                "Logout",
                "QueryState",
                "ReloadRegistry",
                "Subscribe",
                "Introspect"
            ]
        );
    }

    #[test]
    fn test_launch_schema_requires_app_id() {
        let description = describe();
        let launch = description.method("Launch").unwrap();
        let required = launch.params["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "app_id"));
        assert!(launch.params["properties"].get("env").is_some());
        assert!(launch.params.get("$schema").is_none());
    }

    #[test]
    fn test_refs_resolve_to_shared_definitions() {
        let description = describe();
        let mut all = Vec::new();
        for method in &description.methods {
            refs(&method.params, &mut all);
            refs(&method.result, &mut all);
        }
        for def in description.definitions.values() {
            refs(def, &mut all);
        }
        assert!(!all.is_empty());
        for target in all {
            let name = target
                .strip_prefix("#/definitions/")
                .unwrap_or_else(|| panic!("unexpected ref {target}"));
            assert!(
                description.definitions.contains_key(name),
                "missing definition {name}"
            );
        }
    }
}
