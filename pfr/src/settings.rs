/*++

Licensed under the Apache-2.0 license.

File Name:

   settings.rs

Abstract:

    File contains the PFR settings document and the legacy settings normalization.

--*/

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use serde_yaml::Mapping;
use sptool_error::SptoolError;
use sptool_image_gen::error;

/// Settings of one register
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterSetting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitfields: Option<BTreeMap<String, Value>>,
}

/// PFR settings document
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PfrConfiguration {
    pub device: Option<String>,

    pub revision: Option<String>,

    /// `CMPA` or `CFPA`
    pub kind: Option<String>,

    pub settings: BTreeMap<String, RegisterSetting>,
}

#[derive(Serialize)]
struct Description<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    revision: Option<&'a str>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<&'a str>,
}

#[derive(Serialize)]
struct Document<'a> {
    description: Description<'a>,

    settings: &'a BTreeMap<String, RegisterSetting>,
}

fn malformed(context: impl std::fmt::Display) -> anyhow::Error {
    error(SptoolError::PARSE_MALFORMED_CONFIG, context)
}

/// True when any entry uses the flat legacy shape
fn is_legacy(settings: &Mapping) -> bool {
    settings.values().any(|value| match value {
        serde_yaml::Value::String(_) | serde_yaml::Value::Number(_) => true,
        serde_yaml::Value::Mapping(entry) => entry
            .keys()
            .next()
            .is_some_and(|key| !matches!(key.as_str(), Some("value" | "bitfields" | "name"))),
        _ => false,
    })
}

fn to_json(value: &serde_yaml::Value) -> anyhow::Result<Value> {
    serde_json::to_value(value).map_err(|err| malformed(format!("Unsupported setting value: {err}")))
}

fn register_name(key: &serde_yaml::Value) -> anyhow::Result<String> {
    key.as_str()
        .map(str::to_string)
        .ok_or_else(|| malformed(format!("Register name {key:?} is not a string")))
}

/// Convert legacy entries: scalars become values, mappings become bit-fields
fn normalize_legacy(settings: &Mapping) -> anyhow::Result<BTreeMap<String, RegisterSetting>> {
    let mut normalized = BTreeMap::new();
    for (key, value) in settings {
        let setting = match value {
            serde_yaml::Value::Mapping(fields) => {
                let mut bitfields = BTreeMap::new();
                for (field, field_value) in fields {
                    bitfields.insert(register_name(field)?, to_json(field_value)?);
                }
                RegisterSetting {
                    bitfields: Some(bitfields),
                    ..Default::default()
                }
            }
            scalar => RegisterSetting {
                value: Some(to_json(scalar)?),
                ..Default::default()
            },
        };
        normalized.insert(register_name(key)?, setting);
    }
    Ok(normalized)
}

fn text_field(doc: &Mapping, key: &str) -> Option<String> {
    match doc.get(key)? {
        serde_yaml::Value::String(text) => Some(text.clone()),
        serde_yaml::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

impl PfrConfiguration {
    /// Parse a JSON or YAML settings document
    ///
    /// The description may sit under `description` or at the top level.
    pub fn from_text(text: &str) -> anyhow::Result<Self> {
        let doc: serde_yaml::Value = match serde_json::from_str(text) {
            Ok(doc) => doc,
            Err(_) => serde_yaml::from_str(text).map_err(|err| {
                malformed(format!("PFR settings are neither JSON nor YAML: {err}"))
            })?,
        };
        let doc = doc
            .as_mapping()
            .ok_or_else(|| malformed("PFR settings document is not a mapping"))?;

        let description = match doc.get("description") {
            Some(serde_yaml::Value::Mapping(description)) => description,
            _ => doc,
        };

        let settings = match doc.get("settings") {
            Some(serde_yaml::Value::Mapping(settings)) if is_legacy(settings) => {
                log::info!("Converting legacy PFR settings");
                normalize_legacy(settings)?
            }
            Some(serde_yaml::Value::Mapping(settings)) => {
                let mut structured = BTreeMap::new();
                for (key, value) in settings {
                    let setting = serde_yaml::from_value(value.clone()).map_err(|err| {
                        malformed(format!("Invalid setting of {key:?}: {err}"))
                    })?;
                    structured.insert(register_name(key)?, setting);
                }
                structured
            }
            Some(serde_yaml::Value::Null) => BTreeMap::new(),
            Some(_) => return Err(malformed("PFR settings are not a mapping")),
            None => {
                return Err(error(
                    SptoolError::PFR_MISSING_SETTINGS,
                    "PFR document has no settings",
                ))
            }
        };

        Ok(Self {
            device: text_field(description, "device"),
            revision: text_field(description, "revision"),
            kind: text_field(description, "type"),
            settings,
        })
    }

    /// Load a settings file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read PFR settings {}", path.display()))?;
        Self::from_text(&text).with_context(|| format!("In PFR settings {}", path.display()))
    }

    /// Structured YAML form of the document
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        let doc = Document {
            description: Description {
                device: self.device.as_deref(),
                revision: self.revision.as_deref(),
                kind: self.kind.as_deref(),
            },
            settings: &self.settings,
        };
        serde_yaml::to_string(&doc).context("Failed to serialize PFR settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_normalization() {
        let config = PfrConfiguration::from_text(
            r#"{
                "device": "lpc55s6x",
                "revision": "1b",
                "type": "CMPA",
                "settings": {
                    "USB_ID": "0x11112222",
                    "SDIO_CFG": 5,
                    "CC_SOCU_PIN": {"NIDEN_EN": 1, "DBGEN": "ENABLE"}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.device.as_deref(), Some("lpc55s6x"));
        assert_eq!(config.revision.as_deref(), Some("1b"));
        assert_eq!(config.kind.as_deref(), Some("CMPA"));
        assert_eq!(
            config.settings["USB_ID"].value,
            Some(Value::from("0x11112222"))
        );
        assert_eq!(config.settings["SDIO_CFG"].value, Some(Value::from(5)));
        let fields = config.settings["CC_SOCU_PIN"].bitfields.as_ref().unwrap();
        assert_eq!(fields["NIDEN_EN"], Value::from(1));
        assert_eq!(fields["DBGEN"], Value::from("ENABLE"));
    }

    #[test]
    fn test_structured_yaml() {
        let config = PfrConfiguration::from_text(
            "description:\n  device: lpc55s3x\n  type: CFPA\nsettings:\n  VERSION:\n    value: '0x2'\n  ROTKH_REVOKE:\n    bitfields:\n      RoTK0_EN: ENABLED\n",
        )
        .unwrap();
        assert_eq!(config.device.as_deref(), Some("lpc55s3x"));
        assert_eq!(config.revision, None);
        assert_eq!(config.settings["VERSION"].value, Some(Value::from("0x2")));
        assert_eq!(
            config.settings["ROTKH_REVOKE"].bitfields.as_ref().unwrap()["RoTK0_EN"],
            Value::from("ENABLED")
        );

        let reparsed = PfrConfiguration::from_text(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_missing_settings() {
        let err = PfrConfiguration::from_text(r#"{"device": "lpc55s6x"}"#).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::PFR_MISSING_SETTINGS)
        );
        let err = PfrConfiguration::from_text("- 1\n- 2\n").unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::PARSE_MALFORMED_CONFIG)
        );
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfpa.yaml");
        std::fs::write(&path, "type: CFPA\nsettings:\n  VERSION: 3\n").unwrap();
        let config = PfrConfiguration::load(&path).unwrap();
        assert_eq!(config.kind.as_deref(), Some("CFPA"));
        assert_eq!(config.settings["VERSION"].value, Some(Value::from(3)));
        assert!(PfrConfiguration::load(&dir.path().join("missing.yaml")).is_err());
    }
}
