/*++

Licensed under the Apache-2.0 license.

File Name:

   trustzone.rs

Abstract:

    File contains the TrustZone preset blob: per-family register templates and custom presets.

--*/

use std::collections::BTreeMap;

use serde_derive::Deserialize;
use sptool_error::SptoolError;

use crate::error;
use crate::parse::parse_int;

const TRUSTZONE_DATABASE: &str = include_str!("../data/trustzone.json");

/// Register of a TrustZone template
#[derive(Debug, Clone, Deserialize)]
pub struct TrustZoneRegister {
    pub name: String,

    /// Default value, prefixed string
    pub value: String,
}

/// TrustZone template of one family
#[derive(Debug, Clone, Deserialize)]
pub struct TrustZoneFamily {
    pub revisions: Vec<String>,

    pub latest: String,

    pub registers: Vec<TrustZoneRegister>,
}

/// Immutable TrustZone template database
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct TrustZoneDatabase {
    families: BTreeMap<String, TrustZoneFamily>,
}

impl TrustZoneDatabase {
    /// Load the embedded template database
    pub fn load() -> anyhow::Result<Self> {
        Self::from_json(TRUSTZONE_DATABASE)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).map_err(|err| {
            error(
                SptoolError::PARSE_MALFORMED_CONFIG,
                format!("Invalid TrustZone database: {err}"),
            )
        })
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(String::as_str)
    }

    /// Template of `family`, checking `revision` when one is given
    pub fn family(&self, family: &str, revision: Option<&str>) -> anyhow::Result<&TrustZoneFamily> {
        let template = self.families.get(family).ok_or_else(|| {
            error(
                SptoolError::TZ_UNSUPPORTED_FAMILY,
                format!("TrustZone does not support family `{family}`"),
            )
        })?;
        match revision {
            None | Some("latest") => {
                log::warn!(
                    "No TrustZone revision given for {family}, using latest `{}`",
                    template.latest
                );
            }
            Some(revision) if template.revisions.iter().any(|r| r == revision) => {}
            Some(revision) => {
                return Err(error(
                    SptoolError::TZ_UNSUPPORTED_REVISION,
                    format!("Family `{family}` has no revision `{revision}`"),
                ))
            }
        }
        Ok(template)
    }
}

/// How the boot ROM configures TrustZone
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrustZoneKind {
    /// ROM defaults, no preset data
    Enabled,

    /// Preset data appended to the image
    Custom,

    /// TrustZone disabled, no preset data
    Disabled,
}

/// TrustZone preset blob
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrustZone {
    kind: TrustZoneKind,
    data: Vec<u8>,
}

impl TrustZone {
    /// ROM default configuration
    pub fn enabled() -> Self {
        Self {
            kind: TrustZoneKind::Enabled,
            data: Vec::new(),
        }
    }

    /// TrustZone disabled; exports the empty sentinel
    pub fn disabled() -> Self {
        Self {
            kind: TrustZoneKind::Disabled,
            data: Vec::new(),
        }
    }

    /// Apply `presets` over the family template
    pub fn custom(
        db: &TrustZoneDatabase,
        family: &str,
        revision: Option<&str>,
        presets: &BTreeMap<String, u32>,
    ) -> anyhow::Result<Self> {
        let template = db.family(family, revision)?;
        if let Some(unknown) = presets
            .keys()
            .find(|name| !template.registers.iter().any(|reg| &reg.name == *name))
        {
            return Err(error(
                SptoolError::TZ_UNKNOWN_REGISTER,
                format!("Family `{family}` has no TrustZone register `{unknown}`"),
            ));
        }

        let mut data = Vec::with_capacity(template.registers.len() * 4);
        for reg in &template.registers {
            let value = match presets.get(&reg.name) {
                Some(value) => *value,
                None => u32::try_from(parse_int(&reg.value)?).map_err(|_| {
                    error(
                        SptoolError::PARSE_INVALID_NUMBER,
                        format!("Template value of `{}` exceeds 32 bits", reg.name),
                    )
                })?,
            };
            data.extend_from_slice(&value.to_le_bytes());
        }
        Ok(Self {
            kind: TrustZoneKind::Custom,
            data,
        })
    }

    /// Pre-built preset binary, copied through after a size check
    pub fn from_binary(
        db: &TrustZoneDatabase,
        family: &str,
        revision: Option<&str>,
        raw: &[u8],
    ) -> anyhow::Result<Self> {
        let template = db.family(family, revision)?;
        let expected = template.registers.len() * 4;
        if raw.len() != expected {
            return Err(error(
                SptoolError::TZ_INVALID_BINARY_SIZE,
                format!(
                    "TrustZone binary of {} bytes, `{family}` expects {expected}",
                    raw.len()
                ),
            ));
        }
        Ok(Self {
            kind: TrustZoneKind::Custom,
            data: raw.to_vec(),
        })
    }

    pub fn kind(&self) -> TrustZoneKind {
        self.kind
    }

    /// Preset bytes appended to a boot image
    pub fn export(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(err: &anyhow::Error) -> Option<SptoolError> {
        err.downcast_ref::<SptoolError>().copied()
    }

    #[test]
    fn test_database_families() {
        let db = TrustZoneDatabase::load().unwrap();
        let families: Vec<_> = db.families().collect();
        assert_eq!(families, vec!["lpc55s1x", "lpc55s3x", "lpc55s6x"]);
    }

    #[test]
    fn test_custom_overrides_template() {
        let db = TrustZoneDatabase::load().unwrap();
        let mut presets = BTreeMap::new();
        presets.insert("SAU control register".to_string(), 0x1);
        let tz = TrustZone::custom(&db, "lpc55s6x", Some("1b"), &presets).unwrap();
        let template = db.family("lpc55s6x", None).unwrap();
        assert_eq!(tz.kind(), TrustZoneKind::Custom);
        assert_eq!(tz.export().len(), template.registers.len() * 4);
        assert_eq!(&tz.export()[..4], &0x1000_0000u32.to_le_bytes());

        let index = template
            .registers
            .iter()
            .position(|reg| reg.name == "SAU control register")
            .unwrap();
        assert_eq!(&tz.export()[index * 4..index * 4 + 4], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_unknown_register() {
        let db = TrustZoneDatabase::load().unwrap();
        let mut presets = BTreeMap::new();
        presets.insert("Flux capacitor".to_string(), 1);
        let err = TrustZone::custom(&db, "lpc55s3x", None, &presets).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::TZ_UNKNOWN_REGISTER));
    }

    #[test]
    fn test_unsupported_family_and_revision() {
        let db = TrustZoneDatabase::load().unwrap();
        let err = TrustZone::custom(&db, "k32w1xx", None, &BTreeMap::new()).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::TZ_UNSUPPORTED_FAMILY));
        let err = TrustZone::custom(&db, "lpc55s6x", Some("zz"), &BTreeMap::new()).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::TZ_UNSUPPORTED_REVISION));
    }

    #[test]
    fn test_from_binary_size() {
        let db = TrustZoneDatabase::load().unwrap();
        let count = db.family("lpc55s1x", None).unwrap().registers.len();
        let raw = vec![0xa5; count * 4];
        let tz = TrustZone::from_binary(&db, "lpc55s1x", None, &raw).unwrap();
        assert_eq!(tz.export(), raw.as_slice());

        let err = TrustZone::from_binary(&db, "lpc55s1x", None, &raw[1..]).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::TZ_INVALID_BINARY_SIZE));
    }

    #[test]
    fn test_disabled_is_empty() {
        let tz = TrustZone::disabled();
        assert!(tz.export().is_empty());
        assert_eq!(tz.kind(), TrustZoneKind::Disabled);
        assert_eq!(TrustZone::enabled().kind(), TrustZoneKind::Enabled);
    }
}
