/*++

Licensed under the Apache-2.0 license.

File Name:

   area.rs

Abstract:

    File contains the CMPA/CFPA configuration area: settings, page export and parsing.

--*/

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use sptool_error::SptoolError;
use sptool_image_gen::{compute_rotkh, error, ImageGeneratorCrypto};
use sptool_image_types::PublicKey;

use crate::registers::{register_value_bytes, Register};
use crate::schema::{AreaSchema, BitFieldDef, DeviceSchema, PfrDatabase, PFR_AREA_SIZE};
use crate::settings::{PfrConfiguration, RegisterSetting};
use crate::{ROTKH_REGISTER, SEAL_MARK};

/// Protected Flash Region page
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AreaKind {
    /// Customer Manufacturing Programmable Area
    Cmpa,

    /// Customer Field Programmable Area
    Cfpa,
}

impl AreaKind {
    pub fn name(self) -> &'static str {
        match self {
            AreaKind::Cmpa => "CMPA",
            AreaKind::Cfpa => "CFPA",
        }
    }
}

impl fmt::Display for AreaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AreaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CMPA" => Ok(AreaKind::Cmpa),
            "CFPA" => Ok(AreaKind::Cfpa),
            _ => Err(error(
                SptoolError::PFR_CONFIG_MISMATCH_TYPE,
                format!("Unknown PFR area type `{s}`"),
            )),
        }
    }
}

/// Resolved change to one register
enum Update<'a> {
    Value(Vec<u8>),
    Fields(Vec<(&'a BitFieldDef, u64)>),
}

/// CMPA or CFPA register file of one device revision
#[derive(Debug, Clone)]
pub struct ConfigArea<'a> {
    device: &'a DeviceSchema,
    kind: AreaKind,
    revision: String,
    registers: Vec<Register<'a>>,
}

impl<'a> ConfigArea<'a> {
    /// Create an area with every register at its reset value
    ///
    /// # Arguments
    ///
    /// * `device` - Device schema
    /// * `kind` - Page type
    /// * `revision` - Silicon revision; the latest one when missing or `latest`
    pub fn new(
        device: &'a DeviceSchema,
        kind: AreaKind,
        revision: Option<&str>,
    ) -> anyhow::Result<Self> {
        let revision = device.resolve_revision(revision)?;
        let registers = device
            .area(kind)
            .registers
            .iter()
            .map(Register::new)
            .collect();
        Ok(Self {
            device,
            kind,
            revision,
            registers,
        })
    }

    /// Create an area for the device named by `config` and apply its settings
    pub fn from_config(
        db: &'a PfrDatabase,
        kind: AreaKind,
        config: &PfrConfiguration,
    ) -> anyhow::Result<Self> {
        let device_name = config.device.as_deref().ok_or_else(|| {
            error(
                SptoolError::PFR_CONFIG_MISMATCH_DEVICE,
                "Configuration names no device",
            )
        })?;
        let device = db.device(device_name)?;
        let mut area = Self::new(device, kind, config.revision.as_deref())?;
        if !config.settings.is_empty() {
            area.set_config(config, false)?;
        }
        Ok(area)
    }

    /// Default configuration of an area: every register at its reset value
    pub fn default_config(
        device: &'a DeviceSchema,
        kind: AreaKind,
        revision: Option<&str>,
    ) -> anyhow::Result<PfrConfiguration> {
        Self::new(device, kind, revision)?.get_config(false, false)
    }

    pub fn kind(&self) -> AreaKind {
        self.kind
    }

    pub fn device(&self) -> &'a DeviceSchema {
        self.device
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    fn schema(&self) -> &'a AreaSchema {
        self.device.area(self.kind)
    }

    pub fn registers(&self) -> &[Register<'a>] {
        &self.registers
    }

    fn register_index(&self, name: &str) -> anyhow::Result<usize> {
        self.registers
            .iter()
            .position(|reg| reg.name() == name)
            .ok_or_else(|| {
                error(
                    SptoolError::PFR_REGISTER_NOT_FOUND,
                    format!("{} of {} has no register {name}", self.kind, self.device.name),
                )
            })
    }

    pub fn register(&self, name: &str) -> anyhow::Result<&Register<'a>> {
        Ok(&self.registers[self.register_index(name)?])
    }

    /// Set every register back to its reset value
    pub fn reset(&mut self) {
        for reg in &mut self.registers {
            reg.reset();
        }
    }

    fn check_description(&self, config: &PfrConfiguration) -> anyhow::Result<()> {
        if config.device.as_deref() != Some(self.device.name.as_str()) {
            return Err(error(
                SptoolError::PFR_CONFIG_MISMATCH_DEVICE,
                format!(
                    "Configuration device {:?} does not match {}",
                    config.device, self.device.name
                ),
            ));
        }
        let revision = match config.revision.as_deref() {
            None | Some("") | Some("latest") => {
                log::warn!(
                    "Configuration names no silicon revision, using latest `{}`",
                    self.device.latest
                );
                self.device.latest.as_str()
            }
            Some(revision) => revision,
        };
        if revision != self.revision {
            return Err(error(
                SptoolError::PFR_CONFIG_MISMATCH_REVISION,
                format!(
                    "Configuration revision {revision} does not match {}",
                    self.revision
                ),
            ));
        }
        if let Some(kind) = config.kind.as_deref() {
            if kind.parse::<AreaKind>()? != self.kind {
                return Err(error(
                    SptoolError::PFR_CONFIG_MISMATCH_TYPE,
                    format!("Configuration type {kind} does not match {}", self.kind),
                ));
            }
        }
        Ok(())
    }

    fn plan(
        &self,
        name: &str,
        setting: &RegisterSetting,
        raw: bool,
    ) -> anyhow::Result<Option<(usize, Update<'a>)>> {
        if self.schema().is_ignored(name) {
            log::debug!("Skipping ignored register {name}");
            return Ok(None);
        }
        let index = self.register_index(name)?;
        let reg = &self.registers[index];
        if reg.def().computed && !raw {
            log::debug!("Skipping computed register {name}");
            return Ok(None);
        }

        if let Some(bitfields) = &setting.bitfields {
            let mut fields = Vec::with_capacity(bitfields.len());
            for (field_name, value) in bitfields {
                let field = reg.field(field_name)?;
                if field.is_computed() && !raw {
                    log::debug!("Skipping computed field {name}.{field_name}");
                    continue;
                }
                fields.push((field, field.resolve(name, value)?));
            }
            Ok(Some((index, Update::Fields(fields))))
        } else if let Some(value) = &setting.value {
            Ok(Some((
                index,
                Update::Value(register_value_bytes(reg.def(), value)?),
            )))
        } else {
            log::debug!("Register {name} has neither value nor bit-fields");
            Ok(None)
        }
    }

    /// Apply a settings document
    ///
    /// Names and values are all checked before the first register changes. A
    /// non-raw set skips computed registers and fields, and recomputes the
    /// computed fields of every register, configured or not.
    ///
    /// # Arguments
    ///
    /// * `config` - Settings document for this device, revision and area
    /// * `raw` - Write computed registers and fields as given and run no hooks
    pub fn set_config(&mut self, config: &PfrConfiguration, raw: bool) -> anyhow::Result<()> {
        self.check_description(config)?;
        if config.settings.is_empty() {
            return Err(error(
                SptoolError::PFR_MISSING_SETTINGS,
                format!("Missing {} settings", self.kind),
            ));
        }

        let mut updates = Vec::with_capacity(config.settings.len());
        for (name, setting) in &config.settings {
            if let Some(update) = self.plan(name, setting, raw)? {
                updates.push(update);
            }
        }

        let configured: BTreeSet<usize> = updates.iter().map(|(index, _)| *index).collect();
        for (index, update) in updates {
            let reg = &mut self.registers[index];
            match update {
                Update::Value(bytes) => reg.set_value(&bytes, raw)?,
                Update::Fields(fields) => {
                    let word = fields
                        .iter()
                        .fold(reg.int_value().unwrap_or(0), |word, (field, value)| {
                            (word & !field.mask()) | (value << field.offset)
                        });
                    reg.set_int(word, raw)?;
                }
            }
        }

        if !raw {
            for (index, reg) in self.registers.iter_mut().enumerate() {
                if !configured.contains(&index) {
                    reg.run_hooks();
                }
            }
        }
        Ok(())
    }

    fn setting_of(
        &self,
        reg: &Register<'a>,
        default: &Register<'a>,
        diff: bool,
        include_computed: bool,
    ) -> Option<RegisterSetting> {
        let def = reg.def();
        if def.bitfields.is_empty() {
            if diff && reg.value() == default.value() {
                return None;
            }
            return Some(RegisterSetting {
                value: Some(Value::String(format!("0x{}", hex::encode_upper(reg.value())))),
                ..Default::default()
            });
        }

        let mut bitfields = BTreeMap::new();
        for field in &def.bitfields {
            if field.is_computed() && !include_computed {
                continue;
            }
            let value = reg.field_value(field);
            if diff && value == default.field_value(field) {
                continue;
            }
            let text = match field.enum_name(value) {
                Some(name) => name.to_string(),
                None => format!("{value:#x}"),
            };
            bitfields.insert(field.name.clone(), Value::String(text));
        }
        if diff && bitfields.is_empty() {
            return None;
        }
        Some(RegisterSetting {
            bitfields: Some(bitfields),
            ..Default::default()
        })
    }

    /// Settings document describing the current register values
    ///
    /// # Arguments
    ///
    /// * `diff` - Report only registers and fields that differ from the reset values
    /// * `include_computed` - Report computed registers and fields too
    pub fn get_config(&self, diff: bool, include_computed: bool) -> anyhow::Result<PfrConfiguration> {
        let default = Self::new(self.device, self.kind, Some(self.revision.as_str()))?;
        let mut settings = BTreeMap::new();
        for (reg, default) in self.registers.iter().zip(&default.registers) {
            if reg.def().computed && !include_computed {
                continue;
            }
            if let Some(setting) = self.setting_of(reg, default, diff, include_computed) {
                settings.insert(reg.name().to_string(), setting);
            }
        }
        Ok(PfrConfiguration {
            device: Some(self.device.name.clone()),
            revision: Some(self.revision.clone()),
            kind: Some(self.kind.name().to_string()),
            settings,
        })
    }

    /// Names of the registers that differ from a freshly reset area
    pub fn diff_from_default(&self) -> anyhow::Result<Vec<&'a str>> {
        let default = Self::new(self.device, self.kind, Some(self.revision.as_str()))?;
        Ok(self
            .registers
            .iter()
            .zip(&default.registers)
            .filter(|(reg, default)| reg.value() != default.value())
            .map(|(reg, _)| reg.name())
            .collect())
    }

    /// Force the ROTKH register to the hash of `keys`
    pub fn set_rotkh<C: ImageGeneratorCrypto>(
        &mut self,
        crypto: &C,
        keys: &[PublicKey],
    ) -> anyhow::Result<()> {
        let index = self
            .registers
            .iter()
            .position(|reg| reg.name() == ROTKH_REGISTER)
            .ok_or_else(|| {
                error(
                    SptoolError::PFR_ROTKH_NOT_SUPPORTED,
                    format!("{} of {} has no ROTKH register", self.kind, self.device.name),
                )
            })?;
        let width = self.registers[index].def().width;
        let rotkh = compute_rotkh(crypto, keys, width)?;
        self.registers[index].set_value(&rotkh, true)
    }

    /// Page image of the current register values
    ///
    /// # Arguments
    ///
    /// * `add_seal` - Write the seal words over the seal registers
    ///
    /// # Returns
    ///
    /// * `Vec<u8>` - Exactly one page
    pub fn export(&self, add_seal: bool) -> Vec<u8> {
        let mut page = vec![0u8; PFR_AREA_SIZE];
        for reg in &self.registers {
            let offset = reg.def().offset;
            page[offset..offset + reg.def().len()].copy_from_slice(&reg.export());
        }
        if add_seal {
            let schema = self.schema();
            let start = schema.seal_offset();
            for word in page[start..start + schema.seal_count * 4].chunks_mut(4) {
                word.copy_from_slice(SEAL_MARK);
            }
        }
        page
    }

    /// Inject the ROTKH of `keys` and export the page
    pub fn export_with_rotkh<C: ImageGeneratorCrypto>(
        &mut self,
        crypto: &C,
        keys: &[PublicKey],
        add_seal: bool,
    ) -> anyhow::Result<Vec<u8>> {
        self.set_rotkh(crypto, keys)?;
        Ok(self.export(add_seal))
    }

    /// Load every register from a page image, without running hooks
    pub fn parse(&mut self, data: &[u8]) -> anyhow::Result<()> {
        if data.len() < PFR_AREA_SIZE {
            return Err(error(
                SptoolError::PFR_INVALID_BINARY_SIZE,
                format!(
                    "{} page needs {PFR_AREA_SIZE} bytes, got {}",
                    self.kind,
                    data.len()
                ),
            ));
        }
        if data.len() > PFR_AREA_SIZE {
            log::warn!(
                "Ignoring {} bytes past the {} page",
                data.len() - PFR_AREA_SIZE,
                self.kind
            );
        }
        for reg in &mut self.registers {
            let offset = reg.def().offset;
            let len = reg.def().len();
            reg.import(&data[offset..offset + len])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(err: &anyhow::Error) -> Option<SptoolError> {
        err.downcast_ref::<SptoolError>().copied()
    }

    fn config(device: &str, kind: &str, text: &str) -> PfrConfiguration {
        let mut config = PfrConfiguration::from_text(text).unwrap();
        config.device = Some(device.to_string());
        config.kind = Some(kind.to_string());
        config
    }

    #[test]
    fn test_seal_and_length() {
        let db = PfrDatabase::load().unwrap();
        for name in db.devices() {
            let device = db.device(name).unwrap();
            for kind in [AreaKind::Cmpa, AreaKind::Cfpa] {
                let area = ConfigArea::new(device, kind, None).unwrap();
                let page = area.export(true);
                assert_eq!(page.len(), PFR_AREA_SIZE);
                assert_eq!(&page[0x1e0..0x200], b"SEALSEALSEALSEALSEALSEALSEALSEAL");
                assert_eq!(area.export(false)[0x1e0..0x200], [0u8; 32]);
            }
        }
    }

    #[test]
    fn test_default_has_empty_diff() {
        let db = PfrDatabase::load().unwrap();
        let device = db.device("lpc55s6x").unwrap();
        let area = ConfigArea::new(device, AreaKind::Cmpa, Some("0a")).unwrap();
        assert!(area.get_config(true, true).unwrap().settings.is_empty());
        assert!(area.diff_from_default().unwrap().is_empty());

        let default = ConfigArea::default_config(device, AreaKind::Cmpa, Some("0a")).unwrap();
        assert_eq!(default.revision.as_deref(), Some("0a"));
        assert!(default.settings.contains_key("BOOT_CFG"));
        assert!(!default.settings.contains_key("SHA256_DIGEST"));
    }

    #[test]
    fn test_set_config_runs_hooks() {
        let db = PfrDatabase::load().unwrap();
        let device = db.device("lpc55s6x").unwrap();
        let mut area = ConfigArea::new(device, AreaKind::Cmpa, None).unwrap();
        area.set_config(
            &config(
                "lpc55s6x",
                "cmpa",
                r#"{"settings": {"CC_SOCU_PIN": {"bitfields": {"NIDEN": "ENABLE", "DBGEN": 1}}}}"#,
            ),
            false,
        )
        .unwrap();

        assert_eq!(
            area.register("CC_SOCU_PIN").unwrap().int_value(),
            Some(0xfffc_0003)
        );
        // Unconfigured registers with computed fields are recomputed too
        assert_eq!(
            area.register("CC_SOCU_DFLT").unwrap().int_value(),
            Some(0xffff_0000)
        );
        assert_eq!(
            area.diff_from_default().unwrap(),
            vec!["CC_SOCU_PIN", "CC_SOCU_DFLT", "VENDOR_USAGE"]
        );
    }

    #[test]
    fn test_legacy_alias_matches_enable() {
        let db = PfrDatabase::load().unwrap();
        let device = db.device("lpc55s6x").unwrap();
        let export = |settings: &str| {
            let mut area = ConfigArea::new(device, AreaKind::Cmpa, None).unwrap();
            area.set_config(&config("lpc55s6x", "CMPA", settings), false)
                .unwrap();
            area.export(true)
        };
        let canonical = export(r#"{"settings": {"CC_SOCU_PIN": {"bitfields": {"NIDEN": "ENABLE"}}}}"#);
        let legacy = export(r#"{"settings": {"CC_SOCU_PIN": {"NIDEN_EN": 1}}}"#);
        let legacy_enum =
            export(r#"{"settings": {"CC_SOCU_PIN": {"bitfields": {"NIDEN_EN": "CC_SOCU_PIN_NIDEN_ENABLE"}}}}"#);
        assert_eq!(canonical, legacy);
        assert_eq!(canonical, legacy_enum);
    }

    #[test]
    fn test_computed_skipped_unless_raw() {
        let db = PfrDatabase::load().unwrap();
        let device = db.device("lpc55s6x").unwrap();
        let settings = r#"{"settings": {
            "HEADER": {"value": "0x12345678"},
            "VENDOR_USAGE": {"bitfields": {"DBG_VENDOR_USAGE": "0x1", "INVERSE_VALUE": "0x5"}}
        }}"#;

        let mut area = ConfigArea::new(device, AreaKind::Cfpa, None).unwrap();
        area.set_config(&config("lpc55s6x", "CFPA", settings), false)
            .unwrap();
        assert_eq!(area.register("HEADER").unwrap().int_value(), Some(0));
        assert_eq!(
            area.register("VENDOR_USAGE").unwrap().int_value(),
            Some(0xfffe_0001)
        );

        let mut area = ConfigArea::new(device, AreaKind::Cfpa, None).unwrap();
        area.set_config(&config("lpc55s6x", "CFPA", settings), true)
            .unwrap();
        assert_eq!(
            area.register("HEADER").unwrap().int_value(),
            Some(0x1234_5678)
        );
        assert_eq!(
            area.register("VENDOR_USAGE").unwrap().int_value(),
            Some(0x0005_0001)
        );
    }

    #[test]
    fn test_mismatch_checked_before_mutation() {
        let db = PfrDatabase::load().unwrap();
        let device = db.device("lpc55s6x").unwrap();
        let mut area = ConfigArea::new(device, AreaKind::Cmpa, Some("1b")).unwrap();
        let settings = r#"{"settings": {"USB_ID": {"value": "0x11112222"}}}"#;

        let err = area
            .set_config(&config("lpc55s3x", "CMPA", settings), false)
            .unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::PFR_CONFIG_MISMATCH_DEVICE));

        let mut wrong_revision = config("lpc55s6x", "CMPA", settings);
        wrong_revision.revision = Some("0a".into());
        let err = area.set_config(&wrong_revision, false).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::PFR_CONFIG_MISMATCH_REVISION));

        let err = area
            .set_config(&config("lpc55s6x", "CFPA", settings), false)
            .unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::PFR_CONFIG_MISMATCH_TYPE));

        let err = area
            .set_config(
                &config(
                    "lpc55s6x",
                    "CMPA",
                    r#"{"settings": {"USB_ID": {"value": "0x11112222"}, "NO_SUCH_REG": {"value": 1}}}"#,
                ),
                false,
            )
            .unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::PFR_REGISTER_NOT_FOUND));

        let err = area
            .set_config(
                &config(
                    "lpc55s6x",
                    "CMPA",
                    r#"{"settings": {"BOOT_CFG": {"bitfields": {"NO_SUCH_FIELD": 1}}}}"#,
                ),
                false,
            )
            .unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::PFR_BITFIELD_NOT_FOUND));

        assert!(area.diff_from_default().unwrap().is_empty());
    }

    #[test]
    fn test_parse_short_page() {
        let db = PfrDatabase::load().unwrap();
        let device = db.device("lpc550x").unwrap();
        let mut area = ConfigArea::new(device, AreaKind::Cfpa, None).unwrap();
        let err = area.parse(&[0u8; 511]).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::PFR_INVALID_BINARY_SIZE));
    }
}
