/*++

Licensed under the Apache-2.0 license.

File Name:

   schema.rs

Abstract:

    File contains the immutable PFR register database and the computed field hook registry.

--*/

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_derive::Deserialize;
use sptool_error::SptoolError;
use sptool_image_gen::error;

use crate::area::AreaKind;

const PFR_DATABASE: &str = include_str!("../data/database.json");

/// Size of one CMPA or CFPA page in bytes
pub const PFR_AREA_SIZE: usize = 512;

/// Computed field hook: receives the big-endian register value, returns the updated value
pub type ComputeHook = fn(&[u8]) -> Vec<u8>;

/// Overwrite the high half word with the inverse of the low half word
pub fn pfr_reg_inverse_high_half(value: &[u8]) -> Vec<u8> {
    let mut result = value.to_vec();
    if result.len() >= 4 {
        result[0] = result[2] ^ 0xff;
        result[1] = result[3] ^ 0xff;
    }
    result
}

/// Computed field hooks by identifier
#[derive(Clone)]
pub struct HookRegistry {
    hooks: BTreeMap<&'static str, ComputeHook>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.hooks.keys()).finish()
    }
}

impl HookRegistry {
    /// Registry holding the built-in hooks
    pub fn new() -> Self {
        let mut registry = Self {
            hooks: BTreeMap::new(),
        };
        registry.register("pfr_reg_inverse_high_half", pfr_reg_inverse_high_half);
        registry
    }

    pub fn register(&mut self, name: &'static str, hook: ComputeHook) {
        self.hooks.insert(name, hook);
    }

    pub fn get(&self, name: &str) -> Option<ComputeHook> {
        self.hooks.get(name).copied()
    }
}

/// Named value of a bit-field
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumDef {
    pub name: String,

    pub value: u64,
}

/// Bit-field of a register
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitFieldDef {
    pub name: String,

    /// Position of the least significant bit
    pub offset: u32,

    pub width: u32,

    #[serde(default)]
    pub reset: u64,

    #[serde(default)]
    pub enums: Vec<EnumDef>,

    /// Legacy names, in declared order
    #[serde(skip)]
    pub aliases: Vec<String>,

    /// Set for computed fields
    #[serde(skip)]
    pub hook: Option<ComputeHook>,
}

/// Register of a configuration area
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterDef {
    pub name: String,

    /// Byte offset inside the page
    pub offset: usize,

    /// Width in bits
    pub width: usize,

    /// Store the value least significant byte first
    #[serde(default)]
    pub reverse: bool,

    /// Number of equally sized sub-registers, zero when the register is not grouped
    #[serde(default)]
    pub sub_registers: usize,

    #[serde(default)]
    pub bitfields: Vec<BitFieldDef>,

    #[serde(skip)]
    pub computed: bool,
}

impl RegisterDef {
    /// Size in bytes
    pub fn len(&self) -> usize {
        self.width / 8
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0
    }

    /// Size of one sub-register in bytes, the whole register when not grouped
    pub fn chunk_len(&self) -> usize {
        match self.sub_registers {
            0 => self.len(),
            count => self.len() / count,
        }
    }

    /// Hooks of the computed fields, in field order
    pub fn hooks(&self) -> impl Iterator<Item = ComputeHook> + '_ {
        self.bitfields.iter().filter_map(|field| field.hook)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BackwardCompatibility {
    #[serde(default)]
    bitfields: BTreeMap<String, Vec<String>>,
}

/// Register layout of a CMPA or CFPA page
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AreaSchema {
    /// Registers in page order; ignored registers are removed at load
    pub registers: Vec<RegisterDef>,

    #[serde(default)]
    pub ignored_registers: Vec<String>,

    #[serde(default)]
    pub computed_registers: Vec<String>,

    #[serde(default)]
    computed_fields: BTreeMap<String, BTreeMap<String, String>>,

    /// First register covered by the seal
    pub seal_start: String,

    /// Number of seal words
    pub seal_count: usize,

    #[serde(default)]
    backward_compatibility: BTreeMap<String, BackwardCompatibility>,

    #[serde(skip)]
    seal_offset: usize,
}

impl AreaSchema {
    pub fn register(&self, name: &str) -> Option<&RegisterDef> {
        self.registers.iter().find(|reg| reg.name == name)
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored_registers.iter().any(|ignored| ignored == name)
    }

    /// Byte offset of the seal
    pub fn seal_offset(&self) -> usize {
        self.seal_offset
    }

    fn validate(&mut self, context: &str, hooks: &HookRegistry) -> anyhow::Result<()> {
        let invalid = |detail: String| {
            error(
                SptoolError::PFR_INVALID_SCHEMA,
                format!("{context}: {detail}"),
            )
        };

        let ignored = self.ignored_registers.clone();
        self.registers.retain(|reg| !ignored.contains(&reg.name));

        let mut names = BTreeSet::new();
        for reg in &self.registers {
            if !names.insert(reg.name.as_str()) {
                return Err(invalid(format!("Register {} declared twice", reg.name)));
            }
            validate_register(reg).map_err(|detail| invalid(format!("{}: {detail}", reg.name)))?;
        }

        let mut spans: Vec<_> = self
            .registers
            .iter()
            .map(|reg| (reg.offset, reg.offset + reg.len(), reg.name.as_str()))
            .collect();
        spans.sort();
        for pair in spans.windows(2) {
            if pair[0].1 > pair[1].0 {
                return Err(invalid(format!(
                    "Registers {} and {} overlap",
                    pair[0].2, pair[1].2
                )));
            }
        }

        self.seal_offset = self
            .register(&self.seal_start)
            .map(|reg| reg.offset)
            .ok_or_else(|| invalid(format!("Unknown seal register {}", self.seal_start)))?;
        if self.seal_offset + self.seal_count * 4 > PFR_AREA_SIZE {
            return Err(invalid(format!(
                "Seal of {} words at {:#x} exceeds the page",
                self.seal_count, self.seal_offset
            )));
        }

        for name in self.computed_registers.clone() {
            let reg = self
                .registers
                .iter_mut()
                .find(|reg| reg.name == name)
                .ok_or_else(|| invalid(format!("Unknown computed register {name}")))?;
            reg.computed = true;
        }

        for (reg_name, fields) in &self.computed_fields {
            let reg = self
                .registers
                .iter_mut()
                .find(|reg| &reg.name == reg_name)
                .ok_or_else(|| invalid(format!("Unknown register {reg_name} with computed fields")))?;
            for (field_name, hook_name) in fields {
                let hook = hooks.get(hook_name).ok_or_else(|| {
                    error(
                        SptoolError::PFR_UNKNOWN_COMPUTE_HOOK,
                        format!("{context}: {reg_name}.{field_name} uses unknown hook {hook_name}"),
                    )
                })?;
                let field = reg
                    .bitfields
                    .iter_mut()
                    .find(|field| &field.name == field_name)
                    .ok_or_else(|| invalid(format!("Unknown computed field {reg_name}.{field_name}")))?;
                field.hook = Some(hook);
            }
        }

        for (reg_name, compat) in &self.backward_compatibility {
            let reg = self
                .registers
                .iter_mut()
                .find(|reg| &reg.name == reg_name)
                .ok_or_else(|| invalid(format!("Unknown register {reg_name} with legacy names")))?;
            for (field_name, aliases) in &compat.bitfields {
                let field = reg
                    .bitfields
                    .iter_mut()
                    .find(|field| &field.name == field_name)
                    .ok_or_else(|| invalid(format!("Unknown legacy field {reg_name}.{field_name}")))?;
                field.aliases = aliases.clone();
            }
        }
        Ok(())
    }
}

fn validate_register(reg: &RegisterDef) -> Result<(), String> {
    if reg.width == 0 || reg.width % 32 != 0 {
        return Err(format!("width {} is not a multiple of 32", reg.width));
    }
    if reg.offset % 4 != 0 || reg.offset + reg.len() > PFR_AREA_SIZE {
        return Err(format!("offset {:#x} is outside the page", reg.offset));
    }
    if reg.sub_registers != 0 && reg.width % (reg.sub_registers * 32) != 0 {
        return Err(format!("cannot split into {} sub-registers", reg.sub_registers));
    }
    if !reg.bitfields.is_empty() && reg.width > 64 {
        return Err("bit-fields on a register wider than 64 bits".into());
    }
    let mut used = 0u64;
    for field in &reg.bitfields {
        if field.width == 0 || (field.offset + field.width) as usize > reg.width {
            return Err(format!("field {} exceeds the register", field.name));
        }
        let mask = field.mask();
        if used & mask != 0 {
            return Err(format!("field {} overlaps another field", field.name));
        }
        used |= mask;
        let limit = mask >> field.offset;
        if field.reset > limit || field.enums.iter().any(|e| e.value > limit) {
            return Err(format!("field {} holds a value wider than the field", field.name));
        }
    }
    Ok(())
}

/// Register layouts and revisions of one device
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSchema {
    #[serde(skip)]
    pub name: String,

    pub revisions: Vec<String>,

    pub latest: String,

    pub cmpa: AreaSchema,

    pub cfpa: AreaSchema,
}

impl DeviceSchema {
    pub fn area(&self, kind: AreaKind) -> &AreaSchema {
        match kind {
            AreaKind::Cmpa => &self.cmpa,
            AreaKind::Cfpa => &self.cfpa,
        }
    }

    /// Resolve a missing or `latest` revision and check a given one
    pub fn resolve_revision(&self, revision: Option<&str>) -> anyhow::Result<String> {
        match revision {
            None | Some("") | Some("latest") => {
                log::warn!(
                    "No silicon revision given for {}, using latest `{}`",
                    self.name,
                    self.latest
                );
                Ok(self.latest.clone())
            }
            Some(revision) if self.revisions.iter().any(|r| r == revision) => {
                Ok(revision.to_string())
            }
            Some(revision) => Err(error(
                SptoolError::PFR_UNKNOWN_REVISION,
                format!("Device {} has no revision `{revision}`", self.name),
            )),
        }
    }
}

/// Immutable register database of all supported devices
#[derive(Debug, Clone)]
pub struct PfrDatabase {
    devices: BTreeMap<String, DeviceSchema>,
}

impl PfrDatabase {
    /// Load the embedded database with the built-in hooks
    pub fn load() -> anyhow::Result<Self> {
        Self::from_json(PFR_DATABASE, &HookRegistry::new())
    }

    /// Parse and validate a database
    ///
    /// # Arguments
    ///
    /// * `text` - JSON document keyed by device name
    /// * `hooks` - Hooks the computed fields may name
    ///
    /// # Returns
    ///
    /// * `PfrDatabase` - Validated database
    pub fn from_json(text: &str, hooks: &HookRegistry) -> anyhow::Result<Self> {
        let mut devices: BTreeMap<String, DeviceSchema> =
            serde_json::from_str(text).map_err(|err| {
                error(
                    SptoolError::PFR_INVALID_SCHEMA,
                    format!("Invalid PFR database: {err}"),
                )
            })?;
        for (name, device) in devices.iter_mut() {
            device.name = name.clone();
            if !device.revisions.contains(&device.latest) {
                return Err(error(
                    SptoolError::PFR_INVALID_SCHEMA,
                    format!("{name}: latest revision {} is not listed", device.latest),
                ));
            }
            device.cmpa.validate(&format!("{name} CMPA"), hooks)?;
            device.cfpa.validate(&format!("{name} CFPA"), hooks)?;
        }
        Ok(Self { devices })
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn device(&self, name: &str) -> anyhow::Result<&DeviceSchema> {
        self.devices.get(name).ok_or_else(|| {
            error(
                SptoolError::PFR_UNKNOWN_DEVICE,
                format!("PFR does not support device `{name}`"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(err: &anyhow::Error) -> Option<SptoolError> {
        err.downcast_ref::<SptoolError>().copied()
    }

    const MINIMAL: &str = r#"{
        "dev": {
            "revisions": ["a"],
            "latest": "a",
            "cmpa": {
                "registers": [
                    {"name": "CFG", "offset": 0, "width": 32, "bitfields": [
                        {"name": "LOW", "offset": 0, "width": 16},
                        {"name": "HIGH", "offset": 16, "width": 16}
                    ]},
                    {"name": "DIGEST", "offset": 480, "width": 256}
                ],
                "computed_fields": {"CFG": {"HIGH": "HOOK"}},
                "seal_start": "DIGEST",
                "seal_count": 8
            },
            "cfpa": {
                "registers": [{"name": "DIGEST", "offset": 480, "width": 256}],
                "seal_start": "DIGEST",
                "seal_count": 8
            }
        }
    }"#;

    #[test]
    fn test_embedded_database() {
        let db = PfrDatabase::load().unwrap();
        assert_eq!(
            db.devices().collect::<Vec<_>>(),
            vec!["lpc550x", "lpc55s3x", "lpc55s6x"]
        );
        let device = db.device("lpc55s6x").unwrap();
        assert_eq!(device.cmpa.seal_offset(), 0x1e0);
        assert!(device.cfpa.register("CMPA_PROG_IN_PROGRESS").is_none());
        assert!(device.cfpa.is_ignored("CMPA_PROG_IN_PROGRESS"));
        let pin = device.cmpa.register("CC_SOCU_PIN").unwrap();
        assert_eq!(pin.hooks().count(), 1);
        let niden = pin.bitfields.iter().find(|f| f.name == "NIDEN").unwrap();
        assert_eq!(niden.aliases, vec!["NIDEN_EN".to_string()]);
        let rotkh = device.cmpa.register("ROTKH").unwrap();
        assert_eq!(rotkh.sub_registers, 8);
        assert_eq!(rotkh.chunk_len(), 4);
    }

    #[test]
    fn test_unknown_device_and_revision() {
        let db = PfrDatabase::load().unwrap();
        assert_eq!(
            code(&db.device("lpc1234").unwrap_err()),
            Some(SptoolError::PFR_UNKNOWN_DEVICE)
        );
        let device = db.device("lpc55s6x").unwrap();
        assert_eq!(device.resolve_revision(None).unwrap(), "1b");
        assert_eq!(device.resolve_revision(Some("0a")).unwrap(), "0a");
        assert_eq!(
            code(&device.resolve_revision(Some("zz")).unwrap_err()),
            Some(SptoolError::PFR_UNKNOWN_REVISION)
        );
    }

    #[test]
    fn test_hook_validation() {
        let err = PfrDatabase::from_json(MINIMAL, &HookRegistry::new()).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::PFR_UNKNOWN_COMPUTE_HOOK));

        let mut hooks = HookRegistry::new();
        hooks.register("HOOK", pfr_reg_inverse_high_half);
        let db = PfrDatabase::from_json(MINIMAL, &hooks).unwrap();
        assert_eq!(db.device("dev").unwrap().cmpa.registers.len(), 2);
    }

    #[test]
    fn test_overlapping_registers() {
        let text = MINIMAL.replacen(
            r#"{"name": "DIGEST", "offset": 480, "width": 256}"#,
            r#"{"name": "DIGEST", "offset": 0, "width": 256}"#,
            1,
        );
        let mut hooks = HookRegistry::new();
        hooks.register("HOOK", pfr_reg_inverse_high_half);
        let err = PfrDatabase::from_json(&text, &hooks).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::PFR_INVALID_SCHEMA));
    }

    #[test]
    fn test_inverse_high_half() {
        assert_eq!(
            pfr_reg_inverse_high_half(&[0, 0, 0x12, 0x34]),
            vec![0xed, 0xcb, 0x12, 0x34]
        );
    }
}
