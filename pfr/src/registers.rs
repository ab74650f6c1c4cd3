/*++

Licensed under the Apache-2.0 license.

File Name:

   registers.rs

Abstract:

    File contains register values, bit-field access and enum name resolution.

--*/

use serde_json::Value;
use sptool_error::SptoolError;
use sptool_image_gen::error;
use sptool_image_gen::parse::{parse_hex, parse_int, value_to_u64};

use crate::schema::{BitFieldDef, RegisterDef};

impl BitFieldDef {
    /// Mask of the field inside its register
    pub fn mask(&self) -> u64 {
        let ones = if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        };
        ones << self.offset
    }

    /// Largest value the field holds
    pub fn max_value(&self) -> u64 {
        self.mask() >> self.offset
    }

    pub fn is_computed(&self) -> bool {
        self.hook.is_some()
    }

    /// True for the canonical name or a legacy alias
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|alias| alias == name)
    }

    pub fn enum_name(&self, value: u64) -> Option<&str> {
        self.enums
            .iter()
            .find(|e| e.value == value)
            .map(|e| e.name.as_str())
    }

    /// Resolve an enum by canonical name, then by the generated legacy names
    ///
    /// Legacy names are `{REG}_{FIELD}_VALUE_{n}`, and for 1-bit fields
    /// `{REG}_{FIELD}_ENABLE` or `{REG}_{FIELD}_DISABLE`, where FIELD is the
    /// canonical field name followed by each alias.
    pub fn enum_value(&self, register: &str, name: &str) -> Option<u64> {
        if let Some(e) = self.enums.iter().find(|e| e.name == name) {
            return Some(e.value);
        }
        for field in std::iter::once(&self.name).chain(&self.aliases) {
            for e in &self.enums {
                if name == format!("{register}_{field}_VALUE_{}", e.value) {
                    return Some(e.value);
                }
                if self.width == 1 {
                    let state = if e.value == 1 { "ENABLE" } else { "DISABLE" };
                    if name == format!("{register}_{field}_{state}") {
                        return Some(e.value);
                    }
                }
            }
        }
        None
    }

    /// Resolve a configuration value: number, prefixed number string or enum name
    pub fn resolve(&self, register: &str, value: &Value) -> anyhow::Result<u64> {
        let resolved = match value {
            Value::String(text) => match self.enum_value(register, text.trim()) {
                Some(value) => value,
                None => parse_int(text).map_err(|_| {
                    error(
                        SptoolError::PFR_ENUM_NOT_FOUND,
                        format!("{register}.{} has no value `{text}`", self.name),
                    )
                })?,
            },
            other => value_to_u64(other)?,
        };
        if resolved > self.max_value() {
            return Err(error(
                SptoolError::PFR_INVALID_VALUE,
                format!(
                    "Value {resolved:#x} does not fit {register}.{} of {} bits",
                    self.name, self.width
                ),
            ));
        }
        Ok(resolved)
    }
}

/// Register with its current value
///
/// The value is kept most significant byte first.
#[derive(Debug, Clone)]
pub struct Register<'a> {
    def: &'a RegisterDef,
    value: Vec<u8>,
}

impl<'a> Register<'a> {
    /// Register at its reset value
    pub fn new(def: &'a RegisterDef) -> Self {
        Self {
            def,
            value: reset_value(def),
        }
    }

    pub fn def(&self) -> &'a RegisterDef {
        self.def
    }

    pub fn name(&self) -> &'a str {
        &self.def.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn reset(&mut self) {
        self.value = reset_value(self.def);
    }

    /// Value as an integer, for registers up to 64 bits
    pub fn int_value(&self) -> Option<u64> {
        if self.def.width > 64 {
            return None;
        }
        Some(
            self.value
                .iter()
                .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)),
        )
    }

    /// Set the value; a non-raw set runs the computed field hooks
    pub fn set_value(&mut self, value: &[u8], raw: bool) -> anyhow::Result<()> {
        if value.len() != self.def.len() {
            return Err(error(
                SptoolError::PFR_INVALID_VALUE,
                format!(
                    "{} takes {} bytes, got {}",
                    self.def.name,
                    self.def.len(),
                    value.len()
                ),
            ));
        }
        self.value = value.to_vec();
        if !raw {
            self.run_hooks();
        }
        Ok(())
    }

    pub fn set_int(&mut self, value: u64, raw: bool) -> anyhow::Result<()> {
        let len = self.def.len();
        if len > 8 || (len < 8 && value >> (len * 8) != 0) {
            return Err(error(
                SptoolError::PFR_INVALID_VALUE,
                format!("Value {value:#x} does not fit {}", self.def.name),
            ));
        }
        let bytes = value.to_be_bytes();
        self.set_value(&bytes[8 - len..], raw)
    }

    /// Recompute the computed fields
    pub fn run_hooks(&mut self) {
        for hook in self.def.hooks() {
            self.value = hook(&self.value);
        }
    }

    /// Find a bit-field by canonical or legacy name
    pub fn field(&self, name: &str) -> anyhow::Result<&'a BitFieldDef> {
        self.def
            .bitfields
            .iter()
            .find(|field| field.answers_to(name))
            .ok_or_else(|| {
                error(
                    SptoolError::PFR_BITFIELD_NOT_FOUND,
                    format!("{} has no bit-field {name}", self.def.name),
                )
            })
    }

    pub fn field_value(&self, field: &BitFieldDef) -> u64 {
        (self.int_value().unwrap_or(0) & field.mask()) >> field.offset
    }

    /// Bytes as stored in the page
    pub fn export(&self) -> Vec<u8> {
        let mut bytes = self.value.clone();
        if self.def.reverse {
            for chunk in bytes.chunks_mut(self.def.chunk_len()) {
                chunk.reverse();
            }
        }
        bytes
    }

    /// Load bytes as stored in the page, without running hooks
    pub fn import(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        let mut value = bytes.to_vec();
        if self.def.reverse {
            for chunk in value.chunks_mut(self.def.chunk_len()) {
                chunk.reverse();
            }
        }
        self.set_value(&value, true)
    }
}

/// Value composed of the field reset values
fn reset_value(def: &RegisterDef) -> Vec<u8> {
    let mut value = vec![0u8; def.len()];
    let word = def
        .bitfields
        .iter()
        .fold(0u64, |acc, field| acc | (field.reset << field.offset));
    let bytes = word.to_be_bytes();
    let len = value.len().min(8);
    let start = value.len() - len;
    value[start..].copy_from_slice(&bytes[8 - len..]);
    value
}

/// Bytes of a register value given as a number or a hex string
pub fn register_value_bytes(def: &RegisterDef, value: &Value) -> anyhow::Result<Vec<u8>> {
    let len = def.len();
    let too_wide = || {
        error(
            SptoolError::PFR_INVALID_VALUE,
            format!("Value `{value}` does not fit {} of {} bits", def.name, def.width),
        )
    };
    match value {
        Value::String(text) if len > 8 => {
            let bytes = parse_hex(text)?;
            if bytes.len() > len {
                return Err(too_wide());
            }
            let mut padded = vec![0u8; len - bytes.len()];
            padded.extend(bytes);
            Ok(padded)
        }
        _ if len > 8 => Err(too_wide()),
        other => {
            let int = value_to_u64(other)?;
            if len < 8 && int >> (len * 8) != 0 {
                return Err(too_wide());
            }
            Ok(int.to_be_bytes()[8 - len..].to_vec())
        }
    }
}
