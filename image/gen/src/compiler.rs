/*++

Licensed under the Apache-2.0 license.

File Name:

   compiler.rs

Abstract:

    File contains the command script compiler: parsed script document to boot sections.

--*/

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde_derive::Deserialize;
use serde_json::{Map, Value};
use sptool_error::SptoolError;
use sptool_image_types::*;

use crate::error;
use crate::parse::{parse_hex_array, value_to_bytes, value_to_u32, value_to_words};

/// External binary files referenced by commands, keyed by index and by name
pub type ExternalFiles = HashMap<String, Vec<u8>>;

/// Parsed command script document
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CommandScript {
    #[serde(default)]
    pub options: ScriptOptions,

    #[serde(default)]
    pub keyblobs: Vec<KeyBlobEntry>,

    #[serde(default)]
    pub sections: Vec<ScriptSection>,
}

/// Global script options
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptOptions {
    pub product_version: Option<String>,

    pub component_version: Option<String>,

    pub build_number: Option<Value>,
}

/// Key blob declaration
#[derive(Debug, Clone, Deserialize)]
pub struct KeyBlobEntry {
    pub keyblob_id: Value,

    /// AES-128 key as hex
    pub key: String,

    /// 8 byte counter as hex
    pub counter: String,

    pub start: Value,

    pub end: Value,
}

/// Script section
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptSection {
    pub section_id: Value,

    #[serde(default)]
    pub options: Map<String, Value>,

    #[serde(default)]
    pub commands: Vec<Map<String, Value>>,
}

impl CommandScript {
    /// Parse a JSON or YAML command script
    pub fn from_text(text: &str) -> anyhow::Result<Self> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => serde_yaml::from_str(text).map_err(|err| {
                error(
                    SptoolError::PARSE_MALFORMED_CONFIG,
                    format!("Command script is neither JSON nor YAML: {err}"),
                )
            })?,
        };
        serde_json::from_value(value).map_err(|err| {
            error(
                SptoolError::PARSE_MALFORMED_CONFIG,
                format!("Malformed command script: {err}"),
            )
        })
    }

    /// Load a command script file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read command script {}", path.display()))?;
        Self::from_text(&text).with_context(|| format!("In command script {}", path.display()))
    }
}

/// Dotted version, stored as BCD in SB2.1 headers
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct ComponentVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

const MAX_BCD: u16 = 999;

fn bcd(value: u16) -> [u8; 2] {
    let mut bcd = [0u8; 2];
    bcd[1] = (value % 10) as u8 | (((value / 10) % 10) as u8) << 4;
    bcd[0] = ((value / 100) % 10) as u8;
    bcd
}

fn from_bcd(bcd: [u8; 2]) -> u16 {
    u16::from(bcd[0] & 0xf) * 100 + u16::from(bcd[1] >> 4) * 10 + u16::from(bcd[1] & 0xf)
}

impl ComponentVersion {
    pub fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Twelve header bytes: each component as two BCD bytes and two zero bytes
    pub fn to_bcd_bytes(&self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[..2].copy_from_slice(&bcd(self.major));
        bytes[4..6].copy_from_slice(&bcd(self.minor));
        bytes[8..10].copy_from_slice(&bcd(self.patch));
        bytes
    }

    pub fn from_bcd_bytes(bytes: &[u8; 12]) -> Self {
        Self {
            major: from_bcd([bytes[0], bytes[1]]),
            minor: from_bcd([bytes[4], bytes[5]]),
            patch: from_bcd([bytes[8], bytes[9]]),
        }
    }
}

impl FromStr for ComponentVersion {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> anyhow::Result<Self> {
        let invalid = || {
            error(
                SptoolError::COMPILER_INVALID_VERSION,
                format!("Invalid version `{text}`, expected major.minor.patch up to 999"),
            )
        };
        let parts = text
            .trim()
            .split('.')
            .map(|part| part.parse::<u16>().map_err(|_| invalid()))
            .collect::<anyhow::Result<Vec<_>>>()?;
        match parts.as_slice() {
            [major, minor, patch] if parts.iter().all(|p| *p <= MAX_BCD) => {
                Ok(Self::new(*major, *minor, *patch))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ComponentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Versions resolved from the global options
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScriptVersions {
    pub product_version: ComponentVersion,
    pub component_version: ComponentVersion,
    pub build_number: u32,
}

/// Output of the compiler
#[derive(Debug, Clone)]
pub struct CompiledScript {
    pub versions: ScriptVersions,
    pub keyblobs: Vec<KeyBlob>,
    pub sections: Vec<Section>,
}

/// Parameters of one command record
struct Params<'a> {
    command: &'a str,
    map: &'a Map<String, Value>,
    files: &'a ExternalFiles,
    keyblobs: &'a [KeyBlob],
}

impl<'a> Params<'a> {
    fn get(&self, name: &str) -> Option<&'a Value> {
        self.map.get(name)
    }

    fn require(&self, name: &str) -> anyhow::Result<&'a Value> {
        self.get(name).ok_or_else(|| {
            error(
                SptoolError::COMPILER_MISSING_PARAMETER,
                format!("Command `{}` is missing parameter `{name}`", self.command),
            )
        })
    }

    fn u32(&self, name: &str) -> anyhow::Result<u32> {
        value_to_u32(self.require(name)?)
            .with_context(|| format!("Parameter `{name}` of command `{}`", self.command))
    }

    fn u32_or(&self, name: &str, default: u32) -> anyhow::Result<u32> {
        match self.get(name) {
            Some(_) => self.u32(name),
            None => Ok(default),
        }
    }

    fn opt_u32(&self, name: &str) -> anyhow::Result<Option<u32>> {
        match self.get(name) {
            Some(_) => self.u32(name).map(Some),
            None => Ok(None),
        }
    }

    fn bool_or(&self, name: &str, default: bool) -> anyhow::Result<bool> {
        match self.get(name) {
            None => Ok(default),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(_) => Ok(self.u32(name)? != 0),
        }
    }

    fn file(&self, name: &str) -> anyhow::Result<Vec<u8>> {
        let key = match self.require(name)? {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        self.files.get(&key).cloned().ok_or_else(|| {
            error(
                SptoolError::COMPILER_FILE_NOT_FOUND,
                format!("Command `{}` references unknown file `{key}`", self.command),
            )
        })
    }

    /// Payload given as `data`, `file` or `values`
    fn data(&self) -> anyhow::Result<Vec<u8>> {
        if self.get("file").is_some() {
            return self.file("file");
        }
        if let Some(values) = self.get("values") {
            return Ok(value_to_words(values)?
                .iter()
                .flat_map(|word| word.to_le_bytes())
                .collect());
        }
        value_to_bytes(self.require("data")?)
            .with_context(|| format!("Parameter `data` of command `{}`", self.command))
    }

    fn keyblob(&self) -> anyhow::Result<KeyBlob> {
        let id = self.u32("keyblob_id")?;
        self.keyblobs
            .iter()
            .find(|blob| blob.id == id)
            .cloned()
            .ok_or_else(|| {
                error(
                    SptoolError::COMPILER_KEYBLOB_NOT_FOUND,
                    format!("Command `{}` references unknown key blob {id}", self.command),
                )
            })
    }
}

type CommandConstructor = fn(&Params) -> anyhow::Result<CommandKind>;

/// Command script keys
const COMMAND_TABLE: &[(&str, CommandConstructor)] = &[
    ("load", load),
    ("fill", fill),
    ("erase", erase),
    ("enable", enable),
    ("reset", reset),
    ("jump", jump),
    ("call", call),
    ("keystore_to_nv", keystore_to_nv),
    ("keystore_from_nv", keystore_from_nv),
    ("version_check", version_check),
    ("keywrap", keywrap),
    ("encrypt", encrypt),
];

/// SB3.1 configuration command keys
const SB31_COMMAND_TABLE: &[(&str, CommandConstructor)] = &[
    ("erase", sb31_erase),
    ("load", sb31_load),
    ("execute", sb31_execute),
    ("call", sb31_call),
    ("programFuses", sb31_program_fuses),
    ("loadKeyBlob", sb31_load_key_blob),
    ("configureMemory", sb31_configure_memory),
    ("fillMemory", sb31_fill_memory),
    ("checkFwVersion", sb31_check_fw_version),
    ("copy", sb31_copy),
];

fn load(p: &Params) -> anyhow::Result<CommandKind> {
    let address = p.u32("address")?;
    if p.get("pattern").is_some() {
        return Ok(CommandKind::Fill {
            address,
            length: p.u32_or("length", 4)?,
            pattern: p.u32("pattern")?,
        });
    }
    Ok(CommandKind::Load {
        address,
        data: p.data()?,
        memory_id: p.u32_or("memory_id", 0)?,
    })
}

fn fill(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Fill {
        address: p.u32("address")?,
        length: p.u32("length")?,
        pattern: p.u32("pattern")?,
    })
}

fn erase(p: &Params) -> anyhow::Result<CommandKind> {
    let erase_all = p.bool_or("erase_all", false)?;
    let (address, length) = if erase_all {
        (p.u32_or("address", 0)?, p.u32_or("length", 0)?)
    } else {
        (p.u32("address")?, p.u32("length")?)
    };
    Ok(CommandKind::Erase {
        address,
        length,
        memory_id: p.u32_or("memory_id", 0)?,
        erase_all,
    })
}

fn enable(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Enable {
        address: p.u32("address")?,
        size: p.u32_or("size", 4)?,
        memory_id: p.u32("memory_id")?,
    })
}

fn reset(_: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Reset)
}

fn jump(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Jump {
        address: p.u32("address")?,
        argument: p.u32_or("argument", 0)?,
        stack_pointer: p.opt_u32("stack_pointer")?,
    })
}

fn call(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Call {
        address: p.u32("address")?,
        argument: p.u32_or("argument", 0)?,
    })
}

fn keystore_to_nv(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::KeyStoreToNv {
        address: p.u32("address")?,
        memory_id: p.u32("memory_id")?,
    })
}

fn keystore_from_nv(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::KeyStoreFromNv {
        address: p.u32("address")?,
        memory_id: p.u32("memory_id")?,
    })
}

fn counter_from_name(
    p: &Params,
    name: &str,
    ids: [(u32, VersionCounter); 2],
) -> anyhow::Result<VersionCounter> {
    let value = p.require(name)?;
    if let Value::String(text) = value {
        match text.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "secure" => return Ok(VersionCounter::Secure),
            "nonsecure" => return Ok(VersionCounter::NonSecure),
            _ => {}
        }
    }
    let id = p.u32(name)?;
    ids.iter()
        .find(|(known, _)| *known == id)
        .map(|(_, counter)| *counter)
        .ok_or_else(|| {
            error(
                SptoolError::PARSE_INVALID_NUMBER,
                format!("Unknown version counter {id} in command `{}`", p.command),
            )
        })
}

fn version_check(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::VersionCheck {
        counter: counter_from_name(
            p,
            "ver_type",
            [(0, VersionCounter::Secure), (1, VersionCounter::NonSecure)],
        )?,
        version: p.u32("fw_version")?,
    })
}

fn keywrap(p: &Params) -> anyhow::Result<CommandKind> {
    let kek = match p.require("kek")? {
        Value::String(text) => crate::parse::parse_hex(text)?,
        other => value_to_bytes(other)?,
    };
    Ok(CommandKind::KeyWrap {
        blob: p.keyblob()?,
        address: p.u32("address")?,
        kek,
    })
}

fn encrypt(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Encrypt {
        blob: p.keyblob()?,
        address: p.u32("address")?,
        data: p.data()?,
    })
}

fn sb31_erase(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Erase {
        address: p.u32("address")?,
        length: p.u32("size")?,
        memory_id: p.u32_or("memoryId", 0)?,
        erase_all: false,
    })
}

fn sb31_load(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Load {
        address: p.u32("address")?,
        data: p.data()?,
        memory_id: p.u32_or("memoryId", 0)?,
    })
}

fn sb31_execute(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Jump {
        address: p.u32("address")?,
        argument: 0,
        stack_pointer: None,
    })
}

fn sb31_call(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Call {
        address: p.u32("address")?,
        argument: 0,
    })
}

fn sb31_program_fuses(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::ProgramFuses {
        address: p.u32("address")?,
        values: value_to_words(p.require("values")?)?,
    })
}

fn sb31_load_key_blob(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::LoadKeyBlob {
        offset: p.u32("offset")?,
        wrapping_key_id: p.u32("wrappingKeyId")?,
        data: p.data()?,
    })
}

fn sb31_configure_memory(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Enable {
        address: p.u32("configAddress")?,
        size: 0,
        memory_id: p.u32("memoryId")?,
    })
}

fn sb31_fill_memory(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Fill {
        address: p.u32("address")?,
        length: p.u32("size")?,
        pattern: p.u32("pattern")?,
    })
}

fn sb31_check_fw_version(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::VersionCheck {
        counter: counter_from_name(
            p,
            "counterId",
            [(2, VersionCounter::Secure), (1, VersionCounter::NonSecure)],
        )?,
        version: p.u32("value")?,
    })
}

fn sb31_copy(p: &Params) -> anyhow::Result<CommandKind> {
    Ok(CommandKind::Copy {
        address: p.u32("addressFrom")?,
        length: p.u32("size")?,
        destination: p.u32("addressTo")?,
        memory_id_from: p.u32_or("memoryIdFrom", 0)?,
        memory_id_to: p.u32_or("memoryIdTo", 0)?,
    })
}

/// Compile one single-key command record through `table`
fn compile_record(
    table: &[(&str, CommandConstructor)],
    record: &Map<String, Value>,
    files: &ExternalFiles,
    keyblobs: &[KeyBlob],
    position: CommandPosition,
) -> anyhow::Result<Command> {
    let where_ = format!("section {}, command {}", position.section, position.index);
    let mut entries = record.iter();
    let (name, params) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(error(
                SptoolError::COMPILER_MALFORMED_COMMAND,
                format!(
                    "Command record with {} keys ({where_}), expected exactly one",
                    record.len()
                ),
            ))
        }
    };

    let constructor = table
        .iter()
        .find(|(key, _)| *key == name.as_str())
        .map(|(_, constructor)| *constructor)
        .ok_or_else(|| {
            error(
                SptoolError::COMPILER_UNKNOWN_COMMAND,
                format!("Unknown command `{name}` ({where_})"),
            )
        })?;

    let empty = Map::new();
    let map = match params {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            return Err(error(
                SptoolError::COMPILER_MALFORMED_COMMAND,
                format!("Parameters of command `{name}` must be a mapping ({where_})"),
            ))
        }
    };

    let params = Params {
        command: name,
        map,
        files,
        keyblobs,
    };
    let kind = constructor(&params).with_context(|| format!("In {where_}"))?;
    Ok(Command { position, kind })
}

fn resolve_version(value: Option<&String>, name: &str) -> anyhow::Result<ComponentVersion> {
    match value {
        Some(text) => text.parse(),
        None => {
            log::warn!("No {name} specified, using 1.0.0");
            Ok(ComponentVersion::new(1, 0, 0))
        }
    }
}

fn resolve_keyblob(entry: &KeyBlobEntry) -> anyhow::Result<KeyBlob> {
    let id = value_to_u32(&entry.keyblob_id).context("Key blob id")?;
    Ok(KeyBlob {
        id,
        key: parse_hex_array(&entry.key).with_context(|| format!("Key of key blob {id}"))?,
        counter: parse_hex_array(&entry.counter)
            .with_context(|| format!("Counter of key blob {id}"))?,
        start: value_to_u32(&entry.start).with_context(|| format!("Start of key blob {id}"))?,
        end: value_to_u32(&entry.end).with_context(|| format!("End of key blob {id}"))?,
    })
}

/// Compile a command script into boot sections
///
/// Sections keep file order. Duplicate section ids are kept as separate
/// sections and reported with a warning.
pub fn compile_script(
    script: &CommandScript,
    files: &ExternalFiles,
) -> anyhow::Result<CompiledScript> {
    let versions = ScriptVersions {
        product_version: resolve_version(
            script.options.product_version.as_ref(),
            "productVersion",
        )?,
        component_version: resolve_version(
            script.options.component_version.as_ref(),
            "componentVersion",
        )?,
        build_number: match &script.options.build_number {
            Some(value) => value_to_u32(value).context("buildNumber option")?,
            None => {
                log::warn!("No buildNumber specified, using 1");
                1
            }
        },
    };

    let keyblobs = script
        .keyblobs
        .iter()
        .map(resolve_keyblob)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut seen = HashSet::new();
    let mut sections = Vec::with_capacity(script.sections.len());
    for (section_index, section) in script.sections.iter().enumerate() {
        let id = value_to_u32(&section.section_id)
            .with_context(|| format!("Id of section {section_index}"))?;
        if !seen.insert(id) {
            log::warn!("Duplicate section id {id}, keeping both sections in file order");
        }
        let commands = section
            .commands
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let position = CommandPosition {
                    section: section_index,
                    index,
                };
                compile_record(COMMAND_TABLE, record, files, &keyblobs, position)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        sections.push(Section { id, commands });
    }

    Ok(CompiledScript {
        versions,
        keyblobs,
        sections,
    })
}

/// Compile the camelCase command list of an SB3.1 configuration
pub fn compile_sb31_commands(
    records: &[Map<String, Value>],
    files: &ExternalFiles,
) -> anyhow::Result<Vec<Command>> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let position = CommandPosition { section: 0, index };
            compile_record(SB31_COMMAND_TABLE, record, files, &[], position)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn script(value: Value) -> CommandScript {
        serde_json::from_value(value).unwrap()
    }

    fn code(err: &anyhow::Error) -> Option<SptoolError> {
        err.downcast_ref::<SptoolError>().copied()
    }

    #[test]
    fn test_compile_load() {
        let doc = script(json!({
            "options": {"productVersion": "1.2.3", "componentVersion": "4.5.6", "buildNumber": "0x10"},
            "sections": [{"section_id": 0, "commands": [
                {"load": {"address": "0x1000", "data": "00112233445566778899aabbccddeeff"}}
            ]}]
        }));
        let compiled = compile_script(&doc, &ExternalFiles::new()).unwrap();
        assert_eq!(compiled.versions.product_version, ComponentVersion::new(1, 2, 3));
        assert_eq!(compiled.versions.build_number, 16);
        assert_eq!(compiled.sections.len(), 1);
        let command = &compiled.sections[0].commands[0];
        assert_eq!(command.position, CommandPosition { section: 0, index: 0 });
        assert_eq!(
            command.kind,
            CommandKind::Load {
                address: 0x1000,
                data: hex::decode("00112233445566778899aabbccddeeff").unwrap(),
                memory_id: 0,
            }
        );
    }

    #[test]
    fn test_version_defaults() {
        let compiled = compile_script(&CommandScript::default(), &ExternalFiles::new()).unwrap();
        assert_eq!(compiled.versions.product_version, ComponentVersion::new(1, 0, 0));
        assert_eq!(compiled.versions.component_version, ComponentVersion::new(1, 0, 0));
        assert_eq!(compiled.versions.build_number, 1);
    }

    #[test]
    fn test_unknown_command() {
        let doc = script(json!({
            "sections": [{"section_id": 0, "commands": [{"explode": {}}]}]
        }));
        let err = compile_script(&doc, &ExternalFiles::new()).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::COMPILER_UNKNOWN_COMMAND));
        assert!(format!("{err}").contains("explode"));
    }

    #[test]
    fn test_malformed_record() {
        let doc = script(json!({
            "sections": [{"section_id": 0, "commands": [{"reset": {}, "call": {"address": 1}}]}]
        }));
        let err = compile_script(&doc, &ExternalFiles::new()).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::COMPILER_MALFORMED_COMMAND));
    }

    #[test]
    fn test_missing_file() {
        let doc = script(json!({
            "sections": [{"section_id": 0, "commands": [{"load": {"address": 0, "file": "app.bin"}}]}]
        }));
        let err = compile_script(&doc, &ExternalFiles::new()).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::COMPILER_FILE_NOT_FOUND));

        let mut files = ExternalFiles::new();
        files.insert("app.bin".into(), vec![1, 2, 3]);
        let compiled = compile_script(&doc, &files).unwrap();
        assert_eq!(
            compiled.sections[0].commands[0].kind,
            CommandKind::Load {
                address: 0,
                data: vec![1, 2, 3],
                memory_id: 0
            }
        );
    }

    #[test]
    fn test_keyblobs_visible_in_every_section() {
        let doc = script(json!({
            "keyblobs": [{"keyblob_id": 3, "key": "00112233445566778899aabbccddeeff",
                          "counter": "0011223344556677", "start": "0x1000", "end": "0x2000"}],
            "sections": [
                {"section_id": 0, "commands": [{"reset": null}]},
                {"section_id": 1, "commands": [{"encrypt": {"keyblob_id": 3, "address": "0x1000", "data": "aa"}}]}
            ]
        }));
        let compiled = compile_script(&doc, &ExternalFiles::new()).unwrap();
        match &compiled.sections[1].commands[0].kind {
            CommandKind::Encrypt { blob, address, data } => {
                assert_eq!(blob.id, 3);
                assert_eq!(blob.start, 0x1000);
                assert_eq!(*address, 0x1000);
                assert_eq!(data, &vec![0xaa]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let doc = script(json!({
            "sections": [{"section_id": 0, "commands": [
                {"keywrap": {"keyblob_id": 9, "address": 0, "kek": "00"}}
            ]}]
        }));
        let err = compile_script(&doc, &ExternalFiles::new()).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::COMPILER_KEYBLOB_NOT_FOUND));
    }

    #[test]
    fn test_duplicate_sections_are_kept() {
        let doc = script(json!({
            "sections": [
                {"section_id": 5, "commands": [{"reset": {}}]},
                {"section_id": 5, "commands": [{"call": {"address": "0x100"}}]}
            ]
        }));
        let compiled = compile_script(&doc, &ExternalFiles::new()).unwrap();
        assert_eq!(compiled.sections.len(), 2);
        assert_eq!(compiled.sections[0].id, 5);
        assert_eq!(compiled.sections[1].id, 5);
        assert_eq!(compiled.sections[1].commands[0].kind.name(), "call");
    }

    #[test]
    fn test_yaml_script() {
        let doc = CommandScript::from_text(
            "sections:\n  - section_id: 1\n    commands:\n      - fill: {address: 0x2000, pattern: 0xdeadbeef, length: 8}\n      - erase: {erase_all: true, memory_id: 0x111}\n",
        )
        .unwrap();
        let compiled = compile_script(&doc, &ExternalFiles::new()).unwrap();
        let commands = &compiled.sections[0].commands;
        assert_eq!(
            commands[0].kind,
            CommandKind::Fill {
                address: 0x2000,
                length: 8,
                pattern: 0xdead_beef
            }
        );
        assert_eq!(
            commands[1].kind,
            CommandKind::Erase {
                address: 0,
                length: 0,
                memory_id: 0x111,
                erase_all: true
            }
        );
    }

    #[test]
    fn test_sb31_commands() {
        let records: Vec<Map<String, Value>> = serde_json::from_value(json!([
            {"erase": {"address": "0x10000", "size": "0x2000"}},
            {"load": {"address": "0x10000", "values": "0x11223344, 0x55667788"}},
            {"checkFwVersion": {"value": 3, "counterId": "secure"}},
            {"programFuses": {"address": 8, "values": "1,2"}},
            {"execute": {"address": "0x10000"}}
        ]))
        .unwrap();
        let commands = compile_sb31_commands(&records, &ExternalFiles::new()).unwrap();
        assert_eq!(commands.len(), 5);
        assert_eq!(
            commands[1].kind,
            CommandKind::Load {
                address: 0x10000,
                data: vec![0x44, 0x33, 0x22, 0x11, 0x88, 0x77, 0x66, 0x55],
                memory_id: 0
            }
        );
        assert_eq!(
            commands[2].kind,
            CommandKind::VersionCheck {
                counter: VersionCounter::Secure,
                version: 3
            }
        );
        assert_eq!(commands[4].position.index, 4);

        let records: Vec<Map<String, Value>> =
            serde_json::from_value(json!([{"keywrap": {}}])).unwrap();
        let err = compile_sb31_commands(&records, &ExternalFiles::new()).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::COMPILER_UNKNOWN_COMMAND));
    }

    #[test]
    fn test_missing_parameter() {
        let doc = script(json!({
            "sections": [{"section_id": 0, "commands": [{"fill": {"address": 0}}]}]
        }));
        let err = compile_script(&doc, &ExternalFiles::new()).unwrap_err();
        assert_eq!(code(&err), Some(SptoolError::COMPILER_MISSING_PARAMETER));
    }

    #[test]
    fn test_version_bcd() {
        let version: ComponentVersion = "123.456.999".parse().unwrap();
        let bytes = version.to_bcd_bytes();
        assert_eq!(
            bytes,
            [0x01, 0x23, 0x00, 0x00, 0x04, 0x56, 0x00, 0x00, 0x09, 0x99, 0x00, 0x00]
        );
        assert_eq!(ComponentVersion::from_bcd_bytes(&bytes), version);
        assert!("1.2".parse::<ComponentVersion>().is_err());
        assert!("1.2.1000".parse::<ComponentVersion>().is_err());
    }
}
