/*++

Licensed under the Apache-2.0 license.

File Name:

   command.rs

Abstract:

    File contains the compiled command model shared by the container generators.

--*/

/// Key blob byte size once serialized for wrapping
pub const KEY_BLOB_BYTE_SIZE: usize = 32;

/// Location of a command in the source script
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct CommandPosition {
    /// Index of the section in file order
    pub section: usize,

    /// Index of the command within its section
    pub index: usize,
}

/// On-the-fly decryption key blob declared by a command script
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct KeyBlob {
    pub id: u32,

    /// AES-128 key
    pub key: [u8; 16],

    /// Initial counter value
    pub counter: [u8; 8],

    /// First address of the decrypted region
    pub start: u32,

    /// Last address of the decrypted region
    pub end: u32,
}

impl KeyBlob {
    /// Serialize as `key || counter || start || end`
    pub fn to_bytes(&self) -> [u8; KEY_BLOB_BYTE_SIZE] {
        let mut bytes = [0u8; KEY_BLOB_BYTE_SIZE];
        bytes[..16].copy_from_slice(&self.key);
        bytes[16..24].copy_from_slice(&self.counter);
        bytes[24..28].copy_from_slice(&self.start.to_le_bytes());
        bytes[28..].copy_from_slice(&self.end.to_le_bytes());
        bytes
    }
}

/// Firmware version counter checked by a version check command
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VersionCounter {
    Secure,
    NonSecure,
}

impl VersionCounter {
    pub fn id(self) -> u32 {
        match self {
            VersionCounter::Secure => 0,
            VersionCounter::NonSecure => 1,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(VersionCounter::Secure),
            1 => Some(VersionCounter::NonSecure),
            _ => None,
        }
    }
}

/// Typed command parameters
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CommandKind {
    Load {
        address: u32,
        data: Vec<u8>,
        memory_id: u32,
    },
    Fill {
        address: u32,
        length: u32,
        pattern: u32,
    },
    Erase {
        address: u32,
        length: u32,
        memory_id: u32,
        erase_all: bool,
    },
    Enable {
        address: u32,
        size: u32,
        memory_id: u32,
    },
    Reset,
    Jump {
        address: u32,
        argument: u32,
        stack_pointer: Option<u32>,
    },
    Call {
        address: u32,
        argument: u32,
    },
    KeyStoreToNv {
        address: u32,
        memory_id: u32,
    },
    KeyStoreFromNv {
        address: u32,
        memory_id: u32,
    },
    VersionCheck {
        counter: VersionCounter,
        version: u32,
    },
    KeyWrap {
        blob: KeyBlob,
        address: u32,
        kek: Vec<u8>,
    },
    Encrypt {
        blob: KeyBlob,
        address: u32,
        data: Vec<u8>,
    },
    ProgramFuses {
        address: u32,
        values: Vec<u32>,
    },
    LoadKeyBlob {
        offset: u32,
        wrapping_key_id: u32,
        data: Vec<u8>,
    },
    Copy {
        address: u32,
        length: u32,
        destination: u32,
        memory_id_from: u32,
        memory_id_to: u32,
    },
}

impl CommandKind {
    /// Short name used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Load { .. } => "load",
            CommandKind::Fill { .. } => "fill",
            CommandKind::Erase { .. } => "erase",
            CommandKind::Enable { .. } => "enable",
            CommandKind::Reset => "reset",
            CommandKind::Jump { .. } => "jump",
            CommandKind::Call { .. } => "call",
            CommandKind::KeyStoreToNv { .. } => "keystore_to_nv",
            CommandKind::KeyStoreFromNv { .. } => "keystore_from_nv",
            CommandKind::VersionCheck { .. } => "version_check",
            CommandKind::KeyWrap { .. } => "keywrap",
            CommandKind::Encrypt { .. } => "encrypt",
            CommandKind::ProgramFuses { .. } => "program_fuses",
            CommandKind::LoadKeyBlob { .. } => "load_key_blob",
            CommandKind::Copy { .. } => "copy",
        }
    }
}

/// Compiled command
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Command {
    pub position: CommandPosition,
    pub kind: CommandKind,
}

/// Boot section: an identifier plus its commands in script order
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Section {
    pub id: u32,
    pub commands: Vec<Command>,
}
