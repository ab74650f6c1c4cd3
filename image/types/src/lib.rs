/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains data structures for the secure boot containers.

--*/

mod command;
mod keys;

use core::ops::Range;

use memoffset::span_of;
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub use command::*;
pub use keys::*;

pub const SHA256_DIGEST_BYTE_SIZE: usize = 32;
pub const SHA384_DIGEST_BYTE_SIZE: usize = 48;
pub const HMAC_SHA256_BYTE_SIZE: usize = 32;
pub const AES_BLOCK_SIZE: usize = 16;

/// Maximum number of root keys a certificate block or ROTKH can carry
pub const MAX_ROOT_KEY_COUNT: usize = 4;

//
// Secure Binary v2.1
//
pub const SB2_BLOCK_SIZE: usize = 16;
pub const SB2_SIGNATURE: [u8; 4] = *b"STMP";
pub const SB2_SIGNATURE2: [u8; 4] = *b"sgtl";
pub const SB2_MAJOR_VERSION: u8 = 2;
pub const SB2_MINOR_VERSION: u8 = 1;
pub const SB2_FLAG_SIGNED: u16 = 0x0008;
pub const SB2_HEADER_BLOCKS: u16 = 6;
pub const SB2_KEYBLOB_BLOCK: u16 = 8;
pub const SB2_KEYBLOB_BLOCKS: u16 = 5;
pub const SB2_KEYBLOB_BYTE_SIZE: usize = SB2_KEYBLOB_BLOCKS as usize * SB2_BLOCK_SIZE;
pub const SB2_WRAPPED_KEYS_BYTE_SIZE: usize = 72;
pub const SB2_DEK_BYTE_SIZE: usize = 32;
pub const SB2_MAC_KEY_BYTE_SIZE: usize = 32;
pub const SB2_NONCE_BYTE_SIZE: usize = 16;
pub const SB2_CERT_BLOCK_OFFSET: usize =
    SB2_HEADER_BLOCKS as usize * SB2_BLOCK_SIZE + HMAC_SHA256_BYTE_SIZE + SB2_KEYBLOB_BYTE_SIZE;
pub const SB2_CERT_SIGNATURE: [u8; 4] = *b"cert";
/// Boot tag, HMAC of the boot tag and HMAC of the section data
pub const SB2_SECTION_PREAMBLE_BLOCKS: usize = 5;

/// SB2.1 boot command tags
pub const SB2_CMD_NOP: u8 = 0x00;
pub const SB2_CMD_TAG: u8 = 0x01;
pub const SB2_CMD_LOAD: u8 = 0x02;
pub const SB2_CMD_FILL: u8 = 0x03;
pub const SB2_CMD_JUMP: u8 = 0x04;
pub const SB2_CMD_CALL: u8 = 0x05;
pub const SB2_CMD_ERASE: u8 = 0x07;
pub const SB2_CMD_RESET: u8 = 0x08;
pub const SB2_CMD_MEM_ENABLE: u8 = 0x09;
pub const SB2_CMD_FW_VERSION_CHECK: u8 = 0x0b;
pub const SB2_CMD_KEYSTORE_TO_NV: u8 = 0x0c;
pub const SB2_CMD_KEYSTORE_FROM_NV: u8 = 0x0d;

pub const SB2_TAG_FLAG_LAST: u16 = 0x0001;
pub const SB2_SECTION_FLAG_BOOTABLE: u32 = 0x0001;
pub const SB2_ERASE_FLAG_ALL: u16 = 0x0001;
pub const SB2_JUMP_FLAG_SP: u16 = 0x0002;
pub const SB2_CMD_CHECKSUM_SEED: u8 = 0x5a;

//
// Secure Binary v3.1
//
pub const SB31_MAGIC: [u8; 4] = *b"sbv3";
pub const SB31_MAJOR_VERSION: u16 = 3;
pub const SB31_MINOR_VERSION: u16 = 1;
pub const SB31_HEADER_BYTE_SIZE: usize = core::mem::size_of::<Sb31Header>();
pub const SB31_DATA_BLOCK_SIZE: usize = 256;
pub const SB31_DESCRIPTION_BYTE_SIZE: usize = 16;
pub const SB31_IMAGE_TYPE_SIGNED: u32 = 6;
pub const SB31_IMAGE_TYPE_NXP_SIGNED: u32 = 7;
pub const SB31_CMD_TAG: u32 = 0x55aa_aa55;

/// SB3.1 command identifiers
pub const SB31_CMD_ERASE: u32 = 1;
pub const SB31_CMD_LOAD: u32 = 2;
pub const SB31_CMD_EXECUTE: u32 = 3;
pub const SB31_CMD_CALL: u32 = 4;
pub const SB31_CMD_PROGRAM_FUSES: u32 = 5;
pub const SB31_CMD_COPY: u32 = 8;
pub const SB31_CMD_LOAD_KEY_BLOB: u32 = 10;
pub const SB31_CMD_CONFIGURE_MEMORY: u32 = 11;
pub const SB31_CMD_FILL_MEMORY: u32 = 12;
pub const SB31_CMD_FW_VERSION_CHECK: u32 = 13;

//
// Certificate block v3.1
//
pub const CERT_BLOCK_V31_MAGIC: [u8; 4] = *b"chdr";
pub const CERT_BLOCK_V31_MAJOR_VERSION: u16 = 2;
pub const CERT_BLOCK_V31_MINOR_VERSION: u16 = 1;
pub const CERT_BLOCK_V31_CA_FLAG: u32 = 0x8000_0000;
pub const CERT_BLOCK_V31_USER_DATA_FLAG: u32 = 0x8000_0000;

//
// Master Boot Image
//
pub const MBI_IMAGE_LENGTH_OFFSET: usize = 0x20;
pub const MBI_IMAGE_TYPE_OFFSET: usize = 0x24;
pub const MBI_CRC_OR_CERT_OFFSET: usize = 0x28;
pub const MBI_IMAGE_VERSION_OFFSET: usize = 0x2c;
pub const MBI_LOAD_ADDR_OFFSET: usize = 0x34;
pub const MBI_MIN_APP_SIZE: usize = 0x38;
pub const MBI_TZM_PRESET_FLAG: u32 = 0x2000;
pub const MBI_TZM_DISABLED_FLAG: u32 = 0x4000;
pub const MBI_MANIFEST_MAGIC: [u8; 4] = *b"imgm";
pub const MBI_MANIFEST_VERSION: u32 = 1;

/// SB2.1 image header
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Default, Debug, Clone, Copy)]
pub struct Sb2Header {
    /// Random nonce, also the initial AES-CTR counter
    pub nonce: [u8; SB2_NONCE_BYTE_SIZE],

    pub reserved: [u8; 4],

    /// `STMP`
    pub signature: [u8; 4],

    pub major_version: u8,

    pub minor_version: u8,

    pub flags: U16,

    /// Size of the whole image in cipher blocks
    pub image_blocks: U32,

    /// Cipher block of the first boot tag
    pub first_boot_tag_block: U32,

    pub first_boot_section_id: U32,

    /// Byte offset of the certificate block
    pub cert_block_offset: U32,

    pub header_blocks: U16,

    pub key_blob_block: U16,

    pub key_blob_block_count: U16,

    pub max_section_mac_count: U16,

    /// `sgtl`
    pub signature2: [u8; 4],

    /// Microseconds since 2000-01-01 00:00:00 UTC
    pub timestamp: U64,

    pub product_version: [u8; 12],

    pub component_version: [u8; 12],

    pub build_number: U32,

    pub padding: [u8; 4],
}

impl Sb2Header {
    /// Returns the `Range<usize>` of the nonce within the header
    pub fn nonce_range() -> Range<usize> {
        span_of!(Sb2Header, nonce)
    }
}

/// SB2.1 certificate block header
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Default, Debug, Clone, Copy)]
pub struct Sb2CertBlockHeader {
    /// `cert`
    pub signature: [u8; 4],

    pub major_version: U16,

    pub minor_version: U16,

    pub header_length: U32,

    pub flags: U32,

    pub build_number: U32,

    /// Length of the signed part of the image
    pub total_image_length: U32,

    pub certificate_count: U32,

    pub certificate_table_length: U32,
}

/// SB2.1 boot command header
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Default, Debug, Clone, Copy)]
pub struct Sb2CommandHeader {
    pub checksum: u8,

    pub tag: u8,

    pub flags: U16,

    pub address: U32,

    pub count: U32,

    pub data: U32,
}

impl Sb2CommandHeader {
    /// Create a boot command header with its checksum filled in
    pub fn new(tag: u8, flags: u16, address: u32, count: u32, data: u32) -> Self {
        let mut header = Self {
            checksum: 0,
            tag,
            flags: flags.into(),
            address: address.into(),
            count: count.into(),
            data: data.into(),
        };
        header.checksum = header.compute_checksum();
        header
    }

    /// Checksum over every byte except the checksum itself
    pub fn compute_checksum(&self) -> u8 {
        self.as_bytes()[1..]
            .iter()
            .fold(SB2_CMD_CHECKSUM_SEED, |sum, b| sum.wrapping_add(*b))
    }
}

/// SB3.1 container header
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Default, Debug, Clone, Copy)]
pub struct Sb31Header {
    /// `sbv3`
    pub magic: [u8; 4],

    pub minor_version: U16,

    pub major_version: U16,

    pub flags: U32,

    pub block_count: U32,

    /// Size of one chained block: block number, next block hash and data
    pub block_size: U32,

    /// Seconds since 2000-01-01 00:00:00 UTC
    pub timestamp: U64,

    pub firmware_version: U32,

    pub image_total_length: U32,

    pub image_type: U32,

    pub cert_block_offset: U32,

    pub description: [u8; SB31_DESCRIPTION_BYTE_SIZE],
}

/// SB3.1 command header
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Default, Debug, Clone, Copy)]
pub struct Sb31CommandHeader {
    pub tag: U32,

    pub address: U32,

    pub length: U32,

    pub command: U32,
}

/// Certificate block v3.1 header
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Default, Debug, Clone, Copy)]
pub struct CertBlockV31Header {
    /// `chdr`
    pub magic: [u8; 4],

    pub minor_version: U16,

    pub major_version: U16,

    pub cert_block_size: U32,
}

/// Master Boot Image manifest appended to signed images
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned, Default, Debug, Clone, Copy)]
pub struct MbiManifest {
    /// `imgm`
    pub magic: [u8; 4],

    pub version: U32,

    pub firmware_version: U32,

    pub length: U32,
}
