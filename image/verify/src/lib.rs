/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    Container verification library: SB2.1, SB3.1 and Master Boot Image parsers.

--*/

mod cert_block;
mod commands;
mod verifier;

pub use cert_block::{parse_cert_block_v31, CertBlockV31Info, IskInfo};
pub use commands::{decode_sb21_commands, decode_sb31_commands};
pub use verifier::ContainerVerifier;

use bitflags::bitflags;
use sptool_image_gen::compiler::ComponentVersion;
use sptool_image_gen::trustzone::TrustZoneKind;
use sptool_image_gen::MbiImageType;
use sptool_image_types::{Command, PublicKey, Section, MBI_TZM_DISABLED_FLAG, MBI_TZM_PRESET_FLAG};

bitflags! {
    /// Flags OR-ed into the Master Boot Image type word
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct MbiTypeFlags: u32 {
        const TZM_PRESET = MBI_TZM_PRESET_FLAG;
        const TZM_DISABLED = MBI_TZM_DISABLED_FLAG;
    }
}

impl MbiTypeFlags {
    pub fn trustzone_kind(self) -> TrustZoneKind {
        if self.contains(MbiTypeFlags::TZM_DISABLED) {
            TrustZoneKind::Disabled
        } else if self.contains(MbiTypeFlags::TZM_PRESET) {
            TrustZoneKind::Custom
        } else {
            TrustZoneKind::Enabled
        }
    }
}

/// Verified SB2.1 container information
#[derive(Debug, Clone)]
pub struct Sb21VerificationInfo {
    pub product_version: ComponentVersion,

    pub component_version: ComponentVersion,

    pub build_number: u32,

    /// Seconds since 2000-01-01
    pub timestamp: u64,

    /// DER signing certificates
    pub certificates: Vec<Vec<u8>>,

    /// SHA-256 of the root key hash table
    pub rotkh: Vec<u8>,

    /// Decrypted boot sections
    pub sections: Vec<Section>,
}

/// Verified SB3.1 container information
#[derive(Debug, Clone)]
pub struct Sb31VerificationInfo {
    pub firmware_version: u32,

    /// Seconds since 2000-01-01
    pub timestamp: u64,

    pub is_nxp_container: bool,

    /// Description without trailing zeros
    pub description: String,

    pub cert_block: CertBlockV31Info,

    pub block_count: u32,

    /// Commands, when the blocks are plain or a container key was supplied
    pub commands: Option<Vec<Command>>,
}

/// Verified Master Boot Image information
#[derive(Debug, Clone)]
pub struct MbiVerificationInfo {
    pub image_type: MbiImageType,

    pub trustzone: TrustZoneKind,

    pub load_address: u32,

    /// Length recorded at offset 0x20
    pub image_length: u32,

    /// Dual boot version, when the version word is consistent
    pub image_version: Option<u16>,

    /// Manifest firmware version of signed images
    pub firmware_version: Option<u32>,

    pub cert_block: Option<CertBlockV31Info>,

    /// Key that verified the signature of signed images
    pub signing_key: Option<PublicKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trustzone_flags() {
        assert_eq!(
            MbiTypeFlags::from_bits_truncate(0x4005).trustzone_kind(),
            TrustZoneKind::Disabled
        );
        assert_eq!(
            MbiTypeFlags::from_bits_truncate(0x2004).trustzone_kind(),
            TrustZoneKind::Custom
        );
        assert_eq!(
            MbiTypeFlags::from_bits_truncate(0x0008).trustzone_kind(),
            TrustZoneKind::Enabled
        );
    }
}
