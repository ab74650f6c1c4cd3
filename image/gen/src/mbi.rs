/*++

Licensed under the Apache-2.0 license.

File Name:

   mbi.rs

Abstract:

    File contains the Master Boot Image generator for CRC and signed images.

--*/

use serde_derive::{Deserialize, Serialize};
use sptool_error::SptoolError;
use sptool_image_types::*;
use zerocopy::IntoBytes;

use crate::crc::Crc32Mpeg2;
use crate::trustzone::{TrustZone, TrustZoneKind};
use crate::{error, CertBlockV31, CertificateChain, ImageGeneratorCrypto};

/// Image authentication
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MbiAuthentication {
    Crc,
    Signed,
}

/// Execution target
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MbiTarget {
    Ram,
    Xip,
}

/// Image type stored at offset 0x24
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MbiImageType {
    CrcRam,
    CrcXip,
    SignedXip,
    SignedXipNxp,
}

impl MbiImageType {
    /// Select the image type for `(authentication, target, use_isk)`
    pub fn select(
        authentication: MbiAuthentication,
        target: MbiTarget,
        use_isk: bool,
    ) -> anyhow::Result<Self> {
        match (authentication, target, use_isk) {
            (MbiAuthentication::Crc, MbiTarget::Ram, false) => Ok(MbiImageType::CrcRam),
            (MbiAuthentication::Crc, MbiTarget::Xip, false) => Ok(MbiImageType::CrcXip),
            (MbiAuthentication::Signed, MbiTarget::Xip, false) => Ok(MbiImageType::SignedXip),
            (MbiAuthentication::Signed, MbiTarget::Xip, true) => Ok(MbiImageType::SignedXipNxp),
            _ => Err(error(
                SptoolError::MBI_UNSUPPORTED_IMAGE_TYPE,
                format!(
                    "No image type for {authentication:?} authentication, {target:?} target, ISK {use_isk}"
                ),
            )),
        }
    }

    pub fn value(self) -> u32 {
        match self {
            MbiImageType::CrcRam => 0x02,
            MbiImageType::SignedXip => 0x04,
            MbiImageType::CrcXip => 0x05,
            MbiImageType::SignedXipNxp => 0x08,
        }
    }

    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            0x02 => Some(MbiImageType::CrcRam),
            0x04 => Some(MbiImageType::SignedXip),
            0x05 => Some(MbiImageType::CrcXip),
            0x08 => Some(MbiImageType::SignedXipNxp),
            _ => None,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, MbiImageType::SignedXip | MbiImageType::SignedXipNxp)
    }
}

/// Master Boot Image inputs
#[derive(Debug, Clone)]
pub struct MbiConfig {
    pub image_type: MbiImageType,

    /// Application binary, starting with its vector table
    pub app: Vec<u8>,

    pub load_address: u32,

    pub trustzone: TrustZone,

    /// Dual boot image version
    pub image_version: Option<u16>,

    /// Firmware version recorded in the manifest
    pub firmware_version: u32,

    pub cert_chain: Option<CertificateChain>,

    /// ISK private key when the chain has an ISK, else the used root private key
    pub signing_key: Option<PrivateKey>,
}

/// Master Boot Image generator
pub struct MbiGenerator<Crypto: ImageGeneratorCrypto> {
    crypto: Crypto,
}

fn write_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Image length or offset as a header word
fn length_word(len: usize, what: &str) -> anyhow::Result<u32> {
    u32::try_from(len).map_err(|_| {
        error(
            SptoolError::MBI_IMAGE_TOO_LARGE,
            format!("{what} of {len:#x} bytes exceeds 32 bits"),
        )
    })
}

/// Dual boot version word: the version in the low half, its complement in the high half
pub fn image_version_word(version: u16) -> u32 {
    u32::from(version) | (u32::from(!version) << 16)
}

impl<Crypto: ImageGeneratorCrypto> MbiGenerator<Crypto> {
    /// Create an instance `MbiGenerator`
    pub fn new(crypto: Crypto) -> Self {
        Self { crypto }
    }

    /// Generate image
    ///
    /// # Arguments
    ///
    /// * `config` - Master Boot Image configuration
    ///
    /// # Returns
    ///
    /// * `Vec<u8>` - Image bytes
    pub fn generate(&self, config: &MbiConfig) -> anyhow::Result<Vec<u8>> {
        if config.app.len() < MBI_MIN_APP_SIZE {
            return Err(error(
                SptoolError::MBI_APP_TOO_SMALL,
                format!(
                    "Application of {} bytes is smaller than {MBI_MIN_APP_SIZE:#x} bytes",
                    config.app.len()
                ),
            ));
        }

        let signing = if config.image_type.is_signed() {
            match (&config.cert_chain, &config.signing_key) {
                (Some(chain), Some(key)) => {
                    chain.check_signing_key(&self.crypto, key)?;
                    Some((chain, key))
                }
                _ => {
                    return Err(error(
                        SptoolError::MBI_MISSING_SIGNING_MATERIAL,
                        format!(
                            "{:?} image needs a certificate chain and a signing key",
                            config.image_type
                        ),
                    ))
                }
            }
        } else {
            None
        };

        let mut image = config.app.clone();
        image.extend_from_slice(config.trustzone.export());

        let mut image_type = config.image_type.value();
        match config.trustzone.kind() {
            TrustZoneKind::Custom => image_type |= MBI_TZM_PRESET_FLAG,
            TrustZoneKind::Disabled => image_type |= MBI_TZM_DISABLED_FLAG,
            TrustZoneKind::Enabled => {}
        }
        write_u32(&mut image, MBI_IMAGE_TYPE_OFFSET, image_type);
        write_u32(&mut image, MBI_LOAD_ADDR_OFFSET, config.load_address);
        if let Some(version) = config.image_version {
            write_u32(&mut image, MBI_IMAGE_VERSION_OFFSET, image_version_word(version));
        }

        match signing {
            None => {
                let len = length_word(image.len(), "Image length")?;
                write_u32(&mut image, MBI_IMAGE_LENGTH_OFFSET, len);
                let crc = Self::image_crc(&image);
                write_u32(&mut image, MBI_CRC_OR_CERT_OFFSET, crc);
                log::debug!("CRC image of {len} bytes, CRC {crc:#010x}");
                Ok(image)
            }
            Some((chain, key)) => {
                let cert_block = CertBlockV31::new(chain).export(&self.crypto)?;
                let manifest = MbiManifest {
                    magic: MBI_MANIFEST_MAGIC,
                    version: MBI_MANIFEST_VERSION.into(),
                    firmware_version: config.firmware_version.into(),
                    length: (std::mem::size_of::<MbiManifest>() as u32).into(),
                };
                let cert_offset = length_word(image.len(), "Certificate block offset")?;
                let signed_len = image.len() + cert_block.len() + manifest.as_bytes().len();
                let signed_len = length_word(signed_len, "Signed length")?;
                write_u32(&mut image, MBI_IMAGE_LENGTH_OFFSET, signed_len);
                write_u32(&mut image, MBI_CRC_OR_CERT_OFFSET, cert_offset);
                image.extend(cert_block);
                image.extend_from_slice(manifest.as_bytes());

                let signature = self.crypto.sign(&image, key)?;
                log::debug!(
                    "Signed image of {signed_len} bytes, certificate block at {cert_offset:#x}"
                );
                image.extend(signature);
                Ok(image)
            }
        }
    }

    /// CRC32/MPEG-2 of `image`, skipping the CRC word
    pub fn image_crc(image: &[u8]) -> u32 {
        let mut crc = Crc32Mpeg2::default();
        crc.update(&image[..MBI_CRC_OR_CERT_OFFSET]);
        crc.update(&image[MBI_CRC_OR_CERT_OFFSET + 4..]);
        crc.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_type_table() {
        use MbiAuthentication::*;
        use MbiTarget::*;
        assert_eq!(MbiImageType::select(Crc, Ram, false).unwrap().value(), 0x02);
        assert_eq!(MbiImageType::select(Crc, Xip, false).unwrap().value(), 0x05);
        assert_eq!(MbiImageType::select(Signed, Xip, false).unwrap().value(), 0x04);
        assert_eq!(MbiImageType::select(Signed, Xip, true).unwrap().value(), 0x08);
        for (auth, target, isk) in [
            (Crc, Ram, true),
            (Crc, Xip, true),
            (Signed, Ram, false),
            (Signed, Ram, true),
        ] {
            let err = MbiImageType::select(auth, target, isk).unwrap_err();
            assert_eq!(
                err.downcast_ref::<SptoolError>(),
                Some(&SptoolError::MBI_UNSUPPORTED_IMAGE_TYPE)
            );
        }
    }

    #[test]
    fn test_image_type_round_trip() {
        for ty in [
            MbiImageType::CrcRam,
            MbiImageType::CrcXip,
            MbiImageType::SignedXip,
            MbiImageType::SignedXipNxp,
        ] {
            assert_eq!(MbiImageType::from_value(ty.value()), Some(ty));
        }
        assert!(MbiImageType::SignedXipNxp.is_signed());
        assert!(!MbiImageType::CrcXip.is_signed());
    }

    #[test]
    fn test_length_word() {
        assert_eq!(length_word(0x1234, "Image length").unwrap(), 0x1234);
        assert_eq!(length_word(u32::MAX as usize, "Image length").unwrap(), u32::MAX);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_length_word_overflow() {
        let err = length_word(u32::MAX as usize + 1, "Image length").unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::MBI_IMAGE_TOO_LARGE)
        );
    }

    #[test]
    fn test_image_version_word() {
        assert_eq!(image_version_word(1), 0xfffe_0001);
        assert_eq!(image_version_word(0), 0xffff_0000);
    }
}
