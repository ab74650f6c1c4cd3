/*++

Licensed under the Apache-2.0 license.

File Name:

   cert_block.rs

Abstract:

    File contains the certificate block v3.1 parser.

--*/

use sptool_error::SptoolError;
use sptool_image_gen::{error, ImageGeneratorCrypto};
use sptool_image_types::*;
use zerocopy::FromBytes;

/// Image signing key record of a certificate block
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IskInfo {
    pub public_key: PublicKey,

    pub constraints: u32,

    pub user_data: Vec<u8>,
}

/// Parsed certificate block v3.1
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CertBlockV31Info {
    pub curve: EccCurve,

    pub root_count: usize,

    pub used_root_cert: usize,

    pub is_ca: bool,

    /// Root key hashes; empty when the block carries a single root
    pub root_key_hashes: Vec<Vec<u8>>,

    pub used_root_key: PublicKey,

    pub isk: Option<IskInfo>,

    /// Size of the block in bytes
    pub len: usize,
}

impl CertBlockV31Info {
    /// Key whose private half signs the enclosing container
    pub fn signing_key(&self) -> &PublicKey {
        match &self.isk {
            Some(isk) => &isk.public_key,
            None => &self.used_root_key,
        }
    }

    /// ROTKH implied by the block, at the width of the root curve
    pub fn rotkh<C: ImageGeneratorCrypto>(&self, crypto: &C) -> anyhow::Result<Vec<u8>> {
        let slot_len = self.curve.hash_algorithm().digest_len();
        let mut table = Vec::with_capacity(MAX_ROOT_KEY_COUNT * slot_len);
        if self.root_key_hashes.is_empty() {
            table.extend(sptool_image_gen::public_key_hash(
                crypto,
                &self.used_root_key,
                self.curve.bits(),
            )?);
        } else {
            for hash in &self.root_key_hashes {
                table.extend_from_slice(hash);
            }
        }
        table.resize(MAX_ROOT_KEY_COUNT * slot_len, 0);
        crypto.digest(self.curve.hash_algorithm(), &table)
    }
}

fn invalid(context: impl std::fmt::Display) -> anyhow::Error {
    error(SptoolError::PARSE_INVALID_CERTIFICATE, context)
}

/// Cursor over a little-endian byte record
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| invalid("Certificate block is truncated"))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u32(&mut self) -> anyhow::Result<u32> {
        let mut word = [0u8; 4];
        word.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(word))
    }

    fn point(&mut self, curve: EccCurve) -> anyhow::Result<PublicKey> {
        let len = curve.coordinate_len();
        let point = self.take(2 * len)?;
        Ok(PublicKey::Ecc {
            curve,
            x: point[..len].to_vec(),
            y: point[len..].to_vec(),
        })
    }
}

fn curve_of(id: u32) -> anyhow::Result<EccCurve> {
    EccCurve::from_cert_block_id(id).ok_or_else(|| invalid(format!("Unknown curve id {id}")))
}

/// Parse the certificate block at the start of `bytes`
///
/// The ISK record, when present, must carry a valid signature of the used root key.
///
/// # Arguments
///
/// * `crypto` - Crypto provider
/// * `bytes` - Certificate block followed by anything
///
/// # Returns
///
/// * `CertBlockV31Info` - Parsed block
pub fn parse_cert_block_v31<C: ImageGeneratorCrypto>(
    crypto: &C,
    bytes: &[u8],
) -> anyhow::Result<CertBlockV31Info> {
    let (header, _) = CertBlockV31Header::read_from_prefix(bytes)
        .map_err(|_| invalid("Certificate block header is truncated"))?;
    if header.magic != CERT_BLOCK_V31_MAGIC
        || header.major_version.get() != CERT_BLOCK_V31_MAJOR_VERSION
        || header.minor_version.get() != CERT_BLOCK_V31_MINOR_VERSION
    {
        return Err(invalid("Not a version 2.1 certificate block"));
    }
    let len = header.cert_block_size.get() as usize;
    if len > bytes.len() {
        return Err(invalid(format!(
            "Certificate block of {len} bytes exceeds the {} available",
            bytes.len()
        )));
    }

    let mut reader = Reader {
        bytes: &bytes[..len],
        offset: std::mem::size_of::<CertBlockV31Header>(),
    };
    let flags = reader.u32()?;
    let curve = curve_of(flags & 0xf)?;
    let root_count = ((flags >> 4) & 0xf) as usize;
    let used_root_cert = ((flags >> 8) & 0xf) as usize;
    if root_count == 0 || root_count > MAX_ROOT_KEY_COUNT || used_root_cert >= root_count {
        return Err(invalid(format!(
            "Root certificate {used_root_cert} of {root_count} is out of range"
        )));
    }

    let mut root_key_hashes = Vec::new();
    if root_count > 1 {
        for _ in 0..root_count {
            root_key_hashes.push(reader.take(curve.hash_algorithm().digest_len())?.to_vec());
        }
    }
    let used_root_key = reader.point(curve)?;
    if !root_key_hashes.is_empty() {
        let hash = sptool_image_gen::public_key_hash(crypto, &used_root_key, curve.bits())?;
        if root_key_hashes[used_root_cert] != hash {
            return Err(invalid(format!(
                "Root key does not match hash slot {used_root_cert}"
            )));
        }
    }

    let isk = if reader.offset < len {
        let _signature_offset = reader.u32()?;
        let constraints = reader.u32()?;
        let isk_flags = reader.u32()?;
        let public_key = reader.point(curve_of(isk_flags & 0xf)?)?;
        let user_data = if isk_flags & CERT_BLOCK_V31_USER_DATA_FLAG != 0 {
            let data_len = reader.u32()? as usize;
            let data = reader.take(data_len)?.to_vec();
            reader.take(data_len.next_multiple_of(4) - data_len)?;
            data
        } else {
            Vec::new()
        };

        let signed_len = reader.offset;
        let signature = reader.take(curve.signature_len())?;
        if !crypto.verify(&bytes[..signed_len], signature, &used_root_key)? {
            return Err(error(
                SptoolError::CRYPTO_VERIFY_FAILURE,
                "Image signing key record signature does not verify",
            ));
        }
        Some(IskInfo {
            public_key,
            constraints,
            user_data,
        })
    } else {
        None
    };

    if reader.offset != len {
        return Err(invalid(format!(
            "Certificate block declares {len} bytes, parsed {}",
            reader.offset
        )));
    }

    Ok(CertBlockV31Info {
        curve,
        root_count,
        used_root_cert,
        is_ca: flags & CERT_BLOCK_V31_CA_FLAG != 0,
        root_key_hashes,
        used_root_key,
        isk,
        len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sptool_image_crypto::RustCrypto;
    use sptool_image_gen::{build_chain, CertBlockV31, IskRequest};
    use std::io::Write;

    fn private_key(pem: &str) -> PrivateKey {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(pem.as_bytes()).unwrap();
        RustCrypto::private_key_from_pem(file.path()).unwrap()
    }

    fn public_key(pem: &str) -> PublicKey {
        RustCrypto::default().public_key_of(&private_key(pem)).unwrap()
    }

    #[test]
    fn test_two_roots() {
        let crypto = RustCrypto::default();
        let keys = vec![
            public_key(sptool_image_fake_keys::P256_ROOT0_PEM),
            public_key(sptool_image_fake_keys::P256_ROOT1_PEM),
        ];
        let chain = build_chain(&crypto, keys.clone(), 1, None, true).unwrap();
        let block = CertBlockV31::new(&chain).export(&crypto).unwrap();

        let info = parse_cert_block_v31(&crypto, &block).unwrap();
        assert_eq!(info.len, block.len());
        assert_eq!(info.root_count, 2);
        assert_eq!(info.used_root_cert, 1);
        assert!(info.is_ca);
        assert_eq!(info.used_root_key, keys[1]);
        assert!(info.isk.is_none());
        assert_eq!(
            info.rotkh(&crypto).unwrap(),
            chain.rotkh(&crypto, 256).unwrap()
        );
    }

    #[test]
    fn test_isk_record() {
        let crypto = RustCrypto::default();
        let root = public_key(sptool_image_fake_keys::P256_ROOT0_PEM);
        let isk_key = public_key(sptool_image_fake_keys::P256_ISK_PEM);
        let request = IskRequest {
            public_key: isk_key.clone(),
            constraints: 7,
            user_data: Some(b"board-a".to_vec()),
            signing_key: Some(private_key(sptool_image_fake_keys::P256_ROOT0_PEM)),
        };
        let chain = build_chain(&crypto, vec![root.clone()], 0, Some(request), false).unwrap();
        let mut block = CertBlockV31::new(&chain).export(&crypto).unwrap();

        let info = parse_cert_block_v31(&crypto, &block).unwrap();
        let isk = info.isk.as_ref().unwrap();
        assert_eq!(isk.constraints, 7);
        assert_eq!(isk.user_data, b"board-a".to_vec());
        assert_eq!(info.signing_key(), &isk_key);
        assert!(info.root_key_hashes.is_empty());
        assert_eq!(
            info.rotkh(&crypto).unwrap(),
            chain.rotkh(&crypto, 256).unwrap()
        );

        // Constraint word is covered by the root signature
        let constraints_offset = 12 + 4 + 64 + 4;
        block[constraints_offset] ^= 1;
        let err = parse_cert_block_v31(&crypto, &block).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::CRYPTO_VERIFY_FAILURE)
        );
    }

    #[test]
    fn test_bad_magic() {
        let err = parse_cert_block_v31(&RustCrypto::default(), &[0u8; 64]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::PARSE_INVALID_CERTIFICATE)
        );
    }
}
