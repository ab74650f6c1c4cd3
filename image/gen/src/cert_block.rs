/*++

Licensed under the Apache-2.0 license.

File Name:

   cert_block.rs

Abstract:

    File contains the root-of-trust certificate chain and the v2 and v3.1 certificate blocks.

--*/

use sptool_error::SptoolError;
use sptool_image_types::*;
use zerocopy::IntoBytes;

use crate::{align_up, error, pad_to, public_key_hash, ImageGeneratorCrypto};

/// Image signing key to certify with the used root key
#[derive(Debug, Clone)]
pub struct IskRequest {
    pub public_key: PublicKey,

    /// Constraint word stored next to the ISK
    pub constraints: u32,

    pub user_data: Option<Vec<u8>>,

    /// Root private key that signs the ISK record
    pub signing_key: Option<PrivateKey>,
}

/// Image signing key certified by the used root key
#[derive(Debug, Clone)]
pub struct IskCertificate {
    pub public_key: PublicKey,

    pub constraints: u32,

    pub user_data: Vec<u8>,

    signing_key: PrivateKey,
}

/// Root-of-trust certificate chain
#[derive(Debug, Clone)]
pub struct CertificateChain {
    root_keys: Vec<PublicKey>,

    used_root_cert: usize,

    isk: Option<IskCertificate>,

    is_ca: bool,
}

/// Build a certificate chain
///
/// At most four root keys are kept. When an ISK is requested, the supplied
/// signing key must be the private half of the used root key.
pub fn build_chain<C: ImageGeneratorCrypto>(
    crypto: &C,
    mut root_keys: Vec<PublicKey>,
    used_root_cert: usize,
    isk: Option<IskRequest>,
    is_ca: bool,
) -> anyhow::Result<CertificateChain> {
    if root_keys.is_empty() {
        return Err(error(
            SptoolError::CHAIN_NO_ROOT_CERTS,
            "Certificate chain needs at least one root key",
        ));
    }
    if root_keys.len() > MAX_ROOT_KEY_COUNT {
        log::warn!(
            "{} root keys supplied, only the first {MAX_ROOT_KEY_COUNT} are used",
            root_keys.len()
        );
        root_keys.truncate(MAX_ROOT_KEY_COUNT);
    }
    if used_root_cert >= root_keys.len() {
        return Err(error(
            SptoolError::CHAIN_INVALID_ROOT_INDEX,
            format!(
                "Used root certificate {used_root_cert} out of range of {} root keys",
                root_keys.len()
            ),
        ));
    }

    let isk = match isk {
        None => None,
        Some(request) => {
            let signing_key = request.signing_key.ok_or_else(|| {
                error(
                    SptoolError::CHAIN_ISK_MISSING_SIGNING_KEY,
                    "Image signing key requested without the root private key",
                )
            })?;
            if crypto.public_key_of(&signing_key)? != root_keys[used_root_cert] {
                return Err(error(
                    SptoolError::CHAIN_SIGNING_KEY_MISMATCH,
                    format!("ISK signing key is not the private key of root {used_root_cert}"),
                ));
            }
            Some(IskCertificate {
                public_key: request.public_key,
                constraints: request.constraints,
                user_data: request.user_data.unwrap_or_default(),
                signing_key,
            })
        }
    };

    Ok(CertificateChain {
        root_keys,
        used_root_cert,
        isk,
        is_ca,
    })
}

impl CertificateChain {
    pub fn root_keys(&self) -> &[PublicKey] {
        &self.root_keys
    }

    pub fn used_root_cert(&self) -> usize {
        self.used_root_cert
    }

    pub fn used_root_key(&self) -> &PublicKey {
        &self.root_keys[self.used_root_cert]
    }

    pub fn isk(&self) -> Option<&IskCertificate> {
        self.isk.as_ref()
    }

    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Key whose private half signs the container
    pub fn signing_public_key(&self) -> &PublicKey {
        match &self.isk {
            Some(isk) => &isk.public_key,
            None => self.used_root_key(),
        }
    }

    /// Check that `key` is the private half of the container signing key
    pub fn check_signing_key<C: ImageGeneratorCrypto>(
        &self,
        crypto: &C,
        key: &PrivateKey,
    ) -> anyhow::Result<()> {
        if crypto.public_key_of(key)? != *self.signing_public_key() {
            let which = if self.isk.is_some() {
                "image signing key".to_string()
            } else {
                format!("root key {}", self.used_root_cert)
            };
            return Err(error(
                SptoolError::CHAIN_SIGNING_KEY_MISMATCH,
                format!("Signing key does not match the {which}"),
            ));
        }
        Ok(())
    }

    /// ROTKH of the root keys for a `field_width` bit destination
    pub fn rotkh<C: ImageGeneratorCrypto>(
        &self,
        crypto: &C,
        field_width: usize,
    ) -> anyhow::Result<Vec<u8>> {
        crate::compute_rotkh(crypto, &self.root_keys, field_width)
    }

    /// Curve shared by every root key
    pub fn root_curve(&self) -> anyhow::Result<EccCurve> {
        let mut curve = None;
        for key in &self.root_keys {
            let key_curve = key.curve().ok_or_else(|| {
                error(
                    SptoolError::CHAIN_UNSUPPORTED_KEY_TYPE,
                    "Root keys must be elliptic curve keys",
                )
            })?;
            match curve {
                None => curve = Some(key_curve),
                Some(first) if first != key_curve => {
                    return Err(error(
                        SptoolError::CHAIN_MIXED_CURVES,
                        format!("Root keys mix {first:?} and {key_curve:?}"),
                    ))
                }
                Some(_) => {}
            }
        }
        curve.ok_or_else(|| error(SptoolError::CHAIN_NO_ROOT_CERTS, "No root key"))
    }
}

/// SB2.1 certificate block: signing certificates plus the root key hash table
#[derive(Debug, Clone)]
pub struct CertBlockV2 {
    build_number: u32,

    certificates: Vec<Vec<u8>>,

    chain: CertificateChain,

    signing_key: PublicKey,
}

impl CertBlockV2 {
    /// Create a certificate block
    ///
    /// # Arguments
    ///
    /// * `signing_certs` - DER certificates, the first issued by a root
    /// * `root_certs` - DER root certificates, at most four are used
    pub fn new<C: ImageGeneratorCrypto>(
        crypto: &C,
        build_number: u32,
        signing_certs: Vec<Vec<u8>>,
        root_certs: &[Vec<u8>],
    ) -> anyhow::Result<Self> {
        let (first, last) = match (signing_certs.first(), signing_certs.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(error(
                    SptoolError::CHAIN_EMPTY_SIGNING_CERTS,
                    "SB2.1 needs at least one signing certificate",
                ))
            }
        };

        let kept = &root_certs[..root_certs.len().min(MAX_ROOT_KEY_COUNT)];
        let used_root_cert = kept.iter().position(|root| root == first).ok_or_else(|| {
            error(
                SptoolError::CHAIN_SIGNING_CERT_NOT_ROOTED,
                "First signing certificate matches no root certificate",
            )
        })?;

        if root_certs.len() > MAX_ROOT_KEY_COUNT {
            log::warn!(
                "{} root certificates supplied, only the first {MAX_ROOT_KEY_COUNT} are used",
                root_certs.len()
            );
        }
        let root_keys = kept
            .iter()
            .map(|cert| C::public_key_from_cert(cert))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let chain = build_chain(crypto, root_keys, used_root_cert, None, true)?;
        let signing_key = C::public_key_from_cert(last)?;

        Ok(Self {
            build_number,
            certificates: signing_certs,
            chain,
            signing_key,
        })
    }

    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }

    /// Public key of the last signing certificate
    pub fn signing_key(&self) -> &PublicKey {
        &self.signing_key
    }

    fn certificate_table_len(&self) -> usize {
        self.certificates
            .iter()
            .map(|cert| 4 + align_up(cert.len(), 4))
            .sum()
    }

    /// Exported size in bytes
    pub fn len(&self) -> usize {
        align_up(
            std::mem::size_of::<Sb2CertBlockHeader>()
                + self.certificate_table_len()
                + MAX_ROOT_KEY_COUNT * SHA256_DIGEST_BYTE_SIZE,
            SB2_BLOCK_SIZE,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Root key hash table: four SHA-256 slots, zeros for absent roots
    pub fn root_key_hash_table<C: ImageGeneratorCrypto>(
        &self,
        crypto: &C,
    ) -> anyhow::Result<Vec<u8>> {
        let mut table = Vec::with_capacity(MAX_ROOT_KEY_COUNT * SHA256_DIGEST_BYTE_SIZE);
        for slot in 0..MAX_ROOT_KEY_COUNT {
            match self.chain.root_keys().get(slot) {
                Some(key) => table.extend(public_key_hash(crypto, key, 256)?),
                None => table.extend_from_slice(&[0u8; SHA256_DIGEST_BYTE_SIZE]),
            }
        }
        Ok(table)
    }

    /// SHA-256 of the root key hash table, the value fused as ROTKH
    pub fn rkht<C: ImageGeneratorCrypto>(&self, crypto: &C) -> anyhow::Result<Vec<u8>> {
        crypto.digest(HashAlgorithm::Sha256, &self.root_key_hash_table(crypto)?)
    }

    /// Serialize the block for an image whose signed part is `total_image_length` bytes
    pub fn export<C: ImageGeneratorCrypto>(
        &self,
        crypto: &C,
        total_image_length: u32,
    ) -> anyhow::Result<Vec<u8>> {
        let header = Sb2CertBlockHeader {
            signature: SB2_CERT_SIGNATURE,
            major_version: 1u16.into(),
            minor_version: 0u16.into(),
            header_length: (std::mem::size_of::<Sb2CertBlockHeader>() as u32).into(),
            flags: 0u32.into(),
            build_number: self.build_number.into(),
            total_image_length: total_image_length.into(),
            certificate_count: (self.certificates.len() as u32).into(),
            certificate_table_length: (self.certificate_table_len() as u32).into(),
        };

        let mut block = header.as_bytes().to_vec();
        for cert in &self.certificates {
            block.extend_from_slice(&(align_up(cert.len(), 4) as u32).to_le_bytes());
            block.extend_from_slice(cert);
            pad_to(&mut block, 4);
        }
        block.extend(self.root_key_hash_table(crypto)?);
        pad_to(&mut block, SB2_BLOCK_SIZE);
        Ok(block)
    }
}

/// Certificate block v3.1 used by SB3.1 and signed boot images
pub struct CertBlockV31<'a> {
    chain: &'a CertificateChain,
}

impl<'a> CertBlockV31<'a> {
    pub fn new(chain: &'a CertificateChain) -> Self {
        Self { chain }
    }

    /// Serialize the block, signing the ISK record with the root private key
    pub fn export<C: ImageGeneratorCrypto>(&self, crypto: &C) -> anyhow::Result<Vec<u8>> {
        let curve = self.chain.root_curve()?;
        let root_count = self.chain.root_keys().len();

        let mut record = Vec::new();
        let mut flags = (self.chain.used_root_cert() as u32) << 8
            | (root_count as u32) << 4
            | curve.cert_block_id();
        if self.chain.is_ca() {
            flags |= CERT_BLOCK_V31_CA_FLAG;
        }
        record.extend_from_slice(&flags.to_le_bytes());
        if root_count > 1 {
            for key in self.chain.root_keys() {
                record.extend(public_key_hash(crypto, key, curve.bits())?);
            }
        }
        record.extend(ecc_point(self.chain.used_root_key(), curve)?);

        if let Some(isk) = self.chain.isk() {
            let isk_curve = isk.public_key.curve().ok_or_else(|| {
                error(
                    SptoolError::CHAIN_UNSUPPORTED_KEY_TYPE,
                    "Image signing key must be an elliptic curve key",
                )
            })?;
            let mut isk_flags = isk_curve.cert_block_id();
            let mut user_data = Vec::new();
            if !isk.user_data.is_empty() {
                isk_flags |= CERT_BLOCK_V31_USER_DATA_FLAG;
                user_data.extend_from_slice(&(isk.user_data.len() as u32).to_le_bytes());
                user_data.extend_from_slice(&isk.user_data);
                pad_to(&mut user_data, 4);
            }
            let signature_offset = 12 + isk_curve.signature_len() + user_data.len();
            record.extend_from_slice(&(signature_offset as u32).to_le_bytes());
            record.extend_from_slice(&isk.constraints.to_le_bytes());
            record.extend_from_slice(&isk_flags.to_le_bytes());
            record.extend(ecc_point(&isk.public_key, isk_curve)?);
            record.extend(user_data);
        }

        let signature_len = match self.chain.isk() {
            Some(_) => curve.signature_len(),
            None => 0,
        };
        let total = std::mem::size_of::<CertBlockV31Header>() + record.len() + signature_len;
        let header = CertBlockV31Header {
            magic: CERT_BLOCK_V31_MAGIC,
            minor_version: CERT_BLOCK_V31_MINOR_VERSION.into(),
            major_version: CERT_BLOCK_V31_MAJOR_VERSION.into(),
            cert_block_size: (total as u32).into(),
        };

        let mut block = header.as_bytes().to_vec();
        block.extend(record);
        if let Some(isk) = self.chain.isk() {
            let signature = crypto.sign(&block, &isk.signing_key)?;
            block.extend(signature);
        }
        Ok(block)
    }
}

/// `X || Y` at the coordinate width of `curve`
fn ecc_point(key: &PublicKey, curve: EccCurve) -> anyhow::Result<Vec<u8>> {
    match key {
        PublicKey::Ecc { x, y, .. } => {
            let len = curve.coordinate_len();
            let mut point = vec![0u8; 2 * len];
            if x.len() > len || y.len() > len {
                return Err(error(
                    SptoolError::CHAIN_MIXED_CURVES,
                    format!("Key coordinates exceed {curve:?}"),
                ));
            }
            point[len - x.len()..len].copy_from_slice(x);
            point[2 * len - y.len()..].copy_from_slice(y);
            Ok(point)
        }
        PublicKey::Rsa { .. } => Err(error(
            SptoolError::CHAIN_UNSUPPORTED_KEY_TYPE,
            "Certificate block v3.1 supports elliptic curve keys only",
        )),
    }
}
