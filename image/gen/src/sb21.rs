/*++

Licensed under the Apache-2.0 license.

File Name:

   sb21.rs

Abstract:

    File contains the Secure Binary v2.1 generator.

--*/

use sptool_error::SptoolError;
use sptool_image_types::*;
use zerocopy::IntoBytes;

use crate::compiler::{CompiledScript, ComponentVersion};
use crate::crc::crc32_mpeg2;
use crate::keywrap::aes_wrap;
use crate::timestamp::{current_timestamp, to_micros};
use crate::{error, pad_to, CertBlockV2, ImageGeneratorCrypto};

/// Size of a wrapped key blob written by a `keywrap` command
const WRAPPED_KEY_BLOB_BYTE_SIZE: usize = 64;

/// Per-image secrets; random unless supplied
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Sb21Secrets {
    pub nonce: [u8; SB2_NONCE_BYTE_SIZE],
    pub dek: [u8; SB2_DEK_BYTE_SIZE],
    pub mac: [u8; SB2_MAC_KEY_BYTE_SIZE],
}

impl Sb21Secrets {
    /// Fresh secrets from the crypto provider
    pub fn random<C: ImageGeneratorCrypto>(crypto: &C) -> anyhow::Result<Self> {
        let mut secrets = Self {
            nonce: [0; SB2_NONCE_BYTE_SIZE],
            dek: [0; SB2_DEK_BYTE_SIZE],
            mac: [0; SB2_MAC_KEY_BYTE_SIZE],
        };
        secrets.nonce.copy_from_slice(&crypto.random_bytes(SB2_NONCE_BYTE_SIZE)?);
        secrets.dek.copy_from_slice(&crypto.random_bytes(SB2_DEK_BYTE_SIZE)?);
        secrets.mac.copy_from_slice(&crypto.random_bytes(SB2_MAC_KEY_BYTE_SIZE)?);
        Ok(secrets)
    }
}

/// SB2.1 generation inputs besides the compiled script
#[derive(Debug, Clone, Default)]
pub struct Sb21Options {
    /// Key encryption key wrapping the DEK and MAC keys
    pub kek: Option<Vec<u8>>,

    /// Seconds since 2000-01-01
    pub timestamp: Option<u64>,

    pub secrets: Option<Sb21Secrets>,

    /// DER signing certificates, the first issued by a root
    pub signing_certs: Vec<Vec<u8>>,

    /// DER root certificates
    pub root_certs: Vec<Vec<u8>>,

    /// RSA private key of the last signing certificate
    pub signing_key: Option<PrivateKey>,
}

/// Generated SB2.1 container with its ROTKH side artifact
#[derive(Debug, Clone)]
pub struct Sb21Image {
    pub container: Vec<u8>,

    /// SHA-256 of the root key hash table
    pub rotkh: Vec<u8>,
}

/// NXP counter mode: block `k` uses the nonce with `start_block + k` added to its last
/// little-endian word as the counter
pub fn nxp_aes_ctr<C: ImageGeneratorCrypto>(
    crypto: &C,
    key: &[u8],
    nonce: &[u8; SB2_NONCE_BYTE_SIZE],
    start_block: u32,
    data: &[u8],
) -> anyhow::Result<Vec<u8>> {
    let mut last_word = [0u8; 4];
    last_word.copy_from_slice(&nonce[12..]);
    let base = u32::from_le_bytes(last_word);

    let mut out = Vec::with_capacity(data.len());
    for (k, chunk) in data.chunks(SB2_BLOCK_SIZE).enumerate() {
        let mut counter = *nonce;
        let word = base.wrapping_add(start_block).wrapping_add(k as u32);
        counter[12..].copy_from_slice(&word.to_le_bytes());
        let keystream = crypto.aes_encrypt_block(key, &counter)?;
        out.extend(chunk.iter().zip(keystream.iter()).map(|(d, k)| d ^ k));
    }
    Ok(out)
}

fn memory_flags(memory_id: u32) -> u16 {
    ((memory_id << 8) & 0xff00) as u16
}

fn header_only(header: Sb2CommandHeader) -> Vec<u8> {
    header.as_bytes().to_vec()
}

fn load_bytes(address: u32, data: &[u8], memory_id: u32) -> Vec<u8> {
    let mut payload = data.to_vec();
    pad_to(&mut payload, SB2_BLOCK_SIZE);
    let header = Sb2CommandHeader::new(
        SB2_CMD_LOAD,
        memory_flags(memory_id),
        address,
        data.len() as u32,
        crc32_mpeg2(&payload),
    );
    let mut bytes = header.as_bytes().to_vec();
    bytes.extend(payload);
    bytes
}

/// Encode one boot command: a 16-byte header and its payload padded to 16 bytes
pub fn encode_command<C: ImageGeneratorCrypto>(
    crypto: &C,
    command: &Command,
) -> anyhow::Result<Vec<u8>> {
    let bytes = match &command.kind {
        CommandKind::Load {
            address,
            data,
            memory_id,
        } => load_bytes(*address, data, *memory_id),
        CommandKind::Fill {
            address,
            length,
            pattern,
        } => header_only(Sb2CommandHeader::new(
            SB2_CMD_FILL,
            0,
            *address,
            *length,
            *pattern,
        )),
        CommandKind::Erase {
            address,
            length,
            memory_id,
            erase_all,
        } => {
            let mut flags = memory_flags(*memory_id);
            if *erase_all {
                flags |= SB2_ERASE_FLAG_ALL;
            }
            header_only(Sb2CommandHeader::new(
                SB2_CMD_ERASE,
                flags,
                *address,
                *length,
                0,
            ))
        }
        CommandKind::Enable {
            address,
            size,
            memory_id,
        } => header_only(Sb2CommandHeader::new(
            SB2_CMD_MEM_ENABLE,
            memory_flags(*memory_id),
            *address,
            *size,
            0,
        )),
        CommandKind::Reset => header_only(Sb2CommandHeader::new(SB2_CMD_RESET, 0, 0, 0, 0)),
        CommandKind::Jump {
            address,
            argument,
            stack_pointer,
        } => {
            let (flags, count) = match stack_pointer {
                Some(sp) => (SB2_JUMP_FLAG_SP, *sp),
                None => (0, 0),
            };
            header_only(Sb2CommandHeader::new(
                SB2_CMD_JUMP,
                flags,
                *address,
                count,
                *argument,
            ))
        }
        CommandKind::Call { address, argument } => header_only(Sb2CommandHeader::new(
            SB2_CMD_CALL,
            0,
            *address,
            0,
            *argument,
        )),
        CommandKind::KeyStoreToNv { address, memory_id } => header_only(Sb2CommandHeader::new(
            SB2_CMD_KEYSTORE_TO_NV,
            memory_flags(*memory_id),
            *address,
            0,
            0,
        )),
        CommandKind::KeyStoreFromNv { address, memory_id } => {
            header_only(Sb2CommandHeader::new(
                SB2_CMD_KEYSTORE_FROM_NV,
                memory_flags(*memory_id),
                *address,
                0,
                0,
            ))
        }
        CommandKind::VersionCheck { counter, version } => header_only(Sb2CommandHeader::new(
            SB2_CMD_FW_VERSION_CHECK,
            0,
            counter.id(),
            *version,
            0,
        )),
        CommandKind::KeyWrap { blob, address, kek } => {
            let mut wrapped = aes_wrap(crypto, kek, &blob.to_bytes())?;
            wrapped.resize(WRAPPED_KEY_BLOB_BYTE_SIZE, 0);
            load_bytes(*address, &wrapped, 0)
        }
        CommandKind::Encrypt {
            blob,
            address,
            data,
        } => {
            let mut iv = [0u8; AES_BLOCK_SIZE];
            iv[..8].copy_from_slice(&blob.counter);
            iv[8..12].copy_from_slice(&address.to_be_bytes());
            let encrypted = crypto.aes_ctr(&blob.key, &iv, data)?;
            load_bytes(*address, &encrypted, 0)
        }
        CommandKind::ProgramFuses { .. }
        | CommandKind::LoadKeyBlob { .. }
        | CommandKind::Copy { .. } => {
            return Err(error(
                SptoolError::SB21_UNSUPPORTED_COMMAND,
                format!(
                    "Command `{}` (section {}, command {}) is not available in SB2.1",
                    command.kind.name(),
                    command.position.section,
                    command.position.index
                ),
            ))
        }
    };
    Ok(bytes)
}

/// Secure Binary v2.1 generator
pub struct Sb21Generator<Crypto: ImageGeneratorCrypto> {
    crypto: Crypto,
}

struct EncryptedSection {
    encrypted_tag: Vec<u8>,
    hmac_tag: [u8; HMAC_SHA256_BYTE_SIZE],
    hmac_data: [u8; HMAC_SHA256_BYTE_SIZE],
    encrypted_data: Vec<u8>,
}

impl<Crypto: ImageGeneratorCrypto> Sb21Generator<Crypto> {
    /// Create an instance `Sb21Generator`
    pub fn new(crypto: Crypto) -> Self {
        Self { crypto }
    }

    /// Generate a signed SB2.1 container
    ///
    /// # Arguments
    ///
    /// * `script` - Compiled command script
    /// * `options` - Keys, certificates and secrets
    ///
    /// # Returns
    ///
    /// * `Sb21Image` - Container bytes and ROTKH
    pub fn generate(
        &self,
        script: &CompiledScript,
        options: &Sb21Options,
    ) -> anyhow::Result<Sb21Image> {
        let signing_key = match &options.signing_key {
            Some(key) if !options.signing_certs.is_empty() && !options.root_certs.is_empty() => key,
            _ => {
                return Err(error(
                    SptoolError::SB21_MISSING_SIGNING_MATERIAL,
                    "SB2.1 needs a private key, signing certificates and root certificates",
                ))
            }
        };
        if !matches!(signing_key, PrivateKey::Rsa { .. }) {
            return Err(error(
                SptoolError::CHAIN_UNSUPPORTED_KEY_TYPE,
                "SB2.1 images are signed with RSA keys",
            ));
        }

        let cert_block = CertBlockV2::new(
            &self.crypto,
            script.versions.build_number,
            options.signing_certs.clone(),
            &options.root_certs,
        )?;
        let signing_public = self.crypto.public_key_of(signing_key)?;
        if signing_public != *cert_block.signing_key() {
            return Err(error(
                SptoolError::CHAIN_SIGNING_KEY_MISMATCH,
                "Private key does not match the last signing certificate",
            ));
        }
        let signature_len = signing_public.rsa_modulus_len().unwrap_or(0);

        let kek = match &options.kek {
            Some(kek) => kek.clone(),
            None => {
                log::warn!("no KEK key provided, using a zero KEK key");
                vec![0u8; SB2_DEK_BYTE_SIZE]
            }
        };
        if kek.len() != SB2_DEK_BYTE_SIZE {
            return Err(error(
                SptoolError::CRYPTO_INVALID_KEY_LENGTH,
                format!("KEK of {} bytes, expected {SB2_DEK_BYTE_SIZE}", kek.len()),
            ));
        }
        let secrets = match &options.secrets {
            Some(secrets) => secrets.clone(),
            None => Sb21Secrets::random(&self.crypto)?,
        };

        let plain_sections = script
            .sections
            .iter()
            .map(|section| {
                let mut data = Vec::new();
                for command in &section.commands {
                    data.extend(encode_command(&self.crypto, command)?);
                }
                Ok(data)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let signed_len = SB2_CERT_BLOCK_OFFSET + cert_block.len();
        let first_tag_block = (signed_len + signature_len) / SB2_BLOCK_SIZE;
        let sections_len: usize = plain_sections
            .iter()
            .map(|data| SB2_SECTION_PREAMBLE_BLOCKS * SB2_BLOCK_SIZE + data.len())
            .sum();
        let total_len = signed_len + signature_len + sections_len;

        let mut sections = Vec::with_capacity(plain_sections.len());
        let mut tag_block = first_tag_block;
        for (index, (section, data)) in script.sections.iter().zip(&plain_sections).enumerate() {
            let data_blocks = data.len() / SB2_BLOCK_SIZE;
            let last = index + 1 == script.sections.len();
            let tag = Sb2CommandHeader::new(
                SB2_CMD_TAG,
                if last { SB2_TAG_FLAG_LAST } else { 0 },
                section.id,
                data_blocks as u32,
                SB2_SECTION_FLAG_BOOTABLE,
            );
            let encrypted_tag = nxp_aes_ctr(
                &self.crypto,
                &secrets.dek,
                &secrets.nonce,
                tag_block as u32,
                tag.as_bytes(),
            )?;
            let encrypted_data = nxp_aes_ctr(
                &self.crypto,
                &secrets.dek,
                &secrets.nonce,
                (tag_block + SB2_SECTION_PREAMBLE_BLOCKS) as u32,
                data,
            )?;
            sections.push(EncryptedSection {
                hmac_tag: self.crypto.hmac_sha256(&secrets.mac, &encrypted_tag)?,
                hmac_data: self.crypto.hmac_sha256(&secrets.mac, &encrypted_data)?,
                encrypted_tag,
                encrypted_data,
            });
            tag_block += SB2_SECTION_PREAMBLE_BLOCKS + data_blocks;
        }

        let mut hmac_table = Vec::with_capacity(sections.len() * 2 * HMAC_SHA256_BYTE_SIZE);
        for section in &sections {
            hmac_table.extend_from_slice(&section.hmac_tag);
            hmac_table.extend_from_slice(&section.hmac_data);
        }
        let digest = self.crypto.hmac_sha256(&secrets.mac, &hmac_table)?;

        let mut keys = secrets.dek.to_vec();
        keys.extend_from_slice(&secrets.mac);
        let mut key_blob = aes_wrap(&self.crypto, &kek, &keys)?;
        key_blob.resize(SB2_KEYBLOB_BYTE_SIZE, 0);

        let timestamp = options.timestamp.unwrap_or_else(current_timestamp);
        let header = self.header(
            script,
            &secrets,
            total_len,
            first_tag_block,
            to_micros(timestamp),
        );

        let mut container = header.as_bytes().to_vec();
        container.extend_from_slice(&digest);
        container.extend(key_blob);
        container.extend(cert_block.export(&self.crypto, signed_len as u32)?);

        let signature = self.crypto.sign(&container, signing_key)?;
        container.extend(signature);
        for section in sections {
            container.extend(section.encrypted_tag);
            container.extend_from_slice(&section.hmac_tag);
            container.extend_from_slice(&section.hmac_data);
            container.extend(section.encrypted_data);
        }

        log::debug!(
            "SB2.1 image of {} bytes with {} sections",
            container.len(),
            script.sections.len()
        );
        Ok(Sb21Image {
            container,
            rotkh: cert_block.rkht(&self.crypto)?,
        })
    }

    fn header(
        &self,
        script: &CompiledScript,
        secrets: &Sb21Secrets,
        total_len: usize,
        first_tag_block: usize,
        timestamp_micros: u64,
    ) -> Sb2Header {
        let versions = &script.versions;
        Sb2Header {
            nonce: secrets.nonce,
            reserved: [0; 4],
            signature: SB2_SIGNATURE,
            major_version: SB2_MAJOR_VERSION,
            minor_version: SB2_MINOR_VERSION,
            flags: SB2_FLAG_SIGNED.into(),
            image_blocks: ((total_len / SB2_BLOCK_SIZE) as u32).into(),
            first_boot_tag_block: (first_tag_block as u32).into(),
            first_boot_section_id: script
                .sections
                .first()
                .map(|section| section.id)
                .unwrap_or(0)
                .into(),
            cert_block_offset: (SB2_CERT_BLOCK_OFFSET as u32).into(),
            header_blocks: SB2_HEADER_BLOCKS.into(),
            key_blob_block: SB2_KEYBLOB_BLOCK.into(),
            key_blob_block_count: SB2_KEYBLOB_BLOCKS.into(),
            max_section_mac_count: 1u16.into(),
            signature2: SB2_SIGNATURE2,
            timestamp: timestamp_micros.into(),
            product_version: versions.product_version.to_bcd_bytes(),
            component_version: versions.component_version.to_bcd_bytes(),
            build_number: versions.build_number.into(),
            padding: [0; 4],
        }
    }
}

/// Versions of a parsed header
pub fn header_versions(header: &Sb2Header) -> (ComponentVersion, ComponentVersion) {
    (
        ComponentVersion::from_bcd_bytes(&header.product_version),
        ComponentVersion::from_bcd_bytes(&header.component_version),
    )
}
