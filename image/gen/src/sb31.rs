/*++

Licensed under the Apache-2.0 license.

File Name:

   sb31.rs

Abstract:

    File contains the Secure Binary v3.1 generator: command blocks, hash chain and signature.

--*/

use sptool_error::SptoolError;
use sptool_image_types::*;
use zerocopy::IntoBytes;

use crate::timestamp::current_timestamp;
use crate::{error, pad_to, CertBlockV31, CertificateChain, ImageGeneratorCrypto};

/// Key derivation label of the key derivation key
const KDK_LABEL: &[u8] = b"SB3KDK";

/// Key derivation label of block keys
const BLOCK_KEY_LABEL: &[u8] = b"SB3BLK";

const DERIVED_KEY_BITS: u32 = 256;

/// Container encryption inputs
#[derive(Debug, Clone)]
pub struct Sb31Encryption {
    /// Part common key, 32 bytes
    pub pck: Vec<u8>,

    pub kdk_access_rights: u32,
}

/// SB3.1 generation inputs
#[derive(Debug, Clone, Default)]
pub struct Sb31Config {
    pub firmware_version: u32,

    /// At most 16 bytes, zero padded
    pub description: String,

    /// Seconds since 2000-01-01
    pub timestamp: Option<u64>,

    pub is_nxp_container: bool,

    pub commands: Vec<Command>,

    pub cert_chain: Option<CertificateChain>,

    pub signing_key: Option<PrivateKey>,

    pub encryption: Option<Sb31Encryption>,
}

/// SP 800-108 counter mode KDF with HMAC-SHA256
pub fn kdf_counter_hmac_sha256<C: ImageGeneratorCrypto>(
    crypto: &C,
    key: &[u8],
    label: &[u8],
    context: &[u8],
    bits: u32,
) -> anyhow::Result<Vec<u8>> {
    let len = (bits / 8) as usize;
    let mut out = Vec::with_capacity(len);
    let mut counter = 1u32;
    while out.len() < len {
        let mut input = counter.to_be_bytes().to_vec();
        input.extend_from_slice(label);
        input.push(0);
        input.extend_from_slice(context);
        input.extend_from_slice(&bits.to_be_bytes());
        out.extend_from_slice(&crypto.hmac_sha256(key, &input)?);
        counter += 1;
    }
    out.truncate(len);
    Ok(out)
}

/// Key derivation key of a container
pub fn derive_kdk<C: ImageGeneratorCrypto>(
    crypto: &C,
    pck: &[u8],
    kdk_access_rights: u32,
    timestamp: u64,
) -> anyhow::Result<Vec<u8>> {
    let mut context = kdk_access_rights.to_le_bytes().to_vec();
    context.extend_from_slice(&timestamp.to_le_bytes());
    kdf_counter_hmac_sha256(crypto, pck, KDK_LABEL, &context, DERIVED_KEY_BITS)
}

/// AES-256 key of 1-based block `block_number`
pub fn derive_block_key<C: ImageGeneratorCrypto>(
    crypto: &C,
    kdk: &[u8],
    block_number: u32,
) -> anyhow::Result<Vec<u8>> {
    kdf_counter_hmac_sha256(
        crypto,
        kdk,
        BLOCK_KEY_LABEL,
        &block_number.to_le_bytes(),
        DERIVED_KEY_BITS,
    )
}

fn command_header(address: u32, length: u32, command: u32) -> Sb31CommandHeader {
    Sb31CommandHeader {
        tag: SB31_CMD_TAG.into(),
        address: address.into(),
        length: length.into(),
        command: command.into(),
    }
}

fn encode(header: Sb31CommandHeader, args: Option<[u32; 4]>, data: &[u8]) -> Vec<u8> {
    let mut bytes = header.as_bytes().to_vec();
    if let Some(args) = args {
        for arg in args {
            bytes.extend_from_slice(&arg.to_le_bytes());
        }
    }
    bytes.extend_from_slice(data);
    pad_to(&mut bytes, AES_BLOCK_SIZE);
    bytes
}

/// Version counter id used by SB3.1
pub fn sb31_counter_id(counter: VersionCounter) -> u32 {
    match counter {
        VersionCounter::NonSecure => 1,
        VersionCounter::Secure => 2,
    }
}

/// Encode one SB3.1 command: header, optional argument block, data, padded to 16 bytes
pub fn encode_command(command: &Command) -> anyhow::Result<Vec<u8>> {
    let bytes = match &command.kind {
        CommandKind::Erase {
            address,
            length,
            memory_id,
            erase_all: false,
        } => encode(
            command_header(*address, *length, SB31_CMD_ERASE),
            Some([*memory_id, 0, 0, 0]),
            &[],
        ),
        CommandKind::Load {
            address,
            data,
            memory_id,
        } => encode(
            command_header(*address, data.len() as u32, SB31_CMD_LOAD),
            Some([*memory_id, 0, 0, 0]),
            data,
        ),
        CommandKind::Jump { address, .. } => {
            encode(command_header(*address, 0, SB31_CMD_EXECUTE), None, &[])
        }
        CommandKind::Call { address, .. } => {
            encode(command_header(*address, 0, SB31_CMD_CALL), None, &[])
        }
        CommandKind::ProgramFuses { address, values } => {
            let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            encode(
                command_header(*address, data.len() as u32, SB31_CMD_PROGRAM_FUSES),
                None,
                &data,
            )
        }
        CommandKind::Copy {
            address,
            length,
            destination,
            memory_id_from,
            memory_id_to,
        } => encode(
            command_header(*address, *length, SB31_CMD_COPY),
            Some([*destination, *memory_id_from, *memory_id_to, 0]),
            &[],
        ),
        CommandKind::LoadKeyBlob {
            offset,
            wrapping_key_id,
            data,
        } => encode(
            command_header(*offset, data.len() as u32, SB31_CMD_LOAD_KEY_BLOB),
            Some([*wrapping_key_id, 0, 0, 0]),
            data,
        ),
        CommandKind::Enable {
            address, memory_id, ..
        } => encode(
            command_header(*address, 0, SB31_CMD_CONFIGURE_MEMORY),
            Some([*memory_id, 0, 0, 0]),
            &[],
        ),
        CommandKind::Fill {
            address,
            length,
            pattern,
        } => encode(
            command_header(*address, *length, SB31_CMD_FILL_MEMORY),
            Some([*pattern, 0, 0, 0]),
            &[],
        ),
        CommandKind::VersionCheck { counter, version } => encode(
            command_header(sb31_counter_id(*counter), *version, SB31_CMD_FW_VERSION_CHECK),
            None,
            &[],
        ),
        _ => {
            return Err(error(
                SptoolError::SB31_UNSUPPORTED_COMMAND,
                format!(
                    "Command `{}` (command {}) is not available in SB3.1",
                    command.kind.name(),
                    command.position.index
                ),
            ))
        }
    };
    Ok(bytes)
}

/// Secure Binary v3.1 generator
pub struct Sb31Generator<Crypto: ImageGeneratorCrypto> {
    crypto: Crypto,
}

impl<Crypto: ImageGeneratorCrypto> Sb31Generator<Crypto> {
    /// Create an instance `Sb31Generator`
    pub fn new(crypto: Crypto) -> Self {
        Self { crypto }
    }

    /// Generate a signed SB3.1 container
    ///
    /// # Arguments
    ///
    /// * `config` - Commands, certificate chain and keys
    ///
    /// # Returns
    ///
    /// * `Vec<u8>` - Container bytes
    pub fn generate(&self, config: &Sb31Config) -> anyhow::Result<Vec<u8>> {
        let (chain, signing_key) = match (&config.cert_chain, &config.signing_key) {
            (Some(chain), Some(key)) => (chain, key),
            _ => {
                return Err(error(
                    SptoolError::SB31_MISSING_SIGNING_MATERIAL,
                    "SB3.1 needs a certificate chain and a signing key",
                ))
            }
        };
        chain.check_signing_key(&self.crypto, signing_key)?;
        let hash_algo = chain.root_curve()?.hash_algorithm();
        let hash_len = hash_algo.digest_len();

        let description = config.description.as_bytes();
        if description.len() > SB31_DESCRIPTION_BYTE_SIZE {
            return Err(error(
                SptoolError::PARSE_MALFORMED_CONFIG,
                format!(
                    "Description of {} bytes exceeds {SB31_DESCRIPTION_BYTE_SIZE} bytes",
                    description.len()
                ),
            ));
        }
        let timestamp = config.timestamp.unwrap_or_else(current_timestamp);

        let mut stream = Vec::new();
        for command in &config.commands {
            stream.extend(encode_command(command)?);
        }
        let mut chunks: Vec<Vec<u8>> = stream
            .chunks(SB31_DATA_BLOCK_SIZE)
            .map(|chunk| {
                let mut chunk = chunk.to_vec();
                chunk.resize(SB31_DATA_BLOCK_SIZE, 0);
                chunk
            })
            .collect();

        if let Some(encryption) = &config.encryption {
            if encryption.pck.len() != 32 {
                return Err(error(
                    SptoolError::SB31_MISSING_ENCRYPTION_KEY,
                    format!(
                        "Container key of {} bytes, expected 32",
                        encryption.pck.len()
                    ),
                ));
            }
            let kdk = derive_kdk(
                &self.crypto,
                &encryption.pck,
                encryption.kdk_access_rights,
                timestamp,
            )?;
            for (index, chunk) in chunks.iter_mut().enumerate() {
                let key = derive_block_key(&self.crypto, &kdk, index as u32 + 1)?;
                *chunk = self
                    .crypto
                    .aes_cbc_encrypt(&key, &[0u8; AES_BLOCK_SIZE], chunk)?;
            }
        }

        let mut next_hash = vec![0u8; hash_len];
        let mut blocks = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate().rev() {
            let mut block = (index as u32 + 1).to_le_bytes().to_vec();
            block.extend_from_slice(&next_hash);
            block.extend_from_slice(chunk);
            next_hash = self.crypto.digest(hash_algo, &block)?;
            blocks.push(block);
        }
        blocks.reverse();
        let final_hash = next_hash;

        let cert_block = CertBlockV31::new(chain).export(&self.crypto)?;
        let cert_block_offset = SB31_HEADER_BYTE_SIZE + hash_len;
        // Signature space is reserved as twice the hash length.
        let image_total_length = cert_block_offset + cert_block.len() + 2 * hash_len;

        let mut desc = [0u8; SB31_DESCRIPTION_BYTE_SIZE];
        desc[..description.len()].copy_from_slice(description);
        let header = Sb31Header {
            magic: SB31_MAGIC,
            minor_version: SB31_MINOR_VERSION.into(),
            major_version: SB31_MAJOR_VERSION.into(),
            flags: 0u32.into(),
            block_count: (blocks.len() as u32).into(),
            block_size: ((4 + hash_len + SB31_DATA_BLOCK_SIZE) as u32).into(),
            timestamp: timestamp.into(),
            firmware_version: config.firmware_version.into(),
            image_total_length: (image_total_length as u32).into(),
            image_type: if config.is_nxp_container {
                SB31_IMAGE_TYPE_NXP_SIGNED
            } else {
                SB31_IMAGE_TYPE_SIGNED
            }
            .into(),
            cert_block_offset: (cert_block_offset as u32).into(),
            description: desc,
        };

        let mut container = header.as_bytes().to_vec();
        container.extend_from_slice(&final_hash);
        container.extend(cert_block);

        let signature = self.crypto.sign(&container, signing_key)?;
        if !self
            .crypto
            .verify(&container, &signature, chain.signing_public_key())?
        {
            return Err(error(
                SptoolError::SB31_SELF_VERIFICATION_FAILED,
                "Signature of the SB3.1 header does not verify",
            ));
        }
        container.extend(signature);
        for block in blocks {
            container.extend(block);
        }

        log::debug!(
            "SB3.1 container of {} bytes with {} blocks",
            container.len(),
            header.block_count.get()
        );
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(kind: CommandKind) -> Command {
        Command {
            position: CommandPosition::default(),
            kind,
        }
    }

    #[test]
    fn test_load_encoding() {
        let bytes = encode_command(&command(CommandKind::Load {
            address: 0x2000,
            data: vec![0x5a; 5],
            memory_id: 9,
        }))
        .unwrap();
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[..4], &SB31_CMD_TAG.to_le_bytes());
        assert_eq!(&bytes[4..8], &0x2000u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &5u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &SB31_CMD_LOAD.to_le_bytes());
        assert_eq!(&bytes[16..20], &9u32.to_le_bytes());
        assert_eq!(&bytes[32..37], &[0x5a; 5]);
    }

    #[test]
    fn test_unsupported_commands() {
        for kind in [
            CommandKind::Reset,
            CommandKind::KeyStoreToNv {
                address: 0,
                memory_id: 0,
            },
            CommandKind::Erase {
                address: 0,
                length: 0,
                memory_id: 0,
                erase_all: true,
            },
        ] {
            let err = encode_command(&command(kind)).unwrap_err();
            assert_eq!(
                err.downcast_ref::<SptoolError>(),
                Some(&SptoolError::SB31_UNSUPPORTED_COMMAND)
            );
        }
    }

    #[test]
    fn test_version_check_encoding() {
        let bytes = encode_command(&command(CommandKind::VersionCheck {
            counter: VersionCounter::Secure,
            version: 7,
        }))
        .unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &7u32.to_le_bytes());
    }
}
