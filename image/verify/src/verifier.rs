/*++

Licensed under the Apache-2.0 license.

File Name:

    verifier.rs

Abstract:

    This file is the main implementation of the container verifier.

--*/

use sptool_error::SptoolError;
use sptool_image_gen::keywrap::aes_unwrap;
use sptool_image_gen::mbi::image_version_word;
use sptool_image_gen::sb21::{header_versions, nxp_aes_ctr};
use sptool_image_gen::sb31::{derive_block_key, derive_kdk, Sb31Encryption};
use sptool_image_gen::{error, public_key_hash, ImageGeneratorCrypto, MbiGenerator, MbiImageType};
use sptool_image_types::*;
use zerocopy::FromBytes;

use crate::*;

/// Microseconds per second of SB2.1 timestamps
const MICROS_PER_SECOND: u64 = 1_000_000;

/// SB2.1 key material recovered from the key blob
struct Sb21Keys {
    dek: Vec<u8>,
    mac: Vec<u8>,
}

/// SB2.1 certificate block contents
struct Sb21CertInfo {
    certificates: Vec<Vec<u8>>,
    root_key_hash_table: Vec<u8>,
    total_image_length: usize,
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let word = bytes.get(offset..offset.checked_add(4)?)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(word);
    Some(u32::from_le_bytes(buf))
}

/// Length of the DER element at the start of `der`, header included
fn der_len(der: &[u8]) -> Option<usize> {
    let first = *der.get(1)?;
    if first & 0x80 == 0 {
        return Some(2 + usize::from(first));
    }
    let count = usize::from(first & 0x7f);
    let len = der
        .get(2..2 + count)?
        .iter()
        .fold(0usize, |len, b| (len << 8) | usize::from(*b));
    Some(2 + count + len)
}

/// Container Verifier
pub struct ContainerVerifier<Crypto: ImageGeneratorCrypto> {
    /// Crypto provider
    crypto: Crypto,
}

impl<Crypto: ImageGeneratorCrypto> ContainerVerifier<Crypto> {
    /// Create a new instance `ContainerVerifier`
    ///
    /// # Arguments
    ///
    /// * `crypto` - Crypto provider
    pub fn new(crypto: Crypto) -> Self {
        Self { crypto }
    }

    /// Verify an SB2.1 container and decrypt its sections
    ///
    /// # Arguments
    ///
    /// * `container` - Container bytes
    /// * `kek` - Key encryption key; the zero key when `None`
    ///
    /// # Returns
    ///
    /// * `Sb21VerificationInfo` - Container information on success
    pub fn verify_sb21(
        &self,
        container: &[u8],
        kek: Option<&[u8]>,
    ) -> anyhow::Result<Sb21VerificationInfo> {
        let invalid = |context: String| error(SptoolError::SB21_INVALID_CONTAINER, context);

        // Check header markers and size
        let (header, _) = Sb2Header::read_from_prefix(container)
            .map_err(|_| invalid("Container is smaller than its header".into()))?;
        if header.signature != SB2_SIGNATURE
            || header.signature2 != SB2_SIGNATURE2
            || header.major_version != SB2_MAJOR_VERSION
            || header.minor_version != SB2_MINOR_VERSION
        {
            return Err(invalid("Not an SB2.1 container".into()));
        }
        let image_len = header.image_blocks.get() as usize * SB2_BLOCK_SIZE;
        if image_len != container.len() || image_len < SB2_CERT_BLOCK_OFFSET {
            return Err(invalid(format!(
                "Header declares {image_len} bytes, container has {}",
                container.len()
            )));
        }

        let keys = self.verify_sb21_key_blob(container, kek)?;
        let certs =
            self.parse_sb21_cert_block(container, header.cert_block_offset.get() as usize)?;
        let signature_len = self.verify_sb21_signature(container, &certs)?;
        let rotkh = self
            .crypto
            .digest(HashAlgorithm::Sha256, &certs.root_key_hash_table)?;

        let first_tag_block = header.first_boot_tag_block.get() as usize;
        if first_tag_block * SB2_BLOCK_SIZE != certs.total_image_length + signature_len {
            return Err(invalid(format!(
                "First boot tag block {first_tag_block} does not follow the signature"
            )));
        }
        let (sections, hmac_table) =
            self.verify_sb21_sections(container, &header, &keys, first_tag_block)?;

        // Check the digest of the section MAC table
        let digest = self.crypto.hmac_sha256(&keys.mac, &hmac_table)?;
        let header_len = SB2_HEADER_BLOCKS as usize * SB2_BLOCK_SIZE;
        if container[header_len..header_len + HMAC_SHA256_BYTE_SIZE] != digest {
            return Err(error(
                SptoolError::SB21_MAC_MISMATCH,
                "Section MAC table digest mismatch",
            ));
        }

        let (product_version, component_version) = header_versions(&header);
        Ok(Sb21VerificationInfo {
            product_version,
            component_version,
            build_number: header.build_number.get(),
            timestamp: header.timestamp.get() / MICROS_PER_SECOND,
            certificates: certs.certificates,
            rotkh,
            sections,
        })
    }

    /// Unwrap the DEK and MAC keys
    fn verify_sb21_key_blob(
        &self,
        container: &[u8],
        kek: Option<&[u8]>,
    ) -> anyhow::Result<Sb21Keys> {
        let zero_kek = [0u8; SB2_DEK_BYTE_SIZE];
        let kek = kek.unwrap_or(&zero_kek);
        let start = SB2_KEYBLOB_BLOCK as usize * SB2_BLOCK_SIZE;
        let wrapped = &container[start..start + SB2_WRAPPED_KEYS_BYTE_SIZE];
        let keys = aes_unwrap(&self.crypto, kek, wrapped)?;
        Ok(Sb21Keys {
            dek: keys[..SB2_DEK_BYTE_SIZE].to_vec(),
            mac: keys[SB2_DEK_BYTE_SIZE..].to_vec(),
        })
    }

    /// Parse the certificate table and root key hash table
    fn parse_sb21_cert_block(
        &self,
        container: &[u8],
        offset: usize,
    ) -> anyhow::Result<Sb21CertInfo> {
        let invalid = |context: &str| error(SptoolError::SB21_INVALID_CONTAINER, context);

        let block = container
            .get(offset..)
            .ok_or_else(|| invalid("Certificate block offset is past the container"))?;
        let (header, _) = Sb2CertBlockHeader::read_from_prefix(block)
            .map_err(|_| invalid("Certificate block header is truncated"))?;
        if header.signature != SB2_CERT_SIGNATURE {
            return Err(invalid("Missing certificate block signature"));
        }

        let mut cursor = header.header_length.get() as usize;
        let mut certificates = Vec::new();
        for _ in 0..header.certificate_count.get() {
            let len = read_u32(block, cursor)
                .ok_or_else(|| invalid("Certificate table is truncated"))? as usize;
            cursor += 4;
            let entry = block
                .get(cursor..cursor + len)
                .ok_or_else(|| invalid("Certificate exceeds the certificate block"))?;
            let cert_len = der_len(entry)
                .filter(|cert_len| *cert_len <= len)
                .ok_or_else(|| invalid("Certificate is not a DER element"))?;
            certificates.push(entry[..cert_len].to_vec());
            cursor += len;
        }
        if certificates.is_empty() {
            return Err(error(
                SptoolError::CHAIN_EMPTY_SIGNING_CERTS,
                "Certificate block carries no certificate",
            ));
        }

        let table_len = MAX_ROOT_KEY_COUNT * SHA256_DIGEST_BYTE_SIZE;
        let root_key_hash_table = block
            .get(cursor..cursor + table_len)
            .ok_or_else(|| invalid("Root key hash table is truncated"))?
            .to_vec();

        Ok(Sb21CertInfo {
            certificates,
            root_key_hash_table,
            total_image_length: header.total_image_length.get() as usize,
        })
    }

    /// Verify the RSA signature and that the first certificate is rooted
    ///
    /// # Returns
    ///
    /// * `usize` - Signature length
    fn verify_sb21_signature(
        &self,
        container: &[u8],
        certs: &Sb21CertInfo,
    ) -> anyhow::Result<usize> {
        let (first, last) = match (certs.certificates.first(), certs.certificates.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(error(
                    SptoolError::CHAIN_EMPTY_SIGNING_CERTS,
                    "Certificate block carries no certificate",
                ))
            }
        };

        let signing_key = Crypto::public_key_from_cert(last)?;
        let signature_len = signing_key.rsa_modulus_len().ok_or_else(|| {
            error(
                SptoolError::CHAIN_UNSUPPORTED_KEY_TYPE,
                "SB2.1 signing certificate must hold an RSA key",
            )
        })?;
        let signed_len = certs.total_image_length;
        let signature = container
            .get(signed_len..signed_len + signature_len)
            .ok_or_else(|| error(SptoolError::SB21_INVALID_CONTAINER, "Signature is truncated"))?;
        if !self
            .crypto
            .verify(&container[..signed_len], signature, &signing_key)?
        {
            return Err(error(
                SptoolError::CRYPTO_VERIFY_FAILURE,
                "SB2.1 signature does not verify",
            ));
        }

        let root_hash = public_key_hash(&self.crypto, &Crypto::public_key_from_cert(first)?, 256)?;
        if !certs
            .root_key_hash_table
            .chunks(SHA256_DIGEST_BYTE_SIZE)
            .any(|slot| slot == root_hash.as_slice())
        {
            return Err(error(
                SptoolError::CHAIN_SIGNING_CERT_NOT_ROOTED,
                "First certificate key is not in the root key hash table",
            ));
        }
        Ok(signature_len)
    }

    /// Walk the boot sections from the first boot tag
    ///
    /// # Returns
    ///
    /// * `(Vec<Section>, Vec<u8>)` - Decrypted sections and the section MAC table
    fn verify_sb21_sections(
        &self,
        container: &[u8],
        header: &Sb2Header,
        keys: &Sb21Keys,
        first_tag_block: usize,
    ) -> anyhow::Result<(Vec<Section>, Vec<u8>)> {
        let invalid = |context: String| error(SptoolError::SB21_INVALID_CONTAINER, context);
        let block_range = |block: usize, count: usize| {
            container
                .get(block * SB2_BLOCK_SIZE..(block + count) * SB2_BLOCK_SIZE)
                .ok_or_else(|| invalid(format!("Block {block} is past the container")))
        };

        let mut sections = Vec::new();
        let mut hmac_table = Vec::new();
        let mut tag_block = first_tag_block;
        loop {
            let encrypted_tag = block_range(tag_block, 1)?;
            let plain_tag = nxp_aes_ctr(
                &self.crypto,
                &keys.dek,
                &header.nonce,
                tag_block as u32,
                encrypted_tag,
            )?;
            let (tag, _) = Sb2CommandHeader::read_from_prefix(&plain_tag)
                .map_err(|_| invalid(format!("Boot tag at block {tag_block} is truncated")))?;
            if tag.tag != SB2_CMD_TAG || tag.checksum != tag.compute_checksum() {
                return Err(invalid(format!("No valid boot tag at block {tag_block}")));
            }

            let macs = block_range(tag_block + 1, 4)?;
            let data_blocks = tag.count.get() as usize;
            let data_block = tag_block + SB2_SECTION_PREAMBLE_BLOCKS;
            let encrypted_data = block_range(data_block, data_blocks)?;
            if self.crypto.hmac_sha256(&keys.mac, encrypted_tag)?[..] != macs[..32]
                || self.crypto.hmac_sha256(&keys.mac, encrypted_data)?[..] != macs[32..]
            {
                return Err(error(
                    SptoolError::SB21_MAC_MISMATCH,
                    format!("Section {} MAC mismatch", tag.address.get()),
                ));
            }
            hmac_table.extend_from_slice(macs);

            let data = nxp_aes_ctr(
                &self.crypto,
                &keys.dek,
                &header.nonce,
                data_block as u32,
                encrypted_data,
            )?;
            sections.push(Section {
                id: tag.address.get(),
                commands: decode_sb21_commands(&data, sections.len())?,
            });

            if tag.flags.get() & SB2_TAG_FLAG_LAST != 0 {
                break;
            }
            tag_block = data_block + data_blocks;
        }
        Ok((sections, hmac_table))
    }

    /// Verify an SB3.1 container
    ///
    /// # Arguments
    ///
    /// * `container` - Container bytes
    /// * `encryption` - Container key; without it commands are decoded only from plain blocks
    ///
    /// # Returns
    ///
    /// * `Sb31VerificationInfo` - Container information on success
    pub fn verify_sb31(
        &self,
        container: &[u8],
        encryption: Option<&Sb31Encryption>,
    ) -> anyhow::Result<Sb31VerificationInfo> {
        let invalid = |context: String| error(SptoolError::SB31_INVALID_CONTAINER, context);

        let (header, _) = Sb31Header::read_from_prefix(container)
            .map_err(|_| invalid("Container is smaller than its header".into()))?;
        if header.magic != SB31_MAGIC
            || header.major_version.get() != SB31_MAJOR_VERSION
            || header.minor_version.get() != SB31_MINOR_VERSION
        {
            return Err(invalid("Not an SB3.1 container".into()));
        }
        let is_nxp_container = match header.image_type.get() {
            SB31_IMAGE_TYPE_SIGNED => false,
            SB31_IMAGE_TYPE_NXP_SIGNED => true,
            other => return Err(invalid(format!("Unknown image type {other}"))),
        };

        // Parse the certificate block and check the hash width
        let cert_offset = header.cert_block_offset.get() as usize;
        let cert_block = parse_cert_block_v31(
            &self.crypto,
            container
                .get(cert_offset..)
                .ok_or_else(|| invalid("Certificate block offset is past the container".into()))?,
        )?;
        let hash_algo = cert_block.curve.hash_algorithm();
        let hash_len = hash_algo.digest_len();
        if cert_offset != SB31_HEADER_BYTE_SIZE + hash_len {
            return Err(invalid(format!(
                "Certificate block at {cert_offset} does not follow a {hash_len} byte hash"
            )));
        }

        // Verify the header signature
        let signing_key = cert_block.signing_key();
        let signature_len = signing_key
            .curve()
            .map(|curve| curve.signature_len())
            .unwrap_or_default();
        let signed_len = cert_offset + cert_block.len;
        let total_len = header.image_total_length.get() as usize;
        if signed_len + signature_len != total_len {
            return Err(invalid(format!(
                "Header declares {total_len} bytes before the blocks, parsed {}",
                signed_len + signature_len
            )));
        }
        let signature = container
            .get(signed_len..total_len)
            .ok_or_else(|| invalid("Signature is truncated".into()))?;
        if !self
            .crypto
            .verify(&container[..signed_len], signature, signing_key)?
        {
            return Err(error(
                SptoolError::CRYPTO_VERIFY_FAILURE,
                "SB3.1 signature does not verify",
            ));
        }

        let chunks = self.verify_sb31_blocks(container, &header, hash_algo, total_len)?;
        let commands = match encryption {
            Some(encryption) => {
                let kdk = derive_kdk(
                    &self.crypto,
                    &encryption.pck,
                    encryption.kdk_access_rights,
                    header.timestamp.get(),
                )?;
                let mut stream = Vec::with_capacity(chunks.len() * SB31_DATA_BLOCK_SIZE);
                for (index, chunk) in chunks.iter().enumerate() {
                    let key = derive_block_key(&self.crypto, &kdk, index as u32 + 1)?;
                    stream.extend(self.crypto.aes_cbc_decrypt(
                        &key,
                        &[0u8; AES_BLOCK_SIZE],
                        chunk,
                    )?);
                }
                Some(decode_sb31_commands(&stream)?)
            }
            None => {
                let stream = chunks.concat();
                let plain = read_u32(&stream, 0) == Some(SB31_CMD_TAG);
                if plain {
                    Some(decode_sb31_commands(&stream)?)
                } else {
                    log::info!("SB3.1 blocks are encrypted, commands not decoded");
                    None
                }
            }
        };

        let description = &header.description;
        let description_len = description
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(description.len());
        Ok(Sb31VerificationInfo {
            firmware_version: header.firmware_version.get(),
            timestamp: header.timestamp.get(),
            is_nxp_container,
            description: String::from_utf8_lossy(&description[..description_len]).into_owned(),
            cert_block,
            block_count: header.block_count.get(),
            commands,
        })
    }

    /// Walk the hash chain of the data blocks
    ///
    /// # Returns
    ///
    /// * `Vec<&[u8]>` - Data part of each block in order
    fn verify_sb31_blocks<'a>(
        &self,
        container: &'a [u8],
        header: &Sb31Header,
        hash_algo: HashAlgorithm,
        blocks_offset: usize,
    ) -> anyhow::Result<Vec<&'a [u8]>> {
        let invalid = |context: String| error(SptoolError::SB31_INVALID_CONTAINER, context);
        let hash_len = hash_algo.digest_len();
        let block_size = 4 + hash_len + SB31_DATA_BLOCK_SIZE;
        if header.block_size.get() as usize != block_size {
            return Err(invalid(format!(
                "Block size {} does not match {block_size}",
                header.block_size.get()
            )));
        }

        let block_count = header.block_count.get() as usize;
        if blocks_offset + block_count * block_size != container.len() {
            return Err(invalid(format!(
                "{block_count} blocks of {block_size} bytes do not fill the container"
            )));
        }

        let mut expected =
            container[SB31_HEADER_BYTE_SIZE..SB31_HEADER_BYTE_SIZE + hash_len].to_vec();
        let mut chunks = Vec::with_capacity(block_count);
        for (index, block) in container[blocks_offset..].chunks(block_size).enumerate() {
            if self.crypto.digest(hash_algo, block)? != expected {
                return Err(invalid(format!("Block {} hash mismatch", index + 1)));
            }
            if read_u32(block, 0) != Some(index as u32 + 1) {
                return Err(invalid(format!("Block {} is out of order", index + 1)));
            }
            expected = block[4..4 + hash_len].to_vec();
            chunks.push(&block[4 + hash_len..]);
        }
        if expected.iter().any(|b| *b != 0) {
            return Err(invalid("Last block links to a further block".into()));
        }
        Ok(chunks)
    }

    /// Verify a Master Boot Image
    ///
    /// # Arguments
    ///
    /// * `image` - Image bytes
    ///
    /// # Returns
    ///
    /// * `MbiVerificationInfo` - Image information on success
    pub fn verify_mbi(&self, image: &[u8]) -> anyhow::Result<MbiVerificationInfo> {
        let invalid = |context: String| error(SptoolError::MBI_INVALID_IMAGE, context);
        let word = |offset: usize| {
            read_u32(image, offset)
                .ok_or_else(|| invalid(format!("Image is smaller than {:#x} bytes", offset + 4)))
        };

        if image.len() < MBI_MIN_APP_SIZE {
            return Err(invalid(format!("Image of {} bytes is too small", image.len())));
        }
        let type_word = word(MBI_IMAGE_TYPE_OFFSET)?;
        let image_type = MbiImageType::from_value(type_word & 0xff)
            .ok_or_else(|| invalid(format!("Unknown image type word {type_word:#010x}")))?;
        let flags = MbiTypeFlags::from_bits_truncate(type_word);
        let image_length = word(MBI_IMAGE_LENGTH_OFFSET)?;
        let version_word = word(MBI_IMAGE_VERSION_OFFSET)?;
        let image_version = Some(version_word as u16)
            .filter(|version| image_version_word(*version) == version_word);

        let mut info = MbiVerificationInfo {
            image_type,
            trustzone: flags.trustzone_kind(),
            load_address: word(MBI_LOAD_ADDR_OFFSET)?,
            image_length,
            image_version,
            firmware_version: None,
            cert_block: None,
            signing_key: None,
        };

        if !image_type.is_signed() {
            if image_length as usize != image.len() {
                return Err(invalid(format!(
                    "Header declares {image_length} bytes, image has {}",
                    image.len()
                )));
            }
            let crc = MbiGenerator::<Crypto>::image_crc(image);
            if crc != word(MBI_CRC_OR_CERT_OFFSET)? {
                return Err(invalid(format!("Image CRC mismatch, computed {crc:#010x}")));
            }
            return Ok(info);
        }

        // Certificate block, manifest, then the signature
        let cert_offset = word(MBI_CRC_OR_CERT_OFFSET)? as usize;
        let cert_block = parse_cert_block_v31(
            &self.crypto,
            image
                .get(cert_offset..)
                .ok_or_else(|| invalid("Certificate block offset is past the image".into()))?,
        )?;
        let manifest_offset = cert_offset + cert_block.len;
        let (manifest, _) = image
            .get(manifest_offset..)
            .and_then(|bytes| MbiManifest::read_from_prefix(bytes).ok())
            .ok_or_else(|| invalid("Manifest is truncated".into()))?;
        if manifest.magic != MBI_MANIFEST_MAGIC || manifest.version.get() != MBI_MANIFEST_VERSION {
            return Err(invalid("Missing image manifest".into()));
        }
        let signed_len = manifest_offset + manifest.length.get() as usize;
        if signed_len != image_length as usize {
            return Err(invalid(format!(
                "Header declares {image_length} signed bytes, parsed {signed_len}"
            )));
        }

        let signing_key = cert_block.signing_key().clone();
        let signature_len = signing_key
            .curve()
            .map(|curve| curve.signature_len())
            .unwrap_or_default();
        if image.len() != signed_len + signature_len {
            return Err(invalid(format!(
                "Expected a {signature_len} byte signature after {signed_len} bytes"
            )));
        }
        if !self
            .crypto
            .verify(&image[..signed_len], &image[signed_len..], &signing_key)?
        {
            return Err(error(
                SptoolError::CRYPTO_VERIFY_FAILURE,
                "Image signature does not verify",
            ));
        }

        info.firmware_version = Some(manifest.firmware_version.get());
        info.cert_block = Some(cert_block);
        info.signing_key = Some(signing_key);
        Ok(info)
    }
}
