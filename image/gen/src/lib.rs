/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains the crypto seam and module layout of the container generators.

--*/

pub mod cert_block;
pub mod compiler;
pub mod crc;
pub mod keywrap;
pub mod mbi;
pub mod parse;
pub mod rotkh;
pub mod sb21;
pub mod sb31;
pub mod timestamp;
pub mod trustzone;

pub use cert_block::{build_chain, CertBlockV2, CertBlockV31, CertificateChain, IskRequest};
pub use compiler::{compile_sb31_commands, compile_script, CommandScript, CompiledScript};
pub use mbi::{MbiConfig, MbiGenerator, MbiImageType};
pub use rotkh::{compute_rotkh, public_key_hash};
pub use sb21::{Sb21Generator, Sb21Image, Sb21Options, Sb21Secrets};
pub use sb31::{Sb31Config, Sb31Generator};
pub use trustzone::{TrustZone, TrustZoneDatabase};

use anyhow::Context;
use sptool_error::SptoolError;
use sptool_image_types::*;
use std::fmt::Display;
use std::path::Path;

/// Image Generator Crypto Trait
pub trait ImageGeneratorCrypto {
    /// Calculate digest
    fn digest(&self, algo: HashAlgorithm, data: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Calculate SHA-256 digest
    fn sha256_digest(&self, data: &[u8]) -> anyhow::Result<[u8; SHA256_DIGEST_BYTE_SIZE]> {
        let digest = self.digest(HashAlgorithm::Sha256, data)?;
        digest
            .as_slice()
            .try_into()
            .map_err(|_| error(SptoolError::CRYPTO_UNSUPPORTED_ALGORITHM, "SHA-256 digest size"))
    }

    /// Calculate HMAC-SHA256
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> anyhow::Result<[u8; HMAC_SHA256_BYTE_SIZE]>;

    /// Encrypt one block with AES-128 or AES-256, selected by key length
    fn aes_encrypt_block(
        &self,
        key: &[u8],
        block: &[u8; AES_BLOCK_SIZE],
    ) -> anyhow::Result<[u8; AES_BLOCK_SIZE]>;

    /// Decrypt one block with AES-128 or AES-256, selected by key length
    fn aes_decrypt_block(
        &self,
        key: &[u8],
        block: &[u8; AES_BLOCK_SIZE],
    ) -> anyhow::Result<[u8; AES_BLOCK_SIZE]>;

    /// AES in counter mode with a 128-bit big-endian counter
    fn aes_ctr(&self, key: &[u8], iv: &[u8; AES_BLOCK_SIZE], data: &[u8])
        -> anyhow::Result<Vec<u8>>;

    /// AES-CBC encryption of block aligned data, no padding
    fn aes_cbc_encrypt(
        &self,
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        data: &[u8],
    ) -> anyhow::Result<Vec<u8>>;

    /// AES-CBC decryption of block aligned data, no padding
    fn aes_cbc_decrypt(
        &self,
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        data: &[u8],
    ) -> anyhow::Result<Vec<u8>>;

    /// Calculate signature
    ///
    /// RSA keys produce a PKCS#1 v1.5 SHA-256 signature, elliptic curve keys
    /// a raw `r || s` ECDSA signature over the curve's hash.
    fn sign(&self, data: &[u8], priv_key: &PrivateKey) -> anyhow::Result<Vec<u8>>;

    /// Verify signature
    fn verify(&self, data: &[u8], signature: &[u8], pub_key: &PublicKey) -> anyhow::Result<bool>;

    /// Public half of a private key
    fn public_key_of(&self, priv_key: &PrivateKey) -> anyhow::Result<PublicKey>;

    /// Random bytes from the operating system
    fn random_bytes(&self, len: usize) -> anyhow::Result<Vec<u8>>;

    /// Read a Private Key from PEM file
    fn private_key_from_pem(path: &Path) -> anyhow::Result<PrivateKey>;

    /// Read a Public Key from SPKI PEM file
    fn public_key_from_pem(path: &Path) -> anyhow::Result<PublicKey>;

    /// Extract the Public Key of an X.509 certificate, DER or PEM
    fn public_key_from_cert(cert: &[u8]) -> anyhow::Result<PublicKey>;

    /// Read a Public Key from a certificate, a public key or a private key file
    fn public_key_from_file(path: &Path) -> anyhow::Result<PublicKey>;

    /// Read an X.509 certificate file
    fn cert_from_file(path: &Path) -> anyhow::Result<Vec<u8>> {
        std::fs::read(path)
            .with_context(|| format!("Failed to read certificate file {}", path.display()))
    }
}

/// Wrap a categorized error code with a human readable context
pub fn error(code: SptoolError, context: impl Display) -> anyhow::Error {
    anyhow::Error::new(code).context(context.to_string())
}

/// Round `len` up to a multiple of `align`
pub(crate) fn align_up(len: usize, align: usize) -> usize {
    len.div_ceil(align) * align
}

/// Zero pad `data` to a multiple of `align`
pub(crate) fn pad_to(data: &mut Vec<u8>, align: usize) {
    data.resize(align_up(data.len(), align), 0);
}
