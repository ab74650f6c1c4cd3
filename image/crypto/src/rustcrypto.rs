/*++

Licensed under the Apache-2.0 license.

File Name:

   rustcrypto.rs

Abstract:

    File contains the RustCrypto implementation of the image generator crypto trait.

--*/

use std::path::Path;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ctr::cipher::StreamCipher;
use ecdsa::signature::{SignatureEncoding, Signer, Verifier};
use hmac::{Hmac, Mac};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rand::{rngs::OsRng, RngCore};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{pkcs1v15, BigUint, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};

use sptool_error::SptoolError;
use sptool_image_gen::{error, ImageGeneratorCrypto};
use sptool_image_types::*;

use crate::{cert_der, read_pem};

#[derive(Default, Debug, Clone, Copy)]
pub struct RustCrypto {}

fn key_length_error(len: usize) -> anyhow::Error {
    error(
        SptoolError::CRYPTO_INVALID_KEY_LENGTH,
        format!("AES key of {len} bytes, expected 16 or 32"),
    )
}

fn cipher_error(what: &str) -> anyhow::Error {
    error(SptoolError::CRYPTO_CIPHER_FAILURE, what)
}

fn sign_error(err: impl std::fmt::Display) -> anyhow::Error {
    error(SptoolError::CRYPTO_SIGN_FAILURE, format!("Signing failed: {err}"))
}

fn key_error(err: impl std::fmt::Display) -> anyhow::Error {
    error(SptoolError::PARSE_INVALID_KEY, format!("Invalid key: {err}"))
}

fn check_block_aligned(data: &[u8]) -> anyhow::Result<()> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(cipher_error("AES-CBC data is not block aligned"));
    }
    Ok(())
}

fn rsa_public_key(key: &RsaPublicKey) -> PublicKey {
    PublicKey::Rsa {
        modulus: key.n().to_bytes_be(),
        exponent: key.e().to_bytes_be(),
    }
}

fn p256_public_key(key: &p256::PublicKey) -> anyhow::Result<PublicKey> {
    let point = key.to_encoded_point(false);
    match (point.x(), point.y()) {
        (Some(x), Some(y)) => Ok(PublicKey::Ecc {
            curve: EccCurve::P256,
            x: x.to_vec(),
            y: y.to_vec(),
        }),
        _ => Err(key_error("P-256 point at infinity")),
    }
}

fn p384_public_key(key: &p384::PublicKey) -> anyhow::Result<PublicKey> {
    let point = key.to_encoded_point(false);
    match (point.x(), point.y()) {
        (Some(x), Some(y)) => Ok(PublicKey::Ecc {
            curve: EccCurve::P384,
            x: x.to_vec(),
            y: y.to_vec(),
        }),
        _ => Err(key_error("P-384 point at infinity")),
    }
}

/// Decode a SubjectPublicKeyInfo DER structure
fn public_key_from_spki_der(der: &[u8]) -> anyhow::Result<PublicKey> {
    if let Ok(key) = RsaPublicKey::from_public_key_der(der) {
        return Ok(rsa_public_key(&key));
    }
    if let Ok(key) = p256::PublicKey::from_public_key_der(der) {
        return p256_public_key(&key);
    }
    if let Ok(key) = p384::PublicKey::from_public_key_der(der) {
        return p384_public_key(&key);
    }
    Err(error(
        SptoolError::CRYPTO_UNSUPPORTED_ALGORITHM,
        "Public key is neither RSA, P-256 nor P-384",
    ))
}

fn sec1_point(x: &[u8], y: &[u8]) -> Vec<u8> {
    let mut point = vec![0x04];
    point.extend_from_slice(x);
    point.extend_from_slice(y);
    point
}

impl ImageGeneratorCrypto for RustCrypto {
    fn digest(&self, algo: HashAlgorithm, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(match algo {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        })
    }

    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> anyhow::Result<[u8; HMAC_SHA256_BYTE_SIZE]> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
            .map_err(|_| error(SptoolError::CRYPTO_INVALID_KEY_LENGTH, "HMAC key"))?;
        mac.update(data);
        let mut out = [0u8; HMAC_SHA256_BYTE_SIZE];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    fn aes_encrypt_block(
        &self,
        key: &[u8],
        block: &[u8; AES_BLOCK_SIZE],
    ) -> anyhow::Result<[u8; AES_BLOCK_SIZE]> {
        let mut block = GenericArray::clone_from_slice(block);
        match key.len() {
            16 => Aes128::new_from_slice(key)
                .map_err(|_| key_length_error(16))?
                .encrypt_block(&mut block),
            32 => Aes256::new_from_slice(key)
                .map_err(|_| key_length_error(32))?
                .encrypt_block(&mut block),
            len => return Err(key_length_error(len)),
        }
        let mut out = [0u8; AES_BLOCK_SIZE];
        out.copy_from_slice(&block);
        Ok(out)
    }

    fn aes_decrypt_block(
        &self,
        key: &[u8],
        block: &[u8; AES_BLOCK_SIZE],
    ) -> anyhow::Result<[u8; AES_BLOCK_SIZE]> {
        let mut block = GenericArray::clone_from_slice(block);
        match key.len() {
            16 => Aes128::new_from_slice(key)
                .map_err(|_| key_length_error(16))?
                .decrypt_block(&mut block),
            32 => Aes256::new_from_slice(key)
                .map_err(|_| key_length_error(32))?
                .decrypt_block(&mut block),
            len => return Err(key_length_error(len)),
        }
        let mut out = [0u8; AES_BLOCK_SIZE];
        out.copy_from_slice(&block);
        Ok(out)
    }

    fn aes_ctr(
        &self,
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        data: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        let mut buf = data.to_vec();
        match key.len() {
            16 => ctr::Ctr128BE::<Aes128>::new_from_slices(key, iv)
                .map_err(|_| key_length_error(16))?
                .apply_keystream(&mut buf),
            32 => ctr::Ctr128BE::<Aes256>::new_from_slices(key, iv)
                .map_err(|_| key_length_error(32))?
                .apply_keystream(&mut buf),
            len => return Err(key_length_error(len)),
        }
        Ok(buf)
    }

    fn aes_cbc_encrypt(
        &self,
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        data: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        check_block_aligned(data)?;
        let mut buf = data.to_vec();
        match key.len() {
            16 => {
                let mut cipher = cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
                    .map_err(|_| key_length_error(16))?;
                for chunk in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
                    cipher.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
                }
            }
            32 => {
                let mut cipher = cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
                    .map_err(|_| key_length_error(32))?;
                for chunk in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
                    cipher.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
                }
            }
            len => return Err(key_length_error(len)),
        }
        Ok(buf)
    }

    fn aes_cbc_decrypt(
        &self,
        key: &[u8],
        iv: &[u8; AES_BLOCK_SIZE],
        data: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        check_block_aligned(data)?;
        let mut buf = data.to_vec();
        match key.len() {
            16 => {
                let mut cipher = cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
                    .map_err(|_| key_length_error(16))?;
                for chunk in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
                    cipher.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
                }
            }
            32 => {
                let mut cipher = cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                    .map_err(|_| key_length_error(32))?;
                for chunk in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
                    cipher.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
                }
            }
            len => return Err(key_length_error(len)),
        }
        Ok(buf)
    }

    fn sign(&self, data: &[u8], priv_key: &PrivateKey) -> anyhow::Result<Vec<u8>> {
        match priv_key {
            PrivateKey::Rsa { pkcs8_der } => {
                let key = RsaPrivateKey::from_pkcs8_der(pkcs8_der).map_err(key_error)?;
                let signer = pkcs1v15::SigningKey::<Sha256>::new(key);
                let sig = signer.try_sign(data).map_err(sign_error)?;
                Ok(sig.to_vec())
            }
            PrivateKey::Ecc {
                curve: EccCurve::P256,
                scalar,
            } => {
                let key = p256::ecdsa::SigningKey::from_slice(scalar).map_err(key_error)?;
                let sig: p256::ecdsa::Signature = key.try_sign(data).map_err(sign_error)?;
                Ok(sig.to_bytes().to_vec())
            }
            PrivateKey::Ecc {
                curve: EccCurve::P384,
                scalar,
            } => {
                let key = p384::ecdsa::SigningKey::from_slice(scalar).map_err(key_error)?;
                let sig: p384::ecdsa::Signature = key.try_sign(data).map_err(sign_error)?;
                Ok(sig.to_bytes().to_vec())
            }
        }
    }

    fn verify(&self, data: &[u8], signature: &[u8], pub_key: &PublicKey) -> anyhow::Result<bool> {
        match pub_key {
            PublicKey::Rsa { modulus, exponent } => {
                let key = RsaPublicKey::new(
                    BigUint::from_bytes_be(modulus),
                    BigUint::from_bytes_be(exponent),
                )
                .map_err(key_error)?;
                let Ok(sig) = pkcs1v15::Signature::try_from(signature) else {
                    return Ok(false);
                };
                Ok(pkcs1v15::VerifyingKey::<Sha256>::new(key)
                    .verify(data, &sig)
                    .is_ok())
            }
            PublicKey::Ecc {
                curve: EccCurve::P256,
                x,
                y,
            } => {
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1_point(x, y))
                    .map_err(key_error)?;
                let Ok(sig) = p256::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                Ok(key.verify(data, &sig).is_ok())
            }
            PublicKey::Ecc {
                curve: EccCurve::P384,
                x,
                y,
            } => {
                let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&sec1_point(x, y))
                    .map_err(key_error)?;
                let Ok(sig) = p384::ecdsa::Signature::from_slice(signature) else {
                    return Ok(false);
                };
                Ok(key.verify(data, &sig).is_ok())
            }
        }
    }

    fn public_key_of(&self, priv_key: &PrivateKey) -> anyhow::Result<PublicKey> {
        match priv_key {
            PrivateKey::Rsa { pkcs8_der } => {
                let key = RsaPrivateKey::from_pkcs8_der(pkcs8_der).map_err(key_error)?;
                Ok(rsa_public_key(&key.to_public_key()))
            }
            PrivateKey::Ecc {
                curve: EccCurve::P256,
                scalar,
            } => {
                let key = p256::SecretKey::from_slice(scalar).map_err(key_error)?;
                p256_public_key(&key.public_key())
            }
            PrivateKey::Ecc {
                curve: EccCurve::P384,
                scalar,
            } => {
                let key = p384::SecretKey::from_slice(scalar).map_err(key_error)?;
                p384_public_key(&key.public_key())
            }
        }
    }

    fn random_bytes(&self, len: usize) -> anyhow::Result<Vec<u8>> {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        Ok(bytes)
    }

    fn private_key_from_pem(path: &Path) -> anyhow::Result<PrivateKey> {
        let text = read_pem(path, "private key")?;

        if let Ok(key) = p256::SecretKey::from_pkcs8_pem(&text) {
            return Ok(PrivateKey::Ecc {
                curve: EccCurve::P256,
                scalar: key.to_bytes().to_vec(),
            });
        }
        if let Ok(key) = p384::SecretKey::from_pkcs8_pem(&text) {
            return Ok(PrivateKey::Ecc {
                curve: EccCurve::P384,
                scalar: key.to_bytes().to_vec(),
            });
        }
        if let Ok(key) = p256::SecretKey::from_sec1_pem(&text) {
            return Ok(PrivateKey::Ecc {
                curve: EccCurve::P256,
                scalar: key.to_bytes().to_vec(),
            });
        }
        if let Ok(key) = p384::SecretKey::from_sec1_pem(&text) {
            return Ok(PrivateKey::Ecc {
                curve: EccCurve::P384,
                scalar: key.to_bytes().to_vec(),
            });
        }

        let key = RsaPrivateKey::from_pkcs8_pem(&text)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&text))
            .map_err(|err| {
                error(
                    SptoolError::PARSE_INVALID_KEY,
                    format!("{} holds no supported private key: {err}", path.display()),
                )
            })?;
        let der = key.to_pkcs8_der().map_err(key_error)?;
        Ok(PrivateKey::Rsa {
            pkcs8_der: der.as_bytes().to_vec(),
        })
    }

    fn public_key_from_pem(path: &Path) -> anyhow::Result<PublicKey> {
        let text = read_pem(path, "public key")?;
        if let Ok(key) = RsaPublicKey::from_public_key_pem(&text) {
            return Ok(rsa_public_key(&key));
        }
        if let Ok(key) = p256::PublicKey::from_public_key_pem(&text) {
            return p256_public_key(&key);
        }
        if let Ok(key) = p384::PublicKey::from_public_key_pem(&text) {
            return p384_public_key(&key);
        }
        Err(error(
            SptoolError::PARSE_INVALID_KEY,
            format!("{} holds no supported public key", path.display()),
        ))
    }

    fn public_key_from_cert(cert: &[u8]) -> anyhow::Result<PublicKey> {
        let der = cert_der(cert)?;
        let (_, cert) = x509_parser::parse_x509_certificate(&der).map_err(|err| {
            error(
                SptoolError::PARSE_INVALID_CERTIFICATE,
                format!("Invalid X.509 certificate: {err}"),
            )
        })?;
        public_key_from_spki_der(cert.public_key().raw)
    }

    fn public_key_from_file(path: &Path) -> anyhow::Result<PublicKey> {
        let bytes = Self::cert_from_file(path)?;
        if let Ok(key) = Self::public_key_from_cert(&bytes) {
            return Ok(key);
        }
        let is_public_pem = bytes.windows(10).any(|w| w == b"PUBLIC KEY")
            && !bytes.windows(7).any(|w| w == b"PRIVATE");
        if is_public_pem {
            return Self::public_key_from_pem(path);
        }
        let key = Self::private_key_from_pem(path)?;
        RustCrypto::default().public_key_of(&key)
    }
}
