/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains crypto utilities needed to generate images.

--*/

mod rustcrypto;

pub use rustcrypto::RustCrypto;

use std::path::Path;
use std::str::from_utf8;

use anyhow::Context;
use sptool_error::SptoolError;
use sptool_image_gen::error;

/// Read a PEM file as text
pub(crate) fn read_pem(path: &Path, what: &str) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {what} PEM file {}", path.display()))?;
    let text = from_utf8(&bytes).map_err(|_| {
        error(
            SptoolError::PARSE_INVALID_KEY,
            format!("{} is not PEM text", path.display()),
        )
    })?;
    Ok(text.to_string())
}

/// DER bytes of a certificate supplied either as DER or as PEM
pub fn cert_der(cert: &[u8]) -> anyhow::Result<Vec<u8>> {
    if cert.starts_with(b"-----BEGIN") {
        let (_, pem) = x509_parser::pem::parse_x509_pem(cert).map_err(|err| {
            error(
                SptoolError::PARSE_INVALID_CERTIFICATE,
                format!("Invalid PEM certificate: {err}"),
            )
        })?;
        Ok(pem.contents)
    } else {
        Ok(cert.to_vec())
    }
}

/// Read a Private Key from PEM file
pub fn private_key_from_pem(path: &Path) -> anyhow::Result<sptool_image_types::PrivateKey> {
    use sptool_image_gen::ImageGeneratorCrypto;
    RustCrypto::private_key_from_pem(path)
}

/// Read a Public Key from a certificate or key file
pub fn public_key_from_file(path: &Path) -> anyhow::Result<sptool_image_types::PublicKey> {
    use sptool_image_gen::ImageGeneratorCrypto;
    RustCrypto::public_key_from_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cert_der_passthrough() {
        let der = sptool_image_fake_keys::ROOT_K0_CERT_DER;
        assert_eq!(cert_der(der).unwrap(), der.to_vec());
    }

    #[test]
    fn test_cert_der_bad_pem() {
        let err = cert_der(b"-----BEGIN CERTIFICATE-----\nnot base64!\n").unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::PARSE_INVALID_CERTIFICATE)
        );
    }
}
