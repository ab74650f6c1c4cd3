// Licensed under the Apache-2.0 license

#![allow(dead_code)]

use std::io::Write;

use sptool_image_crypto::RustCrypto;
use sptool_image_gen::{build_chain, CertificateChain, ImageGeneratorCrypto, IskRequest};
use sptool_image_types::*;

pub fn private_key(pem: &str) -> PrivateKey {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(pem.as_bytes()).unwrap();
    RustCrypto::private_key_from_pem(file.path()).unwrap()
}

pub fn public_key(pem: &str) -> PublicKey {
    RustCrypto::default().public_key_of(&private_key(pem)).unwrap()
}

pub fn rsa_root_keys() -> Vec<PublicKey> {
    sptool_image_fake_keys::ROOT_CERTS_DER
        .iter()
        .map(|cert| RustCrypto::public_key_from_cert(cert).unwrap())
        .collect()
}

/// Two P-256 roots, root 0 used, without an ISK
pub fn p256_chain() -> (CertificateChain, PrivateKey) {
    let keys = vec![
        public_key(sptool_image_fake_keys::P256_ROOT0_PEM),
        public_key(sptool_image_fake_keys::P256_ROOT1_PEM),
    ];
    let chain = build_chain(&RustCrypto::default(), keys, 0, None, true).unwrap();
    (chain, private_key(sptool_image_fake_keys::P256_ROOT0_PEM))
}

/// One P-256 root certifying the P-256 ISK
pub fn p256_isk_chain(user_data: Option<Vec<u8>>) -> (CertificateChain, PrivateKey) {
    let isk = IskRequest {
        public_key: public_key(sptool_image_fake_keys::P256_ISK_PEM),
        constraints: 1,
        user_data,
        signing_key: Some(private_key(sptool_image_fake_keys::P256_ROOT0_PEM)),
    };
    let keys = vec![public_key(sptool_image_fake_keys::P256_ROOT0_PEM)];
    let chain = build_chain(&RustCrypto::default(), keys, 0, Some(isk), false).unwrap();
    (chain, private_key(sptool_image_fake_keys::P256_ISK_PEM))
}

pub fn code(err: &anyhow::Error) -> Option<sptool_error::SptoolError> {
    err.downcast_ref::<sptool_error::SptoolError>().copied()
}
