/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains fixed test keys and root certificates.

--*/

/// Generated with
///
/// ```text
/// openssl genpkey -algorithm RSA -pkeyopt rsa_keygen_bits:2048 -out rsa2048_k0.pem
/// openssl req -new -x509 -key rsa2048_k0.pem -subj /CN=root-key-0 -days 36500 \
///     -outform der -out root_k0_cert.der
/// openssl genpkey -algorithm EC -pkeyopt ec_paramgen_curve:P-256 -out p256_root0.pem
/// openssl pkey -in p256_root0.pem -pubout -out p256_root0_pub.pem
/// ```
pub const RSA2048_K0_PEM: &str = include_str!("../data/rsa2048_k0.pem");
pub const RSA2048_K1_PEM: &str = include_str!("../data/rsa2048_k1.pem");
pub const RSA2048_K2_PEM: &str = include_str!("../data/rsa2048_k2.pem");
pub const RSA2048_K3_PEM: &str = include_str!("../data/rsa2048_k3.pem");

/// Self-signed certificates of `RSA2048_K0_PEM..RSA2048_K3_PEM`
pub const ROOT_K0_CERT_DER: &[u8] = include_bytes!("../data/root_k0_cert.der");
pub const ROOT_K1_CERT_DER: &[u8] = include_bytes!("../data/root_k1_cert.der");
pub const ROOT_K2_CERT_DER: &[u8] = include_bytes!("../data/root_k2_cert.der");
pub const ROOT_K3_CERT_DER: &[u8] = include_bytes!("../data/root_k3_cert.der");

pub const RSA2048_PEMS: [&str; 4] = [
    RSA2048_K0_PEM,
    RSA2048_K1_PEM,
    RSA2048_K2_PEM,
    RSA2048_K3_PEM,
];
pub const ROOT_CERTS_DER: [&[u8]; 4] = [
    ROOT_K0_CERT_DER,
    ROOT_K1_CERT_DER,
    ROOT_K2_CERT_DER,
    ROOT_K3_CERT_DER,
];

pub const P256_ROOT0_PEM: &str = include_str!("../data/p256_root0.pem");
pub const P256_ROOT0_PUB_PEM: &str = include_str!("../data/p256_root0_pub.pem");
pub const P256_ROOT1_PEM: &str = include_str!("../data/p256_root1.pem");
pub const P256_ROOT1_PUB_PEM: &str = include_str!("../data/p256_root1_pub.pem");

/// Image signing key certified by `P256_ROOT0_PEM`
pub const P256_ISK_PEM: &str = include_str!("../data/p256_isk.pem");
pub const P256_ISK_PUB_PEM: &str = include_str!("../data/p256_isk_pub.pem");

pub const P384_ROOT0_PEM: &str = include_str!("../data/p384_root0.pem");
pub const P384_ROOT0_PUB_PEM: &str = include_str!("../data/p384_root0_pub.pem");
