/*++

Licensed under the Apache-2.0 license.

File Name:

   keys.rs

Abstract:

    File contains key and algorithm descriptors shared by the generators.

--*/

use core::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Hash Algorithm
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Digest length in bytes
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Select the algorithm producing a digest of `bits` bits
    pub fn from_bits(bits: usize) -> Option<Self> {
        match bits {
            256 => Some(HashAlgorithm::Sha256),
            384 => Some(HashAlgorithm::Sha384),
            512 => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }
}

/// Elliptic curve
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EccCurve {
    P256,
    P384,
}

impl EccCurve {
    /// Size of one coordinate or scalar in bytes
    pub fn coordinate_len(self) -> usize {
        match self {
            EccCurve::P256 => 32,
            EccCurve::P384 => 48,
        }
    }

    /// Key size in bits
    pub fn bits(self) -> usize {
        self.coordinate_len() * 8
    }

    /// Length of a raw `r || s` signature
    pub fn signature_len(self) -> usize {
        self.coordinate_len() * 2
    }

    /// Hash algorithm paired with the curve
    pub fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            EccCurve::P256 => HashAlgorithm::Sha256,
            EccCurve::P384 => HashAlgorithm::Sha384,
        }
    }

    /// Curve identifier stored in certificate block flags
    pub fn cert_block_id(self) -> u32 {
        match self {
            EccCurve::P256 => 1,
            EccCurve::P384 => 2,
        }
    }

    pub fn from_cert_block_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(EccCurve::P256),
            2 => Some(EccCurve::P384),
            _ => None,
        }
    }
}

/// Public Key
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PublicKey {
    /// RSA public key; big-endian modulus and exponent without leading zeros
    Rsa { modulus: Vec<u8>, exponent: Vec<u8> },

    /// Elliptic curve public key; big-endian affine coordinates
    Ecc { curve: EccCurve, x: Vec<u8>, y: Vec<u8> },
}

impl PublicKey {
    pub fn curve(&self) -> Option<EccCurve> {
        match self {
            PublicKey::Ecc { curve, .. } => Some(*curve),
            PublicKey::Rsa { .. } => None,
        }
    }

    /// Width of the digest used when this key is hashed into a ROTKH
    pub fn rotkh_width(&self) -> usize {
        match self {
            PublicKey::Rsa { .. } => 256,
            PublicKey::Ecc { curve, .. } => curve.bits(),
        }
    }

    /// Size of the modulus in bytes, which is also the RSA signature size
    pub fn rsa_modulus_len(&self) -> Option<usize> {
        match self {
            PublicKey::Rsa { modulus, .. } => Some(modulus.len()),
            PublicKey::Ecc { .. } => None,
        }
    }

    /// Concatenated `X || Y` coordinates
    pub fn ecc_point(&self) -> Option<Vec<u8>> {
        match self {
            PublicKey::Ecc { x, y, .. } => {
                let mut point = x.clone();
                point.extend_from_slice(y);
                Some(point)
            }
            PublicKey::Rsa { .. } => None,
        }
    }
}

/// Private Key
///
/// Key material is wiped when the value is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub enum PrivateKey {
    /// PKCS#8 DER encoded RSA key
    Rsa { pkcs8_der: Vec<u8> },

    /// Elliptic curve private scalar, big-endian
    Ecc {
        #[zeroize(skip)]
        curve: EccCurve,
        scalar: Vec<u8>,
    },
}

impl PrivateKey {
    pub fn curve(&self) -> Option<EccCurve> {
        match self {
            PrivateKey::Ecc { curve, .. } => Some(*curve),
            PrivateKey::Rsa { .. } => None,
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivateKey::Rsa { .. } => f.write_str("PrivateKey::Rsa(..)"),
            PrivateKey::Ecc { curve, .. } => write!(f, "PrivateKey::Ecc({curve:?}, ..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_properties() {
        assert_eq!(EccCurve::P256.signature_len(), 64);
        assert_eq!(EccCurve::P384.hash_algorithm(), HashAlgorithm::Sha384);
        assert_eq!(
            EccCurve::from_cert_block_id(EccCurve::P384.cert_block_id()),
            Some(EccCurve::P384)
        );
        assert_eq!(HashAlgorithm::from_bits(384), Some(HashAlgorithm::Sha384));
        assert_eq!(HashAlgorithm::from_bits(128), None);
    }

    #[test]
    fn test_rotkh_width() {
        let rsa = PublicKey::Rsa {
            modulus: vec![0xc1; 512],
            exponent: vec![1, 0, 1],
        };
        assert_eq!(rsa.rotkh_width(), 256);
        let ecc = PublicKey::Ecc {
            curve: EccCurve::P384,
            x: vec![1; 48],
            y: vec![2; 48],
        };
        assert_eq!(ecc.rotkh_width(), 384);
        assert_eq!(ecc.ecc_point().map(|p| p.len()), Some(96));
    }

    #[test]
    fn test_private_key_debug_hides_material() {
        let key = PrivateKey::Ecc {
            curve: EccCurve::P256,
            scalar: vec![0x42; 32],
        };
        assert_eq!(format!("{key:?}"), "PrivateKey::Ecc(P256, ..)");
    }
}
