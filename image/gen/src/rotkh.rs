/*++

Licensed under the Apache-2.0 license.

File Name:

   rotkh.rs

Abstract:

    File contains the Root-Of-Trust Key Hash computation shared by containers and PFR.

--*/

use sptool_error::SptoolError;
use sptool_image_types::*;

use crate::{error, ImageGeneratorCrypto};

fn hash_algorithm(width: usize) -> anyhow::Result<HashAlgorithm> {
    HashAlgorithm::from_bits(width).ok_or_else(|| {
        error(
            SptoolError::CRYPTO_UNSUPPORTED_ALGORITHM,
            format!("No hash algorithm of {width} bits"),
        )
    })
}

/// Big-endian `value` widened with leading zeros to `len` bytes
fn left_pad(value: &[u8], len: usize) -> anyhow::Result<Vec<u8>> {
    let value = match value.iter().position(|b| *b != 0) {
        Some(start) => &value[start..],
        None => &[],
    };
    if value.len() > len {
        return Err(error(
            SptoolError::CHAIN_MIXED_CURVES,
            format!("Coordinate of {} bytes exceeds {len} bytes", value.len()),
        ));
    }
    let mut padded = vec![0u8; len - value.len()];
    padded.extend_from_slice(value);
    Ok(padded)
}

/// Minimal big-endian encoding, no leading zero bytes
fn minimal(value: &[u8]) -> &[u8] {
    let start = value.iter().position(|b| *b != 0).unwrap_or(value.len());
    &value[start..]
}

/// Hash of one public key at `width` bits
///
/// RSA keys hash `n || e`, elliptic curve keys hash `X || Y` with each
/// coordinate at `width / 8` bytes.
pub fn public_key_hash<C: ImageGeneratorCrypto>(
    crypto: &C,
    key: &PublicKey,
    width: usize,
) -> anyhow::Result<Vec<u8>> {
    let algo = hash_algorithm(width)?;
    let mut data = Vec::new();
    match key {
        PublicKey::Rsa { modulus, exponent } => {
            data.extend_from_slice(minimal(modulus));
            data.extend_from_slice(minimal(exponent));
        }
        PublicKey::Ecc { x, y, .. } => {
            data.extend(left_pad(x, width / 8)?);
            data.extend(left_pad(y, width / 8)?);
        }
    }
    crypto.digest(algo, &data)
}

/// Root-Of-Trust Key Hash over up to four keys, zero padded to `field_width` bits
///
/// The first key selects the hash width. Absent slots hash as zeros and keys
/// past the fourth are ignored.
pub fn compute_rotkh<C: ImageGeneratorCrypto>(
    crypto: &C,
    keys: &[PublicKey],
    field_width: usize,
) -> anyhow::Result<Vec<u8>> {
    let first = keys
        .first()
        .ok_or_else(|| error(SptoolError::ROTKH_NO_KEYS, "ROTKH needs at least one key"))?;
    let width = first.rotkh_width();
    if width > field_width {
        return Err(error(
            SptoolError::ROTKH_FIELD_TOO_NARROW,
            format!("ROTKH of {width} bits does not fit a {field_width} bit field"),
        ));
    }

    let slot_len = width / 8;
    let mut table = Vec::with_capacity(MAX_ROOT_KEY_COUNT * slot_len);
    for slot in 0..MAX_ROOT_KEY_COUNT {
        match keys.get(slot) {
            Some(key) => table.extend(public_key_hash(crypto, key, width)?),
            None => table.resize(table.len() + slot_len, 0),
        }
    }

    let mut rotkh = crypto.digest(hash_algorithm(width)?, &table)?;
    rotkh.resize(field_width / 8, 0);
    Ok(rotkh)
}
