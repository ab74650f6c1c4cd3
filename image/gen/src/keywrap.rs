/*++

Licensed under the Apache-2.0 license.

File Name:

   keywrap.rs

Abstract:

    File contains AES key wrap and unwrap (RFC 3394) on top of the block cipher primitive.

--*/

use sptool_error::SptoolError;

use crate::{error, ImageGeneratorCrypto};

/// Default initial value of RFC 3394
const KEYWRAP_IV: u64 = 0xa6a6_a6a6_a6a6_a6a6;

fn check_semiblocks(len: usize, min: usize) -> anyhow::Result<()> {
    if len % 8 != 0 || len < min {
        return Err(error(
            SptoolError::CRYPTO_CIPHER_FAILURE,
            format!("Key wrap input of {len} bytes is not a multiple of 8 bytes"),
        ));
    }
    Ok(())
}

fn semiblock(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(word)
}

/// Wrap `data` with `kek`; the result is 8 bytes longer than the input
pub fn aes_wrap<C: ImageGeneratorCrypto>(
    crypto: &C,
    kek: &[u8],
    data: &[u8],
) -> anyhow::Result<Vec<u8>> {
    check_semiblocks(data.len(), 0)?;
    let n = data.len() / 8;
    let mut a = KEYWRAP_IV;
    let mut r: Vec<u64> = data.chunks(8).map(semiblock).collect();

    let mut b = [0u8; 16];
    for j in 0..6 {
        for (i, ri) in r.iter_mut().enumerate() {
            b[..8].copy_from_slice(&a.to_be_bytes());
            b[8..].copy_from_slice(&ri.to_be_bytes());
            let out = crypto.aes_encrypt_block(kek, &b)?;
            let t = (n * j + i + 1) as u64;
            a = semiblock(&out[..8]) ^ t;
            *ri = semiblock(&out[8..]);
        }
    }

    let mut wrapped = Vec::with_capacity(data.len() + 8);
    wrapped.extend_from_slice(&a.to_be_bytes());
    for ri in r {
        wrapped.extend_from_slice(&ri.to_be_bytes());
    }
    Ok(wrapped)
}

/// Unwrap `wrapped` with `kek`, checking the integrity value
pub fn aes_unwrap<C: ImageGeneratorCrypto>(
    crypto: &C,
    kek: &[u8],
    wrapped: &[u8],
) -> anyhow::Result<Vec<u8>> {
    check_semiblocks(wrapped.len(), 8)?;
    let n = wrapped.len() / 8 - 1;
    let mut a = semiblock(wrapped);
    let mut r: Vec<u64> = wrapped[8..].chunks(8).map(semiblock).collect();

    let mut b = [0u8; 16];
    for j in (0..6).rev() {
        for i in (0..n).rev() {
            let t = (n * j + i + 1) as u64;
            b[..8].copy_from_slice(&(a ^ t).to_be_bytes());
            b[8..].copy_from_slice(&r[i].to_be_bytes());
            let out = crypto.aes_decrypt_block(kek, &b)?;
            a = semiblock(&out[..8]);
            r[i] = semiblock(&out[8..]);
        }
    }

    if a != KEYWRAP_IV {
        return Err(error(
            SptoolError::CRYPTO_KEY_UNWRAP_FAILURE,
            "Unwrapped key integrity value mismatch",
        ));
    }
    Ok(r.iter().flat_map(|ri| ri.to_be_bytes()).collect())
}
