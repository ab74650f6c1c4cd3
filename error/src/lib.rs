/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains API and macros used by the tool chain for error handling

--*/
#![cfg_attr(not(feature = "std"), no_std)]
use core::convert::From;
use core::fmt;
use core::num::{NonZeroU32, TryFromIntError};

/// Secure provisioning tool error.
///
/// The upper 16 bits of the code select the [`ErrorKind`], the lower 16 bits
/// identify the condition within that kind.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SptoolError(pub NonZeroU32);

/// Error category
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Malformed script, configuration or container
    Parse,

    /// Device, revision or type disagreement between a configuration and a schema
    ConfigMismatch,

    /// Invalid root certificate count or index, or missing image signing key material
    ChainConfig,

    /// ROTKH wider than its destination field
    FieldTooNarrow,

    /// Device or area has no ROTKH register
    RotkhNotSupported,

    /// Missing referenced file, register, bit-field, enum or command key
    ResourceNotFound,

    /// Delegated cryptographic operation failed
    CryptoProvider,

    /// Internal logic defect detected by a self check
    InternalDefect,

    /// Code outside of any known category
    Unknown,
}

/// Macro to define error constants ensuring uniqueness
///
/// This macro takes a list of (name, value, doc) tuples and generates
/// constant definitions for each error code together with a lookup of the
/// human readable description.
#[macro_export]
macro_rules! define_error_constants {
    ($(($name:ident, $value:expr, $doc:expr)),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const $name: SptoolError = SptoolError::new_const($value);
        )*

        /// Human readable description of the error
        pub fn description(&self) -> &'static str {
            let code = self.0.get();
            $(
                if code == $value {
                    return $doc;
                }
            )*
            "Unknown error"
        }

        #[cfg(test)]
        /// Returns a vector of all defined error constants for testing uniqueness
        pub fn all_constants() -> Vec<(&'static str, u32)> {
            vec![
                $(
                    (stringify!($name), $value),
                )*
            ]
        }
    };
}

impl SptoolError {
    /// Create an error; intended to only be used from const contexts, as we don't want
    /// runtime panics if val is zero. The preferred way to get a SptoolError from a u32 is to
    /// use `SptoolError::try_from()` from the `TryFrom` trait impl.
    const fn new_const(val: u32) -> Self {
        match NonZeroU32::new(val) {
            Some(val) => Self(val),
            None => panic!("SptoolError cannot be 0"),
        }
    }

    /// Category of the error
    pub fn kind(&self) -> ErrorKind {
        match self.0.get() >> 16 {
            0x0001 => ErrorKind::Parse,
            0x0002 => ErrorKind::ConfigMismatch,
            0x0003 => ErrorKind::ChainConfig,
            0x0004 => ErrorKind::FieldTooNarrow,
            0x0005 => ErrorKind::RotkhNotSupported,
            0x0006 => ErrorKind::ResourceNotFound,
            0x0007 => ErrorKind::CryptoProvider,
            0x0008 => ErrorKind::InternalDefect,
            _ => ErrorKind::Unknown,
        }
    }

    define_error_constants![
        (
            PARSE_INVALID_NUMBER,
            0x0001_0001,
            "Parse Error: Invalid numeric value"
        ),
        (
            PARSE_INVALID_HEX,
            0x0001_0002,
            "Parse Error: Invalid hexadecimal string"
        ),
        (
            PARSE_MALFORMED_CONFIG,
            0x0001_0003,
            "Parse Error: Malformed configuration document"
        ),
        (
            COMPILER_UNKNOWN_COMMAND,
            0x0001_0004,
            "Compiler Error: Unknown command"
        ),
        (
            COMPILER_MALFORMED_COMMAND,
            0x0001_0005,
            "Compiler Error: Command record must hold exactly one command"
        ),
        (
            COMPILER_MISSING_PARAMETER,
            0x0001_0006,
            "Compiler Error: Missing command parameter"
        ),
        (
            COMPILER_INVALID_VERSION,
            0x0001_0007,
            "Compiler Error: Invalid version string"
        ),
        (
            PARSE_INVALID_KEY,
            0x0001_0008,
            "Parse Error: Key material could not be decoded"
        ),
        (
            PARSE_INVALID_CERTIFICATE,
            0x0001_0009,
            "Parse Error: Certificate could not be decoded"
        ),
        (
            SB21_INVALID_CONTAINER,
            0x0001_000a,
            "SB2.1 Error: Malformed container"
        ),
        (
            SB21_MAC_MISMATCH,
            0x0001_000b,
            "SB2.1 Error: HMAC mismatch"
        ),
        (
            SB31_INVALID_CONTAINER,
            0x0001_000c,
            "SB3.1 Error: Malformed container"
        ),
        (
            TZ_INVALID_BINARY_SIZE,
            0x0001_000d,
            "TrustZone Error: Invalid preset binary size"
        ),
        (
            PFR_INVALID_BINARY_SIZE,
            0x0001_000e,
            "PFR Error: Invalid binary size"
        ),
        (
            PFR_INVALID_VALUE,
            0x0001_000f,
            "PFR Error: Value does not fit register or bit-field"
        ),
        (
            PFR_INVALID_SCHEMA,
            0x0001_0010,
            "PFR Error: Invalid register schema"
        ),
        (
            PFR_UNKNOWN_COMPUTE_HOOK,
            0x0001_0011,
            "PFR Error: Unknown computed field hook"
        ),
        (
            MBI_APP_TOO_SMALL,
            0x0001_0012,
            "Master Boot Image Error: Application smaller than the vector table"
        ),
        (
            MBI_UNSUPPORTED_IMAGE_TYPE,
            0x0001_0013,
            "Master Boot Image Error: Unsupported image type"
        ),
        (
            SB21_UNSUPPORTED_COMMAND,
            0x0001_0014,
            "SB2.1 Error: Command not supported by the container format"
        ),
        (
            SB31_UNSUPPORTED_COMMAND,
            0x0001_0015,
            "SB3.1 Error: Command not supported by the container format"
        ),
        (
            MBI_INVALID_IMAGE,
            0x0001_0016,
            "Master Boot Image Error: Malformed image"
        ),
        (
            PFR_MISSING_SETTINGS,
            0x0001_0017,
            "PFR Error: Configuration holds no settings"
        ),
        (
            MBI_IMAGE_TOO_LARGE,
            0x0001_0018,
            "Master Boot Image Error: Image length exceeds 32 bits"
        ),
        (
            PFR_CONFIG_MISMATCH_DEVICE,
            0x0002_0001,
            "PFR Error: Configuration device does not match"
        ),
        (
            PFR_CONFIG_MISMATCH_REVISION,
            0x0002_0002,
            "PFR Error: Configuration revision does not match"
        ),
        (
            PFR_CONFIG_MISMATCH_TYPE,
            0x0002_0003,
            "PFR Error: Configuration type does not match"
        ),
        (
            PFR_UNKNOWN_DEVICE,
            0x0002_0004,
            "PFR Error: Unknown device"
        ),
        (
            PFR_UNKNOWN_REVISION,
            0x0002_0005,
            "PFR Error: Unknown device revision"
        ),
        (
            TZ_UNSUPPORTED_FAMILY,
            0x0002_0006,
            "TrustZone Error: Unsupported family"
        ),
        (
            TZ_UNSUPPORTED_REVISION,
            0x0002_0007,
            "TrustZone Error: Unsupported family revision"
        ),
        (
            CHAIN_NO_ROOT_CERTS,
            0x0003_0001,
            "Certificate Chain Error: No root certificate supplied"
        ),
        (
            CHAIN_INVALID_ROOT_INDEX,
            0x0003_0002,
            "Certificate Chain Error: Used root certificate index out of range"
        ),
        (
            CHAIN_ISK_MISSING_SIGNING_KEY,
            0x0003_0003,
            "Certificate Chain Error: Image signing key requested without its signing key"
        ),
        (
            CHAIN_SIGNING_KEY_MISMATCH,
            0x0003_0004,
            "Certificate Chain Error: Signing key does not match the certificate chain"
        ),
        (
            CHAIN_SIGNING_CERT_NOT_ROOTED,
            0x0003_0005,
            "Certificate Chain Error: First signing certificate is not a root certificate"
        ),
        (
            CHAIN_ROOT_CERT_GAP,
            0x0003_0006,
            "Certificate Chain Error: Gap in root certificate list"
        ),
        (
            CHAIN_MIXED_CURVES,
            0x0003_0007,
            "Certificate Chain Error: Root keys use different curves"
        ),
        (
            CHAIN_UNSUPPORTED_KEY_TYPE,
            0x0003_0008,
            "Certificate Chain Error: Key type not supported by the container format"
        ),
        (
            MBI_MISSING_SIGNING_MATERIAL,
            0x0003_0009,
            "Master Boot Image Error: Signed image requires a signing key and certificate chain"
        ),
        (
            SB21_MISSING_SIGNING_MATERIAL,
            0x0003_000a,
            "SB2.1 Error: Signed image requires a private key, signing certificates and root certificates"
        ),
        (
            SB31_MISSING_ENCRYPTION_KEY,
            0x0003_000b,
            "SB3.1 Error: Encrypted container requires a container key"
        ),
        (
            CHAIN_EMPTY_SIGNING_CERTS,
            0x0003_000c,
            "Certificate Chain Error: No signing certificate supplied"
        ),
        (
            ROTKH_NO_KEYS,
            0x0003_000d,
            "ROTKH Error: No public key supplied"
        ),
        (
            SB31_MISSING_SIGNING_MATERIAL,
            0x0003_000e,
            "SB3.1 Error: Container requires a signing key and certificate chain"
        ),
        (
            ROTKH_FIELD_TOO_NARROW,
            0x0004_0001,
            "ROTKH Error: Destination field narrower than the algorithm width"
        ),
        (
            PFR_ROTKH_NOT_SUPPORTED,
            0x0005_0001,
            "PFR Error: Area has no ROTKH register"
        ),
        (
            COMPILER_FILE_NOT_FOUND,
            0x0006_0001,
            "Compiler Error: Referenced external file not found"
        ),
        (
            COMPILER_KEYBLOB_NOT_FOUND,
            0x0006_0002,
            "Compiler Error: Referenced key blob not found"
        ),
        (
            PFR_REGISTER_NOT_FOUND,
            0x0006_0003,
            "PFR Error: Register not found"
        ),
        (
            PFR_BITFIELD_NOT_FOUND,
            0x0006_0004,
            "PFR Error: Bit-field not found"
        ),
        (
            PFR_ENUM_NOT_FOUND,
            0x0006_0005,
            "PFR Error: Enum value not found"
        ),
        (
            TZ_UNKNOWN_REGISTER,
            0x0006_0006,
            "TrustZone Error: Unknown preset register"
        ),
        (
            PFR_TRANSLATOR_UNKNOWN_KEY,
            0x0006_0007,
            "PFR Error: Unknown translator key"
        ),
        (
            CRYPTO_SIGN_FAILURE,
            0x0007_0001,
            "Crypto Error: Signing failure"
        ),
        (
            CRYPTO_VERIFY_FAILURE,
            0x0007_0002,
            "Crypto Error: Signature verification failure"
        ),
        (
            CRYPTO_CIPHER_FAILURE,
            0x0007_0003,
            "Crypto Error: Cipher failure"
        ),
        (
            CRYPTO_INVALID_KEY_LENGTH,
            0x0007_0004,
            "Crypto Error: Invalid key length"
        ),
        (
            CRYPTO_KEY_UNWRAP_FAILURE,
            0x0007_0005,
            "Crypto Error: Key unwrap integrity check failure"
        ),
        (
            CRYPTO_UNSUPPORTED_ALGORITHM,
            0x0007_0006,
            "Crypto Error: Unsupported algorithm"
        ),
        (
            SB31_SELF_VERIFICATION_FAILED,
            0x0008_0001,
            "SB3.1 Error: Signature self verification failed"
        ),
    ];
}

impl fmt::Display for SptoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08x})", self.description(), self.0.get())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SptoolError {}

impl From<core::num::NonZeroU32> for crate::SptoolError {
    fn from(val: core::num::NonZeroU32) -> Self {
        crate::SptoolError(val)
    }
}

impl From<SptoolError> for core::num::NonZeroU32 {
    fn from(val: SptoolError) -> Self {
        val.0
    }
}

impl From<SptoolError> for u32 {
    fn from(val: SptoolError) -> Self {
        core::num::NonZeroU32::from(val).get()
    }
}

impl TryFrom<u32> for SptoolError {
    type Error = TryFromIntError;
    fn try_from(val: u32) -> Result<Self, TryFromIntError> {
        match NonZeroU32::try_from(val) {
            Ok(val) => Ok(SptoolError(val)),
            Err(err) => Err(err),
        }
    }
}

pub type SptoolResult<T> = Result<T, SptoolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_try_from() {
        assert!(SptoolError::try_from(0).is_err());
        assert_eq!(
            Ok(SptoolError::CHAIN_INVALID_ROOT_INDEX),
            SptoolError::try_from(0x0003_0002)
        );
    }

    #[test]
    fn test_error_constants_uniqueness() {
        let constants = SptoolError::all_constants();
        let mut error_values = HashSet::new();
        let mut duplicates = Vec::new();

        for (name, value) in constants {
            if !error_values.insert(value) {
                duplicates.push((name, value));
            }
        }

        assert!(
            duplicates.is_empty(),
            "Found duplicate error codes: {:?}",
            duplicates
        );
    }

    #[test]
    fn test_kind() {
        assert_eq!(
            SptoolError::COMPILER_UNKNOWN_COMMAND.kind(),
            ErrorKind::Parse
        );
        assert_eq!(
            SptoolError::PFR_CONFIG_MISMATCH_TYPE.kind(),
            ErrorKind::ConfigMismatch
        );
        assert_eq!(
            SptoolError::ROTKH_FIELD_TOO_NARROW.kind(),
            ErrorKind::FieldTooNarrow
        );
        assert_eq!(
            SptoolError::PFR_ROTKH_NOT_SUPPORTED.kind(),
            ErrorKind::RotkhNotSupported
        );
        assert_eq!(
            SptoolError::COMPILER_FILE_NOT_FOUND.kind(),
            ErrorKind::ResourceNotFound
        );
        assert_eq!(
            SptoolError::SB31_SELF_VERIFICATION_FAILED.kind(),
            ErrorKind::InternalDefect
        );
        assert_eq!(SptoolError(NonZeroU32::MIN).kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            SptoolError::PFR_REGISTER_NOT_FOUND.to_string(),
            "PFR Error: Register not found (0x00060003)"
        );
    }
}
