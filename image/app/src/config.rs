/*++

Licensed under the Apache-2.0 license.

File Name:

   config.rs

Abstract:

    File contains utilities for parsing configuration files

--*/

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sptool_error::SptoolError;
use sptool_image_crypto::RustCrypto;
use sptool_image_gen::mbi::{MbiAuthentication, MbiTarget};
use sptool_image_gen::timestamp::TimestampValue;
use sptool_image_gen::{build_chain, error, CertificateChain, ImageGeneratorCrypto, IskRequest};
use sptool_image_types::PrivateKey;

/// Certificate chain fields shared by the MBI and SB3.1 configurations
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CertChainConfig {
    #[serde(default)]
    pub use_isk: bool,

    pub root_certificate0_file: Option<PathBuf>,

    pub root_certificate1_file: Option<PathBuf>,

    pub root_certificate2_file: Option<PathBuf>,

    pub root_certificate3_file: Option<PathBuf>,

    #[serde(alias = "mainCertChainId")]
    pub main_root_cert_id: Option<u32>,

    #[serde(alias = "mainCertPrivateKeyFile")]
    pub main_root_cert_private_key_file: Option<PathBuf>,

    /// ISK public key or certificate
    pub signing_certificate_file: Option<PathBuf>,

    pub signing_certificate_constraint: Option<u32>,

    /// ISK user data file
    pub sign_cert_data: Option<PathBuf>,

    pub main_isk_private_key_file: Option<PathBuf>,
}

/// Master Boot Image configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MbiFileConfig {
    pub family: String,

    pub revision: Option<String>,

    pub input_image_file: PathBuf,

    pub output_image_execution_address: Value,

    pub output_image_execution_target: MbiTarget,

    pub output_image_authentication_type: MbiAuthentication,

    pub master_boot_output_file: PathBuf,

    #[serde(default = "enabled")]
    pub enable_trust_zone: bool,

    pub trust_zone_preset_file: Option<PathBuf>,

    pub dual_boot_version: Option<Value>,

    pub firmware_version: Option<Value>,

    #[serde(flatten)]
    pub chain: CertChainConfig,
}

/// SB3.1 configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Sb31FileConfig {
    pub family: Option<String>,

    pub container_output_file: PathBuf,

    pub firmware_version: Option<Value>,

    #[serde(default)]
    pub description: String,

    pub timestamp: Option<TimestampValue>,

    #[serde(default)]
    pub is_nxp_container: bool,

    #[serde(default)]
    pub is_encrypted: bool,

    /// Hex text file with the part common key
    pub container_key_blob_encryption_key: Option<PathBuf>,

    pub kdk_access_rights: Option<Value>,

    #[serde(default)]
    pub commands: Vec<Map<String, Value>>,

    #[serde(flatten)]
    pub chain: CertChainConfig,
}

/// TrustZone preset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TzFileConfig {
    pub family: String,

    pub revision: Option<String>,

    pub tzp_output_file: Option<PathBuf>,

    #[serde(default)]
    pub trust_zone_preset: BTreeMap<String, Value>,
}

fn enabled() -> bool {
    true
}

/// Load a configuration file, choosing the format by extension
///
/// # Arguments
///
/// * `path` - `.json`, `.yaml`, `.yml` or `.toml` file
///
/// # Returns
///
/// * `T` - Parsed configuration
pub(crate) fn load_config<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read the config file {}", path.display()))?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let parsed = match extension.as_deref() {
        Some("json") => serde_json::from_str(&config_str).map_err(anyhow::Error::from),
        Some("yaml" | "yml") => serde_yaml::from_str(&config_str).map_err(anyhow::Error::from),
        Some("toml") => toml::from_str(&config_str).map_err(anyhow::Error::from),
        _ => {
            return Err(error(
                SptoolError::PARSE_MALFORMED_CONFIG,
                format!("Unsupported config file type {}", path.display()),
            ))
        }
    };
    parsed.map_err(|err| {
        error(
            SptoolError::PARSE_MALFORMED_CONFIG,
            format!("Failed to parse config file {}: {err}", path.display()),
        )
    })
}

/// Load Master Boot Image configuration from file
pub(crate) fn load_mbi_config(path: &Path) -> anyhow::Result<MbiFileConfig> {
    load_config(path)
}

/// Load SB3.1 configuration from file
pub(crate) fn load_sb31_config(path: &Path) -> anyhow::Result<Sb31FileConfig> {
    load_config(path)
}

/// Load TrustZone preset configuration from file
pub(crate) fn load_tz_config(path: &Path) -> anyhow::Result<TzFileConfig> {
    load_config(path)
}

/// Directory that relative paths of `config` are resolved against
pub(crate) fn config_dir(config: &Path) -> PathBuf {
    config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// Path relative to the configuration directory, absolute paths untouched
pub(crate) fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    base.join(path)
}

impl CertChainConfig {
    /// Root certificate paths in slot order
    pub(crate) fn root_cert_files(&self) -> anyhow::Result<Vec<&Path>> {
        let slots = [
            &self.root_certificate0_file,
            &self.root_certificate1_file,
            &self.root_certificate2_file,
            &self.root_certificate3_file,
        ];
        let used = slots
            .iter()
            .rposition(|slot| slot.is_some())
            .map_or(0, |last| last + 1);

        let mut files = Vec::with_capacity(used);
        for (index, slot) in slots[..used].iter().enumerate() {
            let file = slot.as_deref().ok_or_else(|| {
                error(
                    SptoolError::CHAIN_ROOT_CERT_GAP,
                    format!("rootCertificate{index}File is missing before a later root certificate"),
                )
            })?;
            files.push(file);
        }
        Ok(files)
    }

    /// Build the certificate chain and pick the container signing key
    ///
    /// # Arguments
    ///
    /// * `crypto` - Crypto provider
    /// * `base` - Directory relative paths are resolved against
    ///
    /// # Returns
    ///
    /// * `(CertificateChain, Option<PrivateKey>)` - Chain and the ISK or root private key
    pub(crate) fn resolve(
        &self,
        crypto: &RustCrypto,
        base: &Path,
    ) -> anyhow::Result<(CertificateChain, Option<PrivateKey>)> {
        let root_keys = self
            .root_cert_files()?
            .into_iter()
            .map(|file| RustCrypto::public_key_from_file(&resolve_path(base, file)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let root_private_key = self
            .main_root_cert_private_key_file
            .as_deref()
            .map(|file| RustCrypto::private_key_from_pem(&resolve_path(base, file)))
            .transpose()?;

        let used_root_cert = self.main_root_cert_id.unwrap_or(0) as usize;
        if !self.use_isk {
            let chain = build_chain(crypto, root_keys, used_root_cert, None, false)?;
            return Ok((chain, root_private_key));
        }

        let isk_file = self.signing_certificate_file.as_deref().ok_or_else(|| {
            error(
                SptoolError::PARSE_MALFORMED_CONFIG,
                "useIsk requires signingCertificateFile",
            )
        })?;
        let user_data = self
            .sign_cert_data
            .as_deref()
            .map(|file| {
                let file = resolve_path(base, file);
                std::fs::read(&file)
                    .with_context(|| format!("Failed to read ISK user data {}", file.display()))
            })
            .transpose()?;
        let request = IskRequest {
            public_key: RustCrypto::public_key_from_file(&resolve_path(base, isk_file))?,
            constraints: self.signing_certificate_constraint.unwrap_or(0),
            user_data,
            signing_key: root_private_key,
        };
        let chain = build_chain(crypto, root_keys, used_root_cert, Some(request), true)?;

        let isk_private_key = self
            .main_isk_private_key_file
            .as_deref()
            .map(|file| RustCrypto::private_key_from_pem(&resolve_path(base, file)))
            .transpose()?;
        Ok((chain, isk_private_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("tz.json");
        std::fs::write(
            &json,
            r#"{"family": "lpc55s6x", "trustZonePreset": {"Secure vector table address": "0x1"}}"#,
        )
        .unwrap();
        let yaml = dir.path().join("tz.yml");
        std::fs::write(&yaml, "family: lpc55s6x\ntrustZonePreset:\n  Secure vector table address: 1\n").unwrap();
        let toml = dir.path().join("tz.toml");
        std::fs::write(&toml, "family = \"lpc55s6x\"\n[trustZonePreset]\n\"Secure vector table address\" = 1\n").unwrap();

        for path in [&json, &yaml, &toml] {
            let config = load_tz_config(path).unwrap();
            assert_eq!(config.family, "lpc55s6x");
            assert!(config.trust_zone_preset.contains_key("Secure vector table address"));
        }

        let ini = dir.path().join("tz.ini");
        std::fs::write(&ini, "family=lpc55s6x").unwrap();
        let err = load_tz_config(&ini).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::PARSE_MALFORMED_CONFIG)
        );
    }

    #[test]
    fn test_legacy_aliases() {
        let config: CertChainConfig = serde_json::from_str(
            r#"{"mainCertChainId": 2, "mainCertPrivateKeyFile": "root.pem"}"#,
        )
        .unwrap();
        assert_eq!(config.main_root_cert_id, Some(2));
        assert_eq!(
            config.main_root_cert_private_key_file,
            Some(PathBuf::from("root.pem"))
        );
    }

    #[test]
    fn test_root_cert_gap() {
        let config = CertChainConfig {
            root_certificate0_file: Some("a.pem".into()),
            root_certificate2_file: Some("c.pem".into()),
            ..Default::default()
        };
        let err = config.root_cert_files().unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::CHAIN_ROOT_CERT_GAP)
        );

        let config = CertChainConfig {
            root_certificate0_file: Some("a.pem".into()),
            root_certificate1_file: Some("b.pem".into()),
            ..Default::default()
        };
        assert_eq!(config.root_cert_files().unwrap().len(), 2);
        assert!(CertChainConfig::default().root_cert_files().unwrap().is_empty());
    }
}
