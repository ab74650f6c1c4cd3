/*++

Licensed under the Apache-2.0 license.

File Name:

   mbi.rs

Abstract:

    File contains the implementation of the Master Boot Image command.

--*/

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ArgMatches;
use sptool_error::SptoolError;
use sptool_image_crypto::RustCrypto;
use sptool_image_gen::parse::value_to_u32;
use sptool_image_gen::{error, MbiConfig, MbiGenerator, MbiImageType, TrustZone};
use sptool_image_serde::{write_artifacts, Artifact};

use crate::config::{config_dir, load_mbi_config, resolve_path, MbiFileConfig};
use crate::tz::mbi_trustzone;

/// Run the command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let config_path: &PathBuf = args
        .get_one::<PathBuf>("config")
        .with_context(|| "config arg not specified")?;

    let config = load_mbi_config(config_path)?;
    let base = config_dir(config_path);
    let image = generate(&config, &base)?;

    let out_path = resolve_path(&base, &config.master_boot_output_file);
    write_artifacts(&[Artifact::new(out_path, image)])
}

/// Build the image described by a configuration file
///
/// # Arguments
///
/// * `config` - Master Boot Image configuration
/// * `base` - Directory relative paths are resolved against
///
/// # Returns
///
/// * `Vec<u8>` - Image bytes
pub(crate) fn generate(config: &MbiFileConfig, base: &Path) -> anyhow::Result<Vec<u8>> {
    let crypto = RustCrypto::default();
    let image_type = MbiImageType::select(
        config.output_image_authentication_type,
        config.output_image_execution_target,
        config.chain.use_isk,
    )?;

    let app_path = resolve_path(base, &config.input_image_file);
    let app = std::fs::read(&app_path)
        .with_context(|| format!("Failed to read application image {}", app_path.display()))?;

    let trustzone = if config.enable_trust_zone {
        let preset = config
            .trust_zone_preset_file
            .as_deref()
            .map(|file| resolve_path(base, file));
        mbi_trustzone(&config.family, config.revision.as_deref(), preset.as_deref())?
    } else {
        TrustZone::disabled()
    };

    let image_version = config
        .dual_boot_version
        .as_ref()
        .map(|value| {
            let version = value_to_u32(value).context("Invalid dualBootVersion")?;
            u16::try_from(version).map_err(|_| {
                error(
                    SptoolError::PARSE_INVALID_NUMBER,
                    format!("dualBootVersion {version:#x} exceeds 16 bits"),
                )
            })
        })
        .transpose()?;

    let (cert_chain, signing_key) = if image_type.is_signed() {
        let (chain, key) = config.chain.resolve(&crypto, base)?;
        (Some(chain), key)
    } else {
        (None, None)
    };

    let mbi = MbiConfig {
        image_type,
        app,
        load_address: value_to_u32(&config.output_image_execution_address)
            .context("Invalid outputImageExecutionAddress")?,
        trustzone,
        image_version,
        firmware_version: config
            .firmware_version
            .as_ref()
            .map(value_to_u32)
            .transpose()
            .context("Invalid firmwareVersion")?
            .unwrap_or(0),
        cert_chain,
        signing_key,
    };
    log::info!("Building {:?} image for {}", image_type, config.family);
    MbiGenerator::new(crypto).generate(&mbi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sptool_image_gen::trustzone::TrustZoneKind;
    use sptool_image_verify::ContainerVerifier;

    fn setup(config: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = |name: &str| dir.path().join(name);
        std::fs::write(path("root0.pem"), sptool_image_fake_keys::P256_ROOT0_PEM).unwrap();
        std::fs::write(path("root1.pem"), sptool_image_fake_keys::P256_ROOT1_PUB_PEM).unwrap();
        std::fs::write(path("isk.pem"), sptool_image_fake_keys::P256_ISK_PEM).unwrap();
        std::fs::write(path("isk_pub.pem"), sptool_image_fake_keys::P256_ISK_PUB_PEM).unwrap();
        std::fs::write(path("app.bin"), [0u8; 0x100]).unwrap();
        let config_path = path("mbi.toml");
        std::fs::write(&config_path, config).unwrap();
        (dir, config_path)
    }

    fn run(config_path: &Path) -> anyhow::Result<Vec<u8>> {
        let args = crate::cli()
            .try_get_matches_from(["sptool", "mbi", "--config", config_path.to_str().unwrap()])
            .unwrap();
        run_cmd(args.subcommand_matches("mbi").unwrap())?;
        let dir = config_path.parent().unwrap();
        Ok(std::fs::read(dir.join("out/mbi.bin")).unwrap())
    }

    const CRC_CONFIG: &str = r#"
family = "lpc55s3x"
inputImageFile = "app.bin"
outputImageExecutionAddress = "0x20000000"
outputImageExecutionTarget = "ram"
outputImageAuthenticationType = "crc"
masterBootOutputFile = "out/mbi.bin"
dualBootVersion = 2
"#;

    const SIGNED_CONFIG: &str = r#"
family = "lpc55s3x"
inputImageFile = "app.bin"
outputImageExecutionAddress = 0
outputImageExecutionTarget = "xip"
outputImageAuthenticationType = "signed"
masterBootOutputFile = "out/mbi.bin"
firmwareVersion = 5
rootCertificate0File = "root0.pem"
rootCertificate1File = "root1.pem"
mainCertChainId = 0
mainCertPrivateKeyFile = "root0.pem"
"#;

    #[test]
    fn test_crc_image() {
        let (_dir, config_path) = setup(CRC_CONFIG);
        let image = run(&config_path).unwrap();
        let info = ContainerVerifier::new(RustCrypto::default())
            .verify_mbi(&image)
            .unwrap();
        assert_eq!(info.image_type, MbiImageType::CrcRam);
        assert_eq!(info.trustzone, TrustZoneKind::Enabled);
        assert_eq!(info.load_address, 0x2000_0000);
        assert_eq!(info.image_version, Some(2));
        assert_eq!(info.image_length as usize, image.len());
    }

    #[test]
    fn test_signed_image() {
        let (_dir, config_path) = setup(SIGNED_CONFIG);
        let image = run(&config_path).unwrap();
        let info = ContainerVerifier::new(RustCrypto::default())
            .verify_mbi(&image)
            .unwrap();
        assert_eq!(info.image_type, MbiImageType::SignedXip);
        assert_eq!(info.firmware_version, Some(5));
        assert_eq!(info.image_version, None);
    }

    #[test]
    fn test_signed_isk_image_without_trustzone() {
        let config = format!(
            "{SIGNED_CONFIG}useIsk = true\nsigningCertificateFile = \"isk_pub.pem\"\n\
             signingCertificateConstraint = 1\nmainIskPrivateKeyFile = \"isk.pem\"\n\
             enableTrustZone = false\n"
        );
        let (_dir, config_path) = setup(&config);
        let image = run(&config_path).unwrap();
        let info = ContainerVerifier::new(RustCrypto::default())
            .verify_mbi(&image)
            .unwrap();
        assert_eq!(info.image_type, MbiImageType::SignedXipNxp);
        assert_eq!(info.trustzone, TrustZoneKind::Disabled);
        let isk = info.cert_block.unwrap().isk.unwrap();
        assert_eq!(isk.constraints, 1);
    }

    #[test]
    fn test_signed_without_private_key() {
        let config = SIGNED_CONFIG.replace("mainCertPrivateKeyFile = \"root0.pem\"\n", "");
        let (dir, config_path) = setup(&config);
        let err = run(&config_path).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::MBI_MISSING_SIGNING_MATERIAL)
        );
        assert!(!dir.path().join("out/mbi.bin").exists());
    }

    #[test]
    fn test_unsupported_image_type() {
        let config = CRC_CONFIG.replace("crc", "signed");
        let (_dir, config_path) = setup(&config);
        let err = run(&config_path).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::MBI_UNSUPPORTED_IMAGE_TYPE)
        );
    }
}
