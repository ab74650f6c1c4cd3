/*++

Licensed under the Apache-2.0 license.

File Name:

   sb31.rs

Abstract:

    File contains the implementation of the SB3.1 generation command.

--*/

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ArgMatches;
use serde_json::{Map, Value};
use sptool_error::SptoolError;
use sptool_image_crypto::RustCrypto;
use sptool_image_gen::compiler::ExternalFiles;
use sptool_image_gen::parse::{read_hex_key_file, value_to_u32};
use sptool_image_gen::sb31::Sb31Encryption;
use sptool_image_gen::{compile_sb31_commands, error, Sb31Config, Sb31Generator};
use sptool_image_serde::{write_artifacts, Artifact};

use crate::config::{config_dir, load_sb31_config, resolve_path, Sb31FileConfig};

/// Run the command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let config_path: &PathBuf = args
        .get_one::<PathBuf>("config")
        .with_context(|| "config arg not specified")?;

    let config = load_sb31_config(config_path)?;
    let base = config_dir(config_path);
    let container = generate(&config, &base)?;

    let out_path = resolve_path(&base, &config.container_output_file);
    write_artifacts(&[Artifact::new(out_path, container)])
}

/// Build the container described by a configuration file
///
/// # Arguments
///
/// * `config` - SB3.1 configuration
/// * `base` - Directory relative paths are resolved against
///
/// # Returns
///
/// * `Vec<u8>` - Container bytes
pub(crate) fn generate(config: &Sb31FileConfig, base: &Path) -> anyhow::Result<Vec<u8>> {
    let crypto = RustCrypto::default();
    let (chain, signing_key) = config.chain.resolve(&crypto, base)?;

    let files = command_files(&config.commands, base)?;
    let commands = compile_sb31_commands(&config.commands, &files)?;

    let encryption = if config.is_encrypted {
        let pck_file = config
            .container_key_blob_encryption_key
            .as_deref()
            .ok_or_else(|| {
                error(
                    SptoolError::SB31_MISSING_ENCRYPTION_KEY,
                    "isEncrypted requires containerKeyBlobEncryptionKey",
                )
            })?;
        Some(Sb31Encryption {
            pck: read_hex_key_file(&resolve_path(base, pck_file))?,
            kdk_access_rights: optional_u32(config.kdk_access_rights.as_ref(), "kdkAccessRights")?,
        })
    } else {
        None
    };

    let timestamp = config
        .timestamp
        .as_ref()
        .map(|value| value.resolve())
        .transpose()?;
    if timestamp.is_none() {
        log::warn!("No timestamp configured, using the current time");
    }
    if let Some(family) = &config.family {
        log::debug!("SB3.1 container for {family}");
    }

    let sb31 = Sb31Config {
        firmware_version: optional_u32(config.firmware_version.as_ref(), "firmwareVersion")?,
        description: config.description.clone(),
        timestamp,
        is_nxp_container: config.is_nxp_container,
        commands,
        cert_chain: Some(chain),
        signing_key,
        encryption,
    };
    Sb31Generator::new(crypto).generate(&sb31)
}

fn optional_u32(value: Option<&Value>, name: &str) -> anyhow::Result<u32> {
    value
        .map(|value| value_to_u32(value).with_context(|| format!("Invalid {name}")))
        .transpose()
        .map(Option::unwrap_or_default)
}

/// Read every file named by a `file` parameter, keyed by the name as written
fn command_files(commands: &[Map<String, Value>], base: &Path) -> anyhow::Result<ExternalFiles> {
    let mut files = ExternalFiles::new();
    let names = commands
        .iter()
        .flat_map(|record| record.values())
        .filter_map(|params| params.get("file"))
        .filter_map(Value::as_str);
    for name in names {
        if files.contains_key(name) {
            continue;
        }
        let path = resolve_path(base, Path::new(name));
        let data = std::fs::read(&path)
            .with_context(|| format!("Failed to read command file {}", path.display()))?;
        files.insert(name.to_string(), data);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sptool_image_types::CommandKind;
    use sptool_image_verify::ContainerVerifier;

    fn setup(config: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = |name: &str| dir.path().join(name);
        std::fs::write(path("root0.pem"), sptool_image_fake_keys::P256_ROOT0_PEM).unwrap();
        std::fs::write(path("root1.pem"), sptool_image_fake_keys::P256_ROOT1_PUB_PEM).unwrap();
        std::fs::write(path("isk.pem"), sptool_image_fake_keys::P256_ISK_PEM).unwrap();
        std::fs::write(path("isk_pub.pem"), sptool_image_fake_keys::P256_ISK_PUB_PEM).unwrap();
        std::fs::write(path("pck.txt"), "77".repeat(32)).unwrap();
        std::fs::write(path("app.bin"), [0x5au8; 40]).unwrap();
        let config_path = path("sb31.yaml");
        std::fs::write(&config_path, config).unwrap();
        (dir, config_path)
    }

    fn run(config_path: &Path) -> anyhow::Result<()> {
        let args = crate::cli()
            .try_get_matches_from(["sptool", "sb31", "--config", config_path.to_str().unwrap()])
            .unwrap();
        run_cmd(args.subcommand_matches("sb31").unwrap())
    }

    const CONFIG: &str = "\
family: lpc55s3x
containerOutputFile: out/image.sb3
firmwareVersion: 3
description: app update
timestamp: '0x1000'
rootCertificate0File: root0.pem
rootCertificate1File: root1.pem
mainRootCertId: 0
mainRootCertPrivateKeyFile: root0.pem
commands:
  - erase: {address: '0x10000', size: '0x10000'}
  - load: {address: '0x10000', file: app.bin}
";

    #[test]
    fn test_signed_container() {
        let (dir, config_path) = setup(CONFIG);
        run(&config_path).unwrap();

        let container = std::fs::read(dir.path().join("out/image.sb3")).unwrap();
        let info = ContainerVerifier::new(RustCrypto::default())
            .verify_sb31(&container, None)
            .unwrap();
        assert_eq!(info.firmware_version, 3);
        assert_eq!(info.timestamp, 0x1000);
        assert_eq!(info.description, "app update");
        let commands = info.commands.unwrap();
        assert_eq!(
            commands[1].kind,
            CommandKind::Load {
                address: 0x10000,
                data: vec![0x5a; 40],
                memory_id: 0,
            }
        );
    }

    #[test]
    fn test_isk_and_encryption() {
        let config = format!(
            "{CONFIG}useIsk: true\nsigningCertificateFile: isk_pub.pem\nmainIskPrivateKeyFile: isk.pem\n\
             isEncrypted: true\ncontainerKeyBlobEncryptionKey: pck.txt\nkdkAccessRights: 3\n"
        );
        let (dir, config_path) = setup(&config);
        run(&config_path).unwrap();

        let container = std::fs::read(dir.path().join("out/image.sb3")).unwrap();
        let encryption = Sb31Encryption {
            pck: vec![0x77; 32],
            kdk_access_rights: 3,
        };
        let info = ContainerVerifier::new(RustCrypto::default())
            .verify_sb31(&container, Some(&encryption))
            .unwrap();
        assert!(info.cert_block.isk.is_some());
        assert_eq!(info.commands.unwrap().len(), 2);
    }

    #[test]
    fn test_encrypted_without_key() {
        let (dir, config_path) = setup(&format!("{CONFIG}isEncrypted: true\n"));
        let err = run(&config_path).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::SB31_MISSING_ENCRYPTION_KEY)
        );
        assert!(!dir.path().join("out/image.sb3").exists());
    }

    #[test]
    fn test_root_cert_gap() {
        let config = CONFIG.replace("rootCertificate1File", "rootCertificate2File");
        let (_dir, config_path) = setup(&config);
        let err = run(&config_path).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::CHAIN_ROOT_CERT_GAP)
        );
    }
}
