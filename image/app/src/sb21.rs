/*++

Licensed under the Apache-2.0 license.

File Name:

   sb21.rs

Abstract:

    File contains the implementation of the SB2.1 generation command.

--*/

use std::path::PathBuf;

use anyhow::Context;
use clap::ArgMatches;
use sptool_image_crypto::{cert_der, RustCrypto};
use sptool_image_gen::compiler::ExternalFiles;
use sptool_image_gen::parse::read_hex_key_file;
use sptool_image_gen::timestamp::TimestampValue;
use sptool_image_gen::{compile_script, CommandScript, ImageGeneratorCrypto, Sb21Generator, Sb21Options};
use sptool_image_serde::{write_artifacts, Artifact};

/// Default location of the ROTKH side file
pub(crate) const DEFAULT_HASH_OUTPUT: &str = "hash.bin";

/// Run the command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let script_path: &PathBuf = args
        .get_one::<PathBuf>("command-script")
        .with_context(|| "command-script arg not specified")?;

    let out_path: &PathBuf = args
        .get_one::<PathBuf>("out")
        .with_context(|| "out arg not specified")?;

    let hash_path = args
        .get_one::<PathBuf>("hash-output")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HASH_OUTPUT));

    let files = load_external_files(args.get_many::<PathBuf>("external"))?;
    let script = CommandScript::load(script_path)?;
    let compiled = compile_script(&script, &files)?;

    let options = Sb21Options {
        kek: args
            .get_one::<PathBuf>("kek")
            .map(|path| read_hex_key_file(path))
            .transpose()?,
        timestamp: args
            .get_one::<String>("timestamp")
            .map(|text| TimestampValue::Text(text.clone()).resolve())
            .transpose()?,
        secrets: None,
        signing_certs: load_certs(args.get_many::<PathBuf>("signing-cert"))?,
        root_certs: load_certs(args.get_many::<PathBuf>("root-cert"))?,
        signing_key: args
            .get_one::<PathBuf>("signing-key")
            .map(|path| RustCrypto::private_key_from_pem(path))
            .transpose()?,
    };

    let image = Sb21Generator::new(RustCrypto::default()).generate(&compiled, &options)?;
    log::info!("SB2.1 ROTKH {}", hex::encode(&image.rotkh));

    write_artifacts(&[
        Artifact::new(out_path, image.container),
        Artifact::new(hash_path, image.rotkh),
    ])
}

/// Read the external data files
///
/// Each file is reachable from the script by its position and by its file name.
fn load_external_files<'a>(
    paths: Option<impl Iterator<Item = &'a PathBuf>>,
) -> anyhow::Result<ExternalFiles> {
    let mut files = ExternalFiles::new();
    for (index, path) in paths.into_iter().flatten().enumerate() {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read external file {}", path.display()))?;
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            files.insert(name.to_string(), data.clone());
        }
        files.insert(index.to_string(), data);
    }
    Ok(files)
}

fn load_certs<'a>(paths: Option<impl Iterator<Item = &'a PathBuf>>) -> anyhow::Result<Vec<Vec<u8>>> {
    paths
        .into_iter()
        .flatten()
        .map(|path| cert_der(&RustCrypto::cert_from_file(path)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sptool_error::SptoolError;
    use sptool_image_types::CommandKind;
    use sptool_image_verify::ContainerVerifier;

    const SCRIPT: &str = r#"{
        "options": {"productVersion": "1.0.0", "componentVersion": "1.0.0", "buildNumber": 1},
        "sections": [{"section_id": 0, "commands": [
            {"load": {"address": "0x1000", "file": "app.bin"}},
            {"load": {"address": "0x2000", "file": "1"}}
        ]}]
    }"#;

    #[test]
    fn test_generate_with_external_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = |name: &str| dir.path().join(name);
        std::fs::write(path("script.json"), SCRIPT).unwrap();
        std::fs::write(path("app.bin"), [1u8, 2, 3, 4]).unwrap();
        std::fs::write(path("data.bin"), [9u8; 8]).unwrap();
        std::fs::write(path("kek.txt"), "aa".repeat(32)).unwrap();
        std::fs::write(path("key.pem"), sptool_image_fake_keys::RSA2048_K0_PEM).unwrap();
        std::fs::write(path("root.der"), sptool_image_fake_keys::ROOT_K0_CERT_DER).unwrap();

        let out = path("out/image.sb2");
        let hash = path("out/hash.bin");
        let args = crate::cli()
            .try_get_matches_from([
                "sptool",
                "sb21",
                "--command-script",
                path("script.json").to_str().unwrap(),
                "--external",
                path("app.bin").to_str().unwrap(),
                "--external",
                path("data.bin").to_str().unwrap(),
                "--kek",
                path("kek.txt").to_str().unwrap(),
                "--signing-key",
                path("key.pem").to_str().unwrap(),
                "--signing-cert",
                path("root.der").to_str().unwrap(),
                "--root-cert",
                path("root.der").to_str().unwrap(),
                "--timestamp",
                "0x100",
                "--hash-output",
                hash.to_str().unwrap(),
                "--out",
                out.to_str().unwrap(),
            ])
            .unwrap();
        run_cmd(args.subcommand_matches("sb21").unwrap()).unwrap();

        let container = std::fs::read(&out).unwrap();
        let info = ContainerVerifier::new(RustCrypto::default())
            .verify_sb21(&container, Some(&[0xaa; 32][..]))
            .unwrap();
        assert_eq!(info.timestamp, 0x100);
        assert_eq!(
            info.sections[0].commands[0].kind,
            CommandKind::Load {
                address: 0x1000,
                data: vec![1, 2, 3, 4],
                memory_id: 0,
            }
        );
        assert_eq!(
            info.sections[0].commands[1].kind,
            CommandKind::Load {
                address: 0x2000,
                data: vec![9; 8],
                memory_id: 0,
            }
        );
        assert_eq!(std::fs::read(&hash).unwrap(), info.rotkh);
    }

    #[test]
    fn test_missing_signing_material_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("script.json");
        std::fs::write(&script, SCRIPT.replace("app.bin", "0")).unwrap();
        std::fs::write(dir.path().join("app.bin"), [1u8; 4]).unwrap();
        let out = dir.path().join("image.sb2");

        let args = crate::cli()
            .try_get_matches_from([
                "sptool",
                "sb21",
                "--command-script",
                script.to_str().unwrap(),
                "--external",
                dir.path().join("app.bin").to_str().unwrap(),
                "--external",
                dir.path().join("app.bin").to_str().unwrap(),
                "--out",
                out.to_str().unwrap(),
            ])
            .unwrap();
        let err = run_cmd(args.subcommand_matches("sb21").unwrap()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::SB21_MISSING_SIGNING_MATERIAL)
        );
        assert!(!out.exists());
    }

    #[test]
    fn test_unknown_command_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("script.yaml");
        std::fs::write(
            &script,
            "sections:\n  - section_id: 0\n    commands:\n      - launch: {address: '0x0'}\n",
        )
        .unwrap();
        let out = dir.path().join("image.sb2");
        let args = crate::cli()
            .try_get_matches_from([
                "sptool",
                "sb21",
                "--command-script",
                script.to_str().unwrap(),
                "--out",
                out.to_str().unwrap(),
            ])
            .unwrap();
        assert!(run_cmd(args.subcommand_matches("sb21").unwrap()).is_err());
        assert!(!out.exists());
    }
}
