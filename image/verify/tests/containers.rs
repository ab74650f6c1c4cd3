// Licensed under the Apache-2.0 license

use std::io::Write;

use sptool_error::SptoolError;
use sptool_image_crypto::RustCrypto;
use sptool_image_gen::compiler::{ComponentVersion, ExternalFiles};
use sptool_image_gen::sb31::Sb31Encryption;
use sptool_image_gen::trustzone::TrustZoneKind;
use sptool_image_gen::*;
use sptool_image_types::*;
use sptool_image_verify::ContainerVerifier;

fn private_key(pem: &str) -> PrivateKey {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(pem.as_bytes()).unwrap();
    RustCrypto::private_key_from_pem(file.path()).unwrap()
}

fn public_key(pem: &str) -> PublicKey {
    RustCrypto::default().public_key_of(&private_key(pem)).unwrap()
}

fn code(err: &anyhow::Error) -> Option<SptoolError> {
    err.downcast_ref::<SptoolError>().copied()
}

fn verifier() -> ContainerVerifier<RustCrypto> {
    ContainerVerifier::new(RustCrypto::default())
}

const LOAD_DATA: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
];

fn sb21_script(commands: &str) -> CompiledScript {
    let doc = CommandScript::from_text(&format!(
        r#"{{
            "options": {{"productVersion": "1.2.3", "componentVersion": "4.5.6", "buildNumber": 7}},
            "sections": [{commands}]
        }}"#
    ))
    .unwrap();
    compile_script(&doc, &ExternalFiles::new()).unwrap()
}

fn load_script() -> CompiledScript {
    sb21_script(
        r#"{"section_id": 0, "commands": [
            {"load": {"address": "0x1000", "data": "00112233445566778899aabbccddeeff"}}
        ]}"#,
    )
}

fn sb21_options(kek: Option<Vec<u8>>) -> Sb21Options {
    Sb21Options {
        kek,
        timestamp: Some(600),
        secrets: None,
        signing_certs: vec![sptool_image_fake_keys::ROOT_K0_CERT_DER.to_vec()],
        root_certs: vec![sptool_image_fake_keys::ROOT_K0_CERT_DER.to_vec()],
        signing_key: Some(private_key(sptool_image_fake_keys::RSA2048_K0_PEM)),
    }
}

#[test]
fn test_sb21_single_load() {
    let crypto = RustCrypto::default();
    let image = Sb21Generator::new(crypto)
        .generate(&load_script(), &sb21_options(None))
        .unwrap();

    let info = verifier().verify_sb21(&image.container, None).unwrap();
    assert_eq!(info.product_version, ComponentVersion::new(1, 2, 3));
    assert_eq!(info.component_version, ComponentVersion::new(4, 5, 6));
    assert_eq!(info.build_number, 7);
    assert_eq!(info.timestamp, 600);
    assert_eq!(
        info.certificates,
        vec![sptool_image_fake_keys::ROOT_K0_CERT_DER.to_vec()]
    );
    assert_eq!(info.sections.len(), 1);
    assert_eq!(info.sections[0].id, 0);
    assert_eq!(
        info.sections[0].commands[0].kind,
        CommandKind::Load {
            address: 0x1000,
            data: LOAD_DATA.to_vec(),
            memory_id: 0,
        }
    );

    // Side-file ROTKH
    let root = RustCrypto::public_key_from_cert(sptool_image_fake_keys::ROOT_K0_CERT_DER).unwrap();
    let expected = compute_rotkh(&crypto, &[root], 256).unwrap();
    assert_eq!(info.rotkh, expected);
    assert_eq!(image.rotkh, expected);
}

#[test]
fn test_sb21_multiple_sections_with_kek() {
    let kek = vec![0x5a; 32];
    let script = sb21_script(
        r#"{"section_id": 0, "commands": [
                {"erase": {"address": "0x0", "length": "0x2000"}},
                {"load": {"address": "0x1000", "data": "0102030405"}},
                {"reset": {}}
            ]},
            {"section_id": 3, "commands": [
                {"fill": {"address": "0x2000", "length": "0x10", "pattern": "0xa5a5a5a5"}}
            ]}"#,
    );
    let image = Sb21Generator::new(RustCrypto::default())
        .generate(&script, &sb21_options(Some(kek.clone())))
        .unwrap();

    let info = verifier().verify_sb21(&image.container, Some(&kek)).unwrap();
    let ids: Vec<_> = info.sections.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![0, 3]);
    for (parsed, compiled) in info.sections.iter().zip(&script.sections) {
        let parsed: Vec<_> = parsed.commands.iter().map(|c| &c.kind).collect();
        let compiled: Vec<_> = compiled.commands.iter().map(|c| &c.kind).collect();
        assert_eq!(parsed, compiled);
    }

    // The zero key does not unwrap the key blob
    let err = verifier().verify_sb21(&image.container, None).unwrap_err();
    assert_eq!(code(&err), Some(SptoolError::CRYPTO_KEY_UNWRAP_FAILURE));
}

#[test]
fn test_sb21_tampering() {
    let image = Sb21Generator::new(RustCrypto::default())
        .generate(&load_script(), &sb21_options(None))
        .unwrap();

    // Signed header field
    let mut container = image.container.clone();
    container[0x58] ^= 1;
    let err = verifier().verify_sb21(&container, None).unwrap_err();
    assert_eq!(code(&err), Some(SptoolError::CRYPTO_VERIFY_FAILURE));

    // Last byte of the encrypted section data
    let mut container = image.container.clone();
    let last = container.len() - 1;
    container[last] ^= 1;
    let err = verifier().verify_sb21(&container, None).unwrap_err();
    assert_eq!(code(&err), Some(SptoolError::SB21_MAC_MISMATCH));

    let mut container = image.container;
    container[0x14] = b'X';
    let err = verifier().verify_sb21(&container, None).unwrap_err();
    assert_eq!(code(&err), Some(SptoolError::SB21_INVALID_CONTAINER));
}

fn p256_chain() -> (CertificateChain, PrivateKey) {
    let keys = vec![
        public_key(sptool_image_fake_keys::P256_ROOT0_PEM),
        public_key(sptool_image_fake_keys::P256_ROOT1_PEM),
    ];
    let chain = build_chain(&RustCrypto::default(), keys, 0, None, true).unwrap();
    (chain, private_key(sptool_image_fake_keys::P256_ROOT0_PEM))
}

fn sb31_commands() -> Vec<Command> {
    let kinds = vec![
        CommandKind::Erase {
            address: 0x1000,
            length: 0x1000,
            memory_id: 0,
            erase_all: false,
        },
        CommandKind::Load {
            address: 0x1000,
            data: (0..300u32).map(|i| i as u8).collect(),
            memory_id: 0,
        },
        CommandKind::Jump {
            address: 0x1000,
            argument: 0,
            stack_pointer: None,
        },
    ];
    kinds
        .into_iter()
        .enumerate()
        .map(|(index, kind)| Command {
            position: CommandPosition { section: 0, index },
            kind,
        })
        .collect()
}

fn sb31_config() -> Sb31Config {
    let (chain, key) = p256_chain();
    Sb31Config {
        firmware_version: 9,
        description: "round trip".to_string(),
        timestamp: Some(100),
        is_nxp_container: false,
        commands: sb31_commands(),
        cert_chain: Some(chain),
        signing_key: Some(key),
        encryption: None,
    }
}

#[test]
fn test_sb31_plain_container() {
    let crypto = RustCrypto::default();
    let config = sb31_config();
    let container = Sb31Generator::new(crypto).generate(&config).unwrap();

    let info = verifier().verify_sb31(&container, None).unwrap();
    assert_eq!(info.firmware_version, 9);
    assert_eq!(info.timestamp, 100);
    assert_eq!(info.description, "round trip");
    assert!(!info.is_nxp_container);
    assert_eq!(info.block_count, 2);
    assert_eq!(info.commands, Some(sb31_commands()));
    let chain = config.cert_chain.as_ref().unwrap();
    assert_eq!(
        info.cert_block.rotkh(&crypto).unwrap(),
        chain.rotkh(&crypto, 256).unwrap()
    );
}

#[test]
fn test_sb31_encrypted_container() {
    let encryption = Sb31Encryption {
        pck: vec![0x77; 32],
        kdk_access_rights: 3,
    };
    let mut config = sb31_config();
    config.encryption = Some(encryption.clone());
    let container = Sb31Generator::new(RustCrypto::default())
        .generate(&config)
        .unwrap();

    let info = verifier().verify_sb31(&container, None).unwrap();
    assert_eq!(info.commands, None);

    let info = verifier()
        .verify_sb31(&container, Some(&encryption))
        .unwrap();
    assert_eq!(info.commands, Some(sb31_commands()));
}

#[test]
fn test_sb31_tampering() {
    let container = Sb31Generator::new(RustCrypto::default())
        .generate(&sb31_config())
        .unwrap();

    let mut corrupted = container.clone();
    corrupted[24] ^= 1;
    let err = verifier().verify_sb31(&corrupted, None).unwrap_err();
    assert_eq!(code(&err), Some(SptoolError::CRYPTO_VERIFY_FAILURE));

    // Data of the last block
    let mut corrupted = container.clone();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 1;
    let err = verifier().verify_sb31(&corrupted, None).unwrap_err();
    assert_eq!(code(&err), Some(SptoolError::SB31_INVALID_CONTAINER));

    let err = verifier()
        .verify_sb31(&container[..container.len() - 1], None)
        .unwrap_err();
    assert_eq!(code(&err), Some(SptoolError::SB31_INVALID_CONTAINER));
}

fn app() -> Vec<u8> {
    (0..0x200u32).map(|i| (i * 3) as u8).collect()
}

#[test]
fn test_mbi_crc_image() {
    let config = MbiConfig {
        image_type: MbiImageType::CrcRam,
        app: app(),
        load_address: 0x2000_0000,
        trustzone: TrustZone::enabled(),
        image_version: Some(5),
        firmware_version: 0,
        cert_chain: None,
        signing_key: None,
    };
    let image = MbiGenerator::new(RustCrypto::default())
        .generate(&config)
        .unwrap();

    let info = verifier().verify_mbi(&image).unwrap();
    assert_eq!(info.image_type, MbiImageType::CrcRam);
    assert_eq!(info.trustzone, TrustZoneKind::Enabled);
    assert_eq!(info.load_address, 0x2000_0000);
    assert_eq!(info.image_version, Some(5));
    assert!(info.cert_block.is_none());

    let mut corrupted = image;
    corrupted[0x100] ^= 1;
    let err = verifier().verify_mbi(&corrupted).unwrap_err();
    assert_eq!(code(&err), Some(SptoolError::MBI_INVALID_IMAGE));
}

#[test]
fn test_mbi_signed_image() {
    let (chain, key) = p256_chain();
    let config = MbiConfig {
        image_type: MbiImageType::SignedXip,
        app: app(),
        load_address: 0,
        trustzone: TrustZone::disabled(),
        image_version: None,
        firmware_version: 12,
        cert_chain: Some(chain.clone()),
        signing_key: Some(key),
    };
    let image = MbiGenerator::new(RustCrypto::default())
        .generate(&config)
        .unwrap();

    let info = verifier().verify_mbi(&image).unwrap();
    assert_eq!(info.image_type, MbiImageType::SignedXip);
    assert_eq!(info.trustzone, TrustZoneKind::Disabled);
    assert_eq!(info.firmware_version, Some(12));
    assert_eq!(info.image_version, None);
    assert_eq!(info.signing_key.as_ref(), Some(chain.used_root_key()));

    let mut corrupted = image;
    corrupted[0x40] ^= 1;
    let err = verifier().verify_mbi(&corrupted).unwrap_err();
    assert_eq!(code(&err), Some(SptoolError::CRYPTO_VERIFY_FAILURE));
}
