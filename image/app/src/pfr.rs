/*++

Licensed under the Apache-2.0 license.

File Name:

   pfr.rs

Abstract:

    File contains the implementation of the CMPA/CFPA page commands.

--*/

use std::path::PathBuf;

use anyhow::Context;
use clap::ArgMatches;
use sptool_error::SptoolError;
use sptool_image_crypto::RustCrypto;
use sptool_image_gen::{error, ImageGeneratorCrypto};
use sptool_image_serde::{write_artifacts, Artifact};
use sptool_pfr::{AreaKind, ConfigArea, PfrConfiguration, PfrDatabase, Translator};

/// Run the command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    match args.subcommand() {
        Some(("generate-binary", args)) => generate_binary(args),
        Some(("parse-binary", args)) => parse_binary(args),
        Some(("get-config", args)) => get_config(args),
        Some(("translate", args)) => translate(args),
        _ => Err(error(
            SptoolError::PARSE_MALFORMED_CONFIG,
            "Unknown pfr subcommand",
        )),
    }
}

fn path_arg<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a PathBuf> {
    args.get_one::<PathBuf>(name)
        .with_context(|| format!("{name} arg not specified"))
}

fn area_kind(args: &ArgMatches, config: Option<&PfrConfiguration>) -> anyhow::Result<AreaKind> {
    let kind = args
        .get_one::<String>("type")
        .map(String::as_str)
        .or_else(|| config.and_then(|config| config.kind.as_deref()))
        .ok_or_else(|| {
            error(
                SptoolError::PFR_CONFIG_MISMATCH_TYPE,
                "Page type is neither configured nor given with --type",
            )
        })?;
    kind.parse()
}

/// Settings file to a 512-byte page
fn generate_binary(args: &ArgMatches) -> anyhow::Result<()> {
    let config = PfrConfiguration::load(path_arg(args, "user-config")?)?;
    let kind = area_kind(args, Some(&config))?;
    let db = PfrDatabase::load()?;
    let mut area = ConfigArea::from_config(&db, kind, &config)?;

    let add_seal = args.get_flag("add-seal");
    let keys = args
        .get_many::<PathBuf>("rotkh-key")
        .into_iter()
        .flatten()
        .map(|path| RustCrypto::public_key_from_file(path))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let page = if keys.is_empty() {
        area.export(add_seal)
    } else {
        area.export_with_rotkh(&RustCrypto::default(), &keys, add_seal)?
    };

    log::info!(
        "{kind} page for {} revision {}",
        area.device().name,
        area.revision()
    );
    write_artifacts(&[Artifact::new(path_arg(args, "out")?, page)])
}

/// 512-byte page to a settings file
fn parse_binary(args: &ArgMatches) -> anyhow::Result<()> {
    let binary = path_arg(args, "binary")?;
    let data = std::fs::read(binary)
        .with_context(|| format!("Failed to read PFR binary {}", binary.display()))?;

    let db = PfrDatabase::load()?;
    let device = db.device(device_arg(args)?)?;
    let kind = area_kind(args, None)?;
    let mut area = ConfigArea::new(device, kind, revision_arg(args))?;
    area.parse(&data)?;

    let config = area.get_config(args.get_flag("show-diff"), true)?;
    write_artifacts(&[Artifact::new(
        path_arg(args, "out")?,
        config.to_yaml()?.into_bytes(),
    )])
}

/// Reset-value settings file of a page
fn get_config(args: &ArgMatches) -> anyhow::Result<()> {
    let db = PfrDatabase::load()?;
    let device = db.device(device_arg(args)?)?;
    let config = ConfigArea::default_config(device, area_kind(args, None)?, revision_arg(args))?;
    write_artifacts(&[Artifact::new(
        path_arg(args, "out")?,
        config.to_yaml()?.into_bytes(),
    )])
}

/// Print the value behind each key
fn translate(args: &ArgMatches) -> anyhow::Result<()> {
    let cmpa = PfrConfiguration::load(path_arg(args, "cmpa")?)?;
    let cfpa = PfrConfiguration::load(path_arg(args, "cfpa")?)?;
    let db = PfrDatabase::load()?;
    let translator = Translator::new(&db, &cmpa, &cfpa)?;
    for key in args.get_many::<String>("key").into_iter().flatten() {
        println!("{key} = {:#x}", translator.translate(key)?);
    }
    Ok(())
}

fn device_arg(args: &ArgMatches) -> anyhow::Result<&str> {
    args.get_one::<String>("device")
        .map(String::as_str)
        .with_context(|| "device arg not specified")
}

fn revision_arg(args: &ArgMatches) -> Option<&str> {
    args.get_one::<String>("revision").map(String::as_str)
}
