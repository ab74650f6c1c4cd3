/*++

Licensed under the Apache-2.0 license.

File Name:

   tz.rs

Abstract:

    File contains the implementation of the TrustZone preset command.

--*/

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ArgMatches;
use sptool_error::SptoolError;
use sptool_image_gen::parse::value_to_u32;
use sptool_image_gen::{error, TrustZone, TrustZoneDatabase};
use sptool_image_serde::{write_artifacts, Artifact};

use crate::config::{config_dir, load_tz_config, resolve_path, TzFileConfig};

/// Run the command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let config_path: &PathBuf = args
        .get_one::<PathBuf>("config")
        .with_context(|| "config arg not specified")?;

    let config = load_tz_config(config_path)?;
    let out_path = match (args.get_one::<PathBuf>("out"), &config.tzp_output_file) {
        (Some(out), _) => out.clone(),
        (None, Some(out)) => resolve_path(&config_dir(config_path), out),
        (None, None) => {
            return Err(error(
                SptoolError::PARSE_MALFORMED_CONFIG,
                "No --out given and tzpOutputFile is not configured",
            ))
        }
    };

    let trustzone = preset(&config)?;
    log::info!(
        "TrustZone preset of {} bytes for {}",
        trustzone.export().len(),
        config.family
    );
    write_artifacts(&[Artifact::new(out_path, trustzone.export().to_vec())])
}

/// Apply the configured register values over the family template
pub(crate) fn preset(config: &TzFileConfig) -> anyhow::Result<TrustZone> {
    let mut presets = BTreeMap::new();
    for (name, value) in &config.trust_zone_preset {
        let value =
            value_to_u32(value).with_context(|| format!("TrustZone register `{name}`"))?;
        presets.insert(name.clone(), value);
    }
    let db = TrustZoneDatabase::load()?;
    TrustZone::custom(&db, &config.family, config.revision.as_deref(), &presets)
}

/// TrustZone of an MBI: a preset configuration or binary, or the ROM defaults
pub(crate) fn mbi_trustzone(
    family: &str,
    revision: Option<&str>,
    preset_file: Option<&Path>,
) -> anyhow::Result<TrustZone> {
    let Some(path) = preset_file else {
        return Ok(TrustZone::enabled());
    };
    let mut config = match load_tz_config(path) {
        Ok(config) => config,
        Err(err) => {
            log::debug!(
                "{} is not a TrustZone configuration ({err:#}), reading it as binary",
                path.display()
            );
            let raw = std::fs::read(path)
                .with_context(|| format!("Failed to read TrustZone binary {}", path.display()))?;
            return TrustZone::from_binary(&TrustZoneDatabase::load()?, family, revision, &raw);
        }
    };
    if config.family != family {
        return Err(error(
            SptoolError::TZ_UNSUPPORTED_FAMILY,
            format!(
                "TrustZone preset for `{}` used in a `{family}` image",
                config.family
            ),
        ));
    }
    if config.revision.is_none() {
        config.revision = revision.map(str::to_string);
    }
    preset(&config)
}
