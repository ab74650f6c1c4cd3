/*++

Licensed under the Apache-2.0 license.

File Name:

   main.rs

Abstract:

    Main entry point of the sptool secure provisioning application

--*/
use std::path::PathBuf;

use clap::{arg, value_parser, ArgAction, Command};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use sptool_error::{ErrorKind, SptoolError};

mod config;
mod mbi;
mod pfr;
mod sb21;
mod sb31;
mod tz;

fn pfr_cmd() -> Command {
    let device_args = |cmd: Command| {
        cmd.arg(
            arg!(--"device" <NAME> "Device name")
                .required(true)
                .value_parser(value_parser!(String)),
        )
        .arg(
            arg!(--"revision" <REV> "Silicon revision, latest when omitted")
                .required(false)
                .value_parser(value_parser!(String)),
        )
        .arg(
            arg!(--"type" <TYPE> "Page type, CMPA or CFPA")
                .required(true)
                .value_parser(value_parser!(String)),
        )
    };

    Command::new("pfr")
        .about("Protected flash region CMPA/CFPA pages")
        .subcommand_required(true)
        .subcommand(
            Command::new("generate-binary")
                .about("Generate a page from a settings file")
                .arg(
                    arg!(--"user-config" <FILE> "PFR settings file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"type" <TYPE> "Page type when the settings name none")
                        .required(false)
                        .value_parser(value_parser!(String)),
                )
                .arg(
                    arg!(--"rotkh-key" <FILE> "Root key, certificate or public key for the ROTKH")
                        .required(false)
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(arg!(--"add-seal" "Write the seal marker"))
                .arg(
                    arg!(--"out" <FILE> "Output file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            device_args(Command::new("parse-binary").about("Convert a page to a settings file"))
                .arg(
                    arg!(--"binary" <FILE> "Page binary")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(arg!(--"show-diff" "Only report values that differ from the reset values"))
                .arg(
                    arg!(--"out" <FILE> "Output YAML file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            device_args(Command::new("get-config").about("Write the reset-value settings"))
                .arg(
                    arg!(--"out" <FILE> "Output YAML file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("translate")
                .about("Resolve CMPA/CFPA/UTIL keys against settings files")
                .arg(
                    arg!(--"cmpa" <FILE> "CMPA settings file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"cfpa" <FILE> "CFPA settings file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"key" <KEY> "Key such as CMPA.BOOT_CFG.DEFAULT_ISP_MODE")
                        .required(true)
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(String)),
                ),
        )
}

/// Command line definition
pub(crate) fn cli() -> Command {
    let sub_cmds = vec![
        Command::new("sb21")
            .about("Create a Secure Binary 2.1 container from a command script")
            .arg(
                arg!(--"command-script" <FILE> "Command script, JSON or YAML")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"external" <FILE> "External data file referenced by the script")
                    .required(false)
                    .action(ArgAction::Append)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"kek" <FILE> "Key encryption key as hex text")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"signing-key" <FILE> "RSA private key PEM")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"signing-cert" <FILE> "Signing certificate, issued by a root first")
                    .required(false)
                    .action(ArgAction::Append)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"root-cert" <FILE> "Root certificate")
                    .required(false)
                    .action(ArgAction::Append)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"timestamp" <SECS> "Seconds since 2000-01-01, current time when omitted")
                    .required(false)
                    .value_parser(value_parser!(String)),
            )
            .arg(
                arg!(--"hash-output" <FILE> "ROTKH output file")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"out" <FILE> "Output file")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            ),
        Command::new("sb31")
            .about("Create a Secure Binary 3.1 container")
            .arg(
                arg!(--"config" <FILE> "SB3.1 configuration, JSON, YAML or TOML")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            ),
        Command::new("mbi")
            .about("Create a Master Boot Image")
            .arg(
                arg!(--"config" <FILE> "MBI configuration, JSON, YAML or TOML")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            ),
        Command::new("tz")
            .about("Create a TrustZone preset blob")
            .arg(
                arg!(--"config" <FILE> "TrustZone configuration, JSON, YAML or TOML")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"out" <FILE> "Output file, overrides tzpOutputFile")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            ),
        pfr_cmd(),
    ];

    Command::new("sptool")
        .arg_required_else_help(true)
        .subcommand_required(true)
        .arg(arg!(-v --"verbose" "Enable debug logging").global(true))
        .subcommands(sub_cmds)
        .about("Secure provisioning container tools")
}

/// Entry point
fn main() {
    let cmd = cli().get_matches();

    let level = if cmd.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = SimpleLogger::new().with_level(level).init();

    let result = match cmd.subcommand() {
        Some(("sb21", args)) => sb21::run_cmd(args),
        Some(("sb31", args)) => sb31::run_cmd(args),
        Some(("mbi", args)) => mbi::run_cmd(args),
        Some(("tz", args)) => tz::run_cmd(args),
        Some(("pfr", args)) => pfr::run_cmd(args),
        _ => unreachable!(),
    };

    if let Err(err) = result {
        let internal = err
            .downcast_ref::<SptoolError>()
            .is_some_and(|code| code.kind() == ErrorKind::InternalDefect);
        if internal {
            log::error!("internal error: {err:#}");
        } else {
            log::error!("error: {err:#}");
        }
        std::process::exit(1);
    }
}
