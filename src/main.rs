// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Activates logical volumes through the kernel device-mapper.

use getopts::Options;
use log::error;

use volman::vollog::{self, LogDestination};
use volman::{ActivateOptions, VolumeGroup};

/// Define the default location of the VG metadata description.
const DEFAULT_METADATA_PATH: &str = "/run/volman/vg.json";

fn print_usage(message: &str, error: bool) {
    if error {
        eprintln!("{}", message)
    } else {
        println!("{}", message);
    }
}

fn init_logging(verbose: bool) -> std::result::Result<(), ()> {
    let destination = if verbose {
        LogDestination::Stderr
    } else {
        LogDestination::Syslog
    };

    if let Err(e) = vollog::init(destination) {
        eprintln!("failed to initialize logging: {}", e);
        return Err(());
    }

    Ok(())
}

fn common_options() -> Options {
    let mut opts = Options::new();
    opts.optopt(
        "f",
        "file",
        "Path to the VG metadata description",
        "METADATA",
    );
    opts.optflag("h", "help", "Print this help text");
    opts.optflag("v", "verbose", "Log to stderr at debug level");
    opts
}

fn load_vg(matches: &getopts::Matches) -> std::result::Result<VolumeGroup, ()> {
    let path = matches
        .opt_str("f")
        .unwrap_or_else(|| DEFAULT_METADATA_PATH.to_string());
    match VolumeGroup::load(&path) {
        Ok(vg) => Ok(vg),
        Err(e) => {
            error!("Failed to load VG metadata from {}: {:?}", path, e);
            Err(())
        }
    }
}

fn activate_usage(error: bool, options: &Options) {
    let brief = r#"Usage: volman activate [options] <lv>
Activate a logical volume: plan the device-mapper nodes it needs and bring
them up in dependency order.
"#;

    print_usage(&options.usage(brief), error);
}

fn volman_activate(args: &mut std::env::Args) -> std::result::Result<(), ()> {
    let mut opts = common_options();
    opts.optflag("n", "dry-run", "Plan and log tables, touch nothing");
    let args: Vec<String> = args.collect();
    let matches = match opts.parse(args) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Failed to parse arguments: {}", e);
            activate_usage(true, &opts);
            return Err(());
        }
    };

    if matches.opt_present("h") {
        activate_usage(false, &opts);
        return Ok(());
    }

    let lv = match matches.free.first() {
        Some(lv) => lv,
        None => {
            activate_usage(true, &opts);
            return Err(());
        }
    };

    let dry_run = matches.opt_present("n");
    init_logging(matches.opt_present("v") || dry_run)?;
    let vg = load_vg(&matches)?;

    if let Err(e) = volman::activate(&vg, lv, &ActivateOptions { dry_run }) {
        error!("Failed to activate {}/{}: {:?}", vg.name, lv, e);
        return Err(());
    }

    Ok(())
}

fn deactivate_usage(error: bool, options: &Options) {
    let brief = r#"Usage: volman deactivate [options] <lv>
Deactivate a logical volume, removing its device-mapper nodes top-down.
"#;

    print_usage(&options.usage(brief), error);
}

fn volman_deactivate(args: &mut std::env::Args) -> std::result::Result<(), ()> {
    let opts = common_options();
    let args: Vec<String> = args.collect();
    let matches = match opts.parse(args) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Failed to parse arguments: {}", e);
            deactivate_usage(true, &opts);
            return Err(());
        }
    };

    if matches.opt_present("h") {
        deactivate_usage(false, &opts);
        return Ok(());
    }

    let lv = match matches.free.first() {
        Some(lv) => lv,
        None => {
            deactivate_usage(true, &opts);
            return Err(());
        }
    };

    init_logging(matches.opt_present("v"))?;
    let vg = load_vg(&matches)?;

    if let Err(e) = volman::deactivate(&vg, lv) {
        error!("Failed to deactivate {}/{}: {:?}", vg.name, lv, e);
        return Err(());
    }

    Ok(())
}

fn info_usage(error: bool, options: &Options) {
    let brief = r#"Usage: volman info [options] <lv>
Print the kernel state of a logical volume's top device-mapper node.
"#;

    print_usage(&options.usage(brief), error);
}

fn volman_info(args: &mut std::env::Args) -> std::result::Result<(), ()> {
    let opts = common_options();
    let args: Vec<String> = args.collect();
    let matches = match opts.parse(args) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Failed to parse arguments: {}", e);
            info_usage(true, &opts);
            return Err(());
        }
    };

    if matches.opt_present("h") {
        info_usage(false, &opts);
        return Ok(());
    }

    let lv = match matches.free.first() {
        Some(lv) => lv,
        None => {
            info_usage(true, &opts);
            return Err(());
        }
    };

    init_logging(matches.opt_present("v"))?;
    let vg = load_vg(&matches)?;

    match volman::info(&vg, lv) {
        Ok(info) => {
            if info.exists {
                println!(
                    "{}/{}: {} device {}:{}, open count {}",
                    vg.name,
                    lv,
                    if info.suspended { "suspended" } else { "active" },
                    info.major,
                    info.minor,
                    info.open_count
                );
            } else {
                println!("{}/{}: not active", vg.name, lv);
            }
            Ok(())
        }
        Err(e) => {
            error!("Failed to get info for {}/{}: {:?}", vg.name, lv, e);
            Err(())
        }
    }
}

fn app_usage(error: bool) {
    let usage_msg = r#"Usage: volman subcommand [options]
volman activates and deactivates logical volumes via device-mapper.

Subcommands:
    activate - Activate a logical volume.
    deactivate - Deactivate a logical volume.
    info - Print the kernel state of a logical volume.

Use volman <subcommand> --help for details on a specific subcommand.
"#;

    print_usage(usage_msg, error);
}

fn volman_main() -> std::result::Result<(), ()> {
    let mut args = std::env::args();
    if args.next().is_none() {
        eprintln!("volman: no program name");
        return Err(());
    }

    let subcommand = match args.next() {
        Some(subcommand) => subcommand,
        None => {
            app_usage(true);
            return Err(());
        }
    };

    match subcommand.as_str() {
        "activate" => volman_activate(&mut args),
        "deactivate" => volman_deactivate(&mut args),
        "info" => volman_info(&mut args),
        "help" | "--help" | "-h" => {
            app_usage(false);
            Ok(())
        }
        _ => {
            eprintln!("unknown subcommand: {}", subcommand);
            app_usage(true);
            Err(())
        }
    }
}

fn main() {
    if volman_main().is_err() {
        std::process::exit(1);
    }
}
