// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Implements log routing for the tool: syslog when running as a service,
//! stderr for interactive runs.

use anyhow::{anyhow, Context, Result};
use log::LevelFilter;
use syslog::{BasicLogger, Facility, Formatter3164};

/// Where log lines should be routed.
pub enum LogDestination {
    Syslog,
    Stderr,
}

/// Initialize the global logger.
pub fn init(destination: LogDestination) -> Result<()> {
    match destination {
        LogDestination::Stderr => {
            stderrlog::new()
                .verbosity(3)
                .timestamp(stderrlog::Timestamp::Millisecond)
                .init()
                .context("Failed to initialize stderr logging")?;
        }
        LogDestination::Syslog => {
            let formatter = Formatter3164 {
                facility: Facility::LOG_USER,
                hostname: None,
                process: "volman".into(),
                pid: std::process::id(),
            };

            let logger = syslog::unix(formatter)
                .map_err(|e| anyhow!("Could not connect to syslog: {}", e))?;
            log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
                .map(|()| log::set_max_level(LevelFilter::Debug))
                .context("Failed to install syslog logger")?;
        }
    }

    Ok(())
}
