// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Implement common error definitions and process helpers used throughout
//! the engine.

use std::process::{Command, Output};

use anyhow::Result;
use log::debug;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum VolmanError {
    /// The target LV's top layer was not found after expansion.
    #[error("Plan incomplete: no top layer for {0}")]
    PlanIncomplete(String),
    /// A dependency cycle was found while planning.
    #[error("Circular dependency involving {0}")]
    CircularDependency(String),
    /// A target's parameter string exceeds the adapter buffer.
    #[error("Table too large for {0}: {1} bytes")]
    TableTooLarge(String, usize),
    /// A kernel operation returned failure.
    #[error("Kernel {op} failed on {name}")]
    KernelOpFailed { op: &'static str, name: String },
    /// A dependency entry points to a name not present in the plan.
    #[error("Missing dependency: {0}")]
    MissingDependency(String),
    /// The volume group metadata is not self-consistent.
    #[error("Metadata inconsistent: {0}")]
    MetadataInconsistent(String),
    /// Device-mapper output could not be understood.
    #[error("Device-mapper error: {0}")]
    DeviceMapperError(String),
    /// A subprocess failed to launch or exited non-zero.
    #[error("Process error: {0}")]
    ProcessFailed(String),
}

/// Format the command as a string for logging. The debug format puts quotes
/// around the program and each argument; removing all quotes isn't correct
/// in every case, but good enough for logging.
fn command_to_string(cmd: &Command) -> String {
    format!("{:?}", cmd).replace('"', "")
}

/// Run a command and bail if it fails to launch or exits non-zero.
pub fn checked_command(command: &mut Command) -> Result<()> {
    checked_command_output(command).map(|_| ())
}

/// Run a command and collect its output. An error is returned if the
/// process fails to launch, or if it exits non-zero.
pub fn checked_command_output(command: &mut Command) -> Result<Output> {
    let cmd_str = command_to_string(command);
    debug!("running command: {}", cmd_str);
    let output = command.output().map_err(|e| {
        VolmanError::ProcessFailed(format!("failed to launch \"{}\": {}", cmd_str, e))
    })?;

    if !output.status.success() {
        return Err(VolmanError::ProcessFailed(format!(
            "command \"{}\" failed: {}\nstdout={}\nstderr={}",
            cmd_str,
            output.status,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        ))
        .into());
    }

    Ok(output)
}
