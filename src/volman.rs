// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Listing for the volume activation library components.

pub mod vollog;

mod devfs;
mod dm;
mod engine;
mod layer;
mod metadata;
mod names;
mod plan;
mod volutil;

pub use dm::DmDeviceInfo;
pub use engine::{ActivateOptions, ActivationEngine};
pub use metadata::VolumeGroup;

use anyhow::Result;

use devfs::DevLinks;
use dm::Dmsetup;

/// Activate a logical volume through the production kernel adapter and
/// /dev publisher.
pub fn activate(vg: &VolumeGroup, lv: &str, options: &ActivateOptions) -> Result<()> {
    let dm = Dmsetup::new();
    let devfs = DevLinks::new(&vg.name);
    ActivationEngine::new(vg, &dm, &devfs).activate(lv, options)
}

/// Deactivate a logical volume, tolerating partially activated state.
pub fn deactivate(vg: &VolumeGroup, lv: &str) -> Result<()> {
    let dm = Dmsetup::new();
    let devfs = DevLinks::new(&vg.name);
    ActivationEngine::new(vg, &dm, &devfs).deactivate(lv)
}

/// Query the kernel state of a logical volume's top layer.
pub fn info(vg: &VolumeGroup, lv: &str) -> Result<DmDeviceInfo> {
    let dm = Dmsetup::new();
    let devfs = DevLinks::new(&vg.name);
    ActivationEngine::new(vg, &dm, &devfs).info(lv)
}
