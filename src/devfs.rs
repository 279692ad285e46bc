// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Publishes activated LVs into /dev.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;

use crate::dm::DM_DIR;

/// Publisher interface notified as visible layers come and go.
pub trait DevFs {
    /// Called after a visible layer becomes live.
    fn add_lv(&self, lv: &str, name: &str) -> Result<()>;

    /// Called after a visible layer is removed.
    fn del_lv(&self, lv: &str) -> Result<()>;
}

/// Maintains `/dev/<vg>/<lv>` symlinks into the device-mapper directory.
pub struct DevLinks {
    vg_name: String,
    dev_dir: PathBuf,
    dm_dir: PathBuf,
}

impl DevLinks {
    pub fn new(vg_name: &str) -> Self {
        Self::with_roots(vg_name, Path::new("/dev"), Path::new(DM_DIR))
    }

    pub fn with_roots(vg_name: &str, dev_dir: &Path, dm_dir: &Path) -> Self {
        Self {
            vg_name: vg_name.to_string(),
            dev_dir: dev_dir.to_path_buf(),
            dm_dir: dm_dir.to_path_buf(),
        }
    }

    fn vg_dir(&self) -> PathBuf {
        self.dev_dir.join(&self.vg_name)
    }
}

impl DevFs for DevLinks {
    fn add_lv(&self, lv: &str, name: &str) -> Result<()> {
        let dir = self.vg_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .context(format!("Failed to create {}", dir.display()))?;
        }

        let link = dir.join(lv);
        // Replace a stale link from an earlier activation.
        if fs::symlink_metadata(&link).is_ok() {
            fs::remove_file(&link)
                .context(format!("Failed to remove stale link {}", link.display()))?;
        }

        let target = self.dm_dir.join(name);
        debug!("Linking {} -> {}", link.display(), target.display());
        symlink(&target, &link).context(format!("Failed to link {}", link.display()))
    }

    fn del_lv(&self, lv: &str) -> Result<()> {
        let link = self.vg_dir().join(lv);
        if fs::symlink_metadata(&link).is_ok() {
            debug!("Unlinking {}", link.display());
            fs::remove_file(&link)
                .context(format!("Failed to remove {}", link.display()))?;
        }

        Ok(())
    }
}
