// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! In-memory model of a volume group, as handed to the activation engine.
//!
//! Parsing the on-disk VG metadata is somebody else's job; this module only
//! describes the already-parsed shape and knows how to load it from the
//! JSON form the tooling passes around.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::volutil::VolmanError;

/// One physical volume contributed to the group.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PhysicalVolume {
    pub uuid: String,

    /// Kernel device node path; absent when the backing device is missing.
    #[serde(default)]
    pub dev: Option<PathBuf>,

    /// First data sector on the device.
    pub pe_start: u64,
}

/// One stripe of a segment: which PV it lives on and where.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Area {
    /// Index into the VG's PV list.
    pub pv: usize,

    /// First physical extent of this stripe.
    pub start_pe: u64,
}

/// A contiguous range of logical extents with uniform layout.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Segment {
    pub start_extent: u64,
    pub extent_count: u64,

    /// Stripe size in sectors; meaningful only with more than one area.
    #[serde(default)]
    pub stripe_size: u64,

    pub areas: Vec<Area>,
}

/// Links an LV as the copy-on-write side of a snapshot.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SnapshotUse {
    /// Name of the origin LV whose data the snapshot captures.
    pub origin: String,

    /// Copy-on-write chunk size in sectors.
    pub chunk_size: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LogicalVolume {
    pub name: String,
    pub uuid: String,
    pub segments: Vec<Segment>,

    /// Present when this LV is the cow of a snapshot.
    #[serde(default)]
    pub snapshot: Option<SnapshotUse>,
}

impl LogicalVolume {
    /// Total size in extents, summed over the segments.
    pub fn extent_count(&self) -> u64 {
        self.segments.iter().map(|s| s.extent_count).sum()
    }

    /// Whether this LV is the cow side of a snapshot.
    pub fn is_cow(&self) -> bool {
        self.snapshot.is_some()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct VolumeGroup {
    pub name: String,
    pub uuid: String,

    /// Sectors per physical extent; constant across the group.
    pub extent_size: u64,

    pub pvs: Vec<PhysicalVolume>,
    pub lvs: Vec<LogicalVolume>,
}

impl VolumeGroup {
    /// Load a volume group description from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context(format!(
            "Failed to read VG metadata: {}",
            path.as_ref().display()
        ))?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse VG metadata")
    }

    /// Look up an LV by name.
    pub fn lv(&self, name: &str) -> Option<&LogicalVolume> {
        self.lvs.iter().find(|lv| lv.name == name)
    }

    /// Size of an LV in sectors.
    pub fn lv_size_sectors(&self, lv: &LogicalVolume) -> u64 {
        lv.extent_count() * self.extent_size
    }

    /// All LVs that are snapshots of the named origin.
    pub fn snapshots_of<'a>(
        &'a self,
        origin: &'a str,
    ) -> impl Iterator<Item = &'a LogicalVolume> {
        self.lvs
            .iter()
            .filter(move |lv| matches!(&lv.snapshot, Some(s) if s.origin == origin))
    }

    /// Check the metadata for inconsistencies the engine cannot plan
    /// around: duplicate LV names, out-of-range PV references, snapshots
    /// without a resolvable origin or with a zero chunk size.
    pub fn validate(&self) -> Result<()> {
        for (i, lv) in self.lvs.iter().enumerate() {
            if self.lvs[..i].iter().any(|other| other.name == lv.name) {
                return Err(VolmanError::MetadataInconsistent(format!(
                    "duplicate LV name {}",
                    lv.name
                ))
                .into());
            }

            for seg in &lv.segments {
                for area in &seg.areas {
                    if area.pv >= self.pvs.len() {
                        return Err(VolmanError::MetadataInconsistent(format!(
                            "LV {} references PV index {} of {}",
                            lv.name,
                            area.pv,
                            self.pvs.len()
                        ))
                        .into());
                    }
                }
            }

            if let Some(snap) = &lv.snapshot {
                if self.lv(&snap.origin).is_none() {
                    return Err(VolmanError::MetadataInconsistent(format!(
                        "snapshot {} has unresolvable origin {}",
                        lv.name, snap.origin
                    ))
                    .into());
                }
                if snap.chunk_size == 0 {
                    return Err(VolmanError::MetadataInconsistent(format!(
                        "snapshot {} has zero chunk size",
                        lv.name
                    ))
                    .into());
                }
            }
        }

        Ok(())
    }
}
