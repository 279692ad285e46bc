// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Layer model: one planned or observed kernel node, plus the rule that
//! fills its table when it is loaded.

use std::fmt::Write;
use std::path::Path;

use anyhow::Result;

use crate::dm::{DmDeviceInfo, DmTarget, DM_PARAMS_MAX};
use crate::metadata::{LogicalVolume, VolumeGroup};
use crate::volutil::VolmanError;

/// Filler device emitted for missing stripes of a striped segment.
const IOERROR_DEV: &str = "/dev/ioerror";

/// Stable handle into the plan's layer arena.
pub type LayerId = usize;

/// Rule used to fill a layer's kernel table.
#[derive(Clone, Debug, PartialEq)]
pub enum TableStrategy {
    /// Map the LV's own segments directly as linear/striped/error targets.
    Vanilla,
    /// Single snapshot-origin target over the LV's hidden real layer.
    Origin { real: String },
    /// Single snapshot target pairing an origin's real layer with a cow.
    Snapshot {
        origin_real: String,
        cow: String,
        chunk_size: u64,
    },
}

/// One planned or observed device-mapper node.
#[derive(Clone, Debug)]
pub struct Layer {
    pub name: String,

    /// LV this layer realizes; None for nodes discovered in the kernel
    /// that map to no known LV.
    pub lv: Option<String>,

    pub strategy: TableStrategy,

    /// Last observed kernel state, refreshed before each transition.
    pub info: DmDeviceInfo,

    /// Names of layers that must exist before this one may be created.
    pub pre_create: Vec<String>,

    /// Names of layers that must be live before this one may resume.
    /// Reserved; no current strategy populates it.
    pub pre_active: Vec<String>,

    /// Resolved arena handles for pre_create, filled in after pruning.
    pub deps: Vec<LayerId>,

    /// User-facing top layer, exported to /dev.
    pub visible: bool,

    /// Recreate this node even if it is already present.
    pub dirty: bool,

    /// Reachable from the current plan's mark seeds.
    pub mark: bool,
}

impl Layer {
    pub fn new(name: String, lv: &str, strategy: TableStrategy, visible: bool) -> Self {
        Self {
            name,
            lv: Some(lv.to_string()),
            strategy,
            info: DmDeviceInfo::default(),
            pre_create: vec![],
            pre_active: vec![],
            deps: vec![],
            visible,
            dirty: false,
            mark: false,
        }
    }

    /// A node found in the kernel during the scan, with no matching LV yet.
    pub fn discovered(name: String, info: DmDeviceInfo) -> Self {
        Self {
            name,
            lv: None,
            strategy: TableStrategy::Vanilla,
            info,
            pre_create: vec![],
            pre_active: vec![],
            deps: vec![],
            visible: false,
            dirty: false,
            mark: false,
        }
    }
}

/// Build the kernel table for one layer. This is the only place the
/// strategy tag is dispatched.
pub fn populate(vg: &VolumeGroup, layer: &Layer, dm_dir: &Path) -> Result<Vec<DmTarget>> {
    let lv = lv_behind(vg, layer)?;
    let table = match &layer.strategy {
        TableStrategy::Vanilla => vanilla_table(vg, lv)?,
        TableStrategy::Origin { real } => {
            let params = dm_dir.join(real).display().to_string();
            vec![DmTarget::new(
                0,
                vg.lv_size_sectors(lv),
                "snapshot-origin",
                params,
            )]
        }
        TableStrategy::Snapshot {
            origin_real,
            cow,
            chunk_size,
        } => {
            // The snapshot device spans the whole origin.
            let snap = lv.snapshot.as_ref().ok_or_else(|| {
                VolmanError::MetadataInconsistent(format!("{} is not a cow", lv.name))
            })?;
            let origin = vg.lv(&snap.origin).ok_or_else(|| {
                VolmanError::MetadataInconsistent(format!(
                    "snapshot {} has unresolvable origin {}",
                    lv.name, snap.origin
                ))
            })?;
            let params = format!(
                "{} {} P {}",
                dm_dir.join(origin_real).display(),
                dm_dir.join(cow).display(),
                chunk_size
            );
            vec![DmTarget::new(
                0,
                vg.lv_size_sectors(origin),
                "snapshot",
                params,
            )]
        }
    };

    if table.is_empty() {
        return Err(VolmanError::MetadataInconsistent(format!(
            "empty table for {}",
            layer.name
        ))
        .into());
    }

    for target in &table {
        if target.params.len() > DM_PARAMS_MAX {
            return Err(
                VolmanError::TableTooLarge(layer.name.clone(), target.params.len()).into(),
            );
        }
    }

    Ok(table)
}

fn lv_behind<'a>(vg: &'a VolumeGroup, layer: &Layer) -> Result<&'a LogicalVolume> {
    layer
        .lv
        .as_deref()
        .and_then(|name| vg.lv(name))
        .ok_or_else(|| {
            VolmanError::MetadataInconsistent(format!("no LV behind layer {}", layer.name)).into()
        })
}

/// Emit one target per segment, in logical-extent order.
fn vanilla_table(vg: &VolumeGroup, lv: &LogicalVolume) -> Result<Vec<DmTarget>> {
    let mut table = vec![];
    for seg in &lv.segments {
        let start = seg.start_extent * vg.extent_size;
        let length = seg.extent_count * vg.extent_size;
        let target = match seg.areas.len() {
            0 => {
                return Err(VolmanError::MetadataInconsistent(format!(
                    "segment of {} has no areas",
                    lv.name
                ))
                .into())
            }
            1 => {
                let (dev, offset) = area_device(vg, lv, &seg.areas[0])?;
                match dev {
                    // The backing PV is gone; serve I/O errors instead.
                    None => DmTarget::new(start, length, "error", String::new()),
                    Some(dev) => {
                        DmTarget::new(start, length, "linear", format!("{} {}", dev, offset))
                    }
                }
            }
            stripes => {
                let mut params = format!("{} {}", stripes, seg.stripe_size);
                for area in &seg.areas {
                    let (dev, offset) = area_device(vg, lv, area)?;
                    match dev {
                        None => write!(params, " {} 0", IOERROR_DEV).unwrap(),
                        Some(dev) => write!(params, " {} {}", dev, offset).unwrap(),
                    }
                }
                DmTarget::new(start, length, "striped", params)
            }
        };
        table.push(target);
    }

    Ok(table)
}

/// Resolve one stripe to its backing device path and start sector. A
/// missing PV resolves to None.
fn area_device(
    vg: &VolumeGroup,
    lv: &LogicalVolume,
    area: &crate::metadata::Area,
) -> Result<(Option<String>, u64)> {
    let pv = vg.pvs.get(area.pv).ok_or_else(|| {
        VolmanError::MetadataInconsistent(format!(
            "LV {} references PV index {} of {}",
            lv.name,
            area.pv,
            vg.pvs.len()
        ))
    })?;

    let offset = pv.pe_start + area.start_pe * vg.extent_size;
    Ok((pv.dev.as_ref().map(|d| d.display().to_string()), offset))
}
