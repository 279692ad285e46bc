// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Plans the set of kernel nodes needed to realize or tear down an LV.
//!
//! A plan is an arena of layers keyed by encoded name, an active set of
//! LVs, and the dependency edges between layers. Planning expands every LV
//! in the group into its required layers, overlays what the kernel already
//! has, marks the closure of the target, and prunes the rest.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use log::debug;

use crate::dm::DeviceMapper;
use crate::layer::{Layer, LayerId, TableStrategy};
use crate::metadata::{LogicalVolume, VolumeGroup};
use crate::names::{self, LAYER_COW, LAYER_REAL};
use crate::volutil::VolmanError;

/// Whether a plan realizes or tears down its target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlanDirection {
    Activate,
    Deactivate,
}

#[derive(Default)]
pub struct Plan {
    layers: Vec<Layer>,
    by_name: HashMap<String, LayerId>,
    active_lvs: HashSet<String>,
}

impl Plan {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get(&self, name: &str) -> Option<LayerId> {
        self.by_name.get(name).copied()
    }

    pub fn layer(&self, id: LayerId) -> &Layer {
        &self.layers[id]
    }

    pub fn layer_mut(&mut self, id: LayerId) -> &mut Layer {
        &mut self.layers[id]
    }

    pub fn names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name.clone()).collect()
    }

    pub fn is_active(&self, lv: &str) -> bool {
        self.active_lvs.contains(lv)
    }

    /// Insert a layer, replacing any same-named entry. The kernel state
    /// observed during the scan survives replacement.
    pub fn insert(&mut self, mut layer: Layer) {
        if let Some(&id) = self.by_name.get(&layer.name) {
            layer.info = self.layers[id].info.clone();
            self.layers[id] = layer;
        } else {
            let id = self.layers.len();
            self.by_name.insert(layer.name.clone(), id);
            self.layers.push(layer);
        }
    }

    /// Build the universe of nodes already present in the kernel that may
    /// belong to this VG.
    pub fn scan_kernel(&mut self, vg: &VolumeGroup, dm: &dyn DeviceMapper) -> Result<()> {
        for name in dm.list_devices()? {
            if !names::belongs_to_vg(&vg.name, &name) {
                continue;
            }

            let info = dm.info(&name)?;
            debug!("Found existing node {}", name);
            self.insert(Layer::discovered(name, info));
        }

        Ok(())
    }

    /// Record every LV whose top-layer name was discovered in the kernel.
    pub fn fill_in_active_list(&mut self, vg: &VolumeGroup) {
        for lv in &vg.lvs {
            let top = names::encode(&vg.name, &lv.name, None);
            if let Some(id) = self.get(&top) {
                if self.layers[id].info.exists {
                    self.active_lvs.insert(lv.name.clone());
                }
            }
        }
    }

    /// Union the target into, or exclude it from, the active set.
    pub fn set_active(&mut self, lv: &str, active: bool) {
        if active {
            self.active_lvs.insert(lv.to_string());
        } else {
            self.active_lvs.remove(lv);
        }
    }

    /// Expand every LV in the VG into its required layers.
    pub fn expand_all(&mut self, vg: &VolumeGroup) -> Result<()> {
        for lv in &vg.lvs {
            self.expand_lv(vg, lv)
                .context(format!("Failed to expand LV {}", lv.name))?;
        }

        Ok(())
    }

    /// Choose one of three shapes for an LV: snapshot (it is a cow), origin
    /// (some active snapshot captures it), or plain vanilla.
    fn expand_lv(&mut self, vg: &VolumeGroup, lv: &LogicalVolume) -> Result<()> {
        if lv.segments.is_empty() {
            return Err(VolmanError::MetadataInconsistent(format!(
                "LV {} has no segments",
                lv.name
            ))
            .into());
        }

        let top_name = names::encode(&vg.name, &lv.name, None);
        if let Some(snap) = &lv.snapshot {
            self.check_origin_chain(vg, lv)?;
            let origin_real = names::encode(&vg.name, &snap.origin, Some(LAYER_REAL));
            let cow_name = names::encode(&vg.name, &lv.name, Some(LAYER_COW));

            self.insert(Layer::new(
                cow_name.clone(),
                &lv.name,
                TableStrategy::Vanilla,
                false,
            ));

            let mut top = Layer::new(
                top_name,
                &lv.name,
                TableStrategy::Snapshot {
                    origin_real: origin_real.clone(),
                    cow: cow_name.clone(),
                    chunk_size: snap.chunk_size,
                },
                true,
            );
            top.pre_create = vec![origin_real, cow_name];
            self.insert(top);
        } else if self.has_active_snapshot(vg, &lv.name) {
            let real_name = names::encode(&vg.name, &lv.name, Some(LAYER_REAL));
            self.insert(Layer::new(
                real_name.clone(),
                &lv.name,
                TableStrategy::Vanilla,
                false,
            ));

            let mut top = Layer::new(
                top_name,
                &lv.name,
                TableStrategy::Origin {
                    real: real_name.clone(),
                },
                true,
            );
            top.pre_create = vec![real_name];
            self.insert(top);
        } else {
            // An origin whose snapshots are all inactive needs no
            // indirection layer.
            self.insert(Layer::new(top_name, &lv.name, TableStrategy::Vanilla, true));
        }

        Ok(())
    }

    /// Whether any snapshot of the named LV is in the active set.
    fn has_active_snapshot(&self, vg: &VolumeGroup, name: &str) -> bool {
        vg.snapshots_of(name)
            .any(|snap| self.active_lvs.contains(&snap.name))
    }

    /// Reject cow-to-origin chains that loop back on themselves.
    fn check_origin_chain(&self, vg: &VolumeGroup, lv: &LogicalVolume) -> Result<()> {
        let mut seen = HashSet::new();
        seen.insert(lv.name.as_str());
        let mut cur = lv;
        while let Some(snap) = &cur.snapshot {
            let origin = vg.lv(&snap.origin).ok_or_else(|| {
                VolmanError::MetadataInconsistent(format!(
                    "snapshot {} has unresolvable origin {}",
                    cur.name, snap.origin
                ))
            })?;
            if !seen.insert(origin.name.as_str()) {
                return Err(VolmanError::CircularDependency(origin.name.clone()).into());
            }
            cur = origin;
        }

        Ok(())
    }

    /// Mark the closure of a top layer along pre_create. With
    /// `tolerate_missing` (teardown of partial state), dependency names
    /// absent from the plan are skipped instead of failing.
    pub fn mark_from(&mut self, top: &str, tolerate_missing: bool) -> Result<()> {
        let id = self
            .get(top)
            .ok_or_else(|| VolmanError::PlanIncomplete(top.to_string()))?;
        let mut path = vec![];
        self.mark_rec(id, &mut path, tolerate_missing)
    }

    fn mark_rec(
        &mut self,
        id: LayerId,
        path: &mut Vec<LayerId>,
        tolerate_missing: bool,
    ) -> Result<()> {
        if path.contains(&id) {
            return Err(VolmanError::CircularDependency(self.layers[id].name.clone()).into());
        }
        if self.layers[id].mark {
            return Ok(());
        }

        self.layers[id].mark = true;
        path.push(id);
        let deps = self.layers[id].pre_create.clone();
        for dep in deps {
            match self.get(&dep) {
                Some(dep_id) => self.mark_rec(dep_id, path, tolerate_missing)?,
                None if tolerate_missing => {
                    debug!("Skipping missing dependency {}", dep);
                }
                None => return Err(VolmanError::MissingDependency(dep).into()),
            }
        }
        path.pop();

        Ok(())
    }

    /// Drop every unmarked layer, then resolve dependency names to arena
    /// handles.
    pub fn prune(&mut self, tolerate_missing: bool) -> Result<()> {
        let mut kept = vec![];
        let mut by_name = HashMap::new();
        for layer in self.layers.drain(..) {
            if layer.mark {
                by_name.insert(layer.name.clone(), kept.len());
                kept.push(layer);
            } else {
                debug!("Pruning unreferenced layer {}", layer.name);
            }
        }
        self.layers = kept;
        self.by_name = by_name;

        for i in 0..self.layers.len() {
            let names = self.layers[i].pre_create.clone();
            let mut deps = vec![];
            for name in names {
                match self.by_name.get(&name) {
                    Some(&dep_id) => deps.push(dep_id),
                    None if tolerate_missing => {}
                    None => return Err(VolmanError::MissingDependency(name).into()),
                }
            }
            self.layers[i].deps = deps;
        }

        Ok(())
    }

    /// Root layers: those that appear in nobody's dependency list. On
    /// activation snapshot tops come first, so a snapshot is watching
    /// before its origin's top layer first resumes; teardown walks the
    /// mirror order.
    pub fn roots(&self, direction: PlanDirection) -> Vec<LayerId> {
        let mut dependant = vec![false; self.layers.len()];
        for layer in &self.layers {
            for &dep in &layer.deps {
                dependant[dep] = true;
            }
        }

        let mut roots: Vec<LayerId> = (0..self.layers.len())
            .filter(|&id| !dependant[id])
            .collect();
        let snapshot_first = direction == PlanDirection::Activate;
        roots.sort_by_key(|&id| {
            matches!(self.layers[id].strategy, TableStrategy::Snapshot { .. }) != snapshot_first
        });

        roots
    }
}
