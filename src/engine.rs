// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Walks a pruned plan and issues the ordered kernel operations that
//! activate or deactivate a logical volume.

use std::collections::HashSet;

use anyhow::{Context, Result};
use log::{debug, info};

use crate::devfs::DevFs;
use crate::dm::{table_to_string, DeviceMapper, DmDeviceInfo};
use crate::layer::{populate, LayerId};
use crate::metadata::{LogicalVolume, VolumeGroup};
use crate::names;
use crate::plan::{Plan, PlanDirection};
use crate::volutil::VolmanError;

/// Options affecting activation.
#[derive(Default)]
pub struct ActivateOptions {
    /// Plan and log the tables without touching the kernel.
    pub dry_run: bool,
}

/// One engine instance owns the planning state for a single VG. The kernel
/// namespace itself is process-global; callers must not run two engines
/// over the same VG prefix at once.
pub struct ActivationEngine<'a> {
    vg: &'a VolumeGroup,
    dm: &'a dyn DeviceMapper,
    devfs: &'a dyn DevFs,
}

impl<'a> ActivationEngine<'a> {
    pub fn new(vg: &'a VolumeGroup, dm: &'a dyn DeviceMapper, devfs: &'a dyn DevFs) -> Self {
        Self { vg, dm, devfs }
    }

    /// Query the kernel state of an LV's top layer. Builds no plan.
    pub fn info(&self, lv_name: &str) -> Result<DmDeviceInfo> {
        let lv = self.lookup(lv_name)?;
        self.dm
            .info(&names::encode(&self.vg.name, &lv.name, None))
    }

    /// Bring an LV (and everything it depends on) live.
    pub fn activate(&self, lv_name: &str, options: &ActivateOptions) -> Result<()> {
        self.vg.validate().context("Invalid volume group metadata")?;
        let mut plan = self.build_plan(lv_name, PlanDirection::Activate)?;

        if options.dry_run {
            for line in self.describe(&plan)? {
                info!("would load: {}", line);
            }
            return Ok(());
        }

        let mut done = HashSet::new();
        for root in plan.roots(PlanDirection::Activate) {
            self.create_rec(&mut plan, root, &mut done)?;
        }

        info!("Activated {}/{}", self.vg.name, lv_name);
        Ok(())
    }

    /// Tear an LV down. The walk tolerates partial kernel state, so a
    /// failed activation can be quiesced by deactivating the same target.
    pub fn deactivate(&self, lv_name: &str) -> Result<()> {
        self.vg.validate().context("Invalid volume group metadata")?;
        let mut plan = self.build_plan(lv_name, PlanDirection::Deactivate)?;

        let mut done = HashSet::new();
        for root in plan.roots(PlanDirection::Deactivate) {
            self.remove_rec(&mut plan, root, &mut done)?;
        }

        info!("Deactivated {}/{}", self.vg.name, lv_name);
        Ok(())
    }

    fn lookup(&self, lv_name: &str) -> Result<&'a LogicalVolume> {
        self.vg.lv(lv_name).ok_or_else(|| {
            VolmanError::MetadataInconsistent(format!(
                "no LV {} in VG {}",
                lv_name, self.vg.name
            ))
            .into()
        })
    }

    /// Run the planning sequence: scan, fill, extend, expand, select, mark,
    /// prune.
    fn build_plan(&self, lv_name: &str, direction: PlanDirection) -> Result<Plan> {
        let lv = self.lookup(lv_name)?;
        let tolerate = direction == PlanDirection::Deactivate;

        let mut plan = Plan::new();
        plan.scan_kernel(self.vg, self.dm)?;
        plan.fill_in_active_list(self.vg);
        plan.set_active(&lv.name, direction == PlanDirection::Activate);
        plan.expand_all(self.vg)?;

        let top = names::encode(&self.vg.name, &lv.name, None);
        if plan.get(&top).is_none() {
            return Err(VolmanError::PlanIncomplete(lv.name.clone()))
                .context("Failed to plan activation");
        }
        plan.mark_from(&top, tolerate)?;

        // Realizing or tearing down a snapshot involves its whole origin
        // chain: the origin's top layer must be (re)loaded around the same
        // walk. Expansion already rejected cyclic chains.
        let mut cur = lv;
        while let Some(snap) = &cur.snapshot {
            let origin = self.lookup(&snap.origin)?;
            let origin_top = names::encode(&self.vg.name, &origin.name, None);
            if plan.get(&origin_top).is_none() {
                return Err(VolmanError::PlanIncomplete(origin.name.clone()))
                    .context("Failed to plan origin");
            }
            plan.mark_from(&origin_top, tolerate)?;
            cur = origin;
        }

        plan.prune(tolerate)?;
        Ok(plan)
    }

    /// Re-read one layer's kernel state ahead of a transition.
    fn refresh(&self, plan: &mut Plan, id: LayerId) -> Result<()> {
        let info = self.dm.info(&plan.layer(id).name)?;
        plan.layer_mut(id).info = info;
        Ok(())
    }

    /// Suspend a layer unless it already is; no-op for absent nodes.
    fn suspend_layer(&self, plan: &mut Plan, id: LayerId) -> Result<()> {
        let layer = plan.layer(id);
        if layer.info.exists && !layer.info.suspended {
            let name = layer.name.clone();
            debug!("Suspending {}", name);
            self.dm.suspend(&name).context(VolmanError::KernelOpFailed {
                op: "suspend",
                name: name.clone(),
            })?;
            plan.layer_mut(id).info.suspended = true;
        }

        Ok(())
    }

    /// Resume a layer unless it already is live; no-op for absent nodes.
    fn resume_layer(&self, plan: &mut Plan, id: LayerId) -> Result<()> {
        let layer = plan.layer(id);
        if layer.info.exists && layer.info.suspended {
            self.check_pre_active(plan, id)?;
            let layer = plan.layer(id);
            let name = layer.name.clone();
            debug!("Resuming {}", name);
            self.dm.resume(&name).context(VolmanError::KernelOpFailed {
                op: "resume",
                name: name.clone(),
            })?;
            plan.layer_mut(id).info.suspended = false;
        }

        Ok(())
    }

    /// Reserved pre-resume dependency check; today's strategies never
    /// populate pre_active.
    fn check_pre_active(&self, plan: &Plan, id: LayerId) -> Result<()> {
        for name in &plan.layer(id).pre_active {
            let live = plan
                .get(name)
                .map(|dep| plan.layer(dep).info.exists && !plan.layer(dep).info.suspended)
                .unwrap_or(false);
            if !live {
                return Err(VolmanError::MissingDependency(name.clone()).into());
            }
        }

        Ok(())
    }

    /// Post-order activation walk: an existing node is suspended before its
    /// dependencies are touched, and reloaded/resumed (or created) only
    /// after every dependency is created and loaded.
    fn create_rec(
        &self,
        plan: &mut Plan,
        id: LayerId,
        done: &mut HashSet<LayerId>,
    ) -> Result<()> {
        if !done.insert(id) {
            return Ok(());
        }

        self.refresh(plan, id)?;

        // A dirty node must be recreated from scratch; a suspended node
        // cannot be removed cleanly.
        if plan.layer(id).dirty && plan.layer(id).info.exists {
            self.resume_layer(plan, id)?;
            let name = plan.layer(id).name.clone();
            debug!("Removing dirty node {}", name);
            self.dm.remove(&name).context(VolmanError::KernelOpFailed {
                op: "remove",
                name: name.clone(),
            })?;
            plan.layer_mut(id).info = DmDeviceInfo::default();
        }

        let exists = plan.layer(id).info.exists;
        if exists {
            self.suspend_layer(plan, id)?;
        }

        for dep in plan.layer(id).deps.clone() {
            self.create_rec(plan, dep, done)?;
        }

        let name = plan.layer(id).name.clone();
        let table = populate(self.vg, plan.layer(id), &self.dm.dm_dir())?;
        if exists {
            debug!("Reloading {}: {}", name, table_to_string(&table).replace('\n', "; "));
            self.dm
                .reload(&name, &table)
                .context(VolmanError::KernelOpFailed {
                    op: "reload",
                    name: name.clone(),
                })?;
            self.resume_layer(plan, id)?;
        } else {
            debug!("Creating {}: {}", name, table_to_string(&table).replace('\n', "; "));
            let uuid = self.layer_uuid(plan.layer(id));
            self.dm
                .create(&name, uuid.as_deref(), &table)
                .context(VolmanError::KernelOpFailed {
                    op: "create",
                    name: name.clone(),
                })?;
            // Some adapters leave a fresh node suspended.
            self.refresh(plan, id)?;
            self.resume_layer(plan, id)?;
        }

        let layer = plan.layer(id);
        if layer.visible {
            if let Some(lv) = layer.lv.clone() {
                self.devfs
                    .add_lv(&lv, &layer.name)
                    .context(format!("Failed to publish {}", lv))?;
            }
        }

        Ok(())
    }

    /// Pre-order deactivation walk: a node is removed before its
    /// dependencies, so holds are released top-down. Already-absent nodes
    /// are skipped, which lets the walk clean up partial activations.
    fn remove_rec(
        &self,
        plan: &mut Plan,
        id: LayerId,
        done: &mut HashSet<LayerId>,
    ) -> Result<()> {
        if !done.insert(id) {
            return Ok(());
        }

        self.refresh(plan, id)?;

        if plan.layer(id).info.exists {
            // A suspended node cannot be removed cleanly.
            self.resume_layer(plan, id)?;
            let name = plan.layer(id).name.clone();
            debug!("Removing {}", name);
            self.dm.remove(&name).context(VolmanError::KernelOpFailed {
                op: "remove",
                name: name.clone(),
            })?;
            plan.layer_mut(id).info = DmDeviceInfo::default();

            let layer = plan.layer(id);
            if layer.visible {
                if let Some(lv) = layer.lv.clone() {
                    self.devfs
                        .del_lv(&lv)
                        .context(format!("Failed to unpublish {}", lv))?;
                }
            }
        }

        for dep in plan.layer(id).deps.clone() {
            self.remove_rec(plan, dep, done)?;
        }

        Ok(())
    }

    /// List the planned tables in creation order without issuing anything.
    fn describe(&self, plan: &Plan) -> Result<Vec<String>> {
        let mut done = HashSet::new();
        let mut out = vec![];
        for root in plan.roots(PlanDirection::Activate) {
            self.describe_rec(plan, root, &mut done, &mut out)?;
        }

        Ok(out)
    }

    fn describe_rec(
        &self,
        plan: &Plan,
        id: LayerId,
        done: &mut HashSet<LayerId>,
        out: &mut Vec<String>,
    ) -> Result<()> {
        if !done.insert(id) {
            return Ok(());
        }

        for dep in plan.layer(id).deps.clone() {
            self.describe_rec(plan, dep, done, out)?;
        }

        let layer = plan.layer(id);
        let table = populate(self.vg, layer, &self.dm.dm_dir())?;
        out.push(format!(
            "{}: {}",
            layer.name,
            table_to_string(&table).replace('\n', "; ")
        ));

        Ok(())
    }

    /// Kernel uuid stamped on nodes realizing a known LV.
    fn layer_uuid(&self, layer: &crate::layer::Layer) -> Option<String> {
        let lv = layer.lv.as_deref().and_then(|name| self.vg.lv(name))?;
        Some(format!("LVM-{}{}", self.vg.uuid, lv.uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devfs::testing::RecordingDevFs;
    use crate::dm::testing::{DmOp, FakeDm};
    use crate::layer::{Layer, TableStrategy};
    use crate::metadata::{Area, PhysicalVolume, Segment, SnapshotUse};
    use std::path::PathBuf;

    fn test_vg() -> VolumeGroup {
        VolumeGroup {
            name: "vg0".to_string(),
            uuid: "Ye91eX".to_string(),
            extent_size: 8192,
            pvs: vec![
                PhysicalVolume {
                    uuid: "pv0".to_string(),
                    dev: Some(PathBuf::from("/dev/sda")),
                    pe_start: 384,
                },
                PhysicalVolume {
                    uuid: "pv1".to_string(),
                    dev: Some(PathBuf::from("/dev/sdb")),
                    pe_start: 384,
                },
            ],
            lvs: vec![
                LogicalVolume {
                    name: "lvol0".to_string(),
                    uuid: "lv0".to_string(),
                    segments: vec![Segment {
                        start_extent: 0,
                        extent_count: 10,
                        stripe_size: 0,
                        areas: vec![Area { pv: 0, start_pe: 0 }],
                    }],
                    snapshot: None,
                },
                LogicalVolume {
                    name: "lvol1".to_string(),
                    uuid: "lv1".to_string(),
                    segments: vec![Segment {
                        start_extent: 0,
                        extent_count: 4,
                        stripe_size: 128,
                        areas: vec![Area { pv: 0, start_pe: 0 }, Area { pv: 1, start_pe: 0 }],
                    }],
                    snapshot: None,
                },
                LogicalVolume {
                    name: "snap0".to_string(),
                    uuid: "lv2".to_string(),
                    segments: vec![Segment {
                        start_extent: 0,
                        extent_count: 2,
                        stripe_size: 0,
                        areas: vec![Area { pv: 0, start_pe: 10 }],
                    }],
                    snapshot: Some(SnapshotUse {
                        origin: "lvol0".to_string(),
                        chunk_size: 8,
                    }),
                },
            ],
        }
    }

    fn downcast(err: &anyhow::Error) -> Option<&VolmanError> {
        err.downcast_ref::<VolmanError>()
    }

    #[test]
    fn test_plain_linear_activation() {
        let vg = test_vg();
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();
        let engine = ActivationEngine::new(&vg, &dm, &devfs);

        engine.activate("lvol0", &Default::default()).unwrap();

        assert_eq!(
            dm.ops(),
            vec![DmOp::Create(
                "vg0-lvol0".to_string(),
                "0 81920 linear /dev/sda 384".to_string()
            )]
        );
        assert_eq!(devfs.events(), vec!["add lvol0 vg0-lvol0".to_string()]);
    }

    #[test]
    fn test_striped_activation() {
        let vg = test_vg();
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();
        let engine = ActivationEngine::new(&vg, &dm, &devfs);

        engine.activate("lvol1", &Default::default()).unwrap();

        assert_eq!(
            dm.ops(),
            vec![DmOp::Create(
                "vg0-lvol1".to_string(),
                "0 32768 striped 2 128 /dev/sda 384 /dev/sdb 384".to_string()
            )]
        );
    }

    #[test]
    fn test_snapshot_activation() {
        let vg = test_vg();
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();
        let engine = ActivationEngine::new(&vg, &dm, &devfs);

        engine.activate("snap0", &Default::default()).unwrap();

        assert_eq!(
            dm.ops(),
            vec![
                DmOp::Create(
                    "vg0-lvol0-real".to_string(),
                    "0 81920 linear /dev/sda 384".to_string()
                ),
                DmOp::Create(
                    "vg0-snap0-cow".to_string(),
                    "0 16384 linear /dev/sda 82304".to_string()
                ),
                DmOp::Create(
                    "vg0-snap0".to_string(),
                    "0 81920 snapshot /dev/mapper/vg0-lvol0-real /dev/mapper/vg0-snap0-cow P 8"
                        .to_string()
                ),
                DmOp::Create(
                    "vg0-lvol0".to_string(),
                    "0 81920 snapshot-origin /dev/mapper/vg0-lvol0-real".to_string()
                ),
            ]
        );
        assert_eq!(
            devfs.events(),
            vec!["add snap0 vg0-snap0".to_string(), "add lvol0 vg0-lvol0".to_string()]
        );
    }

    #[test]
    fn test_deactivation_with_live_snapshot() {
        let vg = test_vg();
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();

        // Bring the snapshot stack up first.
        ActivationEngine::new(&vg, &dm, &devfs)
            .activate("snap0", &Default::default())
            .unwrap();
        dm.ops.borrow_mut().clear();

        ActivationEngine::new(&vg, &dm, &devfs)
            .deactivate("lvol0")
            .unwrap();

        // Only the origin's own layers go; the snapshot is not in the
        // origin's dependency closure.
        assert_eq!(
            dm.ops(),
            vec![
                DmOp::Remove("vg0-lvol0".to_string()),
                DmOp::Remove("vg0-lvol0-real".to_string()),
            ]
        );
        assert_eq!(
            dm.node_names(),
            vec!["vg0-snap0".to_string(), "vg0-snap0-cow".to_string()]
        );
    }

    #[test]
    fn test_activate_deactivate_law() {
        let vg = test_vg();
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();

        ActivationEngine::new(&vg, &dm, &devfs)
            .activate("snap0", &Default::default())
            .unwrap();
        assert_eq!(dm.node_names().len(), 4);

        ActivationEngine::new(&vg, &dm, &devfs)
            .deactivate("snap0")
            .unwrap();
        // Nothing with this VG's prefix survives.
        assert!(dm.node_names().is_empty());
    }

    #[test]
    fn test_reactivation_reloads() {
        let vg = test_vg();
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();

        ActivationEngine::new(&vg, &dm, &devfs)
            .activate("lvol0", &Default::default())
            .unwrap();
        dm.ops.borrow_mut().clear();

        ActivationEngine::new(&vg, &dm, &devfs)
            .activate("lvol0", &Default::default())
            .unwrap();

        assert_eq!(
            dm.ops(),
            vec![
                DmOp::Suspend("vg0-lvol0".to_string()),
                DmOp::Reload(
                    "vg0-lvol0".to_string(),
                    "0 81920 linear /dev/sda 384".to_string()
                ),
                DmOp::Resume("vg0-lvol0".to_string()),
            ]
        );
    }

    #[test]
    fn test_ordering_law() {
        // For every dependency edge, the dependency's create or reload
        // precedes the dependant's resume (or creation, which implies a
        // live node).
        let vg = test_vg();
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();

        // Make the origin pre-exist so activation takes the
        // suspend/reload/resume path on it.
        ActivationEngine::new(&vg, &dm, &devfs)
            .activate("lvol0", &Default::default())
            .unwrap();
        dm.ops.borrow_mut().clear();

        ActivationEngine::new(&vg, &dm, &devfs)
            .activate("snap0", &Default::default())
            .unwrap();

        let ops = dm.ops();
        let pos = |pred: &dyn Fn(&DmOp) -> bool| ops.iter().position(|op| pred(op)).unwrap();
        let real_create = pos(&|op| {
            matches!(op, DmOp::Create(name, _) if name == "vg0-lvol0-real")
        });
        let origin_resume =
            pos(&|op| matches!(op, DmOp::Resume(name) if name == "vg0-lvol0"));
        let origin_reload =
            pos(&|op| matches!(op, DmOp::Reload(name, _) if name == "vg0-lvol0"));
        assert!(real_create < origin_reload);
        assert!(origin_reload < origin_resume);
    }

    #[test]
    fn test_create_resumes_when_left_suspended() {
        let vg = test_vg();
        let dm = FakeDm::new();
        dm.create_suspended.set(true);
        let devfs = RecordingDevFs::new();

        ActivationEngine::new(&vg, &dm, &devfs)
            .activate("lvol0", &Default::default())
            .unwrap();

        assert_eq!(
            dm.ops(),
            vec![
                DmOp::Create(
                    "vg0-lvol0".to_string(),
                    "0 81920 linear /dev/sda 384".to_string()
                ),
                DmOp::Resume("vg0-lvol0".to_string()),
            ]
        );
    }

    #[test]
    fn test_all_pvs_absent_still_activates() {
        let mut vg = test_vg();
        vg.pvs[0].dev = None;
        vg.pvs[1].dev = None;
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();

        ActivationEngine::new(&vg, &dm, &devfs)
            .activate("lvol0", &Default::default())
            .unwrap();
        assert_eq!(
            dm.ops(),
            vec![DmOp::Create(
                "vg0-lvol0".to_string(),
                "0 81920 error".to_string()
            )]
        );
    }

    #[test]
    fn test_cycle_rejected_before_kernel_ops() {
        let mut vg = test_vg();
        vg.lvs[0].snapshot = Some(SnapshotUse {
            origin: "snap0".to_string(),
            chunk_size: 8,
        });
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();

        let err = ActivationEngine::new(&vg, &dm, &devfs)
            .activate("lvol0", &Default::default())
            .unwrap_err();
        assert!(matches!(
            downcast(&err),
            Some(VolmanError::CircularDependency(_))
        ));
        assert!(dm.ops().is_empty());
    }

    #[test]
    fn test_zero_segment_lv_rejected() {
        let mut vg = test_vg();
        vg.lvs[1].segments.clear();
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();

        let err = ActivationEngine::new(&vg, &dm, &devfs)
            .activate("lvol0", &Default::default())
            .unwrap_err();
        assert!(matches!(
            downcast(&err),
            Some(VolmanError::MetadataInconsistent(_))
        ));
    }

    #[test]
    fn test_kernel_failure_aborts_walk() {
        let vg = test_vg();
        let dm = FakeDm::new();
        dm.set_fail_on("create", "vg0-snap0-cow");
        let devfs = RecordingDevFs::new();

        let err = ActivationEngine::new(&vg, &dm, &devfs)
            .activate("snap0", &Default::default())
            .unwrap_err();
        assert!(matches!(
            downcast(&err),
            Some(VolmanError::KernelOpFailed { op: "create", .. })
        ));
        // The walk stopped mid-way; partial state is left as-is.
        assert_eq!(dm.node_names(), vec!["vg0-lvol0-real".to_string()]);
    }

    #[test]
    fn test_deactivate_quiesces_partial_activation() {
        let vg = test_vg();
        let dm = FakeDm::new();
        dm.set_fail_on("create", "vg0-snap0-cow");
        let devfs = RecordingDevFs::new();

        let engine = ActivationEngine::new(&vg, &dm, &devfs);
        assert!(engine.activate("snap0", &Default::default()).is_err());

        *dm.fail_on.borrow_mut() = None;
        engine.deactivate("snap0").unwrap();
        assert!(dm.node_names().is_empty());
    }

    #[test]
    fn test_dirty_layer_recreated() {
        let vg = test_vg();
        let dm = FakeDm::new();
        dm.add_node("vg0-lvol0", "0 81920 linear /dev/sda 384");
        let devfs = RecordingDevFs::new();
        let engine = ActivationEngine::new(&vg, &dm, &devfs);

        let mut plan = Plan::new();
        let mut layer = Layer::new(
            "vg0-lvol0".to_string(),
            "lvol0",
            TableStrategy::Vanilla,
            true,
        );
        layer.dirty = true;
        layer.mark = true;
        plan.insert(layer);
        plan.prune(false).unwrap();

        let mut done = HashSet::new();
        engine.create_rec(&mut plan, 0, &mut done).unwrap();

        assert_eq!(
            dm.ops(),
            vec![
                DmOp::Remove("vg0-lvol0".to_string()),
                DmOp::Create(
                    "vg0-lvol0".to_string(),
                    "0 81920 linear /dev/sda 384".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_suspended_node_resumed_before_remove() {
        let vg = test_vg();
        let dm = FakeDm::new();
        dm.add_node("vg0-lvol0", "0 81920 linear /dev/sda 384");
        dm.nodes.borrow_mut().get_mut("vg0-lvol0").unwrap().suspended = true;
        let devfs = RecordingDevFs::new();

        ActivationEngine::new(&vg, &dm, &devfs)
            .deactivate("lvol0")
            .unwrap();

        assert_eq!(
            dm.ops(),
            vec![
                DmOp::Resume("vg0-lvol0".to_string()),
                DmOp::Remove("vg0-lvol0".to_string()),
            ]
        );
    }

    #[test]
    fn test_deactivate_inactive_lv_is_noop() {
        let vg = test_vg();
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();

        ActivationEngine::new(&vg, &dm, &devfs)
            .deactivate("lvol0")
            .unwrap();
        assert!(dm.ops().is_empty());
    }

    #[test]
    fn test_info() {
        let vg = test_vg();
        let dm = FakeDm::new();
        dm.add_node("vg0-lvol0", "0 81920 linear /dev/sda 384");
        let devfs = RecordingDevFs::new();
        let engine = ActivationEngine::new(&vg, &dm, &devfs);

        let info = engine.info("lvol0").unwrap();
        assert!(info.exists);
        assert!(!info.suspended);

        let info = engine.info("snap0").unwrap();
        assert!(!info.exists);

        assert!(engine.info("nope").is_err());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let vg = test_vg();
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();

        ActivationEngine::new(&vg, &dm, &devfs)
            .activate(
                "snap0",
                &ActivateOptions { dry_run: true },
            )
            .unwrap();
        assert!(dm.ops().is_empty());
        assert!(devfs.events().is_empty());
    }

    #[test]
    fn test_describe_order() {
        let vg = test_vg();
        let dm = FakeDm::new();
        let devfs = RecordingDevFs::new();
        let engine = ActivationEngine::new(&vg, &dm, &devfs);

        let plan = engine
            .build_plan("snap0", PlanDirection::Activate)
            .unwrap();
        let lines = engine.describe(&plan).unwrap();
        let names: Vec<&str> = lines
            .iter()
            .map(|l| l.split(':').next().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["vg0-lvol0-real", "vg0-snap0-cow", "vg0-snap0", "vg0-lvol0"]
        );
    }
}
