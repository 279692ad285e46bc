// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Abstracts the kernel device-mapper control surface.
//!
//! The engine only ever talks to the [`DeviceMapper`] trait: one call per
//! kernel task, with tables passed as ordered target lists. The production
//! implementation farms the work out to dmsetup; tests substitute an
//! in-memory fake.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use log::debug;
use nix::sys::stat::{self, SFlag};

use crate::volutil::{checked_command, VolmanError};

/// Define the known path to the dmsetup utility.
const DMSETUP_PATH: &str = "/sbin/dmsetup";

/// Default mount point of the device-mapper node directory.
pub const DM_DIR: &str = "/dev/mapper";

/// Per-target parameter buffer limit imposed by the control interface.
/// Tables whose rendered parameters exceed this are never sent.
pub const DM_PARAMS_MAX: usize = 1024;

/// One entry in a node's routing table.
#[derive(Clone, Debug, PartialEq)]
pub struct DmTarget {
    /// First logical sector served by this target.
    pub start: u64,
    /// Number of sectors served.
    pub length: u64,
    pub target_type: String,
    pub params: String,
}

impl DmTarget {
    pub fn new(start: u64, length: u64, target_type: &str, params: String) -> Self {
        Self {
            start,
            length,
            target_type: target_type.to_string(),
            params,
        }
    }

    /// Render the target as one dmsetup table line.
    pub fn line(&self) -> String {
        if self.params.is_empty() {
            format!("{} {} {}", self.start, self.length, self.target_type)
        } else {
            format!(
                "{} {} {} {}",
                self.start, self.length, self.target_type, self.params
            )
        }
    }
}

/// Render a table in the form dmsetup consumes, one target per line.
pub fn table_to_string(table: &[DmTarget]) -> String {
    let lines: Vec<String> = table.iter().map(DmTarget::line).collect();
    lines.join("\n")
}

/// Last observed kernel state of one node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DmDeviceInfo {
    pub exists: bool,
    pub suspended: bool,
    pub open_count: u32,
    pub major: u32,
    pub minor: u32,
}

/// A single device-mapper control channel. Each method builds, runs and
/// tears down one kernel task against the named node.
pub trait DeviceMapper {
    /// Mount point of the device-mapper node directory.
    fn dm_dir(&self) -> PathBuf;

    /// Enumerate the node names currently present in the kernel.
    fn list_devices(&self) -> Result<Vec<String>>;

    /// Read-only state query; reports a non-existent node rather than
    /// failing when the name is unknown to the kernel.
    fn info(&self, name: &str) -> Result<DmDeviceInfo>;

    /// Create the node, load the given table, and bring it up. If the
    /// underlying interface leaves fresh nodes suspended the caller is
    /// expected to check info and resume.
    fn create(&self, name: &str, uuid: Option<&str>, table: &[DmTarget]) -> Result<()>;

    /// Replace the inactive table of an existing node. Does not change the
    /// suspend state.
    fn reload(&self, name: &str, table: &[DmTarget]) -> Result<()>;

    fn suspend(&self, name: &str) -> Result<()>;
    fn resume(&self, name: &str) -> Result<()>;

    /// Remove the node. Fails if it is open or referenced.
    fn remove(&self, name: &str) -> Result<()>;

    /// Kernel-visible path of a node in this namespace.
    fn node_path(&self, name: &str) -> PathBuf {
        self.dm_dir().join(name)
    }
}

/// Production adapter driving /sbin/dmsetup.
pub struct Dmsetup {
    dm_dir: PathBuf,
}

impl Dmsetup {
    pub fn new() -> Self {
        Self {
            dm_dir: PathBuf::from(DM_DIR),
        }
    }

    /// Run a dmsetup subcommand that consumes a table on stdin. dmsetup
    /// only takes single-target tables via --table, so multi-target tables
    /// always go through stdin.
    fn run_with_table(&self, args: &[&str], table: &[DmTarget]) -> Result<()> {
        let text = table_to_string(table);
        debug!("dmsetup {}: {}", args.join(" "), text.replace('\n', "; "));
        let mut child = Command::new(DMSETUP_PATH)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to launch dmsetup")?;

        child
            .stdin
            .as_mut()
            .ok_or_else(|| VolmanError::ProcessFailed("no stdin for dmsetup".to_string()))?
            .write_all(format!("{}\n", text).as_bytes())
            .context("Failed to write table to dmsetup")?;

        let output = child
            .wait_with_output()
            .context("Failed to collect dmsetup output")?;
        if !output.status.success() {
            return Err(VolmanError::ProcessFailed(format!(
                "dmsetup {} failed: {}\nstderr={}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr),
            ))
            .into());
        }

        Ok(())
    }
}

impl Default for Dmsetup {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceMapper for Dmsetup {
    fn dm_dir(&self) -> PathBuf {
        self.dm_dir.clone()
    }

    /// Scan the device-mapper directory, keeping block-device entries only.
    fn list_devices(&self) -> Result<Vec<String>> {
        let mut names = vec![];
        let entries = fs::read_dir(&self.dm_dir)
            .context(format!("Failed to read {}", self.dm_dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            // The control node is not a mapped device.
            if name == "control" {
                continue;
            }

            match stat::stat(&entry.path()) {
                Ok(st) => {
                    let fmt = SFlag::from_bits_truncate(st.st_mode & SFlag::S_IFMT.bits());
                    if fmt == SFlag::S_IFBLK {
                        names.push(name);
                    }
                }
                Err(_) => continue,
            }
        }

        Ok(names)
    }

    fn info(&self, name: &str) -> Result<DmDeviceInfo> {
        let output = Command::new(DMSETUP_PATH)
            .args([
                "info",
                "-c",
                "--noheadings",
                "--separator",
                ":",
                "-o",
                "name,attr,open,major,minor",
                name,
            ])
            .output()
            .context("Failed to run dmsetup info")?;

        // dmsetup exits non-zero for unknown names; report a non-existent
        // node instead of an error.
        if !output.status.success() {
            return Ok(DmDeviceInfo::default());
        }

        let line = String::from_utf8_lossy(&output.stdout).trim().to_string();
        parse_info_line(&line)
    }

    fn create(&self, name: &str, uuid: Option<&str>, table: &[DmTarget]) -> Result<()> {
        let mut args = vec!["create", name];
        if let Some(uuid) = uuid {
            args.push("--uuid");
            args.push(uuid);
        }

        self.run_with_table(&args, table)
            .context(format!("Cannot create node {}", name))
    }

    fn reload(&self, name: &str, table: &[DmTarget]) -> Result<()> {
        self.run_with_table(&["reload", name], table)
            .context(format!("Cannot reload node {}", name))
    }

    fn suspend(&self, name: &str) -> Result<()> {
        checked_command(Command::new(DMSETUP_PATH).args(["suspend", name]))
            .context(format!("Failed to suspend {}", name))
    }

    fn resume(&self, name: &str) -> Result<()> {
        checked_command(Command::new(DMSETUP_PATH).args(["resume", name]))
            .context(format!("Failed to resume {}", name))
    }

    fn remove(&self, name: &str) -> Result<()> {
        checked_command(Command::new(DMSETUP_PATH).args(["remove", name]))
            .context(format!("Failed to remove {}", name))
    }
}

/// Parse one `dmsetup info -c` line of the form
/// `name:attr:open:major:minor`. The first attr character is `s` while the
/// node is suspended.
fn parse_info_line(line: &str) -> Result<DmDeviceInfo> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 5 {
        return Err(
            VolmanError::DeviceMapperError(format!("bad info line: {}", line)).into(),
        );
    }

    let suspended = fields[1].starts_with('s');
    let open_count = fields[2]
        .parse()
        .context("Failed to parse open count")?;
    let major = fields[3].parse().context("Failed to parse major")?;
    let minor = fields[4].parse().context("Failed to parse minor")?;

    Ok(DmDeviceInfo {
        exists: true,
        suspended,
        open_count,
        major,
        minor,
    })
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    /// One kernel operation as recorded by the fake adapter. Tables are
    /// carried in rendered form so tests can assert on the literal lines.
    #[derive(Clone, Debug, PartialEq)]
    pub enum DmOp {
        Create(String, String),
        Reload(String, String),
        Suspend(String),
        Resume(String),
        Remove(String),
    }

    #[derive(Clone, Debug, Default)]
    pub struct FakeNode {
        pub suspended: bool,
        pub open_count: u32,
        pub table: String,
        pub minor: u32,
    }

    /// In-memory device-mapper used by planner and executor tests.
    #[derive(Default)]
    pub struct FakeDm {
        pub nodes: RefCell<BTreeMap<String, FakeNode>>,
        pub ops: RefCell<Vec<DmOp>>,
        /// Operation that should fail, e.g. ("remove", "vg0-lvol0").
        pub fail_on: RefCell<Option<(&'static str, String)>>,
        /// When set, create leaves the node suspended instead of live.
        pub create_suspended: Cell<bool>,
        next_minor: Cell<u32>,
    }

    impl FakeDm {
        pub fn new() -> Self {
            Default::default()
        }

        /// Seed a live node, as if a previous activation created it.
        pub fn add_node(&self, name: &str, table: &str) {
            let minor = self.next_minor.replace(self.next_minor.get() + 1);
            self.nodes.borrow_mut().insert(
                name.to_string(),
                FakeNode {
                    suspended: false,
                    open_count: 0,
                    table: table.to_string(),
                    minor,
                },
            );
        }

        pub fn set_fail_on(&self, op: &'static str, name: &str) {
            *self.fail_on.borrow_mut() = Some((op, name.to_string()));
        }

        pub fn ops(&self) -> Vec<DmOp> {
            self.ops.borrow().clone()
        }

        pub fn node_names(&self) -> Vec<String> {
            self.nodes.borrow().keys().cloned().collect()
        }

        fn check_fail(&self, op: &'static str, name: &str) -> Result<()> {
            if let Some((fop, fname)) = &*self.fail_on.borrow() {
                if *fop == op && fname == name {
                    return Err(VolmanError::ProcessFailed(format!(
                        "injected {} failure on {}",
                        op, name
                    ))
                    .into());
                }
            }

            Ok(())
        }
    }

    impl DeviceMapper for FakeDm {
        fn dm_dir(&self) -> PathBuf {
            PathBuf::from(DM_DIR)
        }

        fn list_devices(&self) -> Result<Vec<String>> {
            Ok(self.node_names())
        }

        fn info(&self, name: &str) -> Result<DmDeviceInfo> {
            Ok(match self.nodes.borrow().get(name) {
                Some(node) => DmDeviceInfo {
                    exists: true,
                    suspended: node.suspended,
                    open_count: node.open_count,
                    major: 253,
                    minor: node.minor,
                },
                None => DmDeviceInfo::default(),
            })
        }

        fn create(&self, name: &str, _uuid: Option<&str>, table: &[DmTarget]) -> Result<()> {
            self.check_fail("create", name)?;
            let rendered = table_to_string(table);
            let minor = self.next_minor.replace(self.next_minor.get() + 1);
            self.nodes.borrow_mut().insert(
                name.to_string(),
                FakeNode {
                    suspended: self.create_suspended.get(),
                    open_count: 0,
                    table: rendered.clone(),
                    minor,
                },
            );
            self.ops
                .borrow_mut()
                .push(DmOp::Create(name.to_string(), rendered));
            Ok(())
        }

        fn reload(&self, name: &str, table: &[DmTarget]) -> Result<()> {
            self.check_fail("reload", name)?;
            let rendered = table_to_string(table);
            let mut nodes = self.nodes.borrow_mut();
            let node = nodes.get_mut(name).ok_or_else(|| {
                VolmanError::DeviceMapperError(format!("reload of missing node {}", name))
            })?;
            node.table = rendered.clone();
            drop(nodes);
            self.ops
                .borrow_mut()
                .push(DmOp::Reload(name.to_string(), rendered));
            Ok(())
        }

        fn suspend(&self, name: &str) -> Result<()> {
            self.check_fail("suspend", name)?;
            let mut nodes = self.nodes.borrow_mut();
            let node = nodes.get_mut(name).ok_or_else(|| {
                VolmanError::DeviceMapperError(format!("suspend of missing node {}", name))
            })?;
            node.suspended = true;
            drop(nodes);
            self.ops.borrow_mut().push(DmOp::Suspend(name.to_string()));
            Ok(())
        }

        fn resume(&self, name: &str) -> Result<()> {
            self.check_fail("resume", name)?;
            let mut nodes = self.nodes.borrow_mut();
            let node = nodes.get_mut(name).ok_or_else(|| {
                VolmanError::DeviceMapperError(format!("resume of missing node {}", name))
            })?;
            node.suspended = false;
            drop(nodes);
            self.ops.borrow_mut().push(DmOp::Resume(name.to_string()));
            Ok(())
        }

        fn remove(&self, name: &str) -> Result<()> {
            self.check_fail("remove", name)?;
            let mut nodes = self.nodes.borrow_mut();
            match nodes.remove(name) {
                Some(_) => {}
                None => {
                    return Err(VolmanError::DeviceMapperError(format!(
                        "remove of missing node {}",
                        name
                    ))
                    .into())
                }
            }
            drop(nodes);
            self.ops.borrow_mut().push(DmOp::Remove(name.to_string()));
            Ok(())
        }
    }
}
