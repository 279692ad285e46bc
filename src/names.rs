// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Implements the flat device-mapper name codec for VG/LV tuples.
//!
//! Kernel node names follow the grammar `<vg>-<lv>[-<layer>]` where every
//! literal hyphen inside a component is doubled, keeping the single-hyphen
//! separator unambiguous. Names are treated as opaque once encoded.

/// Reserved layer suffix for the hidden device backing a snapshot origin.
pub const LAYER_REAL: &str = "real";
/// Reserved layer suffix for the hidden copy-on-write device of a snapshot.
pub const LAYER_COW: &str = "cow";

/// Quote one name component by doubling every literal hyphen.
fn encode_component(component: &str) -> String {
    component.replace('-', "--")
}

/// Encode a `(vg, lv, layer?)` tuple into a flat node name. Top layers omit
/// the layer component.
pub fn encode(vg: &str, lv: &str, layer: Option<&str>) -> String {
    match layer {
        Some(layer) => format!(
            "{}-{}-{}",
            encode_component(vg),
            encode_component(lv),
            encode_component(layer)
        ),
        None => format!("{}-{}", encode_component(vg), encode_component(lv)),
    }
}

/// Test whether a flat name can belong to the given VG. The encoded VG
/// prefix must be followed by a separator hyphen that is not half of a
/// doubled pair, which means the hyphen run right after the prefix has odd
/// length. A plain prefix match would false-positive on VG names sharing a
/// prefix (`vg` vs `vg1`) or differing only past a hyphen (`vg` vs `vg-x`).
pub fn belongs_to_vg(vg: &str, name: &str) -> bool {
    let prefix = encode_component(vg);
    let rest = match name.strip_prefix(prefix.as_str()) {
        Some(rest) => rest,
        None => return false,
    };

    let run = rest.bytes().take_while(|&b| b == b'-').count();
    run % 2 == 1
}
