// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OOM-score adjustment.
//!
//! User tasks should be the kernel's preferred OOM victims, not the
//! step-agent. The supervisor zeroes its own adjustment before forking
//! (children inherit it) and restores the configured protective value
//! afterwards.

use std::io;
use std::path::Path;

const OOM_ADJ_PATH: &str = "/proc/self/oom_score_adj";

/// Read the current adjustment for this process.
pub fn read_oom_adj() -> io::Result<i32> {
    read_from(Path::new(OOM_ADJ_PATH))
}

/// Set the adjustment for this process (and future children).
pub fn set_oom_adj(value: i32) -> io::Result<()> {
    write_to(Path::new(OOM_ADJ_PATH), value)
}

fn read_from(path: &Path) -> io::Result<i32> {
    let text = std::fs::read_to_string(path)?;
    text.trim()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{e}")))
}

fn write_to(path: &Path, value: i32) -> io::Result<()> {
    std::fs::write(path, format!("{value}\n"))
}
