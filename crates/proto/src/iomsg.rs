// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client I/O plane messages.
//!
//! Task stdout/stderr flows to attached clients as labeled frames;
//! client stdin flows back addressed to a task (or broadcast with the
//! `ALL_TASKS` sentinel).

use gridd_core::NO_VAL;
use serde::{Deserialize, Serialize};

/// Broadcast target for stdin frames.
pub const ALL_TASKS: u32 = NO_VAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientIoMsg {
    /// Task output, labeled with the global task id.
    Output {
        gtid: u32,
        stream: IoStream,
        #[serde(with = "data_b64")]
        data: Vec<u8>,
    },

    /// A task's stream reached EOF.
    Eof { gtid: u32, stream: IoStream },

    /// Client stdin for one task (or `ALL_TASKS`).
    Stdin {
        gtid: u32,
        #[serde(with = "data_b64")]
        data: Vec<u8>,
    },
}

mod data_b64 {
    use base64::prelude::{Engine, BASE64_STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        BASE64_STANDARD.encode(data).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        BASE64_STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
