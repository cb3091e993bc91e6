// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot send helpers shared by the node-agent and step-agent.
//!
//! Every message type in this protocol is answered by a bare rc reply;
//! a helper per transport keeps the connect/frame/read dance in one
//! place.

use crate::errcode::ErrCode;
use crate::messages::Reply;
use crate::wire::{read_frame, write_frame, WireError, DEFAULT_TIMEOUT};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Send one frame to a TCP peer and read the rc reply.
pub async fn send_rc<T: Serialize>(addr: SocketAddr, msg: &T) -> Result<ErrCode, WireError> {
    let mut stream = TcpStream::connect(addr).await.map_err(WireError::Io)?;
    write_frame(&mut stream, msg, DEFAULT_TIMEOUT).await?;
    let reply: Reply = read_frame(&mut stream, DEFAULT_TIMEOUT).await?;
    match reply {
        Reply::Rc { code } => Ok(code),
        _ => Ok(ErrCode::Success),
    }
}

/// Send one frame without waiting for any reply (client notifications).
pub async fn send_only<T: Serialize>(addr: SocketAddr, msg: &T) -> Result<(), WireError> {
    let mut stream = TcpStream::connect(addr).await.map_err(WireError::Io)?;
    write_frame(&mut stream, msg, DEFAULT_TIMEOUT).await
}
