// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File broadcast: staged block writes into a per-transfer path.
//!
//! The write happens in a forked child that irrevocably switches to the
//! requesting user, so every permission check is the kernel's, not
//! ours. Blocks append in order; the final block fixes modes, owner,
//! and timestamps.

use std::ffi::CString;
use std::sync::Arc;

use gridd_proto::{ErrCode, FileBcastReq};
use nix::sys::wait::{waitpid, WaitStatus as NixWait};
use nix::unistd::{self, ForkResult};
use tracing::{error, info};

use crate::dispatcher::DispatchCtx;

pub async fn file_bcast(ctx: &Arc<DispatchCtx>, req_uid: u32, req: FileBcastReq) -> ErrCode {
    if !ctx.authorizer.is_authorized(req_uid) && req_uid != req.uid {
        error!(req_uid, target_uid = req.uid, "file_bcast uid mismatch");
        return ErrCode::AuthFailed;
    }

    info!(
        uid = req.uid,
        path = %req.path.display(),
        block = req.block_no,
        last = req.last_block,
        "file broadcast block"
    );

    let result = tokio::task::spawn_blocking(move || write_block_as_user(&req)).await;
    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "file_bcast task panicked");
            ErrCode::Internal
        }
    }
}

/// Fork, become the user, write the block, exit. The parent maps the
/// child's exit status to a reply code.
fn write_block_as_user(req: &FileBcastReq) -> ErrCode {
    let Ok(cpath) = CString::new(req.path.as_os_str().as_encoded_bytes()) else {
        return ErrCode::Internal;
    };

    match unsafe { unistd::fork() } {
        Err(e) => {
            error!(error = %e, "file_bcast fork failed");
            ErrCode::Internal
        }
        Ok(ForkResult::Parent { child }) => match waitpid(child, None) {
            Ok(NixWait::Exited(_, 0)) => ErrCode::Success,
            Ok(NixWait::Exited(_, code)) => {
                error!(code, path = %req.path.display(), "file_bcast child failed");
                ErrCode::Internal
            }
            other => {
                error!(?other, "file_bcast child did not exit cleanly");
                ErrCode::Internal
            }
        },
        Ok(ForkResult::Child) => {
            // Only async-signal-safe calls from here; exit code is the
            // only channel back.
            let code = unsafe { child_write_block(req, &cpath) };
            unsafe { libc::_exit(code) }
        }
    }
}

/// Child side: setgid/setuid, open with block-position flags, write,
/// finalize on the last block.
unsafe fn child_write_block(req: &FileBcastReq, cpath: &CString) -> i32 {
    if libc::geteuid() == 0 {
        if libc::setgid(req.gid) != 0 {
            return 2;
        }
        if libc::setuid(req.uid) != 0 {
            return 2;
        }
    }

    let mut flags = libc::O_WRONLY;
    if req.block_no == 1 {
        flags |= libc::O_CREAT;
        flags |= if req.force { libc::O_TRUNC } else { libc::O_EXCL };
    } else {
        flags |= libc::O_APPEND;
    }

    let fd = libc::open(cpath.as_ptr(), flags, 0o700);
    if fd < 0 {
        return 1;
    }

    let mut offset = 0usize;
    while offset < req.data.len() {
        let n = libc::write(
            fd,
            req.data.as_ptr().add(offset) as *const libc::c_void,
            req.data.len() - offset,
        );
        if n < 0 {
            let errno = *libc::__errno_location();
            if errno == libc::EINTR || errno == libc::EAGAIN {
                continue;
            }
            libc::close(fd);
            return 1;
        }
        offset += n as usize;
    }

    if req.last_block {
        if libc::fchmod(fd, (req.modes & 0o777) as libc::mode_t) != 0 {
            libc::close(fd);
            return 1;
        }
        // chown to self is permitted; cross-owner chown needs privilege
        libc::fchown(fd, req.uid, req.gid);
    }
    libc::close(fd);

    if req.last_block && req.atime != 0 {
        let times = libc::utimbuf {
            actime: req.atime as libc::time_t,
            modtime: req.mtime as libc::time_t,
        };
        libc::utime(cpath.as_ptr(), &times);
    }
    0
}

#[cfg(test)]
#[path = "bcast_tests.rs"]
mod tests;
