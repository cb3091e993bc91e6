// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The step's I/O plane.
//!
//! Interactive steps get a pipe triple per task; reader tasks label
//! each chunk with the global task id and fan it out to every attached
//! client, and client stdin frames route back to the addressed task.
//! Batch steps write straight into their output files: no readers,
//! no clients.
//!
//! Clients attach over TCP (the launch request's io address, or later
//! via reattach). All file descriptors handed to children are plain
//! blocking fds; everything the hub keeps is nonblocking.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::sync::Arc;

use gridd_core::StepSpec;
use gridd_proto::wire::{read_frame, write_frame};
use gridd_proto::{ClientIoMsg, IoStream, ALL_TASKS, DEFAULT_TIMEOUT};
use nix::fcntl::OFlag;
use nix::unistd;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("pipe: {0}")]
    Pipe(nix::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// File descriptors for one task's stdio.
pub struct TaskStdio {
    /// Ends inherited by the child (dup2'd over 0/1/2).
    pub child_stdin: OwnedFd,
    pub child_stdout: OwnedFd,
    pub child_stderr: OwnedFd,
    /// Supervisor-side ends; `None` for batch (files need no pump).
    pub stdin_w: Option<OwnedFd>,
    pub stdout_r: Option<OwnedFd>,
    pub stderr_r: Option<OwnedFd>,
}

/// Pipe triples for an interactive step. Every end is close-on-exec:
/// the child's `dup2` onto 0/1/2 clears the flag on its own three, and
/// sibling tasks' ends vanish at exec instead of leaking.
pub fn interactive_stdio(spec: &StepSpec) -> Result<Vec<TaskStdio>, IoError> {
    let mut out = Vec::with_capacity(spec.ntasks as usize);
    for _ in 0..spec.ntasks {
        let (stdin_r, stdin_w) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(IoError::Pipe)?;
        let (stdout_r, stdout_w) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(IoError::Pipe)?;
        let (stderr_r, stderr_w) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(IoError::Pipe)?;
        out.push(TaskStdio {
            child_stdin: stdin_r,
            child_stdout: stdout_w,
            child_stderr: stderr_w,
            stdin_w: Some(stdin_w),
            stdout_r: Some(stdout_r),
            stderr_r: Some(stderr_r),
        });
    }
    Ok(out)
}

/// Batch stdio: /dev/null stdin, output files opened for append.
///
/// Called with privileges dropped to the user so the files carry the
/// right owner.
pub fn batch_stdio(stdout_path: &Path, stderr_path: &Path) -> Result<Vec<TaskStdio>, IoError> {
    use std::os::unix::fs::OpenOptionsExt;

    let open_out = |path: &Path| -> Result<OwnedFd, IoError> {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .mode(0o644)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)?;
        Ok(OwnedFd::from(file))
    };

    let stdin = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_CLOEXEC)
        .open("/dev/null")
        .map(OwnedFd::from)?;

    Ok(vec![TaskStdio {
        child_stdin: stdin,
        child_stdout: open_out(stdout_path)?,
        child_stderr: open_out(stderr_path)?,
        stdin_w: None,
        stdout_r: None,
        stderr_r: None,
    }])
}

type ClientTx = mpsc::UnboundedSender<ClientIoMsg>;

/// Fan-out hub: task output to clients, client stdin to tasks.
pub struct IoHub {
    clients: Arc<Mutex<Vec<ClientTx>>>,
    stdin_writers: Arc<Mutex<HashMap<u32, pipe::Sender>>>,
    readers: Mutex<JoinSet<()>>,
}

impl IoHub {
    /// Take over the supervisor-side fds and start the reader tasks.
    pub fn start(spec: &StepSpec, stdios: &mut [TaskStdio]) -> Result<Self, IoError> {
        let clients: Arc<Mutex<Vec<ClientTx>>> = Arc::new(Mutex::new(Vec::new()));
        let mut readers = JoinSet::new();
        let mut stdin_writers = HashMap::new();

        for (i, stdio) in stdios.iter_mut().enumerate() {
            let gtid = spec.gtids.get(i).copied().unwrap_or(i as u32);

            if let Some(fd) = stdio.stdin_w.take() {
                let sender = pipe::Sender::from_owned_fd(fd)?;
                stdin_writers.insert(gtid, sender);
            }
            if let Some(fd) = stdio.stdout_r.take() {
                let rx = pipe::Receiver::from_owned_fd(fd)?;
                readers.spawn(pump_output(rx, gtid, IoStream::Stdout, clients.clone()));
            }
            if let Some(fd) = stdio.stderr_r.take() {
                let rx = pipe::Receiver::from_owned_fd(fd)?;
                readers.spawn(pump_output(rx, gtid, IoStream::Stderr, clients.clone()));
            }
        }

        Ok(Self {
            clients,
            stdin_writers: Arc::new(Mutex::new(stdin_writers)),
            readers: Mutex::new(readers),
        })
    }

    /// Attach a client: connect out to its io address and start the
    /// per-client writer and stdin reader.
    pub async fn attach_client(&self, addr: std::net::SocketAddr) -> Result<(), IoError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let (tx, mut rx) = mpsc::unbounded_channel::<ClientIoMsg>();
        self.clients.lock().push(tx);

        // Outbound: labeled output frames
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write_frame(&mut write_half, &msg, DEFAULT_TIMEOUT)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        // Inbound: stdin frames routed to tasks
        let writers = Arc::clone(&self.stdin_writers);
        tokio::spawn(async move {
            let mut read_half = read_half;
            loop {
                match read_frame::<ClientIoMsg, _>(&mut read_half, LONG_TIMEOUT).await {
                    Ok(ClientIoMsg::Stdin { gtid, data }) => {
                        route_stdin(&writers, gtid, &data).await;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });

        tracing::debug!(%addr, "io client attached");
        Ok(())
    }

    /// Close task stdin (EOF to the child) for every task.
    pub fn close_stdin(&self) {
        self.stdin_writers.lock().clear();
    }

    /// Drain the readers: returns when every task stream hit EOF.
    /// Clients see per-stream EOF frames from the pumps; their
    /// channels close when the hub is dropped.
    pub async fn drain(&self) {
        let mut set = {
            let mut readers = self.readers.lock();
            std::mem::take(&mut *readers)
        };
        while set.join_next().await.is_some() {}
    }

    /// Abort any still-running readers (watchdog path).
    pub fn abort(&self) {
        self.readers.lock().abort_all();
    }
}

/// Client stdin frame → task pipe. `ALL_TASKS` broadcasts.
async fn route_stdin(
    writers: &Arc<Mutex<HashMap<u32, pipe::Sender>>>,
    gtid: u32,
    data: &[u8],
) {
    // Writing with the lock held would block the hub; nonblocking
    // try_write is enough for the one-byte-to-few-KB stdin traffic.
    let targets: Vec<u32> = {
        let map = writers.lock();
        if gtid == ALL_TASKS {
            map.keys().copied().collect()
        } else {
            map.keys().copied().filter(|g| *g == gtid).collect()
        }
    };
    for target in targets {
        let map = writers.lock();
        if let Some(sender) = map.get(&target) {
            if let Err(e) = sender.try_write(data) {
                tracing::debug!(gtid = target, error = %e, "stdin write failed");
            }
        }
    }
}

/// Longer timeout for the client stdin side: clients talk rarely.
const LONG_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// Pump one task output stream to every client until EOF.
async fn pump_output(
    rx: pipe::Receiver,
    gtid: u32,
    stream: IoStream,
    clients: Arc<Mutex<Vec<ClientTx>>>,
) {
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match read_pipe(&rx, &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let msg = ClientIoMsg::Output {
            gtid,
            stream,
            data: buf[..n].to_vec(),
        };
        clients.lock().retain(|tx| tx.send(msg.clone()).is_ok());
    }
    let eof = ClientIoMsg::Eof { gtid, stream };
    clients.lock().retain(|tx| tx.send(eof.clone()).is_ok());
}

async fn read_pipe(rx: &pipe::Receiver, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        rx.readable().await?;
        match rx.try_read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "io_tests.rs"]
mod tests;
