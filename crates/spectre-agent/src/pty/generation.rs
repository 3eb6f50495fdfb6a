//! One instantiation of a session's shell
//!
//! A generation owns the child process, the PTY master, and the
//! cancellation token that its output reader watches. It is created by a
//! session `reset` and retired by the next `reset` or by `close`; nothing
//! of it is reused afterwards.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use spectre_core::SessionError;

use super::ShellCommand;

/// Bytes per PTY read
const READ_CHUNK_SIZE: usize = 4096;

/// Chunks buffered between the blocking read thread and the output reader
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Output of the blocking read thread.
///
/// End of file is delivered as an `UnexpectedEof` error: a shell whose
/// output ends has exited.
pub type OutputChunk = io::Result<Vec<u8>>;

/// A live shell process and its pseudo-terminal
pub struct Generation {
    number: u64,
    pid: Option<u32>,
    cancel: CancellationToken,
    closed: AtomicBool,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    output: Mutex<Option<mpsc::Receiver<OutputChunk>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Generation {
    /// Open a PTY and start the shell in it
    pub fn spawn(number: u64, shell: &ShellCommand) -> Result<Self, SessionError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: shell.size.rows,
                cols: shell.size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::PtyAllocation(format!("failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&shell.program);
        for (key, value) in &shell.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            SessionError::PtyAllocation(format!("failed to spawn {}: {}", shell.program, e))
        })?;
        // The child holds its own slave handle; ours must go so that reads
        // observe the child's exit.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::PtyAllocation(format!("failed to clone PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::PtyAllocation(format!("failed to take PTY writer: {}", e)))?;

        let pid = child.process_id();
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        spawn_read_thread(number, reader, tx)?;

        tracing::debug!("Spawned {} (pid {:?}) as generation {}", shell.program, pid, number);

        Ok(Self {
            number,
            pid,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            writer: Mutex::new(Some(writer)),
            master: Mutex::new(Some(pair.master)),
            child: Mutex::new(Some(child)),
            output: Mutex::new(Some(rx)),
        })
    }

    /// Position of this generation in its session's history, starting at 1
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Token that fires when this generation is retired
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Hand out the output stream. Only the first caller gets it, so at
    /// most one reader ever runs per generation.
    pub fn take_output(&self) -> Option<mpsc::Receiver<OutputChunk>> {
        lock(&self.output).take()
    }

    /// Write input to the shell
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let mut guard = lock(&self.writer);
        let writer = guard
            .as_mut()
            .ok_or_else(|| SessionError::NoActiveSession(format!("generation {} closed", self.number)))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Retire this generation: signal cancellation, then kill the shell and
    /// release the PTY. Safe to call more than once.
    pub fn close(&self) {
        self.cancel.cancel();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        lock(&self.writer).take();
        if let Some(mut child) = lock(&self.child).take() {
            if let Err(e) = child.kill() {
                tracing::debug!("Kill of generation {} failed: {}", self.number, e);
            }
            reap(self.number, child);
        }
        lock(&self.master).take();
        tracing::debug!("Closed generation {}", self.number);
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        self.close();
    }
}

/// Wait for the killed child off the caller's thread so it does not linger
/// as a zombie.
fn reap(number: u64, mut child: Box<dyn Child + Send + Sync>) {
    let spawned = std::thread::Builder::new()
        .name(format!("pty-reap-{}", number))
        .spawn(move || match child.wait() {
            Ok(status) => tracing::trace!("Generation {} exited: {:?}", number, status),
            Err(e) => tracing::trace!("Wait on generation {} failed: {}", number, e),
        });
    if let Err(e) = spawned {
        tracing::warn!("Failed to start reaper for generation {}: {}", number, e);
    }
}

/// Portable-pty readers are blocking, so each generation gets a dedicated
/// thread that forwards chunks until the PTY closes or nobody listens.
fn spawn_read_thread(
    number: u64,
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<OutputChunk>,
) -> Result<(), SessionError> {
    std::thread::Builder::new()
        .name(format!("pty-read-{}", number))
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK_SIZE];
            loop {
                let chunk = match reader.read(&mut buf) {
                    Ok(0) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "shell exited")),
                    Ok(n) => Ok(buf[..n].to_vec()),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => Err(e),
                };
                let done = chunk.is_err();
                if tx.blocking_send(chunk).is_err() || done {
                    break;
                }
            }
            tracing::trace!("PTY read thread for generation {} exiting", number);
        })
        .map(|_| ())
        .map_err(SessionError::Io)
}
