//! Local terminal plumbing for interactive sessions
//!
//! Standard input is read on a plain OS thread: a blocking stdin read inside
//! the runtime would keep it from shutting down after the session ends.

use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::{self, BoxStream, StreamExt};
use kube::api::TerminalSize;
use std::io::{self, IsTerminal, Read};
use tokio::io::AsyncWrite;
use tracing::debug;

const STDIN_BUFFER_SIZE: usize = 1024;

/// Restores cooked mode when dropped
#[derive(Debug)]
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Switch the local terminal to raw mode
    pub fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            debug!(error = %e, "Failed to restore terminal mode");
        }
    }
}

/// The local side of an interactive session
pub struct TerminalIo {
    /// Keystrokes to forward
    pub input: BoxStream<'static, io::Result<Bytes>>,
    /// Where remote output is written
    pub output: Box<dyn AsyncWrite + Send + Unpin>,
    /// Terminal size changes
    pub resizes: BoxStream<'static, TerminalSize>,
    /// Size at attach time
    pub initial_size: Option<TerminalSize>,
    /// Held for the whole session when the terminal is in raw mode
    pub guard: Option<RawModeGuard>,
}

impl TerminalIo {
    /// Attach to the process's own terminal. Raw mode is only enabled when
    /// stdin is a terminal; piped input is forwarded as is.
    pub fn local() -> io::Result<Self> {
        let initial_size = current_size();
        let guard = raw_mode_guard(io::stdin().is_terminal())?;

        Ok(Self {
            input: stdin_stream(),
            output: Box::new(tokio::io::stdout()),
            resizes: resize_stream(),
            initial_size,
            guard,
        })
    }
}

fn raw_mode_guard(stdin_is_terminal: bool) -> io::Result<Option<RawModeGuard>> {
    if !stdin_is_terminal {
        debug!("Standard input is not a terminal, leaving it in cooked mode");
        return Ok(None);
    }
    RawModeGuard::enable().map(Some)
}

/// Current terminal size, if stdout is a terminal
pub fn current_size() -> Option<TerminalSize> {
    crossterm::terminal::size()
        .ok()
        .map(|(width, height)| TerminalSize { width, height })
}

fn stdin_stream() -> BoxStream<'static, io::Result<Bytes>> {
    let (tx, rx) = mpsc::unbounded();
    std::thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; STDIN_BUFFER_SIZE];
        loop {
            let item = match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
            let failed = item.is_err();
            if tx.unbounded_send(item).is_err() || failed {
                break;
            }
        }
    });
    rx.boxed()
}

#[cfg(unix)]
fn resize_stream() -> BoxStream<'static, TerminalSize> {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::window_change()) {
        Ok(signal) => stream::unfold(signal, |mut signal| async move {
            signal.recv().await?;
            Some((current_size(), signal))
        })
        .filter_map(futures::future::ready)
        .boxed(),
        Err(e) => {
            debug!(error = %e, "Terminal resize events unavailable");
            stream::empty().boxed()
        }
    }
}

#[cfg(not(unix))]
fn resize_stream() -> BoxStream<'static, TerminalSize> {
    stream::empty().boxed()
}
