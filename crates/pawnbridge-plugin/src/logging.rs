//! Server log output for `tracing`
//!
//! Events are formatted by `tracing-subscriber` and printed through the
//! server's `logprintf`. The server expects code page text and truncates
//! long lines, so every line is converted and split before it is printed.
//!
//! `logprintf` may only be called from the server thread. Lines produced on
//! other threads (database workers) are queued and printed by
//! [`flush_pending`] on the next tick.

use std::ffi::CString;
use std::io::{self, Write};
use std::thread::{self, ThreadId};

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use pawnbridge_engine::amx::{strings, LogPrintFn};
use tracing::debug;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Longest piece of a line passed to `logprintf` in one call
pub const MAX_CHUNK: usize = 2048;

const PREFIX: &str = "[pawnbridge] ";

static LOGPRINTF: OnceCell<LogPrintFn> = OnceCell::new();
static SERVER_THREAD: OnceCell<ThreadId> = OnceCell::new();
static PENDING: Lazy<Mutex<Vec<Vec<u8>>>> = Lazy::new(Default::default);

/// Install the global subscriber.
///
/// `filter` uses `EnvFilter` directives and is replaced by `RUST_LOG` when
/// that is set. The calling thread becomes the thread allowed to print.
pub fn init(logprintf: Option<LogPrintFn>, filter: &str) {
    if let Some(logprintf) = logprintf {
        let _ = LOGPRINTF.set(logprintf);
    }
    let _ = SERVER_THREAD.set(thread::current().id());

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(ServerLog)
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .try_init()
        .is_ok();

    if !installed {
        debug!("A global subscriber was already installed");
    }
}

/// Print the lines queued by other threads.
pub fn flush_pending() {
    let pending = std::mem::take(&mut *PENDING.lock());
    for line in pending {
        print_line(&line);
    }
}

/// `MakeWriter` handing each formatted event to the server log
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerLog;

impl<'a> MakeWriter<'a> for ServerLog {
    type Writer = EventWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventWriter::default()
    }
}

/// Collects one formatted event and prints it when dropped.
#[derive(Debug, Default)]
pub struct EventWriter {
    buffer: Vec<u8>,
}

impl Write for EventWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let text = std::mem::take(&mut self.buffer);
        emit(&text, &mut dispatch_line);
        Ok(())
    }
}

impl Drop for EventWriter {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            let _ = self.flush();
        }
    }
}

/// Split formatted text into server log lines.
///
/// Each non-empty line is prefixed, converted to the server code page and
/// cut into pieces of at most [`MAX_CHUNK`] bytes, each handed to `print`.
pub fn emit(text: &[u8], print: &mut dyn FnMut(Vec<u8>)) {
    let text = String::from_utf8_lossy(text);
    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        let encoded = strings::to_ansi(&format!("{}{}", PREFIX, line));
        for piece in encoded.chunks(MAX_CHUNK) {
            print(piece.iter().copied().filter(|byte| *byte != 0).collect());
        }
    }
}

fn dispatch_line(line: Vec<u8>) {
    let on_server_thread = SERVER_THREAD
        .get()
        .map_or(true, |id| *id == thread::current().id());

    if on_server_thread {
        print_line(&line);
    } else {
        PENDING.lock().push(line);
    }
}

fn print_line(line: &[u8]) {
    let text = match CString::new(line) {
        Ok(text) => text,
        Err(_) => return,
    };

    match LOGPRINTF.get() {
        Some(logprintf) => unsafe { logprintf(c"%s".as_ptr(), text.as_ptr()) },
        None => {
            let mut stderr = io::stderr().lock();
            let _ = stderr.write_all(line);
            let _ = stderr.write_all(b"\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(text: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        emit(text, &mut |line| lines.push(line));
        lines
    }

    #[test]
    fn test_lines_are_prefixed_and_blank_lines_skipped() {
        let lines = collect(b" INFO Loaded 3 callbacks\n\n  \n WARN Retrying\n");
        assert_eq!(
            lines,
            vec![
                b"[pawnbridge]  INFO Loaded 3 callbacks".to_vec(),
                b"[pawnbridge]  WARN Retrying".to_vec(),
            ]
        );
    }

    #[test]
    fn test_long_lines_are_split() {
        let message = "x".repeat(5000);
        let lines = collect(message.as_bytes());

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), MAX_CHUNK);
        assert_eq!(lines[1].len(), MAX_CHUNK);
        assert_eq!(lines[2].len(), PREFIX.len() + 5000 - 2 * MAX_CHUNK);
        assert!(lines.iter().all(|line| line.len() <= MAX_CHUNK));
    }

    #[test]
    fn test_lines_use_the_server_code_page() {
        let lines = collect("Café\n".as_bytes());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].last(), Some(&0xE9));
    }

    #[test]
    fn test_writer_buffers_until_dropped() {
        let mut writer = ServerLog.make_writer();
        writer.write_all(b"partial").unwrap();
        assert_eq!(writer.buffer, b"partial");
        writer.flush().unwrap();
        assert!(writer.buffer.is_empty());
    }
}
