//! # Output Mirror
//!
//! Writes each flushed payload as one line to a plain-text sink. It counts as
//! one open connection on its [`ConnectionGauge`] until a write fails; the tick
//! scheduler watches that gauge the same way it watches the feed.

use std::fmt;
use std::io::{self, Write};

use crate::feed::{ConnectionGauge, ConnectionGuard};

/// # Output Mirror
pub struct OutputMirror {
    writer: Box<dyn Write + Send>,
    gauge: ConnectionGauge,
    guard: Option<ConnectionGuard>,
}

impl OutputMirror {
    /// Mirrors into `writer`. The mirror starts open.
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        let gauge = ConnectionGauge::new();
        let guard = Some(gauge.attach());
        Self {
            writer: Box::new(writer),
            gauge,
            guard,
        }
    }

    /// Mirrors to standard output (`--stdout`).
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Accepts and drops everything.
    pub fn discard() -> Self {
        Self::new(io::sink())
    }

    /// Handle on the mirror's open-connection count.
    pub fn gauge(&self) -> ConnectionGauge {
        self.gauge.clone()
    }

    /// Whether the mirror still accepts output.
    pub fn is_open(&self) -> bool {
        self.guard.is_some()
    }

    /// Writes `line` plus a newline. A failed write closes the mirror for good.
    pub fn write_line(&mut self, line: &str) {
        if self.guard.is_none() {
            return;
        }

        let written = self
            .writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush());

        if let Err(e) = written {
            log::error!("Output mirror write failed, closing it: {}", e);
            self.guard = None;
        }
    }
}

impl fmt::Debug for OutputMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputMirror")
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader went away"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_lines_are_newline_terminated() {
        let out = Shared::default();
        let mut mirror = OutputMirror::new(out.clone());
        mirror.write_line("{\"a\":1}");
        mirror.write_line("{\"a\":2}");

        assert_eq!(&*out.0.lock().unwrap(), b"{\"a\":1}\n{\"a\":2}\n");
        assert_eq!(mirror.gauge().connections(), 1);
    }

    #[test]
    fn test_failed_write_closes_mirror() {
        let mut mirror = OutputMirror::new(Broken);
        let gauge = mirror.gauge();
        assert!(gauge.is_open());

        mirror.write_line("payload");
        assert!(!mirror.is_open());
        assert!(!gauge.is_open());

        mirror.write_line("ignored");
        assert_eq!(gauge.connections(), 0);
    }

    #[test]
    fn test_discard_stays_open() {
        let mut mirror = OutputMirror::discard();
        for _ in 0..10 {
            mirror.write_line("anything");
        }
        assert!(mirror.gauge().is_open());
    }
}
