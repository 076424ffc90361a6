//! Diagnostic tracing for autopilot runs.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr.
//!   Every formatted line passes through the [`Sanitizer`] first.
//!
//! - **Product state (`io/ledger`, `io/outcome_log`)**: usage and outcome
//!   records under the state directory. Always written, unaffected by `RUST_LOG`.

use std::io::{self, Write};
use std::sync::Arc;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::core::sanitize::Sanitizer;

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `autopilot=info` if unset.
/// Output: stderr, compact format, secrets masked.
///
/// # Example
/// ```bash
/// RUST_LOG=autopilot=debug autopilot issue 12
/// ```
pub fn init(sanitizer: Sanitizer) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autopilot=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(SanitizingMakeWriter::new(sanitizer, io::stderr))
                .compact(),
        )
        .init();
}

/// Wraps a writer factory so each event is masked before it is written.
#[derive(Clone)]
pub struct SanitizingMakeWriter<F> {
    sanitizer: Arc<Sanitizer>,
    inner: F,
}

impl<F> SanitizingMakeWriter<F> {
    pub fn new(sanitizer: Sanitizer, inner: F) -> Self {
        Self {
            sanitizer: Arc::new(sanitizer),
            inner,
        }
    }
}

impl<'a, F> MakeWriter<'a> for SanitizingMakeWriter<F>
where
    F: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<F::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter {
            sanitizer: Arc::clone(&self.sanitizer),
            inner: self.inner.make_writer(),
            buf: Vec::new(),
        }
    }
}

/// Buffers one event and writes it masked on flush or drop.
pub struct SanitizingWriter<W: Write> {
    sanitizer: Arc<Sanitizer>,
    inner: W,
    buf: Vec<u8>,
}

impl<W: Write> Write for SanitizingWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return self.inner.flush();
        }
        let text = String::from_utf8_lossy(&self.buf);
        let masked = self.sanitizer.sanitize(&text);
        self.buf.clear();
        self.inner.write_all(masked.as_bytes())?;
        self.inner.flush()
    }
}

impl<W: Write> Drop for SanitizingWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
