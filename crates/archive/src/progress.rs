//! Progress-reporting byte stream

use std::io::{self, Read};

use sideload_events::EventEmitter;

/// Wraps a reader and reports how much of a known total has been consumed.
///
/// A progress update is emitted only when the whole-number percentage
/// strictly increases, so one pass over a source produces at most 100 of
/// them. Without a known total nothing is emitted.
#[derive(Debug)]
pub struct ProgressReader<R, E> {
    inner: R,
    emitter: E,
    bytes_processed: u64,
    total: Option<u64>,
    last_emitted_percent: u8,
}

impl<R: Read, E: EventEmitter> ProgressReader<R, E> {
    /// `total` of `None` (or zero) means the length is unknown
    pub fn new(inner: R, total: Option<u64>, emitter: E) -> Self {
        Self {
            inner,
            emitter,
            bytes_processed: 0,
            total: total.filter(|t| *t > 0),
            last_emitted_percent: 0,
        }
    }

    #[must_use]
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    #[must_use]
    pub fn last_emitted_percent(&self) -> u8 {
        self.last_emitted_percent
    }

    /// Release the wrapped reader
    pub fn into_inner(self) -> R {
        self.inner
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn record(&mut self, n: usize) {
        self.bytes_processed += n as u64;
        let Some(total) = self.total else {
            return;
        };

        let percent = (u128::from(self.bytes_processed) * 100 / u128::from(total)).min(100) as u8;
        if percent > self.last_emitted_percent {
            self.last_emitted_percent = percent;
            let fraction = (self.bytes_processed as f64 / total as f64).min(1.0);
            self.emitter.emit_progress(fraction as f32);
        }
    }
}

impl<R: Read, E: EventEmitter> Read for ProgressReader<R, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.record(n);
        }
        Ok(n)
    }
}
