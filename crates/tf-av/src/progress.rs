//! Incremental decoder for ffmpeg's `-progress` output.
//!
//! ffmpeg writes blocks of `key=value` lines, each block closed by a
//! `progress=continue` or `progress=end` line. Reads from the pipe split that
//! text at arbitrary points, so [`ProgressParser`] keeps the trailing partial
//! line between calls to [`ProgressParser::feed`].
//!
//! A record is normally emitted at the `progress=` terminator. A stream
//! without terminators still yields records: a time key that repeats inside
//! an open block closes the previous one, and [`ProgressParser::finish`]
//! flushes whatever is left at end of stream.

use std::collections::BTreeMap;

/// Longest line kept while waiting for its newline.
const MAX_LINE: usize = 64 * 1024;

/// One decoded progress block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressRecord {
    /// Elapsed output media time in seconds.
    pub out_time_seconds: f64,
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    /// Encoding speed as a multiple of real time (`speed=1.5x` => 1.5).
    pub speed: Option<f64>,
    /// Current output bitrate as reported, e.g. `"1402.3kbits/s"`.
    pub bitrate: Option<String>,
    /// Bytes written so far.
    pub total_size: Option<u64>,
    /// Set on the final block (`progress=end`).
    pub end: bool,
    /// Every other well-formed key in the block.
    pub other: BTreeMap<String, String>,
}

/// Block state accumulated until the terminator line.
#[derive(Debug, Default)]
struct Pending {
    out_time_us: Option<i64>,
    out_time_ms: Option<i64>,
    out_time: Option<f64>,
    record: ProgressRecord,
    touched: bool,
}

impl Pending {
    /// Microsecond keys are exact; the `HH:MM:SS` form is the fallback.
    fn out_time_seconds(&self) -> Option<f64> {
        self.out_time_us
            .or(self.out_time_ms)
            .map(|us| us.max(0) as f64 / 1_000_000.0)
            .or(self.out_time)
    }

    /// Whether `key` sets a time this block already holds.
    fn repeats_time(&self, key: &str) -> bool {
        match key {
            "out_time_us" => self.out_time_us.is_some(),
            "out_time_ms" => self.out_time_ms.is_some(),
            "out_time" => self.out_time.is_some(),
            _ => false,
        }
    }

    fn take(&mut self, end: bool) -> Option<ProgressRecord> {
        let out_time = self.out_time_seconds();
        let mut pending = std::mem::take(self);
        let secs = out_time?;
        pending.record.out_time_seconds = secs;
        pending.record.end = end;
        Some(pending.record)
    }
}

/// Stateful line splitter and block decoder for one transcoder stream.
#[derive(Debug, Default)]
pub struct ProgressParser {
    partial: Vec<u8>,
    /// Set while skipping the rest of an oversized line.
    overflow: bool,
    pending: Pending,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk of raw stdout, returning every block it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProgressRecord> {
        let mut out = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if std::mem::take(&mut self.overflow) {
                continue;
            }
            if self.partial.is_empty() {
                self.line(head, &mut out);
            } else {
                let mut line = std::mem::take(&mut self.partial);
                line.extend_from_slice(head);
                self.line(&line, &mut out);
            }
        }

        if self.overflow {
            return out;
        }
        self.partial.extend_from_slice(rest);
        if self.partial.len() > MAX_LINE {
            tracing::trace!(bytes = self.partial.len(), "Dropping oversized progress line");
            self.partial.clear();
            self.overflow = true;
        }
        out
    }

    /// Flush at end of stream: a dangling line is decoded and a block
    /// without its terminator is still returned if it carried a time.
    pub fn finish(&mut self) -> Option<ProgressRecord> {
        self.overflow = false;
        let mut out = Vec::new();
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.line(&line, &mut out);
        }
        if let Some(record) = out.pop() {
            return Some(record);
        }
        if self.pending.touched {
            return self.pending.take(false);
        }
        None
    }

    fn line(&mut self, raw: &[u8], out: &mut Vec<ProgressRecord>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return;
        }

        let Some((key, value)) = line.split_once('=') else {
            tracing::trace!(line, "Skipping malformed progress line");
            return;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            tracing::trace!(line, "Skipping progress line without a key");
            return;
        }

        let p = &mut self.pending;
        if p.repeats_time(key) {
            out.extend(p.take(false));
        }
        p.touched = true;
        match key {
            // ffmpeg reports both in microseconds despite the `_ms` name.
            "out_time_us" => p.out_time_us = value.parse().ok(),
            "out_time_ms" => p.out_time_ms = value.parse().ok(),
            "out_time" => p.out_time = parse_clock(value),
            "frame" => p.record.frame = value.parse().ok(),
            "fps" => p.record.fps = value.parse().ok(),
            "speed" => p.record.speed = parse_speed(value),
            "bitrate" => p.record.bitrate = (value != "N/A").then(|| value.to_string()),
            "total_size" => p.record.total_size = value.parse().ok(),
            "progress" => {
                if let Some(record) = p.take(value == "end") {
                    out.push(record);
                }
            }
            _ => {
                p.record.other.insert(key.to_string(), value.to_string());
            }
        }
    }
}

/// Parse `HH:MM:SS.ffffff` into seconds.
fn parse_clock(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let h: u64 = parts.next()?.parse().ok()?;
    let m: u64 = parts.next()?.parse().ok()?;
    let s: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !s.is_finite() || s < 0.0 {
        return None;
    }
    Some(h as f64 * 3600.0 + m as f64 * 60.0 + s)
}

/// Parse `1.53x` into `1.53`. `N/A` and zero yield `None`.
fn parse_speed(value: &str) -> Option<f64> {
    let speed: f64 = value.strip_suffix('x').unwrap_or(value).trim().parse().ok()?;
    (speed.is_finite() && speed > 0.0).then_some(speed)
}
