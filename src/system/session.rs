//! Session range, timing state, and the end-of-run summary.

use std::fmt;
use std::time::Instant;

/// Immutable `[start, end)` range over frame indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRange {
    pub start: usize,
    pub end: usize,
}

impl SessionRange {
    /// Clamp a requested range to the frames the source actually has.
    pub fn clamped(start: usize, end: usize, num_images: usize) -> Self {
        let end = end.min(num_images);
        Self {
            start: start.min(end),
            end,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Progress and timing of one run of the frame loop.
#[derive(Debug)]
pub struct Session {
    pub range: SessionRange,
    /// Index being (or last) processed.
    pub current: Option<usize>,
    pub frames_submitted: usize,
    pub resets: usize,
    pub lost: bool,
    wall_start: Instant,
    cpu_start: f64,
    wall_end: Option<Instant>,
    cpu_end: Option<f64>,
}

impl Session {
    pub fn new(range: SessionRange) -> Self {
        Self {
            range,
            current: None,
            frames_submitted: 0,
            resets: 0,
            lost: false,
            wall_start: Instant::now(),
            cpu_start: cpu_seconds(),
            wall_end: None,
            cpu_end: None,
        }
    }

    /// Move the timing origin to now. Frames spent initializing do not count
    /// against measured throughput.
    pub fn restart_timing(&mut self) {
        self.wall_start = Instant::now();
        self.cpu_start = cpu_seconds();
    }

    pub fn record_submission(&mut self, index: usize) {
        self.current = Some(index);
        self.frames_submitted += 1;
    }

    pub fn stop_timing(&mut self) {
        self.wall_end = Some(Instant::now());
        self.cpu_end = Some(cpu_seconds());
    }

    /// Derive the summary; `seconds_processed` is the dataset time span
    /// covered by the range.
    pub fn summary(&self, seconds_processed: f64) -> RunSummary {
        let wall_end = self.wall_end.unwrap_or_else(Instant::now);
        let cpu_end = self.cpu_end.unwrap_or_else(cpu_seconds);
        RunSummary {
            frames_processed: self.range.len(),
            frames_submitted: self.frames_submitted,
            last_index: self.current,
            resets: self.resets,
            lost: self.lost,
            seconds_processed,
            wall_ms: wall_end.duration_since(self.wall_start).as_secs_f64() * 1000.0,
            cpu_ms: (cpu_end - self.cpu_start).max(0.0) * 1000.0,
        }
    }
}

/// Outcome of a run, reported after the frame loop exits.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Size of the requested range.
    pub frames_processed: usize,
    /// Frames actually handed to an engine.
    pub frames_submitted: usize,
    pub last_index: Option<usize>,
    pub resets: usize,
    pub lost: bool,
    /// Dataset time covered by the range, seconds.
    pub seconds_processed: f64,
    pub wall_ms: f64,
    /// Process CPU time, single core equivalent.
    pub cpu_ms: f64,
}

impl RunSummary {
    pub fn fps(&self) -> f64 {
        ratio(self.frames_processed as f64, self.seconds_processed)
    }

    pub fn ms_per_frame(&self) -> f64 {
        ratio(self.cpu_ms, self.frames_processed as f64)
    }

    /// How many times faster than the recording the run was.
    pub fn realtime_factor(&self) -> f64 {
        ratio(1000.0, ratio(self.cpu_ms, self.seconds_processed))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "======================")?;
        writeln!(f, "{} Frames ({:.1} fps)", self.frames_processed, self.fps())?;
        writeln!(f, "{:.2}ms per frame (single core);", self.ms_per_frame())?;
        writeln!(f, "{:.3}x (single core);", self.realtime_factor())?;
        writeln!(
            f,
            "{} submitted, {} resets{}",
            self.frames_submitted,
            self.resets,
            if self.lost { ", LOST" } else { "" }
        )?;
        write!(f, "======================")
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den.abs() > f64::EPSILON { num / den } else { 0.0 }
}

/// Process CPU time in seconds, summed over all threads.
#[cfg(unix)]
fn cpu_seconds() -> f64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_PROCESS_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return 0.0;
    }
    ts.tv_sec as f64 + ts.tv_nsec as f64 * 1e-9
}

#[cfg(not(unix))]
fn cpu_seconds() -> f64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_clamped_to_source() {
        assert_eq!(
            SessionRange::clamped(0, 100_000, 10),
            SessionRange { start: 0, end: 10 }
        );
        let r = SessionRange::clamped(12, 100_000, 10);
        assert!(r.is_empty());
        assert_eq!(r.len(), 0);
        assert_eq!(SessionRange::clamped(2, 5, 10).len(), 3);
    }

    #[test]
    fn test_summary_counts() {
        let mut session = Session::new(SessionRange { start: 0, end: 4 });
        for i in 0..3 {
            session.record_submission(i);
        }
        session.resets = 1;
        session.stop_timing();
        let summary = session.summary(2.0);
        assert_eq!(summary.frames_processed, 4);
        assert_eq!(summary.frames_submitted, 3);
        assert_eq!(summary.last_index, Some(2));
        assert!((summary.fps() - 2.0).abs() < 1e-12);
        assert!(summary.wall_ms >= 0.0 && summary.cpu_ms >= 0.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_cpu_clock_advances_with_work() {
        let before = cpu_seconds();
        let mut acc = 0u64;
        for i in 0..20_000_000u64 {
            acc = acc.wrapping_mul(6364136223846793005).wrapping_add(i);
        }
        std::hint::black_box(acc);
        let after = cpu_seconds();
        assert!(before > 0.0);
        assert!(after > before);
    }

    #[test]
    fn test_ratios_guard_zero() {
        let summary = RunSummary {
            frames_processed: 0,
            frames_submitted: 0,
            last_index: None,
            resets: 0,
            lost: false,
            seconds_processed: 0.0,
            wall_ms: 0.0,
            cpu_ms: 0.0,
        };
        assert_eq!(summary.fps(), 0.0);
        assert_eq!(summary.ms_per_frame(), 0.0);
        assert_eq!(summary.realtime_factor(), 0.0);
        assert!(summary.to_string().contains("0 Frames"));
    }
}
