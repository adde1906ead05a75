use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Process-wide origin for frame timestamps.
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds elapsed since the process frame epoch.
pub fn monotonic_nanos(at: Instant) -> u64 {
    let nanos = at.saturating_duration_since(*EPOCH).as_nanos();
    u64::try_from(nanos).unwrap_or(u64::MAX)
}

/// Frame timing snapshot.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Time elapsed since the previous frame tick, in seconds.
    pub dt: f32,

    /// Monotonic timestamp taken at the tick.
    pub now: Instant,

    /// `now` as nanoseconds since the process frame epoch.
    ///
    /// Strictly increasing across ticks of the same clock.
    pub timestamp_nanos: u64,

    /// Monotonic frame counter.
    pub frame_index: u64,
}

/// Frame clock producing `FrameTime` snapshots.
///
/// `FrameClock` is designed to be used per loop so that independent loops do
/// not share delta-time state.
///
/// Delta time is clamped to avoid pathological values when the application is paused
/// by the debugger, minimized, or stalls.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    last_timestamp: Option<u64>,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
}

impl FrameClock {
    /// Creates a new clock with default clamps.
    ///
    /// Clamp rationale:
    /// - minimum prevents zero-dt behavior from tight loops on some platforms
    /// - maximum prevents simulation explosions after long stalls
    pub fn new() -> Self {
        Self::with_clamps(
            Duration::from_micros(100), // 0.0001s
            Duration::from_millis(250), // 0.25s
        )
    }

    /// Creates a clock with custom delta-time clamps.
    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        Self {
            last: Instant::now(),
            last_timestamp: None,
            frame_index: 0,
            dt_min,
            dt_max,
        }
    }

    /// Resets the clock baseline.
    ///
    /// Useful when a loop resumes after being idle.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    /// Time left until the next frame boundary, given a frame `interval`.
    pub fn until_next_frame(&self, interval: Duration) -> Duration {
        interval.saturating_sub(self.last.elapsed())
    }

    /// Number of ticks produced so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Advances the clock and returns a new `FrameTime`.
    pub fn tick(&mut self) -> FrameTime {
        let now = Instant::now();
        let dt = now
            .saturating_duration_since(self.last)
            .clamp(self.dt_min, self.dt_max);

        self.last = now;

        let mut timestamp_nanos = monotonic_nanos(now);
        if let Some(prev) = self.last_timestamp {
            if timestamp_nanos <= prev {
                timestamp_nanos = prev.saturating_add(1);
            }
        }
        self.last_timestamp = Some(timestamp_nanos);

        let ft = FrameTime {
            dt: dt.as_secs_f32(),
            now,
            timestamp_nanos,
            frame_index: self.frame_index,
        };

        self.frame_index = self.frame_index.wrapping_add(1);

        ft
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
