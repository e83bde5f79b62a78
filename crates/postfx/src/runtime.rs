use std::time::{Duration, Instant};

/// Snapshot of the time state supplied to time-varying uniforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Elapsed wall-clock or simulated time in seconds.
    pub seconds: f32,
    /// Monotonic frame counter for the running session.
    pub frame_index: u64,
}

impl TimeSample {
    pub fn new(seconds: f32, frame_index: u64) -> Self {
        Self {
            seconds,
            frame_index,
        }
    }
}

/// Abstraction over where time values originate from.
pub trait TimeSource: Send {
    /// Resets the source to its initial state.
    fn reset(&mut self);
    /// Produces a time sample for the next frame.
    fn sample(&mut self) -> TimeSample;
}

/// Time source backed by the system monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
    frame: u64,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            frame: 0,
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.origin = Instant::now();
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let sample = TimeSample::new(self.origin.elapsed().as_secs_f32(), self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Time source that advances by a fixed step per frame, starting at `start`.
///
/// A zero step yields a frozen clock, which keeps headless output reproducible.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    start: f32,
    step: f32,
    frame: u64,
}

impl FixedTimeSource {
    pub fn new(time: f32) -> Self {
        Self::stepped(time, 0.0)
    }

    pub fn stepped(start: f32, step: f32) -> Self {
        Self {
            start,
            step,
            frame: 0,
        }
    }

    pub fn time(&self) -> f32 {
        self.start
    }
}

impl TimeSource for FixedTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let sample = TimeSample::new(self.start + self.step * self.frame as f32, self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

/// Caps how often the driving loop asks for a frame.
#[derive(Debug, Clone)]
pub struct FramePacer {
    target_interval: Option<Duration>,
    accumulator: Duration,
    last_tick: Option<Instant>,
}

impl FramePacer {
    /// `None`, a non-positive fps or one whose interval overflows a `Duration` means uncapped.
    pub fn new(target_fps: Option<f32>) -> Self {
        let target_interval = target_fps
            .filter(|fps| *fps > 0.0)
            .and_then(|fps| Duration::try_from_secs_f32(1.0 / fps).ok());
        Self {
            target_interval,
            accumulator: Duration::ZERO,
            last_tick: None,
        }
    }

    pub fn target_interval(&self) -> Option<Duration> {
        self.target_interval
    }

    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
        self.last_tick = None;
    }

    pub fn should_render(&mut self) -> bool {
        self.should_render_at(Instant::now())
    }

    pub fn should_render_at(&mut self, now: Instant) -> bool {
        match (self.target_interval, self.last_tick) {
            (Some(interval), Some(last)) => {
                let delta = now.saturating_duration_since(last);
                self.last_tick = Some(now);
                self.accumulator = self.accumulator.saturating_add(delta);
                if self.accumulator + Duration::from_micros(250) < interval {
                    false
                } else {
                    self.accumulator = self.accumulator.saturating_sub(interval);
                    true
                }
            }
            _ => {
                self.last_tick = Some(now);
                true
            }
        }
    }

    /// Time left until the next frame is due, for sleeping between ticks.
    pub fn until_next(&self) -> Duration {
        match self.target_interval {
            Some(interval) => interval.saturating_sub(self.accumulator),
            None => Duration::ZERO,
        }
    }
}

/// Running counters reported by the frame orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub scene_draws: u64,
    pub post_draws: u64,
}

impl RenderStats {
    pub fn total_draws(&self) -> u64 {
        self.scene_draws + self.post_draws
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_source_steps_per_frame() {
        let mut source = FixedTimeSource::stepped(1.0, 0.5);
        assert_eq!(source.sample(), TimeSample::new(1.0, 0));
        assert_eq!(source.sample(), TimeSample::new(1.5, 1));
        source.reset();
        assert_eq!(source.sample().seconds, 1.0);
        assert_eq!(FixedTimeSource::new(3.0).sample().seconds, 3.0);
    }

    #[test]
    fn pacer_limits_rate() {
        let mut pacer = FramePacer::new(Some(10.0));
        let start = Instant::now();
        assert!(pacer.should_render_at(start));
        assert!(!pacer.should_render_at(start + Duration::from_millis(20)));
        assert!(pacer.should_render_at(start + Duration::from_millis(101)));
    }

    #[test]
    fn uncapped_pacer_always_renders() {
        let mut pacer = FramePacer::new(Some(0.0));
        let now = Instant::now();
        assert!(pacer.should_render_at(now));
        assert!(pacer.should_render_at(now));
        assert_eq!(pacer.until_next(), Duration::ZERO);
    }

    #[test]
    fn vanishing_fps_leaves_pacer_uncapped() {
        assert_eq!(FramePacer::new(Some(1e-30)).target_interval(), None);
        assert_eq!(FramePacer::new(Some(f32::NAN)).target_interval(), None);
        assert_eq!(
            FramePacer::new(Some(4.0)).target_interval(),
            Some(Duration::from_millis(250))
        );
    }
}
