//! Metronome scheduler
//!
//! Look-ahead scheduling: a coarse periodic poll (every `lookahead_ms` of
//! wall time) enqueues every click whose target time falls inside a short
//! audio-clock horizon. Timing accuracy comes from the absolute target
//! times, not from the poll firing on time.
//!
//! Clicks already enqueued are never moved. A tempo change only affects
//! clicks that have not been enqueued yet.

use std::fmt;
use std::time::Duration;

use log::{debug, info};

use crate::config::{ClickConfig, EngineConfig};
use crate::engine::timeline::{Click, EventKind, EventQueue, EventSource};

/// Lowest accepted tempo
pub const MIN_BPM: f64 = 1.0;

/// Highest accepted tempo
pub const MAX_BPM: f64 = 1000.0;

/// Clamp a tempo into `[MIN_BPM, MAX_BPM]`; NaN maps to `MIN_BPM`
pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return MIN_BPM;
    }
    bpm.clamp(MIN_BPM, MAX_BPM)
}

/// Seconds between beats at `bpm` (clamped)
#[inline]
pub fn seconds_per_beat(bpm: f64) -> f64 {
    60.0 / clamp_bpm(bpm)
}

/// Number of clicks in a fixed-duration run: `ceil(duration / spb) + 1`
pub fn fixed_beat_count(bpm: f64, duration_secs: f64) -> u64 {
    let duration = if duration_secs.is_finite() {
        duration_secs.max(0.0)
    } else {
        0.0
    };
    (duration / seconds_per_beat(bpm)).ceil() as u64 + 1
}

/// Scheduler states; there is no paused state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetronomeState {
    #[default]
    Stopped,
    Scheduling,
}

impl fmt::Display for MetronomeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetronomeState::Stopped => write!(f, "stopped"),
            MetronomeState::Scheduling => write!(f, "scheduling"),
        }
    }
}

/// Look-ahead metronome scheduler
#[derive(Debug, Clone)]
pub struct Metronome {
    state: MetronomeState,
    bpm: f64,
    /// Beats since start; only used to tell downbeats apart
    beat_index: u64,
    /// Absolute clock time of the next click not yet enqueued
    next_click_time: f64,
    schedule_ahead: f64,
    start_margin: f64,
    poll_interval: Duration,
    beats_per_bar: u32,
    click: ClickConfig,
}

impl Metronome {
    /// Create a stopped metronome at 120 BPM
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: MetronomeState::Stopped,
            bpm: 120.0,
            beat_index: 0,
            next_click_time: 0.0,
            schedule_ahead: config.schedule_ahead_secs,
            start_margin: config.start_margin_secs,
            poll_interval: Duration::from_millis(config.lookahead_ms),
            beats_per_bar: config.beats_per_bar.max(1),
            click: config.click.clone(),
        }
    }

    // ========================================================================
    // Continuous mode
    // ========================================================================

    /// Start scheduling at `bpm`
    ///
    /// Resets the beat counter, places the first click a safety margin after
    /// `now`, and runs one scheduling pass immediately. Returns the time of
    /// the first click, or None if the scheduler was already running (the
    /// tempo is still updated in that case).
    pub fn start(&mut self, bpm: f64, now: f64, queue: &mut EventQueue) -> Option<f64> {
        if self.state == MetronomeState::Scheduling {
            self.set_bpm(bpm, now);
            debug!("[METRONOME] Already scheduling");
            return None;
        }

        self.bpm = clamp_bpm(bpm);
        self.state = MetronomeState::Scheduling;
        self.beat_index = 0;
        self.next_click_time = now + self.start_margin;
        let first_click = self.next_click_time;

        info!(
            "[METRONOME] Start at {:.1} BPM, first click at {:.3}s",
            self.bpm, first_click
        );
        self.tick(now, queue);
        Some(first_click)
    }

    /// One polling pass: enqueue every click due within the horizon
    ///
    /// Returns the number of clicks enqueued. A no-op when stopped, so a
    /// poll racing with `stop()` is harmless.
    pub fn tick(&mut self, now: f64, queue: &mut EventQueue) -> usize {
        if self.state != MetronomeState::Scheduling {
            return 0;
        }

        let interval = seconds_per_beat(self.bpm);
        let horizon = now + self.schedule_ahead;
        let mut enqueued = 0;

        while self.next_click_time < horizon {
            let click = self.click_for(self.beat_index);
            queue.enqueue(self.next_click_time, EventKind::Click(click));
            debug!(
                "[METRONOME] Beat {} at {:.4}s{}",
                self.beat_index,
                self.next_click_time,
                if click.downbeat { " (downbeat)" } else { "" }
            );
            self.next_click_time += interval;
            self.beat_index += 1;
            enqueued += 1;
        }

        enqueued
    }

    /// Change tempo, preserving the relative position within the current beat
    ///
    /// While stopped this only stores the tempo.
    pub fn set_bpm(&mut self, bpm: f64, now: f64) {
        let new_bpm = clamp_bpm(bpm);
        if new_bpm == self.bpm {
            return;
        }

        if self.state == MetronomeState::Scheduling {
            let old_interval = 60.0 / self.bpm;
            let new_interval = 60.0 / new_bpm;
            let last_beat = self.next_click_time - old_interval;
            let elapsed = now - last_beat;

            self.next_click_time = if elapsed < 0.0 {
                // The last enqueued click has not sounded yet; keep it and
                // follow it at the new tempo.
                last_beat + new_interval
            } else {
                let progress = (elapsed / old_interval).clamp(0.0, 1.0);
                now + (1.0 - progress) * new_interval
            };

            debug!(
                "[METRONOME] Tempo {:.1} -> {:.1} BPM, next click at {:.4}s",
                self.bpm, new_bpm, self.next_click_time
            );
        }

        self.bpm = new_bpm;
    }

    /// Stop scheduling and silence every click not yet sounded
    ///
    /// Returns false when there was nothing to stop.
    pub fn stop(&mut self, now: f64, queue: &mut EventQueue) -> bool {
        let was_scheduling = self.state == MetronomeState::Scheduling;
        self.state = MetronomeState::Stopped;
        let silenced = queue.stop_source(EventSource::Metronome, now);

        if !was_scheduling && silenced == 0 {
            return false;
        }

        info!("[METRONOME] Stopped, {} click(s) silenced", silenced);
        true
    }

    // ========================================================================
    // Fixed-duration mode
    // ========================================================================

    /// Schedule a complete click run of `duration_secs` up front
    ///
    /// Used for count-ins and previews; no polling is involved. Returns the
    /// start time.
    pub fn play_for(
        &mut self,
        bpm: f64,
        duration_secs: f64,
        start_at: Option<f64>,
        now: f64,
        queue: &mut EventQueue,
    ) -> f64 {
        let interval = seconds_per_beat(bpm);
        let start = start_at.unwrap_or(now + self.start_margin);
        let total = fixed_beat_count(bpm, duration_secs);

        for beat in 0..total {
            let click = self.click_for(beat);
            queue.enqueue(start + beat as f64 * interval, EventKind::Click(click));
        }

        info!(
            "[METRONOME] Fixed run: {} clicks at {:.1} BPM from {:.3}s",
            total,
            clamp_bpm(bpm),
            start
        );
        start
    }

    fn click_for(&self, beat: u64) -> Click {
        let downbeat = beat % self.beats_per_bar as u64 == 0;
        let tone = if downbeat {
            self.click.downbeat
        } else {
            self.click.regular
        };
        Click {
            beat,
            downbeat,
            frequency: tone.frequency,
            gain: tone.gain,
            duration_secs: self.click.duration_secs,
        }
    }

    // ========================================================================
    // State Queries
    // ========================================================================

    pub fn state(&self) -> MetronomeState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == MetronomeState::Scheduling
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn beat_index(&self) -> u64 {
        self.beat_index
    }

    pub fn next_click_time(&self) -> f64 {
        self.next_click_time
    }

    /// Wall-clock period at which `tick` should be driven
    pub fn next_poll_in(&self) -> Duration {
        self.poll_interval
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn metronome() -> (Metronome, EventQueue) {
        (Metronome::new(&EngineConfig::default()), EventQueue::new())
    }

    /// Drive the scheduler like the polling loop would, up to `until`
    fn run(metronome: &mut Metronome, queue: &mut EventQueue, from: f64, until: f64) -> f64 {
        let step = metronome.next_poll_in().as_secs_f64();
        let mut now = from;
        while now + step <= until + 1e-9 {
            now += step;
            metronome.tick(now, queue);
        }
        now
    }

    fn click_times(queue: &EventQueue) -> Vec<f64> {
        queue
            .clicks()
            .filter(|(e, _)| !e.is_cancelled())
            .map(|(e, _)| e.at)
            .collect()
    }

    #[test]
    fn test_default_state_is_stopped() {
        let (metronome, _) = metronome();
        assert_eq!(metronome.state(), MetronomeState::Stopped);
        assert_eq!(metronome.next_poll_in(), Duration::from_millis(25));
    }

    #[test]
    fn test_start_schedules_first_click_after_margin() {
        let (mut metronome, mut queue) = metronome();
        let first = metronome.start(120.0, 10.0, &mut queue).unwrap();

        assert_abs_diff_eq!(first, 10.05, epsilon = 1e-9);
        assert!(metronome.is_running());
        assert_eq!(click_times(&queue), vec![first]);
    }

    #[test]
    fn test_start_twice_keeps_schedule() {
        let (mut metronome, mut queue) = metronome();
        metronome.start(120.0, 0.0, &mut queue);
        assert!(metronome.start(90.0, 0.01, &mut queue).is_none());
        assert_eq!(metronome.bpm(), 90.0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_tick_when_stopped_is_noop() {
        let (mut metronome, mut queue) = metronome();
        assert_eq!(metronome.tick(1.0, &mut queue), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_steady_state_interval() {
        for bpm in [30.0, 60.0, 97.0, 120.0, 240.0] {
            let (mut metronome, mut queue) = metronome();
            metronome.start(bpm, 0.0, &mut queue);
            run(&mut metronome, &mut queue, 0.0, 10.0);

            let times = click_times(&queue);
            assert!(times.len() >= 3);
            for pair in times.windows(2) {
                assert_abs_diff_eq!(pair[1] - pair[0], 60.0 / bpm, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_clicks_stay_within_horizon() {
        let (mut metronome, mut queue) = metronome();
        metronome.start(120.0, 0.0, &mut queue);
        let now = run(&mut metronome, &mut queue, 0.0, 3.0);
        let last = *click_times(&queue).last().unwrap();
        assert!(last < now + 0.1);
    }

    #[test]
    fn test_downbeat_every_four_beats() {
        let (mut metronome, mut queue) = metronome();
        metronome.start(240.0, 0.0, &mut queue);
        run(&mut metronome, &mut queue, 0.0, 3.0);

        for (_, click) in queue.clicks() {
            assert_eq!(click.downbeat, click.beat % 4 == 0);
            let expected = if click.downbeat { 1760.0 } else { 880.0 };
            assert_eq!(click.frequency, expected);
        }
    }

    #[test]
    fn test_tempo_change_preserves_beat_position() {
        let (mut metronome, mut queue) = metronome();
        metronome.start(60.0, 0.0, &mut queue);
        // First click at 0.05, next unscheduled beat at 1.05
        run(&mut metronome, &mut queue, 0.0, 0.55);

        // Halfway through the beat, switch to 120 BPM
        metronome.set_bpm(120.0, 0.55);
        assert_abs_diff_eq!(metronome.next_click_time(), 0.55 + 0.5 * 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_tempo_change_with_pending_click() {
        let (mut metronome, mut queue) = metronome();
        metronome.start(120.0, 0.0, &mut queue);
        // Click at 0.05 is enqueued but still in the future at t=0.01
        metronome.set_bpm(60.0, 0.01);
        assert_abs_diff_eq!(metronome.next_click_time(), 1.05, epsilon = 1e-9);
        assert!(metronome.next_click_time() > 0.01);
    }

    #[test]
    fn test_tempo_change_while_stopped_only_stores() {
        let (mut metronome, _) = metronome();
        metronome.set_bpm(90.0, 5.0);
        assert_eq!(metronome.bpm(), 90.0);
        assert_eq!(metronome.next_click_time(), 0.0);
    }

    #[test]
    fn test_bpm_is_clamped() {
        let (mut metronome, _) = metronome();
        metronome.set_bpm(0.0, 0.0);
        assert_eq!(metronome.bpm(), MIN_BPM);
        metronome.set_bpm(1.0e9, 0.0);
        assert_eq!(metronome.bpm(), MAX_BPM);
    }

    #[test]
    fn test_stop_cancels_pending_clicks() {
        let (mut metronome, mut queue) = metronome();
        metronome.start(120.0, 0.0, &mut queue);
        assert!(metronome.stop(0.0, &mut queue));
        assert_eq!(queue.pending(EventSource::Metronome, 0.0).count(), 0);
        assert!(!metronome.is_running());
    }

    #[test]
    fn test_double_stop_is_noop() {
        let (mut metronome, mut queue) = metronome();
        metronome.start(120.0, 0.0, &mut queue);
        assert!(metronome.stop(0.0, &mut queue));
        assert!(!metronome.stop(0.1, &mut queue));
        assert!(!metronome.stop(0.2, &mut queue));
    }

    #[test]
    fn test_restart_resets_beat_index() {
        let (mut metronome, mut queue) = metronome();
        metronome.start(240.0, 0.0, &mut queue);
        run(&mut metronome, &mut queue, 0.0, 1.0);
        metronome.stop(1.0, &mut queue);

        metronome.start(240.0, 1.0, &mut queue);
        assert_eq!(metronome.beat_index(), 1);
        let (_, last) = queue.clicks().last().unwrap();
        assert_eq!(last.beat, 0);
        assert!(last.downbeat);
    }

    #[test]
    fn test_fixed_beat_count() {
        assert_eq!(fixed_beat_count(120.0, 2.0), 5);
        assert_eq!(fixed_beat_count(120.0, 2.1), 6);
        assert_eq!(fixed_beat_count(60.0, 0.0), 1);
        assert_eq!(fixed_beat_count(60.0, -3.0), 1);
    }

    #[test]
    fn test_play_for_schedules_everything_up_front() {
        let (mut metronome, mut queue) = metronome();
        let start = metronome.play_for(120.0, 2.0, Some(3.0), 0.0, &mut queue);

        assert_eq!(start, 3.0);
        assert_eq!(
            click_times(&queue),
            vec![3.0, 3.5, 4.0, 4.5, 5.0]
        );
        assert!(!metronome.is_running());
    }

    #[test]
    fn test_stop_cancels_fixed_run() {
        let (mut metronome, mut queue) = metronome();
        metronome.play_for(120.0, 2.0, None, 0.0, &mut queue);
        assert!(metronome.stop(0.6, &mut queue));
        // 0.05 and 0.55 sounded; the rest are cancelled
        let times = click_times(&queue);
        assert_eq!(times.len(), 2);
        assert_abs_diff_eq!(times[1], 0.55, epsilon = 1e-9);
    }
}
