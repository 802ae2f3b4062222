//! Clock source
//!
//! All scheduling decisions are made against a monotonic audio-clock time
//! in seconds, never against wall-clock time. The platform clock may start
//! suspended until a user gesture; resuming it is best-effort.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use log::{debug, warn};

/// Lifecycle state of an audio clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockState {
    /// Created but not yet allowed to run
    #[default]
    Suspended,
    /// Time is advancing
    Running,
    /// Disposed; time is frozen
    Closed,
}

impl fmt::Display for ClockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockState::Suspended => write!(f, "suspended"),
            ClockState::Running => write!(f, "running"),
            ClockState::Closed => write!(f, "closed"),
        }
    }
}

/// Result of a resume attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Running,
    /// The platform refused; audio has not started yet
    StillSuspended,
}

/// A sample-accurate, monotonic time base
pub trait Clock {
    /// Current time in seconds. Never decreases.
    fn now(&self) -> f64;

    /// Try to move a suspended clock into the running state
    fn resume(&mut self) -> ResumeOutcome;

    /// Current lifecycle state
    fn state(&self) -> ClockState;

    /// Freeze the clock for good
    fn close(&mut self);
}

// ============================================================================
// System clock
// ============================================================================

/// Clock backed by `std::time::Instant`
///
/// Time only advances while running; a suspended clock reports the time at
/// which it was suspended.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
    /// Seconds accumulated before the current running segment
    banked: f64,
    running_since: Option<Instant>,
    state: ClockState,
}

impl SystemClock {
    /// Create a suspended clock
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            banked: 0.0,
            running_since: None,
            state: ClockState::Suspended,
        }
    }

    /// Create a clock that is already running
    pub fn running() -> Self {
        let mut clock = Self::new();
        clock.resume();
        clock
    }

    /// Time elapsed since the clock was created, including suspended periods
    pub fn wall_elapsed(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        match self.running_since {
            Some(since) => self.banked + since.elapsed().as_secs_f64(),
            None => self.banked,
        }
    }

    fn resume(&mut self) -> ResumeOutcome {
        match self.state {
            ClockState::Running => ResumeOutcome::Running,
            ClockState::Suspended => {
                self.running_since = Some(Instant::now());
                self.state = ClockState::Running;
                ResumeOutcome::Running
            }
            ClockState::Closed => ResumeOutcome::StillSuspended,
        }
    }

    fn state(&self) -> ClockState {
        self.state
    }

    fn close(&mut self) {
        self.banked = self.now();
        self.running_since = None;
        self.state = ClockState::Closed;
    }
}

// ============================================================================
// Manual clock
// ============================================================================

/// Explicitly advanced clock for tests and offline rendering
///
/// Clones share the same time base, so a test can keep a handle while the
/// engine owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Rc<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: Cell<f64>,
    state: Cell<ClockState>,
    allow_resume: Cell<bool>,
}

impl ManualClock {
    /// Create a running clock at time zero
    pub fn new() -> Self {
        Self::with_state(ClockState::Running, true)
    }

    /// Create a suspended clock; `allow_resume` simulates the platform
    /// gesture policy
    pub fn suspended(allow_resume: bool) -> Self {
        Self::with_state(ClockState::Suspended, allow_resume)
    }

    fn with_state(state: ClockState, allow_resume: bool) -> Self {
        Self {
            inner: Rc::new(ManualState {
                now: Cell::new(0.0),
                state: Cell::new(state),
                allow_resume: Cell::new(allow_resume),
            }),
        }
    }

    /// Move time forward by `secs` (negative values are ignored)
    pub fn advance(&self, secs: f64) {
        if secs > 0.0 && self.inner.state.get() == ClockState::Running {
            self.inner.now.set(self.inner.now.get() + secs);
        }
    }

    /// Jump to an absolute time; earlier times are ignored
    pub fn set(&self, time: f64) {
        if time > self.inner.now.get() && self.inner.state.get() == ClockState::Running {
            self.inner.now.set(time);
        }
    }

    /// Change whether a later `resume` will be honoured
    pub fn set_allow_resume(&self, allow: bool) {
        self.inner.allow_resume.set(allow);
    }

    /// Box a shared handle as a clock factory for `ClockSource`
    pub fn factory(&self) -> ClockFactory {
        let handle = self.clone();
        Box::new(move || -> Box<dyn Clock> { Box::new(handle) })
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.inner.now.get()
    }

    fn resume(&mut self) -> ResumeOutcome {
        match self.inner.state.get() {
            ClockState::Running => ResumeOutcome::Running,
            ClockState::Suspended if self.inner.allow_resume.get() => {
                self.inner.state.set(ClockState::Running);
                ResumeOutcome::Running
            }
            _ => ResumeOutcome::StillSuspended,
        }
    }

    fn state(&self) -> ClockState {
        self.inner.state.get()
    }

    fn close(&mut self) {
        self.inner.state.set(ClockState::Closed);
    }
}

// ============================================================================
// Lazy clock source
// ============================================================================

/// Factory used to instantiate the platform clock on first use
pub type ClockFactory = Box<dyn FnOnce() -> Box<dyn Clock>>;

fn system_clock() -> Box<dyn Clock> {
    Box::new(SystemClock::new())
}

/// Lazily instantiated clock
///
/// The underlying clock is created on the first `now()` or `resume()` call
/// and reused afterwards.
pub struct ClockSource {
    factory: Option<ClockFactory>,
    clock: Option<Box<dyn Clock>>,
    /// Highest time ever reported, so readings never run backward
    high_water: Cell<f64>,
}

impl ClockSource {
    /// Create a clock source that will call `factory` on first use
    pub fn new(factory: ClockFactory) -> Self {
        Self {
            factory: Some(factory),
            clock: None,
            high_water: Cell::new(0.0),
        }
    }

    /// Wrap an existing clock (already instantiated)
    pub fn from_clock(clock: Box<dyn Clock>) -> Self {
        Self {
            factory: None,
            clock: Some(clock),
            high_water: Cell::new(0.0),
        }
    }

    /// Whether the underlying clock has been created yet
    pub fn is_initialised(&self) -> bool {
        self.clock.is_some()
    }

    fn ensure(&mut self) -> &mut Box<dyn Clock> {
        if self.clock.is_none() {
            let factory = self.factory.take().unwrap_or_else(|| Box::new(system_clock));
            debug!("[CLOCK] Instantiating audio clock");
            self.clock = Some(factory());
        }
        self.clock.get_or_insert_with(system_clock)
    }

    /// Current time in seconds, instantiating the clock if needed
    pub fn now(&mut self) -> f64 {
        let now = self.ensure().now();
        self.observe(now)
    }

    /// Current time without instantiating; 0.0 before first use
    pub fn peek(&self) -> f64 {
        match &self.clock {
            Some(clock) => self.observe(clock.now()),
            None => self.high_water.get(),
        }
    }

    fn observe(&self, now: f64) -> f64 {
        let monotonic = now.max(self.high_water.get());
        self.high_water.set(monotonic);
        monotonic
    }

    /// Try to unblock a suspended clock
    ///
    /// Never fails; a refused resume is logged and reported as
    /// `StillSuspended` so callers can treat audio as "not yet started".
    pub fn resume(&mut self) -> ResumeOutcome {
        let outcome = self.ensure().resume();
        if outcome == ResumeOutcome::StillSuspended {
            warn!("[CLOCK] Resume refused by platform; audio not started yet");
        }
        outcome
    }

    /// Lifecycle state; `Suspended` before first use
    pub fn state(&self) -> ClockState {
        self.clock
            .as_ref()
            .map(|clock| clock.state())
            .unwrap_or(ClockState::Suspended)
    }

    /// Mutable access to the underlying clock (instantiating it)
    pub fn clock_mut(&mut self) -> &mut dyn Clock {
        self.ensure().as_mut()
    }

    /// Close the underlying clock, if it was ever created
    pub fn close(&mut self) {
        if let Some(clock) = self.clock.as_mut() {
            clock.close();
        }
    }
}

impl fmt::Debug for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockSource")
            .field("initialised", &self.is_initialised())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_never_runs_backward() {
        let clock = ManualClock::new();
        clock.advance(1.5);
        clock.set(0.5);
        clock.advance(-1.0);
        assert_eq!(clock.now(), 1.5);
    }

    #[test]
    fn test_suspended_manual_clock_does_not_advance() {
        let clock = ManualClock::suspended(true);
        clock.advance(1.0);
        assert_eq!(clock.now(), 0.0);
        let mut engine_handle = clock.clone();
        assert_eq!(engine_handle.resume(), ResumeOutcome::Running);
        clock.advance(1.0);
        assert_eq!(clock.now(), 1.0);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::running();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert_eq!(clock.state(), ClockState::Running);
    }

    #[test]
    fn test_system_clock_frozen_while_suspended() {
        let clock = SystemClock::new();
        assert_eq!(clock.now(), 0.0);
        assert_eq!(clock.state(), ClockState::Suspended);
    }

    #[test]
    fn test_clock_source_is_lazy_and_idempotent() {
        let created = Rc::new(Cell::new(0));
        let counter = created.clone();
        let mut source = ClockSource::new(Box::new(move || -> Box<dyn Clock> {
            counter.set(counter.get() + 1);
            Box::new(ManualClock::new())
        }));

        assert!(!source.is_initialised());
        assert_eq!(source.peek(), 0.0);

        source.now();
        source.now();
        source.resume();
        assert!(source.is_initialised());
        assert_eq!(created.get(), 1);
    }

    #[test]
    fn test_clock_source_resume_refusal_is_silent() {
        let mut source = ClockSource::new(Box::new(|| -> Box<dyn Clock> {
            Box::new(ManualClock::suspended(false))
        }));
        assert_eq!(source.resume(), ResumeOutcome::StillSuspended);
        assert_eq!(source.state(), ClockState::Suspended);
    }
}
