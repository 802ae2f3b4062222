//! Scheduled events
//!
//! Every click and track start is recorded as an immutable event at an
//! absolute clock time. Once enqueued an event is never moved; the only
//! change allowed is cancellation, which silences it if it has not finished
//! sounding yet.

use std::fmt;

/// Identifier of a scheduled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which component scheduled an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    Metronome,
    Playback,
}

/// A metronome click
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Click {
    /// Beat index since the scheduler (or fixed-duration run) started
    pub beat: u64,
    /// First beat of the bar: louder and higher-pitched
    pub downbeat: bool,
    pub frequency: f32,
    pub gain: f32,
    pub duration_secs: f64,
}

/// A track voice starting to play
#[derive(Debug, Clone, PartialEq)]
pub struct TrackStart {
    pub track_id: String,
    /// Offset of the track within its batch
    pub offset_secs: f64,
    /// How long the voice sounds if left alone
    pub duration_secs: f64,
}

/// What an event does
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Click(Click),
    TrackStart(TrackStart),
}

impl EventKind {
    pub fn source(&self) -> EventSource {
        match self {
            EventKind::Click(_) => EventSource::Metronome,
            EventKind::TrackStart(_) => EventSource::Playback,
        }
    }

    /// Audible length of the event
    pub fn duration_secs(&self) -> f64 {
        match self {
            EventKind::Click(click) => click.duration_secs,
            EventKind::TrackStart(start) => start.duration_secs,
        }
    }
}

/// An event at a fixed absolute clock time
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub id: EventId,
    /// Target clock time in seconds
    pub at: f64,
    pub kind: EventKind,
    /// Clock time at which the event was cut off, if it was
    pub stopped_at: Option<f64>,
}

impl ScheduledEvent {
    /// Clock time at which the event stops sounding
    pub fn end(&self) -> f64 {
        let natural = self.at + self.kind.duration_secs();
        match self.stopped_at {
            Some(stop) => stop.min(natural),
            None => natural,
        }
    }

    /// Whether the event was cancelled before it started
    pub fn is_cancelled(&self) -> bool {
        matches!(self.stopped_at, Some(stop) if stop <= self.at)
    }

    /// Whether the event is sounding at `time`
    pub fn is_sounding(&self, time: f64) -> bool {
        time >= self.at && time < self.end()
    }

    /// Whether the event has not started yet and was not cancelled
    pub fn is_pending(&self, now: f64) -> bool {
        self.at > now && !self.is_cancelled()
    }
}

/// Ordered store of scheduled events
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<ScheduledEvent>,
    next_id: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event at an absolute clock time
    pub fn enqueue(&mut self, at: f64, kind: EventKind) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.events.push(ScheduledEvent {
            id,
            at,
            kind,
            stopped_at: None,
        });
        id
    }

    /// Look up an event
    pub fn get(&self, id: EventId) -> Option<&ScheduledEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Stop one event at `now`; returns false if it had already ended
    ///
    /// Stopping an event twice is tolerated.
    pub fn stop(&mut self, id: EventId, now: f64) -> bool {
        match self.events.iter_mut().find(|e| e.id == id) {
            Some(event) if event.stopped_at.is_none() && event.end() > now => {
                event.stopped_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Stop every event from `source` that has not finished sounding
    ///
    /// Returns the number of events affected.
    pub fn stop_source(&mut self, source: EventSource, now: f64) -> usize {
        let mut count = 0;
        for event in self
            .events
            .iter_mut()
            .filter(|e| e.kind.source() == source)
        {
            if event.stopped_at.is_none() && event.end() > now {
                event.stopped_at = Some(now);
                count += 1;
            }
        }
        count
    }

    /// Events from `source` that have not started yet
    pub fn pending(&self, source: EventSource, now: f64) -> impl Iterator<Item = &ScheduledEvent> {
        self.events
            .iter()
            .filter(move |e| e.kind.source() == source && e.is_pending(now))
    }

    /// Most recently enqueued, non-cancelled event from `source`
    pub fn last_of(&self, source: EventSource) -> Option<&ScheduledEvent> {
        self.events
            .iter()
            .rev()
            .find(|e| e.kind.source() == source && !e.is_cancelled())
    }

    /// Events overlapping the window `[from, to)`
    pub fn overlapping(&self, from: f64, to: f64) -> impl Iterator<Item = &ScheduledEvent> {
        self.events
            .iter()
            .filter(move |e| e.at < to && e.end() > from)
    }

    /// All events in enqueue order
    pub fn events(&self) -> &[ScheduledEvent] {
        &self.events
    }

    /// Clicks in enqueue order (cancelled ones included)
    pub fn clicks(&self) -> impl Iterator<Item = (&ScheduledEvent, &Click)> {
        self.events.iter().filter_map(|e| match &e.kind {
            EventKind::Click(click) => Some((e, click)),
            _ => None,
        })
    }

    /// Drop events that finished before `before`
    pub fn prune(&mut self, before: f64) -> usize {
        let len = self.events.len();
        self.events.retain(|e| e.end() >= before);
        len - self.events.len()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
