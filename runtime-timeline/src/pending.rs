//! Per-track reordering of timeline events
//!
//! Runtimes usually emit the events of a track in timestamp order, but the
//! transport may shuffle them a little. Events are held back in a small
//! min-heap per track and released in timestamp order once more than
//! `window` of them are waiting, which tolerates bounded reordering.

use crate::{
    anomaly::{Anomaly, Diagnostics},
    ctf::Timestamp,
    event::{TraceEvent, TrackId},
};
use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashMap},
};

/// Event waiting to be released
#[derive(Debug)]
struct PendingEvent {
    /// Arrival order, breaks timestamp ties
    seq: u64,

    /// Held event
    event: TraceEvent,
}
//
impl PartialEq for PendingEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
//
impl Eq for PendingEvent {}
//
impl PartialOrd for PendingEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
//
impl Ord for PendingEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Timestamps were checked to be finite during normalization
        self.event
            .timestamp()
            .total_cmp(&other.event.timestamp())
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Events held back for one track
#[derive(Debug, Default)]
struct TrackQueue {
    /// Min-heap of held events
    heap: BinaryHeap<Reverse<PendingEvent>>,

    /// Latest timestamp released so far
    watermark: Option<Timestamp>,
}
//
impl TrackQueue {
    /// Release the earliest held event
    fn pop(&mut self) -> Option<TraceEvent> {
        let Reverse(PendingEvent { event, .. }) = self.heap.pop()?;
        let ts = event.timestamp();
        self.watermark = Some(self.watermark.map_or(ts, |w| w.max(ts)));
        Some(event)
    }
}

/// Bounded per-track reorder buffer
#[derive(Debug)]
pub struct PendingEvents {
    /// Number of events that each track may hold back
    window: usize,

    /// Held events, by track
    tracks: HashMap<TrackId, TrackQueue>,

    /// Arrival counter
    next_seq: u64,
}
//
impl PendingEvents {
    /// Set up a buffer which holds back up to `window` events per track
    ///
    /// A window of 0 releases every event as soon as it arrives.
    pub fn new(window: usize) -> Self {
        Self {
            window,
            tracks: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Number of events that each track may hold back
    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of events currently held back, across all tracks
    pub fn len(&self) -> usize {
        self.tracks.values().map(|queue| queue.heap.len()).sum()
    }

    /// Truth that no event is held back
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add an event, returning the events of its track which can be released
    ///
    /// Events that arrive after later events of their track were already
    /// released cannot be put back in order. They are reported as late and
    /// released right away, so that the tree builder can still make the
    /// best of them.
    pub fn push(&mut self, event: TraceEvent, diagnostics: &mut Diagnostics) -> Vec<TraceEvent> {
        let track = event.track();
        let queue = self.tracks.entry(track).or_default();
        if let Some(watermark) = queue.watermark.filter(|&w| event.timestamp() < w) {
            diagnostics.record(Anomaly::LateEvent {
                track,
                timestamp: event.timestamp(),
                watermark,
            });
            return vec![event];
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        queue.heap.push(Reverse(PendingEvent { seq, event }));

        let mut released = Vec::new();
        while queue.heap.len() > self.window {
            let Some(event) = queue.pop() else {
                break;
            };
            released.push(event);
        }
        released
    }

    /// Release every held event, track by track, in timestamp order
    pub fn flush(&mut self) -> Vec<TraceEvent> {
        let mut tracks = self.tracks.keys().copied().collect::<Vec<_>>();
        tracks.sort_unstable();
        let mut released = Vec::with_capacity(self.len());
        for track in tracks {
            if let Some(queue) = self.tracks.get_mut(&track) {
                while let Some(event) = queue.pop() {
                    released.push(event);
                }
            }
        }
        released
    }

    /// Discard all held events and forget what was released
    pub fn reset(&mut self) -> usize {
        let discarded = self.len();
        self.tracks.clear();
        discarded
    }
}
