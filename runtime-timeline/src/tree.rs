//! Caller<->callee tree of timeline spans, built one track at a time

use crate::{
    anomaly::{Anomaly, Diagnostics},
    ctf::{events::AsyncId, Duration, Timestamp},
    event::{EventArgs, Phase, TraceEvent, TrackId},
};
use log::trace;
use std::collections::HashMap;

/// Named, timed interval of a track, possibly containing nested spans
#[derive(Clone, Debug, PartialEq)]
pub struct EventNode {
    /// Name of the span
    name: Box<str>,

    /// Categories of the span
    category: Box<str>,

    /// Track which the span was recorded on
    track: TrackId,

    /// When the span started
    start: Timestamp,

    /// When the span ended, None while the span is open
    end: Option<Timestamp>,

    /// Known end of a complete span which may still receive children
    expected_end: Option<Timestamp>,

    /// Nested spans, in order of arrival
    children: Vec<EventNode>,

    /// Arguments of the begin event, overriden by those of the end event
    args: EventArgs,

    /// Identifier of the async operation, for async spans
    async_id: Option<AsyncId>,

    /// Closed because an enclosing span ended first
    forced_close: bool,

    /// Some child escapes the time range of this span
    nesting_violation: bool,
}
//
impl EventNode {
    /// Start an open span from its opening event
    fn open(event: TraceEvent) -> Self {
        let name = event.name().unwrap_or_default().into();
        let category = event.category().into();
        let track = event.track();
        let start = event.timestamp();
        let expected_end = event.duration().map(|duration| start + duration);
        let async_id = event.async_id().cloned();
        Self {
            name,
            category,
            track,
            start,
            end: None,
            expected_end,
            children: Vec::new(),
            args: event.into_args(),
            async_id,
            forced_close: false,
            nesting_violation: false,
        }
    }

    /// Zero-length span standing for an instant event
    fn instant(event: TraceEvent) -> Self {
        let mut node = Self::open(event);
        node.end = Some(node.start);
        node
    }

    /// Name of the span
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Comma-separated categories of the span, empty if none
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Track which the span was recorded on
    pub fn track(&self) -> TrackId {
        self.track
    }

    /// When the span started
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// When the span ended, if it is closed
    pub fn end(&self) -> Option<Timestamp> {
        self.end
    }

    /// Truth that an end has been assigned to this span
    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }

    /// Time spent in this span including nested spans, if it is closed
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end - self.start)
    }

    /// Time spent in this span excluding nested spans, if it is closed
    pub fn self_duration(&self) -> Option<Duration> {
        let children = self.children.iter().filter_map(Self::duration).sum::<Duration>();
        self.duration().map(|duration| (duration - children).max(0.0))
    }

    /// Directly nested spans, in order of arrival
    pub fn children(&self) -> &[EventNode] {
        &self.children
    }

    /// This span followed by all of its transitive children, depth first
    pub fn descendants(&self) -> impl Iterator<Item = &EventNode> + '_ {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// Merged arguments of the begin and end events
    pub fn args(&self) -> &EventArgs {
        &self.args
    }

    /// Identifier of the async operation, for async spans
    pub fn async_id(&self) -> Option<&AsyncId> {
        self.async_id.as_ref()
    }

    /// Truth that this span was matched by async id rather than nesting
    pub fn is_async(&self) -> bool {
        self.async_id.is_some()
    }

    /// Truth that this span was closed by the end of an enclosing span
    pub fn was_forced_closed(&self) -> bool {
        self.forced_close
    }

    /// Truth that some child escapes the time range of this span
    pub fn has_nesting_violation(&self) -> bool {
        self.nesting_violation
    }

    /// Assign an end to this span, checking what can be checked
    fn close(&mut self, end: Timestamp, diagnostics: &mut Diagnostics) {
        let end = if end < self.start {
            diagnostics.record(Anomaly::NegativeDuration {
                track: self.track,
                name: self.name.clone(),
                start: self.start,
                end,
            });
            self.start
        } else {
            end
        };
        self.end = Some(end);
        self.expected_end = None;

        // Children were closed before us, so they all have an end
        for child in &self.children {
            let child_end = child.end.unwrap_or(child.start);
            if child.start < self.start || child_end > end {
                self.nesting_violation = true;
                diagnostics.record(Anomaly::ChildOutOfBounds {
                    track: self.track,
                    parent: self.name.clone(),
                    child: child.name.clone(),
                });
            }
        }
    }

    /// Truth that an end event can close this span
    fn matches_end(&self, event: &TraceEvent) -> bool {
        self.expected_end.is_none()
            && event.name().map_or(true, |name| name == &*self.name)
            && (event.category().is_empty()
                || self.category.is_empty()
                || event.category() == &*self.category)
    }
}

/// Mechanism to build the span trees of one track
///
/// Events are expected in timestamp order. Spans that are still open are
/// kept on a stack, and attached to their parent once they close.
#[derive(Debug)]
pub struct EventTreeBuilder {
    /// Track whose events are being processed
    track: TrackId,

    /// Spans which have not been closed yet, outermost first
    open: Vec<EventNode>,
}
//
impl EventTreeBuilder {
    /// Prepare to build the span trees of a track
    pub fn new(track: TrackId) -> Self {
        Self {
            track,
            open: Vec::new(),
        }
    }

    /// Track whose events are being processed
    pub fn track(&self) -> TrackId {
        self.track
    }

    /// Number of spans which are currently open
    pub fn open_depth(&self) -> usize {
        self.open.len()
    }

    /// Process the next event of this track
    ///
    /// Returns the root spans that were completed as a result, in order of
    /// completion. Async events are not handled here, see
    /// [`AsyncSpanMatcher`].
    pub fn push(&mut self, event: TraceEvent, diagnostics: &mut Diagnostics) -> Vec<EventNode> {
        debug_assert_eq!(event.track(), self.track);
        let mut completed = Vec::new();

        // Complete spans implicitly end once the stream moves past them
        self.close_elapsed(event.timestamp(), diagnostics, &mut completed);

        match event.phase() {
            Phase::Begin | Phase::Complete => self.open.push(EventNode::open(event)),
            Phase::End => self.end(event, diagnostics, &mut completed),
            Phase::Instant => {
                if let Some(parent) = self.open.last_mut() {
                    parent.children.push(EventNode::instant(event));
                } else {
                    trace!("{}: dropping toplevel instant {:?}", self.track, event.name());
                }
            }
            Phase::AsyncBegin | Phase::AsyncEnd | Phase::AsyncStep => {
                trace!("{}: ignoring async event {:?}", self.track, event.name());
            }
        }
        completed
    }

    /// Close whatever can be closed without further input
    ///
    /// Complete spans are closed and emitted. Spans opened by begin events
    /// are left open, no end is invented for them.
    pub fn finish(&mut self, diagnostics: &mut Diagnostics) -> Vec<EventNode> {
        let mut completed = Vec::new();
        self.close_elapsed(Timestamp::INFINITY, diagnostics, &mut completed);
        completed
    }

    /// Discard all open spans, returning how many there were
    pub fn reset(&mut self) -> usize {
        let discarded = self.open.len();
        self.open.clear();
        discarded
    }

    /// Close the complete spans on top of the stack which end before `now`
    fn close_elapsed(
        &mut self,
        now: Timestamp,
        diagnostics: &mut Diagnostics,
        completed: &mut Vec<EventNode>,
    ) {
        while let Some(end) = self
            .open
            .last()
            .and_then(|top| top.expected_end)
            .filter(|&end| end <= now)
        {
            let Some(mut node) = self.open.pop() else {
                break;
            };
            node.close(end, diagnostics);
            self.attach(node, completed);
        }
    }

    /// Handle an end event
    fn end(
        &mut self,
        event: TraceEvent,
        diagnostics: &mut Diagnostics,
        completed: &mut Vec<EventNode>,
    ) {
        // Find the most recently opened matching span
        let Some(idx) = self.open.iter().rposition(|node| node.matches_end(&event)) else {
            diagnostics.record(Anomaly::UnmatchedEnd {
                track: self.track,
                name: event.name().map(Into::into),
                timestamp: event.timestamp(),
            });
            return;
        };
        let end = event.timestamp();

        // Anything opened after it cannot outlive it
        while self.open.len() > idx + 1 {
            let Some(mut orphan) = self.open.pop() else {
                break;
            };
            let orphan_end = orphan.expected_end.filter(|&e| e <= end).unwrap_or_else(|| {
                orphan.forced_close = true;
                diagnostics.record(Anomaly::ForcedClose {
                    track: self.track,
                    name: orphan.name.clone(),
                    timestamp: end,
                });
                end
            });
            orphan.close(orphan_end, diagnostics);
            self.attach(orphan, completed);
        }

        // Close the span itself, end arguments take priority
        let Some(mut node) = self.open.pop() else {
            return;
        };
        node.args.extend(event.into_args());
        node.close(end, diagnostics);
        self.attach(node, completed);
    }

    /// Attach a freshly closed span to its parent, or emit it as a root
    fn attach(&mut self, node: EventNode, completed: &mut Vec<EventNode>) {
        if let Some(parent) = self.open.last_mut() {
            parent.children.push(node);
        } else {
            trace!("{}: completed root span {:?}", self.track, node.name);
            completed.push(node);
        }
    }
}

/// Key under which open async spans are tracked
type AsyncKey = (Box<str>, Box<str>, AsyncId);

/// Mechanism to match async begin and end events
///
/// Async spans may begin and end on different tracks. They are matched by
/// category, name and id, and emitted as root spans of the track on which
/// they began.
#[derive(Debug, Default)]
pub struct AsyncSpanMatcher {
    /// Async spans which have not been closed yet
    open: HashMap<AsyncKey, EventNode>,
}
//
impl AsyncSpanMatcher {
    /// Set up an async span matcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of async spans which are currently open
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Process an async event, returning the span it completed, if any
    pub fn push(&mut self, event: TraceEvent, diagnostics: &mut Diagnostics) -> Option<EventNode> {
        let id = event.async_id()?.clone();
        let key = (
            event.category().into(),
            event.name().unwrap_or_default().into(),
            id,
        );
        match event.phase() {
            Phase::AsyncBegin => {
                if let Some(previous) = self.open.insert(key, EventNode::open(event)) {
                    trace!("async span {:?} was restarted", previous.name);
                }
                None
            }
            Phase::AsyncStep => {
                if let Some(node) = self.open.get_mut(&key) {
                    node.children.push(EventNode::instant(event));
                }
                None
            }
            Phase::AsyncEnd => {
                let Some(mut node) = self.open.remove(&key) else {
                    diagnostics.record(Anomaly::UnmatchedEnd {
                        track: event.track(),
                        name: event.name().map(Into::into),
                        timestamp: event.timestamp(),
                    });
                    return None;
                };
                let end = event.timestamp();
                node.args.extend(event.into_args());
                node.close(end, diagnostics);
                Some(node)
            }
            Phase::Begin | Phase::End | Phase::Complete | Phase::Instant => None,
        }
    }

    /// Discard all open async spans, returning how many there were
    pub fn reset(&mut self) -> usize {
        let discarded = self.open.len();
        self.open.clear();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AnomalyKind;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json as json;

    const TRACK: TrackId = TrackId(1);

    fn begin(ts: Timestamp, name: &str) -> TraceEvent {
        TraceEvent::begin(TRACK, ts, name)
    }

    fn end(ts: Timestamp, name: &str) -> TraceEvent {
        TraceEvent::end(TRACK, ts, name)
    }

    fn anonymous_end(ts: Timestamp) -> TraceEvent {
        TraceEvent::new(Phase::End, None, "", TRACK, ts)
    }

    /// Feed a sequence of events, collecting completed roots
    fn build(
        events: impl IntoIterator<Item = TraceEvent>,
    ) -> (EventTreeBuilder, Vec<EventNode>, Diagnostics) {
        let mut builder = EventTreeBuilder::new(TRACK);
        let mut diagnostics = Diagnostics::new(16);
        let mut roots = Vec::new();
        for event in events {
            roots.extend(builder.push(event, &mut diagnostics));
        }
        (builder, roots, diagnostics)
    }

    #[test]
    fn nested_spans() {
        let (builder, roots, diagnostics) = build([
            begin(1.0, "A"),
            begin(1.1, "Asub"),
            anonymous_end(3.9),
            begin(4.0, "Asub2"),
            end(4.5, "Asub2"),
            end(5.0, "A"),
        ]);
        assert_eq!(builder.open_depth(), 0);
        assert_eq!(diagnostics.total(), 0);
        assert_matches!(&roots[..], [root] => {
            assert_eq!(root.name(), "A");
            assert_eq!(root.start(), 1.0);
            assert_eq!(root.end(), Some(5.0));
            assert_eq!(root.children().len(), 2);
            assert_eq!(root.children()[0].name(), "Asub");
            assert_eq!(root.children()[0].duration(), Some(3.9 - 1.1));
            assert_eq!(root.children()[1].name(), "Asub2");
            assert_eq!(root.descendants().count(), 3);
            assert!(!root.has_nesting_violation());
        });
    }

    #[test]
    fn unmatched_end() {
        let (builder, roots, diagnostics) = build([
            begin(1.0, "A"),
            begin(2.0, "B"),
            end(3.0, "C"),
        ]);
        assert!(roots.is_empty());
        assert_eq!(builder.open_depth(), 2);
        assert_eq!(diagnostics.count(AnomalyKind::UnmatchedEnd), 1);
        assert_eq!(diagnostics.total(), 1);

        // Structure is intact and can still be closed normally
        let (_, roots, diagnostics) = build([
            begin(1.0, "A"),
            begin(2.0, "B"),
            end(3.0, "C"),
            end(4.0, "B"),
            end(5.0, "A"),
        ]);
        assert_eq!(diagnostics.total(), 1);
        assert_matches!(&roots[..], [root] => {
            assert_eq!(root.children()[0].end(), Some(4.0));
        });
    }

    #[test]
    fn end_without_any_open_span() {
        let (builder, roots, diagnostics) = build([anonymous_end(3.0)]);
        assert!(roots.is_empty());
        assert_eq!(builder.open_depth(), 0);
        assert_eq!(diagnostics.count(AnomalyKind::UnmatchedEnd), 1);
    }

    #[test]
    fn forced_close() {
        let (_, roots, diagnostics) = build([
            begin(1.0, "A"),
            begin(2.0, "B"),
            begin(3.0, "C"),
            end(4.0, "A"),
        ]);
        assert_eq!(diagnostics.count(AnomalyKind::ForcedClose), 2);
        assert_matches!(&roots[..], [a] => {
            assert!(!a.was_forced_closed());
            let b = &a.children()[0];
            assert!(b.was_forced_closed());
            assert_eq!(b.end(), Some(4.0));
            let c = &b.children()[0];
            assert!(c.was_forced_closed());
            assert_eq!(c.end(), Some(4.0));
        });
    }

    #[test]
    fn negative_duration() {
        let (_, roots, diagnostics) = build([begin(5.0, "A"), end(4.0, "A")]);
        assert_eq!(diagnostics.count(AnomalyKind::NegativeDuration), 1);
        assert_matches!(&roots[..], [a] => assert_eq!(a.duration(), Some(0.0)));
    }

    #[test]
    fn complete_spans() {
        let mut builder = EventTreeBuilder::new(TRACK);
        let mut diagnostics = Diagnostics::new(16);
        let mut roots = Vec::new();
        for event in [
            TraceEvent::complete(TRACK, 0.0, 100.0, "Frame"),
            TraceEvent::complete(TRACK, 10.0, 20.0, "Build"),
            TraceEvent::complete(TRACK, 40.0, 60.0, "Layout"),
            TraceEvent::complete(TRACK, 200.0, 10.0, "Next"),
        ] {
            roots.extend(builder.push(event, &mut diagnostics));
        }
        assert_matches!(&roots[..], [frame] => {
            assert_eq!(frame.end(), Some(100.0));
            let names = frame.children().iter().map(EventNode::name).collect::<Vec<_>>();
            assert_eq!(names, ["Build", "Layout"]);
            assert_eq!(frame.self_duration(), Some(20.0));
        });
        let roots = builder.finish(&mut diagnostics);
        assert_matches!(&roots[..], [next] => assert_eq!(next.end(), Some(210.0)));
        assert_eq!(diagnostics.total(), 0);
    }

    #[test]
    fn instants_and_args() {
        let args = |key: &str, value: u64| {
            let mut args = EventArgs::new();
            args.insert(key.into(), json::json!(value));
            args
        };
        let (_, roots, diagnostics) = build([
            begin(1.0, "A").with_args(args("first", 1)),
            TraceEvent::new(Phase::Instant, Some("mark".into()), "", TRACK, 2.0),
            end(3.0, "A").with_args(args("first", 4)),
            TraceEvent::new(Phase::Instant, Some("toplevel".into()), "", TRACK, 4.0),
        ]);
        assert_eq!(diagnostics.total(), 0);
        assert_matches!(&roots[..], [a] => {
            assert_eq!(a.args()["first"], json::json!(4));
            assert_matches!(a.children(), [mark] => {
                assert_eq!(mark.name(), "mark");
                assert_eq!(mark.duration(), Some(0.0));
            });
        });
    }

    #[test]
    fn async_spans() {
        let mut matcher = AsyncSpanMatcher::new();
        let mut diagnostics = Diagnostics::new(16);
        let event = |phase: Phase, track: i64, ts: Timestamp| {
            TraceEvent::new(phase, Some("PipelineItem".into()), "Embedder", TrackId(track), ts)
                .with_async_id(AsyncId("0x1".into()))
        };
        assert_eq!(matcher.push(event(Phase::AsyncBegin, 1, 10.0), &mut diagnostics), None);
        assert_eq!(matcher.push(event(Phase::AsyncStep, 2, 20.0), &mut diagnostics), None);
        assert_eq!(matcher.open_count(), 1);
        assert_matches!(
            matcher.push(event(Phase::AsyncEnd, 2, 30.0), &mut diagnostics),
            Some(span) => {
                assert!(span.is_async());
                assert_eq!(span.track(), TrackId(1));
                assert_eq!(span.duration(), Some(20.0));
                assert_eq!(span.children().len(), 1);
            }
        );
        assert_eq!(matcher.push(event(Phase::AsyncEnd, 2, 40.0), &mut diagnostics), None);
        assert_eq!(diagnostics.count(AnomalyKind::UnmatchedEnd), 1);
    }

    /// Shape of a randomly generated span tree
    #[derive(Clone, Debug)]
    struct Shape(Vec<Shape>);

    fn shape() -> impl Strategy<Value = Shape> {
        Just(Shape(Vec::new())).prop_recursive(4, 32, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(Shape)
        })
    }

    /// Turn a shape into well-formed begin/end events
    fn emit(shape: &Shape, depth: usize, clock: &mut Timestamp, events: &mut Vec<TraceEvent>) {
        let name = format!("depth{depth}");
        events.push(begin(*clock, &name));
        *clock += 1.0;
        for child in &shape.0 {
            emit(child, depth + 1, clock, events);
        }
        events.push(end(*clock, &name));
        *clock += 1.0;
    }

    proptest! {
        #[test]
        fn well_formed_trees(shapes in prop::collection::vec(shape(), 1..4)) {
            let mut events = Vec::new();
            let mut clock = 0.0;
            for shape in &shapes {
                emit(shape, 0, &mut clock, &mut events);
            }
            let (builder, roots, diagnostics) = build(events);
            prop_assert_eq!(builder.open_depth(), 0);
            prop_assert_eq!(diagnostics.total(), 0);
            prop_assert_eq!(roots.len(), shapes.len());
            for root in &roots {
                for node in root.descendants() {
                    let end = node.end();
                    prop_assert!(end.is_some());
                    prop_assert!(end >= Some(node.start()));
                    prop_assert!(!node.has_nesting_violation());
                    for child in node.children() {
                        prop_assert!(child.is_closed());
                        prop_assert!(child.start() >= node.start());
                        prop_assert!(child.end() <= end);
                    }
                }
            }
        }
    }
}
