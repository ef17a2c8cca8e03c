//! Edge gesture recognition with per-slot touch tracking
//!
//! A touch that lands inside an edge zone starts an edge swipe right away;
//! its progress follows the finger and the swipe commits on release once
//! it travelled far enough. Only one swipe drives navigation at a time:
//! touches landing while another swipe is owned are tracked but silent.
//!
//! Touches outside every edge zone are not tracked at all and fall through
//! to the client.

use std::collections::HashMap;
use tracing::debug;

/// Edge of the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Left,
    Right,
    Top,
    Bottom,
}

impl Edge {
    /// Zone priority where zones overlap in the corners.
    pub const PRIORITY: [Edge; 4] = [Edge::Bottom, Edge::Top, Edge::Left, Edge::Right];
}

/// Point in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Recognized gesture
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureEvent {
    /// Edge swipe started
    EdgeSwipeStart { edge: Edge },

    /// Edge swipe in progress
    EdgeSwipeUpdate {
        edge: Edge,
        progress: f64, // 0.0 to 1.0
    },

    /// Edge swipe finished (finger lifted or touch cancelled)
    EdgeSwipeEnd {
        edge: Edge,
        progress: f64,
        /// Travelled far enough for this edge's action.
        completed: bool,
        /// Travelled past the long-swipe threshold.
        long: bool,
    },
}

impl GestureEvent {
    pub fn edge(&self) -> Edge {
        match *self {
            GestureEvent::EdgeSwipeStart { edge }
            | GestureEvent::EdgeSwipeUpdate { edge, .. }
            | GestureEvent::EdgeSwipeEnd { edge, .. } => edge,
        }
    }
}

/// Configuration for gesture recognition
#[derive(Debug, Clone, PartialEq)]
pub struct GestureConfig {
    /// Width of edge detection zone in pixels
    pub edge_threshold: f64,

    /// Distance required to complete a bottom, left or right swipe
    pub swipe_complete_threshold: f64,

    /// Distance of a long swipe; also what a top swipe needs to complete
    pub long_swipe_threshold: f64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 80.0,
            swipe_complete_threshold: 100.0,
            long_swipe_threshold: 200.0,
        }
    }
}

impl GestureConfig {
    fn commit_threshold(&self, edge: Edge) -> f64 {
        match edge {
            Edge::Top => self.long_swipe_threshold,
            Edge::Bottom | Edge::Left | Edge::Right => self.swipe_complete_threshold,
        }
    }
}

/// Touch point tracking
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub id: i32,
    pub start_pos: Position,
    pub current_pos: Position,
    /// Milliseconds, as reported by the input backend
    pub start_time: u32,
    pub last_time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GesturePhase {
    Idle,
    Tracking,
    Completed,
    Cancelled,
}

/// Per-slot gesture state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureState {
    pub edge: Edge,
    pub point: TouchPoint,
    pub phase: GesturePhase,
    /// Whether this slot drives navigation
    pub owned: bool,
}

/// Gesture recognizer with per-slot tracking
pub struct GestureRecognizer {
    pub config: GestureConfig,
    screen_size: (i32, i32),
    slots: HashMap<i32, GestureState>,
    owner: Option<i32>,
}

impl GestureRecognizer {
    pub fn new(config: GestureConfig, screen_size: (i32, i32)) -> Self {
        Self {
            config,
            screen_size,
            slots: HashMap::new(),
            owner: None,
        }
    }

    pub fn screen_size(&self) -> (i32, i32) {
        self.screen_size
    }

    /// Output size or rotation changed.
    pub fn set_screen_size(&mut self, width: i32, height: i32) {
        self.screen_size = (width, height);
    }

    /// Edge zone containing `pos`, if any. Zone boundaries are inclusive.
    pub fn detect_edge(&self, pos: Position) -> Option<Edge> {
        let threshold = self.config.edge_threshold;
        let w = self.screen_size.0 as f64;
        let h = self.screen_size.1 as f64;

        Edge::PRIORITY.into_iter().find(|edge| match edge {
            Edge::Bottom => pos.y >= h - threshold,
            Edge::Top => pos.y <= threshold,
            Edge::Left => pos.x <= threshold,
            Edge::Right => pos.x >= w - threshold,
        })
    }

    fn progress(&self, state: &GestureState) -> f64 {
        let delta_x = (state.point.current_pos.x - state.point.start_pos.x).abs();
        let delta_y = (state.point.current_pos.y - state.point.start_pos.y).abs();
        let (delta, reference) = match state.edge {
            Edge::Top | Edge::Bottom => (delta_y, self.screen_size.1),
            Edge::Left | Edge::Right => (delta_x, self.screen_size.0),
        };
        if reference <= 0 {
            return 0.0;
        }
        (delta / reference as f64).clamp(0.0, 1.0)
    }

    /// Handle touch down event
    ///
    /// A down on a slot that is still tracked means its up was lost. The
    /// stale swipe is cancelled and its `EdgeSwipeEnd` returned; the new
    /// touch is then tracked without owning navigation.
    pub fn touch_down(&mut self, id: i32, pos: Position, time: u32) -> Option<GestureEvent> {
        let stale = if self.slots.contains_key(&id) {
            debug!(id, "Touch down on a tracked slot, dropping stale state");
            self.touch_cancel(id)
        } else {
            None
        };
        let Some(edge) = self.detect_edge(pos) else {
            return stale;
        };
        let owned = self.owner.is_none() && stale.is_none();
        self.slots.insert(
            id,
            GestureState {
                edge,
                point: TouchPoint {
                    id,
                    start_pos: pos,
                    current_pos: pos,
                    start_time: time,
                    last_time: time,
                },
                phase: if owned {
                    GesturePhase::Tracking
                } else {
                    GesturePhase::Idle
                },
                owned,
            },
        );
        if !owned {
            debug!(id, ?edge, "Edge touch while another swipe is active, not owned");
            return stale;
        }
        self.owner = Some(id);
        debug!(id, ?edge, "Edge swipe started");
        Some(GestureEvent::EdgeSwipeStart { edge })
    }

    /// Handle touch motion event
    pub fn touch_motion(&mut self, id: i32, pos: Position, time: u32) -> Option<GestureEvent> {
        let Some(state) = self.slots.get_mut(&id) else {
            return None;
        };
        state.point.current_pos = pos;
        state.point.last_time = time;
        if !state.owned {
            return None;
        }
        let state = *state;
        Some(GestureEvent::EdgeSwipeUpdate {
            edge: state.edge,
            progress: self.progress(&state),
        })
    }

    /// Handle touch up event
    pub fn touch_up(&mut self, id: i32, time: u32) -> Option<GestureEvent> {
        let Some(mut state) = self.slots.remove(&id) else {
            return None;
        };
        if !state.owned {
            debug!(id, "Ignoring release of unowned edge touch");
            return None;
        }
        self.owner = None;
        state.point.last_time = time;

        let distance = state.point.start_pos.distance_to(state.point.current_pos);
        let completed = distance >= self.config.commit_threshold(state.edge);
        let long = distance >= self.config.long_swipe_threshold;
        state.phase = if completed {
            GesturePhase::Completed
        } else {
            GesturePhase::Cancelled
        };
        debug!(
            id,
            edge = ?state.edge,
            distance,
            completed,
            long,
            duration_ms = time.wrapping_sub(state.point.start_time),
            "Edge swipe ended"
        );
        Some(GestureEvent::EdgeSwipeEnd {
            edge: state.edge,
            progress: self.progress(&state),
            completed,
            long,
        })
    }

    /// Handle touch cancel for one slot
    pub fn touch_cancel(&mut self, id: i32) -> Option<GestureEvent> {
        let state = self.slots.remove(&id)?;
        if !state.owned {
            return None;
        }
        self.owner = None;
        debug!(id, edge = ?state.edge, "Edge swipe cancelled");
        Some(GestureEvent::EdgeSwipeEnd {
            edge: state.edge,
            progress: self.progress(&state),
            completed: false,
            long: false,
        })
    }

    /// Seat-wide cancel - clear all state
    pub fn touch_cancel_all(&mut self) -> Option<GestureEvent> {
        let event = self.owner.and_then(|id| self.touch_cancel(id));
        self.slots.clear();
        self.owner = None;
        event
    }

    /// Whether `id` is an edge touch the recognizer keeps away from clients.
    pub fn is_tracking(&self, id: i32) -> bool {
        self.slots.contains_key(&id)
    }

    /// The slot currently driving navigation.
    pub fn active(&self) -> Option<&GestureState> {
        self.owner.and_then(|id| self.slots.get(&id))
    }

    pub fn has_active_touches(&self) -> bool {
        !self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recognizer() -> GestureRecognizer {
        GestureRecognizer::new(GestureConfig::default(), (500, 1000))
    }

    fn end(event: Option<GestureEvent>) -> (bool, bool) {
        match event {
            Some(GestureEvent::EdgeSwipeEnd {
                completed, long, ..
            }) => (completed, long),
            other => panic!("expected end, got {:?}", other),
        }
    }

    #[test]
    fn test_center_touch_is_ignored() {
        let mut g = recognizer();
        assert_eq!(g.touch_down(0, Position::new(250.0, 500.0), 0), None);
        assert_eq!(g.touch_motion(0, Position::new(250.0, 100.0), 10), None);
        assert_eq!(g.touch_up(0, 20), None);
        assert!(!g.has_active_touches());
    }

    #[test]
    fn test_zone_boundaries_are_inclusive() {
        let g = recognizer();
        assert_eq!(g.detect_edge(Position::new(250.0, 920.0)), Some(Edge::Bottom));
        assert_eq!(g.detect_edge(Position::new(250.0, 919.9)), None);
        assert_eq!(g.detect_edge(Position::new(250.0, 80.0)), Some(Edge::Top));
        assert_eq!(g.detect_edge(Position::new(80.0, 500.0)), Some(Edge::Left));
        assert_eq!(g.detect_edge(Position::new(420.0, 500.0)), Some(Edge::Right));
        assert_eq!(g.detect_edge(Position::new(419.0, 500.0)), None);
    }

    #[test]
    fn test_corner_priority() {
        let g = recognizer();
        assert_eq!(g.detect_edge(Position::new(0.0, 1000.0)), Some(Edge::Bottom));
        assert_eq!(g.detect_edge(Position::new(500.0, 1000.0)), Some(Edge::Bottom));
        assert_eq!(g.detect_edge(Position::new(0.0, 0.0)), Some(Edge::Top));
        assert_eq!(g.detect_edge(Position::new(500.0, 0.0)), Some(Edge::Top));
    }

    #[test]
    fn test_bottom_swipe_start_and_end() {
        let mut g = recognizer();
        let mut events = Vec::new();
        events.extend(g.touch_down(3, Position::new(250.0, 990.0), 0));
        events.extend(g.touch_up(3, 100));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], GestureEvent::EdgeSwipeStart { edge: Edge::Bottom });
        assert_eq!(end(Some(events[1])), (false, false));

        g.touch_down(3, Position::new(250.0, 990.0), 200);
        g.touch_motion(3, Position::new(250.0, 850.0), 250);
        assert_eq!(end(g.touch_up(3, 300)), (true, false));
    }

    #[test]
    fn test_commit_threshold_is_inclusive() {
        let mut g = recognizer();
        g.touch_down(0, Position::new(250.0, 990.0), 0);
        g.touch_motion(0, Position::new(250.0, 890.0), 10);
        assert_eq!(end(g.touch_up(0, 20)), (true, false));

        g.touch_down(0, Position::new(250.0, 990.0), 30);
        g.touch_motion(0, Position::new(250.0, 891.0), 40);
        assert_eq!(end(g.touch_up(0, 50)), (false, false));
    }

    #[test]
    fn test_top_swipe_needs_long_distance() {
        let mut g = recognizer();
        g.touch_down(0, Position::new(250.0, 10.0), 0);
        g.touch_motion(0, Position::new(250.0, 160.0), 10);
        assert_eq!(end(g.touch_up(0, 20)), (false, false));

        g.touch_down(0, Position::new(250.0, 10.0), 30);
        g.touch_motion(0, Position::new(250.0, 210.0), 40);
        assert_eq!(end(g.touch_up(0, 50)), (true, true));
    }

    #[test]
    fn test_progress_is_relative_to_screen_and_clamped() {
        let mut g = recognizer();
        g.touch_down(0, Position::new(490.0, 500.0), 0);
        assert_eq!(
            g.touch_motion(0, Position::new(240.0, 520.0), 10),
            Some(GestureEvent::EdgeSwipeUpdate {
                edge: Edge::Right,
                progress: 0.5
            })
        );
        assert_eq!(
            g.touch_motion(0, Position::new(-900.0, 500.0), 20),
            Some(GestureEvent::EdgeSwipeUpdate {
                edge: Edge::Right,
                progress: 1.0
            })
        );
    }

    #[test]
    fn test_second_edge_touch_is_not_owned() {
        let mut g = recognizer();
        assert!(g.touch_down(0, Position::new(250.0, 995.0), 0).is_some());
        assert_eq!(g.touch_down(1, Position::new(5.0, 500.0), 5), None);
        assert_eq!(g.touch_motion(1, Position::new(300.0, 500.0), 10), None);
        assert_eq!(g.touch_up(1, 20), None);
        assert_eq!(g.active().map(|s| s.edge), Some(Edge::Bottom));

        g.touch_up(0, 30);
        assert_eq!(
            g.touch_down(1, Position::new(5.0, 500.0), 40),
            Some(GestureEvent::EdgeSwipeStart { edge: Edge::Left })
        );
    }

    #[test]
    fn test_repeated_down_on_owner_releases_navigation() {
        let mut g = recognizer();
        assert_eq!(
            g.touch_down(0, Position::new(250.0, 990.0), 0),
            Some(GestureEvent::EdgeSwipeStart { edge: Edge::Bottom })
        );
        // Up for slot 0 never arrived
        assert_eq!(end(g.touch_down(0, Position::new(250.0, 990.0), 10)), (false, false));
        assert!(g.active().is_none());
        assert_eq!(g.touch_up(0, 20), None);
        assert!(!g.has_active_touches());

        assert_eq!(
            g.touch_down(1, Position::new(5.0, 500.0), 30),
            Some(GestureEvent::EdgeSwipeStart { edge: Edge::Left })
        );
    }

    #[test]
    fn test_repeated_down_outside_zones_clears_slot() {
        let mut g = recognizer();
        g.touch_down(0, Position::new(250.0, 990.0), 0);
        assert_eq!(end(g.touch_down(0, Position::new(250.0, 500.0), 10)), (false, false));
        assert!(!g.is_tracking(0));
        assert!(!g.has_active_touches());
    }

    #[test]
    fn test_untracked_ids_are_ignored() {
        let mut g = recognizer();
        assert_eq!(g.touch_motion(7, Position::new(1.0, 1.0), 0), None);
        assert_eq!(g.touch_up(7, 0), None);
        assert_eq!(g.touch_cancel(7), None);
    }

    #[test]
    fn test_cancel_ends_owned_swipe_uncompleted() {
        let mut g = recognizer();
        g.touch_down(0, Position::new(250.0, 995.0), 0);
        g.touch_motion(0, Position::new(250.0, 500.0), 10);
        assert_eq!(end(g.touch_cancel(0)), (false, false));
        assert!(g.active().is_none());

        g.touch_down(1, Position::new(5.0, 500.0), 20);
        g.touch_down(2, Position::new(250.0, 995.0), 20);
        assert_eq!(end(g.touch_cancel_all()), (false, false));
        assert!(!g.has_active_touches());
        assert_eq!(g.touch_up(2, 30), None);
    }

    #[test]
    fn test_screen_size_change_moves_zones() {
        let mut g = recognizer();
        assert_eq!(g.detect_edge(Position::new(250.0, 1500.0)), Some(Edge::Bottom));
        g.set_screen_size(1000, 2000);
        assert_eq!(g.detect_edge(Position::new(250.0, 1500.0)), None);
        assert_eq!(g.detect_edge(Position::new(250.0, 1950.0)), Some(Edge::Bottom));
    }
}
