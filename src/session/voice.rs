//! Voice calls
//!
//! Calls live next to the data connections, not inside them: a peer can have
//! a call without an open channel and the other way round. At most one call
//! is kept per peer.

use smallvec::SmallVec;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{Role, Session};
use crate::avatar::AvatarAllocator;
use crate::net::protocol::PeerId;
use crate::net::transport::{AudioStream, CallHandle, Transport};

/// Outbound calls waiting for their stagger delay, keyed by peer
#[derive(Debug, Clone, Default)]
pub struct ScheduledCalls {
    /// (peer, time left) in scheduling order
    pending: Vec<(PeerId, Duration)>,
}

impl ScheduledCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a call to `peer_id` after `delay`, replacing an earlier one
    pub fn schedule(&mut self, peer_id: PeerId, delay: Duration) {
        match self.pending.iter_mut().find(|(id, _)| *id == peer_id) {
            Some(entry) => entry.1 = delay,
            None => self.pending.push((peer_id, delay)),
        }
    }

    pub fn cancel(&mut self, peer_id: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(id, _)| id.as_str() != peer_id);
        self.pending.len() != before
    }

    pub fn is_scheduled(&self, peer_id: &str) -> bool {
        self.pending.iter().any(|(id, _)| id.as_str() == peer_id)
    }

    /// Time left before the call to `peer_id` fires
    pub fn remaining(&self, peer_id: &str) -> Option<Duration> {
        self.pending
            .iter()
            .find(|(id, _)| id.as_str() == peer_id)
            .map(|(_, left)| *left)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Advance the clock and take every call that is now due
    pub fn advance(&mut self, dt: Duration) -> SmallVec<[PeerId; 4]> {
        let mut due = SmallVec::new();
        self.pending.retain_mut(|(id, left)| {
            *left = left.saturating_sub(dt);
            if left.is_zero() {
                due.push(id.clone());
                false
            } else {
                true
            }
        });
        due
    }
}

/// Tick delta as a duration; garbage (negative, NaN) counts as no time
pub(super) fn tick_duration(dt: f32) -> Duration {
    if dt.is_finite() && dt > 0.0 {
        Duration::try_from_secs_f32(dt).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

impl<T: Transport, A: AvatarAllocator> Session<T, A> {
    /// Set or clear the captured microphone stream
    pub fn set_local_stream(&mut self, stream: Option<AudioStream>) {
        self.local_stream = stream;
    }

    pub fn local_stream(&self) -> Option<&AudioStream> {
        self.local_stream.as_ref()
    }

    /// Voice stream received from `peer_id`
    pub fn remote_stream(&self, peer_id: &str) -> Option<&AudioStream> {
        self.remote_streams.get(peer_id)
    }

    pub fn has_call(&self, peer_id: &str) -> bool {
        self.calls.contains_key(peer_id)
    }

    pub fn scheduled_calls(&self) -> &ScheduledCalls {
        &self.scheduled_calls
    }

    /// Place a voice call. Without voice, a local stream or an identity
    /// this only logs.
    pub fn call(&mut self, peer_id: &PeerId) -> bool {
        if !self.config.voice_enabled {
            debug!("Voice disabled, not calling {}", peer_id);
            return false;
        }
        let Some(stream) = self.local_stream.as_ref() else {
            error!("Cannot call {}: no local audio stream", peer_id);
            return false;
        };
        if self.local_id().is_none() {
            error!("Cannot call {}: no transport identity", peer_id);
            return false;
        }

        match self.transport.call(peer_id, stream) {
            Ok(call) => {
                info!("Calling {}", peer_id);
                if let Some(previous) = self.calls.insert(peer_id.clone(), call) {
                    self.transport.close_call(previous);
                }
                self.metrics.calls_placed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!("Call to {} failed: {}", peer_id, e);
                false
            }
        }
    }

    /// Fire staggered calls whose delay ran out; peers that left meanwhile
    /// are skipped
    pub(super) fn run_due_calls(&mut self, dt: f32) {
        let due = self.scheduled_calls.advance(tick_duration(dt));
        for peer_id in due {
            if !self.active_players.contains(peer_id.as_str()) {
                debug!("Skipping call to departed peer {}", peer_id);
                continue;
            }
            self.call(&peer_id);
        }
    }

    /// Host answers anyone; a client only with voice enabled. Either side
    /// declines when it has no stream to answer with.
    pub(super) fn on_incoming_call(&mut self, call: CallHandle, peer_id: PeerId) {
        let hosting = matches!(self.role, Role::Hosting { .. });
        if !hosting && !self.config.voice_enabled {
            debug!("Voice disabled, declining call from {}", peer_id);
            self.transport.close_call(call);
            return;
        }

        let Some(stream) = self.local_stream.as_ref() else {
            warn!("No local audio stream, declining call from {}", peer_id);
            self.transport.close_call(call);
            return;
        };

        match self.transport.answer(call, stream) {
            Ok(()) => {
                info!("Answered call from {}", peer_id);
                if let Some(previous) = self.calls.insert(peer_id, call) {
                    self.transport.close_call(previous);
                }
                self.metrics.calls_answered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("Failed to answer call from {}: {}", peer_id, e),
        }
    }

    fn call_peer(&self, call: CallHandle) -> Option<PeerId> {
        self.calls
            .iter()
            .find(|(_, handle)| **handle == call)
            .map(|(peer_id, _)| peer_id.clone())
    }

    pub(super) fn on_call_stream(&mut self, call: CallHandle, stream: AudioStream) {
        let Some(peer_id) = self.call_peer(call) else {
            debug!("Stream for unknown {}", call);
            return;
        };
        debug!("Receiving voice from {}", peer_id);
        self.remote_streams.insert(peer_id, stream);
    }

    pub(super) fn on_call_closed(&mut self, call: CallHandle) {
        let Some(peer_id) = self.call_peer(call) else {
            return;
        };
        debug!("Call with {} closed", peer_id);
        self.calls.remove(peer_id.as_str());
        self.remote_streams.remove(peer_id.as_str());
    }

    /// Flip the local microphone; returns the new enabled state
    pub fn toggle_mute(&mut self) -> Option<bool> {
        let stream = self.local_stream.as_ref()?;
        let enabled = !stream.is_enabled();
        stream.set_enabled(enabled);
        Some(enabled)
    }

    pub fn set_own_mute(&mut self, mute: bool) -> bool {
        match self.local_stream.as_ref() {
            Some(stream) => {
                stream.set_enabled(!mute);
                true
            }
            None => false,
        }
    }

    /// Mute or unmute what we hear from `peer_id`
    pub fn set_other_mute(&mut self, peer_id: &str, mute: bool) -> bool {
        match self.remote_streams.get(peer_id) {
            Some(stream) => {
                stream.set_enabled(!mute);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_fires_after_delay() {
        let mut calls = ScheduledCalls::new();
        calls.schedule(PeerId::from("P2"), Duration::from_millis(500));

        assert!(calls.advance(Duration::from_millis(300)).is_empty());
        assert_eq!(calls.remaining("P2"), Some(Duration::from_millis(200)));

        let due = calls.advance(Duration::from_millis(200));
        assert_eq!(due.as_slice(), &[PeerId::from("P2")]);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_zero_delay_fires_on_next_advance() {
        let mut calls = ScheduledCalls::new();
        calls.schedule(PeerId::from("P1"), Duration::ZERO);

        let due = calls.advance(Duration::ZERO);
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn test_due_calls_keep_scheduling_order() {
        let mut calls = ScheduledCalls::new();
        calls.schedule(PeerId::from("P3"), Duration::from_millis(100));
        calls.schedule(PeerId::from("P1"), Duration::from_millis(50));

        let due = calls.advance(Duration::from_secs(1));
        assert_eq!(due.as_slice(), &[PeerId::from("P3"), PeerId::from("P1")]);
    }

    #[test]
    fn test_cancel() {
        let mut calls = ScheduledCalls::new();
        calls.schedule(PeerId::from("P2"), Duration::from_millis(500));

        assert!(calls.cancel("P2"));
        assert!(!calls.cancel("P2"));
        assert!(calls.advance(Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_reschedule_replaces_delay() {
        let mut calls = ScheduledCalls::new();
        calls.schedule(PeerId::from("P2"), Duration::from_millis(500));
        calls.schedule(PeerId::from("P2"), Duration::from_millis(100));

        assert_eq!(calls.len(), 1);
        assert_eq!(calls.remaining("P2"), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_tick_duration_ignores_garbage() {
        assert_eq!(tick_duration(-1.0), Duration::ZERO);
        assert_eq!(tick_duration(f32::NAN), Duration::ZERO);
        assert_eq!(tick_duration(0.5), Duration::from_millis(500));
    }
}
