//! Originator-side discovery plumbing.
//!
//! A node waiting on a ring search parks in a poll loop over the shared
//! [`ReplyEvents`] queue. The route reply and route wait receive handlers
//! are the producers: an arrived reply is enqueued with a hop count of zero,
//! a wait notice with the (nonzero) distance the intermediate node promised.
//! The ring search consumes wait notices to stretch its patience and the
//! reply event for its destination to conclude.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::address::UnicastAddr;
use crate::error::RoutingError;
use crate::RoutingConfig;

/// A notification from the receive handlers to a waiting originator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReplyEvent {
    /// Destination of the discovery this event belongs to.
    destination: UnicastAddr,
    /// Zero for an arrived route reply; the intermediate node's distance
    /// promise for a route wait notice.
    hop_count: u8,
}

impl ReplyEvent {
    /// Event marking the arrival of the route reply for `destination`.
    pub fn reply(destination: UnicastAddr) -> Self {
        Self {
            destination,
            hop_count: 0,
        }
    }

    /// Event marking a route wait notice promising a route to
    /// `destination` within `hop_count` hops. A promise of zero hops is
    /// rounded up so the event stays distinguishable from a reply.
    pub fn wait(destination: UnicastAddr, hop_count: u8) -> Self {
        Self {
            destination,
            hop_count: hop_count.max(1),
        }
    }
}

/// Outcome of one poll pass over the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollOutcome {
    /// The reply for the polled destination arrived.
    pub replied: bool,
    /// At least one wait notice was consumed; the ring search should
    /// stretch its patience.
    pub extend_patience: bool,
}

struct ReplyEventsInner {
    events: Mutex<Vec<ReplyEvent>>,
    capacity: usize,
}

/// The bounded queue of discovery notifications. Cheap to clone; all clones
/// share the same queue.
#[derive(Clone)]
pub(crate) struct ReplyEvents {
    inner: Arc<ReplyEventsInner>,
}

impl ReplyEvents {
    /// Create a new empty `ReplyEvents` queue.
    pub fn new(config: &RoutingConfig) -> Self {
        ReplyEvents {
            inner: Arc::new(ReplyEventsInner {
                events: Mutex::new(Vec::new()),
                capacity: config.reply_event_capacity,
            }),
        }
    }

    /// Enqueue an event. On a saturated queue the event is dropped and
    /// `ResourceExhausted` returned; the originator re-emits its request on
    /// the next ring step, so a dropped event delays discovery rather than
    /// failing it.
    pub fn push(&self, event: ReplyEvent) -> Result<(), RoutingError> {
        let mut events = self.inner.events.lock().unwrap();
        if events.len() >= self.inner.capacity {
            warn!("Reply event queue saturated, dropping event");
            return Err(RoutingError::ResourceExhausted);
        }
        events.push(event);
        Ok(())
    }

    /// One poll pass for a ring search toward `destination`: consumes every
    /// wait notice (regardless of destination) and, if present, the reply
    /// event for `destination`. Reply events of other concurrent searches
    /// are left alone.
    pub fn poll(&self, destination: UnicastAddr) -> PollOutcome {
        let mut events = self.inner.events.lock().unwrap();

        let mut outcome = PollOutcome {
            replied: false,
            extend_patience: false,
        };

        events.retain(|event| {
            if event.hop_count > 0 {
                outcome.extend_patience = true;
                false
            } else if event.destination == destination && !outcome.replied {
                outcome.replied = true;
                false
            } else {
                true
            }
        });

        outcome
    }
}

#[cfg(test)]
mod tests {
    use crate::error::RoutingError;
    use crate::RoutingConfig;

    use super::{PollOutcome, ReplyEvent, ReplyEvents};

    #[test]
    fn reply_concludes_matching_poll() {
        let events = ReplyEvents::new(&RoutingConfig::default());

        events.push(ReplyEvent::reply(0x10.into())).unwrap();

        assert_eq!(
            events.poll(0x20.into()),
            PollOutcome {
                replied: false,
                extend_patience: false
            }
        );
        assert_eq!(
            events.poll(0x10.into()),
            PollOutcome {
                replied: true,
                extend_patience: false
            }
        );
        // The event was consumed.
        assert!(!events.poll(0x10.into()).replied);
    }

    #[test]
    fn wait_extends_any_poll() {
        let events = ReplyEvents::new(&RoutingConfig::default());

        events.push(ReplyEvent::wait(0x10.into(), 2)).unwrap();

        let outcome = events.poll(0x99.into());
        assert!(outcome.extend_patience);
        assert!(!outcome.replied);
        // Consumed as well.
        assert!(!events.poll(0x99.into()).extend_patience);
    }

    #[test]
    fn zero_hop_wait_stays_a_wait() {
        let events = ReplyEvents::new(&RoutingConfig::default());

        events.push(ReplyEvent::wait(0x10.into(), 0)).unwrap();

        let outcome = events.poll(0x10.into());
        assert!(outcome.extend_patience);
        assert!(!outcome.replied);
    }

    #[test]
    fn saturation_drops_event() {
        let config = RoutingConfig {
            reply_event_capacity: 1,
            ..RoutingConfig::default()
        };
        let events = ReplyEvents::new(&config);

        events.push(ReplyEvent::reply(0x10.into())).unwrap();
        assert_eq!(
            events.push(ReplyEvent::reply(0x11.into())),
            Err(RoutingError::ResourceExhausted)
        );

        // The first event survived the saturation.
        assert!(events.poll(0x10.into()).replied);
    }
}
