//! Aggregation of route errors before transmission.
//!
//! Tearing down a broken link usually invalidates several routes at once.
//! Instead of radiating one error per route, the affected destinations are
//! collected here, grouped by the upstream neighbour which must hear about
//! them, and then flushed as one coalesced report per neighbour.
//!
//! The collector only holds records between an enumeration pass and the
//! flush directly following it; it is never populated across await points.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::address::{NetIndex, UnicastAddr};
use crate::aodv::RerrDestination;
use crate::error::RoutingError;
use crate::sequence_number::SeqNo;
use crate::RoutingConfig;

/// Destinations which became unreachable for one upstream neighbour.
#[derive(Debug, Clone)]
pub(crate) struct RerrRecord {
    /// The neighbour to notify.
    pub next_hop: UnicastAddr,
    /// Subnet to notify on.
    pub net_idx: NetIndex,
    /// The unreachable destinations, unique by address.
    pub destinations: Vec<RerrDestination>,
}

struct RerrCollectorInner {
    records: Mutex<Vec<RerrRecord>>,
    capacity: usize,
}

/// Collector of pending route error records. Cheap to clone; all clones
/// share the same records.
#[derive(Clone)]
pub(crate) struct RerrCollector {
    inner: Arc<RerrCollectorInner>,
}

impl RerrCollector {
    /// Create a new empty `RerrCollector`.
    pub fn new(config: &RoutingConfig) -> Self {
        RerrCollector {
            inner: Arc::new(RerrCollectorInner {
                records: Mutex::new(Vec::new()),
                capacity: config.rerr_capacity,
            }),
        }
    }

    /// Record that `destination` became unreachable and `next_hop` must be
    /// told. Destinations are deduplicated by address within a record; a
    /// repeated destination is absorbed silently.
    pub fn record(
        &self,
        next_hop: UnicastAddr,
        net_idx: NetIndex,
        destination: UnicastAddr,
        dest_seqno: SeqNo,
    ) -> Result<(), RoutingError> {
        let mut records = self.inner.records.lock().unwrap();

        if let Some(record) = records
            .iter_mut()
            .find(|r| r.next_hop == next_hop && r.net_idx == net_idx)
        {
            if record
                .destinations
                .iter()
                .all(|d| d.address != destination)
            {
                record.destinations.push(RerrDestination {
                    address: destination,
                    seqno: dest_seqno,
                });
            }
            return Ok(());
        }

        if records.len() >= self.inner.capacity {
            warn!("Route error record pool saturated");
            return Err(RoutingError::ResourceExhausted);
        }

        records.push(RerrRecord {
            next_hop,
            net_idx,
            destinations: vec![RerrDestination {
                address: destination,
                seqno: dest_seqno,
            }],
        });

        Ok(())
    }

    /// Take every pending record out of the collector. The caller emits
    /// them without holding any lock.
    pub fn drain(&self) -> Vec<RerrRecord> {
        std::mem::take(&mut *self.inner.records.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::RoutingError;
    use crate::RoutingConfig;

    use super::RerrCollector;

    #[test]
    fn groups_by_next_hop() {
        let collector = RerrCollector::new(&RoutingConfig::default());

        collector
            .record(0x02.into(), 0.into(), 0x10.into(), 1.into())
            .unwrap();
        collector
            .record(0x02.into(), 0.into(), 0x11.into(), 2.into())
            .unwrap();
        collector
            .record(0x03.into(), 0.into(), 0x10.into(), 1.into())
            .unwrap();

        let mut records = collector.drain();
        records.sort_by_key(|r| u16::from(r.next_hop));

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].next_hop, 0x02.into());
        assert_eq!(records[0].destinations.len(), 2);
        assert_eq!(records[1].next_hop, 0x03.into());
        assert_eq!(records[1].destinations.len(), 1);
    }

    #[test]
    fn deduplicates_destinations() {
        let collector = RerrCollector::new(&RoutingConfig::default());

        for _ in 0..3 {
            collector
                .record(0x02.into(), 0.into(), 0x10.into(), 1.into())
                .unwrap();
        }

        let records = collector.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].destinations.len(), 1);
    }

    #[test]
    fn drain_clears() {
        let collector = RerrCollector::new(&RoutingConfig::default());

        collector
            .record(0x02.into(), 0.into(), 0x10.into(), 1.into())
            .unwrap();
        assert_eq!(collector.drain().len(), 1);
        assert!(collector.drain().is_empty());
    }

    #[test]
    fn saturation() {
        let config = RoutingConfig {
            rerr_capacity: 2,
            ..RoutingConfig::default()
        };
        let collector = RerrCollector::new(&config);

        collector
            .record(0x02.into(), 0.into(), 0x10.into(), 1.into())
            .unwrap();
        collector
            .record(0x03.into(), 0.into(), 0x10.into(), 1.into())
            .unwrap();
        assert_eq!(
            collector.record(0x04.into(), 0.into(), 0x10.into(), 1.into()),
            Err(RoutingError::ResourceExhausted)
        );
        // An existing group still absorbs new destinations.
        collector
            .record(0x02.into(), 0.into(), 0x11.into(), 1.into())
            .unwrap();
    }
}
