//! Neighbour liveness tracking.
//!
//! Whenever a route starts forwarding through a link-local next hop, that
//! neighbour is registered here and its record armed with a liveness
//! deadline. Periodic hello beacons from the neighbour push the deadline
//! out; silence past the deadline is reported on the expiry sink, where the
//! router tears down every route using the lost link and propagates route
//! errors upstream.
//!
//! Records are only kept while some valid route still forwards through the
//! neighbour; route invalidation asks for removal through
//! [`NeighbourTable::remove_if_unused`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Instant};
use tracing::{debug, trace, warn};

use crate::address::{NetIndex, UnicastAddr};
use crate::error::RoutingError;
use crate::routing_table::RoutingTable;
use crate::timer::ExpiryTimer;
use crate::RoutingConfig;

/// Notice that a neighbour went silent past its liveness deadline,
/// delivered on the sink passed to [`NeighbourTable::new`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct LostNeighbour {
    /// Link-local address of the silent neighbour.
    pub addr: UnicastAddr,
    /// Subnet the neighbour was tracked on.
    pub net_idx: NetIndex,
}

struct StoredNeighbour {
    addr: UnicastAddr,
    net_idx: NetIndex,
    expires: Instant,
    timer: ExpiryTimer,
    _permit: OwnedSemaphorePermit,
}

struct NeighbourTableInner {
    records: Mutex<Vec<StoredNeighbour>>,
    slots: Arc<Semaphore>,
    expired_sink: mpsc::Sender<LostNeighbour>,
    lifetime: Duration,
    alloc_timeout: Duration,
}

/// The set of neighbours currently serving as next hop of some valid route.
/// Cheap to clone; all clones share the same records.
#[derive(Clone)]
pub(crate) struct NeighbourTable {
    inner: Arc<NeighbourTableInner>,
}

impl NeighbourTable {
    /// Create a new empty `NeighbourTable`. Liveness expirations are
    /// delivered on the passed channel; the receiver owns the teardown of
    /// routes through the lost neighbour.
    pub fn new(config: &RoutingConfig, expired_sink: mpsc::Sender<LostNeighbour>) -> Self {
        NeighbourTable {
            inner: Arc::new(NeighbourTableInner {
                records: Mutex::new(Vec::new()),
                slots: Arc::new(Semaphore::new(config.neighbour_capacity)),
                expired_sink,
                lifetime: config.hello_lifetime,
                alloc_timeout: config.alloc_timeout,
            }),
        }
    }

    /// Start tracking a neighbour, or push out the deadline of an already
    /// tracked one. Idempotent on the record set.
    pub async fn add(&self, addr: UnicastAddr, net_idx: NetIndex) -> Result<(), RoutingError> {
        let expires = Instant::now() + self.inner.lifetime;

        {
            let mut records = self.inner.records.lock().unwrap();
            if let Some(record) = records
                .iter_mut()
                .find(|r| r.addr == addr && r.net_idx == net_idx)
            {
                record.expires = expires;
                record.timer.reset(expires);
                return Ok(());
            }
        }

        let permit = match timeout(
            self.inner.alloc_timeout,
            Arc::clone(&self.inner.slots).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                warn!("Neighbour record pool saturated");
                return Err(RoutingError::ResourceExhausted);
            }
        };

        trace!(neighbour = %addr, net = %net_idx, "Tracking new neighbour");

        let timer = ExpiryTimer::spawn(
            expires,
            self.inner.expired_sink.clone(),
            LostNeighbour { addr, net_idx },
        );

        self.inner.records.lock().unwrap().push(StoredNeighbour {
            addr,
            net_idx,
            expires,
            timer,
            _permit: permit,
        });

        Ok(())
    }

    /// Refresh the liveness deadline of a neighbour from a received hello.
    /// Hellos from nodes which are not tracked are ignored.
    pub fn refresh_from_hello(&self, src: UnicastAddr) {
        let expires = Instant::now() + self.inner.lifetime;
        let mut records = self.inner.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.addr == src) {
            trace!(neighbour = %src, "Hello refreshes neighbour");
            record.expires = expires;
            record.timer.reset(expires);
        } else {
            trace!(source = %src, "Hello from a node not of interest");
        }
    }

    /// Stop tracking a neighbour if no valid route forwards through it
    /// anymore.
    pub fn remove_if_unused(&self, addr: UnicastAddr, net_idx: NetIndex, table: &RoutingTable) {
        if table.uses_next_hop(addr, net_idx) {
            return;
        }
        if self.remove(addr, net_idx) {
            debug!(neighbour = %addr, net = %net_idx, "Neighbour no longer used by any route");
        }
    }

    /// Stop tracking a neighbour unconditionally. Returns false if it was
    /// not tracked.
    pub fn remove(&self, addr: UnicastAddr, net_idx: NetIndex) -> bool {
        let mut records = self.inner.records.lock().unwrap();
        let Some(pos) = records
            .iter()
            .position(|r| r.addr == addr && r.net_idx == net_idx)
        else {
            return false;
        };
        records.swap_remove(pos);
        trace!(neighbour = %addr, net = %net_idx, "Neighbour record removed");
        true
    }

    /// Confirm that a reported loss is still current. A hello which
    /// arrived after the liveness timer fired wins: the record is re-armed
    /// and the loss is not confirmed.
    pub fn confirm_lost(&self, addr: UnicastAddr, net_idx: NetIndex) -> bool {
        let now = Instant::now();
        let mut records = self.inner.records.lock().unwrap();
        let Some(record) = records
            .iter_mut()
            .find(|r| r.addr == addr && r.net_idx == net_idx)
        else {
            return false;
        };

        if record.expires > now {
            record.timer = ExpiryTimer::spawn(
                record.expires,
                self.inner.expired_sink.clone(),
                LostNeighbour { addr, net_idx },
            );
            return false;
        }

        true
    }

    /// Checks if a neighbour is currently tracked.
    pub fn is_tracked(&self, addr: UnicastAddr, net_idx: NetIndex) -> bool {
        self.inner
            .records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.addr == addr && r.net_idx == net_idx)
    }

    /// The amount of tracked neighbours.
    pub fn len(&self) -> usize {
        self.inner.records.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time;

    use crate::routing_table::RoutingTable;
    use crate::RoutingConfig;

    use super::{LostNeighbour, NeighbourTable};

    type RouteExpiryRx = mpsc::Receiver<crate::routing_table::ExpiredRoute>;

    fn tables() -> (
        NeighbourTable,
        RoutingTable,
        mpsc::Receiver<LostNeighbour>,
        RouteExpiryRx,
    ) {
        let config = RoutingConfig::default();
        let (tx, rx) = mpsc::channel(1);
        let (route_tx, route_rx) = mpsc::channel(1);
        (
            NeighbourTable::new(&config, tx),
            RoutingTable::new(&config, route_tx),
            rx,
            route_rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn add_is_idempotent() {
        let (neighbours, _, _rx, _route_rx) = tables();

        neighbours.add(0x02.into(), 0.into()).await.unwrap();
        neighbours.add(0x02.into(), 0.into()).await.unwrap();

        assert_eq!(neighbours.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_is_reported() {
        let (neighbours, _, mut rx, _route_rx) = tables();

        neighbours.add(0x02.into(), 0.into()).await.unwrap();
        time::sleep(Duration::from_secs(21)).await;

        let lost = rx.try_recv().expect("loss was reported");
        assert_eq!(lost.addr, 0x02.into());
        assert!(neighbours.confirm_lost(lost.addr, lost.net_idx));
    }

    #[tokio::test(start_paused = true)]
    async fn hello_defers_loss() {
        let (neighbours, _, mut rx, _route_rx) = tables();

        neighbours.add(0x02.into(), 0.into()).await.unwrap();
        for _ in 0..4 {
            time::sleep(Duration::from_secs(15)).await;
            neighbours.refresh_from_hello(0x02.into());
        }
        assert!(rx.try_recv().is_err());

        time::sleep(Duration::from_secs(21)).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn late_hello_wins_against_reported_loss() {
        let (neighbours, _, mut rx, _route_rx) = tables();

        neighbours.add(0x02.into(), 0.into()).await.unwrap();
        time::sleep(Duration::from_secs(21)).await;
        let lost = rx.try_recv().unwrap();

        // The hello lands before the loss is processed.
        neighbours.refresh_from_hello(0x02.into());
        assert!(!neighbours.confirm_lost(lost.addr, lost.net_idx));
        assert!(neighbours.is_tracked(0x02.into(), 0.into()));

        // The re-armed record still expires eventually.
        time::sleep(Duration::from_secs(21)).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn remove_if_unused_consults_routes() {
        let (neighbours, routes, _rx, _route_rx) = tables();

        routes
            .create_valid(crate::routing_table::RouteData {
                source: crate::address::ElementRange::new(0x01.into(), 1),
                destination: crate::address::ElementRange::new(0x10.into(), 1),
                dest_seqno: 1.into(),
                next_hop: 0x02.into(),
                hop_count: 1,
                rssi: (-70).into(),
                net_idx: 0.into(),
                repairable: false,
            })
            .await
            .unwrap();
        neighbours.add(0x02.into(), 0.into()).await.unwrap();

        // A valid route still forwards through the neighbour.
        neighbours.remove_if_unused(0x02.into(), 0.into(), &routes);
        assert!(neighbours.is_tracked(0x02.into(), 0.into()));

        let key = routes.valid_routes()[0].key();
        routes.invalidate(key);
        neighbours.remove_if_unused(0x02.into(), 0.into(), &routes);
        assert!(!neighbours.is_tracked(0x02.into(), 0.into()));
    }
}
