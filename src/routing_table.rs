//! The routing table holds every directional reachability hypothesis the
//! node currently entertains.
//!
//! Entries live in one of two stores: the valid list holds routes data may
//! be forwarded on, the invalid list holds reverse entries under
//! construction and recently broken routes whose freshness state is still
//! worth consulting. Both stores draw from one fixed capacity pool, and
//! every entry is lifetime bounded.
//!
//! All lookups return owned snapshots captured under the store lock;
//! mutation happens afterwards through [`RouteKey`] addressed operations.
//! Entry expiration is reported on an mpsc sink passed at construction, and
//! the receiving task performs the actual removal; a snapshot is never
//! handed out for an entry whose deadline already passed, so the gap between
//! deadline and removal is unobservable.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Instant};
use tracing::{trace, warn};

use crate::address::{ElementRange, NetIndex, UnicastAddr};
use crate::error::RoutingError;
use crate::metric::Rssi;
use crate::sequence_number::SeqNo;
use crate::timer::ExpiryTimer;
use crate::RoutingConfig;

/// State of a route entry, doubling as the store it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    /// The route is established; data may be forwarded on it.
    Valid,
    /// The route is under construction or was recently broken. Consulted
    /// for freshness decisions, never used to forward data.
    Invalid,
}

/// Identity of a route entry: the base addresses of both element ranges and
/// the subnet. At most one valid and one invalid entry exist per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteKey {
    source: UnicastAddr,
    destination: UnicastAddr,
    net_idx: NetIndex,
}

impl RouteKey {
    /// Create a new `RouteKey` from the base addresses of both element
    /// ranges and the subnet.
    pub fn new(source: UnicastAddr, destination: UnicastAddr, net_idx: NetIndex) -> Self {
        RouteKey {
            source,
            destination,
            net_idx,
        }
    }

    /// The base address of the source element range.
    pub fn source(&self) -> UnicastAddr {
        self.source
    }

    /// The base address of the destination element range.
    pub fn destination(&self) -> UnicastAddr {
        self.destination
    }

    /// The subnet the route belongs to.
    pub fn net_idx(&self) -> NetIndex {
        self.net_idx
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{} -> {} (net {})",
            self.source, self.destination, self.net_idx
        ))
    }
}

/// The payload of a route entry, filled in by the caller on creation.
#[derive(Debug, Clone)]
pub struct RouteData {
    /// Element range of the originating node.
    pub source: ElementRange,
    /// Element range of the destination node.
    pub destination: ElementRange,
    /// Freshest sequence number known for the destination.
    pub dest_seqno: SeqNo,
    /// Link-local address the route forwards through.
    pub next_hop: UnicastAddr,
    /// Distance to the destination in hops.
    pub hop_count: u8,
    /// Running mean link signal strength along the path.
    pub rssi: Rssi,
    /// Subnet the route belongs to.
    pub net_idx: NetIndex,
    /// Whether the route may be repaired locally on a link break. Reserved.
    pub repairable: bool,
}

impl RouteData {
    fn key(&self) -> RouteKey {
        RouteKey {
            source: self.source.base(),
            destination: self.destination.base(),
            net_idx: self.net_idx,
        }
    }
}

/// An owned snapshot of a route entry. Changes to the table after the
/// snapshot was taken are not reflected; mutations go through the
/// [`key`](Self::key) instead.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    data: RouteData,
    state: RouteState,
    expires: Instant,
}

impl RouteEntry {
    /// The identity of the underlying entry.
    pub fn key(&self) -> RouteKey {
        self.data.key()
    }

    /// Element range of the originating node.
    pub fn source(&self) -> ElementRange {
        self.data.source
    }

    /// Element range of the destination node.
    pub fn destination(&self) -> ElementRange {
        self.data.destination
    }

    /// Freshest sequence number known for the destination.
    pub fn dest_seqno(&self) -> SeqNo {
        self.data.dest_seqno
    }

    /// Link-local address the route forwards through.
    pub fn next_hop(&self) -> UnicastAddr {
        self.data.next_hop
    }

    /// Distance to the destination in hops.
    pub fn hop_count(&self) -> u8 {
        self.data.hop_count
    }

    /// Running mean link signal strength along the path.
    pub fn rssi(&self) -> Rssi {
        self.data.rssi
    }

    /// Subnet the route belongs to.
    pub fn net_idx(&self) -> NetIndex {
        self.data.net_idx
    }

    /// Whether the route is marked for local repair. Reserved.
    pub fn repairable(&self) -> bool {
        self.data.repairable
    }

    /// The state of the entry at the time of the snapshot.
    pub fn state(&self) -> RouteState {
        self.state
    }

    /// The deadline of the entry at the time of the snapshot.
    pub fn expires(&self) -> Instant {
        self.expires
    }
}

/// Expiration notice of a route entry, delivered on the sink passed to
/// [`RoutingTable::new`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExpiredRoute {
    /// Identity of the expired entry.
    pub key: RouteKey,
    /// Which store the entry lived in when its timer was armed.
    pub state: RouteState,
    /// The entry is a reply-wait reverse entry; its expiry fires the route
    /// reply instead of removing the entry.
    pub reply_wait: bool,
}

/// A stored entry together with its lifetime bookkeeping. The semaphore
/// permit ties the entry to the shared capacity pool; dropping the entry
/// releases the slot and cancels the timer.
struct StoredEntry {
    data: RouteData,
    expires: Instant,
    timer: ExpiryTimer,
    _permit: OwnedSemaphorePermit,
}

impl StoredEntry {
    fn alive(&self, now: Instant) -> bool {
        self.expires > now
    }

    fn snapshot(&self, state: RouteState) -> RouteEntry {
        RouteEntry {
            data: self.data.clone(),
            state,
            expires: self.expires,
        }
    }
}

struct RoutingTableInner {
    valid: Mutex<Vec<StoredEntry>>,
    invalid: Mutex<Vec<StoredEntry>>,
    slots: Arc<Semaphore>,
    expired_sink: mpsc::Sender<ExpiredRoute>,
    route_lifetime: Duration,
    reply_wait: Duration,
    alloc_timeout: Duration,
}

/// The two-store routing table. Cheap to clone; all clones share the same
/// stores.
#[derive(Clone)]
pub struct RoutingTable {
    inner: Arc<RoutingTableInner>,
}

impl RoutingTable {
    /// Create a new empty `RoutingTable`. The passed channel is used to
    /// notify an external observer of route entry expiration events. It is
    /// the caller's responsibility to remove expired entries in response.
    pub(crate) fn new(config: &RoutingConfig, expired_sink: mpsc::Sender<ExpiredRoute>) -> Self {
        RoutingTable {
            inner: Arc::new(RoutingTableInner {
                valid: Mutex::new(Vec::new()),
                invalid: Mutex::new(Vec::new()),
                slots: Arc::new(Semaphore::new(config.route_capacity)),
                expired_sink,
                route_lifetime: config.route_lifetime,
                reply_wait: config.reply_wait,
                alloc_timeout: config.alloc_timeout,
            }),
        }
    }

    /// Install an established route.
    pub async fn create_valid(&self, data: RouteData) -> Result<(), RoutingError> {
        self.create(data, RouteState::Valid, false).await
    }

    /// Install a reverse or recently broken route.
    pub async fn create_invalid(&self, data: RouteData) -> Result<(), RoutingError> {
        self.create(data, RouteState::Invalid, false).await
    }

    /// Install the reply-wait reverse entry a destination creates on the
    /// first route request of a discovery round. Its deadline is the short
    /// reply-wait window, and its expiration validates the entry and fires
    /// the route reply rather than removing it.
    pub async fn create_invalid_reply_wait(&self, data: RouteData) -> Result<(), RoutingError> {
        self.create(data, RouteState::Invalid, true).await
    }

    async fn create(
        &self,
        data: RouteData,
        state: RouteState,
        reply_wait: bool,
    ) -> Result<(), RoutingError> {
        let permit = self.allocate().await?;

        let lifetime = if reply_wait {
            self.inner.reply_wait
        } else {
            self.inner.route_lifetime
        };
        let expires = Instant::now() + lifetime;
        let key = data.key();

        trace!(route = %key, ?state, "Installing route entry");

        let timer = ExpiryTimer::spawn(
            expires,
            self.inner.expired_sink.clone(),
            ExpiredRoute {
                key,
                state,
                reply_wait,
            },
        );

        self.store(state).lock().unwrap().push(StoredEntry {
            data,
            expires,
            timer,
            _permit: permit,
        });

        Ok(())
    }

    async fn allocate(&self) -> Result<OwnedSemaphorePermit, RoutingError> {
        match timeout(
            self.inner.alloc_timeout,
            Arc::clone(&self.inner.slots).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => {
                warn!("Route entry pool saturated");
                Err(RoutingError::ResourceExhausted)
            }
        }
    }

    fn store(&self, state: RouteState) -> &Mutex<Vec<StoredEntry>> {
        match state {
            RouteState::Valid => &self.inner.valid,
            RouteState::Invalid => &self.inner.invalid,
        }
    }

    fn search(
        &self,
        state: RouteState,
        mut matches: impl FnMut(&RouteData) -> bool,
    ) -> Option<RouteEntry> {
        let now = Instant::now();
        self.store(state)
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.alive(now) && matches(&e.data))
            .map(|e| e.snapshot(state))
    }

    fn collect(
        &self,
        state: RouteState,
        mut matches: impl FnMut(&RouteData) -> bool,
    ) -> Vec<RouteEntry> {
        let now = Instant::now();
        self.store(state)
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.alive(now) && matches(&e.data))
            .map(|e| e.snapshot(state))
            .collect()
    }

    /// Find the valid route whose endpoint ranges contain the given source
    /// and destination addresses.
    pub fn search_valid(
        &self,
        source: UnicastAddr,
        destination: UnicastAddr,
        net_idx: NetIndex,
    ) -> Option<RouteEntry> {
        self.search(RouteState::Valid, |d| {
            d.net_idx == net_idx && d.source.contains(source) && d.destination.contains(destination)
        })
    }

    /// Find a valid route by destination containment alone. Used by
    /// intermediate node lookups, which do not care who originated a route.
    pub fn search_valid_by_dst(
        &self,
        destination: UnicastAddr,
        net_idx: NetIndex,
    ) -> Option<RouteEntry> {
        self.search(RouteState::Valid, |d| {
            d.net_idx == net_idx && d.destination.contains(destination)
        })
    }

    /// Find a valid route by source containment alone.
    pub fn search_valid_by_src(
        &self,
        source: UnicastAddr,
        net_idx: NetIndex,
    ) -> Option<RouteEntry> {
        self.search(RouteState::Valid, |d| {
            d.net_idx == net_idx && d.source.contains(source)
        })
    }

    /// Find the invalid route whose endpoint ranges contain the given source
    /// and destination addresses.
    pub fn search_invalid(
        &self,
        source: UnicastAddr,
        destination: UnicastAddr,
        net_idx: NetIndex,
    ) -> Option<RouteEntry> {
        self.search(RouteState::Invalid, |d| {
            d.net_idx == net_idx && d.source.contains(source) && d.destination.contains(destination)
        })
    }

    /// Find an invalid route by destination containment alone.
    pub fn search_invalid_by_dst(
        &self,
        destination: UnicastAddr,
        net_idx: NetIndex,
    ) -> Option<RouteEntry> {
        self.search(RouteState::Invalid, |d| {
            d.net_idx == net_idx && d.destination.contains(destination)
        })
    }

    /// Find an invalid route by source containment alone.
    pub fn search_invalid_by_src(
        &self,
        source: UnicastAddr,
        net_idx: NetIndex,
    ) -> Option<RouteEntry> {
        self.search(RouteState::Invalid, |d| {
            d.net_idx == net_idx && d.source.contains(source)
        })
    }

    /// Find the valid route whose destination base address lies inside the
    /// given range and whose source base matches exactly. Used once both
    /// endpoints' element layouts are known.
    pub fn search_valid_dest_in_range(
        &self,
        range: ElementRange,
        source: UnicastAddr,
        net_idx: NetIndex,
    ) -> Option<RouteEntry> {
        self.search(RouteState::Valid, |d| {
            d.net_idx == net_idx && range.contains(d.destination.base()) && d.source.base() == source
        })
    }

    /// Find the invalid route whose destination base address lies inside the
    /// given range and whose source base matches exactly.
    pub fn search_invalid_dest_in_range(
        &self,
        range: ElementRange,
        source: UnicastAddr,
        net_idx: NetIndex,
    ) -> Option<RouteEntry> {
        self.search(RouteState::Invalid, |d| {
            d.net_idx == net_idx && range.contains(d.destination.base()) && d.source.base() == source
        })
    }

    /// Find the valid route whose source base address lies inside the given
    /// range and whose destination base matches exactly.
    pub fn search_valid_source_in_range(
        &self,
        range: ElementRange,
        destination: UnicastAddr,
        net_idx: NetIndex,
    ) -> Option<RouteEntry> {
        self.search(RouteState::Valid, |d| {
            d.net_idx == net_idx
                && range.contains(d.source.base())
                && d.destination.base() == destination
        })
    }

    /// Find the invalid route whose source base address lies inside the
    /// given range and whose destination base matches exactly. This is the
    /// lookup a route reply performs at an intermediate node: the reverse
    /// entry stored the single address the request named, the reply carries
    /// the authoritative range.
    pub fn search_invalid_source_in_range(
        &self,
        range: ElementRange,
        destination: UnicastAddr,
        net_idx: NetIndex,
    ) -> Option<RouteEntry> {
        self.search(RouteState::Invalid, |d| {
            d.net_idx == net_idx
                && range.contains(d.source.base())
                && d.destination.base() == destination
        })
    }

    /// Checks if any valid route forwards through the given next hop on the
    /// given subnet.
    pub fn uses_next_hop(&self, next_hop: UnicastAddr, net_idx: NetIndex) -> bool {
        self.search(RouteState::Valid, |d| {
            d.net_idx == net_idx && d.next_hop == next_hop
        })
        .is_some()
    }

    /// Snapshot every valid route forwarding through the given next hop on
    /// the given subnet.
    pub fn valid_routes_via(&self, next_hop: UnicastAddr, net_idx: NetIndex) -> Vec<RouteEntry> {
        self.collect(RouteState::Valid, |d| {
            d.net_idx == net_idx && d.next_hop == next_hop
        })
    }

    /// Snapshot every valid route toward a destination which forwards
    /// through the given next hop on the given subnet.
    pub fn valid_routes_to_via(
        &self,
        destination: UnicastAddr,
        next_hop: UnicastAddr,
        net_idx: NetIndex,
    ) -> Vec<RouteEntry> {
        self.collect(RouteState::Valid, |d| {
            d.net_idx == net_idx && d.next_hop == next_hop && d.destination.contains(destination)
        })
    }

    /// Snapshot the entire valid store.
    pub fn valid_routes(&self) -> Vec<RouteEntry> {
        self.collect(RouteState::Valid, |_| true)
    }

    /// Snapshot the entire invalid store.
    pub fn invalid_routes(&self) -> Vec<RouteEntry> {
        self.collect(RouteState::Invalid, |_| true)
    }

    /// Move an invalid entry to the valid store, restarting its lifetime.
    /// Returns false if no live invalid entry exists for the key.
    pub fn validate(&self, key: RouteKey) -> bool {
        self.transition(key, RouteState::Invalid, RouteState::Valid, false)
    }

    /// Move a valid entry to the invalid store, restarting its lifetime.
    /// Returns false if no live valid entry exists for the key.
    pub fn invalidate(&self, key: RouteKey) -> bool {
        self.transition(key, RouteState::Valid, RouteState::Invalid, false)
    }

    /// Validate the reply-wait reverse entry whose wait window just closed,
    /// and return a snapshot of it for the reply. Unlike
    /// [`validate`](Self::validate) this admits the entry whose deadline
    /// passed, because the caller *is* its expiration.
    pub(crate) fn complete_reply_wait(&self, key: RouteKey) -> Option<RouteEntry> {
        if !self.transition(key, RouteState::Invalid, RouteState::Valid, true) {
            return None;
        }
        self.search(RouteState::Valid, |d| d.key() == key)
    }

    fn transition(&self, key: RouteKey, from: RouteState, to: RouteState, admit_expired: bool) -> bool {
        let now = Instant::now();

        // Take the entry out of one store before touching the other; the
        // stores are locked one at a time.
        let entry = {
            let mut source_store = self.store(from).lock().unwrap();
            let Some(pos) = source_store
                .iter()
                .position(|e| e.data.key() == key && (admit_expired || e.alive(now)))
            else {
                return false;
            };
            source_store.swap_remove(pos)
        };

        trace!(route = %key, ?from, ?to, "Route entry changes state");

        let expires = now + self.inner.route_lifetime;
        let timer = ExpiryTimer::spawn(
            expires,
            self.inner.expired_sink.clone(),
            ExpiredRoute {
                key,
                state: to,
                reply_wait: false,
            },
        );

        self.store(to).lock().unwrap().push(StoredEntry {
            data: entry.data,
            expires,
            timer,
            _permit: entry._permit,
        });

        true
    }

    /// Restart the lifetime of an entry in place. Returns false if no live
    /// entry exists for the key in the given state.
    pub fn refresh(&self, key: RouteKey, state: RouteState) -> bool {
        let now = Instant::now();
        let mut store = self.store(state).lock().unwrap();
        let Some(entry) = store
            .iter_mut()
            .find(|e| e.data.key() == key && e.alive(now))
        else {
            return false;
        };

        entry.expires = now + self.inner.route_lifetime;
        entry.timer.reset(entry.expires);
        trace!(route = %key, "Route entry lifetime refreshed");
        true
    }

    /// Mutate the payload of a live invalid entry in place. The deadline is
    /// untouched. Returns false if no live invalid entry exists for the
    /// key.
    pub fn update_invalid(&self, key: RouteKey, update: impl FnOnce(&mut RouteData)) -> bool {
        let now = Instant::now();
        let mut store = self.store(RouteState::Invalid).lock().unwrap();
        let Some(entry) = store
            .iter_mut()
            .find(|e| e.data.key() == key && e.alive(now))
        else {
            return false;
        };

        update(&mut entry.data);
        // The key fields may have been corrected; nothing to do here, the
        // caller addresses the entry by its new key from now on.
        true
    }

    /// Remove an entry unconditionally, e.g. because the local link it
    /// forwards through dropped. Returns false if no entry exists for the
    /// key in the given state.
    pub fn link_drop(&self, key: RouteKey, state: RouteState) -> bool {
        let mut store = self.store(state).lock().unwrap();
        let Some(pos) = store.iter().position(|e| e.data.key() == key) else {
            return false;
        };
        store.swap_remove(pos);
        trace!(route = %key, ?state, "Route entry removed on link drop");
        true
    }

    /// Remove an entry whose deadline passed. A refresh or state change
    /// that happened after the expiration event was emitted wins: the entry
    /// stays.
    pub(crate) fn remove_expired(&self, key: RouteKey, state: RouteState) -> bool {
        let now = Instant::now();
        let mut store = self.store(state).lock().unwrap();
        let Some(pos) = store
            .iter()
            .position(|e| e.data.key() == key && !e.alive(now))
        else {
            return false;
        };
        store.swap_remove(pos);
        trace!(route = %key, ?state, "Expired route entry removed");
        true
    }
}
