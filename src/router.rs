//! The routing engine.
//!
//! [`Router`] wires the routing table, neighbour tracking, error
//! aggregation and discovery plumbing together and exposes the three entry
//! points the host stack drives: [`route_send_request`]
//! (data wants out, no route known), [`on_ctl_receive`] (a routing control
//! message arrived) and [`on_hello`] (a heartbeat arrived).
//!
//! Construction spawns two background tasks which process route entry
//! expirations and neighbour liveness losses. Both tasks stop when the last
//! `Router` handle is dropped.
//!
//! [`route_send_request`]: Router::route_send_request
//! [`on_ctl_receive`]: Router::on_ctl_receive
//! [`on_hello`]: Router::on_hello

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::address::{ElementRange, NetIndex, UnicastAddr};
use crate::aodv::{CtlOp, Rerr, Rrep, Rreq, Rwait};
use crate::discovery::{ReplyEvent, ReplyEvents};
use crate::error::RoutingError;
use crate::host::{CtlRx, CtlTx, HostStack};
use crate::metric::{path_cost, Rssi};
use crate::neighbour::{LostNeighbour, NeighbourTable};
use crate::rerr_collector::RerrCollector;
use crate::routing_table::{
    ExpiredRoute, RouteData, RouteEntry, RouteKey, RouteState, RoutingTable,
};
use crate::RoutingConfig;

/// Time between poll passes over the reply event queue while a ring search
/// is waiting.
const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// TTL of the first ring search emission. A TTL of 1 is not allowed on the
/// network layer, so the search starts one ring wider.
const RING_INITIAL_TTL: u8 = 2;

/// Factor by which a wait notice stretches the ring deadline. An
/// intermediate node promised a route, give it time to deliver before
/// widening the flood.
const RING_WAIT_PATIENCE_FACTOR: u32 = 4;

struct RouterInner<H> {
    host: H,
    config: RoutingConfig,
    table: RoutingTable,
    neighbours: NeighbourTable,
    reply_events: ReplyEvents,
    collector: RerrCollector,
    cancel_token: CancellationToken,
}

impl<H> Drop for RouterInner<H> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// The routing engine. Cheap to clone; all clones drive the same state.
pub struct Router<H> {
    inner: Arc<RouterInner<H>>,
}

impl<H> Clone for Router<H> {
    fn clone(&self) -> Self {
        Router {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H> Router<H>
where
    H: HostStack,
{
    /// Create a new `Router` on top of the given host stack.
    ///
    /// # Panics
    ///
    /// This will panic if not executed in the context of a tokio runtime.
    pub fn new(host: H, config: RoutingConfig) -> Self {
        let (expired_route_sink, expired_route_stream) = mpsc::channel(1);
        let (lost_neighbour_sink, lost_neighbour_stream) = mpsc::channel(1);

        let inner = Arc::new(RouterInner {
            table: RoutingTable::new(&config, expired_route_sink),
            neighbours: NeighbourTable::new(&config, lost_neighbour_sink),
            reply_events: ReplyEvents::new(&config),
            collector: RerrCollector::new(&config),
            cancel_token: CancellationToken::new(),
            host,
            config,
        });

        tokio::spawn(process_expired_routes(
            Arc::downgrade(&inner),
            expired_route_stream,
            inner.cancel_token.clone(),
        ));
        tokio::spawn(process_lost_neighbours(
            Arc::downgrade(&inner),
            lost_neighbour_stream,
            inner.cancel_token.clone(),
        ));

        Router { inner }
    }

    /// The host has data for a destination it found no valid route for.
    /// Runs a ring search and suspends the caller until a route is
    /// established or the search gives up with [`RoutingError::NoReply`].
    pub async fn route_send_request(&self, tx: CtlTx) -> Result<(), RoutingError> {
        if !self.inner.host.subnet_exists(tx.net_idx) {
            warn!(net = %tx.net_idx, "Route requested on an unknown subnet");
            return Err(crate::host::SendError.into());
        }

        // The route may have been established since the host looked.
        if self
            .inner
            .table
            .search_valid(self.inner.host.primary_addr(), tx.destination, tx.net_idx)
            .is_some()
        {
            return Ok(());
        }

        self.discover(tx.destination, tx.net_idx).await
    }

    /// A routing control message arrived from the lower transport layer.
    pub async fn on_ctl_receive(
        &self,
        op: CtlOp,
        rx: CtlRx,
        payload: &[u8],
    ) -> Result<(), RoutingError> {
        match op {
            CtlOp::Rreq => self.handle_rreq(rx, payload).await,
            CtlOp::Rrep => self.handle_rrep(rx, payload).await,
            CtlOp::Rwait => self.handle_rwait(rx, payload),
            CtlOp::Rerr => self.handle_rerr(rx, payload),
        }
    }

    /// A heartbeat arrived; refresh the sender's liveness deadline if it is
    /// a tracked neighbour.
    pub fn on_hello(&self, src: UnicastAddr) {
        self.inner.neighbours.refresh_from_hello(src);
    }

    /// Snapshot of the valid route containing the given destination, if
    /// any.
    pub fn valid_route_to(
        &self,
        destination: UnicastAddr,
        net_idx: NetIndex,
    ) -> Option<RouteEntry> {
        self.inner.table.search_valid_by_dst(destination, net_idx)
    }

    /// Snapshot of every established route.
    pub fn valid_routes(&self) -> Vec<RouteEntry> {
        self.inner.table.valid_routes()
    }

    /// Snapshot of every route under construction or recently broken.
    pub fn invalid_routes(&self) -> Vec<RouteEntry> {
        self.inner.table.invalid_routes()
    }

    /// Checks if a neighbour is currently tracked for liveness.
    pub fn tracked_neighbour(&self, addr: UnicastAddr, net_idx: NetIndex) -> bool {
        self.inner.neighbours.is_tracked(addr, net_idx)
    }

    /// The ring search: emit a route request with expanding TTL until the
    /// reply arrives or the rings run out.
    async fn discover(
        &self,
        destination: UnicastAddr,
        net_idx: NetIndex,
    ) -> Result<(), RoutingError> {
        let host = &self.inner.host;
        let mut ttl = RING_INITIAL_TTL;

        // A stale entry still tells us the last sequence number the
        // destination was seen with.
        let known_seqno = self
            .inner
            .table
            .search_invalid_by_dst(destination, net_idx)
            .map(|e| e.dest_seqno());

        let mut rreq = Rreq::new(
            host.primary_addr(),
            destination,
            host.elem_count(),
            host.session_seq(),
            known_seqno,
        );

        debug!(%destination, ttl, "Starting ring search");
        self.send_rreq(&rreq, ttl, net_idx)?;
        let mut ring_deadline = Instant::now() + self.inner.config.ring_interval;

        loop {
            let outcome = self.inner.reply_events.poll(destination);

            if outcome.replied {
                debug!(%destination, "Ring search received its reply");
                return Ok(());
            }

            // The reply event may have been dropped on a saturated queue;
            // the installed route is authoritative either way.
            if self
                .inner
                .table
                .search_valid(host.primary_addr(), destination, net_idx)
                .is_some()
            {
                debug!(%destination, "Route established while waiting");
                return Ok(());
            }

            if outcome.extend_patience {
                debug!(%destination, "Wait notice received, stretching ring patience");
                ring_deadline =
                    Instant::now() + self.inner.config.ring_interval * RING_WAIT_PATIENCE_FACTOR;
            }

            if Instant::now() >= ring_deadline {
                ttl += 1;
                if ttl >= self.inner.config.ring_max_ttl {
                    warn!(%destination, "Ring search reached the maximum TTL without a reply");
                    return Err(RoutingError::NoReply);
                }
                rreq.set_source_seqno(host.session_seq());
                debug!(%destination, ttl, "Ring timer expired, widening the search");
                self.send_rreq(&rreq, ttl, net_idx)?;
                ring_deadline = Instant::now() + self.inner.config.ring_interval;
            }

            time::sleep(DISCOVERY_POLL_INTERVAL).await;
        }
    }

    async fn handle_rreq(&self, rx: CtlRx, payload: &[u8]) -> Result<(), RoutingError> {
        let Some(mut rreq) = Rreq::from_bytes(payload) else {
            warn!(from = %rx.source, "Dropping short route request");
            return Err(RoutingError::DecodeShort);
        };

        // Fold the receiving link into the running path quality mean.
        let rssi = rreq.rssi().running_mean(rreq.hop_count(), rx.rssi);
        rreq.set_rssi(rssi);

        trace!(
            source = %rreq.source(),
            destination = %rreq.destination(),
            hop_count = rreq.hop_count(),
            rssi = %rssi,
            from = %rx.source,
            "Received route request"
        );

        if self.inner.host.elem_find(rreq.source()) {
            // A request of our own flooded back through a neighbour.
            trace!(source = %rreq.source(), "Route request originates from a local element");
            return Err(RoutingError::LocalLoopback);
        }

        if self.inner.host.elem_find(rreq.destination()) {
            return self.handle_rreq_as_destination(&rreq, rx).await;
        }

        if !rreq.is_destination_only() && !rreq.is_directed() {
            if let Some(route) = self
                .inner
                .table
                .search_valid_by_dst(rreq.destination(), rx.net_idx)
            {
                return self.handle_rreq_with_known_route(rreq, rx, route).await;
            }
        }

        self.relay_rreq(rreq, rx).await
    }

    /// A route request reached its destination: the first one of a
    /// discovery round opens the reply wait window, later ones compete on
    /// path cost, and anything after the window closed is late.
    async fn handle_rreq_as_destination(
        &self,
        rreq: &Rreq,
        rx: CtlRx,
    ) -> Result<(), RoutingError> {
        let table = &self.inner.table;

        // Reverse orientation: we are the source of the entry under
        // construction.
        if table
            .search_valid(rreq.destination(), rreq.source(), rx.net_idx)
            .is_some()
        {
            debug!(source = %rreq.source(), "Route request after the reply window closed");
            return Err(RoutingError::LateRreq);
        }

        if let Some(existing) = table.search_invalid(rreq.destination(), rreq.source(), rx.net_idx)
        {
            let challenger = path_cost(rreq.hop_count(), rreq.rssi());
            let incumbent = path_cost(existing.hop_count(), existing.rssi());
            if challenger < incumbent {
                debug!(
                    source = %rreq.source(),
                    challenger,
                    incumbent,
                    "Cheaper path during the reply wait window, replacing"
                );
                table.update_invalid(existing.key(), |data| {
                    data.dest_seqno = rreq.source_seqno();
                    data.next_hop = rx.source;
                    data.hop_count = rreq.hop_count();
                    data.rssi = rreq.rssi();
                });
            }
            return Ok(());
        }

        debug!(
            source = %rreq.source(),
            "First route request of a discovery round, opening the reply wait window"
        );
        table
            .create_invalid_reply_wait(RouteData {
                source: ElementRange::new(rreq.destination(), self.inner.host.elem_count()),
                destination: ElementRange::new(rreq.source(), rreq.source_elems()),
                dest_seqno: rreq.source_seqno(),
                next_hop: rx.source,
                hop_count: rreq.hop_count(),
                rssi: rreq.rssi(),
                net_idx: rx.net_idx,
                repairable: false,
            })
            .await
    }

    /// An intermediate node holding a fresh route to the requested
    /// destination shortcuts the flood: a directed request travels the
    /// known route, and a wait notice tells the originator to be patient.
    async fn handle_rreq_with_known_route(
        &self,
        mut rreq: Rreq,
        rx: CtlRx,
        route: RouteEntry,
    ) -> Result<(), RoutingError> {
        let table = &self.inner.table;

        if table
            .search_invalid(rreq.destination(), rreq.source(), rx.net_idx)
            .is_some()
        {
            // Another copy of the same flood already passed through here.
            trace!(source = %rreq.source(), "Duplicate route request, dropped");
            return Ok(());
        }

        debug!(
            destination = %rreq.destination(),
            next_hop = %route.next_hop(),
            "Established route known, shortcutting the flood"
        );

        // Reverse entry toward the originator. The source element count is
        // corrected once the reply comes through.
        table
            .create_invalid(RouteData {
                source: ElementRange::new(rreq.destination(), 1),
                destination: ElementRange::new(rreq.source(), rreq.source_elems()),
                dest_seqno: rreq.source_seqno(),
                next_hop: rx.source,
                hop_count: rreq.hop_count(),
                rssi: rreq.rssi(),
                net_idx: rx.net_idx,
                repairable: false,
            })
            .await?;

        // Only shortcut if our stored state is at least as fresh as what
        // the originator already knows.
        if !rreq.dest_seqno().is_fresher_than(route.dest_seqno()) {
            // The receiving link is already folded into the running mean;
            // the directed request carries it forward unchanged.
            rreq.mark_directed();
            rreq.set_hop_count(rreq.hop_count().saturating_add(1));
            self.send_rreq(&rreq, 1, rx.net_idx)?;

            let rwait = Rwait::new(
                rreq.destination(),
                rreq.source(),
                rreq.source_seqno(),
                route.hop_count(),
            );
            self.send_rwait(&rwait, rx.source, rx.net_idx)?;
        }

        Ok(())
    }

    /// A plain intermediate node relays the flood, remembering the reverse
    /// path the reply will need.
    async fn relay_rreq(&self, mut rreq: Rreq, rx: CtlRx) -> Result<(), RoutingError> {
        let table = &self.inner.table;

        if rx.recv_ttl <= 1 {
            trace!(destination = %rreq.destination(), "Route request TTL exhausted, not relaying");
            return Ok(());
        }
        let relay_ttl = rx.recv_ttl - 1;

        match table.search_invalid(rreq.destination(), rreq.source(), rx.net_idx) {
            None => {
                trace!(
                    source = %rreq.source(),
                    destination = %rreq.destination(),
                    "Relaying flooded route request"
                );
                table
                    .create_invalid(RouteData {
                        source: ElementRange::new(rreq.destination(), 1),
                        destination: ElementRange::new(rreq.source(), rreq.source_elems()),
                        dest_seqno: rreq.source_seqno(),
                        next_hop: rx.source,
                        hop_count: rreq.hop_count(),
                        rssi: rreq.rssi(),
                        net_idx: rx.net_idx,
                        repairable: false,
                    })
                    .await?;

                rreq.set_hop_count(rreq.hop_count().saturating_add(1));
                self.send_rreq(&rreq, relay_ttl, rx.net_idx)
            }
            Some(existing) if rreq.source_seqno().is_fresher_than(existing.dest_seqno()) => {
                // A fresher discovery round for a pair we already relayed.
                trace!(
                    source = %rreq.source(),
                    destination = %rreq.destination(),
                    "Fresher discovery round, refreshing the reverse entry and relaying"
                );
                table.update_invalid(existing.key(), |data| {
                    data.dest_seqno = rreq.source_seqno();
                    data.rssi = rreq.rssi();
                });
                table.refresh(existing.key(), RouteState::Invalid);

                rreq.set_hop_count(rreq.hop_count().saturating_add(1));
                self.send_rreq(&rreq, relay_ttl, rx.net_idx)
            }
            Some(_) => {
                trace!(source = %rreq.source(), "Duplicate route request, dropped");
                Ok(())
            }
        }
    }

    async fn handle_rrep(&self, rx: CtlRx, payload: &[u8]) -> Result<(), RoutingError> {
        let Some(mut rrep) = Rrep::from_bytes(payload) else {
            warn!(from = %rx.source, "Dropping short route reply");
            return Err(RoutingError::DecodeShort);
        };

        trace!(
            source = %rrep.source(),
            destination = %rrep.destination(),
            hop_count = rrep.hop_count(),
            from = %rx.source,
            "Received route reply"
        );

        let table = &self.inner.table;

        if rrep.source() == self.inner.host.primary_addr() {
            // We originated the answered request. The reply's hop count is
            // the sender's distance, ours is one more.
            let install = match table.search_valid(rrep.source(), rrep.destination(), rx.net_idx) {
                None => true,
                Some(existing) if rrep.dest_seqno().is_fresher_than(existing.dest_seqno()) => {
                    table.invalidate(existing.key())
                }
                Some(_) => false,
            };
            if !install {
                trace!(destination = %rrep.destination(), "Stale route reply, dropped");
                return Ok(());
            }

            let hop_count = rrep.hop_count().saturating_add(1);
            table
                .create_valid(RouteData {
                    source: ElementRange::new(rrep.source(), self.inner.host.elem_count()),
                    destination: ElementRange::new(rrep.destination(), rrep.dest_elems()),
                    dest_seqno: rrep.dest_seqno(),
                    next_hop: rx.source,
                    hop_count,
                    rssi: Rssi::default(),
                    net_idx: rx.net_idx,
                    repairable: rrep.repairable(),
                })
                .await?;
            debug!(
                destination = %rrep.destination(),
                next_hop = %rx.source,
                hop_count,
                "Forward route installed"
            );

            if let Err(e) = self.inner.neighbours.add(rx.source, rx.net_idx).await {
                warn!(neighbour = %rx.source, error = %e, "Could not track next hop");
            }

            // Wake the ring search.
            if let Err(e) = self
                .inner
                .reply_events
                .push(ReplyEvent::reply(rrep.destination()))
            {
                warn!(error = %e, "Reply event dropped, the ring search will re-emit");
            }
            return Ok(());
        }

        // We forwarded the request at some point; the reverse entry knows
        // the way back to the originator. The reply carries the
        // authoritative element layout of the destination, which the
        // request only knew by a single address.
        let authoritative = ElementRange::new(rrep.destination(), rrep.dest_elems());
        let Some(reverse) =
            table.search_invalid_source_in_range(authoritative, rrep.source(), rx.net_idx)
        else {
            trace!(
                destination = %rrep.destination(),
                "No reverse entry for a forwarded route reply, dropped"
            );
            return Ok(());
        };

        table.update_invalid(reverse.key(), |data| {
            data.source.correct(rrep.destination(), rrep.dest_elems());
        });
        let reverse_key = RouteKey::new(
            rrep.destination(),
            reverse.destination().base(),
            rx.net_idx,
        );
        table.validate(reverse_key);
        if let Err(e) = self
            .inner
            .neighbours
            .add(reverse.next_hop(), rx.net_idx)
            .await
        {
            warn!(neighbour = %reverse.next_hop(), error = %e, "Could not track next hop");
        }

        let hop_count = rrep.hop_count().saturating_add(1);
        table
            .create_valid(RouteData {
                source: ElementRange::new(rrep.source(), reverse.destination().count()),
                destination: authoritative,
                dest_seqno: rrep.dest_seqno(),
                next_hop: rx.source,
                hop_count,
                rssi: Rssi::default(),
                net_idx: rx.net_idx,
                repairable: rrep.repairable(),
            })
            .await?;
        if let Err(e) = self.inner.neighbours.add(rx.source, rx.net_idx).await {
            warn!(neighbour = %rx.source, error = %e, "Could not track next hop");
        }

        debug!(
            source = %rrep.source(),
            destination = %rrep.destination(),
            next_hop = %reverse.next_hop(),
            "Forwarding route reply toward the originator"
        );
        rrep.set_hop_count(hop_count);
        self.send_rrep(&rrep, reverse.next_hop(), rx.net_idx)
    }

    fn handle_rwait(&self, rx: CtlRx, payload: &[u8]) -> Result<(), RoutingError> {
        let Some(rwait) = Rwait::from_bytes(payload) else {
            warn!(from = %rx.source, "Dropping short wait notice");
            return Err(RoutingError::DecodeShort);
        };

        trace!(
            source = %rwait.source(),
            destination = %rwait.destination(),
            hop_count = rwait.hop_count(),
            from = %rx.source,
            "Received wait notice"
        );

        if rwait.source() == self.inner.host.primary_addr() {
            // Our own discovery is being shortcut somewhere.
            if self
                .inner
                .table
                .search_valid(rwait.source(), rwait.destination(), rx.net_idx)
                .is_some()
            {
                trace!(destination = %rwait.destination(), "Route already established, wait notice ignored");
                return Ok(());
            }

            debug!(
                destination = %rwait.destination(),
                hop_count = rwait.hop_count(),
                "Intermediate node promises a route, extending patience"
            );
            if let Err(e) = self
                .inner
                .reply_events
                .push(ReplyEvent::wait(rwait.destination(), rwait.hop_count()))
            {
                warn!(error = %e, "Wait event dropped, the ring search will re-emit");
            }
            return Ok(());
        }

        // Relay toward the originator along the reverse entry the request
        // left behind.
        match self
            .inner
            .table
            .search_invalid(rwait.destination(), rwait.source(), rx.net_idx)
        {
            Some(reverse) => {
                trace!(
                    next_hop = %reverse.next_hop(),
                    "Relaying wait notice toward the originator"
                );
                self.send_rwait(&rwait, reverse.next_hop(), rx.net_idx)
            }
            None => {
                trace!(source = %rwait.source(), "No reverse entry for wait notice, dropped");
                Ok(())
            }
        }
    }

    fn handle_rerr(&self, rx: CtlRx, payload: &[u8]) -> Result<(), RoutingError> {
        let Some(rerr) = Rerr::from_bytes(payload) else {
            warn!(from = %rx.source, "Dropping short route error");
            return Err(RoutingError::DecodeShort);
        };

        debug!(
            from = %rx.source,
            count = rerr.destinations().len(),
            "Received route error"
        );

        for destination in rerr.destinations() {
            let broken =
                self.inner
                    .table
                    .valid_routes_to_via(destination.address, rx.source, rx.net_idx);
            for route in broken {
                self.teardown_route(&route);
            }
        }

        self.flush_rerrs();
        Ok(())
    }

    /// Tear down one route whose next hop link broke: invalidate it, tell
    /// the collector who upstream must hear about it, and release
    /// neighbours no remaining route uses.
    fn teardown_route(&self, broken: &RouteEntry) {
        let table = &self.inner.table;
        let neighbours = &self.inner.neighbours;
        let net_idx = broken.net_idx();

        if broken.source().base() == self.inner.host.primary_addr() {
            // We are the terminal node of this path; nobody upstream to
            // notify.
            debug!(route = %broken.key(), "Locally originated route broke");
            table.invalidate(broken.key());
            neighbours.remove_if_unused(broken.next_hop(), net_idx, table);
            return;
        }

        match table.search_valid(broken.destination().base(), broken.source().base(), net_idx) {
            Some(reverse) => {
                debug!(
                    route = %broken.key(),
                    upstream = %reverse.next_hop(),
                    "Transit route broke, queueing route error"
                );
                if let Err(e) = self.inner.collector.record(
                    reverse.next_hop(),
                    net_idx,
                    broken.destination().base(),
                    broken.dest_seqno(),
                ) {
                    warn!(error = %e, "Route error record dropped");
                }

                table.invalidate(broken.key());
                neighbours.remove_if_unused(broken.next_hop(), net_idx, table);
                table.invalidate(reverse.key());
                neighbours.remove_if_unused(reverse.next_hop(), net_idx, table);
            }
            None => {
                // No reverse route toward the originator, nothing to
                // notify.
                trace!(route = %broken.key(), "Transit route broke without a reverse route");
                table.invalidate(broken.key());
                neighbours.remove_if_unused(broken.next_hop(), net_idx, table);
            }
        }
    }

    /// Emit one coalesced route error per aggregated next hop and clear the
    /// collector. Sends happen without holding any lock.
    fn flush_rerrs(&self) {
        for record in self.inner.collector.drain() {
            let rerr = Rerr::new(record.destinations);
            debug!(
                next_hop = %record.next_hop,
                count = rerr.destinations().len(),
                "Sending coalesced route error"
            );

            let mut buf = BytesMut::with_capacity(rerr.wire_size());
            rerr.write_bytes(&mut buf);
            let tx = CtlTx {
                destination: record.next_hop,
                net_idx: record.net_idx,
                ttl: 0,
            };
            if let Err(e) = self.inner.host.send_ctl(tx, CtlOp::Rerr, &buf) {
                warn!(next_hop = %record.next_hop, error = %e, "Failed to send route error");
            }
        }
    }

    /// A route entry's lifetime ran out. Reply-wait entries answer their
    /// request; everything else is removed.
    async fn handle_expired_route(&self, expired: ExpiredRoute) {
        if !expired.reply_wait {
            if self.inner.table.remove_expired(expired.key, expired.state) {
                debug!(route = %expired.key, state = ?expired.state, "Route entry expired");
            }
            return;
        }

        // The reply wait window closed: the best request of the round won.
        // Validate the reverse entry and answer the originator.
        let Some(entry) = self.inner.table.complete_reply_wait(expired.key) else {
            trace!(route = %expired.key, "Reply wait entry vanished before its window closed");
            return;
        };

        debug!(
            route = %expired.key,
            next_hop = %entry.next_hop(),
            "Reply wait window closed, answering the route request"
        );

        if let Err(e) = self
            .inner
            .neighbours
            .add(entry.next_hop(), entry.net_idx())
            .await
        {
            warn!(neighbour = %entry.next_hop(), error = %e, "Could not track next hop");
        }

        let rrep = Rrep::new(
            entry.destination().base(),
            entry.source().base(),
            self.inner.host.session_seq(),
            0,
            self.inner.host.elem_count(),
        );
        if let Err(e) = self.send_rrep(&rrep, entry.next_hop(), entry.net_idx()) {
            warn!(error = %e, "Failed to answer route request");
        }
    }

    /// A neighbour went silent: tear down every route through it, flush the
    /// collected errors and drop the record.
    fn handle_lost_neighbour(&self, lost: LostNeighbour) {
        if !self.inner.neighbours.confirm_lost(lost.addr, lost.net_idx) {
            trace!(neighbour = %lost.addr, "Reported neighbour loss no longer current");
            return;
        }

        debug!(neighbour = %lost.addr, net = %lost.net_idx, "Neighbour went silent, tearing down its routes");

        for route in self.inner.table.valid_routes_via(lost.addr, lost.net_idx) {
            self.teardown_route(&route);
        }

        self.flush_rerrs();
        self.inner.neighbours.remove(lost.addr, lost.net_idx);
    }

    fn send_rreq(&self, rreq: &Rreq, ttl: u8, net_idx: NetIndex) -> Result<(), RoutingError> {
        // A directed request travels the known route instead of flooding.
        let mut destination = UnicastAddr::ALL_NODES;
        if rreq.is_directed() {
            if let Some(route) = self
                .inner
                .table
                .search_valid_by_dst(rreq.destination(), net_idx)
            {
                destination = route.next_hop();
            }
        }

        trace!(
            destination = %rreq.destination(),
            network_destination = %destination,
            ttl,
            "Sending route request"
        );

        let mut buf = BytesMut::with_capacity(rreq.wire_size());
        rreq.write_bytes(&mut buf);
        let tx = CtlTx {
            destination,
            net_idx,
            ttl,
        };
        self.inner.host.send_ctl(tx, CtlOp::Rreq, &buf)?;
        Ok(())
    }

    fn send_rrep(
        &self,
        rrep: &Rrep,
        next_hop: UnicastAddr,
        net_idx: NetIndex,
    ) -> Result<(), RoutingError> {
        trace!(
            source = %rrep.source(),
            destination = %rrep.destination(),
            %next_hop,
            "Sending route reply"
        );

        let mut buf = BytesMut::with_capacity(rrep.wire_size());
        rrep.write_bytes(&mut buf);
        let tx = CtlTx {
            destination: next_hop,
            net_idx,
            ttl: 0,
        };
        self.inner.host.send_ctl(tx, CtlOp::Rrep, &buf)?;
        Ok(())
    }

    fn send_rwait(
        &self,
        rwait: &Rwait,
        next_hop: UnicastAddr,
        net_idx: NetIndex,
    ) -> Result<(), RoutingError> {
        trace!(
            source = %rwait.source(),
            destination = %rwait.destination(),
            %next_hop,
            "Sending wait notice"
        );

        let mut buf = BytesMut::with_capacity(rwait.wire_size());
        rwait.write_bytes(&mut buf);
        let tx = CtlTx {
            destination: next_hop,
            net_idx,
            ttl: 0,
        };
        self.inner.host.send_ctl(tx, CtlOp::Rwait, &buf)?;
        Ok(())
    }
}

/// Task which owns the route expiry stream. Holds the router weakly so the
/// engine can shut down while the stream is idle.
async fn process_expired_routes<H: HostStack>(
    inner: Weak<RouterInner<H>>,
    mut stream: mpsc::Receiver<ExpiredRoute>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => return,
            expired = stream.recv() => {
                let Some(expired) = expired else { return };
                let Some(inner) = inner.upgrade() else { return };
                Router { inner }.handle_expired_route(expired).await;
            }
        }
    }
}

/// Task which owns the neighbour loss stream.
async fn process_lost_neighbours<H: HostStack>(
    inner: Weak<RouterInner<H>>,
    mut stream: mpsc::Receiver<LostNeighbour>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => return,
            lost = stream.recv() => {
                let Some(lost) = lost else { return };
                let Some(inner) = inner.upgrade() else { return };
                Router { inner }.handle_lost_neighbour(lost);
            }
        }
    }
}
