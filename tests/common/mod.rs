//! An in-memory mesh of routers for scenario tests.
//!
//! Every node runs a real [`Router`] on top of a [`MeshHost`] which funnels
//! outgoing control messages into a shared hub task. The hub knows the link
//! topology and delivers broadcast frames to every link neighbour of the
//! sender and unicast frames point to point, stamping the receive metadata
//! the way the lower network layer would.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use rhizome::{
    CtlOp, CtlRx, CtlTx, HostStack, NetIndex, Router, RoutingConfig, SendError, SeqNo, UnicastAddr,
};

/// Signal strength stamped on every delivered frame.
pub const LINK_RSSI: i8 = -70;

/// Install a subscriber printing engine traces when `RUST_LOG` asks for
/// them. Safe to call from every test.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A control message in flight.
pub struct Frame {
    pub from: UnicastAddr,
    pub tx: CtlTx,
    pub op: CtlOp,
    pub payload: Vec<u8>,
}

/// A log record of one transmitted control message.
#[derive(Debug, Clone, Copy)]
pub struct SentFrame {
    pub from: u16,
    pub to: u16,
    pub op: CtlOp,
    pub payload_len: usize,
}

struct MeshHostInner {
    primary: u16,
    elems: u16,
    seq: AtomicU32,
    frames: mpsc::UnboundedSender<Frame>,
}

/// Host stack of one test node: element layout, a session sequence counter
/// and a funnel toward the hub.
#[derive(Clone)]
pub struct MeshHost {
    inner: Arc<MeshHostInner>,
}

impl MeshHost {
    pub fn new(primary: u16, elems: u16, frames: mpsc::UnboundedSender<Frame>) -> Self {
        MeshHost {
            inner: Arc::new(MeshHostInner {
                primary,
                elems,
                seq: AtomicU32::new(1),
                frames,
            }),
        }
    }
}

impl HostStack for MeshHost {
    fn send_ctl(&self, tx: CtlTx, op: CtlOp, payload: &[u8]) -> Result<(), SendError> {
        self.inner
            .frames
            .send(Frame {
                from: UnicastAddr::new(self.inner.primary),
                tx,
                op,
                payload: payload.to_vec(),
            })
            .map_err(|_| SendError)
    }

    fn subnet_exists(&self, _net_idx: NetIndex) -> bool {
        true
    }

    fn primary_addr(&self) -> UnicastAddr {
        UnicastAddr::new(self.inner.primary)
    }

    fn elem_count(&self) -> u16 {
        self.inner.elems
    }

    fn elem_find(&self, addr: UnicastAddr) -> bool {
        let addr = u16::from(addr);
        addr >= self.inner.primary && addr < self.inner.primary + self.inner.elems
    }

    fn session_seq(&self) -> SeqNo {
        SeqNo::from(self.inner.seq.fetch_add(1, Ordering::Relaxed))
    }
}

/// A router whose host is not connected to any other node. Returns the
/// receiving end of its frame funnel so tests can inspect what it sent.
pub fn lone_router(
    primary: u16,
    elems: u16,
    config: RoutingConfig,
) -> (Router<MeshHost>, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Router::new(MeshHost::new(primary, elems, tx), config), rx)
}

/// Drain every frame currently sitting in a lone router's funnel.
pub fn drain_frames(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

struct Node {
    primary: u16,
    elems: u16,
    router: Router<MeshHost>,
}

/// The assembled mesh: routers, topology and a transmit log.
pub struct Mesh {
    nodes: Arc<HashMap<u16, Node>>,
    links: Arc<Mutex<Vec<(u16, u16)>>>,
    log: Arc<Mutex<Vec<SentFrame>>>,
}

impl Mesh {
    /// Build a mesh of `(primary, elems)` nodes wired by undirected
    /// `links`, and start the delivery hub.
    pub fn new(nodes: &[(u16, u16)], links: &[(u16, u16)], config: RoutingConfig) -> Self {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let nodes: HashMap<u16, Node> = nodes
            .iter()
            .map(|&(primary, elems)| {
                let host = MeshHost::new(primary, elems, frames_tx.clone());
                (
                    primary,
                    Node {
                        primary,
                        elems,
                        router: Router::new(host, config.clone()),
                    },
                )
            })
            .collect();

        let mesh = Mesh {
            nodes: Arc::new(nodes),
            links: Arc::new(Mutex::new(links.to_vec())),
            log: Arc::new(Mutex::new(Vec::new())),
        };

        tokio::spawn(pump(
            Arc::clone(&mesh.nodes),
            Arc::clone(&mesh.links),
            Arc::clone(&mesh.log),
            frames_rx,
        ));

        mesh
    }

    pub fn router(&self, primary: u16) -> &Router<MeshHost> {
        &self.nodes[&primary].router
    }

    /// Deliver a hello beacon from `from` to `to`, as the heartbeat layer
    /// would.
    pub fn hello(&self, from: u16, to: u16) {
        self.nodes[&to].router.on_hello(UnicastAddr::new(from));
    }

    /// Cut the link between two nodes.
    pub fn drop_link(&self, a: u16, b: u16) {
        self.links
            .lock()
            .unwrap()
            .retain(|&(x, y)| !((x == a && y == b) || (x == b && y == a)));
    }

    /// Snapshot of every control message transmitted so far.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.log.lock().unwrap().clone()
    }
}

fn linked(links: &Mutex<Vec<(u16, u16)>>, a: u16, b: u16) -> bool {
    links
        .lock()
        .unwrap()
        .iter()
        .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
}

async fn pump(
    nodes: Arc<HashMap<u16, Node>>,
    links: Arc<Mutex<Vec<(u16, u16)>>>,
    log: Arc<Mutex<Vec<SentFrame>>>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
) {
    while let Some(frame) = frames.recv().await {
        let from = u16::from(frame.from);
        let to = u16::from(frame.tx.destination);

        log.lock().unwrap().push(SentFrame {
            from,
            to,
            op: frame.op,
            payload_len: frame.payload.len(),
        });

        let rx = CtlRx {
            source: frame.from,
            destination: frame.tx.destination,
            net_idx: frame.tx.net_idx,
            rssi: LINK_RSSI,
            recv_ttl: frame.tx.ttl,
        };

        if frame.tx.destination.is_broadcast() {
            for node in nodes.values() {
                if linked(&links, from, node.primary) {
                    let _ = node
                        .router
                        .on_ctl_receive(frame.op, rx, &frame.payload)
                        .await;
                }
            }
        } else {
            // Unicast reaches the addressed node only over a direct link.
            let target = nodes
                .values()
                .find(|n| to >= n.primary && to < n.primary + n.elems);
            if let Some(node) = target {
                if linked(&links, from, node.primary) {
                    let _ = node
                        .router
                        .on_ctl_receive(frame.op, rx, &frame.payload)
                        .await;
                }
            }
        }
    }
}
