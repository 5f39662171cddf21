//! A dedicated address module.
//!
//! Mesh nodes are addressed by 16 bit unicast addresses. A node exposes one or
//! more _elements_, addressable sub-units occupying a contiguous address range
//! which starts at the node's primary address. Routes are established between
//! element ranges, so lookups match by range containment rather than by
//! address equality.

use core::fmt;

/// A 16 bit unicast address of an element in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UnicastAddr(u16);

impl UnicastAddr {
    /// The unassigned address. Never valid as a source or destination of a
    /// route.
    pub const UNASSIGNED: UnicastAddr = UnicastAddr(0x0000);

    /// Network-layer broadcast group covering every node in the subnet. Used
    /// as the destination of flooded route requests.
    pub const ALL_NODES: UnicastAddr = UnicastAddr(0xffff);

    /// Create a new `UnicastAddr` from a raw value.
    pub const fn new(value: u16) -> Self {
        UnicastAddr(value)
    }

    /// Checks if this is the broadcast group address rather than an actual
    /// unicast address.
    pub const fn is_broadcast(&self) -> bool {
        self.0 == Self::ALL_NODES.0
    }
}

impl fmt::Display for UnicastAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:#06x}", self.0))
    }
}

impl From<u16> for UnicastAddr {
    fn from(value: u16) -> Self {
        UnicastAddr(value)
    }
}

impl From<UnicastAddr> for u16 {
    fn from(value: UnicastAddr) -> Self {
        value.0
    }
}

/// A contiguous range of element addresses, `count` elements starting at
/// `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementRange {
    base: UnicastAddr,
    count: u16,
}

impl ElementRange {
    /// Create a new `ElementRange` starting at `base` and spanning `count`
    /// elements. A single element is a range of count 1.
    pub const fn new(base: UnicastAddr, count: u16) -> Self {
        ElementRange { base, count }
    }

    /// The first address of the range.
    pub const fn base(&self) -> UnicastAddr {
        self.base
    }

    /// The amount of elements in the range.
    pub const fn count(&self) -> u16 {
        self.count
    }

    /// Checks if the given address falls inside this range.
    pub fn contains(&self, addr: UnicastAddr) -> bool {
        addr.0 >= self.base.0 && (addr.0 as u32) < self.base.0 as u32 + self.count as u32
    }

    /// Replace the base address and element count, keeping the range struct
    /// in place. Used when a route reply reveals the authoritative element
    /// layout of an endpoint which was only known by a single secondary
    /// address so far.
    pub fn correct(&mut self, base: UnicastAddr, count: u16) {
        self.base = base;
        self.count = count;
    }
}

impl fmt::Display for ElementRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}+{}", self.base, self.count))
    }
}

/// Identifier of a subnet, a keyed broadcast domain in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NetIndex(u16);

impl NetIndex {
    /// Create a new `NetIndex` from a raw value.
    pub const fn new(value: u16) -> Self {
        NetIndex(value)
    }
}

impl fmt::Display for NetIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}

impl From<u16> for NetIndex {
    fn from(value: u16) -> Self {
        NetIndex(value)
    }
}

impl From<NetIndex> for u16 {
    fn from(value: NetIndex) -> Self {
        value.0
    }
}
