//! The route request PDU.

use bytes::{Buf, BufMut};

use crate::address::UnicastAddr;
use crate::metric::Rssi;
use crate::sequence_number::SeqNo;

use super::{get_u24_le, put_u24_le};

/// Flag bit requesting a gratuitous reply toward the destination.
const RREQ_FLAG_GRATUITOUS: u8 = 0x01;
/// Flag bit restricting replies to the destination itself.
const RREQ_FLAG_DESTINATION_ONLY: u8 = 0x02;
/// Flag bit marking the destination sequence number as unknown; the trailing
/// sequence field is omitted when set.
const RREQ_FLAG_UNKNOWN_SEQNO: u8 = 0x04;
/// Flag bit marking a directed request, sent unicast by an intermediate node
/// which holds a route to the destination.
const RREQ_FLAG_DIRECTED: u8 = 0x08;

/// Wire size of a route request without the optional trailing destination
/// sequence number.
const RREQ_BASE_WIRE_SIZE: usize = 12;

/// Maximum wire size of an encoded route request.
pub const RREQ_SDU_MAX: usize = 15;

/// A route request, the discovery probe of the protocol.
///
/// Requests flood outward from the originator with a bounded TTL,
/// accumulating a hop count and a running mean of the link signal strength.
/// A directed request (the `I` flag) instead travels unicast along a known
/// route toward the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Rreq {
    /// Primary address of the originating node.
    source: UnicastAddr,
    /// Address the originator wants to reach.
    destination: UnicastAddr,
    /// Amount of elements of the originating node.
    source_elems: u16,
    /// Hops travelled so far.
    hop_count: u8,
    /// Running weighted mean of the link signal strength along the path.
    rssi: Rssi,
    /// Request a gratuitous reply.
    gratuitous: bool,
    /// Only the destination itself may answer.
    destination_only: bool,
    /// The originator does not know a destination sequence number.
    unknown_seqno: bool,
    /// Directed request travelling a known route.
    directed: bool,
    /// Session sequence number of the originator.
    source_seqno: SeqNo,
    /// Last destination sequence number known to the originator. Only
    /// meaningful when `unknown_seqno` is not set.
    dest_seqno: SeqNo,
}

impl Rreq {
    /// Create a new flooded `Rreq` for the given destination. A known
    /// destination sequence number seeds the freshness field; absence sets
    /// the unknown-sequence flag.
    pub fn new(
        source: UnicastAddr,
        destination: UnicastAddr,
        source_elems: u16,
        source_seqno: SeqNo,
        dest_seqno: Option<SeqNo>,
    ) -> Self {
        Self {
            source,
            destination,
            source_elems,
            hop_count: 0,
            rssi: Rssi::default(),
            gratuitous: false,
            destination_only: false,
            unknown_seqno: dest_seqno.is_none(),
            directed: false,
            source_seqno,
            dest_seqno: dest_seqno.unwrap_or_default(),
        }
    }

    /// Primary address of the originator.
    pub fn source(&self) -> UnicastAddr {
        self.source
    }

    /// Address the originator wants to reach.
    pub fn destination(&self) -> UnicastAddr {
        self.destination
    }

    /// Amount of elements of the originating node.
    pub fn source_elems(&self) -> u16 {
        self.source_elems
    }

    /// Hops travelled so far.
    pub fn hop_count(&self) -> u8 {
        self.hop_count
    }

    /// Running mean link signal strength along the path so far.
    pub fn rssi(&self) -> Rssi {
        self.rssi
    }

    /// Whether this request travels a known route instead of flooding.
    pub fn is_directed(&self) -> bool {
        self.directed
    }

    /// Whether only the destination may answer this request.
    pub fn is_destination_only(&self) -> bool {
        self.destination_only
    }

    /// Session sequence number of the originator.
    pub fn source_seqno(&self) -> SeqNo {
        self.source_seqno
    }

    /// Last destination sequence number known to the originator, or the
    /// default value if unknown.
    pub fn dest_seqno(&self) -> SeqNo {
        self.dest_seqno
    }

    /// Whether the originator knows no destination sequence number.
    pub fn unknown_seqno(&self) -> bool {
        self.unknown_seqno
    }

    /// Update the travelled hop count before relaying.
    pub fn set_hop_count(&mut self, hop_count: u8) {
        self.hop_count = hop_count;
    }

    /// Update the running signal strength mean before relaying.
    pub fn set_rssi(&mut self, rssi: Rssi) {
        self.rssi = rssi;
    }

    /// Turn this request into a directed one.
    pub fn mark_directed(&mut self) {
        self.directed = true;
    }

    /// Refresh the originator sequence number for a ring search re-emission.
    pub fn set_source_seqno(&mut self, seqno: SeqNo) {
        self.source_seqno = seqno;
    }

    /// Calculates the size on the wire of this `Rreq`.
    pub fn wire_size(&self) -> usize {
        if self.unknown_seqno {
            RREQ_BASE_WIRE_SIZE
        } else {
            RREQ_BASE_WIRE_SIZE + 3
        }
    }

    /// Construct an `Rreq` from wire bytes. Returns [`None`] if the buffer
    /// is too short for the encoding its flags announce.
    pub fn from_bytes(mut src: &[u8]) -> Option<Self> {
        if src.remaining() < RREQ_BASE_WIRE_SIZE {
            return None;
        }

        let source = src.get_u16_le().into();
        let destination = src.get_u16_le().into();
        let source_elems = src.get_u16_le();
        let hop_count = src.get_u8();
        let rssi = (src.get_u8() as i8).into();
        let flags = src.get_u8();
        let source_seqno = get_u24_le(&mut src).into();

        let unknown_seqno = flags & RREQ_FLAG_UNKNOWN_SEQNO != 0;
        let dest_seqno = if unknown_seqno {
            SeqNo::default()
        } else {
            if src.remaining() < 3 {
                return None;
            }
            get_u24_le(&mut src).into()
        };

        Some(Self {
            source,
            destination,
            source_elems,
            hop_count,
            rssi,
            gratuitous: flags & RREQ_FLAG_GRATUITOUS != 0,
            destination_only: flags & RREQ_FLAG_DESTINATION_ONLY != 0,
            unknown_seqno,
            directed: flags & RREQ_FLAG_DIRECTED != 0,
            source_seqno,
            dest_seqno,
        })
    }

    /// Encode this `Rreq` for transmission.
    pub fn write_bytes(&self, dst: &mut bytes::BytesMut) {
        let mut flags = 0;
        if self.gratuitous {
            flags |= RREQ_FLAG_GRATUITOUS;
        }
        if self.destination_only {
            flags |= RREQ_FLAG_DESTINATION_ONLY;
        }
        if self.unknown_seqno {
            flags |= RREQ_FLAG_UNKNOWN_SEQNO;
        }
        if self.directed {
            flags |= RREQ_FLAG_DIRECTED;
        }

        dst.put_u16_le(self.source.into());
        dst.put_u16_le(self.destination.into());
        dst.put_u16_le(self.source_elems);
        dst.put_u8(self.hop_count);
        dst.put_u8(i8::from(self.rssi) as u8);
        dst.put_u8(flags);
        put_u24_le(dst, self.source_seqno.truncated());
        if !self.unknown_seqno {
            put_u24_le(dst, self.dest_seqno.truncated());
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::sequence_number::SeqNo;

    #[test]
    fn encoding_with_known_seqno() {
        let mut buf = bytes::BytesMut::new();

        let mut rreq = super::Rreq::new(
            0x0001.into(),
            0x0203.into(),
            2,
            SeqNo::from(0x00aa_bbcc),
            Some(SeqNo::from(0x0011_2233)),
        );
        rreq.set_hop_count(3);
        rreq.set_rssi((-70).into());

        rreq.write_bytes(&mut buf);

        assert_eq!(buf.len(), 15);
        assert_eq!(
            buf[..15],
            [
                1, 0, 3, 2, 2, 0, 3, 0xba, 0b0000_0000, 0xcc, 0xbb, 0xaa, 0x33, 0x22, 0x11
            ]
        );
    }

    #[test]
    fn encoding_with_unknown_seqno() {
        let mut buf = bytes::BytesMut::new();

        let rreq = super::Rreq::new(
            0x0001.into(),
            0x0203.into(),
            1,
            SeqNo::from(0x0000_0007),
            None,
        );

        rreq.write_bytes(&mut buf);

        assert_eq!(buf.len(), 12);
        assert_eq!(buf[..12], [1, 0, 3, 2, 1, 0, 0, 0, 0b0000_0100, 7, 0, 0]);
    }

    #[test]
    fn decoding() {
        let buf = [
            0x10, 0x00, 0x20, 0x00, 0x03, 0x00, 2, 0xb0, 0b0000_1000, 5, 0, 0, 9, 0, 0,
        ];

        let rreq = super::Rreq::from_bytes(&buf).expect("buffer holds a full encoding");

        assert_eq!(rreq.source(), 0x0010.into());
        assert_eq!(rreq.destination(), 0x0020.into());
        assert_eq!(rreq.source_elems(), 3);
        assert_eq!(rreq.hop_count(), 2);
        assert_eq!(i8::from(rreq.rssi()), -80);
        assert!(rreq.is_directed());
        assert!(!rreq.is_destination_only());
        assert!(!rreq.unknown_seqno());
        assert_eq!(rreq.source_seqno(), SeqNo::from(5));
        assert_eq!(rreq.dest_seqno(), SeqNo::from(9));
    }

    #[test]
    fn decode_short_buffer() {
        assert!(super::Rreq::from_bytes(&[0; 11]).is_none());
        // The unknown-seqno flag is clear, so the trailing sequence number is
        // required.
        let buf = [0, 0, 0, 0, 0, 0, 0, 0, 0b0000_0000, 0, 0, 0];
        assert!(super::Rreq::from_bytes(&buf).is_none());
    }

    #[test]
    fn roundtrip() {
        let mut rreq = super::Rreq::new(
            0x0042.into(),
            0x1337.into(),
            4,
            SeqNo::from(812_004),
            Some(SeqNo::from(11)),
        );
        rreq.set_hop_count(5);
        rreq.set_rssi((-88).into());
        rreq.mark_directed();

        let mut buf = bytes::BytesMut::new();
        rreq.write_bytes(&mut buf);
        assert_eq!(buf.len(), rreq.wire_size());

        let decoded = super::Rreq::from_bytes(&buf).expect("encoded by us");
        assert_eq!(decoded, rreq);
    }
}
