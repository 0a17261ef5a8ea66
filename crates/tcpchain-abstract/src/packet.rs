use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddrV4;

/// TCP header flags set on data segments.
pub mod flags {
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
}

/// PPP protocol number for an IPv4 datagram.
pub const PPP_PROTO_IPV4: u16 = 0x0021;
pub const PPP_HEADER_LEN: usize = 2;
pub const IPV4_HEADER_LEN: usize = 20;
pub const TCP_HEADER_LEN: usize = 20;
/// Largest payload whose frame still fits the IPv4 total-length field and a
/// 65535-byte capture snaplen.
pub const MAX_SEGMENT_PAYLOAD: usize =
    u16::MAX as usize - PPP_HEADER_LEN - IPV4_HEADER_LEN - TCP_HEADER_LEN;
const IPPROTO_TCP: u8 = 6;
const DEFAULT_TTL: u8 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    pub flags: u8,
    pub window_size: u16,
    /// Filled in by [`Segment::encode_frame`].
    pub checksum: u16,
    pub urgent_ptr: u16,
}

impl TcpHeader {
    pub fn new(seq: u32, ack: u32, flags: u8, wnd: u16) -> Self {
        Self {
            seq_num: seq,
            ack_num: ack,
            flags,
            window_size: wnd,
            ..Default::default()
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.src_port);
        buf.put_u16(self.dst_port);
        buf.put_u32(self.seq_num);
        buf.put_u32(self.ack_num);
        // data offset: 5 words, no options
        buf.put_u8((TCP_HEADER_LEN as u8 / 4) << 4);
        buf.put_u8(self.flags);
        buf.put_u16(self.window_size);
        buf.put_u16(self.checksum);
        buf.put_u16(self.urgent_ptr);
    }
}

/// A TCP segment travelling between two sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub header: TcpHeader,
    pub payload: Bytes,
}

impl Segment {
    pub fn data(src: SocketAddrV4, dst: SocketAddrV4, seq: u32, payload: Bytes) -> Self {
        let mut header = TcpHeader::new(seq, 0, flags::ACK | flags::PSH, u16::MAX);
        header.src_port = src.port();
        header.dst_port = dst.port();
        Self {
            src,
            dst,
            header,
            payload,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Size of the frame on a PPP link, headers included.
    pub fn wire_len(&self) -> usize {
        PPP_HEADER_LEN + IPV4_HEADER_LEN + TCP_HEADER_LEN + self.payload.len()
    }

    /// Encode as a PPP frame carrying an IPv4 datagram carrying this segment.
    ///
    /// `None` when the payload exceeds [`MAX_SEGMENT_PAYLOAD`].
    pub fn encode_frame(&self, identification: u16) -> Option<Bytes> {
        if self.payload.len() > MAX_SEGMENT_PAYLOAD {
            return None;
        }
        let ip_len = u16::try_from(IPV4_HEADER_LEN + TCP_HEADER_LEN + self.payload.len()).ok()?;
        let tcp_len = u16::try_from(TCP_HEADER_LEN + self.payload.len()).ok()?;
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u16(PPP_PROTO_IPV4);

        let ip_start = buf.len();
        buf.put_u8(0x45);
        buf.put_u8(0);
        buf.put_u16(ip_len);
        buf.put_u16(identification);
        buf.put_u16(0);
        buf.put_u8(DEFAULT_TTL);
        buf.put_u8(IPPROTO_TCP);
        buf.put_u16(0);
        buf.put_slice(&self.src.ip().octets());
        buf.put_slice(&self.dst.ip().octets());
        let ip_sum = internet_checksum(&buf[ip_start..]);
        buf[ip_start + 10..ip_start + 12].copy_from_slice(&ip_sum.to_be_bytes());

        let tcp_start = buf.len();
        let mut header = self.header.clone();
        header.checksum = 0;
        header.put(&mut buf);
        buf.put_slice(&self.payload);

        let mut pseudo = BytesMut::with_capacity(12 + buf.len() - tcp_start);
        pseudo.put_slice(&self.src.ip().octets());
        pseudo.put_slice(&self.dst.ip().octets());
        pseudo.put_u8(0);
        pseudo.put_u8(IPPROTO_TCP);
        pseudo.put_u16(tcp_len);
        pseudo.put_slice(&buf[tcp_start..]);
        let tcp_sum = internet_checksum(&pseudo);
        buf[tcp_start + 16..tcp_start + 18].copy_from_slice(&tcp_sum.to_be_bytes());

        Some(buf.freeze())
    }
}

/// RFC 1071 ones' complement checksum.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        let word = u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        sum = sum.wrapping_add(word);
    }
    if let Some(&byte) = chunks.remainder().first() {
        sum = sum.wrapping_add((byte as u32) << 8);
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
