use anyhow::{anyhow, Result};
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{checksum, IcmpCode, IcmpPacket, IcmpType, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::MutablePacket;

/// ICMP echo header size (type, code, checksum, identifier, sequence)
pub const ICMP_HEADER_SIZE: usize = 8;
/// Common ICMP header prefix (type, code, checksum)
pub const ICMP_MIN_HEADER_SIZE: usize = 4;
/// Timestamp message body: id(2) + seq(2) + originate(4) + receive(4) + transmit(4)
pub const TIMESTAMP_BODY_LEN: usize = 16;
/// Largest echo payload that fits a 65535-byte IP datagram (minus IP and ICMP headers)
pub const MAX_PAYLOAD_SIZE: usize = 65507;
/// IPv4 header (20) plus ICMP echo header (8), for MTU budget checks
pub const IP_ICMP_OVERHEAD: usize = 28;

/// Fill pattern for generated echo payloads
pub const PAYLOAD_PATTERN: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Request kinds supported by the probe engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Echo,
    Timestamp,
}

impl RequestKind {
    /// Parse a configured request-type label
    pub fn parse(label: &str) -> Result<Self> {
        match label {
            "echo" => Ok(Self::Echo),
            "timestamp" => Ok(Self::Timestamp),
            other => Err(anyhow!("unsupported request type: {:?}", other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Echo => "echo",
            Self::Timestamp => "timestamp",
        }
    }

    /// The ICMP type carried by the outgoing request
    pub fn icmp_type(self) -> IcmpType {
        match self {
            Self::Echo => IcmpTypes::EchoRequest,
            Self::Timestamp => IcmpTypes::Timestamp,
        }
    }
}

/// Generate the default cyclic payload: byte i = pattern[i mod 36]
pub fn default_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| PAYLOAD_PATTERN[i % PAYLOAD_PATTERN.len()]).collect()
}

/// Build an ICMP Echo Request with the cyclic default payload
pub fn build_echo_request(identifier: u16, sequence: u16, payload_size: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload_size];

    {
        let mut packet = MutableEchoRequestPacket::new(&mut buffer).unwrap();
        packet.set_icmp_type(IcmpTypes::EchoRequest);
        packet.set_icmp_code(IcmpCode::new(0));
        packet.set_identifier(identifier);
        packet.set_sequence_number(sequence);

        let payload = packet.payload_mut();
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte = PAYLOAD_PATTERN[i % PAYLOAD_PATTERN.len()];
        }
    }

    let cksum = checksum(&IcmpPacket::new(&buffer).unwrap());
    let mut packet = MutableEchoRequestPacket::new(&mut buffer).unwrap();
    packet.set_checksum(cksum);

    buffer
}

/// Build an ICMP Timestamp Request.
///
/// pnet has no timestamp message type, so the 16-byte body is laid out by
/// hand: identifier(2) ‖ sequence(2) ‖ originate(4) ‖ receive(4) ‖
/// transmit(4), all big-endian. The clock fields stay zero; the peer fills
/// its own in the reply.
pub fn build_timestamp_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut buffer = vec![0u8; ICMP_MIN_HEADER_SIZE + TIMESTAMP_BODY_LEN];

    buffer[0] = IcmpTypes::Timestamp.0;
    buffer[1] = 0;
    buffer[4..6].copy_from_slice(&identifier.to_be_bytes());
    buffer[6..8].copy_from_slice(&sequence.to_be_bytes());

    let cksum = checksum(&IcmpPacket::new(&buffer).unwrap());
    buffer[2..4].copy_from_slice(&cksum.to_be_bytes());

    buffer
}

/// Encode a request of the given kind into a ready-to-send ICMP message
pub fn encode_request(
    kind: RequestKind,
    identifier: u16,
    sequence: u16,
    payload_size: usize,
) -> Vec<u8> {
    match kind {
        RequestKind::Echo => build_echo_request(identifier, sequence, payload_size),
        RequestKind::Timestamp => build_timestamp_request(identifier, sequence),
    }
}

/// A decoded incoming ICMP message
#[derive(Debug, Clone)]
pub struct Reply {
    pub icmp_type: IcmpType,
    pub body: ReplyBody,
}

/// Typed ICMP message body.
///
/// Echo and timestamp bodies carry the correlation key directly; anything
/// else keeps its raw bytes so identity can still be probed at fixed offsets.
#[derive(Debug, Clone)]
pub enum ReplyBody {
    Echo {
        identifier: u16,
        sequence: u16,
        payload: Vec<u8>,
    },
    Timestamp {
        identifier: u16,
        sequence: u16,
        originate: u32,
        receive: u32,
        transmit: u32,
    },
    Other {
        data: Vec<u8>,
    },
}

impl ReplyBody {
    /// Extract the (identifier, sequence) correlation key.
    ///
    /// Untyped bodies fall back to reading the first four body bytes, which
    /// is where echo and timestamp messages put the key on the wire.
    pub fn identity(&self) -> Option<(u16, u16)> {
        match self {
            Self::Echo { identifier, sequence, .. } => Some((*identifier, *sequence)),
            Self::Timestamp { identifier, sequence, .. } => Some((*identifier, *sequence)),
            Self::Other { data } => {
                if data.len() >= 4 {
                    Some((
                        u16::from_be_bytes([data[0], data[1]]),
                        u16::from_be_bytes([data[2], data[3]]),
                    ))
                } else {
                    None
                }
            }
        }
    }
}

/// Decode a raw-socket datagram (IPv4 header included) into a typed reply.
///
/// Returns None for anything malformed; foreign traffic on a raw socket is
/// routine and callers treat None as "keep waiting".
pub fn decode_datagram(data: &[u8]) -> Option<Reply> {
    let ip_packet = Ipv4Packet::new(data)?;
    let header_len = (ip_packet.get_header_length() as usize) * 4;
    if header_len < 20 || data.len() < header_len + ICMP_MIN_HEADER_SIZE {
        return None;
    }
    decode_message(&data[header_len..])
}

/// Decode an ICMP message (no IP header)
pub fn decode_message(icmp: &[u8]) -> Option<Reply> {
    if icmp.len() < ICMP_MIN_HEADER_SIZE {
        return None;
    }

    let icmp_type = IcmpType(icmp[0]);
    let body_bytes = &icmp[ICMP_MIN_HEADER_SIZE..];

    let body = if (icmp_type == IcmpTypes::EchoRequest || icmp_type == IcmpTypes::EchoReply)
        && body_bytes.len() >= 4
    {
        ReplyBody::Echo {
            identifier: u16::from_be_bytes([body_bytes[0], body_bytes[1]]),
            sequence: u16::from_be_bytes([body_bytes[2], body_bytes[3]]),
            payload: body_bytes[4..].to_vec(),
        }
    } else if (icmp_type == IcmpTypes::Timestamp || icmp_type == IcmpTypes::TimestampReply)
        && body_bytes.len() >= TIMESTAMP_BODY_LEN
    {
        ReplyBody::Timestamp {
            identifier: u16::from_be_bytes([body_bytes[0], body_bytes[1]]),
            sequence: u16::from_be_bytes([body_bytes[2], body_bytes[3]]),
            originate: u32::from_be_bytes([body_bytes[4], body_bytes[5], body_bytes[6], body_bytes[7]]),
            receive: u32::from_be_bytes([body_bytes[8], body_bytes[9], body_bytes[10], body_bytes[11]]),
            transmit: u32::from_be_bytes([
                body_bytes[12],
                body_bytes[13],
                body_bytes[14],
                body_bytes[15],
            ]),
        }
    } else {
        ReplyBody::Other {
            data: body_bytes.to_vec(),
        }
    };

    Some(Reply { icmp_type, body })
}

/// Human-readable label for an ICMP type, matching RFC 792 names
pub fn type_label(icmp_type: IcmpType) -> String {
    match icmp_type {
        IcmpTypes::EchoReply => "echo reply".to_string(),
        IcmpTypes::DestinationUnreachable => "destination unreachable".to_string(),
        IcmpTypes::RedirectMessage => "redirect".to_string(),
        IcmpTypes::EchoRequest => "echo".to_string(),
        IcmpTypes::TimeExceeded => "time exceeded".to_string(),
        IcmpTypes::Timestamp => "timestamp".to_string(),
        IcmpTypes::TimestampReply => "timestamp reply".to_string(),
        other => format!("icmp type {}", other.0),
    }
}
