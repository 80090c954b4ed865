//! Send-one, match-one reply correlation
//!
//! A probe sends exactly one request and then reads from its raw socket
//! until a datagram carrying the probe's (identifier, sequence) key arrives
//! or the deadline passes. Raw sockets see every ICMP message on the host,
//! so undecodable and non-matching traffic is discarded without judgement.

use anyhow::{anyhow, Result};
use pnet::packet::icmp::{IcmpType, IcmpTypes};
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::probe::icmp::{
    self, type_label, RequestKind, IP_ICMP_OVERHEAD,
};
use crate::probe::interface::InterfaceInfo;
use crate::probe::socket::{ProbeSession, RecvOutcome, MAX_DATAGRAM};

/// What the configuration expects a probe to observe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedOutcome {
    /// The type-appropriate reply arrives before the deadline
    Response,
    /// No matching datagram arrives before the deadline
    Timeout,
}

impl ExpectedOutcome {
    pub fn parse(label: &str) -> Result<Self> {
        match label {
            "response" => Ok(Self::Response),
            "timeout" => Ok(Self::Timeout),
            other => Err(anyhow!("invalid expected_result: {:?}", other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Response => "response",
            Self::Timeout => "timeout",
        }
    }
}

/// Everything a single probe needs, validated ahead of socket work
#[derive(Debug, Clone)]
pub struct ProbePlan {
    pub name: String,
    /// Destination as written in the configuration (address or hostname)
    pub destination: String,
    pub kind: RequestKind,
    pub expected: ExpectedOutcome,
    pub timeout: Duration,
    pub payload_size: usize,
    pub identifier: u16,
    pub sequence: u16,
}

/// What a finished probe observed
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Label of what actually happened ("timeout", a reply-type label, or
    /// empty when the probe failed before observing anything)
    pub actual: String,
    pub duration: Duration,
    pub passed: bool,
    pub details: String,
}

impl ProbeOutcome {
    fn failed(details: String) -> Self {
        Self {
            actual: String::new(),
            duration: Duration::ZERO,
            passed: false,
            details,
        }
    }
}

/// The reply type a request kind should produce.
///
/// Loopback never forwards a timestamp request to a remote responder; the
/// kernel hands our own type 13 message straight back, so that is the
/// correct expectation there.
pub fn expected_reply_type(kind: RequestKind, dest: Ipv4Addr) -> IcmpType {
    match kind {
        RequestKind::Echo => IcmpTypes::EchoReply,
        RequestKind::Timestamp => {
            if dest.is_loopback() {
                IcmpTypes::Timestamp
            } else {
                IcmpTypes::TimestampReply
            }
        }
    }
}

/// Judgement for one matching reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed(String),
    /// Our own outbound request observed on a self-addressed probe
    Ignore,
}

/// Judge a reply whose (identifier, sequence) already matched.
///
/// `is_self` is true when the destination is loopback or the probe's own
/// source address; on such probes the raw socket sees our outbound request
/// as well as the reply, and the request copy must not settle the probe.
pub fn judge_reply(
    reply_type: IcmpType,
    expected_type: IcmpType,
    expected: ExpectedOutcome,
    is_self: bool,
    peer: Ipv4Addr,
) -> Verdict {
    if expected == ExpectedOutcome::Timeout {
        return Verdict::Failed(format!(
            "received response {} from {}, but expected timeout",
            type_label(reply_type),
            peer
        ));
    }

    if reply_type != expected_type {
        if is_self
            && (reply_type == IcmpTypes::EchoRequest || reply_type == IcmpTypes::Timestamp)
        {
            return Verdict::Ignore;
        }
        return Verdict::Failed(format!(
            "received unexpected ICMP type {} from {} (expected {})",
            type_label(reply_type),
            peer,
            type_label(expected_type)
        ));
    }

    Verdict::Passed
}

/// Resolve a configured destination into an IPv4 address
pub fn resolve_destination(destination: &str) -> Result<Ipv4Addr> {
    if let Ok(addr) = destination.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    let addrs = (destination, 0)
        .to_socket_addrs()
        .map_err(|e| anyhow!("cannot resolve destination {:?}: {}", destination, e))?;
    for addr in addrs {
        if let SocketAddr::V4(v4) = addr {
            return Ok(*v4.ip());
        }
    }
    Err(anyhow!(
        "destination {:?} did not resolve to an IPv4 address",
        destination
    ))
}

/// Run one probe to completion.
///
/// Every failure here is local to the probe: session setup errors, send
/// errors, and wrong replies all land in the returned outcome rather than
/// aborting the process.
pub fn run_probe(
    plan: &ProbePlan,
    interface: &InterfaceInfo,
    source: Ipv4Addr,
    tos: u8,
    set_df: bool,
) -> ProbeOutcome {
    let dest = match resolve_destination(&plan.destination) {
        Ok(dest) => dest,
        Err(e) => return ProbeOutcome::failed(e.to_string()),
    };

    let session = match ProbeSession::open(interface, source, tos, set_df) {
        Ok(session) => session,
        Err(e) => return ProbeOutcome::failed(format!("{:#}", e)),
    };

    if set_df
        && plan.kind == RequestKind::Echo
        && interface.mtu as usize >= IP_ICMP_OVERHEAD
        && plan.payload_size > interface.mtu as usize - IP_ICMP_OVERHEAD
    {
        eprintln!(
            "Warning: DF bit set with payload size {} exceeding MTU budget {}. May receive ICMP error.",
            plan.payload_size,
            interface.mtu as usize - IP_ICMP_OVERHEAD
        );
    }

    let message = icmp::encode_request(plan.kind, plan.identifier, plan.sequence, plan.payload_size);

    let start = Instant::now();

    let sent = match session.send(&message, dest) {
        Ok(sent) => sent,
        Err(e) => return ProbeOutcome::failed(format!("{:#}", e)),
    };
    if sent != message.len() {
        return ProbeOutcome::failed(format!("sent {} bytes, expected {}", sent, message.len()));
    }

    let deadline = start + plan.timeout;
    let expected_type = expected_reply_type(plan.kind, dest);
    let is_self = dest.is_loopback() || dest == source;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let outcome = match session.recv_deadline(&mut buf, deadline) {
            Ok(outcome) => outcome,
            Err(e) => {
                return ProbeOutcome {
                    actual: String::new(),
                    duration: start.elapsed(),
                    passed: false,
                    details: format!("{:#}", e),
                }
            }
        };

        let (len, peer) = match outcome {
            RecvOutcome::Data { len, peer } => (len, peer),
            RecvOutcome::DeadlineExpired => {
                let elapsed = start.elapsed();
                if plan.expected == ExpectedOutcome::Timeout {
                    return ProbeOutcome {
                        actual: "timeout".to_string(),
                        duration: elapsed,
                        passed: true,
                        details: format!("expected timeout occurred (after {:?})", plan.timeout),
                    };
                }
                return ProbeOutcome {
                    actual: "timeout".to_string(),
                    duration: elapsed,
                    passed: false,
                    details: format!(
                        "expected response, but timed out after {:?} waiting for matching message",
                        plan.timeout
                    ),
                };
            }
        };

        let Some(reply) = icmp::decode_datagram(&buf[..len]) else {
            continue;
        };
        if reply.body.identity() != Some((plan.identifier, plan.sequence)) {
            continue;
        }

        match judge_reply(reply.icmp_type, expected_type, plan.expected, is_self, peer) {
            Verdict::Ignore => continue,
            Verdict::Passed => {
                return ProbeOutcome {
                    actual: type_label(reply.icmp_type),
                    duration: start.elapsed(),
                    passed: true,
                    details: format!(
                        "received expected response {} from {}",
                        type_label(reply.icmp_type),
                        peer
                    ),
                };
            }
            Verdict::Failed(details) => {
                return ProbeOutcome {
                    actual: type_label(reply.icmp_type),
                    duration: start.elapsed(),
                    passed: false,
                    details,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

    #[test]
    fn test_expected_reply_types() {
        assert_eq!(
            expected_reply_type(RequestKind::Echo, PEER),
            IcmpTypes::EchoReply
        );
        assert_eq!(
            expected_reply_type(RequestKind::Echo, Ipv4Addr::LOCALHOST),
            IcmpTypes::EchoReply
        );
        assert_eq!(
            expected_reply_type(RequestKind::Timestamp, PEER),
            IcmpTypes::TimestampReply
        );
        // loopback hands the request straight back
        assert_eq!(
            expected_reply_type(RequestKind::Timestamp, Ipv4Addr::LOCALHOST),
            IcmpTypes::Timestamp
        );
    }

    #[test]
    fn test_judge_matching_reply_passes() {
        let verdict = judge_reply(
            IcmpTypes::EchoReply,
            IcmpTypes::EchoReply,
            ExpectedOutcome::Response,
            false,
            PEER,
        );
        assert_eq!(verdict, Verdict::Passed);
    }

    #[test]
    fn test_judge_any_reply_fails_when_timeout_expected() {
        let verdict = judge_reply(
            IcmpTypes::EchoReply,
            IcmpTypes::EchoReply,
            ExpectedOutcome::Timeout,
            false,
            PEER,
        );
        match verdict {
            Verdict::Failed(details) => {
                assert!(details.contains("expected timeout"));
                assert!(details.contains("192.0.2.1"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_judge_wrong_type_fails() {
        let verdict = judge_reply(
            IcmpTypes::DestinationUnreachable,
            IcmpTypes::EchoReply,
            ExpectedOutcome::Response,
            false,
            PEER,
        );
        match verdict {
            Verdict::Failed(details) => {
                assert!(details.contains("destination unreachable"));
                assert!(details.contains("expected echo reply"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_judge_ignores_own_request_on_self_probe() {
        // Our outbound echo request seen on a loopback probe
        let verdict = judge_reply(
            IcmpTypes::EchoRequest,
            IcmpTypes::EchoReply,
            ExpectedOutcome::Response,
            true,
            Ipv4Addr::LOCALHOST,
        );
        assert_eq!(verdict, Verdict::Ignore);

        // The same request copy on a remote probe is a real mismatch
        let verdict = judge_reply(
            IcmpTypes::EchoRequest,
            IcmpTypes::EchoReply,
            ExpectedOutcome::Response,
            false,
            PEER,
        );
        assert!(matches!(verdict, Verdict::Failed(_)));
    }

    #[test]
    fn test_expected_outcome_parse() {
        assert_eq!(
            ExpectedOutcome::parse("response").unwrap(),
            ExpectedOutcome::Response
        );
        assert_eq!(
            ExpectedOutcome::parse("timeout").unwrap(),
            ExpectedOutcome::Timeout
        );
        let err = ExpectedOutcome::parse("maybe").unwrap_err();
        assert!(err.to_string().contains("invalid expected_result"));
    }

    #[test]
    fn test_resolve_destination_literal() {
        assert_eq!(resolve_destination("127.0.0.1").unwrap(), Ipv4Addr::LOCALHOST);
        assert!(resolve_destination("definitely-not-a-host.invalid").is_err());
    }
}
