//! ICMP echo probe with native sockets and a `ping` command fallback.
//!
//! Native echoes run in spawn_blocking so the receive loop can use plain
//! blocking timeouts.

use async_trait::async_trait;
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::process::Command;

use super::{Probe, ProbeError, ProbeReply};

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn detect_icmp_capability() -> IcmpCapability {
    // RAW needs CAP_NET_RAW; DGRAM works unprivileged where ping_group_range allows it.
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }
    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// ICMP echo liveness probe.
#[derive(Debug, Default)]
pub struct IcmpProbe;

impl IcmpProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Probe for IcmpProbe {
    async fn probe(&self, address: &str, timeout: Duration, count: u32) -> Result<ProbeReply, ProbeError> {
        let mut total = Duration::ZERO;
        let mut received = 0u32;

        for _ in 0..count.max(1) {
            match echo(address, timeout).await {
                Ok(rtt) => {
                    total += rtt;
                    received += 1;
                }
                Err(ProbeError::Timeout(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if received == 0 {
            tracing::debug!("No echo replies from {}", address);
            return Ok(ProbeReply::dead());
        }
        Ok(ProbeReply::alive(total / received))
    }
}

/// One echo round trip.
async fn echo(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
    if capability == IcmpCapability::CommandOnly {
        return echo_command(address, timeout).await;
    }

    let ip = resolve_address(address).await?;
    let result = tokio::task::spawn_blocking(move || echo_blocking(ip, timeout))
        .await
        .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

    match result {
        Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
            tracing::warn!(
                "Native ping failed with permission error for {}, falling back to command: {}",
                address,
                msg
            );
            echo_command(address, timeout).await
        }
        other => other,
    }
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("Operation not permitted") || msg.contains("denied")
}

async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", address)))
}

/// Per-family constants for echo request/reply.
struct Family {
    domain: Domain,
    protocol: Protocol,
    request_type: u8,
    reply_type: u8,
    /// ICMPv4 needs a userspace checksum; the kernel fills it for ICMPv6.
    checksum: bool,
}

impl Family {
    fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Family {
                domain: Domain::IPV4,
                protocol: Protocol::ICMPV4,
                request_type: 8,
                reply_type: 0,
                checksum: true,
            },
            IpAddr::V6(_) => Family {
                domain: Domain::IPV6,
                protocol: Protocol::ICMPV6,
                request_type: 128,
                reply_type: 129,
                checksum: false,
            },
        }
    }
}

fn network_err(what: &str, e: std::io::Error) -> ProbeError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        ProbeError::Network(format!("Permission denied: {}", e))
    } else {
        ProbeError::Network(format!("{}: {}", what, e))
    }
}

/// Time left before `timeout` runs out, `None` once it has.
fn remaining(start: Instant, timeout: Duration) -> Option<Duration> {
    timeout.checked_sub(start.elapsed()).filter(|d| !d.is_zero())
}

fn echo_blocking(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let family = Family::of(ip);

    let socket = Socket::new(family.domain, Type::RAW, Some(family.protocol))
        .or_else(|_| Socket::new(family.domain, Type::DGRAM, Some(family.protocol)))
        .map_err(|e| network_err("Failed to create ICMP socket", e))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| network_err("Failed to set timeout", e))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| network_err("Failed to connect", e))?;

    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = build_echo_request(family.request_type, identifier, sequence, family.checksum);

    let start = Instant::now();
    socket
        .send(&packet)
        .map_err(|e| network_err("Failed to send", e))?;

    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
    loop {
        // Unrelated ICMP traffic must not extend the wait past `timeout`.
        let left = remaining(start, timeout).ok_or(ProbeError::Timeout(timeout))?;
        socket
            .set_read_timeout(Some(left))
            .map_err(|e| network_err("Failed to set timeout", e))?;

        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => ProbeError::Timeout(timeout),
            _ => network_err("Failed to receive", e),
        })?;
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        // SAFETY: recv initialized the first `len` bytes.
        let data: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
        if is_our_reply(data, family.reply_type, identifier, sequence) {
            return Ok(elapsed);
        }
    }
}

/// Match an echo reply, skipping the IPv4 header RAW sockets deliver.
fn is_our_reply(data: &[u8], reply_type: u8, identifier: u16, sequence: u16) -> bool {
    let offset = if !data.is_empty() && data[0] >> 4 == 4 {
        usize::from(data[0] & 0x0F) * 4
    } else {
        0
    };
    let Some(icmp) = data.get(offset..offset + 8) else {
        return false;
    };

    // DGRAM sockets may rewrite the identifier, so only RAW replies are checked for it.
    let id_ok = offset == 0 || u16::from_be_bytes([icmp[4], icmp[5]]) == identifier;
    icmp[0] == reply_type && id_ok && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
}

fn build_echo_request(icmp_type: u8, identifier: u16, sequence: u16, checksum: bool) -> Vec<u8> {
    // 8 byte header + 56 byte payload
    let mut packet = vec![0u8; 64];
    packet[0] = icmp_type;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    for (i, b) in packet[8..].iter_mut().enumerate() {
        *b = i as u8;
    }

    if checksum {
        let sum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    packet
}

/// RFC 1071 internet checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Fallback through the system `ping` binary.
async fn echo_command(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let output = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        // Exit status 1 means no reply; anything else is a real failure.
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.code() == Some(1)
            || stderr.contains("timeout")
            || stdout.contains("100% packet loss")
            || stdout.contains("100.0% packet loss")
        {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Command(format!("ping failed: {}", stderr.trim())));
    }

    parse_ping_output(&stdout)
}

/// Extract the round-trip time from `ping` output.
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            // "time=12.3 ms" per-packet line
            Regex::new(r"time[=<](?P<ms>[0-9.]+)\s*ms").unwrap(),
            // "rtt min/avg/max/mdev = ..." or "round-trip min/avg/max/stddev = ...", average
            Regex::new(r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s*=\s*[0-9.]+/(?P<ms>[0-9.]+)/").unwrap(),
        ]
    });

    patterns
        .iter()
        .filter_map(|re| re.captures(output))
        .filter_map(|caps| caps.name("ms")?.as_str().parse::<f64>().ok())
        .next()
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_shrinks_to_none() {
        let left = remaining(Instant::now(), Duration::from_secs(1)).unwrap();
        assert!(left <= Duration::from_secs(1));

        let earlier = Instant::now().checked_sub(Duration::from_millis(50)).unwrap();
        assert_eq!(remaining(earlier, Duration::from_millis(10)), None);
        assert_eq!(remaining(Instant::now(), Duration::ZERO), None);
    }

    #[test]
    fn test_checksum_validates_to_zero() {
        let packet = build_echo_request(8, 0x1234, 0x0001, true);
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_build_echo_request() {
        let packet = build_echo_request(8, 0x1234, 0x0001, true);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);

        let v6 = build_echo_request(128, 1, 2, false);
        assert_eq!(v6[2..4], [0, 0]);
    }

    #[test]
    fn test_reply_matching() {
        let mut reply = build_echo_request(0, 0xBEEF, 7, true);
        assert!(is_our_reply(&reply, 0, 0xBEEF, 7));
        assert!(!is_our_reply(&reply, 0, 0xBEEF, 8));
        assert!(!is_our_reply(&reply, 129, 0xBEEF, 7));

        // RAW IPv4 delivery prefixes a 20 byte header.
        let mut raw = vec![0x45u8];
        raw.extend_from_slice(&[0u8; 19]);
        raw.append(&mut reply);
        assert!(is_our_reply(&raw, 0, 0xBEEF, 7));
        assert!(!is_our_reply(&raw, 0, 0xCAFE, 7));

        assert!(!is_our_reply(&[0u8; 4], 0, 0, 0));
    }

    #[test]
    fn test_parse_ping_output_linux() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        let rtt = parse_ping_output(output).unwrap();
        assert!((rtt.as_secs_f64() * 1000.0 - 12.345).abs() < 0.001);
    }

    #[test]
    fn test_parse_ping_output_macos_summary() {
        let output = r#"PING google.com (142.250.69.174): 56 data bytes

--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        let rtt = parse_ping_output(output).unwrap();
        assert_eq!(rtt.as_millis(), 17);
    }

    #[test]
    fn test_parse_ping_output_garbage() {
        assert!(matches!(parse_ping_output("no reply"), Err(ProbeError::Command(_))));
    }
}
