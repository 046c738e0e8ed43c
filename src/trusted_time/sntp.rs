//! Minimal SNTPv4 client (RFC 4330) used as the external time reference.

use chrono::{DateTime, Duration, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use super::clock::DeviceClock;
use super::reference::{FetchResult, ReferenceTime, TimeReferenceClient, TimeReferenceError};

pub const NTP_PACKET_SIZE: usize = 48;
pub const DEFAULT_NTP_SERVER: &str = "pool.ntp.org:123";
pub const DEFAULT_NTP_TIMEOUT_MS: u64 = 5000;

/// Seconds between the NTP era 0 epoch (1900) and the Unix epoch.
const NTP_UNIX_OFFSET_SECS: i64 = 2_208_988_800;

const NTP_VERSION: u8 = 4;
const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const LEAP_ALARM: u8 = 3;
const MAX_STRATUM: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SntpPacket {
    pub leap_indicator: u8,
    pub version: u8,
    pub mode: u8,
    pub stratum: u8,
    pub originate_timestamp: u64,
    pub receive_timestamp: u64,
    pub transmit_timestamp: u64,
}

impl SntpPacket {
    pub fn request(transmit_time: DateTime<Utc>) -> Self {
        Self {
            version: NTP_VERSION,
            mode: MODE_CLIENT,
            transmit_timestamp: to_ntp_timestamp(transmit_time),
            ..Self::default()
        }
    }

    /// Server reply to `request`, received at `receive_time` and sent at `transmit_time`.
    pub fn reply(
        request: &SntpPacket,
        stratum: u8,
        receive_time: DateTime<Utc>,
        transmit_time: DateTime<Utc>,
    ) -> Self {
        Self {
            leap_indicator: 0,
            version: request.version,
            mode: MODE_SERVER,
            stratum,
            originate_timestamp: request.transmit_timestamp,
            receive_timestamp: to_ntp_timestamp(receive_time),
            transmit_timestamp: to_ntp_timestamp(transmit_time),
        }
    }

    pub fn encode(&self) -> [u8; NTP_PACKET_SIZE] {
        let mut buf = [0u8; NTP_PACKET_SIZE];
        buf[0] = (self.leap_indicator << 6) | ((self.version & 0x07) << 3) | (self.mode & 0x07);
        buf[1] = self.stratum;
        buf[24..32].copy_from_slice(&self.originate_timestamp.to_be_bytes());
        buf[32..40].copy_from_slice(&self.receive_timestamp.to_be_bytes());
        buf[40..48].copy_from_slice(&self.transmit_timestamp.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TimeReferenceError> {
        if buf.len() < NTP_PACKET_SIZE {
            return Err(TimeReferenceError::InvalidResponse("short packet"));
        }
        Ok(Self {
            leap_indicator: buf[0] >> 6,
            version: (buf[0] >> 3) & 0x07,
            mode: buf[0] & 0x07,
            stratum: buf[1],
            originate_timestamp: read_u64(&buf[24..32]),
            receive_timestamp: read_u64(&buf[32..40]),
            transmit_timestamp: read_u64(&buf[40..48]),
        })
    }

    /// Checks that `self` is a usable server reply to `request`.
    pub fn validate_reply(&self, request: &SntpPacket) -> Result<(), TimeReferenceError> {
        if self.mode != MODE_SERVER {
            return Err(TimeReferenceError::InvalidResponse("unexpected mode"));
        }
        if self.originate_timestamp != request.transmit_timestamp {
            return Err(TimeReferenceError::InvalidResponse("originate timestamp mismatch"));
        }
        if self.leap_indicator == LEAP_ALARM || self.stratum == 0 || self.stratum > MAX_STRATUM {
            return Err(TimeReferenceError::Unsynchronized);
        }
        if self.transmit_timestamp == 0 {
            return Err(TimeReferenceError::InvalidResponse("zero transmit timestamp"));
        }
        Ok(())
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_be_bytes(raw)
}

/// Seconds in one NTP era; the 32-bit seconds field wraps after this.
const NTP_ERA_SECS: i64 = 1 << 32;

#[allow(clippy::cast_sign_loss)]
pub fn to_ntp_timestamp(time: DateTime<Utc>) -> u64 {
    let secs = (time.timestamp() + NTP_UNIX_OFFSET_SECS).rem_euclid(NTP_ERA_SECS) as u64;
    let fraction = (u64::from(time.timestamp_subsec_nanos()) << 32) / 1_000_000_000;
    (secs << 32) | fraction
}

/// Converts an NTP timestamp back to a date, choosing the era that puts it
/// closest to `pivot`.
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
pub fn from_ntp_timestamp(timestamp: u64, pivot: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let pivot_secs = pivot.timestamp() + NTP_UNIX_OFFSET_SECS;
    let mut secs = pivot_secs.div_euclid(NTP_ERA_SECS) * NTP_ERA_SECS + (timestamp >> 32) as i64;
    let distance = secs - pivot_secs;
    if distance > NTP_ERA_SECS / 2 {
        secs -= NTP_ERA_SECS;
    } else if distance < -NTP_ERA_SECS / 2 {
        secs += NTP_ERA_SECS;
    }

    let nanos = ((timestamp & 0xFFFF_FFFF) * 1_000_000_000) >> 32;
    DateTime::from_timestamp(secs - NTP_UNIX_OFFSET_SECS, nanos as u32)
}

/// Clock offset `((t2 - t1) + (t3 - t4)) / 2` of the server relative to the device.
pub fn clock_offset(
    sent: DateTime<Utc>,
    server_received: DateTime<Utc>,
    server_transmitted: DateTime<Utc>,
    received: DateTime<Utc>,
) -> Duration {
    ((server_received - sent) + (server_transmitted - received)) / 2
}

pub struct SntpClient {
    server: String,
    timeout: std::time::Duration,
    clock: Arc<dyn DeviceClock>,
}

impl SntpClient {
    pub fn new(server: impl Into<String>, timeout: std::time::Duration, clock: Arc<dyn DeviceClock>) -> Self {
        Self {
            server: server.into(),
            timeout,
            clock,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    async fn resolve(&self) -> Result<SocketAddr, TimeReferenceError> {
        lookup_host(self.server.as_str())
            .await?
            .next()
            .ok_or(TimeReferenceError::InvalidResponse("server address did not resolve"))
    }

    async fn exchange(&self) -> FetchResult {
        let server = self.resolve().await?;
        let local: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;

        let pivot = self.clock.now();
        let request = SntpPacket::request(pivot);
        socket.send(&request.encode()).await?;

        let mut buf = [0u8; NTP_PACKET_SIZE];
        let len = socket.recv(&mut buf).await?;
        let received = self.clock.now();
        let uptime = self.clock.uptime();

        let reply = SntpPacket::decode(&buf[..len])?;
        reply.validate_reply(&request)?;

        let invalid = || TimeReferenceError::InvalidResponse("timestamp out of range");
        let sent = from_ntp_timestamp(request.transmit_timestamp, pivot).ok_or_else(invalid)?;
        let server_received =
            from_ntp_timestamp(reply.receive_timestamp, pivot).ok_or_else(invalid)?;
        let server_transmitted =
            from_ntp_timestamp(reply.transmit_timestamp, pivot).ok_or_else(invalid)?;

        let offset = clock_offset(sent, server_received, server_transmitted, received);
        debug!(server = %server, offset_ms = offset.num_milliseconds(), "sntp exchange complete");

        let reference = received.checked_add_signed(offset).ok_or_else(invalid)?;
        Ok(ReferenceTime::new(reference, uptime))
    }
}

impl TimeReferenceClient for SntpClient {
    async fn fetch(&self) -> FetchResult {
        timeout(self.timeout, self.exchange())
            .await
            .unwrap_or(Err(TimeReferenceError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ntp_timestamp_conversion() {
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
            + Duration::milliseconds(250);
        let timestamp = to_ntp_timestamp(time);
        assert_eq!(timestamp >> 32, 3_918_283_200);
        assert_eq!(timestamp & 0xFFFF_FFFF, 1 << 30);
        assert_eq!(from_ntp_timestamp(timestamp, time), Some(time));
    }

    #[test]
    fn test_timestamps_resolve_across_era_rollover() {
        // Era 1 starts 2036-02-07 06:28:16 UTC
        let rollover = Utc.with_ymd_and_hms(2036, 2, 7, 6, 28, 16).unwrap();
        let after = rollover + Duration::seconds(90);
        let before = rollover - Duration::seconds(90);

        let timestamp = to_ntp_timestamp(after);
        assert_eq!(timestamp >> 32, 90);
        assert_eq!(from_ntp_timestamp(timestamp, after), Some(after));
        // A device clock still in era 0 resolves the reply into era 1
        assert_eq!(from_ntp_timestamp(timestamp, before), Some(after));
        assert_eq!(from_ntp_timestamp(to_ntp_timestamp(before), after), Some(before));

        let later = Utc.with_ymd_and_hms(2040, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(from_ntp_timestamp(to_ntp_timestamp(later), later), Some(later));
    }

    #[test]
    fn test_request_header_byte() {
        let request = SntpPacket::request(Utc::now());
        assert_eq!(request.encode()[0], 0x23);
    }

    #[test]
    fn test_clock_offset_cancels_round_trip_delay() {
        let t1 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        // Server runs 150s ahead; 100ms each way.
        let t2 = t1 + Duration::seconds(150) + Duration::milliseconds(100);
        let t3 = t2 + Duration::milliseconds(20);
        let t4 = t1 + Duration::milliseconds(220);
        assert_eq!(clock_offset(t1, t2, t3, t4), Duration::seconds(150));
    }

    #[test]
    fn test_reply_validation() {
        let request = SntpPacket::request(Utc::now());
        let now = Utc::now();

        let reply = SntpPacket::reply(&request, 2, now, now);
        assert_eq!(SntpPacket::decode(&reply.encode()), Ok(reply));
        assert!(reply.validate_reply(&request).is_ok());

        let kiss_of_death = SntpPacket::reply(&request, 0, now, now);
        assert_eq!(kiss_of_death.validate_reply(&request), Err(TimeReferenceError::Unsynchronized));

        let mut mismatched = reply;
        mismatched.originate_timestamp ^= 1;
        assert!(matches!(
            mismatched.validate_reply(&request),
            Err(TimeReferenceError::InvalidResponse(_))
        ));

        assert!(SntpPacket::decode(&[0u8; 12]).is_err());
    }
}
