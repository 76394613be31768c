//! Wall-clock sources for trial timestamps, tokens, and seeds.

use crate::error::ClockError;
use crossbeam::channel;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Default public time server.
pub const DEFAULT_NTP_SERVER: &str = "ntp.shoa.cl";

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// Length of one NTP era (the 32-bit seconds field wraps in 2036).
const NTP_ERA_SECS: u64 = 1 << 32;

const NTP_PORT: u16 = 123;

/// An infallible wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// A wall clock that may fail, e.g. a network time server.
pub trait TimeSource: Send + Sync {
    fn query(&self) -> Result<SystemTime, ClockError>;
}

/// Local system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// One-shot SNTP (RFC 4330) client.
#[derive(Debug, Clone)]
pub struct SntpClock {
    server: String,
    timeout: Duration,
}

impl SntpClock {
    /// `server` is `host`, `host:port`, an IP literal, or `[v6]:port`;
    /// port 123 is assumed when absent.
    pub fn new(server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            timeout,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Resolve the server, giving up after the configured timeout.
    fn address(&self) -> Result<SocketAddr, ClockError> {
        let (host, port) = split_host_port(&self.server);
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        let (tx, rx) = channel::bounded(1);
        let target = (host.to_string(), port);
        // std offers no resolver timeout; a stalled lookup finishes on its own.
        thread::Builder::new()
            .name("sntp-resolve".to_string())
            .spawn(move || {
                let resolved = target.to_socket_addrs().map(|mut addrs| addrs.next());
                let _ = tx.send(resolved);
            })?;
        match rx.recv_timeout(self.timeout) {
            Ok(Ok(Some(addr))) => Ok(addr),
            Ok(_) => Err(ClockError::Resolve(self.server.clone())),
            Err(_) => Err(ClockError::Resolve(format!(
                "{} (timed out after {:?})",
                self.server, self.timeout
            ))),
        }
    }
}

/// Split `server` into host and port, defaulting the port.
fn split_host_port(server: &str) -> (&str, u16) {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        // Only reached for literals; the caller re-parses the host.
        return match addr {
            SocketAddr::V4(_) => (server.rsplit_once(':').map_or(server, |(h, _)| h), addr.port()),
            SocketAddr::V6(_) => (
                server
                    .rsplit_once("]:")
                    .map_or(server, |(h, _)| h.trim_start_matches('[')),
                addr.port(),
            ),
        };
    }
    if let Some(inner) = server.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        return (inner, NTP_PORT);
    }
    if server.parse::<IpAddr>().is_ok() {
        return (server, NTP_PORT);
    }
    match server.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, port),
            Err(_) => (server, NTP_PORT),
        },
        _ => (server, NTP_PORT),
    }
}

impl TimeSource for SntpClock {
    fn query(&self) -> Result<SystemTime, ClockError> {
        let addr = self.address()?;
        let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.set_write_timeout(Some(self.timeout))?;

        let mut request = [0u8; 48];
        // LI = 0, VN = 3, Mode = 3 (client)
        request[0] = 0x1B;
        socket.send_to(&request, addr)?;

        let mut response = [0u8; 48];
        let (len, _) = socket.recv_from(&mut response)?;
        parse_response(&response[..len])
    }
}

/// Extract the transmit timestamp from an SNTP server reply.
fn parse_response(packet: &[u8]) -> Result<SystemTime, ClockError> {
    if packet.len() < 48 {
        return Err(ClockError::MalformedResponse(format!(
            "expected 48 bytes, got {}",
            packet.len()
        )));
    }
    let mode = packet[0] & 0x07;
    if mode != 4 {
        return Err(ClockError::MalformedResponse(format!(
            "expected server mode 4, got {mode}"
        )));
    }
    let secs = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]) as u64;
    let frac = u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]) as u64;
    if secs == 0 && frac == 0 {
        return Err(ClockError::MalformedResponse(
            "server sent no transmit timestamp".to_string(),
        ));
    }
    // RFC 4330 §3: a clear high bit means era 1 (from 2036-02-07).
    let secs = if secs & 0x8000_0000 == 0 {
        secs + NTP_ERA_SECS
    } else {
        secs
    };
    let nanos = (frac * 1_000_000_000) >> 32;
    Ok(UNIX_EPOCH + Duration::new(secs - NTP_UNIX_OFFSET_SECS, nanos as u32))
}

#[derive(Debug, Clone, Copy)]
struct Offset {
    /// Remote minus local, in nanoseconds.
    nanos: i128,
    checked_at: Instant,
}

/// Clock backed by a [`TimeSource`], falling back to local time.
///
/// The source is consulted at most once per `refresh` interval; in between,
/// the last measured offset is applied to local time. A failed query logs a
/// warning and yields local time until the next refresh.
///
/// One caller refreshes at a time and the lock is never held across the
/// query; everyone else keeps using the previous offset (or none) meanwhile.
pub struct FallbackClock<S> {
    source: S,
    refresh: Duration,
    offset: Mutex<Option<Offset>>,
    refreshing: AtomicBool,
}

/// Clears the in-flight flag when a refresh ends, even by panic.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: TimeSource> FallbackClock<S> {
    pub fn new(source: S, refresh: Duration) -> Self {
        Self {
            source,
            refresh,
            offset: Mutex::new(None),
            refreshing: AtomicBool::new(false),
        }
    }

    fn current_offset(&self) -> i128 {
        let cached = *self.offset.lock().expect("clock offset lock poisoned");
        if let Some(cached) = cached {
            if cached.checked_at.elapsed() < self.refresh {
                return cached.nanos;
            }
        }
        let stale = cached.map_or(0, |c| c.nanos);

        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return stale;
        }
        let _refresh = RefreshGuard(&self.refreshing);

        let nanos = match self.source.query() {
            Ok(remote) => {
                let nanos = signed_nanos(remote) - signed_nanos(SystemTime::now());
                debug!(offset_ms = nanos / 1_000_000, "Time source offset refreshed");
                nanos
            }
            Err(e) => {
                warn!(error = %e, "Time source unavailable, using local time");
                0
            }
        };
        *self.offset.lock().expect("clock offset lock poisoned") = Some(Offset {
            nanos,
            checked_at: Instant::now(),
        });
        nanos
    }
}

impl<S: TimeSource> Clock for FallbackClock<S> {
    fn now(&self) -> SystemTime {
        let offset = self.current_offset();
        let local = SystemTime::now();
        let shift = Duration::from_nanos(offset.unsigned_abs().min(u64::MAX as u128) as u64);
        if offset >= 0 {
            local.checked_add(shift).unwrap_or(local)
        } else {
            local.checked_sub(shift).unwrap_or(local)
        }
    }
}

fn signed_nanos(t: SystemTime) -> i128 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i128,
        Err(e) => -(e.duration().as_nanos() as i128),
    }
}

/// Nanoseconds since the Unix epoch, saturating.
pub fn unix_nanos(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch, saturating.
pub fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}
