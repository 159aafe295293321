//! The single-process, shared ICMP echo engine (spec §4.5), ported from
//! `netmet/utils/ping.py::Ping` but restructured around one dedicated
//! socket loop multiplexing many concurrent probes instead of one raw
//! socket per ping. `mio` has no native raw-socket type, so the socket's
//! raw fd is polled through [`mio::unix::SourceFd`], using `as_raw_fd` to
//! register a non-mio socket with the poll loop.

use std::collections::{HashMap, VecDeque};
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicU16};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol as SockProtocol, SockAddr, Socket, Type};
use tracing::{debug, warn};

use netmet_common::ClockSource;

use crate::exit_status::RetCode;
use crate::packet::{build_echo_request, parse_echo_reply, ECHO_REPLY_TYPE};

/// Socket `select` timeout (spec §4.5 step 1/2).
const MAX_WAIT: Duration = Duration::from_millis(100);
const RECV_BUFFER_SIZE: usize = 1024;
const SOCKET_TOKEN: Token = Token(0);
/// Spec §4.5: "Limits: packet_size <= 1024."
pub const MAX_PACKET_SIZE: usize = 1024;

pub type PingCallback = Box<dyn FnOnce(PingOutcome) + Send>;

#[derive(Debug, Clone, Copy)]
pub struct PingOutcome {
    pub ret_code: RetCode,
    pub rtt_ms: Option<f64>,
}

struct PendingSend {
    id: u16,
    dest: Ipv4Addr,
    packet: Vec<u8>,
    timeout: Duration,
    callback: PingCallback,
}

struct InFlight {
    started_at: Instant,
    timeout: Duration,
    callback: PingCallback,
}

/// A single raw ICMP socket shared by every concurrent ping (spec §4.5,
/// §5's "shared resources" (a)).
pub struct Pinger {
    death: Arc<AtomicBool>,
    next_id: Arc<AtomicU16>,
    send_queue: Arc<Mutex<VecDeque<PendingSend>>>,
    in_flight: Arc<Mutex<HashMap<u16, InFlight>>>,
    handle: Option<JoinHandle<()>>,
}

impl Pinger {
    /// Opens the raw socket and starts the event loop. Fatal per spec §7:
    /// callers should abort the client role if this fails.
    pub fn start() -> Result<Pinger, RetCode> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(SockProtocol::ICMPV4)).map_err(
            |e| {
                if e.raw_os_error() == Some(libc::EPERM) {
                    RetCode::RootRequired
                } else {
                    warn!(error = %e, "failed to open raw ICMP socket");
                    RetCode::CantOpenSocket
                }
            },
        )?;
        socket
            .set_nonblocking(true)
            .map_err(|_| RetCode::CantOpenSocket)?;

        let poll = Poll::new().map_err(|_| RetCode::CantOpenSocket)?;
        let raw_fd = socket.as_raw_fd();
        poll.registry()
            .register(
                &mut SourceFd(&raw_fd),
                SOCKET_TOKEN,
                Interest::READABLE.add(Interest::WRITABLE),
            )
            .map_err(|_| RetCode::CantOpenSocket)?;

        let death = Arc::new(AtomicBool::new(false));
        let send_queue = Arc::new(Mutex::new(VecDeque::new()));
        let in_flight = Arc::new(Mutex::new(HashMap::new()));

        let loop_death = death.clone();
        let loop_send_queue = send_queue.clone();
        let loop_in_flight = in_flight.clone();

        let handle = std::thread::spawn(move || {
            run_loop(socket, poll, loop_death, loop_send_queue, loop_in_flight);
        });

        Ok(Pinger {
            death,
            next_id: Arc::new(AtomicU16::new(0)),
            send_queue,
            in_flight,
            handle: Some(handle),
        })
    }

    /// Submits a ping asynchronously. `dest` is parsed as an IPv4 literal
    /// first, else resolved with a single-shot DNS lookup (spec §4.5); on
    /// failure the callback fires immediately with `HostNotFound` and the
    /// ping is never enqueued.
    pub fn submit(&self, dest: &str, timeout: Duration, packet_size: usize, callback: PingCallback) {
        let dest_ip = match resolve(dest) {
            Some(ip) => ip,
            None => {
                callback(PingOutcome {
                    ret_code: RetCode::HostNotFound,
                    rtt_ms: None,
                });
                return;
            }
        };

        let packet_size = packet_size.min(MAX_PACKET_SIZE);
        let id = self.next_id.fetch_add(1, SeqCst);
        let packet = build_echo_request(id, packet_size);

        self.send_queue.lock().unwrap().push_back(PendingSend {
            id,
            dest: dest_ip,
            packet,
            timeout,
            callback,
        });
    }

    /// Synchronous helper wrapping [`Pinger::submit`] with a blocking wait
    /// (spec §4.5's `ping(dest, timeout, packet_size)`).
    pub fn ping(&self, dest: &str, timeout: Duration, packet_size: usize, clock: &ClockSource) -> PingRecord {
        let timestamp = clock.now_iso8601();
        let (tx, rx) = std::sync::mpsc::channel();

        self.submit(
            dest,
            timeout,
            packet_size,
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );

        let outcome = rx
            .recv_timeout(timeout + Duration::from_millis(200))
            .unwrap_or(PingOutcome {
                ret_code: RetCode::Timeout,
                rtt_ms: None,
            });

        PingRecord {
            ret_code: outcome.ret_code,
            rtt_ms: outcome.rtt_ms,
            packet_size: packet_size as u32,
            timestamp,
        }
    }

    /// Signals cancellation; every in-flight and queued ping completes with
    /// `Cancelled` (spec §4.5, §5 "Cancellation").
    pub fn stop(mut self) {
        self.death.store(true, SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pinger {
    fn drop(&mut self) {
        self.death.store(true, SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Debug, Clone)]
pub struct PingRecord {
    pub ret_code: RetCode,
    pub rtt_ms: Option<f64>,
    pub packet_size: u32,
    pub timestamp: String,
}

fn resolve(dest: &str) -> Option<Ipv4Addr> {
    if let Ok(ip) = dest.parse::<Ipv4Addr>() {
        return Some(ip);
    }
    (dest, 0u16)
        .to_socket_addrs()
        .ok()?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
}

fn run_loop(
    socket: Socket,
    mut poll: Poll,
    death: Arc<AtomicBool>,
    send_queue: Arc<Mutex<VecDeque<PendingSend>>>,
    in_flight: Arc<Mutex<HashMap<u16, InFlight>>>,
) {
    let mut events = Events::with_capacity(16);

    while !death.load(SeqCst) {
        if let Err(e) = poll.poll(&mut events, Some(MAX_WAIT)) {
            warn!(error = %e, "pinger poll failed");
            continue;
        }

        for event in events.iter() {
            if event.token() != SOCKET_TOKEN {
                continue;
            }
            if event.is_writable() {
                try_send_one(&socket, &send_queue, &in_flight);
            }
            if event.is_readable() {
                drain_readable(&socket, &in_flight);
            }
        }

        sweep_timeouts(&in_flight);
    }

    cancel_all(&send_queue, &in_flight);
}

fn try_send_one(
    socket: &Socket,
    send_queue: &Mutex<VecDeque<PendingSend>>,
    in_flight: &Mutex<HashMap<u16, InFlight>>,
) {
    let Some(pending) = send_queue.lock().unwrap().pop_front() else {
        return;
    };

    let addr = SockAddr::from(SocketAddr::new(IpAddr::V4(pending.dest), 0));
    let started_at = Instant::now();
    let mut remaining = pending.packet.as_slice();

    loop {
        match socket.send_to(remaining, &addr) {
            Ok(sent) if sent == remaining.len() => break,
            Ok(sent) => remaining = &remaining[sent..],
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                debug!(error = %e, "icmp send failed");
                (pending.callback)(PingOutcome {
                    ret_code: RetCode::SocketSendError,
                    rtt_ms: None,
                });
                return;
            }
        }
    }

    in_flight.lock().unwrap().insert(
        pending.id,
        InFlight {
            started_at,
            timeout: pending.timeout,
            callback: pending.callback,
        },
    );
}

fn drain_readable(socket: &Socket, in_flight: &Mutex<HashMap<u16, InFlight>>) {
    loop {
        let mut buf = [MaybeUninit::<u8>::uninit(); RECV_BUFFER_SIZE];
        let n = match socket.recv_from(&mut buf) {
            Ok((n, _addr)) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(_) => return,
        };
        // SAFETY: `recv_from` reports exactly `n` initialized bytes.
        let datagram = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, n) };

        let Some(reply) = parse_echo_reply(datagram) else {
            continue;
        };
        if reply.reply_type != ECHO_REPLY_TYPE {
            continue;
        }

        let entry = in_flight.lock().unwrap().remove(&reply.id);
        if let Some(entry) = entry {
            let rtt_ms = entry.started_at.elapsed().as_secs_f64() * 1000.0;
            (entry.callback)(PingOutcome {
                ret_code: RetCode::Success,
                rtt_ms: Some(rtt_ms),
            });
        }
        // Unknown ids are stale or foreign replies; dropped silently.
    }
}

fn sweep_timeouts(in_flight: &Mutex<HashMap<u16, InFlight>>) {
    let expired: Vec<InFlight> = {
        let mut guard = in_flight.lock().unwrap();
        let expired_ids: Vec<u16> = guard
            .iter()
            .filter(|(_, entry)| entry.started_at.elapsed() > entry.timeout)
            .map(|(id, _)| *id)
            .collect();
        expired_ids
            .into_iter()
            .filter_map(|id| guard.remove(&id))
            .collect()
    };

    for entry in expired {
        (entry.callback)(PingOutcome {
            ret_code: RetCode::Timeout,
            rtt_ms: None,
        });
    }
}

fn cancel_all(send_queue: &Mutex<VecDeque<PendingSend>>, in_flight: &Mutex<HashMap<u16, InFlight>>) {
    let queued: Vec<PendingSend> = send_queue.lock().unwrap().drain(..).collect();
    for pending in queued {
        (pending.callback)(PingOutcome {
            ret_code: RetCode::Cancelled,
            rtt_ms: None,
        });
    }

    let flying: Vec<InFlight> = in_flight.lock().unwrap().drain().map(|(_, v)| v).collect();
    for entry in flying {
        (entry.callback)(PingOutcome {
            ret_code: RetCode::Cancelled,
            rtt_ms: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_parses_ipv4_literals_without_touching_dns() {
        assert_eq!(resolve("127.0.0.1"), Some(Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[test]
    fn resolve_rejects_garbage_hostnames() {
        assert_eq!(resolve("not a host name!!"), None);
    }
}
