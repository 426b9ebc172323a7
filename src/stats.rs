//! Driver loop statistics and their HTTP endpoint.
//!
//! [`LoopStats`] is shared between the driver loop and the [`StatsServer`];
//! every counter is atomic so neither side locks.
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 3600,
//!   "iterations": 3412345,
//!   "uplinks": { "submitted": 30, "dropped": 0, "rejected": 0, "tx_complete": 30 },
//!   "events": 31,
//!   "io_faults": 0
//! }
//! ```

use log::{error, info, warn};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Header, Method, Response, Server};

/// Counters maintained by the driver loop.
#[derive(Debug)]
pub struct LoopStats {
    start_time: Instant,
    /// Completed `service()` calls.
    pub iterations: AtomicU64,
    /// Uplinks handed to the engine.
    pub submitted: AtomicU64,
    /// Send attempts skipped because the engine was busy.
    pub dropped: AtomicU64,
    /// Uplinks the engine refused.
    pub rejected: AtomicU64,
    /// Transmit completions.
    pub tx_complete: AtomicU64,
    /// Engine events of any kind.
    pub events: AtomicU64,
    /// Transient pin/bus faults.
    pub io_faults: AtomicU64,
}

impl Default for LoopStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            iterations: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            tx_complete: AtomicU64::new(0),
            events: AtomicU64::new(0),
            io_faults: AtomicU64::new(0),
        }
    }
}

impl LoopStats {
    /// Fresh counters; uptime starts now.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one to `counter`.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Seconds since creation.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.uptime_secs(),
            iterations: self.iterations.load(Ordering::Relaxed),
            uplinks: UplinkCounts {
                submitted: self.submitted.load(Ordering::Relaxed),
                dropped: self.dropped.load(Ordering::Relaxed),
                rejected: self.rejected.load(Ordering::Relaxed),
                tx_complete: self.tx_complete.load(Ordering::Relaxed),
            },
            events: self.events.load(Ordering::Relaxed),
            io_faults: self.io_faults.load(Ordering::Relaxed),
        }
    }

    /// Serialize all statistics to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Uplink outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UplinkCounts {
    pub submitted: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub tx_complete: u64,
}

/// Copy of [`LoopStats`] at one instant. Also the driver loop's exit summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub iterations: u64,
    pub uplinks: UplinkCounts,
    pub events: u64,
    pub io_faults: u64,
}

/// HTTP stats server.
///
/// Runs in a background thread and serves [`LoopStats`] as JSON on `/stats`.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    port: u16,
}

impl StatsServer {
    /// Bind and start serving. `bind_addr` of `None` listens on 0.0.0.0;
    /// port 0 picks a free port (see [`port`](Self::port)).
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        stats: Arc<LoopStats>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|a| a.port())
            .unwrap_or(port);

        info!("Stats server listening on http://{}/stats", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::spawn(move || {
            Self::run_server(server, stats, shutdown_clone);
        });

        Ok(Self {
            handle: Some(handle),
            shutdown,
            port,
        })
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn run_server(server: Server, stats: Arc<LoopStats>, shutdown: Arc<AtomicBool>) {
        let headers = (
            Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]),
            Header::from_bytes(&b"Allow"[..], &b"GET"[..]),
        );
        let (Ok(content_type), Ok(allow_get)) = headers else {
            error!("Stats server could not build response headers");
            return;
        };

        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Stats server shutting down");
                break;
            }

            match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(request)) => {
                    if request.method() != &Method::Get {
                        let response = Response::from_string("Method Not Allowed")
                            .with_status_code(405)
                            .with_header(allow_get.clone());
                        let _ = request.respond(response);
                        continue;
                    }

                    let path = request.url();
                    let result = if path == "/stats" || path == "/stats/" {
                        let response = Response::from_string(stats.to_json())
                            .with_header(content_type.clone())
                            .with_status_code(200);
                        request.respond(response)
                    } else {
                        request.respond(Response::from_string("Not Found").with_status_code(404))
                    };
                    if let Err(e) = result {
                        warn!("Failed to send response: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Server error: {}", e);
                    break;
                }
            }
        }
    }

    /// Stop the server. May take up to 100 ms.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}
