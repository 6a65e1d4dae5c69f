//! TCP Server
//!
//! Accepts connections and dispatches ready ones to worker threads.
//!
//! ## Threads
//! ```text
//!   acceptor ──insert──▶ ConnectionTable ◀──sweep── poller
//!                              ▲                      │ ready ids
//!                              │ drive                ▼
//!                           workers ◀──────── crossbeam channel
//! ```
//!
//! All sockets are non-blocking. A connection is ready when it has pending
//! output or buffered input, or when a `peek` reports data, EOF or an error.
//! A response blocked on a full socket is retried once per poll interval.
//! A slot's `queued` flag keeps it in the channel at most once, so one
//! connection is never driven by two workers.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{KvError, Result};

use super::table::{ConnId, ConnectionTable};
use super::{Connection, RequestHandler};

/// Cloneable handle that stops a running server
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Signal the server to shut down
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// TCP server for shardkv
pub struct Server {
    config: Config,
    engine: Arc<Engine>,
    listener: TcpListener,
    table: Arc<ConnectionTable<TcpStream>>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Bind the listen address from config
    pub fn bind(config: Config, engine: Arc<Engine>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            config,
            engine,
            listener,
            table: Arc::new(ConnectionTable::new()),
            shutdown: ShutdownHandle::default(),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Signal the server to shutdown gracefully
    pub fn stop(&self) {
        self.shutdown.stop();
    }

    /// Number of open client connections
    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    /// Serve until stopped (blocking)
    ///
    /// The calling thread runs the acceptor. On stop, the poller and workers
    /// are joined, connections are dropped and storage is flushed.
    pub fn run(&self) -> Result<()> {
        let (tx, rx) = channel::unbounded::<ConnId>();
        let idle = Duration::from_millis(self.config.poll_interval_ms.max(1));

        let mut workers = Vec::with_capacity(self.config.workers);
        for n in 0..self.config.workers.max(1) {
            let rx = rx.clone();
            let table = Arc::clone(&self.table);
            let engine = Arc::clone(&self.engine);
            let handle = thread::Builder::new()
                .name(format!("shardkv-worker-{}", n))
                .spawn(move || worker_loop(rx, &table, engine.as_ref()))?;
            workers.push(handle);
        }
        drop(rx);

        let poller = {
            let table = Arc::clone(&self.table);
            let shutdown = self.shutdown.clone();
            thread::Builder::new()
                .name("shardkv-poller".to_string())
                .spawn(move || poller_loop(tx, &table, &shutdown, idle))?
        };

        tracing::info!("Server started with {} workers", workers.len());
        let accepted = self.accept_loop(idle);

        // The poller drops the sender on exit, which ends the workers
        self.shutdown.stop();
        if poller.join().is_err() {
            tracing::error!("Poller thread panicked");
        }
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }

        self.table.clear();
        self.engine.close();
        tracing::info!("Server stopped");
        accepted
    }

    fn accept_loop(&self, idle: Duration) -> Result<()> {
        while !self.shutdown.is_stopped() {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true).and_then(|_| stream.set_nodelay(true)) {
                        tracing::warn!("Dropping connection from {}: {}", addr, e);
                        continue;
                    }
                    let conn = Connection::new(stream, addr.to_string(), self.config.max_frame_len);
                    let id = self.table.insert(conn);
                    tracing::debug!("Connection {} established from {}", id, addr);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(idle),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(idle);
                }
            }
        }
        Ok(())
    }
}

fn poller_loop(
    tx: Sender<ConnId>,
    table: &ConnectionTable<TcpStream>,
    shutdown: &ShutdownHandle,
    idle: Duration,
) {
    while !shutdown.is_stopped() {
        let mut dispatched = 0;
        for (id, slot) in table.snapshot() {
            if slot.is_queued() {
                continue;
            }
            let Some(conn) = slot.conn.try_lock() else {
                continue;
            };
            // A peer that stops reading is retried once per interval, not per sweep
            let ready = match conn.write_blocked_at() {
                Some(blocked_at) => blocked_at.elapsed() >= idle,
                None => conn.has_pending() || peer_ready(conn.stream()),
            };
            drop(conn);

            if ready && slot.try_queue() {
                if tx.send(id).is_err() {
                    return;
                }
                dispatched += 1;
            }
        }
        if dispatched == 0 {
            thread::sleep(idle);
        }
    }
}

fn worker_loop(rx: Receiver<ConnId>, table: &ConnectionTable<TcpStream>, handler: &dyn RequestHandler) {
    while let Ok(id) = rx.recv() {
        let Some(slot) = table.get(id) else {
            continue;
        };

        let outcome = {
            let mut conn = slot.conn.lock();
            conn.drive(handler).map_err(|e| (e, conn.peer().to_string()))
        };
        slot.release();

        if let Err((e, peer)) = outcome {
            match e {
                KvError::Disconnected => tracing::debug!("Client {} disconnected", peer),
                e => tracing::warn!("Closing connection from {}: {}", peer, e),
            }
            table.remove(id);
        }
    }
}

/// Non-blocking readiness check: data, EOF and socket errors are all ready
fn peer_ready(stream: &TcpStream) -> bool {
    let mut byte = [0u8; 1];
    match stream.peek(&mut byte) {
        Ok(_) => true,
        Err(e) => !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted),
    }
}
