pub mod client;
pub mod messages;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clinowire::frame;
use log::{debug, error, info, warn};

use crate::config::TelemetryConfig;
use crate::errors::{ServerStartupError, TelemetryError};
use crate::notify::{Headline, Notify, Severity};
pub use client::ChamberClient;
pub use messages::{ControlMessage, SensorReading, TelemetryMessage};

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
}

/// The collaborator's ends of the server queues.
pub struct TelemetryQueues {
    /// Every reading a chamber delivered, in accept order.
    pub inbound: Receiver<TelemetryMessage>,
    /// Control for the next chamber contact. Only the newest pending value is sent.
    pub outbound: Sender<ControlMessage>,
}

struct Exchange {
    inbound: SyncSender<TelemetryMessage>,
    outbound: Mutex<Receiver<ControlMessage>>,
    client_timeout: Option<Duration>,
    notifier: Arc<dyn Notify>,
}

impl Exchange {
    /// One request, one reply, then the connection is dropped.
    fn serve(&self, mut stream: TcpStream) -> Result<(), TelemetryError> {
        stream.set_read_timeout(self.client_timeout)?;
        stream.set_write_timeout(self.client_timeout)?;
        let message = TelemetryMessage::new(frame::decode(&mut stream)?);
        match self.inbound.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Inbound telemetry queue is full, dropping reading");
                self.notifier.notify(Headline::Tcp, Severity::Warning, "Inbound queue is full, reading dropped.");
            }
            Err(TrySendError::Disconnected(_)) => debug!("Nobody consumes telemetry, dropping reading"),
        }
        let reply = self.latest_control();
        frame::write_frame(&mut stream, &reply.to_string())?;
        Ok(())
    }

    fn latest_control(&self) -> ControlMessage {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let mut latest = None;
        let mut superseded = 0usize;
        while let Ok(control) = outbound.try_recv() {
            if latest.replace(control).is_some() {
                superseded += 1;
            }
        }
        if superseded > 0 {
            debug!("{superseded} control messages superseded before delivery");
        }
        latest.unwrap_or_default()
    }
}

fn accept_loop(listener: TcpListener, running: &AtomicBool, exchange: &Exchange) {
    for stream in listener.incoming() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to accept telemetry connection: {err}");
                exchange.notifier.notify(Headline::Tcp, Severity::Warning, &format!("Failed to accept connection: {err}"));
                continue;
            }
        };
        let peer = match stream.peer_addr() {
            Ok(peer) => peer.to_string(),
            Err(_) => "unknown peer".to_string(),
        };
        debug!("Telemetry connection from {peer}");
        if let Err(err) = exchange.serve(stream) {
            warn!("Telemetry exchange with {peer} failed: {err}");
            exchange.notifier.notify(Headline::Tcp, Severity::Warning, &format!("Exchange with {peer} failed: {err}"));
        }
    }
    debug!("Telemetry accept loop finished");
}

/// Accepts chamber connections on a background thread and routes readings
/// and control messages through [`TelemetryQueues`].
pub struct TelemetryServer {
    state: ServerState,
    exchange: Arc<Exchange>,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    accept_loop: Option<JoinHandle<()>>,
}

impl TelemetryServer {
    pub fn new(config: &TelemetryConfig, notifier: Arc<dyn Notify>) -> (Self, TelemetryQueues) {
        let (inbound_tx, inbound_rx) = mpsc::sync_channel(config.inbound_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel();
        let timeout = config.client_timeout();
        let server = TelemetryServer {
            state: ServerState::Stopped,
            exchange: Arc::new(Exchange {
                inbound: inbound_tx,
                outbound: Mutex::new(outbound_rx),
                client_timeout: (!timeout.is_zero()).then_some(timeout),
                notifier,
            }),
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            accept_loop: None,
        };
        let queues = TelemetryQueues {
            inbound: inbound_rx,
            outbound: outbound_tx,
        };
        (server, queues)
    }

    pub const fn state(&self) -> ServerState {
        self.state
    }

    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Binds `host:port` and starts accepting. Bind failures are returned
    /// before any thread exists; the server then stays [`ServerState::Stopped`].
    pub fn start(&mut self, host: &str, port: u16) -> Result<SocketAddr, ServerStartupError> {
        if self.state != ServerState::Stopped {
            return Err(ServerStartupError::AlreadyRunning);
        }
        self.state = ServerState::Starting;
        match self.listen(host, port) {
            Ok(local_addr) => {
                self.state = ServerState::Listening;
                info!("Telemetry server listening on {local_addr}");
                self.notify(Severity::Info, &format!("Server listening on {local_addr}."));
                Ok(local_addr)
            }
            Err(err) => {
                self.state = ServerState::Stopped;
                error!("{err}");
                self.notify(Severity::Error, &err.to_string());
                Err(err)
            }
        }
    }

    fn listen(&mut self, host: &str, port: u16) -> Result<SocketAddr, ServerStartupError> {
        let address = format!("{host}:{port}");
        let bind_error = |source| ServerStartupError::Bind {
            address: address.clone(),
            source,
        };
        let listener = TcpListener::bind((host, port)).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let exchange = Arc::clone(&self.exchange);
        let spawned = thread::Builder::new()
            .name("telemetry-accept".to_string())
            .spawn(move || accept_loop(listener, &running, &exchange));
        match spawned {
            Ok(handle) => {
                self.accept_loop = Some(handle);
                self.local_addr = Some(local_addr);
                Ok(local_addr)
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                Err(ServerStartupError::Spawn(err))
            }
        }
    }

    /// Stops accepting and waits for the accept loop. An exchange in progress
    /// is finished first. Safe to call on a server that never started.
    ///
    /// If the loop cannot be woken the server keeps listening, so a later call
    /// (or the drop) can try again.
    pub fn close(&mut self) {
        let Some(handle) = self.accept_loop.take() else {
            self.state = ServerState::Stopped;
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        let woken = self.local_addr.is_some_and(wake) || handle.is_finished();
        if !woken {
            self.running.store(true, Ordering::SeqCst);
            self.accept_loop = Some(handle);
            error!("Telemetry accept loop did not wake up, the port stays bound");
            self.notify(Severity::Error, "Server could not be closed, the port stays bound.");
            return;
        }
        if handle.join().is_err() {
            error!("Telemetry accept loop panicked");
        }
        self.local_addr = None;
        self.state = ServerState::Stopped;
        info!("Telemetry server closed");
        self.notify(Severity::Info, "Server closed.");
    }

    fn notify(&self, severity: Severity, message: &str) {
        self.exchange.notifier.notify(Headline::Tcp, severity, message);
    }
}

impl Drop for TelemetryServer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Unblocks `accept()` with a throwaway connection.
fn wake(mut addr: SocketAddr) -> bool {
    if addr.ip().is_unspecified() {
        match addr {
            SocketAddr::V4(_) => addr.set_ip(Ipv4Addr::LOCALHOST.into()),
            SocketAddr::V6(_) => addr.set_ip(Ipv6Addr::LOCALHOST.into()),
        }
    }
    match TcpStream::connect_timeout(&addr, WAKE_TIMEOUT) {
        Ok(_) => true,
        Err(err) => {
            warn!("Failed to wake telemetry accept loop on {addr}: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            address: "127.0.0.1".to_string(),
            port: 0,
            inbound_capacity: 2,
            client_timeout_ms: 2_000,
        }
    }

    fn exchange(addr: SocketAddr, payload: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        frame::write_frame(&mut stream, payload).unwrap();
        frame::decode(&mut stream).unwrap()
    }

    #[test]
    fn lifecycle() {
        let (mut server, _queues) = TelemetryServer::new(&config(), Arc::new(NullNotifier));
        assert_eq!(server.state(), ServerState::Stopped);
        let addr = server.start("127.0.0.1", 0).unwrap();
        assert_eq!(server.state(), ServerState::Listening);
        assert_eq!(server.local_addr(), Some(addr));
        assert!(matches!(server.start("127.0.0.1", 0), Err(ServerStartupError::AlreadyRunning)));
        server.close();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());
        server.close();
        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn close_without_start() {
        let (mut server, _queues) = TelemetryServer::new(&config(), Arc::new(NullNotifier));
        server.close();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn newest_control_wins() {
        let (mut server, queues) = TelemetryServer::new(&config(), Arc::new(NullNotifier));
        let addr = server.start("127.0.0.1", 0).unwrap();
        queues.outbound.send(ControlMessage::lights(10, 10).unwrap()).unwrap();
        queues.outbound.send(ControlMessage::lights(20, 30).unwrap()).unwrap();
        assert_eq!(exchange(addr, "1;2;3;4;5;6"), "20;30");
        assert_eq!(exchange(addr, "1;2;3;4;5;6"), "default");
        assert_eq!(queues.inbound.try_iter().count(), 2);
    }

    #[test]
    fn full_inbound_queue_drops_readings() {
        let (mut server, queues) = TelemetryServer::new(&config(), Arc::new(NullNotifier));
        let addr = server.start("127.0.0.1", 0).unwrap();
        for i in 0..4 {
            assert_eq!(exchange(addr, &format!("{i};0;0;0;0;0")), "default");
        }
        let kept: Vec<_> = queues.inbound.try_iter().map(TelemetryMessage::into_inner).collect();
        assert_eq!(kept, vec!["0;0;0;0;0;0", "1;0;0;0;0;0"]);
    }

    #[test]
    fn dropped_readings_are_reported() {
        let warnings = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&warnings);
        let notifier = move |headline: Headline, severity: Severity, _message: &str| {
            if headline == Headline::Tcp && severity == Severity::Warning {
                *counter.lock().unwrap() += 1;
            }
        };
        let (mut server, queues) = TelemetryServer::new(&config(), Arc::new(notifier));
        let addr = server.start("127.0.0.1", 0).unwrap();
        for i in 0..4 {
            exchange(addr, &format!("{i};0;0;0;0;0"));
        }
        server.close();
        assert_eq!(*warnings.lock().unwrap(), 2);
        assert_eq!(queues.inbound.try_iter().count(), 2);
    }

    #[test]
    fn close_keeps_listening_when_the_loop_cannot_be_woken() {
        let (mut server, _queues) = TelemetryServer::new(&config(), Arc::new(NullNotifier));
        let addr = server.start("127.0.0.1", 0).unwrap();
        let nobody = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        server.local_addr = Some(nobody);

        server.close();
        assert_eq!(server.state(), ServerState::Listening);
        assert!(server.accept_loop.is_some());
        assert!(matches!(server.start("127.0.0.1", 0), Err(ServerStartupError::AlreadyRunning)));
        assert_eq!(exchange(addr, "still here"), "default");

        server.local_addr = Some(addr);
        server.close();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.accept_loop.is_none());
    }

    #[test]
    fn restarts_after_close() {
        let (mut server, queues) = TelemetryServer::new(&config(), Arc::new(NullNotifier));
        server.start("127.0.0.1", 0).unwrap();
        server.close();
        let addr = server.start("127.0.0.1", 0).unwrap();
        assert_eq!(exchange(addr, "again"), "default");
        assert_eq!(queues.inbound.recv().unwrap().as_str(), "again");
    }
}
