//! UDP datagram transport.
//!
//! One socket per node; one datagram carries one wire frame. A reader
//! thread decodes inbound frames and hands them to the registered listener.
//! Sends are fire-and-forget: the periodic protocol tick makes retries
//! unnecessary.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use aggregation::{Identity, Network, Packet, PacketListener};
use anyhow::{Context, Result};
use crypto::Scheme;
use slog::{Logger, debug, o, warn};

/// Largest datagram the reader accepts; matches the wire-format bound.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Poll interval for the shutdown flag while blocked in `recv_from`.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A [`Network`] implementation over a single UDP socket.
pub struct UdpNetwork {
    socket: UdpSocket,
    listener: Arc<RwLock<Option<Arc<dyn PacketListener>>>>,
    shutdown: Arc<AtomicBool>,
    logger: Logger,
}

impl UdpNetwork {
    /// Bind `addr` and spawn the reader thread.
    pub fn bind(addr: SocketAddr, logger: Logger) -> Result<Arc<Self>> {
        let logger = logger.new(o!("component" => "udp"));
        let socket =
            UdpSocket::bind(addr).with_context(|| format!("binding udp socket on {addr}"))?;
        socket
            .set_read_timeout(Some(READ_TIMEOUT))
            .context("setting the udp read timeout")?;

        let network = Arc::new(Self {
            socket: socket.try_clone().context("cloning the udp socket")?,
            listener: Arc::new(RwLock::new(None)),
            shutdown: Arc::new(AtomicBool::new(false)),
            logger,
        });

        let listener = Arc::clone(&network.listener);
        let shutdown = Arc::clone(&network.shutdown);
        let reader_logger = network.logger.clone();
        thread::Builder::new()
            .name("udp-reader".into())
            .spawn(move || read_loop(socket, listener, shutdown, reader_logger))
            .context("spawning the udp reader")?;

        Ok(network)
    }

    /// The address the socket actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("reading the bound address")
    }

    /// Stop the reader thread.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn read_loop(
    socket: UdpSocket,
    listener: Arc<RwLock<Option<Arc<dyn PacketListener>>>>,
    shutdown: Arc<AtomicBool>,
    logger: Logger,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while !shutdown.load(Ordering::Relaxed) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => {
                warn!(logger, "udp receive failed"; "error" => %err);
                continue;
            }
        };
        let packet = match Packet::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(logger, "dropping undecodable datagram";
                    "from" => %from,
                    "error" => %err,
                );
                continue;
            }
        };
        let guard = listener.read().unwrap();
        if let Some(listener) = guard.as_ref() {
            listener.new_packet(packet);
        }
    }
}

impl<S: Scheme> Network<S> for UdpNetwork {
    fn send(&self, ids: &[Identity<S::Public>], packet: &Packet) {
        let frame = packet.encode();
        for identity in ids {
            if let Err(err) = self.socket.send_to(&frame, identity.address()) {
                debug!(self.logger, "udp send failed";
                    "to" => identity.address(),
                    "error" => %err,
                );
            }
        }
    }

    fn register_listener(&self, listener: Arc<dyn PacketListener>) {
        *self.listener.write().unwrap() = Some(listener);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recorder(Mutex<Vec<Packet>>);

    impl PacketListener for Recorder {
        fn new_packet(&self, packet: Packet) {
            self.0.lock().unwrap().push(packet);
        }
    }

    fn quiet() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    #[test]
    fn delivers_decoded_packets_to_the_listener() {
        let receiver = UdpNetwork::bind("127.0.0.1:0".parse().unwrap(), quiet()).unwrap();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        <UdpNetwork as Network<crypto::Bls12381>>::register_listener(
            &receiver,
            recorder.clone(),
        );

        let packet = Packet {
            origin: 3,
            level: 2,
            multi_sig: vec![7; 16],
        };
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap();
        sender.send_to(&packet.encode(), addr).unwrap();
        // Garbage datagrams are dropped without disturbing the reader.
        sender.send_to(&[1, 2, 3], addr).unwrap();
        sender.send_to(&packet.encode(), addr).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if recorder.0.lock().unwrap().len() >= 2 {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "packets never arrived"
            );
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(recorder.0.lock().unwrap()[0], packet);
        receiver.shutdown();
    }
}
