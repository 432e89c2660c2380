use std::net::SocketAddr;

use slog::Logger;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, watch};

use quorum_core::error::{Error, Result};
use quorum_core::logger::get_root_logger;

use crate::client::{Client, ClientRequest};
use crate::codec::Serializer;
use crate::config::RaftConfig;
use crate::raft::{RaftHandle, Status};
use crate::rpc::{Envelope, Message, Outbound};

/// Largest datagram we accept; comfortably above any frame we produce.
const MAX_DATAGRAM: usize = 64 * 1024;

/// One Raft node: a UDP endpoint plus the role state machine, driven by a
/// single event loop. Everything the node owns — log, storage, state
/// machine, role — is touched only from that loop, so handlers run to
/// completion without locks.
pub struct RaftNode {
    config: RaftConfig,
    logger: Logger,
    requests: mpsc::UnboundedReceiver<ClientRequest>,
    status_tx: watch::Sender<Status>,
}

impl RaftNode {
    /// Build a node and the client handle that talks to it. The node does
    /// nothing until `run`.
    pub fn new(config: RaftConfig) -> Result<(RaftNode, Client)> {
        config.validate()?;
        let (request_tx, requests) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::default());
        let logger = get_root_logger().new(o!("id" => config.id.clone()));
        let client = Client::new(config.id.clone(), request_tx, status_rx);
        let node = RaftNode {
            config,
            logger,
            requests,
            status_tx,
        };
        Ok((node, client))
    }

    /// Bind the socket and drive the node until shutdown or a fatal
    /// storage error. Inbound frames, timer fires, client requests, and
    /// outbound flushes all interleave through one `select!`; after every
    /// event the commit window is applied.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr = resolve(&self.config.id).await?;
        let socket = UdpSocket::bind(addr).await?;
        info!(self.logger, "listening"; "addr" => %addr);
        let serializer = self.config.serializer()?;

        let (outbound_tx, mut outbound) = mpsc::unbounded_channel::<Outbound>();
        let (timer_tx, mut timers) = mpsc::unbounded_channel();

        let mut handle = RaftHandle::new(
            self.config.clone(),
            self.logger.clone(),
            outbound_tx,
            timer_tx,
            self.status_tx,
        )?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(self.logger, "shutting down");
                    break;
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, sender) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            // transport hiccups are survivable; retry rides
                            // on the next heartbeat
                            warn!(self.logger, "receive failed"; "error" => %e);
                            continue;
                        }
                    };
                    match serializer.unpack::<Message>(&buf[..len]) {
                        Ok(message) => {
                            let envelope = Envelope {
                                from: sender.to_string(),
                                message,
                            };
                            handle = handle.receive(envelope)?;
                        }
                        Err(e) => {
                            warn!(self.logger, "dropping malformed frame";
                                "from" => %sender, "error" => %e);
                        }
                    }
                }
                Some(event) = timers.recv() => {
                    handle = handle.timer_event(event)?;
                }
                Some(request) = self.requests.recv() => {
                    handle = handle.request(request)?;
                }
                Some(frame) = outbound.recv() => {
                    send_frame(&self.logger, &socket, &serializer, frame).await;
                }
            }
            handle.apply_committed()?;
        }
        handle.stop();
        Ok(())
    }
}

async fn send_frame(
    logger: &Logger,
    socket: &UdpSocket,
    serializer: &Serializer,
    frame: Outbound,
) {
    let peer = match resolve(&frame.to).await {
        Ok(peer) => peer,
        Err(e) => {
            warn!(logger, "unresolvable peer"; "to" => %frame.to, "error" => %e);
            return;
        }
    };
    let bytes = match serializer.pack(&frame.message) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(logger, "failed to encode frame"; "error" => %e);
            return;
        }
    };
    if let Err(e) = socket.send_to(&bytes, peer).await {
        warn!(logger, "send failed"; "to" => %frame.to, "error" => %e);
    }
}

/// `host:port` → socket address, through the resolver when it is not a
/// literal.
async fn resolve(id: &str) -> Result<SocketAddr> {
    if let Ok(addr) = id.parse::<SocketAddr>() {
        return Ok(addr);
    }
    tokio::net::lookup_host(id)
        .await?
        .next()
        .ok_or_else(|| Error::Config(format!("cannot resolve `{}`", id)))
}
