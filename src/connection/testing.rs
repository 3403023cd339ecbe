//! Scripted transport for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::{ConnectRequest, Connector, Link, TransportError};

/// Result of one scripted open attempt
#[derive(Clone, Copy, Debug)]
pub(crate) enum Open {
    Accept,
    Refuse,
}

/// Backend side of an accepted mock link
pub(crate) struct Peer {
    pub inbound: mpsc::UnboundedSender<String>,
    pub outbound: mpsc::UnboundedReceiver<String>,
}

pub(crate) struct MockLink {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl Link for MockLink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

struct Script {
    outcomes: VecDeque<Open>,
    requests: Vec<ConnectRequest>,
}

/// Connector following a fixed list of outcomes, refusing once it runs out
#[derive(Clone)]
pub(crate) struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
    opens: Arc<AtomicU32>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl ScriptedConnector {
    pub fn new(outcomes: impl IntoIterator<Item = Open>) -> (Self, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();

        (
            Self {
                script: Arc::new(Mutex::new(Script {
                    outcomes: outcomes.into_iter().collect(),
                    requests: vec![],
                })),
                opens: Arc::new(AtomicU32::new(0)),
                peers,
            },
            peers_rx,
        )
    }

    pub fn refusing() -> (Self, mpsc::UnboundedReceiver<Peer>) {
        Self::new(Vec::<Open>::new())
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.script.lock().unwrap().requests.clone()
    }
}

impl Connector for ScriptedConnector {
    type Link = MockLink;

    async fn open(&self, request: ConnectRequest) -> Result<MockLink, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let outcome = {
            let mut script = self.script.lock().unwrap();
            script.requests.push(request);
            script.outcomes.pop_front().unwrap_or(Open::Refuse)
        };

        match outcome {
            Open::Refuse => Err(TransportError::Handshake("connection refused".to_string())),
            Open::Accept => {
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let _ = self.peers.send(Peer {
                    inbound: inbound_tx,
                    outbound: outbound_rx,
                });

                Ok(MockLink {
                    inbound: inbound_rx,
                    outbound: outbound_tx,
                })
            }
        }
    }
}

/// Connector whose opens never complete
#[derive(Clone, Default)]
pub(crate) struct HangingConnector {
    opens: Arc<AtomicU32>,
}

impl HangingConnector {
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Connector for HangingConnector {
    type Link = MockLink;

    async fn open(&self, _request: ConnectRequest) -> Result<MockLink, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        std::future::pending().await
    }
}
