// Peer state machine
//
// One peer drives the whole sync: it performs the version handshake, then
// a dedicated reader task routes every incoming message. Inventory
// announcements turn into getdata requests, blocks flow into the chain
// engine, and block-locator getblocks requests walk the download forward.
// Callers interact through the download latch and explicit block fetches.

use super::connection::{ConnectionError, MessageReader, MessageWriter};
use super::message::{InvType, InventoryItem, Message, VersionMessage, PROTOCOL_VERSION};
use crate::blockchain::BlockChain;
use crate::core::{Block, Hash256};
use crate::params::NetworkParams;
use crate::util::CountDownLatch;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

/// Peer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerState {
    Created = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl PeerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PeerState::Created,
            1 => PeerState::Running,
            2 => PeerState::ShuttingDown,
            _ => PeerState::Stopped,
        }
    }
}

/// Peer operation failures.
#[derive(Debug)]
pub enum PeerError {
    Io(String),
    Handshake(String),
    /// An awaited block fetch ran out of time.
    Timeout,
    /// The connection went away under an in-flight request.
    Disconnected,
    AlreadyStarted,
    NotRunning,
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PeerError::Io(what) => write!(f, "peer io error: {}", what),
            PeerError::Handshake(what) => write!(f, "handshake failed: {}", what),
            PeerError::Timeout => write!(f, "timed out waiting for the peer"),
            PeerError::Disconnected => write!(f, "peer disconnected"),
            PeerError::AlreadyStarted => write!(f, "peer already started"),
            PeerError::NotRunning => write!(f, "peer is not running"),
        }
    }
}

impl std::error::Error for PeerError {}

/// What the remote told us about itself during the handshake.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub version: u32,
    pub services: u64,
    pub start_height: u32,
    pub user_agent: String,
}

impl PeerInfo {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            version: 0,
            services: 0,
            start_height: 0,
            user_agent: String::new(),
        }
    }
}

type RequestMap = Arc<Mutex<HashMap<Hash256, oneshot::Sender<Block>>>>;

/// Handle to an in-flight explicit block fetch.
///
/// The request is registered before the getdata leaves the wire, so the
/// reply cannot race past it; completion happens on the reader task.
pub struct BlockFuture {
    hash: Hash256,
    rx: oneshot::Receiver<Block>,
    requests: RequestMap,
}

impl BlockFuture {
    /// Await the block with a timeout.
    pub async fn block(self, timeout: Duration) -> Result<Block, PeerError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(block)) => Ok(block),
            Ok(Err(_)) => Err(PeerError::Disconnected),
            Err(_) => Err(PeerError::Timeout),
        }
    }

    /// Advisory cancel: drop the registration so the reader will not store
    /// a late reply here. The reply itself, if it arrives, goes down the
    /// ordinary block path.
    pub fn cancel(self) {
        self.requests.lock().unwrap().remove(&self.hash);
    }
}

/// A connection to one remote node.
pub struct Peer {
    chain: Arc<Mutex<BlockChain>>,
    pub info: PeerInfo,
    writer: Arc<AsyncMutex<MessageWriter>>,
    reader: Option<MessageReader>,
    state: Arc<AtomicU8>,
    shutdown: Arc<Notify>,
    requests: RequestMap,
    download_latch: Arc<Mutex<Option<Arc<CountDownLatch>>>>,
    reader_task: Option<JoinHandle<()>>,
}

impl Peer {
    /// Open a TCP connection and perform the version handshake.
    pub async fn connect(
        params: NetworkParams,
        addr: SocketAddr,
        chain: Arc<Mutex<BlockChain>>,
    ) -> Result<Self, PeerError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| PeerError::Io(e.to_string()))?;
        Self::from_stream(params, stream, addr, chain).await
    }

    /// Handshake over an established stream.
    pub async fn from_stream(
        params: NetworkParams,
        stream: TcpStream,
        addr: SocketAddr,
        chain: Arc<Mutex<BlockChain>>,
    ) -> Result<Self, PeerError> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = MessageReader::new(read_half, params.magic);
        let mut writer = MessageWriter::new(write_half, params.magic);

        let our_height = chain.lock().unwrap().height();
        writer
            .send(&Message::Version(VersionMessage::new(addr, our_height)))
            .await
            .map_err(|e| PeerError::Io(e.to_string()))?;

        let mut info = PeerInfo::new(addr);
        let mut got_version = false;
        let mut got_verack = false;
        while !got_version || !got_verack {
            let message = reader.read().await.map_err(|e| PeerError::Handshake(e.to_string()))?;
            match message {
                Message::Version(v) => {
                    info.version = v.version;
                    info.services = v.services;
                    info.start_height = v.start_height;
                    info.user_agent = v.user_agent;
                    got_version = true;
                    writer
                        .send(&Message::Verack)
                        .await
                        .map_err(|e| PeerError::Io(e.to_string()))?;
                }
                Message::Verack => got_verack = true,
                other => log::debug!("ignoring '{}' during handshake", other.command()),
            }
        }
        reader.require_checksums();
        log::info!(
            "connected to {} at height {} ({})",
            info.addr,
            info.start_height,
            info.user_agent
        );

        Ok(Self {
            chain,
            info,
            writer: Arc::new(AsyncMutex::new(writer)),
            reader: Some(reader),
            state: Arc::new(AtomicU8::new(PeerState::Created as u8)),
            shutdown: Arc::new(Notify::new()),
            requests: Arc::new(Mutex::new(HashMap::new())),
            download_latch: Arc::new(Mutex::new(None)),
            reader_task: None,
        })
    }

    pub fn state(&self) -> PeerState {
        PeerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Launch the reader task.
    pub fn start(&mut self) -> Result<(), PeerError> {
        let reader = self.reader.take().ok_or(PeerError::AlreadyStarted)?;
        self.state.store(PeerState::Running as u8, Ordering::SeqCst);

        let task = run_reader(
            reader,
            self.chain.clone(),
            self.writer.clone(),
            self.requests.clone(),
            self.state.clone(),
            self.shutdown.clone(),
            self.download_latch.clone(),
        );
        self.reader_task = Some(tokio::spawn(task));
        Ok(())
    }

    /// Begin catching up with the peer's chain.
    ///
    /// Returns a latch seeded with the height difference; it counts down
    /// as blocks connect, and callers poll or await it for progress.
    pub async fn start_block_chain_download(&self) -> Result<Arc<CountDownLatch>, PeerError> {
        let (remaining, request) = {
            let chain = self.chain.lock().unwrap();
            let remaining = (self.info.start_height as u64).saturating_sub(chain.height() as u64);
            let request = Message::GetBlocks {
                version: PROTOCOL_VERSION,
                locator: chain.block_locator(),
                stop_hash: Hash256::zero(),
            };
            (remaining, request)
        };
        log::info!("starting block chain download, {} blocks to go", remaining);

        let latch = Arc::new(CountDownLatch::new(remaining));
        *self.download_latch.lock().unwrap() = Some(latch.clone());

        self.writer
            .lock()
            .await
            .send(&request)
            .await
            .map_err(|e| PeerError::Io(e.to_string()))?;
        Ok(latch)
    }

    /// Request one block by hash.
    pub async fn get_block(&self, hash: Hash256) -> Result<BlockFuture, PeerError> {
        if self.state() == PeerState::Stopped {
            return Err(PeerError::NotRunning);
        }
        let (tx, rx) = oneshot::channel();
        // Register before sending so the reply cannot outrun us.
        self.requests.lock().unwrap().insert(hash, tx);

        let request = Message::GetData(vec![InventoryItem::block(hash)]);
        if let Err(e) = self.writer.lock().await.send(&request).await {
            self.requests.lock().unwrap().remove(&hash);
            return Err(PeerError::Io(e.to_string()));
        }
        Ok(BlockFuture {
            hash,
            rx,
            requests: self.requests.clone(),
        })
    }

    /// Tear the connection down. The reader observes the shutdown flag and
    /// exits quietly; transport errors at this point are expected.
    pub async fn disconnect(&mut self) {
        self.state
            .store(PeerState::ShuttingDown as u8, Ordering::SeqCst);
        self.shutdown.notify_one();
        if let Err(e) = self.writer.lock().await.shutdown().await {
            log::debug!("shutdown while closing transport: {}", e);
        }
        if let Some(task) = self.reader_task.take() {
            let _ = task.await;
        }
        self.state.store(PeerState::Stopped as u8, Ordering::SeqCst);
        log::info!("disconnected from {}", self.info.addr);
    }
}

/// The reader task body: one framed message at a time, routed by type.
async fn run_reader(
    mut reader: MessageReader,
    chain: Arc<Mutex<BlockChain>>,
    writer: Arc<AsyncMutex<MessageWriter>>,
    requests: RequestMap,
    state: Arc<AtomicU8>,
    shutdown: Arc<Notify>,
    download_latch: Arc<Mutex<Option<Arc<CountDownLatch>>>>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            result = reader.read() => match result {
                Ok(message) => {
                    if let Err(e) =
                        handle_message(message, &chain, &writer, &requests, &download_latch).await
                    {
                        log::error!("failed to respond to peer: {}", e);
                        break;
                    }
                }
                // Malformed payloads are logged and skipped; the framing
                // layer resynchronizes on the magic bytes.
                Err(ConnectionError::Protocol(e)) => log::warn!("peer sent bad data: {}", e),
                Err(ConnectionError::Io(e)) => {
                    if PeerState::from_u8(state.load(Ordering::SeqCst)) == PeerState::ShuttingDown {
                        log::debug!("read interrupted by shutdown: {}", e);
                    } else {
                        log::error!("connection lost: {}", e);
                    }
                    break;
                }
            }
        }
    }
    state.store(PeerState::Stopped as u8, Ordering::SeqCst);
}

async fn handle_message(
    message: Message,
    chain: &Arc<Mutex<BlockChain>>,
    writer: &Arc<AsyncMutex<MessageWriter>>,
    requests: &RequestMap,
    download_latch: &Arc<Mutex<Option<Arc<CountDownLatch>>>>,
) -> std::io::Result<()> {
    match message {
        Message::Inv(items) => {
            let blocks: Vec<Hash256> = items
                .iter()
                .filter(|i| i.kind == InvType::Block)
                .map(|i| i.hash)
                .collect();
            if blocks.is_empty() {
                return Ok(());
            }

            // A single announcement of our newest orphan is the server
            // saying "ask me for the next batch".
            let continue_signal = blocks.len() == 1
                && chain.lock().unwrap().unconnected_block_hash() == Some(blocks[0]);
            if continue_signal {
                log::debug!("continue signal for {}", blocks[0]);
                let request = build_getblocks(chain, blocks[0]);
                writer.lock().await.send(&request).await?;
            } else {
                log::debug!("requesting {} announced blocks", blocks.len());
                let request =
                    Message::GetData(blocks.into_iter().map(InventoryItem::block).collect());
                writer.lock().await.send(&request).await?;
            }
        }
        Message::Block(block) => {
            let hash = block.hash();
            // An explicit fetch gets the block; the chain does not.
            let pending = requests.lock().unwrap().remove(&hash);
            if let Some(sender) = pending {
                let _ = sender.send(block);
                return Ok(());
            }

            let outcome = {
                let mut chain = chain.lock().unwrap();
                let before = chain.height();
                match chain.add(&block) {
                    Ok(true) => Ok(u64::from(chain.height().saturating_sub(before))),
                    Ok(false) => Err(hash),
                    Err(e) => {
                        // Bad blocks are dropped; the reader lives on.
                        log::warn!("block {} failed to process: {}", hash, e);
                        return Ok(());
                    }
                }
            };
            match outcome {
                Ok(advanced) => {
                    // Counting the height delta covers orphans that
                    // connected in the same round.
                    if advanced > 0 {
                        let latch = download_latch.lock().unwrap().clone();
                        if let Some(latch) = latch {
                            latch.count_down_by(advanced);
                        }
                    }
                }
                Err(orphan) => {
                    // Unconnected: anchor the next catch-up batch on it.
                    let request = build_getblocks(chain, orphan);
                    writer.lock().await.send(&request).await?;
                }
            }
        }
        Message::Addr(addresses) => {
            log::debug!("ignoring {} address announcements", addresses.len());
        }
        Message::Version(_) | Message::Verack => {
            log::debug!("stray handshake message ignored");
        }
        other => log::debug!("ignoring '{}' message", other.command()),
    }
    Ok(())
}

fn build_getblocks(chain: &Arc<Mutex<BlockChain>>, stop_hash: Hash256) -> Message {
    Message::GetBlocks {
        version: PROTOCOL_VERSION,
        locator: chain.lock().unwrap().block_locator(),
        stop_hash,
    }
}
