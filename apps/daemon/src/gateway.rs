//! 客户端网关
//!
//! TCP 监听，每个连接一对线程：
//! - 读线程：逐行解析 [`ClientRequest`]，调用 [`ServoDriver`]，把回复投递给本客户端
//! - 写线程：消费本客户端的事件队列，逐行写出 JSON
//!
//! 另有一个事件转发线程，把驱动事件（通道降级、录制保存失败）广播给所有客户端。

use crate::client_manager::ClientManager;
use crate::protocol::{ClientRequest, ServerEvent, WireStep};
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use parking_lot::RwLock;
use servo_driver::{DriverError, DriverEvent, PlayOutcome, ServoDriver};
use servo_protocol::Group;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 轮询关闭标志的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 单条请求的最大长度（含导入文本），超过后丢弃到下一个换行
pub const MAX_REQUEST_LEN: usize = 1024 * 1024;

/// 客户端写超时，避免不读数据的客户端拖住写线程
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// 一个客户端连接的读写线程
struct Session {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    fn is_finished(&self) -> bool {
        self.reader.is_finished() && self.writer.is_finished()
    }

    /// 先等读线程（注销客户端、关闭发送队列），再等写线程
    fn join(self) {
        if self.reader.join().is_err() {
            error!("Client reader thread panicked");
        }
        if self.writer.join().is_err() {
            error!("Client writer thread panicked");
        }
    }
}

/// 处理一个客户端请求，返回需要回复给该客户端的事件
pub fn handle_request(driver: &ServoDriver, request: ClientRequest) -> Option<ServerEvent> {
    match request {
        ClientRequest::Move(wire) => {
            let Some(step) = wire.to_step() else {
                warn!("Ignoring invalid move request: {:?}", wire);
                return None;
            };
            driver.move_step(step).err().map(notice)
        },
        ClientRequest::SaveSequence(wires) => {
            let group = collect_group(&wires);
            match driver.save_sequence(group) {
                Ok(_) => None,
                Err(e) => Some(notice(e)),
            }
        },
        ClientRequest::GetSequences => Some(ServerEvent::SequencesList(driver.sequences())),
        ClientRequest::PlaySequence => match driver.play_stored() {
            Ok(PlayOutcome::Started) => None,
            Ok(PlayOutcome::EmptyStore) => {
                Some(ServerEvent::Notice("No stored sequences to play".to_string()))
            },
            Err(e) => Some(notice(e)),
        },
        ClientRequest::DownloadTxt => match driver.export_text() {
            Ok(path) => Some(ServerEvent::TxtReady(path.display().to_string())),
            Err(e) => Some(notice(e)),
        },
        ClientRequest::ImportTxt(text) => driver.import_and_play(&text).err().map(notice),
    }
}

/// 过滤无效步骤，组成一个组
fn collect_group(wires: &[WireStep]) -> Group {
    wires
        .iter()
        .filter_map(|wire| {
            let step = wire.to_step();
            if step.is_none() {
                warn!("Skipping invalid step in saved sequence: {:?}", wire);
            }
            step
        })
        .collect()
}

fn notice(err: DriverError) -> ServerEvent {
    warn!("Request failed: {}", err);
    ServerEvent::Notice(err.to_string())
}

/// 驱动事件 → 广播事件
fn driver_event_to_server(event: DriverEvent) -> ServerEvent {
    match event {
        DriverEvent::Degraded { reason } => ServerEvent::Degraded(reason),
        DriverEvent::StorageFailed { path, reason } => ServerEvent::Notice(format!(
            "Failed to save captured sequence to {}: {}",
            path.display(),
            reason
        )),
    }
}

/// 客户端网关
pub struct Gateway {
    listener: TcpListener,
    driver: Arc<ServoDriver>,
    clients: Arc<RwLock<ClientManager>>,
    shutdown: Arc<AtomicBool>,
}

impl Gateway {
    /// 绑定监听地址
    pub fn bind(addr: &str, driver: Arc<ServoDriver>, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).with_context(|| format!("Failed to bind gateway on {}", addr))?;
        // 非阻塞 accept，以便轮询关闭标志
        listener
            .set_nonblocking(true)
            .context("Failed to set listener non-blocking")?;

        Ok(Self {
            listener,
            driver,
            clients: Arc::new(RwLock::new(ClientManager::new())),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 运行网关（阻塞直到关闭标志置位）
    pub fn run(&self) -> Result<()> {
        info!("Gateway listening on {}", self.local_addr()?);

        let forwarder = {
            let events = self.driver.subscribe();
            let clients = self.clients.clone();
            let shutdown = self.shutdown.clone();
            thread::Builder::new()
                .name("event_forwarder".into())
                .spawn(move || event_forward_loop(events, clients, shutdown))
                .context("Failed to spawn event forwarder thread")?
        };

        let mut sessions: Vec<Session> = Vec::new();
        while !self.shutdown.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, addr)) => match self.spawn_session(stream, addr) {
                    Ok(session) => sessions.push(session),
                    Err(e) => error!("Failed to start session for {}: {:#}", addr, e),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => warn!("Failed to accept connection: {}", e),
            }
            sessions.retain(|session| !session.is_finished());
        }

        info!("Gateway shutting down");
        for session in sessions {
            session.join();
        }
        if forwarder.join().is_err() {
            error!("Event forwarder thread panicked");
        }
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, addr: SocketAddr) -> Result<Session> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        let writer_stream = stream.try_clone()?;
        writer_stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        let (tx, rx) = unbounded();
        let id = {
            let mut clients = self.clients.write();
            let id = clients.register(addr, tx);
            info!("Client {} connected from {} ({} connected)", id, addr, clients.len());
            id
        };

        let writer = match thread::Builder::new()
            .name(format!("client_{}_tx", id))
            .spawn(move || session_write_loop(writer_stream, rx))
        {
            Ok(writer) => writer,
            Err(e) => {
                self.clients.write().unregister(id);
                return Err(e).context("Failed to spawn client writer thread");
            },
        };

        let driver = self.driver.clone();
        let clients = self.clients.clone();
        let shutdown = self.shutdown.clone();
        let reader = match thread::Builder::new()
            .name(format!("client_{}_rx", id))
            .spawn(move || {
                session_read_loop(stream, id, &driver, &clients, &shutdown);
                if let Some(client) = clients.write().unregister(id) {
                    info!(
                        "Client {} ({}) disconnected after {:?}",
                        client.id,
                        client.addr,
                        client.age()
                    );
                }
            }) {
            Ok(reader) => reader,
            Err(e) => {
                // 注销后发送队列关闭，写线程随之退出
                self.clients.write().unregister(id);
                let _ = writer.join();
                return Err(e).context("Failed to spawn client reader thread");
            },
        };

        Ok(Session { reader, writer })
    }
}

/// 客户端读循环
fn session_read_loop(
    stream: TcpStream,
    id: u32,
    driver: &ServoDriver,
    clients: &RwLock<ClientManager>,
    shutdown: &AtomicBool,
) {
    let mut reader = BufReader::new(stream);
    // 读超时时已读到的部分行保留在缓冲区中
    let mut buf = Vec::new();
    // 正在丢弃一条超长请求的剩余部分
    let mut discarding = false;

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let budget = (MAX_REQUEST_LEN + 1).saturating_sub(buf.len()) as u64;
        match (&mut reader).take(budget).read_until(b'\n', &mut buf) {
            Ok(_) if buf.last() == Some(&b'\n') => {
                if !discarding {
                    process_line(&buf, id, driver, clients);
                }
                discarding = false;
                buf.clear();
            },
            Ok(_) if buf.len() > MAX_REQUEST_LEN => {
                if !discarding {
                    warn!(
                        "Client {} sent a message over {} bytes, discarding",
                        id, MAX_REQUEST_LEN
                    );
                }
                discarding = true;
                buf.clear();
            },
            Ok(_) => {
                // EOF：处理对端关闭前没有换行的最后一行
                if !discarding {
                    process_line(&buf, id, driver, clients);
                }
                break;
            },
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Client {} read error: {}", id, e);
                break;
            },
        }
    }
}

fn process_line(raw: &[u8], id: u32, driver: &ServoDriver, clients: &RwLock<ClientManager>) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let request = match serde_json::from_str::<ClientRequest>(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("Client {} sent a malformed message: {}", id, e);
            return;
        },
    };

    debug!("Client {} request: {:?}", id, request);
    if let Some(reply) = handle_request(driver, request) {
        clients.read().send_to(id, reply);
    }
}

/// 客户端写循环（发送队列关闭后退出）
fn session_write_loop(mut stream: TcpStream, events: Receiver<ServerEvent>) {
    for event in events {
        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to encode event {:?}: {}", event, e);
                continue;
            },
        };
        if let Err(e) = stream.write_all(line.as_bytes()) {
            debug!("Client write failed: {}", e);
            break;
        }
    }
    let _ = stream.shutdown(std::net::Shutdown::Both);
}

/// 驱动事件转发循环
fn event_forward_loop(
    events: Receiver<DriverEvent>,
    clients: Arc<RwLock<ClientManager>>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            trace!("Event forwarder: shutdown flag set, exiting");
            break;
        }

        match events.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                let event = driver_event_to_server(event);
                let clients = clients.read();
                if clients.is_empty() {
                    warn!("No clients connected to receive {:?}", event);
                    continue;
                }
                let delivered = clients.broadcast(&event);
                info!("Broadcast {:?} to {} clients", event, delivered);
            },
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
