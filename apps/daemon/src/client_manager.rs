//! 客户端管理
//!
//! 管理连接到守护进程的客户端。每个客户端对应一个事件发送队列，
//! 由该客户端自己的写线程消费，因此广播不会被慢客户端阻塞。

use crate::protocol::ServerEvent;
use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// 客户端信息
#[derive(Debug)]
pub struct Client {
    /// 客户端 ID
    pub id: u32,

    /// 对端地址
    pub addr: SocketAddr,

    /// 事件发送队列
    sender: Sender<ServerEvent>,

    /// 连接时间
    pub connected_at: Instant,
}

impl Client {
    /// 连接时长
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// 客户端管理器
#[derive(Debug)]
pub struct ClientManager {
    clients: HashMap<u32, Client>,
    /// 从 1 开始（0 保留为无效 ID），溢出后从 1 重新开始
    next_id: u32,
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientManager {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            next_id: 1,
        }
    }

    /// 生成唯一 Client ID（单调递增，跳过 0 和已占用的 ID）
    fn generate_client_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1).max(1);

            if !self.clients.contains_key(&id) {
                return id;
            }
        }
    }

    /// 注册客户端，返回生成的 ID
    pub fn register(&mut self, addr: SocketAddr, sender: Sender<ServerEvent>) -> u32 {
        let id = self.generate_client_id();
        self.clients.insert(
            id,
            Client {
                id,
                addr,
                sender,
                connected_at: Instant::now(),
            },
        );
        id
    }

    /// 注销客户端
    ///
    /// 丢弃发送队列后，该客户端的写线程随之退出。
    pub fn unregister(&mut self, id: u32) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// 向单个客户端发送事件
    pub fn send_to(&self, id: u32, event: ServerEvent) -> bool {
        self.clients
            .get(&id)
            .is_some_and(|client| client.sender.send(event).is_ok())
    }

    /// 向所有客户端广播事件，返回成功投递的数量
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        self.clients
            .values()
            .filter(|client| client.sender.send(event.clone()).is_ok())
            .count()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
