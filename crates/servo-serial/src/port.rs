//! 基于 `serialport` 的真实串口适配器

use crate::{RxAdapter, SerialError, SplittableAdapter, TxAdapter};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 串口适配器（打开后通过 [`SplittableAdapter::split`] 拆分为收发两端）
pub struct SerialPortAdapter {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialPortAdapter {
    /// 打开串口（8N1，无流控）
    ///
    /// # 参数
    /// - `path`: 设备路径（如 `/dev/ttyACM0`、`COM3`）
    /// - `baud_rate`: 波特率（设备固件默认 9600）
    /// - `read_timeout`: 读超时，决定 RX 线程检查退出标志的周期
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, SerialError> {
        let port = serialport::new(path, baud_rate)
            .timeout(read_timeout)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open()?;

        info!("Serial port opened: {} @ {} bps", path, baud_rate);
        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    /// 设备路径
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl SplittableAdapter for SerialPortAdapter {
    type RxAdapter = SerialRx;
    type TxAdapter = SerialTx;

    fn split(self) -> Result<(SerialRx, SerialTx), SerialError> {
        let reader = self.port.try_clone()?;
        Ok((
            SerialRx {
                port: reader,
                lines: LineBuffer::default(),
                chunk: [0u8; 256],
            },
            SerialTx { port: self.port },
        ))
    }
}

/// 串口接收端（按 `\n` 分帧）
pub struct SerialRx {
    port: Box<dyn SerialPort>,
    lines: LineBuffer,
    chunk: [u8; 256],
}

impl RxAdapter for SerialRx {
    fn receive(&mut self) -> Result<String, SerialError> {
        loop {
            if let Some(line) = self.lines.next_line() {
                return Ok(line);
            }

            match self.port.read(&mut self.chunk) {
                Ok(0) => return Err(SerialError::Disconnected),
                Ok(n) => self.lines.push(&self.chunk[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Err(SerialError::Timeout),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// 串口发送端
///
/// 写入没有超时：设备卡住时写入会一直重试（调用方会被阻塞）。
pub struct SerialTx {
    port: Box<dyn SerialPort>,
}

impl TxAdapter for SerialTx {
    fn send(&mut self, command: &str) -> Result<(), SerialError> {
        let mut remaining = command.as_bytes();
        while !remaining.is_empty() {
            match self.port.write(remaining) {
                Ok(0) => return Err(SerialError::Disconnected),
                Ok(n) => remaining = &remaining[n..],
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock
                    ) =>
                {
                    debug!("Serial write stalled ({}), retrying", e.kind());
                },
                Err(e) => return Err(e.into()),
            }
        }

        match self.port.flush() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 未换行数据的最大长度，超过后丢弃
pub const MAX_LINE_LEN: usize = 1024;

/// 行缓冲：累积字节流，按 `\n` 切出完整行
///
/// 半行数据会一直保留，直到后续字节补齐换行符。`\r\n` 行尾中的 `\r` 被去除。
/// 未换行部分超过 [`MAX_LINE_LEN`] 时整段丢弃。
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);

        let tail_start = self
            .pending
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);
        let tail_len = self.pending.len() - tail_start;
        if tail_len > MAX_LINE_LEN {
            warn!("Discarding {} bytes of unterminated serial input", tail_len);
            self.pending.truncate(tail_start);
        }
    }

    pub(crate) fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_simple() {
        let mut buf = LineBuffer::default();
        buf.push(b"SEQUENCE_START\nSEQUENCE,1,30,5\n");
        assert_eq!(buf.next_line().as_deref(), Some("SEQUENCE_START"));
        assert_eq!(buf.next_line().as_deref(), Some("SEQUENCE,1,30,5"));
        assert_eq!(buf.next_line(), None);
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut buf = LineBuffer::default();
        buf.push(b"SEQU");
        assert_eq!(buf.next_line(), None);
        buf.push(b"ENCE_END\r\n");
        assert_eq!(buf.next_line().as_deref(), Some("SEQUENCE_END"));
    }

    #[test]
    fn test_crlf_and_empty_lines() {
        let mut buf = LineBuffer::default();
        buf.push(b"\r\n\nready\r\n");
        assert_eq!(buf.next_line().as_deref(), Some(""));
        assert_eq!(buf.next_line().as_deref(), Some(""));
        assert_eq!(buf.next_line().as_deref(), Some("ready"));
    }

    #[test]
    fn test_unterminated_input_discarded() {
        let mut buf = LineBuffer::default();
        buf.push(b"SEQUENCE_END\n");
        for _ in 0..(MAX_LINE_LEN / 64 + 1) {
            buf.push(&[b'x'; 64]);
        }

        // 完整行保留，超长的半行被丢弃
        assert!(buf.pending.len() <= "SEQUENCE_END\n".len() + MAX_LINE_LEN);
        assert_eq!(buf.next_line().as_deref(), Some("SEQUENCE_END"));
        assert_eq!(buf.next_line(), None);

        buf.push(b"ready\n");
        assert_eq!(buf.next_line().as_deref(), Some("ready"));
    }
}
