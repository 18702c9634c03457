//! 串口自动发现
//!
//! 只负责"选哪个口"，不做任何进程级决策：找不到设备时返回
//! [`SerialError::DeviceUnavailable`]，由启动流程决定是否退出。

use crate::SerialError;
use serialport::SerialPortType;
use tracing::{info, warn};

/// 优先匹配的制造商名称片段
pub const PREFERRED_MANUFACTURER: &str = "Arduino";

/// 枚举系统串口并选择设备
///
/// 规则：
/// 1. 制造商包含 [`PREFERRED_MANUFACTURER`] 的 USB 串口优先
/// 2. 否则使用第一个可用串口（记录警告）
/// 3. 没有任何串口时返回 `DeviceUnavailable`
pub fn discover_port() -> Result<String, SerialError> {
    let ports = serialport::available_ports()?;

    let candidates = ports.iter().map(|port| {
        let manufacturer = match &port.port_type {
            SerialPortType::UsbPort(usb) => usb.manufacturer.as_deref(),
            _ => None,
        };
        (port.port_name.as_str(), manufacturer)
    });

    pick_port(candidates)
}

/// 从 `(路径, 制造商)` 候选列表中选择串口
pub fn pick_port<'a, I>(candidates: I) -> Result<String, SerialError>
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let candidates: Vec<_> = candidates.into_iter().collect();

    let Some(&(first, _)) = candidates.first() else {
        return Err(SerialError::DeviceUnavailable(
            "no serial ports found".to_string(),
        ));
    };

    if let Some(&(path, _)) = candidates
        .iter()
        .find(|(_, manufacturer)| manufacturer.is_some_and(|m| m.contains(PREFERRED_MANUFACTURER)))
    {
        info!("Device found at {}", path);
        return Ok(path.to_string());
    }

    warn!(
        "No {} port identified, falling back to first available port: {}",
        PREFERRED_MANUFACTURER, first
    );
    Ok(first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_preferred_manufacturer() {
        let ports = [
            ("/dev/ttyS0", None),
            ("/dev/ttyUSB0", Some("FTDI")),
            ("/dev/ttyACM0", Some("Arduino (www.arduino.cc)")),
        ];
        assert_eq!(pick_port(ports).unwrap(), "/dev/ttyACM0");
    }

    #[test]
    fn test_pick_falls_back_to_first() {
        let ports = [("/dev/ttyS0", None), ("/dev/ttyUSB0", Some("FTDI"))];
        assert_eq!(pick_port(ports).unwrap(), "/dev/ttyS0");
    }

    #[test]
    fn test_pick_no_ports() {
        let ports: [(&str, Option<&str>); 0] = [];
        match pick_port(ports) {
            Err(SerialError::DeviceUnavailable(_)) => {},
            other => panic!("Expected DeviceUnavailable, got {:?}", other),
        }
    }
}
