//! Galahad LCD 库的常量定义。

use std::time::Duration;

/// Galahad II LCD 的 USB 厂商 ID。
pub const USB_VID: u16 = 0x0416;

/// Galahad II LCD 的 USB 产品 ID。
pub const USB_PID: u16 = 0x7395;

/// 视频数据所在的控制接口。
pub const INTERFACE_CONTROL: u8 = 1;

/// 打开设备前需要分离内核驱动的接口。
pub const KERNEL_DRIVER_INTERFACES: [u8; 3] = [0, 1, 2];

/// 设备使用的 USB 配置编号。
pub const USB_CONFIGURATION: u8 = 1;

/// 屏幕尺寸。
pub const FRAME_WIDTH: u32 = 480;
pub const FRAME_HEIGHT: u32 = 480;
pub const FRAME_SIZE: usize = (FRAME_WIDTH * FRAME_HEIGHT * 3) as usize;

/// 视频报文大小（字节）。
pub const REPORT_SIZE: usize = 1024;

/// 视频报文头长度。
pub const REPORT_HEADER_SIZE: usize = 11;

/// 每个分片的有效载荷长度。
pub const CHUNK_SIZE: usize = REPORT_SIZE - REPORT_HEADER_SIZE;

/// 视频通道的报文 ID。
pub const REPORT_ID_VIDEO: u8 = 0x02;

/// 水泵灯光报文大小。
pub const PUMP_REPORT_SIZE: usize = 64;

/// 单个报文的写超时。
pub const TRANSFER_TIMEOUT: Duration = Duration::from_millis(2000);

/// 分片超时后的重试次数。
pub const CHUNK_RETRIES: usize = 3;

/// 相邻报文之间的间隔。
pub const PACKET_GAP: Duration = Duration::from_millis(1);

/// 重试之间的等待。
pub const RETRY_DELAY: Duration = Duration::from_millis(10);

/// 设备重新打开的次数与初始退避。
pub const REOPEN_ATTEMPTS: u32 = 3;
pub const REOPEN_BACKOFF: Duration = Duration::from_millis(500);

/// 默认刷新率。
pub const DEFAULT_FPS: f64 = 5.0;

/// 默认叠加层背板不透明度。
pub const DEFAULT_OVERLAY_OPACITY: u8 = 180;

/// 温度传感器名称（与系统相关）。
pub const TEMP_SENSORS: [&str; 2] = ["coretemp", "k10temp"];
