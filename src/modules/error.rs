//! Galahad LCD 库的错误类型定义。

use thiserror::Error;

use crate::modules::constants::{USB_PID, USB_VID};

/// 驱动面板时可能发生的错误。
#[derive(Debug, Error)]
pub enum LcdError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("背景图片加载失败 ({path}): {reason}")]
    ImageLoad { path: String, reason: String },

    #[error("未找到设备 (VID={0:04x}, PID={1:04x})")]
    DeviceNotFound(u16, u16),

    #[error("设备接口已被占用")]
    DeviceBusy,

    #[error("分片 {seq} 发送超时（已尝试 {attempts} 次）")]
    TransferTimeout { seq: u32, attempts: usize },

    #[error("编码失败: {0}")]
    Encoder(String),

    #[error("USB 错误: {0}")]
    Usb(String),

    #[error("数据过大: {0} 字节")]
    PayloadTooLarge(usize),

    #[error("报文无效: {0}")]
    InvalidReport(String),

    #[error("已收到退出信号")]
    Interrupted,
}

/// 错误的处理等级。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 启动期错误，进程退出。
    Fatal,
    /// 设备丢失或被占用，需要重新打开。
    Device,
    /// 只跳过当前帧。
    Recoverable,
}

impl LcdError {
    /// 错误分类。
    pub fn class(&self) -> ErrorClass {
        match self {
            LcdError::Config(_) | LcdError::ImageLoad { .. } | LcdError::Interrupted => {
                ErrorClass::Fatal
            }
            LcdError::DeviceNotFound(..) | LcdError::DeviceBusy => ErrorClass::Device,
            LcdError::TransferTimeout { .. }
            | LcdError::Encoder(_)
            | LcdError::Usb(_)
            | LcdError::PayloadTooLarge(_)
            | LcdError::InvalidReport(_) => ErrorClass::Recoverable,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Recoverable
    }
}

impl From<rusb::Error> for LcdError {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::NoDevice | rusb::Error::NotFound => {
                LcdError::DeviceNotFound(USB_VID, USB_PID)
            }
            rusb::Error::Busy => LcdError::DeviceBusy,
            other => LcdError::Usb(other.to_string()),
        }
    }
}
