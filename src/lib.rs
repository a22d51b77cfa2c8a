//! Lian Li Galahad II 水冷 LCD（USB `0416:7395`）的驱动库。
//!
//! 每个周期在背景图上绘制时间、日期与 CPU 指标，交给外部编码器压缩成单帧 H.264，
//! 再按面板的分片协议通过 USB 发送。
//!
//! ```rust,ignore
//! use std::sync::atomic::AtomicBool;
//! use galahad_lcd::{
//!     CommandEncoder, DeviceTransport, FrameComposer, LoopOptions, Orchestrator, OverlaySpec,
//!     SystemMetrics, TransportConfig, UsbConnector,
//! };
//!
//! let composer = FrameComposer::from_spec(OverlaySpec::default(), None)?;
//! let mut orchestrator = Orchestrator::new(
//!     UsbConnector::default(),
//!     DeviceTransport::new(TransportConfig::default()),
//!     Box::new(composer),
//!     Box::new(CommandEncoder::default()),
//!     Box::new(SystemMetrics::new()),
//!     LoopOptions::from_fps(5.0),
//! );
//! orchestrator.run(&AtomicBool::new(false))?;
//! ```

pub mod modules;

pub use modules::config::{AppConfig, Settings};
pub use modules::encoder::{CommandEncoder, EncodedStream, Encoder};
pub use modules::error::{ErrorClass, LcdError};
pub use modules::font::Typeface;
pub use modules::frame::{compose, Background, Frame, FrameComposer, FrameSource};
pub use modules::metrics::{MetricsSnapshot, MetricsSource, SystemMetrics};
pub use modules::orchestrator::{
    open_with_backoff, LoopOptions, Orchestrator, RunContext, TickOutcome,
};
pub use modules::preset::{MatrixRain, Preset};
pub use modules::protocol::{Command, DisplayMode};
pub use modules::transport::{DeviceTransport, SendReport, TransferState, TransportConfig};
pub use modules::types::{Color, DeviceInfo, FontRef, OverlayFields, OverlaySpec, ResizeMode};
pub use modules::usb::{scan_devices, Connector, ReportLink, UsbConnector, UsbPanel};
