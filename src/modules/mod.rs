//! Galahad LCD 库的模块声明。

// 常量
pub mod constants;

// 错误类型
pub mod error;

// 公共类型
pub mod types;

// 报文格式
pub mod protocol;

// USB 底层操作
pub mod usb;

// 帧传输
pub mod transport;

// 帧缓冲区与画面合成
pub mod frame;

// 文字渲染
pub mod font;

// 系统指标
pub mod metrics;

// 帧编码
pub mod encoder;

// 预设画面
pub mod preset;

// 主循环
pub mod orchestrator;

// 配置文件
pub mod config;
