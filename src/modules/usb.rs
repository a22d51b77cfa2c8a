//! Galahad LCD 库的 USB 底层操作。

use std::time::Duration;

use rusb::{Context, DeviceHandle, UsbContext};

use crate::modules::constants::{
    INTERFACE_CONTROL, KERNEL_DRIVER_INTERFACES, USB_CONFIGURATION, USB_PID, USB_VID,
};
use crate::modules::error::LcdError;
use crate::modules::types::DeviceInfo;

/// 报文写入通道。
///
/// 传输层只依赖这个接口，测试中用内存实现替代真实设备。
pub trait ReportLink {
    /// 写入一个完整报文，返回实际写入的字节数。
    fn write_report(&mut self, report: &[u8], timeout: Duration) -> Result<usize, rusb::Error>;
}

impl<L: ReportLink + ?Sized> ReportLink for &mut L {
    fn write_report(&mut self, report: &[u8], timeout: Duration) -> Result<usize, rusb::Error> {
        (**self).write_report(report, timeout)
    }
}

/// 设备打开方式。
pub trait Connector {
    type Link: ReportLink;

    /// 打开设备并独占接口。
    fn connect(&mut self) -> Result<Self::Link, LcdError>;
}

/// 已打开并声明接口的面板。drop 时释放接口并恢复内核驱动。
pub struct UsbPanel {
    /// 设备句柄。
    handle: DeviceHandle<Context>,
    /// 已声明的接口。
    interface: u8,
    /// 发送端点地址。
    write_endpoint: u8,
    /// 发送端点的传输类型。
    transfer_type: rusb::TransferType,
    /// 打开时分离过内核驱动的接口。
    detached: Vec<u8>,
}

impl ReportLink for UsbPanel {
    fn write_report(&mut self, report: &[u8], timeout: Duration) -> Result<usize, rusb::Error> {
        let written = match self.transfer_type {
            rusb::TransferType::Interrupt => {
                self.handle.write_interrupt(self.write_endpoint, report, timeout)?
            }
            _ => self.handle.write_bulk(self.write_endpoint, report, timeout)?,
        };
        log::trace!("USB transmit: {} of {} bytes", written, report.len());
        Ok(written)
    }
}

impl Drop for UsbPanel {
    fn drop(&mut self) {
        log::info!("Releasing interface {}...", self.interface);
        if let Err(e) = self.handle.release_interface(self.interface) {
            log::warn!("Failed to release interface {}: {}", self.interface, e);
        }
        reattach_kernel_drivers(&mut self.handle, &self.detached);
        if let Err(e) = self.handle.reset() {
            log::debug!("Device reset after release failed: {}", e);
        }
    }
}

/// 按 VID/PID 打开面板。
#[derive(Debug, Clone)]
pub struct UsbConnector {
    pub vid: u16,
    pub pid: u16,
    pub interface: u8,
}

impl Default for UsbConnector {
    fn default() -> Self {
        Self { vid: USB_VID, pid: USB_PID, interface: INTERFACE_CONTROL }
    }
}

impl Connector for UsbConnector {
    type Link = UsbPanel;

    fn connect(&mut self) -> Result<UsbPanel, LcdError> {
        open_panel(self.vid, self.pid, self.interface)
    }
}

/// 扫描所有 USB 设备。
pub fn scan_devices() -> Vec<DeviceInfo> {
    log::info!("Scanning USB devices...");
    let context = match rusb::Context::new() {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to create USB context: {}", e);
            return Vec::new();
        }
    };

    let mut devices = Vec::new();
    match context.devices() {
        Ok(dev_list) => {
            for device in dev_list.iter() {
                if let Ok(desc) = device.device_descriptor() {
                    devices.push(DeviceInfo {
                        vid: desc.vendor_id(),
                        pid: desc.product_id(),
                        info: format!("{:04x}:{:04x}", desc.vendor_id(), desc.product_id()),
                    });
                }
            }
        }
        Err(e) => log::error!("Failed to get device list: {}", e),
    }

    log::info!("Found {} USB devices", devices.len());
    devices
}

/// 打开面板设备并声明接口。
///
/// 设备不存在时返回 `DeviceNotFound`，接口被占用时返回 `DeviceBusy`。
/// 失败时已分离的内核驱动会被重新挂载，句柄随之关闭。
pub fn open_panel(vid: u16, pid: u16, interface: u8) -> Result<UsbPanel, LcdError> {
    log::info!("Opening panel (VID={:04x}, PID={:04x})...", vid, pid);

    let context =
        rusb::Context::new().map_err(|e| LcdError::Usb(format!("创建上下文失败: {}", e)))?;
    let device = context
        .devices()
        .map_err(|e| LcdError::Usb(format!("获取设备失败: {}", e)))?
        .iter()
        .find(|device| {
            device
                .device_descriptor()
                .map(|desc| desc.vendor_id() == vid && desc.product_id() == pid)
                .unwrap_or(false)
        })
        .ok_or(LcdError::DeviceNotFound(vid, pid))?;

    log::info!("Found matching device, attempting to open...");
    let mut handle = device.open().map_err(|e| {
        log::error!("Failed to open device: {}", e);
        match e {
            rusb::Error::Busy => LcdError::DeviceBusy,
            rusb::Error::NoDevice => LcdError::DeviceNotFound(vid, pid),
            other => LcdError::Usb(format!("打开设备失败: {}", other)),
        }
    })?;

    // 如果有内核驱动附着，先分离
    let mut detached = Vec::new();
    for iface in KERNEL_DRIVER_INTERFACES {
        if let Ok(true) = handle.kernel_driver_active(iface) {
            log::info!("Detaching kernel driver from interface {}...", iface);
            match handle.detach_kernel_driver(iface) {
                Ok(()) => detached.push(iface),
                Err(e) => {
                    log::warn!("Failed to detach kernel driver from interface {}: {}", iface, e)
                }
            }
        }
    }

    match claim(&device, &mut handle, interface) {
        Ok((write_endpoint, transfer_type)) => {
            log::info!(
                "Panel opened: interface {}, OUT=0x{:02x} ({:?})",
                interface,
                write_endpoint,
                transfer_type
            );
            Ok(UsbPanel { handle, interface, write_endpoint, transfer_type, detached })
        }
        Err(e) => {
            log::error!("Failed to claim panel interface: {}", e);
            reattach_kernel_drivers(&mut handle, &detached);
            Err(e)
        }
    }
}

/// 选择配置、声明接口并查找发送端点。
fn claim(
    device: &rusb::Device<Context>,
    handle: &mut DeviceHandle<Context>,
    interface: u8,
) -> Result<(u8, rusb::TransferType), LcdError> {
    match handle.active_configuration() {
        Ok(current) if current == USB_CONFIGURATION => {}
        _ => {
            if let Err(e) = handle.set_active_configuration(USB_CONFIGURATION) {
                if e == rusb::Error::Busy {
                    return Err(LcdError::DeviceBusy);
                }
                log::warn!("Failed to set configuration {}: {}", USB_CONFIGURATION, e);
            }
        }
    }

    handle.claim_interface(interface).map_err(LcdError::from)?;

    match find_out_endpoint(device, interface) {
        Some(endpoint) => Ok(endpoint),
        None => {
            let _ = handle.release_interface(interface);
            Err(LcdError::Usb(format!("接口 {} 上没有 OUT 端点", interface)))
        }
    }
}

fn find_out_endpoint(
    device: &rusb::Device<Context>,
    interface: u8,
) -> Option<(u8, rusb::TransferType)> {
    let config = device.active_config_descriptor().ok()?;
    for iface in config.interfaces() {
        if iface.number() != interface {
            continue;
        }
        for descriptor in iface.descriptors() {
            for endpoint in descriptor.endpoint_descriptors() {
                log::debug!(
                    "  Endpoint 0x{:02x}: dir={:?}, type={:?}",
                    endpoint.address(),
                    endpoint.direction(),
                    endpoint.transfer_type()
                );
                if endpoint.direction() == rusb::Direction::Out {
                    return Some((endpoint.address(), endpoint.transfer_type()));
                }
            }
        }
    }
    None
}

fn reattach_kernel_drivers(handle: &mut DeviceHandle<Context>, interfaces: &[u8]) {
    for &iface in interfaces {
        if let Err(e) = handle.attach_kernel_driver(iface) {
            log::warn!("Failed to re-attach kernel driver to interface {}: {}", iface, e);
        }
    }
}
