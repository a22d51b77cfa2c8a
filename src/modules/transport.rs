//! Galahad LCD 库的帧传输。
//!
//! 一帧数据按 `帧开始 → 分片 0..n-1 → 帧结束` 的顺序发送。任一报文失败都会放弃整帧，
//! 状态回到 `Idle`，不会从中途续传。

use std::thread;
use std::time::Duration;

use crate::modules::constants::{CHUNK_RETRIES, PACKET_GAP, RETRY_DELAY, TRANSFER_TIMEOUT};
use crate::modules::encoder::EncodedStream;
use crate::modules::error::LcdError;
use crate::modules::protocol::{self, Command, DisplayMode};
use crate::modules::types::Color;
use crate::modules::usb::ReportLink;

/// 传输参数。
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// 单个报文的写超时。
    pub timeout: Duration,
    /// 超时后对同一报文的重试次数。
    pub retries: usize,
    /// 相邻报文之间的间隔。
    pub packet_gap: Duration,
    /// 重试前的等待。
    pub retry_delay: Duration,
    /// 是否发送帧开始 / 帧结束报文。
    pub frame_markers: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: TRANSFER_TIMEOUT,
            retries: CHUNK_RETRIES,
            packet_gap: PACKET_GAP,
            retry_delay: RETRY_DELAY,
            frame_markers: true,
        }
    }
}

/// 传输状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Idle,
    SendingStart,
    SendingChunks { index: u32, total: u32 },
    SendingEnd,
}

/// 一次成功发送的统计。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendReport {
    /// 发送的分片数。
    pub chunks: u32,
    /// 写入的报文总数（含帧标记）。
    pub reports: u32,
    /// 因超时产生的重试次数。
    pub retries: u32,
}

/// 把编码后的数据按协议写入设备。
#[derive(Debug, Default)]
pub struct DeviceTransport {
    config: TransportConfig,
    state: TransferState,
}

impl DeviceTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config, state: TransferState::Idle }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// 当前状态。发送结束（无论成败）后总是 `Idle`。
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// 发送一帧编码数据。
    pub fn send<L: ReportLink>(
        &mut self,
        link: &mut L,
        stream: &EncodedStream,
    ) -> Result<SendReport, LcdError> {
        let result = self.send_frame(link, stream.as_bytes());
        self.state = TransferState::Idle;
        if let Err(e) = &result {
            log::debug!("Frame transfer aborted: {}", e);
        }
        result
    }

    /// 设置屏幕亮度（0-100）。
    pub fn set_brightness<L: ReportLink>(
        &mut self,
        link: &mut L,
        percent: u8,
    ) -> Result<SendReport, LcdError> {
        let level = percent.min(100);
        log::info!("Setting brightness to {}%", level);
        self.send_command(link, Command::SetBrightness, &[level])
    }

    /// 切换屏幕模式。
    pub fn set_mode<L: ReportLink>(
        &mut self,
        link: &mut L,
        mode: DisplayMode,
    ) -> Result<SendReport, LcdError> {
        log::info!("Setting display mode to {:?}", mode);
        self.send_command(link, Command::SetMode, &[mode as u8])
    }

    /// 设置水泵 RGB 灯光。
    pub fn set_pump_color<L: ReportLink>(
        &mut self,
        link: &mut L,
        color: Color,
    ) -> Result<(), LcdError> {
        let (r, g, b) = color.rgb();
        log::info!("Setting pump color to ({}, {}, {})", r, g, b);
        let report = protocol::pump_color_report(color);
        self.write_with_retry(link, &report, 0).map(|_| ())
    }

    /// 单分片命令，与帧数据使用相同的开始 / 载荷 / 结束格式。
    pub fn send_command<L: ReportLink>(
        &mut self,
        link: &mut L,
        command: Command,
        params: &[u8],
    ) -> Result<SendReport, LcdError> {
        let result = self.send_framed(link, command, params);
        self.state = TransferState::Idle;
        result
    }

    fn send_frame<L: ReportLink>(
        &mut self,
        link: &mut L,
        data: &[u8],
    ) -> Result<SendReport, LcdError> {
        let total_len =
            u32::try_from(data.len()).map_err(|_| LcdError::PayloadTooLarge(data.len()))?;
        let total = protocol::chunk_count(data.len());
        if total > protocol::MAX_SEQUENCE as usize {
            return Err(LcdError::PayloadTooLarge(data.len()));
        }
        let total = total as u32;
        let mut report = SendReport::default();

        if self.config.frame_markers {
            self.state = TransferState::SendingStart;
            let start = protocol::marker_report(Command::FrameStart, total_len, 0)?;
            report.retries += self.write_with_retry(link, &start, 0)?;
            report.reports += 1;
        }

        for chunk in protocol::chunks(data) {
            self.state = TransferState::SendingChunks { index: chunk.seq, total };
            let packet = protocol::chunk_report(total_len, &chunk)?;
            report.retries += self.write_with_retry(link, &packet, chunk.seq)?;
            report.reports += 1;
            report.chunks += 1;
        }

        if self.config.frame_markers {
            self.state = TransferState::SendingEnd;
            let end = protocol::marker_report(Command::FrameEnd, total_len, total)?;
            report.retries += self.write_with_retry(link, &end, total)?;
            report.reports += 1;
        }

        log::debug!(
            "Frame sent: {} bytes in {} chunks ({} retries)",
            total_len,
            report.chunks,
            report.retries
        );
        Ok(report)
    }

    fn send_framed<L: ReportLink>(
        &mut self,
        link: &mut L,
        command: Command,
        params: &[u8],
    ) -> Result<SendReport, LcdError> {
        let total_len = params.len() as u32;
        let mut report = SendReport::default();

        if self.config.frame_markers {
            self.state = TransferState::SendingStart;
            let start = protocol::marker_report(Command::FrameStart, total_len, 0)?;
            report.retries += self.write_with_retry(link, &start, 0)?;
            report.reports += 1;
        }

        self.state = TransferState::SendingChunks { index: 0, total: 1 };
        let header = protocol::ReportHeader {
            command,
            total_len,
            seq: 0,
            payload_len: params.len() as u16,
        };
        let packet = protocol::encode_report(&header, params)?;
        report.retries += self.write_with_retry(link, &packet, 0)?;
        report.reports += 1;
        report.chunks += 1;

        if self.config.frame_markers {
            self.state = TransferState::SendingEnd;
            let end = protocol::marker_report(Command::FrameEnd, total_len, 1)?;
            report.retries += self.write_with_retry(link, &end, 1)?;
            report.reports += 1;
        }

        Ok(report)
    }

    /// 带重试的写入，返回重试次数。只有超时和短写会重试，其它错误立即返回。
    fn write_with_retry<L: ReportLink>(
        &self,
        link: &mut L,
        report: &[u8],
        seq: u32,
    ) -> Result<u32, LcdError> {
        let attempts = self.config.retries + 1;
        for attempt in 1..=attempts {
            match link.write_report(report, self.config.timeout) {
                Ok(written) if written == report.len() => {
                    if !self.config.packet_gap.is_zero() {
                        thread::sleep(self.config.packet_gap);
                    }
                    return Ok((attempt - 1) as u32);
                }
                Ok(written) => {
                    log::warn!(
                        "Report {} incomplete: {} of {} bytes ({}/{})",
                        seq,
                        written,
                        report.len(),
                        attempt,
                        attempts
                    );
                }
                Err(rusb::Error::Timeout) => {
                    log::warn!("Report {} timed out ({}/{})", seq, attempt, attempts);
                }
                Err(e) => return Err(LcdError::from(e)),
            }
            if attempt < attempts && !self.config.retry_delay.is_zero() {
                thread::sleep(self.config.retry_delay);
            }
        }
        log::error!("Report {} exceeded max retries", seq);
        Err(LcdError::TransferTimeout { seq, attempts })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::modules::constants::{CHUNK_SIZE, REPORT_SIZE};
    use crate::modules::protocol::{decode_report, ReportHeader};

    /// 记录所有写入的内存设备，可按写入序号注入错误。
    #[derive(Debug, Default)]
    pub(crate) struct RecordingLink {
        pub reports: Vec<Vec<u8>>,
        pub attempts: usize,
        pub failures: Vec<(usize, rusb::Error)>,
        pub short_writes: Vec<usize>,
    }

    impl ReportLink for RecordingLink {
        fn write_report(
            &mut self,
            report: &[u8],
            _timeout: Duration,
        ) -> Result<usize, rusb::Error> {
            let attempt = self.attempts;
            self.attempts += 1;
            if let Some(pos) = self.failures.iter().position(|(at, _)| *at == attempt) {
                return Err(self.failures.remove(pos).1);
            }
            if self.short_writes.contains(&attempt) {
                return Ok(report.len() / 2);
            }
            self.reports.push(report.to_vec());
            Ok(report.len())
        }
    }

    pub(crate) fn quick_config() -> TransportConfig {
        TransportConfig {
            packet_gap: Duration::ZERO,
            retry_delay: Duration::ZERO,
            ..TransportConfig::default()
        }
    }

    fn headers(link: &RecordingLink) -> Vec<ReportHeader> {
        link.reports.iter().map(|r| decode_report(r).unwrap().0).collect()
    }

    fn stream(len: usize) -> EncodedStream {
        EncodedStream::new((0..len).map(|i| (i * 7 % 256) as u8).collect())
    }

    #[test]
    fn frame_is_framed_by_start_and_end() {
        let mut link = RecordingLink::default();
        let mut transport = DeviceTransport::new(quick_config());
        let report = transport.send(&mut link, &stream(2500)).unwrap();

        assert_eq!(report, SendReport { chunks: 3, reports: 5, retries: 0 });
        let commands: Vec<Command> = headers(&link).iter().map(|h| h.command).collect();
        assert_eq!(
            commands,
            vec![
                Command::FrameStart,
                Command::FrameChunk,
                Command::FrameChunk,
                Command::FrameChunk,
                Command::FrameEnd
            ]
        );
        let end = headers(&link)[4];
        assert_eq!((end.total_len, end.seq, end.payload_len), (2500, 3, 0));
        assert!(link.reports.iter().all(|r| r.len() == REPORT_SIZE));
        assert_eq!(transport.state(), TransferState::Idle);
    }

    #[test]
    fn chunks_reconstruct_stream() {
        for len in [1usize, CHUNK_SIZE, CHUNK_SIZE + 1, 10_000] {
            let data = stream(len);
            let mut link = RecordingLink::default();
            let mut transport = DeviceTransport::new(quick_config());
            transport.send(&mut link, &data).unwrap();

            let mut seqs = Vec::new();
            let mut rebuilt = Vec::new();
            for r in &link.reports {
                let (header, payload) = decode_report(r).unwrap();
                if header.command == Command::FrameChunk {
                    seqs.push(header.seq);
                    rebuilt.extend_from_slice(payload);
                }
            }
            assert_eq!(seqs, (0..len.div_ceil(CHUNK_SIZE) as u32).collect::<Vec<_>>());
            assert_eq!(rebuilt, data.as_bytes());
        }
    }

    #[test]
    fn markers_can_be_disabled() {
        let mut link = RecordingLink::default();
        let mut transport =
            DeviceTransport::new(TransportConfig { frame_markers: false, ..quick_config() });
        transport.send(&mut link, &stream(100)).unwrap();
        assert_eq!(link.reports.len(), 1);
        assert_eq!(&link.reports[0][..2], &[0x02, 0x0D]);
    }

    #[test]
    fn single_timeout_is_retried_transparently() {
        let data = stream(3000);

        let mut clean = RecordingLink::default();
        DeviceTransport::new(quick_config()).send(&mut clean, &data).unwrap();

        let mut flaky =
            RecordingLink { failures: vec![(2, rusb::Error::Timeout)], ..Default::default() };
        let mut transport = DeviceTransport::new(quick_config());
        let report = transport.send(&mut flaky, &data).unwrap();

        assert_eq!(report.retries, 1);
        assert_eq!(flaky.reports, clean.reports);
        assert_eq!(transport.state(), TransferState::Idle);
    }

    #[test]
    fn short_write_is_retried() {
        let mut link = RecordingLink { short_writes: vec![1], ..Default::default() };
        let mut transport = DeviceTransport::new(quick_config());
        let report = transport.send(&mut link, &stream(50)).unwrap();
        assert_eq!(report.retries, 1);
        assert_eq!(link.reports.len(), 3);
    }

    #[test]
    fn exhausted_retries_abort_whole_frame() {
        let failures = (1..=4).map(|i| (i, rusb::Error::Timeout)).collect();
        let mut link = RecordingLink { failures, ..Default::default() };
        let mut transport = DeviceTransport::new(quick_config());

        let err = transport.send(&mut link, &stream(5000)).unwrap_err();
        assert!(matches!(err, LcdError::TransferTimeout { seq: 0, attempts: 4 }));
        // 只有帧开始报文被写入，没有后续分片
        assert_eq!(link.reports.len(), 1);
        assert_eq!(transport.state(), TransferState::Idle);

        // 下一帧从头开始
        let before = link.reports.len();
        transport.send(&mut link, &stream(10)).unwrap();
        let fresh: Vec<u32> = link.reports[before..]
            .iter()
            .map(|r| decode_report(r).unwrap().0.seq)
            .collect();
        assert_eq!(fresh, vec![0, 0, 1]);
    }

    #[test]
    fn lost_device_is_not_retried() {
        let mut link =
            RecordingLink { failures: vec![(1, rusb::Error::NoDevice)], ..Default::default() };
        let mut transport = DeviceTransport::new(quick_config());
        let err = transport.send(&mut link, &stream(10)).unwrap_err();
        assert!(matches!(err, LcdError::DeviceNotFound(..)));
        assert_eq!(link.attempts, 2);
        assert_eq!(transport.state(), TransferState::Idle);
    }

    #[test]
    fn brightness_uses_single_chunk_framing() {
        let mut link = RecordingLink::default();
        let mut transport = DeviceTransport::new(quick_config());
        let report = transport.set_brightness(&mut link, 150).unwrap();
        assert_eq!(report.chunks, 1);

        let decoded: Vec<(ReportHeader, Vec<u8>)> = link
            .reports
            .iter()
            .map(|r| {
                let (h, p) = decode_report(r).unwrap();
                (h, p.to_vec())
            })
            .collect();
        assert_eq!(decoded[0].0.command, Command::FrameStart);
        assert_eq!(decoded[1].0.command, Command::SetBrightness);
        assert_eq!(decoded[1].1, vec![100]);
        assert_eq!(decoded[2].0.command, Command::FrameEnd);
    }

    #[test]
    fn mode_command_carries_mode_byte() {
        let mut link = RecordingLink::default();
        let mut transport =
            DeviceTransport::new(TransportConfig { frame_markers: false, ..quick_config() });
        transport.set_mode(&mut link, DisplayMode::Video).unwrap();
        assert_eq!(link.reports.len(), 1);
        let (header, payload) = decode_report(&link.reports[0]).unwrap();
        assert_eq!(header.command, Command::SetMode);
        assert_eq!(payload, &[0x01]);
    }

    #[test]
    fn pump_color_is_one_short_report() {
        let mut link = RecordingLink::default();
        let mut transport = DeviceTransport::new(quick_config());
        transport.set_pump_color(&mut link, Color::Red).unwrap();
        assert_eq!(link.reports.len(), 1);
        assert_eq!(link.reports[0].len(), 64);
        assert_eq!(&link.reports[0][10..13], &[255, 0, 0]);
    }
}
