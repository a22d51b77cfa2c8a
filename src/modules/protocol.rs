//! Galahad LCD 库的报文格式。
//!
//! 视频通道报文固定 1024 字节：
//!
//! ```text
//! [0]      报文 ID 0x02
//! [1]      命令字节
//! [2..6]   数据总长度（大端）
//! [6..9]   序号（24 位大端）
//! [9..11]  本报文载荷长度（大端）
//! [11..]   载荷，不足部分补零
//! ```

use crate::modules::constants::{
    CHUNK_SIZE, PUMP_REPORT_SIZE, REPORT_HEADER_SIZE, REPORT_ID_VIDEO, REPORT_SIZE,
};
use crate::modules::error::LcdError;
use crate::modules::types::Color;

/// 序号字段的最大值（24 位）。
pub const MAX_SEQUENCE: u32 = 0x00FF_FFFF;

/// 视频通道命令。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    SetBrightness = 0x0A,
    SetMode = 0x0B,
    FrameStart = 0x0C,
    FrameChunk = 0x0D,
    FrameEnd = 0x0E,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x0A => Some(Command::SetBrightness),
            0x0B => Some(Command::SetMode),
            0x0C => Some(Command::FrameStart),
            0x0D => Some(Command::FrameChunk),
            0x0E => Some(Command::FrameEnd),
            _ => None,
        }
    }
}

/// 屏幕工作模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisplayMode {
    Standby = 0x00,
    Video = 0x01,
}

/// 编码后数据的一个分片。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub seq: u32,
    pub payload: &'a [u8],
}

/// 按协议分片大小切分数据流。
pub fn chunks(data: &[u8]) -> impl ExactSizeIterator<Item = Chunk<'_>> {
    data.chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(i, payload)| Chunk { seq: i as u32, payload })
}

/// 分片数量，即 `ceil(len / CHUNK_SIZE)`。
pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(CHUNK_SIZE)
}

/// 报文头。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportHeader {
    pub command: Command,
    pub total_len: u32,
    pub seq: u32,
    pub payload_len: u16,
}

/// 组装一个视频通道报文。
pub fn encode_report(header: &ReportHeader, payload: &[u8]) -> Result<[u8; REPORT_SIZE], LcdError> {
    if payload.len() > CHUNK_SIZE {
        return Err(LcdError::PayloadTooLarge(payload.len()));
    }
    if payload.len() != header.payload_len as usize {
        return Err(LcdError::InvalidReport(format!(
            "载荷 {} 字节，报文头声明 {} 字节",
            payload.len(),
            header.payload_len
        )));
    }
    if header.seq > MAX_SEQUENCE {
        return Err(LcdError::InvalidReport(format!("序号 {} 超出 24 位范围", header.seq)));
    }

    let mut report = [0u8; REPORT_SIZE];
    report[0] = REPORT_ID_VIDEO;
    report[1] = header.command as u8;
    report[2..6].copy_from_slice(&header.total_len.to_be_bytes());
    report[6..9].copy_from_slice(&header.seq.to_be_bytes()[1..]);
    report[9..11].copy_from_slice(&header.payload_len.to_be_bytes());
    report[REPORT_HEADER_SIZE..REPORT_HEADER_SIZE + payload.len()].copy_from_slice(payload);
    Ok(report)
}

/// 组装数据分片报文。
pub fn chunk_report(total_len: u32, chunk: &Chunk<'_>) -> Result<[u8; REPORT_SIZE], LcdError> {
    let header = ReportHeader {
        command: Command::FrameChunk,
        total_len,
        seq: chunk.seq,
        payload_len: chunk.payload.len() as u16,
    };
    encode_report(&header, chunk.payload)
}

/// 组装不带载荷的控制报文（帧开始 / 帧结束）。
pub fn marker_report(
    command: Command,
    total_len: u32,
    seq: u32,
) -> Result<[u8; REPORT_SIZE], LcdError> {
    let header = ReportHeader { command, total_len, seq, payload_len: 0 };
    encode_report(&header, &[])
}

/// 解析视频通道报文，返回报文头与载荷。
pub fn decode_report(report: &[u8]) -> Option<(ReportHeader, &[u8])> {
    if report.len() != REPORT_SIZE || report[0] != REPORT_ID_VIDEO {
        return None;
    }
    let command = Command::from_byte(report[1])?;
    let total_len = u32::from_be_bytes([report[2], report[3], report[4], report[5]]);
    let seq = u32::from_be_bytes([0, report[6], report[7], report[8]]);
    let payload_len = u16::from_be_bytes([report[9], report[10]]);
    if payload_len as usize > CHUNK_SIZE {
        return None;
    }
    let payload = &report[REPORT_HEADER_SIZE..REPORT_HEADER_SIZE + payload_len as usize];
    Some((ReportHeader { command, total_len, seq, payload_len }, payload))
}

/// 水泵 RGB 灯光报文。
pub fn pump_color_report(color: Color) -> [u8; PUMP_REPORT_SIZE] {
    let (r, g, b) = color.rgb();
    let mut report = [0u8; PUMP_REPORT_SIZE];
    report[0] = 0x01;
    report[1] = 0x83;
    // 载荷长度
    report[5] = 19;
    report[6..10].copy_from_slice(&[0x00, 0x03, 0x04, 0x00]);
    report[10] = r;
    report[11] = g;
    report[12] = b;
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(data: &[u8]) -> (Vec<u32>, Vec<u8>) {
        let total = data.len() as u32;
        let mut seqs = Vec::new();
        let mut out = Vec::new();
        for chunk in chunks(data) {
            let report = chunk_report(total, &chunk).unwrap();
            let (header, payload) = decode_report(&report).unwrap();
            assert_eq!(header.total_len, total);
            seqs.push(header.seq);
            out.extend_from_slice(payload);
        }
        (seqs, out)
    }

    #[test]
    fn chunk_count_matches_ceiling_division() {
        for len in [
            0usize,
            1,
            100,
            CHUNK_SIZE - 1,
            CHUNK_SIZE,
            CHUNK_SIZE + 1,
            5000,
            10_000,
            3 * CHUNK_SIZE,
        ] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            assert_eq!(chunks(&data).len(), len.div_ceil(CHUNK_SIZE), "len {len}");
            assert_eq!(chunk_count(len), len.div_ceil(CHUNK_SIZE));

            let (seqs, out) = reassemble(&data);
            let expected: Vec<u32> = (0..seqs.len() as u32).collect();
            assert_eq!(seqs, expected);
            assert_eq!(out, data);
        }
    }

    #[test]
    fn every_chunk_but_last_is_full() {
        let data = vec![0xAB; 2 * CHUNK_SIZE + 7];
        let sizes: Vec<usize> = chunks(&data).map(|c| c.payload.len()).collect();
        assert_eq!(sizes, vec![CHUNK_SIZE, CHUNK_SIZE, 7]);
    }

    #[test]
    fn chunk_report_layout_is_bit_exact() {
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 200) as u8 + 1).collect();
        let second = chunks(&data).nth(1).unwrap();
        let report = chunk_report(data.len() as u32, &second).unwrap();

        assert_eq!(report.len(), 1024);
        assert_eq!(&report[..2], &[0x02, 0x0D]);
        assert_eq!(&report[2..6], &[0x00, 0x00, 0x09, 0xC4]);
        assert_eq!(&report[6..9], &[0x00, 0x00, 0x01]);
        assert_eq!(&report[9..11], &[0x03, 0xF5]);
        assert_eq!(&report[11..1024], &data[1013..2026]);
    }

    #[test]
    fn last_chunk_is_zero_padded() {
        let data = vec![0xFF; 100];
        let chunk = chunks(&data).next().unwrap();
        let report = chunk_report(100, &chunk).unwrap();
        assert_eq!(&report[9..11], &[0x00, 100]);
        assert!(report[11..111].iter().all(|&b| b == 0xFF));
        assert!(report[111..].iter().all(|&b| b == 0));
    }

    #[test]
    fn sequence_uses_three_bytes() {
        let report = marker_report(Command::FrameEnd, 7, 0x01_02_03).unwrap();
        assert_eq!(&report[6..9], &[0x01, 0x02, 0x03]);
        assert!(matches!(
            marker_report(Command::FrameEnd, 7, MAX_SEQUENCE + 1),
            Err(LcdError::InvalidReport(msg)) if msg.contains("16777216")
        ));
    }

    #[test]
    fn rejects_oversized_payload() {
        let payload = vec![0u8; CHUNK_SIZE + 1];
        let header = ReportHeader {
            command: Command::FrameChunk,
            total_len: payload.len() as u32,
            seq: 0,
            payload_len: payload.len() as u16,
        };
        assert!(matches!(
            encode_report(&header, &payload),
            Err(LcdError::PayloadTooLarge(n)) if n == CHUNK_SIZE + 1
        ));
    }

    #[test]
    fn rejects_header_payload_mismatch() {
        let header = ReportHeader {
            command: Command::FrameChunk,
            total_len: 10,
            seq: 0,
            payload_len: 4,
        };
        assert!(matches!(
            encode_report(&header, &[0u8; 10]),
            Err(LcdError::InvalidReport(_))
        ));
    }

    #[test]
    fn decode_rejects_foreign_reports() {
        assert!(decode_report(&[0u8; 10]).is_none());
        let mut report = marker_report(Command::FrameStart, 1, 0).unwrap();
        report[0] = 0x01;
        assert!(decode_report(&report).is_none());
        report[0] = REPORT_ID_VIDEO;
        report[1] = 0x7F;
        assert!(decode_report(&report).is_none());
    }

    #[test]
    fn pump_color_report_is_bit_exact() {
        let report = pump_color_report(Color::Custom(0, 255, 200));
        let mut expected = [0u8; 64];
        expected[..13]
            .copy_from_slice(&[0x01, 0x83, 0, 0, 0, 19, 0x00, 0x03, 0x04, 0x00, 0, 255, 200]);
        assert_eq!(report, expected);
    }
}
