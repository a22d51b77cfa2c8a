//! Galahad LCD 库的帧编码。
//!
//! 每帧启动一次外部编码器：原始 rgb24 数据写入 stdin，从 stdout 读取 H.264 码流。

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use crate::modules::constants::{FRAME_HEIGHT, FRAME_WIDTH};
use crate::modules::error::LcdError;
use crate::modules::frame::Frame;

/// 默认 CRF。
pub const DEFAULT_CRF: u8 = 25;

/// 面板解码器能接受的 x264 参数。
const X264_PARAMS: &str =
    "cabac=0:ref=1:deblock=0:0:0:analyse=0:0:me=dia:subme=0:keyint=24:keyint_min=2:scenecut=0:bframes=0:mbtree=0";

/// 一帧编码后的数据。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStream {
    data: Vec<u8>,
}

impl EncodedStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 帧编码器。一次调用对应一帧，不保留跨帧状态。
pub trait Encoder {
    fn encode(&mut self, frame: &Frame) -> Result<EncodedStream, LcdError>;
}

/// 通过外部命令编码。
#[derive(Debug, Clone)]
pub struct CommandEncoder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEncoder {
    pub fn new<P: Into<PathBuf>>(program: P, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// ffmpeg 编码单帧 H.264 baseline。
    pub fn ffmpeg<P: Into<PathBuf>>(program: P, crf: u8) -> Self {
        Self::new(program, ffmpeg_args(crf))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Default for CommandEncoder {
    fn default() -> Self {
        Self::ffmpeg("ffmpeg", DEFAULT_CRF)
    }
}

impl Encoder for CommandEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<EncodedStream, LcdError> {
        let data = run_filter(&self.program, &self.args, frame.as_raw())?;
        log::debug!("Encoded frame: {} bytes", data.len());
        Ok(EncodedStream::new(data))
    }
}

/// ffmpeg 参数：stdin 读取 rgb24 原始帧，stdout 输出裸 H.264。
pub fn ffmpeg_args(crf: u8) -> Vec<String> {
    let size = format!("{}x{}", FRAME_WIDTH, FRAME_HEIGHT);
    let crf = crf.to_string();
    let options = [
        ("-loglevel", "error"),
        ("-f", "rawvideo"),
        ("-pix_fmt", "rgb24"),
        ("-s", size.as_str()),
        ("-i", "pipe:0"),
        ("-vf", "format=yuv420p"),
        ("-c:v", "libx264"),
        ("-preset", "ultrafast"),
        ("-tune", "zerolatency"),
        ("-profile:v", "baseline"),
        ("-level", "3.0"),
        ("-x264-params", X264_PARAMS),
        ("-crf", crf.as_str()),
        ("-pix_fmt", "yuv420p"),
        ("-frames:v", "1"),
        ("-f", "h264"),
    ];

    let mut args = vec!["-y".to_string()];
    for (flag, value) in options {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
    args.push("pipe:1".to_string());
    args
}

/// 运行外部命令：输入写入 stdin，返回 stdout。
///
/// 写 stdin 放在作用域线程里，同时主线程读取输出，避免管道互相阻塞。
/// 子进程在所有路径上都会被等待。
fn run_filter(program: &Path, args: &[String], input: &[u8]) -> Result<Vec<u8>, LcdError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| LcdError::Encoder(format!("无法启动 {}: {}", program.display(), e)))?;

    let mut stdin = match child.stdin.take() {
        Some(stdin) => stdin,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(LcdError::Encoder("无法打开编码器输入".to_string()));
        }
    };

    let (output, written) = thread::scope(|s| {
        let writer = s.spawn(move || stdin.write_all(input));
        let output = child.wait_with_output();
        (output, writer.join())
    });

    match written {
        Ok(Ok(())) => {}
        // 编码器可能在读完输入前退出，以退出码和输出为准
        Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
            log::debug!("Encoder closed stdin early");
        }
        Ok(Err(e)) => log::debug!("Writing encoder input failed: {}", e),
        Err(_) => return Err(LcdError::Encoder("编码器输入线程异常".to_string())),
    }

    let output = output.map_err(|e| LcdError::Encoder(format!("等待编码器失败: {}", e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LcdError::Encoder(format!(
            "{} 异常退出 ({}): {}",
            program.display(),
            output.status,
            stderr.trim()
        )));
    }
    if output.stdout.is_empty() {
        return Err(LcdError::Encoder(format!("{} 没有输出", program.display())));
    }
    Ok(output.stdout)
}
