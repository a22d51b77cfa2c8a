//! Galahad LCD 库的文字渲染。
//!
//! 优先使用 TrueType 字体（fontdue 光栅化），找不到系统字体时退回内置 8x8 点阵字体。

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use fontdue::{Font, FontSettings};

use crate::modules::error::LcdError;
use crate::modules::frame::Frame;
use crate::modules::types::{Color, FontRef};

/// 点阵字体的单元尺寸。
const CELL: i32 = 8;

/// 内置点阵字形，每行最高位在最左侧。小写字母按大写绘制。
static GLYPHS: [(char, [u8; 8]); 44] = [
    ('0', [0x3C, 0x66, 0x6E, 0x76, 0x66, 0x66, 0x3C, 0x00]),
    ('1', [0x18, 0x38, 0x18, 0x18, 0x18, 0x18, 0x7E, 0x00]),
    ('2', [0x3C, 0x66, 0x06, 0x0C, 0x30, 0x60, 0x7E, 0x00]),
    ('3', [0x3C, 0x66, 0x06, 0x1C, 0x06, 0x66, 0x3C, 0x00]),
    ('4', [0x0C, 0x1C, 0x2C, 0x4C, 0x7E, 0x0C, 0x0C, 0x00]),
    ('5', [0x7E, 0x60, 0x7C, 0x06, 0x06, 0x66, 0x3C, 0x00]),
    ('6', [0x3C, 0x66, 0x60, 0x7C, 0x66, 0x66, 0x3C, 0x00]),
    ('7', [0x7E, 0x06, 0x0C, 0x18, 0x30, 0x30, 0x30, 0x00]),
    ('8', [0x3C, 0x66, 0x66, 0x3C, 0x66, 0x66, 0x3C, 0x00]),
    ('9', [0x3C, 0x66, 0x66, 0x3E, 0x06, 0x66, 0x3C, 0x00]),
    (':', [0x00, 0x18, 0x18, 0x00, 0x18, 0x18, 0x00, 0x00]),
    ('.', [0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x00]),
    ('%', [0x62, 0x66, 0x0C, 0x18, 0x30, 0x66, 0x46, 0x00]),
    ('/', [0x02, 0x06, 0x0C, 0x18, 0x30, 0x60, 0x40, 0x00]),
    ('-', [0x00, 0x00, 0x00, 0x7E, 0x00, 0x00, 0x00, 0x00]),
    ('°', [0x38, 0x6C, 0x38, 0x00, 0x00, 0x00, 0x00, 0x00]),
    (' ', [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
    ('?', [0x3C, 0x66, 0x06, 0x0C, 0x18, 0x00, 0x18, 0x00]),
    ('A', [0x18, 0x3C, 0x66, 0x66, 0x7E, 0x66, 0x66, 0x00]),
    ('B', [0x7C, 0x66, 0x66, 0x7C, 0x66, 0x66, 0x7C, 0x00]),
    ('C', [0x3C, 0x66, 0x60, 0x60, 0x60, 0x66, 0x3C, 0x00]),
    ('D', [0x78, 0x6C, 0x66, 0x66, 0x66, 0x6C, 0x78, 0x00]),
    ('E', [0x7E, 0x60, 0x60, 0x7C, 0x60, 0x60, 0x7E, 0x00]),
    ('F', [0x7E, 0x60, 0x60, 0x7C, 0x60, 0x60, 0x60, 0x00]),
    ('G', [0x3C, 0x66, 0x60, 0x6E, 0x66, 0x66, 0x3E, 0x00]),
    ('H', [0x66, 0x66, 0x66, 0x7E, 0x66, 0x66, 0x66, 0x00]),
    ('I', [0x3C, 0x18, 0x18, 0x18, 0x18, 0x18, 0x3C, 0x00]),
    ('J', [0x1E, 0x0C, 0x0C, 0x0C, 0x0C, 0x6C, 0x38, 0x00]),
    ('K', [0x66, 0x6C, 0x78, 0x70, 0x78, 0x6C, 0x66, 0x00]),
    ('L', [0x60, 0x60, 0x60, 0x60, 0x60, 0x60, 0x7E, 0x00]),
    ('M', [0x63, 0x77, 0x7F, 0x6B, 0x63, 0x63, 0x63, 0x00]),
    ('N', [0x66, 0x76, 0x7E, 0x7E, 0x6E, 0x66, 0x66, 0x00]),
    ('O', [0x3C, 0x66, 0x66, 0x66, 0x66, 0x66, 0x3C, 0x00]),
    ('P', [0x7C, 0x66, 0x66, 0x7C, 0x60, 0x60, 0x60, 0x00]),
    ('Q', [0x3C, 0x66, 0x66, 0x66, 0x66, 0x3C, 0x0E, 0x00]),
    ('R', [0x7C, 0x66, 0x66, 0x7C, 0x78, 0x6C, 0x66, 0x00]),
    ('S', [0x3C, 0x66, 0x60, 0x3C, 0x06, 0x66, 0x3C, 0x00]),
    ('T', [0x7E, 0x18, 0x18, 0x18, 0x18, 0x18, 0x18, 0x00]),
    ('U', [0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x3C, 0x00]),
    ('V', [0x66, 0x66, 0x66, 0x66, 0x66, 0x3C, 0x18, 0x00]),
    ('W', [0x63, 0x63, 0x63, 0x6B, 0x7F, 0x77, 0x63, 0x00]),
    ('X', [0x66, 0x66, 0x3C, 0x18, 0x3C, 0x66, 0x66, 0x00]),
    ('Y', [0x66, 0x66, 0x66, 0x3C, 0x18, 0x18, 0x18, 0x00]),
    ('Z', [0x7E, 0x06, 0x0C, 0x18, 0x30, 0x60, 0x7E, 0x00]),
];

fn glyph(c: char) -> &'static [u8; 8] {
    let upper = c.to_ascii_uppercase();
    GLYPHS
        .iter()
        .find(|(g, _)| *g == upper)
        .or_else(|| GLYPHS.iter().find(|(g, _)| *g == '?'))
        .map(|(_, rows)| rows)
        .unwrap_or(&GLYPHS[0].1)
}

/// 点阵字体按 16px 一个单位放大。
fn bitmap_scale(px: f32) -> i32 {
    ((px / 16.0).round() as i32).max(1)
}

/// 文字字体。
#[derive(Clone)]
pub enum Typeface {
    /// TrueType / OpenType 字体。
    Outline(Box<Font>),
    /// 内置点阵字体。
    Bitmap,
}

impl fmt::Debug for Typeface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Typeface::Outline(font) => write!(f, "Typeface::Outline({:?})", font.name()),
            Typeface::Bitmap => f.write_str("Typeface::Bitmap"),
        }
    }
}

impl Typeface {
    pub fn builtin() -> Self {
        Typeface::Bitmap
    }

    /// 从字体文件数据构造。
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, LcdError> {
        let font = Font::from_bytes(data, FontSettings::default())
            .map_err(|e| LcdError::Config(format!("无效字体: {}", e)))?;
        Ok(Typeface::Outline(Box::new(font)))
    }

    /// 加载字体文件。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LcdError> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| LcdError::Config(format!("读取字体 {} 失败: {}", path.display(), e)))?;
        let face = Self::from_bytes(data)
            .map_err(|e| LcdError::Config(format!("字体 {}: {}", path.display(), e)))?;
        log::info!("Loaded font {}", path.display());
        Ok(face)
    }

    /// 按配置解析字体。
    ///
    /// 显式指定的字体文件加载失败是配置错误；系统字体找不到时退回点阵字体。
    pub fn resolve(font: &FontRef) -> Result<Self, LcdError> {
        match font {
            FontRef::Builtin => Ok(Self::builtin()),
            FontRef::File(path) => Self::load(path),
            FontRef::System(pattern) => match fc_match(pattern) {
                Some(path) => match Self::load(&path) {
                    Ok(face) => Ok(face),
                    Err(e) => {
                        log::warn!(
                            "System font '{}' unusable ({}), using built-in font",
                            pattern,
                            e
                        );
                        Ok(Self::builtin())
                    }
                },
                None => {
                    log::warn!("No system font matches '{}', using built-in font", pattern);
                    Ok(Self::builtin())
                }
            },
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Typeface::Bitmap)
    }

    /// 文字宽度（像素）。
    pub fn measure(&self, text: &str, px: f32) -> u32 {
        match self {
            Typeface::Outline(font) => {
                let width: f32 = text.chars().map(|c| font.metrics(c, px).advance_width).sum();
                width.ceil().max(0.0) as u32
            }
            Typeface::Bitmap => (text.chars().count() as i32 * CELL * bitmap_scale(px)) as u32,
        }
    }

    /// 行高（像素）。
    pub fn height(&self, px: f32) -> u32 {
        match self {
            Typeface::Outline(font) => match font.horizontal_line_metrics(px) {
                Some(line) => (line.ascent - line.descent).ceil() as u32,
                None => px.ceil() as u32,
            },
            Typeface::Bitmap => (CELL * bitmap_scale(px)) as u32,
        }
    }

    /// 以 (x, y) 为左上角绘制一行文字。
    pub fn draw_text(&self, frame: &mut Frame, x: i32, y: i32, text: &str, px: f32, color: Color) {
        match self {
            Typeface::Outline(font) => draw_outline(font, frame, x, y, text, px, color),
            Typeface::Bitmap => draw_bitmap(frame, x, y, text, px, color),
        }
    }
}

fn draw_outline(font: &Font, frame: &mut Frame, x: i32, y: i32, text: &str, px: f32, color: Color) {
    let ascent = font.horizontal_line_metrics(px).map(|line| line.ascent).unwrap_or(px);
    let baseline = y + ascent.round() as i32;
    let mut pen = x as f32;

    for c in text.chars() {
        let (metrics, coverage) = font.rasterize(c, px);
        let gx = pen.round() as i32 + metrics.xmin;
        let gy = baseline - (metrics.height as i32 + metrics.ymin);
        for row in 0..metrics.height {
            for col in 0..metrics.width {
                let alpha = coverage[row * metrics.width + col];
                if alpha > 0 {
                    frame.blend_pixel(gx + col as i32, gy + row as i32, color, alpha);
                }
            }
        }
        pen += metrics.advance_width;
    }
}

fn draw_bitmap(frame: &mut Frame, x: i32, y: i32, text: &str, px: f32, color: Color) {
    let scale = bitmap_scale(px);
    let mut pen = x;
    for c in text.chars() {
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..CELL {
                if bits & (0x80 >> col) != 0 {
                    frame.fill_rect(
                        pen + col * scale,
                        y + row as i32 * scale,
                        scale as u32,
                        scale as u32,
                        color,
                    );
                }
            }
        }
        pen += CELL * scale;
    }
}

/// 通过 fontconfig 查找字体文件。
fn fc_match(pattern: &str) -> Option<PathBuf> {
    let output = Command::new("fc-match").args(["-f", "%{file}", pattern]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}
