//! Galahad LCD 库的预设画面。

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::modules::constants::{FRAME_HEIGHT, FRAME_WIDTH};
use crate::modules::font::Typeface;
use crate::modules::frame::{Frame, FrameSource};
use crate::modules::metrics::MetricsSnapshot;
use crate::modules::types::Color;

/// 可选的预设。
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// 下落字符加 CPU 温度。
    Matrix,
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "matrix" => Ok(Preset::Matrix),
            other => Err(format!("未知预设 '{}'（可选 matrix）", other)),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Matrix => f.write_str("matrix"),
        }
    }
}

const CHAR_POOL: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 列宽与字符行高。
const COLUMN_WIDTH: i32 = 10;
const CELL_HEIGHT: f32 = 15.0;

const GLYPH_SIZE: f32 = 12.0;
const TEMP_SIZE: f32 = 60.0;
const TEMP_PADDING: i32 = 10;

const START_Y: std::ops::RangeInclusive<i32> = -200..=0;
const RESET_Y: f32 = -200.0;
const SPEED: std::ops::Range<f32> = 1.5..3.0;
const TRAIL: std::ops::RangeInclusive<u32> = 5..=15;

const BRIGHT: Color = Color::Custom(0, 255, 0);
const MID: Color = Color::Custom(0, 200, 0);
const DIM: Color = Color::Custom(0, 100, 0);
const VERY_DIM: Color = Color::Custom(0, 50, 0);
const TEMP_BOX: Color = Color::Custom(0, 30, 0);

/// 背景压暗的混合比例（约 0.3）。
const SHADE_ALPHA: u8 = 77;

/// 一列下落字符。
#[derive(Debug, Clone, PartialEq)]
struct Column {
    y: f32,
    ch: char,
    speed: f32,
    trail: u32,
}

impl Column {
    fn random<R: Rng>(rng: &mut R) -> Self {
        Self {
            y: rng.gen_range(START_Y) as f32,
            ch: random_char(rng),
            speed: rng.gen_range(SPEED),
            trail: rng.gen_range(TRAIL),
        }
    }
}

fn random_char<R: Rng>(rng: &mut R) -> char {
    CHAR_POOL[rng.gen_range(0..CHAR_POOL.len())] as char
}

/// 按拖尾位置选择绿色深浅。
fn trail_color(brightness: f32) -> Color {
    if brightness > 0.75 {
        BRIGHT
    } else if brightness > 0.5 {
        MID
    } else if brightness > 0.25 {
        DIM
    } else {
        VERY_DIM
    }
}

/// 矩阵雨预设：绿色字符下落，屏幕中央显示 CPU 温度。
pub struct MatrixRain {
    columns: Vec<Column>,
    typeface: Typeface,
    rng: StdRng,
    frame_count: u64,
}

impl MatrixRain {
    pub fn new(typeface: Typeface) -> Self {
        Self::with_rng(typeface, StdRng::from_entropy())
    }

    /// 固定种子，动画可重现。
    pub fn with_seed(typeface: Typeface, seed: u64) -> Self {
        Self::with_rng(typeface, StdRng::seed_from_u64(seed))
    }

    fn with_rng(typeface: Typeface, mut rng: StdRng) -> Self {
        let count = FRAME_WIDTH as i32 / COLUMN_WIDTH;
        let columns = (0..count).map(|_| Column::random(&mut rng)).collect();
        Self { columns, typeface, rng, frame_count: 0 }
    }

    /// 已渲染的帧数。
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn advance(&mut self) {
        let limit = FRAME_HEIGHT as f32 + 100.0;
        for column in &mut self.columns {
            column.y += column.speed;
            if column.y > limit {
                column.y = RESET_Y;
                column.ch = random_char(&mut self.rng);
                column.speed = self.rng.gen_range(SPEED);
            }
        }
    }

    fn draw_columns(&self, frame: &mut Frame) {
        let height = FRAME_HEIGHT as f32;
        let mut buf = [0u8; 4];
        for (index, column) in self.columns.iter().enumerate() {
            let text: &str = column.ch.encode_utf8(&mut buf);
            let x = index as i32 * COLUMN_WIDTH + 2;
            for i in 0..column.trail {
                let y = column.y - i as f32 * CELL_HEIGHT;
                if y > -20.0 && y < height + 20.0 {
                    let brightness = 1.0 - i as f32 / column.trail as f32;
                    let color = trail_color(brightness);
                    self.typeface.draw_text(frame, x, y as i32, text, GLYPH_SIZE, color);
                }
            }
        }
    }

    fn draw_temperature(&self, frame: &mut Frame, text: &str) {
        let width = self.typeface.measure(text, TEMP_SIZE) as i32;
        let height = self.typeface.height(TEMP_SIZE) as i32;
        let cx = FRAME_WIDTH as i32 / 2;
        let cy = FRAME_HEIGHT as i32 / 2;
        let left = cx - width / 2;
        let top = cy - height / 2;

        let mut shade = Frame::blank(Color::Black);
        shade.fill_rect(
            left - TEMP_PADDING,
            top - TEMP_PADDING,
            (width + 2 * TEMP_PADDING) as u32,
            (height + 2 * TEMP_PADDING) as u32,
            TEMP_BOX,
        );
        frame.blend_with(&shade, SHADE_ALPHA);

        self.typeface.draw_text(frame, left, top, text, TEMP_SIZE, BRIGHT);
    }
}

impl FrameSource for MatrixRain {
    fn render(&mut self, snapshot: &MetricsSnapshot) -> Frame {
        self.advance();
        let mut frame = Frame::blank(Color::Black);
        self.draw_columns(&mut frame);
        self.draw_temperature(&mut frame, &snapshot.temperature_text());
        self.frame_count += 1;
        frame
    }
}
