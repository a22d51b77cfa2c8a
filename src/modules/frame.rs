//! Galahad LCD 库的帧缓冲区与画面合成。

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};

use crate::modules::constants::{FRAME_HEIGHT, FRAME_WIDTH};
use crate::modules::error::LcdError;
use crate::modules::font::Typeface;
use crate::modules::metrics::MetricsSnapshot;
use crate::modules::types::{Color, OverlaySpec, ResizeMode};

/// 温度文字左上角。
const TEMP_ORIGIN: (i32, i32) = (60, 100);
/// CPU 占用率文字右对齐的 x 坐标与 y 坐标。
const LOAD_ORIGIN: (i32, i32) = (420, 100);
const CLOCK_ORIGIN: (i32, i32) = (240, 180);
const DATE_ORIGIN: (i32, i32) = (240, 290);

const METRIC_TEXT_SIZE: f32 = 35.0;
const CLOCK_TEXT_SIZE: f32 = 90.0;
const DATE_TEXT_SIZE: f32 = 45.0;

/// 文字背板区域 (x, y, w, h)。
const PANEL_RECT: (i32, i32, u32, u32) = (30, 85, 420, 270);

/// 默认主题颜色。
const THEME_BASE: Color = Color::Custom(30, 30, 30);
const THEME_RECT: Color = Color::Custom(10, 10, 10);

/// 480×480 RGB 帧。
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pixels: RgbImage,
}

impl Frame {
    /// 纯色帧。
    pub fn blank(color: Color) -> Self {
        Self {
            pixels: RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, color.to_pixel()),
        }
    }

    /// 从已渲染的图像构造。尺寸必须正好是 480×480，不做任何缩放。
    pub fn from_image(pixels: RgbImage) -> Result<Self, LcdError> {
        if pixels.dimensions() != (FRAME_WIDTH, FRAME_HEIGHT) {
            return Err(LcdError::Config(format!(
                "帧尺寸必须为 {}x{}，实际为 {}x{}",
                FRAME_WIDTH,
                FRAME_HEIGHT,
                pixels.width(),
                pixels.height()
            )));
        }
        Ok(Self { pixels })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// 行优先的 rgb24 数据。
    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.pixels
    }

    /// 读取单个像素。
    pub fn pixel(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        self.pixels.get_pixel_checked(x, y).map(|p| (p[0], p[1], p[2]))
    }

    /// 设置单个像素，超出范围时忽略。
    pub fn set_pixel(&mut self, x: i32, y: i32, color: Color) {
        if let Some(pixel) = self.pixel_mut(x, y) {
            *pixel = color.to_pixel();
        }
    }

    /// 以 `alpha` 不透明度把颜色混合到单个像素上。
    pub fn blend_pixel(&mut self, x: i32, y: i32, color: Color, alpha: u8) {
        let (r, g, b) = color.rgb();
        if let Some(pixel) = self.pixel_mut(x, y) {
            pixel.0 = [mix(pixel[0], r, alpha), mix(pixel[1], g, alpha), mix(pixel[2], b, alpha)];
        }
    }

    /// 填充矩形，自动裁剪到屏幕范围。
    pub fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: Color) {
        for dy in 0..height as i32 {
            for dx in 0..width as i32 {
                self.set_pixel(x + dx, y + dy, color);
            }
        }
    }

    /// 半透明矩形。
    pub fn blend_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: Color, alpha: u8) {
        for dy in 0..height as i32 {
            for dx in 0..width as i32 {
                self.blend_pixel(x + dx, y + dy, color, alpha);
            }
        }
    }

    /// 与另一帧整体混合：`self * (1 - a) + other * a`。
    pub fn blend_with(&mut self, other: &Frame, alpha: u8) {
        for (dst, src) in self.pixels.pixels_mut().zip(other.pixels.pixels()) {
            dst.0 = [
                mix(dst[0], src[0], alpha),
                mix(dst[1], src[1], alpha),
                mix(dst[2], src[2], alpha),
            ];
        }
    }

    fn pixel_mut(&mut self, x: i32, y: i32) -> Option<&mut Rgb<u8>> {
        if x < 0 || y < 0 {
            return None;
        }
        self.pixels.get_pixel_mut_checked(x as u32, y as u32)
    }
}

fn mix(dst: u8, src: u8, alpha: u8) -> u8 {
    let a = alpha as u16;
    ((src as u16 * a + dst as u16 * (255 - a) + 127) / 255) as u8
}

/// 启动时缩放好的背景。
#[derive(Debug, Clone)]
pub struct Background {
    frame: Frame,
}

impl Background {
    /// 从文件加载背景并按模式缩放。
    pub fn load<P: AsRef<Path>>(
        path: P,
        mode: ResizeMode,
        border: Color,
    ) -> Result<Self, LcdError> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| LcdError::ImageLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        log::info!(
            "Loaded background {} ({}x{}, mode {})",
            path.display(),
            img.width(),
            img.height(),
            mode
        );
        Ok(Self::from_image(&img, mode, border))
    }

    /// 按模式缩放任意尺寸的图像，使用 Lanczos3 重采样。
    pub fn from_image(img: &DynamicImage, mode: ResizeMode, border: Color) -> Self {
        let pixels = match mode {
            ResizeMode::Stretch => img
                .resize_exact(FRAME_WIDTH, FRAME_HEIGHT, FilterType::Lanczos3)
                .to_rgb8(),
            ResizeMode::Fill => {
                let (x, y, width, height) = fill_region(img.width(), img.height());
                img.crop_imm(x, y, width, height)
                    .resize_exact(FRAME_WIDTH, FRAME_HEIGHT, FilterType::Lanczos3)
                    .to_rgb8()
            }
            ResizeMode::Fit => {
                let scaled = img.resize(FRAME_WIDTH, FRAME_HEIGHT, FilterType::Lanczos3).to_rgb8();
                let mut canvas = RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, border.to_pixel());
                let x = (FRAME_WIDTH - scaled.width().min(FRAME_WIDTH)) / 2;
                let y = (FRAME_HEIGHT - scaled.height().min(FRAME_HEIGHT)) / 2;
                imageops::overlay(&mut canvas, &scaled, x as i64, y as i64);
                canvas
            }
        };
        Self { frame: Frame { pixels } }
    }

    /// 没有配置背景图时的深色主题。
    pub fn default_theme() -> Self {
        let mut frame = Frame::blank(THEME_BASE);
        frame.fill_rect(40, 40, 401, 401, THEME_RECT);
        Self { frame }
    }

    /// 背景副本，作为每帧的底图。
    pub fn frame(&self) -> Frame {
        self.frame.clone()
    }
}

/// fill 模式下保留的居中区域 (x, y, w, h)，宽高比与屏幕一致。
fn fill_region(width: u32, height: u32) -> (u32, u32, u32, u32) {
    let (w, h) = (u64::from(width), u64::from(height));
    let (fw, fh) = (u64::from(FRAME_WIDTH), u64::from(FRAME_HEIGHT));
    if w * fh > h * fw {
        let crop = ((h * fw + fh / 2) / fh).clamp(1, w) as u32;
        ((width - crop) / 2, 0, crop, height)
    } else {
        let crop = ((w * fh + fw / 2) / fw).clamp(1, h) as u32;
        (0, (height - crop) / 2, width, crop)
    }
}

/// 逐帧产生画面的来源。
pub trait FrameSource {
    fn render(&mut self, snapshot: &MetricsSnapshot) -> Frame;
}

/// 在背景上绘制叠加层。纯函数，不做任何 I/O。
pub fn compose(
    background: &Background,
    spec: &OverlaySpec,
    typeface: &Typeface,
    snapshot: &MetricsSnapshot,
) -> Frame {
    let mut frame = background.frame();
    if !spec.fields.any() {
        return frame;
    }

    if spec.panel_opacity > 0 {
        let (x, y, w, h) = PANEL_RECT;
        frame.blend_rect(x, y, w, h, Color::Black, spec.panel_opacity);
    }

    let color = spec.text_color;

    if spec.fields.cpu_temp {
        let (x, y) = TEMP_ORIGIN;
        let text = snapshot.temperature_text();
        typeface.draw_text(&mut frame, x, y, &text, METRIC_TEXT_SIZE, color);
    }

    if spec.fields.cpu_load {
        let text = snapshot.cpu_text();
        let (right, y) = LOAD_ORIGIN;
        let width = typeface.measure(&text, METRIC_TEXT_SIZE) as i32;
        typeface.draw_text(&mut frame, right - width, y, &text, METRIC_TEXT_SIZE, color);
    }

    if spec.fields.clock {
        let text = snapshot.clock_text();
        draw_centered(&mut frame, typeface, CLOCK_ORIGIN, &text, CLOCK_TEXT_SIZE, color);
    }

    if spec.fields.date {
        let text = snapshot.date_text();
        draw_centered(&mut frame, typeface, DATE_ORIGIN, &text, DATE_TEXT_SIZE, color);
    }

    frame
}

fn draw_centered(
    frame: &mut Frame,
    typeface: &Typeface,
    origin: (i32, i32),
    text: &str,
    size: f32,
    color: Color,
) {
    let width = typeface.measure(text, size) as i32;
    typeface.draw_text(frame, origin.0 - width / 2, origin.1, text, size, color);
}

/// 背景加叠加层的画面来源。
pub struct FrameComposer {
    background: Background,
    spec: OverlaySpec,
    typeface: Typeface,
}

impl FrameComposer {
    pub fn new(background: Background, spec: OverlaySpec, typeface: Typeface) -> Self {
        Self { background, spec, typeface }
    }

    /// 启动时加载背景图（或默认主题）并解析字体。
    pub fn from_spec(spec: OverlaySpec, background: Option<&Path>) -> Result<Self, LcdError> {
        let background = match background {
            Some(path) => Background::load(path, spec.resize_mode, spec.border_color)?,
            None => Background::default_theme(),
        };
        let typeface = Typeface::resolve(&spec.font)?;
        Ok(Self::new(background, spec, typeface))
    }

    pub fn spec(&self) -> &OverlaySpec {
        &self.spec
    }
}

impl FrameSource for FrameComposer {
    fn render(&mut self, snapshot: &MetricsSnapshot) -> Frame {
        compose(&self.background, &self.spec, &self.typeface, snapshot)
    }
}
