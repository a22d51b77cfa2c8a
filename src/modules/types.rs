//! Galahad LCD 库的公共类型定义。

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::modules::constants::DEFAULT_OVERLAY_OPACITY;

/// 常用颜色。
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "String")]
pub enum Color {
    /// 黑色 (0, 0, 0)
    Black,
    /// 白色 (255, 255, 255)
    White,
    /// 红色 (255, 0, 0)
    Red,
    /// 绿色 (0, 255, 0)
    Green,
    /// 蓝色 (0, 0, 255)
    Blue,
    /// 黄色 (255, 255, 0)
    Yellow,
    /// 青色 (0, 255, 255)
    Cyan,
    /// 品红色 (255, 0, 255)
    Magenta,
    /// 自定义 RGB 颜色
    Custom(u8, u8, u8),
}

/// 可按名称使用的颜色模板。
const COLOR_TEMPLATES: [(&str, Color); 17] = [
    ("black", Color::Black),
    ("red", Color::Red),
    ("green", Color::Green),
    ("yellow", Color::Yellow),
    ("blue", Color::Blue),
    ("magenta", Color::Magenta),
    ("cyan", Color::Cyan),
    ("white", Color::White),
    ("gray", Color::Custom(128, 128, 128)),
    ("grey", Color::Custom(128, 128, 128)),
    ("bright_red", Color::Custom(255, 64, 64)),
    ("bright_green", Color::Custom(64, 255, 64)),
    ("bright_yellow", Color::Custom(255, 255, 64)),
    ("bright_blue", Color::Custom(64, 64, 255)),
    ("bright_magenta", Color::Custom(255, 64, 255)),
    ("bright_cyan", Color::Custom(64, 255, 255)),
    ("bright_white", Color::White),
];

impl Color {
    /// 获取 RGB 分量。
    pub fn rgb(&self) -> (u8, u8, u8) {
        match self {
            Color::Black => (0, 0, 0),
            Color::White => (255, 255, 255),
            Color::Red => (255, 0, 0),
            Color::Green => (0, 255, 0),
            Color::Blue => (0, 0, 255),
            Color::Yellow => (255, 255, 0),
            Color::Cyan => (0, 255, 255),
            Color::Magenta => (255, 0, 255),
            Color::Custom(r, g, b) => (*r, *g, *b),
        }
    }

    /// 转换为 image 库的像素。
    pub fn to_pixel(&self) -> image::Rgb<u8> {
        let (r, g, b) = self.rgb();
        image::Rgb([r, g, b])
    }

    /// 所有模板名称，按字母排序。
    pub fn template_names() -> Vec<&'static str> {
        let mut names: Vec<_> = COLOR_TEMPLATES.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names
    }
}

/// 颜色字符串解析失败。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseColorError(pub String);

impl fmt::Display for ParseColorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "无效颜色 '{}'，可用名称 ({})、十六进制 (#00FF00) 或 RGB (0,255,0)",
            self.0,
            Color::template_names().join(", ")
        )
    }
}

impl std::error::Error for ParseColorError {}

impl FromStr for Color {
    type Err = ParseColorError;

    /// 支持名称、`#RRGGBB`/`RRGGBB` 与 `r,g,b` 三种写法。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();

        if let Some((_, color)) = COLOR_TEMPLATES.iter().find(|(name, _)| *name == lower) {
            return Ok(*color);
        }

        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() == 6 && hex.is_ascii() {
            let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
            if let (Ok(r), Ok(g), Ok(b)) = (channel(0), channel(2), channel(4)) {
                return Ok(Color::Custom(r, g, b));
            }
        }

        if s.contains(',') {
            let parts: Result<Vec<u8>, _> = s.split(',').map(|p| p.trim().parse::<u8>()).collect();
            if let Ok(parts) = parts {
                if let [r, g, b] = parts[..] {
                    return Ok(Color::Custom(r, g, b));
                }
            }
        }

        Err(ParseColorError(s.to_string()))
    }
}

impl TryFrom<String> for Color {
    type Error = ParseColorError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// 背景缩放模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// 拉伸到 480×480，忽略宽高比。
    Stretch,
    /// 等比缩放到长边 480，其余部分填充边框色。
    Fit,
    /// 等比缩放到短边 480，居中裁剪。
    #[default]
    Fill,
}

impl FromStr for ResizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stretch" => Ok(ResizeMode::Stretch),
            "fit" => Ok(ResizeMode::Fit),
            "fill" => Ok(ResizeMode::Fill),
            other => Err(format!("未知缩放模式 '{}'（可选 stretch, fit, fill）", other)),
        }
    }
}

impl fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResizeMode::Stretch => "stretch",
            ResizeMode::Fit => "fit",
            ResizeMode::Fill => "fill",
        };
        f.write_str(name)
    }
}

/// 字体来源。
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "String")]
pub enum FontRef {
    /// 通过 fontconfig 查找系统字体，找不到时退回内置点阵字体。
    System(String),
    /// 指定 TrueType 字体文件。
    File(PathBuf),
    /// 内置 8x8 点阵字体。
    Builtin,
}

impl Default for FontRef {
    fn default() -> Self {
        FontRef::System("NotoSansMono:weight=bold".to_string())
    }
}

impl FromStr for FontRef {
    type Err = String;

    /// `builtin` 为点阵字体，路径或字体文件名为文件，其余按 fontconfig 模式查找。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("字体不能为空".to_string());
        }
        if s.eq_ignore_ascii_case("builtin") {
            return Ok(FontRef::Builtin);
        }
        let lower = s.to_ascii_lowercase();
        let is_file =
            s.contains('/') || [".ttf", ".otf", ".ttc"].iter().any(|ext| lower.ends_with(ext));
        if is_file {
            Ok(FontRef::File(PathBuf::from(s)))
        } else {
            Ok(FontRef::System(s.to_string()))
        }
    }
}

impl TryFrom<String> for FontRef {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// 叠加层上可显示的字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayFields {
    pub clock: bool,
    pub cpu_load: bool,
    pub cpu_temp: bool,
    pub date: bool,
}

impl OverlayFields {
    pub fn all() -> Self {
        Self { clock: true, cpu_load: true, cpu_temp: true, date: true }
    }

    pub fn none() -> Self {
        Self { clock: false, cpu_load: false, cpu_temp: false, date: false }
    }

    pub fn any(&self) -> bool {
        self.clock || self.cpu_load || self.cpu_temp || self.date
    }
}

/// 叠加层配置，启动时创建，之后只读。
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySpec {
    /// 文字颜色。
    pub text_color: Color,
    /// 启用的字段。
    pub fields: OverlayFields,
    /// 背景缩放模式。
    pub resize_mode: ResizeMode,
    /// `fit` 模式的边框色。
    pub border_color: Color,
    /// 文字背板不透明度（0 为透明）。
    pub panel_opacity: u8,
    /// 字体来源。
    pub font: FontRef,
}

impl Default for OverlaySpec {
    fn default() -> Self {
        Self {
            text_color: Color::Custom(0, 255, 200),
            fields: OverlayFields::all(),
            resize_mode: ResizeMode::default(),
            border_color: Color::Black,
            panel_opacity: DEFAULT_OVERLAY_OPACITY,
            font: FontRef::default(),
        }
    }
}

/// 设备信息。
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// 厂商 ID。
    pub vid: u16,
    /// 产品 ID。
    pub pid: u16,
    /// 设备信息字符串。
    pub info: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_colors() {
        assert_eq!("red".parse::<Color>().unwrap().rgb(), (255, 0, 0));
        assert_eq!("grey".parse::<Color>().unwrap().rgb(), (128, 128, 128));
        assert_eq!("BrIgHt_ReD".parse::<Color>().unwrap().rgb(), (255, 64, 64));
        assert_eq!("  blue  ".parse::<Color>().unwrap().rgb(), (0, 0, 255));
        assert_eq!("bright_white".parse::<Color>().unwrap().rgb(), (255, 255, 255));
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!("#FF0000".parse::<Color>().unwrap().rgb(), (255, 0, 0));
        assert_eq!("00FF00".parse::<Color>().unwrap().rgb(), (0, 255, 0));
        assert_eq!("#00ffcc".parse::<Color>().unwrap().rgb(), (0, 255, 204));
        assert_eq!("  #FF0000  ".parse::<Color>().unwrap().rgb(), (255, 0, 0));
    }

    #[test]
    fn parses_rgb_triplets() {
        assert_eq!("255,0,0".parse::<Color>().unwrap().rgb(), (255, 0, 0));
        assert_eq!("128, 64, 192".parse::<Color>().unwrap().rgb(), (128, 64, 192));
    }

    #[test]
    fn rejects_invalid_colors() {
        for bad in [
            "#FFFF",
            "#FFFFFFF",
            "#GGGGGG",
            "255,0,0,100",
            "255,0",
            "256,0,0",
            "-1,0,0",
            "abc,def,ghi",
            "not a color",
            "12345G",
        ] {
            assert!(bad.parse::<Color>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn parse_error_lists_templates() {
        let err = "nope".parse::<Color>().unwrap_err().to_string();
        assert!(err.contains("bright_cyan"));
        assert!(err.contains("nope"));
    }

    #[test]
    fn parses_resize_modes() {
        assert_eq!("Fit".parse::<ResizeMode>(), Ok(ResizeMode::Fit));
        assert_eq!("stretch".parse::<ResizeMode>(), Ok(ResizeMode::Stretch));
        assert!("zoom".parse::<ResizeMode>().is_err());
        assert_eq!(ResizeMode::default(), ResizeMode::Fill);
        assert_eq!(ResizeMode::Fill.to_string(), "fill");
    }

    #[test]
    fn parses_font_refs() {
        assert_eq!("builtin".parse::<FontRef>(), Ok(FontRef::Builtin));
        assert_eq!(
            "/usr/share/fonts/DejaVuSans.ttf".parse::<FontRef>(),
            Ok(FontRef::File(PathBuf::from("/usr/share/fonts/DejaVuSans.ttf")))
        );
        assert_eq!("Font.OTF".parse::<FontRef>(), Ok(FontRef::File(PathBuf::from("Font.OTF"))));
        assert_eq!(
            "DejaVu Sans:weight=bold".parse::<FontRef>(),
            Ok(FontRef::System("DejaVu Sans:weight=bold".to_string()))
        );
        assert!("  ".parse::<FontRef>().is_err());
    }
}
