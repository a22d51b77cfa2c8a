//! Galahad LCD 库的配置文件。
//!
//! 配置文件为 TOML，可以写在顶层，也可以放在 `[galahad-lcd]` 表中。
//! 命令行参数优先于配置文件。

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::modules::constants::DEFAULT_FPS;
use crate::modules::encoder::DEFAULT_CRF;
use crate::modules::error::LcdError;
use crate::modules::orchestrator::LoopOptions;
use crate::modules::preset::Preset;
use crate::modules::transport::TransportConfig;
use crate::modules::types::{Color, FontRef, OverlayFields, OverlaySpec, ResizeMode};

/// 配置文件中可选的表名。
pub const CONFIG_SECTION: &str = "galahad-lcd";

/// 默认水泵灯光颜色。
pub const DEFAULT_PUMP_COLOR: Color = Color::Custom(0, 255, 200);

/// 矩阵预设未指定颜色时的水泵灯光。
pub const MATRIX_PUMP_COLOR: Color = Color::Custom(0, 255, 0);

/// `--print-config` 输出的示例配置。
pub const EXAMPLE_CONFIG: &str = r##"# galahad-lcd 配置文件
# 位置：~/.config/galahad-lcd/config.toml
# 命令行参数优先于这里的设置。

[galahad-lcd]
# 水泵灯光：名称、#RRGGBB 或 r,g,b
rgb = "cyan"

# 刷新率
fps = 5.0

# 背景图片与缩放模式（stretch / fit / fill）
# bg = "~/Pictures/wallpaper.png"
bg_mode = "fill"
# fit 模式的边框颜色
border_color = "black"

# 时间、日期与 CPU 叠加层
overlay = true
overlay_opacity = 180
text_color = "#00FFC8"
# 字体：fontconfig 模式、字体文件路径或 builtin
font = "NotoSansMono:weight=bold"

# 预设画面（matrix），设置后忽略背景与叠加层
# preset = "matrix"

# 屏幕亮度 0-100
# brightness = 80

# 帧开始 / 结束报文
frame_markers = true

# 编码器
ffmpeg = "ffmpeg"
crf = 25
"##;

/// 配置文件内容，所有字段都可省略。未知字段被忽略。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub rgb: Option<Color>,
    pub fps: Option<f64>,
    #[serde(alias = "background")]
    pub bg: Option<PathBuf>,
    pub bg_mode: Option<ResizeMode>,
    pub border_color: Option<Color>,
    pub overlay: Option<bool>,
    pub overlay_opacity: Option<i64>,
    pub text_color: Option<Color>,
    pub font: Option<FontRef>,
    pub preset: Option<Preset>,
    pub brightness: Option<u8>,
    pub frame_markers: Option<bool>,
    pub ffmpeg: Option<PathBuf>,
    pub crf: Option<u8>,
}

impl AppConfig {
    /// 解析 TOML 文本。
    pub fn from_toml_str(text: &str) -> Result<Self, LcdError> {
        let mut table: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| LcdError::Config(format!("配置文件格式错误: {}", e)))?;

        let value = match table.remove(CONFIG_SECTION) {
            Some(section @ toml::Value::Table(_)) => section,
            Some(_) => return Err(LcdError::Config(format!("[{}] 必须是表", CONFIG_SECTION))),
            None => toml::Value::Table(table),
        };

        value
            .try_into()
            .map_err(|e: toml::de::Error| LcdError::Config(format!("配置项无效: {}", e)))
    }

    /// 用 `overrides` 中已设置的字段覆盖当前配置。
    pub fn merge(self, overrides: AppConfig) -> AppConfig {
        AppConfig {
            rgb: overrides.rgb.or(self.rgb),
            fps: overrides.fps.or(self.fps),
            bg: overrides.bg.or(self.bg),
            bg_mode: overrides.bg_mode.or(self.bg_mode),
            border_color: overrides.border_color.or(self.border_color),
            overlay: overrides.overlay.or(self.overlay),
            overlay_opacity: overrides.overlay_opacity.or(self.overlay_opacity),
            text_color: overrides.text_color.or(self.text_color),
            font: overrides.font.or(self.font),
            preset: overrides.preset.or(self.preset),
            brightness: overrides.brightness.or(self.brightness),
            frame_markers: overrides.frame_markers.or(self.frame_markers),
            ffmpeg: overrides.ffmpeg.or(self.ffmpeg),
            crf: overrides.crf.or(self.crf),
        }
    }
}

/// 配置文件的候选位置，按优先级排列。
pub fn config_candidates(xdg_config_home: Option<&Path>, home: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(xdg) = xdg_config_home.filter(|p| !p.as_os_str().is_empty()) {
        paths.push(xdg.join(CONFIG_SECTION).join("config.toml"));
    }
    if let Some(home) = home.filter(|p| !p.as_os_str().is_empty()) {
        let dot_config = home.join(".config").join(CONFIG_SECTION).join("config.toml");
        if !paths.contains(&dot_config) {
            paths.push(dot_config);
        }
        paths.push(home.join(format!("{}.toml", CONFIG_SECTION)));
    }
    paths.push(PathBuf::from(format!("./{}.toml", CONFIG_SECTION)));
    paths
}

/// 查找第一个存在的配置文件。
pub fn find_config_file() -> Option<PathBuf> {
    let xdg = env::var_os("XDG_CONFIG_HOME").map(PathBuf::from);
    let home = env::var_os("HOME").map(PathBuf::from);
    config_candidates(xdg.as_deref(), home.as_deref())
        .into_iter()
        .find(|p| p.is_file())
}

/// 读取并解析配置文件。
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, LcdError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| LcdError::Config(format!("读取配置文件 {} 失败: {}", path.display(), e)))?;
    let config = AppConfig::from_toml_str(&text)
        .map_err(|e| LcdError::Config(format!("{}: {}", path.display(), e)))?;
    log::info!("Loaded config {}", path.display());
    Ok(config)
}

/// 校验后的运行参数。
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub pump_color: Color,
    pub fps: f64,
    pub background: Option<PathBuf>,
    pub overlay: OverlaySpec,
    pub preset: Option<Preset>,
    pub brightness: Option<u8>,
    pub frame_markers: bool,
    pub ffmpeg: PathBuf,
    pub crf: u8,
}

impl Settings {
    /// 填充默认值并校验取值范围。
    pub fn from_config(config: &AppConfig) -> Result<Self, LcdError> {
        let fps = config.fps.unwrap_or(DEFAULT_FPS);
        if !fps.is_finite() || fps <= 0.0 || fps > 60.0 {
            return Err(LcdError::Config(format!("fps 必须在 0 到 60 之间，实际为 {}", fps)));
        }

        if let Some(level) = config.brightness {
            if level > 100 {
                return Err(LcdError::Config(format!("亮度必须在 0 到 100 之间，实际为 {}", level)));
            }
        }

        let crf = config.crf.unwrap_or(DEFAULT_CRF);
        if crf > 51 {
            return Err(LcdError::Config(format!("crf 必须在 0 到 51 之间，实际为 {}", crf)));
        }

        let defaults = OverlaySpec::default();
        let fields = if config.overlay.unwrap_or(true) {
            OverlayFields::all()
        } else {
            OverlayFields::none()
        };
        let overlay = OverlaySpec {
            text_color: config.text_color.unwrap_or(defaults.text_color),
            fields,
            resize_mode: config.bg_mode.unwrap_or(defaults.resize_mode),
            border_color: config.border_color.unwrap_or(defaults.border_color),
            panel_opacity: config
                .overlay_opacity
                .map(|o| o.clamp(0, 255) as u8)
                .unwrap_or(defaults.panel_opacity),
            font: config.font.clone().unwrap_or(defaults.font),
        };

        let pump_color = config.rgb.unwrap_or(match config.preset {
            Some(Preset::Matrix) => MATRIX_PUMP_COLOR,
            None => DEFAULT_PUMP_COLOR,
        });

        Ok(Self {
            pump_color,
            fps,
            background: config.bg.as_deref().map(expand_home),
            overlay,
            preset: config.preset,
            brightness: config.brightness,
            frame_markers: config.frame_markers.unwrap_or(true),
            ffmpeg: config.ffmpeg.clone().unwrap_or_else(|| PathBuf::from("ffmpeg")),
            crf,
        })
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            pump_color: Some(self.pump_color),
            brightness: self.brightness,
            ..LoopOptions::from_fps(self.fps)
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig { frame_markers: self.frame_markers, ..TransportConfig::default() }
    }
}

/// 展开开头的 `~/`。
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
