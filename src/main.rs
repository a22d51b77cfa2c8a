use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use galahad_lcd::modules::config::{find_config_file, load_config, EXAMPLE_CONFIG};
use galahad_lcd::modules::constants::{USB_PID, USB_VID};
use galahad_lcd::{
    scan_devices, AppConfig, Color, CommandEncoder, DeviceTransport, FontRef, FrameComposer,
    FrameSource, MatrixRain, Orchestrator, Preset, ResizeMode, Settings, SystemMetrics, Typeface,
    UsbConnector,
};

#[derive(Parser, Debug)]
#[command(name = "galahad-lcd", version, about = "Lian Li Galahad II LCD 控制")]
#[command(after_help = "示例:
  galahad-lcd --rgb blue
  galahad-lcd --rgb \"#00FF00\" --fps 10
  galahad-lcd --bg wallpaper.png --bg-mode fit
  galahad-lcd --bg photo.jpg --no-overlay
  galahad-lcd --preset matrix")]
struct Cli {
    /// 水泵灯光颜色：名称、#RRGGBB 或 r,g,b
    #[arg(short = 'c', long, value_name = "COLOR")]
    rgb: Option<Color>,

    /// 刷新率
    #[arg(short, long)]
    fps: Option<f64>,

    /// 背景图片
    #[arg(long, alias = "background", value_name = "PATH")]
    bg: Option<PathBuf>,

    /// 背景缩放模式：stretch, fit, fill
    #[arg(long, value_name = "MODE")]
    bg_mode: Option<ResizeMode>,

    /// fit 模式的边框颜色
    #[arg(long, value_name = "COLOR")]
    border_color: Option<Color>,

    /// 不绘制时间、日期与 CPU 叠加层
    #[arg(long)]
    no_overlay: bool,

    /// 叠加层背板不透明度
    #[arg(long, value_name = "0-255", allow_negative_numbers = true)]
    overlay_opacity: Option<i64>,

    /// 叠加层文字颜色
    #[arg(long, value_name = "COLOR")]
    text_color: Option<Color>,

    /// 字体：fontconfig 模式、字体文件或 builtin
    #[arg(long, value_name = "FONT")]
    font: Option<FontRef>,

    /// 预设画面：matrix
    #[arg(long, value_name = "PRESET")]
    preset: Option<Preset>,

    /// 屏幕亮度
    #[arg(long, value_name = "0-100")]
    brightness: Option<u8>,

    /// 不发送帧开始 / 结束报文
    #[arg(long)]
    no_frame_markers: bool,

    /// ffmpeg 可执行文件
    #[arg(long, value_name = "PATH")]
    ffmpeg: Option<PathBuf>,

    /// H.264 CRF
    #[arg(long)]
    crf: Option<u8>,

    /// 配置文件路径
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// 列出 USB 设备后退出
    #[arg(long)]
    list_devices: bool,

    /// 输出示例配置后退出
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// 命令行中显式给出的设置。
    fn overrides(&self) -> AppConfig {
        AppConfig {
            rgb: self.rgb,
            fps: self.fps,
            bg: self.bg.clone(),
            bg_mode: self.bg_mode,
            border_color: self.border_color,
            overlay: self.no_overlay.then_some(false),
            overlay_opacity: self.overlay_opacity,
            text_color: self.text_color,
            font: self.font.clone(),
            preset: self.preset,
            brightness: self.brightness,
            frame_markers: self.no_frame_markers.then_some(false),
            ffmpeg: self.ffmpeg.clone(),
            crf: self.crf,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    if cli.print_config {
        print!("{}", EXAMPLE_CONFIG);
        return Ok(());
    }

    if cli.list_devices {
        list_devices();
        return Ok(());
    }

    let file_config = match cli.config.clone().or_else(find_config_file) {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    let settings = Settings::from_config(&file_config.merge(cli.overrides()))?;
    log::debug!("Settings: {:?}", settings);

    let source: Box<dyn FrameSource> = match settings.preset {
        Some(Preset::Matrix) => {
            log::info!("Using matrix preset");
            Box::new(MatrixRain::new(Typeface::resolve(&settings.overlay.font)?))
        }
        None => Box::new(FrameComposer::from_spec(
            settings.overlay.clone(),
            settings.background.as_deref(),
        )?),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        log::info!("Stopping...");
        flag.store(true, Ordering::SeqCst);
    })?;

    let mut orchestrator = Orchestrator::new(
        UsbConnector::default(),
        DeviceTransport::new(settings.transport_config()),
        source,
        Box::new(CommandEncoder::ffmpeg(settings.ffmpeg.clone(), settings.crf)),
        Box::new(SystemMetrics::new()),
        settings.loop_options(),
    );

    let context = orchestrator.run(&shutdown)?;
    log::info!("Sent {} frames", context.frames_sent);
    Ok(())
}

fn list_devices() {
    let devices = scan_devices();
    println!("Found {} devices:", devices.len());
    for (i, device) in devices.iter().enumerate() {
        let marker = if device.vid == USB_VID && device.pid == USB_PID {
            "<-- Galahad II LCD"
        } else {
            ""
        };
        println!("  [{}] {} {}", i, device.info, marker);
    }
}
