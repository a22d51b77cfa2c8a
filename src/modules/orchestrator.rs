//! Galahad LCD 库的主循环。
//!
//! 每个周期依次执行：采样指标 → 渲染 → 编码 → 发送。任何一步失败只跳过当前周期，
//! 设备丢失时按退避策略重新打开，重新打开仍失败才终止。

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::modules::constants::{DEFAULT_FPS, REOPEN_ATTEMPTS, REOPEN_BACKOFF, USB_PID, USB_VID};
use crate::modules::encoder::Encoder;
use crate::modules::error::{ErrorClass, LcdError};
use crate::modules::frame::FrameSource;
use crate::modules::metrics::MetricsSource;
use crate::modules::transport::{DeviceTransport, SendReport};
use crate::modules::types::Color;
use crate::modules::usb::Connector;

/// 休眠时检查退出标志的间隔。
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// 主循环参数。
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// 周期间隔（1 / fps）。
    pub interval: Duration,
    /// 启动及重新连接后设置的水泵灯光颜色。
    pub pump_color: Option<Color>,
    /// 启动时设置的亮度。
    pub brightness: Option<u8>,
    /// 打开设备的尝试次数。
    pub reopen_attempts: u32,
    /// 首次重试前的等待，之后每次翻倍。
    pub reopen_backoff: Duration,
}

impl LoopOptions {
    /// 按帧率构造。
    pub fn from_fps(fps: f64) -> Self {
        Self { interval: Duration::from_secs_f64(1.0 / fps), ..Self::default() }
    }
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / DEFAULT_FPS),
            pump_color: None,
            brightness: None,
            reopen_attempts: REOPEN_ATTEMPTS,
            reopen_backoff: REOPEN_BACKOFF,
        }
    }
}

/// 运行统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunContext {
    /// 已执行的周期数。
    pub ticks: u64,
    /// 成功发送的帧数。
    pub frames_sent: u64,
    /// 因错误跳过的周期数。
    pub skipped: u64,
    /// 设备重新打开次数。
    pub reopens: u64,
}

/// 单个周期的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 帧已送达设备。
    Sent(SendReport),
    /// 本周期被跳过。
    Skipped(ErrorClass),
    /// 设备丢失，已重新打开；本周期的帧被丢弃。
    Reopened,
}

/// 未接入退出信号时使用的标志，永远不会被置位。
static NEVER: AtomicBool = AtomicBool::new(false);

/// 休眠直到 `duration` 过去或 `shutdown` 被置位。被打断时返回 `true`。
fn sleep_unless(duration: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// 带退避地打开设备。
///
/// 只有设备类错误（未找到、被占用）会重试，其它错误立即返回。
/// 等待期间 `shutdown` 被置位时返回 [`LcdError::Interrupted`]。
pub fn open_with_backoff<C: Connector>(
    connector: &mut C,
    attempts: u32,
    backoff: Duration,
    shutdown: &AtomicBool,
) -> Result<C::Link, LcdError> {
    let attempts = attempts.max(1);
    let mut delay = backoff;
    let mut last = None;

    for attempt in 1..=attempts {
        match connector.connect() {
            Ok(link) => return Ok(link),
            Err(e) if e.class() == ErrorClass::Device => {
                log::warn!("Open attempt {}/{} failed: {}", attempt, attempts, e);
                last = Some(e);
                if attempt < attempts {
                    if sleep_unless(delay, shutdown) {
                        log::info!("Open interrupted by shutdown");
                        return Err(LcdError::Interrupted);
                    }
                    delay *= 2;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(last.unwrap_or(LcdError::DeviceNotFound(USB_VID, USB_PID)))
}

/// 渲染、编码与发送的调度者。持有唯一的设备连接。
pub struct Orchestrator<C: Connector> {
    connector: C,
    link: Option<C::Link>,
    transport: DeviceTransport,
    source: Box<dyn FrameSource>,
    encoder: Box<dyn Encoder>,
    metrics: Box<dyn MetricsSource>,
    options: LoopOptions,
    context: RunContext,
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(
        connector: C,
        transport: DeviceTransport,
        source: Box<dyn FrameSource>,
        encoder: Box<dyn Encoder>,
        metrics: Box<dyn MetricsSource>,
        options: LoopOptions,
    ) -> Self {
        Self {
            connector,
            link: None,
            transport,
            source,
            encoder,
            metrics,
            options,
            context: RunContext::default(),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn options(&self) -> &LoopOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// 打开设备并应用初始设置。
    pub fn start(&mut self) -> Result<(), LcdError> {
        self.start_until(&NEVER)
    }

    fn start_until(&mut self, shutdown: &AtomicBool) -> Result<(), LcdError> {
        let link = open_with_backoff(
            &mut self.connector,
            self.options.reopen_attempts,
            self.options.reopen_backoff,
            shutdown,
        )?;
        self.link = Some(link);
        self.apply_settings();
        log::info!("Panel ready, refreshing every {:?}", self.options.interval);
        Ok(())
    }

    /// 执行一个周期。只有致命错误（设备无法重新打开）才返回 `Err`。
    pub fn tick(&mut self) -> Result<TickOutcome, LcdError> {
        self.tick_until(&NEVER)
    }

    fn tick_until(&mut self, shutdown: &AtomicBool) -> Result<TickOutcome, LcdError> {
        self.context.ticks += 1;

        if self.link.is_none() {
            self.reconnect(shutdown)?;
        }

        let snapshot = self.metrics.sample();
        let frame = self.source.render(&snapshot);
        let stream = match self.encoder.encode(&frame) {
            Ok(stream) => stream,
            Err(e) => return self.skip(e),
        };

        let result = match self.link.as_mut() {
            Some(link) => self.transport.send(link, &stream),
            None => Err(LcdError::DeviceNotFound(USB_VID, USB_PID)),
        };

        match result {
            Ok(report) => {
                self.context.frames_sent += 1;
                Ok(TickOutcome::Sent(report))
            }
            Err(e) if e.class() == ErrorClass::Device => {
                log::warn!("Device lost: {}", e);
                self.context.skipped += 1;
                self.reconnect(shutdown)?;
                Ok(TickOutcome::Reopened)
            }
            Err(e) => self.skip(e),
        }
    }

    /// 运行直到 `shutdown` 被置位，返回运行统计。
    ///
    /// 打开设备的退避等待同样响应 `shutdown`。
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<RunContext, LcdError> {
        let opened = if self.link.is_none() {
            self.start_until(shutdown)
        } else {
            Ok(())
        };
        let result = opened.and_then(|()| self.run_loop(shutdown));

        self.shutdown();
        match result {
            Ok(()) | Err(LcdError::Interrupted) => Ok(self.context),
            Err(e) => Err(e),
        }
    }

    fn run_loop(&mut self, shutdown: &AtomicBool) -> Result<(), LcdError> {
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.tick_until(shutdown)?;
            let remaining = self.options.interval.saturating_sub(started.elapsed());
            sleep_unless(remaining, shutdown);
        }
        Ok(())
    }

    /// 释放设备。
    pub fn shutdown(&mut self) {
        if self.link.take().is_some() {
            log::info!("Panel released");
        }
        let ctx = &self.context;
        log::info!(
            "Run finished: {} ticks, {} frames sent, {} skipped, {} reopens",
            ctx.ticks,
            ctx.frames_sent,
            ctx.skipped,
            ctx.reopens
        );
    }

    fn skip(&mut self, e: LcdError) -> Result<TickOutcome, LcdError> {
        let class = e.class();
        if class == ErrorClass::Fatal {
            return Err(e);
        }
        log::warn!("Tick {} skipped ({:?}): {}", self.context.ticks, class, e);
        self.context.skipped += 1;
        Ok(TickOutcome::Skipped(class))
    }

    fn reconnect(&mut self, shutdown: &AtomicBool) -> Result<(), LcdError> {
        // 先释放旧连接，内核驱动会被重新挂载
        self.link = None;
        let attempts = self.options.reopen_attempts;
        let link = open_with_backoff(
            &mut self.connector,
            attempts,
            self.options.reopen_backoff,
            shutdown,
        )
        .map_err(|e| {
            if !matches!(e, LcdError::Interrupted) {
                log::error!("Giving up on panel after {} attempts: {}", attempts, e);
            }
            e
        })?;
        self.link = Some(link);
        self.context.reopens += 1;
        log::info!("Panel reopened");
        self.apply_settings();
        Ok(())
    }

    /// 水泵颜色与亮度。失败只记录警告。
    fn apply_settings(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if let Some(color) = self.options.pump_color {
            if let Err(e) = self.transport.set_pump_color(link, color) {
                log::warn!("Failed to set pump color: {}", e);
            }
        }
        if let Some(level) = self.options.brightness {
            if let Err(e) = self.transport.set_brightness(link, level) {
                log::warn!("Failed to set brightness: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::modules::encoder::EncodedStream;
    use crate::modules::frame::Frame;
    use crate::modules::metrics::MetricsSnapshot;
    use crate::modules::transport::tests::{quick_config, RecordingLink};

    /// 按顺序返回预设结果的连接器。
    struct ScriptedConnector {
        results: Vec<Result<(), LcdError>>,
        calls: usize,
    }

    impl ScriptedConnector {
        fn new(results: Vec<Result<(), LcdError>>) -> Self {
            Self { results, calls: 0 }
        }
    }

    impl Connector for ScriptedConnector {
        type Link = RecordingLink;

        fn connect(&mut self) -> Result<RecordingLink, LcdError> {
            self.calls += 1;
            if self.results.is_empty() {
                return Ok(RecordingLink::default());
            }
            self.results.remove(0).map(|()| RecordingLink::default())
        }
    }

    #[test]
    fn backoff_retries_device_errors() {
        let mut connector = ScriptedConnector::new(vec![
            Err(LcdError::DeviceBusy),
            Err(LcdError::DeviceNotFound(1, 2)),
        ]);
        assert!(open_with_backoff(&mut connector, 3, Duration::ZERO, &NEVER).is_ok());
        assert_eq!(connector.calls, 3);
    }

    #[test]
    fn backoff_gives_up_with_last_error() {
        let mut connector = ScriptedConnector::new(vec![
            Err(LcdError::DeviceNotFound(1, 2)),
            Err(LcdError::DeviceNotFound(1, 2)),
            Err(LcdError::DeviceBusy),
        ]);
        let err = open_with_backoff(&mut connector, 3, Duration::ZERO, &NEVER).unwrap_err();
        assert!(matches!(err, LcdError::DeviceBusy));
        assert_eq!(connector.calls, 3);
    }

    #[test]
    fn backoff_does_not_retry_other_errors() {
        let mut connector = ScriptedConnector::new(vec![Err(LcdError::Usb("no context".into()))]);
        assert!(matches!(
            open_with_backoff(&mut connector, 3, Duration::ZERO, &NEVER),
            Err(LcdError::Usb(_))
        ));
        assert_eq!(connector.calls, 1);
    }

    #[test]
    fn backoff_waits_between_attempts() {
        let mut connector =
            ScriptedConnector::new(vec![Err(LcdError::DeviceBusy), Err(LcdError::DeviceBusy)]);
        let started = Instant::now();
        open_with_backoff(&mut connector, 3, Duration::from_millis(10), &NEVER).unwrap();
        // 10ms + 20ms
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn options_follow_fps() {
        assert_eq!(LoopOptions::from_fps(4.0).interval, Duration::from_millis(250));
        assert_eq!(LoopOptions::default().interval, Duration::from_millis(200));
        assert_eq!(LoopOptions::default().reopen_attempts, 3);
    }

    struct Solid;

    impl FrameSource for Solid {
        fn render(&mut self, _: &MetricsSnapshot) -> Frame {
            Frame::blank(Color::Black)
        }
    }

    /// 固定输出；编码到第 `stop_after` 帧时置位退出标志。
    struct Fixed {
        calls: u64,
        stop_after: Option<(u64, Arc<AtomicBool>)>,
    }

    impl Fixed {
        fn new() -> Self {
            Self { calls: 0, stop_after: None }
        }
    }

    impl Encoder for Fixed {
        fn encode(&mut self, _: &Frame) -> Result<EncodedStream, LcdError> {
            self.calls += 1;
            if let Some((limit, flag)) = &self.stop_after {
                if self.calls >= *limit {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            Ok(EncodedStream::new(vec![1; 2000]))
        }
    }

    struct Idle;

    impl MetricsSource for Idle {
        fn sample(&mut self) -> MetricsSnapshot {
            MetricsSnapshot::now()
        }
    }

    /// 每次连接都报告设备被占用，并在此时置位退出标志。
    struct BusyUntilShutdown {
        flag: Arc<AtomicBool>,
        calls: usize,
    }

    impl Connector for BusyUntilShutdown {
        type Link = RecordingLink;

        fn connect(&mut self) -> Result<RecordingLink, LcdError> {
            self.calls += 1;
            self.flag.store(true, Ordering::SeqCst);
            Err(LcdError::DeviceBusy)
        }
    }

    fn options() -> LoopOptions {
        LoopOptions { reopen_backoff: Duration::ZERO, ..LoopOptions::from_fps(1000.0) }
    }

    fn orchestrator_with<C: Connector>(
        connector: C,
        encoder: Fixed,
        options: LoopOptions,
    ) -> Orchestrator<C> {
        Orchestrator::new(
            connector,
            DeviceTransport::new(quick_config()),
            Box::new(Solid),
            Box::new(encoder),
            Box::new(Idle),
            options,
        )
    }

    fn orchestrator(connector: ScriptedConnector) -> Orchestrator<ScriptedConnector> {
        orchestrator_with(connector, Fixed::new(), options())
    }

    #[test]
    fn tick_sends_frame() {
        let mut orch = orchestrator(ScriptedConnector::new(Vec::new()));
        orch.start().unwrap();
        let outcome = orch.tick().unwrap();
        assert_eq!(outcome, TickOutcome::Sent(SendReport { chunks: 2, reports: 4, retries: 0 }));
        assert_eq!(orch.context().frames_sent, 1);
        assert_eq!(orch.context().reopens, 0);
    }

    #[test]
    fn startup_failure_is_fatal() {
        let mut orch = orchestrator(ScriptedConnector::new(vec![
            Err(LcdError::DeviceBusy),
            Err(LcdError::DeviceBusy),
            Err(LcdError::DeviceBusy),
        ]));
        assert!(matches!(orch.start(), Err(LcdError::DeviceBusy)));
        assert!(!orch.is_connected());
    }

    #[test]
    fn run_stops_on_shutdown_flag() {
        let mut orch = orchestrator(ScriptedConnector::new(Vec::new()));
        let shutdown = AtomicBool::new(true);
        let ctx = orch.run(&shutdown).unwrap();
        assert_eq!(ctx.ticks, 0);
        assert!(!orch.is_connected());
    }

    #[test]
    fn run_ticks_until_shutdown_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let encoder = Fixed { calls: 0, stop_after: Some((3, Arc::clone(&flag))) };
        let mut orch = orchestrator_with(ScriptedConnector::new(Vec::new()), encoder, options());

        let ctx = orch.run(&flag).unwrap();
        assert_eq!((ctx.ticks, ctx.frames_sent, ctx.skipped), (3, 3, 0));
        assert!(!orch.is_connected());
    }

    #[test]
    fn shutdown_interrupts_open_backoff() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut connector = BusyUntilShutdown { flag: Arc::clone(&flag), calls: 0 };
        let started = Instant::now();

        let result = open_with_backoff(&mut connector, 3, Duration::from_secs(30), &flag);
        assert!(matches!(result, Err(LcdError::Interrupted)));
        assert_eq!(connector.calls, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn run_returns_quietly_when_stopped_during_startup() {
        let flag = Arc::new(AtomicBool::new(false));
        let connector = BusyUntilShutdown { flag: Arc::clone(&flag), calls: 0 };
        let slow = LoopOptions { reopen_backoff: Duration::from_secs(30), ..options() };
        let mut orch = orchestrator_with(connector, Fixed::new(), slow);

        let started = Instant::now();
        let ctx = orch.run(&flag).unwrap();
        assert_eq!(ctx, RunContext::default());
        assert!(!orch.is_connected());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
