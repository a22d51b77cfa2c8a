//! Galahad LCD 库的系统指标采样。

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::modules::constants::TEMP_SENSORS;

/// 一次采样结果。
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// 采样时刻，日期也由它导出。
    pub timestamp: DateTime<Local>,
    /// CPU 占用率（0-100）。
    pub cpu_percent: f32,
    /// CPU 温度（摄氏度），没有传感器时为 `None`。
    pub cpu_temp: Option<f32>,
}

impl MetricsSnapshot {
    /// 当前时刻，其余字段为空。
    pub fn now() -> Self {
        Self { timestamp: Local::now(), cpu_percent: 0.0, cpu_temp: None }
    }

    /// `HH:MM:SS`
    pub fn clock_text(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }

    /// `DD.MM.YYYY`
    pub fn date_text(&self) -> String {
        self.timestamp.format("%d.%m.%Y").to_string()
    }

    pub fn cpu_text(&self) -> String {
        format!("{}%", self.cpu_percent.clamp(0.0, 100.0) as u32)
    }

    pub fn temperature_text(&self) -> String {
        match self.cpu_temp {
            Some(t) => format!("{}°C", t as i32),
            None => "N/A".to_string(),
        }
    }
}

/// 指标来源。
pub trait MetricsSource {
    fn sample(&mut self) -> MetricsSnapshot;
}

/// `/proc/stat` 中 cpu 行的累计时间。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

impl CpuTimes {
    /// 解析 `/proc/stat` 的汇总 cpu 行。
    pub fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().find(|l| l.starts_with("cpu "))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(|f| f.parse().ok())
            .collect::<Option<_>>()?;
        if fields.len() < 4 {
            return None;
        }
        // user nice system idle iowait irq softirq steal
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Some(Self { idle, total: fields.iter().sum() })
    }

    /// 两次采样之间的占用率。
    pub fn usage_since(&self, earlier: &CpuTimes) -> f32 {
        let total = self.total.saturating_sub(earlier.total);
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle.saturating_sub(earlier.idle).min(total);
        (100.0 * (total - idle) as f64 / total as f64) as f32
    }
}

/// 在 hwmon 目录下按优先级查找 CPU 温度传感器。
pub fn find_temp_sensor(hwmon_root: &Path) -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(hwmon_root)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    dirs.sort();

    for sensor in TEMP_SENSORS {
        for dir in &dirs {
            let name = match fs::read_to_string(dir.join("name")) {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name.trim() == sensor {
                let input = dir.join("temp1_input");
                if input.exists() {
                    return Some(input);
                }
            }
        }
    }
    None
}

/// 读取毫摄氏度温度文件。
fn read_millidegrees(path: &Path) -> Option<f32> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse::<f32>().ok().map(|m| m / 1000.0)
}

/// 从 procfs / sysfs 采样的系统指标。
#[derive(Debug)]
pub struct SystemMetrics {
    stat_path: PathBuf,
    temp_input: Option<PathBuf>,
    last: Option<CpuTimes>,
}

impl SystemMetrics {
    pub fn new() -> Self {
        Self::with_paths("/proc/stat", "/sys/class/hwmon")
    }

    /// 指定 stat 文件与 hwmon 目录，构造时记录 CPU 基线。
    pub fn with_paths<P: Into<PathBuf>, Q: AsRef<Path>>(stat_path: P, hwmon_root: Q) -> Self {
        let stat_path = stat_path.into();
        let temp_input = find_temp_sensor(hwmon_root.as_ref());
        match &temp_input {
            Some(path) => log::info!("CPU temperature sensor: {}", path.display()),
            None => log::info!("No CPU temperature sensor found"),
        }
        let last = Self::read_times(&stat_path);
        Self { stat_path, temp_input, last }
    }

    fn read_times(path: &Path) -> Option<CpuTimes> {
        match fs::read_to_string(path) {
            Ok(stat) => CpuTimes::parse(&stat),
            Err(e) => {
                log::debug!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SystemMetrics {
    fn sample(&mut self) -> MetricsSnapshot {
        let current = Self::read_times(&self.stat_path);
        let cpu_percent = match (&self.last, &current) {
            (Some(last), Some(now)) => now.usage_since(last),
            _ => 0.0,
        };
        if current.is_some() {
            self.last = current;
        }

        MetricsSnapshot {
            timestamp: Local::now(),
            cpu_percent,
            cpu_temp: self.temp_input.as_deref().and_then(read_millidegrees),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const STAT_A: &str = concat!(
        "cpu  100 0 100 800 0 0 0 0 0 0\n",
        "cpu0 50 0 50 400 0 0 0 0 0 0\n",
        "intr 1 2 3\n"
    );
    const STAT_B: &str = concat!(
        "cpu  250 0 150 900 0 0 0 0 0 0\n",
        "cpu0 125 0 75 450 0 0 0 0 0 0\n",
        "intr 1 2 3\n"
    );

    #[test]
    fn parses_aggregate_cpu_line() {
        let times = CpuTimes::parse(STAT_A).unwrap();
        assert_eq!(times, CpuTimes { idle: 800, total: 1000 });
        assert!(CpuTimes::parse("intr 1 2 3").is_none());
        assert!(CpuTimes::parse("cpu  a b c d").is_none());
    }

    #[test]
    fn iowait_counts_as_idle() {
        let times = CpuTimes::parse("cpu  10 0 10 50 30 0 0 0").unwrap();
        assert_eq!(times, CpuTimes { idle: 80, total: 100 });
    }

    #[test]
    fn usage_from_delta() {
        let a = CpuTimes::parse(STAT_A).unwrap();
        let b = CpuTimes::parse(STAT_B).unwrap();
        // 300 个时间片中 100 个空闲
        assert!((b.usage_since(&a) - 66.666).abs() < 0.01);
        assert_eq!(a.usage_since(&a), 0.0);
        assert_eq!(a.usage_since(&b), 0.0);
    }

    #[test]
    fn samples_cpu_and_temperature_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let stat = dir.path().join("stat");
        fs::write(&stat, STAT_A).unwrap();

        let hwmon = dir.path().join("hwmon");
        for (node, name) in [("hwmon0", "nvme"), ("hwmon1", "k10temp"), ("hwmon2", "acpitz")] {
            let node = hwmon.join(node);
            fs::create_dir_all(&node).unwrap();
            fs::write(node.join("name"), format!("{name}\n")).unwrap();
            fs::write(node.join("temp1_input"), "45500\n").unwrap();
        }
        fs::write(hwmon.join("hwmon0").join("temp1_input"), "30000\n").unwrap();

        let mut metrics = SystemMetrics::with_paths(&stat, &hwmon);
        fs::write(&stat, STAT_B).unwrap();
        let snapshot = metrics.sample();

        assert!((snapshot.cpu_percent - 66.666).abs() < 0.01);
        assert_eq!(snapshot.cpu_temp, Some(45.5));
        assert_eq!(snapshot.temperature_text(), "45°C");
        assert_eq!(snapshot.cpu_text(), "66%");

        // 没有新数据时占用率为 0
        assert_eq!(metrics.sample().cpu_percent, 0.0);
    }

    #[test]
    fn coretemp_wins_over_k10temp() {
        let dir = tempfile::tempdir().unwrap();
        let sensors = [("hwmon0", "k10temp", "50000"), ("hwmon3", "coretemp", "61000")];
        for (node, name, value) in sensors {
            let node = dir.path().join(node);
            fs::create_dir_all(&node).unwrap();
            fs::write(node.join("name"), name).unwrap();
            fs::write(node.join("temp1_input"), value).unwrap();
        }
        let sensor = find_temp_sensor(dir.path()).unwrap();
        assert!(sensor.ends_with("hwmon3/temp1_input"));
    }

    #[test]
    fn missing_sources_degrade_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let mut metrics =
            SystemMetrics::with_paths(dir.path().join("nope"), dir.path().join("none"));
        let snapshot = metrics.sample();
        assert_eq!(snapshot.cpu_percent, 0.0);
        assert_eq!(snapshot.cpu_temp, None);
        assert_eq!(snapshot.temperature_text(), "N/A");
    }

    #[test]
    fn formats_clock_and_date() {
        let snapshot = MetricsSnapshot {
            timestamp: Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).single().unwrap(),
            cpu_percent: 99.9,
            cpu_temp: Some(-3.7),
        };
        assert_eq!(snapshot.clock_text(), "03:04:05");
        assert_eq!(snapshot.date_text(), "02.01.2025");
        assert_eq!(snapshot.cpu_text(), "99%");
        assert_eq!(snapshot.temperature_text(), "-3°C");
    }
}
