// 该文件是 Zhijian （智检） 项目的一部分。
// src/config.rs - 工位配置与检测任务描述
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 两类配置：
//!
//! * 工位配置（TOML）：日志、相机、IO 板、结果目录，启动时加载一次；
//! * 检测任务描述（JSON）：任务名、模型与检测目标，每次开始检测会话时加载并校验。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::model::BBox;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("解析工位配置失败: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("生成默认工位配置失败: {0}")]
  TomlWrite(#[from] toml::ser::Error),
  #[error("解析任务描述失败: {0}")]
  Json(#[from] serde_json::Error),
  #[error("任务描述为空")]
  EmptyTask,
  #[error("配置无效: {0}")]
  Invalid(String),
}

impl ConfigError {
  pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
    ConfigError::Io {
      path: path.to_path_buf(),
      source,
    }
  }

  fn invalid(msg: impl Into<String>) -> Self {
    ConfigError::Invalid(msg.into())
  }
}

/// 工位配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
  pub logging: LoggingSettings,
  pub camera: CameraSettings,
  pub plc: PlcSettings,
  pub inference: InferenceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
  /// `tracing_subscriber::EnvFilter` 指令，例如 `info` 或 `zhijian=debug`
  pub level: String,
  /// 日志文件目录，按天滚动写入 `app.YYYY-MM-DD.log`
  pub dir: PathBuf,
  /// 保留的日志文件个数
  pub keep_files: usize,
}

impl Default for LoggingSettings {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      dir: PathBuf::from("log"),
      keep_files: 30,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
  /// 采集来源，`http(s)://` 为网络相机快照接口，`image://` 为本地图片或目录
  pub url: String,
  pub username: String,
  pub password: String,
  /// 原始照片归档目录
  pub photo_dir: PathBuf,
  /// 是否归档原始照片
  pub save_raw: bool,
}

impl CameraSettings {
  pub fn source_url(&self) -> Result<Url, ConfigError> {
    Url::parse(&self.url)
      .map_err(|e| ConfigError::invalid(format!("相机地址 '{}' 无效: {}", self.url, e)))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcSettings {
  pub ip: String,
  pub port: u16,
  pub unit_id: u8,
  /// 触发信号所在的输入位（0-7）
  pub trigger_bit: u16,
  pub result_ok_bit: u16,
  pub result_ng_bit: u16,
  /// 心跳输出位，未配置时不发心跳
  pub heartbeat_bit: Option<u16>,
  /// 轮询间隔，单位秒
  pub interval: f64,
}

impl Default for PlcSettings {
  fn default() -> Self {
    Self {
      ip: String::new(),
      port: 10000,
      unit_id: 1,
      trigger_bit: 0,
      result_ok_bit: 0,
      result_ng_bit: 1,
      heartbeat_bit: None,
      interval: 1.0,
    }
  }
}

impl PlcSettings {
  /// 轮询间隔，超出 `Duration` 表示范围时退回默认的 1 秒
  pub fn poll_interval(&self) -> Duration {
    Duration::try_from_secs_f64(self.interval).unwrap_or(Duration::from_secs(1))
  }

  pub fn bit_map(&self) -> BitMap {
    BitMap {
      trigger: self.trigger_bit,
      result_ok: self.result_ok_bit,
      result_ng: self.result_ng_bit,
      heartbeat: self.heartbeat_bit,
    }
  }
}

/// IO 板各信号的位地址
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitMap {
  pub trigger: u16,
  pub result_ok: u16,
  pub result_ng: u16,
  pub heartbeat: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
  /// 检测结果根目录
  pub result_dir: PathBuf,
  /// 任务描述文件
  pub task: PathBuf,
}

impl Default for InferenceSettings {
  fn default() -> Self {
    Self {
      result_dir: PathBuf::from("results"),
      task: PathBuf::from("config/setting.json"),
    }
  }
}

impl StationConfig {
  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    let config: StationConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    let config = Self::from_toml_str(&text)?;
    info!("成功加载工位配置: {}", path.display());
    Ok(config)
  }

  /// 加载工位配置，文件不存在时写出一份默认配置
  pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
    if path.exists() {
      return Self::load(path);
    }

    warn!("工位配置 {} 不存在，生成默认配置", path.display());
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
    }
    let config = StationConfig::default();
    let text = toml::to_string_pretty(&config)?;
    std::fs::write(path, text).map_err(|e| ConfigError::io(path, e))?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let plc = &self.plc;
    if plc.trigger_bit >= 8 {
      return Err(ConfigError::invalid(format!(
        "触发位 {} 超出输入范围 0-7",
        plc.trigger_bit
      )));
    }
    if plc.result_ok_bit == plc.result_ng_bit {
      return Err(ConfigError::invalid("OK 位与 NG 位不能相同"));
    }
    if !(plc.interval.is_finite() && plc.interval > 0.0) {
      return Err(ConfigError::invalid(format!(
        "轮询间隔 {} 必须为正数",
        plc.interval
      )));
    }
    Duration::try_from_secs_f64(plc.interval).map_err(|e| {
      ConfigError::invalid(format!("轮询间隔 {} 无效: {}", plc.interval, e))
    })?;
    if self.logging.keep_files == 0 {
      return Err(ConfigError::invalid("日志保留个数至少为 1"));
    }
    Ok(())
  }
}

/// 一个检测目标：标签、预设区域、合格阈值与显示颜色
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSpec {
  pub label: String,
  pub region: BBox,
  pub pass_threshold: f32,
  /// 预留给二次检测的阈值
  pub refine_threshold: Option<f32>,
  pub color: [u8; 3],
}

impl TargetSpec {
  pub fn new(label: impl Into<String>, region: BBox, pass_threshold: f32, color: [u8; 3]) -> Self {
    Self {
      label: label.into(),
      region,
      pass_threshold,
      refine_threshold: None,
      color,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
  pub path: Url,
  /// 模型输出的最低置信度
  pub conf: f32,
}

/// 校验后的检测任务描述，会话开始后不再改变
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
  pub task_name: String,
  /// 第一个为主模型，其余为预留的二次模型
  pub models: Vec<ModelSpec>,
  pub targets: Arc<[TargetSpec]>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFile {
  One(RawTask),
  Many(Vec<RawTask>),
}

#[derive(Deserialize)]
struct RawTask {
  task_name: String,
  #[serde(default)]
  model: Vec<RawModel>,
  #[serde(default)]
  targets: Vec<RawTarget>,
}

#[derive(Deserialize)]
struct RawModel {
  path: String,
  #[serde(default = "default_model_conf")]
  conf: f32,
}

fn default_model_conf() -> f32 {
  0.2
}

#[derive(Deserialize)]
struct RawTarget {
  label: String,
  conf1: f32,
  #[serde(default)]
  conf2: Option<f32>,
  color: [u8; 3],
  predefined_region: BBox,
}

fn check_unit_interval(name: &str, value: f32) -> Result<(), ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::invalid(format!(
      "{} 的值 {} 超出范围 [0, 1]",
      name, value
    )))
  }
}

impl TryFrom<RawTask> for TaskDescriptor {
  type Error = ConfigError;

  fn try_from(raw: RawTask) -> Result<Self, Self::Error> {
    if raw.task_name.trim().is_empty() {
      return Err(ConfigError::invalid("task_name 不能为空"));
    }
    if raw.model.is_empty() {
      return Err(ConfigError::invalid("至少需要配置一个模型"));
    }

    let models = raw
      .model
      .into_iter()
      .map(|m| {
        check_unit_interval("model.conf", m.conf)?;
        let path = Url::parse(&m.path)
          .map_err(|e| ConfigError::invalid(format!("模型路径 '{}' 无效: {}", m.path, e)))?;
        Ok(ModelSpec { path, conf: m.conf })
      })
      .collect::<Result<Vec<_>, ConfigError>>()?;

    let targets = raw
      .targets
      .into_iter()
      .map(|t| {
        check_unit_interval(&format!("{}.conf1", t.label), t.conf1)?;
        if let Some(conf2) = t.conf2 {
          check_unit_interval(&format!("{}.conf2", t.label), conf2)?;
        }
        let [x1, y1, x2, y2] = t.predefined_region;
        if !(x1 <= x2 && y1 <= y2) {
          return Err(ConfigError::invalid(format!(
            "目标 {} 的预设区域 {:?} 无效",
            t.label, t.predefined_region
          )));
        }
        Ok(TargetSpec {
          label: t.label,
          region: t.predefined_region,
          pass_threshold: t.conf1,
          refine_threshold: t.conf2,
          color: t.color,
        })
      })
      .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(TaskDescriptor {
      task_name: raw.task_name,
      models,
      targets: targets.into(),
    })
  }
}

impl TaskDescriptor {
  pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
    let raw = match serde_json::from_str::<TaskFile>(text)? {
      TaskFile::One(task) => task,
      TaskFile::Many(tasks) => tasks.into_iter().next().ok_or(ConfigError::EmptyTask)?,
    };
    TaskDescriptor::try_from(raw)
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    let task = Self::from_json_str(&text)?;
    info!(
      "成功加载任务描述 {}: {} 个模型, {} 个检测目标",
      task.task_name,
      task.models.len(),
      task.targets.len()
    );
    Ok(task)
  }

  pub fn primary_model(&self) -> &ModelSpec {
    // 校验保证至少有一个模型
    &self.models[0]
  }
}
