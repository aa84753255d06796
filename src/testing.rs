// 该文件是 Zhijian （智检） 项目的一部分。
// src/testing.rs - 单元测试用的假设备
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

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use image::RgbImage;

use crate::{
  config::{ConfigError, TaskDescriptor},
  fieldbus::{BoxedIo, DiscreteIo, INPUT_BITS, IoLinkError},
  frame::Frame,
  input::{CaptureError, CaptureSource},
  model::{BoxedModel, DetectionModel, ModelError, RawDetection},
  session::Devices,
  task::Cancel,
};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

/// 单目标任务：scratch 位于整幅图像内，阈值 0.5
pub fn task() -> TaskDescriptor {
  TaskDescriptor::from_json_str(
    r#"{
      "task_name": "bracket",
      "model": [{"path": "record:///unused"}],
      "targets": [
        {"label": "scratch", "conf1": 0.5, "color": [0, 255, 0], "predefined_region": [0, 0, 64, 48]}
      ]
    }"#,
  )
  .unwrap()
}

pub fn passing() -> Vec<RawDetection> {
  vec![RawDetection::new("scratch", [8.0, 8.0, 32.0, 32.0], 0.9)]
}

pub fn failing() -> Vec<RawDetection> {
  vec![RawDetection::new("scratch", [8.0, 8.0, 32.0, 32.0], 0.2)]
}

#[derive(Clone, Default)]
pub struct FakeCamera {
  pub shots: Arc<AtomicUsize>,
  pub delay: Duration,
  pub broken: bool,
  /// 每次开始采集时通知
  pub started: Option<Sender<()>>,
}

impl FakeCamera {
  pub fn shots(&self) -> usize {
    self.shots.load(Ordering::SeqCst)
  }
}

impl CaptureSource for FakeCamera {
  fn get_frame(&mut self) -> Result<Frame, CaptureError> {
    if let Some(started) = &self.started {
      let _ = started.send(());
    }
    thread::sleep(self.delay);
    if self.broken {
      return Err(CaptureError::InvalidSource("相机离线".to_string()));
    }
    self.shots.fetch_add(1, Ordering::SeqCst);
    Ok(Frame::now(RgbImage::new(WIDTH, HEIGHT)))
  }
}

#[derive(Default)]
pub struct IoLog {
  /// 依次返回的触发位电平，用完后保持低电平
  pub levels: VecDeque<bool>,
  pub writes: Vec<(u16, bool)>,
  pub connects: usize,
  pub closed: bool,
}

/// 按脚本返回触发电平并记录所有写操作
#[derive(Clone, Default)]
pub struct ScriptedIo {
  pub log: Arc<Mutex<IoLog>>,
  pub trigger: usize,
}

impl ScriptedIo {
  pub fn new(levels: &[bool]) -> Self {
    let io = Self::default();
    io.log.lock().unwrap().levels = levels.iter().copied().collect();
    io
  }

  pub fn writes(&self) -> Vec<(u16, bool)> {
    self.log.lock().unwrap().writes.clone()
  }

  pub fn closed(&self) -> bool {
    self.log.lock().unwrap().closed
  }
}

impl DiscreteIo for ScriptedIo {
  fn connect(&mut self) -> bool {
    self.log.lock().unwrap().connects += 1;
    true
  }

  fn read_bits(&mut self) -> Result<[bool; INPUT_BITS], IoLinkError> {
    let level = self.log.lock().unwrap().levels.pop_front().unwrap_or(false);
    let mut bits = [false; INPUT_BITS];
    bits[self.trigger] = level;
    Ok(bits)
  }

  fn write_bit(&mut self, address: u16, value: bool) -> Result<(), IoLinkError> {
    self.log.lock().unwrap().writes.push((address, value));
    Ok(())
  }

  fn close(&mut self) {
    self.log.lock().unwrap().closed = true;
  }
}

/// 读取可按脚本失败、写入总是失败的 IO 板
#[derive(Clone, Default)]
pub struct FailingIo {
  /// `None` 表示该次读取失败
  pub reads: Arc<Mutex<VecDeque<Option<bool>>>>,
  pub write_attempts: Arc<AtomicUsize>,
}

impl FailingIo {
  pub fn new(reads: &[Option<bool>]) -> Self {
    let io = Self::default();
    io.reads.lock().unwrap().extend(reads.iter().copied());
    io
  }

  pub fn write_attempts(&self) -> usize {
    self.write_attempts.load(Ordering::SeqCst)
  }
}

impl DiscreteIo for FailingIo {
  fn connect(&mut self) -> bool {
    false
  }

  fn read_bits(&mut self) -> Result<[bool; INPUT_BITS], IoLinkError> {
    match self.reads.lock().unwrap().pop_front().flatten() {
      Some(level) => {
        let mut bits = [false; INPUT_BITS];
        bits[0] = level;
        Ok(bits)
      }
      None => Err(IoLinkError::ConnectFailed("127.0.0.1:10000".to_string())),
    }
  }

  fn write_bit(&mut self, _address: u16, _value: bool) -> Result<(), IoLinkError> {
    self.write_attempts.fetch_add(1, Ordering::SeqCst);
    Err(IoLinkError::Exception {
      function: 0x05,
      code: 0x02,
    })
  }

  fn close(&mut self) {}
}

pub struct FixedModel(pub Vec<RawDetection>);

impl DetectionModel for FixedModel {
  fn predict(&mut self, _: &RgbImage) -> Result<Vec<RawDetection>, ModelError> {
    Ok(self.0.clone())
  }
}

pub struct BrokenModel;

impl DetectionModel for BrokenModel {
  fn predict(&mut self, _: &RgbImage) -> Result<Vec<RawDetection>, ModelError> {
    Err(ModelError::Inference("推理服务不可用".to_string()))
  }
}

/// 执行固定次数迭代后停止
pub struct CountingCancel(pub usize);

impl Cancel for CountingCancel {
  fn is_stopped(&mut self) -> bool {
    if self.0 == 0 {
      return true;
    }
    self.0 -= 1;
    false
  }

  fn sleep(&mut self, _: Duration) {}
}

pub struct FakeDevices {
  /// `None` 时加载任务失败
  pub task: Option<TaskDescriptor>,
  pub detections: Vec<RawDetection>,
  pub io: ScriptedIo,
}

impl FakeDevices {
  pub fn new(io: ScriptedIo) -> Self {
    Self {
      task: Some(task()),
      detections: passing(),
      io,
    }
  }
}

impl Devices for FakeDevices {
  fn load_task(&self) -> Result<TaskDescriptor, ConfigError> {
    self
      .task
      .clone()
      .ok_or_else(|| ConfigError::Invalid("任务描述缺失".to_string()))
  }

  fn load_model(&self, _task: &TaskDescriptor) -> Result<BoxedModel, ConfigError> {
    Ok(Box::new(FixedModel(self.detections.clone())))
  }

  fn open_io(&self) -> BoxedIo {
    Box::new(self.io.clone())
  }
}
