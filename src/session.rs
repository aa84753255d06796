// 该文件是 Zhijian （智检） 项目的一部分。
// src/session.rs - 检测会话控制
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

//! 会话在独立的工作线程上执行，命令通过通道送入，状态与结果通过事件流送出。
//!
//! 同一时刻至多一个会话处于运行状态，运行中再次启动会立即返回
//! [`SessionError::AlreadyRunning`]。停止请求带有会话编号，
//! 只在连续模式的迭代边界生效，不会打断正在进行的采集或检测。

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  config::{BitMap, ConfigError, StationConfig, TaskDescriptor},
  fieldbus::{BoxedIo, ModbusTcpClient},
  frame::Frame,
  input::CaptureSource,
  judge::{InspectionResult, Refinement},
  model::BoxedModel,
  task::{Cancel, CaptureTask, ContinuousTask, InferenceTask, InspectionPipeline, Task},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
  SingleCapture,
  SingleInference,
  ContinuousCapture,
  ContinuousInference,
}

impl fmt::Display for SessionMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SessionMode::SingleCapture => "单次采集",
      SessionMode::SingleInference => "单次检测",
      SessionMode::ContinuousCapture => "连续采集",
      SessionMode::ContinuousInference => "连续检测",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
  Idle,
  Running(SessionMode),
}

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("已有会话正在运行")]
  AlreadyRunning,
  #[error("没有可用于检测的图像，请先采集")]
  NoFrameAvailable,
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("会话工作线程已退出")]
  WorkerGone,
}

/// 会话向调用方（例如界面）发出的事件
#[derive(Debug, Clone)]
pub enum Event {
  Started(SessionMode),
  Status(String),
  /// 预览图像，`None` 表示清空预览
  Preview(Option<Arc<RgbImage>>),
  Inspection {
    result: InspectionResult,
    record: Option<PathBuf>,
  },
  /// 清空上一次的检测结果
  InspectionCleared,
  Error(String),
  Finished(SessionMode),
}

/// 事件发送端，接收端关闭后事件被丢弃
#[derive(Clone)]
pub struct EventSink {
  tx: Sender<Event>,
}

impl EventSink {
  pub fn new(tx: Sender<Event>) -> Self {
    Self { tx }
  }

  pub fn channel() -> (Self, Receiver<Event>) {
    let (tx, rx) = unbounded();
    (Self::new(tx), rx)
  }

  pub fn emit(&self, event: Event) {
    let _ = self.tx.send(event);
  }

  pub fn status(&self, text: impl Into<String>) {
    self.emit(Event::Status(text.into()));
  }

  pub fn preview(&self, image: Option<RgbImage>) {
    self.emit(Event::Preview(image.map(Arc::new)));
  }

  pub fn preview_frame(&self, frame: &Frame) {
    self.emit(Event::Preview(Some(frame.shared_image())));
  }

  pub fn inspection(&self, result: InspectionResult, record: Option<PathBuf>) {
    self.emit(Event::Inspection { result, record });
  }

  pub fn clear_inspection(&self) {
    self.emit(Event::InspectionCleared);
  }

  pub fn error(&self, text: impl Into<String>) {
    self.emit(Event::Error(text.into()));
  }
}

/// 会话所需的外部协作方，每次开始会话时构建
pub trait Devices {
  fn load_task(&self) -> Result<TaskDescriptor, ConfigError>;

  fn load_model(&self, task: &TaskDescriptor) -> Result<BoxedModel, ConfigError> {
    crate::model::load_model(task)
  }

  /// 二次检测，默认不启用
  fn load_refinement(&self, _task: &TaskDescriptor) -> Option<Box<dyn Refinement + Send>> {
    None
  }

  fn open_io(&self) -> BoxedIo;
}

/// 按工位配置构建真实设备
pub struct StationDevices {
  task_path: PathBuf,
  plc: crate::config::PlcSettings,
}

impl StationDevices {
  pub fn new(config: &StationConfig) -> Self {
    Self {
      task_path: config.inference.task.clone(),
      plc: config.plc.clone(),
    }
  }
}

impl Devices for StationDevices {
  fn load_task(&self) -> Result<TaskDescriptor, ConfigError> {
    TaskDescriptor::load(&self.task_path)
  }

  fn open_io(&self) -> BoxedIo {
    Box::new(ModbusTcpClient::from_settings(&self.plc))
  }
}

/// 连续模式的轮询参数与结果目录
#[derive(Debug, Clone)]
pub struct LoopSettings {
  pub bits: BitMap,
  pub poll_interval: Duration,
  pub result_root: PathBuf,
}

impl LoopSettings {
  pub fn from_config(config: &StationConfig) -> Self {
    Self {
      bits: config.plc.bit_map(),
      poll_interval: config.plc.poll_interval(),
      result_root: config.inference.result_dir.clone(),
    }
  }
}

enum Job {
  Capture,
  Inference {
    frame: Frame,
    pipeline: InspectionPipeline,
  },
  Continuous {
    pipeline: Option<InspectionPipeline>,
    io: BoxedIo,
  },
}

enum Command {
  Run { id: u64, mode: SessionMode, job: Job },
  Stop { id: u64 },
  Shutdown,
}

struct GuardState {
  run: RunState,
  session: u64,
}

/// 保证同一时刻至多一个会话运行
struct SessionGuard {
  state: Mutex<GuardState>,
}

impl SessionGuard {
  fn new() -> Self {
    Self {
      state: Mutex::new(GuardState {
        run: RunState::Idle,
        session: 0,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, GuardState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn finish(&self, id: u64) {
    let mut state = self.lock();
    if state.session == id {
      state.run = RunState::Idle;
    }
  }
}

/// 会话控制句柄
///
/// 丢弃句柄时会停止当前会话并等待工作线程退出。
pub struct Inspector<D: Devices> {
  devices: D,
  settings: LoopSettings,
  guard: Arc<SessionGuard>,
  last_frame: Arc<Mutex<Option<Frame>>>,
  commands: Sender<Command>,
  worker: Option<JoinHandle<()>>,
}

impl<D: Devices> Inspector<D> {
  /// 启动工作线程，返回控制句柄与事件接收端
  pub fn spawn<C>(capture: C, devices: D, settings: LoopSettings) -> (Self, Receiver<Event>)
  where
    C: CaptureSource + Send + 'static,
  {
    let (events, event_rx) = EventSink::channel();
    let (commands, command_rx) = unbounded();
    let guard = Arc::new(SessionGuard::new());
    let last_frame = Arc::new(Mutex::new(None));

    let worker = Worker {
      capture,
      events,
      commands: command_rx,
      guard: Arc::clone(&guard),
      last_frame: Arc::clone(&last_frame),
      settings: settings.clone(),
    };
    let handle = thread::Builder::new()
      .name("inspection-session".to_string())
      .spawn(move || worker.run())
      .ok();
    if handle.is_none() {
      error!("无法创建会话工作线程");
    }

    let inspector = Inspector {
      devices,
      settings,
      guard,
      last_frame,
      commands,
      worker: handle,
    };
    (inspector, event_rx)
  }

  pub fn state(&self) -> RunState {
    self.guard.lock().run
  }

  pub fn last_frame(&self) -> Option<Frame> {
    self.last_frame.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  fn pipeline(&self) -> Result<InspectionPipeline, ConfigError> {
    let task = self.devices.load_task()?;
    let model = self.devices.load_model(&task)?;
    let refinement = self.devices.load_refinement(&task);
    Ok(InspectionPipeline::new(task, model, self.settings.result_root.clone()).with_refinement(refinement))
  }

  /// 在会话锁内准备并提交任务，准备失败时保持空闲
  fn start(
    &self,
    mode: SessionMode,
    prepare: impl FnOnce(&Self) -> Result<Job, SessionError>,
  ) -> Result<(), SessionError> {
    let mut state = self.guard.lock();
    if let RunState::Running(current) = state.run {
      warn!("{} 正在运行，拒绝启动 {}", current, mode);
      return Err(SessionError::AlreadyRunning);
    }

    let job = prepare(self)?;
    let id = state.session + 1;
    self
      .commands
      .send(Command::Run { id, mode, job })
      .map_err(|_| SessionError::WorkerGone)?;
    state.session = id;
    state.run = RunState::Running(mode);
    info!("开始会话 #{}: {}", id, mode);
    Ok(())
  }

  pub fn start_capture(&self) -> Result<(), SessionError> {
    self.start(SessionMode::SingleCapture, |_| Ok(Job::Capture))
  }

  pub fn start_inference(&self) -> Result<(), SessionError> {
    self.start(SessionMode::SingleInference, |this| {
      let frame = this.last_frame().ok_or(SessionError::NoFrameAvailable)?;
      let pipeline = this.pipeline()?;
      Ok(Job::Inference { frame, pipeline })
    })
  }

  pub fn start_continuous_capture(&self) -> Result<(), SessionError> {
    self.start(SessionMode::ContinuousCapture, |this| {
      Ok(Job::Continuous {
        pipeline: None,
        io: this.devices.open_io(),
      })
    })
  }

  pub fn start_continuous_inference(&self) -> Result<(), SessionError> {
    self.start(SessionMode::ContinuousInference, |this| {
      let pipeline = this.pipeline()?;
      Ok(Job::Continuous {
        pipeline: Some(pipeline),
        io: this.devices.open_io(),
      })
    })
  }

  /// 请求停止当前会话；空闲时无效果，可重复调用
  pub fn stop(&self) {
    let state = self.guard.lock();
    if let RunState::Running(mode) = state.run {
      info!("请求停止会话 #{}: {}", state.session, mode);
      let _ = self.commands.send(Command::Stop { id: state.session });
    }
  }

  /// 停止当前会话并等待工作线程退出
  pub fn shutdown(mut self) {
    self.shutdown_worker();
  }

  fn shutdown_worker(&mut self) {
    self.stop();
    let _ = self.commands.send(Command::Shutdown);
    if let Some(handle) = self.worker.take()
      && handle.join().is_err()
    {
      error!("会话工作线程异常退出");
    }
  }
}

impl<D: Devices> Drop for Inspector<D> {
  fn drop(&mut self) {
    if self.worker.is_some() {
      self.shutdown_worker();
    }
  }
}

struct Worker<C> {
  capture: C,
  events: EventSink,
  commands: Receiver<Command>,
  guard: Arc<SessionGuard>,
  last_frame: Arc<Mutex<Option<Frame>>>,
  settings: LoopSettings,
}

impl<C: CaptureSource> Worker<C> {
  fn run(mut self) {
    let mut shutdown = false;
    while !shutdown {
      let command = match self.commands.recv() {
        Ok(command) => command,
        Err(_) => break,
      };
      match command {
        Command::Run { id, mode, job } => {
          self.events.emit(Event::Started(mode));
          self.run_job(id, job, &mut shutdown);
          self.guard.finish(id);
          info!("会话 #{} 结束: {}", id, mode);
          self.events.emit(Event::Finished(mode));
        }
        // 会话已结束后到达的停止请求
        Command::Stop { .. } => {}
        Command::Shutdown => shutdown = true,
      }
    }
    info!("会话工作线程退出");
  }

  fn run_job(&mut self, id: u64, job: Job, shutdown: &mut bool) {
    match job {
      Job::Capture => {
        if let Some(frame) = CaptureTask.run_task(&mut self.capture, &self.events) {
          *self.last_frame.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
        }
      }
      Job::Inference { frame, pipeline } => {
        InferenceTask { frame, pipeline }.run_task(&mut self.capture, &self.events);
      }
      Job::Continuous { pipeline, io } => {
        let cancel = CommandCancel {
          commands: &self.commands,
          session: id,
          stopped: false,
          shutdown,
        };
        ContinuousTask::new(
          pipeline,
          io,
          self.settings.bits,
          self.settings.poll_interval,
          cancel,
        )
        .run_task(&mut self.capture, &self.events);
      }
    }
  }
}

/// 从命令通道读取本会话的停止请求
struct CommandCancel<'a> {
  commands: &'a Receiver<Command>,
  session: u64,
  stopped: bool,
  shutdown: &'a mut bool,
}

impl CommandCancel<'_> {
  fn handle(&mut self, command: Command) {
    match command {
      Command::Stop { id } if id == self.session => self.stopped = true,
      Command::Stop { .. } => {}
      Command::Shutdown => {
        *self.shutdown = true;
        self.stopped = true;
      }
      Command::Run { id, mode, .. } => {
        warn!("会话 #{} 运行中，丢弃启动命令 #{} ({})", self.session, id, mode);
      }
    }
  }
}

impl Cancel for CommandCancel<'_> {
  fn is_stopped(&mut self) -> bool {
    while !self.stopped {
      match self.commands.try_recv() {
        Ok(command) => self.handle(command),
        Err(TryRecvError::Empty) => break,
        Err(TryRecvError::Disconnected) => self.stopped = true,
      }
    }
    self.stopped
  }

  fn sleep(&mut self, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !self.stopped {
      let remaining = deadline.saturating_duration_since(Instant::now());
      match self.commands.recv_timeout(remaining) {
        Ok(command) => self.handle(command),
        Err(RecvTimeoutError::Timeout) => break,
        Err(RecvTimeoutError::Disconnected) => self.stopped = true,
      }
    }
  }
}
