// 该文件是 Zhijian （智检） 项目的一部分。
// src/task.rs - 单次采集、单次检测与连续触发任务
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

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::{
  config::{BitMap, ConfigError, TaskDescriptor},
  fieldbus::{BoxedIo, DiscreteIo},
  frame::Frame,
  input::CaptureSource,
  judge::{InspectionResult, Refinement, judge, judge_with},
  model::{BoxedModel, ModelError},
  output::{Render, ResultRecorder},
  session::EventSink,
};

pub trait Task<C> {
  type Output;
  fn run_task(self, capture: &mut C, events: &EventSink) -> Self::Output;
}

/// 一次检测的产物
#[derive(Debug, Clone)]
pub struct Inspection {
  pub result: InspectionResult,
  pub record: Option<PathBuf>,
}

/// 检测流水线：模型推理 → 目标判定 → 标注归档
///
/// 在会话开始时按任务描述构建，会话期间检测目标不再变化。
pub struct InspectionPipeline {
  task: TaskDescriptor,
  model: BoxedModel,
  refinement: Option<Box<dyn Refinement + Send>>,
  recorder: ResultRecorder,
}

impl InspectionPipeline {
  pub fn new(task: TaskDescriptor, model: BoxedModel, result_root: impl Into<PathBuf>) -> Self {
    let recorder = ResultRecorder::new(result_root, task.task_name.clone());
    Self {
      task,
      model,
      refinement: None,
      recorder,
    }
  }

  /// 按任务描述加载主模型
  pub fn load(task: TaskDescriptor, result_root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
    let model = crate::model::load_model(&task)?;
    Ok(Self::new(task, model, result_root))
  }

  pub fn with_refinement(mut self, refinement: Option<Box<dyn Refinement + Send>>) -> Self {
    self.refinement = refinement;
    self
  }

  pub fn task(&self) -> &TaskDescriptor {
    &self.task
  }

  /// 对一帧执行检测，返回判定结果与原分辨率标注图
  pub fn inspect(&mut self, frame: &Frame) -> Result<(Inspection, image::RgbImage), ModelError> {
    let start = Instant::now();
    info!("模型预测开始...");
    let detections = self.model.predict(frame.image())?;
    debug!("模型预测完成, 共 {} 个检测结果", detections.len());

    let result = match self.refinement.as_mut() {
      Some(refinement) => judge_with(frame.image(), &detections, &self.task.targets, &mut **refinement),
      None => judge(&detections, &self.task.targets),
    };
    for j in &result.judgements {
      debug!(
        "目标 {}: 置信度 {:.2} / 阈值 {:.2} -> {}",
        j.label,
        j.predict_conf,
        j.pass_threshold,
        if j.passed { "合格" } else { "不合格" }
      );
    }

    let recorded = self.recorder.render_result(frame, &result);
    info!("检测结果 {}, 耗时: {:.2?}", result.verdict(), start.elapsed());
    Ok((
      Inspection {
        result,
        record: recorded.path,
      },
      recorded.annotated,
    ))
  }

  /// 检测并把结果发往事件流，模型出错时只报告错误
  fn inspect_and_report(&mut self, frame: &Frame, events: &EventSink) -> Option<InspectionResult> {
    match self.inspect(frame) {
      Ok((inspection, annotated)) => {
        events.preview(Some(annotated));
        events.inspection(inspection.result.clone(), inspection.record);
        Some(inspection.result)
      }
      Err(e) => {
        error!("检测失败: {}", e);
        events.error(format!("检测失败: {}", e));
        None
      }
    }
  }
}

/// 单次采集，成功时返回采集到的帧
pub struct CaptureTask;

impl<C: CaptureSource> Task<C> for CaptureTask {
  type Output = Option<Frame>;

  fn run_task(self, capture: &mut C, events: &EventSink) -> Self::Output {
    events.status("采集图片中...");
    events.preview(None);

    match capture.get_frame() {
      Ok(frame) => {
        info!("采集图片成功");
        events.preview_frame(&frame);
        events.status("");
        Some(frame)
      }
      Err(e) => {
        error!("拍照失败: {}", e);
        events.status("拍照失败！");
        events.error(format!("拍照失败: {}", e));
        None
      }
    }
  }
}

/// 对已缓存的一帧执行检测
pub struct InferenceTask {
  pub frame: Frame,
  pub pipeline: InspectionPipeline,
}

impl<C> Task<C> for InferenceTask {
  type Output = Option<InspectionResult>;

  fn run_task(mut self, _capture: &mut C, events: &EventSink) -> Self::Output {
    events.status("图像检测中...");
    events.preview(None);

    let result = self.pipeline.inspect_and_report(&self.frame, events);
    if result.is_some() {
      events.status("图像检测完成！");
    }
    result
  }
}

/// 连续模式的停止信号，只在迭代边界查询
pub trait Cancel {
  /// 是否已收到停止请求，不阻塞
  fn is_stopped(&mut self) -> bool;
  /// 轮询间隔内休眠，收到停止请求可提前返回
  fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
  Rising,
  Falling,
  Steady,
}

/// 触发位的边沿检测
///
/// 上升沿只有在成功采集后才锁存，采集失败时下一次轮询仍视为上升沿。
#[derive(Debug, Default, Clone, Copy)]
pub struct TriggerEdge {
  memory: bool,
}

impl TriggerEdge {
  pub fn edge(&self, level: bool) -> Edge {
    match (level, self.memory) {
      (true, false) => Edge::Rising,
      (false, true) => Edge::Falling,
      _ => Edge::Steady,
    }
  }

  pub fn latch(&mut self) {
    self.memory = true;
  }

  pub fn release(&mut self) {
    self.memory = false;
  }

  pub fn reset(&mut self) {
    self.memory = false;
  }
}

/// 一次轮询的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
  /// 上升沿，已采集（及检测）
  Fired,
  /// 上升沿，但采集失败
  Missed,
  /// 下降沿
  Released,
  Idle,
}

/// 连续采集或检测，由触发位上升沿驱动
pub struct ContinuousTask<K> {
  pipeline: Option<InspectionPipeline>,
  io: BoxedIo,
  bits: BitMap,
  interval: Duration,
  cancel: K,
  edge: TriggerEdge,
  heartbeat: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ContinuousSummary {
  pub iterations: u64,
  pub fired: u64,
}

impl<K: Cancel> ContinuousTask<K> {
  pub fn new(
    pipeline: Option<InspectionPipeline>,
    io: BoxedIo,
    bits: BitMap,
    interval: Duration,
    cancel: K,
  ) -> Self {
    Self {
      pipeline,
      io,
      bits,
      interval,
      cancel,
      edge: TriggerEdge::default(),
      heartbeat: false,
    }
  }

  fn inference(&self) -> bool {
    self.pipeline.is_some()
  }

  fn read_trigger(&mut self) -> bool {
    match self.io.read_bits() {
      Ok(bits) => bits.get(self.bits.trigger as usize).copied().unwrap_or(false),
      Err(e) => {
        warn!("读取 IO 失败: {}", e);
        false
      }
    }
  }

  fn write(&mut self, address: u16, value: bool) {
    if let Err(e) = self.io.write_bit(address, value) {
      error!("写入 IO 输出位 DO{} 失败: {}", address, e);
    }
  }

  fn write_result(&mut self, passed: bool) {
    self.write(self.bits.result_ok, passed);
    self.write(self.bits.result_ng, !passed);
  }

  fn toggle_heartbeat(&mut self) {
    if let Some(address) = self.bits.heartbeat {
      self.heartbeat = !self.heartbeat;
      self.write(address, self.heartbeat);
    }
  }

  /// 执行一次轮询
  pub fn poll_once<C: CaptureSource>(&mut self, capture: &mut C, events: &EventSink) -> Poll {
    let level = self.read_trigger();

    let poll = match self.edge.edge(level) {
      Edge::Rising => {
        events.preview(None);
        events.clear_inspection();
        match capture.get_frame() {
          Ok(frame) => {
            info!(
              "采集图片成功{}",
              if self.inference() { ", 开始检测..." } else { "" }
            );
            events.preview_frame(&frame);

            let passed = self
              .pipeline
              .as_mut()
              .and_then(|pipeline| pipeline.inspect_and_report(&frame, events))
              .map(|result| result.passed);
            if let Some(passed) = passed {
              self.write_result(passed);
            }

            self.edge.latch();
            Poll::Fired
          }
          Err(e) => {
            error!("拍照失败: {}", e);
            events.error(format!("拍照失败: {}", e));
            Poll::Missed
          }
        }
      }
      Edge::Falling => {
        self.edge.release();
        if self.inference() {
          self.write(self.bits.result_ok, false);
          self.write(self.bits.result_ng, false);
        }
        Poll::Released
      }
      Edge::Steady => Poll::Idle,
    };

    self.toggle_heartbeat();
    poll
  }
}

impl<C: CaptureSource, K: Cancel> Task<C> for ContinuousTask<K> {
  type Output = ContinuousSummary;

  fn run_task(mut self, capture: &mut C, events: &EventSink) -> Self::Output {
    events.status(if self.inference() {
      "自动运行检测中..."
    } else {
      "连续采集图片..."
    });
    events.preview(None);
    events.clear_inspection();

    if !self.io.connect() {
      warn!("IO 板暂不可达，将在轮询中重试");
    }
    self.edge.reset();

    let mut summary = ContinuousSummary::default();
    while !self.cancel.is_stopped() {
      if self.poll_once(capture, events) == Poll::Fired {
        summary.fired += 1;
      }
      summary.iterations += 1;
      self.cancel.sleep(self.interval);
    }

    info!(
      "连续任务结束: 轮询 {} 次, 触发 {} 次",
      summary.iterations, summary.fired
    );
    self.io.close();
    events.status("");
    summary
  }
}
