// 该文件是 Zhijian （智检） 项目的一部分。
// src/output/directory_record.rs - 检测结果目录记录
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  frame::{DATE_DIR_FORMAT, Frame, TIMESTAMP_FORMAT},
  judge::{InspectionResult, Verdict},
  output::{Render, draw::Draw},
};

/// 结果图片统一保存的分辨率
pub const RECORD_WIDTH: u32 = 1280;
pub const RECORD_HEIGHT: u32 = 720;

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 结果图片路径：`{root}/{task}/{yyyy-mm-dd}/{OK|NG}_{timestamp}.jpg`
pub fn result_path(
  root: &Path,
  task_name: &str,
  date: NaiveDate,
  verdict: Verdict,
  timestamp: &str,
) -> PathBuf {
  root
    .join(task_name)
    .join(date.format(DATE_DIR_FORMAT).to_string())
    .join(format!("{}_{}.jpg", verdict, timestamp))
}

/// 一次记录的产物
#[derive(Debug, Clone)]
pub struct Recorded {
  /// 原分辨率的标注图像，用于预览
  pub annotated: RgbImage,
  /// 写入成功时的结果文件路径
  pub path: Option<PathBuf>,
}

/// 标注判定结果并按任务与日期归档
pub struct ResultRecorder {
  root: PathBuf,
  task_name: String,
  draw: Draw,
}

impl ResultRecorder {
  pub fn new(root: impl Into<PathBuf>, task_name: impl Into<String>) -> Self {
    Self {
      root: root.into(),
      task_name: task_name.into(),
      draw: Draw::default(),
    }
  }

  fn save(&self, annotated: &RgbImage, path: &Path) -> Result<(), RecordError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let resized = image::imageops::resize(annotated, RECORD_WIDTH, RECORD_HEIGHT, FilterType::Triangle);
    resized.save(path)?;
    Ok(())
  }

  /// 标注并保存结果图片，`timestamp` 缺省时取写入时刻
  ///
  /// 保存失败只记录日志，返回的 `path` 为 `None`。
  pub fn record(
    &self,
    image: &RgbImage,
    result: &InspectionResult,
    timestamp: Option<&str>,
  ) -> Recorded {
    let annotated = self.draw.annotate(image, result);

    let now = Local::now();
    let timestamp = timestamp
      .map(str::to_string)
      .unwrap_or_else(|| now.format(TIMESTAMP_FORMAT).to_string());
    let path = result_path(
      &self.root,
      &self.task_name,
      now.date_naive(),
      result.verdict(),
      &timestamp,
    );

    let path = match self.save(&annotated, &path) {
      Ok(()) => {
        info!("检测结果已保存: {}", path.display());
        Some(path)
      }
      Err(e) => {
        warn!("保存检测结果 {} 失败: {}", path.display(), e);
        None
      }
    };

    Recorded { annotated, path }
  }
}

impl Render<Frame, InspectionResult> for ResultRecorder {
  type Output = Recorded;

  fn render_result(&self, frame: &Frame, result: &InspectionResult) -> Self::Output {
    self.record(frame.image(), result, Some(&frame.timestamp()))
  }
}
