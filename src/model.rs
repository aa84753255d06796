// 该文件是 Zhijian （智检） 项目的一部分。
// src/model.rs - 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{ConfigError, TaskDescriptor},
};

/// 像素坐标检测框 [x_min, y_min, x_max, y_max]
pub type BBox = [f32; 4];

/// 模型输出的一个原始检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
  pub label: String,
  pub bbox: BBox,
  pub confidence: f32,
}

impl RawDetection {
  pub fn new(label: impl Into<String>, bbox: BBox, confidence: f32) -> Self {
    Self {
      label: label.into(),
      bbox,
      confidence,
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("检测记录格式错误: {0}")]
  RecordFormat(String),
  #[cfg(feature = "model_http")]
  #[error("推理服务请求失败: {0}")]
  HttpError(#[from] reqwest::Error),
  #[error("推理失败: {0}")]
  Inference(String),
}

/// 检测模型：把一张图像映射为带标签和置信度的检测框
pub trait DetectionModel {
  fn predict(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>, ModelError>;
}

impl<M: DetectionModel + ?Sized> DetectionModel for Box<M> {
  fn predict(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>, ModelError> {
    (**self).predict(image)
  }
}

pub type BoxedModel = Box<dyn DetectionModel + Send>;

mod record;
pub use self::record::{RecordedModel, RecordedModelError};

#[cfg(feature = "model_http")]
mod http;
#[cfg(feature = "model_http")]
pub use self::http::{HttpModel, HttpModelError};

/// 按任务描述中的主模型路径构建检测模型
pub fn load_model(task: &TaskDescriptor) -> Result<BoxedModel, ConfigError> {
  let spec = task.primary_model();
  info!("加载模型: {} (conf {:.2})", spec.path, spec.conf);

  match spec.path.scheme() {
    scheme if scheme == RecordedModel::SCHEME => {
      let model = RecordedModel::from_url(&spec.path)
        .map_err(|e| ConfigError::Invalid(e.to_string()))?
        .with_min_confidence(spec.conf);
      Ok(Box::new(model))
    }
    #[cfg(feature = "model_http")]
    "http" | "https" => {
      let model = HttpModel::from_url(&spec.path)
        .map_err(|e| ConfigError::Invalid(e.to_string()))?
        .with_min_confidence(spec.conf);
      Ok(Box::new(model))
    }
    other => Err(ConfigError::Invalid(format!("不支持的模型方案: {}", other))),
  }
}
