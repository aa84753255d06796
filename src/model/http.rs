// 该文件是 Zhijian （智检） 项目的一部分。
// src/model/http.rs - 远程推理服务模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::Cursor;
use std::time::Duration;

use image::{RgbImage, codecs::jpeg::JpegEncoder};
use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl,
  model::{DetectionModel, ModelError, RawDetection},
};

const HTTP_MODEL_TIMEOUT: Duration = Duration::from_secs(30);
const HTTP_MODEL_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum HttpModelError {
  #[error("模型地址必须使用 http 或 https 方案: {0}")]
  SchemeMismatch(String),
  #[error("创建 HTTP 客户端失败: {0}")]
  ClientError(#[from] reqwest::Error),
}

/// 推理服务返回的单个检测结果
#[derive(Deserialize, Debug)]
struct WireDetection {
  label: String,
  #[serde(rename = "box")]
  bbox: [f32; 4],
  confidence: f32,
}

/// 通过 HTTP 调用推理服务的检测模型
///
/// 以 `image/jpeg` 请求体 POST 图像，查询参数 `conf` 为置信度下限，
/// 服务返回 `[{"label", "box": [x1, y1, x2, y2], "confidence"}]`。
pub struct HttpModel {
  endpoint: Url,
  client: Client,
  min_confidence: f32,
}

impl FromUrl for HttpModel {
  type Error = HttpModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != "http" && url.scheme() != "https" {
      return Err(HttpModelError::SchemeMismatch(url.to_string()));
    }

    let client = Client::builder().timeout(HTTP_MODEL_TIMEOUT).build()?;
    Ok(HttpModel {
      endpoint: url.clone(),
      client,
      min_confidence: 0.0,
    })
  }
}

impl HttpModel {
  pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
    self.min_confidence = min_confidence;
    self
  }
}

impl DetectionModel for HttpModel {
  fn predict(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>, ModelError> {
    let mut body = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut body, HTTP_MODEL_JPEG_QUALITY).encode_image(image)?;

    debug!("请求推理服务: {}", self.endpoint);
    let response = self
      .client
      .post(self.endpoint.clone())
      .query(&[("conf", self.min_confidence)])
      .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
      .body(body.into_inner())
      .send()?;

    if !response.status().is_success() {
      return Err(ModelError::Inference(format!(
        "推理服务返回状态码 {}",
        response.status()
      )));
    }

    let detections: Vec<WireDetection> = response.json()?;
    Ok(
      detections
        .into_iter()
        .filter(|d| d.confidence >= self.min_confidence)
        .map(|d| RawDetection {
          label: d.label,
          bbox: d.bbox,
          confidence: d.confidence,
        })
        .collect(),
    )
  }
}
