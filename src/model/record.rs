// 该文件是 Zhijian （智检） 项目的一部分。
// src/model/record.rs - 回放检测记录的模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectionModel, ModelError, RawDetection},
};

#[derive(Error, Debug)]
pub enum RecordedModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录 {0} 中没有检测记录")]
  NoRecords(PathBuf),
}

/// 回放离线检测记录的模型
///
/// 记录文件每行一个检测结果：`label, score, x_min, y_min, x_max, y_max`。
/// 路径为文件时每次推理都返回同一份记录；为目录时按文件名顺序循环回放
/// 其中的 `.txt` 记录，与 `image://` 目录输入配合使用。
pub struct RecordedModel {
  records: Vec<PathBuf>,
  cursor: usize,
  min_confidence: f32,
}

impl FromUrlWithScheme for RecordedModel {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordedModel {
  type Error = RecordedModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordedModelError::SchemeMismatch);
    }
    Self::open(Path::new(url.path()))
  }
}

impl RecordedModel {
  pub fn open(path: &Path) -> Result<Self, RecordedModelError> {
    let records = if path.is_dir() {
      let mut records = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "txt"))
        .collect::<Vec<_>>();
      records.sort();
      if records.is_empty() {
        return Err(RecordedModelError::NoRecords(path.to_path_buf()));
      }
      records
    } else {
      // 单个文件需要存在
      std::fs::metadata(path)?;
      vec![path.to_path_buf()]
    };

    Ok(RecordedModel {
      records,
      cursor: 0,
      min_confidence: 0.0,
    })
  }

  pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
    self.min_confidence = min_confidence;
    self
  }
}

/// 解析检测记录文本，空行被忽略
pub fn parse_records(text: &str) -> Result<Vec<RawDetection>, ModelError> {
  text
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(|line| {
      let fields: Vec<&str> = line.split(',').map(str::trim).collect();
      if fields.len() != 6 {
        return Err(ModelError::RecordFormat(format!(
          "期望 6 个字段, 实际 {}: {}",
          fields.len(),
          line
        )));
      }
      let number = |s: &str| {
        s.parse::<f32>()
          .map_err(|e| ModelError::RecordFormat(format!("'{}' 不是数字: {}", s, e)))
      };
      Ok(RawDetection {
        label: fields[0].to_string(),
        confidence: number(fields[1])?,
        bbox: [
          number(fields[2])?,
          number(fields[3])?,
          number(fields[4])?,
          number(fields[5])?,
        ],
      })
    })
    .collect()
}

impl DetectionModel for RecordedModel {
  fn predict(&mut self, _image: &RgbImage) -> Result<Vec<RawDetection>, ModelError> {
    let path = &self.records[self.cursor];
    self.cursor = (self.cursor + 1) % self.records.len();

    debug!("回放检测记录: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let detections = parse_records(&text)?
      .into_iter()
      .filter(|d| d.confidence >= self.min_confidence)
      .collect();
    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_record_lines() {
    let text = "scratch, 0.7000, 10.0, 10.0, 50.0, 50.0\n\n hole,0.25,1,2,3,4 \n";
    let records = parse_records(text).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], RawDetection::new("scratch", [10.0, 10.0, 50.0, 50.0], 0.7));
    assert_eq!(records[1].label, "hole");
    assert_eq!(records[1].bbox, [1.0, 2.0, 3.0, 4.0]);
  }

  #[test]
  fn rejects_malformed_records() {
    assert!(parse_records("scratch, 0.7, 1, 2, 3").is_err());
    assert!(parse_records("scratch, high, 1, 2, 3, 4").is_err());
  }

  #[test]
  fn directory_replays_in_order_and_filters_low_confidence() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.txt"), "b, 0.9, 0, 0, 1, 1").unwrap();
    std::fs::write(dir.path().join("a.txt"), "a, 0.9, 0, 0, 1, 1\na, 0.1, 0, 0, 1, 1").unwrap();
    std::fs::write(dir.path().join("a.jpg"), b"not a record").unwrap();

    let mut model = RecordedModel::open(dir.path()).unwrap().with_min_confidence(0.2);
    let image = RgbImage::new(1, 1);
    let first = model.predict(&image).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].label, "a");
    assert_eq!(model.predict(&image).unwrap()[0].label, "b");
    assert_eq!(model.predict(&image).unwrap()[0].label, "a");
  }

  #[test]
  fn empty_directory_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      RecordedModel::open(dir.path()),
      Err(RecordedModelError::NoRecords(_))
    ));
  }
}
