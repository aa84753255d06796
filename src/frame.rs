// 该文件是 Zhijian （智检） 项目的一部分。
// src/frame.rs - 带时间戳的采集帧
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

use std::sync::Arc;

use chrono::{DateTime, Local};
use image::RgbImage;

/// 时间戳文本格式，用于文件命名，例如 `20250101_083000`
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// 日期目录格式，例如 `2025-01-01`
pub const DATE_DIR_FORMAT: &str = "%Y-%m-%d";

/// 一次采集得到的图像及其采集时间
///
/// 图像以 `Arc` 持有，缓存为“最近一帧”和发往预览时都不必复制像素。
#[derive(Debug, Clone)]
pub struct Frame {
  image: Arc<RgbImage>,
  captured_at: DateTime<Local>,
}

impl Frame {
  pub fn new(image: RgbImage, captured_at: DateTime<Local>) -> Self {
    Self {
      image: Arc::new(image),
      captured_at,
    }
  }

  /// 以当前时间作为采集时间
  pub fn now(image: RgbImage) -> Self {
    Self::new(image, Local::now())
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn shared_image(&self) -> Arc<RgbImage> {
    Arc::clone(&self.image)
  }

  pub fn captured_at(&self) -> DateTime<Local> {
    self.captured_at
  }

  pub fn timestamp(&self) -> String {
    self.captured_at.format(TIMESTAMP_FORMAT).to_string()
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Frame::now(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn timestamp_uses_capture_time() {
    let at = Local.with_ymd_and_hms(2025, 1, 31, 15, 3, 22).unwrap();
    let frame = Frame::new(RgbImage::new(4, 2), at);
    assert_eq!(frame.timestamp(), "20250131_150322");
    assert_eq!((frame.width(), frame.height()), (4, 2));
  }
}
