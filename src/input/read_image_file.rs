// 该文件是 Zhijian （智检） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, TimeZone};
use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, TIMESTAMP_FORMAT},
  input::{CaptureError, CaptureSource},
};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("No image found in {0}")]
  NoImages(PathBuf),
}

/// 从本地图片回放的采集来源
///
/// 路径为文件时每次采集都读取同一张图片；为目录时按文件名顺序循环读取。
/// 文件名形如 `20250101_083000` 时以其作为采集时间，否则取读取时刻。
pub struct ImageFileInput {
  images: Vec<PathBuf>,
  cursor: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(Path::new(url.path()))
  }
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

impl ImageFileInput {
  pub fn open(path: &Path) -> Result<Self, ImageFileInputError> {
    let images = if path.is_dir() {
      let mut images = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_image(p))
        .collect::<Vec<_>>();
      images.sort();
      images
    } else {
      std::fs::metadata(path)?;
      vec![path.to_path_buf()]
    };

    if images.is_empty() {
      return Err(ImageFileInputError::NoImages(path.to_path_buf()));
    }
    Ok(ImageFileInput { images, cursor: 0 })
  }

  fn read_next(&mut self) -> Result<Frame, ImageFileInputError> {
    let path = &self.images[self.cursor];
    self.cursor = (self.cursor + 1) % self.images.len();

    debug!("读取图片: {}", path.display());
    let image = ImageReader::open(path)?.decode()?.into_rgb8();
    let captured_at = path
      .file_stem()
      .and_then(|stem| stem.to_str())
      .and_then(|stem| NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT).ok())
      .and_then(|naive| Local.from_local_datetime(&naive).single())
      .unwrap_or_else(Local::now);
    Ok(Frame::new(image, captured_at))
  }
}

impl CaptureSource for ImageFileInput {
  fn get_frame(&mut self) -> Result<Frame, CaptureError> {
    Ok(self.read_next()?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn replays_directory_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(4, 4).save(dir.path().join("20250102_080000.png")).unwrap();
    RgbImage::new(2, 2).save(dir.path().join("20250101_080000.png")).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let url = Url::parse(&format!("image://{}", dir.path().display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    let first = input.get_frame().unwrap();
    assert_eq!(first.width(), 2);
    assert_eq!(first.timestamp(), "20250101_080000");
    assert_eq!(input.get_frame().unwrap().width(), 4);
    assert_eq!(input.get_frame().unwrap().width(), 2);
  }

  #[test]
  fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(ImageFileInput::open(&dir.path().join("absent.jpg")).is_err());
    assert!(matches!(
      ImageFileInput::open(dir.path()),
      Err(ImageFileInputError::NoImages(_))
    ));
  }
}
