// 该文件是 Zhijian （智检） 项目的一部分。
// src/input.rs - 图像采集输入
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

use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme, config::CameraSettings, frame::Frame};

/// 采集来源：每次调用采集一帧带时间戳的图像
pub trait CaptureSource {
  fn get_frame(&mut self) -> Result<Frame, CaptureError>;
}

impl<C: CaptureSource + ?Sized> CaptureSource for Box<C> {
  fn get_frame(&mut self) -> Result<Frame, CaptureError> {
    (**self).get_frame()
  }
}

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "http_camera")]
mod http_camera;
#[cfg(feature = "http_camera")]
pub use self::http_camera::{HttpCamera, HttpCameraBuilder, HttpCameraError};

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("图片文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "http_camera")]
  #[error("网络相机错误: {0}")]
  HttpCameraError(#[from] HttpCameraError),
  #[error("采集地址无效: {0}")]
  InvalidSource(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "http_camera")]
  HttpCamera(HttpCamera),
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = CaptureError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "http_camera")]
    {
      if url.scheme() == "http" || url.scheme() == "https" {
        let input = HttpCameraBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::HttpCamera(input));
      }
    }
    if url.scheme() == ImageFileInput::SCHEME {
      let input = ImageFileInput::from_url(url)?;
      return Ok(InputWrapper::ReadImageFile(input));
    }
    Err(CaptureError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl InputWrapper {
  /// 按工位相机配置打开采集来源
  pub fn from_settings(settings: &CameraSettings) -> Result<Self, CaptureError> {
    let url = settings
      .source_url()
      .map_err(|e| CaptureError::InvalidSource(e.to_string()))?;

    #[cfg(feature = "http_camera")]
    {
      if url.scheme() == "http" || url.scheme() == "https" {
        let mut builder = HttpCameraBuilder::from_url(&url)?;
        if !settings.username.is_empty() {
          builder = builder.credentials(&settings.username, &settings.password);
        }
        if settings.save_raw {
          builder = builder.archive(settings.photo_dir.clone());
        }
        return Ok(InputWrapper::HttpCamera(builder.build()?));
      }
    }
    Self::from_url(&url)
  }
}

impl CaptureSource for InputWrapper {
  fn get_frame(&mut self) -> Result<Frame, CaptureError> {
    match self {
      #[cfg(feature = "http_camera")]
      InputWrapper::HttpCamera(input) => input.get_frame(),
      InputWrapper::ReadImageFile(input) => input.get_frame(),
    }
  }
}
