// 该文件是 Zhijian （智检） 项目的一部分。
// src/input/http_camera.rs - 网络相机快照输入
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
use std::time::Duration;

use chrono::Local;
use digest_auth::AuthContext;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl,
  frame::{DATE_DIR_FORMAT, Frame},
  input::{CaptureError, CaptureSource},
};

const HTTP_CAMERA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum HttpCameraError {
  #[error("相机地址必须使用 http 或 https 方案: {0}")]
  SchemeMismatch(String),
  #[error("请求失败: {0}")]
  RequestError(#[from] reqwest::Error),
  #[error("拍照失败, 状态码: {0}")]
  Status(StatusCode),
  #[error("图片解码异常: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("摘要认证失败: {0}")]
  DigestError(String),
}

pub struct HttpCameraBuilder {
  url: Url,
  username: Option<String>,
  password: Option<String>,
  archive: Option<PathBuf>,
  timeout: Duration,
}

impl FromUrl for HttpCameraBuilder {
  type Error = HttpCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != "http" && url.scheme() != "https" {
      return Err(HttpCameraError::SchemeMismatch(url.to_string()));
    }

    // 地址中的用户信息作为默认凭据
    let username = Some(url.username())
      .filter(|u| !u.is_empty())
      .map(|u| urlencoding::decode(u).map(|s| s.into_owned()).unwrap_or_else(|_| u.to_string()));
    let password = url
      .password()
      .map(|p| urlencoding::decode(p).map(|s| s.into_owned()).unwrap_or_else(|_| p.to_string()));

    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);

    Ok(HttpCameraBuilder {
      url,
      username,
      password,
      archive: None,
      timeout: HTTP_CAMERA_TIMEOUT,
    })
  }
}

impl HttpCameraBuilder {
  pub fn credentials(mut self, username: &str, password: &str) -> Self {
    self.username = Some(username.to_string());
    self.password = Some(password.to_string());
    self
  }

  /// 把原始照片归档到 `{dir}/{yyyy-mm-dd}/{timestamp}.jpg`
  pub fn archive(mut self, dir: PathBuf) -> Self {
    self.archive = Some(dir);
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn build(self) -> Result<HttpCamera, HttpCameraError> {
    // 相机位于本地网络，不走系统代理
    let client = Client::builder().timeout(self.timeout).no_proxy().build()?;
    info!("网络相机: {}", self.url);
    Ok(HttpCamera {
      url: self.url,
      username: self.username,
      password: self.password,
      archive: self.archive,
      client,
    })
  }
}

/// 通过 HTTP 快照接口采集图像的网络相机
pub struct HttpCamera {
  url: Url,
  username: Option<String>,
  password: Option<String>,
  archive: Option<PathBuf>,
  client: Client,
}

impl HttpCamera {
  /// 摘要认证使用的请求 URI（路径与查询串）
  fn request_uri(&self) -> String {
    match self.url.query() {
      Some(query) => format!("{}?{}", self.url.path(), query),
      None => self.url.path().to_string(),
    }
  }

  /// 应答 401 质询：优先摘要认证，没有摘要质询时退回基本认证
  fn authorize(&self, request: RequestBuilder, challenges: &[String]) -> Result<RequestBuilder, HttpCameraError> {
    let Some(username) = &self.username else {
      return Ok(request);
    };
    let password = self.password.as_deref().unwrap_or("");

    let digest = challenges
      .iter()
      .find(|c| c.trim_start().to_ascii_lowercase().starts_with("digest"));
    match digest {
      Some(challenge) => {
        let mut prompt = digest_auth::parse(challenge)
          .map_err(|e| HttpCameraError::DigestError(e.to_string()))?;
        let context = AuthContext::new(username.as_str(), password, self.request_uri());
        let answer = prompt
          .respond(&context)
          .map_err(|e| HttpCameraError::DigestError(e.to_string()))?;
        Ok(request.header(AUTHORIZATION, answer.to_header_string()))
      }
      None => Ok(request.basic_auth(username, Some(password))),
    }
  }

  fn request(&self) -> Result<Response, HttpCameraError> {
    let response = self.client.get(self.url.clone()).send()?;
    if response.status() != StatusCode::UNAUTHORIZED || self.username.is_none() {
      return Ok(response);
    }

    let challenges: Vec<String> = response
      .headers()
      .get_all(WWW_AUTHENTICATE)
      .iter()
      .filter_map(|v| v.to_str().ok())
      .map(str::to_string)
      .collect();
    let request = self.authorize(self.client.get(self.url.clone()), &challenges)?;
    Ok(request.send()?)
  }

  fn fetch(&self) -> Result<Frame, HttpCameraError> {
    let response = self.request()?;
    if !response.status().is_success() {
      return Err(HttpCameraError::Status(response.status()));
    }
    let bytes = response.bytes()?;
    let image = image::load_from_memory(&bytes)?.into_rgb8();
    let frame = Frame::now(image);

    if let Some(dir) = &self.archive {
      self.archive_raw(dir, &frame, &bytes);
    }
    Ok(frame)
  }

  fn archive_raw(&self, dir: &std::path::Path, frame: &Frame, bytes: &[u8]) {
    let directory = dir.join(Local::now().format(DATE_DIR_FORMAT).to_string());
    let path = directory.join(format!("{}.jpg", frame.timestamp()));
    let saved = std::fs::create_dir_all(&directory).and_then(|_| std::fs::write(&path, bytes));
    match saved {
      Ok(()) => info!("原始照片已保存: {}", path.display()),
      Err(e) => warn!("保存原始照片 {} 失败: {}", path.display(), e),
    }
  }
}

impl CaptureSource for HttpCamera {
  fn get_frame(&mut self) -> Result<Frame, CaptureError> {
    self.fetch().map_err(|e| {
      error!("拍照失败: {}", e);
      CaptureError::from(e)
    })
  }
}
