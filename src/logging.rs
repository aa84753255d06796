// 该文件是 Zhijian （智检） 项目的一部分。
// src/logging.rs - 日志文件
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

use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::config::{ConfigError, LoggingSettings};

pub const LOG_FILE_PREFIX: &str = "app";
pub const LOG_FILE_SUFFIX: &str = "log";

/// 按天滚动的日志文件，超出保留个数的旧文件被删除
pub fn file_appender(settings: &LoggingSettings) -> Result<RollingFileAppender, ConfigError> {
  std::fs::create_dir_all(&settings.dir).map_err(|e| ConfigError::io(&settings.dir, e))?;
  RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix(LOG_FILE_PREFIX)
    .filename_suffix(LOG_FILE_SUFFIX)
    .max_log_files(settings.keep_files)
    .build(&settings.dir)
    .map_err(|e| {
      ConfigError::Invalid(format!(
        "无法创建日志文件 {}: {}",
        settings.dir.display(),
        e
      ))
    })
}
