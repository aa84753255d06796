// 该文件是 Zhijian （智检） 项目的一部分。
// src/args.rs - 工位程序参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// 启动后自动进入的模式
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoMode {
  /// 连续采集
  Capture,
  /// 连续检测
  Inspect,
}

/// Zhijian 工位参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 工位配置文件（TOML），不存在时生成默认配置
  #[arg(long, default_value = "config/station.toml", value_name = "FILE")]
  pub config: PathBuf,

  /// 覆盖配置中的任务描述文件（JSON）
  #[arg(long, value_name = "FILE")]
  pub task: Option<PathBuf>,

  /// 覆盖配置中的采集来源
  /// 支持格式:
  /// - 网络相机: http://host/path
  /// - 图片或目录: image:///path/to/images
  #[arg(long, value_name = "SOURCE")]
  pub source: Option<String>,

  /// 覆盖配置中的结果目录
  #[arg(long, value_name = "DIR")]
  pub result_dir: Option<PathBuf>,

  /// 覆盖配置中的日志级别
  #[arg(long, value_name = "LEVEL")]
  pub log_level: Option<String>,

  /// 启动后直接进入连续模式
  #[arg(long, value_enum, value_name = "MODE")]
  pub auto: Option<AutoMode>,
}
