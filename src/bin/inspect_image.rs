// 该文件是 Zhijian （智检） 项目的一部分。
// src/bin/inspect_image.rs - 离线检测单张图片
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use url::Url;

use tracing::info;
use zhijian::{
  FromUrl,
  config::TaskDescriptor,
  input::{CaptureSource, ImageFileInput},
  task::InspectionPipeline,
};

/// 对一张图片执行检测并保存标注结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 任务描述文件（JSON）
  #[arg(long, value_name = "FILE")]
  pub task: PathBuf,
  /// 输入图片，例如 image:///data/20250101_083000.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 结果目录
  #[arg(long, default_value = "results", value_name = "DIR")]
  pub result_dir: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("任务描述: {}", args.task.display());
  info!("输入来源: {}", args.input);
  info!("结果目录: {}", args.result_dir.display());

  let task = TaskDescriptor::load(&args.task)?;
  let mut input = ImageFileInput::from_url(&args.input)?;
  let mut pipeline = InspectionPipeline::load(task, args.result_dir)?;

  info!("检测任务: {}", pipeline.task().task_name);

  let frame = input.get_frame()?;
  info!("采集时间: {}", frame.captured_at().format("%Y-%m-%d %H:%M:%S"));
  let (inspection, _) = pipeline.inspect(&frame)?;
  for j in &inspection.result.judgements {
    info!(
      "  - {}: {:.2} (阈值 {:.2}) {}",
      j.label,
      j.predict_conf,
      j.pass_threshold,
      if j.passed { "OK" } else { "NG" }
    );
  }
  info!("检测结果: {}", inspection.result.verdict());
  if let Some(path) = inspection.record {
    info!("结果图片: {}", path.display());
  }

  Ok(())
}
