// 该文件是 Zhijian （智检） 项目的一部分。
// src/main.rs - 工位主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::io::BufRead;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Sender, unbounded};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use zhijian::{
  config::{LoggingSettings, StationConfig},
  input::InputWrapper,
  session::{Devices, Event, Inspector, LoopSettings, SessionError, StationDevices},
};

use args::{Args, AutoMode};

const HELP: &str = "命令: capture | inspect | auto | auto-inspect | stop | status | quit";

enum Control {
  Line(String),
  Quit,
}

/// 同时输出到终端与按天滚动的日志文件，返回的守卫需存活到程序退出
fn init_tracing(settings: &LoggingSettings) -> Result<WorkerGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
  let (file_writer, guard) = tracing_appender::non_blocking(zhijian::logging::file_appender(settings)?);

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer())
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .init();
  Ok(guard)
}

fn log_event(event: Event) {
  match event {
    Event::Started(mode) => info!("会话开始: {}", mode),
    Event::Finished(mode) => info!("会话结束: {}", mode),
    Event::Status(text) if !text.is_empty() => info!("状态: {}", text),
    Event::Status(_) => {}
    Event::Preview(Some(image)) => info!("预览图像: {}x{}", image.width(), image.height()),
    Event::Preview(None) | Event::InspectionCleared => {}
    Event::Inspection { result, record } => {
      info!(
        "检测结果 {}{}",
        result.verdict(),
        record
          .map(|p| format!(", 已保存到 {}", p.display()))
          .unwrap_or_default()
      );
      for j in &result.judgements {
        info!(
          "  - {}: {:.2} (阈值 {:.2}) {}",
          j.label,
          j.predict_conf,
          j.pass_threshold,
          if j.passed { "OK" } else { "NG" }
        );
      }
    }
    Event::Error(text) => error!("错误: {}", text),
  }
}

fn spawn_stdin_reader(tx: Sender<Control>) {
  thread::spawn(move || {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
      let Ok(line) = line else { break };
      if tx.send(Control::Line(line)).is_err() {
        return;
      }
    }
    // 标准输入关闭后保持运行，由 Ctrl-C 退出
  });
}

fn report(result: Result<(), SessionError>) {
  if let Err(e) = result {
    warn!("{}", e);
  }
}

fn dispatch<D: Devices>(inspector: &Inspector<D>, line: &str) -> bool {
  match line.trim() {
    "" => {}
    "capture" => report(inspector.start_capture()),
    "inspect" => report(inspector.start_inference()),
    "auto" => report(inspector.start_continuous_capture()),
    "auto-inspect" => report(inspector.start_continuous_inference()),
    "stop" => inspector.stop(),
    "status" => info!("当前状态: {:?}", inspector.state()),
    "quit" | "exit" => return false,
    other => warn!("未知命令 '{}'. {}", other, HELP),
  }
  true
}

fn main() -> Result<()> {
  let args = Args::parse();

  let mut config = StationConfig::load_or_init(&args.config)
    .with_context(|| format!("加载工位配置 {} 失败", args.config.display()))?;
  if let Some(task) = args.task {
    config.inference.task = task;
  }
  if let Some(source) = args.source {
    config.camera.url = source;
  }
  if let Some(dir) = args.result_dir {
    config.inference.result_dir = dir;
  }
  if let Some(level) = args.log_level {
    config.logging.level = level;
  }
  config.validate()?;

  let _log_guard = init_tracing(&config.logging)?;

  info!("Zhijian 视觉检测工位");
  info!("采集来源: {}", config.camera.url);
  info!("IO 板: {}:{}", config.plc.ip, config.plc.port);
  info!("任务描述: {}", config.inference.task.display());
  info!("结果目录: {}", config.inference.result_dir.display());
  info!("日志目录: {}", config.logging.dir.display());

  let camera = InputWrapper::from_settings(&config.camera).context("打开采集来源失败")?;
  let (inspector, events) = Inspector::spawn(
    camera,
    StationDevices::new(&config),
    LoopSettings::from_config(&config),
  );

  let event_logger = thread::spawn(move || {
    for event in events {
      log_event(event);
    }
  });

  let (tx, rx) = unbounded();
  let ctrlc_tx = tx.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = ctrlc_tx.send(Control::Quit);
  })
  .context("设置 Ctrl-C 处理失败")?;
  spawn_stdin_reader(tx);

  match args.auto {
    Some(AutoMode::Capture) => report(inspector.start_continuous_capture()),
    Some(AutoMode::Inspect) => report(inspector.start_continuous_inference()),
    None => info!("{}", HELP),
  }

  for control in rx {
    match control {
      Control::Line(line) => {
        if !dispatch(&inspector, &line) {
          break;
        }
      }
      Control::Quit => break,
    }
  }

  info!("等待当前会话结束...");
  inspector.shutdown();
  let _ = event_logger.join();
  info!("程序已退出");
  Ok(())
}
