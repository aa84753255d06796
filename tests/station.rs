// 该文件是 Zhijian （智检） 项目的一部分。
// tests/station.rs - 工位端到端测试
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

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Receiver;
use image::RgbImage;

use zhijian::{
  config::{BitMap, ConfigError, TaskDescriptor},
  fieldbus::{BoxedIo, DiscreteIo, INPUT_BITS, IoLinkError},
  input::ImageFileInput,
  judge::Verdict,
  session::{Devices, Event, Inspector, LoopSettings, RunState},
  task::InspectionPipeline,
};

const WAIT: Duration = Duration::from_secs(10);

struct Bench {
  _dir: tempfile::TempDir,
  images: PathBuf,
  task: PathBuf,
  results: PathBuf,
}

/// 一张 64x48 的图片、一份检测记录和一个单目标任务
fn bench(score: f32) -> Bench {
  let dir = tempfile::tempdir().unwrap();
  let images = dir.path().join("images");
  std::fs::create_dir_all(&images).unwrap();
  RgbImage::new(64, 48)
    .save(images.join("20250101_083000.png"))
    .unwrap();

  let record = dir.path().join("detections.txt");
  std::fs::write(&record, format!("scratch, {}, 8, 8, 32, 32\n", score)).unwrap();

  let task = dir.path().join("setting.json");
  let descriptor = serde_json::json!([{
    "task_name": "bracket",
    "model": [{"path": format!("record://{}", record.display()), "conf": 0.1}],
    "targets": [{
      "label": "scratch",
      "conf1": 0.5,
      "color": [0, 255, 0],
      "predefined_region": [0, 0, 64, 48]
    }]
  }]);
  std::fs::write(&task, descriptor.to_string()).unwrap();

  let results = dir.path().join("results");
  Bench {
    images,
    task,
    results,
    _dir: dir,
  }
}

#[derive(Clone, Default)]
struct PulseIo {
  levels: Arc<Mutex<VecDeque<bool>>>,
  writes: Arc<Mutex<Vec<(u16, bool)>>>,
}

impl DiscreteIo for PulseIo {
  fn connect(&mut self) -> bool {
    true
  }

  fn read_bits(&mut self) -> Result<[bool; INPUT_BITS], IoLinkError> {
    let mut bits = [false; INPUT_BITS];
    bits[2] = self.levels.lock().unwrap().pop_front().unwrap_or(false);
    Ok(bits)
  }

  fn write_bit(&mut self, address: u16, value: bool) -> Result<(), IoLinkError> {
    self.writes.lock().unwrap().push((address, value));
    Ok(())
  }

  fn close(&mut self) {}
}

struct BenchDevices {
  task: PathBuf,
  io: PulseIo,
}

impl Devices for BenchDevices {
  fn load_task(&self) -> Result<TaskDescriptor, ConfigError> {
    TaskDescriptor::load(&self.task)
  }

  fn open_io(&self) -> BoxedIo {
    Box::new(self.io.clone())
  }
}

fn settings(results: &Path) -> LoopSettings {
  LoopSettings {
    bits: BitMap {
      trigger: 2,
      result_ok: 4,
      result_ng: 5,
      heartbeat: None,
    },
    poll_interval: Duration::from_millis(5),
    result_root: results.to_path_buf(),
  }
}

fn next_inspection(rx: &Receiver<Event>) -> (bool, Option<PathBuf>) {
  loop {
    match rx.recv_timeout(WAIT).expect("等待检测结果超时") {
      Event::Inspection { result, record } => return (result.passed, record),
      _ => continue,
    }
  }
}

fn until_finished(rx: &Receiver<Event>) {
  while !matches!(rx.recv_timeout(WAIT).expect("等待会话结束超时"), Event::Finished(_)) {}
}

#[test]
fn triggered_inspection_writes_ok_and_archives_result() {
  let bench = bench(0.9);
  let io = PulseIo::default();
  io.levels.lock().unwrap().extend([false, true, true, false]);
  let devices = BenchDevices {
    task: bench.task.clone(),
    io: io.clone(),
  };
  let (inspector, rx) = Inspector::spawn(
    ImageFileInput::open(&bench.images).unwrap(),
    devices,
    settings(&bench.results),
  );

  inspector.start_continuous_inference().unwrap();
  let (passed, record) = next_inspection(&rx);
  assert!(passed);

  let record = record.unwrap();
  assert_eq!(record.file_name().unwrap(), "OK_20250101_083000.jpg");
  assert!(record.starts_with(bench.results.join("bracket")));
  assert!(record.exists());

  // 等待下降沿清除结果位
  let deadline = std::time::Instant::now() + WAIT;
  while io.writes.lock().unwrap().len() < 4 && std::time::Instant::now() < deadline {
    std::thread::sleep(Duration::from_millis(5));
  }
  inspector.stop();
  until_finished(&rx);
  assert_eq!(inspector.state(), RunState::Idle);
  assert_eq!(
    *io.writes.lock().unwrap(),
    vec![(4, true), (5, false), (4, false), (5, false)]
  );
}

#[test]
fn manual_capture_then_inspect_reports_ng() {
  let bench = bench(0.3);
  let devices = BenchDevices {
    task: bench.task.clone(),
    io: PulseIo::default(),
  };
  let (inspector, rx) = Inspector::spawn(
    ImageFileInput::open(&bench.images).unwrap(),
    devices,
    settings(&bench.results),
  );

  inspector.start_capture().unwrap();
  until_finished(&rx);
  let frame = inspector.last_frame().unwrap();
  assert_eq!(frame.timestamp(), "20250101_083000");
  assert_eq!(
    frame.captured_at().naive_local(),
    chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
      .unwrap()
      .and_hms_opt(8, 30, 0)
      .unwrap()
  );

  inspector.start_inference().unwrap();
  let (passed, record) = next_inspection(&rx);
  assert!(!passed);
  let name = record.unwrap().file_name().unwrap().to_string_lossy().into_owned();
  assert!(name.starts_with(Verdict::Ng.as_str()));
  until_finished(&rx);
}

#[test]
fn offline_pipeline_matches_session_result() {
  let bench = bench(0.5);
  let task = TaskDescriptor::load(&bench.task).unwrap();
  let mut pipeline = InspectionPipeline::load(task, &bench.results).unwrap();
  assert_eq!(pipeline.task().task_name, "bracket");
  let mut input = ImageFileInput::open(&bench.images).unwrap();

  let frame = zhijian::input::CaptureSource::get_frame(&mut input).unwrap();
  let (inspection, annotated) = pipeline.inspect(&frame).unwrap();
  assert!(inspection.result.passed);
  assert_eq!(inspection.result.judgements[0].predict_conf, 0.5);
  assert_eq!(annotated.dimensions(), (64, 48));
  assert!(inspection.record.unwrap().exists());
}
