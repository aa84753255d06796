// 该文件是 Zhijian （智检） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

pub trait Render<Frame, Outcome> {
  type Output;
  fn render_result(&self, frame: &Frame, result: &Outcome) -> Self::Output;
}

pub mod draw;

mod directory_record;
pub use self::directory_record::{
  RECORD_HEIGHT, RECORD_WIDTH, RecordError, Recorded, ResultRecorder, result_path,
};
