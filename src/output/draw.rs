// 该文件是 Zhijian （智检） 项目的一部分。
// src/output/draw.rs - 判定结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::judge::{InspectionResult, TargetJudgement};

// 文本渲染常量，按 720 像素高度标定，更大的图像等比放大
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: f32 = 24.0;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: f32 = 2.0;
const REFERENCE_HEIGHT: f32 = 720.0;
const BOX_THICKNESS: i32 = 2;
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

pub struct Draw {
  font_size: f32,
  label_text_height: f32,
  label_char_width: f32,
  label_text_vertical_padding: f32,
  font: FontRef<'static>,
}

impl Default for Draw {
  fn default() -> Self {
    let font_data: &'static [u8] = include_bytes!("../../assets/font.ttf");
    let font = FontRef::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font,
    }
  }
}

/// 判定结果的标签文本，例如 `scratch 0.70`
pub fn judgement_label(judgement: &TargetJudgement) -> String {
  format!("{} {:.2}", judgement.label, judgement.predict_conf)
}

impl Draw {
  // 在图像上绘制一个判定框及其标签，bbox 为像素坐标
  fn draw_judgement(&self, image: &mut RgbImage, judgement: &TargetJudgement) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let color = Rgb(judgement.color);
    let bbox = &judgement.bbox;

    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 边框向内加粗
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let zoom = (h as f32 / REFERENCE_HEIGHT).max(1.0);
    let label = judgement_label(judgement);
    let text_width = (label.chars().count() as f32 * self.label_char_width * zoom) as i32;
    let text_height = (self.label_text_height * zoom) as i32;

    // 标签背景放在边框上方，超出图像顶部时贴边
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);
    let label_width = text_width.min(w - label_x);

    if label_width > 0 && text_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width as u32, text_height as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb(TEXT_COLOR),
        label_x,
        label_y + (self.label_text_vertical_padding * zoom) as i32,
        PxScale::from(self.font_size * zoom),
        &self.font,
        &label,
      );
    }
  }

  /// 按判定顺序绘制所有检测目标
  pub fn draw_result(&self, image: &mut RgbImage, result: &InspectionResult) {
    for judgement in &result.judgements {
      self.draw_judgement(image, judgement);
    }
  }

  pub fn annotate(&self, image: &RgbImage, result: &InspectionResult) -> RgbImage {
    let mut annotated = image.clone();
    self.draw_result(&mut annotated, result);
    annotated
  }
}
