// 该文件是 Zhijian （智检） 项目的一部分。
// src/judge.rs - 检测目标判定
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

//! 把一帧的原始检测结果按检测目标逐一判定，得到每个目标的判定与总体结果。
//!
//! 判定过程不做任何 I/O，相同输入总是得到相同输出。

use std::fmt;

use image::RgbImage;

use crate::{
  config::TargetSpec,
  model::{BBox, RawDetection},
};

/// 不合格目标的显示颜色（红色）
pub const FAILURE_COLOR: [u8; 3] = [255, 0, 0];

/// 单个检测目标的判定结果
#[derive(Debug, Clone, PartialEq)]
pub struct TargetJudgement {
  pub label: String,
  /// 保留两位小数的置信度，没有候选时为 0.00
  pub predict_conf: f32,
  pub bbox: BBox,
  pub color: [u8; 3],
  pub pass_threshold: f32,
  pub passed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  Ok,
  Ng,
}

impl Verdict {
  pub fn as_str(&self) -> &'static str {
    match self {
      Verdict::Ok => "OK",
      Verdict::Ng => "NG",
    }
  }
}

impl fmt::Display for Verdict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 一帧的检测结果，判定顺序与检测目标顺序一致
#[derive(Debug, Clone, PartialEq)]
pub struct InspectionResult {
  pub judgements: Vec<TargetJudgement>,
  /// 所有目标均合格；没有检测目标时为真
  pub passed: bool,
}

impl InspectionResult {
  pub fn from_judgements(judgements: Vec<TargetJudgement>) -> Self {
    let passed = judgements.iter().all(|j| j.passed);
    Self { judgements, passed }
  }

  pub fn verdict(&self) -> Verdict {
    if self.passed { Verdict::Ok } else { Verdict::Ng }
  }
}

/// 二次检测能力，例如裁剪候选区域后用第二个模型或形态学方法复核
///
/// 返回 `Some(conf)` 时以复核置信度替换候选置信度，`None` 表示沿用原值。
pub trait Refinement {
  fn refine(&mut self, image: &RgbImage, target: &TargetSpec, candidate: &RawDetection)
  -> Option<f32>;
}

/// 不做二次检测
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRefinement;

impl Refinement for NoRefinement {
  fn refine(&mut self, _: &RgbImage, _: &TargetSpec, _: &RawDetection) -> Option<f32> {
    None
  }
}

/// 检测框是否完全位于区域内，边界重合也算在内
pub fn contains(region: &BBox, bbox: &BBox) -> bool {
  bbox[0] >= region[0] && bbox[1] >= region[1] && bbox[2] <= region[2] && bbox[3] <= region[3]
}

/// 保留两位小数
pub fn round_conf(conf: f32) -> f32 {
  (conf * 100.0).round() / 100.0
}

/// 选出与目标标签一致且位于预设区域内的置信度最高的检测结果，
/// 置信度相同时取先出现者
fn select_candidate<'a>(
  detections: &'a [RawDetection],
  target: &TargetSpec,
) -> Option<&'a RawDetection> {
  detections
    .iter()
    .filter(|d| d.label == target.label && contains(&target.region, &d.bbox))
    .fold(None, |best: Option<&RawDetection>, d| match best {
      Some(b) if b.confidence >= d.confidence => Some(b),
      _ => Some(d),
    })
}

fn judge_target(target: &TargetSpec, candidate: Option<(BBox, f32)>) -> TargetJudgement {
  let (bbox, predict_conf) = candidate.unwrap_or((target.region, 0.0));
  let passed = predict_conf >= target.pass_threshold;
  TargetJudgement {
    label: target.label.clone(),
    predict_conf,
    bbox,
    color: if passed { target.color } else { FAILURE_COLOR },
    pass_threshold: target.pass_threshold,
    passed,
  }
}

/// 对一帧的检测结果逐目标判定
pub fn judge(detections: &[RawDetection], targets: &[TargetSpec]) -> InspectionResult {
  let judgements = targets
    .iter()
    .map(|target| {
      let candidate = select_candidate(detections, target).map(|d| (d.bbox, round_conf(d.confidence)));
      judge_target(target, candidate)
    })
    .collect();
  InspectionResult::from_judgements(judgements)
}

/// 带二次检测的判定，仅对存在候选的目标调用复核
pub fn judge_with<R: Refinement + ?Sized>(
  image: &RgbImage,
  detections: &[RawDetection],
  targets: &[TargetSpec],
  refinement: &mut R,
) -> InspectionResult {
  let judgements = targets
    .iter()
    .map(|target| {
      let candidate = select_candidate(detections, target).map(|d| {
        let conf = refinement
          .refine(image, target, d)
          .unwrap_or(d.confidence);
        (d.bbox, round_conf(conf))
      });
      judge_target(target, candidate)
    })
    .collect();
  InspectionResult::from_judgements(judgements)
}

#[cfg(test)]
mod tests {
  use super::*;

  const GREEN: [u8; 3] = [0, 255, 0];

  fn scratch() -> TargetSpec {
    TargetSpec::new("scratch", [0.0, 0.0, 100.0, 100.0], 0.5, GREEN)
  }

  #[test]
  fn confident_detection_passes() {
    let detections = [RawDetection::new("scratch", [10.0, 10.0, 50.0, 50.0], 0.7)];
    let result = judge(&detections, &[scratch()]);
    let j = &result.judgements[0];
    assert_eq!(j.predict_conf, 0.70);
    assert_eq!(j.bbox, [10.0, 10.0, 50.0, 50.0]);
    assert_eq!(j.color, GREEN);
    assert!(j.passed);
    assert!(result.passed);
    assert_eq!(result.verdict(), Verdict::Ok);
  }

  #[test]
  fn weak_detection_fails() {
    let detections = [RawDetection::new("scratch", [10.0, 10.0, 50.0, 50.0], 0.3)];
    let result = judge(&detections, &[scratch()]);
    let j = &result.judgements[0];
    assert_eq!(j.predict_conf, 0.30);
    assert_eq!(j.color, FAILURE_COLOR);
    assert!(!j.passed);
    assert_eq!(result.verdict(), Verdict::Ng);
  }

  #[test]
  fn missing_detection_defaults_to_region() {
    let result = judge(&[], &[scratch()]);
    let j = &result.judgements[0];
    assert_eq!(j.predict_conf, 0.0);
    assert_eq!(j.bbox, [0.0, 0.0, 100.0, 100.0]);
    assert!(!j.passed);
    assert!(!result.passed);
  }

  #[test]
  fn other_labels_and_outside_boxes_are_ignored() {
    let detections = [
      RawDetection::new("hole", [10.0, 10.0, 50.0, 50.0], 0.99),
      RawDetection::new("scratch", [90.0, 90.0, 100.5, 100.0], 0.99),
    ];
    let result = judge(&detections, &[scratch()]);
    assert_eq!(result.judgements[0].predict_conf, 0.0);
    assert_eq!(result.judgements[0].bbox, [0.0, 0.0, 100.0, 100.0]);
  }

  #[test]
  fn threshold_is_inclusive() {
    let detections = [RawDetection::new("scratch", [10.0, 10.0, 50.0, 50.0], 0.5)];
    assert!(judge(&detections, &[scratch()]).passed);

    let target = TargetSpec::new("scratch", [0.0, 0.0, 100.0, 100.0], 0.3, GREEN);
    let detections = [RawDetection::new("scratch", [10.0, 10.0, 50.0, 50.0], 0.3)];
    assert!(judge(&detections, &[target]).passed);
  }

  #[test]
  fn rounding_happens_before_comparison() {
    // 0.496 保留两位小数为 0.50，达到阈值
    let detections = [RawDetection::new("scratch", [10.0, 10.0, 50.0, 50.0], 0.496)];
    let result = judge(&detections, &[scratch()]);
    assert_eq!(result.judgements[0].predict_conf, 0.5);
    assert!(result.passed);
  }

  #[test]
  fn box_touching_region_edges_is_contained() {
    let detections = [RawDetection::new("scratch", [0.0, 0.0, 100.0, 100.0], 0.9)];
    let result = judge(&detections, &[scratch()]);
    assert_eq!(result.judgements[0].bbox, [0.0, 0.0, 100.0, 100.0]);
    assert_eq!(result.judgements[0].predict_conf, 0.9);
  }

  #[test]
  fn highest_confidence_wins_and_ties_keep_first() {
    let detections = [
      RawDetection::new("scratch", [1.0, 1.0, 2.0, 2.0], 0.6),
      RawDetection::new("scratch", [3.0, 3.0, 4.0, 4.0], 0.8),
      RawDetection::new("scratch", [5.0, 5.0, 6.0, 6.0], 0.8),
      RawDetection::new("scratch", [7.0, 7.0, 8.0, 8.0], 0.4),
    ];
    let first = judge(&detections, &[scratch()]);
    assert_eq!(first.judgements[0].bbox, [3.0, 3.0, 4.0, 4.0]);
    assert_eq!(first.judgements[0].predict_conf, 0.8);
    assert_eq!(judge(&detections, &[scratch()]), first);
  }

  #[test]
  fn aggregate_is_and_over_targets_in_order() {
    let targets = [
      scratch(),
      TargetSpec::new("hole", [200.0, 200.0, 300.0, 300.0], 0.6, [0, 0, 255]),
    ];
    let detections = [
      RawDetection::new("hole", [210.0, 210.0, 250.0, 250.0], 0.95),
      RawDetection::new("scratch", [10.0, 10.0, 50.0, 50.0], 0.7),
    ];
    let result = judge(&detections, &targets);
    assert_eq!(result.judgements.len(), 2);
    assert_eq!(result.judgements[0].label, "scratch");
    assert_eq!(result.judgements[1].label, "hole");
    assert!(result.passed);

    let result = judge(&detections[..1], &targets);
    assert!(!result.judgements[0].passed);
    assert!(result.judgements[1].passed);
    assert!(!result.passed);
  }

  #[test]
  fn no_targets_is_a_pass() {
    let result = judge(&[RawDetection::new("scratch", [0.0, 0.0, 1.0, 1.0], 0.9)], &[]);
    assert!(result.judgements.is_empty());
    assert!(result.passed);
  }

  struct Halve(usize);

  impl Refinement for Halve {
    fn refine(&mut self, _: &RgbImage, _: &TargetSpec, candidate: &RawDetection) -> Option<f32> {
      self.0 += 1;
      Some(candidate.confidence / 2.0)
    }
  }

  #[test]
  fn refinement_revises_only_existing_candidates() {
    let image = RgbImage::new(1, 1);
    let targets = [
      scratch(),
      TargetSpec::new("hole", [0.0, 0.0, 10.0, 10.0], 0.1, GREEN),
    ];
    let detections = [RawDetection::new("scratch", [10.0, 10.0, 50.0, 50.0], 0.9)];
    let mut halve = Halve(0);
    let result = judge_with(&image, &detections, &targets, &mut halve);
    assert_eq!(halve.0, 1);
    assert_eq!(result.judgements[0].predict_conf, 0.45);
    assert!(!result.judgements[0].passed);
    assert_eq!(result.judgements[1].predict_conf, 0.0);

    let plain = judge_with(&image, &detections, &targets, &mut NoRefinement);
    assert_eq!(plain, judge(&detections, &targets));
  }
}
