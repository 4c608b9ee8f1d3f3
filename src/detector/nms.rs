// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/detector/nms.rs - 非极大值抑制
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

use crate::detector::{BoundingBox, Detection};

/// 计算两个边界框的 IoU，并集面积为 0 时返回 0
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let intersection = (a.right.min(b.right) - a.left.max(b.left)).max(0.0)
    * (a.bottom.min(b.bottom) - a.top.max(b.top)).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 非极大值抑制，与类别无关。
///
/// 按置信度降序遍历，只有与所有已保留框的 IoU 都不超过 `iou_threshold`
/// 的候选才会被保留。排序是稳定的，置信度相同时保持输入顺序。
pub fn suppress(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
  for candidate in detections {
    if kept
      .iter()
      .all(|k| iou(&k.bounding_box, &candidate.bounding_box) <= iou_threshold)
    {
      kept.push(candidate);
    }
  }

  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(left: f32, top: f32, right: f32, bottom: f32, confidence: f32) -> Detection {
    Detection {
      bounding_box: BoundingBox::new(left, top, right, bottom),
      label: "bus".to_string(),
      confidence,
    }
  }

  #[test]
  fn identical_boxes_have_unit_iou() {
    let a = BoundingBox::new(10.0, 10.0, 50.0, 30.0);
    assert_eq!(iou(&a, &a), 1.0);
  }

  #[test]
  fn disjoint_boxes_have_zero_iou() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn zero_area_boxes_have_zero_iou() {
    let a = BoundingBox::new(5.0, 5.0, 5.0, 5.0);
    assert_eq!(iou(&a, &a), 0.0);
  }

  #[test]
  fn partial_overlap() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
    // 交 50, 并 150
    assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn empty_input_gives_empty_output() {
    assert!(suppress(Vec::new(), 0.5).is_empty());
  }

  #[test]
  fn keeps_highest_confidence_of_overlapping_group() {
    let input = vec![
      det(0.0, 0.0, 100.0, 100.0, 0.6),
      det(2.0, 2.0, 102.0, 102.0, 0.9),
      det(200.0, 200.0, 260.0, 260.0, 0.7),
      det(1.0, 1.0, 101.0, 101.0, 0.8),
    ];
    let result = suppress(input, 0.5);

    assert_eq!(result.len(), 2);
    assert_eq!(result[0].confidence, 0.9);
    assert_eq!(result[1].confidence, 0.7);
  }

  #[test]
  fn survivors_never_overlap_above_threshold() {
    let mut input = Vec::new();
    for i in 0..40 {
      let offset = (i * 7 % 60) as f32;
      let confidence = 0.5 + (i % 10) as f32 * 0.04;
      input.push(det(
        offset,
        offset / 2.0,
        offset + 40.0,
        offset / 2.0 + 30.0,
        confidence,
      ));
    }
    let len = input.len();
    let threshold = 0.3;
    let result = suppress(input, threshold);

    assert!(result.len() <= len);
    for (i, a) in result.iter().enumerate() {
      for b in &result[i + 1..] {
        assert!(iou(&a.bounding_box, &b.bounding_box) <= threshold);
      }
    }
  }

  #[test]
  fn threshold_is_inclusive() {
    let a = det(0.0, 0.0, 10.0, 10.0, 0.9);
    let b = det(5.0, 0.0, 15.0, 10.0, 0.8);
    let overlap = iou(&a.bounding_box, &b.bounding_box);
    assert_eq!(suppress(vec![a.clone(), b.clone()], overlap).len(), 2);
    assert_eq!(suppress(vec![a, b], overlap - 0.01).len(), 1);
  }
}
