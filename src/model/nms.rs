// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/nms.rs - 贪心非极大值抑制
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

use tracing::debug;

use crate::model::DetectedRegion;

/// 两个区域的交并比，任一面积不为正时返回 0
pub fn iou(a: &DetectedRegion, b: &DetectedRegion) -> f32 {
  let (xmin0, xmax0) = min_max(a.topleft.x, a.btmright.x);
  let (ymin0, ymax0) = min_max(a.topleft.y, a.btmright.y);
  let (xmin1, xmax1) = min_max(b.topleft.x, b.btmright.x);
  let (ymin1, ymax1) = min_max(b.topleft.y, b.btmright.y);

  let area0 = (xmax0 - xmin0) * (ymax0 - ymin0);
  let area1 = (xmax1 - xmin1) * (ymax1 - ymin1);
  // NaN 也走这里
  if !(area0 > 0.0 && area1 > 0.0) {
    return 0.0;
  }

  let iw = (xmax0.min(xmax1) - xmin0.max(xmin1)).max(0.0);
  let ih = (ymax0.min(ymax1) - ymin0.max(ymin1)).max(0.0);
  let intersect = iw * ih;

  intersect / (area0 + area1 - intersect)
}

fn min_max(a: f32, b: f32) -> (f32, f32) {
  (a.min(b), a.max(b))
}

/// 贪心 NMS
///
/// 按分数降序稳定排序（同分保持输入顺序），候选只与已接受的区域比较，
/// `IoU >= iou_threshold` 即丢弃，接受满 `max_keep` 个后停止。
/// 输入不被修改，对输出再次调用会得到相同结果。
pub fn suppress(
  regions: &[DetectedRegion],
  iou_threshold: f32,
  max_keep: usize,
) -> Vec<DetectedRegion> {
  let mut order: Vec<&DetectedRegion> = regions.iter().collect();
  order.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut accepted: Vec<DetectedRegion> = Vec::with_capacity(max_keep.min(regions.len()));
  for candidate in order {
    if accepted.len() >= max_keep {
      break;
    }
    let overlapped = accepted
      .iter()
      .any(|kept| iou(candidate, kept) >= iou_threshold);
    if !overlapped {
      accepted.push(candidate.clone());
    }
  }

  debug!("NMS: {} 个候选保留 {} 个", regions.len(), accepted.len());
  accepted
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::Point2;
  use approx::assert_abs_diff_eq;

  fn region(score: f32, x0: f32, y0: f32, x1: f32, y1: f32) -> DetectedRegion {
    DetectedRegion::from_corners(score, Point2::new(x0, y0), Point2::new(x1, y1))
  }

  #[test]
  fn iou_of_offset_squares() {
    let a = region(0.9, 0.0, 0.0, 0.5, 0.5);
    let b = region(0.8, 0.25, 0.25, 0.75, 0.75);

    assert_abs_diff_eq!(iou(&a, &b), 0.0625 / 0.4375, epsilon = 1e-6);
    assert_eq!(iou(&a, &b), iou(&b, &a));
    assert_eq!(iou(&a, &a), 1.0);
  }

  #[test]
  fn threshold_decides_overlap() {
    let a = region(0.9, 0.0, 0.0, 0.5, 0.5);
    let b = region(0.8, 0.25, 0.25, 0.75, 0.75);
    let input = vec![b.clone(), a.clone()];

    let kept = suppress(&input, 0.3, 10);
    assert_eq!(kept, vec![a.clone(), b]);

    let kept = suppress(&input, 0.1, 10);
    assert_eq!(kept, vec![a]);
  }

  #[test]
  fn degenerate_box_has_zero_iou() {
    let a = region(0.9, 0.2, 0.2, 0.2, 0.6);
    let b = region(0.8, 0.0, 0.0, 1.0, 1.0);
    assert_eq!(iou(&a, &b), 0.0);
    assert_eq!(iou(&a, &a), 0.0);
    assert_eq!(suppress(&[a, b], 0.0, 10).len(), 2);
  }

  #[test]
  fn ties_keep_input_order() {
    let a = region(0.5, 0.0, 0.0, 0.4, 0.4);
    let b = region(0.5, 0.1, 0.1, 0.5, 0.5);
    let kept = suppress(&[a.clone(), b.clone()], 0.3, 10);
    assert_eq!(kept, vec![a.clone()]);
    let kept = suppress(&[b.clone(), a], 0.3, 10);
    assert_eq!(kept, vec![b]);
  }

  fn scatter() -> Vec<DetectedRegion> {
    (0..40)
      .map(|i| {
        let x = (i % 7) as f32 * 0.09;
        let y = (i / 7) as f32 * 0.11;
        let s = ((i * 37) % 17) as f32 / 17.0;
        region(s, x, y, x + 0.2, y + 0.25)
      })
      .collect()
  }

  #[test]
  fn output_respects_cap_and_threshold() {
    let input = scatter();
    for max_keep in [0, 1, 3, 100] {
      let kept = suppress(&input, 0.3, max_keep);
      assert!(kept.len() <= max_keep);
      for (i, a) in kept.iter().enumerate() {
        for b in kept.iter().skip(i + 1) {
          assert!(iou(a, b) < 0.3);
          assert!(a.score >= b.score);
        }
      }
    }
  }

  #[test]
  fn idempotent() {
    let input = scatter();
    let once = suppress(&input, 0.3, 100);
    let twice = suppress(&once, 0.3, 100);
    assert_eq!(once, twice);
  }
}
