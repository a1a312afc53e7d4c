// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/ssd.rs - 基于锚点的框与关键点解码
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

use tracing::{debug, error};

use crate::{
  geometry::{Point2, sigmoid},
  model::{DetectedRegion, PipelineError, anchor::AnchorTable},
  tensor::TensorView,
};

/// 每个锚点回归值的前 4 个通道: `(dx, dy, w, h)`
pub const BOX_CHANNELS: usize = 4;

/// 解码 SSD 风格的检测头
///
/// - `scores`: `[N][1]`，sigmoid 之前的原始分数
/// - `boxes`: `[N][4 + 2K]`，`(dx, dy, w, h, kx0, ky0, ...)`，单位为输入像素，相对锚点
///
/// 分数经 sigmoid 后不大于 `score_threshold` 的锚点被跳过，NaN 分数同样跳过。
/// 结果按锚点顺序排列，后续 NMS 以此作为同分时的顺序。
pub fn decode(
  anchors: &AnchorTable,
  scores: TensorView<'_>,
  boxes: TensorView<'_>,
  num_keypoints: usize,
  score_threshold: f32,
) -> Result<Vec<DetectedRegion>, PipelineError> {
  for (name, view) in [("scores", &scores), ("boxes", &boxes)] {
    if view.cells() != anchors.len() {
      error!(
        "锚点数量不匹配: 锚点表 {} 个, 张量 {} 有 {} 项",
        anchors.len(),
        name,
        view.cells()
      );
      return Err(PipelineError::AnchorCountMismatch {
        name: name.to_string(),
        anchors: anchors.len(),
        actual: view.cells(),
      });
    }
  }

  if scores.channels() < 1 {
    return Err(PipelineError::channels("scores", 1, scores.channels()));
  }
  let expected = BOX_CHANNELS + 2 * num_keypoints;
  if boxes.channels() < expected {
    return Err(PipelineError::channels("boxes", expected, boxes.channels()));
  }

  let input_w = anchors.input_width() as f32;
  let input_h = anchors.input_height() as f32;
  let mut regions = Vec::new();

  for (index, anchor) in anchors.iter().enumerate() {
    let score = sigmoid(scores.entry(index)[0]);
    if !(score > score_threshold) {
      continue;
    }

    let p = boxes.entry(index);
    let cx = (p[0] + anchor.x) / input_w;
    let cy = (p[1] + anchor.y) / input_h;
    let w = p[2] / input_w;
    let h = p[3] / input_h;

    let mut region = DetectedRegion::from_corners(
      score,
      Point2::new(cx - w * 0.5, cy - h * 0.5),
      Point2::new(cx + w * 0.5, cy + h * 0.5),
    );

    region.keypoints = (0..num_keypoints)
      .map(|k| {
        let kx = p[BOX_CHANNELS + 2 * k];
        let ky = p[BOX_CHANNELS + 2 * k + 1];
        Point2::new((kx + anchor.x) / input_w, (ky + anchor.y) / input_h)
      })
      .collect();

    regions.push(region);
  }

  debug!("SSD 解码: {} 个锚点中 {} 个超过阈值", anchors.len(), regions.len());
  Ok(regions)
}
