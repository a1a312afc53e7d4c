// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/grid.rs - 无锚点的稠密网格解码
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

use std::f32::consts::E;

use tracing::debug;

use crate::{
  geometry::Point2,
  model::{DetectedRegion, PipelineError},
  tensor::TensorView,
};

/// EAST 几何通道: 到上、右、下、左四条边的距离
pub const EAST_GEOMETRY_CHANNELS: usize = 4;

fn same_grid(a: &TensorView<'_>, b: &TensorView<'_>) -> bool {
  a.rows() == b.rows() && a.cols() == b.cols()
}

/// EAST 文本检测头
///
/// `scores` 为 `[H][W][1]`，已经过 sigmoid；`geometry` 为 `[H][W][4]` 或 `[H][W][5]`，
/// 第 5 个通道是旋转角。4 通道时角度取自单独的 `angle` 张量 `[H][W][1]`。
/// 网格 `(x, y)` 对应输入图像中的 `(stride·x, stride·y)`。
pub fn decode_east(
  scores: TensorView<'_>,
  geometry: TensorView<'_>,
  angle: Option<TensorView<'_>>,
  input_w: u32,
  input_h: u32,
  cell_stride: f32,
  score_threshold: f32,
) -> Result<Vec<DetectedRegion>, PipelineError> {
  if !same_grid(&scores, &geometry) {
    return Err(PipelineError::grid("scores", "geometry"));
  }
  if scores.channels() < 1 {
    return Err(PipelineError::channels("scores", 1, scores.channels()));
  }
  if geometry.channels() < EAST_GEOMETRY_CHANNELS {
    return Err(PipelineError::channels(
      "geometry",
      EAST_GEOMETRY_CHANNELS,
      geometry.channels(),
    ));
  }

  let angle = if geometry.channels() > EAST_GEOMETRY_CHANNELS {
    None
  } else {
    match angle {
      Some(view) if !same_grid(&scores, &view) => {
        return Err(PipelineError::grid("scores", "angle"));
      }
      Some(view) if view.channels() < 1 => {
        return Err(PipelineError::channels("angle", 1, view.channels()));
      }
      Some(view) => Some(view),
      None => {
        return Err(PipelineError::channels(
          "geometry",
          EAST_GEOMETRY_CHANNELS + 1,
          geometry.channels(),
        ));
      }
    }
  };

  let img_w = input_w as f32;
  let img_h = input_h as f32;
  let mut regions = Vec::new();

  for y in 0..scores.rows() {
    for x in 0..scores.cols() {
      let score = scores.at(y, x, 0);
      if !(score >= score_threshold) {
        continue;
      }

      let g = geometry.cell(y, x);
      let a = match &angle {
        Some(view) => view.at(y, x, 0),
        None => g[EAST_GEOMETRY_CHANNELS],
      };

      let offset_x = x as f32 * cell_stride;
      let offset_y = y as f32 * cell_stride;
      let h = g[0] + g[2];
      let w = g[1] + g[3];

      let (sin, cos) = a.sin_cos();
      let end_x = offset_x + cos * g[1] + sin * g[2];
      let end_y = offset_y - sin * g[1] + cos * g[2];
      let start_x = end_x - w;
      let start_y = end_y - h;

      let mut region = DetectedRegion::from_corners(
        score,
        Point2::new(start_x / img_w, start_y / img_h),
        Point2::new(end_x / img_w, end_y / img_h),
      );
      region.rotation = a;
      regions.push(region);
    }
  }

  debug!(
    "EAST 解码: {}x{} 网格中 {} 个超过阈值",
    scores.cols(),
    scores.rows(),
    regions.len()
  );
  Ok(regions)
}

/// 对称指数: `|v| < 1` 时为 `v·e`，否则为 `sign(v)·exp(|v|)`
pub fn symmetric_exp(v: f32) -> f32 {
  if v.abs() < 1.0 {
    v * E
  } else if v > 0.0 {
    v.exp()
  } else {
    -(-v).exp()
  }
}

/// CenterNet 风格的人脸检测头
///
/// - `heatmap`: `[H][W][1]`，已校准的置信度
/// - `tlrb`: `[H][W][4]`，到左、上、右、下边的距离，单位为网格
/// - `landmarks`: `[H][W][2K]`，经 [`symmetric_exp`] 解码的关键点偏移
///
/// 坐标按网格宽高归一化。
pub fn decode_centernet(
  heatmap: TensorView<'_>,
  tlrb: TensorView<'_>,
  landmarks: TensorView<'_>,
  num_keypoints: usize,
  score_threshold: f32,
) -> Result<Vec<DetectedRegion>, PipelineError> {
  if !same_grid(&heatmap, &tlrb) {
    return Err(PipelineError::grid("heatmap", "tlrb"));
  }
  if !same_grid(&heatmap, &landmarks) {
    return Err(PipelineError::grid("heatmap", "landmark"));
  }
  if heatmap.channels() < 1 {
    return Err(PipelineError::channels("heatmap", 1, heatmap.channels()));
  }
  if tlrb.channels() < 4 {
    return Err(PipelineError::channels("tlrb", 4, tlrb.channels()));
  }
  if landmarks.channels() < 2 * num_keypoints {
    return Err(PipelineError::channels(
      "landmark",
      2 * num_keypoints,
      landmarks.channels(),
    ));
  }

  let grid_w = heatmap.cols() as f32;
  let grid_h = heatmap.rows() as f32;
  let mut regions = Vec::new();

  for y in 0..heatmap.rows() {
    for x in 0..heatmap.cols() {
      let score = heatmap.at(y, x, 0);
      if !(score >= score_threshold) {
        continue;
      }

      let (fx, fy) = (x as f32, y as f32);
      let b = tlrb.cell(y, x);
      let mut region = DetectedRegion::from_corners(
        score,
        Point2::new((fx - b[0]) / grid_w, (fy - b[1]) / grid_h),
        Point2::new((fx + b[2]) / grid_w, (fy + b[3]) / grid_h),
      );

      let lm = landmarks.cell(y, x);
      region.keypoints = (0..num_keypoints)
        .map(|k| {
          Point2::new(
            (symmetric_exp(lm[2 * k] * 4.0) + fx) / grid_w,
            (symmetric_exp(lm[2 * k + 1] * 4.0) + fy) / grid_h,
          )
        })
        .collect();

      regions.push(region);
    }
  }

  debug!(
    "CenterNet 解码: {}x{} 网格中 {} 个超过阈值",
    heatmap.cols(),
    heatmap.rows(),
    regions.len()
  );
  Ok(regions)
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use std::f32::consts::FRAC_PI_2;

  #[test]
  fn east_axis_aligned_box() {
    // 2x2 网格, 只有 (x=1, y=1) 超过阈值
    let scores = [0.1, 0.2, 0.3, 0.9];
    let mut geometry = vec![0.0f32; 4 * 5];
    geometry[15..20].copy_from_slice(&[2.0, 3.0, 1.0, 5.0, 0.0]);

    let s = TensorView::new(&scores, 2, 2, 1).unwrap();
    let g = TensorView::new(&geometry, 2, 2, 5).unwrap();
    let regions = decode_east(s, g, None, 16, 16, 4.0, 0.75).unwrap();

    assert_eq!(regions.len(), 1);
    let r = &regions[0];
    // 偏移 (4, 4), end = (4 + 3, 4 + 1), size = (3 + 5, 2 + 1)
    assert_abs_diff_eq!(r.btmright.x, 7.0 / 16.0, epsilon = 1e-6);
    assert_abs_diff_eq!(r.btmright.y, 5.0 / 16.0, epsilon = 1e-6);
    assert_abs_diff_eq!(r.topleft.x, -1.0 / 16.0, epsilon = 1e-6);
    assert_abs_diff_eq!(r.topleft.y, 2.0 / 16.0, epsilon = 1e-6);
    assert_eq!(r.rotation, 0.0);
  }

  #[test]
  fn east_separate_angle_tensor() {
    let scores = [0.8];
    let geometry = [0.0, 2.0, 0.0, 2.0];
    let angle = [FRAC_PI_2];

    let s = TensorView::new(&scores, 1, 1, 1).unwrap();
    let g = TensorView::new(&geometry, 1, 1, 4).unwrap();
    let a = TensorView::new(&angle, 1, 1, 1).unwrap();
    let regions = decode_east(s, g, Some(a), 8, 8, 4.0, 0.75).unwrap();

    let r = &regions[0];
    // end = (0, -2), start = end - (4, 0)
    assert_abs_diff_eq!(r.rotation, FRAC_PI_2);
    assert_abs_diff_eq!(r.btmright.x, 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(r.topleft.x, -0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(r.topleft.y, -0.25, epsilon = 1e-6);
    assert!(r.topleft.y <= r.btmright.y);
  }

  #[test]
  fn east_requires_angle_source() {
    let scores = [0.8];
    let geometry = [0.0; 4];
    let s = TensorView::new(&scores, 1, 1, 1).unwrap();
    let g = TensorView::new(&geometry, 1, 1, 4).unwrap();
    assert!(decode_east(s, g, None, 8, 8, 4.0, 0.5).is_err());
  }

  #[test]
  fn east_threshold_is_inclusive() {
    let scores = [0.75];
    let geometry = [1.0; 5];
    let s = TensorView::new(&scores, 1, 1, 1).unwrap();
    let g = TensorView::new(&geometry, 1, 1, 5).unwrap();
    assert_eq!(decode_east(s, g, None, 8, 8, 4.0, 0.75).unwrap().len(), 1);
  }

  #[test]
  fn east_empty_score_channels() {
    let geometry = [1.0f32; 4 * 5];
    let s = TensorView::new(&[], 2, 2, 0).unwrap();
    let g = TensorView::new(&geometry, 2, 2, 5).unwrap();
    assert!(matches!(
      decode_east(s, g, None, 8, 8, 4.0, 0.5),
      Err(PipelineError::ChannelMismatch { expected: 1, actual: 0, .. })
    ));

    // 单独的角度张量同样至少需要 1 个通道
    let scores = [0.9f32];
    let geometry = [1.0f32; 4];
    let s = TensorView::new(&scores, 1, 1, 1).unwrap();
    let g = TensorView::new(&geometry, 1, 1, 4).unwrap();
    let a = TensorView::new(&[], 1, 1, 0).unwrap();
    assert!(matches!(
      decode_east(s, g, Some(a), 8, 8, 4.0, 0.5),
      Err(PipelineError::ChannelMismatch { expected: 1, actual: 0, .. })
    ));
  }

  #[test]
  fn symmetric_exp_branches() {
    assert_abs_diff_eq!(symmetric_exp(0.5), 0.5 * E);
    assert_abs_diff_eq!(symmetric_exp(2.0), 2.0f32.exp());
    assert_abs_diff_eq!(symmetric_exp(-2.0), -(2.0f32.exp()));
    assert_eq!(symmetric_exp(0.0), 0.0);
  }

  #[test]
  fn centernet_face() {
    // 4x4 网格, (x=2, y=1) 处有人脸
    let mut heatmap = vec![0.0f32; 16];
    heatmap[4 + 2] = 0.6;
    let mut tlrb = vec![0.0f32; 16 * 4];
    tlrb[(4 + 2) * 4..(4 + 2) * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 2.0]);
    let mut landmarks = vec![0.0f32; 16 * 2];
    landmarks[(4 + 2) * 2] = 0.125;

    let h = TensorView::new(&heatmap, 4, 4, 1).unwrap();
    let b = TensorView::new(&tlrb, 4, 4, 4).unwrap();
    let l = TensorView::new(&landmarks, 4, 4, 2).unwrap();
    let regions = decode_centernet(h, b, l, 1, 0.4).unwrap();

    assert_eq!(regions.len(), 1);
    let r = &regions[0];
    assert_abs_diff_eq!(r.topleft.x, 0.25);
    assert_abs_diff_eq!(r.topleft.y, 0.0);
    assert_abs_diff_eq!(r.btmright.x, 0.75);
    assert_abs_diff_eq!(r.btmright.y, 0.75);
    // 0.125 * 4 = 0.5 < 1, 偏移 0.5e
    assert_abs_diff_eq!(r.keypoints[0].x, (0.5 * E + 2.0) / 4.0, epsilon = 1e-6);
    assert_abs_diff_eq!(r.keypoints[0].y, 0.25, epsilon = 1e-6);
  }

  #[test]
  fn centernet_grid_mismatch() {
    let heatmap = [0.0f32; 4];
    let tlrb = [0.0f32; 8 * 4];
    let landmarks = [0.0f32; 4 * 10];
    let h = TensorView::new(&heatmap, 2, 2, 1).unwrap();
    let b = TensorView::new(&tlrb, 2, 4, 4).unwrap();
    let l = TensorView::new(&landmarks, 2, 2, 10).unwrap();
    assert!(matches!(
      decode_centernet(h, b, l, 5, 0.4),
      Err(PipelineError::GridMismatch(..))
    ));
  }

  #[test]
  fn centernet_empty_heatmap_channels() {
    let tlrb = [0.0f32; 4 * 4];
    let landmarks = [0.0f32; 4 * 10];
    let h = TensorView::new(&[], 2, 2, 0).unwrap();
    let b = TensorView::new(&tlrb, 2, 2, 4).unwrap();
    let l = TensorView::new(&landmarks, 2, 2, 10).unwrap();
    assert!(matches!(
      decode_centernet(h, b, l, 5, 0.4),
      Err(PipelineError::ChannelMismatch { expected: 1, actual: 0, .. })
    ));
  }

  #[test]
  fn nan_scores_are_skipped() {
    let scores = [f32::NAN, 0.9];
    let geometry = [1.0f32; 2 * 5];
    let s = TensorView::new(&scores, 1, 2, 1).unwrap();
    let g = TensorView::new(&geometry, 1, 2, 5).unwrap();
    let regions = decode_east(s, g, None, 8, 8, 4.0, 0.5).unwrap();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].score, 0.9);

    let tlrb = [1.0f32; 2 * 4];
    let landmarks = [0.0f32; 2 * 2];
    let h = TensorView::new(&scores, 1, 2, 1).unwrap();
    let b = TensorView::new(&tlrb, 1, 2, 4).unwrap();
    let l = TensorView::new(&landmarks, 1, 2, 2).unwrap();
    let regions = decode_centernet(h, b, l, 1, 0.4).unwrap();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].score, 0.9);
  }
}
