// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/objectron.rs - 热力图峰值与偏移投票解码
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

use crate::{
  geometry::Point2,
  model::PipelineError,
  tensor::TensorView,
};

/// 长方体的 8 个角点
pub const NUM_KEYPOINTS: usize = 8;
/// 偏移图每个格子的通道数，8 个角点的 (dx, dy)
pub const OFFSET_CHANNELS: usize = 2 * NUM_KEYPOINTS;

const LOGISTIC_CUTOFF_UPPER: f32 = 16.619047164916992;
const LOGISTIC_CUTOFF_LOWER: f32 = -9.0;

/// 分段 logistic，两端避免 `exp` 溢出
pub fn calibrate_logistic(v: f32) -> f32 {
  if v > LOGISTIC_CUTOFF_UPPER {
    1.0
  } else if v < LOGISTIC_CUTOFF_LOWER {
    v.exp()
  } else {
    1.0 / (1.0 + (-v).exp())
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VotingParams {
  pub heatmap_threshold: f32,
  /// 最大值滤波核为 `2 * local_max_distance + 1`
  pub local_max_distance: usize,
  pub voting_radius: usize,
  pub voting_threshold: f32,
  /// x、y 分别比较的容差，单位为网格
  pub voting_allowance: f32,
}

impl Default for VotingParams {
  fn default() -> Self {
    Self {
      heatmap_threshold: 0.6,
      local_max_distance: 2,
      voting_radius: 2,
      voting_threshold: 0.2,
      voting_allowance: 1.0,
    }
  }
}

/// 校准后的单通道热力图
#[derive(Debug, Clone)]
pub struct Heatmap {
  values: Box<[f32]>,
  rows: usize,
  cols: usize,
}

impl Heatmap {
  /// 从 `[H][W][1]` 视图读取，`logistic` 为真时逐点做 [`calibrate_logistic`]
  pub fn from_view(view: TensorView<'_>, logistic: bool) -> Self {
    let values = (0..view.rows())
      .flat_map(|row| (0..view.cols()).map(move |col| (row, col)))
      .map(|(row, col)| {
        let v = view.at(row, col, 0);
        if logistic { calibrate_logistic(v) } else { v }
      })
      .collect();

    Self {
      values,
      rows: view.rows(),
      cols: view.cols(),
    }
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  #[inline]
  pub fn get(&self, row: usize, col: usize) -> f32 {
    self.values[row * self.cols + col]
  }

  /// 以 `(row, col)` 为中心、半径 `distance` 的窗口，边界处截断
  fn window(&self, row: usize, col: usize, distance: usize) -> impl Iterator<Item = (usize, usize)> {
    let rows = row.saturating_sub(distance)..(row + distance + 1).min(self.rows);
    let cols = col.saturating_sub(distance)..(col + distance + 1).min(self.cols);
    rows.flat_map(move |r| cols.clone().map(move |c| (r, c)))
  }

  /// 最大值滤波
  pub fn max_filter(&self, distance: usize) -> Vec<f32> {
    (0..self.rows)
      .flat_map(|row| (0..self.cols).map(move |col| (row, col)))
      .map(|(row, col)| {
        self
          .window(row, col, distance)
          .map(|(r, c)| self.get(r, c))
          .fold(f32::NEG_INFINITY, f32::max)
      })
      .collect()
  }

  /// 局部极大值，按行主序返回 `(row, col)`
  ///
  /// 条件为 `v >= threshold` 且 `v >= maxfilter(v)`，相等的相邻峰都会保留。
  pub fn peaks(&self, threshold: f32, distance: usize) -> Vec<(usize, usize)> {
    let filtered = self.max_filter(distance);
    (0..self.rows)
      .flat_map(|row| (0..self.cols).map(move |col| (row, col)))
      .filter(|&(row, col)| {
        let v = self.get(row, col);
        v >= threshold && v >= filtered[row * self.cols + col]
      })
      .collect()
  }
}

/// 投票得到的 2D 长方体，尚未做 3D 解算
#[derive(Debug, Clone, PartialEq)]
pub struct CuboidKeypoints {
  pub belief: f32,
  pub center: Point2,
  pub keypoints: [Point2; NUM_KEYPOINTS],
}

fn offset_vote(
  offsets: &TensorView<'_>,
  row: usize,
  col: usize,
  keypoint: usize,
  scale: (f32, f32),
) -> Point2 {
  let cell = offsets.cell(row, col);
  Point2::new(
    col as f32 + cell[2 * keypoint] * scale.0,
    row as f32 + cell[2 * keypoint + 1] * scale.1,
  )
}

/// 在候选格子周围做置信度加权投票，结果单位为网格
///
/// 没有任何邻居同意时退回候选格子自身的投票。
fn vote(
  heatmap: &Heatmap,
  offsets: &TensorView<'_>,
  row: usize,
  col: usize,
  params: &VotingParams,
  scale: (f32, f32),
) -> [Point2; NUM_KEYPOINTS] {
  std::array::from_fn(|k| {
    let own = offset_vote(offsets, row, col, k, scale);

    let (mut x_sum, mut y_sum, mut votes) = (0.0f32, 0.0f32, 0.0f32);
    for (r, c) in heatmap.window(row, col, params.voting_radius) {
      let belief = heatmap.get(r, c);
      if !(belief >= params.voting_threshold) {
        continue;
      }
      let v = offset_vote(offsets, r, c, k, scale);
      if (v.x - own.x).abs() > params.voting_allowance || (v.y - own.y).abs() > params.voting_allowance {
        continue;
      }
      x_sum += v.x * belief;
      y_sum += v.y * belief;
      votes += belief;
    }

    if votes > 0.0 {
      Point2::new(x_sum / votes, y_sum / votes)
    } else {
      own
    }
  })
}

/// 8 个角点在 x、y 上都不超过 `allowance` 视为同一物体
pub fn is_identical(a: &[Point2; NUM_KEYPOINTS], b: &[Point2; NUM_KEYPOINTS], allowance: f32) -> bool {
  a.iter()
    .zip(b)
    .all(|(p, q)| (p.x - q.x).abs() <= allowance && (p.y - q.y).abs() <= allowance)
}

/// 解码 objectron 检测头
///
/// - `heatmap`: `[H][W][1]`
/// - `offsets`: `[H][W][16]`，按网格宽高缩放的相对偏移
///
/// 重复物体在网格坐标下判定，保留置信度更高者并占据先出现者的位置。
/// 返回的坐标按网格宽高归一化，顺序为峰值的行主序。
pub fn decode_objectron(
  heatmap: TensorView<'_>,
  offsets: TensorView<'_>,
  params: &VotingParams,
  logistic: bool,
) -> Result<Vec<CuboidKeypoints>, PipelineError> {
  if heatmap.rows() != offsets.rows() || heatmap.cols() != offsets.cols() {
    return Err(PipelineError::grid("heatmap", "offsetmap"));
  }
  if heatmap.channels() < 1 {
    return Err(PipelineError::channels("heatmap", 1, heatmap.channels()));
  }
  if offsets.channels() != OFFSET_CHANNELS {
    return Err(PipelineError::channels(
      "offsetmap",
      OFFSET_CHANNELS,
      offsets.channels(),
    ));
  }

  let heatmap = Heatmap::from_view(heatmap, logistic);
  let map_w = heatmap.cols() as f32;
  let map_h = heatmap.rows() as f32;
  let scale = (map_w, map_h);

  let peaks = heatmap.peaks(params.heatmap_threshold, params.local_max_distance);

  let mut objects: Vec<CuboidKeypoints> = Vec::new();
  for &(row, col) in &peaks {
    let candidate = CuboidKeypoints {
      belief: heatmap.get(row, col),
      center: Point2::new(col as f32, row as f32),
      keypoints: vote(&heatmap, &offsets, row, col, params, scale),
    };

    match objects
      .iter_mut()
      .find(|kept| is_identical(&kept.keypoints, &candidate.keypoints, params.voting_allowance))
    {
      Some(kept) => {
        if kept.belief < candidate.belief {
          *kept = candidate;
        }
      }
      None => objects.push(candidate),
    }
  }

  debug!("objectron 解码: {} 个峰值, 去重后 {} 个物体", peaks.len(), objects.len());

  Ok(
    objects
      .into_iter()
      .map(|object| CuboidKeypoints {
        belief: object.belief,
        center: object.center.scale(1.0 / map_w, 1.0 / map_h),
        keypoints: object.keypoints.map(|p| p.scale(1.0 / map_w, 1.0 / map_h)),
      })
      .collect(),
  )
}
