// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/anchor.rs - SSD 锚点表
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

use std::ops::Index;

use tracing::debug;

/// 锚点中心，单位是检测器输入的像素
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
  pub x: f32,
  pub y: f32,
}

/// 生成锚点列表
///
/// 依次遍历每个 (stride, count) 对，在 `ceil(h/stride) x ceil(w/stride)` 的网格上
/// 按行主序为每个格子追加 `count` 个相同的中心点。该顺序必须与模型输出张量的
/// 展平顺序一致，这是和模型之间的约定，无法从张量形状推出。
///
/// stride 或 count 为 0、两个数组长度不同都属于编程错误，直接 panic。
pub fn build_anchors(
  input_w: u32,
  input_h: u32,
  strides: &[u32],
  anchors_per_cell: &[u32],
) -> Vec<Anchor> {
  assert_eq!(
    strides.len(),
    anchors_per_cell.len(),
    "stride 与每格锚点数的数组长度不一致"
  );
  assert!(input_w > 0 && input_h > 0, "输入尺寸必须为正");

  let mut anchors = Vec::with_capacity(expected_anchor_count(
    input_w,
    input_h,
    strides,
    anchors_per_cell,
  ));

  for (&stride, &count) in strides.iter().zip(anchors_per_cell) {
    assert!(stride > 0, "stride 必须为正");
    assert!(count > 0, "每格锚点数必须为正");

    let grid_cols = input_w.div_ceil(stride);
    let grid_rows = input_h.div_ceil(stride);

    for row in 0..grid_rows {
      let y = stride as f32 * (row as f32 + 0.5);
      for col in 0..grid_cols {
        let x = stride as f32 * (col as f32 + 0.5);
        for _ in 0..count {
          anchors.push(Anchor { x, y });
        }
      }
    }
  }

  anchors
}

/// `Σ count_i * ceil(W/stride_i) * ceil(H/stride_i)`
pub fn expected_anchor_count(
  input_w: u32,
  input_h: u32,
  strides: &[u32],
  anchors_per_cell: &[u32],
) -> usize {
  strides
    .iter()
    .zip(anchors_per_cell)
    .filter(|(stride, _)| **stride > 0)
    .map(|(&stride, &count)| {
      count as usize * input_w.div_ceil(stride) as usize * input_h.div_ceil(stride) as usize
    })
    .sum()
}

/// 与某个检测模型绑定的锚点表，模型加载时构建一次，之后只读
#[derive(Debug, Clone)]
pub struct AnchorTable {
  input_w: u32,
  input_h: u32,
  anchors: Box<[Anchor]>,
}

impl AnchorTable {
  pub fn new(input_w: u32, input_h: u32, strides: &[u32], anchors_per_cell: &[u32]) -> Self {
    let anchors = build_anchors(input_w, input_h, strides, anchors_per_cell);
    debug!(
      "锚点表: 输入 {}x{}, stride {:?}, 每格 {:?}, 共 {} 个",
      input_w,
      input_h,
      strides,
      anchors_per_cell,
      anchors.len()
    );

    Self {
      input_w,
      input_h,
      anchors: anchors.into_boxed_slice(),
    }
  }

  pub fn input_width(&self) -> u32 {
    self.input_w
  }

  pub fn input_height(&self) -> u32 {
    self.input_h
  }

  pub fn len(&self) -> usize {
    self.anchors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.anchors.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Anchor> {
    self.anchors.iter()
  }
}

impl Index<usize> for AnchorTable {
  type Output = Anchor;

  fn index(&self, index: usize) -> &Self::Output {
    &self.anchors[index]
  }
}
