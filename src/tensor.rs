// 该文件是 Guanlan （观澜） 项目的一部分。
// src/tensor.rs - 原始输出张量与跨步访问
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

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
  #[error("缺少输出张量: {0}")]
  Missing(String),
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("张量形状 {shape:?} 无法按 {layout} 布局解释")]
  LayoutMismatch { shape: Vec<usize>, layout: &'static str },
}

#[derive(Deserialize)]
struct RawTensor {
  shape: Vec<usize>,
  data: Vec<f32>,
}

/// 推理引擎输出的一个浮点张量，行主序存储
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
  shape: Vec<usize>,
  data: Box<[f32]>,
}

impl TryFrom<RawTensor> for Tensor {
  type Error = TensorError;

  fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
    Tensor::new(raw.shape, raw.data)
  }
}

impl Tensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorError> {
    let expected = shape.iter().product::<usize>();
    if expected != data.len() {
      return Err(TensorError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      shape,
      data: data.into_boxed_slice(),
    })
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  /// 按 `[H][W][C]` 解释，接受 `[1,H,W,C]`、`[H,W,C]` 与 `[H,W]`
  pub fn view_hwc(&self) -> Result<TensorView<'_>, TensorError> {
    let (rows, cols, channels) = match self.shape.as_slice() {
      [1, h, w, c] | [h, w, c] => (*h, *w, *c),
      [h, w] => (*h, *w, 1),
      _ => {
        return Err(TensorError::LayoutMismatch {
          shape: self.shape.clone(),
          layout: "[H][W][C]",
        });
      }
    };
    TensorView::new(&self.data, rows, cols, channels)
  }

  /// 按 `[N][C]` 解释，接受 `[1,N,C]`、`[N,C]` 与 `[N]`
  pub fn view_nc(&self) -> Result<TensorView<'_>, TensorError> {
    let (entries, channels) = match self.shape.as_slice() {
      [1, n, c] | [n, c] => (*n, *c),
      [n] => (*n, 1),
      _ => {
        return Err(TensorError::LayoutMismatch {
          shape: self.shape.clone(),
          layout: "[N][C]",
        });
      }
    };
    TensorView::new(&self.data, entries, 1, channels)
  }
}

/// 一帧推理的全部命名输出
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct TensorSet {
  tensors: BTreeMap<String, Tensor>,
}

impl TensorSet {
  pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
    self.tensors.insert(name.into(), tensor);
  }

  pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
    self.insert(name, tensor);
    self
  }

  pub fn get(&self, name: &str) -> Result<&Tensor, TensorError> {
    self
      .tensors
      .get(name)
      .ok_or_else(|| TensorError::Missing(name.to_string()))
  }

  pub fn contains(&self, name: &str) -> bool {
    self.tensors.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.tensors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tensors.is_empty()
  }
}

/// 行主序 `[rows][cols][channels]` 浮点缓冲区的只读视图
///
/// `[N][C]` 形式的张量以 `cols == 1` 表示，用 [`TensorView::entry`] 访问。
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
  data: &'a [f32],
  rows: usize,
  cols: usize,
  channels: usize,
}

impl<'a> TensorView<'a> {
  pub fn new(
    data: &'a [f32],
    rows: usize,
    cols: usize,
    channels: usize,
  ) -> Result<Self, TensorError> {
    let expected = rows * cols * channels;
    if data.len() != expected {
      return Err(TensorError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data,
      rows,
      cols,
      channels,
    })
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  /// 空间位置数量（`rows * cols`）
  pub fn cells(&self) -> usize {
    self.rows * self.cols
  }

  #[inline]
  pub fn at(&self, row: usize, col: usize, channel: usize) -> f32 {
    debug_assert!(row < self.rows && col < self.cols && channel < self.channels);
    self.data[(row * self.cols + col) * self.channels + channel]
  }

  /// 某个空间位置的全部通道
  #[inline]
  pub fn cell(&self, row: usize, col: usize) -> &'a [f32] {
    debug_assert!(row < self.rows && col < self.cols);
    let start = (row * self.cols + col) * self.channels;
    &self.data[start..start + self.channels]
  }

  /// 按扁平下标访问，`[N][C]` 张量的第 `index` 项
  #[inline]
  pub fn entry(&self, index: usize) -> &'a [f32] {
    let start = index * self.channels;
    &self.data[start..start + self.channels]
  }
}
