// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/textdet.rs - EAST 文本检测后处理
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

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::AsTensorSet,
  model::{DetectResult, Model, PipelineError, check_scheme, grid, nms, query_or},
};

// 320x320 输入, 输出网格为 80x80，每格对应输入的 4 像素。
// scores [1, 80, 80, 1] 已过 sigmoid；geometry 为 [1, 80, 80, 5] (四边距离 + 角度)，
// 部分导出的模型把角度拆成单独的 angle [1, 80, 80, 1]。
const TEXTDET_INPUT_W: u32 = 320;
const TEXTDET_INPUT_H: u32 = 320;
const TEXTDET_CELL_STRIDE: f32 = 4.0;

const TEXTDET_SCORE_THRESH: f32 = 0.75;
const TEXTDET_IOU_THRESH: f32 = 0.3;
const TEXTDET_MAX_REGIONS: usize = 100;

const TEXTDET_SCORES_TENSOR: &str = "scores";
const TEXTDET_GEOMETRY_TENSOR: &str = "geometry";
const TEXTDET_ANGLE_TENSOR: &str = "angle";

pub struct TextDet<Frame> {
  score_threshold: f32,
  iou_threshold: f32,
  max_regions: usize,
  _phantom: std::marker::PhantomData<Frame>,
}

pub struct TextDetBuilder {
  score_threshold: f32,
  iou_threshold: f32,
  max_regions: usize,
}

impl FromUrl for TextDetBuilder {
  type Error = PipelineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;

    Ok(TextDetBuilder {
      score_threshold: query_or(url, "score", TEXTDET_SCORE_THRESH)?,
      iou_threshold: query_or(url, "iou", TEXTDET_IOU_THRESH)?,
      max_regions: query_or(url, "max", TEXTDET_MAX_REGIONS)?,
    })
  }
}

impl FromUrlWithScheme for TextDetBuilder {
  const SCHEME: &'static str = "textdet";
}

impl Default for TextDetBuilder {
  fn default() -> Self {
    Self {
      score_threshold: TEXTDET_SCORE_THRESH,
      iou_threshold: TEXTDET_IOU_THRESH,
      max_regions: TEXTDET_MAX_REGIONS,
    }
  }
}

impl TextDetBuilder {
  pub fn score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn max_regions(mut self, max_regions: usize) -> Self {
    self.max_regions = max_regions;
    self
  }

  pub fn build<Frame>(self) -> Result<TextDet<Frame>, PipelineError> {
    info!(
      "文本检测后处理: 分数阈值 {}, IoU 阈值 {}, 最多 {} 个区域",
      self.score_threshold, self.iou_threshold, self.max_regions
    );

    Ok(TextDet {
      score_threshold: self.score_threshold,
      iou_threshold: self.iou_threshold,
      max_regions: self.max_regions,
      _phantom: std::marker::PhantomData,
    })
  }
}

impl<Frame: AsTensorSet> Model for TextDet<Frame> {
  type Input = Frame;
  type Output = DetectResult;
  type Error = PipelineError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensors = input.as_tensor_set();
    let scores = tensors.get(TEXTDET_SCORES_TENSOR)?.view_hwc()?;
    let geometry = tensors.get(TEXTDET_GEOMETRY_TENSOR)?.view_hwc()?;
    let angle = if tensors.contains(TEXTDET_ANGLE_TENSOR) {
      Some(tensors.get(TEXTDET_ANGLE_TENSOR)?.view_hwc()?)
    } else {
      None
    };

    let regions = grid::decode_east(
      scores,
      geometry,
      angle,
      TEXTDET_INPUT_W,
      TEXTDET_INPUT_H,
      TEXTDET_CELL_STRIDE,
      self.score_threshold,
    )?;
    let texts = nms::suppress(&regions, self.iou_threshold, self.max_regions);

    debug!("检测到 {} 个文本区域", texts.len());
    Ok(DetectResult::Regions(texts.into_boxed_slice()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::{Tensor, TensorSet};
  use approx::assert_abs_diff_eq;

  #[test]
  fn concatenated_angle() {
    let (w, h) = (80usize, 80usize);
    let mut scores = vec![0.0f32; w * h];
    let mut geometry = vec![0.0f32; w * h * 5];
    let cell = 10 * w + 20;
    scores[cell] = 0.9;
    geometry[cell * 5..cell * 5 + 5].copy_from_slice(&[8.0, 32.0, 8.0, 32.0, 0.0]);

    let tensors = TensorSet::default()
      .with(TEXTDET_SCORES_TENSOR, Tensor::new(vec![1, h, w, 1], scores).unwrap())
      .with(TEXTDET_GEOMETRY_TENSOR, Tensor::new(vec![1, h, w, 5], geometry).unwrap());

    let model: TextDet<TensorSet> = TextDetBuilder::default().build().unwrap();
    let result = model.infer(&tensors).unwrap();
    let texts = result.regions();

    assert_eq!(texts.len(), 1);
    // 偏移 (80, 40), 右下角 (112, 48), 尺寸 64x16
    assert_abs_diff_eq!(texts[0].btmright.x, 112.0 / 320.0, epsilon = 1e-6);
    assert_abs_diff_eq!(texts[0].btmright.y, 48.0 / 320.0, epsilon = 1e-6);
    assert_abs_diff_eq!(texts[0].topleft.x, 48.0 / 320.0, epsilon = 1e-6);
    assert_abs_diff_eq!(texts[0].topleft.y, 32.0 / 320.0, epsilon = 1e-6);
  }

  #[test]
  fn separate_angle_tensor_is_used() {
    let mut scores = vec![0.0f32; 4];
    scores[0] = 0.8;
    let geometry = vec![1.0f32; 4 * 4];
    let angle = vec![0.25f32; 4];

    let tensors = TensorSet::default()
      .with(TEXTDET_SCORES_TENSOR, Tensor::new(vec![2, 2], scores).unwrap())
      .with(TEXTDET_GEOMETRY_TENSOR, Tensor::new(vec![2, 2, 4], geometry).unwrap())
      .with(TEXTDET_ANGLE_TENSOR, Tensor::new(vec![2, 2], angle).unwrap());

    let model: TextDet<TensorSet> = TextDetBuilder::default().build().unwrap();
    let result = model.infer(&tensors).unwrap();
    assert_eq!(result.regions()[0].rotation, 0.25);
  }
}
