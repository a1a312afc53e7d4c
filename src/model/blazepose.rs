// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/blazepose.rs - BlazePose 人体检测后处理
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
  model::{
    DetectResult, Model, PipelineError,
    anchor::AnchorTable,
    check_scheme, nms, query_or,
    roi::RoiConfig,
    ssd,
  },
};

// 128x128 输入, 锚点布局与 BlazeFace 相同。
// regressors 为 [1, 896, 12]: 框 + 4 个关键点，
// 依次为髋部中心、全身尺度与旋转点、肩部中心、上半身尺度与旋转点。
const BLAZEPOSE_INPUT_W: u32 = 128;
const BLAZEPOSE_INPUT_H: u32 = 128;
const BLAZEPOSE_STRIDES: [u32; 2] = [8, 16];
const BLAZEPOSE_ANCHORS_PER_CELL: [u32; 2] = [2, 6];
const BLAZEPOSE_NUM_KEYPOINTS: usize = 4;

const BLAZEPOSE_SCORE_THRESH: f32 = 0.75;
const BLAZEPOSE_IOU_THRESH: f32 = 0.3;
const BLAZEPOSE_MAX_POSES: usize = 100;

const BLAZEPOSE_SCORES_TENSOR: &str = "classificators";
const BLAZEPOSE_BOXES_TENSOR: &str = "regressors";

pub struct BlazePose<Frame> {
  anchors: AnchorTable,
  score_threshold: f32,
  iou_threshold: f32,
  max_poses: usize,
  roi: RoiConfig,
  _phantom: std::marker::PhantomData<Frame>,
}

pub struct BlazePoseBuilder {
  score_threshold: f32,
  iou_threshold: f32,
  max_poses: usize,
  roi: RoiConfig,
}

impl FromUrl for BlazePoseBuilder {
  type Error = PipelineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;

    Ok(BlazePoseBuilder {
      score_threshold: query_or(url, "score", BLAZEPOSE_SCORE_THRESH)?,
      iou_threshold: query_or(url, "iou", BLAZEPOSE_IOU_THRESH)?,
      max_poses: query_or(url, "max", BLAZEPOSE_MAX_POSES)?,
      roi: RoiConfig::pose(),
    })
  }
}

impl FromUrlWithScheme for BlazePoseBuilder {
  const SCHEME: &'static str = "blazepose";
}

impl Default for BlazePoseBuilder {
  fn default() -> Self {
    Self {
      score_threshold: BLAZEPOSE_SCORE_THRESH,
      iou_threshold: BLAZEPOSE_IOU_THRESH,
      max_poses: BLAZEPOSE_MAX_POSES,
      roi: RoiConfig::pose(),
    }
  }
}

impl BlazePoseBuilder {
  pub fn score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn max_poses(mut self, max_poses: usize) -> Self {
    self.max_poses = max_poses;
    self
  }

  /// 第二阶段裁剪比例，默认 1.5
  pub fn roi_scale(mut self, scale: f32) -> Self {
    self.roi = self.roi.with_scale(scale, scale);
    self
  }

  pub fn build<Frame>(self) -> Result<BlazePose<Frame>, PipelineError> {
    info!(
      "BlazePose 后处理: 分数阈值 {}, IoU 阈值 {}, 最多 {} 人",
      self.score_threshold, self.iou_threshold, self.max_poses
    );
    let anchors = AnchorTable::new(
      BLAZEPOSE_INPUT_W,
      BLAZEPOSE_INPUT_H,
      &BLAZEPOSE_STRIDES,
      &BLAZEPOSE_ANCHORS_PER_CELL,
    );

    Ok(BlazePose {
      anchors,
      score_threshold: self.score_threshold,
      iou_threshold: self.iou_threshold,
      max_poses: self.max_poses,
      roi: self.roi,
      _phantom: std::marker::PhantomData,
    })
  }
}

impl<Frame: AsTensorSet> Model for BlazePose<Frame> {
  type Input = Frame;
  type Output = DetectResult;
  type Error = PipelineError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensors = input.as_tensor_set();
    let scores = tensors.get(BLAZEPOSE_SCORES_TENSOR)?.view_nc()?;
    let boxes = tensors.get(BLAZEPOSE_BOXES_TENSOR)?.view_nc()?;

    let regions = ssd::decode(
      &self.anchors,
      scores,
      boxes,
      BLAZEPOSE_NUM_KEYPOINTS,
      self.score_threshold,
    )?;
    let poses: Box<[_]> = nms::suppress(&regions, self.iou_threshold, self.max_poses)
      .into_iter()
      .map(|pose| self.roi.apply(pose, BLAZEPOSE_INPUT_W, BLAZEPOSE_INPUT_H))
      .collect();

    debug!("检测到 {} 人", poses.len());
    Ok(DetectResult::Regions(poses))
  }
}
