// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/blazeface.rs - BlazeFace 人脸检测后处理
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

// 前置摄像头模型: 128x128 输入, 两层特征图共 896 个锚点。
// scores 为 [1, 896, 1]，regressors 为 [1, 896, 16]，
// 16 = 框 (dx, dy, w, h) + 6 个关键点 (右眼、左眼、鼻尖、嘴、右耳、左耳)。
// 锚点顺序与张量展平顺序一致: 先 stride 8 的 16x16 网格每格 2 个，再 stride 16 的 8x8 网格每格 6 个。
const BLAZEFACE_INPUT_W: u32 = 128;
const BLAZEFACE_INPUT_H: u32 = 128;
const BLAZEFACE_STRIDES: [u32; 2] = [8, 16];
const BLAZEFACE_ANCHORS_PER_CELL: [u32; 2] = [2, 6];
const BLAZEFACE_NUM_KEYPOINTS: usize = 6;

const BLAZEFACE_SCORE_THRESH: f32 = 0.75;
const BLAZEFACE_IOU_THRESH: f32 = 0.3;
const BLAZEFACE_MAX_FACES: usize = 10;

const BLAZEFACE_SCORES_TENSOR: &str = "classificators";
const BLAZEFACE_BOXES_TENSOR: &str = "regressors";

pub struct BlazeFace<Frame> {
  anchors: AnchorTable,
  score_threshold: f32,
  iou_threshold: f32,
  max_faces: usize,
  roi: RoiConfig,
  _phantom: std::marker::PhantomData<Frame>,
}

pub struct BlazeFaceBuilder {
  score_threshold: f32,
  iou_threshold: f32,
  max_faces: usize,
  roi: RoiConfig,
}

impl FromUrl for BlazeFaceBuilder {
  type Error = PipelineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;

    Ok(BlazeFaceBuilder {
      score_threshold: query_or(url, "score", BLAZEFACE_SCORE_THRESH)?,
      iou_threshold: query_or(url, "iou", BLAZEFACE_IOU_THRESH)?,
      max_faces: query_or(url, "max", BLAZEFACE_MAX_FACES)?,
      roi: query_or(url, "roi", RoiConfig::face())?,
    })
  }
}

impl FromUrlWithScheme for BlazeFaceBuilder {
  const SCHEME: &'static str = "blazeface";
}

impl Default for BlazeFaceBuilder {
  fn default() -> Self {
    Self {
      score_threshold: BLAZEFACE_SCORE_THRESH,
      iou_threshold: BLAZEFACE_IOU_THRESH,
      max_faces: BLAZEFACE_MAX_FACES,
      roi: RoiConfig::face(),
    }
  }
}

impl BlazeFaceBuilder {
  pub fn score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn max_faces(mut self, max_faces: usize) -> Self {
    self.max_faces = max_faces;
    self
  }

  pub fn roi(mut self, roi: RoiConfig) -> Self {
    self.roi = roi;
    self
  }

  pub fn build<Frame>(self) -> Result<BlazeFace<Frame>, PipelineError> {
    if self.roi.required_keypoints() > BLAZEFACE_NUM_KEYPOINTS {
      return Err(PipelineError::InvalidParameter(
        "roi",
        format!("需要 {} 个关键点", self.roi.required_keypoints()),
      ));
    }

    info!(
      "BlazeFace 后处理: 分数阈值 {}, IoU 阈值 {}, 最多 {} 张人脸",
      self.score_threshold, self.iou_threshold, self.max_faces
    );
    let anchors = AnchorTable::new(
      BLAZEFACE_INPUT_W,
      BLAZEFACE_INPUT_H,
      &BLAZEFACE_STRIDES,
      &BLAZEFACE_ANCHORS_PER_CELL,
    );

    Ok(BlazeFace {
      anchors,
      score_threshold: self.score_threshold,
      iou_threshold: self.iou_threshold,
      max_faces: self.max_faces,
      roi: self.roi,
      _phantom: std::marker::PhantomData,
    })
  }
}

impl<Frame: AsTensorSet> Model for BlazeFace<Frame> {
  type Input = Frame;
  type Output = DetectResult;
  type Error = PipelineError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensors = input.as_tensor_set();
    let scores = tensors.get(BLAZEFACE_SCORES_TENSOR)?.view_nc()?;
    let boxes = tensors.get(BLAZEFACE_BOXES_TENSOR)?.view_nc()?;

    let regions = ssd::decode(
      &self.anchors,
      scores,
      boxes,
      BLAZEFACE_NUM_KEYPOINTS,
      self.score_threshold,
    )?;
    let faces: Box<[_]> = nms::suppress(&regions, self.iou_threshold, self.max_faces)
      .into_iter()
      .map(|face| self.roi.apply(face, BLAZEFACE_INPUT_W, BLAZEFACE_INPUT_H))
      .collect();

    debug!("检测到 {} 张人脸", faces.len());
    Ok(DetectResult::Regions(faces))
  }
}
