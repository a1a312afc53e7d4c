// 该文件是 Guanlan （观澜） 项目的一部分。
// tests/pipeline.rs - 管线端到端测试
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

use std::path::PathBuf;

use approx::assert_abs_diff_eq;
use url::Url;

use guanlan::{
  FromUrl,
  input::{InputWrapper, TensorFrame},
  model::{Detection, Model, PipelineError},
  output::OutputWrapper,
  task::{ContinuousTask, Task},
  tensor::{Tensor, TensorSet},
};

fn scratch_dir(name: &str) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("guanlan-it-{}-{}", name, std::process::id()));
  let _ = std::fs::remove_dir_all(&dir);
  std::fs::create_dir_all(&dir).unwrap();
  dir
}

#[test]
fn blazeface_single_face() {
  let mut scores = vec![-8.0f32; 896];
  let mut boxes = vec![0.0f32; 896 * 16];
  // 第一层网格 (row=8, col=8) 的第一个锚点，中心 (68, 68)
  let anchor = 2 * (8 * 16 + 8);
  scores[anchor] = 2.0;
  let b = &mut boxes[anchor * 16..anchor * 16 + 16];
  b[..4].copy_from_slice(&[0.0, 0.0, 32.0, 32.0]);
  b[4..8].copy_from_slice(&[-8.0, -8.0, 8.0, -8.0]);

  let tensors = TensorSet::default()
    .with("classificators", Tensor::new(vec![1, 896, 1], scores).unwrap())
    .with("regressors", Tensor::new(vec![1, 896, 16], boxes).unwrap());

  let url = Url::parse("blazeface:?score=0.5").unwrap();
  let model = Detection::<TensorSet>::from_url(&url).unwrap();
  let result = model.infer(&tensors).unwrap();
  let faces = result.regions();

  assert_eq!(faces.len(), 1);
  let face = &faces[0];
  assert_abs_diff_eq!(face.topleft.x, 52.0 / 128.0, epsilon = 1e-6);
  assert_abs_diff_eq!(face.btmright.y, 84.0 / 128.0, epsilon = 1e-6);
  assert_abs_diff_eq!(face.keypoints[0].x, 60.0 / 128.0, epsilon = 1e-6);
  assert_abs_diff_eq!(face.rotation, 0.0, epsilon = 1e-6);

  let roi = face.roi.unwrap();
  assert_abs_diff_eq!(roi.center.x, 68.0 / 128.0, epsilon = 1e-6);
  assert_abs_diff_eq!(roi.size.x, 48.0 / 128.0, epsilon = 1e-6);
  assert_abs_diff_eq!(roi.corners[0].x, 44.0 / 128.0, epsilon = 1e-5);
  assert_abs_diff_eq!(roi.corners[0].y, 44.0 / 128.0, epsilon = 1e-5);
}

#[test]
fn mismatched_tensor_is_an_error() {
  let tensors = TensorSet::default()
    .with("heatmap", Tensor::new(vec![4, 4, 1], vec![0.0; 16]).unwrap())
    .with("tlrb", Tensor::new(vec![4, 4, 4], vec![0.0; 64]).unwrap())
    .with("landmark", Tensor::new(vec![4, 4, 6], vec![0.0; 96]).unwrap());

  let model = Detection::<TensorSet>::from_url(&Url::parse("dbface:").unwrap()).unwrap();
  assert!(matches!(
    model.infer(&tensors),
    Err(PipelineError::ChannelMismatch { expected: 10, actual: 6, .. })
  ));
}

#[test]
fn empty_score_channels_are_errors() {
  let tensors = TensorSet::default()
    .with("classificators", Tensor::new(vec![1, 896, 0], Vec::new()).unwrap())
    .with("regressors", Tensor::new(vec![1, 896, 16], vec![0.0; 896 * 16]).unwrap());
  let model = Detection::<TensorSet>::from_url(&Url::parse("blazeface:").unwrap()).unwrap();
  assert!(matches!(
    model.infer(&tensors),
    Err(PipelineError::ChannelMismatch { expected: 1, actual: 0, .. })
  ));

  let tensors = TensorSet::default()
    .with("heatmap", Tensor::new(vec![40, 30, 0], Vec::new()).unwrap())
    .with("offsetmap", Tensor::new(vec![40, 30, 16], vec![0.0; 40 * 30 * 16]).unwrap());
  let model = Detection::<TensorSet>::from_url(&Url::parse("objectron:").unwrap()).unwrap();
  assert!(matches!(
    model.infer(&tensors),
    Err(PipelineError::ChannelMismatch { expected: 1, actual: 0, .. })
  ));
}

#[test]
fn dumps_to_records() {
  let input_dir = scratch_dir("input");
  let output_dir = scratch_dir("output");

  for (i, peak) in [0.9f32, 0.1, 0.7].iter().enumerate() {
    let mut heatmap = vec![0.0f32; 16];
    heatmap[5] = *peak;
    let dump = serde_json::json!({
      "tensors": {
        "heatmap": { "shape": [1, 4, 4, 1], "data": heatmap },
        "tlrb": { "shape": [1, 4, 4, 4], "data": vec![1.0f32; 64] },
        "landmark": { "shape": [1, 4, 4, 10], "data": vec![0.0f32; 160] },
      }
    });
    std::fs::write(input_dir.join(format!("{:03}.json", i)), dump.to_string()).unwrap();
  }

  let input = InputWrapper::from_url(&Url::parse(&format!("tensordir://{}", input_dir.display())).unwrap()).unwrap();
  let model: Detection<TensorFrame> = Detection::from_url(&Url::parse("dbface:?score=0.5").unwrap()).unwrap();
  let output =
    OutputWrapper::from_url(&Url::parse(&format!("folder://{}", output_dir.display())).unwrap()).unwrap();

  ContinuousTask::default().run_task(input, model, output).unwrap();

  // 第二帧低于阈值，不记录
  let mut records = Vec::new();
  let mut stack = vec![output_dir];
  while let Some(dir) = stack.pop() {
    for entry in std::fs::read_dir(&dir).unwrap() {
      let path = entry.unwrap().path();
      if path.is_dir() {
        stack.push(path);
      } else {
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        records.push(json);
      }
    }
  }
  records.sort_by_key(|r| r["frame"].as_u64());

  assert_eq!(records.len(), 2);
  assert_eq!(records[0]["frame"], 0);
  assert_eq!(records[1]["frame"], 2);
  assert_eq!(records[1]["kind"], "regions");
  assert_abs_diff_eq!(records[1]["items"][0]["score"].as_f64().unwrap(), 0.7, epsilon = 1e-6);
}
