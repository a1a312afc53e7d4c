// 该文件是 Guanlan （观澜） 项目的一部分。
// src/bin/simple_oneshot.rs - 单帧后处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use url::Url;

use guanlan::{
  FromUrl,
  input::{InputWrapper, TensorFrame},
  model::Detection,
  output::OutputWrapper,
  task::{OneShotTask, Task},
};
use tracing::info;

/// Guanlan 单帧后处理参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测管线，例如 blazeface:?score=0.6
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 张量转储，例如 tensor:///data/frame.json
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，例如 image:///tmp/out.png 或 log:?detail
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测管线: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let model: Detection<TensorFrame> = Detection::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;

  OneShotTask.run_task(input, model, output)?;

  Ok(())
}
