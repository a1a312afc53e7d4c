// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output/log_output.rs - 以日志形式输出检测结果
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

use std::convert::Infallible;

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, input::TensorFrame, model::DetectResult, output::Render,
};

/// `log:` 输出，`log:?detail` 时逐个打印检测项
#[derive(Debug, Default)]
pub struct LogOutput {
  detail: bool,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = Infallible;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    Ok(LogOutput {
      detail: uri.query_pairs().any(|(k, _)| k == "detail"),
    })
  }
}

impl Render<TensorFrame, DetectResult> for LogOutput {
  type Error = Infallible;

  fn render_result(&self, frame: &TensorFrame, result: &DetectResult) -> Result<(), Self::Error> {
    info!("第 {} 帧: {} 个检测结果", frame.index, result.len());
    if !self.detail {
      return Ok(());
    }

    for (i, region) in result.regions().iter().enumerate() {
      info!(
        "  [{}] 置信度 {:.3}, 框 ({:.4}, {:.4}) - ({:.4}, {:.4}), 旋转 {:.3}",
        i,
        region.score,
        region.topleft.x,
        region.topleft.y,
        region.btmright.x,
        region.btmright.y,
        region.rotation
      );
      if let Some(roi) = &region.roi {
        debug!(
          "      ROI 中心 ({:.4}, {:.4}), 尺寸 {:.4}x{:.4}",
          roi.center.x, roi.center.y, roi.size.x, roi.size.y
        );
      }
    }
    for (i, cuboid) in result.cuboids().iter().enumerate() {
      info!(
        "  [{}] 置信度 {:.3}, 中心 ({:.4}, {:.4}), 三维中心 ({:.3}, {:.3}, {:.3})",
        i,
        cuboid.belief,
        cuboid.center.x,
        cuboid.center.y,
        cuboid.center3d.x,
        cuboid.center3d.y,
        cuboid.center3d.z
      );
    }
    Ok(())
  }
}
