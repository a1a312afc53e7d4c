// 该文件是 Guanlan （观澜） 项目的一部分。
// src/task.rs - 单帧、重复与连续处理任务
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

use std::{
  thread,
  time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始后处理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    let decoded = now.elapsed();
    info!("后处理完成，耗时: {:.2?}", decoded);
    output.render_result(&frame, &result)?;
    info!("输出完成，耗时: {:.2?}", now.elapsed() - decoded);

    Ok(())
  }
}

/// 对同一帧重复处理，统计平均耗时
pub struct RepeatShotTask {
  times: usize,
}

impl RepeatShotTask {
  /// 统计平均时间时跳过的预热次数
  const WARMUP: usize = 2;

  pub fn with_times(times: usize) -> Self {
    Self { times }
  }
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { times: 1000 }
  }
}

/// 跳过预热后的平均耗时，样本不足时返回 `None`
fn average_after_warmup(times: &[Duration], warmup: usize) -> Option<Duration> {
  let measured = times.get(warmup..)?;
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，重复后处理 {} 次...", self.times);
    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})后处理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    match average_after_warmup(&times, Self::WARMUP) {
      Some(average) => warn!("平均后处理时间: {:.2?}", average),
      None => warn!("重复次数不足 {} 次，不统计平均时间", Self::WARMUP + 1),
    }

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    // 进程内只能注册一次，重复注册时沿用已有的处理函数
    if let Err(e) = ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    }) {
      warn!("无法注册 Ctrl-C 处理函数: {}", e);
    }

    let mut frame_index: usize = 0;
    let mut now = Instant::now();
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      info!("处理第 {} 帧", frame_index);
      let result = model.infer(&frame)?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("处理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{cell::Cell, convert::Infallible};

  struct Doubler;

  impl Model for Doubler {
    type Input = u32;
    type Output = u32;
    type Error = Infallible;

    fn infer(&self, input: &u32) -> Result<u32, Infallible> {
      Ok(input * 2)
    }
  }

  #[derive(Default)]
  struct Collect {
    seen: Cell<u32>,
    calls: Cell<usize>,
  }

  impl Render<u32, u32> for &Collect {
    type Error = Infallible;

    fn render_result(&self, _: &u32, result: &u32) -> Result<(), Infallible> {
      self.seen.set(self.seen.get() + result);
      self.calls.set(self.calls.get() + 1);
      Ok(())
    }
  }

  #[test]
  fn one_shot_uses_first_frame() {
    let sink = Collect::default();
    OneShotTask.run_task(vec![3u32, 5].into_iter(), Doubler, &sink).unwrap();
    assert_eq!(sink.seen.get(), 6);

    assert!(OneShotTask.run_task(std::iter::empty::<u32>(), Doubler, &sink).is_err());
  }

  #[test]
  fn repeat_shot_counts() {
    let sink = Collect::default();
    RepeatShotTask::with_times(5)
      .run_task(std::iter::once(1u32), Doubler, &sink)
      .unwrap();
    assert_eq!(sink.calls.get(), 5);

    // 次数少于预热次数时不做除法
    let sink = Collect::default();
    RepeatShotTask::with_times(1)
      .run_task(std::iter::once(1u32), Doubler, &sink)
      .unwrap();
    assert_eq!(sink.calls.get(), 1);
  }

  #[test]
  fn average_skips_warmup() {
    let times = [10, 10, 2, 4].map(Duration::from_millis);
    assert_eq!(average_after_warmup(&times, 2), Some(Duration::from_millis(3)));
    assert_eq!(average_after_warmup(&times[..2], 2), None);
    assert_eq!(average_after_warmup(&times[..1], 2), None);
  }

  #[test]
  fn continuous_stops_at_frame_number() {
    let sink = Collect::default();
    ContinuousTask::default()
      .with_frame_number(Some(3))
      .run_task(1u32..100, Doubler, &sink)
      .unwrap();
    assert_eq!(sink.calls.get(), 3);
    assert_eq!(sink.seen.get(), 2 + 4 + 6);
  }
}
