// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/task.rs - 生产者侧任务
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  gate::Admission,
  session::Session,
};

pub trait Task<I>: Sized {
  type Error;
  fn run_task(self, input: I, session: &Session) -> Result<(), Self::Error>;
}

/// 提交第一帧并等待该周期结束
pub struct OneShotTask {
  timeout: Duration,
}

impl Default for OneShotTask {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
    }
  }
}

impl OneShotTask {
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }
}

impl<I: Iterator<Item = Frame>> Task<I> for OneShotTask {
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, session: &Session) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let now = Instant::now();
    match session.submit(frame) {
      Admission::Admitted { cycle } => info!("周期 {} 已开始", cycle),
      Admission::Dropped(reason) => anyhow::bail!("帧被丢弃: {:?}", reason),
    }
    if !session.wait_idle(self.timeout) {
      anyhow::bail!("等待周期结束超时 ({:.2?})", self.timeout);
    }
    info!("周期完成，耗时: {:.2?}", now.elapsed());
    Ok(())
  }
}

/// 按固定帧率把输入推送给会话，模拟实时相机
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  fps: Option<f64>,
  interrupt: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_fps(mut self, fps: Option<f64>) -> Self {
    self.fps = fps.filter(|f| *f > 0.0);
    self
  }

  /// 安装 Ctrl-C 处理，收到信号后结束循环。每个进程只能安装一次。
  pub fn with_interrupt(mut self, interrupt: bool) -> Self {
    self.interrupt = interrupt;
    self
  }

  fn install_interrupt(&self) -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let interrupted = Arc::new(AtomicBool::new(false));
    if self.interrupt {
      let flag = interrupted.clone();
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        flag.store(true, Ordering::Release);
        thread::spawn(|| {
          thread::sleep(Duration::from_secs(30));
          warn!("强制退出程序");
          std::process::exit(1);
        });
      })?;
    }
    Ok(interrupted)
  }
}

impl<I: Iterator<Item = Frame>> Task<I> for ContinuousTask {
  type Error = anyhow::Error;

  fn run_task(self, input: I, session: &Session) -> Result<(), Self::Error> {
    info!("开始任务...");
    let interrupted = self.install_interrupt()?;
    let period = self.fps.map(|fps| Duration::from_secs_f64(1.0 / fps));

    let mut frame_index = 0usize;
    let mut admitted = 0usize;
    for frame in input {
      let started = Instant::now();
      frame_index += 1;
      match session.submit(frame) {
        Admission::Admitted { cycle } => {
          admitted += 1;
          info!("第 {} 帧开始周期 {}", frame_index, cycle);
        }
        Admission::Dropped(reason) => debug!("第 {} 帧被丢弃: {:?}", frame_index, reason),
      }

      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if interrupted.load(Ordering::Acquire) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
      if let Some(period) = period {
        thread::sleep(period.saturating_sub(started.elapsed()));
      }
    }

    if !session.wait_idle(Duration::from_secs(30)) {
      warn!("最后一个周期未能按时结束");
    }
    info!("任务完成，共 {} 帧，{} 帧进入检测", frame_index, admitted);
    Ok(())
  }
}
