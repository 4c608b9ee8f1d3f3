// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/gate.rs - 帧准入控制
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
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  time::{Duration, Instant},
};

use tracing::trace;

const NEVER: u64 = u64::MAX;

/// 帧被丢弃的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
  /// 上一个周期还没有结束
  Busy,
  /// 距离上一个周期开始不足检测间隔
  TooSoon,
  /// 会话已停止
  Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
  Admitted { cycle: u64 },
  Dropped(DropReason),
}

impl Admission {
  pub fn is_admitted(&self) -> bool {
    matches!(self, Admission::Admitted { .. })
  }
}

struct GateState {
  epoch: Instant,
  interval: Duration,
  busy: AtomicBool,
  // 相对 epoch 的毫秒数，只有持有 busy 的一方会写入
  last_start_ms: AtomicU64,
  cycles: AtomicU64,
}

/// 保证同一时刻最多一个检测周期，且周期开始之间至少间隔 `interval`。
/// 判断只用原子操作，不会阻塞生产者线程。
#[derive(Clone)]
pub struct FrameGate {
  state: Arc<GateState>,
}

impl FrameGate {
  pub fn new(interval: Duration) -> Self {
    Self {
      state: Arc::new(GateState {
        epoch: Instant::now(),
        interval,
        busy: AtomicBool::new(false),
        last_start_ms: AtomicU64::new(NEVER),
        cycles: AtomicU64::new(0),
      }),
    }
  }

  /// 尝试开始新周期，成功时返回的 [`CycleGuard`] 在释放时结束该周期
  pub fn try_admit(&self, now: Instant) -> Result<CycleGuard, DropReason> {
    let state = &self.state;
    if state
      .busy
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      trace!("周期进行中, 丢弃帧");
      return Err(DropReason::Busy);
    }

    let now_ms = now.saturating_duration_since(state.epoch).as_millis() as u64;
    let last = state.last_start_ms.load(Ordering::Acquire);
    if last != NEVER && now_ms.saturating_sub(last) < state.interval.as_millis() as u64 {
      state.busy.store(false, Ordering::Release);
      trace!("距上次周期 {}ms, 丢弃帧", now_ms.saturating_sub(last));
      return Err(DropReason::TooSoon);
    }

    state.last_start_ms.store(now_ms, Ordering::Release);
    let cycle = state.cycles.fetch_add(1, Ordering::Relaxed) + 1;
    Ok(CycleGuard {
      state: self.state.clone(),
      cycle,
    })
  }

  pub fn is_busy(&self) -> bool {
    self.state.busy.load(Ordering::Acquire)
  }

  /// 已开始的周期总数
  pub fn cycles(&self) -> u64 {
    self.state.cycles.load(Ordering::Relaxed)
  }
}

/// 代表一个进行中的周期，无论成功、出错还是取消，释放时都会清除忙标志
pub struct CycleGuard {
  state: Arc<GateState>,
  cycle: u64,
}

impl CycleGuard {
  pub fn cycle(&self) -> u64 {
    self.cycle
  }
}

impl Drop for CycleGuard {
  fn drop(&mut self) {
    trace!("周期 {} 结束", self.cycle);
    self.state.busy.store(false, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn second_admission_while_busy_is_dropped() {
    let gate = FrameGate::new(Duration::ZERO);
    let now = Instant::now();
    let guard = gate.try_admit(now).unwrap();
    assert!(gate.is_busy());
    assert_eq!(gate.try_admit(now).err(), Some(DropReason::Busy));
    drop(guard);
    assert!(!gate.is_busy());
    assert!(gate.try_admit(now).is_ok());
  }

  #[test]
  fn admission_within_interval_is_dropped() {
    let gate = FrameGate::new(Duration::from_millis(1500));
    let t0 = Instant::now();
    drop(gate.try_admit(t0).unwrap());

    assert_eq!(
      gate.try_admit(t0 + Duration::from_millis(1499)).err(),
      Some(DropReason::TooSoon)
    );
    // 被丢弃的帧不会占用忙标志
    assert!(!gate.is_busy());
    assert!(gate.try_admit(t0 + Duration::from_millis(1500)).is_ok());
  }

  #[test]
  fn dropped_frames_do_not_move_the_interval() {
    let gate = FrameGate::new(Duration::from_millis(1000));
    let t0 = Instant::now();
    drop(gate.try_admit(t0).unwrap());
    assert!(gate.try_admit(t0 + Duration::from_millis(900)).is_err());
    assert!(gate.try_admit(t0 + Duration::from_millis(1000)).is_ok());
  }

  #[test]
  fn cycle_ids_increase() {
    let gate = FrameGate::new(Duration::ZERO);
    let now = Instant::now();
    let first = gate.try_admit(now).unwrap().cycle();
    let second = gate.try_admit(now).unwrap().cycle();
    assert_eq!((first, second), (1, 2));
    assert_eq!(gate.cycles(), 2);
  }

  #[test]
  fn guard_released_on_other_thread() {
    let gate = FrameGate::new(Duration::ZERO);
    let guard = gate.try_admit(Instant::now()).unwrap();
    std::thread::spawn(move || drop(guard)).join().unwrap();
    assert!(!gate.is_busy());
  }
}
