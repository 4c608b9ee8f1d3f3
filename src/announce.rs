// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/announce.rs - 语音播报去抖与限流
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
  sync::mpsc::Sender,
  time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;

/// 播报文案，`{number}` 会被替换为线路号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
  pub new_sighting: String,
  pub still_present: String,
  pub nothing_detected: String,
}

impl Default for MessageTemplates {
  fn default() -> Self {
    Self {
      new_sighting: "{number}번 버스가 앞에 있습니다".to_string(),
      still_present: "{number}번 버스가 아직 앞에 있습니다".to_string(),
      nothing_detected: "앞에 버스가 없습니다".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
  NewSighting { number: String },
  StillPresent { number: String, repeat: u32 },
  NothingDetected,
}

impl Announcement {
  pub fn message(&self, templates: &MessageTemplates) -> String {
    match self {
      Announcement::NewSighting { number } => templates.new_sighting.replace("{number}", number),
      Announcement::StillPresent { number, .. } => {
        templates.still_present.replace("{number}", number)
      }
      Announcement::NothingDetected => templates.nothing_detected.clone(),
    }
  }
}

/// 会话级播报状态，只由 [`Debouncer`] 修改
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnouncementState {
  pub last_announced_number: Option<String>,
  pub repeat_count: u32,
  pub last_bus_announce: Option<Instant>,
  pub last_general_announce: Option<Instant>,
}

fn elapsed_at_least(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
  match last {
    None => true,
    Some(last) => now.saturating_duration_since(last) >= interval,
  }
}

/// 两层限流: 公交播报之间的全局间隔，以及同一线路号的重复次数上限。
/// 没有识别到公交时按单独的间隔周期性播报 "未检测到"。
#[derive(Debug, Clone)]
pub struct Debouncer {
  bus_interval: Duration,
  general_interval: Duration,
  max_repeat_count: u32,
  state: AnnouncementState,
}

impl Debouncer {
  pub fn new(config: &Config) -> Self {
    Self {
      bus_interval: config.bus_announce_interval(),
      general_interval: config.general_announce_interval(),
      max_repeat_count: config.max_repeat_count,
      state: AnnouncementState::default(),
    }
  }

  pub fn state(&self) -> &AnnouncementState {
    &self.state
  }

  pub fn reset(&mut self) {
    self.state = AnnouncementState::default();
  }

  /// 处理一个周期的结果，返回需要播报的内容
  pub fn observe(&mut self, number: Option<&str>, now: Instant) -> Option<Announcement> {
    let Some(number) = number else {
      if elapsed_at_least(self.state.last_general_announce, now, self.general_interval) {
        self.state.last_general_announce = Some(now);
        return Some(Announcement::NothingDetected);
      }
      debug!("未检测到公交, 播报间隔未到");
      return None;
    };

    if !elapsed_at_least(self.state.last_bus_announce, now, self.bus_interval) {
      debug!("公交播报间隔未到, 忽略 {}", number);
      return None;
    }

    match self.state.last_announced_number.as_deref() {
      Some(last) if last == number => {
        if self.state.repeat_count >= self.max_repeat_count {
          debug!("线路 {} 已播报 {} 次, 不再重复", number, self.state.repeat_count);
          return None;
        }
        self.state.repeat_count += 1;
        self.state.last_bus_announce = Some(now);
        Some(Announcement::StillPresent {
          number: number.to_string(),
          repeat: self.state.repeat_count,
        })
      }
      _ => {
        self.state.last_announced_number = Some(number.to_string());
        self.state.repeat_count = 1;
        self.state.last_bus_announce = Some(now);
        Some(Announcement::NewSighting {
          number: number.to_string(),
        })
      }
    }
  }
}

/// 外部语音播报: 按入队顺序播放，不打断已排队的内容
pub trait Announcer: Send + Sync {
  fn enqueue(&self, message: &str);
}

/// 只写日志的播报器
pub struct TracingAnnouncer;

impl Announcer for TracingAnnouncer {
  fn enqueue(&self, message: &str) {
    info!("播报: {}", message);
  }
}

/// 把播报内容送入通道，由下游（TTS 进程、测试）按顺序消费
pub struct ChannelAnnouncer {
  tx: Sender<String>,
}

impl ChannelAnnouncer {
  pub fn new(tx: Sender<String>) -> Self {
    Self { tx }
  }
}

impl Announcer for ChannelAnnouncer {
  fn enqueue(&self, message: &str) {
    if self.tx.send(message.to_string()).is_err() {
      warn!("播报通道已关闭, 丢弃: {}", message);
    }
  }
}

impl<A: Announcer + ?Sized> Announcer for std::sync::Arc<A> {
  fn enqueue(&self, message: &str) {
    (**self).enqueue(message)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn debouncer(max_repeat_count: u32) -> Debouncer {
    Debouncer::new(&Config {
      bus_announce_interval_ms: 3000,
      general_announce_interval_ms: 10000,
      max_repeat_count,
      ..Config::default()
    })
  }

  #[test]
  fn repeat_cap_sequence() {
    let mut d = debouncer(2);
    let t0 = Instant::now();
    let step = Duration::from_secs(3);

    assert_eq!(
      d.observe(Some("146"), t0),
      Some(Announcement::NewSighting {
        number: "146".into()
      })
    );
    assert_eq!(d.state().repeat_count, 1);

    assert_eq!(
      d.observe(Some("146"), t0 + step),
      Some(Announcement::StillPresent {
        number: "146".into(),
        repeat: 2
      })
    );
    assert_eq!(d.state().repeat_count, 2);

    let before = d.state().clone();
    assert_eq!(d.observe(Some("146"), t0 + step * 2), None);
    assert_eq!(d.state(), &before);
  }

  #[test]
  fn bus_interval_gates_everything() {
    let mut d = debouncer(5);
    let t0 = Instant::now();
    assert!(d.observe(Some("146"), t0).is_some());

    let before = d.state().clone();
    assert_eq!(d.observe(Some("721"), t0 + Duration::from_millis(2999)), None);
    assert_eq!(d.state(), &before);

    assert_eq!(
      d.observe(Some("721"), t0 + Duration::from_millis(3000)),
      Some(Announcement::NewSighting {
        number: "721".into()
      })
    );
  }

  #[test]
  fn different_number_restarts_count() {
    let mut d = debouncer(1);
    let t0 = Instant::now();
    let step = Duration::from_secs(4);
    assert!(d.observe(Some("146"), t0).is_some());
    assert_eq!(d.observe(Some("146"), t0 + step), None);
    assert!(matches!(
      d.observe(Some("9201"), t0 + step * 2),
      Some(Announcement::NewSighting { .. })
    ));
    assert_eq!(d.state().last_announced_number.as_deref(), Some("9201"));
    assert_eq!(d.state().repeat_count, 1);
  }

  #[test]
  fn nothing_detected_is_periodic() {
    let mut d = debouncer(2);
    let t0 = Instant::now();
    assert_eq!(d.observe(None, t0), Some(Announcement::NothingDetected));
    assert_eq!(d.observe(None, t0 + Duration::from_secs(5)), None);
    assert_eq!(
      d.observe(None, t0 + Duration::from_secs(10)),
      Some(Announcement::NothingDetected)
    );
  }

  #[test]
  fn nothing_detected_keeps_bus_state() {
    let mut d = debouncer(2);
    let t0 = Instant::now();
    d.observe(Some("146"), t0);
    d.observe(None, t0 + Duration::from_secs(1));
    assert_eq!(d.state().last_announced_number.as_deref(), Some("146"));
    assert_eq!(d.state().repeat_count, 1);
  }

  #[test]
  fn reset_clears_state() {
    let mut d = debouncer(2);
    d.observe(Some("146"), Instant::now());
    d.reset();
    assert_eq!(d.state(), &AnnouncementState::default());
  }

  #[test]
  fn renders_korean_messages() {
    let templates = MessageTemplates::default();
    assert_eq!(
      Announcement::NewSighting {
        number: "146".into()
      }
      .message(&templates),
      "146번 버스가 앞에 있습니다"
    );
    assert_eq!(
      Announcement::NothingDetected.message(&templates),
      "앞에 버스가 없습니다"
    );
  }

  #[test]
  fn channel_announcer_preserves_order() {
    let (tx, rx) = std::sync::mpsc::channel();
    let announcer = ChannelAnnouncer::new(tx);
    announcer.enqueue("a");
    announcer.enqueue("b");
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["a", "b"]);
  }
}
