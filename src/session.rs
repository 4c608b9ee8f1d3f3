// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/session.rs - 检测会话
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

//! 一次检测会话: 生产者线程通过 [`Session::submit`] 推送帧，
//! 被准入的帧在工作线程上依次经过预处理、推理、解码、NMS、裁剪，
//! 文字识别结果在识别器的回调里完成解析和播报决策。
//!
//! 同一时刻最多一个周期，由 [`FrameGate`] 的忙标志保证；
//! 停止会话会递增代数，之后到达的识别结果一律丢弃。

use std::{
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc::{self, Receiver, SyncSender, TrySendError},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  announce::{AnnouncementState, Announcer, Debouncer},
  config::{Config, ConfigError},
  detector::{Decoder, crop, suppress},
  frame::{Crop, Frame},
  gate::{Admission, CycleGuard, DropReason, FrameGate},
  model::{InferenceEngine, InferenceError},
  output::{CycleJournal, CycleOutcome, CycleRecord},
  parse::parse_number,
  preprocess::{PreprocessError, preprocess},
  recognize::{RecognitionError, RecognizedText, TextRecognizer},
};

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("无法启动工作线程: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("输出布局不匹配: 配置为 {config}, 引擎输出 {engine}")]
  LayoutMismatch {
    config: &'static str,
    engine: &'static str,
  },
}

/// 中止单个周期的原因，不会影响会话本身
#[derive(Error, Debug)]
pub enum CycleError {
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
  #[error("文字识别失败: {0}")]
  Recognition(#[from] RecognitionError),
  #[error("会话已停止")]
  Cancelled,
}

struct Job {
  frame: Frame,
  guard: CycleGuard,
  generation: u64,
}

struct Shared {
  config: Arc<Config>,
  announcer: Box<dyn Announcer>,
  debouncer: Mutex<Debouncer>,
  generation: AtomicU64,
  stopped: AtomicBool,
  journal: Option<CycleJournal>,
}

impl Shared {
  fn debouncer(&self) -> MutexGuard<'_, Debouncer> {
    self.debouncer.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn is_current(&self, generation: u64) -> bool {
    !self.stopped.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == generation
  }

  fn checkpoint(&self, generation: u64) -> Result<(), CycleError> {
    if self.is_current(generation) {
      Ok(())
    } else {
      Err(CycleError::Cancelled)
    }
  }

  fn journal(&self, record: CycleRecord) {
    if let Some(journal) = &self.journal {
      journal.record(&record);
    }
  }

  /// 推进播报状态机，`number` 为 `None` 表示本周期没有目标
  fn announce(&self, generation: u64, number: Option<&str>) -> CycleOutcome {
    let mut debouncer = self.debouncer();
    // 持锁检查，保证 stop() 返回后不再有播报
    if !self.is_current(generation) {
      return CycleOutcome::Discarded;
    }

    match debouncer.observe(number, Instant::now()) {
      Some(announcement) => {
        let message = announcement.message(&self.config.messages);
        info!("播报: {}", message);
        self.announcer.enqueue(&message);
        CycleOutcome::Announced(message)
      }
      None => CycleOutcome::Suppressed,
    }
  }

  fn abort(&self, generation: u64, cycle: u64, err: CycleError) {
    match &err {
      CycleError::Cancelled => debug!("周期 {} 已取消", cycle),
      other => warn!("周期 {} 中止: {}", cycle, other),
    }
    self.journal(CycleRecord::new(
      generation,
      cycle,
      CycleOutcome::Aborted(err.to_string()),
    ));
  }

  fn complete_recognition(
    &self,
    generation: u64,
    cycle: u64,
    detections: usize,
    result: Result<RecognizedText, RecognitionError>,
  ) {
    if !self.is_current(generation) {
      debug!("周期 {} 的识别结果已过期, 丢弃", cycle);
      let mut record = CycleRecord::new(generation, cycle, CycleOutcome::Discarded);
      record.detections = detections;
      self.journal(record);
      return;
    }

    let text = match result {
      Ok(text) => text,
      Err(e) => return self.abort(generation, cycle, e.into()),
    };

    let number = parse_number(&text);
    let outcome = match number.as_deref() {
      Some(number) => self.announce(generation, Some(number)),
      None => {
        debug!("周期 {} 未解析出线路号: {:?}", cycle, text);
        CycleOutcome::ParseMiss
      }
    };

    let mut record = CycleRecord::new(generation, cycle, outcome);
    record.detections = detections;
    record.text = Some(text);
    record.number = number;
    self.journal(record);
  }
}

struct Worker<E, R> {
  shared: Arc<Shared>,
  engine: E,
  recognizer: R,
  decoder: Decoder,
}

/// 同步阶段找到的识别对象
enum Target {
  /// 没有目标类别的检测框
  Absent,
  /// 有目标，但裁剪区域都太小
  TooSmall,
  Found(Crop),
}

struct Detected {
  detections: usize,
  target: Target,
}

impl<E: InferenceEngine, R: TextRecognizer> Worker<E, R> {
  fn run(self, jobs: Receiver<Job>) {
    for job in jobs {
      self.run_cycle(job);
    }
    debug!("检测工作线程退出");
  }

  fn detect(&self, frame: &Frame, generation: u64) -> Result<Detected, CycleError> {
    let shared = &self.shared;
    let config = &shared.config;

    shared.checkpoint(generation)?;
    let tensor = preprocess(frame, config)?;

    shared.checkpoint(generation)?;
    let started = Instant::now();
    let raw = self.engine.run(&tensor)?;
    debug!("推理耗时: {:.2?}", started.elapsed());

    shared.checkpoint(generation)?;
    let candidates = self.decoder.decode(&raw, frame.width(), frame.height())?;
    let detections = suppress(candidates, config.iou_threshold);
    debug!("NMS 后剩余 {} 个检测框", detections.len());

    shared.checkpoint(generation)?;
    let mut targets = detections
      .iter()
      .filter(|d| d.label == config.target_label)
      .peekable();
    let target = if targets.peek().is_none() {
      Target::Absent
    } else {
      targets
        .find_map(|d| crop(frame, &d.bounding_box))
        .map_or(Target::TooSmall, Target::Found)
    };

    Ok(Detected {
      detections: detections.len(),
      target,
    })
  }

  fn run_cycle(&self, job: Job) {
    let Job {
      frame,
      guard,
      generation,
    } = job;
    let cycle = guard.cycle();

    let detected = match self.detect(&frame, generation) {
      Ok(detected) => detected,
      Err(e) => {
        self.shared.abort(generation, cycle, e);
        drop(guard);
        return;
      }
    };
    drop(frame);

    let Detected { detections, target } = detected;
    match target {
      Target::Found(crop) => {
        debug!(
          "周期 {}: 识别区域 ({}, {}) {}x{}",
          cycle,
          crop.left,
          crop.top,
          crop.width(),
          crop.height()
        );
        let shared = self.shared.clone();
        self.recognizer.recognize(
          crop,
          Box::new(move |result| {
            shared.complete_recognition(generation, cycle, detections, result);
            // 回调被丢弃而未执行时，guard 同样随闭包释放
            drop(guard);
          }),
        );
      }
      Target::TooSmall => {
        debug!("周期 {}: 目标区域过小, 不做识别", cycle);
        let mut record = CycleRecord::new(generation, cycle, CycleOutcome::CropRejected);
        record.detections = detections;
        self.shared.journal(record);
        drop(guard);
      }
      Target::Absent => {
        debug!("周期 {}: 没有检测到目标", cycle);
        let outcome = self.shared.announce(generation, None);
        let mut record = CycleRecord::new(generation, cycle, outcome);
        record.detections = detections;
        self.shared.journal(record);
        drop(guard);
      }
    }
  }
}

pub struct SessionBuilder {
  config: Config,
  journal: Option<CycleJournal>,
}

impl SessionBuilder {
  pub fn journal(mut self, journal: CycleJournal) -> Self {
    self.journal = Some(journal);
    self
  }

  pub fn start<E, R, A>(
    self,
    engine: E,
    recognizer: R,
    announcer: A,
  ) -> Result<Session, SessionError>
  where
    E: InferenceEngine + 'static,
    R: TextRecognizer + 'static,
    A: Announcer + 'static,
  {
    self.config.validate()?;
    if let Some(kind) = engine.output_kind()
      && kind != self.config.output_layout.name()
    {
      error!(
        "配置的输出布局 {} 与引擎输出 {} 不一致",
        self.config.output_layout.name(),
        kind
      );
      return Err(SessionError::LayoutMismatch {
        config: self.config.output_layout.name(),
        engine: kind,
      });
    }
    let config = Arc::new(self.config);

    let shared = Arc::new(Shared {
      config: config.clone(),
      announcer: Box::new(announcer),
      debouncer: Mutex::new(Debouncer::new(&config)),
      generation: AtomicU64::new(1),
      stopped: AtomicBool::new(false),
      journal: self.journal,
    });

    // 容量为 1: 忙标志已经保证队列里最多一个任务
    let (tx, rx) = mpsc::sync_channel::<Job>(1);
    let worker = Worker {
      shared: shared.clone(),
      engine,
      recognizer,
      decoder: Decoder::new(&config),
    };
    let worker = thread::Builder::new()
      .name("detection".to_string())
      .spawn(move || worker.run(rx))?;

    info!(
      "会话开始: 输入 {}x{}, 检测间隔 {}ms, 目标 {}",
      config.input_size, config.input_size, config.detection_interval_ms, config.target_label
    );

    Ok(Session {
      gate: FrameGate::new(config.detection_interval()),
      shared,
      jobs: Some(tx),
      worker: Some(worker),
    })
  }
}

pub struct Session {
  shared: Arc<Shared>,
  gate: FrameGate,
  jobs: Option<SyncSender<Job>>,
  worker: Option<JoinHandle<()>>,
}

impl Session {
  pub fn builder(config: Config) -> SessionBuilder {
    SessionBuilder {
      config,
      journal: None,
    }
  }

  pub fn start<E, R, A>(
    config: Config,
    engine: E,
    recognizer: R,
    announcer: A,
  ) -> Result<Self, SessionError>
  where
    E: InferenceEngine + 'static,
    R: TextRecognizer + 'static,
    A: Announcer + 'static,
  {
    Self::builder(config).start(engine, recognizer, announcer)
  }

  pub fn config(&self) -> &Config {
    &self.shared.config
  }

  /// 推送一帧，不会阻塞。帧被丢弃时不产生任何副作用。
  pub fn submit(&self, frame: Frame) -> Admission {
    if self.shared.stopped.load(Ordering::Acquire) {
      return Admission::Dropped(DropReason::Stopped);
    }
    let Some(jobs) = self.jobs.as_ref() else {
      return Admission::Dropped(DropReason::Stopped);
    };

    let guard = match self.gate.try_admit(Instant::now()) {
      Ok(guard) => guard,
      Err(reason) => return Admission::Dropped(reason),
    };
    let cycle = guard.cycle();
    let job = Job {
      frame,
      guard,
      generation: self.shared.generation.load(Ordering::Acquire),
    };

    match jobs.try_send(job) {
      Ok(()) => {
        debug!("准入周期 {}", cycle);
        Admission::Admitted { cycle }
      }
      Err(TrySendError::Full(_)) => Admission::Dropped(DropReason::Busy),
      Err(TrySendError::Disconnected(_)) => {
        error!("检测工作线程已退出");
        Admission::Dropped(DropReason::Stopped)
      }
    }
  }

  pub fn is_busy(&self) -> bool {
    self.gate.is_busy()
  }

  pub fn generation(&self) -> u64 {
    self.shared.generation.load(Ordering::Acquire)
  }

  pub fn announcement_state(&self) -> AnnouncementState {
    self.shared.debouncer().state().clone()
  }

  /// 等待当前周期（包括异步识别）结束，超时返回 `false`
  pub fn wait_idle(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while self.gate.is_busy() {
      if Instant::now() >= deadline {
        return false;
      }
      thread::sleep(Duration::from_millis(2));
    }
    true
  }

  /// 标记会话停止，不等待工作线程: 之后的帧全部丢弃，
  /// 进行中的周期在下一个检查点中止，迟到的识别结果不会再改变状态或播报。
  pub fn cancel(&self) {
    if self.shared.stopped.swap(true, Ordering::AcqRel) {
      return;
    }
    let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
    self.shared.debouncer().reset();
    info!("会话停止, 代数 {}", generation);
  }

  /// [`Session::cancel`] 之后关闭任务队列并等待工作线程退出
  pub fn stop(&mut self) {
    self.cancel();
    self.jobs.take();
    if let Some(worker) = self.worker.take()
      && worker.join().is_err()
    {
      error!("检测工作线程异常退出");
    }
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    announce::ChannelAnnouncer,
    model::{OutputBuffer, OutputLayout, RawOutput, ReplayEngine},
    recognize::RecognitionCallback,
  };

  struct Fixed(&'static str);

  impl TextRecognizer for Fixed {
    fn recognize(&self, _crop: Crop, on_done: RecognitionCallback) {
      on_done(Ok(self.0.to_string()));
    }
  }

  fn config() -> Config {
    Config {
      input_size: 32,
      num_detections: 1,
      detection_interval_ms: 0,
      bus_announce_interval_ms: 0,
      output_layout: OutputLayout::Float32,
      ..Config::default()
    }
  }

  fn one_bus() -> ReplayEngine {
    ReplayEngine::new(RawOutput::single(OutputBuffer::Float32(vec![
      0.5, 0.5, 0.5, 0.5, 0.9, 0.9,
    ])))
  }

  fn start(text: &'static str) -> (Session, Receiver<String>) {
    let (tx, rx) = mpsc::channel();
    let session = Session::start(config(), one_bus(), Fixed(text), ChannelAnnouncer::new(tx)).unwrap();
    (session, rx)
  }

  #[test]
  fn announces_parsed_number() {
    let (session, rx) = start("146번");
    assert!(session.submit(Frame::filled(64, 64, [0, 0, 0]).unwrap()).is_admitted());
    assert!(session.wait_idle(Duration::from_secs(5)));

    assert_eq!(rx.try_recv().unwrap(), "146번 버스가 앞에 있습니다");
    let state = session.announcement_state();
    assert_eq!(state.last_announced_number.as_deref(), Some("146"));
    assert_eq!(state.repeat_count, 1);
  }

  #[test]
  fn parse_miss_is_silent() {
    let (session, rx) = start("정류장");
    session.submit(Frame::filled(64, 64, [0, 0, 0]).unwrap());
    assert!(session.wait_idle(Duration::from_secs(5)));
    assert!(rx.try_recv().is_err());
    assert_eq!(session.announcement_state(), AnnouncementState::default());
  }

  #[test]
  fn stop_rejects_frames_and_resets_state() {
    let (mut session, _rx) = start("146번");
    session.submit(Frame::filled(64, 64, [0, 0, 0]).unwrap());
    assert!(session.wait_idle(Duration::from_secs(5)));
    let generation = session.generation();

    session.stop();
    assert_eq!(session.generation(), generation + 1);
    assert_eq!(session.announcement_state(), AnnouncementState::default());
    assert_eq!(
      session.submit(Frame::filled(64, 64, [0, 0, 0]).unwrap()),
      Admission::Dropped(DropReason::Stopped)
    );
    // 重复停止无副作用
    session.stop();
    assert_eq!(session.generation(), generation + 1);
  }

  #[test]
  fn engine_layout_must_match_config() {
    let (tx, _rx) = mpsc::channel();
    // 默认配置期望 uint8 输出
    let config = Config {
      output_layout: OutputLayout::default(),
      ..config()
    };
    assert!(matches!(
      Session::start(config, one_bus(), Fixed(""), ChannelAnnouncer::new(tx)),
      Err(SessionError::LayoutMismatch {
        config: "uint8",
        engine: "float32"
      })
    ));
  }

  #[test]
  fn invalid_config_is_rejected() {
    let (tx, _rx) = mpsc::channel();
    let config = Config {
      labels: Vec::new(),
      ..config()
    };
    assert!(matches!(
      Session::start(config, one_bus(), Fixed(""), ChannelAnnouncer::new(tx)),
      Err(SessionError::Config(_))
    ));
  }
}
