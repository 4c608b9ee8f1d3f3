// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/main.rs - 主程序
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

use std::{path::PathBuf, sync::mpsc, thread};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use zhanpai::{
  FromUrl,
  announce::ChannelAnnouncer,
  config::Config,
  input::InputWrapper,
  model::EngineWrapper,
  output::CycleJournal,
  recognize::{RecognizerWrapper, ThreadedRecognizer},
  session::Session,
  task::{ContinuousTask, OneShotTask, Task},
};

/// Zhanpai 公交线路号检测与播报
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理后端，例如 replay:///path/output.bin?layout=uint8 或 rknn:///path/model.rknn。
  /// rknn 输出 float32，配置文件中需设置 "output_layout": { "kind": "float32" }
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 image:///path/a.jpg?repeat=10 或 folder:///path/frames
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 文字识别后端，例如 ocrs:///path/models 或 silent://
  #[arg(long, value_name = "RECOGNIZER", default_value = "silent://")]
  pub recognizer: Url,
  /// 周期日志目录，例如 journal:///var/log/zhanpai
  #[arg(long, value_name = "JOURNAL")]
  pub journal: Option<Url>,
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 覆盖置信度阈值
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,
  /// 覆盖 NMS IoU 阈值
  #[arg(long, value_name = "THRESHOLD")]
  pub iou_threshold: Option<f32>,
  /// 输入帧率，不指定时尽快推送
  #[arg(long, value_name = "FPS")]
  pub fps: Option<f64>,
  /// 最多推送的帧数
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<usize>,
  /// 只处理第一帧
  #[arg(long)]
  pub once: bool,
}

fn load_config(args: &Args) -> Result<Config> {
  let mut config = match &args.config {
    Some(path) => Config::from_json_file(path)?,
    None => Config::default(),
  };
  if let Some(confidence) = args.confidence {
    config.confidence_threshold = confidence;
  }
  if let Some(iou) = args.iou_threshold {
    config.iou_threshold = iou;
  }
  config.validate()?;
  Ok(config)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("推理后端: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("文字识别: {}", args.recognizer);

  let config = load_config(&args)?;
  let engine = EngineWrapper::from_url(&args.model)?;
  let recognizer = ThreadedRecognizer::spawn(RecognizerWrapper::from_url(&args.recognizer)?)?;
  let input = InputWrapper::from_url(&args.input)?;

  // 播报内容逐行输出到标准输出，交给下游语音合成
  let (tx, rx) = mpsc::channel::<String>();
  let speaker = thread::spawn(move || {
    for message in rx {
      println!("{}", message);
    }
  });

  let mut builder = Session::builder(config);
  if let Some(url) = &args.journal {
    builder = builder.journal(CycleJournal::from_url(url)?);
  }
  let mut session = builder.start(engine, recognizer, ChannelAnnouncer::new(tx))?;

  if args.once {
    OneShotTask::default().run_task(input, &session)?;
  } else {
    ContinuousTask::default()
      .with_frame_number(args.frame_number)
      .with_fps(args.fps)
      .with_interrupt(true)
      .run_task(input, &session)?;
  }

  session.stop();
  drop(session);
  let _ = speaker.join();
  Ok(())
}
