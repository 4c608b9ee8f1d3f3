// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/output/journal.rs - 周期日志
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
  fs::{File, OpenOptions},
  io::Write,
  path::{Path, PathBuf},
  sync::Mutex,
};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum JournalError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}

/// 周期的最终结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum CycleOutcome {
  Announced(String),
  Suppressed,
  ParseMiss,
  CropRejected,
  Aborted(String),
  Discarded,
}

/// 日志中的一行
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
  pub timestamp: String,
  pub generation: u64,
  pub cycle: u64,
  pub detections: usize,
  pub text: Option<String>,
  pub number: Option<String>,
  #[serde(flatten)]
  pub outcome: CycleOutcome,
}

impl CycleRecord {
  pub fn new(generation: u64, cycle: u64, outcome: CycleOutcome) -> Self {
    Self {
      timestamp: Utc::now().to_rfc3339(),
      generation,
      cycle,
      detections: 0,
      text: None,
      number: None,
      outcome,
    }
  }
}

/// `journal:///path/to/dir`，每天一个 `YYYY-MM-DD.jsonl` 文件，只追加
pub struct CycleJournal {
  directory: PathBuf,
  current: Mutex<Option<(NaiveDate, File)>>,
}

impl FromUrlWithScheme for CycleJournal {
  const SCHEME: &'static str = "journal";
}

impl FromUrl for CycleJournal {
  type Error = JournalError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JournalError::SchemeMismatch(url.scheme().to_string()));
    }
    Self::open(url.path())
  }
}

impl CycleJournal {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, JournalError> {
    let directory = directory.as_ref().to_path_buf();
    std::fs::create_dir_all(&directory)?;
    Ok(Self {
      directory,
      current: Mutex::new(None),
    })
  }

  pub fn path_for(&self, date: NaiveDate) -> PathBuf {
    self
      .directory
      .join(format!("{}.jsonl", date.format("%Y-%m-%d")))
  }

  pub fn append(&self, record: &CycleRecord) -> Result<(), JournalError> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');

    let today = Utc::now().date_naive();
    let mut current = self
      .current
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    if current.as_ref().map(|(date, _)| *date != today).unwrap_or(true) {
      let path = self.path_for(today);
      debug!("打开日志文件: {}", path.display());
      let file = OpenOptions::new().create(true).append(true).open(path)?;
      *current = Some((today, file));
    }

    if let Some((_, file)) = current.as_mut() {
      file.write_all(line.as_bytes())?;
    }
    Ok(())
  }

  /// 写入失败只记录警告
  pub fn record(&self, record: &CycleRecord) {
    if let Err(e) = self.append(record) {
      warn!("写入周期日志失败: {}", e);
    }
  }
}
