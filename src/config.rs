// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/config.rs - 会话配置
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

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{announce::MessageTemplates, model::OutputLayout, preprocess::TensorType};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("配置项 {field} 无效: {reason}")]
  Invalid { field: &'static str, reason: String },
}

impl ConfigError {
  fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
    ConfigError::Invalid {
      field,
      reason: reason.into(),
    }
  }
}

/// 一次检测会话的全部参数，会话开始后不可修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// 模型输入边长（正方形）
  pub input_size: u32,
  /// 类别数量
  pub num_classes: usize,
  /// 每次推理输出的候选行数
  pub num_detections: usize,
  /// 置信度阈值
  pub confidence_threshold: f32,
  /// NMS IoU 阈值
  pub iou_threshold: f32,
  /// 两次检测周期开始之间的最小间隔
  pub detection_interval_ms: u64,
  /// 两次公交播报之间的最小间隔
  pub bus_announce_interval_ms: u64,
  /// 两次 "未检测到" 播报之间的最小间隔
  pub general_announce_interval_ms: u64,
  /// 同一线路号最多连续播报次数
  pub max_repeat_count: u32,
  /// 输入张量的数值表示
  pub input_type: TensorType,
  /// 输出张量的数值布局
  pub output_layout: OutputLayout,
  /// 类别名称，下标即类别编号
  pub labels: Vec<String>,
  /// 需要进行文字识别的类别
  pub target_label: String,
  pub messages: MessageTemplates,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      input_size: 640,
      num_classes: 1,
      num_detections: 6300,
      confidence_threshold: 0.5,
      iou_threshold: 0.5,
      detection_interval_ms: 1500,
      bus_announce_interval_ms: 3000,
      general_announce_interval_ms: 10000,
      max_repeat_count: 2,
      input_type: TensorType::UInt8,
      output_layout: OutputLayout::default(),
      labels: vec!["bus".to_string()],
      target_label: "bus".to_string(),
      messages: MessageTemplates::default(),
    }
  }
}

impl Config {
  /// 从 JSON 文件读取配置，缺省字段使用默认值
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    debug!("读取配置文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.input_size == 0 {
      return Err(ConfigError::invalid("input_size", "必须大于 0"));
    }
    if self.num_classes == 0 {
      return Err(ConfigError::invalid("num_classes", "必须大于 0"));
    }
    if self.num_detections == 0 {
      return Err(ConfigError::invalid("num_detections", "必须大于 0"));
    }
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::invalid(
        "confidence_threshold",
        format!("{} 不在 [0, 1] 范围内", self.confidence_threshold),
      ));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(ConfigError::invalid(
        "iou_threshold",
        format!("{} 不在 [0, 1] 范围内", self.iou_threshold),
      ));
    }
    if self.max_repeat_count == 0 {
      return Err(ConfigError::invalid("max_repeat_count", "必须至少为 1"));
    }
    if self.labels.is_empty() {
      return Err(ConfigError::invalid("labels", "类别名称不能为空"));
    }
    if let OutputLayout::UInt8 { scale, .. } = self.output_layout
      && !(scale.is_finite() && scale > 0.0)
    {
      return Err(ConfigError::invalid(
        "output_layout",
        format!("量化比例 {} 无效", scale),
      ));
    }
    Ok(())
  }

  /// 每个候选行的元素个数: x, y, w, h, objectness 加上各类别分数
  pub fn row_stride(&self) -> usize {
    self.num_classes + 5
  }

  pub fn detection_interval(&self) -> Duration {
    Duration::from_millis(self.detection_interval_ms)
  }

  pub fn bus_announce_interval(&self) -> Duration {
    Duration::from_millis(self.bus_announce_interval_ms)
  }

  pub fn general_announce_interval(&self) -> Duration {
    Duration::from_millis(self.general_announce_interval_ms)
  }

  pub fn class_label(&self, index: usize) -> Option<&str> {
    self.labels.get(index).map(String::as_str)
  }
}
