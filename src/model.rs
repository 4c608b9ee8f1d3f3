// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/model.rs - 推理引擎边界
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

//! # 推理引擎
//!
//! 核心流程只负责编码输入与解码输出，张量到张量的计算交给外部引擎。
//! 引擎需满足以下约定：
//!
//! - 输入: NHWC 排列的 `input_size × input_size × 3` 张量，
//!   `uint8`（量化参数 `1/255, 0`）或归一化到 `[0, 1]` 的 `float32`。
//! - 输出: 至少一个缓冲区，包含 `num_detections` 行，每行
//!   `num_classes + 5` 个值: `[cx, cy, w, h, objectness, class_0, ..]`，
//!   均为 `[0, 1]` 范围内的归一化值。
//! - `uint8` 输出按 `(byte - zero_point) * scale` 反量化，默认即 `byte / 255`。
//! - 配置中的 `output_layout` 必须与引擎实际输出一致。`rknn` 后端由运行时
//!   反量化后输出 `float32`，需要配置 `"output_layout": { "kind": "float32" }`；
//!   不一致时会话拒绝启动。

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  preprocess::{Quantization, Tensor, TensorType},
};

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理引擎不可用: {0}")]
  Unavailable(String),
  #[error("推理引擎错误: {0}")]
  Backend(String),
  #[error("输出缓冲区过短: 期望至少 {expected} 个值, 实际 {actual} 个")]
  MalformedOutput { expected: usize, actual: usize },
  #[error("输出布局不匹配: 期望 {expected}, 实际 {actual}")]
  LayoutMismatch {
    expected: &'static str,
    actual: &'static str,
  },
  #[error("不支持的输入类型: {0:?}")]
  UnsupportedInput(TensorType),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 输出张量的数值布局
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum OutputLayout {
  #[serde(rename = "float32")]
  Float32,
  #[serde(rename = "uint8")]
  UInt8 { scale: f32, zero_point: i32 },
}

impl Default for OutputLayout {
  fn default() -> Self {
    let q = Quantization::default();
    OutputLayout::UInt8 {
      scale: q.scale,
      zero_point: q.zero_point,
    }
  }
}

impl OutputLayout {
  pub fn name(&self) -> &'static str {
    match self {
      OutputLayout::Float32 => "float32",
      OutputLayout::UInt8 { .. } => "uint8",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputBuffer {
  UInt8(Vec<u8>),
  Float32(Vec<f32>),
}

impl OutputBuffer {
  pub fn len(&self) -> usize {
    match self {
      OutputBuffer::UInt8(data) => data.len(),
      OutputBuffer::Float32(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn kind(&self) -> &'static str {
    match self {
      OutputBuffer::UInt8(_) => "uint8",
      OutputBuffer::Float32(_) => "float32",
    }
  }
}

/// 引擎返回的原始输出
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
  buffers: Vec<OutputBuffer>,
}

impl RawOutput {
  pub fn new(buffers: Vec<OutputBuffer>) -> Self {
    Self { buffers }
  }

  pub fn single(buffer: OutputBuffer) -> Self {
    Self {
      buffers: vec![buffer],
    }
  }

  pub fn primary(&self) -> Option<&OutputBuffer> {
    self.buffers.first()
  }
}

pub trait InferenceEngine: Send {
  fn run(&self, tensor: &Tensor) -> Result<RawOutput, InferenceError>;

  /// 引擎固定产出的输出数值类型（`"uint8"` / `"float32"`），未知时为 `None`。
  /// 会话启动时用它核对 [`OutputLayout`]。
  fn output_kind(&self) -> Option<&'static str> {
    None
  }
}

impl<E: InferenceEngine + Sync> InferenceEngine for std::sync::Arc<E> {
  fn run(&self, tensor: &Tensor) -> Result<RawOutput, InferenceError> {
    (**self).run(tensor)
  }

  fn output_kind(&self) -> Option<&'static str> {
    (**self).output_kind()
  }
}

mod replay;
pub use self::replay::ReplayEngine;

#[cfg(feature = "rknn_engine")]
mod rknn;
#[cfg(feature = "rknn_engine")]
pub use self::rknn::{RknnEngine, RknnEngineBuilder};

pub enum EngineWrapper {
  Replay(ReplayEngine),
  #[cfg(feature = "rknn_engine")]
  Rknn(RknnEngine),
}

impl FromUrl for EngineWrapper {
  type Error = InferenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      ReplayEngine::SCHEME => Ok(EngineWrapper::Replay(ReplayEngine::from_url(url)?)),
      #[cfg(feature = "rknn_engine")]
      RknnEngineBuilder::SCHEME => Ok(EngineWrapper::Rknn(
        RknnEngineBuilder::from_url(url)?.build()?,
      )),
      other => Err(InferenceError::SchemeMismatch(other.to_string())),
    }
  }
}

impl InferenceEngine for EngineWrapper {
  fn run(&self, tensor: &Tensor) -> Result<RawOutput, InferenceError> {
    match self {
      EngineWrapper::Replay(engine) => engine.run(tensor),
      #[cfg(feature = "rknn_engine")]
      EngineWrapper::Rknn(engine) => engine.run(tensor),
    }
  }

  fn output_kind(&self) -> Option<&'static str> {
    match self {
      EngineWrapper::Replay(engine) => engine.output_kind(),
      #[cfg(feature = "rknn_engine")]
      EngineWrapper::Rknn(engine) => engine.output_kind(),
    }
  }
}
