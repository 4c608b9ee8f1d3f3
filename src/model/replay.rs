// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/model/replay.rs - 回放录制的模型输出
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

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{InferenceEngine, InferenceError, OutputBuffer, RawOutput},
  preprocess::Tensor,
};

/// 对任意输入都返回同一份录制输出的引擎，
/// 用于在没有 NPU 的机器上跑通整条流程。
///
/// `replay:///path/to/output.bin?layout=float32`，`layout` 缺省为 `uint8`；
/// `float32` 文件按小端序解析。
pub struct ReplayEngine {
  output: RawOutput,
}

impl ReplayEngine {
  pub fn new(output: RawOutput) -> Self {
    Self { output }
  }
}

impl FromUrlWithScheme for ReplayEngine {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayEngine {
  type Error = InferenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InferenceError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let layout = url
      .query_pairs()
      .find(|(k, _)| k == "layout")
      .map(|(_, v)| v.into_owned())
      .unwrap_or_else(|| "uint8".to_string());

    info!("加载录制输出: {} ({})", url.path(), layout);
    let bytes = std::fs::read(url.path())?;
    debug!("录制输出大小: {} 字节", bytes.len());

    let buffer = match layout.as_str() {
      "uint8" => OutputBuffer::UInt8(bytes),
      "float32" => {
        if bytes.len() % 4 != 0 {
          return Err(InferenceError::Backend(format!(
            "float32 输出长度 {} 不是 4 的倍数",
            bytes.len()
          )));
        }
        OutputBuffer::Float32(
          bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        )
      }
      other => {
        return Err(InferenceError::Backend(format!("未知输出布局: {}", other)));
      }
    };

    Ok(Self::new(RawOutput::single(buffer)))
  }
}

impl InferenceEngine for ReplayEngine {
  fn run(&self, tensor: &Tensor) -> Result<RawOutput, InferenceError> {
    debug!("回放输出, 输入张量 {:?}", tensor.dims());
    Ok(self.output.clone())
  }

  fn output_kind(&self) -> Option<&'static str> {
    self.output.primary().map(OutputBuffer::kind)
  }
}
