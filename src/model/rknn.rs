// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/model/rknn.rs - RKNPU 推理引擎
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

use rknpu::{Context, InitFlags, TensorFormat};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{InferenceEngine, InferenceError, OutputBuffer, RawOutput},
  preprocess::{Tensor, TensorType},
};

const RKNN_NUM_INPUTS: u32 = 1;

impl From<rknpu::Error> for InferenceError {
  fn from(err: rknpu::Error) -> Self {
    InferenceError::Backend(err.to_string())
  }
}

pub struct RknnEngine {
  context: Context,
}

pub struct RknnEngineBuilder {
  model_path: String,
  flags: InitFlags,
}

impl FromUrlWithScheme for RknnEngineBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnEngineBuilder {
  type Error = InferenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InferenceError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(RknnEngineBuilder {
      model_path: url.path().to_string(),
      flags: InitFlags::default(),
    })
  }
}

impl RknnEngineBuilder {
  pub fn build(self) -> Result<RknnEngine, InferenceError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    if num_inputs != RKNN_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      return Err(InferenceError::Unavailable(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      )));
    }
    if num_outputs == 0 {
      return Err(InferenceError::Unavailable("模型没有输出".to_string()));
    }

    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);
    info!("模型加载完成");

    Ok(RknnEngine { context })
  }
}

impl InferenceEngine for RknnEngine {
  fn run(&self, tensor: &Tensor) -> Result<RawOutput, InferenceError> {
    if tensor.dtype() != TensorType::UInt8 {
      return Err(InferenceError::UnsupportedInput(tensor.dtype()));
    }

    debug!("设置模型输入");
    self.context.set_input(
      0,
      tensor.as_bytes(),
      TensorFormat::NHWC,
      rknpu::TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    self.context.run()?;

    // 运行时已按模型量化参数反量化，这里直接取 f32
    let output = self.context.get_outputs()?;
    let data = output.get_f32(0)?.to_vec();
    debug!("模型输出 {} 个值", data.len());

    Ok(RawOutput::single(OutputBuffer::Float32(data)))
  }

  fn output_kind(&self) -> Option<&'static str> {
    Some("float32")
  }
}
