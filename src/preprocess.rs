// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/preprocess.rs - 帧预处理与输入张量
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

use image::{ImageBuffer, Rgb, imageops::FilterType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
  config::Config,
  frame::{Frame, RGB_CHANNELS},
};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("张量大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  SizeMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TensorType {
  #[serde(rename = "uint8")]
  UInt8,
  #[serde(rename = "float32")]
  Float32,
}

impl TensorType {
  pub fn element_size(&self) -> usize {
    match self {
      TensorType::UInt8 => 1,
      TensorType::Float32 => 4,
    }
  }
}

/// 定点量化参数，实数值 = (整数值 - zero_point) * scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantization {
  pub scale: f32,
  pub zero_point: i32,
}

impl Quantization {
  pub fn dequantize(&self, value: u8) -> f32 {
    (value as i32 - self.zero_point) as f32 * self.scale
  }
}

impl Default for Quantization {
  fn default() -> Self {
    Self {
      scale: 1.0 / 255.0,
      zero_point: 0,
    }
  }
}

/// NHWC 排列的模型输入
#[derive(Debug, Clone)]
pub struct Tensor {
  data: Box<[u8]>,
  size: u32,
  dtype: TensorType,
  quantization: Option<Quantization>,
}

impl Tensor {
  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  /// [N, H, W, C]
  pub fn dims(&self) -> [usize; 4] {
    [1, self.size as usize, self.size as usize, RGB_CHANNELS]
  }

  pub fn dtype(&self) -> TensorType {
    self.dtype
  }

  pub fn quantization(&self) -> Option<Quantization> {
    self.quantization
  }
}

fn expected_len(size: u32, dtype: TensorType) -> usize {
  size as usize * size as usize * RGB_CHANNELS * dtype.element_size()
}

/// 将帧缩放到 `input_size × input_size` 并按模型要求的数值表示写入张量
pub fn preprocess(frame: &Frame, config: &Config) -> Result<Tensor, PreprocessError> {
  let size = config.input_size;

  let pixels = if frame.width() == size && frame.height() == size {
    frame.as_nhwc().to_vec()
  } else {
    let source = frame.as_nhwc();
    let image = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(frame.width(), frame.height(), source)
      .ok_or(PreprocessError::SizeMismatch {
        expected: frame.width() as usize * frame.height() as usize * RGB_CHANNELS,
        actual: source.len(),
      })?;
    debug!(
      "缩放帧 {}x{} -> {}x{}",
      frame.width(),
      frame.height(),
      size,
      size
    );
    image::imageops::resize(&image, size, size, FilterType::Triangle).into_raw()
  };

  let (data, quantization) = match config.input_type {
    TensorType::UInt8 => (pixels, Some(Quantization::default())),
    TensorType::Float32 => {
      let mut data = Vec::with_capacity(pixels.len() * 4);
      for value in pixels {
        data.extend_from_slice(&(value as f32 / 255.0).to_ne_bytes());
      }
      (data, None)
    }
  };

  let expected = expected_len(size, config.input_type);
  if data.len() != expected {
    return Err(PreprocessError::SizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  Ok(Tensor {
    data: data.into_boxed_slice(),
    size,
    dtype: config.input_type,
    quantization,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(size: u32, input_type: TensorType) -> Config {
    Config {
      input_size: size,
      input_type,
      ..Config::default()
    }
  }

  #[test]
  fn passes_through_when_already_sized() {
    let data: Vec<u8> = (0..48).collect();
    let frame = Frame::new(4, 4, data.clone()).unwrap();
    let tensor = preprocess(&frame, &config(4, TensorType::UInt8)).unwrap();
    assert_eq!(tensor.as_bytes(), data.as_slice());
    assert_eq!(tensor.dims(), [1, 4, 4, 3]);
    assert_eq!(tensor.quantization(), Some(Quantization::default()));
  }

  #[test]
  fn resizes_to_input_size() {
    let frame = Frame::filled(32, 24, [200, 100, 50]).unwrap();
    let tensor = preprocess(&frame, &config(8, TensorType::UInt8)).unwrap();
    assert_eq!(tensor.as_bytes().len(), 8 * 8 * 3);
    assert_eq!(&tensor.as_bytes()[..3], &[200, 100, 50]);
  }

  #[test]
  fn normalizes_float_input() {
    let frame = Frame::filled(2, 2, [255, 0, 51]).unwrap();
    let tensor = preprocess(&frame, &config(2, TensorType::Float32)).unwrap();
    assert_eq!(tensor.as_bytes().len(), 2 * 2 * 3 * 4);
    let values: Vec<f32> = tensor
      .as_bytes()
      .chunks_exact(4)
      .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
      .collect();
    assert!((values[0] - 1.0).abs() < 1e-6);
    assert_eq!(values[1], 0.0);
    assert!((values[2] - 0.2).abs() < 1e-6);
    assert!(tensor.quantization().is_none());
  }

  #[test]
  fn dequantizes_with_zero_point() {
    let q = Quantization {
      scale: 0.5,
      zero_point: 10,
    };
    assert_eq!(q.dequantize(14), 2.0);
    assert!((Quantization::default().dequantize(255) - 1.0).abs() < 1e-6);
  }
}
