// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/detector/decode.rs - 模型输出解码
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

use tracing::debug;

use crate::{
  config::Config,
  detector::{BoundingBox, Detection},
  model::{InferenceError, OutputBuffer, OutputLayout, RawOutput},
  preprocess::Quantization,
};

/// 按下标读取反量化后的输出值
trait Values {
  fn len(&self) -> usize;
  fn value(&self, index: usize) -> f32;
}

struct FloatValues<'a>(&'a [f32]);

impl Values for FloatValues<'_> {
  fn len(&self) -> usize {
    self.0.len()
  }

  fn value(&self, index: usize) -> f32 {
    self.0[index]
  }
}

struct QuantizedValues<'a> {
  data: &'a [u8],
  quantization: Quantization,
}

impl Values for QuantizedValues<'_> {
  fn len(&self) -> usize {
    self.data.len()
  }

  fn value(&self, index: usize) -> f32 {
    self.quantization.dequantize(self.data[index])
  }
}

type DecodeFn = fn(&Decoder, &OutputBuffer, f32, f32) -> Result<Vec<Detection>, InferenceError>;

/// 单输出、逐行 `[cx, cy, w, h, objectness, class..]` 布局的解码器。
/// 数值布局在构造时确定，之后每帧只走对应的解码函数。
pub struct Decoder {
  num_classes: usize,
  num_detections: usize,
  stride: usize,
  threshold: f32,
  labels: Vec<String>,
  quantization: Quantization,
  decode_fn: DecodeFn,
}

impl Decoder {
  pub fn new(config: &Config) -> Self {
    let (decode_fn, quantization): (DecodeFn, Quantization) = match config.output_layout {
      OutputLayout::Float32 => (decode_float as DecodeFn, Quantization::default()),
      OutputLayout::UInt8 { scale, zero_point } => {
        (decode_quantized as DecodeFn, Quantization { scale, zero_point })
      }
    };

    Self {
      num_classes: config.num_classes,
      num_detections: config.num_detections,
      stride: config.row_stride(),
      threshold: config.confidence_threshold,
      labels: config.labels.clone(),
      quantization,
      decode_fn,
    }
  }

  /// 将原始输出解码为原始帧坐标下的候选框（未做 NMS）
  pub fn decode(
    &self,
    raw: &RawOutput,
    frame_width: u32,
    frame_height: u32,
  ) -> Result<Vec<Detection>, InferenceError> {
    let buffer = raw.primary().ok_or(InferenceError::MalformedOutput {
      expected: self.num_detections * self.stride,
      actual: 0,
    })?;
    let detections = (self.decode_fn)(self, buffer, frame_width as f32, frame_height as f32)?;
    debug!("解码得到 {} 个候选框", detections.len());
    Ok(detections)
  }

  fn decode_rows<V: Values>(
    &self,
    values: &V,
    frame_width: f32,
    frame_height: f32,
  ) -> Result<Vec<Detection>, InferenceError> {
    let expected = self.num_detections * self.stride;
    if values.len() < expected {
      return Err(InferenceError::MalformedOutput {
        expected,
        actual: values.len(),
      });
    }

    let mut detections = Vec::new();

    for row in 0..self.num_detections {
      let base = row * self.stride;

      // 写成取反形式以便 NaN 也被丢弃
      let objectness = values.value(base + 4);
      if !(objectness > self.threshold) {
        continue;
      }

      let (class_index, max_class_score) = (0..self.num_classes)
        .map(|c| (c, values.value(base + 5 + c)))
        .fold((0usize, f32::NEG_INFINITY), |best, current| {
          if current.1 > best.1 { current } else { best }
        });

      let confidence = objectness * max_class_score;
      if !(confidence > self.threshold) {
        continue;
      }

      let Some(label) = self.labels.get(class_index) else {
        continue;
      };

      let bounding_box = BoundingBox::from_center(
        values.value(base) * frame_width,
        values.value(base + 1) * frame_height,
        values.value(base + 2) * frame_width,
        values.value(base + 3) * frame_height,
      );
      if !bounding_box.is_valid() {
        continue;
      }

      detections.push(Detection {
        bounding_box,
        label: label.clone(),
        confidence,
      });
    }

    Ok(detections)
  }
}

fn decode_float(
  decoder: &Decoder,
  buffer: &OutputBuffer,
  frame_width: f32,
  frame_height: f32,
) -> Result<Vec<Detection>, InferenceError> {
  match buffer {
    OutputBuffer::Float32(data) => {
      decoder.decode_rows(&FloatValues(data), frame_width, frame_height)
    }
    other => Err(InferenceError::LayoutMismatch {
      expected: "float32",
      actual: other.kind(),
    }),
  }
}

fn decode_quantized(
  decoder: &Decoder,
  buffer: &OutputBuffer,
  frame_width: f32,
  frame_height: f32,
) -> Result<Vec<Detection>, InferenceError> {
  match buffer {
    OutputBuffer::UInt8(data) => decoder.decode_rows(
      &QuantizedValues {
        data,
        quantization: decoder.quantization,
      },
      frame_width,
      frame_height,
    ),
    other => Err(InferenceError::LayoutMismatch {
      expected: "uint8",
      actual: other.kind(),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn float_config(num_detections: usize) -> Config {
    Config {
      num_detections,
      output_layout: OutputLayout::Float32,
      ..Config::default()
    }
  }

  fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
  }

  #[test]
  fn decodes_single_candidate_into_frame_space() {
    let raw = RawOutput::single(OutputBuffer::Float32(vec![0.5, 0.4, 0.3, 0.2, 0.8, 0.9]));
    let decoder = Decoder::new(&float_config(1));
    let detections = decoder.decode(&raw, 640, 480).unwrap();

    assert_eq!(detections.len(), 1);
    let det = &detections[0];
    assert_eq!(det.label, "bus");
    assert!(approx(det.confidence, 0.72));
    assert!(approx(det.bounding_box.left, 224.0));
    assert!(approx(det.bounding_box.top, 144.0));
    assert!(approx(det.bounding_box.right, 416.0));
    assert!(approx(det.bounding_box.bottom, 240.0));
  }

  #[test]
  fn low_objectness_and_low_final_confidence_are_dropped() {
    let raw = RawOutput::single(OutputBuffer::Float32(vec![
      0.5, 0.5, 0.2, 0.2, 0.5, 1.0, // objectness == threshold
      0.5, 0.5, 0.2, 0.2, 0.9, 0.5, // 0.45 after class score
      0.5, 0.5, 0.2, 0.2, 0.9, 0.9, // kept
    ]));
    let decoder = Decoder::new(&float_config(3));
    let detections = decoder.decode(&raw, 100, 100).unwrap();
    assert_eq!(detections.len(), 1);
    assert!(detections.iter().all(|d| d.confidence > 0.5));
  }

  #[test]
  fn degenerate_boxes_are_dropped() {
    let raw = RawOutput::single(OutputBuffer::Float32(vec![0.5, 0.5, 0.0, 0.2, 0.9, 0.9]));
    let decoder = Decoder::new(&float_config(1));
    assert!(decoder.decode(&raw, 100, 100).unwrap().is_empty());
  }

  #[test]
  fn dequantizes_uint8_rows() {
    let config = Config {
      num_detections: 2,
      ..Config::default()
    };
    let raw = RawOutput::single(OutputBuffer::UInt8(vec![
      128, 128, 51, 51, 255, 255, // conf 1.0
      128, 128, 51, 51, 100, 255, // objectness ~0.39
    ]));
    let detections = Decoder::new(&config).decode(&raw, 255, 255).unwrap();
    assert_eq!(detections.len(), 1);
    let det = &detections[0];
    assert!(approx(det.confidence, 1.0));
    assert!(approx(det.bounding_box.width(), 51.0));
    assert!(approx(det.bounding_box.left, 128.0 - 25.5));
  }

  #[test]
  fn picks_best_class_and_its_label() {
    let config = Config {
      num_classes: 3,
      num_detections: 1,
      labels: vec!["car".into(), "bus".into(), "truck".into()],
      output_layout: OutputLayout::Float32,
      ..Config::default()
    };
    let raw = RawOutput::single(OutputBuffer::Float32(vec![
      0.5, 0.5, 0.2, 0.2, 0.9, 0.1, 0.95, 0.3,
    ]));
    let detections = Decoder::new(&config).decode(&raw, 10, 10).unwrap();
    assert_eq!(detections[0].label, "bus");
    assert!(approx(detections[0].confidence, 0.855));
  }

  #[test]
  fn class_outside_label_table_is_dropped() {
    let config = Config {
      num_classes: 2,
      num_detections: 1,
      output_layout: OutputLayout::Float32,
      ..Config::default()
    };
    let raw = RawOutput::single(OutputBuffer::Float32(vec![
      0.5, 0.5, 0.2, 0.2, 0.9, 0.1, 0.95,
    ]));
    assert!(Decoder::new(&config).decode(&raw, 10, 10).unwrap().is_empty());
  }

  #[test]
  fn short_buffer_is_malformed() {
    let raw = RawOutput::single(OutputBuffer::Float32(vec![0.5; 7]));
    let err = Decoder::new(&float_config(2)).decode(&raw, 10, 10).unwrap_err();
    assert!(matches!(
      err,
      InferenceError::MalformedOutput {
        expected: 12,
        actual: 7
      }
    ));
  }

  #[test]
  fn layout_mismatch_is_reported() {
    let raw = RawOutput::single(OutputBuffer::UInt8(vec![0; 6]));
    let err = Decoder::new(&float_config(1)).decode(&raw, 10, 10).unwrap_err();
    assert!(matches!(err, InferenceError::LayoutMismatch { .. }));
  }

  #[test]
  fn missing_buffer_is_malformed() {
    let raw = RawOutput::new(Vec::new());
    assert!(Decoder::new(&float_config(1)).decode(&raw, 10, 10).is_err());
  }
}
