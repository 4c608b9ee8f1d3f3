// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/recognize/ocrs_recognizer.rs - 基于 ocrs 的文字识别
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

use std::path::{Path, PathBuf};

use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Crop,
  recognize::{RecognitionError, RecognizeText, RecognizedText},
};

const DETECTION_MODEL: &str = "text-detection.rten";
const RECOGNITION_MODEL: &str = "text-recognition.rten";

/// `ocrs:///path/to/models`，路径为空时使用 `~/.cache/ocrs`
pub struct OcrsRecognizer {
  engine: OcrEngine,
}

impl FromUrlWithScheme for OcrsRecognizer {
  const SCHEME: &'static str = "ocrs";
}

impl FromUrl for OcrsRecognizer {
  type Error = RecognitionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecognitionError::SchemeMismatch(url.scheme().to_string()));
    }

    let model_dir = match url.path() {
      "" | "/" => default_model_dir()?,
      path => PathBuf::from(path),
    };
    Self::load(&model_dir)
  }
}

fn default_model_dir() -> Result<PathBuf, RecognitionError> {
  let home = std::env::var("HOME")
    .or_else(|_| std::env::var("USERPROFILE"))
    .map_err(|e| RecognitionError::Unavailable(format!("无法确定模型目录: {}", e)))?;
  Ok(Path::new(&home).join(".cache/ocrs"))
}

impl OcrsRecognizer {
  pub fn load(model_dir: &Path) -> Result<Self, RecognitionError> {
    let detection_path = model_dir.join(DETECTION_MODEL);
    let recognition_path = model_dir.join(RECOGNITION_MODEL);
    if !detection_path.exists() || !recognition_path.exists() {
      return Err(RecognitionError::Unavailable(format!(
        "OCR 模型不存在: {} / {}",
        detection_path.display(),
        recognition_path.display()
      )));
    }

    info!("加载 OCR 模型: {}", model_dir.display());
    let detection_model = Model::load_file(&detection_path)
      .map_err(|e| RecognitionError::Unavailable(e.to_string()))?;
    let recognition_model = Model::load_file(&recognition_path)
      .map_err(|e| RecognitionError::Unavailable(e.to_string()))?;

    let engine = OcrEngine::new(OcrEngineParams {
      detection_model: Some(detection_model),
      recognition_model: Some(recognition_model),
      ..Default::default()
    })
    .map_err(|e| RecognitionError::Unavailable(e.to_string()))?;

    Ok(Self { engine })
  }
}

impl RecognizeText for OcrsRecognizer {
  fn recognize_text(&self, crop: &Crop) -> Result<RecognizedText, RecognitionError> {
    let source = ImageSource::from_bytes(crop.image.as_nhwc(), (crop.width(), crop.height()))
      .map_err(|e| RecognitionError::Failed(e.to_string()))?;
    let input = self
      .engine
      .prepare_input(source)
      .map_err(|e| RecognitionError::Failed(e.to_string()))?;
    let text = self
      .engine
      .get_text(&input)
      .map_err(|e| RecognitionError::Failed(e.to_string()))?;
    debug!("OCR 输出: {:?}", text);
    Ok(text)
  }
}
