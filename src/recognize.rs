// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/recognize.rs - 文字识别边界
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
  sync::mpsc::{self, Sender},
  thread::{self, JoinHandle},
};

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Crop};

#[derive(Error, Debug, Clone)]
pub enum RecognitionError {
  #[error("文字识别引擎不可用: {0}")]
  Unavailable(String),
  #[error("文字识别失败: {0}")]
  Failed(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 识别器返回的原始文字，可能为空
pub type RecognizedText = String;

/// 识别完成回调，可能在任意线程上执行
pub type RecognitionCallback = Box<dyn FnOnce(Result<RecognizedText, RecognitionError>) + Send>;

/// 异步文字识别: 立即返回，结果稍后通过回调送达。
/// 回调被丢弃而未调用时，调用方也必须能正确收尾。
pub trait TextRecognizer: Send + Sync {
  fn recognize(&self, crop: Crop, on_done: RecognitionCallback);
}

/// 阻塞式文字识别，配合 [`ThreadedRecognizer`] 使用
pub trait RecognizeText: Send {
  fn recognize_text(&self, crop: &Crop) -> Result<RecognizedText, RecognitionError>;
}

type Job = (Crop, RecognitionCallback);

/// 在独立线程上运行阻塞式识别器，把它变成 [`TextRecognizer`]
pub struct ThreadedRecognizer {
  jobs: Option<Sender<Job>>,
  worker: Option<JoinHandle<()>>,
}

impl ThreadedRecognizer {
  pub fn spawn<T: RecognizeText + 'static>(inner: T) -> Result<Self, RecognitionError> {
    let (tx, rx) = mpsc::channel::<Job>();
    let worker = thread::Builder::new()
      .name("text-recognizer".to_string())
      .spawn(move || {
        for (crop, on_done) in rx {
          debug!("识别裁剪区域 {}x{}", crop.width(), crop.height());
          on_done(inner.recognize_text(&crop));
        }
        debug!("文字识别线程退出");
      })
      .map_err(|e| RecognitionError::Unavailable(e.to_string()))?;

    Ok(Self {
      jobs: Some(tx),
      worker: Some(worker),
    })
  }
}

impl TextRecognizer for ThreadedRecognizer {
  fn recognize(&self, crop: Crop, on_done: RecognitionCallback) {
    match self.jobs.as_ref() {
      Some(tx) => {
        if let Err(mpsc::SendError((_, on_done))) = tx.send((crop, on_done)) {
          error!("文字识别线程已退出");
          on_done(Err(RecognitionError::Unavailable(
            "文字识别线程已退出".to_string(),
          )));
        }
      }
      None => on_done(Err(RecognitionError::Unavailable(
        "文字识别器已关闭".to_string(),
      ))),
    }
  }
}

impl Drop for ThreadedRecognizer {
  fn drop(&mut self) {
    // 先关闭队列，线程处理完剩余任务后退出
    self.jobs.take();
    // 最后一个引用可能在回调里被释放，此时不能等待自身
    if let Some(worker) = self.worker.take()
      && worker.thread().id() != thread::current().id()
      && worker.join().is_err()
    {
      error!("文字识别线程异常退出");
    }
  }
}

/// 总是返回空文字，只跑检测不做识别时使用
pub struct SilentRecognizer;

impl FromUrlWithScheme for SilentRecognizer {
  const SCHEME: &'static str = "silent";
}

impl FromUrl for SilentRecognizer {
  type Error = RecognitionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecognitionError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(SilentRecognizer)
  }
}

impl RecognizeText for SilentRecognizer {
  fn recognize_text(&self, _crop: &Crop) -> Result<RecognizedText, RecognitionError> {
    Ok(String::new())
  }
}

#[cfg(feature = "ocrs_recognizer")]
mod ocrs_recognizer;
#[cfg(feature = "ocrs_recognizer")]
pub use self::ocrs_recognizer::OcrsRecognizer;

pub enum RecognizerWrapper {
  Silent(SilentRecognizer),
  #[cfg(feature = "ocrs_recognizer")]
  Ocrs(OcrsRecognizer),
}

impl FromUrl for RecognizerWrapper {
  type Error = RecognitionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    info!("创建文字识别器: {}", url);
    match url.scheme() {
      SilentRecognizer::SCHEME => Ok(RecognizerWrapper::Silent(SilentRecognizer::from_url(url)?)),
      #[cfg(feature = "ocrs_recognizer")]
      OcrsRecognizer::SCHEME => Ok(RecognizerWrapper::Ocrs(OcrsRecognizer::from_url(url)?)),
      other => Err(RecognitionError::SchemeMismatch(other.to_string())),
    }
  }
}

impl RecognizeText for RecognizerWrapper {
  fn recognize_text(&self, crop: &Crop) -> Result<RecognizedText, RecognitionError> {
    match self {
      RecognizerWrapper::Silent(inner) => inner.recognize_text(crop),
      #[cfg(feature = "ocrs_recognizer")]
      RecognizerWrapper::Ocrs(inner) => inner.recognize_text(crop),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{sync::mpsc, time::Duration};

  use super::*;
  use crate::frame::Frame;

  struct Echo(&'static str);

  impl RecognizeText for Echo {
    fn recognize_text(&self, crop: &Crop) -> Result<RecognizedText, RecognitionError> {
      Ok(format!("{} {}x{}", self.0, crop.width(), crop.height()))
    }
  }

  fn sample_crop() -> Crop {
    Crop {
      left: 0,
      top: 0,
      image: Frame::filled(24, 21, [0, 0, 0]).unwrap(),
    }
  }

  #[test]
  fn delivers_results_in_order_on_worker_thread() {
    let recognizer = ThreadedRecognizer::spawn(Echo("146번")).unwrap();
    let (tx, rx) = mpsc::channel();
    let caller = thread::current().id();

    for i in 0..3 {
      let tx = tx.clone();
      recognizer.recognize(
        sample_crop(),
        Box::new(move |result| {
          let _ = tx.send((i, result, thread::current().id()));
        }),
      );
    }

    for expected in 0..3 {
      let (i, result, thread_id) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
      assert_eq!(i, expected);
      assert_eq!(result.unwrap(), "146번 24x21");
      assert_ne!(thread_id, caller);
    }
  }

  #[test]
  fn silent_recognizer_returns_empty_text() {
    assert_eq!(SilentRecognizer.recognize_text(&sample_crop()).unwrap(), "");
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("tesseract:///models").unwrap();
    assert!(matches!(
      RecognizerWrapper::from_url(&url),
      Err(RecognitionError::SchemeMismatch(_))
    ));
  }
}
