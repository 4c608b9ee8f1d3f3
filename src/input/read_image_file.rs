// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::InputError,
};

/// `image:///path/to/file.jpg?repeat=N`，同一张图重复输出 N 次（默认 1 次）
pub struct ImageFileInput {
  frame: Frame,
  remaining: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let repeat = match url.query_pairs().find(|(k, _)| k == "repeat") {
      Some((_, v)) => v
        .parse::<usize>()
        .map_err(|_| InputError::InvalidParameter(format!("repeat={}", v)))?,
      None => 1,
    };

    Ok(Self {
      frame: load_frame(url.path())?,
      remaining: repeat,
    })
  }
}

pub(crate) fn load_frame(path: impl AsRef<std::path::Path>) -> Result<Frame, InputError> {
  let path = path.as_ref();
  let image = ImageReader::open(path)?.decode()?.to_rgb8();
  debug!(
    "读取图像 {}: {}x{}",
    path.display(),
    image.width(),
    image.height()
  );
  Ok(Frame::try_from(image)?)
}

impl ImageFileInput {
  pub fn new(frame: Frame, repeat: usize) -> Self {
    Self {
      frame,
      remaining: repeat,
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.remaining == 0 {
      return None;
    }
    self.remaining -= 1;
    Some(self.frame.clone())
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;

  #[test]
  fn repeats_the_same_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stop.png");
    RgbImage::from_pixel(8, 6, image::Rgb([1, 2, 3]))
      .save(&path)
      .unwrap();

    let url = Url::parse(&format!("image://{}?repeat=3", path.display())).unwrap();
    let frames: Vec<Frame> = ImageFileInput::from_url(&url).unwrap().collect();
    assert_eq!(frames.len(), 3);
    assert_eq!((frames[0].width(), frames[0].height()), (8, 6));
    assert_eq!(frames[2].pixel(7, 5), Some([1, 2, 3]));
  }

  #[test]
  fn missing_file_is_an_error() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(InputError::IoError(_))
    ));
  }
}
