// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/detector.rs - 检测结果定义
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

/// 原始帧像素坐标下的边界框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BoundingBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  /// 由中心点和宽高构造
  pub fn from_center(center_x: f32, center_y: f32, width: f32, height: f32) -> Self {
    Self {
      left: center_x - width / 2.0,
      top: center_y - height / 2.0,
      right: center_x + width / 2.0,
      bottom: center_y + height / 2.0,
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  /// `right > left` 且 `bottom > top`
  pub fn is_valid(&self) -> bool {
    self.right > self.left && self.bottom > self.top
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bounding_box: BoundingBox,
  pub label: String,
  pub confidence: f32,
}

mod decode;
mod nms;
mod region;

pub use self::decode::Decoder;
pub use self::nms::{iou, suppress};
pub use self::region::{MIN_CROP_SIDE, crop};
