// 该文件是 Zhanpai （站牌播报） 项目的一部分。
// src/detector/region.rs - 按检测框裁剪
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
  detector::BoundingBox,
  frame::{Crop, Frame, RGB_CHANNELS},
};

/// 裁剪区域的最小边长，更小的区域不可能包含可读的文字
pub const MIN_CROP_SIDE: u32 = 20;

/// 将检测框限制在帧内后裁剪，任一边小于 [`MIN_CROP_SIDE`] 时返回 `None`
pub fn crop(frame: &Frame, bbox: &BoundingBox) -> Option<Crop> {
  let (frame_w, frame_h) = (frame.width(), frame.height());

  // `as u32` 对负数和 NaN 饱和到 0
  let left = (bbox.left.max(0.0) as u32).min(frame_w);
  let top = (bbox.top.max(0.0) as u32).min(frame_h);
  let right = (bbox.right.min(frame_w as f32).max(0.0) as u32).min(frame_w);
  let bottom = (bbox.bottom.min(frame_h as f32).max(0.0) as u32).min(frame_h);

  let width = right.saturating_sub(left);
  let height = bottom.saturating_sub(top);
  if width < MIN_CROP_SIDE || height < MIN_CROP_SIDE {
    debug!("裁剪区域过小: {}x{}", width, height);
    return None;
  }

  let src = frame.as_nhwc();
  let row_bytes = width as usize * RGB_CHANNELS;
  let mut data = Vec::with_capacity(row_bytes * height as usize);
  for y in top..bottom {
    let start = (y as usize * frame_w as usize + left as usize) * RGB_CHANNELS;
    data.extend_from_slice(&src[start..start + row_bytes]);
  }

  let image = Frame::new(width, height, data).ok()?;
  Some(Crop { left, top, image })
}
