// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/output/draw.rs - 组合树栅格化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 RoastMyFace contributors

use ab_glyph::{FontArc, PxScale};
use image::{
  Pixel, Rgba, RgbaImage,
  imageops::{self, FilterType},
};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_text_mut},
  rect::Rect as PixelRect,
};
use tracing::trace;

use crate::compose::{Color, Content, Element, Rect};

pub const EXPORT_SCALE: f32 = 2.0;
const LINE_HEIGHT: f32 = 1.4;
const BACKDROP: [u8; 4] = [255, 255, 255, 255];

/// 栅格化器。
///
/// 只认识 [`Color::Rgba`]，遇到无法表示的颜色编码时直接跳过该填充或文字，
/// 相当于画成透明，所以导出前必须先做颜色清理。
pub struct Draw {
  font: FontArc,
  scale: f32,
}

impl Default for Draw {
  fn default() -> Self {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf"); // default font
    let font = FontArc::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    Self {
      font,
      scale: EXPORT_SCALE,
    }
  }
}

impl Draw {
  pub fn with_scale(mut self, scale: f32) -> Self {
    self.scale = scale;
    self
  }

  pub fn scale(&self) -> f32 {
    self.scale
  }

  fn to_pixels(&self, rect: &Rect) -> (i32, i32, u32, u32) {
    let x = (rect.x * self.scale).round() as i32;
    let y = (rect.y * self.scale).round() as i32;
    let w = (rect.width * self.scale).round().max(0.0) as u32;
    let h = (rect.height * self.scale).round().max(0.0) as u32;
    (x, y, w, h)
  }

  /// 在不透明白色底板上绘制整棵组合树
  pub fn render(&self, root: &Element) -> RgbaImage {
    let width = ((root.rect.width * self.scale).ceil() as u32).max(1);
    let height = ((root.rect.height * self.scale).ceil() as u32).max(1);
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba(BACKDROP));

    self.draw_element(&mut canvas, root);
    canvas
  }

  fn draw_element(&self, canvas: &mut RgbaImage, element: &Element) {
    if let Some(color) = &element.style.background {
      self.fill(canvas, &element.rect, color);
    }

    match &element.content {
      Content::None => {}
      Content::Image(image) => self.draw_image(canvas, &element.rect, image),
      Content::Text { text, size } => {
        match &element.style.foreground {
          Some(color) => self.draw_text(canvas, &element.rect, text, *size, color),
          None => self.draw_text(canvas, &element.rect, text, *size, &Color::BLACK),
        }
      }
    }

    for child in &element.children {
      self.draw_element(canvas, child);
    }
  }

  fn fill(&self, canvas: &mut RgbaImage, rect: &Rect, color: &Color) {
    let Some(rgba) = color.rgba() else {
      trace!("跳过无法表示的背景色: {:?}", color);
      return;
    };
    let (x, y, w, h) = self.to_pixels(rect);
    if w == 0 || h == 0 || rgba[3] == 0 {
      return;
    }

    if rgba[3] == 255 {
      draw_filled_rect_mut(canvas, PixelRect::at(x, y).of_size(w, h), Rgba(rgba));
      return;
    }

    // 半透明填充需要与底色混合
    let x_start = x.max(0) as u32;
    let y_start = y.max(0) as u32;
    let x_end = ((x + w as i32).max(0) as u32).min(canvas.width());
    let y_end = ((y + h as i32).max(0) as u32).min(canvas.height());
    for py in y_start..y_end {
      for px in x_start..x_end {
        canvas.get_pixel_mut(px, py).blend(&Rgba(rgba));
      }
    }
  }

  // object-cover：等比缩放到完全覆盖目标矩形，再居中裁剪
  fn draw_image(&self, canvas: &mut RgbaImage, rect: &Rect, image: &RgbaImage) {
    let (x, y, w, h) = self.to_pixels(rect);
    if w == 0 || h == 0 || image.width() == 0 || image.height() == 0 {
      return;
    }

    let factor = (w as f32 / image.width() as f32).max(h as f32 / image.height() as f32);
    let scaled_w = ((image.width() as f32 * factor).ceil() as u32).max(w);
    let scaled_h = ((image.height() as f32 * factor).ceil() as u32).max(h);
    let scaled = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
    let tile = imageops::crop_imm(&scaled, (scaled_w - w) / 2, (scaled_h - h) / 2, w, h).to_image();

    imageops::overlay(canvas, &tile, x as i64, y as i64);
  }

  fn draw_text(&self, canvas: &mut RgbaImage, rect: &Rect, text: &str, size: f32, color: &Color) {
    let Some(rgba) = color.rgba() else {
      trace!("跳过无法表示的文字颜色: {:?}", color);
      return;
    };
    let (x, y, _, _) = self.to_pixels(rect);
    let scale = PxScale::from(size * self.scale);
    let line_height = (size * LINE_HEIGHT * self.scale).round() as i32;

    for (i, line) in text.lines().enumerate() {
      draw_text_mut(
        canvas,
        Rgba(rgba),
        x,
        y + i as i32 * line_height,
        scale,
        &self.font,
        line,
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;

  #[test]
  fn backdrop_is_opaque_white_at_double_scale() {
    let root = Element::container(Rect::new(0.0, 0.0, 10.0, 5.0), None);
    let canvas = Draw::default().render(&root);
    assert_eq!(canvas.dimensions(), (20, 10));
    assert!(canvas.pixels().all(|p| p.0 == BACKDROP));
  }

  #[test]
  fn unsupported_background_is_skipped() {
    let root = Element::container(Rect::new(0.0, 0.0, 10.0, 10.0), Some(Color::parse("red")))
      .with_child(Element::container(
        Rect::new(0.0, 0.0, 5.0, 5.0),
        Some(Color::parse("oklch(0.5 0.2 30)")),
      ));
    let canvas = Draw::default().render(&root);
    // 子元素区域露出父元素的红色
    assert_eq!(canvas.get_pixel(2, 2).0, [255, 0, 0, 255]);
  }

  #[test]
  fn images_cover_their_rect() {
    let source = RgbaImage::from_pixel(4, 2, Rgba([0, 0, 255, 255]));
    let root = Element::container(Rect::new(0.0, 0.0, 20.0, 20.0), None).with_child(
      Element::image(Rect::new(5.0, 5.0, 10.0, 10.0), Arc::new(source)),
    );
    let canvas = Draw::default().render(&root);
    let is_blue = |p: &Rgba<u8>| p.0[0] < 8 && p.0[1] < 8 && p.0[2] > 247;
    assert!(is_blue(canvas.get_pixel(10, 10)));
    assert!(is_blue(canvas.get_pixel(29, 29)));
    assert_eq!(canvas.get_pixel(31, 31).0, BACKDROP);
    assert_eq!(canvas.get_pixel(9, 9).0, BACKDROP);
  }

  #[test]
  fn text_leaves_ink_on_canvas() {
    let root = Element::container(Rect::new(0.0, 0.0, 100.0, 30.0), None).with_child(Element::text(
      Rect::new(0.0, 0.0, 100.0, 30.0),
      "Roast",
      14.0,
      Color::BLACK,
    ));
    let canvas = Draw::default().render(&root);
    assert!(canvas.pixels().any(|p| p.0[0] < 128));
  }
}
