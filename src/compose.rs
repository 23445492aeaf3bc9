// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/compose.rs - 吐槽卡片的可视化组合树与布局
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

use std::sync::Arc;

use image::RgbaImage;
use thiserror::Error;
use tracing::debug;

use crate::{roast::RoastResult, session::Session, upload::UploadedImage};

// 布局常量，单位为 CSS 像素，栅格化时再乘以缩放倍数
const CARD_PADDING: f32 = 24.0;
const SINGLE_CARD_WIDTH: f32 = 320.0;
const TILE_WIDTH: f32 = 250.0;
const TILE_HEIGHT: f32 = 280.0;
const GRID_GAP: f32 = 16.0;
const ROAST_FONT_SIZE: f32 = 14.0;
const BRAND_FONT_SIZE: f32 = 12.0;
const PROMPT_FONT_SIZE: f32 = 18.0;
const LINE_HEIGHT: f32 = 1.4;
const CHAR_WIDTH_RATIO: f32 = 0.55; // 每字符平均宽度（粗略估计）
const ROAST_SPACING: f32 = 16.0;

pub const BRAND_NAME: &str = "RoastMyFace";
pub const BRAND_HANDLE: &str = "@roastmyface";

#[derive(Debug, Clone, PartialEq)]
pub enum Color {
  Rgba([u8; 4]),
  /// 栅格化器无法表示的颜色编码，保留原始文本
  Unsupported(String),
}

impl Color {
  pub const WHITE: Color = Color::Rgba([255, 255, 255, 255]);
  pub const BLACK: Color = Color::Rgba([0, 0, 0, 255]);
  pub const TRANSPARENT: Color = Color::Rgba([0, 0, 0, 0]);

  /// 解析 CSS 颜色。十六进制、`rgb()`/`rgba()` 与常用颜色名可直接表示，
  /// 其余编码（`oklch()`、`lab()`、`color-mix()` 等）记为 [`Color::Unsupported`]。
  pub fn parse(css: &str) -> Color {
    let value = css.trim().to_ascii_lowercase();
    let parsed = if let Some(hex) = value.strip_prefix('#') {
      parse_hex(hex)
    } else if let Some(args) = value
      .strip_prefix("rgba(")
      .or_else(|| value.strip_prefix("rgb("))
      .and_then(|rest| rest.strip_suffix(')'))
    {
      parse_rgb_args(args)
    } else {
      named(&value)
    };
    parsed.unwrap_or_else(|| Color::Unsupported(css.trim().to_string()))
  }

  pub fn is_supported(&self) -> bool {
    matches!(self, Color::Rgba(_))
  }

  pub fn rgba(&self) -> Option<[u8; 4]> {
    match self {
      Color::Rgba(rgba) => Some(*rgba),
      Color::Unsupported(_) => None,
    }
  }
}

fn parse_hex(hex: &str) -> Option<Color> {
  let digit = |i: usize| u8::from_str_radix(hex.get(i..i + 1)?, 16).ok();
  let pair = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
  let rgba = match hex.len() {
    3 => [digit(0)? * 17, digit(1)? * 17, digit(2)? * 17, 255],
    4 => [digit(0)? * 17, digit(1)? * 17, digit(2)? * 17, digit(3)? * 17],
    6 => [pair(0)?, pair(2)?, pair(4)?, 255],
    8 => [pair(0)?, pair(2)?, pair(4)?, pair(6)?],
    _ => return None,
  };
  Some(Color::Rgba(rgba))
}

fn parse_rgb_args(args: &str) -> Option<Color> {
  let parts: Vec<&str> = args
    .split([',', ' ', '/'])
    .map(str::trim)
    .filter(|p| !p.is_empty())
    .collect();
  if parts.len() != 3 && parts.len() != 4 {
    return None;
  }

  let channel = |p: &str| -> Option<u8> {
    let value = match p.strip_suffix('%') {
      Some(percent) => percent.parse::<f32>().ok()? * 2.55,
      None => p.parse::<f32>().ok()?,
    };
    Some(value.round().clamp(0.0, 255.0) as u8)
  };
  let alpha = |p: &str| -> Option<u8> {
    let value = match p.strip_suffix('%') {
      Some(percent) => percent.parse::<f32>().ok()? / 100.0,
      None => p.parse::<f32>().ok()?,
    };
    Some((value.clamp(0.0, 1.0) * 255.0).round() as u8)
  };

  Some(Color::Rgba([
    channel(parts[0])?,
    channel(parts[1])?,
    channel(parts[2])?,
    match parts.get(3) {
      Some(a) => alpha(a)?,
      None => 255,
    },
  ]))
}

fn named(name: &str) -> Option<Color> {
  let rgba = match name {
    "transparent" => [0, 0, 0, 0],
    "white" => [255, 255, 255, 255],
    "black" => [0, 0, 0, 255],
    "red" => [255, 0, 0, 255],
    "green" => [0, 128, 0, 255],
    "blue" => [0, 0, 255, 255],
    "gray" | "grey" => [128, 128, 128, 255],
    "yellow" => [255, 255, 0, 255],
    _ => return None,
  };
  Some(Color::Rgba(rgba))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Style {
  pub background: Option<Color>,
  pub foreground: Option<Color>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl Rect {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub enum Content {
  #[default]
  None,
  /// 以 object-cover 方式填满所在矩形
  Image(Arc<RgbaImage>),
  /// 已换行的文本，行之间以 '\n' 分隔
  Text { text: String, size: f32 },
}

/// 可视化组合树的抽象接口，颜色清理只依赖这些方法
pub trait VisualNode: Sized {
  fn style(&self) -> &Style;
  fn style_mut(&mut self) -> &mut Style;
  fn children(&self) -> &[Self];
  fn children_mut(&mut self) -> &mut [Self];
  fn has_content(&self) -> bool;

  /// 自身或任意后代有可绘制内容
  fn is_renderable(&self) -> bool {
    self.has_content() || self.children().iter().any(VisualNode::is_renderable)
  }
}

/// 绝对定位的元素，坐标相对于根元素左上角
#[derive(Debug, Clone, Default)]
pub struct Element {
  pub rect: Rect,
  pub style: Style,
  pub content: Content,
  pub children: Vec<Element>,
}

impl Element {
  pub fn container(rect: Rect, background: Option<Color>) -> Self {
    Self {
      rect,
      style: Style {
        background,
        foreground: None,
      },
      ..Self::default()
    }
  }

  pub fn image(rect: Rect, image: Arc<RgbaImage>) -> Self {
    Self {
      rect,
      content: Content::Image(image),
      ..Self::default()
    }
  }

  pub fn text(rect: Rect, text: impl Into<String>, size: f32, color: Color) -> Self {
    Self {
      rect,
      style: Style {
        background: None,
        foreground: Some(color),
      },
      content: Content::Text {
        text: text.into(),
        size,
      },
      children: Vec::new(),
    }
  }

  pub fn with_child(mut self, child: Element) -> Self {
    self.children.push(child);
    self
  }

  pub fn push(&mut self, child: Element) {
    self.children.push(child);
  }

  /// 深度优先遍历的元素总数（含自身）
  pub fn count(&self) -> usize {
    1 + self.children.iter().map(Element::count).sum::<usize>()
  }
}

impl VisualNode for Element {
  fn style(&self) -> &Style {
    &self.style
  }

  fn style_mut(&mut self) -> &mut Style {
    &mut self.style
  }

  fn children(&self) -> &[Self] {
    &self.children
  }

  fn children_mut(&mut self) -> &mut [Self] {
    &mut self.children
  }

  fn has_content(&self) -> bool {
    match &self.content {
      Content::None => false,
      Content::Image(image) => image.width() > 0 && image.height() > 0,
      Content::Text { text, .. } => !text.trim().is_empty(),
    }
  }
}

#[derive(Error, Debug)]
pub enum ComposeError {
  #[error("cannot decode {name}: {source}")]
  Decode {
    name: String,
    #[source]
    source: image::ImageError,
  },
}

/// 按估算字符宽度贪心换行
pub fn wrap_text(text: &str, width: f32, size: f32) -> Vec<String> {
  let max_chars = ((width / (size * CHAR_WIDTH_RATIO)).floor() as usize).max(1);
  let mut lines = Vec::new();
  let mut line = String::new();

  for word in text.split_whitespace() {
    let mut word = word.to_string();
    // 超长单词强制拆开
    while word.chars().count() > max_chars {
      if !line.is_empty() {
        lines.push(std::mem::take(&mut line));
      }
      let split = word
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(word.len());
      let rest = word.split_off(split);
      lines.push(word);
      word = rest;
    }

    let needed = if line.is_empty() {
      word.chars().count()
    } else {
      line.chars().count() + 1 + word.chars().count()
    };
    if needed > max_chars && !line.is_empty() {
      lines.push(std::mem::take(&mut line));
    }
    if !line.is_empty() {
      line.push(' ');
    }
    line.push_str(&word);
  }
  if !line.is_empty() {
    lines.push(line);
  }
  lines
}

fn text_block(x: f32, y: f32, width: f32, text: &str, size: f32, color: Color) -> Element {
  let lines = wrap_text(text, width, size);
  let height = lines.len() as f32 * size * LINE_HEIGHT;
  Element::text(Rect::new(x, y, width, height), lines.join("\n"), size, color)
}

/// 图像网格的列数：2 张并排，4 张 2×2，其余最多 3 列
pub fn grid_columns(count: usize) -> usize {
  match count {
    0 | 1 => 1,
    2 | 4 => 2,
    n => n.min(3),
  }
}

// Tailwind v4 的调色板使用 oklch 编码
fn brand_handle_color() -> Color {
  Color::parse("oklch(0.446 0.03 256.802)")
}

fn pack_card_background() -> Color {
  Color::parse("oklch(0.488 0.243 264.376)")
}

/// 吐槽卡片：原图加上叠加的吐槽文本，是导出图片的来源
pub struct RoastCard<'a> {
  images: &'a [UploadedImage],
  results: Option<&'a RoastResult>,
  prompt: Option<&'a str>,
}

impl<'a> RoastCard<'a> {
  pub fn new(images: &'a [UploadedImage]) -> Self {
    Self {
      images,
      results: None,
      prompt: None,
    }
  }

  pub fn from_session(session: &'a Session) -> Self {
    Self {
      images: session.images(),
      results: session.results(),
      prompt: session.prompt().map(|p| p.text()),
    }
  }

  pub fn with_results(mut self, results: &'a RoastResult) -> Self {
    self.results = Some(results);
    self
  }

  pub fn with_prompt(mut self, prompt: &'a str) -> Self {
    self.prompt = Some(prompt);
    self
  }

  fn decode(&self) -> Result<Vec<Arc<RgbaImage>>, ComposeError> {
    self
      .images
      .iter()
      .map(|file| {
        image::load_from_memory(file.data())
          .map(|image| Arc::new(image.to_rgba8()))
          .map_err(|source| ComposeError::Decode {
            name: file.filename().to_string(),
            source,
          })
      })
      .collect()
  }

  pub fn build(&self) -> Result<Element, ComposeError> {
    let decoded = self.decode()?;
    let root = match decoded.len() {
      0 => Element::container(Rect::new(0.0, 0.0, SINGLE_CARD_WIDTH, CARD_PADDING * 2.0), None),
      1 => self.single_layout(&decoded[0]),
      _ => self.grid_layout(&decoded),
    };
    debug!(
      "卡片布局完成: {}x{}, {} 个元素",
      root.rect.width,
      root.rect.height,
      root.count()
    );
    Ok(root)
  }

  fn has_roasts(&self) -> bool {
    self.results.is_some_and(|r| !r.is_empty())
  }

  fn brand_header(&self, x: f32, y: f32, width: f32) -> (Vec<Element>, f32) {
    let line = BRAND_FONT_SIZE * LINE_HEIGHT;
    let elements = vec![
      Element::text(Rect::new(x, y, width, line), BRAND_NAME, BRAND_FONT_SIZE, Color::BLACK),
      Element::text(
        Rect::new(x, y + line, width, line),
        BRAND_HANDLE,
        BRAND_FONT_SIZE,
        brand_handle_color(),
      ),
    ];
    (elements, line * 2.0)
  }

  fn roast_list<'r>(
    &self,
    roasts: impl IntoIterator<Item = &'r str>,
    x: f32,
    mut y: f32,
    width: f32,
  ) -> (Vec<Element>, f32) {
    let start = y;
    let mut elements = Vec::new();
    for roast in roasts {
      y += ROAST_SPACING;
      let block = text_block(x, y, width, roast, ROAST_FONT_SIZE, Color::BLACK);
      y += block.rect.height;
      elements.push(block);
    }
    (elements, y - start)
  }

  fn single_layout(&self, image: &Arc<RgbaImage>) -> Element {
    let inner = SINGLE_CARD_WIDTH - CARD_PADDING * 2.0;
    let image_height = inner * image.height() as f32 / image.width().max(1) as f32;
    let mut y = CARD_PADDING;
    let mut children = vec![Element::image(
      Rect::new(CARD_PADDING, y, inner, image_height),
      Arc::clone(image),
    )];
    y += image_height + 8.0;

    if self.has_roasts()
      && let Some(results) = self.results
    {
      let (header, height) = self.brand_header(CARD_PADDING, y, inner);
      children.extend(header);
      y += height;
      let (roasts, height) = self.roast_list(results.texts(), CARD_PADDING, y, inner);
      children.extend(roasts);
      y += height;
    }

    Element {
      rect: Rect::new(0.0, 0.0, SINGLE_CARD_WIDTH, y + CARD_PADDING),
      style: Style {
        background: Some(Color::WHITE),
        foreground: None,
      },
      content: Content::None,
      children,
    }
  }

  fn grid_layout(&self, images: &[Arc<RgbaImage>]) -> Element {
    let columns = grid_columns(images.len());
    let width = CARD_PADDING * 2.0 + columns as f32 * TILE_WIDTH + (columns - 1) as f32 * GRID_GAP;
    let inner = width - CARD_PADDING * 2.0;
    let mut children = Vec::new();
    let mut y = CARD_PADDING;

    if let Some(prompt) = self.prompt {
      let block = text_block(
        CARD_PADDING + 8.0,
        y + 8.0,
        inner - 16.0,
        prompt,
        PROMPT_FONT_SIZE,
        Color::BLACK,
      );
      let height = block.rect.height + 16.0;
      let banner = Element::container(Rect::new(CARD_PADDING, y, inner, height), Some(Color::WHITE))
        .with_child(block);
      y += height + GRID_GAP;
      children.push(banner);
    }

    let tile_roasts: Vec<Vec<&str>> = (0..images.len())
      .map(|i| self.results.map(|r| r.roasts_for(i)).unwrap_or_default())
      .collect();

    for (row, chunk) in images.chunks(columns).enumerate() {
      let mut row_height = TILE_HEIGHT;
      let mut tiles = Vec::new();
      for (col, image) in chunk.iter().enumerate() {
        let index = row * columns + col;
        let x = CARD_PADDING + col as f32 * (TILE_WIDTH + GRID_GAP);
        let mut tile = Element::container(Rect::new(x, y, TILE_WIDTH, TILE_HEIGHT), Some(Color::WHITE))
          .with_child(Element::image(
            Rect::new(x, y, TILE_WIDTH, TILE_HEIGHT),
            Arc::clone(image),
          ));

        let (roasts, text_height) =
          self.roast_list(tile_roasts[index].iter().copied(), x + 8.0, y + TILE_HEIGHT, TILE_WIDTH - 16.0);
        for roast in roasts {
          tile.push(roast);
        }
        let tile_height = TILE_HEIGHT + text_height + if text_height > 0.0 { 8.0 } else { 0.0 };
        tile.rect.height = tile_height;
        row_height = row_height.max(tile_height);
        tiles.push(tile);
      }
      children.extend(tiles);
      y += row_height + GRID_GAP;
    }
    y -= GRID_GAP;

    if self.has_roasts() {
      y += GRID_GAP;
      let (header, height) = self.brand_header(CARD_PADDING, y, inner);
      let mut footer = Element::container(
        Rect::new(CARD_PADDING, y, inner, height),
        Some(Color::WHITE),
      );
      for element in header {
        footer.push(element);
      }
      children.push(footer);
      y += height;

      if let Some(RoastResult::Flat(roasts)) = self.results {
        let (list, height) = self.roast_list(roasts.iter().map(String::as_str), CARD_PADDING, y, inner);
        children.extend(list);
        y += height;
      }
    }

    Element {
      rect: Rect::new(0.0, 0.0, width, y + CARD_PADDING),
      style: Style {
        background: Some(pack_card_background()),
        foreground: None,
      },
      content: Content::None,
      children,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{roast::ImageRoast, test_helpers::face_upload};

  #[test]
  fn css_colors_parse() {
    assert_eq!(Color::parse("#fff"), Color::WHITE);
    assert_eq!(Color::parse("#FF000080"), Color::Rgba([255, 0, 0, 128]));
    assert_eq!(Color::parse("rgb(0, 128, 255)"), Color::Rgba([0, 128, 255, 255]));
    assert_eq!(Color::parse("rgba(0 0 0 / 50%)"), Color::Rgba([0, 0, 0, 128]));
    assert_eq!(Color::parse("transparent"), Color::TRANSPARENT);
  }

  #[test]
  fn modern_color_spaces_are_unsupported() {
    for css in [
      "oklch(0.446 0.03 256.802)",
      "oklab(0.5 0.1 0.1)",
      "lab(50% 40 59)",
      "lch(52% 72 50)",
      "color(display-p3 1 0 0)",
      "color-mix(in srgb, red, blue)",
    ] {
      let color = Color::parse(css);
      assert!(!color.is_supported(), "{css} should be unsupported");
      assert_eq!(color, Color::Unsupported(css.to_string()));
    }
  }

  #[test]
  fn wrapping_respects_estimated_width() {
    let lines = wrap_text("you look like a dial up modem from 2003", 77.0, 14.0);
    assert_eq!(lines, ["you look", "like a", "dial up", "modem from", "2003"]);

    let split = wrap_text("screensaver", 77.0, 14.0);
    assert_eq!(split, ["screensave", "r"]);
  }

  #[test]
  fn grid_columns_follow_card_rules() {
    assert_eq!(grid_columns(2), 2);
    assert_eq!(grid_columns(3), 3);
    assert_eq!(grid_columns(4), 2);
    assert_eq!(grid_columns(7), 3);
  }

  #[test]
  fn brand_header_only_appears_with_roasts() {
    let images = vec![face_upload("me.png")];
    let bare = RoastCard::new(&images).build().unwrap();
    assert_eq!(bare.children.len(), 1);

    let results = RoastResult::Flat(vec!["r1".to_string(), "r2".to_string()]);
    let card = RoastCard::new(&images).with_results(&results).build().unwrap();
    let texts: Vec<&str> = card
      .children
      .iter()
      .filter_map(|e| match &e.content {
        Content::Text { text, .. } => Some(text.as_str()),
        _ => None,
      })
      .collect();
    assert_eq!(texts, [BRAND_NAME, BRAND_HANDLE, "r1", "r2"]);
    assert!(card.rect.height > bare.rect.height);
  }

  #[test]
  fn pack_card_places_roasts_under_their_image() {
    let images = vec![face_upload("a.png"), face_upload("b.png")];
    let results = RoastResult::PerImage(vec![ImageRoast {
      image_index: 1,
      roast: "second".to_string(),
    }]);
    let card = RoastCard::new(&images)
      .with_results(&results)
      .with_prompt("Who?")
      .build()
      .unwrap();

    assert_eq!(card.rect.width, CARD_PADDING * 2.0 + TILE_WIDTH * 2.0 + GRID_GAP);
    let tiles: Vec<&Element> = card
      .children
      .iter()
      .filter(|e| e.rect.width == TILE_WIDTH)
      .collect();
    assert_eq!(tiles.len(), 2);
    assert_eq!(tiles[0].children.len(), 1);
    assert_eq!(tiles[1].children.len(), 2);
    assert!(!card.style.background.as_ref().unwrap().is_supported());
  }

  #[test]
  fn empty_card_is_not_renderable() {
    let card = RoastCard::new(&[]).build().unwrap();
    assert!(!card.is_renderable());
  }
}
