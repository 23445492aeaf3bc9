// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/session.rs - 会话选择状态与提示词选择
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

use rand::{Rng, seq::SliceRandom};
use tracing::{debug, info, warn};

use crate::{
  catalog::{Pack, PromptItem},
  roast::{RoastResult, RoastStyle},
  upload::UploadedImage,
  validate::ValidatedBatch,
};

/// 当前会话的选择状态。
///
/// 状态只通过 [`Session::select_pack`]、[`Session::reroll_prompt`]、
/// [`Session::accept_batch`] 和吐槽编排器的 `generate` 修改。
/// 不变式：`prompt` 总是属于 `pack` 的问题项。
#[derive(Debug, Clone, Default)]
pub struct Session {
  style: RoastStyle,
  pack: Option<Pack>,
  prompt: Option<PromptItem>,
  images: Vec<UploadedImage>,
  results: Option<RoastResult>,
  epoch: u64,
}

impl Session {
  pub fn new(style: RoastStyle) -> Self {
    Self {
      style,
      ..Self::default()
    }
  }

  pub fn style(&self) -> RoastStyle {
    self.style
  }

  pub fn set_style(&mut self, style: RoastStyle) {
    self.style = style;
  }

  pub fn pack(&self) -> Option<&Pack> {
    self.pack.as_ref()
  }

  pub fn prompt(&self) -> Option<&PromptItem> {
    self.prompt.as_ref()
  }

  pub fn images(&self) -> &[UploadedImage] {
    &self.images
  }

  pub fn results(&self) -> Option<&RoastResult> {
    self.results.as_ref()
  }

  /// 每次更换卡包、问题或图片都会递增
  pub fn epoch(&self) -> u64 {
    self.epoch
  }

  /// 当前提示词要求的图片数，未选择卡包时为 1
  pub fn required_images(&self) -> usize {
    self
      .prompt
      .as_ref()
      .and_then(PromptItem::required_image_count)
      .unwrap_or(1)
  }

  /// 选中了卡包但卡包里没有问题项时不允许上传
  pub fn can_upload(&self) -> bool {
    self.pack.is_none() || self.prompt.is_some()
  }

  pub fn can_generate(&self) -> bool {
    !self.images.is_empty() && self.images.len() >= self.required_images()
  }

  /// 选择卡包：清空图片与结果，并从问题项中均匀随机选一个
  pub fn select_pack<R: Rng + ?Sized>(&mut self, pack: Pack, rng: &mut R) -> Option<&PromptItem> {
    info!("选择卡包: {}", pack.title);
    self.epoch += 1;
    self.images.clear();
    self.results = None;

    let questions: Vec<&PromptItem> = pack.questions().collect();
    self.prompt = questions.choose(rng).map(|item| (*item).clone());
    if self.prompt.is_none() {
      warn!("卡包 {} 没有可用的问题，禁止上传", pack.title);
    }
    self.pack = Some(pack);
    self.prompt.as_ref()
  }

  /// 换一个问题，新问题的文本一定与当前不同；只有一个问题时什么也不做
  pub fn reroll_prompt<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<&PromptItem> {
    let Some(pack) = self.pack.as_ref() else {
      return None;
    };
    let current = self.prompt.as_ref().map(PromptItem::text);

    let candidates: Vec<&PromptItem> = pack
      .questions()
      .filter(|item| Some(item.text()) != current)
      .collect();
    if pack.questions().count() > 1
      && let Some(next) = candidates.choose(rng)
    {
      debug!("换题: {:?} -> {}", current, next.text());
      self.prompt = Some((*next).clone());
      self.epoch += 1;
    } else {
      debug!("卡包 {} 只有一个问题，保持不变", pack.title);
    }
    self.prompt.as_ref()
  }

  /// 用新一批通过校验的图片替换当前图片，并清空旧结果
  pub fn accept_batch(&mut self, batch: &ValidatedBatch) -> usize {
    let accepted = batch.accepted();
    if accepted.is_empty() {
      debug!("本批没有通过校验的图片，保持当前图片不变");
      return self.images.len();
    }
    self.images = accepted;
    self.results = None;
    self.epoch += 1;
    info!("当前图片数: {}", self.images.len());
    self.images.len()
  }

  pub(crate) fn commit_results(&mut self, results: RoastResult) {
    self.results = Some(results);
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use rand::{SeedableRng, rngs::StdRng};

  use super::*;
  use crate::{
    detector::DetectorGateway,
    test_helpers::{FakeLoader, blank_upload, face_upload},
    validate::{BatchMode, ImageValidator},
  };

  fn pack_with_questions(texts: &[&str]) -> Pack {
    let mut items = vec![PromptItem::statement("intro")];
    items.extend(texts.iter().map(|t| PromptItem::question(*t, 2)));
    Pack {
      id: "test".to_string(),
      title: "Test Pack".to_string(),
      items,
    }
  }

  async fn batch(files: Vec<UploadedImage>) -> ValidatedBatch {
    let gateway = Arc::new(DetectorGateway::new(FakeLoader::ready()));
    gateway.initialize().await;
    ImageValidator::new(gateway)
      .validate_batch(files, BatchMode::Single)
      .await
      .unwrap()
  }

  #[test]
  fn selecting_a_pack_picks_a_question() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut session = Session::default();
    let prompt = session
      .select_pack(pack_with_questions(&["A", "B", "C"]), &mut rng)
      .cloned()
      .unwrap();
    assert!(prompt.is_question());
    assert!(["A", "B", "C"].contains(&prompt.text()));
    assert_eq!(session.required_images(), 2);
    assert!(session.can_upload());
  }

  #[test]
  fn pack_without_questions_clears_selection_and_blocks_upload() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut session = Session::default();
    let pack = Pack {
      id: "s".to_string(),
      title: "Statements".to_string(),
      items: vec![PromptItem::statement("only talk")],
    };
    assert!(session.select_pack(pack, &mut rng).is_none());
    assert!(session.prompt().is_none());
    assert!(!session.can_upload());
  }

  #[test]
  fn reroll_never_repeats_the_current_prompt() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut session = Session::default();
    session.select_pack(pack_with_questions(&["A", "B", "C"]), &mut rng);

    for _ in 0..200 {
      let before = session.prompt().unwrap().text().to_string();
      let after = session.reroll_prompt(&mut rng).unwrap().text().to_string();
      assert_ne!(before, after);
    }
  }

  #[test]
  fn reroll_with_single_question_is_a_no_op() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut session = Session::default();
    session.select_pack(pack_with_questions(&["Only"]), &mut rng);
    assert_eq!(session.reroll_prompt(&mut rng).unwrap().text(), "Only");
  }

  #[test]
  fn reroll_without_pack_does_nothing() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut session = Session::default();
    assert!(session.reroll_prompt(&mut rng).is_none());
  }

  #[tokio::test]
  async fn selecting_a_new_pack_resets_images_and_results() {
    let mut rng = StdRng::seed_from_u64(9);
    let mut session = Session::default();
    session.select_pack(pack_with_questions(&["A"]), &mut rng);
    session.accept_batch(&batch(vec![face_upload("a.png"), face_upload("b.png")]).await);
    session.commit_results(RoastResult::Flat(vec!["r".to_string()]));
    assert_eq!(session.images().len(), 2);
    assert!(session.can_generate());

    session.select_pack(pack_with_questions(&["B"]), &mut rng);
    assert!(session.images().is_empty());
    assert!(session.results().is_none());
    assert!(!session.can_generate());
  }

  #[tokio::test]
  async fn empty_batch_keeps_previous_images() {
    let mut session = Session::default();
    session.accept_batch(&batch(vec![face_upload("keep.png")]).await);
    session.accept_batch(&batch(vec![blank_upload("wall.png")]).await);
    assert_eq!(session.images()[0].filename(), "keep.png");
  }

  #[tokio::test]
  async fn epoch_moves_only_when_the_selection_changes() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut session = Session::default();
    let start = session.epoch();

    session.select_pack(pack_with_questions(&["Only"]), &mut rng);
    let after_pack = session.epoch();
    assert!(after_pack > start);

    session.reroll_prompt(&mut rng);
    assert_eq!(session.epoch(), after_pack);

    session.accept_batch(&batch(vec![blank_upload("wall.png")]).await);
    assert_eq!(session.epoch(), after_pack);

    session.accept_batch(&batch(vec![face_upload("a.png")]).await);
    assert!(session.epoch() > after_pack);
  }
}
