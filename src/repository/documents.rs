//! Mapping between `StoryRecord` and the remote story document plus its sub-collections.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{AssetReference, DialogueLine, OwnerScope, QuizQuestion, StoryRecord};
use crate::remote::Document;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryFields {
  teacher_id: String,
  #[serde(default)] slot_index: usize,
  #[serde(default)] title: String,
  #[serde(default)] description: String,
  #[serde(default)] background_image_path: String,
  #[serde(default)] character1_image_path: String,
  #[serde(default)] character2_image_path: String,
  #[serde(default)] created_at: String,
  #[serde(default)] updated_at: String,
  #[serde(default)] assigned_classes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DialogueFields {
  order_index: usize,
  #[serde(default)] speaker: String,
  #[serde(default)] text: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionFields {
  order_index: usize,
  #[serde(default)] question: String,
  #[serde(default)] choices: Vec<String>,
  #[serde(default)] correct_index: usize,
}

fn ref_string(r: Option<&AssetReference>) -> String {
  r.map(|r| r.as_str().to_string()).unwrap_or_default()
}

/// Story document fields, owned by `owner`.
pub fn story_fields(record: &StoryRecord, owner: &OwnerScope) -> Result<Value, serde_json::Error> {
  serde_json::to_value(StoryFields {
    teacher_id: owner.as_str().to_string(),
    slot_index: record.slot_index,
    title: record.title.clone(),
    description: record.description.clone(),
    background_image_path: ref_string(record.background_ref.as_ref()),
    character1_image_path: ref_string(record.character1_ref.as_ref()),
    character2_image_path: ref_string(record.character2_ref.as_ref()),
    created_at: record.created_at.clone(),
    updated_at: record.updated_at.clone(),
    assigned_classes: record.assigned_classes.iter().cloned().collect(),
  })
}

pub fn dialogue_fields(order_index: usize, line: &DialogueLine) -> Result<Value, serde_json::Error> {
  serde_json::to_value(DialogueFields { order_index, speaker: line.speaker.clone(), text: line.text.clone() })
}

pub fn question_fields(order_index: usize, q: &QuizQuestion) -> Result<Value, serde_json::Error> {
  serde_json::to_value(QuestionFields {
    order_index,
    question: q.question.clone(),
    choices: q.choices.clone(),
    correct_index: q.correct_index,
  })
}

/// Assemble a record from a story document and its (already ordered) sub-collections.
/// Malformed sub-documents are skipped rather than failing the whole story.
pub fn record_from_documents(
  doc: &Document,
  dialogues: &[Document],
  questions: &[Document],
) -> Result<StoryRecord, serde_json::Error> {
  let f: StoryFields = serde_json::from_value(doc.fields.clone())?;

  let mut lines: Vec<DialogueFields> = dialogues.iter()
    .filter_map(|d| serde_json::from_value(d.fields.clone()).ok())
    .collect();
  lines.sort_by_key(|d| d.order_index);

  let mut quiz: Vec<QuestionFields> = questions.iter()
    .filter_map(|d| serde_json::from_value(d.fields.clone()).ok())
    .collect();
  quiz.sort_by_key(|q| q.order_index);

  Ok(StoryRecord {
    id: doc.id.clone(),
    slot_index: f.slot_index,
    title: f.title,
    description: f.description,
    background_ref: AssetReference::parse(&f.background_image_path),
    character1_ref: AssetReference::parse(&f.character1_image_path),
    character2_ref: AssetReference::parse(&f.character2_image_path),
    dialogues: lines.into_iter().map(|d| DialogueLine { speaker: d.speaker, text: d.text }).collect(),
    quiz: quiz.into_iter()
      .map(|q| QuizQuestion { question: q.question, choices: q.choices, correct_index: q.correct_index })
      .collect(),
    created_at: f.created_at,
    updated_at: f.updated_at,
    assigned_classes: f.assigned_classes.into_iter().collect(),
  })
}
