//! Deterministic built-in capabilities.
//!
//! These are same-interface stand-ins selected by configuration: they
//! produce stable, provider-free results so the lifecycle engine can run
//! without any external model wired in.

use async_trait::async_trait;
use serde_json::json;

use super::handler::{ContinueOutput, SkillHandler, SkillOutput};
use super::registry::{
    SKILL_DATA_TRANSFORMATION, SKILL_IMAGE_PROCESSING, SKILL_TASK_ORCHESTRATION,
    SKILL_TEXT_ANALYSIS,
};
use crate::errors::{EngineError, EngineResult};
use crate::protocol::{Artifact, Message, Part, Task};

fn prompt_text(task: &Task) -> String {
    task.status_text().unwrap_or_default().to_string()
}

// ============================================================================
// Text Analysis
// ============================================================================

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "excellent", "happy", "love", "wonderful", "positive", "nice",
];
const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "sad", "hate", "horrible", "negative", "poor",
];

/// Word count and keyword-based sentiment over the triggering text.
pub struct TextAnalysisSkill;

#[async_trait]
impl SkillHandler for TextAnalysisSkill {
    fn id(&self) -> &str {
        SKILL_TEXT_ANALYSIS
    }

    async fn on_request(&self, task: &Task) -> EngineResult<SkillOutput> {
        let text = prompt_text(task);
        let lower = text.to_lowercase();

        let word_count = text.split_whitespace().count();
        let positive = POSITIVE_WORDS
            .iter()
            .filter(|word| lower.contains(**word))
            .count() as i64;
        let negative = NEGATIVE_WORDS
            .iter()
            .filter(|word| lower.contains(**word))
            .count() as i64;
        let score = positive - negative;
        let sentiment = match score {
            s if s > 0 => "positive",
            s if s < 0 => "negative",
            _ => "neutral",
        };

        let artifact = Artifact::new(
            "analysis",
            vec![Part::data(json!({
                "wordCount": word_count,
                "sentiment": sentiment,
                "score": score,
            }))],
        )
        .last_chunk();

        let message = Message::agent_text(format!(
            "Analyzed {word_count} words; overall sentiment is {sentiment}."
        ));
        Ok(SkillOutput::completed(message).with_artifact(artifact))
    }
}

// ============================================================================
// Image Processing
// ============================================================================

/// Stand-in image pipeline: describes the attached file instead of calling
/// an image backend.
pub struct ImageProcessingSkill;

#[async_trait]
impl SkillHandler for ImageProcessingSkill {
    fn id(&self) -> &str {
        SKILL_IMAGE_PROCESSING
    }

    async fn on_request(&self, task: &Task) -> EngineResult<SkillOutput> {
        let file = task
            .status
            .message
            .as_ref()
            .and_then(|message| {
                message.parts.iter().find_map(|part| match part {
                    Part::File { file, .. } => Some(file),
                    _ => None,
                })
            })
            .ok_or_else(|| EngineError::SkillExecution {
                skill_id: SKILL_IMAGE_PROCESSING.to_string(),
                reason: "message contains no image file part".to_string(),
            })?;

        let name = file.name().unwrap_or("image");
        let artifact = Artifact::new(
            "processed-image",
            vec![Part::data(json!({
                "source": name,
                "mimeType": file.mime_type(),
                "operation": "thumbnail",
                "width": 256,
                "height": 256,
            }))],
        )
        .last_chunk();

        let message = Message::agent_text(format!("Generated a 256x256 thumbnail of {name}."));
        Ok(SkillOutput::completed(message).with_artifact(artifact))
    }
}

// ============================================================================
// Data Transformation
// ============================================================================

/// CSV-to-JSON conversion when the text looks like CSV, otherwise a plain
/// JSON wrapping of the input text.
pub struct DataTransformationSkill;

fn csv_to_rows(text: &str) -> Option<Vec<serde_json::Value>> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let header: Vec<&str> = lines.next()?.split(',').map(str::trim).collect();
    if header.len() < 2 {
        return None;
    }

    let rows: Vec<serde_json::Value> = lines
        .map(|line| {
            let mut row = serde_json::Map::new();
            for (key, value) in header.iter().zip(line.split(',').map(str::trim)) {
                row.insert((*key).to_string(), json!(value));
            }
            serde_json::Value::Object(row)
        })
        .collect();

    if rows.is_empty() {
        None
    } else {
        Some(rows)
    }
}

#[async_trait]
impl SkillHandler for DataTransformationSkill {
    fn id(&self) -> &str {
        SKILL_DATA_TRANSFORMATION
    }

    async fn on_request(&self, task: &Task) -> EngineResult<SkillOutput> {
        let text = prompt_text(task);

        let (payload, summary) = match csv_to_rows(&text) {
            Some(rows) => {
                let count = rows.len();
                (
                    json!({ "format": "json", "rows": rows }),
                    format!("Converted {count} CSV rows to JSON."),
                )
            }
            None => (
                json!({ "format": "json", "value": text }),
                "Wrapped input text as a JSON value.".to_string(),
            ),
        };

        let artifact = Artifact::new("transformed", vec![Part::data(payload)]).last_chunk();
        Ok(SkillOutput::completed(Message::agent_text(summary)).with_artifact(artifact))
    }
}

// ============================================================================
// Task Orchestration
// ============================================================================

const ORCHESTRATION_STEP_KEY: &str = "orchestrationStep";
const ORCHESTRATION_STEPS: &[&str] = &["collect", "transform", "summarize"];

/// Multi-turn pipeline runner: plans a fixed step sequence, then advances
/// one step per continuation turn. Exercises the `input-required`
/// continuation path and engine-side metadata stashing.
#[derive(Default)]
pub struct TaskOrchestrationSkill;

#[async_trait]
impl SkillHandler for TaskOrchestrationSkill {
    fn id(&self) -> &str {
        SKILL_TASK_ORCHESTRATION
    }

    async fn on_request(&self, _task: &Task) -> EngineResult<SkillOutput> {
        let plan = Artifact::new(
            "plan",
            vec![Part::data(json!({ "steps": ORCHESTRATION_STEPS }))],
        )
        .last_chunk();

        let message = Message::agent_text(format!(
            "Pipeline plan created with {} steps. Send any message to run the next step.",
            ORCHESTRATION_STEPS.len()
        ));
        // Pin the skill so continuation turns route back here no matter
        // how the reply is worded.
        Ok(SkillOutput::input_required(message)
            .with_artifact(plan)
            .with_metadata("skill", json!(SKILL_TASK_ORCHESTRATION))
            .with_metadata(ORCHESTRATION_STEP_KEY, json!(0)))
    }

    async fn on_input_received(
        &self,
        task: &Task,
        _user_message: &Message,
    ) -> EngineResult<Option<ContinueOutput>> {
        let step = task
            .metadata_value(ORCHESTRATION_STEP_KEY)
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as usize;

        if step >= ORCHESTRATION_STEPS.len() {
            return Ok(Some(ContinueOutput::terminal(Some(Message::agent_text(
                "Pipeline already finished.",
            )))));
        }

        let name = ORCHESTRATION_STEPS[step];
        let artifact = Artifact::new(
            name,
            vec![Part::data(json!({ "step": name, "status": "done" }))],
        )
        .with_index((step + 1) as u32)
        .last_chunk();

        let next = step + 1;
        let terminal = next >= ORCHESTRATION_STEPS.len();
        let message = if terminal {
            Message::agent_text(format!(
                "Completed step {next} of {}; pipeline finished.",
                ORCHESTRATION_STEPS.len()
            ))
        } else {
            Message::agent_text(format!(
                "Completed step {next} of {}. Send any message to continue.",
                ORCHESTRATION_STEPS.len()
            ))
        };

        let output = if terminal {
            ContinueOutput::terminal(Some(message))
        } else {
            ContinueOutput::needs_more_input(Some(message))
        };
        Ok(Some(
            output
                .with_artifact(artifact)
                .with_metadata(ORCHESTRATION_STEP_KEY, json!(next)),
        ))
    }
}
