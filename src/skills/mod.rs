//! Skill capability interface and registry.
//!
//! Skills are the external collaborator boundary: the engine resolves one
//! per task and drives it through [`SkillHandler::on_request`] and the
//! optional continuation hook. The built-in handlers are deterministic
//! stand-ins so the engine runs without external providers.

pub mod builtin;
pub mod handler;
pub mod registry;

pub use builtin::{
    DataTransformationSkill, ImageProcessingSkill, TaskOrchestrationSkill, TextAnalysisSkill,
};
pub use handler::{ContinueOutput, SkillHandler, SkillOutput};
pub use registry::{
    SkillRegistry, SKILL_DATA_TRANSFORMATION, SKILL_IMAGE_PROCESSING, SKILL_TASK_ORCHESTRATION,
    SKILL_TEXT_ANALYSIS,
};
