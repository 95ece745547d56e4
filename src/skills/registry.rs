use std::collections::HashMap;
use std::sync::Arc;

use super::builtin::{
    DataTransformationSkill, ImageProcessingSkill, TaskOrchestrationSkill, TextAnalysisSkill,
};
use super::handler::SkillHandler;

pub const SKILL_TEXT_ANALYSIS: &str = "text-analysis";
pub const SKILL_IMAGE_PROCESSING: &str = "image-processing";
pub const SKILL_DATA_TRANSFORMATION: &str = "data-transformation";
pub const SKILL_TASK_ORCHESTRATION: &str = "task-orchestration";

/// Registry of skill capabilities, resolved once per operation by id.
#[derive(Default)]
pub struct SkillRegistry {
    handlers: HashMap<String, Arc<dyn SkillHandler>>,
}

impl SkillRegistry {
    /// Empty registry; callers register their own handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the deterministic built-in capabilities.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextAnalysisSkill));
        registry.register(Arc::new(ImageProcessingSkill));
        registry.register(Arc::new(DataTransformationSkill));
        registry.register(Arc::new(TaskOrchestrationSkill::default()));
        registry
    }

    /// Register a handler under its own id, replacing any previous handler
    /// with the same id.
    pub fn register(&mut self, handler: Arc<dyn SkillHandler>) {
        self.handlers.insert(handler.id().to_string(), handler);
    }

    pub fn get(&self, skill_id: &str) -> Option<Arc<dyn SkillHandler>> {
        self.handlers.get(skill_id).cloned()
    }

    pub fn contains(&self, skill_id: &str) -> bool {
        self.handlers.contains_key(skill_id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}
