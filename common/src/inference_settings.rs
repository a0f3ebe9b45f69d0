/// Generation defaults, tuned per model family.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceSettings {
    pub temperature: f32,
    pub max_new_tokens: u32,
    pub top_k: u32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub do_sample: bool,
    pub num_beams: u32,
    pub early_stopping: bool,
    pub length_penalty: f32,
    pub num_return_sequences: u32,
    pub system_prompt: String,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_new_tokens: 1024,
            top_k: 50,
            top_p: 0.9,
            repetition_penalty: 1.2,
            do_sample: true,
            num_beams: 1,
            early_stopping: true,
            length_penalty: 1.0,
            num_return_sequences: 1,
            system_prompt: "You are a helpful AI assistant.".to_string(),
        }
    }
}

impl InferenceSettings {
    /// Get settings for a model by pattern matching on repo_id
    pub fn for_model(repo_id: &str) -> Self {
        let lower = repo_id.to_lowercase();

        if lower.contains("smollm") {
            return Self {
                temperature: 0.7,
                top_k: 40,
                top_p: 0.95,
                repetition_penalty: 1.1,
                max_new_tokens: 512,
                ..Default::default()
            };
        }

        if lower.contains("phi") {
            return Self {
                temperature: 0.6,
                top_k: 50,
                top_p: 0.9,
                repetition_penalty: 1.15,
                max_new_tokens: 1024,
                ..Default::default()
            };
        }

        if lower.contains("qwen") {
            return Self {
                temperature: 0.7,
                top_k: 50,
                top_p: 0.8,
                repetition_penalty: 1.1,
                max_new_tokens: 2048,
                ..Default::default()
            };
        }

        if lower.contains("llama") {
            return Self {
                temperature: 0.6,
                top_k: 40,
                top_p: 0.9,
                repetition_penalty: 1.15,
                max_new_tokens: 2048,
                ..Default::default()
            };
        }

        Self::default()
    }

    /// Deterministic decoding: no sampling, single beam.
    pub fn greedy(max_new_tokens: u32) -> Self {
        Self {
            do_sample: false,
            num_beams: 1,
            repetition_penalty: 1.0,
            max_new_tokens,
            ..Default::default()
        }
    }
}
