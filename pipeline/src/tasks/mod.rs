/// Task handlers
///
/// One handler per [`PipelineType`]. Every handler follows the same steps:
/// normalize the input, enforce the batch ceiling, preprocess, invoke the
/// model (directly or through a loop), post-process and re-wrap.
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use xmodal_values::{Tensor, TensorMap};

use crate::error::{PipelineError, Result};
use crate::input::{Batch, InputItem, PipelineInput};
use crate::types::PipelineType;

pub mod audio_classification;
pub mod background_removal;
pub mod depth_estimation;
pub mod feature_extraction;
pub mod fill_mask;
pub mod image_feature_extraction;
pub mod image_segmentation;
pub mod image_to_image;
pub mod object_detection;
pub mod question_answering;
pub mod text_classification;
pub mod text_generation;
pub mod text_to_audio;
pub mod zero_shot_image_classification;

/// Shared `(inputs, options) -> result` contract of the task handlers.
pub trait TaskHandler: Send + Sync {
    type Input: InputItem;
    type Options: DeserializeOwned + Default;
    type Output: Serialize;

    fn pipeline_type(&self) -> PipelineType;

    /// Runs an already normalized batch.
    fn process(&self, batch: Batch<Self::Input>, options: &Self::Options) -> Result<Self::Output>;

    /// Typed entry point.
    fn call(&self, input: PipelineInput<Self::Input>, options: &Self::Options) -> Result<Self::Output> {
        let batch = Batch::new(input)?;
        self.run_batch(batch, options)
    }

    /// JSON entry point: `options` may be `null` for all defaults.
    fn call_json(&self, inputs: &Value, options: &Value) -> Result<Value> {
        let batch = Batch::<Self::Input>::from_json(inputs)?;
        let options = parse_options::<Self::Options>(options)?;
        Ok(serde_json::to_value(self.run_batch(batch, &options)?)?)
    }

    fn run_batch(&self, batch: Batch<Self::Input>, options: &Self::Options) -> Result<Self::Output> {
        let task = self.pipeline_type();
        if let Some(limit) = task.batch_ceiling() {
            batch.ensure_ceiling(limit, task)?;
        }
        log::debug!("{task}: processing {} input(s)", batch.len());
        self.process(batch, options)
    }
}

pub(crate) fn parse_options<O: DeserializeOwned + Default>(options: &Value) -> Result<O> {
    match options {
        Value::Null => Ok(O::default()),
        other => serde_json::from_value(other.clone())
            .map_err(|e| PipelineError::Configuration(format!("invalid options: {e}"))),
    }
}

/// Seeded generator when the caller asks for reproducibility.
pub(crate) fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// First output among `names`, or `UnsupportedOutput` naming the first.
pub(crate) fn take_first_of(outputs: &mut TensorMap, names: &[&str]) -> Result<Tensor> {
    for name in names {
        if let Some(tensor) = outputs.remove(name) {
            return Ok(tensor);
        }
    }
    Err(PipelineError::UnsupportedOutput {
        head: names.first().copied().unwrap_or_default().to_string(),
    })
}

/// Splits the leading axis into per-item tensors.
pub(crate) fn unbatch(tensor: &Tensor) -> Result<Vec<Tensor>> {
    let batch = tensor.dims().first().copied().unwrap_or(0);
    (0..batch).map(|i| Ok(tensor.index(i)?)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize, Debug, PartialEq)]
    #[serde(default)]
    struct Opts {
        top_k: Option<usize>,
    }

    impl Default for Opts {
        fn default() -> Self {
            Self { top_k: Some(1) }
        }
    }

    #[test]
    fn test_missing_and_null_top_k_differ() {
        let missing: Opts = parse_options(&serde_json::json!({})).unwrap();
        assert_eq!(missing.top_k, Some(1));
        let null: Opts = parse_options(&serde_json::json!({"top_k": null})).unwrap();
        assert_eq!(null.top_k, None);
        let none: Opts = parse_options(&Value::Null).unwrap();
        assert_eq!(none.top_k, Some(1));
    }

    #[test]
    fn test_bad_options_are_configuration_errors() {
        let err = parse_options::<Opts>(&serde_json::json!({"top_k": "many"})).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_take_first_of_names_missing_head() {
        let mut outputs = TensorMap::new().with("logits", Tensor::zeros_f32(vec![1]));
        assert!(take_first_of(&mut outputs, &["last_hidden_state", "logits"]).is_ok());
        let err = take_first_of(&mut outputs, &["pooler_output"]).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedOutput { head } if head == "pooler_output"));
    }
}
