mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use xmodal_pipeline::{
    BackgroundRemovalPipeline, DepthEstimationPipeline, ImageFeatureExtractionPipeline, ImageSegmentationPipeline,
    ImageToImagePipeline, ModelConfig, ObjectDetectionPipeline, Pipeline, PipelineError, RawImage,
    ZeroShotImageClassificationPipeline,
};
use xmodal_values::{Tensor, TensorMap};

use common::{f32_tensor, image_json, setup, FnSession, WordTokenizer, ZeroImageProcessor};

fn config(raw: &str) -> ModelConfig {
    ModelConfig::from_json_str(raw).expect("Failed to parse config")
}

fn detector(session: Arc<FnSession>) -> Pipeline {
    let config = config(r#"{"id2label": {"0": "cat", "1": "dog", "2": "N/A"}}"#);
    Pipeline::from(ObjectDetectionPipeline::new(Arc::new(ZeroImageProcessor), session, config))
}

/// One confident cat, one no-object query.
fn detection_session() -> FnSession {
    FnSession::fixed(
        TensorMap::new()
            .with("logits", f32_tensor(vec![5.0, 0.0, 0.0, 0.0, 0.0, 5.0], vec![1, 2, 3]))
            .with("pred_boxes", f32_tensor(vec![0.5, 0.5, 0.2, 0.4, 0.5, 0.5, 1.0, 1.0], vec![1, 2, 4])),
    )
}

#[test]
fn test_object_detection_pixel_and_percentage_boxes() {
    setup();
    let pipeline = detector(Arc::new(detection_session()));

    let detections = pipeline.call(image_json(10, 20), Value::Null).expect("Detection failed");
    let detections = detections.as_array().unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0]["label"], json!("cat"));
    assert_eq!(detections[0]["box"], json!({"xmin": 4, "ymin": 6, "xmax": 6, "ymax": 14}));

    let fractions = pipeline.call(image_json(10, 20), json!({"percentage": true})).unwrap();
    let xmin = fractions[0]["box"]["xmin"].as_f64().unwrap();
    assert!((xmin - 0.4).abs() < 1e-6);

    let none = pipeline.call(image_json(10, 20), json!({"threshold": 0.999})).unwrap();
    assert_eq!(none, json!([]));
}

#[test]
fn test_object_detection_batch_ceiling() {
    setup();
    let session = Arc::new(detection_session());
    let pipeline = detector(session.clone());

    let err = pipeline
        .call(json!([image_json(4, 4), image_json(4, 4)]), Value::Null)
        .unwrap_err();
    assert!(matches!(err, PipelineError::InputShape(_)), "got {err:?}");
    assert_eq!(session.call_count(), 0);

    let single = pipeline.call(json!([image_json(10, 20)]), Value::Null).unwrap();
    assert_eq!(single.as_array().unwrap().len(), 1);
    assert_eq!(single[0][0]["label"], json!("cat"));
}

#[test]
fn test_zero_shot_ranks_labels() {
    setup();
    let tokenizer = Arc::new(WordTokenizer::new());
    let session = Arc::new(FnSession::fixed(
        TensorMap::new().with("logits_per_image", f32_tensor(vec![1.0, 3.0, 2.0], vec![1, 3])),
    ));
    let pipeline = Pipeline::from(ZeroShotImageClassificationPipeline::new(
        tokenizer.clone(),
        Arc::new(ZeroImageProcessor),
        session,
        ModelConfig::default(),
    ));

    let ranked = pipeline
        .call(image_json(2, 2), json!({"candidate_labels": ["cat", "dog", "bird"]}))
        .unwrap();
    let labels: Vec<&str> = ranked.as_array().unwrap().iter().map(|r| r["label"].as_str().unwrap()).collect();
    assert_eq!(labels, vec!["dog", "bird", "cat"]);
    let total: f64 = ranked.as_array().unwrap().iter().map(|r| r["score"].as_f64().unwrap()).sum();
    assert!((total - 1.0).abs() < 1e-5);

    let calls = tokenizer.calls.lock().unwrap();
    assert_eq!(calls[0].0[0], "This is a photo of cat");
}

#[test]
fn test_zero_shot_siglip_scores_independently() {
    setup();
    let tokenizer = Arc::new(WordTokenizer::new());
    let session = Arc::new(FnSession::fixed(
        TensorMap::new().with("logits_per_image", f32_tensor(vec![0.0, 0.0], vec![1, 2])),
    ));
    let pipeline = Pipeline::from(ZeroShotImageClassificationPipeline::new(
        tokenizer.clone(),
        Arc::new(ZeroImageProcessor),
        session,
        config(r#"{"model_type": "siglip"}"#),
    ));

    let ranked = pipeline
        .call(
            json!([image_json(2, 2)]),
            json!({"candidate_labels": ["cat", "dog"], "hypothesis_template": "a {}"}),
        )
        .unwrap();
    assert_eq!(ranked.as_array().unwrap().len(), 1);
    for entry in ranked[0].as_array().unwrap() {
        assert!((entry["score"].as_f64().unwrap() - 0.5).abs() < 1e-6);
    }
    // padded to the maximum length, not the longest label
    assert_eq!(tokenizer.calls.lock().unwrap()[0].1, 8);

    let err = pipeline.call(image_json(2, 2), json!({"candidate_labels": []})).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(_)));
}

#[test]
fn test_image_feature_extraction_pooling_output() {
    setup();
    let session = Arc::new(FnSession::fixed(
        TensorMap::new().with("last_hidden_state", f32_tensor(vec![0.5; 6], vec![1, 3, 2])),
    ));
    let pipeline = Pipeline::from(ImageFeatureExtractionPipeline::new(Arc::new(ZeroImageProcessor), session));

    let features: Tensor = serde_json::from_value(pipeline.call(image_json(2, 2), Value::Null).unwrap()).unwrap();
    assert_eq!(features.dims(), &[1, 3, 2]);

    let err = pipeline.call(image_json(2, 2), json!({"pool": true})).unwrap_err();
    assert!(
        matches!(err, PipelineError::UnsupportedOutput { ref head } if head == "pooler_output"),
        "got {err:?}"
    );
}

/// Class 0 wins the top row, class 1 the bottom row of a 2x2 image.
fn semantic_session() -> FnSession {
    FnSession::fixed(TensorMap::new().with(
        "logits",
        f32_tensor(vec![5.0, 5.0, 0.0, 0.0, 0.0, 0.0, 5.0, 5.0], vec![1, 2, 2, 2]),
    ))
}

#[test]
fn test_semantic_segmentation_masks() {
    setup();
    let pipeline = Pipeline::from(ImageSegmentationPipeline::new(
        Arc::new(ZeroImageProcessor),
        Arc::new(semantic_session()),
        config(r#"{"id2label": {"0": "sky", "1": "ground"}}"#),
    ));

    let segments = pipeline.call(image_json(2, 2), Value::Null).unwrap();
    let segments = segments.as_array().unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0]["label"], json!("sky"));
    assert_eq!(segments[0]["score"], Value::Null);

    let sky: RawImage = serde_json::from_value(segments[0]["mask"].clone()).unwrap();
    assert_eq!(sky.data, vec![255, 255, 0, 0]);
    let ground: RawImage = serde_json::from_value(segments[1]["mask"].clone()).unwrap();
    assert_eq!(ground.data, vec![0, 0, 255, 255]);
}

fn matting_segmenter(session: Arc<FnSession>) -> ImageSegmentationPipeline {
    ImageSegmentationPipeline::new(Arc::new(ZeroImageProcessor), session, ModelConfig::default())
}

#[test]
fn test_background_removal_always_returns_a_list() {
    setup();
    let session = Arc::new(FnSession::fixed(
        TensorMap::new().with("output", f32_tensor(vec![1.0, 1.0, 0.0, 0.0], vec![1, 1, 2, 2])),
    ));
    let pipeline = Pipeline::from(BackgroundRemovalPipeline::new(matting_segmenter(session.clone())));

    let result = pipeline.call(image_json(2, 2), Value::Null).unwrap();
    let images = result.as_array().expect("Expected a list of images");
    assert_eq!(images.len(), 1);
    let cutout: RawImage = serde_json::from_value(images[0].clone()).unwrap();
    assert_eq!(cutout.channels, 4);
    let alpha: Vec<u8> = cutout.data.chunks(4).map(|px| px[3]).collect();
    assert_eq!(alpha, vec![255, 255, 0, 0]);

    let err = pipeline
        .call(json!([image_json(2, 2), image_json(2, 2)]), Value::Null)
        .unwrap_err();
    assert!(matches!(err, PipelineError::InputShape(_)));
    assert_eq!(session.call_count(), 1);
}

#[test]
fn test_depth_estimation_normalizes_to_u8() {
    setup();
    let session = Arc::new(FnSession::fixed(
        TensorMap::new().with("predicted_depth", f32_tensor(vec![0.0, 1.0, 2.0, 3.0], vec![1, 2, 2])),
    ));
    let pipeline = Pipeline::from(DepthEstimationPipeline::new(Arc::new(ZeroImageProcessor), session));

    let result = pipeline.call(image_json(2, 2), Value::Null).unwrap();
    let depth: RawImage = serde_json::from_value(result["depth"].clone()).unwrap();
    assert_eq!(depth.data, vec![0, 85, 170, 255]);
    let predicted: Tensor = serde_json::from_value(result["predicted_depth"].clone()).unwrap();
    assert_eq!(predicted.dims(), &[2, 2]);

    let batched = pipeline.call(json!([image_json(2, 2)]), Value::Null).unwrap();
    assert_eq!(batched.as_array().unwrap().len(), 1);
}

#[test]
fn test_image_to_image_converts_reconstruction() {
    setup();
    let session = Arc::new(FnSession::fixed(TensorMap::new().with(
        "reconstruction",
        f32_tensor(vec![0.0, 1.0, 0.5, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0], vec![1, 3, 2, 2]),
    )));
    let pipeline = Pipeline::from(ImageToImagePipeline::new(Arc::new(ZeroImageProcessor), session));

    let image: RawImage = serde_json::from_value(pipeline.call(image_json(2, 2), Value::Null).unwrap()).unwrap();
    assert_eq!((image.width, image.height, image.channels), (2, 2, 3));
    assert_eq!(&image.data[..6], &[0, 0, 255, 255, 0, 255]);
    assert_eq!(image.data[6], 128);
}
