//! End-to-end analysis tests against mock collaborators

mod common;

use bda_core::{BoundingBox, Detection, Error};
use bda_pipeline::{BdaPipeline, PipelineState};
use common::*;
use std::sync::Arc;

struct Harness {
    fixture: Fixture,
    script: Arc<ModelScript>,
    images: Arc<FixedImageSource>,
    pipeline: BdaPipeline,
}

fn harness() -> Harness {
    harness_with_detector(None)
}

fn harness_with_detector(detector: Option<Arc<FixedDetector>>) -> Harness {
    let fixture = Fixture::new();
    let script = ModelScript::new();
    let images = Arc::new(FixedImageSource::new());

    let mut builder = BdaPipeline::builder(fixture.settings.clone())
        .with_loader(Arc::new(ScriptedLoader::new(script.clone())))
        .with_fetcher(Arc::new(CountingFetcher::new()))
        .with_image_source(images.clone());
    if let Some(detector) = detector {
        builder = builder.with_detector(detector);
    }

    Harness {
        pipeline: builder.build().unwrap(),
        fixture,
        script,
        images,
    }
}

#[test]
fn test_classify_prompt_lists_vocabulary() {
    let h = harness();
    assert_eq!(
        h.pipeline.classify_prompt(),
        "CLASSIFY TARGETS. Choose from: vehicle, structure. Answer with a comma separated list."
    );
    assert_eq!(h.pipeline.vocabulary().labels(), &["vehicle", "structure"]);
}

#[test]
fn test_full_analysis_vehicle_and_structure() {
    let h = harness();
    h.script.respond(CLASSIFY_MARKER, "vehicle, structure");
    h.script
        .respond(REPORT_MARKER, "PHYSICAL DAMAGE ASSESSMENT:\n- Vehicle: destroyed");

    let report = h.pipeline.analyze(h.fixture.image_path("scene.png")).unwrap();

    assert_eq!(report, "PHYSICAL DAMAGE ASSESSMENT:\n- Vehicle: destroyed");
    assert_eq!(h.script.generate_calls(), 2);

    let prompts = h.script.prompts();
    assert!(prompts[0].contains("Choose from: vehicle, structure"));
    assert!(prompts[0].starts_with("system: You are a battle damage assessment analyst."));
    assert!(prompts[0].contains("user: <image>CLASSIFY TARGETS"));

    let report_prompt = &prompts[1];
    assert!(report_prompt.contains("DETECTED CATEGORIES: vehicle, structure"));
    assert!(report_prompt.contains("TARGET CATEGORY: VEHICLE"));
    assert!(report_prompt.contains("VEHICLE PHYSICAL DAMAGE CONSIDERATIONS\nCheck for fire damage."));
    assert!(report_prompt.contains("TARGET CATEGORY: STRUCTURE"));
    assert!(report_prompt.contains(
        "SCENE-LEVEL FUNCTIONAL DAMAGE DEFINITIONS\nScene is non-functional when access is denied."
    ));

    let vehicle = report_prompt.find("TARGET CATEGORY: VEHICLE").unwrap();
    let structure = report_prompt.find("TARGET CATEGORY: STRUCTURE").unwrap();
    let functional = report_prompt.find("SCENE-LEVEL").unwrap();
    assert!(vehicle < structure && structure < functional);
}

#[test]
fn test_noisy_classifier_output_is_normalized() {
    let h = harness();
    h.script
        .respond(CLASSIFY_MARKER, "Vehicle,\n'Structure', unknown_label");
    h.script.respond(REPORT_MARKER, "report");

    h.pipeline.analyze(h.fixture.image_path("scene.jpg")).unwrap();

    let prompts = h.script.prompts();
    assert!(prompts[1].contains("DETECTED CATEGORIES: vehicle, structure\n"));
    assert!(!prompts[1].contains("unknown_label"));
}

#[test]
fn test_nothing_detected_still_reports() {
    let h = harness();
    h.script.respond(CLASSIFY_MARKER, "   ");
    h.script.respond(REPORT_MARKER, "No damage observed.");

    let report = h.pipeline.analyze(h.fixture.image_path("empty.png")).unwrap();

    assert_eq!(report, "No damage observed.");
    let report_prompt = &h.script.prompts()[1];
    assert!(report_prompt.contains("DETECTED CATEGORIES: NONE"));
    assert!(!report_prompt.contains("TARGET CATEGORY"));
    assert!(!report_prompt.contains("NO TARGET DOCTRINE AVAILABLE."));
    assert!(report_prompt.contains("SCENE-LEVEL FUNCTIONAL DAMAGE DEFINITIONS"));
}

#[test]
fn test_generation_params_forwarded() {
    let h = harness();
    h.pipeline.analyze(h.fixture.image_path("scene.png")).unwrap();

    let params = h.script.params();
    assert_eq!(params.len(), 2);
    for p in params {
        assert_eq!(p.get("max_new_tokens"), Some(&64.into()));
    }
}

#[test]
fn test_detector_path_skips_self_classification() {
    let detector = Arc::new(FixedDetector::new(vec![
        Detection::new("structure")
            .with_score(0.91)
            .with_box(BoundingBox::new(0, 0, 4, 4)),
        Detection::new("tank").with_score(0.88),
        Detection::new("vehicle").with_score(0.75),
        Detection::new("structure").with_score(0.6),
    ]));
    let h = harness_with_detector(Some(detector.clone()));
    h.script.respond(REPORT_MARKER, "report");

    h.pipeline.analyze(h.fixture.image_path("scene.png")).unwrap();

    assert_eq!(detector.call_count(), 1);
    assert_eq!(h.script.generate_calls(), 1);
    let report_prompt = &h.script.prompts()[0];
    assert!(report_prompt.contains("DETECTED CATEGORIES: structure, vehicle\n"));
    assert!(!report_prompt.contains("tank"));
}

#[test]
fn test_detect_categories_filters_detector_output() {
    let detector = Arc::new(FixedDetector::new(vec![
        Detection::new("aircraft"),
        Detection::new("vehicle").with_score(0.5),
    ]));
    let h = harness_with_detector(Some(detector));

    let scene = image::RgbImage::new(4, 4);
    let detections = h.pipeline.detect_categories(&scene).unwrap();
    assert_eq!(detections, vec![Detection::new("vehicle").with_score(0.5)]);
}

#[test]
fn test_decode_failure_leaves_pipeline_usable() {
    let h = harness();
    h.script.respond(CLASSIFY_MARKER, "vehicle");
    h.script.respond(REPORT_MARKER, "report");

    let err = h
        .pipeline
        .analyze(h.fixture.image_path("corrupt.png"))
        .unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    assert!(!err.is_fatal_for_batch());
    assert_eq!(h.script.generate_calls(), 0);

    let report = h.pipeline.analyze(h.fixture.image_path("scene.png")).unwrap();
    assert_eq!(report, "report");
    assert_eq!(h.pipeline.state(), PipelineState::Ready);
    assert_eq!(h.images.call_count(), 2);
}

#[test]
fn test_inference_failure_propagates_without_retry() {
    let h = harness();
    h.script.respond(CLASSIFY_MARKER, "vehicle");
    h.script.fail_on(REPORT_MARKER);

    let err = h
        .pipeline
        .analyze(h.fixture.image_path("scene.png"))
        .unwrap_err();

    assert!(matches!(err, Error::Inference(_)));
    assert!(err.is_fatal_for_batch());
    assert_eq!(h.script.generate_calls(), 2);
    assert_eq!(h.pipeline.state(), PipelineState::Ready);
}

#[test]
fn test_repeated_analysis_is_deterministic() {
    let h = harness();
    h.script.respond(CLASSIFY_MARKER, "structure");
    h.script.respond(REPORT_MARKER, "report");

    let first = h.pipeline.analyze(h.fixture.image_path("scene.png")).unwrap();
    let second = h.pipeline.analyze(h.fixture.image_path("scene.png")).unwrap();

    assert_eq!(first, second);
    let prompts = h.script.prompts();
    assert_eq!(prompts.len(), 4);
    assert_eq!(prompts[0], prompts[2]);
    assert_eq!(prompts[1], prompts[3]);
}

#[test]
fn test_report_prompt_is_pure() {
    let h = harness();
    let detections = vec![Detection::new("vehicle"), Detection::new("vehicle")];

    let prompt = h.pipeline.report_prompt(&detections);
    assert_eq!(prompt, h.pipeline.report_prompt(&detections));
    assert_eq!(prompt.matches("TARGET CATEGORY: VEHICLE").count(), 1);
    assert!(prompt.starts_with("DETECTED CATEGORIES: vehicle\n"));
    assert_eq!(h.script.generate_calls(), 0);
}
