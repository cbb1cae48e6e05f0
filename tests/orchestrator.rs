//! End-to-end pipeline scenarios over scripted gateways.

mod common;

use common::*;
use pixelsmith::lock::TaskLock;
use pixelsmith::orchestrator::EditRun;
use pixelsmith::types::ProcessStatus;

const SOURCE_URL: &str = "https://img.test/original.png";

fn run(task_id: &str, prompt: &str) -> EditRun {
    EditRun::new(task_id, prompt, SOURCE_URL, b"original-bytes".to_vec())
}

#[tokio::test]
async fn single_shot_pass_selects_the_top_scorer() {
    let pipeline = build_pipeline(&["seedream-v4", "qwen-edit-plus", "wan-2.5-edit"], |_| {});
    pipeline.validator.push_round(&[
        ("seedream-v4", 7, &[][..]),
        ("qwen-edit-plus", 9, &[][..]),
        ("wan-2.5-edit", 7, &[][..]),
    ]);

    let result = pipeline
        .orchestrator
        .process(run("task-1", "Remove background."))
        .await;

    assert_eq!(result.status, ProcessStatus::Success);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.model_used.as_deref(), Some("qwen-edit-plus"));
    let image = result.final_image.unwrap();
    assert_eq!(image.model_name, "qwen-edit-plus");
    // One validation round, three results recorded.
    assert_eq!(result.all_results.len(), 3);
    assert_eq!(result.metrics.len(), 1);
    assert_eq!(result.metrics[0].best_score, 9);

    // Success writes back to the tracker: the edited image is attached and
    // the trigger checkbox is cleared so the delivery does not re-arm.
    let uploads = pipeline.tracker.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "task-1");
    assert!(uploads[0].1.starts_with("ai-edit-task-1."));
    let fields = pipeline.tracker.fields.lock().unwrap().clone();
    assert_eq!(
        fields,
        vec![(
            "task-1".to_string(),
            "field-ai-edit".to_string(),
            serde_json::Value::Bool(false),
        )]
    );
}

#[tokio::test]
async fn feedback_reaches_the_enhancer_but_never_the_prompt() {
    let pipeline = build_pipeline(&["seedream-v4"], |_| {});
    let issue = "background is off-white with gray tint";
    pipeline.validator.push_round(&[("seedream-v4", 6, &[issue][..])]); // iteration 1
    pipeline.validator.push_round(&[("seedream-v4", 6, &[issue][..])]); // refinement round
    pipeline.validator.push_round(&[("seedream-v4", 9, &[][..])]); // iteration 2

    let result = pipeline
        .orchestrator
        .process(run("task-2", "Make the background pure white."))
        .await;

    assert_eq!(result.status, ProcessStatus::Success);
    assert_eq!(result.iterations, 2);

    // Three enhancement calls: iteration 1, the refinement round, iteration 2.
    let texts = pipeline.reasoning.user_texts();
    assert_eq!(texts.len(), 3);
    assert!(!texts[0].contains("PREVIOUS ATTEMPT FEEDBACK"));
    assert!(!texts[1].contains("PREVIOUS ATTEMPT FEEDBACK"));
    assert!(texts[2].contains("PREVIOUS ATTEMPT FEEDBACK"));
    assert!(texts[2].contains(issue));

    // Clean-prompt invariant: the prompt the generators saw never carries
    // validator vocabulary.
    for job in pipeline.imaging.seen.lock().unwrap().iter() {
        assert!(!job.prompt.contains(issue));
        assert!(!job.prompt.contains("PREVIOUS ATTEMPT FEEDBACK"));
    }
    // And the user-visible request was passed unchanged to validation each time.
    for request in pipeline.validator.requests_seen.lock().unwrap().iter() {
        assert_eq!(request, "Make the background pure white.");
    }
}

#[tokio::test]
async fn compound_request_falls_back_to_sequential_steps() {
    let pipeline = build_pipeline(&["seedream-v4"], |_| {});
    let prompt = "move the logo to the right, change 20% to 30%, and write 'X' below 'Y'. \
                  Keep everything else identical.";

    // Iterations 1-3 and the two interleaved refinement rounds all fail.
    for _ in 0..5 {
        pipeline
            .validator
            .push_round(&[("seedream-v4", 5, &["not all changes applied"][..])]);
    }
    // The three sequential steps pass.
    for _ in 0..3 {
        pipeline.validator.push_round(&[("seedream-v4", 9, &[][..])]);
    }

    let result = pipeline.orchestrator.process(run("task-3", prompt)).await;

    assert_eq!(result.status, ProcessStatus::Success);
    assert_eq!(result.iterations, 3);
    assert_eq!(
        result.model_used.as_deref(),
        Some("seedream-v4 (sequential)")
    );

    // The steps validated in order, each re-suffixed with the preservation
    // clause.
    let requests = pipeline.validator.requests_seen.lock().unwrap().clone();
    assert_eq!(requests.len(), 8);
    assert_eq!(
        requests[5],
        "move the logo to the right. Keep everything else identical."
    );
    assert_eq!(
        requests[6],
        "change 20% to 30%. Keep everything else identical."
    );
    assert_eq!(
        requests[7],
        "write 'X' below 'Y'. Keep everything else identical."
    );

    // Step chaining: each step's base image is the previous step's output.
    let sources = pipeline.imaging.primary_sources();
    assert_eq!(sources.len(), 8);
    assert_eq!(sources[5], SOURCE_URL); // step 1 starts from the original
    assert_eq!(sources[6], "https://cdn.test/seedream-v4/5"); // step 2 ← step 1 output
    assert_eq!(sources[7], "https://cdn.test/seedream-v4/6"); // step 3 ← step 2 output
}

#[tokio::test]
async fn catastrophic_failure_restarts_from_the_original() {
    let pipeline = build_pipeline(&["seedream-v4"], |settings| {
        settings.smart_retry = true;
        settings.max_iterations = 2;
        settings.sequential_trigger = 10;
    });
    pipeline
        .validator
        .push_round(&[("seedream-v4", 3, &["logo distortion"][..])]);
    pipeline.validator.push_round(&[("seedream-v4", 9, &[][..])]);

    let result = pipeline
        .orchestrator
        .process(run("task-4", "move the logo"))
        .await;

    assert_eq!(result.status, ProcessStatus::Success);
    assert_eq!(result.iterations, 2);

    // Full restart: iteration 2's base image is the original, not the
    // iteration-1 edit.
    let sources = pipeline.imaging.primary_sources();
    assert_eq!(sources, vec![SOURCE_URL.to_string(), SOURCE_URL.to_string()]);
}

#[tokio::test]
async fn near_miss_retries_incrementally_on_the_best_edit() {
    let pipeline = build_pipeline(&["seedream-v4"], |settings| {
        settings.smart_retry = true;
        settings.max_iterations = 2;
        settings.sequential_trigger = 10;
        // With the pass bar at 9, a score of 8 fails but still sits at the
        // incremental threshold.
        settings.pass_threshold = 9;
    });
    pipeline
        .validator
        .push_round(&[("seedream-v4", 8, &["slight tint remains"][..])]);
    pipeline.validator.push_round(&[("seedream-v4", 9, &[][..])]);

    let result = pipeline
        .orchestrator
        .process(run("task-4b", "make the background pure white"))
        .await;

    assert_eq!(result.status, ProcessStatus::Success);
    let sources = pipeline.imaging.primary_sources();
    assert_eq!(sources[0], SOURCE_URL);
    // Incremental retry builds on the iteration-1 output.
    assert_eq!(sources[1], "https://cdn.test/seedream-v4/0");
}

#[tokio::test]
async fn exhausted_runs_surface_to_human_review() {
    let pipeline = build_pipeline(&["seedream-v4", "nano-banana"], |settings| {
        settings.max_iterations = 3;
    });
    // Three iterations plus two refinement rounds, every one failing.
    for _ in 0..5 {
        pipeline.validator.push_round(&[
            ("seedream-v4", 5, &["tint"][..]),
            ("nano-banana", 5, &["blur"][..]),
        ]);
    }

    let result = pipeline
        .orchestrator
        .process(run("task-5", "Remove the background"))
        .await;

    assert_eq!(result.status, ProcessStatus::HybridFallback);
    assert_eq!(result.iterations, 3);
    assert!(result.final_image.is_none());
    assert!(result.error.is_some());

    let statuses = pipeline.tracker.statuses.lock().unwrap().clone();
    assert_eq!(statuses, vec![("task-5".to_string(), "needs human review".to_string())]);

    let comments = pipeline.tracker.comments.lock().unwrap().clone();
    assert_eq!(comments.len(), 1);
    let comment = &comments[0].1;
    // Deduplicated issues, prefixed with the responsible model.
    assert_eq!(comment.matches("- [seedream-v4] tint").count(), 1);
    assert_eq!(comment.matches("- [nano-banana] blur").count(), 1);
    assert!(comment.contains("Remove the background"));
    assert!(comment.contains("seedream-v4, nano-banana"));

    // Nothing succeeded, so nothing was attached and the trigger stays set.
    assert!(pipeline.tracker.uploads.lock().unwrap().is_empty());
    assert!(pipeline.tracker.fields.lock().unwrap().is_empty());
}

#[tokio::test]
async fn a_single_iteration_budget_is_terminal() {
    let pipeline = build_pipeline(&["seedream-v4"], |settings| {
        settings.max_iterations = 1;
    });
    pipeline
        .validator
        .push_round(&[("seedream-v4", 5, &["tint"][..])]);

    let result = pipeline
        .orchestrator
        .process(run("task-6", "Remove the background"))
        .await;

    assert_eq!(result.status, ProcessStatus::HybridFallback);
    assert_eq!(result.iterations, 1);
    // No refinement and no sequential mode: exactly one validation round ran.
    assert_eq!(pipeline.validator.requests_seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn one_surviving_enhancement_still_produces_a_run() {
    let pipeline = build_pipeline(&["seedream-v4", "nano-banana"], |_| {});
    // Fail every enhancement aimed at seedream-v4; nano-banana survives.
    *pipeline.reasoning.fail_when_contains.lock().unwrap() =
        Some("for seedream-v4".to_string());
    pipeline.validator.push_round(&[("nano-banana", 9, &[][..])]);

    let result = pipeline
        .orchestrator
        .process(run("task-7", "Remove the background"))
        .await;

    assert_eq!(result.status, ProcessStatus::Success);
    assert_eq!(result.model_used.as_deref(), Some("nano-banana"));
    // Only the surviving model generated anything.
    let jobs = pipeline.imaging.seen.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].spec.name, "nano-banana");
}

#[tokio::test]
async fn concurrent_deliveries_coalesce_through_the_lock() {
    use std::sync::Arc;

    let lock = TaskLock::new(64);
    let barrier = Arc::new(tokio::sync::Barrier::new(2));

    let attempt = |lock: TaskLock, barrier: Arc<tokio::sync::Barrier>| {
        tokio::spawn(async move {
            let outcome = lock.acquire("task-8");
            let won = outcome.is_ok();
            // Hold the guard (inside `outcome`) until both deliveries have
            // made their attempt.
            barrier.wait().await;
            drop(outcome);
            won
        })
    };

    let (first, second) = tokio::join!(
        attempt(lock.clone(), barrier.clone()),
        attempt(lock.clone(), barrier),
    );
    let winners = [first.unwrap(), second.unwrap()]
        .iter()
        .filter(|won| **won)
        .count();
    assert_eq!(winners, 1);

    // Once the active run released the lock, the task can be claimed again.
    assert!(lock.acquire("task-8").is_ok());
}
