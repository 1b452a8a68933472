//! End-to-end tests of the service, worker pool and task pipeline.

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::clients::{ArtifactStore, MemoryArtifactStore, MockEnrichmentClient};
    use crate::config::EngineConfig;
    use crate::core::{ArtifactContent, StepKind, TaskId, TaskRequest, TaskState, TaskStatus};
    use crate::errors::DigestError;
    use crate::events::{CollectingEventSink, TaskEventKind};
    use crate::pipeline::{JitterStrategy, RetryPolicy};
    use crate::service::DigestService;
    use crate::testing::{transcript_of, RecordingEnrichmentClient, ScriptedSourceClient};

    const POLL: Duration = Duration::from_millis(5);

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::source()
            .with_pacing(0, 0)
            .with_base_delay_ms(1)
            .with_max_delay_ms(5)
            .with_jitter(JitterStrategy::None)
            .with_attempt_timeout_ms(5_000)
    }

    fn engine(workers: usize) -> EngineConfig {
        EngineConfig::default()
            .with_workers(workers)
            .with_cooldown_ms(0)
            .with_source_retry(fast_policy())
            .with_enrichment_retry(fast_policy())
    }

    struct Harness {
        service: DigestService,
        source: Arc<ScriptedSourceClient>,
        enrichment: Arc<RecordingEnrichmentClient>,
        store: Arc<MemoryArtifactStore>,
        sink: Arc<CollectingEventSink>,
    }

    fn harness(
        workers: usize,
        source: ScriptedSourceClient,
        enrichment: RecordingEnrichmentClient,
    ) -> Harness {
        harness_with_store(workers, source, enrichment, Arc::new(MemoryArtifactStore::new()))
    }

    fn harness_with_store(
        workers: usize,
        source: ScriptedSourceClient,
        enrichment: RecordingEnrichmentClient,
        store: Arc<MemoryArtifactStore>,
    ) -> Harness {
        let source = Arc::new(source);
        let enrichment = Arc::new(enrichment);
        let sink = Arc::new(CollectingEventSink::new());
        let service = DigestService::builder()
            .config(engine(workers))
            .source(source.clone())
            .enrichment(enrichment.clone())
            .store(store.clone())
            .event_sink(sink.clone())
            .build()
            .unwrap();
        Harness {
            service,
            source,
            enrichment,
            store,
            sink,
        }
    }

    fn request(resource: &str) -> TaskRequest {
        TaskRequest::new(resource, "out", "default")
    }

    async fn wait(service: &DigestService, id: TaskId) -> TaskStatus {
        tokio::time::timeout(Duration::from_secs(10), service.wait_for(id, POLL))
            .await
            .expect("task did not finish in time")
            .unwrap()
    }

    async fn wait_for_state(service: &DigestService, id: TaskId, state: TaskState) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while service.get(id).unwrap().state != state {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("state never reached");
    }

    fn artifact(dir: &str, stem: &str, step: StepKind) -> PathBuf {
        step.artifact_path(Path::new(dir), stem)
    }

    #[tokio::test]
    async fn test_single_part_task_completes_with_four_artifacts() {
        let h = harness(
            2,
            ScriptedSourceClient::new().with_resource("BV1", "Sorting", &["P1"]),
            RecordingEnrichmentClient::new(),
        );

        let id = h.service.submit(request("BV1")).unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(status.title.as_deref(), Some("Sorting"));
        assert_eq!(status.output_dir, Some(PathBuf::from("out/Sorting")));
        assert_eq!(status.results.units.len(), 1);
        assert_eq!(status.results.units[0].transcript, PathBuf::from("out/Sorting/Sorting.srt"));
        assert_eq!(status.results.paths().len(), 4);
        assert_eq!(status.results.produced_count(), 4);
        assert!(status.started_at.is_some());
        assert!(status.completed_at.is_some());

        assert!(h.store.exists(Path::new("out/Sorting/Sorting.srt")).await.unwrap());
        assert!(h
            .store
            .exists(&artifact("out/Sorting", "Sorting", StepKind::FullDocument))
            .await
            .unwrap());

        let steps: Vec<StepKind> = h.enrichment.calls().iter().map(|c| c.step).collect();
        assert_eq!(steps, StepKind::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_watch_reports_each_change_until_terminal() {
        let h = harness(
            1,
            ScriptedSourceClient::new().with_resource("BV1", "Sorting", &["P1"]),
            RecordingEnrichmentClient::new(),
        );

        let id = h.service.submit(request("BV1")).unwrap();
        let mut seen: Vec<(TaskState, String)> = Vec::new();
        let statuses = tokio::time::timeout(
            Duration::from_secs(10),
            h.service.watch(&[id], POLL, |s| seen.push((s.state, s.message.clone()))),
        )
        .await
        .expect("watch did not finish in time")
        .unwrap();

        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, TaskState::Completed);
        assert_eq!(seen.last().map(|(state, _)| *state), Some(TaskState::Completed));
        for pair in seen.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[tokio::test]
    async fn test_task_is_pending_right_after_submit() {
        let h = harness(
            1,
            ScriptedSourceClient::new()
                .with_resource("BV1", "Slow", &["P1"])
                .with_metadata_delay(Duration::from_millis(100)),
            RecordingEnrichmentClient::new(),
        );

        let first = h.service.submit(request("BV1")).unwrap();
        let second = h.service.submit(request("BV1")).unwrap();

        // One worker: the second task cannot have started yet.
        assert_eq!(h.service.get(second).unwrap().state, TaskState::Pending);
        assert_eq!(h.service.list().len(), 2);

        wait(&h.service, first).await;
        wait(&h.service, second).await;
    }

    #[tokio::test]
    async fn test_state_sequence_is_recorded_as_events() {
        let h = harness(
            1,
            ScriptedSourceClient::new().with_resource("BV1", "Course", &["P1"]),
            RecordingEnrichmentClient::new(),
        );

        let id = h.service.submit(request("BV1")).unwrap();
        wait(&h.service, id).await;

        assert_eq!(
            h.sink.states_of(id),
            vec![
                TaskState::Pending,
                TaskState::Downloading,
                TaskState::Summarizing,
                TaskState::Completed
            ]
        );
        assert_eq!(h.sink.events_of_kind(TaskEventKind::Artifact).len(), 4);
        assert_eq!(h.sink.events_of_kind(TaskEventKind::Submitted).len(), 1);
    }

    #[tokio::test]
    async fn test_resource_without_subtitles_fails_with_no_content() {
        let h = harness(
            1,
            ScriptedSourceClient::new().with_transcripts("BV1", "Silent", &["P1", "P2"], vec![None, None]),
            RecordingEnrichmentClient::new(),
        );

        let id = h
            .service
            .submit(request("BV1").with_all_parts(true))
            .unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.state, TaskState::Failed);
        assert!(status.error.unwrap().contains("no content"));
        assert!(status.results.is_empty());
        assert_eq!(h.enrichment.call_count(), 0);
    }

    #[tokio::test]
    async fn test_parts_without_subtitles_are_skipped() {
        let h = harness(
            1,
            ScriptedSourceClient::new().with_transcripts(
                "BV1",
                "Course",
                &["intro", "silent"],
                vec![Some(transcript_of(&["hello"])), None],
            ),
            RecordingEnrichmentClient::new(),
        );

        let id = h
            .service
            .submit(request("BV1").with_all_parts(true))
            .unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(status.results.units.len(), 1);
        assert_eq!(status.results.units[0].unit, "Course_intro");
    }

    #[tokio::test]
    async fn test_multi_part_names_and_folder_override() {
        let h = harness(
            1,
            ScriptedSourceClient::new().with_resource("BV1", "Course", &["intro", "basics"]),
            RecordingEnrichmentClient::new(),
        );

        let id = h
            .service
            .submit(request("BV1").with_all_parts(true).with_folder_name("algo"))
            .unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(status.output_dir, Some(PathBuf::from("out/algo")));
        let units: Vec<&str> = status.results.units.iter().map(|u| u.unit.as_str()).collect();
        assert_eq!(units, vec!["Course_intro", "Course_basics"]);
        assert!(h
            .store
            .exists(&artifact("out/algo", "Course_basics", StepKind::Questions))
            .await
            .unwrap());
        assert_eq!(h.enrichment.call_count(), 8);
    }

    #[tokio::test]
    async fn test_parts_with_colliding_titles_keep_separate_artifacts() {
        let h = harness(
            1,
            ScriptedSourceClient::new().with_resource("BV1", "Course", &["a/b", "a:b"]),
            RecordingEnrichmentClient::new(),
        );

        let id = h
            .service
            .submit(request("BV1").with_all_parts(true))
            .unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.state, TaskState::Completed);
        let units: Vec<(&str, usize)> = status
            .results
            .units
            .iter()
            .map(|u| (u.unit.as_str(), u.artifacts.len()))
            .collect();
        assert_eq!(units, vec![("Course_a_b", 4), ("Course_a_b_P2", 4)]);
        assert_eq!(h.enrichment.call_count(), 8);
        assert_eq!(h.source.asset_calls(), 2);
        assert!(h.store.exists(Path::new("out/Course/Course_a_b_P2.srt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_only_first_part_by_default() {
        let h = harness(
            1,
            ScriptedSourceClient::new().with_resource("BV1", "Course", &["intro", "basics"]),
            RecordingEnrichmentClient::new(),
        );

        let id = h.service.submit(request("BV1")).unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.results.units.len(), 1);
        assert_eq!(status.results.units[0].unit, "Course_intro");
        assert_eq!(h.source.asset_calls(), 1);
    }

    #[tokio::test]
    async fn test_resume_skips_existing_artifacts() {
        let store = Arc::new(MemoryArtifactStore::new());
        store
            .write(&artifact("out/Course", "Course", StepKind::KeyPoints), "{}")
            .await
            .unwrap();

        let h = harness_with_store(
            1,
            ScriptedSourceClient::new().with_resource("BV1", "Course", &["P1"]),
            RecordingEnrichmentClient::new(),
            store,
        );

        let id = h.service.submit(request("BV1")).unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(h.enrichment.call_count(), 3);
        assert!(h
            .enrichment
            .calls()
            .iter()
            .all(|c| c.step != StepKind::KeyPoints));

        let reused: Vec<bool> = status.results.units[0]
            .artifacts
            .iter()
            .map(|a| a.reused)
            .collect();
        assert_eq!(reused, vec![true, false, false, false]);
        assert_eq!(status.results.produced_count(), 3);
    }

    #[tokio::test]
    async fn test_rerun_reuses_everything() {
        let h = harness(
            1,
            ScriptedSourceClient::new().with_resource("BV1", "Course", &["P1"]),
            RecordingEnrichmentClient::new(),
        );

        let first = h.service.submit(request("BV1")).unwrap();
        wait(&h.service, first).await;
        assert_eq!(h.enrichment.call_count(), 4);
        assert_eq!(h.source.asset_calls(), 1);

        let second = h.service.submit(request("BV1")).unwrap();
        let status = wait(&h.service, second).await;

        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(h.enrichment.call_count(), 4);
        assert_eq!(h.source.asset_calls(), 1, "persisted transcript is reused");
        assert_eq!(status.results.produced_count(), 0);
        assert_eq!(status.results.paths().len(), 4);
    }

    #[tokio::test]
    async fn test_unusable_transcript_is_fetched_again() {
        let store = Arc::new(MemoryArtifactStore::new());
        store
            .write(Path::new("out/Course/Course.srt"), "not an srt file")
            .await
            .unwrap();

        let h = harness_with_store(
            1,
            ScriptedSourceClient::new().with_resource("BV1", "Course", &["P1"]),
            RecordingEnrichmentClient::new(),
            store,
        );

        let id = h.service.submit(request("BV1")).unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(h.source.asset_calls(), 1);
        let srt = h.store.read(Path::new("out/Course/Course.srt")).await.unwrap();
        assert!(srt.contains("-->"));
    }

    #[tokio::test]
    async fn test_stop_while_downloading() {
        let h = harness(
            1,
            ScriptedSourceClient::new()
                .with_resource("BV1", "Course", &["P1"])
                .with_metadata_delay(Duration::from_millis(200)),
            RecordingEnrichmentClient::new(),
        );

        let id = h.service.submit(request("BV1")).unwrap();
        wait_for_state(&h.service, id, TaskState::Downloading).await;

        let stopping = h.service.request_stop(id).unwrap();
        assert_eq!(stopping.state, TaskState::Stopping);
        assert!(stopping.stop_requested);

        let status = wait(&h.service, id).await;
        assert_eq!(status.state, TaskState::Stopped);
        assert!(status.stop_requested);
        assert!(status.results.is_empty());
        assert_eq!(h.enrichment.call_count(), 0);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_stop_while_summarizing_keeps_finished_artifacts() {
        let h = harness(
            1,
            ScriptedSourceClient::new().with_resource("BV1", "Course", &["a", "b", "c"]),
            RecordingEnrichmentClient::new().with_delay(Duration::from_millis(30)),
        );

        let id = h
            .service
            .submit(request("BV1").with_all_parts(true))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(10), async {
            while h.service.get(id).unwrap().results.is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        h.service.request_stop(id).unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.state, TaskState::Stopped);
        let recorded = status.results.paths().len();
        assert!(recorded >= 1 && recorded < 12, "recorded {recorded} artifacts");
        // Everything recorded was persisted.
        for path in status.results.paths() {
            assert!(h.store.exists(path).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_stop_on_pending_task_never_runs_it() {
        let h = harness(
            1,
            ScriptedSourceClient::new()
                .with_resource("BV1", "Course", &["P1"])
                .with_metadata_delay(Duration::from_millis(50)),
            RecordingEnrichmentClient::new(),
        );

        let first = h.service.submit(request("BV1")).unwrap();
        let second = h.service.submit(request("BV1")).unwrap();
        h.service.request_stop(second).unwrap();

        assert_eq!(wait(&h.service, first).await.state, TaskState::Completed);
        assert_eq!(wait(&h.service, second).await.state, TaskState::Stopped);
        assert_eq!(h.source.metadata_calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_on_terminal_task_is_rejected() {
        let h = harness(
            1,
            ScriptedSourceClient::new().with_resource("BV1", "Course", &["P1"]),
            RecordingEnrichmentClient::new(),
        );

        let id = h.service.submit(request("BV1")).unwrap();
        wait(&h.service, id).await;

        let err = h.service.request_stop(id).unwrap_err();
        assert!(matches!(err, DigestError::InvalidTransition { .. }));
        assert_eq!(h.service.get(id).unwrap().state, TaskState::Completed);
        assert!(!h.service.get(id).unwrap().stop_requested);
    }

    #[tokio::test]
    async fn test_unknown_task_id() {
        let h = harness(1, ScriptedSourceClient::new(), RecordingEnrichmentClient::new());
        let id = TaskId::new();
        assert!(matches!(h.service.get(id), Err(DigestError::TaskNotFound(_))));
        assert!(matches!(
            h.service.request_stop(id),
            Err(DigestError::TaskNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_two_tasks_active() {
        let mut source = ScriptedSourceClient::new();
        let resources: Vec<String> = (0..10).map(|i| format!("BV{i}")).collect();
        for resource in &resources {
            source = source.with_resource(resource, &format!("Video {resource}"), &["P1"]);
        }
        let h = harness(
            2,
            source,
            RecordingEnrichmentClient::new().with_delay(Duration::from_millis(5)),
        );

        let ids = h
            .service
            .submit_batch(resources.iter().map(|r| request(r)))
            .unwrap();

        let mut max_active = 0;
        tokio::time::timeout(Duration::from_secs(20), async {
            loop {
                let statuses = h.service.list();
                let active = statuses.iter().filter(|s| s.state.is_active()).count();
                max_active = max_active.max(active);
                if statuses.iter().all(TaskStatus::is_terminal) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        assert!(max_active <= 2, "saw {max_active} active tasks");
        assert!(h.enrichment.max_in_flight() <= 2);
        for status in h.service.wait_all(&ids, POLL).await.unwrap() {
            assert_eq!(status.state, TaskState::Completed);
        }
        assert_eq!(h.enrichment.call_count(), 40);
    }

    #[tokio::test]
    async fn test_panic_fails_task_but_not_worker() {
        let h = harness(
            1,
            ScriptedSourceClient::new()
                .with_resource("BV1", "Boom", &["P1"])
                .with_resource("BV2", "Fine", &["P1"]),
            RecordingEnrichmentClient::new().panicking_on("Boom"),
        );

        let boom = h.service.submit(request("BV1")).unwrap();
        let fine = h.service.submit(request("BV2")).unwrap();

        let crashed = wait(&h.service, boom).await;
        assert_eq!(crashed.state, TaskState::Failed);
        assert!(crashed.error.unwrap().contains("task crashed"));

        assert_eq!(wait(&h.service, fine).await.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_transient_source_errors_are_retried() {
        let h = harness(
            1,
            ScriptedSourceClient::new()
                .with_resource("BV1", "Course", &["P1"])
                .with_transient_failures(2),
            RecordingEnrichmentClient::new(),
        );

        let id = h.service.submit(request("BV1")).unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(h.source.metadata_calls(), 3);
        assert_eq!(h.service.source_caller().stats().retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_task() {
        let h = harness(
            1,
            ScriptedSourceClient::new()
                .with_resource("BV1", "Course", &["P1"])
                .with_transient_failures(10),
            RecordingEnrichmentClient::new(),
        );

        let id = h.service.submit(request("BV1")).unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.state, TaskState::Failed);
        assert!(status.error.unwrap().contains("failed after 3 attempts"));
        assert_eq!(h.source.metadata_calls(), 3);
    }

    #[tokio::test]
    async fn test_missing_resource_fails_without_retry() {
        let h = harness(1, ScriptedSourceClient::new(), RecordingEnrichmentClient::new());

        let id = h.service.submit(request("BV404")).unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.state, TaskState::Failed);
        assert!(status.message.starts_with("Failed:"));
        assert_eq!(h.source.metadata_calls(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_keeps_earlier_artifacts() {
        let h = harness(
            1,
            ScriptedSourceClient::new().with_resource("BV1", "Course", &["P1"]),
            RecordingEnrichmentClient::new().failing_on(StepKind::Exercises),
        );

        let id = h.service.submit(request("BV1")).unwrap();
        let status = wait(&h.service, id).await;

        assert_eq!(status.state, TaskState::Failed);
        assert!(status.error.unwrap().contains("exercises"));
        let steps: Vec<StepKind> = status.results.units[0]
            .artifacts
            .iter()
            .map(|a| a.step)
            .collect();
        assert_eq!(steps, vec![StepKind::KeyPoints, StepKind::FullDocument]);
    }

    #[tokio::test]
    async fn test_mocked_enrichment_called_once_per_step() {
        let mut enrichment = MockEnrichmentClient::new();
        enrichment.expect_generate().times(4).returning(|step, _, context| {
            assert_eq!(context.profile, "default");
            Ok(match step {
                StepKind::FullDocument => ArtifactContent::Markdown("# doc".into()),
                _ => ArtifactContent::Json(json!({ "step": step.to_string() })),
            })
        });

        let store = Arc::new(MemoryArtifactStore::new());
        let service = DigestService::builder()
            .config(engine(1))
            .source(Arc::new(
                ScriptedSourceClient::new().with_resource("BV1", "Course", &["P1"]),
            ))
            .enrichment(Arc::new(enrichment))
            .store(store.clone())
            .build()
            .unwrap();

        let id = service.submit(request("BV1")).unwrap();
        assert_eq!(wait(&service, id).await.state, TaskState::Completed);

        let summary = store
            .read(&artifact("out/Course", "Course", StepKind::KeyPoints))
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&summary).unwrap();
        assert_eq!(value["step"], "key_points");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_and_rejects_new_work() {
        let h = harness(
            1,
            ScriptedSourceClient::new().with_resource("BV1", "Course", &["P1"]),
            RecordingEnrichmentClient::new(),
        );

        let ids = h
            .service
            .submit_batch((0..3).map(|_| request("BV1")))
            .unwrap();
        assert!(h.service.is_running());

        h.service.shutdown().await;

        assert!(!h.service.is_running());
        for id in ids {
            assert!(h.service.get(id).unwrap().is_terminal());
        }
        assert!(matches!(
            h.service.submit(request("BV1")),
            Err(DigestError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_stop_all() {
        let h = harness(
            1,
            ScriptedSourceClient::new()
                .with_resource("BV1", "Course", &["P1"])
                .with_metadata_delay(Duration::from_millis(100)),
            RecordingEnrichmentClient::new(),
        );

        let ids = h
            .service
            .submit_batch((0..3).map(|_| request("BV1")))
            .unwrap();
        assert_eq!(h.service.stop_all(), 3);

        for status in h.service.wait_all(&ids, POLL).await.unwrap() {
            assert_eq!(status.state, TaskState::Stopped);
        }
        assert_eq!(h.service.stop_all(), 0);
    }

    #[test]
    fn test_build_requires_clients() {
        let err = DigestService::builder().build().unwrap_err();
        assert!(matches!(err, DigestError::Config(_)));
    }

    #[test]
    fn test_submit_outside_runtime_is_rejected() {
        let service = DigestService::builder()
            .source(Arc::new(ScriptedSourceClient::new()))
            .enrichment(Arc::new(RecordingEnrichmentClient::new()))
            .store(Arc::new(MemoryArtifactStore::new()))
            .build()
            .unwrap();
        assert!(matches!(
            service.submit(request("BV1")),
            Err(DigestError::Config(_))
        ));
        assert!(service.list().is_empty());
    }
}
