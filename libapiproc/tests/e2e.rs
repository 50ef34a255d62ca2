//! E2E tests for Supervisor and in-process workers
use std::path::Path;

use apiproc::testrun::CONFIG_FILE;
use apiproc::{
    pipeline::ToolConfig, ApiFormat, CommandProcessor, JobRequest, JobResult, Supervisor,
    SupervisorConfig, TaskLauncher, TestRunOutcome, TestRunRequest,
};
use assert_matches::assert_matches;
use tracing_test::traced_test;

const TOOL: &str = r#"
input=$(cat)
case "$1" in
  init) echo '{"ok": null}' ;;
  parse)
    case "$input" in
      *broken*) echo '{"error": {"message": "Parse failed", "detail": "bad syntax"}}' ;;
      *) echo '{"ok": {"parsed": true}}' ;;
    esac ;;
  resolve) echo '{"ok": {"resolved": true}}' ;;
  generate) echo '{"ok": "{\"@graph\": []}"}' ;;
esac
"#;

fn supervisor() -> Supervisor {
    let launcher = TaskLauncher::new(|req: &JobRequest| {
        CommandProcessor::locate(&req.working_dir, &ToolConfig::new("sh").arg("tool.sh"))
    });
    Supervisor::start(launcher, SupervisorConfig::default())
}

fn tool_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("tool.sh"), TOOL).unwrap();
    dir
}

fn parse_job(dir: &Path, source: &str) -> JobRequest {
    JobRequest::new(dir, source, ApiFormat::Raml10)
}

#[tokio::test]
#[traced_test]
async fn parse_job_through_tool() {
    let dir = tool_dir();
    let sv = supervisor();

    let res = sv
        .submit_parse(parse_job(dir.path(), "/tmp/api.raml"))
        .await
        .expect("job should resolve");

    assert_eq!(
        res,
        JobResult::Success {
            api: r#"{"@graph": []}"#.to_string(),
            source: "file:///tmp/api.raml".to_string(),
        }
    );
}

#[tokio::test]
async fn parse_failure_through_tool() {
    let dir = tool_dir();
    let sv = supervisor();

    let res = sv
        .submit_parse(parse_job(dir.path(), "/tmp/broken.raml"))
        .await
        .expect("job should resolve");

    assert_matches!(res, JobResult::Failure { error } if error.ends_with("bad syntax"));
}

#[tokio::test]
async fn concurrent_jobs_resolve_independently() {
    let dir = tool_dir();
    let sv = supervisor();

    let sources = ["/a.raml", "/broken.raml", "/c.raml", "/d.raml", "/e.raml", "/f.raml"];
    let handles: Vec<_> = sources
        .iter()
        .map(|source| {
            let sv = sv.clone();
            let req = parse_job(dir.path(), source);
            tokio::spawn(async move { sv.submit_parse(req).await })
        })
        .collect();

    let mut results = vec![];
    for handle in handles {
        results.push(handle.await.unwrap().expect("every job resolves"));
    }

    assert_eq!(results.iter().filter(|r| r.is_success()).count(), 5);
    assert_matches!(&results[1], JobResult::Failure { .. });
    assert_matches!(&results[0], JobResult::Success { source, .. } if source == "file:///a.raml");
}

#[tokio::test]
async fn test_run_job() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE),
        "command = \"sh\"\nargs = [\"-c\", \"exit 1\"]\n",
    )
    .unwrap();
    let sv = supervisor();

    let report = sv
        .submit_test_run(TestRunRequest {
            working_dir: dir.path().to_path_buf(),
        })
        .await
        .expect("job should resolve");

    assert_eq!(report.outcome, TestRunOutcome::Exited(1));
    assert_eq!(report.logs.len(), 4);
    assert_eq!(report.logs[0], "Config loaded");
}

#[tokio::test]
async fn test_run_without_config() {
    let dir = tempfile::tempdir().unwrap();
    let sv = supervisor();

    let report = sv
        .submit_test_run(TestRunRequest {
            working_dir: dir.path().to_path_buf(),
        })
        .await
        .expect("job should resolve");

    assert!(report.logs.is_empty());
    assert_matches!(report.outcome, TestRunOutcome::Failed(message) if message.contains(CONFIG_FILE));
}
