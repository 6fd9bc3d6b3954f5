use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use stratum_core::report::{self, ValidationReport};
use stratum_core::store::{DirectoryStore, JsonFileSink, ModuleStore, ReportSink};
use stratum_suggest::{
    DispatchConfig, Dispatcher, RetryPolicy, ScriptedCompletion, SegmentTokenizer, Summarizer,
    ValidationError, Validator,
};
use tempfile::TempDir;

const DECOMPOSITION: &str = r#"Here are the modules:
[
  {"module_name": "UserController", "responsibilities": ["Serve /signup", "Serve /login"],
   "key_apis": ["POST /signup"], "data_inputs": ["form"], "data_outputs": ["json"],
   "depends_on": ["UserService"], "target_path": "src/controllers/"},
  {"module_name": "UserService", "responsibilities": ["Register users", "Check passwords"],
   "key_apis": ["register(user)"], "data_inputs": ["user"], "data_outputs": ["user"],
   "depends_on": ["UserRepository"], "target_path": "src/services/"},
  {"module_name": "UserRepository", "responsibilities": ["Store users", "Find by email"],
   "key_apis": ["save(user)"], "data_inputs": ["user"], "data_outputs": ["row"],
   "depends_on": ["UserController"], "target_path": "src/repositories/"}
]"#;

const REVIEW: &str = r#"{"functional_coverage": {"conclusion": "✅", "explanation": "signup covered"},
  "missing_or_redundant_modules": {"missing": [], "redundant": []},
  "overlapping_responsibilities": [],
  "undefined_dependencies": []}"#;

fn dispatcher(service: Arc<ScriptedCompletion>, max_input_tokens: usize, max_chunks: usize) -> Dispatcher {
    Dispatcher::new(
        Some(service),
        Arc::new(SegmentTokenizer::new()),
        DispatchConfig {
            max_input_tokens,
            max_chunks,
            chars_per_token: 4,
            continuation_steps: 1,
            mock: false,
        },
    )
}

fn no_wait() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        delay: Duration::ZERO,
    }
}

#[tokio::test]
async fn decompose_store_and_validate() {
    let dir = TempDir::new().unwrap();
    let store = DirectoryStore::new(dir.path().join("modules"));
    let sink = JsonFileSink::new(dir.path().join("validation.json"));

    let service = Arc::new(ScriptedCompletion::new().reply(DECOMPOSITION).reply(REVIEW));
    let dispatcher = dispatcher(service.clone(), 100_000, 10);

    let modules = Summarizer::new(&dispatcher)
        .decompose("Users sign up and log in.")
        .await
        .unwrap();
    assert_eq!(modules.len(), 3);
    store.save(&modules).unwrap();

    let outcome = Validator::new(&dispatcher, &store)
        .with_sink(&sink)
        .with_retry(no_wait())
        .validate("Users sign up and log in.", None)
        .await
        .unwrap();

    let report = &outcome.report;
    assert_eq!(report.structure_scan.keys().collect::<Vec<_>>(), vec!["UserRepository"]);
    assert_eq!(report.boundary_analysis.cycles.len(), 1);
    assert!(report
        .boundary_analysis
        .merge_suggestions
        .iter()
        .any(|m| m.reason.starts_with("circular dependency")));
    assert_eq!(report.ai_review["functional_coverage"]["conclusion"], "✅");
    assert_eq!(outcome.issues.total_issues, 1);

    let written: Option<ValidationReport> = sink.read_previous();
    assert_eq!(written.as_ref(), Some(report));
    assert_eq!(service.remaining(), 0);
}

#[tokio::test]
async fn chunked_review_waits_for_the_final_part() {
    let dir = TempDir::new().unwrap();
    let store = DirectoryStore::new(dir.path());
    let modules = Summarizer::new(&dispatcher(
        Arc::new(ScriptedCompletion::new().reply(DECOMPOSITION)),
        100_000,
        10,
    ))
    .decompose("Users sign up.")
    .await
    .unwrap();
    store.save(&modules).unwrap();

    let service = Arc::new(
        ScriptedCompletion::new()
            .reply("Understood, waiting for the remaining parts.")
            .reply(REVIEW),
    );
    let dispatcher = dispatcher(service.clone(), 60, 2);
    let outcome = Validator::new(&dispatcher, &store)
        .with_retry(no_wait())
        .validate("Users sign up.", None)
        .await
        .unwrap();

    let requests = service.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0][0].content.contains("arrives in 2 parts"));
    assert!(requests[1][0].content.contains("This is the final part"));
    assert!(report::review_is_usable(&outcome.report.ai_review));
}

#[tokio::test]
async fn failing_service_still_yields_a_report() {
    let dir = TempDir::new().unwrap();
    let store = DirectoryStore::new(dir.path());
    let modules = Summarizer::new(&dispatcher(
        Arc::new(ScriptedCompletion::new().reply(DECOMPOSITION)),
        100_000,
        10,
    ))
    .decompose("Users sign up.")
    .await
    .unwrap();
    store.save(&modules).unwrap();

    let service = Arc::new(ScriptedCompletion::new().fail("503").fail("503").fail("503"));
    let dispatcher = dispatcher(service.clone(), 100_000, 10);
    let outcome = Validator::new(&dispatcher, &store)
        .with_retry(no_wait())
        .validate("Users sign up.", None)
        .await
        .unwrap();

    assert_eq!(service.requests().len(), 3);
    assert_eq!(outcome.report.ai_review, report::review_failed());
    assert_eq!(outcome.report.structure_scan.len(), 1);
}

#[tokio::test]
async fn all_chunks_failing_decomposes_to_nothing() {
    let service = Arc::new(ScriptedCompletion::new().fail("down").fail("down").fail("down"));
    let dispatcher = dispatcher(service.clone(), 3, 10);

    let modules = Summarizer::new(&dispatcher).decompose("a b c d e").await.unwrap();
    assert!(modules.is_empty());
    assert_eq!(service.requests().len(), 3);
}

#[tokio::test]
async fn empty_store_cannot_be_validated() {
    let dir = TempDir::new().unwrap();
    let store = DirectoryStore::new(dir.path());
    let dispatcher = dispatcher(Arc::new(ScriptedCompletion::new()), 100_000, 10);

    let err = Validator::new(&dispatcher, &store)
        .validate("anything", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::NoModules));
}
