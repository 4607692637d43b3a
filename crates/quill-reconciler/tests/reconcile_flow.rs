//! End-to-end reconciliation runs against an in-memory remote surface and a
//! stubbed oracle, exercising matching, commit, resume, and cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quill_github::models::{
    CreatedIssue, IssueState, ProjectIds, ProjectItem, ProjectItemPage, ProjectLocator,
    RemoteIssue, RepoRef, StatusOption, UserIssuePage,
};
use quill_oracle::{DecompositionOracle, DecompositionResult, Effort, OracleError, ProposedItem};
use quill_reconciler::{
    FailureReason, ItemOutcome, MutationLog, ReconcileOutcome, Reconciler, ReconcilerConfig,
    SurfaceError, TaskRequest, WorkSurface,
};
use tempfile::tempdir;
use tokio::sync::watch;

const REPO_SLUG: &str = "acme/widgets";

#[derive(Default)]
struct FakeState {
    project_items: Vec<ProjectItem>,
    user_issues: Vec<RemoteIssue>,
    created: Vec<RemoteIssue>,
    next_number: u64,
    create_calls: usize,
    add_calls: usize,
    status_calls: usize,
    assignee_calls: usize,
    /// Fail the Nth add-to-project call with a transient error, once.
    fail_add_on_call: Option<usize>,
}

#[derive(Default)]
struct FakeSurface {
    state: Mutex<FakeState>,
}

impl FakeSurface {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                next_number: 1,
                ..FakeState::default()
            }),
        })
    }

    fn seed_project_issue(&self, title: &str, body: &str, state: IssueState, status: Option<&str>) {
        let mut guard = self.state.lock().expect("fake state");
        let number = guard.next_number;
        guard.next_number += 1;
        guard.project_items.push(ProjectItem {
            item_id: format!("PVTI_seed_{number}"),
            issue: Some(RemoteIssue {
                id: format!("I_seed_{number}"),
                number,
                title: title.to_string(),
                body: body.to_string(),
                url: format!("https://github.test/{REPO_SLUG}/issues/{number}"),
                state,
                assignees: Vec::new(),
                repo_slug: REPO_SLUG.to_string(),
            }),
            status_name: status.map(str::to_string),
        });
    }

    fn seed_user_issue(&self, title: &str, assignees: &[&str], slug: &str) {
        let mut guard = self.state.lock().expect("fake state");
        let number = guard.next_number;
        guard.next_number += 1;
        guard.user_issues.push(RemoteIssue {
            id: format!("I_user_{number}"),
            number,
            title: title.to_string(),
            body: String::new(),
            url: format!("https://github.test/{slug}/issues/{number}"),
            state: IssueState::Open,
            assignees: assignees.iter().map(|a| a.to_string()).collect(),
            repo_slug: slug.to_string(),
        });
    }

    fn fail_add_on_call(&self, call: usize) {
        self.state.lock().expect("fake state").fail_add_on_call = Some(call);
    }

    fn create_calls(&self) -> usize {
        self.state.lock().expect("fake state").create_calls
    }

    fn status_calls(&self) -> usize {
        self.state.lock().expect("fake state").status_calls
    }

    fn created_issue_bodies(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("fake state")
            .created
            .iter()
            .map(|issue| issue.body.clone())
            .collect()
    }
}

#[async_trait]
impl WorkSurface for FakeSurface {
    async fn resolve_ids(&self, _target: &ProjectLocator) -> Result<ProjectIds, SurfaceError> {
        Ok(ProjectIds {
            repository_id: "R_1".to_string(),
            project_id: "PVT_1".to_string(),
            status_field_id: Some("F_STATUS".to_string()),
            status_options: vec![
                StatusOption {
                    id: "OPT_TODO".to_string(),
                    name: "Todo".to_string(),
                },
                StatusOption {
                    id: "OPT_DONE".to_string(),
                    name: "Done".to_string(),
                },
            ],
        })
    }

    async fn project_items_page(
        &self,
        _target: &ProjectLocator,
        _after: Option<String>,
    ) -> Result<ProjectItemPage, SurfaceError> {
        let guard = self.state.lock().expect("fake state");
        Ok(ProjectItemPage {
            items: guard.project_items.clone(),
            has_next_page: false,
            end_cursor: None,
        })
    }

    async fn user_issues_page(
        &self,
        _login: &str,
        _after: Option<String>,
    ) -> Result<UserIssuePage, SurfaceError> {
        let guard = self.state.lock().expect("fake state");
        Ok(UserIssuePage {
            issues: guard.user_issues.clone(),
            has_next_page: false,
            end_cursor: None,
        })
    }

    async fn create_issue(
        &self,
        _repository_id: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedIssue, SurfaceError> {
        let mut guard = self.state.lock().expect("fake state");
        guard.create_calls += 1;
        let number = guard.next_number;
        guard.next_number += 1;
        let issue = RemoteIssue {
            id: format!("I_{number}"),
            number,
            title: title.to_string(),
            body: body.to_string(),
            url: format!("https://github.test/{REPO_SLUG}/issues/{number}"),
            state: IssueState::Open,
            assignees: Vec::new(),
            repo_slug: REPO_SLUG.to_string(),
        };
        guard.created.push(issue);
        Ok(CreatedIssue {
            id: format!("I_{number}"),
            number,
            url: format!("https://github.test/{REPO_SLUG}/issues/{number}"),
        })
    }

    async fn add_item_to_project(
        &self,
        _project_id: &str,
        content_id: &str,
    ) -> Result<String, SurfaceError> {
        let mut guard = self.state.lock().expect("fake state");
        guard.add_calls += 1;
        if guard.fail_add_on_call == Some(guard.add_calls) {
            guard.fail_add_on_call = None;
            return Err(SurfaceError::Transient("injected add failure".to_string()));
        }
        // Re-adding the same content returns the existing item, matching the
        // live mutation's behavior.
        if let Some(existing) = guard.project_items.iter().find(|item| {
            item.issue
                .as_ref()
                .is_some_and(|issue| issue.id == content_id)
        }) {
            return Ok(existing.item_id.clone());
        }
        let issue = guard
            .created
            .iter()
            .find(|issue| issue.id == content_id)
            .cloned();
        let item_id = format!("PVTI_{content_id}");
        guard.project_items.push(ProjectItem {
            item_id: item_id.clone(),
            issue,
            status_name: None,
        });
        Ok(item_id)
    }

    async fn set_item_status(
        &self,
        _project_id: &str,
        item_id: &str,
        _field_id: &str,
        _option_id: &str,
    ) -> Result<(), SurfaceError> {
        let mut guard = self.state.lock().expect("fake state");
        guard.status_calls += 1;
        if let Some(item) = guard
            .project_items
            .iter_mut()
            .find(|item| item.item_id == item_id)
        {
            item.status_name = Some("Todo".to_string());
        }
        Ok(())
    }

    async fn resolve_user_id(&self, login: &str) -> Result<String, SurfaceError> {
        Ok(format!("U_{login}"))
    }

    async fn add_assignees(
        &self,
        _issue_id: &str,
        _assignee_ids: &[String],
    ) -> Result<(), SurfaceError> {
        self.state.lock().expect("fake state").assignee_calls += 1;
        Ok(())
    }

    async fn find_issues_by_marker(
        &self,
        _repo_slug: &str,
        marker: &str,
    ) -> Result<Vec<RemoteIssue>, SurfaceError> {
        let guard = self.state.lock().expect("fake state");
        Ok(guard
            .created
            .iter()
            .filter(|issue| issue.body.contains(marker))
            .cloned()
            .collect())
    }
}

enum StubResponse {
    Items(Vec<ProposedItem>),
    Empty,
    Unavailable,
}

struct StubOracle {
    response: StubResponse,
    calls: AtomicUsize,
}

impl StubOracle {
    fn new(response: StubResponse) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecompositionOracle for StubOracle {
    async fn decompose(
        &self,
        _description: &str,
        _repo_context: &str,
        _max_items: usize,
    ) -> Result<DecompositionResult, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            StubResponse::Items(items) => Ok(DecompositionResult {
                items: items.clone(),
            }),
            StubResponse::Empty => Ok(DecompositionResult { items: Vec::new() }),
            StubResponse::Unavailable => {
                Err(OracleError::Unavailable("stub oracle offline".to_string()))
            }
        }
    }
}

fn proposed(title: &str, body: &str) -> ProposedItem {
    ProposedItem {
        title: title.to_string(),
        body: body.to_string(),
        effort: Some(Effort::Medium),
    }
}

fn request(description: &str) -> TaskRequest {
    TaskRequest {
        description: description.to_string(),
        requester: "alice".to_string(),
        assignee_login: None,
        target: ProjectLocator {
            repo: RepoRef::parse(REPO_SLUG).expect("valid slug"),
            project_number: 7,
        },
        repo_context: Some("src/\n  lib.rs\n  limiter.rs".to_string()),
    }
}

fn sequential_config() -> ReconcilerConfig {
    ReconcilerConfig {
        commit_concurrency: 1,
        ..ReconcilerConfig::default()
    }
}

fn reconciler(
    surface: Arc<FakeSurface>,
    oracle: Arc<StubOracle>,
    log: MutationLog,
) -> Reconciler {
    Reconciler::new(surface, oracle, log, sequential_config()).expect("valid config")
}

#[tokio::test]
async fn functional_existing_work_matches_without_mutations() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    surface.seed_project_issue(
        "Add a token bucket rate limiter",
        "Implements the limiter.",
        IssueState::Open,
        Some("In Progress"),
    );
    let oracle = StubOracle::new(StubResponse::Items(vec![proposed("unused", "unused")]));
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let reconciler = reconciler(surface.clone(), oracle.clone(), log);

    let outcome = reconciler
        .reconcile(&request("add a token bucket rate limiter"), None)
        .await;

    let ReconcileOutcome::Matched { item } = outcome else {
        panic!("expected matched, got {outcome:?}");
    };
    assert_eq!(item.title, "Add a token bucket rate limiter");
    assert_eq!(surface.create_calls(), 0);
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn functional_new_request_commits_every_decomposed_item() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    let oracle = StubOracle::new(StubResponse::Items(vec![
        proposed("Add limiter config", "Expose bucket size and refill rate."),
        proposed("Wire limiter into server", "Reject over-limit requests."),
    ]));
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let reconciler = reconciler(surface.clone(), oracle, log);

    let outcome = reconciler
        .reconcile(&request("add rate limiting to the api server"), None)
        .await;

    let ReconcileOutcome::Committed { items } = outcome else {
        panic!("expected committed, got {outcome:?}");
    };
    assert_eq!(items.len(), 2);
    for report in &items {
        let ItemOutcome::Committed { identity } = &report.outcome else {
            panic!("expected committed item, got {:?}", report.outcome);
        };
        assert!(identity.project_item_id.is_some());
    }
    assert_eq!(surface.create_calls(), 2);
    assert_eq!(surface.status_calls(), 2);
    // Every created issue carries its idempotency marker and provenance.
    for body in surface.created_issue_bodies() {
        assert!(body.contains("<!-- quill:task:"));
        assert!(body.contains("Requested by: alice"));
        assert!(body.contains("**Estimated effort:** M"));
    }
}

#[tokio::test]
async fn functional_rerun_after_commit_matches_instead_of_duplicating() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    let oracle = StubOracle::new(StubResponse::Items(vec![proposed(
        "Add limiter config",
        "Expose bucket size.",
    )]));
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let reconciler = reconciler(surface.clone(), oracle.clone(), log);

    let first = reconciler
        .reconcile(&request("add rate limiting to the api server"), None)
        .await;
    assert!(matches!(first, ReconcileOutcome::Committed { .. }));

    let second = reconciler
        .reconcile(&request("add rate limiting to the api server"), None)
        .await;
    let ReconcileOutcome::Matched { item } = second else {
        panic!("expected matched, got {second:?}");
    };
    assert_eq!(item.title, "Add limiter config");
    assert_eq!(surface.create_calls(), 1);
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn regression_marker_scan_matches_when_log_is_lost() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    let oracle = StubOracle::new(StubResponse::Items(vec![proposed(
        "Add limiter config",
        "Expose bucket size.",
    )]));
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let first_run = reconciler(surface.clone(), oracle.clone(), log);
    let first = first_run
        .reconcile(&request("add rate limiting to the api server"), None)
        .await;
    assert!(matches!(first, ReconcileOutcome::Committed { .. }));

    // Fresh log simulates losing the mutation log between runs; the marker
    // embedded in the committed issue body still prevents duplication.
    let fresh_log = MutationLog::open(temp.path().join("wal-2.jsonl")).expect("log");
    let second_run = reconciler(surface.clone(), oracle.clone(), fresh_log);
    let second = second_run
        .reconcile(&request("add rate limiting to the api server"), None)
        .await;
    assert!(matches!(second, ReconcileOutcome::Matched { .. }));
    assert_eq!(surface.create_calls(), 1);
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn regression_resume_completes_partial_commit_without_duplicates() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    let oracle = StubOracle::new(StubResponse::Items(vec![
        proposed("Add limiter config", "a"),
        proposed("Wire limiter into server", "b"),
        proposed("Document the limiter", "c"),
    ]));
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let reconciler = reconciler(surface.clone(), oracle.clone(), log);

    // The second item's add-to-project call fails once.
    surface.fail_add_on_call(2);
    let first = reconciler
        .reconcile(&request("add rate limiting to the api server"), None)
        .await;
    let ReconcileOutcome::Failed { reason, items } = first else {
        panic!("expected failed, got {first:?}");
    };
    assert!(matches!(reason, FailureReason::PartialCommitFailure));
    let failed_number = match &items[1].outcome {
        ItemOutcome::PartialFailure {
            identity: Some(identity),
            ..
        } => identity.issue_number,
        other => panic!("expected partial failure with identity, got {other:?}"),
    };
    assert!(items[0].is_committed());
    assert!(items[2].is_committed());
    assert_eq!(surface.create_calls(), 3);

    // Retry resumes the logged plan: no new issues, no second oracle call,
    // and the stalled item keeps the issue it already created.
    let second = reconciler
        .reconcile(&request("add rate limiting to the api server"), None)
        .await;
    let ReconcileOutcome::Committed { items } = second else {
        panic!("expected committed, got {second:?}");
    };
    assert_eq!(surface.create_calls(), 3);
    assert_eq!(oracle.calls(), 1);
    let ItemOutcome::Committed { identity } = &items[1].outcome else {
        panic!("expected committed item, got {:?}", items[1].outcome);
    };
    assert_eq!(identity.issue_number, failed_number);
}

#[tokio::test]
async fn functional_empty_decomposition_fails_without_mutations() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    let oracle = StubOracle::new(StubResponse::Empty);
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let reconciler = reconciler(surface.clone(), oracle, log);

    let outcome = reconciler.reconcile(&request("do nothing useful"), None).await;

    let ReconcileOutcome::Failed { reason, items } = outcome else {
        panic!("expected failed, got {outcome:?}");
    };
    assert!(matches!(reason, FailureReason::EmptyDecomposition));
    assert!(items.is_empty());
    assert_eq!(surface.create_calls(), 0);
}

#[tokio::test]
async fn functional_oracle_outage_reports_unavailable() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    let oracle = StubOracle::new(StubResponse::Unavailable);
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let reconciler = reconciler(surface.clone(), oracle, log);

    let outcome = reconciler.reconcile(&request("add a feature"), None).await;

    let ReconcileOutcome::Failed { reason, .. } = outcome else {
        panic!("expected failed, got {outcome:?}");
    };
    assert!(matches!(reason, FailureReason::OracleUnavailable { .. }));
    assert_eq!(surface.create_calls(), 0);
}

#[tokio::test]
async fn functional_closed_duplicate_does_not_block_new_work() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    surface.seed_project_issue(
        "Add a token bucket rate limiter",
        "Old attempt, abandoned.",
        IssueState::Closed,
        None,
    );
    let oracle = StubOracle::new(StubResponse::Items(vec![proposed(
        "Add a token bucket rate limiter",
        "Fresh attempt.",
    )]));
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let reconciler = reconciler(surface.clone(), oracle, log);

    let outcome = reconciler
        .reconcile(&request("add a token bucket rate limiter"), None)
        .await;

    assert!(matches!(outcome, ReconcileOutcome::Committed { .. }));
    assert_eq!(surface.create_calls(), 1);
}

#[tokio::test]
async fn functional_done_duplicate_matches_as_existing_work() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    surface.seed_project_issue(
        "Add a token bucket rate limiter",
        "Shipped.",
        IssueState::Closed,
        Some("Done"),
    );
    let oracle = StubOracle::new(StubResponse::Items(vec![proposed("unused", "unused")]));
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let reconciler = reconciler(surface.clone(), oracle.clone(), log);

    let outcome = reconciler
        .reconcile(&request("add a token bucket rate limiter"), None)
        .await;

    assert!(matches!(outcome, ReconcileOutcome::Matched { .. }));
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn functional_cancelled_run_commits_nothing() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    let oracle = StubOracle::new(StubResponse::Items(vec![proposed("a", "b")]));
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let reconciler = reconciler(surface.clone(), oracle, log);

    let (_tx, rx) = watch::channel(true);
    let outcome = reconciler
        .reconcile(&request("add a feature"), Some(rx))
        .await;

    let ReconcileOutcome::Failed { reason, .. } = outcome else {
        panic!("expected failed, got {outcome:?}");
    };
    assert!(matches!(reason, FailureReason::Cancelled));
    assert_eq!(surface.create_calls(), 0);
}

#[tokio::test]
async fn functional_assignee_is_wired_when_login_resolves() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    let oracle = StubOracle::new(StubResponse::Items(vec![proposed("Add limiter", "a")]));
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let reconciler = reconciler(surface.clone(), oracle, log);

    let mut req = request("add a limiter to the gateway");
    req.assignee_login = Some("bob".to_string());
    let outcome = reconciler.reconcile(&req, None).await;

    assert!(matches!(outcome, ReconcileOutcome::Committed { .. }));
    assert_eq!(surface.state.lock().expect("fake state").assignee_calls, 1);
}

#[tokio::test]
async fn functional_list_open_work_excludes_closed_and_done() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    surface.seed_project_issue("Open item", "", IssueState::Open, Some("In Progress"));
    surface.seed_project_issue("Done item", "", IssueState::Open, Some("Done"));
    surface.seed_project_issue("Closed item", "", IssueState::Closed, None);
    let oracle = StubOracle::new(StubResponse::Empty);
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let reconciler = reconciler(surface, oracle, log);

    let open = reconciler
        .list_open_work(&request("x").target)
        .await
        .expect("list open work");

    assert_eq!(open.len(), 1);
    assert_eq!(open[0].title, "Open item");
}

#[tokio::test]
async fn functional_list_work_for_user_filters_by_assignee() {
    let temp = tempdir().expect("tempdir");
    let surface = FakeSurface::new();
    surface.seed_user_issue("Bob's task", &["bob"], "acme/widgets");
    surface.seed_user_issue("Shared task", &["carol", "bob"], "acme/gadgets");
    surface.seed_user_issue("Carol's task", &["carol"], "acme/widgets");
    let oracle = StubOracle::new(StubResponse::Empty);
    let log = MutationLog::open(temp.path().join("wal.jsonl")).expect("log");
    let reconciler = reconciler(surface, oracle, log);

    let work = reconciler.list_work_for_user("bob").await.expect("list");

    let titles: Vec<&str> = work.iter().map(|item| item.title.as_str()).collect();
    assert_eq!(titles, vec!["Bob's task", "Shared task"]);
}
