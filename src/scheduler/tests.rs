//! Tests for the scheduler facade

use super::*;
use crate::error::SchedulerError;
use crate::graph::DEFAULT_PARALLEL_LIMIT;
use tempfile::TempDir;

const SCENARIO: &str = r#"
project: Scenario
batches:
  B1: { parallel_limit: 2, issues: [1, 2, 3] }
issues:
  - { id: 1 }
  - { id: 2, depends_on: [1] }
  - { id: 3, conflicts_with: [2] }
"#;

const PHASED: &str = r#"
project: Phased
batches:
  foundation: { name: Foundation, parallel_limit: 1, issues: [10, 11] }
  features: { name: Features, issues: [20, 21], required_batches: [foundation] }
issues:
  - { id: 10, files: [src/db.rs] }
  - { id: 11 }
  - { id: 20, soft_depends_on: [21] }
  - { id: 21, files: [src/db.rs] }
"#;

fn id(s: &str) -> IssueId {
    IssueId::new(s)
}

fn ids(list: &[&str]) -> Vec<IssueId> {
    list.iter().map(|s| id(s)).collect()
}

fn scheduler(yaml: &str) -> (TempDir, Scheduler) {
    let temp_dir = TempDir::new().unwrap();
    let graph = DependencyGraph::from_yaml_str(yaml, DEFAULT_PARALLEL_LIMIT).unwrap();
    let store = ProgressStore::new(temp_dir.path().join("progress.json"));
    (temp_dir, Scheduler::new(graph, store))
}

fn claim_token(scheduler: &Scheduler, issue: &str) -> ClaimToken {
    match scheduler.claim(&id(issue)).unwrap() {
        ClaimOutcome::Claimed { token, .. } => token,
        other => panic!("expected claim of {issue}, got {other:?}"),
    }
}

#[test]
fn test_concrete_scenario() {
    let (_dir, scheduler) = scheduler(SCENARIO);

    // 3 has no dependencies and nothing it conflicts with is running
    assert_eq!(scheduler.get_ready_issues(None).unwrap(), ids(&["1", "3"]));

    let token = claim_token(&scheduler, "1");
    let report = scheduler.mark_complete(&id("1"), &token, None).unwrap();
    assert_eq!(report.newly_ready, ids(&["2"]));
    assert_eq!(scheduler.get_ready_issues(None).unwrap(), ids(&["2", "3"]));

    let token = claim_token(&scheduler, "2");
    assert_eq!(
        scheduler.can_start(&id("3")).unwrap(),
        Readiness::Blocked {
            reasons: vec![BlockReason::Conflict {
                issues: ids(&["2"])
            }]
        }
    );

    let report = scheduler.mark_complete(&id("2"), &token, None).unwrap();
    assert_eq!(report.newly_ready, ids(&["3"]));
    assert!(scheduler.can_start(&id("3")).unwrap().is_ready());
}

#[test]
fn test_missing_deps_reported() {
    let (_dir, scheduler) = scheduler(SCENARIO);

    let readiness = scheduler.can_start(&id("2")).unwrap();
    assert_eq!(
        readiness.reasons(),
        &[BlockReason::MissingDeps {
            issues: ids(&["1"])
        }]
    );
}

#[test]
fn test_started_issue_is_not_startable() {
    let (_dir, scheduler) = scheduler(SCENARIO);
    claim_token(&scheduler, "1");

    let readiness = scheduler.can_start(&id("1")).unwrap();
    assert_eq!(
        readiness.reasons(),
        &[BlockReason::AlreadyStarted {
            status: IssueStatus::InProgress
        }]
    );
}

#[test]
fn test_batch_gating_and_parallel_limit() {
    let (_dir, scheduler) = scheduler(PHASED);

    let readiness = scheduler.can_start(&id("21")).unwrap();
    assert_eq!(readiness.reason_codes(), vec!["batch_pending"]);

    let t10 = claim_token(&scheduler, "10");
    let readiness = scheduler.can_start(&id("11")).unwrap();
    assert_eq!(
        readiness.reasons(),
        &[BlockReason::ParallelLimitReached {
            batch: "foundation".to_string(),
            limit: 1
        }]
    );

    // 21 is batch-gated and shares src/db.rs with the running 10
    let readiness = scheduler.can_start(&id("21")).unwrap();
    assert_eq!(readiness.reason_codes(), vec!["batch_pending", "conflict"]);

    scheduler.mark_complete(&id("10"), &t10, None).unwrap();
    let t11 = claim_token(&scheduler, "11");
    let report = scheduler.mark_complete(&id("11"), &t11, None).unwrap();
    assert!(report.batch.is_complete);
    assert_eq!(report.unlocked_batches, vec!["features".to_string()]);
    assert_eq!(report.newly_ready, ids(&["20", "21"]));
}

#[test]
fn test_soft_dependencies_only_warn() {
    let (_dir, scheduler) = scheduler(PHASED);
    for issue in ["10", "11"] {
        let token = claim_token(&scheduler, issue);
        scheduler.mark_complete(&id(issue), &token, None).unwrap();
    }

    match scheduler.claim(&id("20")).unwrap() {
        ClaimOutcome::Claimed { warnings, .. } => assert_eq!(warnings, ids(&["21"])),
        other => panic!("expected claim, got {other:?}"),
    }
}

#[test]
fn test_claim_blocked_leaves_state_untouched() {
    let (_dir, scheduler) = scheduler(SCENARIO);

    let outcome = scheduler.claim(&id("2")).unwrap();
    assert!(matches!(outcome, ClaimOutcome::Blocked { .. }));
    assert!(outcome.token().is_none());
    assert!(!scheduler.store().exists());
}

#[test]
fn test_claim_after_claim_is_blocked() {
    let (_dir, scheduler) = scheduler(SCENARIO);
    claim_token(&scheduler, "1");

    match scheduler.claim(&id("1")).unwrap() {
        ClaimOutcome::Blocked { reasons } => {
            assert_eq!(reasons[0].code(), "already_started")
        }
        other => panic!("expected blocked, got {other:?}"),
    }
}

#[test]
fn test_stale_second_scheduler_loses_race() {
    let (dir, first) = scheduler(SCENARIO);
    let graph = DependencyGraph::from_yaml_str(SCENARIO, DEFAULT_PARALLEL_LIMIT).unwrap();
    let second = Scheduler::new(graph, ProgressStore::new(dir.path().join("progress.json")));

    // Second decides from a snapshot taken before first claims
    let stale = second.snapshot().unwrap();
    assert!(second.evaluate(&id("1"), &stale).unwrap().is_ready());
    claim_token(&first, "1");

    let item = second.graph().item(&id("1")).unwrap();
    let attempt = second
        .store()
        .try_claim(second.graph(), &id("1"), Some(stale.revision), |fresh| {
            second.gating_reasons(item, fresh)
        })
        .unwrap();
    assert_eq!(attempt, ClaimAttempt::AlreadyClaimed(IssueStatus::InProgress));
}

#[test]
fn test_mark_complete_twice_is_rejected() {
    let (_dir, scheduler) = scheduler(SCENARIO);
    let token = claim_token(&scheduler, "1");

    let report = scheduler.mark_complete(&id("1"), &token, Some("pr-1")).unwrap();
    let completed_at = report.record.completed_at.clone();

    let err = scheduler.mark_complete(&id("1"), &token, None).unwrap_err();
    assert!(matches!(err, SchedulerError::IssueNotInProgress(_)));

    let record = scheduler.store().read(scheduler.graph(), &id("1")).unwrap();
    assert_eq!(record.completed_at, completed_at);
    assert_eq!(record.result_ref.as_deref(), Some("pr-1"));
}

#[test]
fn test_ready_issues_scoped_to_batch() {
    let (_dir, scheduler) = scheduler(PHASED);

    assert_eq!(
        scheduler.get_ready_issues(Some("foundation")).unwrap(),
        ids(&["10", "11"])
    );
    assert!(scheduler.get_ready_issues(Some("features")).unwrap().is_empty());
    assert!(matches!(
        scheduler.get_ready_issues(Some("nope")),
        Err(SchedulerError::BatchNotFound(_))
    ));
}

#[test]
fn test_blocked_issues_listed_with_reasons() {
    let (_dir, scheduler) = scheduler(SCENARIO);

    let blocked = scheduler.get_blocked_issues().unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].issue_id, id("2"));
    assert_eq!(blocked[0].batch, "B1");
    assert_eq!(blocked[0].reasons[0].code(), "missing_deps");
}

#[test]
fn test_progress_summary() {
    let (_dir, scheduler) = scheduler(PHASED);
    let token = claim_token(&scheduler, "10");
    scheduler.mark_complete(&id("10"), &token, None).unwrap();
    claim_token(&scheduler, "11");

    let summary = scheduler.get_progress_summary().unwrap();
    assert_eq!(summary.project, "Phased");
    assert_eq!(summary.total, 4);
    assert_eq!(summary.complete, 1);
    assert_eq!(summary.in_progress, 1);
    assert_eq!(summary.pending, 2);
    assert_eq!(summary.blocked, 2);
    assert_eq!(summary.completion_percentage, 25.0);

    let statuses: Vec<(String, BatchStatus)> = summary
        .per_batch
        .iter()
        .map(|b| (b.id.clone(), b.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("features".to_string(), BatchStatus::Waiting),
            ("foundation".to_string(), BatchStatus::Ready),
        ]
    );
}

#[test]
fn test_detect_and_resolve_conflicts() {
    let (_dir, scheduler) = scheduler(PHASED);
    claim_token(&scheduler, "10");

    let conflicts = scheduler.detect_conflicts(&id("21")).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].issue_id, id("10"));

    let resolution = scheduler
        .resolve_conflict(ResolutionStrategy::Queue, &ids(&["21", "10"]))
        .unwrap();
    assert_eq!(resolution.message, "Will execute sequentially: [10, 21]");
}

#[test]
fn test_unknown_issue() {
    let (_dir, scheduler) = scheduler(SCENARIO);
    assert!(matches!(
        scheduler.can_start(&id("404")),
        Err(SchedulerError::IssueNotFound(_))
    ));
}
