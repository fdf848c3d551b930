use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::migrate::fake_drive::{DRIVE_ROOT, FakeDrive, SPACE_ID, file, folder};
use crate::migrate::progress::{Counter, ProgressEvent, StepState};

fn fast_config() -> MigrationConfig {
    MigrationConfig {
        cooldown: Duration::from_millis(5),
        cooldown_tick: Duration::from_millis(1),
        task_poll_base: Duration::from_millis(1),
        task_poll_max: Duration::from_millis(2),
        ..MigrationConfig::default()
    }
}

fn rooted_tree(select_root: bool) -> (Tree, NodeId) {
    let mut tree = Tree::new();
    let root = tree.add_root("r", "R").unwrap();
    if select_root {
        tree.toggle(root, true).unwrap();
    }
    (tree, root)
}

/// R holds an empty-after-filtering folder A (one pdf inside) and a doc F.
fn scenario_drive() -> FakeDrive {
    FakeDrive::new()
        .with_folder_name("r", "R")
        .with_folder("r", vec![folder("a"), file("f", "doc")])
        .with_folder("a", vec![file("g", "pdf")])
}

fn drain(events: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn many_docs(count: usize) -> Vec<serde_json::Value> {
    (0..count).map(|n| file(&format!("d{n:03}"), "docx")).collect()
}

#[tokio::test]
async fn migrates_selected_root_end_to_end() {
    let migrator = Migrator::new(scenario_drive(), fast_config());
    let (tree, _) = rooted_tree(true);
    let ctx = RunContext::new();

    let report = migrator.run(&tree, &ctx).await.unwrap();

    assert_eq!(report.copy.requested, 1);
    assert_eq!(report.copy.skipped, 1);
    assert_eq!(report.copy.listed, 1);
    assert_eq!(report.wiki.nodes_created, 1);
    assert_eq!(report.wiki.moved, 1);
    assert_eq!(report.wiki.space_id, SPACE_ID);
    assert_eq!(report.root.name, "R");
    assert_eq!(report.my_drive_root.token, DRIVE_ROOT);
    assert_eq!(report.migrate_folder.name, "R_to_migrate");
    assert!(report.cleanup.reminder.contains("R_to_migrate"));
    assert_eq!(report.selection, SelectionCounts { folders: 1, files: 2 });

    let drive = migrator.api();
    assert_eq!(drive.wiki_nodes(), vec![("a".to_string(), None)]);
    assert_eq!(
        drive.moves(),
        vec![("copy-f".to_string(), "doc".to_string(), None)]
    );
    assert_eq!(drive.calls_named("copy_file"), 1);
    assert_eq!(drive.folder_items(DRIVE_ROOT).len(), 1);

    let snapshot = ctx.snapshot();
    assert_eq!(snapshot.state, RunState::Done);
    assert!(snapshot.steps.iter().all(|step| step.state == StepState::Done));
    assert_eq!(snapshot.nodes, Counter { current: 1, total: 1 });
    assert_eq!(snapshot.moves, Counter { current: 1, total: 1 });
}

#[tokio::test]
async fn selecting_a_single_file_creates_no_containers() {
    let migrator = Migrator::new(scenario_drive(), fast_config());
    let (mut tree, root) = rooted_tree(false);
    migrator
        .expand(&mut tree, root, &RunContext::new())
        .await
        .unwrap();
    let f = tree.find("f").unwrap();
    tree.toggle(f, true).unwrap();

    let report = migrator.run(&tree, &RunContext::new()).await.unwrap();

    assert_eq!(report.copy.requested, 1);
    assert_eq!(report.copy.skipped, 0);
    assert_eq!(report.wiki.nodes_created, 0);
    assert_eq!(report.selection, SelectionCounts { folders: 0, files: 1 });
    assert!(migrator.api().wiki_nodes().is_empty());
}

#[tokio::test]
async fn cross_root_selection_fails_before_any_call() {
    let migrator = Migrator::new(FakeDrive::new(), fast_config());
    let mut tree = Tree::new();
    let first = tree.add_root("r1", "One").unwrap();
    let second = tree.add_root("r2", "Two").unwrap();
    tree.set_selected(first, true);
    tree.set_selected(second, true);
    let ctx = RunContext::new();

    let err = migrator.run(&tree, &ctx).await.unwrap_err();

    assert!(matches!(err, MigrationError::Validation(_)));
    assert!(migrator.api().calls().is_empty());
    assert_eq!(ctx.state(), RunState::Failed);
}

#[tokio::test]
async fn selection_without_eligible_files_is_rejected() {
    let drive = FakeDrive::new().with_folder("r", vec![file("clip", "mp4"), file("scan", "pdf")]);
    let migrator = Migrator::new(drive, fast_config());
    let (tree, _) = rooted_tree(true);

    let err = migrator.run(&tree, &RunContext::new()).await.unwrap_err();

    assert!(matches!(err, MigrationError::Validation(_)));
    assert_eq!(migrator.api().calls(), vec!["list_folder:r".to_string()]);
}

#[tokio::test]
async fn missing_copies_abort_before_wiki_construction() {
    let migrator = Migrator::new(scenario_drive().drop_copies(), fast_config());
    let (tree, _) = rooted_tree(true);
    let ctx = RunContext::new();

    let err = migrator.run(&tree, &ctx).await.unwrap_err();

    assert!(matches!(
        err,
        MigrationError::Integrity {
            expected: 1,
            actual: 0
        }
    ));
    assert_eq!(migrator.api().calls_named("create_wiki_space"), 0);
    assert_eq!(ctx.state(), RunState::Failed);
    assert_eq!(ctx.snapshot().step(StepId::CopyCheck), StepState::Active);
}

#[tokio::test]
async fn rejected_call_reports_request_and_response() {
    let migrator = Migrator::new(scenario_drive().fail_on("create_wiki_space"), fast_config());
    let (tree, _) = rooted_tree(true);

    let err = migrator.run(&tree, &RunContext::new()).await.unwrap_err();

    match err {
        MigrationError::Transport {
            step,
            request,
            response,
        } => {
            assert_eq!(step, "create wiki space");
            assert_eq!(request.method, "create_wiki_space");
            assert_eq!(response.status, 400);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn paginated_discovery_moves_every_document_in_order() {
    let drive = FakeDrive::new().with_folder("r", many_docs(7));
    let config = MigrationConfig {
        page_size: 2,
        ..fast_config()
    };
    let migrator = Migrator::new(drive, config);
    let (tree, _) = rooted_tree(true);

    let report = migrator.run(&tree, &RunContext::new()).await.unwrap();

    assert_eq!(report.wiki.moved, 7);
    let moved: Vec<_> = migrator
        .api()
        .moves()
        .into_iter()
        .map(|(token, _, _)| token)
        .collect();
    let expected: Vec<_> = (0..7).map(|n| format!("copy-d{n:03}")).collect();
    assert_eq!(moved, expected);
}

#[tokio::test]
async fn nested_documents_land_under_their_containers() {
    let drive = FakeDrive::new()
        .with_folder("r", vec![folder("a"), file("top", "sheet")])
        .with_folder("a", vec![folder("b"), file("mid", "doc")])
        .with_folder("b", vec![file("deep", "bitable")]);
    let migrator = Migrator::new(drive, fast_config());
    let (tree, _) = rooted_tree(true);

    let report = migrator.run(&tree, &RunContext::new()).await.unwrap();

    assert_eq!(report.wiki.nodes_created, 2);
    let drive = migrator.api();
    let nodes = drive.wiki_nodes();
    assert_eq!(nodes[0], ("a".to_string(), None));
    assert_eq!(nodes[1].0, "b");
    let parents: Vec<_> = drive
        .moves()
        .into_iter()
        .map(|(token, _, parent)| (token, parent.is_some()))
        .collect();
    assert_eq!(
        parents,
        vec![
            ("copy-deep".to_string(), true),
            ("copy-mid".to_string(), true),
            ("copy-top".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn deferred_copies_are_checked_and_matched_by_name() {
    let drive = scenario_drive().copy_as_task();
    let migrator = Migrator::new(drive, fast_config());
    let (tree, _) = rooted_tree(true);

    let report = migrator.run(&tree, &RunContext::new()).await.unwrap();

    assert_eq!(report.copy.tasks_checked, 1);
    assert_eq!(report.copy.errors, 0);
    assert_eq!(report.wiki.moved, 1);
    assert_eq!(migrator.api().calls_named("check_copy_task"), 1);
}

#[tokio::test]
async fn failed_wiki_tasks_are_reported_without_failing_the_run() {
    let drive = scenario_drive().with_move_tasks().with_wiki_task(
        "move-copy-f",
        json!({ "task": { "move_result": [{ "status": 5, "status_msg": "quota exceeded" }] } }),
    );
    let migrator = Migrator::new(drive, fast_config());
    let (tree, _) = rooted_tree(true);
    let ctx = RunContext::new();

    let report = migrator.run(&tree, &ctx).await.unwrap();

    assert_eq!(report.wiki.task_ids, vec!["move-copy-f".to_string()]);
    assert_eq!(report.wiki.failed, 1);
    assert_eq!(
        report.wiki.task_summaries[0].fail_reason.as_deref(),
        Some("quota exceeded")
    );
    assert_eq!(ctx.state(), RunState::Done);
}

#[tokio::test]
async fn cooldown_runs_once_between_the_90th_and_91st_move() {
    let migrator = Migrator::new(FakeDrive::new().with_folder("r", many_docs(91)), fast_config());
    let (tree, _) = rooted_tree(true);
    let (ctx, mut events) = RunContext::with_events(CancellationToken::new());

    let report = migrator.run(&tree, &ctx).await.unwrap();
    assert_eq!(report.wiki.moved, 91);

    let events = drain(&mut events);
    let cooldowns: Vec<_> = events
        .iter()
        .enumerate()
        .filter(|(_, event)| matches!(event, ProgressEvent::Cooldown { .. }))
        .map(|(pos, _)| pos)
        .collect();
    assert_eq!(cooldowns.len(), 1);
    let position_of = |current: usize| {
        events.iter().position(|event| {
            matches!(event, ProgressEvent::Moves(counter) if counter.current == current && counter.total == 91)
        })
    };
    let ninetieth = position_of(90).unwrap();
    let last = position_of(91).unwrap();
    assert!(ninetieth < cooldowns[0] && cooldowns[0] < last);
}

#[tokio::test]
async fn exactly_one_batch_needs_no_cooldown() {
    let migrator = Migrator::new(FakeDrive::new().with_folder("r", many_docs(90)), fast_config());
    let (tree, _) = rooted_tree(true);
    let (ctx, mut events) = RunContext::with_events(CancellationToken::new());

    migrator.run(&tree, &ctx).await.unwrap();

    assert!(
        !drain(&mut events)
            .iter()
            .any(|event| matches!(event, ProgressEvent::Cooldown { .. }))
    );
}

#[tokio::test]
async fn cancellation_stops_remote_calls_and_marks_the_run_cancelled() {
    let token = CancellationToken::new();
    // list, folder meta, drive root, staging folder, first copy
    let drive = FakeDrive::new()
        .with_folder("r", vec![file("d1", "doc"), file("d2", "doc")])
        .cancel_after(5, token.clone());
    let migrator = Migrator::new(drive, fast_config());
    let (tree, _) = rooted_tree(true);
    let ctx = RunContext::with_token(token);

    let err = migrator.run(&tree, &ctx).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(ctx.state(), RunState::Cancelled);
    let calls = migrator.api().calls();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls.last().map(String::as_str), Some("copy_file:d1"));
}

#[tokio::test]
async fn cancellation_interrupts_the_cooldown() {
    let token = CancellationToken::new();
    let config = MigrationConfig {
        cooldown: Duration::from_secs(60),
        cooldown_tick: Duration::from_millis(50),
        ..fast_config()
    };
    let migrator = Migrator::new(FakeDrive::new().with_folder("r", many_docs(91)), config);
    let (tree, _) = rooted_tree(true);
    let (ctx, mut events) = RunContext::with_events(token.clone());
    let canceller = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if matches!(event, ProgressEvent::Cooldown { .. }) {
                token.cancel();
                break;
            }
        }
    });

    let started = Instant::now();
    let err = migrator.run(&tree, &ctx).await.unwrap_err();
    canceller.await.unwrap();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(migrator.api().moves().len(), 90);
    assert_eq!(ctx.state(), RunState::Cancelled);
}
