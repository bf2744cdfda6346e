mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_settings, init_tracing, manual_minion, run_once, with_timeout};
use minion::MinionState;
use minion::minion::Minion;
use minion::page::MemoryBrowser;
use minion::task::TerminalState;
use minion_test_utils::scripted_task::{RunLog, Script, scripted};
use tokio::time::sleep;

#[tokio::test]
async fn entry_with_life_two_runs_twice_then_disappears() {
    init_tracing();
    let (minion, _clock, _) = manual_minion(1_000);
    let log = RunLog::new();
    minion.add_task(scripted("twice", Script::complete(), &log), 2);

    assert!(run_once(&minion).await);
    assert_eq!(minion.snapshot()[0].life, 1);
    assert!(run_once(&minion).await);
    assert!(minion.is_empty());

    assert!(!run_once(&minion).await);
    assert_eq!(log.started(), vec!["twice", "twice"]);
    assert_eq!(log.destroyed(), vec!["twice", "twice"]);
    assert_eq!(minion.run_count(), 2);
}

#[tokio::test]
async fn unlimited_entry_survives_many_runs() {
    let (minion, _clock, _) = manual_minion(1_000);
    let log = RunLog::new();
    minion.add_task(scripted("forever", Script::complete(), &log), 0);

    for _ in 0..50 {
        assert!(run_once(&minion).await);
    }
    assert_eq!(minion.len(), 1);
    assert_eq!(minion.snapshot()[0].life, 0);
    assert_eq!(log.started().len(), 50);
}

#[tokio::test]
async fn reported_awake_time_gates_the_next_run() {
    let (minion, clock, _) = manual_minion(1_000);
    let log = RunLog::new();
    minion.add_task(
        scripted("sleepy", Script::sleep_until(TerminalState::Canceled, 5_000), &log),
        0,
    );

    assert!(run_once(&minion).await);
    let snap = minion.snapshot();
    assert_eq!(snap[0].awake_time, 5_000);
    assert_eq!(snap[0].task, "sleepy");

    assert!(!run_once(&minion).await);
    clock.set(4_999);
    assert!(!run_once(&minion).await);
    clock.set(5_000);
    assert!(run_once(&minion).await);
    assert_eq!(log.started().len(), 2);
}

#[tokio::test]
async fn entries_are_visited_round_robin() {
    let (minion, _clock, _) = manual_minion(1_000);
    let log = RunLog::new();
    for name in ["a", "b", "c"] {
        minion.add_task(scripted(name, Script::complete(), &log), 0);
    }

    for _ in 0..6 {
        assert!(run_once(&minion).await);
    }
    assert_eq!(log.started(), vec!["a", "b", "c", "a", "b", "c"]);
}

#[tokio::test]
async fn sleeping_entries_are_skipped_without_losing_their_turn() {
    let (minion, clock, _) = manual_minion(1_000);
    let log = RunLog::new();
    minion.add_task(
        scripted("late", Script::sleep_until(TerminalState::Completed, 10_000), &log),
        0,
    );
    minion.add_task(scripted("early", Script::complete(), &log), 0);

    // late runs, then sleeps; early keeps the pool busy meanwhile.
    for _ in 0..4 {
        assert!(run_once(&minion).await);
    }
    assert_eq!(log.started(), vec!["late", "early", "early", "early"]);

    clock.set(10_000);
    assert!(run_once(&minion).await);
    assert_eq!(log.started().last().map(String::as_str), Some("late"));
}

#[tokio::test]
async fn failing_and_panicking_tasks_still_settle() {
    init_tracing();
    let (minion, _clock, _) = manual_minion(1_000);
    let log = RunLog::new();
    minion.add_task(scripted("fails", Script::Fail, &log), 1);
    minion.add_task(scripted("panics", Script::Panic, &log), 1);
    minion.add_task(scripted("fine", Script::complete(), &log), 0);

    for _ in 0..3 {
        assert!(with_timeout(run_once(&minion)).await);
    }

    assert_eq!(minion.len(), 1);
    assert_eq!(minion.snapshot()[0].task, "fine");
    assert_eq!(minion.state(), MinionState::Idle);
    assert_eq!(minion.run_count(), 3);
    assert_eq!(log.started(), vec!["fails", "panics", "fine"]);
    assert_eq!(log.active(), 0);

    // A task that panics mid-run is gone before it can be destroyed; every
    // other settled run is destroyed exactly once.
    assert_eq!(log.destroyed(), vec!["fails", "fine"]);
    assert_eq!(log.dropped(), vec!["fails", "panics", "fine"]);
}

#[tokio::test]
async fn unmet_preconditions_spend_life_without_running() {
    let (minion, _clock, _) = manual_minion(1_000);
    let log = RunLog::new();
    minion.add_task(scripted("blocked", Script::Unprepared, &log), 2);

    assert!(run_once(&minion).await);
    assert_eq!(minion.snapshot()[0].life, 1);
    assert_eq!(minion.snapshot()[0].awake_time, 0);
    assert!(run_once(&minion).await);

    assert!(minion.is_empty());
    assert!(log.started().is_empty());
    assert_eq!(log.destroyed(), vec!["blocked", "blocked"]);
    assert_eq!(minion.run_count(), 2);
}

#[tokio::test]
async fn panicking_prepare_settles_the_entry() {
    init_tracing();
    let (minion, _clock, _) = manual_minion(1_000);
    let log = RunLog::new();
    minion.add_task(scripted("broken", Script::PanicInPrepare, &log), 1);
    minion.add_task(scripted("fine", Script::complete(), &log), 0);

    assert!(with_timeout(run_once(&minion)).await);
    assert_eq!(minion.state(), MinionState::Idle);
    assert_eq!(minion.current(), None);
    assert_eq!(minion.len(), 1);
    assert_eq!(minion.run_count(), 1);

    assert!(run_once(&minion).await);
    assert_eq!(log.started(), vec!["fine"]);
    assert_eq!(log.destroyed(), vec!["fine"]);
}

#[tokio::test]
async fn polling_survives_a_panicking_prepare() {
    init_tracing();
    let browser = MemoryBrowser::new();
    let minion = Minion::new(Arc::new(browser), fast_settings());
    let log = RunLog::new();
    minion.add_task(scripted("broken", Script::PanicInPrepare, &log), 1);
    minion.add_task(scripted("after", Script::complete(), &log), 2);

    assert!(minion.start());
    with_timeout(async {
        while !minion.is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(minion.stop().await);

    assert_eq!(minion.run_count(), 3);
    assert_eq!(log.started(), vec!["after", "after"]);
    assert!(minion.poll_count() >= 3);
}

#[tokio::test]
async fn a_hung_task_blocks_runs_but_not_polling() {
    init_tracing();
    let browser = MemoryBrowser::new();
    let minion = Minion::new(Arc::new(browser), fast_settings());
    let log = RunLog::new();
    let hung = minion.add_task(scripted("hang", Script::TickForever, &log), 1);
    minion.add_task(scripted("other", Script::complete(), &log), 0);

    assert!(minion.start());
    sleep(Duration::from_millis(60)).await;
    let before = minion.poll_count();
    sleep(Duration::from_millis(60)).await;
    let after = minion.poll_count();

    assert!(after > before, "polling stalled at {before}");
    assert_eq!(minion.state(), MinionState::Busy);
    assert_eq!(minion.current(), Some(hung));
    assert_eq!(log.started(), vec!["hang"]);
    assert!(log.ticks() > 0);
    assert_eq!(minion.run_count(), 0);

    assert!(minion.stop().await);
}

#[tokio::test]
async fn polling_loop_runs_one_task_at_a_time() {
    init_tracing();
    let browser = MemoryBrowser::new();
    let minion = Minion::new(Arc::new(browser), fast_settings());
    let log = RunLog::new();
    for name in ["a", "b", "c"] {
        minion.add_task(
            scripted(name, Script::Sleep(Duration::from_millis(15)), &log),
            2,
        );
    }

    assert!(minion.start());
    with_timeout(async {
        while !minion.is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(minion.stop().await);
    minion.wait_idle().await;

    assert_eq!(log.max_active(), 1);
    assert_eq!(log.started(), vec!["a", "b", "c", "a", "b", "c"]);
    assert_eq!(log.destroyed(), log.started());
    assert_eq!(log.dropped().len(), 6);
    assert_eq!(minion.run_count(), 6);
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let browser = MemoryBrowser::new();
    let minion = Minion::new(Arc::new(browser), fast_settings());

    assert!(!minion.stop().await);
    assert!(minion.start());
    assert!(!minion.start());
    assert!(minion.is_running());

    assert!(minion.stop().await);
    assert!(!minion.stop().await);
    assert!(!minion.is_running());

    // A stopped minion can be started again.
    assert!(minion.start());
    assert!(minion.stop().await);
}

#[tokio::test]
async fn stop_leaves_a_running_task_to_finish() {
    let (minion, _clock, _) = manual_minion(1_000);
    let log = RunLog::new();
    minion.add_task(scripted("slow", Script::Sleep(Duration::from_millis(40)), &log), 1);

    assert!(minion.start());
    assert!(minion.poll_once().is_some());
    assert!(minion.stop().await);

    assert_eq!(minion.state(), MinionState::Busy);
    with_timeout(minion.wait_idle()).await;
    assert!(minion.is_empty());
    assert_eq!(log.destroyed(), vec!["slow"]);
}
