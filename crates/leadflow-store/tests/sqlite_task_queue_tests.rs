//! Integration tests for `SqliteTaskQueue`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use leadflow_core::clock::Clock;
use leadflow_core::task::{TaskKind, TaskQueue, TaskStatus};
use leadflow_store::SqliteTaskQueue;
use leadflow_test_support::ManualClock;
use sqlx::SqlitePool;
use uuid::Uuid;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

fn queue_with(pool: SqlitePool, max_attempts: u32) -> (SqliteTaskQueue, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let queue = SqliteTaskQueue::with_max_attempts(pool, clock.clone(), max_attempts);
    (queue, clock)
}

// --- push / pop ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_push_then_pop_claims_task(pool: SqlitePool) {
    let (queue, _clock) = queue_with(pool, 3);

    let pushed = queue
        .push(
            TaskKind::SendToCrm,
            serde_json::json!({"lead_id": "lead_1"}),
            Duration::ZERO,
        )
        .await
        .unwrap();
    assert_eq!(pushed.status, TaskStatus::Pending);
    assert_eq!(pushed.attempts, 0);

    let popped = queue.pop().await.unwrap().unwrap();

    assert_eq!(popped.id, pushed.id);
    assert_eq!(popped.kind, TaskKind::SendToCrm);
    assert_eq!(popped.status, TaskStatus::Processing);
    assert_eq!(popped.attempts, 1);
    assert_eq!(popped.started_at, Some(start()));
    assert_eq!(popped.payload["lead_id"], "lead_1");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_pop_on_empty_queue_returns_none(pool: SqlitePool) {
    let (queue, _clock) = queue_with(pool, 3);

    assert!(queue.pop().await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_claimed_task_is_not_claimed_twice(pool: SqlitePool) {
    let (queue, _clock) = queue_with(pool, 3);
    queue
        .push(TaskKind::SendToCrm, serde_json::Value::Null, Duration::ZERO)
        .await
        .unwrap();

    assert!(queue.pop().await.unwrap().is_some());
    assert!(queue.pop().await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_delayed_task_is_not_eligible_before_delay(pool: SqlitePool) {
    let (queue, clock) = queue_with(pool, 3);
    let pushed = queue
        .push(
            TaskKind::SendAdConversion,
            serde_json::Value::Null,
            Duration::from_secs(90),
        )
        .await
        .unwrap();
    assert_eq!(pushed.execute_after, start() + TimeDelta::seconds(90));

    clock.advance(TimeDelta::seconds(89));
    assert!(queue.pop().await.unwrap().is_none());

    clock.advance(TimeDelta::seconds(1));
    let popped = queue.pop().await.unwrap().unwrap();
    assert_eq!(popped.id, pushed.id);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_sub_millisecond_delay_is_never_claimed_early(pool: SqlitePool) {
    // Arrange
    let (queue, clock) = queue_with(pool, 3);
    clock.set(start() + TimeDelta::microseconds(500));
    let pushed = queue
        .push(
            TaskKind::SendToCrm,
            serde_json::Value::Null,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    // Act
    let stored = queue.get(pushed.id).await.unwrap().unwrap();
    clock.set(start() + TimeDelta::microseconds(1_000_900));
    let early = queue.pop().await.unwrap();
    clock.set(start() + TimeDelta::milliseconds(1_001));
    let due = queue.pop().await.unwrap();

    // Assert
    assert_eq!(stored, pushed);
    assert!(pushed.execute_after >= start() + TimeDelta::microseconds(1_000_500));
    assert!(early.is_none());
    assert_eq!(due.map(|task| task.id), Some(pushed.id));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_pop_order_is_earliest_eligible_then_creation(pool: SqlitePool) {
    let (queue, clock) = queue_with(pool, 3);
    let delayed = queue
        .push(TaskKind::SendToCrm, serde_json::json!({"n": 1}), Duration::from_secs(30))
        .await
        .unwrap();
    let first_immediate = queue
        .push(TaskKind::SendToCrm, serde_json::json!({"n": 2}), Duration::ZERO)
        .await
        .unwrap();
    let second_immediate = queue
        .push(TaskKind::SendToCrm, serde_json::json!({"n": 3}), Duration::ZERO)
        .await
        .unwrap();
    clock.advance(TimeDelta::minutes(5));

    let order: Vec<Uuid> = [
        queue.pop().await.unwrap().unwrap().id,
        queue.pop().await.unwrap().unwrap().id,
        queue.pop().await.unwrap().unwrap().id,
    ]
    .to_vec();

    assert_eq!(order, vec![first_immediate.id, second_immediate.id, delayed.id]);
}

// --- complete ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_complete_stores_result_and_timestamp(pool: SqlitePool) {
    let (queue, clock) = queue_with(pool, 3);
    let task = queue
        .push(TaskKind::SendToCrm, serde_json::Value::Null, Duration::ZERO)
        .await
        .unwrap();
    queue.pop().await.unwrap().unwrap();
    clock.advance(TimeDelta::seconds(2));

    let completed = queue
        .complete(task.id, serde_json::json!({"crm_id": "crm_main"}))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(completed.completed_at, Some(start() + TimeDelta::seconds(2)));
    assert_eq!(completed.result, Some(serde_json::json!({"crm_id": "crm_main"})));

    let stored = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(stored, completed);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_complete_unknown_task_is_noop(pool: SqlitePool) {
    let (queue, _clock) = queue_with(pool, 3);

    let result = queue
        .complete(Uuid::new_v4(), serde_json::json!({}))
        .await
        .unwrap();

    assert!(result.is_none());
}

// --- fail / backoff ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_fail_reschedules_with_doubling_backoff(pool: SqlitePool) {
    let (queue, clock) = queue_with(pool, 4);
    let task = queue
        .push(TaskKind::SendToCrm, serde_json::Value::Null, Duration::ZERO)
        .await
        .unwrap();

    for (k, backoff_secs) in [(1_u32, 60_i64), (2, 120), (3, 240)] {
        let claimed = queue.pop().await.unwrap().unwrap();
        assert_eq!(claimed.attempts, k);

        let failed_at = clock.now();
        let failed = queue.fail(task.id, "crm timeout").await.unwrap().unwrap();
        let expected = failed_at + TimeDelta::seconds(backoff_secs);

        assert_eq!(failed.status, TaskStatus::Pending);
        assert_eq!(failed.execute_after, expected);
        assert_eq!(failed.error.as_deref(), Some("crm timeout"));

        clock.advance(TimeDelta::seconds(backoff_secs - 1));
        assert!(queue.pop().await.unwrap().is_none());
        clock.advance(TimeDelta::seconds(1));
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_fail_returns_the_stored_retry_time(pool: SqlitePool) {
    // Arrange
    let (queue, clock) = queue_with(pool, 3);
    let task = queue
        .push(TaskKind::SendToCrm, serde_json::Value::Null, Duration::ZERO)
        .await
        .unwrap();
    queue.pop().await.unwrap().unwrap();
    clock.set(start() + TimeDelta::microseconds(250));

    // Act
    let failed = queue.fail(task.id, "crm timeout").await.unwrap().unwrap();

    // Assert
    let stored = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(failed, stored);
    assert_eq!(
        failed.execute_after,
        start() + TimeDelta::seconds(60) + TimeDelta::milliseconds(1)
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_single_attempt_task_fails_permanently(pool: SqlitePool) {
    let (queue, clock) = queue_with(pool, 1);
    let task = queue
        .push(TaskKind::SendToCrm, serde_json::Value::Null, Duration::ZERO)
        .await
        .unwrap();
    queue.pop().await.unwrap().unwrap();

    let failed = queue.fail(task.id, "rejected").await.unwrap().unwrap();

    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.attempts, 1);
    clock.advance(TimeDelta::days(30));
    assert!(queue.pop().await.unwrap().is_none());

    // Terminal tasks ignore later transitions.
    assert!(queue.fail(task.id, "again").await.unwrap().is_none());
    assert!(queue.complete(task.id, serde_json::json!({})).await.unwrap().is_none());
    let stored = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("rejected"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_fail_of_pending_task_is_noop(pool: SqlitePool) {
    let (queue, _clock) = queue_with(pool, 3);
    let task = queue
        .push(TaskKind::SendToCrm, serde_json::Value::Null, Duration::ZERO)
        .await
        .unwrap();

    assert!(queue.fail(task.id, "not claimed").await.unwrap().is_none());

    let stored = queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.attempts, 0);
}

// --- abandon ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_abandon_dead_letters_with_attempts_left(pool: SqlitePool) {
    let (queue, clock) = queue_with(pool, 5);
    let task = queue
        .push(TaskKind::SendAdConversion, serde_json::Value::Null, Duration::ZERO)
        .await
        .unwrap();
    queue.pop().await.unwrap().unwrap();

    let abandoned = queue
        .abandon(task.id, "no handler registered for task type send_ad_conversion")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(abandoned.status, TaskStatus::Failed);
    assert_eq!(abandoned.attempts, 1);
    clock.advance(TimeDelta::days(1));
    assert!(queue.pop().await.unwrap().is_none());
}

// --- durability ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_tasks_survive_a_new_queue_instance(pool: SqlitePool) {
    let (queue, _clock) = queue_with(pool.clone(), 3);
    let task = queue
        .push(TaskKind::SendToCrm, serde_json::json!({"lead_id": "lead_9"}), Duration::ZERO)
        .await
        .unwrap();
    drop(queue);

    let (reopened, _clock) = queue_with(pool, 3);
    let all = reopened.tasks().await.unwrap();

    assert_eq!(all, vec![task]);
}
