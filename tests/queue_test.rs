//! Job queue ordering, claim and serialization tests.

use std::collections::HashSet;
use std::sync::Arc;

use huginn::jobs::{
    Job, JobPriority, JobQueue, JobResult, JobStatus, MemoryJobQueue, Metadata,
};
use serde_json::json;

fn job(priority: JobPriority) -> Job {
    Job::new("generate", Metadata::new()).with_priority(priority)
}

#[tokio::test]
async fn high_normal_low_scenario() {
    let queue = MemoryJobQueue::new();
    let high = queue.enqueue(job(JobPriority::High)).await.unwrap();
    let low = queue.enqueue(job(JobPriority::Low)).await.unwrap();
    let normal = queue.enqueue(job(JobPriority::Normal)).await.unwrap();

    let mut order = Vec::new();
    while let Some(claim) = queue.dequeue("w").await.unwrap() {
        order.push(claim.job.id);
    }
    assert_eq!(order, vec![high, normal, low]);
}

#[tokio::test]
async fn higher_priority_always_first() {
    let queue = MemoryJobQueue::new();
    let priorities = [
        JobPriority::Low,
        JobPriority::Urgent,
        JobPriority::Normal,
        JobPriority::High,
        JobPriority::Low,
        JobPriority::Urgent,
    ];
    for priority in priorities {
        queue.enqueue(job(priority)).await.unwrap();
    }

    let mut claimed = Vec::new();
    while let Some(claim) = queue.dequeue("w").await.unwrap() {
        claimed.push(claim.job.priority);
    }
    let mut expected = priorities.to_vec();
    expected.sort_by(|a, b| b.cmp(a));
    assert_eq!(claimed, expected);
}

#[tokio::test]
async fn fifo_within_priority() {
    let queue = MemoryJobQueue::new();
    let mut ids = Vec::new();
    for _ in 0..20 {
        ids.push(queue.enqueue(job(JobPriority::Normal)).await.unwrap());
    }
    for expected in ids {
        let claim = queue.dequeue("w").await.unwrap().unwrap();
        assert_eq!(claim.job.id, expected);
    }
    assert!(queue.dequeue("w").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dequeue_claims_each_job_once() {
    let queue = Arc::new(MemoryJobQueue::new());
    const JOBS: usize = 500;
    for i in 0..JOBS {
        let priority = match i % 3 {
            0 => JobPriority::Low,
            1 => JobPriority::Normal,
            _ => JobPriority::High,
        };
        queue.enqueue(job(priority)).await.unwrap();
    }

    let mut tasks = Vec::new();
    for w in 0..8 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            let worker = format!("worker-{w}");
            let mut mine = Vec::new();
            while let Some(claim) = queue.dequeue(&worker).await.unwrap() {
                assert_eq!(claim.job.worker_id.as_deref(), Some(worker.as_str()));
                mine.push(claim.job.id);
                tokio::task::yield_now().await;
            }
            mine
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for task in tasks {
        for id in task.await.unwrap() {
            total += 1;
            assert!(seen.insert(id), "job claimed twice");
        }
    }
    assert_eq!(total, JOBS);
    assert_eq!(queue.stats().await.unwrap().running, JOBS);
}

#[tokio::test]
async fn serialization_round_trip_after_completion() {
    let queue = MemoryJobQueue::new();
    let mut params = Metadata::new();
    params.insert("template_id".into(), json!("blog"));
    params.insert("nested".into(), json!({"a": [1, 2, 3], "b": null}));
    let id = queue
        .enqueue(
            Job::new("generate", params)
                .with_priority(JobPriority::Urgent)
                .with_timeout_seconds(42)
                .with_max_retries(1),
        )
        .await
        .unwrap();
    queue.dequeue("worker-7").await.unwrap();
    queue
        .complete(
            &id,
            JobResult::success(json!({"content": "hello"}), 1.25).with_metadata("attempts", 1),
        )
        .await
        .unwrap();

    let original = queue.get_job(&id).await.unwrap().unwrap();
    let encoded = original.to_json().unwrap();
    let decoded = Job::from_json(&encoded).unwrap();
    assert_eq!(decoded, original);

    let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
    assert_eq!(value["status"], "completed");
    assert_eq!(value["priority"], "urgent");
    assert_eq!(value["worker_id"], "worker-7");
    assert_eq!(value["result"]["success"], true);
    assert!(value["completed_at"].is_string());
}

#[tokio::test]
async fn pending_job_serializes_null_timestamps() {
    let encoded = job(JobPriority::Low).to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
    assert!(value["started_at"].is_null());
    assert!(value["completed_at"].is_null());
    assert_eq!(value["status"], "pending");
    assert_eq!(Job::from_json(&encoded).unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn requeued_job_keeps_priority_tier() {
    let queue = MemoryJobQueue::new();
    let urgent = queue.enqueue(job(JobPriority::Urgent)).await.unwrap();
    queue.dequeue("w").await.unwrap();
    for _ in 0..3 {
        queue.enqueue(job(JobPriority::Normal)).await.unwrap();
    }
    queue.requeue(&urgent, "flaky").await.unwrap();

    let next = queue.dequeue("w").await.unwrap().unwrap();
    assert_eq!(next.job.id, urgent);
    assert_eq!(next.job.retry_count, 1);
    assert_eq!(next.job.progress, 0.0);
}

#[tokio::test]
async fn stats_track_every_ordering() {
    let queue = MemoryJobQueue::new();
    let ids: Vec<String> = {
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(queue.enqueue(job(JobPriority::Normal)).await.unwrap());
        }
        ids
    };
    for _ in 0..3 {
        queue.dequeue("w").await.unwrap();
    }
    queue
        .complete(&ids[0], JobResult::success(json!(null), 0.0))
        .await
        .unwrap();
    queue
        .complete(&ids[1], JobResult::failure("x", 0.0))
        .await
        .unwrap();
    queue.cancel(&ids[4]).await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.running, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.cancelled, 1);
}
