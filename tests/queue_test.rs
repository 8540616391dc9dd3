//! Single-queue semantics against a live Redis.

mod common;

use std::time::{Duration, Instant};

use forq::{Error, Payload};
use serde_json::json;

fn payload(name: &str) -> Payload {
    Payload::new("PersonJob", vec![json!({ "name": name })])
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn push_then_pop_is_fifo_and_shrinks_the_queue() {
    let forq = common::client("queue-fifo").await;
    let queue = forq.queue("people");

    for name in ["chris", "bob", "mark"] {
        queue.push(&payload(name)).await.unwrap();
    }
    assert_eq!(queue.size().await.unwrap(), 3);

    assert_eq!(queue.pop().await.unwrap(), Some(payload("chris")));
    assert_eq!(queue.size().await.unwrap(), 2);
    assert_eq!(queue.pop().await.unwrap(), Some(payload("bob")));
    assert_eq!(queue.pop().await.unwrap(), Some(payload("mark")));
    assert_eq!(queue.pop().await.unwrap(), None);
    assert_eq!(queue.size().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn peek_never_mutates() {
    let forq = common::client("queue-peek").await;
    let queue = forq.queue("people");
    for name in ["chris", "bob", "mark"] {
        queue.push(&payload(name)).await.unwrap();
    }

    assert_eq!(queue.peek(0).await.unwrap(), Some(payload("chris")));
    assert_eq!(queue.peek(1).await.unwrap(), Some(payload("bob")));
    assert_eq!(queue.size().await.unwrap(), 3);

    assert_eq!(
        queue.peek_range(1, 2).await.unwrap(),
        vec![payload("bob"), payload("mark")]
    );
    assert_eq!(
        queue.peek_range(0, 3).await.unwrap(),
        vec![payload("chris"), payload("bob"), payload("mark")]
    );
    // Out of range: single peek yields None, ranged peek an empty vec.
    assert_eq!(queue.peek(3).await.unwrap(), None);
    assert!(queue.peek_range(3, 2).await.unwrap().is_empty());
    assert_eq!(queue.size().await.unwrap(), 3);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn blocking_pop_times_out_near_the_deadline() {
    let forq = common::client("queue-timeout").await;
    let queue = forq.queue("empty");

    let started = Instant::now();
    let result = queue.pop_blocking(Some(Duration::from_secs(1))).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(Error::Timeout)));
    assert!(elapsed >= Duration::from_millis(900), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "returned far too late: {elapsed:?}");
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn blocking_pop_wakes_when_an_item_arrives() {
    let forq = common::client("queue-wake").await;
    let queue = forq.queue("people");

    let pusher = {
        let queue = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            queue.push(&payload("late")).await.unwrap();
        })
    };

    let started = Instant::now();
    let popped = queue.pop_blocking(Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(popped, payload("late"));
    // Woken by the push, not by the deadline.
    assert!(started.elapsed() < Duration::from_secs(2));
    pusher.await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn remove_matches_class_and_optionally_args() {
    let forq = common::client("queue-remove").await;

    forq.create("jobs", "SomeJob", vec![json!(20), json!("/tmp")]).await.unwrap();
    forq.create("jobs", "BadJob", vec![json!(20), json!("/tmp")]).await.unwrap();
    forq.create("jobs", "SomeJob", vec![json!(20), json!("/tmp")]).await.unwrap();
    forq.create("jobs", "BadJob", vec![json!(30), json!("/tmp")]).await.unwrap();
    forq.create("jobs", "BadJob", vec![json!(20), json!("/tmp")]).await.unwrap();
    assert_eq!(forq.size("jobs").await.unwrap(), 5);

    // Class-only match removes every SomeJob.
    assert_eq!(forq.destroy("jobs", "SomeJob", None).await.unwrap(), 2);
    assert_eq!(forq.size("jobs").await.unwrap(), 3);

    // Exact-args match removes only the one BadJob with 30.
    let args = [json!(30), json!("/tmp")];
    assert_eq!(forq.destroy("jobs", "BadJob", Some(&args)).await.unwrap(), 1);
    assert_eq!(forq.size("jobs").await.unwrap(), 2);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn queue_registry_tracks_ever_used_names() {
    let forq = common::client("queue-registry").await;

    forq.queue("people").push(&payload("chris")).await.unwrap();
    assert_eq!(forq.queues().await.unwrap(), vec!["people"]);

    forq.queue("cars").push(&payload("bmw")).await.unwrap();
    assert_eq!(forq.queues().await.unwrap(), vec!["cars", "people"]);

    // Draining a queue does not unregister its name.
    forq.queue("cars").pop().await.unwrap();
    assert_eq!(forq.queues().await.unwrap(), vec!["cars", "people"]);

    forq.remove_queue("people").await.unwrap();
    assert_eq!(forq.queues().await.unwrap(), vec!["cars"]);
    assert_eq!(forq.queue("people").pop().await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn create_validates_class_and_queue() {
    let forq = common::client("queue-validate").await;

    assert!(matches!(
        forq.create("jobs", "", vec![]).await,
        Err(Error::NoClass)
    ));
    assert!(matches!(
        forq.create("", "SomeJob", vec![]).await,
        Err(Error::NoQueue)
    ));
    // enqueue with no registered handler cannot infer a queue.
    assert!(matches!(
        forq.enqueue("Unregistered", vec![]).await,
        Err(Error::NoQueue)
    ));
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn reserve_round_trips_jobs_and_recreate_requeues() {
    let forq = common::client("queue-reserve").await;

    forq.create("jobs", "SomeJob", vec![json!(20), json!("/tmp")]).await.unwrap();
    let job = forq.reserve("jobs").await.unwrap().expect("job available");
    assert_eq!(job.class(), "SomeJob");
    assert_eq!(job.args(), &[json!(20), json!("/tmp")]);
    assert_eq!(job.queue, "jobs");
    assert_eq!(forq.size("jobs").await.unwrap(), 0);

    // Re-pushing an equivalent record makes it reservable again.
    forq.recreate(&job).await.unwrap();
    let again = forq.reserve("jobs").await.unwrap().expect("job recreated");
    assert_eq!(again, job);

    assert_eq!(forq.reserve("jobs").await.unwrap(), None);
}
