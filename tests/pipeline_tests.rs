//! 端到端流水线测试
//!
//! 事件经内存 Stream 投递，经调度器、处理器写入临时 SQLite。

mod common;

use std::time::Duration;

use common::*;
use linkstats::consumer::HandleOutcome;
use linkstats::storage::DimensionCount;

const URL: &str = "abc123";

#[tokio::test]
async fn test_single_event_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let pipeline = pipeline(&config).await;
    pipeline
        .storage
        .create_link("g1", URL, "https://example.com/landing")
        .await
        .unwrap();

    let id = publish(&pipeline, &event(URL, "v1", "1.2.3.4")).await;

    let consumer = pipeline.dispatcher.consumer_names().remove(0);
    assert_eq!(pipeline.dispatcher.poll_once(&consumer).await.unwrap(), 1);
    pipeline.dispatcher.drain(Duration::from_secs(5)).await;

    let storage = &pipeline.storage;
    assert_eq!(storage.count_access_logs(URL).await.unwrap(), 1);
    let totals = storage.access_stats_totals(URL).await.unwrap();
    assert_eq!((totals.pv, totals.uv, totals.uip), (1, 1, 1));
    assert_eq!(
        storage.os_stats(URL).await.unwrap(),
        vec![DimensionCount {
            value: "iOS".to_string(),
            cnt: 1
        }]
    );
    let link = storage.find_link(URL).await.unwrap().unwrap();
    assert_eq!((link.total_pv, link.total_uv, link.total_uip), (1, 1, 1));
    assert_eq!(pending(&pipeline).await, 0);

    let snapshot = pipeline.dispatcher.stats();
    assert_eq!(snapshot.received, 1);
    assert_eq!(snapshot.succeeded, 1);

    // 同一消息再次投递，计数不变
    let redelivered = linkstats::stream::StreamEvent::new(
        id,
        event(URL, "v1", "1.2.3.4").into_fields().unwrap(),
    );
    assert_eq!(
        pipeline.handler.handle(&redelivered).await.unwrap(),
        HandleOutcome::AckOnly
    );
    assert_eq!(storage.count_access_logs(URL).await.unwrap(), 1);
    let totals = storage.access_stats_totals(URL).await.unwrap();
    assert_eq!((totals.pv, totals.uv, totals.uip), (1, 1, 1));
    let link = storage.find_link(URL).await.unwrap().unwrap();
    assert_eq!(link.total_pv, 1);
}

#[tokio::test]
async fn test_batch_counts_unique_visitors_and_ips() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let pipeline = pipeline(&config).await;
    pipeline
        .storage
        .create_link("g1", URL, "https://example.com")
        .await
        .unwrap();

    publish(&pipeline, &event(URL, "v1", "1.2.3.4")).await;
    publish(&pipeline, &event(URL, "v1", "1.2.3.4")).await;
    publish(&pipeline, &event(URL, "v2", "5.6.7.8")).await;

    let consumer = pipeline.dispatcher.consumer_names().remove(0);
    assert_eq!(pipeline.dispatcher.poll_once(&consumer).await.unwrap(), 3);
    pipeline.dispatcher.drain(Duration::from_secs(5)).await;

    let storage = &pipeline.storage;
    let totals = storage.access_stats_totals(URL).await.unwrap();
    assert_eq!((totals.pv, totals.uv, totals.uip), (3, 2, 2));
    let link = storage.find_link(URL).await.unwrap().unwrap();
    assert_eq!((link.total_pv, link.total_uv, link.total_uip), (3, 2, 2));
    assert_eq!(storage.count_first_visits(URL).await.unwrap(), 2);
    assert_eq!(pending(&pipeline).await, 0);
}

#[tokio::test]
async fn test_expired_marker_falls_back_to_unique_message_id() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let first = pipeline(&config).await;
    first
        .storage
        .create_link("g1", URL, "https://example.com")
        .await
        .unwrap();

    let id = publish(&first, &event(URL, "v1", "1.2.3.4")).await;
    let events = read_without_handling(&first, "c0", 10).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, id);
    assert_eq!(first.handler.handle(&events[0]).await.unwrap(), HandleOutcome::Acked);

    // 新的标记存储（标记已过期），共用同一数据库
    let second = pipeline_with_storage(&config, first.storage.clone()).await;
    assert_eq!(
        second.handler.handle(&events[0]).await.unwrap(),
        HandleOutcome::Duplicate
    );

    let storage = &first.storage;
    assert_eq!(storage.count_access_logs(URL).await.unwrap(), 1);
    let totals = storage.access_stats_totals(URL).await.unwrap();
    assert_eq!((totals.pv, totals.uv, totals.uip), (1, 1, 1));
    let link = storage.find_link(URL).await.unwrap().unwrap();
    assert_eq!(link.total_pv, 1);
}

#[tokio::test]
async fn test_first_visit_flag_follows_processing_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let pipeline = pipeline(&config).await;
    pipeline
        .storage
        .create_link("g1", URL, "https://example.com")
        .await
        .unwrap();

    // 较晚的访问先到达
    publish(&pipeline, &event_at(URL, "v1", "1.2.3.4", 1_700_000_900_000)).await;
    publish(&pipeline, &event_at(URL, "v1", "1.2.3.4", 1_700_000_000_000)).await;

    for event in read_without_handling(&pipeline, "c0", 10).await {
        pipeline.handler.handle(&event).await.unwrap();
    }

    let logs = pipeline.storage.access_logs(URL).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs.iter().filter(|log| log.first_flag).count(), 1);
    assert!(logs[0].first_flag);
    assert_eq!(pipeline.storage.count_first_visits(URL).await.unwrap(), 1);
}

#[tokio::test]
async fn test_gid_change_between_events() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let pipeline = pipeline(&config).await;
    let storage = &pipeline.storage;
    storage.create_link("g1", URL, "https://example.com").await.unwrap();

    publish(&pipeline, &event(URL, "v1", "1.2.3.4")).await;
    for event in read_without_handling(&pipeline, "c0", 10).await {
        pipeline.handler.handle(&event).await.unwrap();
    }
    let aggregator = pipeline.handler.writer().aggregator();
    assert_eq!(aggregator.cached_gid(URL).as_deref(), Some("g1"));

    // 链接换组后缓存里的 gid 已过期
    storage.change_link_group(URL, "g2").await.unwrap();

    publish(&pipeline, &event(URL, "v2", "5.6.7.8")).await;
    for event in read_without_handling(&pipeline, "c0", 10).await {
        pipeline.handler.handle(&event).await.unwrap();
    }

    assert_eq!(aggregator.cached_gid(URL).as_deref(), Some("g2"));
    let link = storage.find_link(URL).await.unwrap().unwrap();
    assert_eq!(link.gid, "g2");
    assert_eq!((link.total_pv, link.total_uv, link.total_uip), (2, 2, 2));
}

#[tokio::test]
async fn test_missing_link_still_records_rollups() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let pipeline = pipeline(&config).await;

    publish(&pipeline, &event("gone01", "v1", "1.2.3.4")).await;
    let events = read_without_handling(&pipeline, "c0", 10).await;
    assert_eq!(
        pipeline.handler.handle(&events[0]).await.unwrap(),
        HandleOutcome::Acked
    );

    assert_eq!(pipeline.storage.count_access_logs("gone01").await.unwrap(), 1);
    assert!(pipeline.storage.find_link("gone01").await.unwrap().is_none());
    assert_eq!(pending(&pipeline).await, 0);
}

#[tokio::test]
async fn test_undecodable_payload_stays_pending() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let pipeline = pipeline(&config).await;

    pipeline
        .backends
        .log
        .append(
            pipeline.keys.stream(),
            &[("statsRecord".to_string(), "{not json".to_string())],
        )
        .await
        .unwrap();
    let events = read_without_handling(&pipeline, "c0", 10).await;
    assert!(pipeline.handler.handle(&events[0]).await.is_err());
    assert_eq!(pending(&pipeline).await, 1);

    // 标记已释放，下一次投递仍会尝试处理而不是被当作进行中
    let err = pipeline.handler.handle(&events[0]).await.unwrap_err();
    assert!(!err.is_in_flight());
}

#[tokio::test]
async fn test_running_pipeline_drains_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.stream.consumer_count = 2;
    let pipeline = pipeline(&config).await;
    pipeline
        .storage
        .create_link("g1", URL, "https://example.com")
        .await
        .unwrap();

    let (notify, shutdown) = tokio::sync::watch::channel(false);
    let handles = pipeline.start(shutdown).await.unwrap();

    for i in 0..8 {
        publish(&pipeline, &event(URL, &format!("v{}", i % 4), "1.2.3.4")).await;
    }

    let storage = &pipeline.storage;
    let done = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if storage.count_access_logs(URL).await.unwrap() == 8 && pending(&pipeline).await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(done.is_ok(), "events were not consumed in time");

    let _ = notify.send(true);
    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        for handle in handles {
            handle.await.unwrap();
        }
    })
    .await;
    assert!(stopped.is_ok(), "background tasks ignored shutdown");
    pipeline.dispatcher.drain(Duration::from_secs(5)).await;

    let link = storage.find_link(URL).await.unwrap().unwrap();
    assert_eq!((link.total_pv, link.total_uv, link.total_uip), (8, 4, 1));
    assert_eq!(pipeline.dispatcher.stats().succeeded, 8);
}
