#[path = "../src/test_support.rs"]
mod test_support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use skymerge::{CategoryKey, EngineConfig, KeyFilter, KeyRequest, Period, Skymerge};
use test_support::{forecast_document, station_payload};

fn key(text: &str) -> CategoryKey {
    CategoryKey::parse(text).expect("valid key")
}

#[tokio::test(start_paused = true)]
async fn change_batches_debounce_and_deduplicate() -> anyhow::Result<()> {
    let (engine, station, _) = test_support::two_source_engine();
    engine.start();

    let events = Arc::new(AtomicUsize::new(0));
    {
        let events = Arc::clone(&events);
        engine.on_change(KeyFilter::All, move |_| {
            events.fetch_add(1, Ordering::SeqCst);
        });
    }

    let now = skymerge::now_timestamp();
    // Two rapid polls inside one debounce window
    engine.ingest(&station, Period::Now, &station_payload(now, 20.0, 50.0))?;
    engine.ingest(&station, Period::Now, &station_payload(now + 30, 20.5, 51.0))?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(events.load(Ordering::SeqCst), 0, "window still open");

    tokio::time::sleep(Duration::from_millis(150)).await;
    // Nine keys touched twice each, delivered once each
    assert_eq!(events.load(Ordering::SeqCst), 9);
    let stats = engine.stats();
    assert_eq!(stats.dispatch.batches_delivered, 1);
    assert_eq!(stats.dispatch.events_delivered, 9);

    engine.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn subtree_filters_scope_delivery() -> anyhow::Result<()> {
    let (engine, station, _) = test_support::two_source_engine();
    engine.start();

    let wind_events = Arc::new(AtomicUsize::new(0));
    {
        let wind_events = Arc::clone(&wind_events);
        engine.on_change(KeyFilter::Subtree(key("environment.wind")), move |event| {
            assert!(event.key().as_str().starts_with("environment.wind"));
            wind_events.fetch_add(1, Ordering::SeqCst);
        });
    }

    engine.ingest(
        &station,
        Period::Now,
        &station_payload(skymerge::now_timestamp(), 20.0, 50.0),
    )?;
    tokio::time::sleep(Duration::from_millis(250)).await;

    // speed, gust, direction
    assert_eq!(wind_events.load(Ordering::SeqCst), 3);

    engine.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn monitors_notify_requesters_when_keys_appear() -> anyhow::Result<()> {
    let (engine, station, _) = test_support::two_source_engine();
    engine.start();

    let notified = Arc::new(AtomicUsize::new(0));
    let subscriber = {
        let notified = Arc::clone(&notified);
        // The filter matches pressure only; the monitor must reach past it
        engine.on_change(
            KeyFilter::Exact(key("environment.pressure.pressure")),
            move |event| {
                if event.key().as_str() == "environment.temperature.temperature" {
                    notified.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
    };

    let temperature = key("environment.temperature.temperature");
    let request = engine.request_key_with(&temperature, subscriber, false);
    assert!(matches!(request, KeyRequest::Pending));
    assert_eq!(engine.stats().dispatch.pending_monitors, 1);

    engine.ingest(
        &station,
        Period::Now,
        &station_payload(skymerge::now_timestamp(), 18.0, 45.0),
    )?;
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().dispatch.pending_monitors, 0);
    assert_eq!(engine.stats().dispatch.monitors_satisfied, 1);

    // Re-requesting now reports ready instead of re-arming the monitor
    assert!(matches!(
        engine.request_key(&temperature),
        KeyRequest::Ready(_)
    ));
    assert_eq!(engine.stats().dispatch.pending_monitors, 0);

    engine.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn forecast_monitors_wait_for_a_curve() -> anyhow::Result<()> {
    let (engine, station, forecast) = test_support::two_source_engine();
    engine.start();

    let notified = Arc::new(AtomicUsize::new(0));
    let subscriber = {
        let notified = Arc::clone(&notified);
        engine.on_change(KeyFilter::Exact(key("no.filter.match")), move |_| {
            notified.fetch_add(1, Ordering::SeqCst);
        })
    };

    let temperature = key("environment.temperature.temperature");
    assert!(matches!(
        engine.request_key_with(&temperature, subscriber, true),
        KeyRequest::Pending
    ));

    // A realtime value alone does not satisfy a forecast-required request
    engine.ingest(
        &station,
        Period::Now,
        &station_payload(skymerge::now_timestamp(), 18.0, 45.0),
    )?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(notified.load(Ordering::SeqCst), 0);
    assert_eq!(engine.stats().dispatch.pending_monitors, 1);

    let hourly_only = serde_json::json!({
        "hourly": forecast_document(skymerge::now_timestamp(), 4)["hourly"]
    });
    engine.ingest_document(&forecast, &hourly_only)?;
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().dispatch.pending_monitors, 0);

    engine.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn monitors_expire_after_the_attempt_budget() -> anyhow::Result<()> {
    let config = EngineConfig {
        monitor_sweep_secs: 1,
        monitor_max_attempts: 2,
        ..EngineConfig::default()
    };
    let engine = Skymerge::with_config(config)?;
    engine.start();

    let never = key("environment.absent.absent");
    assert!(matches!(engine.request_key(&never), KeyRequest::Pending));
    assert_eq!(engine.stats().dispatch.pending_monitors, 1);

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(engine.stats().dispatch.pending_monitors, 0);
    assert_eq!(engine.stats().dispatch.monitors_expired, 1);

    engine.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_flushes_buffered_notifications() -> anyhow::Result<()> {
    let (engine, station, _) = test_support::two_source_engine();
    engine.start();

    let events = Arc::new(AtomicUsize::new(0));
    {
        let events = Arc::clone(&events);
        engine.on_change(KeyFilter::All, move |_| {
            events.fetch_add(1, Ordering::SeqCst);
        });
    }

    engine.ingest(
        &station,
        Period::Now,
        &station_payload(skymerge::now_timestamp(), 20.0, 50.0),
    )?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(events.load(Ordering::SeqCst), 0, "window still open");

    engine.stop();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(events.load(Ordering::SeqCst), 9);

    Ok(())
}
