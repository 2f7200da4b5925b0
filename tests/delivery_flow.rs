use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use relayq::broker::{Deliver, Delivery, DeliveryEngine, Handled, Message, NewMessage};
use relayq::config::QueueSettings;
use relayq::persistence::{SledStore, Store};
use relayq::utils::{DeliveryError, ManualClock};

const START: i64 = 1_700_000_000_000;

type Calls = Arc<Mutex<Vec<String>>>;

/// Records every recipient it is called with; `fail` decides which
/// attempts are refused.
fn recording_handler(
    calls: Calls,
    fail: impl Fn(&str, usize) -> bool + Send + Sync + 'static,
) -> Arc<dyn Deliver> {
    Arc::new(move |_channel: String, recipient: String, _payload: Value| {
        let attempt = {
            let mut calls = calls.lock().unwrap();
            calls.push(recipient.clone());
            calls.iter().filter(|r| **r == recipient).count()
        };
        let refused = fail(&recipient, attempt);
        async move {
            if refused {
                Err(DeliveryError::Rejected(format!("{recipient} busy")))
            } else {
                Ok(Delivery::Continue)
            }
        }
    })
}

fn never_answers() -> Arc<dyn Deliver> {
    Arc::new(|_channel: String, _recipient: String, _payload: Value| {
        futures::future::pending::<Result<Delivery, DeliveryError>>()
    })
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn rows(store: &SledStore) -> Vec<Message> {
    store.messages().unwrap()
}

#[tokio::test]
async fn failed_recipient_is_retried_after_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    let clock = ManualClock::new(START);
    let calls: Calls = Arc::default();

    let engine = DeliveryEngine::new(
        store.clone(),
        recording_handler(calls.clone(), |recipient, attempt| {
            recipient == "billing" && attempt == 1
        }),
        QueueSettings::default(),
    )
    .unwrap()
    .with_clock(Arc::new(clock.clone()));

    engine.subscribe("orders", "billing").await.unwrap();
    engine.subscribe("orders", "shipping").await.unwrap();
    assert!(engine.enqueue("orders", json!({ "order": 1 }), None).await.unwrap());

    wait_for(|| calls.lock().unwrap().len() == 1).await;
    wait_for(|| rows(&store).first().is_some_and(|m| !m.is_locked())).await;
    let row = &rows(&store)[0];
    assert_eq!(row.errors, 1);
    assert_eq!(row.recipients, ["shipping".to_string(), "billing".to_string()]);

    let report = engine.flush_queue().await.unwrap();
    assert_eq!(report.leased, 1);

    wait_for(|| calls.lock().unwrap().len() == 3).await;
    assert_eq!(*calls.lock().unwrap(), vec!["billing", "shipping", "billing"]);
    wait_for(|| rows(&store).is_empty()).await;
}

#[tokio::test]
async fn second_broker_reclaims_abandoned_lease() {
    let store = Arc::new(SledStore::temporary().unwrap());
    let clock = ManualClock::new(START);
    let settings = QueueSettings::default();

    let stalled = DeliveryEngine::new(store.clone(), never_answers(), settings.clone())
        .unwrap()
        .with_clock(Arc::new(clock.clone()));
    stalled.subscribe("orders", "billing").await.unwrap();
    stalled.subscribe("orders", "shipping").await.unwrap();
    assert!(stalled.enqueue("orders", json!("hi"), None).await.unwrap());

    let calls: Calls = Arc::default();
    let rescuer = DeliveryEngine::new(
        store.clone(),
        recording_handler(calls.clone(), |_, _| false),
        settings.clone(),
    )
    .unwrap()
    .with_clock(Arc::new(clock.clone()));

    // lease still live: nothing to do
    let report = rescuer.flush_queue().await.unwrap();
    assert_eq!(report.selected, 0);

    clock.advance(Duration::from_millis(
        (settings.timeout_ms + rescuer.policy().backoff(0) + 1) as u64,
    ));
    let report = rescuer.flush_queue().await.unwrap();
    assert_eq!(report.selected, 1);
    assert_eq!(report.leased, 1);

    wait_for(|| calls.lock().unwrap().len() == 2).await;
    assert_eq!(*calls.lock().unwrap(), vec!["shipping", "billing"]);
    wait_for(|| rows(&store).is_empty()).await;
}

#[tokio::test]
async fn competing_brokers_deliver_once() {
    let store = Arc::new(SledStore::temporary().unwrap());
    let clock = ManualClock::new(START);
    let calls: Calls = Arc::default();

    let engines: Vec<DeliveryEngine> = (0..4)
        .map(|_| {
            DeliveryEngine::new(
                store.clone(),
                recording_handler(calls.clone(), |_, _| false),
                QueueSettings::default(),
            )
            .unwrap()
            .with_clock(Arc::new(clock.clone()))
        })
        .collect();

    let id = store
        .insert_message(NewMessage {
            channel: "orders".to_string(),
            payload: json!("hi"),
            recipients: ["billing".to_string()].into(),
            ttl: 3,
            enqueued_at: START,
        })
        .await
        .unwrap();
    let snapshot = store.get_message(id).await.unwrap().unwrap();

    let outcomes = futures::future::join_all(
        engines
            .iter()
            .map(|engine| engine.handle_message(snapshot.clone())),
    )
    .await;

    let leased = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(Handled::Leased)))
        .count();
    assert_eq!(leased, 1);
    assert!(
        outcomes
            .iter()
            .all(|o| matches!(o, Ok(Handled::Leased) | Ok(Handled::Missed)))
    );

    wait_for(|| rows(&store).is_empty()).await;
    assert_eq!(*calls.lock().unwrap(), vec!["billing"]);
}
