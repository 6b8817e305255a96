//! End-to-end behaviour of a session against the simulated backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use spi_sim_client::backend::endpoints;
use spi_sim_client::backend::mock::{MockBackend, MockFault};
use spi_sim_client::device::ConfigField;
use spi_sim_client::driver::DriverRunState;
use spi_sim_client::error::ClientError;
use spi_sim_client::session::Session;
use spi_sim_client::settings::ClientSettings;

fn session() -> (Arc<MockBackend>, Session) {
    let mock = Arc::new(MockBackend::new());
    let session = Session::new(ClientSettings::default(), mock.clone());
    (mock, session)
}

#[tokio::test]
async fn operator_workflow_round_trip() {
    let (mock, session) = session();

    session.config().update(ConfigField::DevicePath, "/dev/spidev0.0").await;
    session.save_config().await;
    assert_eq!(
        mock.config().unwrap()["device_name"],
        json!("spidev0.0")
    );

    session.sequences().add("9F", "EF 40 18").await.unwrap();
    session.sequences().add("05", "00").await.unwrap();
    session.start_driver().await.unwrap();
    assert_eq!(session.run_state(), DriverRunState::Running);

    let exchange = session.send_command("9f").await.unwrap().unwrap();
    assert_eq!(exchange.response_hex, "ef 40 18");

    let sent = mock.requests_to(endpoints::COMMAND);
    assert_eq!(sent[0].body.as_ref().unwrap()["device_path"], json!("/dev/spidev0.0"));

    session.stop_driver().await.unwrap();
    assert_eq!(session.run_state(), DriverRunState::Stopped);
    assert!(!mock.driver_loaded());
}

#[tokio::test]
async fn write_through_keeps_client_and_backend_equal() {
    let (mock, session) = session();
    let store = session.sequences();

    let mut ids = Vec::new();
    for i in 0..6u8 {
        let entry = store
            .add(&format!("{i:02X}"), &format!("{:02X}", i + 0x10))
            .await
            .unwrap();
        ids.push(entry.id);
    }
    for id in [&ids[1], &ids[4], &ids[0]] {
        store.remove(id).await.unwrap();
    }
    store.add("FF", "EE").await.unwrap();

    let local: Vec<_> = store.entries().await.iter().map(|e| e.payload()).collect();
    assert_eq!(local, mock.sequences());
    assert_eq!(local.len(), 4);
}

#[tokio::test]
async fn device_busy_on_start_surfaces_message() {
    let (mock, session) = session();
    mock.inject(
        endpoints::LOAD_DRIVER,
        MockFault::Status(500, Some(json!({"message": "device busy"}))),
    );

    let err = session.start_driver().await.unwrap_err();
    assert_eq!(err.to_string(), "device busy");
    assert!(err.is_backend_failure());
    assert_eq!(session.run_state(), DriverRunState::Stopped);
}

#[tokio::test]
async fn invalid_config_blocks_start_locally() {
    let (mock, session) = session();
    session.config().update(ConfigField::ClockSpeed, "fast").await;

    assert!(matches!(
        session.start_driver().await,
        Err(ClientError::Validation(_))
    ));
    assert!(mock.requests_to(endpoints::LOAD_DRIVER).is_empty());
}

#[tokio::test(start_paused = true)]
async fn pollers_feed_logs_and_reconcile_state() {
    let (mock, session) = session();
    session.start_driver().await.unwrap();
    let mut state = session.driver().subscribe();

    session.start_pollers().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(session.status().snapshot().await.is_some());
    assert_eq!(mock.requests_to(endpoints::SYSTEM_STATUS).len(), 1);

    mock.set_logs(["boot ok", "cmd received"]);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let view: Vec<_> = session
        .logs()
        .entries()
        .await
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(view, ["boot ok", "cmd received"]);

    // Driver vanishes behind the client's back.
    mock.set_driver_loaded(false);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.run_state(), DriverRunState::Stopped);
    state.changed().await.unwrap();
    assert_eq!(*state.borrow_and_update(), DriverRunState::Stopped);

    session.shutdown().await;
    let polls = mock.requests_to(endpoints::SYSTEM_STATUS).len();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.requests_to(endpoints::SYSTEM_STATUS).len(), polls);
}

#[tokio::test(start_paused = true)]
async fn status_failures_do_not_touch_run_state() {
    let (mock, session) = session();
    session.start_driver().await.unwrap();
    mock.set_driver_loaded(false);
    mock.inject(endpoints::SYSTEM_STATUS, MockFault::Transport("down".into()));

    session.start_pollers().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(session.run_state(), DriverRunState::Running);
    assert!(session.status().snapshot().await.is_none());

    // The next scheduled tick is the only retry.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.run_state(), DriverRunState::Stopped);
    session.shutdown().await;
}
