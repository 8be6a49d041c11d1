use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::rstest;
use tokio::time::{sleep, timeout};
use tokio_stream::StreamExt;
use uuid::uuid;

use sensorlink::{
    CLIENT_CONFIG_DESCRIPTOR_UUID, ConnectionManager, ConnectionState, DriverCall, EventStream,
    FakeDriver, FakeDriverConfig, FakeNotifyMode, HandleId, SENSOR_CHARACTERISTIC_UUID, ScanFixture,
    SensorEvent, SensorPayload,
};

const SENSOR_FIXTURE: &str = "ED:2A:4E:FD:81:0E|Sensor|-43";
const WAIT: Duration = Duration::from_secs(5);

const FIRST_PAYLOAD: [u8; 6] = [0x10, 0x00, 0x20, 0x00, 0x00, 0x04];
const SECOND_PAYLOAD: [u8; 6] = [0x12, 0x00, 0x1E, 0x00, 0xFE, 0x03];

fn sensor_fixture() -> ScanFixture {
    SENSOR_FIXTURE.parse().expect("fixture parses")
}

fn build_driver(config: FakeDriverConfig) -> Arc<FakeDriver> {
    Arc::new(FakeDriver::new(config))
}

fn sensor_driver() -> Arc<FakeDriver> {
    build_driver(FakeDriverConfig::builder().scan_fixture(sensor_fixture()).build())
}

async fn next_events(events: &mut EventStream, count: usize) -> Vec<SensorEvent> {
    timeout(WAIT, events.take(count).collect::<Vec<_>>())
        .await
        .expect("events should arrive in time")
}

/// Lets the completion loop drain whatever the fake driver posted.
async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

fn payload(bytes: &[u8]) -> SensorEvent {
    SensorEvent::success(SensorPayload::connected(bytes.to_vec()))
}

fn negotiation_events() -> Vec<SensorEvent> {
    vec![
        SensorEvent::loading("Scanning..."),
        SensorEvent::loading("Connecting to device..."),
        SensorEvent::loading("Discovering services..."),
        SensorEvent::loading("Adjusting transport size..."),
    ]
}

fn streaming_events() -> Vec<SensorEvent> {
    let mut events = negotiation_events();
    events.push(payload(&FIRST_PAYLOAD));
    events.push(payload(&SECOND_PAYLOAD));
    events
}

fn address() -> sensorlink::DeviceAddress {
    "ED:2A:4E:FD:81:0E".parse().expect("address parses")
}

#[tokio::test(start_paused = true)]
async fn happy_path_reports_progress_then_streams_payloads() {
    let driver = sensor_driver();
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();

    manager.start().await;

    assert_eq!(streaming_events(), next_events(&mut events, 6).await);
    assert_eq!(ConnectionState::Connected, manager.connection_state());
    let handle = HandleId::new(1);
    assert_eq!(
        vec![
            DriverCall::StartScan,
            DriverCall::StopScan,
            DriverCall::Connect { address: address() },
            DriverCall::DiscoverServices { handle },
            DriverCall::RequestMtu { handle, mtu: 517 },
            DriverCall::SetNotifications {
                characteristic: SENSOR_CHARACTERISTIC_UUID,
                enabled: true,
            },
            DriverCall::WriteDescriptor {
                descriptor: CLIENT_CONFIG_DESCRIPTOR_UUID,
                value: vec![0x01, 0x00],
            },
        ],
        driver.calls()
    );

    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn repeated_scan_results_connect_only_once() {
    let driver = Arc::new(FakeDriver::new(
        FakeDriverConfig::builder()
            .scan_fixture(
                "AA:BB:CC:DD:EE:FF|Other|-70;ED:2A:4E:FD:81:0E|Sensor|-43;ED:2A:4E:FD:81:0E|Sensor|-41"
                    .parse()
                    .expect("fixture parses"),
            )
            .build(),
    ));
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();

    manager.start().await;
    let received = next_events(&mut events, 6).await;
    settle().await;

    assert_eq!(streaming_events(), received);
    let connects = driver
        .calls()
        .into_iter()
        .filter(|call| matches!(call, DriverCall::Connect { .. }))
        .count();
    assert_eq!(1, connects);
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_each_attempt_then_fail() {
    let driver = build_driver(
        FakeDriverConfig::builder()
            .scan_fixture(sensor_fixture())
            .connect_failures(6)
            .build(),
    );
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();

    manager.start().await;

    let mut expected = vec![
        SensorEvent::loading("Scanning..."),
        SensorEvent::loading("Connecting to device..."),
    ];
    for attempt in 1..=5 {
        expected.push(SensorEvent::loading(format!(
            "Attempting to connect {attempt}/5"
        )));
        expected.push(SensorEvent::loading("Scanning..."));
        expected.push(SensorEvent::loading("Connecting to device..."));
    }
    expected.push(SensorEvent::error("Could not connect to device"));

    assert_eq!(expected, next_events(&mut events, expected.len()).await);
    settle().await;
    assert_eq!(ConnectionState::Uninitialized, manager.connection_state());
    let connects = driver
        .calls()
        .into_iter()
        .filter(|call| matches!(call, DriverCall::Connect { .. }))
        .count();
    assert_eq!(6, connects);
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn failures_within_budget_still_reach_streaming() {
    let driver = build_driver(
        FakeDriverConfig::builder()
            .scan_fixture(sensor_fixture())
            .connect_failures(2)
            .build(),
    );
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();

    manager.start().await;
    let received = next_events(&mut events, 12).await;

    assert_eq!(
        SensorEvent::loading("Attempting to connect 2/5"),
        received[5]
    );
    assert_eq!(payload(&SECOND_PAYLOAD), received[11]);
    assert_eq!(ConnectionState::Connected, manager.connection_state());
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn only_the_sensor_characteristic_is_relayed() {
    let driver = sensor_driver();
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();
    manager.start().await;
    next_events(&mut events, 6).await;

    driver.notify_characteristic(uuid!("00002a37-0000-1000-8000-00805f9b34fb"), &[0xFF]);
    driver.notify(&[0x01, 0x00, 0x02, 0x00, 0x03, 0x00]);
    driver.notify(&[0x04, 0x00, 0x05, 0x00, 0x06, 0x00]);

    assert_eq!(
        vec![
            payload(&[0x01, 0x00, 0x02, 0x00, 0x03, 0x00]),
            payload(&[0x04, 0x00, 0x05, 0x00, 0x06, 0x00]),
        ],
        next_events(&mut events, 2).await
    );
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn peer_disconnect_publishes_one_disconnected_payload() {
    let driver = sensor_driver();
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();
    manager.start().await;
    next_events(&mut events, 6).await;

    driver.peer_disconnect();

    assert_eq!(
        vec![SensorEvent::success(SensorPayload::disconnected())],
        next_events(&mut events, 1).await
    );
    settle().await;
    assert_eq!(ConnectionState::Disconnected, manager.connection_state());
    assert_eq!(
        Some(DriverCall::CloseHandle {
            handle: HandleId::new(1)
        }),
        driver.calls().last().cloned()
    );

    let calls_before_close = driver.calls().len();
    manager.close().await;
    assert_eq!(calls_before_close, driver.calls().len());
}

#[tokio::test(start_paused = true)]
async fn link_loss_counts_as_a_failed_attempt() {
    let driver = sensor_driver();
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();
    manager.start().await;
    next_events(&mut events, 6).await;

    driver.drop_link();

    let mut expected = vec![SensorEvent::loading("Attempting to connect 1/5")];
    expected.extend(streaming_events());
    assert_eq!(expected, next_events(&mut events, expected.len()).await);
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_during_negotiation_releases_subscription_and_handle() {
    let driver = build_driver(
        FakeDriverConfig::builder()
            .scan_fixture(sensor_fixture())
            .notify_mode(FakeNotifyMode::None)
            .build(),
    );
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();
    manager.start().await;

    assert_eq!(negotiation_events(), next_events(&mut events, 4).await);
    settle().await;
    assert_eq!(ConnectionState::Initializing, manager.connection_state());

    manager.close().await;

    let calls = driver.calls();
    let handle = HandleId::new(1);
    assert_eq!(
        vec![
            DriverCall::SetNotifications {
                characteristic: SENSOR_CHARACTERISTIC_UUID,
                enabled: false,
            },
            DriverCall::WriteDescriptor {
                descriptor: CLIENT_CONFIG_DESCRIPTOR_UUID,
                value: vec![0x00, 0x00],
            },
            DriverCall::CloseHandle { handle },
        ],
        calls[calls.len() - 3..].to_vec()
    );
    assert_eq!(ConnectionState::Disconnected, manager.connection_state());
}

#[tokio::test(start_paused = true)]
async fn missing_characteristic_fails_without_subscribing() {
    let driver = build_driver(
        FakeDriverConfig::builder()
            .scan_fixture(sensor_fixture())
            .missing_characteristic(true)
            .build(),
    );
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();
    manager.start().await;

    let mut expected = negotiation_events();
    expected.push(SensorEvent::error("Could not find sensor publisher"));
    assert_eq!(expected, next_events(&mut events, 5).await);
    assert!(
        !driver
            .calls()
            .iter()
            .any(|call| matches!(call, DriverCall::SetNotifications { .. }))
    );
    manager.close().await;
}

#[rstest]
#[case::notify_only(FakeNotifyMode::Notify, [0x01, 0x00])]
#[case::indicate_only(FakeNotifyMode::Indicate, [0x02, 0x00])]
#[case::indication_preferred(FakeNotifyMode::Both, [0x02, 0x00])]
#[tokio::test(start_paused = true)]
async fn descriptor_value_follows_characteristic_properties(
    #[case] notify_mode: FakeNotifyMode,
    #[case] expected: [u8; 2],
) {
    let driver = build_driver(
        FakeDriverConfig::builder()
            .scan_fixture(sensor_fixture())
            .notify_mode(notify_mode)
            .build(),
    );
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();
    manager.start().await;
    next_events(&mut events, 6).await;

    assert!(driver.calls().contains(&DriverCall::WriteDescriptor {
        descriptor: CLIENT_CONFIG_DESCRIPTOR_UUID,
        value: expected.to_vec(),
    }));
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn restart_disconnects_then_scans_again() {
    let driver = sensor_driver();
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();
    manager.start().await;
    next_events(&mut events, 6).await;

    manager.restart().await;

    let mut expected = vec![SensorEvent::success(SensorPayload::disconnected())];
    expected.extend(streaming_events());
    assert_eq!(expected, next_events(&mut events, expected.len()).await);
    assert_eq!(Some(HandleId::new(2)), driver.latest_handle());
    manager.close().await;
}

fn scan_count(driver: &FakeDriver) -> usize {
    driver
        .calls()
        .into_iter()
        .filter(|call| matches!(call, DriverCall::StartScan))
        .count()
}

#[tokio::test(start_paused = true)]
async fn restart_interrupted_by_link_loss_does_not_linger() {
    let driver = sensor_driver();
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();
    manager.start().await;
    next_events(&mut events, 6).await;

    driver.drop_link();
    manager.restart().await;

    let mut expected = vec![SensorEvent::loading("Attempting to connect 1/5")];
    expected.extend(streaming_events());
    assert_eq!(expected, next_events(&mut events, expected.len()).await);
    assert_eq!(Some(HandleId::new(2)), driver.latest_handle());

    driver.peer_disconnect();

    assert_eq!(
        vec![SensorEvent::success(SensorPayload::disconnected())],
        next_events(&mut events, 1).await
    );
    settle().await;
    assert_eq!(2, scan_count(&driver));
    assert_eq!(ConnectionState::Disconnected, manager.connection_state());
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_on_a_streaming_link_does_not_rescan() {
    let driver = sensor_driver();
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();
    manager.start().await;
    next_events(&mut events, 6).await;

    manager.disconnect().await;

    assert_eq!(
        vec![SensorEvent::success(SensorPayload::disconnected())],
        next_events(&mut events, 1).await
    );
    settle().await;
    let handle = HandleId::new(1);
    let calls = driver.calls();
    assert!(calls.contains(&DriverCall::Disconnect { handle }));
    assert_eq!(Some(&DriverCall::CloseHandle { handle }), calls.last());
    assert_eq!(1, scan_count(&driver));
    assert_eq!(ConnectionState::Disconnected, manager.connection_state());
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_without_a_connection_is_a_no_op() {
    let driver = sensor_driver();
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();

    manager.disconnect().await;
    settle().await;

    assert_eq!(Vec::<DriverCall>::new(), driver.calls());
    assert_eq!(ConnectionState::Uninitialized, manager.connection_state());

    manager.start().await;
    assert_eq!(streaming_events(), next_events(&mut events, 6).await);
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_reuses_the_current_handle() {
    let driver = sensor_driver();
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();
    manager.start().await;
    next_events(&mut events, 6).await;

    manager.reconnect().await;

    assert_eq!(
        vec![
            SensorEvent::loading("Discovering services..."),
            SensorEvent::loading("Adjusting transport size..."),
            payload(&FIRST_PAYLOAD),
            payload(&SECOND_PAYLOAD),
        ],
        next_events(&mut events, 4).await
    );
    assert!(driver.calls().contains(&DriverCall::Reconnect {
        handle: HandleId::new(1)
    }));
    manager.close().await;
}

#[tokio::test(start_paused = true)]
#[should_panic(expected = "called after the connection manager was closed")]
async fn reconnect_after_close_is_an_invariant_violation() {
    let manager = ConnectionManager::new(sensor_driver());
    manager.close().await;

    manager.reconnect().await;
}

#[tokio::test(start_paused = true)]
async fn calls_after_close_are_ignored() {
    let driver = sensor_driver();
    let manager = ConnectionManager::new(driver.clone());
    manager.close().await;
    manager.close().await;

    manager.start().await;
    manager.disconnect().await;
    manager.restart().await;

    assert_eq!(Vec::<DriverCall>::new(), driver.calls());
}

#[tokio::test(start_paused = true)]
async fn completions_for_released_handles_are_dropped() {
    let driver = build_driver(
        FakeDriverConfig::builder()
            .scan_fixture(sensor_fixture())
            .connect_failures(1)
            .build(),
    );
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();
    manager.start().await;
    next_events(&mut events, 9).await;
    assert_eq!(Some(HandleId::new(2)), driver.latest_handle());

    let callbacks = driver.callbacks().expect("manager attached callbacks");
    callbacks.characteristic_changed(HandleId::new(1), SENSOR_CHARACTERISTIC_UUID, vec![0xEE]);
    driver.notify(&[0x0A, 0x00, 0x0B, 0x00, 0x0C, 0x00]);

    assert_eq!(
        vec![payload(&[0x0A, 0x00, 0x0B, 0x00, 0x0C, 0x00])],
        next_events(&mut events, 1).await
    );
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_scan_is_reported_as_error() {
    let driver = build_driver(
        FakeDriverConfig::builder()
            .scan_fixture(sensor_fixture())
            .reject_scan(true)
            .build(),
    );
    let manager = ConnectionManager::new(driver.clone());
    let mut events = manager.subscribe();

    manager.start().await;

    assert_eq!(
        vec![
            SensorEvent::loading("Scanning..."),
            SensorEvent::error("Could not start scanning"),
        ],
        next_events(&mut events, 2).await
    );
    assert_eq!(ConnectionState::Uninitialized, manager.connection_state());
    manager.close().await;
    assert_eq!(vec![DriverCall::StartScan], driver.calls());
}

#[tokio::test(start_paused = true)]
async fn late_subscribers_only_see_new_events() {
    let driver = sensor_driver();
    let manager = ConnectionManager::new(driver.clone());
    let mut early = manager.subscribe();
    manager.start().await;
    next_events(&mut early, 6).await;

    let mut late = manager.subscribe();
    driver.notify(&FIRST_PAYLOAD);

    assert_eq!(vec![payload(&FIRST_PAYLOAD)], next_events(&mut late, 1).await);
    assert_eq!(vec![payload(&FIRST_PAYLOAD)], next_events(&mut early, 1).await);
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn connection_state_watchers_observe_streaming() {
    let manager = ConnectionManager::new(sensor_driver());
    let mut state = manager.watch_connection_state();
    assert_eq!(ConnectionState::Uninitialized, *state.borrow());

    manager.start().await;

    timeout(
        WAIT,
        state.wait_for(|current| *current == ConnectionState::Connected),
    )
    .await
    .expect("state should change in time")
    .expect("state sender is alive");
    manager.close().await;
    assert_eq!(ConnectionState::Disconnected, manager.connection_state());
}
