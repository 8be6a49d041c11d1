use tracing::trace;
use uuid::Uuid;

use crate::event::{EventChannel, SensorPayload, StatusEvent};

/// Republishes changes of the subscribed characteristic as events.
#[derive(Debug, Default)]
pub(crate) struct NotificationRelay {
    subscribed: Option<Uuid>,
}

impl NotificationRelay {
    pub(crate) fn subscribe(&mut self, characteristic: Uuid) {
        self.subscribed = Some(characteristic);
    }

    pub(crate) fn clear(&mut self) {
        self.subscribed = None;
    }

    /// Emits a `Success` event when `characteristic` is the subscribed one.
    pub(crate) fn forward(&self, events: &EventChannel, characteristic: Uuid, value: Vec<u8>) -> bool {
        if self.subscribed != Some(characteristic) {
            trace!(%characteristic, "ignoring change on unsubscribed characteristic");
            return false;
        }

        events.emit(StatusEvent::success(SensorPayload::connected(value)));
        true
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::event::SensorEvent;
    use crate::protocol::SENSOR_CHARACTERISTIC_UUID;

    #[tokio::test]
    async fn forwards_only_the_subscribed_characteristic_in_order() {
        let events = EventChannel::new();
        let mut stream = events.subscribe();
        let mut relay = NotificationRelay::default();
        relay.subscribe(SENSOR_CHARACTERISTIC_UUID);

        assert!(relay.forward(&events, SENSOR_CHARACTERISTIC_UUID, vec![1, 2]));
        assert!(!relay.forward(&events, Uuid::nil(), vec![9]));
        assert!(relay.forward(&events, SENSOR_CHARACTERISTIC_UUID, vec![3]));
        drop(events);

        let received: Vec<SensorEvent> = (&mut stream).collect().await;
        assert_eq!(
            vec![
                StatusEvent::success(SensorPayload::connected(vec![1, 2])),
                StatusEvent::success(SensorPayload::connected(vec![3])),
            ],
            received
        );
    }

    #[test]
    fn cleared_relay_forwards_nothing() {
        let events = EventChannel::new();
        let mut relay = NotificationRelay::default();
        relay.subscribe(SENSOR_CHARACTERISTIC_UUID);
        relay.clear();

        assert!(!relay.forward(&events, SENSOR_CHARACTERISTIC_UUID, vec![1]));
    }
}
