use futures::channel::mpsc::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ConnectError;
use crate::scale::transport::{NotificationStream, ScaleTransport};
use crate::scale::types::{BridgeMessage, RawNotification};

/// Forwards the notifications of one characteristic to a channel.
///
/// Values are sent as [`BridgeMessage::Notification`] in arrival order. When the notification
/// stream ends a single [`BridgeMessage::Closed`] follows. Stopping the bridge sends nothing.
pub struct CharacteristicBridge {
    characteristic: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CharacteristicBridge {
    /// Enables notifications on `characteristic` and starts forwarding them to `sender`.
    pub async fn open<T: ScaleTransport>(
        transport: &T,
        link: &T::Link,
        characteristic: Uuid,
        sender: Sender<BridgeMessage>,
        cancel: CancellationToken,
    ) -> Result<Self, ConnectError> {
        let stream = transport.subscribe(link, characteristic).await?;
        Ok(Self::start(characteristic, stream, sender, cancel))
    }

    pub fn start(characteristic: Uuid, stream: NotificationStream, sender: Sender<BridgeMessage>, cancel: CancellationToken) -> Self {
        let handle = forward_notifications_task(characteristic, stream, sender, cancel.clone());
        CharacteristicBridge { characteristic, cancel, handle }
    }

    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    /// Stops forwarding and waits for the task to finish.
    pub async fn stop(self) {
        self.cancel.cancel();

        if let Err(err) = self.handle.await {
            warn!("Notification task for {} did not stop cleanly: {:?}", self.characteristic, err);
        }
    }
}

fn forward_notifications_task(
    characteristic: Uuid,
    mut stream: NotificationStream,
    mut sender: Sender<BridgeMessage>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    spawn(async move {
        'mainloop: loop {
            let message = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                next = stream.next() => match next {
                    Some(value) => BridgeMessage::Notification(RawNotification { characteristic, value }),
                    None => {
                        info!("Notifications for {} ended", characteristic);
                        BridgeMessage::Closed { characteristic }
                    },
                },
            };
            let closed = matches!(message, BridgeMessage::Closed { .. });

            // a full channel must not keep the task alive after cancellation
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                result = sender.send(message) => {
                    if let Err(err) = result {
                        debug!("Notification receiver for {} is gone: {:?}", characteristic, err);
                        break 'mainloop;
                    }
                },
            }

            if closed {
                break 'mainloop;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::channel;
    use crate::scale::replay::{ReplayLink, ReplayTransport};

    fn characteristic() -> Uuid {
        Uuid::from_u128(0x2a98)
    }

    #[tokio::test]
    async fn test_forwards_in_order_then_reports_close() {
        let transport = ReplayTransport::with_scale("MI_SCALE", "AA:BB");
        let link = ReplayLink("AA:BB".to_string());
        let (sender, mut receiver) = channel(8);

        transport.push_notification(characteristic(), vec![1]);
        transport.push_notification(characteristic(), vec![2]);
        let bridge = CharacteristicBridge::open(&transport, &link, characteristic(), sender, CancellationToken::new())
            .await
            .unwrap();
        transport.push_notification(characteristic(), vec![3]);
        transport.drop_connection();

        let mut values = Vec::new();
        while let Some(message) = receiver.next().await {
            match message {
                BridgeMessage::Notification(notification) => values.push(notification.value),
                BridgeMessage::Closed { characteristic: closed } => {
                    assert_eq!(closed, characteristic());
                    break;
                },
            }
        }
        assert_eq!(values, vec![vec![1], vec![2], vec![3]]);

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_stop_sends_nothing() {
        let transport = ReplayTransport::with_scale("MI_SCALE", "AA:BB");
        let link = ReplayLink("AA:BB".to_string());
        let (sender, mut receiver) = channel(8);

        let bridge = CharacteristicBridge::open(&transport, &link, characteristic(), sender, CancellationToken::new())
            .await
            .unwrap();
        bridge.stop().await;

        // the only sender was dropped together with the task
        assert_eq!(receiver.next().await, None);
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_returned() {
        let transport = ReplayTransport::with_scale("MI_SCALE", "AA:BB");
        let link = ReplayLink("AA:BB".to_string());
        let (sender, _receiver) = channel(8);
        transport.fail_subscribe(characteristic(), ConnectError::TransportError { detail: "gatt".into() });

        let result = CharacteristicBridge::open(&transport, &link, characteristic(), sender, CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stop_while_channel_is_full() {
        let transport = ReplayTransport::with_scale("MI_SCALE", "AA:BB");
        let link = ReplayLink("AA:BB".to_string());
        let (sender, receiver) = channel(1);

        for value in 0..50u8 {
            transport.push_notification(characteristic(), vec![value]);
        }
        let bridge = CharacteristicBridge::open(&transport, &link, characteristic(), sender, CancellationToken::new())
            .await
            .unwrap();
        tokio::task::yield_now().await;

        // nobody reads, the task is parked on the full channel
        let stopped = tokio::time::timeout(std::time::Duration::from_secs(5), bridge.stop()).await;
        assert!(stopped.is_ok());
        drop(receiver);
    }
}
