//! Session events delivered to subscribers.
//!
//! Every subscriber gets its own unbounded queue, so events arrive in order
//! and none are dropped while the subscriber lags. Consumers match on
//! content (for example a `txhash`) rather than on position.

use bitcoin::Txid;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

use satchel_wallet_core::FeeEstimates;

use crate::settings::Settings;
use crate::twofactor::TwoFactorConfig;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Block { block_height: u32 },
    Fees { fees: FeeEstimates },
    Transaction { txhash: Txid, subaccounts: Vec<u32> },
    Settings { settings: Settings },
    #[serde(rename = "twofactor")]
    TwoFactor { config: TwoFactorConfig },
    Subaccount { pointer: u32, is_dirty: bool },
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct Notifications {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Notifications {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Notification>) -> Self {
        Self { rx }
    }

    /// The next event if one is ready. `None` is the normal "nothing yet".
    pub fn try_next(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next event. `None` once the session is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Wait up to `timeout` for an event matching `predicate`, skipping
    /// others.
    pub async fn wait_for<F>(&mut self, timeout: Duration, mut predicate: F) -> Option<Notification>
    where
        F: FnMut(&Notification) -> bool,
    {
        tokio::time::timeout(timeout, async {
            while let Some(event) = self.rx.recv().await {
                if predicate(&event) {
                    return Some(event);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }
}

/// The actor's side: fans events out to every live subscriber.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    senders: Vec<mpsc::UnboundedSender<Notification>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&mut self) -> Notifications {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push(tx);
        Notifications::new(rx)
    }

    pub(crate) fn emit(&mut self, event: Notification) {
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_events_in_order() {
        let mut subscribers = Subscribers::default();
        let mut a = subscribers.subscribe();
        let mut b = subscribers.subscribe();
        subscribers.emit(Notification::Block { block_height: 1 });
        subscribers.emit(Notification::Block { block_height: 2 });
        for rx in [&mut a, &mut b] {
            assert_eq!(rx.try_next(), Some(Notification::Block { block_height: 1 }));
            assert_eq!(rx.try_next(), Some(Notification::Block { block_height: 2 }));
            assert_eq!(rx.try_next(), None);
        }
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let mut subscribers = Subscribers::default();
        let a = subscribers.subscribe();
        drop(a);
        subscribers.emit(Notification::Block { block_height: 1 });
        assert!(subscribers.senders.is_empty());
    }

    #[tokio::test]
    async fn wait_for_skips_non_matching() {
        let mut subscribers = Subscribers::default();
        let mut rx = subscribers.subscribe();
        subscribers.emit(Notification::Block { block_height: 1 });
        subscribers.emit(Notification::Subaccount {
            pointer: 0,
            is_dirty: false,
        });
        let found = rx
            .wait_for(Duration::from_millis(50), |n| matches!(n, Notification::Subaccount { .. }))
            .await;
        assert!(found.is_some());
        assert_eq!(rx.try_next(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_times_out() {
        let mut subscribers = Subscribers::default();
        let mut rx = subscribers.subscribe();
        let found = rx.wait_for(Duration::from_secs(1), |_| true).await;
        assert!(found.is_none());
        drop(subscribers);
    }

    #[test]
    fn serializes_with_event_tag() {
        let json = serde_json::to_value(Notification::Block { block_height: 7 }).unwrap();
        assert_eq!(json, serde_json::json!({"event": "block", "block_height": 7}));
    }
}
