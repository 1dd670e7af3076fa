//! Turn the poll-only automation API into push-style streams.
//!
//! Each listener owns a background task that sleeps, polls, and emits.
//! Both returned receivers close together when the task ends, either
//! because `stop` fired or because a poll failed (the error is delivered
//! on the error receiver first).

use crate::{error::WaircError, signal::Signal, traits::WhatsApp, whatsapp::MessageRecord};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::debug;

const MESSAGE_BUFFER: usize = 16;

/// Stream of newly arrived messages, each poll's batch ordered by timestamp.
pub fn listen_for_messages(
    whatsapp: Arc<dyn WhatsApp>,
    interval: Duration,
    stop: Signal,
) -> (mpsc::Receiver<MessageRecord>, mpsc::Receiver<WaircError>) {
    let (msg_tx, msg_rx) = mpsc::channel(MESSAGE_BUFFER);
    let (err_tx, err_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.fired() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            let mut batch = match whatsapp.new_messages().await {
                Ok(batch) => batch,
                Err(e) => {
                    let _ = err_tx.send(e).await;
                    return;
                }
            };
            batch.sort_by_key(|m| m.timestamp);

            for msg in batch {
                tokio::select! {
                    _ = stop.fired() => return,
                    sent = msg_tx.send(msg) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });

    (msg_rx, err_rx)
}

/// Stream of login-state changes. The first poll sets the baseline and is
/// not emitted.
pub fn listen_logged_in(
    whatsapp: Arc<dyn WhatsApp>,
    interval: Duration,
    stop: Signal,
) -> (mpsc::Receiver<bool>, mpsc::Receiver<WaircError>) {
    let (state_tx, state_rx) = mpsc::channel(1);
    let (err_tx, err_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut previous: Option<bool> = None;
        loop {
            tokio::select! {
                _ = stop.fired() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            let logged_in = match whatsapp.logged_in().await {
                Ok(v) => v,
                Err(e) => {
                    let _ = err_tx.send(e).await;
                    return;
                }
            };

            if previous.is_some_and(|p| p != logged_in) {
                debug!("login state changed to {logged_in}");
                tokio::select! {
                    _ = stop.fired() => return,
                    sent = state_tx.send(logged_in) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            previous = Some(logged_in);
        }
    });

    (state_rx, err_rx)
}
