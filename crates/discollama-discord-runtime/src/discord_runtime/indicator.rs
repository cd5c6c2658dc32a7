//! Best-effort "working" signal shown while a turn waits for its first chunk.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, sleep, Instant, MissedTickBehavior},
};

use super::chat_surface::{ChatSurface, MessageHandle};

pub const THINKING_REACTION: &str = "🤔";
pub const DEFAULT_INDICATOR_TIMEOUT: Duration = Duration::from_secs(999);
/// Discord drops a typing signal after roughly ten seconds.
pub const TYPING_REFRESH_INTERVAL: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorExit {
    Cancelled,
    TimedOut,
}

/// Handle to a running indicator task.
pub struct IndicatorHandle {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<IndicatorExit>,
}

impl IndicatorHandle {
    /// Starts reacting and typing on `target` until cancelled or `timeout` elapses.
    pub fn start(surface: Arc<dyn ChatSurface>, target: MessageHandle, timeout: Duration) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run_indicator(surface, target, timeout, cancel_rx));
        Self { cancel_tx, task }
    }

    /// Requests cancellation. Repeated calls are no-ops.
    pub fn cancel(&self) {
        self.cancel_tx.send_if_modified(|cancelled| {
            if *cancelled {
                return false;
            }
            *cancelled = true;
            true
        });
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Cancels the task and waits for its cleanup to finish.
    pub async fn finish(self) -> IndicatorExit {
        self.cancel();
        match self.task.await {
            Ok(exit) => exit,
            Err(error) => {
                tracing::debug!(%error, "indicator task ended abnormally");
                IndicatorExit::Cancelled
            }
        }
    }
}

async fn run_indicator(
    surface: Arc<dyn ChatSurface>,
    target: MessageHandle,
    timeout: Duration,
    mut cancel_rx: watch::Receiver<bool>,
) -> IndicatorExit {
    if *cancel_rx.borrow_and_update() {
        return IndicatorExit::Cancelled;
    }

    if let Err(error) = surface.add_reaction(&target, THINKING_REACTION).await {
        tracing::debug!(message_id = %target.message_id, %error, "indicator reaction failed");
    }

    let deadline = sleep(timeout);
    tokio::pin!(deadline);
    let mut typing = interval_at(Instant::now(), TYPING_REFRESH_INTERVAL);
    typing.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow_and_update() {
                    break IndicatorExit::Cancelled;
                }
            }
            _ = &mut deadline => break IndicatorExit::TimedOut,
            _ = typing.tick() => {
                if let Err(error) = surface.trigger_typing(&target.channel_id).await {
                    tracing::debug!(channel_id = %target.channel_id, %error, "indicator typing failed");
                }
            }
        }
    };

    if let Err(error) = surface
        .remove_own_reaction(&target, THINKING_REACTION)
        .await
    {
        tracing::debug!(message_id = %target.message_id, %error, "indicator cleanup failed");
    }
    exit
}
