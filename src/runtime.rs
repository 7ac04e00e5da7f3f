//! Background driver
//!
//! [`spawn`] runs a tokio task that drains the data link and runs the
//! controller's timers every `tick_interval` until [`RuntimeHandle::shutdown`]
//! is called or the data link closes.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use crate::controller::{Controller, Event, Notification, NotificationId};
use crate::datalink::DataLinkError;

/// Handle to a running driver task
#[derive(Debug)]
pub struct RuntimeHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RuntimeHandle {
    /// Stop the driver and wait for it to exit
    pub async fn shutdown(self) -> Result<(), JoinError> {
        // The task may already have stopped on its own
        let _ = self.shutdown.send(true);
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Drive `controller` on the current tokio runtime
pub fn spawn(controller: Arc<Controller>) -> RuntimeHandle {
    let (shutdown, receiver) = watch::channel(false);
    let interval = controller.config().tick_interval;
    let task = tokio::spawn(run(controller, interval, receiver));
    RuntimeHandle { shutdown, task }
}

/// Poll and tick every `tick_interval` until `shutdown` turns true
pub async fn run(controller: Arc<Controller>, tick_interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut timer = tokio::time::interval(tick_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Controller {} driver started", controller.entity_id());

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match controller.poll() {
                    Ok(0) => {}
                    Ok(handled) => debug!("Handled {} frames", handled),
                    Err(DataLinkError::Closed) => {
                        warn!("Data link closed, stopping driver");
                        break;
                    }
                    Err(e) => warn!("Receive failed: {}", e),
                }
                controller.tick();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Controller {} driver stopped", controller.entity_id());
}

/// Wait for the notification tagged `notification_id`. Other events received
/// meanwhile are discarded. Returns `None` if the channel closes first.
pub async fn wait_for_notification(
    events: &mut UnboundedReceiver<Event>,
    notification_id: NotificationId,
) -> Option<Notification> {
    while let Some(event) = events.recv().await {
        match event {
            Event::Notification(notification) if notification.notification_id == notification_id => {
                return Some(notification)
            }
            other => debug!("Skipping {:?} while waiting for {}", other, notification_id),
        }
    }
    None
}
