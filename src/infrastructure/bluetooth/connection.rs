//! Characteristic Session
//!
//! Brings a freshly connected mat to the point where it can take commands:
//! resolves the GATT handles, sends the vendor init packet, wires the
//! notification streams into the dispatcher and seeds the snapshot with a
//! read of each characteristic.

use crate::domain::error::TransportError;
use crate::domain::models::{CharacteristicRole, DisconnectReason};
use crate::domain::settings::SessionSettings;
use crate::infrastructure::bluetooth::dispatcher::Inbound;
use crate::infrastructure::bluetooth::reader::{ReadQueue, ReadSequencer};
use crate::infrastructure::bluetooth::session::{Link, Session};
use crate::infrastructure::bluetooth::task::ScheduledTask;
use crate::infrastructure::bluetooth::transport::{BleDevice, EventStream, Notification};
use crate::infrastructure::bluetooth::writer::CharacteristicWriter;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Forwarding task for the notifications of one characteristic.
///
/// Dropping or cancelling the handle stops forwarding.
pub struct Subscription {
    task: ScheduledTask,
}

impl Subscription {
    /// Forward every notification of `characteristic` found on `stream` as
    /// an `Inbound` tagged with `role`.
    ///
    /// When the stream ends while the session is ready the session is forced
    /// into `Disconnected(ReadLoopExit)`.
    pub fn start(
        session: Arc<Session>,
        role: CharacteristicRole,
        characteristic: Uuid,
        mut stream: EventStream<Notification>,
        inbound: mpsc::Sender<Inbound>,
    ) -> Self {
        let task = ScheduledTask::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.characteristic != characteristic {
                    trace!(
                        "{} subscription ignoring notification from {}",
                        role,
                        notification.characteristic
                    );
                    continue;
                }
                let message = Inbound {
                    role,
                    payload: notification.value,
                };
                if inbound.send(message).await.is_err() {
                    debug!("Dispatcher gone, {} subscription stopping", role);
                    return;
                }
            }
            warn!("{} notification stream ended", role);
            session.force_disconnect(DisconnectReason::ReadLoopExit);
        });
        Self { task }
    }

    pub fn cancel(&self) {
        self.task.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Everything that lives exactly as long as one connection
pub struct Established {
    pub link: Link,
    pub subscriptions: Vec<Subscription>,
    pub reads: ReadQueue,
    pub reader: ScheduledTask,
}

impl Established {
    /// Stop every per-connection task
    pub fn cancel(&self) {
        for subscription in &self.subscriptions {
            subscription.cancel();
        }
        self.reader.cancel();
    }
}

pub struct CharacteristicSession {
    session: Arc<Session>,
    writer: Arc<CharacteristicWriter>,
    inbound: mpsc::Sender<Inbound>,
    init_settle: Duration,
    read_gap: Duration,
}

impl CharacteristicSession {
    pub fn new(
        session: Arc<Session>,
        writer: Arc<CharacteristicWriter>,
        inbound: mpsc::Sender<Inbound>,
        settings: &SessionSettings,
    ) -> Self {
        Self {
            session,
            writer,
            inbound,
            init_settle: settings.init_settle(),
            read_gap: settings.read_gap(),
        }
    }

    /// Set up a connected `device`.
    ///
    /// Fails when the service or one of the mandatory characteristics is
    /// missing, or when subscribing fails. The init write is best effort.
    pub async fn establish(&self, device: Arc<dyn BleDevice>) -> Result<Established, TransportError> {
        let link = self.resolve(device.clone()).await?;

        if let (Some(set), Some(payload)) = (link.set, &self.session.identity().init_payload) {
            match self.writer.write_raw(device.as_ref(), set, payload).await {
                Ok(()) => debug!("Init packet sent"),
                Err(err) => warn!("Init packet failed, continuing: {}", err),
            }
            tokio::time::sleep(self.init_settle).await;
        }

        let subscriptions = vec![
            self.subscribe(&device, CharacteristicRole::Temperature, link.temperature)
                .await?,
            self.subscribe(&device, CharacteristicRole::Timer, link.timer)
                .await?,
        ];

        let (reads, reader) = ReadSequencer::new(
            self.session.clone(),
            device.clone(),
            self.inbound.clone(),
            self.read_gap,
        )
        .spawn();
        reads
            .enqueue(link.temperature, CharacteristicRole::Temperature)
            .and_then(|_| reads.enqueue(link.timer, CharacteristicRole::Timer))
            .map_err(|err| TransportError::Backend(err.to_string()))?;

        info!("Characteristics ready on {}", device.address());
        Ok(Established {
            link,
            subscriptions,
            reads,
            reader: ScheduledTask::from(reader),
        })
    }

    async fn resolve(&self, device: Arc<dyn BleDevice>) -> Result<Link, TransportError> {
        let identity = self.session.identity();
        let characteristics = device.resolve_service(identity.service_uuid).await?;
        debug!(
            "Service {} exposes {} characteristics",
            identity.service_uuid,
            characteristics.len()
        );

        let require = |uuid: Uuid| {
            if characteristics.contains(&uuid) {
                Ok(uuid)
            } else {
                Err(TransportError::CharacteristicNotFound(uuid))
            }
        };
        let temperature = require(identity.temperature_uuid)?;
        let timer = require(identity.timer_uuid)?;

        let set = identity.set_uuid.filter(|uuid| characteristics.contains(uuid));
        if identity.set_uuid.is_some() && set.is_none() {
            warn!("Set characteristic not exposed, init and keep-alive disabled");
        }

        Ok(Link {
            device,
            temperature,
            timer,
            set,
        })
    }

    async fn subscribe(
        &self,
        device: &Arc<dyn BleDevice>,
        role: CharacteristicRole,
        characteristic: Uuid,
    ) -> Result<Subscription, TransportError> {
        let stream = device.notifications().await?;
        device.subscribe(characteristic).await?;
        debug!("Subscribed to {} notifications", role);
        Ok(Subscription::start(
            self.session.clone(),
            role,
            characteristic,
            stream,
            self.inbound.clone(),
        ))
    }
}
