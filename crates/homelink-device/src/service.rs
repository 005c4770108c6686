use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::device::{Device, DeviceEvent};
use crate::error::Result;
use crate::message::MessageSet;
use crate::value::Value;

/// A named sub-channel of a device.
///
/// Carries the same request/event contract as the device itself, scoped by
/// a sub-identifier inside the device's payload space; writes are forwarded
/// through the owning device. Created via [`Device::service`].
#[derive(Clone)]
pub struct Service {
    device: Device,
    sub_ident: Bytes,
    set: Arc<MessageSet>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("device", &self.device)
            .field("sub_ident", &self.sub_ident)
            .finish_non_exhaustive()
    }
}

impl Service {
    pub(crate) fn new(device: Device, sub_ident: Bytes, set: Arc<MessageSet>) -> Self {
        Self {
            device,
            sub_ident,
            set,
        }
    }

    /// Issue one request on this sub-channel and await its response.
    pub async fn request(&self, name: &str, value: Value) -> Result<Value> {
        self.device
            .request_scoped(self.sub_ident.clone(), &self.set, name, value)
            .await
    }

    /// This service's sub-identifier.
    pub fn sub_identifier(&self) -> &[u8] {
        &self.sub_ident
    }

    /// Whether the owning device's transport is connected.
    pub fn online(&self) -> bool {
        self.device.online()
    }

    /// Subscribe to events scoped to this service.
    pub fn events(&self) -> ServiceEvents {
        ServiceEvents {
            rx: self.device.events(),
            scope: self.sub_ident.clone(),
        }
    }
}

/// Event subscription filtered to one service's sub-identifier.
pub struct ServiceEvents {
    rx: broadcast::Receiver<DeviceEvent>,
    scope: Bytes,
}

impl ServiceEvents {
    /// Receive the next event emitted for this service.
    pub async fn recv(&mut self) -> std::result::Result<DeviceEvent, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.service.as_deref() == Some(self.scope.as_ref()) {
                return Ok(event);
            }
        }
    }
}
