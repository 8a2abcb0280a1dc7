//! Observe a worker link as a cancellable stream of connection events.
//!
//! A [`ProcessLink`] is the imperative side: it is asked to bind once and
//! reports what happens through [`LinkEvents`]. A [`BindFlow`] turns those
//! reports into [`ConnectionEvent`]s and owns the resulting [`Binding`] so
//! that the link is released exactly once, on [`BindFlow::cancel`] or drop.

use std::any::{Any, type_name};
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::BridgeError;

/// Handle delivered by a link, typed only by the interface it announced.
pub struct RawBinder {
    pub interface: String,
    pub inner: Arc<dyn Any + Send + Sync>,
}

impl RawBinder {
    pub fn new<T: Any + Send + Sync>(interface: impl Into<String>, inner: Arc<T>) -> Self {
        Self {
            interface: interface.into(),
            inner,
        }
    }
}

impl std::fmt::Debug for RawBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBinder")
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum LinkEvent {
    Connected(RawBinder),
    Disconnected,
    Died,
}

/// Callback side handed to [`ProcessLink::bind`]. Safe to call from
/// synchronous code and after the flow is gone.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkEvents {
    pub fn connected(&self, binder: RawBinder) {
        let _ = self.tx.send(LinkEvent::Connected(binder));
    }

    /// The link was closed from the other side.
    pub fn disconnected(&self) {
        let _ = self.tx.send(LinkEvent::Disconnected);
    }

    /// The remote process exited.
    pub fn died(&self) {
        let _ = self.tx.send(LinkEvent::Died);
    }
}

/// A live link, released by value so it can only be released once.
pub trait Binding: Send {
    fn unbind(self: Box<Self>);
}

/// Something that can establish a link to the worker process.
pub trait ProcessLink: Send + Sync + 'static {
    /// Start binding; the outcome is reported through `events`.
    fn bind(&self, events: LinkEvents) -> Result<Box<dyn Binding>, BridgeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The link could not be established at all.
    BindFailed(BridgeError),
    Unbound,
    Crashed,
    /// The remote handed over a handle of another type.
    InvalidBinderType { expected: String, actual: String },
}

impl DisconnectReason {
    /// Error reported to callers that were waiting for a connection.
    ///
    /// Calls on an established connection learn of a crash through
    /// [`BridgeError::LinkLost`] instead.
    pub fn into_error(self) -> BridgeError {
        match self {
            Self::BindFailed(err) => err,
            Self::Unbound => BridgeError::ConnectFailed("link closed before connecting".into()),
            Self::Crashed => BridgeError::ConnectFailed("worker exited before connecting".into()),
            Self::InvalidBinderType { expected, actual } => {
                BridgeError::InvalidBinderType { expected, actual }
            }
        }
    }
}

#[derive(Debug)]
pub enum ConnectionEvent<T> {
    Connected(Arc<T>),
    Disconnected(DisconnectReason),
}

/// Connection events of one bind, typed as `T`.
///
/// Yields at most one `Connected`, then any number of `Disconnected`.
/// Nothing is yielded after [`cancel`](Self::cancel).
pub struct BindFlow<T> {
    events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    binding: Option<Box<dyn Binding>>,
    failure: Option<DisconnectReason>,
    connected: bool,
    _handle: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> BindFlow<T> {
    /// Ask `link` to bind and observe the result.
    pub fn open(link: &dyn ProcessLink) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        match link.bind(LinkEvents { tx }) {
            Ok(binding) => Self {
                events: Some(rx),
                binding: Some(binding),
                failure: None,
                connected: false,
                _handle: PhantomData,
            },
            Err(e) => {
                warn!(error = %e, "Worker bind failed");
                Self {
                    events: None,
                    binding: None,
                    failure: Some(DisconnectReason::BindFailed(e)),
                    connected: false,
                    _handle: PhantomData,
                }
            }
        }
    }

    /// Next event, or `None` once the flow has ended.
    pub async fn next(&mut self) -> Option<ConnectionEvent<T>> {
        if let Some(reason) = self.failure.take() {
            return Some(ConnectionEvent::Disconnected(reason));
        }
        loop {
            let Some(event) = self.events.as_mut()?.recv().await else {
                self.events = None;
                return None;
            };
            match event {
                LinkEvent::Connected(raw) => {
                    if self.connected {
                        debug!(interface = %raw.interface, "Ignoring repeated connect");
                        continue;
                    }
                    let RawBinder { interface, inner } = raw;
                    return Some(match inner.downcast::<T>() {
                        Ok(handle) => {
                            self.connected = true;
                            ConnectionEvent::Connected(handle)
                        }
                        Err(_) => {
                            warn!(%interface, "Worker handle has unexpected type");
                            ConnectionEvent::Disconnected(DisconnectReason::InvalidBinderType {
                                expected: type_name::<T>().to_string(),
                                actual: interface,
                            })
                        }
                    });
                }
                LinkEvent::Disconnected => {
                    return Some(ConnectionEvent::Disconnected(DisconnectReason::Unbound));
                }
                LinkEvent::Died => {
                    return Some(ConnectionEvent::Disconnected(DisconnectReason::Crashed));
                }
            }
        }
    }
}

impl<T> BindFlow<T> {
    /// Stop observing and release the link. Repeated calls do nothing.
    pub fn cancel(&mut self) {
        self.events = None;
        self.failure = None;
        if let Some(binding) = self.binding.take() {
            debug!("Releasing worker link");
            binding.unbind();
        }
    }

    pub const fn is_cancelled(&self) -> bool {
        self.events.is_none() && self.binding.is_none() && self.failure.is_none()
    }
}

impl<T> Drop for BindFlow<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
