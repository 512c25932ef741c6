//! # Injected collaborators of the broadcaster.
//!
//! - [`Render`] turns an [`Event`] into message content. Pure; may fail.
//! - [`Deliver`] sends content to one subscriber through some transport
//!   (chat API, push, webhook). Failures are returned, never thrown.
//!
//! Closures work for both: any `Fn(&Event) -> Result<String, RenderError>` is a
//! renderer, and [`DeliverFn`] wraps an async closure into a delivery.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DeliveryError, RenderError};
use crate::registry::SubscriberId;
use crate::source::Event;

/// Renders an event into the content sent to every subscriber.
pub trait Render: Send + Sync + 'static {
    /// Produces the content for `event`. An error skips the event for everyone.
    fn render(&self, event: &Event) -> Result<String, RenderError>;
}

impl<F> Render for F
where
    F: Fn(&Event) -> Result<String, RenderError> + Send + Sync + 'static,
{
    fn render(&self, event: &Event) -> Result<String, RenderError> {
        self(event)
    }
}

/// Delivers rendered content to one subscriber.
///
/// Called from the subscriber's own lane; a slow implementation only delays
/// that subscriber.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use eventrelay::{Deliver, DeliveryError};
///
/// struct Stdout;
///
/// #[async_trait]
/// impl Deliver<i64> for Stdout {
///     async fn deliver(&self, chat: &i64, content: &str) -> Result<(), DeliveryError> {
///         println!("[{chat}] {content}");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Deliver<Id: SubscriberId>: Send + Sync + 'static {
    /// Sends `content` to `id`. Errors are reported, never retried.
    async fn deliver(&self, id: &Id, content: &str) -> Result<(), DeliveryError>;
}

/// Closure-backed [`Deliver`].
///
/// The closure receives owned copies of the id and content, so the returned
/// future can be `'static`.
///
/// ```rust
/// use std::sync::Arc;
/// use eventrelay::{DeliverFn, DeliveryError};
///
/// let deliver = DeliverFn::arc(|chat: u64, text: Arc<str>| async move {
///     if chat == 0 {
///         return Err(DeliveryError::UnknownRecipient);
///     }
///     let _ = text;
///     Ok(())
/// });
/// # let _ = deliver;
/// ```
pub struct DeliverFn<F> {
    f: F,
}

impl<F> DeliverFn<F> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the delivery and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<Id, F, Fut> Deliver<Id> for DeliverFn<F>
where
    Id: SubscriberId,
    F: Fn(Id, Arc<str>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DeliveryError>> + Send + 'static,
{
    async fn deliver(&self, id: &Id, content: &str) -> Result<(), DeliveryError> {
        (self.f)(id.clone(), Arc::from(content)).await
    }
}
