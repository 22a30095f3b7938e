use crate::delivery::{AckPolicy, MessageHandler, dispatch};
use crate::error::{Error, TransportError};
use crate::transport::Inbox;

use std::fmt::{Debug, Formatter, Result as FmtResult};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, warn};

/// Handle to an active subscription.
///
/// Its only operation is [`Subscription::release`]. Dropping the handle without
/// releasing it also stops delivery.
pub struct Subscription<E>
where
    E: TransportError,
{
    subject: String,
    stop_sender: watch::Sender<()>,
    task: JoinHandle<Result<(), E>>,
}

impl<E> Subscription<E>
where
    E: TransportError,
{
    /// Starts delivering messages from `inbox` to `handler` on a dedicated task.
    pub(crate) fn spawn<I, H>(subject: String, mut inbox: I, handler: H, policy: AckPolicy) -> Self
    where
        I: Inbox<Error = E>,
        H: MessageHandler,
    {
        let (stop_sender, mut stop_receiver) = watch::channel(());
        let task_subject = subject.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop_receiver.changed() => {
                        break;
                    }
                    next = inbox.next() => match next {
                        Some(Ok(delivery)) => dispatch(delivery, &handler, policy).await,
                        Some(Err(error)) => {
                            warn!(subject = %task_subject, %error, "failed to receive message");
                        }
                        None => {
                            debug!(subject = %task_subject, "subscription ended by transport");
                            return Ok(());
                        }
                    }
                }
            }

            debug!(subject = %task_subject, "unsubscribing");
            inbox.unsubscribe().await
        }
        .in_current_span());

        Self {
            subject,
            stop_sender,
            task,
        }
    }

    /// The subject pattern this subscription listens on.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Stops future deliveries and unsubscribes at the transport.
    ///
    /// A handler invocation already in progress runs to completion first. Once this
    /// returns, the handler is not invoked again.
    ///
    /// # Errors
    ///
    /// Returns the transport's unsubscribe error, or `Error::Task` if the delivery
    /// task panicked.
    pub async fn release(self) -> Result<(), Error<E>> {
        // The receiver is gone only if the task already finished.
        let _ = self.stop_sender.send(());

        match self.task.await {
            Ok(result) => result.map_err(Error::Transport),
            Err(_) => Err(Error::Task),
        }
    }
}

impl<E> Debug for Subscription<E>
where
    E: TransportError,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .field("active", &!self.task.is_finished())
            .finish()
    }
}
