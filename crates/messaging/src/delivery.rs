use crate::message::Message;
use crate::transport::{Acknowledge, Delivery};

use std::error::Error as StdError;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::warn;

/// Error returned by message handlers.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// When delivered messages are acknowledged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckPolicy {
    /// Acknowledge before the handler runs, whatever the handler does.
    #[default]
    BeforeHandler,

    /// Acknowledge after the handler succeeds; reject on failure so the message can
    /// be redelivered.
    AfterHandler,
}

/// Receives delivered messages. Invoked once per delivery, on the subscription's
/// delivery task.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles one message.
    ///
    /// # Errors
    ///
    /// A failure is logged and, under [`AckPolicy::AfterHandler`], rejects the message.
    fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(Message) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, message: Message) -> Result<(), HandlerError> {
        self(message)
    }
}

/// Normalizes a delivery, settles it according to `policy` and runs the handler.
///
/// Identical for plain and durable subscriptions.
pub(crate) async fn dispatch<A, H>(delivery: Delivery<A>, handler: &H, policy: AckPolicy)
where
    A: Acknowledge,
    H: MessageHandler,
{
    let Delivery { message, acker } = delivery;
    let subject = message.subject.clone();
    let message = Message::from(message);

    match policy {
        AckPolicy::BeforeHandler => {
            if let Err(error) = acker.ack().await {
                warn!(%subject, %error, "failed to acknowledge message");
            }

            if let Err(error) = run_handler(handler, message) {
                warn!(%subject, %error, "message handler failed");
            }
        }
        AckPolicy::AfterHandler => match run_handler(handler, message) {
            Ok(()) => {
                if let Err(error) = acker.ack().await {
                    warn!(%subject, %error, "failed to acknowledge message");
                }
            }
            Err(error) => {
                warn!(%subject, %error, "message handler failed; rejecting message");

                if let Err(error) = acker.nak().await {
                    warn!(%subject, %error, "failed to reject message");
                }
            }
        },
    }
}

fn run_handler<H>(handler: &H, message: Message) -> Result<(), HandlerError>
where
    H: MessageHandler,
{
    catch_unwind(AssertUnwindSafe(|| handler.handle(message)))
        .unwrap_or_else(|_| Err("message handler panicked".into()))
}
