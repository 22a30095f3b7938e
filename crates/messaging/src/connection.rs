use crate::error::Error;
use crate::transport::Transport;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use parking_lot::RwLock;

/// Holds the live transport and fails fast once it is gone.
///
/// The slot is filled once at construction and only ever emptied, by
/// [`Connection::take`]. It never reconnects.
pub struct Connection<T>
where
    T: Transport,
{
    slot: RwLock<Option<Arc<T>>>,
}

impl<T> Connection<T>
where
    T: Transport,
{
    /// Wraps an open transport.
    pub fn new(transport: T) -> Self {
        Self {
            slot: RwLock::new(Some(Arc::new(transport))),
        }
    }

    /// Returns the transport, or `Error::ConnectionInvalid` if it has been taken.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionInvalid` once the connection is closed.
    pub fn get(&self) -> Result<Arc<T>, Error<T::Error>> {
        self.slot.read().clone().ok_or(Error::ConnectionInvalid)
    }

    /// Whether the transport is still present.
    pub fn is_open(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Empties the slot, returning the transport if it was still present.
    pub fn take(&self) -> Option<Arc<T>> {
        self.slot.write().take()
    }
}

impl<T> Debug for Connection<T>
where
    T: Transport,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Connection")
            .field("open", &self.is_open())
            .finish()
    }
}
