use crate::error::Result;

/// Something that can carry an encoded packet toward a peer.
///
/// Implementations are free to drop data; reliability lives above this
/// layer. Callers usually hold a `Box<dyn Sender>` so the link can be
/// swapped between a radio socket and a capture file at startup.
pub trait Sender: Send {
    /// Acquire whatever the sender needs (socket, file handle).
    ///
    /// Calling `init` on an already initialized sender is a no-op.
    fn init(&mut self) -> Result<()>;

    /// Send one encoded packet, returning the number of bytes accepted.
    fn send(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Short label for log lines.
    fn label(&self) -> String;
}

impl<S: Sender + ?Sized> Sender for Box<S> {
    fn init(&mut self) -> Result<()> {
        (**self).init()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        (**self).send(bytes)
    }

    fn label(&self) -> String {
        (**self).label()
    }
}
