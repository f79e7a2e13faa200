use tokio::sync::mpsc::error::TryRecvError;

use super::{Drain, MessageSource, ReadPosition, SourceError, Unit};

pub type PayloadSender = tokio::sync::mpsc::Sender<Vec<u8>>;
pub type PayloadReceiver = tokio::sync::mpsc::Receiver<Vec<u8>>;

/// Broker-like source, producers push raw payloads into a channel.
///
/// The position counts the units delivered so far. The channel can't be
/// repositioned, so the position handed to `drain` is only used to number
/// the units.
pub struct Source {
    name: String,
    receiver: PayloadReceiver,
}

impl Source {
    pub fn new<N: Into<String>>(name: N, receiver: PayloadReceiver) -> Self {
        Self {
            name: name.into(),
            receiver,
        }
    }

    /// Creates a source together with the sender producers write into.
    pub fn create<N: Into<String>>(name: N, size: usize) -> (Self, PayloadSender) {
        let (sender, receiver) = tokio::sync::mpsc::channel(size);
        (Self::new(name, receiver), sender)
    }
}

impl MessageSource for Source {
    fn flavor(&self) -> &'static str {
        "channel"
    }

    async fn drain(&mut self, from: ReadPosition) -> Result<Drain, SourceError> {
        let mut units = Vec::new();
        let mut next = from.value();
        loop {
            match self.receiver.try_recv() {
                Ok(payload) => {
                    units.push(Unit {
                        position: ReadPosition::new(next),
                        payload,
                    });
                    next += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) if units.is_empty() => {
                    return Err(SourceError::Closed(self.name.clone()));
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(Drain {
            units,
            end: ReadPosition::new(next),
        })
    }
}
