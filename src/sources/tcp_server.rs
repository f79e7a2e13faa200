use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::channel::PayloadSender;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("unable to parse address")]
    InvalidAddress(#[source] std::net::AddrParseError),
}

#[derive(Debug, thiserror::Error)]
pub enum StartingError {
    #[error("unable to bind {0}")]
    UnableToBind(SocketAddr, #[source] std::io::Error),
}

impl From<StartingError> for super::SourceError {
    fn from(value: StartingError) -> Self {
        match value {
            StartingError::UnableToBind(address, err) => Self::Unavailable(address.to_string(), err),
        }
    }
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct Config {
    pub address: Option<String>,
    /// Number of payloads buffered between producers and the ingestion loop
    pub buffer_size: Option<usize>,
}

impl Config {
    pub fn build(self) -> Result<Server, BuildError> {
        let address = match self.address {
            Some(value) => value
                .parse::<SocketAddr>()
                .map_err(BuildError::InvalidAddress)?,
            None => SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9092)),
        };
        Ok(Server {
            address,
            buffer_size: self.buffer_size.unwrap_or(1000),
        })
    }
}

async fn handle_connection(stream: TcpStream, sender: PayloadSender) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    loop {
        let mut buffer = Vec::with_capacity(4096);
        if reader.read_until(b'\n', &mut buffer).await? == 0 {
            break;
        }
        if buffer.last() == Some(&b'\n') {
            buffer.pop();
        }
        if sender.send(buffer).await.is_err() {
            tracing::debug!("ingestion stopped, closing connection");
            break;
        }
    }
    Ok(())
}

/// Listens for producers and forwards every line they send.
///
/// Plays the broker role: the ingestion loop only sees a channel source.
pub struct Server {
    address: SocketAddr,
    buffer_size: usize,
}

impl Server {
    #[cfg(test)]
    fn new(address: SocketAddr) -> Self {
        Self {
            address,
            buffer_size: 10,
        }
    }

    async fn iterate(&self, listener: &TcpListener, sender: PayloadSender) -> std::io::Result<()> {
        let (stream, address) = listener.accept().await?;
        let span = tracing::info_span!("connection", client = %address);
        tokio::spawn(
            async move {
                if let Err(err) = handle_connection(stream, sender).await {
                    tracing::error!("connection failed: {err:?}");
                }
            }
            .instrument(span),
        );
        Ok(())
    }

    async fn execute(self, listener: TcpListener, sender: PayloadSender, token: CancellationToken) {
        tracing::info!("waiting for connections");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                res = self.iterate(&listener, sender.clone()) => {
                    if let Err(error) = res {
                        tracing::error!("something went wrong: {error:?}");
                    }
                }
            }
        }
        tracing::info!("stopping");
    }

    pub async fn prepare(
        self,
        token: CancellationToken,
    ) -> Result<super::channel::Source, StartingError> {
        let listener = TcpListener::bind(self.address)
            .await
            .map_err(|err| StartingError::UnableToBind(self.address, err))?;
        let name = self.address.to_string();
        let (source, sender) = super::channel::Source::create(name.as_str(), self.buffer_size);

        let span = tracing::info_span!(
            "component",
            name = name.as_str(),
            kind = "source",
            flavor = "tcp_server"
        );
        tokio::spawn(async move { self.execute(listener, sender, token).instrument(span).await });
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio_util::sync::CancellationToken;

    use crate::sources::{channel, MessageSource, ReadPosition};

    async fn wait_for(source: &mut channel::Source, count: usize) -> Vec<Vec<u8>> {
        let mut received = Vec::new();
        let mut position = ReadPosition::START;
        for _ in 0..100 {
            let drain = source.drain(position).await.unwrap();
            position = drain.end;
            received.extend(drain.units.into_iter().map(|unit| unit.payload));
            if received.len() >= count {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} payloads, received {}", received.len());
    }

    #[tokio::test]
    async fn should_forward_lines() {
        crate::init_tracing();

        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 5100);
        let token = CancellationToken::new();
        let mut source = super::Server::new(address)
            .prepare(token.clone())
            .await
            .unwrap();

        let mut client = TcpStream::connect(address).await.unwrap();
        client
            .write_all(b"{\"message\":\"hi\"}\nthis is not an event\n")
            .await
            .unwrap();

        let received = wait_for(&mut source, 2).await;
        assert_eq!(received[0], b"{\"message\":\"hi\"}");
        assert_eq!(received[1], b"this is not an event");

        token.cancel();
    }

    #[tokio::test]
    async fn should_forward_last_line_on_close() {
        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 5102);
        let token = CancellationToken::new();
        let mut source = super::Server::new(address)
            .prepare(token.clone())
            .await
            .unwrap();

        let mut client = TcpStream::connect(address).await.unwrap();
        client.write_all(b"first\nlast").await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);

        let received = wait_for(&mut source, 2).await;
        assert_eq!(received, vec![b"first".to_vec(), b"last".to_vec()]);

        token.cancel();
    }

    #[tokio::test]
    async fn should_fail_when_address_taken() {
        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 5101);
        let token = CancellationToken::new();
        let _first = super::Server::new(address)
            .prepare(token.clone())
            .await
            .unwrap();
        let result = super::Server::new(address).prepare(token.clone()).await;
        assert!(matches!(
            result,
            Err(super::StartingError::UnableToBind(..))
        ));
        token.cancel();
    }
}
