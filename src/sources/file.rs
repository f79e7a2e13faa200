use std::io::SeekFrom;
use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{Drain, MessageSource, ReadPosition, SourceError, Unit};

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub path: PathBuf,
}

impl Config {
    pub fn build(self) -> Source {
        Source { path: self.path }
    }
}

/// Splits the complete lines of a buffer read at `from`.
///
/// Returns the units and the number of bytes they cover, a trailing line
/// without its newline is not part of it.
fn split_lines(from: ReadPosition, buffer: &[u8]) -> (Vec<Unit>, usize) {
    let Some(last) = buffer.iter().rposition(|b| *b == b'\n') else {
        return (Vec::new(), 0);
    };
    let complete = &buffer[..=last];
    let mut units = Vec::new();
    let mut offset = 0;
    for line in complete[..last].split(|b| *b == b'\n') {
        let payload = line.strip_suffix(b"\r").unwrap_or(line);
        units.push(Unit {
            position: ReadPosition::new(from.value() + offset as u64),
            payload: payload.to_vec(),
        });
        offset += line.len() + 1;
    }
    (units, complete.len())
}

/// Tails an append-only file of newline delimited messages.
#[derive(Debug)]
pub struct Source {
    path: PathBuf,
}

impl Source {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

impl MessageSource for Source {
    fn flavor(&self) -> &'static str {
        "file"
    }

    async fn drain(&mut self, from: ReadPosition) -> Result<Drain, SourceError> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(self.target()));
            }
            Err(err) => return Err(SourceError::Unavailable(self.target(), err)),
        };
        let size = file
            .metadata()
            .await
            .map_err(|err| SourceError::Read(self.target(), err))?
            .len();
        if size < from.value() {
            tracing::warn!(
                path = %self.path.display(),
                position = %from,
                size,
                "file is shorter than the read position, waiting for it to grow"
            );
            return Ok(Drain {
                units: Vec::new(),
                end: from,
            });
        }
        if size == from.value() {
            return Ok(Drain {
                units: Vec::new(),
                end: from,
            });
        }

        file.seek(SeekFrom::Start(from.value()))
            .await
            .map_err(|err| SourceError::Read(self.target(), err))?;
        let mut buffer = Vec::with_capacity((size - from.value()) as usize);
        file.read_to_end(&mut buffer)
            .await
            .map_err(|err| SourceError::Read(self.target(), err))?;

        let (units, consumed) = split_lines(from, &buffer);
        if consumed < buffer.len() {
            tracing::debug!(
                pending = buffer.len() - consumed,
                "keeping partial line for next poll"
            );
        }
        Ok(Drain {
            units,
            end: ReadPosition::new(from.value() + consumed as u64),
        })
    }
}
