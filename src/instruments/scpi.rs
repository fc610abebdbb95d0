use std::time::Duration;

use log::trace;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Error, Result};

/// Line-oriented SCPI session over any async byte stream.
///
/// Commands and responses are terminated by `\n`. A query is a write followed
/// by one line read, so a query must not be cancelled halfway through or the
/// next response will be misattributed.
pub struct ScpiPort<T> {
    io: BufReader<T>,
    timeout: Duration,
}

impl<T> ScpiPort<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: T, timeout: Duration) -> Self {
        Self {
            io: BufReader::new(io),
            timeout,
        }
    }

    pub async fn write(&mut self, command: &str) -> Result<()> {
        trace!("SCPI > {command}");
        let line = format!("{command}\n");
        let io = &mut self.io;
        let send = async move {
            io.write_all(line.as_bytes()).await?;
            io.flush().await
        };

        tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| Error::Instrument(format!("timed out writing '{command}'")))?
            .map_err(|err| Error::Instrument(format!("write '{command}': {err}")))
    }

    /// Send `command` and return its response line without the terminator.
    pub async fn query(&mut self, command: &str) -> Result<String> {
        self.write(command).await?;

        let mut response = String::new();
        let read = tokio::time::timeout(self.timeout, self.io.read_line(&mut response))
            .await
            .map_err(|_| Error::Instrument(format!("no response to '{command}'")))?
            .map_err(|err| Error::Instrument(format!("read after '{command}': {err}")))?;
        if read == 0 {
            return Err(Error::Instrument(format!(
                "connection closed while waiting for '{command}'"
            )));
        }

        let response = response.trim_end_matches(['\r', '\n']).to_string();
        trace!("SCPI < {response}");
        Ok(response)
    }

    /// Query and parse the first comma-separated field as a float.
    pub async fn query_f64(&mut self, command: &str) -> Result<f64> {
        let response = self.query(command).await?;
        let field = response.split(',').next().unwrap_or_default().trim();
        field.parse().map_err(|_| {
            Error::Instrument(format!("'{command}' returned non-numeric '{response}'"))
        })
    }
}
