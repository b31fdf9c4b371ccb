//! TCP control server
//!
//! Accepts one controller at a time and answers line-oriented commands.
//! Unknown, oversized or non-UTF-8 lines get an `ERR:` reply and leave the
//! connection open.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::gate::{ControlGate, SharedControlGate};
use crate::error::{ControlError, NetworkError};
use crate::protocol::{ControlCommand, ControlReply};

/// Parse one command line and apply it to the gate
pub fn handle_line(gate: &ControlGate, line: &str) -> ControlReply {
    match line.parse::<ControlCommand>() {
        Ok(command) => {
            info!("Received command: {}", command);
            gate.apply(command)
        }
        Err(e) => {
            warn!("{}", e);
            ControlReply::UnknownCommand
        }
    }
}

/// Serve a single controller until it disconnects
pub async fn serve_connection<S>(
    stream: S,
    gate: &ControlGate,
    max_line_length: usize,
) -> Result<(), ControlError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let mut line = Vec::with_capacity(max_line_length);

    loop {
        line.clear();
        let read = (&mut reader)
            .take(max_line_length as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return Ok(());
        }

        let reply = if line.len() > max_line_length && !line.ends_with(b"\n") {
            warn!("Command longer than {} bytes", max_line_length);
            discard_line(&mut reader).await?;
            ControlReply::UnknownCommand
        } else {
            handle_line(gate, &String::from_utf8_lossy(&line))
        };

        debug!("Reply: {}", reply);
        write.write_all(format!("{}\n", reply).as_bytes()).await?;
    }
}

/// Skip input up to and including the next newline
async fn discard_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

/// Control server bound to a TCP port
pub struct ControlServer {
    listener: TcpListener,
    gate: SharedControlGate,
    max_line_length: usize,
}

impl ControlServer {
    pub async fn bind(
        addr: SocketAddr,
        gate: SharedControlGate,
        max_line_length: usize,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

        Ok(Self {
            listener,
            gate,
            max_line_length,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve controllers sequentially until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        if let Ok(addr) = self.local_addr() {
            info!("Control server listening on {}", addr);
        }

        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Control server accept failed: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            info!("Controller connected from {}", peer);
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = serve_connection(stream, &self.gate, self.max_line_length) => match result {
                    Ok(()) => info!("Controller {} disconnected", peer),
                    Err(e) => warn!("Controller {} dropped: {}", peer, e),
                },
            }
        }

        info!("Control server: shutting down");
    }
}
