//! Control channel client used by the `controller` binary

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LinesCodec};

use crate::error::ControlError;
use crate::protocol::{ControlCommand, ControlReply};

/// Longest reply line accepted from the server
const MAX_REPLY_LENGTH: usize = 1024;

/// Line-oriented connection to a control server
pub struct ControlClient {
    framed: Framed<TcpStream, LinesCodec>,
}

impl ControlClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ControlError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_REPLY_LENGTH)),
        })
    }

    /// Send a raw line and wait for the reply line
    pub async fn send_line(&mut self, line: &str) -> Result<String, ControlError> {
        self.framed.send(line.trim_end()).await?;
        match self.framed.next().await {
            Some(reply) => Ok(reply?),
            None => Err(ControlError::ConnectionClosed),
        }
    }

    /// Send a command and parse the reply
    pub async fn send(&mut self, command: ControlCommand) -> Result<ControlReply, ControlError> {
        let line = self.send_line(&command.to_string()).await?;
        ControlReply::parse(&line).ok_or(ControlError::UnexpectedReply(line))
    }

    pub async fn start(&mut self) -> Result<ControlReply, ControlError> {
        self.send(ControlCommand::Start).await
    }

    pub async fn stop(&mut self) -> Result<ControlReply, ControlError> {
        self.send(ControlCommand::Stop).await
    }

    pub async fn status(&mut self) -> Result<ControlReply, ControlError> {
        self.send(ControlCommand::Status).await
    }
}
