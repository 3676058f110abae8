//! Line-oriented chat loop.
//!
//! Each input line becomes one encrypted message; each received message is
//! written as one output line. An empty line or end of input ends the chat.

use cryptochat_core::ProtocolError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::connection::{ChatReceiver, ChatSender};

/// Why the chat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatExit {
    /// Input ended or an empty line was entered.
    InputClosed,
    /// The relay closed the connection.
    RelayClosed,
}

/// Pump `input` lines to `sender` and `receiver` messages to `output`
/// until either side finishes.
pub async fn run_chat<I, O>(
    sender: ChatSender,
    receiver: ChatReceiver,
    input: I,
    output: O,
) -> Result<ChatExit, ProtocolError>
where
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin + Send + 'static,
{
    let mut inbound = tokio::spawn(receive_loop(receiver, output));
    let outcome = tokio::select! {
        sent = send_loop(sender, input) => sent.map(|()| ChatExit::InputClosed),
        received = &mut inbound => match received {
            Ok(result) => result.map(|()| ChatExit::RelayClosed),
            Err(e) => Err(ProtocolError::Io(std::io::Error::other(e))),
        },
    };
    inbound.abort();
    outcome
}

async fn send_loop<I>(mut sender: ChatSender, input: I) -> Result<(), ProtocolError>
where
    I: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            break;
        }
        match sender.send(line.as_bytes()).await {
            Ok(()) => {}
            Err(ProtocolError::ProtocolViolation(reason)) => {
                warn!(%reason, "Message not sent");
            }
            Err(e) => return Err(e),
        }
    }
    sender.close().await
}

async fn receive_loop<O>(mut receiver: ChatReceiver, mut output: O) -> Result<(), ProtocolError>
where
    O: AsyncWrite + Unpin,
{
    loop {
        match receiver.recv().await {
            Ok(message) => {
                let mut line = String::from_utf8_lossy(&message).into_owned();
                line.push('\n');
                output.write_all(line.as_bytes()).await?;
                output.flush().await?;
            }
            Err(ProtocolError::AuthenticationFailed) => {
                warn!("Dropped a message that failed authentication");
            }
            Err(ProtocolError::PeerDisconnected) => {
                info!("Relay closed the connection");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}
