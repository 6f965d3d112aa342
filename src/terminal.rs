//! Line-oriented terminal chat.
//!
//! Prints the title and the seeded conversation, then reads one prompt per
//! line and writes the reply as it streams. Ctrl-C during a reply cancels
//! that turn; Ctrl-C or end of input at the prompt exits.

use std::io::Write;

use anyhow::Result;
use futures::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

use crate::models::{Message, Role};
use crate::service::ChatService;

pub async fn run_terminal<R, W>(service: &ChatService, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let session = service.open_session().await?;
    let chat = &service.config().chat;

    writeln!(out, "{}", chat.title)?;
    writeln!(out)?;
    for message in session.messages() {
        write_message(out, &message)?;
    }

    let mut lines = input.lines();
    loop {
        write!(out, "{} > ", chat.input_placeholder)?;
        out.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            writeln!(out)?;
            return Ok(());
        };

        let mut turn = match session.submit(&line).await {
            Ok(Some(turn)) => turn,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "turn failed");
                writeln!(out, "[error] {}", e)?;
                continue;
            }
        };

        write!(out, "{}: ", Role::Assistant)?;
        loop {
            tokio::select! {
                item = turn.next() => match item {
                    Some(Ok(fragment)) => {
                        write!(out, "{}", fragment)?;
                        out.flush()?;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "turn failed mid-stream");
                        writeln!(out)?;
                        writeln!(out, "[error] {}", e)?;
                        break;
                    }
                    None => {
                        writeln!(out)?;
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    writeln!(out)?;
                    writeln!(out, "[cancelled]")?;
                    break;
                }
            }
        }
    }
}

fn write_message<W: Write>(out: &mut W, message: &Message) -> std::io::Result<()> {
    writeln!(out, "{}: {}", message.role, message.content)
}
