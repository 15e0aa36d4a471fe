// src/sys/prompt.rs

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;

use crate::sys::traits::InteractionGate;

/// Empty means "take the default"; only `y`/`yes` (any case) count as yes.
pub fn interpret(answer: &str, default_yes: bool) -> bool {
    let answer = answer.trim().to_ascii_lowercase();
    if answer.is_empty() {
        return default_yes;
    }
    answer == "y" || answer == "yes"
}

/// Line-oriented yes/no prompts over any reader/writer pair.
pub struct TerminalGate<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
}

impl TerminalGate<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> TerminalGate<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }

    #[cfg(test)]
    pub fn into_writer(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<R, W> InteractionGate for TerminalGate<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn confirm(&self, prompt: &str, default_yes: bool) -> bool {
        let hint = if default_yes { "[Y/n]" } else { "[y/N]" };
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.write_all(format!("{prompt} {hint} ").as_bytes()).await;
            let _ = writer.flush().await;
        }

        let mut line = String::new();
        let mut reader = self.reader.lock().await;
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => false,
            Ok(_) => interpret(&line, default_yes),
        }
    }
}
