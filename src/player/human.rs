// Human player — moves arrive over a live channel.
//
// The transcript is printed to stdout and the next line received on the
// channel becomes the move. `from_stdin` wires the channel to terminal
// input; tests and alternative front-ends (e.g. a websocket bridge) can
// feed the sender directly.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, XentError};

use super::traits::{ChatMessage, Player, RequestParams};

pub struct HumanPlayer {
    moves: Mutex<mpsc::Receiver<String>>,
}

impl HumanPlayer {
    /// A human player fed by the returned sender.
    pub fn new() -> (Self, mpsc::Sender<String>) {
        let (tx, rx) = mpsc::channel(8);
        (Self { moves: Mutex::new(rx) }, tx)
    }

    /// A human player reading lines from stdin.
    pub fn from_stdin() -> Self {
        let (player, tx) = Self::new();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
        player
    }
}

#[async_trait]
impl Player for HumanPlayer {
    async fn complete(
        &self,
        transcript: &[ChatMessage],
        _max_tokens: u32,
        _params: &RequestParams,
    ) -> Result<String> {
        for message in transcript {
            println!("[{:?}] {}", message.role, message.content);
        }
        println!("your move> ");

        let mut rx = self.moves.lock().await;
        let line = rx.recv().await.ok_or_else(|| {
            XentError::PlayerUnavailable("human input channel closed".to_string())
        })?;

        // Humans type bare moves; wrap them so extraction sees the same
        // shape as an LLM reply.
        if line.contains("<move>") {
            Ok(line)
        } else {
            Ok(format!("<move>{line}</move>"))
        }
    }
}
