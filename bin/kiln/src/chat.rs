//! Interactive chat adapter.
//!
//! A thin REPL over the daemon's `/chat/completions` stream: read a line,
//! post it, print tokens as they arrive. `exit` or EOF leaves the loop.

use std::io::Write as _;

use futures::StreamExt;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Run the REPL against `base` (e.g. `http://127.0.0.1:3928`).
pub async fn repl(base: &str, model_id: &str) -> anyhow::Result<()> {
    println!("In order to exit, type `exit()`");
    let client = reqwest::Client::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit()" || line == "exit" {
            break;
        }

        let resp = client
            .post(format!("{base}/chat/completions"))
            .json(&json!({
                "model": model_id,
                "messages": [{ "role": "user", "content": line }],
                "stream": true,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            eprintln!("chat request failed: {message}");
            continue;
        }

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            print!("{}", String::from_utf8_lossy(&chunk));
            std::io::stdout().flush()?;
        }
        println!();
    }

    Ok(())
}
