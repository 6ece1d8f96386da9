//! CLI `chat` and `ask` commands.

use anyhow::Result;
use apex::config::ApexConfig;
use apex::runtime::Runtime;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Interactive loop until EOF, `exit` or `quit`.
pub async fn chat(config: ApexConfig, conversation: &str) -> Result<()> {
    let runtime = Runtime::start(config)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Apex ready (conversation '{conversation}'). Type 'exit' to quit.");
    loop {
        stdout.write_all(b"\nyou> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        match runtime.orchestrator.handle(conversation, line).await {
            Ok(reply) => println!("apex> {reply}"),
            Err(e) => eprintln!("error: {e}"),
        }
    }

    runtime.shutdown().await
}

/// One turn. Waits for background extraction before exiting.
pub async fn ask(config: ApexConfig, conversation: &str, message: &str) -> Result<()> {
    let runtime = Runtime::start(config)?;
    let result = runtime.orchestrator.respond(conversation, message).await;
    runtime.shutdown().await?;

    let reply = result?;
    println!("{}", reply.text);
    if reply.tool_rounds > 0 {
        tracing::debug!(rounds = reply.tool_rounds, bound_reached = reply.bound_reached, "tools used");
    }
    Ok(())
}
