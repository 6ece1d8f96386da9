//! CLI `history` command: recent turns, keyword search, or conversation list.

use anyhow::Result;
use apex::config::ApexConfig;
use apex::memory::conversation::ConversationStore;
use apex::memory::types::Turn;

use super::preview;

pub enum HistoryMode {
    Recent(String),
    Search(String),
    List,
}

pub async fn history(config: &ApexConfig, mode: HistoryMode, limit: usize) -> Result<()> {
    let conn = apex::db::open_database(config.resolved_db_path())?;
    let store = ConversationStore::new(apex::memory::shared(conn));

    match mode {
        HistoryMode::Recent(id) => {
            let turns = store.recent_turns(&id, limit).await?;
            if turns.is_empty() {
                println!("No turns in conversation '{id}'.");
            }
            for turn in &turns {
                print_turn(turn, false);
            }
        }
        HistoryMode::Search(query) => {
            let turns = store.search(&query, limit).await?;
            if turns.is_empty() {
                println!("No turns matching '{query}'.");
            }
            for turn in &turns {
                print_turn(turn, true);
            }
        }
        HistoryMode::List => {
            let conversations = store.conversations().await?;
            if conversations.is_empty() {
                println!("No conversations yet.");
            }
            for c in conversations.iter().take(limit) {
                println!(
                    "  {:<24} {:>5} turns  last active {}",
                    c.conversation_id,
                    c.turn_count,
                    c.last_active.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }

    Ok(())
}

fn print_turn(turn: &Turn, with_conversation: bool) {
    let when = turn.timestamp.format("%Y-%m-%d %H:%M");
    let text = preview(&turn.content, 200);
    if with_conversation {
        println!("  [{when}] ({}#{}) {}: {text}", turn.conversation_id, turn.seq, turn.role);
    } else {
        println!("  [{when}] {}: {text}", turn.role);
    }
}
