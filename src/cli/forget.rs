use anyhow::Result;
use apex::config::ApexConfig;
use apex::error::StoreError;

use super::open_knowledge;

pub async fn forget(config: &ApexConfig, fact_id: &str) -> Result<()> {
    let store = open_knowledge(config)?;

    match store.forget(fact_id).await {
        Ok(()) => println!("Forgot fact {fact_id}."),
        Err(StoreError::FactNotFound(_)) => anyhow::bail!("no fact with id {fact_id}"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
