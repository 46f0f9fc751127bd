use anyhow::Result;
use contract_indexer::config::database_url_from_env;
use contract_indexer::repository::Database;

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let database_url = database_url_from_env();

    println!("Running migrations on database: {database_url}");

    let _db = Database::new(&database_url)?;

    println!("Migrations completed successfully!");

    Ok(())
}
