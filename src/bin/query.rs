use anyhow::Result;
use clap::{Parser, Subcommand};
use contract_indexer::config::database_url_from_env;
use contract_indexer::query::commands::{
    EventQuery, TransactionQuery, cmd_all_events, cmd_block, cmd_blocks, cmd_contracts,
    cmd_events, cmd_stats, cmd_transactions,
};
use contract_indexer::query::formatters::OutputFormat;
use contract_indexer::repository::SqliteStore;

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Query indexed blocks, transactions and contract events", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Stats,
    Events {
        #[arg(long)]
        contract: Option<String>,

        #[arg(long)]
        event: Option<String>,

        #[arg(long)]
        from_block: Option<u64>,

        #[arg(long)]
        to_block: Option<u64>,

        #[arg(long, default_value = "100")]
        limit: u64,
    },
    Transactions {
        #[arg(long)]
        address: Option<String>,

        #[arg(long)]
        from_block: Option<u64>,

        #[arg(long)]
        to_block: Option<u64>,

        #[arg(long, default_value = "100")]
        limit: u64,
    },
    AllEvents {
        #[arg(long, default_value = "1")]
        page: u64,

        #[arg(long, default_value = "100")]
        page_size: u64,
    },
    Blocks {
        #[arg(long, default_value = "100")]
        limit: u64,
    },
    Block {
        number: u64,
    },
    Contracts,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let store = SqliteStore::open(&database_url_from_env())?;

    let output = match cli.command {
        Commands::Stats => cmd_stats(&store, &format).await?,
        Commands::Events {
            contract,
            event,
            from_block,
            to_block,
            limit,
        } => {
            let query = EventQuery {
                contract,
                event,
                from_block,
                to_block,
                limit,
            };
            cmd_events(&store, query, &format).await?
        }
        Commands::Transactions {
            address,
            from_block,
            to_block,
            limit,
        } => {
            let query = TransactionQuery {
                address,
                from_block,
                to_block,
                limit,
            };
            cmd_transactions(&store, query, &format).await?
        }
        Commands::AllEvents { page, page_size } => {
            cmd_all_events(&store, page, page_size, &format).await?
        }
        Commands::Blocks { limit } => cmd_blocks(&store, limit, &format).await?,
        Commands::Block { number } => cmd_block(&store, number, &format).await?,
        Commands::Contracts => cmd_contracts(&store, &format).await?,
    };
    println!("{output}");

    Ok(())
}
