use crate::repository::{Block, Contract, EventPage, EventRecord, Stats, Transaction};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde::Serialize;

#[derive(Debug, Clone)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".to_string())
}

fn to_csv(header: &[&str], rows: impl IntoIterator<Item = Vec<String>>) -> String {
    let mut wtr = Writer::from_writer(vec![]);
    let _ = wtr.write_record(header);
    for row in rows {
        let _ = wtr.write_record(&row);
    }
    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or("N/A".to_string(), |v| v.to_string())
}

pub fn format_events(events: &[EventRecord], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_events_table(events),
        OutputFormat::Json => to_json(events),
        OutputFormat::Csv => format_events_csv(events),
    }
}

fn format_events_table(events: &[EventRecord]) -> String {
    if events.is_empty() {
        return "No events found.".to_string();
    }

    let mut table = new_table(vec!["Block", "Log", "Contract", "Event", "Args", "Tx Hash"]);
    for event in events {
        table.add_row(vec![
            Cell::new(event.block_number),
            Cell::new(event.log_index),
            Cell::new(&event.contract_address),
            Cell::new(event.event_name.as_deref().unwrap_or("N/A")),
            Cell::new(args_json(event)),
            Cell::new(format_tx_hash(&event.transaction_hash)),
        ]);
    }

    table.to_string()
}

fn format_events_csv(events: &[EventRecord]) -> String {
    to_csv(
        &[
            "block_number",
            "log_index",
            "contract_address",
            "event_name",
            "args",
            "transaction_hash",
            "timestamp",
        ],
        events.iter().map(|event| {
            vec![
                event.block_number.to_string(),
                event.log_index.to_string(),
                event.contract_address.clone(),
                event.event_name.clone().unwrap_or_default(),
                args_json(event),
                event.transaction_hash.clone(),
                event.timestamp.to_string(),
            ]
        }),
    )
}

fn args_json(event: &EventRecord) -> String {
    serde_json::to_string(&event.args).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_event_page(page: &EventPage, format: &OutputFormat) -> String {
    let p = &page.pagination;
    match format {
        OutputFormat::Table => format!(
            "{}\nPage {} of {} ({} events, {} per page)",
            format_events_table(&page.events),
            p.page,
            p.total_pages,
            p.total,
            p.page_size
        ),
        OutputFormat::Json => to_json(page),
        OutputFormat::Csv => format_events_csv(&page.events),
    }
}

pub fn format_transactions(transactions: &[Transaction], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_transactions_table(transactions),
        OutputFormat::Json => to_json(transactions),
        OutputFormat::Csv => format_transactions_csv(transactions),
    }
}

fn format_transactions_table(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "No transactions found.".to_string();
    }

    let mut table = new_table(vec![
        "Block",
        "Tx Hash",
        "From",
        "To",
        "Value (Wei)",
        "Gas Used",
        "Status",
    ]);
    for tx in transactions {
        table.add_row(vec![
            Cell::new(tx.block_number),
            Cell::new(format_tx_hash(&tx.hash)),
            Cell::new(&tx.from_address),
            Cell::new(tx.to_address.as_deref().unwrap_or("(create)")),
            Cell::new(&tx.value),
            Cell::new(tx.gas_used),
            Cell::new(if tx.status == 1 { "success" } else { "failed" }),
        ]);
    }

    table.to_string()
}

fn format_transactions_csv(transactions: &[Transaction]) -> String {
    to_csv(
        &[
            "block_number",
            "hash",
            "from",
            "to",
            "value_wei",
            "gas_used",
            "gas_price",
            "timestamp",
            "status",
        ],
        transactions.iter().map(|tx| {
            vec![
                tx.block_number.to_string(),
                tx.hash.clone(),
                tx.from_address.clone(),
                tx.to_address.clone().unwrap_or_default(),
                tx.value.clone(),
                tx.gas_used.to_string(),
                tx.gas_price.clone(),
                tx.timestamp.to_string(),
                tx.status.to_string(),
            ]
        }),
    )
}

pub fn format_blocks(blocks: &[Block], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if blocks.is_empty() {
                return "No blocks found.".to_string();
            }
            let mut table = new_table(vec!["Number", "Hash", "Timestamp"]);
            for block in blocks {
                table.add_row(vec![
                    Cell::new(block.number),
                    Cell::new(&block.hash),
                    Cell::new(block.timestamp),
                ]);
            }
            table.to_string()
        }
        OutputFormat::Json => to_json(blocks),
        OutputFormat::Csv => to_csv(
            &["number", "hash", "timestamp"],
            blocks.iter().map(|block| {
                vec![
                    block.number.to_string(),
                    block.hash.clone(),
                    block.timestamp.to_string(),
                ]
            }),
        ),
    }
}

pub fn format_contracts(contracts: &[Contract], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if contracts.is_empty() {
                return "No contracts registered.".to_string();
            }
            let mut table = new_table(vec!["Address", "Name", "ABI Entries"]);
            for contract in contracts {
                table.add_row(vec![
                    Cell::new(&contract.address),
                    Cell::new(&contract.name),
                    Cell::new(abi_entries(contract)),
                ]);
            }
            table.to_string()
        }
        OutputFormat::Json => to_json(contracts),
        OutputFormat::Csv => to_csv(
            &["address", "name", "abi_entries"],
            contracts.iter().map(|contract| {
                vec![
                    contract.address.clone(),
                    contract.name.clone(),
                    abi_entries(contract).to_string(),
                ]
            }),
        ),
    }
}

fn abi_entries(contract: &Contract) -> usize {
    contract.abi.as_array().map_or(0, Vec::len)
}

pub fn format_stats(stats: &Stats, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            let mut table = new_table(vec!["Metric", "Value"]);

            table.add_row(vec![Cell::new("Total Events"), Cell::new(stats.total_events)]);
            table.add_row(vec![
                Cell::new("Total Transactions"),
                Cell::new(stats.total_transactions),
            ]);
            table.add_row(vec![Cell::new("Total Blocks"), Cell::new(stats.total_blocks)]);
            table.add_row(vec![
                Cell::new("Monitored Contracts"),
                Cell::new(stats.monitored_contracts),
            ]);
            table.add_row(vec![
                Cell::new("Latest Block"),
                Cell::new(optional(stats.latest_block)),
            ]);
            table.add_row(vec![Cell::new("Running"), Cell::new(stats.is_running)]);

            table.to_string()
        }
        OutputFormat::Json => {
            serde_json::to_string_pretty(stats).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Csv => to_csv(
            &["metric", "value"],
            [
                vec!["total_events".to_string(), stats.total_events.to_string()],
                vec![
                    "total_transactions".to_string(),
                    stats.total_transactions.to_string(),
                ],
                vec!["total_blocks".to_string(), stats.total_blocks.to_string()],
                vec![
                    "monitored_contracts".to_string(),
                    stats.monitored_contracts.to_string(),
                ],
                vec!["latest_block".to_string(), optional(stats.latest_block)],
                vec!["is_running".to_string(), stats.is_running.to_string()],
            ],
        ),
    }
}

fn format_tx_hash(hash: &str) -> String {
    if hash.len() <= 12 {
        return hash.to_string();
    }
    format!("{}...{}", &hash[..6], &hash[hash.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventArgs, EventValue};

    fn stats() -> Stats {
        Stats {
            total_events: 3,
            total_transactions: 2,
            total_blocks: 1,
            monitored_contracts: 1,
            latest_block: None,
            is_running: false,
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!(OutputFormat::from("JSON"), OutputFormat::Json));
        assert!(matches!(OutputFormat::from("csv"), OutputFormat::Csv));
        assert!(matches!(OutputFormat::from("anything"), OutputFormat::Table));
    }

    #[test]
    fn test_stats_json_is_camel_case() {
        let output = format_stats(&stats(), &OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["totalEvents"], 3);
        assert!(value["latestBlock"].is_null());
    }

    #[test]
    fn test_stats_csv() {
        let output = format_stats(&stats(), &OutputFormat::Csv);
        assert!(output.starts_with("metric,value\n"));
        assert!(output.contains("latest_block,N/A"));
    }

    #[test]
    fn test_events_csv_embeds_args_as_json() {
        let mut args = EventArgs::new();
        args.insert("amount", EventValue::BigInt("1000000000000000000000".into()));
        let event = EventRecord {
            id: 1,
            contract_address: "0xabc".into(),
            event_name: Some("Deposit".into()),
            block_number: 7,
            transaction_hash: format!("0x{}", "11".repeat(32)),
            log_index: 0,
            args,
            timestamp: 1,
            inserted_at: 1,
        };

        let output = format_events(&[event], &OutputFormat::Csv);
        assert!(output.contains(r#""{""amount"":""1000000000000000000000""}""#));
    }

    #[test]
    fn test_format_tx_hash_handles_short_values() {
        assert_eq!(format_tx_hash("0xabc"), "0xabc");
        assert_eq!(format_tx_hash(&format!("0x{}", "ab".repeat(32))), "0xabab...abab");
    }
}
