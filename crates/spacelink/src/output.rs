use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use spacelink_transfer::TxSummary;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_summaries(title: &str, summaries: &[TxSummary], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summaries),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "NODE", "TX", "AGENT", "FILE", "SIZE", "DONE", "STATE",
                ]);
            for tx in summaries {
                table.add_row(vec![
                    tx.node.clone(),
                    tx.tx_id.to_string(),
                    tx.agent_name.clone(),
                    tx.file_name.clone(),
                    tx.file_size.to_string(),
                    format!("{} ({})", tx.total_bytes, percent(tx.total_bytes, tx.file_size)),
                    state(tx).to_string(),
                ]);
            }
            println!("{title}");
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{title}: {} transaction(s)", summaries.len());
            for tx in summaries {
                println!(
                    "  {}:{} {}/{} {}/{} bytes {}",
                    tx.node,
                    tx.tx_id,
                    tx.agent_name,
                    tx.file_name,
                    tx.total_bytes,
                    tx.file_size,
                    state(tx)
                );
            }
        }
    }
}

/// Print a flat list of `(key, value)` pairs.
pub fn print_fields(fields: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = fields
                .iter()
                .map(|(key, value)| ((*key).to_string(), serde_json::Value::String(value.clone())))
                .collect();
            print_json(&map);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in fields {
                table.add_row(vec![(*key).to_string(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (key, value) in fields {
                println!("{key}={value}");
            }
        }
    }
}

fn state(tx: &TxSummary) -> &'static str {
    if tx.complete {
        "complete"
    } else if !tx.sentmeta {
        "pending"
    } else if tx.sentdata {
        "waiting"
    } else {
        "sending"
    }
}

fn percent(done: u64, total: u64) -> String {
    if total == 0 {
        return "-".to_string();
    }
    format!("{:.1}%", done as f64 * 100.0 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> TxSummary {
        TxSummary {
            node: "sat".into(),
            tx_id: 243,
            enabled: true,
            sentmeta: true,
            sentdata: false,
            complete: false,
            file_name: "img.jpg".into(),
            agent_name: "camera".into(),
            file_size: 2048,
            total_bytes: 1024,
        }
    }

    #[test]
    fn state_follows_flags() {
        let mut tx = summary();
        assert_eq!(state(&tx), "sending");
        tx.sentdata = true;
        assert_eq!(state(&tx), "waiting");
        tx.complete = true;
        assert_eq!(state(&tx), "complete");
    }

    #[test]
    fn percent_handles_empty_files() {
        assert_eq!(percent(1024, 2048), "50.0%");
        assert_eq!(percent(0, 0), "-");
    }
}
