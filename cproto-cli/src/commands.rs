//! Command execution.

use crate::Commands;
use colored::Colorize;
use cproto_client::{Args, Client, CmdCode, Variant};
use serde::Serialize;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl => unreachable!(),
        Commands::ShowConfig => unreachable!(),

        Commands::Ping => {
            client.ping().await?;
            Ok("PONG".green().to_string())
        }

        Commands::Call { command, args } => {
            let code = parse_command(&command)?;
            let result = client.call(code, parse_args(&args)).await?;
            format_json(&result)
        }

        Commands::Select { query, limit } => {
            let results = client.select_sql(&query, 0, limit).await?;
            if let Some(query_id) = results.query_id {
                client.close_results(query_id).await?;
            }
            Ok(format!(
                "{} {} bytes{}",
                "Fetched".green(),
                results.raw.len(),
                results
                    .query_id
                    .map(|id| format!(" (cursor {})", id).dimmed().to_string())
                    .unwrap_or_default()
            ))
        }

        Commands::Namespaces => {
            let namespaces = client.enum_namespaces().await?;
            Ok(format_raw_json(&namespaces))
        }

        Commands::GetMeta { namespace, key } => {
            let value = client.get_meta(&namespace, &key).await?;
            if value.is_empty() {
                Ok(format!("{}: {} has no meta {}", "Warning".yellow(), namespace, key.cyan()))
            } else {
                Ok(value)
            }
        }

        Commands::ListMeta { namespace } => {
            let keys = client.enum_meta(&namespace).await?;
            if keys.is_empty() {
                return Ok("No meta keys".yellow().to_string());
            }
            Ok(keys.join("\n"))
        }
    }
}

/// Parses a command name or numeric code.
pub fn parse_command(name: &str) -> Result<CmdCode, Box<dyn std::error::Error>> {
    if let Ok(code) = name.parse::<u16>() {
        return Ok(CmdCode::from_u16(code)?);
    }
    CmdCode::from_name(name).ok_or_else(|| format!("unknown command '{}'", name).into())
}

/// Converts command-line words into call arguments.
pub fn parse_args<S: AsRef<str>>(words: &[S]) -> Args {
    words.iter().map(|w| parse_value(w.as_ref())).collect()
}

fn parse_value(word: &str) -> Variant {
    match word {
        "null" => Variant::Null,
        "true" => Variant::Bool(true),
        "false" => Variant::Bool(false),
        _ => {
            if let Ok(n) = word.parse::<i64>() {
                Variant::Int64(n)
            } else if let Ok(f) = word.parse::<f64>() {
                Variant::Double(f)
            } else {
                Variant::String(word.to_string())
            }
        }
    }
}

/// Formats a value as pretty JSON.
pub fn format_json<T: Serialize>(value: &T) -> Result<String, Box<dyn std::error::Error>> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Pretty-prints a JSON document returned by the server, falling back to the
/// raw text.
pub fn format_raw_json(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|_| text.to_string())
}
