//! Interactive REPL.

use crate::commands::{format_json, format_raw_json, parse_args, parse_command};
use colored::Colorize;
use cproto_client::Client;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::net::SocketAddr;

const HELP_TEXT: &str = r#"
Available commands:
  help                            Show this help
  ping                            Ping the server
  namespaces                      List namespaces
  select <sql>                    Run an SQL query
  meta <namespace> [key]          List meta keys, or read one
  call <command> [args...]        Issue a raw call
  status                          Show connection state
  quit, exit                      Exit the REPL
"#;

pub async fn run(client: Client, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "cproto CLI".bold().cyan());
    println!("Connecting to {}...", addr);

    client.connect().await?;
    println!("{}", "Connected!".green());

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = home::home_dir()
        .map(|h| h.join(".cproto_history"))
        .unwrap_or_else(|| ".cproto_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "cproto>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match execute_repl_command(&client, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    client.terminate();
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

async fn execute_repl_command(
    client: &Client,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
        None => (line.to_lowercase(), ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),
        "quit" | "exit" | "q" => Ok(None),

        "ping" => {
            client.ping().await?;
            Ok(Some("PONG".green().to_string()))
        }

        "namespaces" | "ns" => {
            let namespaces = client.enum_namespaces().await?;
            Ok(Some(format_raw_json(&namespaces)))
        }

        "select" => {
            if rest.is_empty() {
                return Ok(Some("Usage: select <sql>".to_string()));
            }
            let results = client.select_sql(&format!("SELECT {}", rest), 0, 100).await?;
            if let Some(query_id) = results.query_id {
                client.close_results(query_id).await?;
            }
            Ok(Some(format!("{} {} bytes", "Fetched".green(), results.raw.len())))
        }

        "meta" => match args.as_slice() {
            [namespace] => {
                let keys = client.enum_meta(namespace).await?;
                if keys.is_empty() {
                    Ok(Some("No meta keys".yellow().to_string()))
                } else {
                    Ok(Some(keys.join("\n")))
                }
            }
            [namespace, key] => Ok(Some(client.get_meta(namespace, key).await?)),
            _ => Ok(Some("Usage: meta <namespace> [key]".to_string())),
        },

        "call" => {
            let Some((command, call_args)) = args.split_first() else {
                return Ok(Some("Usage: call <command> [args...]".to_string()));
            };
            let code = parse_command(command)?;
            let result = client.call(code, parse_args(call_args)).await?;
            Ok(Some(format_json(&result)?))
        }

        "status" => Ok(Some(format!(
            "state: {:?}, pending calls: {}",
            client.state(),
            client.pending_calls()
        ))),

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for available commands.",
            cmd
        ))),
    }
}
