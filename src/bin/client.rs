//! Interactive client for a logkv server

use clap::Parser;
use logkv::Client;
use std::io::{self, Write};

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive logkv client", long_about = None)]
struct Args {
    /// Address of the server
    #[arg(long, default_value = "127.0.0.1:12347")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let client = Client::new(args.server);

    println!("Using logkv server at {}", client.addr());
    println!("Type 'help' for available commands or 'quit' to exit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        match input {
            "quit" | "exit" => {
                println!("Goodbye!");
                break;
            }
            "help" => {
                print_help();
            }
            _ => {
                if let Err(e) = handle_command(&client, input).await {
                    println!("Error: {}", e);
                }
            }
        }
    }

    Ok(())
}

async fn handle_command(client: &Client, input: &str) -> Result<(), Box<dyn std::error::Error>> {
    let parts: Vec<&str> = input.split_whitespace().collect();

    match parts[0] {
        "insert" => {
            if parts.len() != 3 {
                println!("Usage: insert <key> <value>");
                return Ok(());
            }

            client.insert(parts[1], parts[2]).await?;
            println!("OK");
        }
        "lookup" => {
            if parts.len() != 2 {
                println!("Usage: lookup <key>");
                return Ok(());
            }

            match client.lookup(parts[1]).await? {
                Some(value) => println!("{}", value),
                None => println!("(not found)"),
            }
        }
        "raw" => {
            let line = input["raw".len()..].trim_start();
            println!("{}", client.send_line(line).await?);
        }
        other => {
            println!("Unknown command: {}. Type 'help' for available commands.", other);
        }
    }

    Ok(())
}

fn print_help() {
    println!("Available commands:");
    println!("  insert <key> <value>  - Append a record");
    println!("  lookup <key>          - Show the first value stored for a key");
    println!("  raw <line>            - Send a request line as-is");
    println!("  help                  - Show this help message");
    println!("  quit                  - Exit the client");
}
