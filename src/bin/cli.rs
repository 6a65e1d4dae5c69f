//! shardkv CLI Client
//!
//! Command-line interface for interacting with shardkv.
//!
//! Keys and values are taken as UTF-8, or as hex when prefixed with `0x`.

use clap::{Parser, Subcommand};
use shardkv::network::Client;
use shardkv::{FilterOp, KvError, Query, Result};

/// shardkv CLI
#[derive(Parser, Debug)]
#[command(name = "shardkv-cli")]
#[command(about = "CLI for the shardkv database server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:9999")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Increment a counter
    Incr {
        key: String,
        #[arg(default_value = "1")]
        delta: u64,
        /// Starting value for an absent counter
        #[arg(long, default_value = "0")]
        init: u64,
    },

    /// Decrement a counter
    Decr {
        key: String,
        #[arg(default_value = "1")]
        delta: u64,
        /// Starting value for an absent counter
        #[arg(long, default_value = "0")]
        init: u64,
    },

    /// Get values by key
    Get {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Set a key-value pair
    Put { key: String, value: String },

    /// Delete keys
    Del {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Range query starting at a seek position
    Query {
        seek_low: String,
        /// Upper seek bound
        #[arg(long)]
        seek_high: Option<String>,
        /// Filter operator: eq, gte, gt, lte, lt
        #[arg(long, default_value = "eq")]
        op: String,
        /// Return descendants of the seek position
        #[arg(long)]
        ancestor: bool,
        /// Resume exactly at the seek position
        #[arg(long)]
        cursor: bool,
        #[arg(long, default_value = "0")]
        kind: u8,
        #[arg(long, default_value = "0")]
        shape: u8,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long, default_value = "100")]
        limit: usize,
    },
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut client = Client::connect(&args.server)?;

    match args.command {
        Commands::Incr { key, delta, init } => {
            println!("{}", client.incr_decr(&parse_bytes(&key)?, true, delta, init)?);
        }
        Commands::Decr { key, delta, init } => {
            println!("{}", client.incr_decr(&parse_bytes(&key)?, false, delta, init)?);
        }
        Commands::Get { keys } => {
            let keys = keys.iter().map(|k| parse_bytes(k)).collect::<Result<Vec<_>>>()?;
            for (key, value) in keys.iter().zip(client.get(&keys)?) {
                match value {
                    Some(v) => println!("{} = {}", show(key), show(&v)),
                    None => println!("{} (not found)", show(key)),
                }
            }
        }
        Commands::Put { key, value } => {
            client.update(&[(parse_bytes(&key)?, parse_bytes(&value)?)], &[])?;
            println!("OK");
        }
        Commands::Del { keys } => {
            let keys = keys.iter().map(|k| parse_bytes(k)).collect::<Result<Vec<_>>>()?;
            client.update(&[], &keys)?;
            println!("OK");
        }
        Commands::Query {
            seek_low,
            seek_high,
            op,
            ancestor,
            cursor,
            kind,
            shape,
            offset,
            limit,
        } => {
            let seek_low = parse_bytes(&seek_low)?;
            let query = if ancestor {
                Query::ancestor(seek_low)
            } else {
                Query::new(seek_low, parse_op(&op)?)
            };
            let query = query
                .seek_high(seek_high.as_deref().map(parse_bytes).transpose()?.unwrap_or_default())
                .with_cursor(cursor)
                .kind(kind)
                .shape(shape)
                .offset(offset)
                .limit(limit);

            for row in client.query(&query)? {
                println!("{}", show(&row));
            }
        }
    }
    Ok(())
}

fn parse_op(op: &str) -> Result<FilterOp> {
    match op {
        "eq" | "==" => Ok(FilterOp::Eq),
        "gte" | ">=" => Ok(FilterOp::Gte),
        "gt" | ">" => Ok(FilterOp::Gt),
        "lte" | "<=" => Ok(FilterOp::Lte),
        "lt" | "<" => Ok(FilterOp::Lt),
        other => Err(KvError::InvalidParams(format!("unknown filter operator '{}'", other))),
    }
}

/// UTF-8 text, or hex after a `0x` prefix
fn parse_bytes(arg: &str) -> Result<Vec<u8>> {
    let Some(hex) = arg.strip_prefix("0x") else {
        return Ok(arg.as_bytes().to_vec());
    };
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return Err(KvError::InvalidParams(format!("invalid hex: {}", arg)));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| KvError::InvalidParams(format!("invalid hex: {}", arg)))
        })
        .collect()
}

/// Printable form: text if it is plain UTF-8, hex otherwise
fn show(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.chars().all(|c| !c.is_control()) => s.to_string(),
        _ => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            format!("0x{}", hex)
        }
    }
}
