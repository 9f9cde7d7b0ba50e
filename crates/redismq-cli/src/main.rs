use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use redismq_core::heartbeat::online_consumers;
use redismq_core::queue::{
    list_dead_letter_queues, list_queues, queue_sizes, read_dead_letters, DeadLetter,
};
use redismq_core::storage::{Connector, RedisConnector, Store};
use redismq_core::{Config, Producer};
use tracing::info;

#[derive(Parser)]
#[command(name = "redismq", about = "redismq queue inspection CLI")]
struct Cli {
    /// Config file (default: ./redismq.toml, then /etc/redismq/redismq.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Redis URL, overriding the config file
    #[arg(long, env = "REDISMQ_REDIS_URL", global = true)]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List queues with their pending and dead-letter counts
    Queues,

    /// Print the dead-letter list of a queue, oldest first
    DeadLetters {
        /// Queue name
        queue: String,

        /// Remove the printed entries
        #[arg(long)]
        flush: bool,
    },

    /// List consumers with a live heartbeat, grouped by queue
    Consumers,

    /// Enqueue one JSON payload
    Produce {
        /// Queue name
        queue: String,

        /// Payload as JSON
        payload: String,

        /// Message TTL in milliseconds (0 = none)
        #[arg(long, default_value = "0")]
        ttl: u64,
    },
}

fn load_config(explicit: Option<&Path>) -> Config {
    if let Some(path) = explicit {
        return match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        };
    }

    let paths = ["redismq.toml", "/etc/redismq/redismq.toml"];
    for path in &paths {
        if Path::new(path).exists() {
            match Config::load(path) {
                Ok(config) => {
                    info!(path, "loaded configuration");
                    return config;
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    process::exit(1);
                }
            }
        }
    }

    info!("no config file found, using defaults");
    Config::default()
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("Error: {context}: {err}");
    process::exit(1);
}

async fn connect(connector: &RedisConnector, url: &str) -> Box<dyn Store> {
    match connector.connect().await {
        Ok(store) => store,
        Err(_) => {
            eprintln!("Error: cannot connect to redis at {url}");
            process::exit(1);
        }
    }
}

async fn cmd_queues(store: &mut dyn Store) {
    let main_keys = list_queues(store)
        .await
        .unwrap_or_else(|e| fail("listing queues", e));
    let dead_keys = list_dead_letter_queues(store)
        .await
        .unwrap_or_else(|e| fail("listing dead-letter queues", e));
    if main_keys.is_empty() && dead_keys.is_empty() {
        println!("No queues found");
        return;
    }

    let pending = queue_sizes(store, &main_keys)
        .await
        .unwrap_or_else(|e| fail("reading queue sizes", e));
    let dead = queue_sizes(store, &dead_keys)
        .await
        .unwrap_or_else(|e| fail("reading dead-letter sizes", e));

    let mut rows: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for summary in pending {
        rows.entry(summary.name).or_default().0 = summary.size;
    }
    for summary in dead {
        rows.entry(summary.name).or_default().1 = summary.size;
    }

    println!("{:<40} {:>10} {:>10}", "QUEUE", "PENDING", "DEAD");
    for (name, (pending, dead)) in rows {
        println!("{name:<40} {pending:>10} {dead:>10}");
    }
}

async fn cmd_dead_letters(store: &mut dyn Store, queue: String, flush: bool) {
    let entries = read_dead_letters(store, &queue, flush)
        .await
        .unwrap_or_else(|e| fail(&format!("reading dead letters of \"{queue}\""), e));
    if entries.is_empty() {
        println!("No dead letters for queue \"{queue}\"");
        return;
    }

    for entry in &entries {
        match entry {
            DeadLetter::Message(message) => match serde_json::to_string(message) {
                Ok(line) => println!("{line}"),
                Err(e) => fail("encoding message", e),
            },
            DeadLetter::Raw(raw) => println!("{raw}"),
        }
    }
    if flush {
        println!("Flushed {} dead letter(s) from \"{queue}\"", entries.len());
    }
}

async fn cmd_consumers(store: &mut dyn Store) {
    let grouped = online_consumers(store)
        .await
        .unwrap_or_else(|e| fail("listing consumers", e));
    if grouped.is_empty() {
        println!("No consumers online");
        return;
    }

    for (queue, consumers) in grouped {
        println!("Queue: {queue}");
        for consumer in consumers {
            match consumer.resources {
                Some(res) => println!(
                    "  {}  pid={} rss={} cpu={:.1}%",
                    consumer.consumer_id, res.pid, res.ram.rss, res.cpu.usage
                ),
                None => println!("  {}  (no resource report)", consumer.consumer_id),
            }
        }
    }
}

async fn cmd_produce(
    config: &Config,
    connector: &RedisConnector,
    queue: String,
    payload: String,
    ttl: u64,
) {
    let payload: serde_json::Value =
        serde_json::from_str(&payload).unwrap_or_else(|e| fail("payload is not valid JSON", e));
    let mut producer = Producer::connect(&queue, config, connector)
        .await
        .unwrap_or_else(|e| fail(&format!("connecting producer to \"{queue}\""), e));
    let sent = if ttl > 0 {
        producer
            .produce_with_ttl(&payload, std::time::Duration::from_millis(ttl))
            .await
    } else {
        producer.produce(&payload).await
    };
    match sent {
        Ok(message) => println!("Enqueued {} on \"{queue}\"", message.uuid),
        Err(e) => fail("producing message", e),
    }
}

#[tokio::main]
async fn main() {
    redismq_core::telemetry::init_with_default("warn");

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref());
    if let Some(url) = cli.redis_url {
        config.redis.url = url;
    }

    let connector = RedisConnector::open(&config.redis.url)
        .unwrap_or_else(|e| fail(&format!("invalid redis url {}", config.redis.url), e));

    match cli.command {
        Commands::Queues => {
            let mut store = connect(&connector, &config.redis.url).await;
            cmd_queues(store.as_mut()).await
        }
        Commands::DeadLetters { queue, flush } => {
            let mut store = connect(&connector, &config.redis.url).await;
            cmd_dead_letters(store.as_mut(), queue, flush).await
        }
        Commands::Consumers => {
            let mut store = connect(&connector, &config.redis.url).await;
            cmd_consumers(store.as_mut()).await
        }
        Commands::Produce {
            queue,
            payload,
            ttl,
        } => cmd_produce(&config, &connector, queue, payload, ttl).await,
    }
}
