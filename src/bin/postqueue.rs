//! postqueue CLI — operator interface to a queue table.

use clap::{Parser, Subcommand};
use postqueue::config::Config;
use postqueue::config::secrets::ExposeSecret;
use postqueue::model::{Filter, NewQueueItems, ProcessOptions, Processed};
use postqueue::telemetry::{TelemetryConfig, init_telemetry};
use postqueue::worker::{PgNotifyWakeUp, Worker, WorkerConfig};
use postqueue::{NoopHandler, Queue};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "postqueue", about = "Postgres-backed work queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or upgrade the queue table
    Migrate,
    /// Enqueue one item per entity id
    Enqueue {
        /// Operation name
        op: String,
        /// Entity type the operation applies to
        entity_type: String,
        /// Entity ids (duplicates are inserted as separate items)
        #[arg(required = true)]
        entity_ids: Vec<i64>,
    },
    /// Process a single queue item
    Process {
        /// Restrict to this operation
        #[arg(long)]
        op: Option<String>,
    },
    /// Run a worker until interrupted
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "postqueue".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let queue = Queue::connect(config.database_url.expose_secret(), config.max_connections).await?;

    match cli.command {
        Command::Migrate => {
            queue.migrate().await?;
            tracing::info!("migrations applied");
        }
        Command::Enqueue {
            op,
            entity_type,
            entity_ids,
        } => {
            let count = queue
                .enqueue(NewQueueItems::new(op, entity_type).entity_ids(entity_ids))
                .await?;
            tracing::info!("Enqueued {count} queue items");
        }
        Command::Process { op } => {
            let mut filter = Filter::all();
            if let Some(op) = op {
                filter = filter.op(op);
            }
            match queue.process_one(filter, &NoopHandler).await? {
                Processed::Empty => println!("Nothing to process."),
                Processed::Completed { batch, .. } => {
                    println!("Processed: {} {} {:?}", batch.op, batch.entity_type, batch.entity_ids)
                }
                Processed::Postponed { batch, .. } => {
                    println!("Postponed: {} {} {:?}", batch.op, batch.entity_type, batch.entity_ids)
                }
            }
        }
        Command::Run => cmd_run(queue, &config).await?,
    }

    Ok(())
}

async fn cmd_run(queue: Queue, config: &Config) -> anyhow::Result<()> {
    let wakeup = PgNotifyWakeUp::connect(&queue, config.poll_interval).await?;
    let worker = Worker::new(
        queue,
        Arc::new(NoopHandler),
        wakeup,
        WorkerConfig::default().options(ProcessOptions::default().limit(config.batch_size)),
    );

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown.shutdown();
    });

    worker.run().await?;
    Ok(())
}
