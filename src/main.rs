use std::sync::Arc;

use botroute::client::ManagementClient;
use botroute::config::load_config;
use botroute::connection::ConnectionManager;
use botroute::correlation;
use botroute::router::TopicRouter;
use botroute::transport::MqttTransport;
use botroute::utils::logging;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "botroute", version, about = "Device message router")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Publish a payload to bot.device_<device>.<channel>.
    Publish {
        device: String,
        channel: String,
        payload: String,
        /// Request id to stamp; a random one is generated when omitted.
        #[arg(long)]
        request_id: Option<String>,
        /// Mark the message as derived from an earlier reply.
        #[arg(long)]
        cascade: bool,
    },
    /// Print messages arriving on one of the worker queues until interrupted.
    Tail {
        #[arg(value_enum)]
        queue: TailQueue,
    },
    /// List broker connections whose user contains <name>.
    Connections { name: String },
    /// Force-close every broker connection whose user contains <name>.
    CloseConnections { name: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TailQueue {
    Logs,
    Resources,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = load_config()?;
    logging::init(&settings.app.log_level);

    match cli.command {
        Command::Publish {
            device,
            channel,
            payload,
            request_id,
            cascade,
        } => {
            let router = router(settings);
            let request_id = request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            correlation::with_request_id(request_id.clone(), async {
                if cascade {
                    router.publish_cascade(payload, device.as_str(), &channel).await
                } else {
                    router.publish(payload, device.as_str(), &channel).await
                }
            })
            .await?;
            info!(request_id = %request_id, "message published");
        }
        Command::Tail { queue } => {
            let router = router(settings);
            let binding = match queue {
                TailQueue::Logs => router.log_queue_binding().await?,
                TailQueue::Resources => router.resource_queue_binding().await?,
            };
            let mut deliveries = binding.consume().await?;
            info!(queue = binding.queue(), "tailing, press ctrl-c to stop");
            loop {
                tokio::select! {
                    delivery = deliveries.recv() => match delivery {
                        Some(delivery) => println!(
                            "{} {} {}",
                            delivery.routing_key,
                            delivery.correlation_id.as_deref().unwrap_or("-"),
                            delivery.payload_str()
                        ),
                        None => {
                            warn!("broker connection closed");
                            break;
                        }
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        Command::Connections { name } => {
            let client = ManagementClient::from_settings(&settings)?;
            for connection in client.find_connections_by_name(&name).await? {
                println!("{connection}");
            }
        }
        Command::CloseConnections { name } => {
            let client = ManagementClient::from_settings(&settings)?;
            let report = client.close_connections_for(&name).await?;
            for connection in &report.closed {
                println!("closed {connection}");
            }
            for (connection, error) in &report.failed {
                eprintln!("failed {connection}: {error}");
            }
            if !report.is_complete() {
                return Err(format!(
                    "{} of {} connections could not be closed",
                    report.failed.len(),
                    report.attempted()
                )
                .into());
            }
        }
    }

    Ok(())
}

fn router(settings: botroute::config::Settings) -> TopicRouter {
    let transport = Arc::new(MqttTransport::new(settings.broker.mqtt_port));
    TopicRouter::new(Arc::new(ConnectionManager::new(transport, settings)))
}
