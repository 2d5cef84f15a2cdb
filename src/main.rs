use msq::config::load_config;
use msq::utils::logging;
use msq::{Exchange, MessageId};
use tracing::{error, info};

const DEMO_TOPIC: &str = "demo";

#[tokio::main]
async fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&config.logging.level);

    if let Err(e) = run(config).await {
        error!("exchange failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: msq::Settings) -> Result<(), Box<dyn std::error::Error>> {
    let exchange = Exchange::open(&config)?;
    exchange.run()?;

    let consumer = exchange.new_consumer(DEMO_TOPIC, "log", |id: &MessageId, payload: &[u8]| {
        info!(%id, payload = %String::from_utf8_lossy(payload), "received");
        Ok(())
    })?;

    let id = exchange
        .new_publisher()?
        .publish(DEMO_TOPIC, "exchange started")?;
    info!(%id, topic = DEMO_TOPIC, "published");

    let metrics = exchange.get_topic(DEMO_TOPIC)?.metrics()?;
    info!(
        messages = metrics.total_messages,
        channels = metrics.total_channels,
        "topic metrics"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");

    consumer.stop();
    exchange.stop();
    consumer.join().await?;
    Ok(())
}
