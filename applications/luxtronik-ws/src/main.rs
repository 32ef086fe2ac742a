use luxtronik_ws::{discovery, mqtt, validate_credentials, Bridge, Config, Coordinator};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(
        variant = %cfg.layout.variant,
        interval_secs = cfg.luxtronik.update_interval_secs,
        "loaded config"
    );

    let host = match cfg.host() {
        Some(h) => h.to_string(),
        None => discovery::default_host().await,
    };

    if let Err(kind) = validate_credentials(
        &host,
        cfg.luxtronik.port,
        &cfg.luxtronik.password,
        cfg.cycle_timeout(),
    )
    .await
    {
        error!(host = %host, error = %kind, "cannot set up controller");
        anyhow::bail!("controller setup failed: {kind}");
    }

    let (client, eventloop) = mqtt::new(mqtt::build_options(&cfg.mqtt));
    let mqtt_task = mqtt::spawn_event_loop(eventloop);
    info!(
        host = %cfg.mqtt.host,
        port = cfg.mqtt.port,
        "mqtt client started"
    );

    let coordinator = Coordinator::from_config(&cfg, &host)?;
    // The first tick performs setup; a failed setup is retried on later ticks
    let bridge = Bridge::new(
        coordinator,
        mqtt::MqttHost::new(client, &cfg.mqtt),
        cfg.luxtronik.decimal_separator,
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    bridge.run(cfg.update_interval(), shutdown).await;

    mqtt_task.abort();
    Ok(())
}
