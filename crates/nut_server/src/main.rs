//! # EcoFlow NUT Server
//!
//! Expõe a telemetria das estações EcoFlow (via MQTT da nuvem EcoFlow)
//! como UPSs do Network UPS Tools, para Home Assistant, `upsc` e afins.
//!
//! ## Uso
//! ```bash
//! ecoflow_nut_server                  # config.toml ao lado do executável
//! ecoflow_nut_server /etc/ecoflow.toml
//! ```

mod mqtt_thread;
mod server;

use ecoflow_core::{Aggregator, AppConfig, Bridge, NutHandler};
use mqtt_thread::spawn_mqtt_thread;
use server::NutServer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Configuração inválida ({}): {e}", config_path.display());
        }
        std::process::exit(2);
    }

    // ── Servidor NUT ──
    let aggregator = Arc::new(Aggregator::new());
    let handler = NutHandler::new(
        config.ups_names(),
        config.nut.description.clone(),
        Arc::clone(&aggregator),
    );
    let idle_timeout =
        (config.nut.idle_timeout_secs > 0).then(|| Duration::from_secs(config.nut.idle_timeout_secs));

    let bind_addr = config.nut.bind_addr();
    let server = match NutServer::bind(&bind_addr, handler, idle_timeout) {
        Ok(server) => server,
        Err(e) => {
            error!("Falha ao abrir servidor NUT em {bind_addr}: {e}");
            std::process::exit(1);
        }
    };

    // ── Transporte MQTT ──
    let serials: Vec<String> = config.devices.iter().map(|d| d.serial.clone()).collect();
    let rx = spawn_mqtt_thread(config.mqtt.clone(), serials);
    let bridge = Bridge::new(config.devices.clone(), aggregator);

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   🔋 ECOFLOW NUT SERVER – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  NUT:     {}", server.local_addr());
    println!("  Broker:  {}:{}", config.mqtt.host, config.mqtt.port);
    for device in &config.devices {
        println!("  UPS:     {} ({})", device.ups_name, device.serial);
    }
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop de ingestão ──
    for msg in rx.iter() {
        bridge.ingest(&msg.topic, &msg.payload);
    }

    // O channel só desconecta se a thread MQTT morrer.
    error!("Transporte MQTT encerrado, desligando servidor NUT");
    server.shutdown();
    info!("Encerrado");
    std::process::exit(1);
}
