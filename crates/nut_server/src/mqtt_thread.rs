//! Thread de transporte MQTT que escuta o broker da EcoFlow e envia
//! `(tópico, payload)` para a ingestão via channel.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use ecoflow_core::MqttConfig;
use rumqttc::{Client, Event, MqttOptions, Packet, QoS, Transport};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pausa antes de tentar reconectar ao broker.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Menor keep-alive aceito pelo broker.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Mensagem enviada da thread MQTT para a ingestão.
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Inicia a thread MQTT. Retorna o receiver do channel.
///
/// O channel desconecta se a thread terminar; quem consome trata isso
/// como perda do transporte.
pub fn spawn_mqtt_thread(config: MqttConfig, serials: Vec<String>) -> Receiver<MqttMessage> {
    let (tx, rx) = bounded::<MqttMessage>(256); // Buffer de 256 mensagens

    std::thread::Builder::new()
        .name("mqtt-transport".into())
        .spawn(move || {
            transport_loop(&tx, &config, &serials);
        })
        .expect("Falha ao criar thread MQTT");

    rx
}

fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let client_id = if config.client_id.is_empty() {
        format!("ecoflow-nut-{}", std::process::id())
    } else {
        config.client_id.clone()
    };

    let mut options = MqttOptions::new(client_id, config.host.as_str(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS)));
    if !config.username.is_empty() {
        options.set_credentials(config.username.as_str(), config.password.as_str());
    }
    if config.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    options
}

fn transport_loop(tx: &Sender<MqttMessage>, config: &MqttConfig, serials: &[String]) {
    let topics = config.topics_for(serials.iter().map(String::as_str));
    // Capacidade suficiente para todas as inscrições de uma vez
    let (client, mut connection) = Client::new(mqtt_options(config), topics.len() + 10);

    info!(
        "Conectando ao broker MQTT {}:{} (TLS: {})",
        config.host, config.port, config.use_tls
    );

    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Broker MQTT conectado");
                for topic in &topics {
                    match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                        Ok(()) => info!("Inscrito em {topic}"),
                        Err(e) => warn!("Falha ao inscrever em {topic}: {e}"),
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("{} ({} bytes)", publish.topic, publish.payload.len());
                let msg = MqttMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                // Non-blocking: bloquear aqui atrasaria o keep-alive do broker
                match tx.try_send(msg) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => debug!("Channel cheio, descartando mensagem"),
                    Err(TrySendError::Disconnected(_)) => {
                        info!("Ingestão encerrada, parando transporte MQTT");
                        return;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Erro na conexão MQTT: {e}. Tentando novamente em 2s...");
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
}
