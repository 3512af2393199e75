//! Ponte entre o transporte MQTT e o agregador.
//!
//! Recebe `(tópico, payload)` do transporte, resolve o dispositivo pelo
//! serial contido no tópico, descarta mensagens JSON e entrega o resto ao
//! decodificador.

use crate::aggregator::Aggregator;
use crate::config::DeviceConfig;
use crate::envelope;
use crate::types::Telemetry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefixo `{"` das mensagens de status em JSON.
const JSON_PREFIX: [u8; 2] = [0x7B, 0x22];

/// O que aconteceu com uma mensagem recebida.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Pack atualizado no agregador.
    PackUpdated { pack: u32 },
    /// Propriedades de display decodificadas (não alteram o agregado).
    DisplayDecoded,
    /// Nenhum serial configurado aparece no tópico.
    UnknownDevice,
    /// Mensagem de status em JSON.
    JsonIgnored,
    /// Envelope inválido ou schema desconhecido.
    Dropped,
}

/// Liga dispositivos configurados ao agregador.
#[derive(Debug, Clone)]
pub struct Bridge {
    devices: Vec<DeviceConfig>,
    aggregator: Arc<Aggregator>,
}

impl Bridge {
    pub fn new(devices: Vec<DeviceConfig>, aggregator: Arc<Aggregator>) -> Self {
        Self {
            devices,
            aggregator,
        }
    }

    /// Primeiro dispositivo (na ordem da configuração) cujo serial aparece no tópico.
    pub fn resolve(&self, topic: &str) -> Option<&DeviceConfig> {
        self.devices
            .iter()
            .find(|d| !d.serial.is_empty() && topic.contains(d.serial.as_str()))
    }

    /// Processa uma mensagem do transporte.
    pub fn ingest(&self, topic: &str, payload: &[u8]) -> IngestOutcome {
        let Some(device) = self.resolve(topic) else {
            warn!("Dispositivo desconhecido para o tópico {topic}");
            return IngestOutcome::UnknownDevice;
        };

        if payload.starts_with(&JSON_PREFIX) {
            debug!("Mensagem JSON de {}, ignorando", device.ups_name);
            return IngestOutcome::JsonIgnored;
        }

        match envelope::decode(payload, &device.serial) {
            Some(Telemetry::Pack(pack)) => {
                let agg = self.aggregator.update(&device.ups_name, pack);
                info!(
                    "{} pack {} → carga {:.1}% | {:.1} V | {:.1}°C | {} packs | {}",
                    device.ups_name,
                    pack.num,
                    agg.charge,
                    agg.voltage,
                    agg.temperature,
                    agg.pack_count,
                    agg.ups_status
                );
                IngestOutcome::PackUpdated { pack: pack.num }
            }
            Some(Telemetry::Display(props)) => {
                debug!(
                    "{}: {} propriedades de display",
                    device.ups_name,
                    props.fields.len()
                );
                IngestOutcome::DisplayDecoded
            }
            None => IngestOutcome::Dropped,
        }
    }
}
