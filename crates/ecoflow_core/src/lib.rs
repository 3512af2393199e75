//! # EcoFlow Core
//!
//! Pipeline que transforma a telemetria binária das estações EcoFlow em
//! variáveis de UPS servidas pelo protocolo NUT.
//!
//! ## Módulos
//! - [`proto`] – Mensagens protobuf da EcoFlow (prost)
//! - [`envelope`] – Envelope binário, máscara XOR e despacho de schemas
//! - [`types`] – Pack, métricas agregadas e status
//! - [`aggregator`] – Estado multi-pack por dispositivo
//! - [`nut`] – Comandos e respostas do protocolo NUT
//! - [`ingest`] – Ponte tópico/payload → agregador
//! - [`config`] – Configuração unificada via TOML

pub mod proto;
pub mod envelope;
pub mod types;
pub mod aggregator;
pub mod nut;
pub mod ingest;
pub mod config;

// Re-exports convenientes
pub use aggregator::Aggregator;
pub use config::{AppConfig, DeviceConfig, MqttConfig, NutConfig};
pub use envelope::decode;
pub use ingest::{Bridge, IngestOutcome};
pub use nut::NutHandler;
pub use types::{AggregateMetrics, PackRecord, Telemetry};
