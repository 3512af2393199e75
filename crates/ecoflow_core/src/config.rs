//! Configuração unificada via TOML.
//!
//! Um único `config.toml` com o servidor NUT, os parâmetros do broker MQTT
//! e a lista de dispositivos (serial → nome de UPS).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Marcador substituído pelo serial nos templates de tópico.
pub const SERIAL_PLACEHOLDER: &str = "{serial}";

/// Configuração do servidor NUT.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NutConfig {
    /// IP local para bind
    pub host: String,
    /// Porta TCP (3493 é a porta padrão do upsd)
    pub port: u16,
    /// Descrição exibida no `LIST UPS`
    pub description: String,
    /// Timeout de inatividade por cliente em segundos (0 = sem timeout)
    pub idle_timeout_secs: u64,
}

impl Default for NutConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3493,
            description: "EcoFlow River 3 Plus".into(),
            idle_timeout_secs: 300,
        }
    }
}

impl NutConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parâmetros do broker MQTT da EcoFlow.
///
/// Conta, senha e client id vêm da certificação da API da EcoFlow, feita
/// fora deste processo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: String,
    pub password: String,
    /// Client id (vazio = gerado a partir do nome do processo)
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Templates de tópico; `{serial}` é trocado pelo serial de cada dispositivo
    pub topics: Vec<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "mqtt-e.ecoflow.com".into(),
            port: 8883,
            use_tls: true,
            username: String::new(),
            password: String::new(),
            client_id: String::new(),
            keep_alive_secs: 60,
            topics: vec![
                "/app/device/property/{serial}".into(),
                "/app/device/thing/property/set_reply/{serial}".into(),
                "/app/device/thing/property/post/{serial}".into(),
            ],
        }
    }
}

impl MqttConfig {
    /// Tópicos de todos os dispositivos, na ordem da configuração.
    pub fn topics_for<'a>(&self, serials: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        serials
            .into_iter()
            .flat_map(|serial| {
                self.topics
                    .iter()
                    .map(move |t| t.replace(SERIAL_PLACEHOLDER, serial))
            })
            .collect()
    }
}

/// Um dispositivo EcoFlow exposto como UPS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Número de série (aparece nos tópicos MQTT)
    pub serial: String,
    /// Nome do UPS no protocolo NUT
    pub ups_name: String,
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub nut: NutConfig,
    pub mqtt: MqttConfig,
    pub devices: Vec<DeviceConfig>,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Nomes de UPS na ordem da configuração.
    pub fn ups_names(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.ups_name.clone()).collect()
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.nut.port == 0 {
            errors.push("Porta do servidor NUT não pode ser 0".into());
        }
        if self.mqtt.host.trim().is_empty() {
            errors.push("Host do broker MQTT vazio".into());
        }
        if self.mqtt.port == 0 {
            errors.push("Porta do broker MQTT não pode ser 0".into());
        }
        if self.devices.is_empty() {
            errors.push("Nenhum dispositivo configurado em [[devices]]".into());
        }

        let mut names = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            if device.serial.trim().is_empty() {
                errors.push(format!("Dispositivo #{i}: serial vazio"));
            }
            if device.ups_name.is_empty() || device.ups_name.contains(char::is_whitespace) {
                errors.push(format!(
                    "Dispositivo #{i}: ups_name inválido {:?} (vazio ou com espaços)",
                    device.ups_name
                ));
            }
            if !names.insert(device.ups_name.as_str()) {
                errors.push(format!("ups_name duplicado: {}", device.ups_name));
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig {
            devices: vec![
                DeviceConfig {
                    serial: "R651ZEB5XF000001".into(),
                    ups_name: "porao".into(),
                },
                DeviceConfig {
                    serial: "R651ZEB5XF000002".into(),
                    ups_name: "servidor".into(),
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn sample_config_is_valid() {
        let errors = sample().validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn default_config_needs_devices() {
        let errors = AppConfig::default().validate();
        assert_eq!(errors.len(), 1, "Erros: {:?}", errors);
    }

    #[test]
    fn rejects_bad_devices() {
        let mut config = sample();
        config.devices.push(DeviceConfig {
            serial: "".into(),
            ups_name: "porao".into(),
        });
        config.devices.push(DeviceConfig {
            serial: "X".into(),
            ups_name: "com espaco".into(),
        });
        config.nut.port = 0;
        let errors = config.validate();
        assert_eq!(errors.len(), 4, "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = sample();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.nut.port, parsed.nut.port);
        assert_eq!(config.devices, parsed.devices);
        assert_eq!(config.mqtt.topics, parsed.mqtt.topics);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[nut]
port = 13493

[[devices]]
serial = "R651"
ups_name = "sala"
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.nut.port, 13493);
        // Outros campos devem ter valor padrão
        assert_eq!(config.nut.host, "0.0.0.0");
        assert_eq!(config.nut.idle_timeout_secs, 300);
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.ups_names(), vec!["sala".to_string()]);
        assert_eq!(config.nut.bind_addr(), "0.0.0.0:13493");
    }

    #[test]
    fn expands_topic_templates() {
        let config = sample();
        let topics = config
            .mqtt
            .topics_for(config.devices.iter().map(|d| d.serial.as_str()));
        assert_eq!(topics.len(), 6);
        assert_eq!(topics[0], "/app/device/property/R651ZEB5XF000001");
        assert_eq!(topics[5], "/app/device/thing/property/post/R651ZEB5XF000002");
    }

    #[test]
    fn load_missing_file_falls_back_to_default() {
        let config = AppConfig::load(Path::new("/caminho/que/nao/existe/config.toml"));
        assert_eq!(config.nut.port, 3493);
        assert!(config.devices.is_empty());
    }
}
