//! Subconjunto do protocolo de rede do NUT (`upsd`).
//!
//! Protocolo texto, uma linha ASCII por comando, resposta terminada em
//! `\n`. Só o necessário para clientes de polling (Home Assistant, `upsc`):
//!
//! ```text
//! USERNAME x / PASSWORD x / LOGIN / LOGOUT   → OK
//! LIST UPS                                   → BEGIN LIST UPS … END LIST UPS
//! LIST VAR <ups>                             → BEGIN LIST VAR … END LIST VAR
//! GET VAR <ups> <var>                        → VAR <ups> <var> <valor>
//! ```
//!
//! Autenticação é aceita sempre: os clientes exigem o handshake, mas o
//! servidor é somente leitura. Comandos desconhecidos não têm resposta.

use crate::aggregator::Aggregator;
use crate::types::AggregateMetrics;
use std::fmt;
use std::sync::Arc;

pub const OK: &str = "OK";
pub const ERR_UNKNOWN_UPS: &str = "ERR UNKNOWN-UPS";
/// Valor de status antes da primeira telemetria.
pub const UNKNOWN: &str = "UNKNOWN";

// ──────────────────────────────────────────────
// Comandos
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Username,
    Password,
    Login,
    Logout,
    ListUps,
    ListVar { ups: String },
    GetVar { ups: String, var: String },
}

impl Command {
    /// Interpreta uma linha do cliente. `None` para comandos desconhecidos
    /// ou incompletos.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let command = match (tokens.next()?, tokens.next(), tokens.next()) {
            ("USERNAME", _, _) => Self::Username,
            ("PASSWORD", _, _) => Self::Password,
            ("LOGIN", _, _) => Self::Login,
            ("LOGOUT", _, _) => Self::Logout,
            ("LIST", Some("UPS"), None) => Self::ListUps,
            ("LIST", Some("VAR"), Some(ups)) => Self::ListVar {
                ups: ups.to_string(),
            },
            ("GET", Some("VAR"), Some(ups)) => Self::GetVar {
                ups: ups.to_string(),
                var: tokens.next()?.to_string(),
            },
            _ => return None,
        };
        Some(command)
    }
}

// ──────────────────────────────────────────────
// Variáveis
// ──────────────────────────────────────────────

/// Variáveis exportadas por dispositivo, na ordem do `LIST VAR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    BatteryCharge,
    BatteryCapacity,
    BatteryCapacityNominal,
    BatteryVoltage,
    BatteryTemperature,
    BatteryRuntime,
    BatteryStatus,
    UpsStatus,
    UpsTimestamp,
}

impl Variable {
    pub const ALL: [Variable; 9] = [
        Variable::BatteryCharge,
        Variable::BatteryCapacity,
        Variable::BatteryCapacityNominal,
        Variable::BatteryVoltage,
        Variable::BatteryTemperature,
        Variable::BatteryRuntime,
        Variable::BatteryStatus,
        Variable::UpsStatus,
        Variable::UpsTimestamp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variable::BatteryCharge => "battery.charge",
            Variable::BatteryCapacity => "battery.capacity",
            Variable::BatteryCapacityNominal => "battery.capacity.nominal",
            Variable::BatteryVoltage => "battery.voltage",
            Variable::BatteryTemperature => "battery.temperature",
            Variable::BatteryRuntime => "battery.runtime",
            Variable::BatteryStatus => "battery.status",
            Variable::UpsStatus => "ups.status",
            Variable::UpsTimestamp => "ups.timestamp",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }

    /// Valor da variável; sem telemetria, `0` ou `UNKNOWN`.
    pub fn value(self, metrics: Option<&AggregateMetrics>) -> VarValue {
        let Some(m) = metrics else {
            return match self {
                Variable::BatteryStatus | Variable::UpsStatus => VarValue::Text(UNKNOWN),
                _ => VarValue::Int(0),
            };
        };
        match self {
            Variable::BatteryCharge => VarValue::Float(m.charge),
            Variable::BatteryCapacity => VarValue::Float(m.capacity_ah),
            Variable::BatteryCapacityNominal => VarValue::Float(m.capacity_nominal_ah),
            Variable::BatteryVoltage => VarValue::Float(m.voltage),
            Variable::BatteryTemperature => VarValue::Float(m.temperature),
            Variable::BatteryRuntime => VarValue::Int(m.runtime_secs),
            Variable::BatteryStatus => VarValue::Text(m.battery_status.as_str()),
            Variable::UpsStatus => VarValue::Text(m.ups_status.as_str()),
            Variable::UpsTimestamp => VarValue::Int(m.timestamp),
        }
    }
}

/// Valor renderizado no protocolo: floats com uma casa decimal, inteiros
/// sem casas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VarValue {
    Float(f64),
    Int(u64),
    Text(&'static str),
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Float(v) => {
                // Médias negativas muito pequenas arredondam para "-0.0"
                let text = format!("{v:.1}");
                match text.strip_prefix('-') {
                    Some(rest) if rest == "0.0" => f.write_str(rest),
                    _ => f.write_str(&text),
                }
            }
            VarValue::Int(v) => write!(f, "{v}"),
            VarValue::Text(s) => f.write_str(s),
        }
    }
}

// ──────────────────────────────────────────────
// Handler
// ──────────────────────────────────────────────

/// Responde comandos NUT a partir do snapshot atual do agregador.
#[derive(Debug, Clone)]
pub struct NutHandler {
    devices: Vec<String>,
    description: String,
    aggregator: Arc<Aggregator>,
}

impl NutHandler {
    /// `devices` são os nomes de UPS na ordem da configuração.
    pub fn new(devices: Vec<String>, description: impl Into<String>, aggregator: Arc<Aggregator>) -> Self {
        Self {
            devices,
            description: description.into(),
            aggregator,
        }
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Resposta completa (com `\n` final) para uma linha do cliente, ou
    /// `None` quando o comando deve ser ignorado.
    pub fn handle(&self, line: &str) -> Option<String> {
        let response = match Command::parse(line)? {
            Command::Username | Command::Password | Command::Login | Command::Logout => {
                format!("{OK}\n")
            }
            Command::ListUps => self.list_ups(),
            Command::ListVar { ups } => self.list_var(&ups),
            Command::GetVar { ups, var } => self.get_var(&ups, &var),
        };
        Some(response)
    }

    fn is_configured(&self, ups: &str) -> bool {
        self.devices.iter().any(|d| d == ups)
    }

    fn list_ups(&self) -> String {
        let mut out = String::from("BEGIN LIST UPS\n");
        for name in &self.devices {
            out.push_str(&format!("{name} {}\n", self.description));
        }
        out.push_str("END LIST UPS\n");
        out
    }

    fn list_var(&self, ups: &str) -> String {
        if !self.is_configured(ups) {
            return format!("{ERR_UNKNOWN_UPS}\n");
        }
        let snapshot = self.aggregator.snapshot(ups);
        let mut out = String::from("BEGIN LIST VAR\n");
        for var in Variable::ALL {
            out.push_str(&format!(
                "VAR {ups} {} {}\n",
                var.name(),
                var.value(snapshot.as_ref())
            ));
        }
        out.push_str("END LIST VAR\n");
        out
    }

    fn get_var(&self, ups: &str, var: &str) -> String {
        if !self.is_configured(ups) {
            return format!("{ERR_UNKNOWN_UPS}\n");
        }
        // Variável desconhecida num UPS conhecido responde 0, não erro.
        let value = match Variable::from_name(var) {
            Some(v) => v.value(self.aggregator.snapshot(ups).as_ref()),
            None => VarValue::Int(0),
        };
        format!("VAR {ups} {var} {value}\n")
    }
}
