//! Tipos de telemetria das estações EcoFlow.
//!
//! Um [`PackRecord`] representa o último heartbeat de um pack de bateria;
//! [`AggregateMetrics`] é a visão unificada por dispositivo, recalculada a
//! partir de todos os packs conhecidos.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ──────────────────────────────────────────────
// Pack
// ──────────────────────────────────────────────

/// Estado de carga/descarga reportado pelo BMS de um pack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeState {
    #[default]
    Idle,
    Discharging,
    Charging,
}

impl ChargeState {
    /// Converte o valor bruto `chg_dsg_state` (0 idle, 1 descarga, 2 carga).
    /// Valores desconhecidos são tratados como idle.
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            1 => Self::Discharging,
            2 => Self::Charging,
            _ => Self::Idle,
        }
    }
}

/// Heartbeat decodificado de um pack de bateria.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PackRecord {
    /// Índice do pack dentro do dispositivo
    pub num: u32,
    /// Estado de carga (0–100%)
    pub soc: u32,
    /// Tensão (mV)
    pub vol: u32,
    /// Temperatura (°C)
    pub temp: i32,
    /// Capacidade restante (mAh)
    pub remain_cap: u32,
    /// Capacidade de projeto (mAh)
    pub design_cap: u32,
    /// Tempo restante (unidade do fabricante)
    pub remain_time: u32,
    pub state: ChargeState,
}

// ──────────────────────────────────────────────
// Display
// ──────────────────────────────────────────────

/// Valor escalar de uma propriedade de display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int(u64),
    F32(f32),
    F64(f64),
}

/// Upload de propriedades de display, indexado pelo número do campo.
///
/// Só os escalares são guardados; sub-mensagens e strings são ignoradas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayProperties {
    pub fields: BTreeMap<u32, PropertyValue>,
}

/// Resultado de uma decodificação bem-sucedida.
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Pack(PackRecord),
    Display(DisplayProperties),
}

// ──────────────────────────────────────────────
// Agregado
// ──────────────────────────────────────────────

/// Status da bateria no vocabulário NUT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryStatus {
    #[default]
    Charging,
    OnBattery,
}

impl BatteryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Charging => "CHRG",
            Self::OnBattery => "ONBATT",
        }
    }
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status do dispositivo (`ups.status`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsStatus {
    #[default]
    Online,
    OnBattery,
}

impl UpsStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "OL",
            Self::OnBattery => "OB",
        }
    }
}

impl fmt::Display for UpsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Métricas agregadas de todos os packs de um dispositivo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    /// Média do estado de carga (%)
    pub charge: f64,
    /// Soma da capacidade restante (Ah)
    pub capacity_ah: f64,
    /// Soma da capacidade de projeto (Ah)
    pub capacity_nominal_ah: f64,
    /// Média da tensão (V)
    pub voltage: f64,
    /// Média da temperatura (°C)
    pub temperature: f64,
    /// Autonomia estimada (s)
    pub runtime_secs: u64,
    pub battery_status: BatteryStatus,
    pub ups_status: UpsStatus,
    /// Quantidade de packs usada no cálculo
    pub pack_count: usize,
    /// Unix timestamp (s) da última atualização
    pub timestamp: u64,
}

impl AggregateMetrics {
    /// Recalcula o agregado do zero a partir de todos os packs.
    pub fn from_packs<'a, I>(packs: I, timestamp: u64) -> Self
    where
        I: IntoIterator<Item = &'a PackRecord>,
    {
        let mut count = 0usize;
        let (mut soc, mut vol, mut temp, mut remain_time) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        let (mut remain_cap, mut design_cap) = (0.0f64, 0.0f64);
        let mut discharging = false;

        for pack in packs {
            count += 1;
            soc += f64::from(pack.soc);
            vol += f64::from(pack.vol);
            temp += f64::from(pack.temp);
            remain_time += f64::from(pack.remain_time);
            remain_cap += f64::from(pack.remain_cap);
            design_cap += f64::from(pack.design_cap);
            discharging |= pack.state == ChargeState::Discharging;
        }

        let mean = |sum: f64| if count > 0 { sum / count as f64 } else { 0.0 };

        let (battery_status, ups_status) = if discharging {
            (BatteryStatus::OnBattery, UpsStatus::OnBattery)
        } else {
            (BatteryStatus::Charging, UpsStatus::Online)
        };

        Self {
            charge: mean(soc),
            capacity_ah: remain_cap / 1000.0,
            capacity_nominal_ah: design_cap / 1000.0,
            voltage: mean(vol) / 1000.0,
            temperature: mean(temp),
            runtime_secs: runtime_seconds(mean(remain_time)),
            battery_status,
            ups_status,
            pack_count: count,
            timestamp,
        }
    }
}

/// Converte o tempo restante do fabricante em segundos: `(v / 100) * 3600`.
///
/// A base dimensional desse fator não é documentada pela EcoFlow; a fórmula
/// é mantida literalmente até alguém com acesso ao firmware confirmar.
pub fn runtime_seconds(remain_time: f64) -> u64 {
    ((remain_time / 100.0) * 3600.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(num: u32, soc: u32, vol: u32, state: ChargeState) -> PackRecord {
        PackRecord {
            num,
            soc,
            vol,
            state,
            ..Default::default()
        }
    }

    #[test]
    fn empty_aggregate_is_zeroed() {
        let none: [PackRecord; 0] = [];
        let agg = AggregateMetrics::from_packs(&none, 42);
        assert_eq!(agg.charge, 0.0);
        assert_eq!(agg.voltage, 0.0);
        assert_eq!(agg.temperature, 0.0);
        assert_eq!(agg.capacity_ah, 0.0);
        assert_eq!(agg.capacity_nominal_ah, 0.0);
        assert_eq!(agg.runtime_secs, 0);
        assert_eq!(agg.pack_count, 0);
        assert_eq!(agg.battery_status, BatteryStatus::Charging);
        assert_eq!(agg.ups_status, UpsStatus::Online);
        assert_eq!(agg.timestamp, 42);
    }

    #[test]
    fn means_and_sums() {
        let packs = [
            PackRecord {
                num: 0,
                soc: 60,
                vol: 12000,
                temp: 20,
                remain_cap: 10_000,
                design_cap: 20_000,
                remain_time: 100,
                state: ChargeState::Charging,
            },
            PackRecord {
                num: 1,
                soc: 90,
                vol: 13000,
                temp: 30,
                remain_cap: 15_000,
                design_cap: 20_000,
                remain_time: 300,
                state: ChargeState::Idle,
            },
            PackRecord {
                num: 2,
                soc: 30,
                vol: 11000,
                temp: -5,
                remain_cap: 5_500,
                design_cap: 20_000,
                remain_time: 200,
                state: ChargeState::Idle,
            },
        ];
        let agg = AggregateMetrics::from_packs(&packs, 0);
        assert_eq!(agg.pack_count, 3);
        assert!((agg.charge - 60.0).abs() < 1e-9);
        assert!((agg.voltage - 12.0).abs() < 1e-9);
        assert!((agg.temperature - 15.0).abs() < 1e-9);
        assert!((agg.capacity_ah - 30.5).abs() < 1e-9);
        assert!((agg.capacity_nominal_ah - 60.0).abs() < 1e-9);
        // média 200 → (200 / 100) * 3600
        assert_eq!(agg.runtime_secs, 7200);
        assert_eq!(agg.ups_status, UpsStatus::Online);
    }

    #[test]
    fn single_discharging_pack_wins() {
        let packs = [
            pack(0, 50, 12000, ChargeState::Charging),
            pack(1, 50, 12000, ChargeState::Discharging),
            pack(2, 50, 12000, ChargeState::Idle),
        ];
        let agg = AggregateMetrics::from_packs(&packs, 0);
        assert_eq!(agg.battery_status, BatteryStatus::OnBattery);
        assert_eq!(agg.ups_status, UpsStatus::OnBattery);
    }

    #[test]
    fn runtime_truncates() {
        assert_eq!(runtime_seconds(0.0), 0);
        assert_eq!(runtime_seconds(1.0), 36);
        assert_eq!(runtime_seconds(150.0), 5400);
        assert_eq!(runtime_seconds(0.05), 1);
    }

    #[test]
    fn raw_charge_state() {
        assert_eq!(ChargeState::from_raw(0), ChargeState::Idle);
        assert_eq!(ChargeState::from_raw(1), ChargeState::Discharging);
        assert_eq!(ChargeState::from_raw(2), ChargeState::Charging);
        assert_eq!(ChargeState::from_raw(7), ChargeState::Idle);
    }

    #[test]
    fn status_tokens() {
        assert_eq!(BatteryStatus::OnBattery.to_string(), "ONBATT");
        assert_eq!(BatteryStatus::Charging.to_string(), "CHRG");
        assert_eq!(UpsStatus::OnBattery.to_string(), "OB");
        assert_eq!(UpsStatus::Online.to_string(), "OL");
    }
}
