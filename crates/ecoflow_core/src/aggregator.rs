//! Estado multi-pack por dispositivo.
//!
//! Cada dispositivo tem seu próprio `Mutex`, segurado só durante o
//! upsert + recálculo (escrita) ou a cópia do agregado (leitura). O mapa
//! externo fica atrás de um `RwLock` usado apenas para achar/criar a
//! entrada do dispositivo, então dispositivos diferentes nunca disputam o
//! mesmo lock.

use crate::types::{AggregateMetrics, PackRecord};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Default)]
struct DeviceState {
    packs: BTreeMap<u32, PackRecord>,
    aggregate: AggregateMetrics,
}

/// Agregador de telemetria compartilhado entre ingestão e servidor.
#[derive(Debug, Default)]
pub struct Aggregator {
    devices: RwLock<HashMap<String, Arc<Mutex<DeviceState>>>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insere/atualiza o pack e recalcula o agregado do dispositivo.
    pub fn update(&self, device_id: &str, record: PackRecord) -> AggregateMetrics {
        self.update_at(device_id, record, unix_now())
    }

    /// Igual a [`update`](Self::update), com timestamp explícito.
    pub fn update_at(&self, device_id: &str, record: PackRecord, timestamp: u64) -> AggregateMetrics {
        let slot = self.slot(device_id);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        state.packs.insert(record.num, record);
        state.aggregate = AggregateMetrics::from_packs(state.packs.values(), timestamp);
        state.aggregate
    }

    /// Cópia do agregado atual, ou `None` se o dispositivo nunca reportou.
    pub fn snapshot(&self, device_id: &str) -> Option<AggregateMetrics> {
        let slot = self.existing(device_id)?;
        let state = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Some(state.aggregate)
    }

    /// Quantidade de packs conhecidos do dispositivo.
    pub fn pack_count(&self, device_id: &str) -> usize {
        let Some(slot) = self.existing(device_id) else {
            return 0;
        };
        let state = slot.lock().unwrap_or_else(PoisonError::into_inner);
        state.packs.len()
    }

    /// Dispositivos que já reportaram, em ordem alfabética.
    pub fn device_ids(&self) -> Vec<String> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn existing(&self, device_id: &str) -> Option<Arc<Mutex<DeviceState>>> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices.get(device_id).cloned()
    }

    fn slot(&self, device_id: &str) -> Arc<Mutex<DeviceState>> {
        if let Some(slot) = self.existing(device_id) {
            return slot;
        }
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        devices.entry(device_id.to_string()).or_default().clone()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BatteryStatus, ChargeState, UpsStatus};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

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
    fn unknown_device_has_no_snapshot() {
        let agg = Aggregator::new();
        assert!(agg.snapshot("nada").is_none());
        assert_eq!(agg.pack_count("nada"), 0);
        assert!(agg.device_ids().is_empty());
    }

    #[test]
    fn two_pack_scenario() {
        let agg = Aggregator::new();
        agg.update("D", pack(0, 80, 12000, ChargeState::Idle));
        agg.update("D", pack(1, 90, 13000, ChargeState::Discharging));

        let snap = agg.snapshot("D").unwrap();
        assert_eq!(snap.pack_count, 2);
        assert!((snap.charge - 85.0).abs() < 1e-9);
        assert!((snap.voltage - 12.5).abs() < 1e-9);
        assert_eq!(snap.battery_status, BatteryStatus::OnBattery);
        assert_eq!(snap.ups_status, UpsStatus::OnBattery);
    }

    #[test]
    fn upsert_replaces_same_pack() {
        let agg = Aggregator::new();
        agg.update("D", pack(0, 10, 12000, ChargeState::Discharging));
        agg.update("D", pack(0, 95, 13000, ChargeState::Charging));

        let snap = agg.snapshot("D").unwrap();
        assert_eq!(agg.pack_count("D"), 1);
        assert!((snap.charge - 95.0).abs() < 1e-9);
        assert!((snap.voltage - 13.0).abs() < 1e-9);
        assert_eq!(snap.ups_status, UpsStatus::Online);
        assert_eq!(snap.battery_status, BatteryStatus::Charging);
    }

    #[test]
    fn devices_are_independent() {
        let agg = Aggregator::new();
        agg.update("A", pack(0, 20, 12000, ChargeState::Discharging));
        agg.update("B", pack(0, 100, 14000, ChargeState::Charging));

        assert_eq!(agg.snapshot("A").unwrap().ups_status, UpsStatus::OnBattery);
        assert_eq!(agg.snapshot("B").unwrap().ups_status, UpsStatus::Online);
        assert_eq!(agg.device_ids(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn timestamp_is_stamped() {
        let agg = Aggregator::new();
        let snap = agg.update_at("D", pack(0, 50, 12000, ChargeState::Idle), 1_700_000_000);
        assert_eq!(snap.timestamp, 1_700_000_000);
        assert!(agg.update("D", pack(0, 50, 12000, ChargeState::Idle)).timestamp > 1_700_000_000);
    }

    #[test]
    fn snapshot_never_sees_half_update() {
        // Pack i tem soc = 10 * (i + 1); a média de k packs é 5 * (k + 1).
        const PACKS: u32 = 64;
        let agg = Arc::new(Aggregator::new());
        let barrier = Arc::new(Barrier::new(2));

        let writer = {
            let agg = Arc::clone(&agg);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PACKS {
                    agg.update("D", pack(i, 10 * (i + 1), 12000, ChargeState::Idle));
                }
            })
        };

        barrier.wait();
        let mut seen = 0;
        while seen < PACKS as usize {
            if let Some(snap) = agg.snapshot("D") {
                let expected = 5.0 * (snap.pack_count as f64 + 1.0);
                assert!(
                    (snap.charge - expected).abs() < 1e-9,
                    "charge {} com {} packs",
                    snap.charge,
                    snap.pack_count
                );
                seen = snap.pack_count;
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn distinct_devices_do_not_block_each_other() {
        let agg = Arc::new(Aggregator::new());
        agg.update("lento", pack(0, 50, 12000, ChargeState::Idle));

        // Segura o lock de "lento" enquanto outra thread atualiza "rapido".
        let slot = agg.existing("lento").unwrap();
        let guard = slot.lock().unwrap();

        let other = {
            let agg = Arc::clone(&agg);
            thread::spawn(move || {
                agg.update("rapido", pack(0, 70, 12000, ChargeState::Idle));
                agg.snapshot("rapido")
            })
        };

        let started = std::time::Instant::now();
        while !other.is_finished() {
            assert!(started.elapsed() < Duration::from_secs(5), "update bloqueado");
            thread::sleep(Duration::from_millis(5));
        }
        drop(guard);

        let snap = other.join().unwrap().unwrap();
        assert!((snap.charge - 70.0).abs() < 1e-9);
    }
}
