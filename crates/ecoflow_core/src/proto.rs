//! Mensagens protobuf da EcoFlow.
//!
//! Só os campos usados pela ponte são declarados; o prost pula o resto
//! pelo tipo wire. Campos ausentes ficam em zero (semântica proto3).

use crate::types::{ChargeState, DisplayProperties, PackRecord, PropertyValue};
use prost::bytes::{Buf, BufMut};
use prost::encoding::{self, DecodeContext, WireType};
use prost::{DecodeError, Message};

/// `Send_Header_Msg`: envelope com uma ou mais mensagens internas.
#[derive(Clone, PartialEq, Message)]
pub struct SendHeaderMsg {
    #[prost(message, repeated, tag = "1")]
    pub msg: Vec<Header>,
}

/// Mensagem interna do envelope.
#[derive(Clone, PartialEq, Message)]
pub struct Header {
    /// Payload do schema, opcionalmente mascarado
    #[prost(bytes = "vec", tag = "1")]
    pub pdata: Vec<u8>,
    #[prost(uint32, tag = "6")]
    pub enc_type: u32,
    #[prost(uint32, tag = "8")]
    pub cmd_func: u32,
    #[prost(uint32, tag = "9")]
    pub cmd_id: u32,
    #[prost(uint32, tag = "14")]
    pub seq: u32,
}

impl Header {
    pub fn is_masked(&self) -> bool {
        self.enc_type != 0
    }

    /// Serializa o header como um envelope com uma única mensagem.
    #[cfg(test)]
    pub(crate) fn into_frame(self) -> Vec<u8> {
        SendHeaderMsg { msg: vec![self] }.encode_to_vec()
    }
}

/// `BMSHeartBeatReport` (cmd_func 32, cmd_id 50).
#[derive(Clone, PartialEq, Message)]
pub struct BmsHeartBeatReport {
    #[prost(uint32, tag = "1")]
    pub num: u32,
    #[prost(uint32, tag = "6")]
    pub soc: u32,
    /// mV
    #[prost(uint32, tag = "7")]
    pub vol: u32,
    /// °C
    #[prost(int32, tag = "9")]
    pub temp: i32,
    /// mAh
    #[prost(uint32, tag = "11")]
    pub design_cap: u32,
    /// mAh
    #[prost(uint32, tag = "12")]
    pub remain_cap: u32,
    #[prost(uint32, tag = "28")]
    pub remain_time: u32,
    /// 0 idle, 1 descarga, 2 carga
    #[prost(uint32, tag = "47")]
    pub chg_dsg_state: u32,
}

impl From<BmsHeartBeatReport> for PackRecord {
    fn from(report: BmsHeartBeatReport) -> Self {
        PackRecord {
            num: report.num,
            soc: report.soc,
            vol: report.vol,
            temp: report.temp,
            remain_cap: report.remain_cap,
            design_cap: report.design_cap,
            remain_time: report.remain_time,
            state: ChargeState::from_raw(u64::from(report.chg_dsg_state)),
        }
    }
}

#[cfg(test)]
impl From<&PackRecord> for BmsHeartBeatReport {
    fn from(pack: &PackRecord) -> Self {
        BmsHeartBeatReport {
            num: pack.num,
            soc: pack.soc,
            vol: pack.vol,
            temp: pack.temp,
            design_cap: pack.design_cap,
            remain_cap: pack.remain_cap,
            remain_time: pack.remain_time,
            chg_dsg_state: match pack.state {
                ChargeState::Idle => 0,
                ChargeState::Discharging => 1,
                ChargeState::Charging => 2,
            },
        }
    }
}

// ──────────────────────────────────────────────
// DisplayPropertyUpload
// ──────────────────────────────────────────────

// O upload de display tem centenas de campos que mudam entre firmwares;
// em vez de declarar todos, os escalares são guardados pelo número do
// campo. Strings e sub-mensagens são puladas.
impl Message for DisplayProperties {
    fn encode_raw(&self, buf: &mut impl BufMut) {
        for (&tag, value) in &self.fields {
            match value {
                PropertyValue::Int(v) => encoding::uint64::encode(tag, v, buf),
                PropertyValue::F32(v) => encoding::float::encode(tag, v, buf),
                PropertyValue::F64(v) => encoding::double::encode(tag, v, buf),
            }
        }
    }

    fn merge_field(
        &mut self,
        tag: u32,
        wire_type: WireType,
        buf: &mut impl Buf,
        ctx: DecodeContext,
    ) -> Result<(), DecodeError> {
        let value = match wire_type {
            WireType::Varint => {
                let mut v = 0u64;
                encoding::uint64::merge(wire_type, &mut v, buf, ctx)?;
                PropertyValue::Int(v)
            }
            WireType::ThirtyTwoBit => {
                let mut v = 0f32;
                encoding::float::merge(wire_type, &mut v, buf, ctx)?;
                PropertyValue::F32(v)
            }
            WireType::SixtyFourBit => {
                let mut v = 0f64;
                encoding::double::merge(wire_type, &mut v, buf, ctx)?;
                PropertyValue::F64(v)
            }
            _ => return encoding::skip_field(wire_type, tag, buf, ctx),
        };
        self.fields.insert(tag, value);
        Ok(())
    }

    fn encoded_len(&self) -> usize {
        self.fields
            .iter()
            .map(|(&tag, value)| match value {
                PropertyValue::Int(v) => encoding::uint64::encoded_len(tag, v),
                PropertyValue::F32(v) => encoding::float::encoded_len(tag, v),
                PropertyValue::F64(v) => encoding::double::encoded_len(tag, v),
            })
            .sum()
    }

    fn clear(&mut self) {
        self.fields.clear();
    }
}
