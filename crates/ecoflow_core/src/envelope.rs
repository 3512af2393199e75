//! Decodificador do envelope binário da EcoFlow.
//!
//! O broker entrega um `Send_Header_Msg` protobuf com uma ou mais
//! mensagens internas. Só a primeira é usada:
//!
//! ```text
//! Send_Header_Msg
//! └─ msg[0]: Header
//!    ├─ pdata     (1)  payload do schema, opcionalmente mascarado
//!    ├─ enc_type  (6)  != 0 → pdata[i] ^= seq & 0xFF
//!    ├─ cmd_func  (8)  ┐
//!    ├─ cmd_id    (9)  ┘ escolhem o schema
//!    └─ seq       (14)
//! ```
//!
//! [`decode`] nunca falha para quem chama: frames inválidos e schemas
//! desconhecidos viram `None` com uma linha de log em nível debug.

use crate::proto::{BmsHeartBeatReport, Header, SendHeaderMsg};
use crate::types::{DisplayProperties, PackRecord, Telemetry};
use prost::Message;
use tracing::debug;

/// Quantos bytes do payload entram no log de schemas desconhecidos.
const HEX_PREVIEW_LEN: usize = 64;

/// Erros internos de decodificação.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Frame vazio")]
    Empty,

    #[error("Frame sem mensagem interna")]
    NoMessage,

    #[error("Protobuf inválido: {0}")]
    Decode(#[from] prost::DecodeError),
}

// ──────────────────────────────────────────────
// Envelope
// ──────────────────────────────────────────────

/// Extrai a primeira mensagem interna, validando o frame inteiro.
pub fn parse_envelope(raw: &[u8]) -> Result<Header, EnvelopeError> {
    if raw.is_empty() {
        return Err(EnvelopeError::Empty);
    }

    SendHeaderMsg::decode(raw)?
        .msg
        .into_iter()
        .next()
        .ok_or(EnvelopeError::NoMessage)
}

/// Aplica (ou remove) a máscara XOR do payload.
///
/// XOR com a mesma chave é a própria inversa: a mesma função mascara e
/// desmascara.
pub fn xor_mask(data: &mut [u8], seq: u32) {
    let key = (seq & 0xFF) as u8;
    for byte in data.iter_mut() {
        *byte ^= key;
    }
}

// ──────────────────────────────────────────────
// Schemas
// ──────────────────────────────────────────────

pub const CMD_FUNC_BMS: u32 = 32;
pub const CMD_ID_BMS_HEARTBEAT: u32 = 50;
pub const CMD_FUNC_DISPLAY: u32 = 254;
pub const CMD_ID_DISPLAY_UPLOAD: u32 = 21;

/// Entrada da tabela de despacho `(cmd_func, cmd_id) → decoder`.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub cmd_func: u32,
    pub cmd_id: u32,
    pub name: &'static str,
    pub decode: fn(&[u8]) -> Result<Telemetry, EnvelopeError>,
}

/// Schemas conhecidos. Um schema novo é só uma linha nova aqui.
pub const SCHEMAS: &[Schema] = &[
    Schema {
        cmd_func: CMD_FUNC_BMS,
        cmd_id: CMD_ID_BMS_HEARTBEAT,
        name: "BMSHeartBeatReport",
        decode: decode_bms_heartbeat,
    },
    Schema {
        cmd_func: CMD_FUNC_DISPLAY,
        cmd_id: CMD_ID_DISPLAY_UPLOAD,
        name: "DisplayPropertyUpload",
        decode: decode_display_properties,
    },
];

pub fn find_schema(cmd_func: u32, cmd_id: u32) -> Option<&'static Schema> {
    SCHEMAS
        .iter()
        .find(|s| s.cmd_func == cmd_func && s.cmd_id == cmd_id)
}

/// `BMSHeartBeatReport` → [`PackRecord`].
fn decode_bms_heartbeat(payload: &[u8]) -> Result<Telemetry, EnvelopeError> {
    let report = BmsHeartBeatReport::decode(payload)?;
    Ok(Telemetry::Pack(PackRecord::from(report)))
}

/// `DisplayPropertyUpload` → escalares por número de campo.
fn decode_display_properties(payload: &[u8]) -> Result<Telemetry, EnvelopeError> {
    Ok(Telemetry::Display(DisplayProperties::decode(payload)?))
}

// ──────────────────────────────────────────────
// Decodificação
// ──────────────────────────────────────────────

/// Decodifica uma mensagem binária de `device_id`.
///
/// Retorna `None` para frames inválidos, payloads inválidos e pares
/// `(cmd_func, cmd_id)` sem schema registrado.
pub fn decode(raw: &[u8], device_id: &str) -> Option<Telemetry> {
    debug!("Decodificando mensagem de {device_id} ({} bytes)", raw.len());

    let mut header = match parse_envelope(raw) {
        Ok(header) => header,
        Err(e) => {
            debug!("Envelope inválido de {device_id}: {e}");
            return None;
        }
    };

    if header.is_masked() {
        xor_mask(&mut header.pdata, header.seq);
    }

    let Some(schema) = find_schema(header.cmd_func, header.cmd_id) else {
        let preview = &header.pdata[..header.pdata.len().min(HEX_PREVIEW_LEN)];
        debug!(
            "Schema desconhecido de {device_id}: seq={} cmd_func={} cmd_id={} pdata={}",
            header.seq,
            header.cmd_func,
            header.cmd_id,
            hex::encode(preview)
        );
        return None;
    };

    match (schema.decode)(&header.pdata) {
        Ok(telemetry) => Some(telemetry),
        Err(e) => {
            debug!("Payload {} inválido de {device_id}: {e}", schema.name);
            None
        }
    }
}

/// Serializa um pack como `BMSHeartBeatReport`.
#[cfg(test)]
pub(crate) fn encode_heartbeat(pack: &PackRecord) -> Vec<u8> {
    BmsHeartBeatReport::from(pack).encode_to_vec()
}

/// Envelope completo com um heartbeat, mascarado quando `seq` não é zero.
#[cfg(test)]
pub(crate) fn heartbeat_frame(pack: &PackRecord, seq: u32) -> Vec<u8> {
    let mut pdata = encode_heartbeat(pack);
    let enc_type = u32::from(seq != 0);
    if enc_type != 0 {
        xor_mask(&mut pdata, seq);
    }
    Header {
        seq,
        cmd_func: CMD_FUNC_BMS,
        cmd_id: CMD_ID_BMS_HEARTBEAT,
        enc_type,
        pdata,
    }
    .into_frame()
}
