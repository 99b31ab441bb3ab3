//! RTLib wire protocol: FIFO-framed binary messages between the daemon
//! and its client applications, per §6. Wire integers are native-endian
//! since the protocol is single-host; `bincode` gives us that directly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtoError>;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("failed to encode message: {0}")]
    EncodeFailed(String),
    #[error("failed to decode message: {0}")]
    DecodeFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum RpcType {
    AppPair = 1,
    AppExit = 2,
    ExcRegister = 3,
    ExcUnregister = 4,
    ExcStart = 5,
    ExcStop = 6,
    ExcSet = 7,
    ExcClear = 8,
    ExcRtNotify = 9,
    ExcSchedule = 10,
    AppResp = 11,
    ExcResp = 12,
    BbqResp = 13,
    BbqStopExecution = 14,
    BbqGetProfile = 15,
    BbqSyncpPreChange = 16,
    BbqSyncpSyncChange = 17,
    BbqSyncpDoChange = 18,
    BbqSyncpPostChange = 19,
}

/// Prefixes every message on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FifoHeader {
    pub fifo_size: u16,
    pub rpc_offset: u16,
    pub rpc_type: u16,
}

/// Follows the `FifoHeader`; identifies the application/EXC a message is
/// about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RpcHeader {
    pub msg_type: u16,
    pub token: u32,
    pub app_pid: u32,
    pub exc_id: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppPair {
    pub rtlib_version_major: u8,
    pub rtlib_version_minor: u8,
    pub app_name: String,
    pub client_fifo_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcRegister {
    pub exc_name: String,
    pub recipe_name: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcUnregister {
    pub exc_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AwmConstraintKind {
    Low,
    Upp,
    Exact,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AwmConstraint {
    pub kind: AwmConstraintKind,
    pub awm_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcSetClear {
    pub constraints: Vec<AwmConstraint>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExcRtNotify {
    pub goal_gap_pct: i32,
    pub cpu_usage_pct: u32,
    pub cycle_time_ms: u64,
    pub cycle_count: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RespPayload {
    pub result_code: i32,
    pub latency_ms: Option<u64>,
    pub exc_time_ms: Option<u64>,
    pub mem_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncPreChangeEntry {
    pub system_id: u16,
    pub awm_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPreChange {
    pub entries: Vec<SyncPreChangeEntry>,
}

/// Encodes a header-plus-payload message for a single FIFO write.
pub fn encode<T: Serialize>(rpc: &RpcHeader, payload: &T) -> Result<Vec<u8>> {
    let mut rpc_bytes = bincode::serialize(rpc).map_err(|e| ProtoError::EncodeFailed(e.to_string()))?;
    let payload_bytes = bincode::serialize(payload).map_err(|e| ProtoError::EncodeFailed(e.to_string()))?;
    let rpc_offset = std::mem::size_of::<FifoHeader>() as u16;
    let fifo_size = rpc_offset + rpc_bytes.len() as u16 + payload_bytes.len() as u16;
    let header = FifoHeader {
        fifo_size,
        rpc_offset,
        rpc_type: rpc.msg_type,
    };
    let mut out = bincode::serialize(&header).map_err(|e| ProtoError::EncodeFailed(e.to_string()))?;
    out.append(&mut rpc_bytes);
    out.extend_from_slice(&payload_bytes);
    Ok(out)
}

pub fn decode_header(bytes: &[u8]) -> Result<FifoHeader> {
    bincode::deserialize(bytes).map_err(|e| ProtoError::DecodeFailed(e.to_string()))
}

pub fn decode_rpc_header(bytes: &[u8]) -> Result<RpcHeader> {
    bincode::deserialize(bytes).map_err(|e| ProtoError::DecodeFailed(e.to_string()))
}

pub fn decode_payload<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| ProtoError::DecodeFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_exc_register() {
        let rpc = RpcHeader {
            msg_type: RpcType::ExcRegister as u16,
            token: 1,
            app_pid: 4242,
            exc_id: 0,
        };
        let payload = ExcRegister {
            exc_name: "denoiser".to_string(),
            recipe_name: "denoiser.recipe".to_string(),
            language: "native".to_string(),
        };
        let bytes = encode(&rpc, &payload).unwrap();

        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.rpc_type, RpcType::ExcRegister as u16);

        let rpc_bytes = &bytes[header.rpc_offset as usize..];
        let decoded_rpc: RpcHeader = decode_rpc_header(rpc_bytes).unwrap();
        assert_eq!(decoded_rpc.app_pid, 4242);

        let rpc_size = bincode::serialized_size(&rpc).unwrap() as usize;
        let payload_bytes = &rpc_bytes[rpc_size..];
        let decoded_payload: ExcRegister = decode_payload(payload_bytes).unwrap();
        assert_eq!(decoded_payload.exc_name, "denoiser");
    }
}
