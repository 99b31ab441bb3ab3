//! A `SyncChannel` that speaks the RTLib wire protocol over per-EXC FIFOs.
//!
//! The client side (FIFO creation, the APP_PAIR/EXC_REGISTER handshake)
//! is the RTLib itself — out of scope here (§1) — so this channel only
//! knows a uid's FIFO path once something registers it via `register`.
//! Real daemons wire that call into the EXC_REGISTER RPC handler; no such
//! handler exists in this crate yet, so this channel degrades to
//! `ChannelSetupFailed` for any uid nobody has registered.

use dashmap::DashMap;
use knhk_sync::{Result, SyncChannel, SyncError, SyncLatencyReport};
use knhk_rtrm::rtlib_proto::{self, RespPayload, RpcHeader, RpcType};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub struct FifoSyncChannel {
    fifos: DashMap<u32, PathBuf>,
}

impl FifoSyncChannel {
    pub fn new() -> Self {
        Self { fifos: DashMap::new() }
    }

    pub fn register(&self, uid: u32, fifo_path: PathBuf) {
        self.fifos.insert(uid, fifo_path);
    }

    pub fn unregister(&self, uid: u32) {
        self.fifos.remove(&uid);
    }

    async fn send(&self, uid: u32, rpc_type: RpcType) -> Result<RespPayload> {
        let path = self
            .fifos
            .get(&uid)
            .map(|e| e.value().clone())
            .ok_or_else(|| SyncError::ChannelSetupFailed(uid, "no fifo registered for uid".to_string()))?;

        let rpc = RpcHeader {
            msg_type: rpc_type as u16,
            token: 0,
            app_pid: uid,
            exc_id: 0,
        };
        let bytes = rtlib_proto::encode(&rpc, &())
            .map_err(|e| SyncError::ChannelWriteFailed(uid, e.to_string()))?;

        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|e| SyncError::ChannelWriteFailed(uid, e.to_string()))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| SyncError::ChannelWriteFailed(uid, e.to_string()))?;

        let mut resp_file = OpenOptions::new()
            .read(true)
            .open(&path)
            .await
            .map_err(|e| SyncError::ChannelReadFailed(uid, e.to_string()))?;
        let mut buf = Vec::new();
        resp_file
            .read_to_end(&mut buf)
            .await
            .map_err(|e| SyncError::ChannelReadFailed(uid, e.to_string()))?;

        let header = rtlib_proto::decode_header(&buf).map_err(|e| SyncError::ChannelReadFailed(uid, e.to_string()))?;
        let rpc_bytes = &buf[header.rpc_offset as usize..];
        let resp_rpc: RpcHeader =
            rtlib_proto::decode_rpc_header(rpc_bytes).map_err(|e| SyncError::ChannelReadFailed(uid, e.to_string()))?;
        let rpc_size = bincode::serialized_size(&resp_rpc)
            .map_err(|e| SyncError::ChannelReadFailed(uid, e.to_string()))? as usize;
        rtlib_proto::decode_payload::<RespPayload>(&rpc_bytes[rpc_size..])
            .map_err(|e| SyncError::ChannelReadFailed(uid, e.to_string()))
    }
}

impl Default for FifoSyncChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncChannel for FifoSyncChannel {
    async fn pre_change(&self, uid: u32) -> Result<()> {
        let resp = self.send(uid, RpcType::BbqSyncpPreChange).await?;
        if resp.result_code != 0 {
            return Err(SyncError::ChannelReadFailed(uid, format!("PreChange result_code={}", resp.result_code)));
        }
        Ok(())
    }

    async fn sync_change(&self, uid: u32) -> Result<SyncLatencyReport> {
        let resp = self.send(uid, RpcType::BbqSyncpSyncChange).await?;
        Ok(SyncLatencyReport {
            latency_ms: resp.latency_ms.unwrap_or(0),
        })
    }

    async fn do_change(&self, uid: u32) -> Result<()> {
        self.send(uid, RpcType::BbqSyncpDoChange).await?;
        Ok(())
    }

    async fn post_change(&self, uid: u32) -> Result<()> {
        self.send(uid, RpcType::BbqSyncpPostChange).await?;
        Ok(())
    }
}
