// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus message families (spec 4.6-4.7, spec 6 "Bus message families").
//!
//! Every message shares the same 8-byte outer frame
//! (`schema_id, template_id, block_length, version`) used by the tensor
//! header and slot records; unknown `template_id`s are ignored rather
//! than rejected, so a newer driver's messages don't break an older
//! consumer (spec 6, "forward-compatible additions").

use crate::error::{Error, Result};

const BUS_SCHEMA_ID: u16 = 0x5403;
const BUS_VERSION: u16 = 1;

/// Outer-frame template discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TemplateId {
    AttachRequest = 1,
    AttachResponse = 2,
    DetachRequest = 3,
    DetachResponse = 4,
    LeaseRevoked = 5,
    Shutdown = 6,
    ShmPoolAnnounce = 7,
    ConsumerHello = 8,
    ConsumerConfig = 9,
    DataSourceAnnounce = 10,
    DataSourceMetaBegin = 11,
    DataSourceMetaAttr = 12,
    DataSourceMetaEnd = 13,
    MetaBlobAnnounce = 14,
    MetaBlobChunk = 15,
    MetaBlobComplete = 16,
    ControlResponse = 17,
    FrameDescriptor = 18,
    FrameProgress = 19,
    QosProducer = 20,
    QosConsumer = 21,
}

impl TemplateId {
    fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => Self::AttachRequest,
            2 => Self::AttachResponse,
            3 => Self::DetachRequest,
            4 => Self::DetachResponse,
            5 => Self::LeaseRevoked,
            6 => Self::Shutdown,
            7 => Self::ShmPoolAnnounce,
            8 => Self::ConsumerHello,
            9 => Self::ConsumerConfig,
            10 => Self::DataSourceAnnounce,
            11 => Self::DataSourceMetaBegin,
            12 => Self::DataSourceMetaAttr,
            13 => Self::DataSourceMetaEnd,
            14 => Self::MetaBlobAnnounce,
            15 => Self::MetaBlobChunk,
            16 => Self::MetaBlobComplete,
            17 => Self::ControlResponse,
            18 => Self::FrameDescriptor,
            19 => Self::FrameProgress,
            20 => Self::QosProducer,
            21 => Self::QosConsumer,
            _ => return None,
        })
    }
}

/// Attach/detach/control response code (spec 4.6, spec 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ResponseCode {
    Ok = 0,
    StreamNotFound = 1,
    LayoutMismatch = 2,
    PermissionDenied = 3,
    HugepagesUnavailable = 4,
    ResourceExhausted = 5,
    InvalidArgument = 6,
    Internal = 7,
}

impl ResponseCode {
    fn from_u16(v: u16) -> Result<Self> {
        Ok(match v {
            0 => Self::Ok,
            1 => Self::StreamNotFound,
            2 => Self::LayoutMismatch,
            3 => Self::PermissionDenied,
            4 => Self::HugepagesUnavailable,
            5 => Self::ResourceExhausted,
            6 => Self::InvalidArgument,
            7 => Self::Internal,
            other => return Err(Error::CodecError(format!("unknown response code {other}"))),
        })
    }
}

/// Role a client attaches under (spec 4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttachRole {
    Producer = 0,
    Consumer = 1,
}

impl AttachRole {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Producer),
            1 => Ok(Self::Consumer),
            other => Err(Error::CodecError(format!("unknown attach role {other}"))),
        }
    }
}

/// How a stream is resolved at attach time (spec 4.6, `publish_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PublishMode {
    RequireExisting = 0,
    ExistingOrCreate = 1,
    CreateOnly = 2,
}

impl PublishMode {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::RequireExisting),
            1 => Ok(Self::ExistingOrCreate),
            2 => Ok(Self::CreateOnly),
            other => Err(Error::CodecError(format!("unknown publish_mode {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDescriptor {
    pub pool_id: u16,
    pub nslots: u32,
    pub stride_bytes: u32,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    pub correlation_id: u64,
    pub stream_id: u32,
    pub client_id: u64,
    pub role: AttachRole,
    pub expected_layout_version: u32,
    pub publish_mode: PublishMode,
    pub require_hugepages: bool,
    pub desired_node_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachResponse {
    pub correlation_id: u64,
    pub code: ResponseCode,
    pub error_message: String,
    pub lease_id: u64,
    pub lease_expiry_ns: u64,
    pub stream_id: u32,
    pub epoch: u64,
    pub layout_version: u32,
    pub header_nslots: u32,
    pub header_slot_bytes: u32,
    pub node_id: u32,
    pub header_region_uri: String,
    pub pools: Vec<PoolDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachRequest {
    pub lease_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachResponse {
    pub lease_id: u64,
    pub code: ResponseCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRevoked {
    pub lease_id: u64,
    pub stream_id: u32,
    pub client_id: u64,
    pub role: AttachRole,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerHello {
    pub stream_id: u32,
    pub consumer_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub stream_id: u32,
    pub consumer_id: u32,
    pub descriptor_stream_id: u32,
    pub control_stream_id: u32,
    pub descriptor_channel: String,
    pub control_channel: String,
    pub use_shm: bool,
    pub mode: u8,
    pub payload_fallback_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameProgress {
    pub stream_id: u32,
    pub seq: u64,
    pub units: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosProducer {
    pub stream_id: u32,
    pub rate_hz: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosConsumer {
    pub stream_id: u32,
    pub consumer_id: u32,
    pub max_rate_hz: u32,
}

/// Any bus message, tagged by the template it decoded from. Variants not
/// listed here (`SHM_POOL_ANNOUNCE`, `DATA_SOURCE_*`, `META_BLOB_*`,
/// `CONTROL_RESPONSE`, `FRAME_DESCRIPTOR`, `SHUTDOWN`) round-trip through
/// the bus fragment layer unchanged but are not yet surfaced as typed
/// payloads here; `Message::Unknown` preserves their raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    AttachRequest(AttachRequest),
    AttachResponse(AttachResponse),
    DetachRequest(DetachRequest),
    DetachResponse(DetachResponse),
    LeaseRevoked(LeaseRevoked),
    ConsumerHello(ConsumerHello),
    ConsumerConfig(ConsumerConfig),
    FrameProgress(FrameProgress),
    QosProducer(QosProducer),
    QosConsumer(QosConsumer),
    Unknown { template_id: u16, body: Vec<u8> },
}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        let (template_id, body) = match self {
            Message::AttachRequest(m) => (TemplateId::AttachRequest as u16, encode_attach_request(m)),
            Message::AttachResponse(m) => (TemplateId::AttachResponse as u16, encode_attach_response(m)),
            Message::DetachRequest(m) => (TemplateId::DetachRequest as u16, m.lease_id.to_le_bytes().to_vec()),
            Message::DetachResponse(m) => (TemplateId::DetachResponse as u16, encode_detach_response(m)),
            Message::LeaseRevoked(m) => (TemplateId::LeaseRevoked as u16, encode_lease_revoked(m)),
            Message::ConsumerHello(m) => {
                let mut b = Vec::with_capacity(8);
                b.extend_from_slice(&m.stream_id.to_le_bytes());
                b.extend_from_slice(&m.consumer_id.to_le_bytes());
                (TemplateId::ConsumerHello as u16, b)
            }
            Message::ConsumerConfig(m) => (TemplateId::ConsumerConfig as u16, encode_consumer_config(m)),
            Message::FrameProgress(m) => {
                let mut b = Vec::with_capacity(16);
                b.extend_from_slice(&m.stream_id.to_le_bytes());
                b.extend_from_slice(&m.seq.to_le_bytes());
                b.extend_from_slice(&m.units.to_le_bytes());
                (TemplateId::FrameProgress as u16, b)
            }
            Message::QosProducer(m) => {
                let mut b = Vec::with_capacity(8);
                b.extend_from_slice(&m.stream_id.to_le_bytes());
                b.extend_from_slice(&m.rate_hz.to_le_bytes());
                (TemplateId::QosProducer as u16, b)
            }
            Message::QosConsumer(m) => {
                let mut b = Vec::with_capacity(12);
                b.extend_from_slice(&m.stream_id.to_le_bytes());
                b.extend_from_slice(&m.consumer_id.to_le_bytes());
                b.extend_from_slice(&m.max_rate_hz.to_le_bytes());
                (TemplateId::QosConsumer as u16, b)
            }
            Message::Unknown { template_id, body } => (*template_id, body.clone()),
        };
        let mut frame = Vec::with_capacity(8 + body.len());
        frame.extend_from_slice(&BUS_SCHEMA_ID.to_le_bytes());
        frame.extend_from_slice(&template_id.to_le_bytes());
        frame.extend_from_slice(&(body.len() as u16).to_le_bytes());
        frame.extend_from_slice(&BUS_VERSION.to_le_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(Error::CodecError("bus frame truncated".into()));
        }
        let schema_id = u16::from_le_bytes([buf[0], buf[1]]);
        let template_id = u16::from_le_bytes([buf[2], buf[3]]);
        let block_length = u16::from_le_bytes([buf[4], buf[5]]) as usize;
        if schema_id != BUS_SCHEMA_ID {
            return Err(Error::CodecError("bus frame schema mismatch".into()));
        }
        let body = &buf[8..];
        if body.len() < block_length {
            return Err(Error::CodecError("bus frame body truncated".into()));
        }
        let body = &body[..block_length];

        let Some(kind) = TemplateId::from_u16(template_id) else {
            return Ok(Message::Unknown {
                template_id,
                body: body.to_vec(),
            });
        };

        Ok(match kind {
            TemplateId::AttachRequest => Message::AttachRequest(decode_attach_request(body)?),
            TemplateId::AttachResponse => Message::AttachResponse(decode_attach_response(body)?),
            TemplateId::DetachRequest => {
                if body.len() < 8 {
                    return Err(Error::CodecError("DETACH_REQUEST truncated".into()));
                }
                Message::DetachRequest(DetachRequest {
                    lease_id: u64::from_le_bytes(body[0..8].try_into().unwrap()),
                })
            }
            TemplateId::DetachResponse => Message::DetachResponse(decode_detach_response(body)?),
            TemplateId::LeaseRevoked => Message::LeaseRevoked(decode_lease_revoked(body)?),
            TemplateId::ConsumerHello => {
                if body.len() < 8 {
                    return Err(Error::CodecError("CONSUMER_HELLO truncated".into()));
                }
                Message::ConsumerHello(ConsumerHello {
                    stream_id: u32::from_le_bytes(body[0..4].try_into().unwrap()),
                    consumer_id: u32::from_le_bytes(body[4..8].try_into().unwrap()),
                })
            }
            TemplateId::ConsumerConfig => Message::ConsumerConfig(decode_consumer_config(body)?),
            TemplateId::FrameProgress => {
                if body.len() < 16 {
                    return Err(Error::CodecError("FRAME_PROGRESS truncated".into()));
                }
                Message::FrameProgress(FrameProgress {
                    stream_id: u32::from_le_bytes(body[0..4].try_into().unwrap()),
                    seq: u64::from_le_bytes(body[4..12].try_into().unwrap()),
                    units: u32::from_le_bytes(body[12..16].try_into().unwrap()),
                })
            }
            TemplateId::QosProducer => {
                if body.len() < 8 {
                    return Err(Error::CodecError("QOS_PRODUCER truncated".into()));
                }
                Message::QosProducer(QosProducer {
                    stream_id: u32::from_le_bytes(body[0..4].try_into().unwrap()),
                    rate_hz: u32::from_le_bytes(body[4..8].try_into().unwrap()),
                })
            }
            TemplateId::QosConsumer => {
                if body.len() < 12 {
                    return Err(Error::CodecError("QOS_CONSUMER truncated".into()));
                }
                Message::QosConsumer(QosConsumer {
                    stream_id: u32::from_le_bytes(body[0..4].try_into().unwrap()),
                    consumer_id: u32::from_le_bytes(body[4..8].try_into().unwrap()),
                    max_rate_hz: u32::from_le_bytes(body[8..12].try_into().unwrap()),
                })
            }
            _ => Message::Unknown {
                template_id,
                body: body.to_vec(),
            },
        })
    }
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn take_string(buf: &[u8], pos: &mut usize) -> Result<String> {
    if buf.len() < *pos + 4 {
        return Err(Error::CodecError("string length truncated".into()));
    }
    let len = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    if buf.len() < *pos + len {
        return Err(Error::CodecError("string body truncated".into()));
    }
    let s = String::from_utf8(buf[*pos..*pos + len].to_vec())
        .map_err(|_| Error::CodecError("string is not valid utf-8".into()))?;
    *pos += len;
    Ok(s)
}

fn encode_attach_request(m: &AttachRequest) -> Vec<u8> {
    let mut b = Vec::with_capacity(32);
    b.extend_from_slice(&m.correlation_id.to_le_bytes());
    b.extend_from_slice(&m.stream_id.to_le_bytes());
    b.extend_from_slice(&m.client_id.to_le_bytes());
    b.push(m.role as u8);
    b.extend_from_slice(&m.expected_layout_version.to_le_bytes());
    b.push(m.publish_mode as u8);
    b.push(m.require_hugepages as u8);
    b.extend_from_slice(&m.desired_node_id.to_le_bytes());
    b
}

fn decode_attach_request(body: &[u8]) -> Result<AttachRequest> {
    if body.len() < 27 {
        return Err(Error::CodecError("ATTACH_REQUEST truncated".into()));
    }
    Ok(AttachRequest {
        correlation_id: u64::from_le_bytes(body[0..8].try_into().unwrap()),
        stream_id: u32::from_le_bytes(body[8..12].try_into().unwrap()),
        client_id: u64::from_le_bytes(body[12..20].try_into().unwrap()),
        role: AttachRole::from_u8(body[20])?,
        expected_layout_version: u32::from_le_bytes(body[21..25].try_into().unwrap()),
        publish_mode: PublishMode::from_u8(body[25])?,
        require_hugepages: body[26] != 0,
        desired_node_id: u32::from_le_bytes(
            body.get(27..31)
                .ok_or_else(|| Error::CodecError("ATTACH_REQUEST truncated".into()))?
                .try_into()
                .unwrap(),
        ),
    })
}

fn encode_attach_response(m: &AttachResponse) -> Vec<u8> {
    let mut b = Vec::with_capacity(64);
    b.extend_from_slice(&m.correlation_id.to_le_bytes());
    b.extend_from_slice(&(m.code as u16).to_le_bytes());
    put_string(&mut b, &m.error_message);
    b.extend_from_slice(&m.lease_id.to_le_bytes());
    b.extend_from_slice(&m.lease_expiry_ns.to_le_bytes());
    b.extend_from_slice(&m.stream_id.to_le_bytes());
    b.extend_from_slice(&m.epoch.to_le_bytes());
    b.extend_from_slice(&m.layout_version.to_le_bytes());
    b.extend_from_slice(&m.header_nslots.to_le_bytes());
    b.extend_from_slice(&m.header_slot_bytes.to_le_bytes());
    b.extend_from_slice(&m.node_id.to_le_bytes());
    put_string(&mut b, &m.header_region_uri);
    b.extend_from_slice(&(m.pools.len() as u32).to_le_bytes());
    for pool in &m.pools {
        b.extend_from_slice(&pool.pool_id.to_le_bytes());
        b.extend_from_slice(&pool.nslots.to_le_bytes());
        b.extend_from_slice(&pool.stride_bytes.to_le_bytes());
        put_string(&mut b, &pool.uri);
    }
    b
}

fn decode_attach_response(body: &[u8]) -> Result<AttachResponse> {
    let mut pos = 0usize;
    let need = |len: usize, pos: usize| -> Result<()> {
        if body.len() < pos + len {
            Err(Error::CodecError("ATTACH_RESPONSE truncated".into()))
        } else {
            Ok(())
        }
    };
    need(10, pos)?;
    let correlation_id = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let code = ResponseCode::from_u16(u16::from_le_bytes(body[pos..pos + 2].try_into().unwrap()))?;
    pos += 2;
    let error_message = take_string(body, &mut pos)?;
    need(8 + 8 + 4 + 8 + 4 + 4 + 4 + 4, pos)?;
    let lease_id = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let lease_expiry_ns = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let stream_id = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let epoch = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let layout_version = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let header_nslots = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let header_slot_bytes = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let node_id = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let header_region_uri = take_string(body, &mut pos)?;
    need(4, pos)?;
    let npools = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()) as usize;
    pos += 4;
    let mut pools = Vec::with_capacity(npools);
    for _ in 0..npools {
        need(10, pos)?;
        let pool_id = u16::from_le_bytes(body[pos..pos + 2].try_into().unwrap());
        pos += 2;
        let nslots = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let stride_bytes = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let uri = take_string(body, &mut pos)?;
        pools.push(PoolDescriptor {
            pool_id,
            nslots,
            stride_bytes,
            uri,
        });
    }
    Ok(AttachResponse {
        correlation_id,
        code,
        error_message,
        lease_id,
        lease_expiry_ns,
        stream_id,
        epoch,
        layout_version,
        header_nslots,
        header_slot_bytes,
        node_id,
        header_region_uri,
        pools,
    })
}

fn encode_detach_response(m: &DetachResponse) -> Vec<u8> {
    let mut b = Vec::with_capacity(10);
    b.extend_from_slice(&m.lease_id.to_le_bytes());
    b.extend_from_slice(&(m.code as u16).to_le_bytes());
    b
}

fn decode_detach_response(body: &[u8]) -> Result<DetachResponse> {
    if body.len() < 10 {
        return Err(Error::CodecError("DETACH_RESPONSE truncated".into()));
    }
    Ok(DetachResponse {
        lease_id: u64::from_le_bytes(body[0..8].try_into().unwrap()),
        code: ResponseCode::from_u16(u16::from_le_bytes(body[8..10].try_into().unwrap()))?,
    })
}

fn encode_lease_revoked(m: &LeaseRevoked) -> Vec<u8> {
    let mut b = Vec::with_capacity(24);
    b.extend_from_slice(&m.lease_id.to_le_bytes());
    b.extend_from_slice(&m.stream_id.to_le_bytes());
    b.extend_from_slice(&m.client_id.to_le_bytes());
    b.push(m.role as u8);
    put_string(&mut b, &m.reason);
    b
}

fn decode_lease_revoked(body: &[u8]) -> Result<LeaseRevoked> {
    if body.len() < 21 {
        return Err(Error::CodecError("LEASE_REVOKED truncated".into()));
    }
    let lease_id = u64::from_le_bytes(body[0..8].try_into().unwrap());
    let stream_id = u32::from_le_bytes(body[8..12].try_into().unwrap());
    let client_id = u64::from_le_bytes(body[12..20].try_into().unwrap());
    let role = AttachRole::from_u8(body[20])?;
    let mut pos = 21;
    let reason = take_string(body, &mut pos)?;
    Ok(LeaseRevoked {
        lease_id,
        stream_id,
        client_id,
        role,
        reason,
    })
}

fn encode_consumer_config(m: &ConsumerConfig) -> Vec<u8> {
    let mut b = Vec::with_capacity(24);
    b.extend_from_slice(&m.stream_id.to_le_bytes());
    b.extend_from_slice(&m.consumer_id.to_le_bytes());
    b.extend_from_slice(&m.descriptor_stream_id.to_le_bytes());
    b.extend_from_slice(&m.control_stream_id.to_le_bytes());
    b.push(m.use_shm as u8);
    b.push(m.mode);
    put_string(&mut b, &m.descriptor_channel);
    put_string(&mut b, &m.control_channel);
    put_string(&mut b, &m.payload_fallback_uri);
    b
}

fn decode_consumer_config(body: &[u8]) -> Result<ConsumerConfig> {
    if body.len() < 18 {
        return Err(Error::CodecError("CONSUMER_CONFIG truncated".into()));
    }
    let stream_id = u32::from_le_bytes(body[0..4].try_into().unwrap());
    let consumer_id = u32::from_le_bytes(body[4..8].try_into().unwrap());
    let descriptor_stream_id = u32::from_le_bytes(body[8..12].try_into().unwrap());
    let control_stream_id = u32::from_le_bytes(body[12..16].try_into().unwrap());
    let use_shm = body[16] != 0;
    let mode = body[17];
    let mut pos = 18;
    let descriptor_channel = take_string(body, &mut pos)?;
    let control_channel = take_string(body, &mut pos)?;
    let payload_fallback_uri = take_string(body, &mut pos)?;
    Ok(ConsumerConfig {
        stream_id,
        consumer_id,
        descriptor_stream_id,
        control_stream_id,
        descriptor_channel,
        control_channel,
        use_shm,
        mode,
        payload_fallback_uri,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_request_roundtrips() {
        let m = Message::AttachRequest(AttachRequest {
            correlation_id: 1,
            stream_id: 10000,
            client_id: 99,
            role: AttachRole::Consumer,
            expected_layout_version: 1,
            publish_mode: PublishMode::RequireExisting,
            require_hugepages: false,
            desired_node_id: 0,
        });
        let encoded = m.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(m, decoded);
    }

    #[test]
    fn attach_response_roundtrips_with_pools() {
        let m = Message::AttachResponse(AttachResponse {
            correlation_id: 1,
            code: ResponseCode::Ok,
            error_message: String::new(),
            lease_id: 5,
            lease_expiry_ns: 1000,
            stream_id: 10000,
            epoch: 1,
            layout_version: 1,
            header_nslots: 256,
            header_slot_bytes: 256,
            node_id: 7,
            header_region_uri: "/shmtensor/stream-10000/header".to_string(),
            pools: vec![PoolDescriptor {
                pool_id: 0,
                nslots: 256,
                stride_bytes: 4096,
                uri: "/shmtensor/stream-10000/pool-0".to_string(),
            }],
        });
        let encoded = m.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(m, decoded);
    }

    #[test]
    fn supervisor_assignment_example_matches_spec() {
        let descriptor_base = 31000u32;
        let descriptor_range = 1000u32;
        let control_base = 32000u32;
        let control_range = 1000u32;
        let consumer_id = 42u32;
        let config = ConsumerConfig {
            stream_id: 10000,
            consumer_id,
            descriptor_stream_id: descriptor_base + (consumer_id % descriptor_range),
            control_stream_id: control_base + (consumer_id % control_range),
            descriptor_channel: "shm-descriptor-0".to_string(),
            control_channel: "shm-control-0".to_string(),
            use_shm: false,
            mode: 1, // RATE_LIMITED
            payload_fallback_uri: "udp://fallback".to_string(),
        };
        assert_eq!(config.descriptor_stream_id, 31042);
        assert_eq!(config.control_stream_id, 32042);

        let m = Message::ConsumerConfig(config.clone());
        let decoded = Message::decode(&m.encode()).unwrap();
        assert_eq!(decoded, Message::ConsumerConfig(config));
    }

    #[test]
    fn unknown_template_id_is_preserved_not_rejected() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&BUS_SCHEMA_ID.to_le_bytes());
        frame.extend_from_slice(&9999u16.to_le_bytes());
        frame.extend_from_slice(&3u16.to_le_bytes());
        frame.extend_from_slice(&BUS_VERSION.to_le_bytes());
        frame.extend_from_slice(&[1, 2, 3]);
        let decoded = Message::decode(&frame).unwrap();
        assert!(matches!(decoded, Message::Unknown { template_id: 9999, .. }));
    }
}
