use super::{
    CLIENT_VERSION_LEN, CMD_GET, CMD_PUT, HASH_LEN, HIT_HEADER_LEN, ID_LEN, KEY_LEN,
    LENGTH_FIELD_LEN, RESP_HIT, RESP_MISS, SERVER_VERSION_LEN,
};
use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

pub fn encode_length(length: u64) -> [u8; LENGTH_FIELD_LEN] {
    let mut out = [0u8; LENGTH_FIELD_LEN];
    out.copy_from_slice(format!("{:016X}", length).as_bytes());
    out
}

pub fn decode_length(field: &[u8; LENGTH_FIELD_LEN]) -> Result<u64> {
    let text = std::str::from_utf8(field)
        .map_err(|_| CacheError::Protocol("length field is not ASCII".to_string()))?;
    u64::from_str_radix(text, 16)
        .map_err(|e| CacheError::Protocol(format!("invalid length field {:?}: {}", text, e)))
}

pub fn encode_id(id: Uuid) -> [u8; ID_LEN] {
    *id.as_bytes()
}

/// Reads the id field in RFC 4122 byte order. Peers that lay GUIDs out
/// mixed-endian (first three groups little-endian) still round-trip on the
/// wire, but the `{id}_{hash}.data` names differ from a cache directory
/// written under that layout, so such a directory is not reusable as-is.
pub fn decode_id(field: [u8; ID_LEN]) -> Uuid {
    Uuid::from_bytes(field)
}

/// Hex-decodes a hash for the wire. The field is fixed width, so only
/// 32-digit hashes can be sent.
pub fn encode_hash(hash: &str) -> Result<[u8; HASH_LEN]> {
    let mut out = [0u8; HASH_LEN];
    hex::decode_to_slice(hash, &mut out).map_err(|e| {
        CacheError::InvalidKey(format!(
            "hash {:?} does not encode to {} bytes: {}",
            hash, HASH_LEN, e
        ))
    })?;
    Ok(out)
}

pub fn decode_hash(field: &[u8; HASH_LEN]) -> String {
    hex::encode(field)
}

pub fn encode_key(key: &CacheKey) -> Result<[u8; KEY_LEN]> {
    let mut out = [0u8; KEY_LEN];
    out[..ID_LEN].copy_from_slice(&encode_id(key.id()));
    out[ID_LEN..].copy_from_slice(&encode_hash(key.hash())?);
    Ok(out)
}

pub fn encode_server_version(version: u32) -> [u8; SERVER_VERSION_LEN] {
    let mut out = [0u8; SERVER_VERSION_LEN];
    out.copy_from_slice(format!("{:08x}", version).as_bytes());
    out
}

/// Client versions are informational; `None` means the tag was not hex.
pub fn parse_client_version(tag: &[u8; CLIENT_VERSION_LEN]) -> Option<u8> {
    let text = std::str::from_utf8(tag).ok()?;
    u8::from_str_radix(text, 16).ok()
}

/// `'p'`, length and key. The payload follows separately.
pub fn encode_put_header(length: u64, key: &CacheKey) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(1 + LENGTH_FIELD_LEN + KEY_LEN);
    out.push(CMD_PUT);
    out.extend_from_slice(&encode_length(length));
    out.extend_from_slice(&encode_key(key)?);
    Ok(out)
}

pub fn encode_get_request(key: &CacheKey) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(1 + KEY_LEN);
    out.push(CMD_GET);
    out.extend_from_slice(&encode_key(key)?);
    Ok(out)
}

pub fn encode_miss_response(key: &CacheKey) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(1 + KEY_LEN);
    out.push(RESP_MISS);
    out.extend_from_slice(&encode_key(key)?);
    Ok(out)
}

pub fn encode_hit_header(length: u64, key: &CacheKey) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HIT_HEADER_LEN);
    out.push(RESP_HIT);
    out.extend_from_slice(&encode_length(length));
    out.extend_from_slice(&encode_key(key)?);
    Ok(out)
}

async fn read_field<R, const N: usize>(reader: &mut R) -> Result<[u8; N]>
where
    R: AsyncRead + Unpin,
{
    let mut field = [0u8; N];
    reader
        .read_exact(&mut field)
        .await
        .map_err(CacheError::Transport)?;
    Ok(field)
}

/// Reads one command or response code. `None` on a clean end of stream.
pub async fn read_byte<R>(reader: &mut R) -> Result<Option<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    let n = reader.read(&mut byte).await.map_err(CacheError::Transport)?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(byte[0]))
}

pub async fn read_client_version<R>(reader: &mut R) -> Result<[u8; CLIENT_VERSION_LEN]>
where
    R: AsyncRead + Unpin,
{
    read_field(reader).await
}

pub async fn read_server_version<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let field: [u8; SERVER_VERSION_LEN] = read_field(reader).await?;
    Ok(String::from_utf8_lossy(&field).into_owned())
}

pub async fn read_length<R>(reader: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let field: [u8; LENGTH_FIELD_LEN] = read_field(reader).await?;
    decode_length(&field)
}

pub async fn read_key<R>(reader: &mut R) -> Result<CacheKey>
where
    R: AsyncRead + Unpin,
{
    let id: [u8; ID_LEN] = read_field(reader).await?;
    let hash: [u8; HASH_LEN] = read_field(reader).await?;
    CacheKey::new(decode_id(id), decode_hash(&hash))
}
