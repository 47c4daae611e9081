//! Wire format shared by the server session and the client.
//!
//! Lengths travel as 16 uppercase ASCII hex digits, ids and hashes as 16 raw
//! bytes each. Every multi-byte read loops until the whole field arrived.

pub mod codec;

pub use codec::{
    decode_hash, decode_id, decode_length, encode_get_request, encode_hash, encode_hit_header,
    encode_id, encode_key, encode_length, encode_miss_response, encode_put_header,
    encode_server_version, parse_client_version, read_byte, read_client_version, read_key,
    read_length, read_server_version,
};

/// Protocol version announced during the handshake.
pub const PROTOCOL_VERSION: u32 = 255;

/// Version tag a client sends first.
pub const CLIENT_VERSION_TAG: &[u8; 2] = b"fe";

pub const CMD_PUT: u8 = b'p';
pub const CMD_GET: u8 = b'g';
pub const RESP_HIT: u8 = b'+';
pub const RESP_MISS: u8 = b'-';

pub const CLIENT_VERSION_LEN: usize = 2;
pub const SERVER_VERSION_LEN: usize = 8;
pub const LENGTH_FIELD_LEN: usize = 16;
pub const ID_LEN: usize = 16;
pub const HASH_LEN: usize = 16;
pub const KEY_LEN: usize = ID_LEN + HASH_LEN;

/// Code byte, length and key of a get hit, sent as one write.
pub const HIT_HEADER_LEN: usize = 1 + LENGTH_FIELD_LEN + KEY_LEN;

pub const DEFAULT_STREAM_BLOCK_SIZE: usize = 1024;
