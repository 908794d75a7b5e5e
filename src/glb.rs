use crate::error::LoadError;
use base64::Engine;
use serde_json::Value;

pub(crate) const GLB_MAGIC: u32 = 0x4654_6C67;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

/// The split contents of a GLB container: one parsed JSON chunk plus the
/// binary chunks in file order.
#[derive(Debug)]
pub struct GlbContents {
    pub json: Value,
    pub binary_chunks: Vec<Vec<u8>>,
}

fn read_u32_le(bytes: &[u8], offset: usize) -> Result<u32, LoadError> {
    let end = offset
        .checked_add(4)
        .filter(|e| *e <= bytes.len())
        .ok_or(LoadError::Truncated("u32 field past end of file"))?;
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[offset..end]);
    Ok(u32::from_le_bytes(b))
}

/// Splits a GLB byte stream into its JSON document and binary chunks.
///
/// Header layout: magic `glTF` (0x46546C67), version 2, total length, then a
/// run of chunks each prefixed by (length: u32, type: u32). Exactly one JSON
/// chunk is required; extra JSON chunks and unknown chunk types are skipped
/// with a warning, binary chunks are collected in order.
pub fn parse_glb(bytes: &[u8]) -> Result<GlbContents, LoadError> {
    let magic = read_u32_le(bytes, 0)?;
    if magic != GLB_MAGIC {
        return Err(LoadError::BadMagic(magic));
    }
    let version = read_u32_le(bytes, 4)?;
    if version != 2 {
        return Err(LoadError::UnsupportedVersion(version));
    }
    let total_len = read_u32_le(bytes, 8)? as usize;
    if total_len > bytes.len() {
        return Err(LoadError::Truncated("declared length exceeds file size"));
    }

    let mut json: Option<Value> = None;
    let mut binary_chunks = Vec::new();
    let mut cursor = 12usize;

    while cursor + 8 <= total_len {
        let chunk_len = read_u32_le(bytes, cursor)? as usize;
        let chunk_type = read_u32_le(bytes, cursor + 4)?;
        let data_start = cursor + 8;
        let data_end = data_start
            .checked_add(chunk_len)
            .filter(|e| *e <= total_len)
            .ok_or(LoadError::Truncated("chunk body past declared length"))?;
        let data = &bytes[data_start..data_end];

        match chunk_type {
            CHUNK_JSON => {
                if json.is_none() {
                    json = Some(serde_json::from_slice(data)?);
                } else {
                    eprintln!("[warn] extra JSON chunk in GLB ignored");
                }
            }
            CHUNK_BIN => binary_chunks.push(data.to_vec()),
            other => {
                eprintln!("[warn] unknown GLB chunk type 0x{other:08X} skipped");
            }
        }

        // Chunks are 4-byte aligned.
        cursor = data_end + (4 - data_end % 4) % 4;
    }

    let json = json.ok_or(LoadError::MissingJsonChunk)?;
    Ok(GlbContents {
        json,
        binary_chunks,
    })
}

/// Decodes a glTF `data:` URI payload. Returns `None` when the URI is not a
/// data URI at all; a malformed base64 body is a soft failure reported by
/// the caller.
pub fn decode_data_uri(uri: &str) -> Option<Result<Vec<u8>, String>> {
    let rest = uri.strip_prefix("data:")?;
    if let Some(stripped) = rest.split_once(";base64,") {
        return Some(
            base64::engine::general_purpose::STANDARD
                .decode(stripped.1)
                .map_err(|e| format!("invalid base64 data URI: {e}")),
        );
    }
    // Plain bodies are percent-encoded text.
    let (_mime, body) = rest.split_once(',')?;
    Some(Ok(percent_decode(body)))
}

fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Ok(v) = u8::from_str_radix(&s[i + 1..i + 3], 16)
        {
            out.push(v);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

/// Builds a GLB byte stream from a JSON payload and optional binary chunk.
pub fn build_glb(json: &Value, bin: Option<&[u8]>) -> Vec<u8> {
    let mut json_bytes = serde_json::to_vec(json).unwrap_or_else(|_| b"{}".to_vec());
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }

    let mut bin_bytes = bin.map(|b| b.to_vec()).unwrap_or_default();
    while !bin_bytes.is_empty() && bin_bytes.len() % 4 != 0 {
        bin_bytes.push(0);
    }

    let mut total = 12 + 8 + json_bytes.len();
    if !bin_bytes.is_empty() {
        total += 8 + bin_bytes.len();
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_bytes);
    if !bin_bytes.is_empty() {
        out.extend_from_slice(&(bin_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(&bin_bytes);
    }
    out
}
