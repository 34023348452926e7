//! Header parsing and the Mcoded7 decode-fallback decision.
//!
//! Bit-exact SysEx framing and the Mcoded7 bit-packing itself live behind
//! external collaborators; this module only owns the JSON header parse and
//! the decision of *whether* to decode.

use crate::error::PeError;
use crate::transport::{Mcoded7Codec, ParsedHeader};

/// `(status, parsed header, raw body, decoded body)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub header: ParsedHeader,
    pub raw_body: Vec<u8>,
    pub decoded_body: Vec<u8>,
}

/// Parse the concatenated header bytes of a completed assembly.
///
/// An empty header implies status 200 with every other field absent.
pub fn parse_header(bytes: &[u8]) -> Result<ParsedHeader, PeError> {
    if bytes.is_empty() {
        return Ok(ParsedHeader {
            status: 200,
            message: None,
            resource: None,
            res_id: None,
            offset: None,
            limit: None,
            total_count: None,
            media_type: None,
            mutual_encoding: None,
        });
    }
    serde_json::from_slice(bytes).map_err(|e| PeError::InvalidResponse {
        reason: format!("header parse failed: {e}"),
    })
}

fn looks_like_json(body: &[u8]) -> bool {
    matches!(body.first(), Some(b'{') | Some(b'['))
}

/// Decide whether and how to Mcoded7-decode the raw body.
///
/// Decodes when the header declares Mcoded7, OR -- as a fallback for
/// non-compliant devices -- when the body does not look like JSON and
/// decoding succeeds. If a declared decode fails, the raw bytes are
/// returned unchanged rather than surfacing a hard error here; the caller
/// (PE Manager) is responsible for treating a JSON-parse failure downstream
/// as `invalid response`.
pub fn decode_body(header: &ParsedHeader, raw: &[u8], codec: &dyn Mcoded7Codec) -> Vec<u8> {
    if header.is_mcoded7() {
        return codec.decode(raw).unwrap_or_else(|_| raw.to_vec());
    }
    if !looks_like_json(raw) {
        if let Ok(decoded) = codec.decode(raw) {
            return decoded;
        }
    }
    raw.to_vec()
}

/// Build a [`Response`] from a completed assembly's header and body bytes.
pub fn build_response(header_bytes: &[u8], raw_body: &[u8], codec: &dyn Mcoded7Codec) -> Result<Response, PeError> {
    let header = parse_header(header_bytes)?;
    let decoded_body = decode_body(&header, raw_body, codec);
    Ok(Response {
        status: header.status,
        header,
        raw_body: raw_body.to_vec(),
        decoded_body,
    })
}
