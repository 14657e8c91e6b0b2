//! Minimal DER inspection of a signed-data structure.
//!
//! The verifier needs to know whether a signature block is detached
//! (signs external content) or inline (carries its own payload) before
//! choosing the verification calling convention. OpenSSL decides this
//! with `CMS_is_detached`, which the Rust bindings do not expose, so
//! this module walks just enough of the DER to answer the one question:
//! does the SignedData's encapsulated content info carry an `eContent`?
//!
//! Structure walked (RFC 5652 / PKCS#7):
//!
//! ```text
//! ContentInfo ::= SEQUENCE {
//!     contentType   OID (signed-data),
//!     content   [0] EXPLICIT SignedData }
//! SignedData ::= SEQUENCE {
//!     version       INTEGER,
//!     digestAlgs    SET,
//!     encapContent  SEQUENCE { eContentType OID, eContent [0] OPTIONAL },
//!     ... }
//! ```

use crate::error::{Result, SignatureError};

const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;
const TAG_INTEGER: u8 = 0x02;
const TAG_OID: u8 = 0x06;
const TAG_CONTEXT_0: u8 = 0xa0;

/// DER encoding of OID 1.2.840.113549.1.7.2 (signed-data), tag and
/// length included.
const SIGNED_DATA_OID: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];

struct Tlv<'a> {
    tag: u8,
    content: &'a [u8],
    rest: &'a [u8],
}

fn parse_err(msg: &str) -> SignatureError {
    SignatureError::Parse(msg.to_string())
}

/// Read one tag-length-value element. Indefinite lengths are BER, not
/// DER, and are rejected.
fn read_tlv(input: &[u8]) -> Result<Tlv<'_>> {
    let (&tag, after_tag) = input
        .split_first()
        .ok_or_else(|| parse_err("truncated element"))?;
    let (&len_byte, after_len) = after_tag
        .split_first()
        .ok_or_else(|| parse_err("truncated length"))?;

    let (length, value_start) = if len_byte & 0x80 == 0 {
        (len_byte as usize, after_len)
    } else {
        let num_bytes = (len_byte & 0x7f) as usize;
        if num_bytes == 0 {
            return Err(parse_err("indefinite length not allowed in DER"));
        }
        if num_bytes > 8 || after_len.len() < num_bytes {
            return Err(parse_err("invalid long-form length"));
        }
        let mut length: usize = 0;
        for &b in &after_len[..num_bytes] {
            length = length
                .checked_mul(256)
                .and_then(|l| l.checked_add(b as usize))
                .ok_or_else(|| parse_err("length overflow"))?;
        }
        (length, &after_len[num_bytes..])
    };

    if value_start.len() < length {
        return Err(parse_err("element length exceeds input"));
    }

    let (content, rest) = value_start.split_at(length);
    Ok(Tlv { tag, content, rest })
}

fn expect_tag<'a>(input: &'a [u8], tag: u8, what: &str) -> Result<Tlv<'a>> {
    let tlv = read_tlv(input)?;
    if tlv.tag != tag {
        return Err(parse_err(&format!(
            "expected {what} (tag 0x{tag:02x}), found tag 0x{:02x}",
            tlv.tag
        )));
    }
    Ok(tlv)
}

/// Report whether a DER-encoded signed-data signature is detached.
///
/// Fails on anything that is not a well-formed signed-data structure;
/// callers must treat a parse failure as a rejected signature.
pub fn is_detached(signature: &[u8]) -> Result<bool> {
    let content_info = expect_tag(signature, TAG_SEQUENCE, "ContentInfo")?;

    let content_type = expect_tag(content_info.content, TAG_OID, "contentType")?;
    if content_type.content != SIGNED_DATA_OID {
        return Err(SignatureError::UnsupportedContentType);
    }

    let wrapper = expect_tag(content_type.rest, TAG_CONTEXT_0, "content")?;
    let signed_data = expect_tag(wrapper.content, TAG_SEQUENCE, "SignedData")?;

    let version = expect_tag(signed_data.content, TAG_INTEGER, "version")?;
    let digest_algs = expect_tag(version.rest, TAG_SET, "digestAlgorithms")?;
    let encap = expect_tag(digest_algs.rest, TAG_SEQUENCE, "encapContentInfo")?;

    let e_content_type = expect_tag(encap.content, TAG_OID, "eContentType")?;
    if e_content_type.rest.is_empty() {
        return Ok(true);
    }

    expect_tag(e_content_type.rest, TAG_CONTEXT_0, "eContent")?;
    Ok(false)
}
