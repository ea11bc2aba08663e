//! Short message text decoding by SMPP data_coding.
//!
//! Only UCS2 (data_coding 8) is transcoded; every other coding is passed through as text.

/// data_coding value for UCS2 / UTF-16.
pub const UCS2: u8 = 0x08;

/// Decode message bytes according to `data_coding`. Never fails: malformed UCS2 input is
/// logged and decoded best-effort.
pub fn decode_text(data_coding: Option<u8>, bytes: &[u8]) -> String {
    match data_coding {
        Some(UCS2) => decode_ucs2(bytes),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[derive(Clone, Copy)]
enum Endian {
    Big,
    Little,
}

/// UTF-16, big-endian unless a byte order mark says otherwise. The mark is stripped.
fn decode_ucs2(bytes: &[u8]) -> String {
    let (endian, body) = match bytes {
        [0xFE, 0xFF, rest @ ..] => (Endian::Big, rest),
        [0xFF, 0xFE, rest @ ..] => (Endian::Little, rest),
        _ => (Endian::Big, bytes),
    };

    let chunks = body.chunks_exact(2);
    if !chunks.remainder().is_empty() {
        log::warn!(
            "can't decode UTF16 message {:?}: odd length, dropping trailing byte",
            bytes
        );
    }
    let units = chunks.map(|pair| match endian {
        Endian::Big => u16::from_be_bytes([pair[0], pair[1]]),
        Endian::Little => u16::from_le_bytes([pair[0], pair[1]]),
    });

    let mut out = String::with_capacity(body.len() / 2);
    let mut malformed = false;
    for c in char::decode_utf16(units) {
        match c {
            Ok(c) => out.push(c),
            Err(_) => {
                malformed = true;
                out.push(char::REPLACEMENT_CHARACTER);
            }
        }
    }
    if malformed {
        log::warn!("can't decode UTF16 message {:?}: unpaired surrogate", bytes);
    }
    out
}
