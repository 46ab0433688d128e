//! Encoding and decoding between [`Message`] and raw datagram bytes.
//!
//! Encoding always measures the complete message before touching the output
//! buffer, so an overflow leaves the buffer exactly as it was.

use crate::error::{DecodeError, EncodeError};
use crate::header::{
    Code, ContentFormat, MessageType, HEADER_SIZE, MAX_TOKEN_LEN, PAYLOAD_MARKER, WIRE_VERSION,
};
use crate::message::{Message, RawOption, Token, OPTION_CONTENT_FORMAT, OPTION_URI_PATH};
use bytes::{BufMut, Bytes};

/// Largest value expressible by the two-byte extended nibble form
const MAX_EXTENDED: usize = 0xFFFF + 269;

/// Parse one message from a datagram
pub fn decode(data: &[u8]) -> Result<Message, DecodeError> {
    if data.len() < HEADER_SIZE {
        return Err(DecodeError::TooShort(data.len()));
    }

    let version = data[0] >> 6;
    if version != WIRE_VERSION {
        return Err(DecodeError::Version(version));
    }
    let mtype = MessageType::try_from((data[0] >> 4) & 0x03)?;
    let token_len = data[0] & 0x0F;
    if token_len as usize > MAX_TOKEN_LEN {
        return Err(DecodeError::TokenLength(token_len));
    }
    let code = Code(data[1]);
    let message_id = u16::from_be_bytes([data[2], data[3]]);

    let mut pos = HEADER_SIZE;
    let token = data
        .get(pos..pos + token_len as usize)
        .ok_or(DecodeError::Truncated)?;
    pos += token_len as usize;

    let mut message = Message::new(mtype, code, message_id);
    message.token = Token::from_slice(token);

    let mut number: u32 = 0;
    while pos < data.len() {
        let byte = data[pos];
        pos += 1;

        if byte == PAYLOAD_MARKER {
            if pos == data.len() {
                return Err(DecodeError::EmptyPayload);
            }
            message.payload = Bytes::copy_from_slice(&data[pos..]);
            break;
        }

        let delta = read_extended(byte >> 4, data, &mut pos)?;
        let len = read_extended(byte & 0x0F, data, &mut pos)?;

        number += delta as u32;
        if number > u16::MAX as u32 {
            return Err(DecodeError::OptionNumber);
        }
        let value = data.get(pos..pos + len).ok_or(DecodeError::Truncated)?;
        pos += len;

        apply_option(&mut message, number as u16, value)?;
    }

    Ok(message)
}

/// Serialize `message` into `out`, returning the number of bytes written
pub fn encode(message: &Message, out: &mut [u8]) -> Result<usize, EncodeError> {
    if message.token.len() > MAX_TOKEN_LEN {
        return Err(EncodeError::TokenLength(message.token.len()));
    }

    let mut cf_buf = [0u8; 2];
    let options = collect_options(message, &mut cf_buf);
    let needed = measure(message, &options)?;
    if needed > out.len() {
        return Err(EncodeError::Overflow {
            needed,
            capacity: out.len(),
        });
    }

    let mut cursor = &mut out[..needed];
    cursor.put_u8((WIRE_VERSION << 6) | ((message.mtype as u8) << 4) | message.token.len() as u8);
    cursor.put_u8(message.code.0);
    cursor.put_u16(message.message_id);
    cursor.put_slice(&message.token);

    let mut previous = 0u16;
    for (number, value) in &options {
        let delta = (number - previous) as usize;
        previous = *number;

        let (delta_nibble, delta_ext) = split_extended(delta);
        let (len_nibble, len_ext) = split_extended(value.len());
        cursor.put_u8((delta_nibble << 4) | len_nibble);
        put_extended(&mut cursor, delta_nibble, delta_ext);
        put_extended(&mut cursor, len_nibble, len_ext);
        cursor.put_slice(value);
    }

    if !message.payload.is_empty() {
        cursor.put_u8(PAYLOAD_MARKER);
        cursor.put_slice(&message.payload);
    }

    Ok(needed)
}

/// Exact number of bytes [`encode`] would write for `message`
pub fn encoded_len(message: &Message) -> Result<usize, EncodeError> {
    let mut cf_buf = [0u8; 2];
    let options = collect_options(message, &mut cf_buf);
    measure(message, &options)
}

/// Serialize `message` into a freshly allocated buffer
pub fn encode_to_vec(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let mut buf = vec![0u8; encoded_len(message)?];
    let written = encode(message, &mut buf)?;
    buf.truncate(written);
    Ok(buf)
}

fn apply_option(message: &mut Message, number: u16, value: &[u8]) -> Result<(), DecodeError> {
    match number {
        OPTION_URI_PATH => {
            let segment = std::str::from_utf8(value).map_err(|_| DecodeError::OptionValue(number))?;
            message.uri_path.push(segment.to_string());
        }
        OPTION_CONTENT_FORMAT => {
            if value.len() > 2 {
                return Err(DecodeError::OptionValue(number));
            }
            let format = value.iter().fold(0u16, |acc, b| (acc << 8) | *b as u16);
            message.content_format = Some(ContentFormat(format));
        }
        _ => message.options.push(RawOption {
            number,
            value: Bytes::copy_from_slice(value),
        }),
    }
    Ok(())
}

fn read_extended(nibble: u8, data: &[u8], pos: &mut usize) -> Result<usize, DecodeError> {
    match nibble {
        0..=12 => Ok(nibble as usize),
        13 => {
            let ext = *data.get(*pos).ok_or(DecodeError::Truncated)?;
            *pos += 1;
            Ok(ext as usize + 13)
        }
        14 => {
            let ext = data.get(*pos..*pos + 2).ok_or(DecodeError::Truncated)?;
            *pos += 2;
            Ok(u16::from_be_bytes([ext[0], ext[1]]) as usize + 269)
        }
        _ => Err(DecodeError::ReservedNibble),
    }
}

/// All options in ascending number order; ties keep model order
fn collect_options<'a>(message: &'a Message, cf_buf: &'a mut [u8; 2]) -> Vec<(u16, &'a [u8])> {
    let mut options: Vec<(u16, &[u8])> =
        Vec::with_capacity(message.uri_path.len() + message.options.len() + 1);

    for segment in &message.uri_path {
        options.push((OPTION_URI_PATH, segment.as_bytes()));
    }
    if let Some(format) = message.content_format {
        options.push((OPTION_CONTENT_FORMAT, content_format_bytes(format, cf_buf)));
    }
    for option in &message.options {
        options.push((option.number, option.value.as_ref()));
    }

    options.sort_by_key(|(number, _)| *number);
    options
}

fn content_format_bytes(format: ContentFormat, buf: &mut [u8; 2]) -> &[u8] {
    *buf = format.0.to_be_bytes();
    let skip = match format.0 {
        0 => 2,
        1..=0xFF => 1,
        _ => 0,
    };
    &buf[skip..]
}

fn measure(message: &Message, options: &[(u16, &[u8])]) -> Result<usize, EncodeError> {
    let mut size = HEADER_SIZE + message.token.len();

    let mut previous = 0u16;
    for (number, value) in options {
        if value.len() > MAX_EXTENDED {
            return Err(EncodeError::OptionTooLong {
                number: *number,
                len: value.len(),
            });
        }
        size += 1;
        size += extended_size((number - previous) as usize);
        size += extended_size(value.len());
        size += value.len();
        previous = *number;
    }

    if !message.payload.is_empty() {
        size += 1 + message.payload.len();
    }

    Ok(size)
}

fn extended_size(value: usize) -> usize {
    match value {
        0..=12 => 0,
        13..=268 => 1,
        _ => 2,
    }
}

fn split_extended(value: usize) -> (u8, usize) {
    match value {
        0..=12 => (value as u8, 0),
        13..=268 => (13, value - 13),
        _ => (14, value - 269),
    }
}

fn put_extended(cursor: &mut &mut [u8], nibble: u8, ext: usize) {
    match nibble {
        13 => cursor.put_u8(ext as u8),
        14 => cursor.put_u16(ext as u16),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Method;

    fn sample_request() -> Message {
        Message::request(MessageType::Confirmable, Code::GET, 0xBEEF)
            .with_token(&[0xA1, 0xB2, 0xC3])
            .with_path("sensors/temperature")
    }

    #[test]
    fn test_minimal_header() {
        let msg = Message::new(MessageType::Confirmable, Code::EMPTY, 0x0102);
        let bytes = encode_to_vec(&msg).unwrap();
        assert_eq!(bytes, vec![0x40, 0x00, 0x01, 0x02]);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_known_get_request_bytes() {
        // CON GET, MID 0x7d34, Uri-Path "temperature"
        let bytes = [
            0x40, 0x01, 0x7d, 0x34, 0xbb, b't', b'e', b'm', b'p', b'e', b'r', b'a', b't', b'u',
            b'r', b'e',
        ];
        let msg = decode(&bytes).unwrap();
        assert_eq!(msg.mtype, MessageType::Confirmable);
        assert_eq!(msg.method(), Some(Method::Get));
        assert_eq!(msg.message_id, 0x7d34);
        assert_eq!(msg.path(), "temperature");
        assert!(msg.payload.is_empty());
        assert_eq!(encode_to_vec(&msg).unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_round_trip_with_everything() {
        let msg = Message::response_to(&sample_request(), Code::CONTENT)
            .with_content_format(ContentFormat::JSON)
            .with_option(60, Bytes::from_static(&[0x01, 0x00]))
            .with_option(2048, Bytes::from(vec![0x55; 300]))
            .with_payload(Bytes::from_static(b"{\"t\":21.5}"));

        let bytes = encode_to_vec(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_options_sorted_on_wire() {
        // Content-Format (12) set before a lower-numbered option in the model
        let msg = Message::request(MessageType::NonConfirmable, Code::POST, 1)
            .with_content_format(ContentFormat::TEXT_PLAIN)
            .with_option(4, Bytes::from_static(b"etag"))
            .with_path("a");
        let bytes = encode_to_vec(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.options[0].number, 4);
        assert_eq!(decoded.path(), "a");
        assert_eq!(decoded.content_format, Some(ContentFormat::TEXT_PLAIN));
    }

    #[test]
    fn test_encode_overflow_writes_nothing() {
        let msg = sample_request().with_payload(Bytes::from(vec![0x42; 64]));
        let needed = encoded_len(&msg).unwrap();

        let mut buf = vec![0xEE; needed - 1];
        let err = encode(&msg, &mut buf).unwrap_err();
        assert_eq!(
            err,
            EncodeError::Overflow {
                needed,
                capacity: needed - 1
            }
        );
        assert!(buf.iter().all(|b| *b == 0xEE));

        let mut exact = vec![0u8; needed];
        assert_eq!(encode(&msg, &mut exact).unwrap(), needed);
    }

    #[test]
    fn test_token_too_long() {
        let mut msg = sample_request();
        msg.token = Token::from_slice(&[0u8; 9]);
        let mut buf = [0u8; 64];
        assert_eq!(encode(&msg, &mut buf), Err(EncodeError::TokenLength(9)));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(&[0x40, 0x01, 0x00]), Err(DecodeError::TooShort(3)));
        assert_eq!(decode(&[0x80, 0x01, 0x00, 0x01]), Err(DecodeError::Version(2)));
        assert_eq!(decode(&[0x49, 0x01, 0x00, 0x01]), Err(DecodeError::TokenLength(9)));
        // Token announced but missing
        assert_eq!(decode(&[0x42, 0x01, 0x00, 0x01, 0xAA]), Err(DecodeError::Truncated));
        // Payload marker with nothing after it
        assert_eq!(
            decode(&[0x40, 0x01, 0x00, 0x01, 0xFF]),
            Err(DecodeError::EmptyPayload)
        );
        // Reserved delta nibble
        assert_eq!(
            decode(&[0x40, 0x01, 0x00, 0x01, 0xF1, 0x00]),
            Err(DecodeError::ReservedNibble)
        );
        // Option value runs past the datagram
        assert_eq!(
            decode(&[0x40, 0x01, 0x00, 0x01, 0xB5, b'a']),
            Err(DecodeError::Truncated)
        );
        // Uri-Path must be UTF-8
        assert_eq!(
            decode(&[0x40, 0x01, 0x00, 0x01, 0xB1, 0xFF]),
            Err(DecodeError::OptionValue(OPTION_URI_PATH))
        );
    }

    #[test]
    fn test_content_format_widths() {
        for format in [ContentFormat(0), ContentFormat(42), ContentFormat(0x1234)] {
            let msg = Message::new(MessageType::NonConfirmable, Code::CONTENT, 5)
                .with_content_format(format);
            let bytes = encode_to_vec(&msg).unwrap();
            assert_eq!(decode(&bytes).unwrap().content_format, Some(format));
        }
    }
}
