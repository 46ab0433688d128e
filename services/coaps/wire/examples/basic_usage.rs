//! Basic usage example for the coaps message codec.

use bytes::Bytes;
use coaps_wire::{
    decode, encode, encoded_len, Code, ContentFormat, EncodeError, Message, MessageType,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== coaps Message Codec Example ===\n");

    // 1. Build a confirmable GET request
    println!("1. Creating a GET request for /time...");
    let request = Message::request(MessageType::Confirmable, Code::GET, 0x1001)
        .with_token(&[0xCA, 0xFE])
        .with_path("time");

    let mut buf = [0u8; 64];
    let len = encode(&request, &mut buf)?;
    println!("   Encoded request size: {} bytes", len);
    println!("   Bytes: {:02X?}", &buf[..len]);

    // 2. Decode it again
    println!("\n2. Decoding the request...");
    let decoded = decode(&buf[..len])?;
    println!("   Method: {:?}", decoded.method());
    println!("   Path: /{}", decoded.path());
    println!("   Message ID: 0x{:04X}", decoded.message_id);

    // 3. Build the piggybacked response
    println!("\n3. Creating the 2.05 response...");
    let response = Message::response_to(&decoded, Code::CONTENT)
        .with_content_format(ContentFormat::TEXT_PLAIN)
        .with_payload(Bytes::from_static(b"12:00"));
    let len = encode(&response, &mut buf)?;
    let decoded = decode(&buf[..len])?;
    println!(
        "   {} {:?} payload={:?}",
        decoded.code,
        decoded.mtype,
        String::from_utf8_lossy(&decoded.payload)
    );

    // 4. Overflow is reported, never truncated
    println!("\n4. Encoding into a buffer that is too small...");
    let big = response.with_payload(Bytes::from(vec![b'x'; 128]));
    println!("   Needs {} bytes", encoded_len(&big)?);
    match encode(&big, &mut buf) {
        Err(EncodeError::Overflow { needed, capacity }) => {
            println!("   Rejected: need {} bytes, have {}", needed, capacity)
        }
        other => println!("   Unexpected result: {:?}", other),
    }

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
