//! Decode a response frame given as hex on the command line, e.g.
//! `cargo run --example decode -- 00 05 6a 1a 18 32 2e 30 2e 30`.

use rrrc_protocol::{decode_response, decode_response_header};

fn main() {
    let bytes: Vec<u8> = std::env::args()
        .skip(1)
        .flat_map(|arg| {
            arg.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(|s| u8::from_str_radix(s.trim_start_matches("0x"), 16))
                .collect::<Vec<_>>()
        })
        .collect::<Result<_, _>>()
        .unwrap_or_else(|e| {
            eprintln!("invalid hex byte: {e}");
            std::process::exit(2);
        });

    match decode_response_header(&bytes) {
        Ok(header) => println!(
            "status {} len {} crc16 {:#06x}",
            header.status.name(),
            header.payload_len,
            header.payload_crc
        ),
        Err(e) => {
            println!("header rejected: {e:?}");
            return;
        }
    }
    match decode_response(&bytes) {
        Ok((_, payload)) => match core::str::from_utf8(payload) {
            Ok(text) if !payload.is_empty() => println!("payload {payload:02x?} ({text:?})"),
            _ => println!("payload {payload:02x?}"),
        },
        Err(e) => println!("payload rejected: {e:?}"),
    }
}
