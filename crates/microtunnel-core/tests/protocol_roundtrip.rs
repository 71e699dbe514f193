//! Integration tests for the microtunnel-core protocol.
//!
//! These tests drive the public API the way the broker and a control client
//! use it together: requests are encoded, streamed through a
//! [`FrameAssembler`] in awkward chunk sizes, and decoded again.

use std::net::Ipv4Addr;

use microtunnel_core::{
    decode_request, decode_response, encode_request, encode_response, AssemblyEvent, CloseCode,
    FrameAssembler, ProtocolError, Request, Response, Status,
};

fn sample_requests() -> Vec<Request> {
    vec![
        Request::Ping,
        Request::OpenTcp {
            id: 7,
            addr: Ipv4Addr::new(93, 184, 216, 34),
            port: 443,
        },
        Request::SendTcp {
            id: 7,
            data: b"GET / HTTP/1.0\r\n\r\n".to_vec(),
        },
        Request::BindUdp {
            id: 3,
            bind_port: 0,
        },
        Request::SendUdp {
            id: 3,
            addr: Ipv4Addr::new(8, 8, 8, 8),
            port: 53,
            data: vec![0x12, 0x34, 0x01, 0x00],
        },
        Request::QueryDns {
            name: "example.com".to_string(),
        },
        Request::Reset,
    ]
}

/// Streams `bytes` into the assembler in chunks of `chunk` bytes and decodes
/// every frame that comes out.
fn assemble_and_decode(bytes: &[u8], chunk: usize) -> Vec<Request> {
    let mut asm = FrameAssembler::new();
    let mut decoded = Vec::new();
    for piece in bytes.chunks(chunk) {
        for event in asm.push_bytes(piece) {
            match event {
                AssemblyEvent::Frame(frame) => {
                    decoded.push(decode_request(&frame).expect("decode must succeed"))
                }
                other => panic!("unexpected assembler event: {other:?}"),
            }
        }
    }
    decoded
}

#[test]
fn test_request_stream_survives_every_chunk_size() {
    // Arrange
    let requests = sample_requests();
    let mut stream = Vec::new();
    for req in &requests {
        stream.extend_from_slice(&encode_request(req).expect("encode must succeed"));
    }

    // Act / Assert
    for chunk in [1, 2, 3, 7, 64, stream.len()] {
        assert_eq!(
            assemble_and_decode(&stream, chunk),
            requests,
            "chunk size {chunk} must not change the decoded requests"
        );
    }
}

#[test]
fn test_total_length_counts_prefix_header_and_payload() {
    let data = vec![0xAA; 300];
    let bytes = encode_request(&Request::SendTcp { id: 1, data }).unwrap();

    let declared = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;

    assert_eq!(declared, 2 + 2 + 2 + 300);
    assert_eq!(declared, bytes.len());
}

#[test]
fn test_malformed_frame_between_valid_frames_is_isolated() {
    // Arrange: PING, an OPEN_TCP truncated to 6 bytes, then BIND_UDP.
    let mut stream = encode_request(&Request::Ping).unwrap();
    stream.extend_from_slice(&[0x00, 0x06, 0x00, 0x02, 0x00, 0x07]);
    stream.extend_from_slice(&encode_request(&Request::BindUdp { id: 4, bind_port: 9999 }).unwrap());

    let mut asm = FrameAssembler::new();
    let mut results = Vec::new();

    // Act
    for event in asm.push_bytes(&stream) {
        if let AssemblyEvent::Frame(frame) = event {
            results.push(decode_request(&frame));
        }
    }

    // Assert
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], Ok(Request::Ping));
    assert!(matches!(results[1], Err(ProtocolError::InvalidLength { .. })));
    assert_eq!(
        results[2],
        Ok(Request::BindUdp {
            id: 4,
            bind_port: 9999
        })
    );
}

#[test]
fn test_response_stream_decodes_back_to_back() {
    let responses = vec![
        Response::OpenTcp {
            id: 7,
            status: Status::Ok,
        },
        Response::RecvTcp {
            id: 7,
            data: vec![0x42; 256],
        },
        Response::RecvData {
            id: 3,
            addr: Ipv4Addr::new(10, 1, 2, 3),
            port: 5000,
            data: vec![],
        },
        Response::Close {
            id: 7,
            code: CloseCode::PeerClosed,
        },
        Response::QueryDns {
            status: Status::Ok,
            addr: Ipv4Addr::LOCALHOST,
            name: "localhost".to_string(),
        },
    ];
    let mut stream = Vec::new();
    for resp in &responses {
        stream.extend_from_slice(&encode_response(resp).unwrap());
    }

    let mut decoded = Vec::new();
    let mut offset = 0;
    while offset < stream.len() {
        let (resp, consumed) = decode_response(&stream[offset..]).expect("decode must succeed");
        decoded.push(resp);
        offset += consumed;
    }

    assert_eq!(decoded, responses);
}
