use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;

use crate::packet::{self, Packet, MAX_PACKET_DATA_SIZE, OP_MARK_DELETE, OP_OK, OP_READ, OP_WRITE, PACKET_HEADER_SIZE};

#[tokio::test]
async fn packet_survives_framing_over_a_stream() -> Result<()> {
    let (mut client, mut server) = tokio::io::duplex(1024 * 64);
    let request = Packet::new_write(77, b"some object payload".to_vec());

    request.write_to(&mut client).await?;
    let received = Packet::read_from(&mut server).await?;

    assert_eq!(received, request, "expected received packet to match\nexpected: {:?}\ngot: {:?}", request, received);
    assert_eq!(received.payload_crc(), received.crc, "expected the framed CRC to cover the payload");
    Ok(())
}

#[tokio::test]
async fn read_from_rejects_bad_magic() -> Result<()> {
    let (mut client, mut server) = tokio::io::duplex(1024);
    let mut frame = vec![0u8; PACKET_HEADER_SIZE];
    frame[0] = 0x7e;
    client.write_all(&frame).await.context("error writing test frame")?;

    let res = Packet::read_from(&mut server).await;

    let err = res.err().context("expected an error for a frame with bad magic")?;
    assert!(err.to_string().contains("invalid packet magic"), "unexpected error: {}", err);
    Ok(())
}

#[tokio::test]
async fn read_from_rejects_oversized_payloads() -> Result<()> {
    let (mut client, mut server) = tokio::io::duplex(1024);
    let mut frame = vec![0u8; PACKET_HEADER_SIZE];
    frame[0] = packet::PROTO_MAGIC;
    frame[42..46].copy_from_slice(&(MAX_PACKET_DATA_SIZE + 1).to_be_bytes());
    client.write_all(&frame).await.context("error writing test frame")?;

    let res = Packet::read_from(&mut server).await;

    assert!(res.is_err(), "expected an error for an oversized payload");
    Ok(())
}

#[test]
fn request_constructors_assign_unique_ids_and_opcodes() {
    let write = Packet::new_write(1, vec![1, 2, 3]);
    let read = Packet::new_read(1, 2, 3, 10);
    let delete = Packet::new_mark_delete(1, 2, 3);

    assert_eq!(write.opcode, OP_WRITE);
    assert_eq!(write.size, 3, "expected write size to match its payload");
    assert_eq!(write.crc, packet::crc32(&[1, 2, 3]), "expected write CRC to cover its payload");
    assert_eq!(read.opcode, OP_READ);
    assert_eq!(read.size, 10, "expected read size to be the requested size");
    assert!(read.data.is_empty(), "expected a read request to carry no payload");
    assert_eq!(delete.opcode, OP_MARK_DELETE);
    assert!(write.req_id != read.req_id && read.req_id != delete.req_id, "expected unique request IDs");
}

#[test]
fn reply_mirrors_request_identity() {
    let request = Packet::new_read(9, 8, 7, 6);

    let reply = Packet::new_reply(&request).with_data(b"abcdef".to_vec());

    assert_eq!(reply.opcode, OP_OK);
    assert_eq!(reply.req_id, request.req_id);
    assert_eq!(reply.partition_id, 9);
    assert_eq!((reply.file_id, reply.object_id), (8, 7));
    assert_eq!(reply.payload(), b"abcdef");
}

#[test]
fn crc32_matches_ieee_check_value() {
    // The standard CRC-32/IEEE check value.
    assert_eq!(packet::crc32(b"123456789"), 0xCBF4_3926);
}
