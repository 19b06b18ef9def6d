use tidepool_core::packet::{opcode_name, Packet, OP_OK};
use tidepool_core::{AppError, AppResult};

use super::METRIC_INTEGRITY_FAILURES;

/// Validate the reply to a write, whose CRC must match the payload of the request.
pub(crate) fn validate_write_reply(request: &Packet, reply: &Packet) -> AppResult<()> {
    validate_header(request, reply)?;
    check_crc(request, request.payload_crc(), reply.crc)
}

/// Validate the reply to a read, whose CRC must match its own payload.
pub(crate) fn validate_read_reply(request: &Packet, reply: &Packet) -> AppResult<()> {
    validate_header(request, reply)?;
    check_crc(request, reply.payload_crc(), reply.crc)
}

/// Validate the reply to a mark-delete.
pub(crate) fn validate_delete_reply(request: &Packet, reply: &Packet) -> AppResult<()> {
    validate_header(request, reply)
}

/// Check that the reply succeeded and belongs to the request.
fn validate_header(request: &Packet, reply: &Packet) -> AppResult<()> {
    if reply.opcode != OP_OK {
        return Err(AppError::ProtocolMismatch(format!(
            "{} failed with {}: {}",
            request.unique_log_id(),
            opcode_name(reply.opcode),
            reply.error_message()
        )));
    }
    if reply.req_id != request.req_id {
        return Err(AppError::ProtocolMismatch(format!("{} got reply to request {}", request.unique_log_id(), reply.req_id)));
    }
    if reply.partition_id != request.partition_id {
        return Err(AppError::ProtocolMismatch(format!(
            "{} got reply for partition {}",
            request.unique_log_id(),
            reply.partition_id
        )));
    }
    Ok(())
}

fn check_crc(request: &Packet, expected: u32, actual: u32) -> AppResult<()> {
    if expected == actual {
        return Ok(());
    }
    tracing::error!(req = %request.unique_log_id(), expected, actual, "CRC mismatch, reply is corrupt");
    metrics::increment_counter!(METRIC_INTEGRITY_FAILURES);
    Err(AppError::Integrity(format!(
        "{} expected crc {:#010x}, got {:#010x}",
        request.unique_log_id(),
        expected,
        actual
    )))
}
