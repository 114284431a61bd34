use scursor::{ReadCursor, WriteCursor};

use crate::client::message::{Request, Response};
use crate::decode::AduDecodeLevel;
use crate::error::ErrorCode;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 6;
    pub(crate) const MODBUS_PROTOCOL_ID: u16 = 0;
    /// unit id + function code + up to 252 bytes of function data
    pub(crate) const MAX_FRAME_LENGTH: usize = 260;
    pub(crate) const MAX_PAYLOAD_LENGTH: usize = MAX_FRAME_LENGTH - HEADER_LENGTH - 2;
    /// unit id + function code + error code
    pub(crate) const ERROR_RESPONSE_LENGTH: u16 = 3;
    pub(crate) const EXCEPTION_BIT: u8 = 0x80;
    /// 248..=255 are reserved
    pub(crate) const MAX_UNICAST_SERVER_ID: u8 = 247;
}

/// Monotonically increasing transaction identifier, wraps around at `u16::MAX`
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    #[cfg(test)]
    pub(crate) fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) fn to_u16(self) -> u16 {
        self.value
    }

    pub(crate) fn next(&mut self) -> TxId {
        let ret = *self;
        self.value = self.value.wrapping_add(1);
        ret
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

/// The 6-byte session header that precedes every Modbus TCP frame
///
/// All fields are transmitted big-endian. `length` counts every byte following the header,
/// i.e. the unit id, the function code and the function data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MbapHeader {
    /// correlates a response with its request
    pub tx_id: u16,
    /// always zero for Modbus
    pub protocol_id: u16,
    /// number of bytes following the header
    pub length: u16,
}

impl MbapHeader {
    /// Length of the header on the wire
    pub const LENGTH: usize = constants::HEADER_LENGTH;

    /// construct a header from its fields
    pub fn new(tx_id: u16, protocol_id: u16, length: u16) -> Self {
        Self {
            tx_id,
            protocol_id,
            length,
        }
    }

    /// serialize the header in network byte order
    pub fn to_bytes(&self) -> [u8; constants::HEADER_LENGTH] {
        let [tx0, tx1] = self.tx_id.to_be_bytes();
        let [p0, p1] = self.protocol_id.to_be_bytes();
        let [len0, len1] = self.length.to_be_bytes();
        [tx0, tx1, p0, p1, len0, len1]
    }

    /// parse a header from the start of `bytes`
    ///
    /// Returns `None` if fewer than 6 bytes are present
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let mut cursor = ReadCursor::new(bytes);
        Self::read(&mut cursor).ok()
    }

    fn read(cursor: &mut ReadCursor) -> Result<Self, scursor::ReadError> {
        Ok(Self {
            tx_id: cursor.read_u16_be()?,
            protocol_id: cursor.read_u16_be()?,
            length: cursor.read_u16_be()?,
        })
    }

    fn write(&self, cursor: &mut WriteCursor) -> Result<(), scursor::WriteError> {
        cursor.write_u16_be(self.tx_id)?;
        cursor.write_u16_be(self.protocol_id)?;
        cursor.write_u16_be(self.length)
    }
}

impl std::fmt::Display for MbapHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tx_id: {:#06X} protocol_id: {:#06X} length: {}",
            self.tx_id, self.protocol_id, self.length
        )
    }
}

/// Writes request frames into a single contiguous buffer
pub(crate) struct FrameWriter {
    buffer: [u8; constants::MAX_FRAME_LENGTH],
}

impl FrameWriter {
    pub(crate) fn new() -> Self {
        Self {
            buffer: [0; constants::MAX_FRAME_LENGTH],
        }
    }

    pub(crate) fn format_request(
        &mut self,
        request: &Request,
        level: AduDecodeLevel,
    ) -> Result<&[u8], ErrorCode> {
        let header = request.header();
        let total = {
            let mut cursor = WriteCursor::new(self.buffer.as_mut());
            Self::write_request(&mut cursor, header, request)
                .map_err(|_| ErrorCode::PacketLengthError)?;
            cursor.position()
        };

        let frame = &self.buffer[..total];
        if level.enabled() {
            tracing::info!("MBAP TX - {}", AduDisplay::new(level, header, &frame[constants::HEADER_LENGTH..]));
        }
        Ok(frame)
    }

    fn write_request(
        cursor: &mut WriteCursor,
        header: MbapHeader,
        request: &Request,
    ) -> Result<(), scursor::WriteError> {
        header.write(cursor)?;
        cursor.write_u8(request.server_id())?;
        cursor.write_u8(request.function_code())?;
        for byte in request.payload() {
            cursor.write_u8(*byte)?;
        }
        Ok(())
    }
}

/// Validate a received frame against the request that is outstanding
///
/// The checks are applied in order and the first failure determines the error:
///
/// 1. nothing received: `Timeout`
/// 2. the header rebuilt from the request ids and the received length differs from the received header: `TcpHeadMismatch`
/// 3. the unit id differs from the request: `ServerIdMismatch`
/// 4. the function code (exception bit masked) differs from the request: `FcMismatch`
pub(crate) fn validate_response(
    request: &Request,
    received: &[u8],
    level: AduDecodeLevel,
) -> Response {
    if received.is_empty() {
        return Response::from_error(request, ErrorCode::Timeout);
    }

    let body_length = received.len().saturating_sub(constants::HEADER_LENGTH);
    let expected = MbapHeader::new(
        request.tx_id(),
        request.protocol_id(),
        // the receive buffer is far smaller than u16::MAX
        body_length as u16,
    );

    if received.get(..constants::HEADER_LENGTH) != Some(expected.to_bytes().as_slice()) {
        tracing::warn!(
            "MBAP header mismatch, expected [{}] received {} bytes",
            expected,
            received.len()
        );
        return Response::from_error(request, ErrorCode::TcpHeadMismatch);
    }

    let body = &received[constants::HEADER_LENGTH..];
    if level.enabled() {
        tracing::info!("MBAP RX - {}", AduDisplay::new(level, expected, body));
    }

    if body.first() != Some(&request.server_id()) {
        tracing::warn!(
            "unit id mismatch, expected {:#04X} received {:?}",
            request.server_id(),
            body.first()
        );
        return Response::from_error(request, ErrorCode::ServerIdMismatch);
    }

    if body.get(1).map(|fc| fc & !constants::EXCEPTION_BIT) != Some(request.function_code()) {
        tracing::warn!(
            "function code mismatch, expected {:#04X} received {:?}",
            request.function_code(),
            body.get(1)
        );
        return Response::from_error(request, ErrorCode::FcMismatch);
    }

    Response::from_frame(expected, body.to_vec())
}

/// Signature of the pre-flight check applied to a server id and function code
/// before anything is queued or written
pub type ServerFunctionCheck = fn(server_id: u8, function_code: u8) -> ErrorCode;

/// The default pre-flight check
///
/// Rejects server id 0 (broadcasts are never answered over TCP), the reserved ids above 247
/// and function codes that are zero or have the exception bit set.
pub fn check_server_and_function(server_id: u8, function_code: u8) -> ErrorCode {
    if server_id == 0 || server_id > constants::MAX_UNICAST_SERVER_ID {
        return ErrorCode::InvalidServer;
    }

    if function_code == 0 || function_code & constants::EXCEPTION_BIT != 0 {
        return ErrorCode::IllegalFunction;
    }

    ErrorCode::Success
}

/// Build the bytes of an error response
///
/// If `check` rejects the server id/function code, the result is a single byte containing the
/// rejection code and no header. Otherwise it is a complete 9-byte frame: the header with a
/// length of 3, the server id, the function code with the exception bit set and `error`.
pub fn generate_error_response(
    tx_id: u16,
    server_id: u8,
    function_code: u8,
    error: ErrorCode,
    check: ServerFunctionCheck,
) -> Vec<u8> {
    let rejection = check(server_id, function_code);
    if rejection != ErrorCode::Success {
        return vec![rejection.into()];
    }

    let header = MbapHeader::new(
        tx_id,
        constants::MODBUS_PROTOCOL_ID,
        constants::ERROR_RESPONSE_LENGTH,
    );
    let mut bytes = Vec::with_capacity(constants::HEADER_LENGTH + 3);
    bytes.extend_from_slice(&header.to_bytes());
    bytes.push(server_id);
    bytes.push(function_code | constants::EXCEPTION_BIT);
    bytes.push(error.into());
    bytes
}

struct AduDisplay<'a> {
    level: AduDecodeLevel,
    header: MbapHeader,
    body: &'a [u8],
}

impl<'a> AduDisplay<'a> {
    fn new(level: AduDecodeLevel, header: MbapHeader, body: &'a [u8]) -> Self {
        AduDisplay {
            level,
            header,
            body,
        }
    }
}

impl std::fmt::Display for AduDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.header)?;
        if let [unit_id, function_code, ..] = self.body {
            write!(f, " unit: {unit_id:#04X} fc: {function_code:#04X}")?;
        }
        if self.level.payload_enabled() {
            crate::common::phys::format_bytes(f, self.body)?;
        }
        Ok(())
    }
}
