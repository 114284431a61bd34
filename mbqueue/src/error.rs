pub(crate) mod constants {
    pub(crate) const SUCCESS: u8 = 0x00;
    pub(crate) const ILLEGAL_FUNCTION: u8 = 0x01;
    pub(crate) const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
    pub(crate) const ILLEGAL_DATA_VALUE: u8 = 0x03;
    pub(crate) const SERVER_DEVICE_FAILURE: u8 = 0x04;
    pub(crate) const ACKNOWLEDGE: u8 = 0x05;
    pub(crate) const SERVER_DEVICE_BUSY: u8 = 0x06;
    pub(crate) const NEGATIVE_ACKNOWLEDGE: u8 = 0x07;
    pub(crate) const MEMORY_PARITY_ERROR: u8 = 0x08;
    pub(crate) const GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
    pub(crate) const GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND: u8 = 0x0B;
    pub(crate) const TIMEOUT: u8 = 0xE0;
    pub(crate) const INVALID_SERVER: u8 = 0xE1;
    pub(crate) const FC_MISMATCH: u8 = 0xE3;
    pub(crate) const SERVER_ID_MISMATCH: u8 = 0xE4;
    pub(crate) const PACKET_LENGTH_ERROR: u8 = 0xE5;
    pub(crate) const REQUEST_QUEUE_FULL: u8 = 0xE8;
    pub(crate) const IP_CONNECTION_FAILED: u8 = 0xEA;
    pub(crate) const TCP_HEAD_MISMATCH: u8 = 0xEB;
    pub(crate) const EMPTY_MESSAGE: u8 = 0xEC;
    pub(crate) const UNDEFINED_ERROR: u8 = 0xFF;
}

/// Result codes reported by the client
///
/// Values `0x01..=0x0B` are the exception codes defined in the Modbus specification and are
/// reported when a server answers with an exception response. The remaining values are
/// generated locally by the client. Every code has a single byte representation which is
/// used when the client synthesizes an error response.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The exchange completed successfully
    Success,
    /// The function code received in the query is not an allowable action for the server
    IllegalFunction,
    /// The data address received in the query is not an allowable address for the server
    IllegalDataAddress,
    /// A value contained in the request is not an allowable value for server
    IllegalDataValue,
    /// An unrecoverable error occurred while the server was attempting to perform the requested action
    ServerDeviceFailure,
    /// The server has accepted the request and is processing it
    Acknowledge,
    /// The server is engaged in processing a long-duration program command, try again later
    ServerDeviceBusy,
    /// The server cannot perform the program function received in the query
    NegativeAcknowledge,
    /// The server detected a parity error in the memory while reading a record file
    MemoryParityError,
    /// The gateway was unable to allocate an internal communication path
    GatewayPathUnavailable,
    /// The gateway did not obtain a response from the target device
    GatewayTargetDeviceFailedToRespond,
    /// No response was received within the response timeout
    Timeout,
    /// The server id is outside of the allowed range
    InvalidServer,
    /// The function code in the response does not match the request
    FcMismatch,
    /// The server id in the response does not match the request
    ServerIdMismatch,
    /// The response is too short to contain the expected fields
    PacketLengthError,
    /// The request queue has reached its limit
    RequestQueueFull,
    /// A connection to the target could not be established or was lost
    IpConnectionFailed,
    /// The MBAP header of the response does not match the request
    TcpHeadMismatch,
    /// The request or response contained no data
    EmptyMessage,
    /// An error without a more specific description
    UndefinedError,
    /// A code not defined by this library
    Unknown(u8),
}

impl ErrorCode {
    /// Errors which are recovered locally by retrying the request
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::Timeout | ErrorCode::IpConnectionFailed)
    }

    /// true if the code is one of the exception codes a Modbus server may return
    pub fn is_exception(self) -> bool {
        matches!(
            self,
            ErrorCode::IllegalFunction
                | ErrorCode::IllegalDataAddress
                | ErrorCode::IllegalDataValue
                | ErrorCode::ServerDeviceFailure
                | ErrorCode::Acknowledge
                | ErrorCode::ServerDeviceBusy
                | ErrorCode::NegativeAcknowledge
                | ErrorCode::MemoryParityError
                | ErrorCode::GatewayPathUnavailable
                | ErrorCode::GatewayTargetDeviceFailedToRespond
        )
    }
}

impl From<u8> for ErrorCode {
    fn from(value: u8) -> Self {
        match value {
            constants::SUCCESS => ErrorCode::Success,
            constants::ILLEGAL_FUNCTION => ErrorCode::IllegalFunction,
            constants::ILLEGAL_DATA_ADDRESS => ErrorCode::IllegalDataAddress,
            constants::ILLEGAL_DATA_VALUE => ErrorCode::IllegalDataValue,
            constants::SERVER_DEVICE_FAILURE => ErrorCode::ServerDeviceFailure,
            constants::ACKNOWLEDGE => ErrorCode::Acknowledge,
            constants::SERVER_DEVICE_BUSY => ErrorCode::ServerDeviceBusy,
            constants::NEGATIVE_ACKNOWLEDGE => ErrorCode::NegativeAcknowledge,
            constants::MEMORY_PARITY_ERROR => ErrorCode::MemoryParityError,
            constants::GATEWAY_PATH_UNAVAILABLE => ErrorCode::GatewayPathUnavailable,
            constants::GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND => {
                ErrorCode::GatewayTargetDeviceFailedToRespond
            }
            constants::TIMEOUT => ErrorCode::Timeout,
            constants::INVALID_SERVER => ErrorCode::InvalidServer,
            constants::FC_MISMATCH => ErrorCode::FcMismatch,
            constants::SERVER_ID_MISMATCH => ErrorCode::ServerIdMismatch,
            constants::PACKET_LENGTH_ERROR => ErrorCode::PacketLengthError,
            constants::REQUEST_QUEUE_FULL => ErrorCode::RequestQueueFull,
            constants::IP_CONNECTION_FAILED => ErrorCode::IpConnectionFailed,
            constants::TCP_HEAD_MISMATCH => ErrorCode::TcpHeadMismatch,
            constants::EMPTY_MESSAGE => ErrorCode::EmptyMessage,
            constants::UNDEFINED_ERROR => ErrorCode::UndefinedError,
            _ => ErrorCode::Unknown(value),
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Success => constants::SUCCESS,
            ErrorCode::IllegalFunction => constants::ILLEGAL_FUNCTION,
            ErrorCode::IllegalDataAddress => constants::ILLEGAL_DATA_ADDRESS,
            ErrorCode::IllegalDataValue => constants::ILLEGAL_DATA_VALUE,
            ErrorCode::ServerDeviceFailure => constants::SERVER_DEVICE_FAILURE,
            ErrorCode::Acknowledge => constants::ACKNOWLEDGE,
            ErrorCode::ServerDeviceBusy => constants::SERVER_DEVICE_BUSY,
            ErrorCode::NegativeAcknowledge => constants::NEGATIVE_ACKNOWLEDGE,
            ErrorCode::MemoryParityError => constants::MEMORY_PARITY_ERROR,
            ErrorCode::GatewayPathUnavailable => constants::GATEWAY_PATH_UNAVAILABLE,
            ErrorCode::GatewayTargetDeviceFailedToRespond => {
                constants::GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND
            }
            ErrorCode::Timeout => constants::TIMEOUT,
            ErrorCode::InvalidServer => constants::INVALID_SERVER,
            ErrorCode::FcMismatch => constants::FC_MISMATCH,
            ErrorCode::ServerIdMismatch => constants::SERVER_ID_MISMATCH,
            ErrorCode::PacketLengthError => constants::PACKET_LENGTH_ERROR,
            ErrorCode::RequestQueueFull => constants::REQUEST_QUEUE_FULL,
            ErrorCode::IpConnectionFailed => constants::IP_CONNECTION_FAILED,
            ErrorCode::TcpHeadMismatch => constants::TCP_HEAD_MISMATCH,
            ErrorCode::EmptyMessage => constants::EMPTY_MESSAGE,
            ErrorCode::UndefinedError => constants::UNDEFINED_ERROR,
            ErrorCode::Unknown(value) => value,
        }
    }
}

impl std::error::Error for ErrorCode {}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ErrorCode::Success => f.write_str("success"),
            ErrorCode::IllegalFunction => f.write_str("function code received in the query is not an allowable action for the server"),
            ErrorCode::IllegalDataAddress => f.write_str("data address received in the query is not an allowable address for the server"),
            ErrorCode::IllegalDataValue => f.write_str("value contained in the request is not an allowable value for server"),
            ErrorCode::ServerDeviceFailure => f.write_str("unrecoverable error occurred while the server was attempting to perform the requested action"),
            ErrorCode::Acknowledge => f.write_str("server has accepted the request and is processing it"),
            ErrorCode::ServerDeviceBusy => f.write_str("server is engaged in processing a long-duration program command, try again later"),
            ErrorCode::NegativeAcknowledge => f.write_str("server cannot perform the program function received in the query"),
            ErrorCode::MemoryParityError => f.write_str("server attempted to read a record file, but detected a parity error in the memory"),
            ErrorCode::GatewayPathUnavailable => f.write_str("gateway was unable to allocate an internal communication path from the input port to the output port for processing the request"),
            ErrorCode::GatewayTargetDeviceFailedToRespond => f.write_str("gateway did not receive a response from the target device"),
            ErrorCode::Timeout => f.write_str("timeout occurred before receiving a response from the server"),
            ErrorCode::InvalidServer => f.write_str("server id is outside of the allowed range"),
            ErrorCode::FcMismatch => f.write_str("function code in the response does not match the request"),
            ErrorCode::ServerIdMismatch => f.write_str("server id in the response does not match the request"),
            ErrorCode::PacketLengthError => f.write_str("response is too short to be valid"),
            ErrorCode::RequestQueueFull => f.write_str("request queue is full"),
            ErrorCode::IpConnectionFailed => f.write_str("unable to connect to the Modbus server"),
            ErrorCode::TcpHeadMismatch => f.write_str("MBAP header of the response does not match the request"),
            ErrorCode::EmptyMessage => f.write_str("message contains no data"),
            ErrorCode::UndefinedError => f.write_str("undefined error"),
            ErrorCode::Unknown(code) => write!(f, "unknown error code: {code:#04X}"),
        }
    }
}

/// Errors returned when awaiting the outcome of a request
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// The request was rejected or completed with an error
    Failed(ErrorCode),
    /// The worker task was dropped before the request completed
    Shutdown,
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Failed(code) => write!(f, "request failed: {code}"),
            RequestError::Shutdown => f.write_str("the task processing requests has shut down"),
        }
    }
}

impl From<ErrorCode> for RequestError {
    fn from(code: ErrorCode) -> Self {
        RequestError::Failed(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_survive_conversion_to_and_from_bytes() {
        for value in 0..=u8::MAX {
            assert_eq!(u8::from(ErrorCode::from(value)), value);
        }
    }

    #[test]
    fn only_timeout_and_connection_failures_are_retried() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::IpConnectionFailed.is_retryable());
        assert!(!ErrorCode::TcpHeadMismatch.is_retryable());
        assert!(!ErrorCode::ServerIdMismatch.is_retryable());
        assert!(!ErrorCode::FcMismatch.is_retryable());
        assert!(!ErrorCode::IllegalFunction.is_retryable());
    }

    #[test]
    fn recognizes_server_exceptions() {
        assert!(ErrorCode::IllegalDataAddress.is_exception());
        assert!(ErrorCode::GatewayTargetDeviceFailedToRespond.is_exception());
        assert!(!ErrorCode::Success.is_exception());
        assert!(!ErrorCode::Timeout.is_exception());
        assert!(!ErrorCode::from(0x09).is_exception());
        assert!(!ErrorCode::Unknown(0x0C).is_exception());
    }
}
