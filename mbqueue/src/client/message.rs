use std::sync::Arc;

use tokio::sync::oneshot;

use crate::client::target::Target;
use crate::error::{ErrorCode, RequestError};
use crate::tcp::frame::constants::{ERROR_RESPONSE_LENGTH, EXCEPTION_BIT, MODBUS_PROTOCOL_ID};
use crate::tcp::frame::{MbapHeader, TxId};

/// Callback invoked on the worker task when a request completes successfully
///
/// Arguments are the server id, the function code, the function data following them and the
/// token supplied with the request. The callback runs on the worker and delays every
/// request behind it, so it must not block.
pub type DataHandler = Arc<dyn Fn(u8, u8, &[u8], u32) + Send + Sync>;

/// Callback invoked on the worker task when a request fails
///
/// Arguments are the error and the token supplied with the request
pub type ErrorHandler = Arc<dyn Fn(ErrorCode, u32) + Send + Sync>;

/// how the outcome of a request is reported
pub(crate) enum Completion {
    /// through the registered handlers, identified by a caller supplied token
    Token(u32),
    /// through a oneshot channel awaited by the caller
    Promise(oneshot::Sender<Result<Response, RequestError>>),
}

/// A request waiting to be sent to a server
///
/// The transaction id and target are assigned by the client when the request is queued.
pub struct Request {
    tx_id: TxId,
    server_id: u8,
    function_code: u8,
    payload: Vec<u8>,
    target: Target,
    completion: Completion,
}

impl Request {
    /// Create a request whose outcome is reported to the handlers along with `token`
    ///
    /// * `server_id` - unit identifier of the destination server
    /// * `function_code` - Modbus function code
    /// * `payload` - function data following the function code
    /// * `token` - opaque value handed back to the handlers
    pub fn new(server_id: u8, function_code: u8, payload: Vec<u8>, token: u32) -> Self {
        Self::create(server_id, function_code, payload, Completion::Token(token))
    }

    pub(crate) fn with_promise(
        server_id: u8,
        function_code: u8,
        payload: Vec<u8>,
    ) -> (Self, oneshot::Receiver<Result<Response, RequestError>>) {
        let (tx, rx) = oneshot::channel();
        let request = Self::create(server_id, function_code, payload, Completion::Promise(tx));
        (request, rx)
    }

    fn create(server_id: u8, function_code: u8, payload: Vec<u8>, completion: Completion) -> Self {
        Self {
            tx_id: TxId::default(),
            server_id,
            function_code,
            payload,
            target: Target::default(),
            completion,
        }
    }

    /// unit identifier of the destination server
    pub fn server_id(&self) -> u8 {
        self.server_id
    }

    /// Modbus function code
    pub fn function_code(&self) -> u8 {
        self.function_code
    }

    /// function data following the function code
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// transaction id assigned when the request was queued
    pub fn tx_id(&self) -> u16 {
        self.tx_id.to_u16()
    }

    /// protocol id, always 0 for Modbus
    pub fn protocol_id(&self) -> u16 {
        MODBUS_PROTOCOL_ID
    }

    /// target snapshot taken when the request was queued
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// the token supplied by the caller, if the outcome is reported through the handlers
    pub fn token(&self) -> Option<u32> {
        match &self.completion {
            Completion::Token(token) => Some(*token),
            Completion::Promise(_) => None,
        }
    }

    pub(crate) fn assign(&mut self, tx_id: TxId, target: Target) {
        self.tx_id = tx_id;
        self.target = target;
    }

    pub(crate) fn header(&self) -> MbapHeader {
        // unit id + function code + payload, bounded when the frame is formatted
        let length = (self.payload.len() + 2).min(u16::MAX as usize) as u16;
        MbapHeader::new(self.tx_id(), self.protocol_id(), length)
    }

    /// deliver a terminal outcome, consuming the request
    pub(crate) fn complete(
        self,
        response: &Response,
        on_data: Option<&DataHandler>,
        on_error: Option<&ErrorHandler>,
    ) {
        match self.completion {
            Completion::Promise(promise) => {
                let result = match response.error() {
                    ErrorCode::Success => Ok(response.clone()),
                    err => Err(RequestError::Failed(err)),
                };
                // the caller may have stopped waiting
                promise.send(result).ok();
            }
            Completion::Token(token) => match response.error() {
                ErrorCode::Success => {
                    if let Some(handler) = on_data {
                        handler(
                            response.server_id(),
                            response.function_code(),
                            response.data(),
                            token,
                        );
                    }
                }
                err => {
                    if let Some(handler) = on_error {
                        handler(err, token);
                    }
                }
            },
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("tx_id", &self.tx_id)
            .field("server_id", &self.server_id)
            .field("function_code", &self.function_code)
            .field("payload", &self.payload)
            .field("target", &self.target)
            .field("token", &self.token())
            .finish()
    }
}

/// The outcome of one exchange with a server
///
/// A response is produced for every attempt. When validation fails the response mirrors
/// the transaction and protocol ids of the request, carries the function code with the
/// exception bit set and the error code as its only data byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    error: ErrorCode,
    header: MbapHeader,
    // unit id, function code and function data
    pdu: Vec<u8>,
}

impl Response {
    pub(crate) fn from_frame(header: MbapHeader, pdu: Vec<u8>) -> Self {
        let error = match pdu.get(1) {
            Some(fc) if fc & EXCEPTION_BIT != 0 => match pdu.get(2).copied().map(ErrorCode::from) {
                None => ErrorCode::PacketLengthError,
                Some(ErrorCode::Success) => ErrorCode::UndefinedError,
                Some(code) => code,
            },
            _ => ErrorCode::Success,
        };

        Self { error, header, pdu }
    }

    pub(crate) fn from_error(request: &Request, error: ErrorCode) -> Self {
        Self {
            error,
            header: MbapHeader::new(request.tx_id(), request.protocol_id(), ERROR_RESPONSE_LENGTH),
            pdu: vec![
                request.server_id(),
                request.function_code() | EXCEPTION_BIT,
                error.into(),
            ],
        }
    }

    /// `ErrorCode::Success` for a valid response, the reason for the failure otherwise
    pub fn error(&self) -> ErrorCode {
        self.error
    }

    /// MBAP header of the response
    pub fn header(&self) -> MbapHeader {
        self.header
    }

    /// unit identifier of the server that answered
    pub fn server_id(&self) -> u8 {
        self.pdu.first().copied().unwrap_or_default()
    }

    /// function code of the response, including the exception bit
    pub fn function_code(&self) -> u8 {
        self.pdu.get(1).copied().unwrap_or_default()
    }

    /// the bytes following the function code
    pub fn data(&self) -> &[u8] {
        self.pdu.get(2..).unwrap_or_default()
    }

    /// the complete frame, header included
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MbapHeader::LENGTH + self.pdu.len());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.pdu);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn error_response_mirrors_request() {
        let mut request = Request::new(0x11, 0x04, vec![0x00, 0x01], 42);
        request.assign(TxId::new(0x0A0B), Target::new("localhost", 502));

        let response = Response::from_error(&request, ErrorCode::FcMismatch);
        assert_eq!(
            response.to_bytes(),
            vec![0x0A, 0x0B, 0x00, 0x00, 0x00, 0x03, 0x11, 0x84, 0xE3]
        );
    }

    #[test]
    fn exception_without_code_is_a_length_error() {
        let response = Response::from_frame(MbapHeader::new(1, 0, 2), vec![0x01, 0x83]);
        assert_eq!(response.error(), ErrorCode::PacketLengthError);
        assert!(response.data().is_empty());
    }

    #[test]
    fn success_invokes_only_the_data_handler() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let data_calls = calls.clone();
        let on_data: DataHandler = Arc::new(move |id, fc, data, token| {
            data_calls.lock().unwrap().push((id, fc, data.to_vec(), token));
        });
        let on_error: ErrorHandler = Arc::new(|_, _| panic!("unexpected error callback"));

        let request = Request::new(0x01, 0x03, vec![], 99);
        let response = Response::from_frame(MbapHeader::new(0, 0, 4), vec![0x01, 0x03, 0x01, 0xFF]);
        request.complete(&response, Some(&on_data), Some(&on_error));

        assert_eq!(*calls.lock().unwrap(), vec![(0x01, 0x03, vec![0x01, 0xFF], 99)]);
    }

    #[test]
    fn outcome_is_dropped_without_handlers() {
        let request = Request::new(0x01, 0x03, vec![], 99);
        let response = Response::from_error(&request, ErrorCode::Timeout);
        request.complete(&response, None, None);
    }

    #[test]
    fn promise_receives_the_error() {
        let (request, mut rx) = Request::with_promise(0x01, 0x03, vec![]);
        assert_eq!(request.token(), None);
        let response = Response::from_error(&request, ErrorCode::Timeout);
        request.complete(&response, None, None);
        assert_eq!(
            rx.try_recv().unwrap(),
            Err(RequestError::Failed(ErrorCode::Timeout))
        );
    }
}
