use std::sync::Arc;

use tracing::Instrument;

use crate::client::connection::{Connection, Connector};
use crate::client::message::{Request, Response};
use crate::client::Shared;
use crate::constants::{defaults, limits};
use crate::error::ErrorCode;
use crate::tcp::frame::{validate_response, FrameWriter};

/// The worker that drains the queue of a client, one request at a time
///
/// Every request goes through the same states until it reaches a terminal outcome:
/// synchronize with the target (disconnect or pace), ensure a connection, send, wait
/// for the response and validate it. Timeouts and connection failures are retried
/// up to [`defaults::RETRIES`] times, every other error is terminal on first occurrence.
pub(crate) struct ClientTask<C: Connector> {
    shared: Arc<Shared>,
    connection: Connection<C>,
    writer: FrameWriter,
    rx_buffer: [u8; limits::MAX_RX_BYTES],
}

impl<C: Connector> ClientTask<C> {
    pub(crate) fn new(shared: Arc<Shared>, connector: C) -> Self {
        Self {
            shared,
            connection: Connection::new(connector),
            writer: FrameWriter::new(),
            rx_buffer: [0; limits::MAX_RX_BYTES],
        }
    }

    pub(crate) async fn run(&mut self) {
        loop {
            let request = self.shared.queue.next().await;
            let tx_id = request.tx_id();
            self.process(request)
                .instrument(tracing::info_span!("Transaction", tx_id = tx_id))
                .await;
            self.shared.queue.finish();
        }
    }

    async fn process(&mut self, request: Request) {
        let mut retries = defaults::RETRIES;
        let response = loop {
            let response = self.execute(&request).await;
            self.connection.mark_complete();

            let error = response.error();
            if !error.is_retryable() || retries == 0 {
                break response;
            }

            retries -= 1;
            tracing::warn!("{}, retrying ({} retries left)", error, retries);
            if error == ErrorCode::IpConnectionFailed {
                self.connection.disconnect();
                tokio::time::sleep(limits::CONNECT_RETRY_DELAY).await;
            }
        };

        self.connection.mark_used(request.target());
        self.shared.set_last_used(request.target());

        match response.error() {
            ErrorCode::Success => tracing::debug!("request complete"),
            err => tracing::warn!("request failed: {}", err),
        }

        let (on_data, on_error) = self.shared.handlers();
        request.complete(&response, on_data.as_ref(), on_error.as_ref());
    }

    /// a single attempt at completing the request
    async fn execute(&mut self, request: &Request) -> Response {
        let decode = self.shared.decode_level();
        let target = request.target();

        self.connection.sync_target(target).await;
        if !self.connection.ensure_connected(target).await {
            return Response::from_error(request, ErrorCode::IpConnectionFailed);
        }

        self.connection.mark_used(target);

        let frame = match self.writer.format_request(request, decode.adu) {
            Ok(frame) => frame,
            Err(err) => return Response::from_error(request, err),
        };

        if self.connection.send(frame, decode.physical).await.is_err() {
            return Response::from_error(request, ErrorCode::IpConnectionFailed);
        }

        let count = self
            .connection
            .receive(&mut self.rx_buffer, target.timeout, decode.physical)
            .await;

        validate_response(request, &self.rx_buffer[..count], decode.adu)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sfio_tokio_mock_io::{Event, Handle};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::Instant;

    use super::*;
    use crate::client::connection::test_util::*;
    use crate::client::{ClientTcp, Target};

    #[derive(Debug, PartialEq)]
    enum Outcome {
        Data(u8, u8, Vec<u8>, u32),
        Error(ErrorCode, u32),
    }

    struct Fixture {
        client: ClientTcp,
        connector: ConnectorHandle,
        outcomes: UnboundedReceiver<Outcome>,
    }

    impl Fixture {
        fn new(target: Target) -> Self {
            let mut client = ClientTcp::new(8);
            client.set_target(
                target.host,
                target.port,
                Some(target.timeout),
                Some(target.interval),
            );
            let (tx, outcomes) = tokio::sync::mpsc::unbounded_channel();
            let data_tx = tx.clone();
            client.on_data(move |id, fc, data, token| {
                data_tx
                    .send(Outcome::Data(id, fc, data.to_vec(), token))
                    .unwrap();
            });
            client.on_error(move |err, token| {
                tx.send(Outcome::Error(err, token)).unwrap();
            });
            let (connector, handle) = mock_connector();
            client.spawn(connector, None);
            Self {
                client,
                connector: handle,
                outcomes,
            }
        }

        fn send(&self, server_id: u8, function_code: u8, payload: &[u8], token: u32) {
            self.client
                .enqueue(Request::new(server_id, function_code, payload.to_vec(), token))
                .unwrap();
        }

        async fn outcome(&mut self) -> Outcome {
            self.outcomes.recv().await.unwrap()
        }
    }

    /// the next bytes written by the worker, skipping any other I/O event
    async fn next_write(io: &mut Handle) -> Vec<u8> {
        loop {
            if let Event::Write(bytes) = io.next_event().await {
                return bytes;
            }
        }
    }

    fn with_tx_id(frame: &[u8], tx_id: u16) -> Vec<u8> {
        let mut frame = frame.to_vec();
        frame[0..2].copy_from_slice(&tx_id.to_be_bytes());
        frame
    }

    fn target() -> Target {
        Target::new("10.0.0.1", 502)
            .with_timeout(Duration::from_millis(1000))
            .with_interval(Duration::from_millis(100))
    }

    //                      |  tx id    | proto id  |  length   | unit | fc  | start addr | count   |
    const READ_REQUEST: &[u8] = &[0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x10, 0x00, 0x02];
    const READ_PAYLOAD: &[u8] = &[0x00, 0x10, 0x00, 0x02];
    //                       |  tx id    | proto id  |  length   | unit | fc  | bytes |   values              |
    const READ_RESPONSE: &[u8] = &[0x00, 0x00, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0xCA, 0xFE, 0x00, 0x2A];

    #[tokio::test(start_paused = true)]
    async fn delivers_valid_response_to_data_handler() {
        let mut fixture = Fixture::new(target());
        fixture.connector.accept();
        fixture.send(0x01, 0x03, READ_PAYLOAD, 17);

        let mut io = fixture.connector.next_connection().await;
        assert_eq!(next_write(&mut io).await, READ_REQUEST.to_vec());
        io.read(READ_RESPONSE);

        assert_eq!(
            fixture.outcome().await,
            Outcome::Data(0x01, 0x03, READ_RESPONSE[8..].to_vec(), 17)
        );
        assert_eq!(fixture.client.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_retried_then_reported_once() {
        let mut fixture = Fixture::new(target());
        fixture.connector.accept();
        fixture.send(0x01, 0x03, READ_PAYLOAD, 5);

        let mut io = fixture.connector.next_connection().await;
        assert_eq!(
            fixture.outcome().await,
            Outcome::Error(ErrorCode::Timeout, 5)
        );

        // every attempt retransmits the same frame
        for _ in 0..=defaults::RETRIES {
            assert_eq!(next_write(&mut io).await, READ_REQUEST.to_vec());
        }
        assert!(fixture.outcomes.try_recv().is_err());
        assert_eq!(fixture.client.pending_requests(), 0);
        assert_eq!(fixture.connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failure_is_retried_then_reported_once() {
        let mut fixture = Fixture::new(target());
        fixture.send(0x01, 0x03, READ_PAYLOAD, 9);

        assert_eq!(
            fixture.outcome().await,
            Outcome::Error(ErrorCode::IpConnectionFailed, 9)
        );
        assert_eq!(
            fixture.connector.attempts().len(),
            usize::from(defaults::RETRIES) + 1
        );
        assert!(fixture.outcomes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_a_later_connect_succeeds() {
        let mut fixture = Fixture::new(target());
        fixture.connector.refuse();
        fixture.connector.accept();
        fixture.send(0x01, 0x03, READ_PAYLOAD, 3);

        let mut io = fixture.connector.next_connection().await;
        assert_eq!(next_write(&mut io).await, READ_REQUEST.to_vec());
        io.read(READ_RESPONSE);

        assert_eq!(
            fixture.outcome().await,
            Outcome::Data(0x01, 0x03, READ_RESPONSE[8..].to_vec(), 3)
        );
        assert_eq!(fixture.connector.attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn server_id_mismatch_is_reported_without_retry() {
        let mut fixture = Fixture::new(target());
        fixture.connector.accept();
        fixture.send(0x01, 0x03, READ_PAYLOAD, 4);

        let mut io = fixture.connector.next_connection().await;
        assert_eq!(next_write(&mut io).await, READ_REQUEST.to_vec());
        let mut response = READ_RESPONSE.to_vec();
        response[6] = 0x02;
        io.read(&response);

        assert_eq!(
            fixture.outcome().await,
            Outcome::Error(ErrorCode::ServerIdMismatch, 4)
        );

        // the next frame on the wire belongs to the next request
        fixture.send(0x01, 0x03, READ_PAYLOAD, 5);
        assert_eq!(next_write(&mut io).await, with_tx_id(READ_REQUEST, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn header_mismatch_is_reported_without_retry() {
        let mut fixture = Fixture::new(target());
        fixture.connector.accept();
        fixture.send(0x01, 0x03, READ_PAYLOAD, 4);

        let mut io = fixture.connector.next_connection().await;
        assert_eq!(next_write(&mut io).await, READ_REQUEST.to_vec());
        io.read(&with_tx_id(READ_RESPONSE, 1));

        assert_eq!(
            fixture.outcome().await,
            Outcome::Error(ErrorCode::TcpHeadMismatch, 4)
        );

        fixture.send(0x01, 0x03, READ_PAYLOAD, 5);
        assert_eq!(next_write(&mut io).await, with_tx_id(READ_REQUEST, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn exception_response_is_reported_as_error() {
        let mut fixture = Fixture::new(target());
        fixture.connector.accept();
        fixture.send(0x01, 0x03, READ_PAYLOAD, 8);

        let mut io = fixture.connector.next_connection().await;
        assert_eq!(next_write(&mut io).await, READ_REQUEST.to_vec());
        io.read(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02]);

        assert_eq!(
            fixture.outcome().await,
            Outcome::Error(ErrorCode::IllegalDataAddress, 8)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn switching_target_reconnects_once_without_pacing() {
        let mut fixture = Fixture::new(target());
        fixture.connector.accept();
        fixture.connector.accept();
        fixture.send(0x01, 0x03, READ_PAYLOAD, 1);

        let mut first = fixture.connector.next_connection().await;
        assert_eq!(next_write(&mut first).await, READ_REQUEST.to_vec());
        first.read(READ_RESPONSE);
        assert!(matches!(fixture.outcome().await, Outcome::Data(_, _, _, 1)));

        assert!(fixture.client.set_target("10.0.0.2", 502, None, None));
        let start = Instant::now();
        fixture.send(0x01, 0x03, READ_PAYLOAD, 2);

        let mut second = fixture.connector.next_connection().await;
        assert_eq!(next_write(&mut second).await, with_tx_id(READ_REQUEST, 1));
        assert_eq!(Instant::now(), start);

        second.read(&with_tx_id(READ_RESPONSE, 1));
        assert!(matches!(fixture.outcome().await, Outcome::Data(_, _, _, 2)));

        let hosts: Vec<String> = fixture
            .connector
            .attempts()
            .into_iter()
            .map(|target| target.host)
            .collect();
        assert_eq!(hosts, vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
        assert!(!fixture.client.set_target("10.0.0.2", 502, None, None));
    }

    #[tokio::test(start_paused = true)]
    async fn target_counts_as_used_only_once_the_exchange_completes() {
        let mut fixture = Fixture::new(target());
        fixture.connector.accept();
        fixture.send(0x01, 0x03, READ_PAYLOAD, 1);

        let mut io = fixture.connector.next_connection().await;
        assert_eq!(next_write(&mut io).await, READ_REQUEST.to_vec());

        // connected and sent, but no response yet
        assert!(fixture.client.set_target("10.0.0.1", 502, None, None));

        io.read(READ_RESPONSE);
        assert!(matches!(fixture.outcome().await, Outcome::Data(_, _, _, 1)));
        assert!(!fixture.client.set_target("10.0.0.1", 502, None, None));
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_requests_to_same_target_are_paced() {
        let mut fixture = Fixture::new(target());
        fixture.connector.accept();
        fixture.send(0x01, 0x03, READ_PAYLOAD, 1);
        fixture.send(0x01, 0x03, READ_PAYLOAD, 2);

        let mut io = fixture.connector.next_connection().await;
        assert_eq!(next_write(&mut io).await, READ_REQUEST.to_vec());
        let first_sent = Instant::now();
        io.read(READ_RESPONSE);
        assert!(matches!(fixture.outcome().await, Outcome::Data(_, _, _, 1)));

        assert_eq!(next_write(&mut io).await, with_tx_id(READ_REQUEST, 1));
        assert!(Instant::now() - first_sent >= Duration::from_millis(100));
        assert_eq!(fixture.connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn awaited_request_resolves_with_response() {
        let fixture = Fixture::new(target());
        fixture.connector.accept();
        let client = &fixture.client;
        let mut connector = fixture.connector;

        let request = client.request(0x01, 0x03, READ_PAYLOAD.to_vec());
        let server = async {
            let mut io = connector.next_connection().await;
            assert_eq!(next_write(&mut io).await, READ_REQUEST.to_vec());
            io.read(READ_RESPONSE);
            io
        };

        let (response, _io) = tokio::join!(request, server);
        let response = response.unwrap();
        assert_eq!(response.server_id(), 0x01);
        assert_eq!(response.function_code(), 0x03);
        assert_eq!(response.data(), &READ_RESPONSE[8..]);
    }
}
