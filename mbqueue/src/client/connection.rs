use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::client::target::Target;
use crate::common::phys::PhysLayer;
use crate::constants::limits;
use crate::decode::PhysDecodeLevel;

/// Opens the physical stream to a target
pub(crate) trait Connector: Send + 'static {
    fn connect(
        &mut self,
        target: &Target,
    ) -> impl Future<Output = Result<PhysLayer, std::io::Error>> + Send;
}

/// Owns the single stream of a client and enforces the pacing between requests
///
/// Only the worker task touches this type, so none of its state is synchronized.
pub(crate) struct Connection<C: Connector> {
    connector: C,
    phys: Option<PhysLayer>,
    last_target: Option<Target>,
    last_request: Option<Instant>,
}

impl<C: Connector> Connection<C> {
    pub(crate) fn new(connector: C) -> Self {
        Self {
            connector,
            phys: None,
            last_target: None,
            last_request: None,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.phys.is_some()
    }

    /// prepare for a request to `target`
    ///
    /// A request for a different host and port closes the current stream without waiting.
    /// A request for the same host and port waits until the interval of the target has
    /// elapsed since the previous request completed.
    pub(crate) async fn sync_target(&mut self, target: &Target) {
        let same = self
            .last_target
            .as_ref()
            .map(|last| last.same_endpoint(target))
            .unwrap_or(false);

        if same {
            if let Some(last) = self.last_request {
                let ready = last + target.interval;
                if ready > Instant::now() {
                    tracing::debug!("pacing request to {} for {:?}", target, ready - Instant::now());
                    tokio::time::sleep_until(ready).await;
                }
            }
        } else if self.is_connected() {
            tracing::info!("switching target to {}", target);
            self.disconnect();
        }
    }

    /// open a stream to `target` unless one is already open
    pub(crate) async fn ensure_connected(&mut self, target: &Target) -> bool {
        if self.is_connected() {
            return true;
        }

        match tokio::time::timeout(target.timeout, self.connector.connect(target)).await {
            Ok(Ok(phys)) => {
                tracing::info!("connected to {}", target);
                self.phys = Some(phys);
                true
            }
            Ok(Err(err)) => {
                tracing::warn!("error connecting to {}: {}", target, err);
                false
            }
            Err(_) => {
                tracing::warn!("timeout connecting to {}", target);
                false
            }
        }
    }

    pub(crate) fn disconnect(&mut self) {
        if self.phys.take().is_some() {
            tracing::info!("disconnected");
        }
    }

    /// record that an exchange with `target` took place
    pub(crate) fn mark_used(&mut self, target: &Target) {
        self.last_target = Some(target.clone());
    }

    /// record the completion time of an attempt, the reference point for pacing
    pub(crate) fn mark_complete(&mut self) {
        self.last_request = Some(Instant::now());
    }

    /// write the frame, closing the stream if the write fails
    pub(crate) async fn send(
        &mut self,
        frame: &[u8],
        level: PhysDecodeLevel,
    ) -> Result<(), std::io::Error> {
        let phys = match self.phys.as_mut() {
            Some(phys) => phys,
            None => return Err(std::io::ErrorKind::NotConnected.into()),
        };

        if let Err(err) = phys.write(frame, level).await {
            tracing::warn!("write error: {}", err);
            self.disconnect();
            return Err(err);
        }

        Ok(())
    }

    /// collect the bytes of a response into `buffer`
    ///
    /// Waits up to `timeout` for the first bytes. Once something has arrived, reading
    /// continues until the stream goes quiet or the buffer is full. Returns the number of
    /// bytes received, 0 if nothing arrived. A closed stream or read error drops the connection.
    pub(crate) async fn receive(
        &mut self,
        buffer: &mut [u8],
        timeout: Duration,
        level: PhysDecodeLevel,
    ) -> usize {
        let phys = match self.phys.as_mut() {
            Some(phys) => phys,
            None => return 0,
        };

        let deadline = Instant::now() + timeout;
        let mut count = match tokio::time::timeout_at(deadline, phys.read(buffer, level)).await {
            Err(_) => {
                tracing::warn!("no response within {:?}", timeout);
                return 0;
            }
            Ok(Ok(0)) => {
                tracing::warn!("connection closed by the server");
                self.disconnect();
                return 0;
            }
            Ok(Ok(count)) => count,
            Ok(Err(err)) => {
                tracing::warn!("read error: {}", err);
                self.disconnect();
                return 0;
            }
        };

        while count < buffer.len() {
            let rest = &mut buffer[count..];
            match tokio::time::timeout(limits::QUIET_PERIOD, phys.read(rest, level)).await {
                // quiet
                Err(_) => break,
                Ok(Ok(0)) => {
                    self.disconnect();
                    break;
                }
                Ok(Ok(more)) => count += more,
                Ok(Err(err)) => {
                    tracing::warn!("read error: {}", err);
                    self.disconnect();
                    break;
                }
            }
        }

        count
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use sfio_tokio_mock_io::{mock, Handle};

    use super::*;

    /// Connector whose connect attempts succeed or fail in a scripted order
    ///
    /// Once the script is exhausted every attempt fails.
    pub(crate) struct MockConnector {
        script: Arc<Mutex<VecDeque<bool>>>,
        attempts: Arc<Mutex<Vec<Target>>>,
        handles: tokio::sync::mpsc::UnboundedSender<Handle>,
    }

    /// The test side of a [`MockConnector`]
    pub(crate) struct ConnectorHandle {
        script: Arc<Mutex<VecDeque<bool>>>,
        attempts: Arc<Mutex<Vec<Target>>>,
        handles: tokio::sync::mpsc::UnboundedReceiver<Handle>,
    }

    pub(crate) fn mock_connector() -> (MockConnector, ConnectorHandle) {
        let script = Arc::new(Mutex::new(VecDeque::new()));
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            MockConnector {
                script: script.clone(),
                attempts: attempts.clone(),
                handles: tx,
            },
            ConnectorHandle {
                script,
                attempts,
                handles: rx,
            },
        )
    }

    impl ConnectorHandle {
        pub(crate) fn accept(&self) {
            self.script.lock().unwrap().push_back(true);
        }

        pub(crate) fn refuse(&self) {
            self.script.lock().unwrap().push_back(false);
        }

        /// the I/O handle of the next successful connection
        pub(crate) async fn next_connection(&mut self) -> Handle {
            self.handles.recv().await.unwrap()
        }

        pub(crate) fn attempts(&self) -> Vec<Target> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl Connector for MockConnector {
        async fn connect(&mut self, target: &Target) -> Result<PhysLayer, std::io::Error> {
            self.attempts.lock().unwrap().push(target.clone());
            let accept = self.script.lock().unwrap().pop_front().unwrap_or(false);
            if !accept {
                return Err(std::io::ErrorKind::ConnectionRefused.into());
            }

            let (io, handle) = mock();
            self.handles.send(handle).ok();
            Ok(PhysLayer::new_mock(io))
        }
    }
}
