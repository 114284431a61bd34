/// Default values applied to a client and its targets
pub mod defaults {
    use std::time::Duration;

    /// How long the worker waits for a response when the target does not specify a timeout
    pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);
    /// Minimum spacing between two requests sent to the same host when the target does not specify one
    pub const TARGET_INTERVAL: Duration = Duration::from_millis(10);
    /// Number of additional attempts made for a request that timed out or could not connect
    pub const RETRIES: u8 = 2;
}

pub(crate) mod limits {
    use std::time::Duration;

    /// size of the receive buffer. A legal Modbus TCP frame never exceeds 260 bytes
    pub(crate) const MAX_RX_BYTES: usize = 300;
    /// once some bytes have arrived, the frame is considered complete when nothing
    /// else arrives within this period
    pub(crate) const QUIET_PERIOD: Duration = Duration::from_millis(1);
    /// pause after a failed connect attempt before it is retried
    pub(crate) const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(10);
}
