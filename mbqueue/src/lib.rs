//! A queued [Modbus](http://modbus.org/) TCP client built on [Tokio](https://docs.rs/tokio).
//!
//! # Features
//!
//! * Bounded request queue that never blocks the caller
//! * Single worker per client owning one connection, reused while the target stays the same
//! * Pacing of consecutive requests sent to the same host and port
//! * Validation of every response against the MBAP header, unit id and function code of its request
//! * Bounded retries of timeouts and connection failures
//! * Outcomes delivered through callbacks correlated by a caller supplied token, or awaited directly
//!
//! The payload following the function code is treated as opaque bytes. Building requests
//! for specific function codes is left to the caller.
//!
//! # Example
//!
//! ```no_run
//!use mbqueue::client::ClientTcp;
//!
//!#[tokio::main]
//!async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!    let mut client = ClientTcp::with_target("127.0.0.1", 502, 16);
//!
//!    client.on_data(|server_id, function_code, data, token| {
//!        println!("{token}: server {server_id} fc {function_code} -> {data:02X?}");
//!    });
//!    client.on_error(|err, token| println!("{token}: {err}"));
//!    client.start();
//!
//!    // read two holding registers starting at address 0x0010
//!    client.add_request(0x01, 0x03, vec![0x00, 0x10, 0x00, 0x02], 1)?;
//!
//!    // or wait for the outcome directly
//!    let response = client.request(0x01, 0x03, vec![0x00, 0x10, 0x00, 0x02]).await?;
//!    println!("{:02X?}", response.data());
//!    Ok(())
//!}
//! ```

/// Client handle, targets, requests and responses
pub mod client;
/// Default values and limits
pub mod constants;
/// Logging of frames and raw bytes
pub mod decode;

mod common;
mod error;
mod tcp;

pub use crate::error::{ErrorCode, RequestError};
pub use crate::tcp::frame::{
    check_server_and_function, generate_error_response, MbapHeader, ServerFunctionCheck,
};
