//! Command-line Modbus TCP client sending raw requests through the mbqueue crate

use std::fmt::Formatter;
use std::num::ParseIntError;
use std::time::Duration;

use clap::Parser;

use mbqueue::client::ClientTcp;
use mbqueue::decode::{AduDecodeLevel, DecodeLevel, PhysDecodeLevel};
use mbqueue::{ErrorCode, RequestError};

#[derive(Debug)]
enum Error {
    BadInt(ParseIntError),
    BadHex(String),
    Rejected(ErrorCode),
    Request(RequestError),
}

/// bytes parsed from a hex string
#[derive(Clone, Debug)]
struct HexData(Vec<u8>);

#[derive(Parser)]
#[command(name = "mbqueue-client")]
#[command(about = "A command line program for sending raw Modbus TCP requests using the mbqueue crate")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1", help = "Host name or IP address of the server")]
    host: String,

    #[arg(long, default_value = "502", help = "TCP port of the server")]
    port: u16,

    #[arg(short = 'i', long, default_value = "1", help = "The unit id of the Modbus server")]
    id: u8,

    #[arg(short = 'f', long, value_parser = parse_u8, help = "The function code, decimal or 0x prefixed hex")]
    function: u8,

    #[arg(short = 'd', long, default_value = "", value_parser = parse_hex, help = "The data following the function code as hex (e.g. 0010 0002)")]
    data: HexData,

    #[arg(short = 't', long, default_value = "2000", help = "Response timeout in milliseconds")]
    timeout: u64,

    #[arg(long, default_value = "10", help = "Minimum interval between requests in milliseconds")]
    interval: u64,

    #[arg(short = 'p', long, help = "Optional polling period in milliseconds")]
    period: Option<u64>,

    #[arg(long, help = "Log MBAP headers and the raw bytes of every frame")]
    decode: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    if let Err(ref e) = run().await {
        println!("error: {e}");
    }

    Ok(())
}

async fn run() -> Result<(), Error> {
    let cli = Cli::parse();

    let mut client = ClientTcp::new(16);
    client.set_target(
        cli.host.as_str(),
        cli.port,
        Some(Duration::from_millis(cli.timeout)),
        Some(Duration::from_millis(cli.interval)),
    );
    if cli.decode {
        client.set_decode_level(DecodeLevel::new(
            AduDecodeLevel::Payload,
            PhysDecodeLevel::Data,
        ));
    }

    match cli.period {
        None => {
            client.start();
            let response = client.request(cli.id, cli.function, cli.data.0).await?;
            print_response(response.server_id(), response.function_code(), response.data());
            Ok(())
        }
        Some(period_ms) => {
            client.on_data(|server_id, function_code, data, token| {
                print!("{token}: ");
                print_response(server_id, function_code, data);
            });
            client.on_error(|err, token| println!("{token}: {err}"));
            client.start();

            let period = Duration::from_millis(period_ms);
            let mut token: u32 = 0;
            loop {
                match client.add_request(cli.id, cli.function, cli.data.0.clone(), token) {
                    Ok(()) => {}
                    Err(ErrorCode::RequestQueueFull) => {
                        tracing::warn!("server is not keeping up, skipped request {}", token)
                    }
                    Err(err) => return Err(Error::Rejected(err)),
                }
                token = token.wrapping_add(1);
                tokio::time::sleep(period).await
            }
        }
    }
}

fn print_response(server_id: u8, function_code: u8, data: &[u8]) {
    println!("server: {server_id} function: {function_code:#04X} data: {data:02X?}");
}

fn parse_u8(value: &str) -> Result<u8, Error> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16)?,
        None => value.parse()?,
    };
    Ok(parsed)
}

fn parse_hex(value: &str) -> Result<HexData, Error> {
    let digits: Vec<char> = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();

    if digits.len() % 2 != 0 {
        return Err(Error::BadHex(value.to_string()));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let text: String = pair.iter().collect();
            u8::from_str_radix(&text, 16).map_err(|_| Error::BadHex(value.to_string()))
        })
        .collect::<Result<Vec<u8>, Error>>()
        .map(HexData)
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        match self {
            Error::BadInt(err) => err.fmt(f),
            Error::BadHex(value) => write!(f, "bad hex string: {value}"),
            Error::Rejected(err) => write!(f, "request rejected: {err}"),
            Error::Request(err) => err.fmt(f),
        }
    }
}

impl From<ParseIntError> for Error {
    fn from(err: ParseIntError) -> Self {
        Error::BadInt(err)
    }
}

impl From<RequestError> for Error {
    fn from(err: RequestError) -> Self {
        Error::Request(err)
    }
}
