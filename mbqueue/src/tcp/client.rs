use tokio::net::TcpStream;

use crate::client::connection::Connector;
use crate::client::target::Target;
use crate::common::phys::PhysLayer;

/// Opens plain TCP connections
pub(crate) struct TcpConnector;

impl Connector for TcpConnector {
    async fn connect(&mut self, target: &Target) -> Result<PhysLayer, std::io::Error> {
        let socket = TcpStream::connect((target.host.as_str(), target.port)).await?;
        socket.set_nodelay(true)?;
        Ok(PhysLayer::new_tcp(socket))
    }
}
