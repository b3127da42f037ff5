use std::net::{SocketAddr, TcpListener};

/// Gets a new loopback socket address allocated by the OS.
pub fn get_unused_addr() -> SocketAddr {
    let socket = TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

/// Gets a loopback port nothing is listening on.
///
/// Useful for pointing a client at a node which refuses connections.
pub fn get_closed_port() -> u16 {
    get_unused_addr().port()
}
