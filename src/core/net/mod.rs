pub mod addr;
pub mod fd;
pub mod socket;

pub use addr::SockAddr;
pub use fd::FileDescriptor;
pub use socket::{setup_socket, Socket, SocketOptions};
