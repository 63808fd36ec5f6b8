pub mod connection;
pub mod driver;
pub mod loopback;
pub mod protocol;
pub mod transport;
