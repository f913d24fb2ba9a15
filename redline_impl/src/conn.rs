mod connect_params;
mod connect_params_builder;
mod connection;
mod counters;
mod into_connect_params;
mod tcp_client;

pub use connect_params::ConnectParams;
pub use connect_params_builder::ConnectParamsBuilder;
pub(crate) use connection::{Connection, SubscribeState};
pub use counters::ConnectionCounters;
pub(crate) use counters::{aggregate_connection_counters, register, deregister};
pub use into_connect_params::IntoConnectParams;
