// Value types shared across the crate and the events observers receive
pub mod types {
    pub mod call;
    pub mod events;
}

pub mod calls;
pub mod client;
pub mod config;
pub mod envelope;
pub mod media;
pub mod reconnect;
pub mod transport;

pub use client::{ClientError, SignalingClient, SignalingClientBuilder};
pub use config::ClientConfig;
pub use reconnect::ReconnectPolicy;
