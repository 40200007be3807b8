pub mod bridge;
pub mod btle;
pub mod connector;
pub mod constants;
pub mod decoder;
pub mod manual;
pub mod replay;
pub mod transport;
pub mod types;
pub mod workflow;
