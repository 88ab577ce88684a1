pub mod agent;
pub mod config;
pub mod destination;
pub mod export;
pub mod features;
pub mod feed;
pub mod sink;
