pub mod app;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod plaid;
pub mod reconcile;
pub mod retry;
pub mod spending;
pub mod storage;
pub mod webhook;
