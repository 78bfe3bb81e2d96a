pub mod api;
pub mod billing;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod observability;
pub mod services;
pub mod store;
