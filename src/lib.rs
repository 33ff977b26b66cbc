pub mod atlas;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod gateway_util;
pub mod live;
pub mod metrics;
pub mod observability;
pub mod rate_limit;
pub mod routes;
