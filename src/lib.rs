//! Proxy Harvest - proxy scraper, checker and geolocation
//!
//! Collects candidate proxies from public lists, drops addresses that cannot
//! be usable proxies, verifies which candidates actually relay traffic and
//! tags them with their location.

pub mod cli;
pub mod error;
pub mod proxy;
pub mod tui;

pub use error::{Error, Result};
pub use proxy::*;
