//! Spam pipeline: a staged, channel-connected batch job that reports which
//! messages of a set of users are spam.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod service;
