pub mod api;
pub mod autoload;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod definitions;
pub mod humanize;
pub mod observability;
pub mod processor;
pub mod registry;
pub mod storage;
