pub mod app;
pub mod clock;
pub mod config;
pub mod domain;
pub mod engine;
pub mod fraud;
pub mod links;
pub mod repository;
pub mod routes;
pub mod stats;
pub mod utils;
