//! Pet-Tee image generation service
//!
//! This library provides the task lifecycle for the pet-tee system: the API
//! records generation requests as durable tasks and queues their ids on Redis,
//! and the worker generates each image through Replicate, uploads it to R2
//! storage and records the outcome.

pub mod app_state;
pub mod auth;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod worker;
