//! Rental Allocation Library
//!
//! Lot-based inventory allocation for rental contracts: FIFO allocation of
//! lot units to contract lines, LIFO release, the contract lifecycle and
//! reversible contract amendments.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod services;

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::events::{Event, EventSender};
use crate::services::factory::{ServiceContainer, ServiceFactory};

/// Everything a host process needs to drive the engine.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: EventSender,
    pub services: ServiceContainer,
}

impl AppState {
    /// Builds the services over an open pool. The returned receiver feeds
    /// [`events::process_events`].
    pub fn new(db: Arc<db::DbPool>, config: config::AppConfig) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let event_sender = EventSender::new(tx);
        let factory = ServiceFactory::from_config(db.clone(), event_sender.clone(), &config);
        let services = ServiceContainer::new(&factory);
        (
            Self {
                db,
                config,
                event_sender,
                services,
            },
            rx,
        )
    }
}
