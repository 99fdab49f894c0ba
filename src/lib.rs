//! aloft - live aircraft tracking from ground-station position reports.
//!
//! Ingests OGN/APRS and ADS-B position reports from a durable queue,
//! deduplicates redeliveries, derives flight lifecycle events per aircraft,
//! and fans live updates out to map viewers by geographic area.

pub mod actions;
pub mod adsb;
pub mod aircraft;
pub mod airports;
pub mod clustering;
pub mod commands;
pub mod config;
pub mod fix_processor;
pub mod fixes;
pub mod fixes_repo;
pub mod flight_tracker;
pub mod flights;
pub mod flights_repo;
pub mod geo_cells;
pub mod geometry;
pub mod jetstream_consumer;
pub mod live_feed;
pub mod message_sources;
pub mod ogn;
pub mod subscriptions;
pub mod telemetry;
pub mod web;

pub use fix_processor::FixProcessor;
pub use fixes::{Fix, RawReport, ReportFormat};
pub use flight_tracker::FlightTracker;
pub use flights::{Flight, FlightState};
pub use subscriptions::SubscriptionRouter;
