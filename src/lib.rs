//! # filtersync
//!
//! Keeps a set of ad-block filter subscriptions downloaded, merged and fresh.
//!
//! ## Architecture
//!
//! ```text
//! Settings → Diff → Downloader → Merger → Store → FilterListProvider
//!                 ↑
//!           SyncScheduler (one-shot + periodic slots)
//! ```
//!
//! - [`settings`]: user-edited desired state, observed through a watch channel
//! - [`sync`]: diffing, scheduling and running sync passes
//! - [`fetcher`]: HTTP downloads with conditional requests
//! - [`filters`]: merging downloaded lists into one deduplicated file
//! - [`store`]: SQLite persistence of the sync bookkeeping
//!
//! ## Quick Start
//!
//! ```bash
//! # Download the default lists and build the filter file
//! filtersync sync
//!
//! # Add a list and print the consolidated file path
//! filtersync subscribe https://easylist-downloads.adblockplus.org/abp-filters-anti-cv.txt
//! filtersync path
//!
//! # Keep everything current in the background
//! filtersync daemon start
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// store, settings, scheduler, user counter.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/filtersync/config.toml`.
pub mod config;

/// Foreground daemon running the scheduler and the counting ping.
///
/// - `filtersync daemon start` - Run scheduled updates until interrupted
/// - `filtersync daemon stop` - Stop the daemon
/// - `filtersync daemon status` - Check if daemon is running
pub mod daemon;

/// Core domain models.
///
/// - [`Subscription`](domain::Subscription): a filter list the user opted into
/// - [`DownloadedSubscription`](domain::DownloadedSubscription): its cached download
/// - [`CoreData`](domain::CoreData): persisted sync bookkeeping
pub mod domain;

/// Filter list downloads.
///
/// - [`Downloader`](fetcher::Downloader): async trait for list downloads
/// - [`HttpDownloader`](fetcher::HttpDownloader): conditional GET with retries
pub mod fetcher;

/// Consolidation of downloaded lists into one filter file.
pub mod filters;

/// Capabilities injected into the engine: clock, connectivity, analytics.
pub mod ports;

/// Read access to the current consolidated filter file.
pub mod provider;

pub mod settings;

/// SQLite persistence layer.
///
/// - [`CoreStore`](store::CoreStore): trait for the persisted record
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;

pub mod sync;

/// Daily user-counting ping and its schedule.
pub mod telemetry;
