// Corta-Mato Registration System - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod escalao;    // Category classifier (birth date → escalão)
pub mod roster;     // Read-only student roster
pub mod db;         // SQLite schema + CSV format
pub mod dorsal;     // Identifier tokens and QR images
pub mod ledger;     // Registration ledger
pub mod arrivals;   // Finish positions and elapsed times
pub mod config;
pub mod desk;       // Facade + admin gate

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use arrivals::{normalize_elapsed, ArrivalOutcome, ParticipantRef, Standing};
pub use config::Config;
pub use db::Registration;
pub use desk::RegistrationDesk;
pub use dorsal::{DorsalEncoder, DorsalStore, SvgQrEncoder, TokenIssuer, TokenMode};
pub use error::{Processo, RegistryError, RegistryResult};
pub use escalao::{parse_birth_date, CategoryRule, CategoryTable, OUT_OF_CATEGORY};
pub use ledger::{Ledger, ListFilter, NewRegistration};
pub use roster::{Participant, Roster};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the tracing subscriber used by both binaries (RUST_LOG, default "info")
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
