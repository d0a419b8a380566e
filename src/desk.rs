// 🗂️ Registration Desk - roster + ledger behind the admin gate
// Adapters (CLI, HTTP) call this; `admin` arrives pre-checked

use crate::arrivals::{ArrivalOutcome, ParticipantRef, Standing};
use crate::config::Config;
use crate::db::Registration;
use crate::dorsal::{DorsalStore, TokenIssuer};
use crate::error::{Processo, RegistryError, RegistryResult};
use crate::escalao::CategoryTable;
use crate::ledger::{Ledger, ListFilter, NewRegistration};
use crate::roster::{Participant, Roster};
use anyhow::{Context, Result};
use std::io::{Read, Write};
use tracing::{info, warn};

fn require_admin(admin: bool, operation: &'static str) -> RegistryResult<()> {
    if admin {
        Ok(())
    } else {
        warn!(operation, "admin operation refused");
        Err(RegistryError::Forbidden(operation))
    }
}

pub struct RegistrationDesk {
    roster: Roster,
    ledger: Ledger,
}

impl RegistrationDesk {
    pub fn new(roster: Roster, ledger: Ledger) -> Self {
        RegistrationDesk { roster, ledger }
    }

    /// Open everything described by `config`; a missing roster file yields an empty roster
    pub fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data dir {:?}", config.data_dir))?;

        let table = match &config.category_table {
            Some(path) => CategoryTable::from_file(path)?,
            None => CategoryTable::with_defaults(),
        };

        let roster = if config.roster_path.exists() {
            Roster::load_csv(&config.roster_path).context("Failed to load roster")?
        } else {
            warn!(path = ?config.roster_path, "roster not found, only manual registration available");
            Roster::new()
        };

        let dorsais = DorsalStore::with_svg(&config.dorsal_dir)
            .context("Failed to prepare dorsal directory")?;
        let ledger = Ledger::open(
            &config.db_path,
            table,
            TokenIssuer::new(config.token_mode.clone()),
            dorsais,
        )
        .context("Failed to open ledger")?;

        info!(roster = roster.len(), "registration desk ready");
        Ok(RegistrationDesk::new(roster, ledger))
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // ========================================================================
    // GENERAL OPERATIONS
    // ========================================================================

    pub fn lookup(&self, processo: Processo) -> RegistryResult<&Participant> {
        self.roster
            .lookup(processo)
            .ok_or_else(|| RegistryError::not_found(processo))
    }

    pub fn search(&self, query: &str) -> Vec<&Participant> {
        self.roster.search(query)
    }

    /// Register a student found in the roster
    pub fn register(&self, processo: Processo) -> RegistryResult<Registration> {
        let participant = self.lookup(processo)?;
        self.ledger.register_participant(participant)
    }

    /// Register someone typed in by hand (not in the roster)
    pub fn register_manual(&self, new: NewRegistration) -> RegistryResult<Registration> {
        self.ledger.register(new)
    }

    pub fn get(&self, processo: Processo) -> RegistryResult<Registration> {
        self.ledger.get(processo)
    }

    pub fn list(&self, filter: &ListFilter) -> RegistryResult<Vec<Registration>> {
        self.ledger.list(filter)
    }

    pub fn categories(&self) -> RegistryResult<Vec<String>> {
        self.ledger.categories()
    }

    /// Arrival events come from the finish line scanner, not from an admin
    pub fn record_arrival(&self, processo: Processo) -> RegistryResult<ArrivalOutcome> {
        self.ledger.record_arrival(processo)
    }

    pub fn dorsal_image(&self, processo: Processo) -> RegistryResult<Vec<u8>> {
        self.ledger.dorsal_image(processo)
    }

    pub fn export_csv<W: Write>(&self, writer: W) -> RegistryResult<()> {
        self.ledger.export_csv(writer)
    }

    pub fn dorsal_archive(&self) -> RegistryResult<Vec<u8>> {
        self.ledger.dorsal_archive()
    }

    // ========================================================================
    // ADMIN OPERATIONS
    // ========================================================================

    pub fn standings(&self, admin: bool, filter: &ListFilter) -> RegistryResult<Vec<Standing>> {
        require_admin(admin, "standings")?;
        self.ledger.standings(filter)
    }

    pub fn record_time(&self, admin: bool, who: &ParticipantRef, elapsed: &str) -> RegistryResult<Registration> {
        require_admin(admin, "record_time")?;
        self.ledger.record_time(who, elapsed)
    }

    pub fn delete(&self, admin: bool, processo: Processo) -> RegistryResult<()> {
        require_admin(admin, "delete")?;
        self.ledger.delete(processo)
    }

    pub fn clear_all(&self, admin: bool) -> RegistryResult<usize> {
        require_admin(admin, "clear_all")?;
        self.ledger.clear_all()
    }

    pub fn import_csv<R: Read>(&self, admin: bool, reader: R) -> RegistryResult<usize> {
        require_admin(admin, "import_csv")?;
        self.ledger.import_csv(reader)
    }
}
