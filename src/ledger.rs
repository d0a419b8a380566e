// 📒 Registration Ledger - the system of record
// One SQLite connection behind one lock; every mutation is a single transaction

use crate::arrivals::normalize_elapsed;
use crate::db::{self, Registration};
use crate::dorsal::{DorsalStore, TokenIssuer};
use crate::error::{Processo, RegistryError, RegistryResult};
use crate::escalao::{parse_birth_date, CategoryTable};
use crate::roster::Participant;
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

// ============================================================================
// INPUT / FILTER TYPES
// ============================================================================

/// Fields needed to register a participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRegistration {
    pub processo: Processo,
    pub nome: String,
    /// Accepts every format the roster does (YYYY-MM-DD, DD/MM/YYYY)
    #[serde(deserialize_with = "deserialize_birth_date")]
    pub data_nascimento: NaiveDate,
    pub genero: String,
    pub turma: String,
}

fn deserialize_birth_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_birth_date(&raw).map_err(serde::de::Error::custom)
}

impl From<&Participant> for NewRegistration {
    fn from(p: &Participant) -> Self {
        NewRegistration {
            processo: p.processo,
            nome: p.nome.clone(),
            data_nascimento: p.data_nascimento,
            genero: p.genero.clone(),
            turma: p.turma.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilter {
    pub escalao: Option<String>,
    pub genero: Option<String>,
    /// Case-insensitive name substring
    pub nome: Option<String>,
}

impl ListFilter {
    pub fn escalao(label: &str) -> Self {
        ListFilter {
            escalao: Some(label.to_string()),
            ..ListFilter::default()
        }
    }

    pub fn matches(&self, reg: &Registration) -> bool {
        if let Some(escalao) = &self.escalao {
            if &reg.escalao != escalao {
                return false;
            }
        }

        if let Some(genero) = &self.genero {
            if !reg.genero.eq_ignore_ascii_case(genero) {
                return false;
            }
        }

        if let Some(nome) = &self.nome {
            if !reg.nome.to_lowercase().contains(&nome.trim().to_lowercase()) {
                return false;
            }
        }

        true
    }
}

// ============================================================================
// LEDGER
// ============================================================================

pub struct Ledger {
    conn: Mutex<Connection>,
    table: CategoryTable,
    issuer: TokenIssuer,
    dorsais: DorsalStore,
}

impl Ledger {
    /// Open (or create) the ledger database at `path`
    pub fn open<P: AsRef<Path>>(
        path: P,
        table: CategoryTable,
        issuer: TokenIssuer,
        dorsais: DorsalStore,
    ) -> RegistryResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let ledger = Self::from_connection(conn, table, issuer, dorsais)?;
        let registrations = ledger.len()?;

        info!(path = ?path.as_ref(), registrations, "ledger opened");
        Ok(ledger)
    }

    pub fn open_in_memory(
        table: CategoryTable,
        issuer: TokenIssuer,
        dorsais: DorsalStore,
    ) -> RegistryResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, table, issuer, dorsais)
    }

    fn from_connection(
        conn: Connection,
        table: CategoryTable,
        issuer: TokenIssuer,
        dorsais: DorsalStore,
    ) -> RegistryResult<Self> {
        db::setup_database(&conn)?;
        Ok(Ledger {
            conn: Mutex::new(conn),
            table,
            issuer,
            dorsais,
        })
    }

    pub fn categories_table(&self) -> &CategoryTable {
        &self.table
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub fn dorsais(&self) -> &DorsalStore {
        &self.dorsais
    }

    /// Run `f` with exclusive access to the connection
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> RegistryResult<T>,
    ) -> RegistryResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| RegistryError::Storage("ledger lock poisoned".to_string()))?;
        f(&mut conn)
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    pub fn register(&self, new: NewRegistration) -> RegistryResult<Registration> {
        check_identity(new.processo, &new.nome)?;
        let nome = new.nome.trim();

        let reg = Registration {
            processo: new.processo,
            nome: nome.to_string(),
            data_nascimento: new.data_nascimento,
            genero: new.genero.trim().to_string(),
            turma: new.turma.trim().to_string(),
            escalao: self.table.classify(new.data_nascimento).to_string(),
            tempo: None,
            qr: self.issuer.issue(new.processo, nome),
            classificacao: None,
        };

        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            db::insert_registration(&tx, &reg, Utc::now())?;

            // Image first: a failed write rolls the insert back
            self.dorsais.write(reg.processo, &reg.qr)?;

            if let Err(e) = tx.commit() {
                let _ = self.dorsais.remove(reg.processo);
                return Err(e.into());
            }
            Ok(())
        })?;

        info!(processo = reg.processo, escalao = %reg.escalao, "participant registered");
        Ok(reg)
    }

    pub fn register_participant(&self, participant: &Participant) -> RegistryResult<Registration> {
        self.register(NewRegistration::from(participant))
    }

    /// Remove one registration; other finish positions are untouched
    pub fn delete(&self, processo: Processo) -> RegistryResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if db::delete_registration(&tx, processo)? == 0 {
                return Err(RegistryError::not_found(processo));
            }
            tx.commit()?;
            Ok(())
        })?;

        if let Err(e) = self.dorsais.remove(processo) {
            warn!(processo, error = %e, "registration deleted but dorsal image remains");
        }

        info!(processo, "registration deleted");
        Ok(())
    }

    /// Empty the ledger and start a fresh race; returns how many were removed
    pub fn clear_all(&self) -> RegistryResult<usize> {
        let removed = self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let removed = db::delete_all_registrations(&tx)?;
            db::set_last_position(&tx, 0)?;
            tx.commit()?;
            Ok(removed)
        })?;

        if let Err(e) = self.dorsais.clear() {
            warn!(error = %e, "ledger cleared but dorsal images remain");
        }

        warn!(removed, "ledger cleared");
        Ok(removed)
    }

    /// Replace the ledger content with a CSV dump produced by `export_csv`
    ///
    /// Every row is held to the same rules as `register`: positive processo,
    /// non-empty name and the category the table assigns to the birth date.
    /// The position mark never moves backwards, so positions of records
    /// deleted before the dump are not handed out again.
    pub fn import_csv<R: Read>(&self, reader: R) -> RegistryResult<usize> {
        let dump = db::read_csv(reader)?;
        let registrations = dump.registrations;

        let mut seen = HashSet::new();
        let mut positions = HashSet::new();
        for reg in &registrations {
            self.check_imported(reg)?;
            if !seen.insert(reg.processo) {
                return Err(RegistryError::DuplicateRegistration(reg.processo));
            }
            if let Some(pos) = reg.classificacao {
                if pos == 0 || !positions.insert(pos) {
                    return Err(RegistryError::validation(
                        "classificacao",
                        format!("position {} is zero or repeated", pos),
                    ));
                }
            }
        }
        let surviving = positions.iter().copied().max().unwrap_or(0);

        let high_water = self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let high_water = surviving
                .max(dump.last_position)
                .max(db::last_position(&tx)?);

            db::delete_all_registrations(&tx)?;
            let now = Utc::now();
            for reg in &registrations {
                db::insert_registration(&tx, reg, now)?;
            }
            db::set_last_position(&tx, high_water)?;
            tx.commit()?;
            Ok(high_water)
        })?;

        self.dorsais.clear()?;
        for reg in &registrations {
            self.dorsais.write(reg.processo, &reg.qr)?;
        }

        info!(imported = registrations.len(), last_position = high_water, "ledger imported");
        Ok(registrations.len())
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn get(&self, processo: Processo) -> RegistryResult<Registration> {
        self.with_conn(|conn| db::get_registration(conn, processo))?
            .ok_or_else(|| RegistryError::not_found(processo))
    }

    /// Registrations in insertion order
    pub fn list(&self, filter: &ListFilter) -> RegistryResult<Vec<Registration>> {
        let all = self.with_conn(|conn| db::get_all_registrations(conn))?;
        Ok(all.into_iter().filter(|reg| filter.matches(reg)).collect())
    }

    /// Distinct category labels present in the ledger, sorted
    pub fn categories(&self) -> RegistryResult<Vec<String>> {
        let mut labels: Vec<String> = self
            .list(&ListFilter::default())?
            .into_iter()
            .map(|reg| reg.escalao)
            .collect();
        labels.sort();
        labels.dedup();
        Ok(labels)
    }

    pub fn len(&self) -> RegistryResult<usize> {
        let count = self.with_conn(|conn| db::verify_count(conn))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> RegistryResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Full dump: every registration plus the position mark
    pub fn export_csv<W: Write>(&self, writer: W) -> RegistryResult<()> {
        let (all, last_position) = self.with_conn(|conn| {
            Ok((db::get_all_registrations(conn)?, db::last_position(conn)?))
        })?;
        db::write_csv(writer, &all, last_position)
    }

    /// Dorsal image for a registration, re-rendered if the file went missing
    pub fn dorsal_image(&self, processo: Processo) -> RegistryResult<Vec<u8>> {
        let reg = self.get(processo)?;
        self.dorsais.read_or_render(reg.processo, &reg.qr)
    }

    pub fn dorsal_archive(&self) -> RegistryResult<Vec<u8>> {
        self.dorsais.archive()
    }

    fn check_imported(&self, reg: &Registration) -> RegistryResult<()> {
        check_identity(reg.processo, &reg.nome)?;

        let expected = self.table.classify(reg.data_nascimento);
        if reg.escalao != expected {
            return Err(RegistryError::validation(
                "escalao",
                format!(
                    "processo {}: '{}' does not match birth date {} ('{}')",
                    reg.processo, reg.escalao, reg.data_nascimento, expected
                ),
            ));
        }

        if let Some(tempo) = &reg.tempo {
            if normalize_elapsed(tempo)? != *tempo {
                return Err(RegistryError::validation(
                    "tempo",
                    format!("processo {}: '{}' is not HH:MM:SS", reg.processo, tempo),
                ));
            }
        }
        Ok(())
    }
}

fn check_identity(processo: Processo, nome: &str) -> RegistryResult<()> {
    if processo <= 0 {
        return Err(RegistryError::validation("processo", "must be a positive integer"));
    }
    if nome.trim().is_empty() {
        return Err(RegistryError::validation("nome", "empty name"));
    }
    Ok(())
}
