// 📋 Roster Store - Eligible participants from the school spreadsheet
// Read-only; the core only needs lookup by processo and search by name

use crate::error::{Processo, RegistryError, RegistryResult};
use crate::escalao::parse_birth_date;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

// Column positions in the exported spreadsheet
const COL_PROCESSO: usize = 0;
const COL_NOME: usize = 1;
const COL_GENERO: usize = 2;
const COL_DATA_NASCIMENTO: usize = 3;
const COL_TURMA: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub processo: Processo,
    pub nome: String,
    pub data_nascimento: NaiveDate,
    pub genero: String,
    pub turma: String,
}

#[derive(Debug, Default)]
pub struct Roster {
    participants: Vec<Participant>,
    by_processo: HashMap<Processo, usize>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_participants(participants: Vec<Participant>) -> Self {
        let mut roster = Roster::new();
        for participant in participants {
            roster.insert(participant);
        }
        roster
    }

    /// Load a roster CSV (header row, columns by position)
    pub fn load_csv<P: AsRef<Path>>(path: P) -> RegistryResult<Self> {
        let file = std::fs::File::open(path.as_ref()).map_err(|e| {
            RegistryError::Storage(format!("cannot open roster {:?}: {}", path.as_ref(), e))
        })?;
        let roster = Self::from_reader(file)?;

        info!(path = ?path.as_ref(), participants = roster.len(), "roster loaded");
        Ok(roster)
    }

    pub fn from_reader<R: Read>(reader: R) -> RegistryResult<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut roster = Roster::new();

        for (i, result) in rdr.records().enumerate() {
            let record = result?;
            // +2: header is line 1
            let line = i + 2;

            match parse_row(&record) {
                Ok(participant) => {
                    if !roster.insert(participant) {
                        warn!(line, "duplicate processo in roster, keeping first row");
                    }
                }
                Err(e) => warn!(line, error = %e, "skipping roster row"),
            }
        }

        Ok(roster)
    }

    /// Returns false when the processo was already present
    fn insert(&mut self, participant: Participant) -> bool {
        if self.by_processo.contains_key(&participant.processo) {
            return false;
        }
        self.by_processo
            .insert(participant.processo, self.participants.len());
        self.participants.push(participant);
        true
    }

    pub fn lookup(&self, processo: Processo) -> Option<&Participant> {
        self.by_processo
            .get(&processo)
            .and_then(|&i| self.participants.get(i))
    }

    /// Case-insensitive substring search on the name
    pub fn search(&self, query: &str) -> Vec<&Participant> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        self.participants
            .iter()
            .filter(|p| p.nome.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Parse the processo column; spreadsheets export integers as "1234.0"
pub fn parse_processo(raw: &str) -> RegistryResult<Processo> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);

    digits
        .parse::<Processo>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            RegistryError::validation("processo", format!("'{}' is not a positive integer", trimmed))
        })
}

fn parse_row(record: &csv::StringRecord) -> RegistryResult<Participant> {
    let field = |idx: usize| record.get(idx).unwrap_or("").to_string();

    let nome = field(COL_NOME);
    if nome.is_empty() {
        return Err(RegistryError::validation("nome", "empty name"));
    }

    Ok(Participant {
        processo: parse_processo(&field(COL_PROCESSO))?,
        nome,
        data_nascimento: parse_birth_date(&field(COL_DATA_NASCIMENTO))?,
        genero: field(COL_GENERO),
        turma: field(COL_TURMA),
    })
}
