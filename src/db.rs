use crate::error::{Processo, RegistryError, RegistryResult};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Registration of one participant in the race
/// Column names follow the exported spreadsheet
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Registration {
    #[serde(rename = "Processo")]
    pub processo: Processo,

    #[serde(rename = "Nome")]
    pub nome: String,

    #[serde(rename = "Data nascimento")]
    pub data_nascimento: NaiveDate,

    #[serde(rename = "Género")]
    pub genero: String,

    #[serde(rename = "Turma")]
    pub turma: String,

    /// Derived once from data_nascimento at registration time
    #[serde(rename = "Escalão")]
    pub escalao: String,

    /// Elapsed time as HH:MM:SS, recorded by an admin
    #[serde(rename = "Tempo")]
    pub tempo: Option<String>,

    /// Dorsal token (QR payload); never changes after registration
    #[serde(rename = "QR")]
    pub qr: String,

    /// Finish position; immutable once assigned
    #[serde(rename = "Classificação")]
    pub classificacao: Option<u32>,
}

impl Registration {
    pub fn is_classified(&self) -> bool {
        self.classificacao.is_some()
    }
}

pub fn setup_database(conn: &Connection) -> RegistryResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;

    // ==========================================================================
    // Registrations
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS inscricoes (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            processo INTEGER UNIQUE NOT NULL,
            nome TEXT NOT NULL,
            data_nascimento TEXT NOT NULL,
            genero TEXT NOT NULL,
            turma TEXT NOT NULL,
            escalao TEXT NOT NULL,
            tempo TEXT,
            qr TEXT NOT NULL,
            classificacao INTEGER UNIQUE,
            registered_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Race metadata (finish position high-water mark)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS race_meta (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO race_meta (key, value) VALUES ('last_position', 0)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_escalao ON inscricoes(escalao)",
        [],
    )?;

    Ok(())
}

const SELECT_COLUMNS: &str = "processo, nome, data_nascimento, genero, turma, escalao, tempo, qr, classificacao";

fn row_to_registration(row: &Row<'_>) -> rusqlite::Result<Registration> {
    let date_str: String = row.get(2)?;
    let data_nascimento = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Registration {
        processo: row.get(0)?,
        nome: row.get(1)?,
        data_nascimento,
        genero: row.get(3)?,
        turma: row.get(4)?,
        escalao: row.get(5)?,
        tempo: row.get(6)?,
        qr: row.get(7)?,
        classificacao: row.get(8)?,
    })
}

/// Insert one registration; a duplicate processo maps to DuplicateRegistration
pub fn insert_registration(
    conn: &Connection,
    reg: &Registration,
    registered_at: DateTime<Utc>,
) -> RegistryResult<()> {
    let result = conn.execute(
        "INSERT INTO inscricoes (
            processo, nome, data_nascimento, genero, turma, escalao, tempo, qr,
            classificacao, registered_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            reg.processo,
            reg.nome,
            reg.data_nascimento.format("%Y-%m-%d").to_string(),
            reg.genero,
            reg.turma,
            reg.escalao,
            reg.tempo,
            reg.qr,
            reg.classificacao,
            registered_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(RegistryError::DuplicateRegistration(reg.processo))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_registration(conn: &Connection, processo: Processo) -> RegistryResult<Option<Registration>> {
    let sql = format!("SELECT {} FROM inscricoes WHERE processo = ?1", SELECT_COLUMNS);
    let reg = conn
        .query_row(&sql, params![processo], row_to_registration)
        .optional()?;
    Ok(reg)
}

/// All registrations in insertion order
pub fn get_all_registrations(conn: &Connection) -> RegistryResult<Vec<Registration>> {
    let sql = format!("SELECT {} FROM inscricoes ORDER BY seq", SELECT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;

    let registrations = stmt
        .query_map([], row_to_registration)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(registrations)
}

pub fn find_by_name(conn: &Connection, nome: &str) -> RegistryResult<Vec<Registration>> {
    let sql = format!(
        "SELECT {} FROM inscricoes WHERE nome = ?1 COLLATE NOCASE ORDER BY seq",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let registrations = stmt
        .query_map(params![nome.trim()], row_to_registration)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(registrations)
}

/// Returns number of rows removed (0 or 1)
pub fn delete_registration(conn: &Connection, processo: Processo) -> RegistryResult<usize> {
    Ok(conn.execute("DELETE FROM inscricoes WHERE processo = ?1", params![processo])?)
}

pub fn delete_all_registrations(conn: &Connection) -> RegistryResult<usize> {
    Ok(conn.execute("DELETE FROM inscricoes", [])?)
}

pub fn set_tempo(conn: &Connection, processo: Processo, tempo: &str) -> RegistryResult<usize> {
    Ok(conn.execute(
        "UPDATE inscricoes SET tempo = ?1 WHERE processo = ?2",
        params![tempo, processo],
    )?)
}

/// Assign a finish position; refuses to overwrite an existing one
pub fn set_classificacao(conn: &Connection, processo: Processo, position: u32) -> RegistryResult<usize> {
    Ok(conn.execute(
        "UPDATE inscricoes SET classificacao = ?1 WHERE processo = ?2 AND classificacao IS NULL",
        params![position, processo],
    )?)
}

pub fn last_position(conn: &Connection) -> RegistryResult<u32> {
    let value: u32 = conn.query_row(
        "SELECT value FROM race_meta WHERE key = 'last_position'",
        [],
        |row| row.get(0),
    )?;
    Ok(value)
}

pub fn set_last_position(conn: &Connection, position: u32) -> RegistryResult<()> {
    conn.execute(
        "UPDATE race_meta SET value = ?1 WHERE key = 'last_position'",
        params![position],
    )?;
    Ok(())
}

pub fn verify_count(conn: &Connection) -> RegistryResult<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM inscricoes", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// CSV export / import
// ============================================================================

/// Trailing comment line carrying the position high-water mark
const POSITION_MARK: &str = "# last_position=";

/// Contents of a ledger dump
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvDump {
    pub registrations: Vec<Registration>,
    /// Highest finish position ever assigned, deleted records included
    pub last_position: u32,
}

pub fn write_csv<W: Write>(
    mut writer: W,
    registrations: &[Registration],
    last_position: u32,
) -> RegistryResult<()> {
    {
        let mut wtr = csv::Writer::from_writer(&mut writer);
        for reg in registrations {
            wtr.serialize(reg)?;
        }
        wtr.flush()?;
    }
    writeln!(writer, "{}{}", POSITION_MARK, last_position)?;
    Ok(())
}

pub fn read_csv<R: Read>(mut reader: R) -> RegistryResult<CsvDump> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| RegistryError::validation("csv", e.to_string()))?;

    // Dumps without the mark (hand-edited spreadsheets) start from zero
    let last_position = match text
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.strip_prefix(POSITION_MARK))
    {
        Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
            RegistryError::validation("csv", format!("bad position mark '{}'", raw.trim()))
        })?,
        None => 0,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());

    let mut registrations = Vec::new();
    for (i, result) in rdr.deserialize().enumerate() {
        let reg: Registration = result.map_err(|e| {
            RegistryError::validation("csv", format!("row {}: {}", i + 2, e))
        })?;
        registrations.push(reg);
    }

    Ok(CsvDump {
        registrations,
        last_position,
    })
}
