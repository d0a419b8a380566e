// 🏁 Arrival & Time Recorders
// Finish positions are a serialized counter: read mark, assign, persist, in one transaction

use crate::db::{self, Registration};
use crate::error::{Processo, RegistryError, RegistryResult};
use crate::ledger::{Ledger, ListFilter};
use crate::roster::parse_processo;
use rusqlite::TransactionBehavior;
use serde::Serialize;
use tracing::{debug, info};

// ============================================================================
// ARRIVALS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "position", rename_all = "snake_case")]
pub enum ArrivalOutcome {
    /// Position assigned by this event
    Classified(u32),
    /// Repeated event; the existing position is reported unchanged
    AlreadyClassified(u32),
}

impl ArrivalOutcome {
    pub fn position(&self) -> u32 {
        match self {
            ArrivalOutcome::Classified(p) | ArrivalOutcome::AlreadyClassified(p) => *p,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, ArrivalOutcome::Classified(_))
    }

    /// Treat a repeated arrival as an error
    pub fn into_result(self, processo: Processo) -> RegistryResult<u32> {
        match self {
            ArrivalOutcome::Classified(position) => Ok(position),
            ArrivalOutcome::AlreadyClassified(position) => {
                Err(RegistryError::AlreadyClassified { processo, position })
            }
        }
    }
}

/// One row of the standings view
#[derive(Debug, Clone, Serialize)]
pub struct Standing {
    /// Rank within the filtered view (1-based)
    pub rank: usize,
    #[serde(flatten)]
    pub registration: Registration,
}

impl Ledger {
    /// Record that a participant crossed the finish line
    pub fn record_arrival(&self, processo: Processo) -> RegistryResult<ArrivalOutcome> {
        let outcome = self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let reg = db::get_registration(&tx, processo)?
                .ok_or_else(|| RegistryError::not_found(processo))?;

            if let Some(position) = reg.classificacao {
                return Ok(ArrivalOutcome::AlreadyClassified(position));
            }

            let position = db::last_position(&tx)? + 1;
            if db::set_classificacao(&tx, processo, position)? != 1 {
                return Err(RegistryError::Storage(format!(
                    "position {} not assigned to {}",
                    position, processo
                )));
            }
            db::set_last_position(&tx, position)?;
            tx.commit()?;

            Ok(ArrivalOutcome::Classified(position))
        })?;

        match outcome {
            ArrivalOutcome::Classified(position) => info!(processo, position, "arrival recorded"),
            ArrivalOutcome::AlreadyClassified(position) => {
                debug!(processo, position, "repeated arrival ignored")
            }
        }
        Ok(outcome)
    }

    /// Classified registrations ordered by finish position
    pub fn standings(&self, filter: &ListFilter) -> RegistryResult<Vec<Standing>> {
        let mut classified: Vec<Registration> = self
            .list(filter)?
            .into_iter()
            .filter(|reg| reg.is_classified())
            .collect();
        classified.sort_by_key(|reg| reg.classificacao);

        Ok(classified
            .into_iter()
            .enumerate()
            .map(|(i, registration)| Standing {
                rank: i + 1,
                registration,
            })
            .collect())
    }

    // ========================================================================
    // TIMES
    // ========================================================================

    /// Set (or overwrite) the elapsed time of a registration
    pub fn record_time(&self, who: &ParticipantRef, elapsed: &str) -> RegistryResult<Registration> {
        let tempo = normalize_elapsed(elapsed)?;

        let reg = self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let mut reg = match who {
                ParticipantRef::Processo(processo) => db::get_registration(&tx, *processo)?
                    .ok_or_else(|| RegistryError::not_found(*processo))?,
                ParticipantRef::Nome(nome) => {
                    let mut matches = db::find_by_name(&tx, nome)?;
                    match matches.len() {
                        0 => return Err(RegistryError::NotFound(nome.clone())),
                        1 => matches.remove(0),
                        n => {
                            return Err(RegistryError::validation(
                                "nome",
                                format!("'{}' matches {} registrations, use the processo", nome, n),
                            ))
                        }
                    }
                }
            };

            db::set_tempo(&tx, reg.processo, &tempo)?;
            tx.commit()?;

            reg.tempo = Some(tempo);
            Ok(reg)
        })?;

        info!(processo = reg.processo, tempo = ?reg.tempo, "time recorded");
        Ok(reg)
    }
}

// ============================================================================
// PARTICIPANT REFERENCE
// ============================================================================

/// A participant named either by processo or by full name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantRef {
    Processo(Processo),
    Nome(String),
}

impl ParticipantRef {
    /// Digits are a processo, anything else is a name
    pub fn parse(raw: &str) -> RegistryResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RegistryError::validation("participante", "empty reference"));
        }

        if trimmed.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Ok(ParticipantRef::Processo(parse_processo(trimmed)?));
        }
        Ok(ParticipantRef::Nome(trimmed.to_string()))
    }
}

/// Normalize "MM:SS" or "HH:MM:SS" to "HH:MM:SS"
pub fn normalize_elapsed(raw: &str) -> RegistryResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::validation("tempo", "empty elapsed time"));
    }

    let invalid = || {
        RegistryError::validation(
            "tempo",
            format!("'{}' is not a duration (expected HH:MM:SS or MM:SS)", trimmed),
        )
    };

    let parts: Vec<u32> = trimmed
        .split(':')
        .map(|p| {
            if p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()) {
                None
            } else {
                p.parse::<u32>().ok()
            }
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(invalid)?;

    let (h, m, s) = match parts.as_slice() {
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(invalid()),
    };

    if s >= 60 || (parts.len() == 3 && m >= 60) {
        return Err(invalid());
    }

    // MM:SS with minutes past the hour rolls over
    let total = h
        .checked_mul(3600)
        .and_then(|t| t.checked_add(m.checked_mul(60)?))
        .and_then(|t| t.checked_add(s))
        .ok_or_else(invalid)?;
    Ok(format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{new_registration, test_ledger};

    #[test]
    fn test_first_arrival_gets_position_one() {
        let (_dir, ledger) = test_ledger();
        ledger.register(new_registration(42, "Ana", "2016-06-01", "F")).unwrap();

        assert_eq!(ledger.record_arrival(42).unwrap(), ArrivalOutcome::Classified(1));
        assert_eq!(ledger.get(42).unwrap().classificacao, Some(1));
    }

    #[test]
    fn test_repeated_arrival_is_noop() {
        let (_dir, ledger) = test_ledger();
        ledger.register(new_registration(42, "Ana", "2016-06-01", "F")).unwrap();
        ledger.register(new_registration(43, "Rui", "2016-06-01", "M")).unwrap();

        ledger.record_arrival(42).unwrap();
        let again = ledger.record_arrival(42).unwrap();

        assert_eq!(again, ArrivalOutcome::AlreadyClassified(1));
        assert!(!again.is_new());
        assert!(matches!(
            again.into_result(42),
            Err(RegistryError::AlreadyClassified { processo: 42, position: 1 })
        ));

        // The repeat did not consume a position
        assert_eq!(ledger.record_arrival(43).unwrap(), ArrivalOutcome::Classified(2));
    }

    #[test]
    fn test_unknown_participant_arrival() {
        let (_dir, ledger) = test_ledger();
        ledger.register(new_registration(1, "Ana", "2016-06-01", "F")).unwrap();

        assert!(matches!(ledger.record_arrival(99), Err(RegistryError::NotFound(_))));
        // No state change
        assert_eq!(ledger.record_arrival(1).unwrap(), ArrivalOutcome::Classified(1));
    }

    #[test]
    fn test_delete_does_not_renumber_or_reuse() {
        let (_dir, ledger) = test_ledger();
        for p in 1..=4 {
            ledger.register(new_registration(p, &format!("P{}", p), "2009-06-01", "M")).unwrap();
        }
        for p in 1..=3 {
            ledger.record_arrival(p).unwrap();
        }

        ledger.delete(3).unwrap();

        assert_eq!(ledger.get(1).unwrap().classificacao, Some(1));
        assert_eq!(ledger.get(2).unwrap().classificacao, Some(2));
        // Position 3 belonged to the deleted record and is not handed out again
        assert_eq!(ledger.record_arrival(4).unwrap(), ArrivalOutcome::Classified(4));
    }

    #[test]
    fn test_clear_all_restarts_positions() {
        let (_dir, ledger) = test_ledger();
        ledger.register(new_registration(1, "Ana", "2016-06-01", "F")).unwrap();
        ledger.record_arrival(1).unwrap();

        ledger.clear_all().unwrap();
        ledger.register(new_registration(1, "Ana", "2016-06-01", "F")).unwrap();

        assert_eq!(ledger.record_arrival(1).unwrap(), ArrivalOutcome::Classified(1));
    }

    #[test]
    fn test_standings_sorted_and_ranked_per_filter() {
        let (_dir, ledger) = test_ledger();
        ledger.register(new_registration(1, "Ana", "2009-06-01", "Feminino")).unwrap();
        ledger.register(new_registration(2, "Rui", "2009-06-01", "Masculino")).unwrap();
        ledger.register(new_registration(3, "Eva", "2009-06-01", "Feminino")).unwrap();
        ledger.register(new_registration(4, "Zé", "2009-06-01", "Masculino")).unwrap();

        for p in [3, 2, 1] {
            ledger.record_arrival(p).unwrap();
        }

        let all = ledger.standings(&ListFilter::default()).unwrap();
        assert_eq!(
            all.iter().map(|s| s.registration.processo).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );

        let filter = ListFilter {
            genero: Some("Feminino".to_string()),
            ..ListFilter::default()
        };
        let women = ledger.standings(&filter).unwrap();
        assert_eq!(women.len(), 2);
        assert_eq!(women[1].rank, 2);
        assert_eq!(women[1].registration.processo, 1);
        assert_eq!(women[1].registration.classificacao, Some(3));
    }

    #[test]
    fn test_record_time_by_processo_and_name() {
        let (_dir, ledger) = test_ledger();
        ledger.register(new_registration(1, "Ana Silva", "2009-06-01", "F")).unwrap();

        let reg = ledger.record_time(&ParticipantRef::Processo(1), "12:45").unwrap();
        assert_eq!(reg.tempo.as_deref(), Some("00:12:45"));

        // Last write wins
        let reg = ledger
            .record_time(&ParticipantRef::Nome("ana silva".to_string()), "00:13:02")
            .unwrap();
        assert_eq!(reg.tempo.as_deref(), Some("00:13:02"));
        assert_eq!(ledger.get(1).unwrap().tempo.as_deref(), Some("00:13:02"));
    }

    #[test]
    fn test_record_time_errors() {
        let (_dir, ledger) = test_ledger();
        ledger.register(new_registration(1, "Ana", "2009-06-01", "F")).unwrap();
        ledger.register(new_registration(2, "Ana", "2010-06-01", "F")).unwrap();

        let err = ledger.record_time(&ParticipantRef::Processo(9), "00:10:00").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));

        let err = ledger
            .record_time(&ParticipantRef::Nome("Ana".to_string()), "00:10:00")
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation { .. }));

        let err = ledger.record_time(&ParticipantRef::Processo(1), "").unwrap_err();
        assert!(matches!(err, RegistryError::Validation { .. }));
        assert_eq!(ledger.get(1).unwrap().tempo, None);
    }

    #[test]
    fn test_participant_ref_parse() {
        assert_eq!(ParticipantRef::parse(" 42 ").unwrap(), ParticipantRef::Processo(42));
        assert_eq!(
            ParticipantRef::parse("Ana Silva").unwrap(),
            ParticipantRef::Nome("Ana Silva".to_string())
        );
        assert!(ParticipantRef::parse("").is_err());
    }

    #[test]
    fn test_normalize_elapsed() {
        assert_eq!(normalize_elapsed("00:12:45").unwrap(), "00:12:45");
        assert_eq!(normalize_elapsed("12:45").unwrap(), "00:12:45");
        assert_eq!(normalize_elapsed("75:00").unwrap(), "01:15:00");
        assert_eq!(normalize_elapsed(" 1:02:03 ").unwrap(), "01:02:03");

        assert!(normalize_elapsed("").is_err());
        assert!(normalize_elapsed("12:60").is_err());
        assert!(normalize_elapsed("1:60:00").is_err());
        assert!(normalize_elapsed("doze minutos").is_err());
        assert!(normalize_elapsed("12").is_err());
        assert!(normalize_elapsed("1:-2:03").is_err());
    }

    #[test]
    fn test_normalize_elapsed_rejects_oversized_values() {
        for raw in ["9999999:00:00", "99999999:00", "4294967295:00"] {
            assert!(matches!(
                normalize_elapsed(raw),
                Err(RegistryError::Validation { .. })
            ));
        }
        assert_eq!(normalize_elapsed("1000:00:00").unwrap(), "1000:00:00");
    }
}
