use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Aucun tirage complet disponible pour cette analyse")]
    NoData,

    #[error("Contrainte invalide : {0}")]
    ConstraintViolation(String),

    #[error("Aucune suggestion acceptée : consensus impossible")]
    NoVotes,

    #[error("Combinaison invalide : {0}")]
    InvalidCombo(String),

    #[error("Erreur de lecture de l'historique : {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    /// Code stable exposé aux clients.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NoData => "NO_DATA",
            EngineError::ConstraintViolation(_) => "CONSTRAINT_VIOLATION",
            EngineError::NoVotes => "NO_VOTES",
            EngineError::InvalidCombo(_) => "INVALID_COMBO",
            EngineError::Store(_) => "STORE_ERROR",
        }
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        EngineError::ConstraintViolation(msg.into())
    }

    pub fn status(&self) -> &'static str {
        match self {
            EngineError::NoData => "no_data",
            _ => "error",
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            status: self.status(),
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Forme sérialisable d'un échec, renvoyée à la place d'une réponse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub status: &'static str,
    pub code: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(EngineError::NoData.code(), "NO_DATA");
        assert_eq!(EngineError::NoVotes.code(), "NO_VOTES");
        assert_eq!(EngineError::constraint("x").code(), "CONSTRAINT_VIOLATION");
    }

    #[test]
    fn test_store_error_from_anyhow() {
        let err: EngineError = anyhow::anyhow!("disque plein").into();
        assert_eq!(err.code(), "STORE_ERROR");
        assert!(err.to_string().contains("disque plein"));
    }

    #[test]
    fn test_report_status() {
        let r = EngineError::NoData.report();
        assert_eq!(r.status, "no_data");
        assert_eq!(r.code, "NO_DATA");
        let r = EngineError::constraint("5 est exclu").report();
        assert_eq!(r.status, "error");
        assert!(r.message.contains("5 est exclu"));
    }
}
