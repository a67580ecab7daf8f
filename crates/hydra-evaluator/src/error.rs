//! Evaluator runtime errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Db(#[from] hydra_db::DbError),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;
