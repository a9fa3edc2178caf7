use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GrammarError {
    #[error("parse error at offset {pos}: {message}")]
    Parse { pos: usize, message: String },
    #[error("undefined rule identifier: {0}")]
    UndefinedRule(String),
    #[error("grammar does not define the root rule '{0}'")]
    MissingRoot(String),
    #[error("left recursion detected for rule '{0}'")]
    LeftRecursion(String),
    #[error("piece {0:?} is not accepted by the grammar in its current state")]
    Rejected(String),
    #[error("grammar has no rules")]
    Empty,
}

pub type Result<T> = std::result::Result<T, GrammarError>;
