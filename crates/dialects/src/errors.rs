use thiserror::Error;

use crate::DialectKind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslateError {
    #[error("the {dialect} dialect cannot translate {feature}")]
    UnsupportedByDialect {
        dialect: DialectKind,
        feature: String,
    },

    #[error("invalid literal: {message}")]
    InvalidLiteral { message: String },
}
