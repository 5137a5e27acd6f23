//! Failure taxonomy for a try-on submission.
//!
//! Every failure of `SessionController::submit` ends up as one of these
//! variants. The controller turns them into a single message for the page
//! via [`EditError::user_message`]; `Display` is the log-facing form.

use std::path::PathBuf;

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    /// Local precondition not met at submit time. Never reaches the client.
    #[error("validation: {0}")]
    Validation(String),

    /// The selected file could not be read for encoding.
    #[error("could not read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The service refused the request on policy grounds.
    #[error("request blocked: {reason}")]
    BlockedRequest { reason: String },

    /// The service started generating but did not finish normally.
    #[error("generation failed: {reason}")]
    GenerationFailed { reason: String },

    #[error("malformed response: no candidate content")]
    MalformedResponse,

    #[error("no image in response")]
    NoImageProduced,

    /// Transport or HTTP-level failure talking to the service.
    #[error("service error: {0}")]
    Service(String),
}

impl EditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EditError::Validation(_) => ErrorKind::Validation,
            EditError::Io { .. } => ErrorKind::Io,
            EditError::BlockedRequest { .. } => ErrorKind::BlockedRequest,
            EditError::GenerationFailed { .. } => ErrorKind::GenerationFailed,
            EditError::MalformedResponse => ErrorKind::MalformedResponse,
            EditError::NoImageProduced => ErrorKind::NoImageProduced,
            EditError::Service(_) => ErrorKind::Service,
        }
    }

    /// Message shown in the page's error banner.
    pub fn user_message(&self) -> String {
        match self {
            EditError::Validation(msg) => msg.clone(),
            EditError::Io { .. } => {
                "Não foi possível ler o arquivo de imagem selecionado.".to_string()
            }
            EditError::BlockedRequest { reason } => format!(
                "Falha ao gerar a imagem. A solicitação foi bloqueada pela API ({reason})."
            ),
            EditError::GenerationFailed { reason } => format!(
                "Falha ao gerar a imagem. A geração foi interrompida ({reason})."
            ),
            EditError::MalformedResponse => {
                "Falha ao gerar a imagem. A API retornou uma resposta vazia ou inválida."
                    .to_string()
            }
            EditError::NoImageProduced => {
                "Falha ao gerar a imagem. Nenhuma imagem foi gerada na resposta da API."
                    .to_string()
            }
            EditError::Service(msg) => format!("Falha ao gerar a imagem. Erro na API: {msg}"),
        }
    }
}

/// Tag of an [`EditError`], exposed to the page next to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Io,
    BlockedRequest,
    GenerationFailed,
    MalformedResponse,
    NoImageProduced,
    Service,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_message_carries_reason() {
        let err = EditError::BlockedRequest {
            reason: "SAFETY".into(),
        };
        assert_eq!(err.kind(), ErrorKind::BlockedRequest);
        assert!(err.user_message().contains("SAFETY"));
    }

    #[test]
    fn validation_message_is_passed_through() {
        let err = EditError::Validation("carregue uma imagem".into());
        assert_eq!(err.user_message(), "carregue uma imagem");
    }

    #[test]
    fn io_message_is_generic() {
        let err = EditError::Io {
            path: PathBuf::from("/tmp/secret/photo.png"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(!err.user_message().contains("secret"));
        assert!(err.to_string().contains("photo.png"));
    }
}
