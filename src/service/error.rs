//! Tipos de erro das operações por item (upload e resize).
//!
//! Define [`ServiceError`] com uma variante para cada etapa que pode falhar
//! e a conversão para [`Failure`], que aplica a classificação fixa usada
//! pelo engine: credencial → `Auth`, resposta remota → `Remote`,
//! pré-condição → `Validation`, todo o resto → `Internal`.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::Failure;

/// Erros que podem ocorrer ao executar a operação de um item.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Nenhum token de autenticação disponível no momento do envio.
    #[error("authentication token not available")]
    MissingToken,

    /// O serviço remoto respondeu com status de erro.
    /// Contém o código HTTP e a mensagem extraída do corpo da resposta.
    #[error("remote error (status {status}): {message}")]
    Status { status: u16, message: String },

    /// O item não atende a uma pré-condição (arquivo vazio, tamanho inválido).
    #[error("invalid item: {0}")]
    Invalid(String),

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Corpo de resposta que não pôde ser interpretado.
    #[error("failed to parse response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Falha de leitura ou escrita no sistema de arquivos local.
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ServiceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ServiceError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<ServiceError> for Failure {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::MissingToken => Failure::auth(err.to_string()),
            ServiceError::Status { status, message } => Failure::remote(status, message),
            ServiceError::Invalid(message) => Failure::validation(message),
            ServiceError::Network(_) | ServiceError::Decode(_) | ServiceError::Io { .. } => {
                Failure::internal(err.to_string())
            }
        }
    }
}
