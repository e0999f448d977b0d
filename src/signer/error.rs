//! Tipos de erro para o cliente de assinatura remoto.
//!
//! Define [`SignerError`] com variantes para falhas de rede, status HTTP
//! não-2xx e corpo ilegível. Todas são tratadas como retentáveis pelo
//! dispatcher; a distinção existe apenas para os logs.

use thiserror::Error;

/// Erros que podem ocorrer ao chamar o serviço de assinatura.
#[derive(Debug, Error)]
pub enum SignerError {
    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// O serviço respondeu com um status diferente de 2xx.
    #[error("signer returned status {status}")]
    Status { status: u16 },

    /// A resposta chegou mas o corpo não pôde ser lido.
    #[error("unreadable response body: {0}")]
    Body(String),
}
