//! Interface de linha de comando do signq baseada em clap.
//!
//! Todas as flags são opcionais e, quando presentes, sobrepõem os valores
//! lidos de `signq.toml`. Cada flag também pode vir de uma variável de ambiente.

use std::path::PathBuf;

use clap::Parser;

use crate::config::ServiceConfig;

/// signq: fila de assinatura com controle de admissão.
#[derive(Debug, Parser)]
#[command(name = "signq", version, about)]
pub struct Cli {
    /// Caminho do arquivo de configuração TOML.
    #[arg(long, short, env = "SIGNQ_CONFIG", default_value = "signq.toml")]
    pub config: PathBuf,

    /// Máximo de requisições na fila de admissão.
    #[arg(long, env = "SIGNQ_MAX_QUEUE_SIZE")]
    pub max_queue_size: Option<usize>,

    /// Máximo de assinaturas simultâneas.
    #[arg(long, env = "SIGNQ_MAX_CONCURRENT_SIGNINGS")]
    pub max_concurrent_signings: Option<usize>,

    /// Endereço HTTP de escuta (ex.: 0.0.0.0:8080).
    #[arg(long, env = "SIGNQ_LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// Nível de log quando `RUST_LOG` não está definido.
    #[arg(long, env = "SIGNQ_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Arquivo de assinaturas persistidas.
    #[arg(long, env = "SIGNQ_SIGNATURES_PATH")]
    pub signatures_path: Option<PathBuf>,

    /// Arquivo de requisições pendentes persistidas.
    #[arg(long, env = "SIGNQ_PENDING_PATH")]
    pub pending_path: Option<PathBuf>,

    /// Número máximo de tentativas por job (padrão: ilimitado).
    #[arg(long, env = "SIGNQ_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,
}

impl Cli {
    /// Aplica as flags informadas sobre a configuração carregada.
    pub fn apply(&self, config: &mut ServiceConfig) {
        if let Some(size) = self.max_queue_size {
            config.max_queue_size = size;
        }
        if let Some(concurrency) = self.max_concurrent_signings {
            config.max_concurrent_signings = concurrency;
        }
        if let Some(addr) = &self.listen_addr {
            config.listen_addr = addr.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(path) = &self.signatures_path {
            config.signatures_path = path.clone();
        }
        if let Some(path) = &self.pending_path {
            config.pending_path = path.clone();
        }
        if self.max_attempts.is_some() {
            config.retry.max_attempts = self.max_attempts;
        }
    }
}
