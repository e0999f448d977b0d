//! Configuração do signq carregada a partir de `signq.toml`.
//!
//! A struct [`ServiceConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `SIGNQ_API_KEY` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ServiceError;

/// Variável de ambiente com a chave do serviço de assinatura.
pub const API_KEY_ENV: &str = "SIGNQ_API_KEY";

/// Configuração de nível superior carregada de `signq.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Máximo de requisições aguardando na fila de admissão.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Máximo de chamadas simultâneas ao serviço de assinatura.
    #[serde(default = "default_max_concurrent_signings")]
    pub max_concurrent_signings: usize,

    /// Endereço em que o servidor HTTP escuta.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Nível de log usado quando `RUST_LOG` não está definido.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Arquivo com as assinaturas ainda não retiradas.
    #[serde(default = "default_signatures_path")]
    pub signatures_path: PathBuf,

    /// Arquivo com as requisições pendentes.
    #[serde(default = "default_pending_path")]
    pub pending_path: PathBuf,

    #[serde(default)]
    pub signer: SignerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub poll: PollConfig,
}

/// Conexão com o serviço de assinatura remoto.
#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    #[serde(default = "default_signer_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_signer_timeout_secs")]
    pub timeout_secs: u64,

    /// Aceita certificados TLS inválidos (desligado por padrão).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Comportamento de retentativa e resfriamento dos workers.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Espera fixa entre tentativas falhas.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Tempo em que o worker segura o slot após uma assinatura bem-sucedida.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Máximo de tentativas por job. `None` retenta para sempre.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Backoff exponencial usado na espera síncrona por uma assinatura.
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_initial_interval_ms")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_poll_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_poll_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

// Fila de 300: mais que isso significa esperar mais de uma hora.
fn default_max_queue_size() -> usize {
    300
}

fn default_max_concurrent_signings() -> usize {
    10
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_signatures_path() -> PathBuf {
    PathBuf::from("./state/signatures.json")
}

fn default_pending_path() -> PathBuf {
    PathBuf::from("./state/pending.json")
}

fn default_signer_url() -> String {
    "https://hiring.api.synthesia.io".to_string()
}

fn default_signer_timeout_secs() -> u64 {
    60
}

fn default_retry_delay_ms() -> u64 {
    60_000
}

fn default_cooldown_ms() -> u64 {
    60_000
}

fn default_poll_initial_interval_ms() -> u64 {
    50
}

fn default_poll_multiplier() -> f64 {
    1.5
}

fn default_poll_max_elapsed_ms() -> u64 {
    2_000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_concurrent_signings: default_max_concurrent_signings(),
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            signatures_path: default_signatures_path(),
            pending_path: default_pending_path(),
            signer: SignerConfig::default(),
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            base_url: default_signer_url(),
            api_key: String::new(),
            timeout_secs: default_signer_timeout_secs(),
            accept_invalid_certs: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            cooldown_ms: default_cooldown_ms(),
            max_attempts: None,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_poll_initial_interval_ms(),
            multiplier: default_poll_multiplier(),
            max_elapsed_ms: default_poll_max_elapsed_ms(),
        }
    }
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Whether a job that has failed `attempts` times should be abandoned.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

impl PollConfig {
    /// Delay before poll number `attempt` (1-based):
    /// `initial_interval * multiplier^(attempt - 1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(self.initial_interval_ms as f64 * factor / 1000.0)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }
}

impl ServiceConfig {
    /// Carrega a configuração do arquivo em `path`.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<ServiceConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para a chave API.
        if let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.is_empty()
        {
            config.signer.api_key = key;
        }

        Ok(config)
    }

    /// Rejeita combinações que deixariam o pipeline travado.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.max_queue_size == 0 {
            return Err(ServiceError::Config("max_queue_size must be > 0".into()));
        }
        if self.max_concurrent_signings == 0 {
            return Err(ServiceError::Config(
                "max_concurrent_signings must be > 0".into(),
            ));
        }
        if self.poll.multiplier < 1.0 {
            return Err(ServiceError::Config("poll.multiplier must be >= 1".into()));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(ServiceError::Config("retry.max_attempts must be > 0".into()));
        }
        Ok(())
    }
}
