//! Configuração do pixbatch carregada a partir de `pixbatch.toml`.
//!
//! A struct [`PixbatchConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `PIXBATCH_AUTH_TOKEN` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "pixbatch.toml";

/// Variável de ambiente com o token de autenticação da API.
pub const TOKEN_ENV: &str = "PIXBATCH_AUTH_TOKEN";

/// Configuração de nível superior carregada de `pixbatch.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PixbatchConfig {
    /// URL raiz da API da galeria (ex.: `https://host/api/v1`).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Token Bearer enviado em cada upload.
    #[serde(default)]
    pub auth_token: String,

    /// Máximo de uploads simultâneos.
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// Endpoint do serviço externo de redimensionamento.
    #[serde(default = "default_resize_service_url")]
    pub resize_service_url: String,

    /// URL pública do bucket onde as imagens originais são servidas.
    #[serde(default)]
    pub public_base_url: String,

    /// Tamanhos de lado curto gerados por padrão.
    #[serde(default = "default_resize_sizes")]
    pub resize_sizes: Vec<u32>,

    /// Diretório onde as versões redimensionadas são gravadas.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

// Valor padrão para a API: servidor local de desenvolvimento.
fn default_api_base_url() -> String {
    "http://localhost:8787/api/v1".to_string()
}

// Valor padrão para uploads simultâneos: 20.
fn default_upload_concurrency() -> usize {
    20
}

fn default_resize_service_url() -> String {
    "https://photon.atou.workers.dev/".to_string()
}

fn default_resize_sizes() -> Vec<u32> {
    vec![256, 1024, 2048]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("renditions")
}

impl Default for PixbatchConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            auth_token: String::new(),
            upload_concurrency: default_upload_concurrency(),
            resize_service_url: default_resize_service_url(),
            public_base_url: String::new(),
            resize_sizes: default_resize_sizes(),
            output_dir: default_output_dir(),
        }
    }
}

impl PixbatchConfig {
    /// Carrega a configuração de `pixbatch.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega a configuração de um caminho explícito.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<PixbatchConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        if let Some(token) = env_token() {
            config.auth_token = token;
        }

        Ok(config)
    }

    /// Token atual: a variável de ambiente é relida a cada chamada para que
    /// um token renovado durante o lote seja usado nos próximos uploads.
    pub fn current_token(&self) -> Option<String> {
        env_token().or_else(|| Some(self.auth_token.clone()).filter(|t| !t.is_empty()))
    }
}

fn env_token() -> Option<String> {
    std::env::var(TOKEN_ENV).ok().filter(|key| !key.is_empty())
}
