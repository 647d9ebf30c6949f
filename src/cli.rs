//! Interface de linha de comando do pixbatch baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (upload, resize)
//! e flags globais (--verbose, --json, --config).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// pixbatch: execução concorrente de lotes de upload e redimensionamento de imagens.
#[derive(Debug, Parser)]
#[command(name = "pixbatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Imprime o resumo do lote em JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Caminho alternativo para o arquivo de configuração.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Envia todas as imagens de um diretório para a galeria.
    Upload {
        /// Diretório percorrido recursivamente em busca de imagens.
        dir: PathBuf,

        /// Máximo de uploads simultâneos.
        #[arg(long, short)]
        concurrency: Option<usize>,
    },

    /// Gera as versões redimensionadas de uma imagem já enviada.
    Resize {
        /// Caminho da imagem original no bucket (ex.: `original/02/00/abc.png`).
        source_path: String,

        /// Tamanhos de lado curto, separados por vírgula.
        #[arg(long, value_delimiter = ',')]
        sizes: Option<Vec<u32>>,

        /// Diretório onde as versões são gravadas.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}
