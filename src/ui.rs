//! Interface de terminal do pixbatch: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! estilização com cores. O [`BatchProgress`] é um [`ProgressSink`] que
//! acompanha visualmente um lote no terminal: uma linha por item concluído
//! e o contador `concluídos/total`.

use std::fmt::Display;
use std::sync::Arc;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::engine::{BatchError, BatchSummary, Outcome, ProgressEvent, ProgressSink};
use crate::error::PixbatchError;

/// Indicador visual de progresso para a execução de um lote no terminal.
///
/// Exibe uma barra com o número de itens concluídos e mensagens
/// coloridas para sucesso (verde) e falha (vermelho).
#[derive(Clone)]
pub struct BatchProgress {
    // Barra de progresso do indicatif.
    pb: ProgressBar,
    // Rótulo legível de cada item, indexado pela posição no lote.
    labels: Arc<Vec<String>>,
    green: Style,
    red: Style,
    yellow: Style,
}

impl BatchProgress {
    /// Inicia a barra com o título do lote e os rótulos dos itens.
    pub fn start(title: &str, labels: Vec<String>) -> Self {
        let pb = ProgressBar::new(labels.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} {msg} [{bar:30.cyan/blue}] {pos}/{len}")
                .expect("invalid template")
                .progress_chars("=> "),
        );
        pb.set_message(title.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            labels: Arc::new(labels),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    fn label<'a>(&'a self, event_index: usize, fallback: &'a str) -> &'a str {
        self.labels
            .get(event_index)
            .map(String::as_str)
            .unwrap_or(fallback)
    }

    /// Finaliza a barra e imprime o resumo do lote.
    pub fn finish<T>(&self, summary: &BatchSummary<T>) {
        self.pb.finish_and_clear();
        let style = if summary.is_clean() { &self.green } else { &self.yellow };
        println!(
            "  {} {} succeeded, {} failed, {} total ({} ms)",
            style.apply_to("■"),
            summary.succeeded,
            summary.failed,
            summary.total,
            summary.duration_ms
        );
    }

    /// Finaliza a barra e imprime o motivo do cancelamento do lote.
    pub fn abort(&self, err: &BatchError) {
        self.pb.finish_and_clear();
        println!("  {} {err}", self.red.apply_to("✗"));
    }
}

impl<T: Display> ProgressSink<T> for BatchProgress {
    fn on_settled(&self, event: &ProgressEvent<'_, T>) {
        let label = self.label(event.index, event.item_id);
        match event.outcome {
            Outcome::Success { value } => {
                self.pb
                    .println(format!("  {} {label}: {value}", self.green.apply_to("✓")));
            }
            Outcome::Failure(failure) => {
                self.pb
                    .println(format!("  {} {label}: {failure}", self.red.apply_to("✗")));
            }
        }
        self.pb.set_position(event.settled as u64);
    }
}

/// Imprime o resumo formatado em JSON com estilo colorido.
pub fn print_json<T: Serialize>(summary: &BatchSummary<T>) -> Result<(), PixbatchError> {
    let rendered = serde_json::to_string_pretty(summary)?;
    let style = if summary.is_clean() {
        Style::new().green()
    } else {
        Style::new().yellow()
    };
    println!();
    println!("{}", style.apply_to("─── Batch Summary ───"));
    println!("{rendered}");
    Ok(())
}
