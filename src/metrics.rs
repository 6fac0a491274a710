//! Métricas Prometheus opcionais, atrás da feature `metrics`.
//!
//! Espelha `beagle-hypergraph::metrics::prometheus::Metrics`: um `Registry`
//! próprio, contadores/histogramas registrados uma única vez em `new`, e um
//! `gather()` que serializa no formato de texto Prometheus/OpenMetrics.

#![allow(dead_code)]

use std::time::Duration;

use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus registration failed: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("metrics encoding failed: {0}")]
    Encoding(#[from] std::io::Error),
    #[error("metrics output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Métricas operacionais do motor de roteamento: latência de pontuação,
/// perda de treino, contagem de cabeças instáveis, e acertos/erros do cache
/// espectral.
pub struct Metrics {
    registry: Registry,
    /// Latência de `scoreCapabilities`/`scoreTools`, em segundos.
    pub scoring_duration: Histogram,
    /// Total acumulado de épocas de treino concluídas.
    pub training_epochs: Counter,
    /// Última perda final reportada por `train` (exposta como contador
    /// cumulativo de perda somada — só `Counter`/`Histogram`, nunca um
    /// `Gauge` mutável livremente).
    pub training_loss_total: Counter,
    /// Total acumulado de cabeças SHGAT que produziram um valor não-finito
    /// e foram substituídas por zero (`ScorerStats::unstable_head`).
    pub unstable_heads_total: Counter,
    /// Acertos do cache espectral (`SpectralCache::restore_if_valid`).
    pub spectral_cache_hits: Counter,
    /// Reconstruções completas do cache espectral.
    pub spectral_cache_misses: Counter,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Result<Self, MetricsError> {
        let scoring_duration_opts = HistogramOpts::new(
            "caprouter_scoring_duration_seconds",
            "Distribution of scoreCapabilities/scoreTools latency",
        )
        .buckets(vec![
            0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
        ]);
        let scoring_duration = Histogram::with_opts(scoring_duration_opts)?;
        registry.register(Box::new(scoring_duration.clone()))?;

        let training_epochs = Counter::with_opts(Opts::new(
            "caprouter_training_epochs_total",
            "Total training epochs completed across all train() calls",
        ))?;
        registry.register(Box::new(training_epochs.clone()))?;

        let training_loss_total = Counter::with_opts(Opts::new(
            "caprouter_training_loss_sum",
            "Cumulative sum of the final loss reported at the end of each epoch",
        ))?;
        registry.register(Box::new(training_loss_total.clone()))?;

        let unstable_heads_total = Counter::with_opts(Opts::new(
            "caprouter_unstable_heads_total",
            "SHGAT head evaluations that produced a non-finite value and were zeroed",
        ))?;
        registry.register(Box::new(unstable_heads_total.clone()))?;

        let spectral_cache_hits = Counter::with_opts(Opts::new(
            "caprouter_spectral_cache_hits_total",
            "Spectral recompute calls served from the content-hash cache",
        ))?;
        registry.register(Box::new(spectral_cache_hits.clone()))?;

        let spectral_cache_misses = Counter::with_opts(Opts::new(
            "caprouter_spectral_cache_misses_total",
            "Spectral recompute calls that rebuilt the Laplacian/PageRank snapshot",
        ))?;
        registry.register(Box::new(spectral_cache_misses.clone()))?;

        Ok(Self {
            registry: registry.clone(),
            scoring_duration,
            training_epochs,
            training_loss_total,
            unstable_heads_total,
            spectral_cache_hits,
            spectral_cache_misses,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observe_scoring(&self, duration: Duration) {
        self.scoring_duration.observe(duration.as_secs_f64());
    }

    pub fn observe_training_epoch(&self, loss: f64) {
        self.training_epochs.inc();
        if loss.is_finite() {
            self.training_loss_total.inc_by(loss);
        }
    }

    pub fn add_unstable_heads(&self, count: u64) {
        if count > 0 {
            self.unstable_heads_total.inc_by(count as f64);
        }
    }

    pub fn record_cache_hit(&self) {
        self.spectral_cache_hits.inc();
    }

    pub fn record_cache_miss(&self) {
        self.spectral_cache_misses.inc();
    }

    /// Serializa as métricas atuais no formato de texto Prometheus.
    pub fn gather(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_are_registered_and_serialized() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).expect("metrics registration must succeed");

        metrics.observe_scoring(Duration::from_millis(5));
        metrics.observe_training_epoch(0.42);
        metrics.add_unstable_heads(3);
        metrics.record_cache_hit();
        metrics.record_cache_miss();

        let output = metrics.gather().expect("serialization must produce text");
        assert!(output.contains("caprouter_scoring_duration_seconds_bucket"));
        assert!(output.contains("caprouter_training_epochs_total"));
        assert!(output.contains("caprouter_unstable_heads_total"));
        assert!(output.contains("caprouter_spectral_cache_hits_total"));
        assert!(output.contains("caprouter_spectral_cache_misses_total"));
    }

    #[test]
    fn observe_training_epoch_ignores_non_finite_loss() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).unwrap();
        metrics.observe_training_epoch(f64::NAN);
        assert_eq!(metrics.training_loss_total.get(), 0.0);
        assert_eq!(metrics.training_epochs.get(), 1.0);
    }
}
