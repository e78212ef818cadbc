//! Configuração do simwatch carregada a partir de `simwatch.toml`.
//!
//! A struct [`SimwatchConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `SIMWATCH_MAX_PARALLEL` tem precedência sobre o arquivo.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

/// Configuração de nível superior carregada de `simwatch.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct SimwatchConfig {
    /// Intervalo em milissegundos entre varreduras da saída de um job.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Máximo de jobs externos executando simultaneamente num fan-out.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Tamanho máximo em bytes do trecho de saída anexado a falhas.
    #[serde(default = "default_output_excerpt_bytes")]
    pub output_excerpt_bytes: usize,
}

// Valor padrão para o intervalo de varredura: 2000ms.
fn default_poll_interval_ms() -> u64 {
    2000
}

// Valor padrão para o paralelismo máximo: 4.
fn default_max_parallel() -> usize {
    4
}

// Valor padrão para o trecho de saída: 1024 bytes.
fn default_output_excerpt_bytes() -> usize {
    1024
}

impl Default for SimwatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_parallel: default_max_parallel(),
            output_excerpt_bytes: default_output_excerpt_bytes(),
        }
    }
}

impl SimwatchConfig {
    /// Carrega a configuração de `simwatch.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        let path = Path::new("simwatch.toml");
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<SimwatchConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(value) = std::env::var("SIMWATCH_MAX_PARALLEL")
            && let Ok(parsed) = value.parse::<usize>()
            && parsed > 0
        {
            config.max_parallel = parsed;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = SimwatchConfig::default();
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.output_excerpt_bytes, 1024);
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            poll_interval_ms = 250
            max_parallel = 16
        "#;
        let config: SimwatchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.max_parallel, 16);
        assert_eq!(config.output_excerpt_bytes, 1024);
    }

    #[test]
    fn load_falls_back_to_defaults() {
        // No ambiente de teste, tipicamente não há simwatch.toml no diretório de trabalho.
        let config = SimwatchConfig::load().unwrap();
        assert_eq!(config.poll_interval_ms, 2000);
    }
}
