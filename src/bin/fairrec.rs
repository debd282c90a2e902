//! Run experiments described by a JSON config.
//!
//! Each listed regularization weight is an independent run of the same
//! configuration with its own artifacts.
extern crate env_logger;
extern crate fairrec;
extern crate failure;
#[macro_use]
extern crate log;
extern crate serde_json;

use std::path::PathBuf;
use std::process;

use clap::Parser;

use fairrec::config::ExperimentConfig;
use fairrec::pipeline;

#[derive(Debug, Parser)]
#[command(
    name = "fairrec",
    version,
    about = "Provider-fairness experiments for implicit-feedback recommenders"
)]
struct Cli {
    /// Experiment configuration (JSON)
    config: PathBuf,

    /// Regularization weights to sweep; each one is a separate run
    #[arg(value_name = "WEIGHT")]
    regularization_weights: Vec<f32>,
}

impl Cli {
    fn configs(&self) -> Result<Vec<ExperimentConfig>, failure::Error> {
        let config = ExperimentConfig::from_path(&self.config)?;

        if self.regularization_weights.is_empty() {
            return Ok(vec![config]);
        }

        Ok(self
            .regularization_weights
            .iter()
            .map(|&weight| {
                let mut config = config.clone();
                config.model = config.model.regularization_weight(weight);
                config
            })
            .collect())
    }
}

fn run(cli: &Cli) -> Result<(), failure::Error> {
    for config in &cli.configs()? {
        config.validate()?;
        info!("Running {}", config.artifact_key());

        let report = pipeline::run(config)?;

        let mut summary = serde_json::Map::new();
        summary.insert("key".to_owned(), serde_json::to_value(&report.key)?);
        summary.insert("loss".to_owned(), serde_json::to_value(report.loss)?);
        summary.insert("metrics".to_owned(), serde_json::to_value(report.metrics.summary())?);
        if let Some(metrics) = report.reranked_metrics.as_ref() {
            summary.insert("reranked".to_owned(), serde_json::to_value(metrics.summary())?);
        }

        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    if let Err(error) = run(&cli) {
        error!("{}", error);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_and_weights() {
        let cli = Cli::try_parse_from(["fairrec", "ml1m.json", "0", "0.5", "1e-2"]).unwrap();

        assert_eq!(cli.config, PathBuf::from("ml1m.json"));
        assert_eq!(cli.regularization_weights, vec![0.0, 0.5, 0.01]);
    }

    #[test]
    fn weights_are_optional() {
        let cli = Cli::try_parse_from(["fairrec", "ml1m.json"]).unwrap();

        assert!(cli.regularization_weights.is_empty());
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Cli::try_parse_from(["fairrec"]).is_err());
        assert!(Cli::try_parse_from(["fairrec", "ml1m.json", "heavy"]).is_err());
    }
}
