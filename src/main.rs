use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use grove_forest::{Data, Forest, ForestError, ForestOptions, ForestPredictor, ForestTrainer};
use grove_io::{DataReader, PredictionWriter};

#[derive(Parser)]
#[command(name = "grove")]
#[command(about = "Honest random forests for regression, causal, instrumental and quantile estimation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed for reproducibility
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of worker threads (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

/// Column roles, given by header name.
#[derive(Args, Debug, Clone)]
struct ColumnArgs {
    /// Outcome column
    #[arg(long)]
    outcome: String,

    /// Treatment column (causal and instrumental forests)
    #[arg(long)]
    treatment: Option<String>,

    /// Instrument column (instrumental forests)
    #[arg(long)]
    instrument: Option<String>,

    /// Sample weight column
    #[arg(long)]
    weight: Option<String>,

    /// Cluster id column; removed from the features and used for cluster sampling
    #[arg(long)]
    cluster: Option<String>,
}

/// Forest flavor and its parameters.
#[derive(Args, Debug, Clone)]
struct KindArgs {
    /// Forest kind: "regression", "causal", "instrumental" or "quantile"
    #[arg(long, default_value = "regression")]
    kind: String,

    /// Quantile levels for quantile forests
    #[arg(long, value_delimiter = ',', default_values_t = [0.1, 0.5, 0.9])]
    quantiles: Vec<f64>,
}

/// Tree-growing parameters.
#[derive(Args, Debug, Clone)]
struct TrainingArgs {
    /// Number of trees
    #[arg(long, default_value_t = 2000)]
    num_trees: usize,

    /// Trees per CI group (1 disables variance estimates)
    #[arg(long, default_value_t = 2)]
    ci_group_size: usize,

    /// Fraction of clusters (or rows) drawn per tree
    #[arg(long, default_value_t = 0.5)]
    sample_fraction: f64,

    /// Candidate variables per split (defaults to min(ceil(sqrt(p)) + 20, p))
    #[arg(long)]
    mtry: Option<usize>,

    /// Target minimum number of samples per leaf
    #[arg(long, default_value_t = 5)]
    min_node_size: usize,

    /// Grow trees on the whole sample instead of an honest split
    #[arg(long, default_value_t = false)]
    no_honesty: bool,

    /// Fraction of each tree's sample used to choose splits
    #[arg(long, default_value_t = 0.5)]
    honesty_fraction: f64,

    /// Keep leaves left empty by honest repopulation
    #[arg(long, default_value_t = false)]
    keep_empty_leaves: bool,

    /// Minimum fraction of a node's samples on each side of a split
    #[arg(long, default_value_t = 0.05)]
    alpha: f64,

    /// Penalty on unbalanced splits
    #[arg(long, default_value_t = 0.0)]
    imbalance_penalty: f64,

    /// Rows drawn per sampled cluster (0 = smallest cluster size)
    #[arg(long, default_value_t = 0)]
    samples_per_cluster: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Train a forest on a CSV file and save it
    Train {
        /// Path to the training CSV file
        #[arg(long)]
        data: PathBuf,

        /// Path of the forest file to write
        #[arg(long)]
        output: PathBuf,

        #[command(flatten)]
        columns: ColumnArgs,

        #[command(flatten)]
        kind: KindArgs,

        #[command(flatten)]
        training: TrainingArgs,
    },

    /// Predict with a saved forest and write predictions as CSV
    Predict {
        /// Path to the forest file
        #[arg(long)]
        model: PathBuf,

        /// Path to the CSV file the forest was trained on
        #[arg(long)]
        train: PathBuf,

        /// Path to the CSV file to predict (defaults to the training file)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Predict each training row with only the trees that did not draw it
        #[arg(long, default_value_t = false)]
        oob: bool,

        /// Also estimate the variance of each prediction
        #[arg(long, default_value_t = false)]
        variance: bool,

        /// Path of the prediction CSV to write
        #[arg(long)]
        output: PathBuf,

        #[command(flatten)]
        columns: ColumnArgs,

        #[command(flatten)]
        kind: KindArgs,
    },

    /// Merge several saved forests into one
    Merge {
        /// Forest files to merge, in order
        #[arg(long, num_args = 1.., required = true)]
        models: Vec<PathBuf>,

        /// Path of the merged forest file to write
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Serialize)]
struct TrainOutput {
    kind: String,
    n_rows: usize,
    n_variables: usize,
    n_trees: usize,
    ci_group_size: usize,
    model: PathBuf,
}

#[derive(Serialize)]
struct PredictOutput {
    kind: String,
    n_rows: usize,
    n_undefined: usize,
    oob: bool,
    variance: bool,
    output: PathBuf,
}

#[derive(Serialize)]
struct MergeOutput {
    n_forests: usize,
    n_trees: usize,
    model: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForestKind {
    Regression,
    Causal,
    Instrumental,
    Quantile,
}

fn parse_forest_kind(s: &str) -> Result<ForestKind> {
    match s {
        "regression" => Ok(ForestKind::Regression),
        "causal" => Ok(ForestKind::Causal),
        "instrumental" => Ok(ForestKind::Instrumental),
        "quantile" => Ok(ForestKind::Quantile),
        other => anyhow::bail!(
            "unknown forest kind: {other} (expected regression, causal, instrumental, or quantile)"
        ),
    }
}

/// Read a CSV and apply column roles.
///
/// With `strict`, every named column must exist; otherwise absent columns
/// are skipped, which lets prediction files omit the outcome.
fn load_data(path: &Path, columns: &ColumnArgs, strict: bool) -> Result<(Data, Vec<usize>)> {
    let mut dataset = DataReader::new(path)
        .read_dataset()
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut clusters = Vec::new();
    if let Some(name) = &columns.cluster
        && (strict || dataset.column_index(name).is_ok())
    {
        let values = dataset.remove_column(name)?;
        clusters = values
            .into_iter()
            .enumerate()
            .map(|(row, v)| {
                if v.is_finite() && v >= 0.0 && v.fract() == 0.0 {
                    Ok(v as usize)
                } else {
                    anyhow::bail!("cluster id in row {row} must be a non-negative integer, got {v}")
                }
            })
            .collect::<Result<Vec<usize>>>()?;
    }

    type SetRole = fn(&mut Data, usize) -> Result<(), ForestError>;
    let roles: [(Option<&String>, SetRole); 4] = [
        (Some(&columns.outcome), Data::set_outcome_index),
        (columns.treatment.as_ref(), Data::set_treatment_index),
        (columns.instrument.as_ref(), Data::set_instrument_index),
        (columns.weight.as_ref(), Data::set_weight_index),
    ];
    for (name, set) in roles {
        let Some(name) = name else { continue };
        match dataset.column_index(name) {
            Ok(index) => set(dataset.data_mut(), index)?,
            Err(e) if strict => return Err(e.into()),
            Err(_) => {}
        }
    }

    Ok((dataset.into_data(), clusters))
}

fn build_predictor(kind: &KindArgs, num_threads: usize) -> Result<ForestPredictor> {
    Ok(match parse_forest_kind(&kind.kind)? {
        ForestKind::Regression => ForestPredictor::regression(num_threads),
        ForestKind::Causal => ForestPredictor::causal(num_threads),
        ForestKind::Instrumental => ForestPredictor::instrumental(num_threads),
        ForestKind::Quantile => ForestPredictor::quantile(kind.quantiles.clone(), num_threads)?,
    })
}

fn build_trainer(kind: &KindArgs) -> Result<ForestTrainer> {
    Ok(match parse_forest_kind(&kind.kind)? {
        ForestKind::Regression => ForestTrainer::regression(),
        ForestKind::Causal => ForestTrainer::causal(),
        ForestKind::Instrumental => ForestTrainer::instrumental(),
        ForestKind::Quantile => ForestTrainer::quantile(kind.quantiles.clone())?,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let num_threads = cli.threads.unwrap_or(0);

    match cli.command {
        Command::Train {
            data,
            output,
            columns,
            kind,
            training,
        } => {
            let trainer = build_trainer(&kind)?;
            let (train_data, clusters) = load_data(&data, &columns, true)?;

            let mut options = ForestOptions::new(training.num_trees)?
                .with_ci_group_size(training.ci_group_size)
                .with_sample_fraction(training.sample_fraction)
                .with_min_node_size(training.min_node_size)
                .with_honesty(!training.no_honesty)
                .with_honesty_fraction(training.honesty_fraction)
                .with_honesty_prune_leaves(!training.keep_empty_leaves)
                .with_alpha(training.alpha)
                .with_imbalance_penalty(training.imbalance_penalty)
                .with_num_threads(num_threads)
                .with_seed(cli.seed)
                .with_clusters(clusters, training.samples_per_cluster);
            if let Some(mtry) = training.mtry {
                options = options.with_mtry(mtry);
            }

            let forest = trainer
                .train(&train_data, &options)
                .context("training failed")?;
            forest.save(&output).context("failed to save forest")?;
            info!(path = %output.display(), "forest saved");

            let summary = TrainOutput {
                kind: kind.kind,
                n_rows: train_data.num_rows(),
                n_variables: forest.num_variables(),
                n_trees: forest.num_trees(),
                ci_group_size: forest.ci_group_size(),
                model: output,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Predict {
            model,
            train,
            data,
            oob,
            variance,
            output,
            columns,
            kind,
        } => {
            let predictor = build_predictor(&kind, num_threads)?;
            let forest = Forest::load(&model).context("failed to load forest")?;
            info!(
                n_trees = forest.num_trees(),
                num_variables = forest.num_variables(),
                ci_group_size = forest.ci_group_size(),
                "forest loaded"
            );

            let (train_data, _) = load_data(&train, &columns, true)?;
            let predictions = if oob {
                if data.is_some() {
                    anyhow::bail!("--oob predicts the training rows; drop --data");
                }
                predictor.predict_oob(&forest, &train_data, variance)
            } else {
                match &data {
                    Some(path) => {
                        let (test_data, _) = load_data(path, &columns, false)?;
                        predictor.predict(&forest, &train_data, &test_data, variance)
                    }
                    None => predictor.predict(&forest, &train_data, &train_data, variance),
                }
            }
            .context("prediction failed")?;

            PredictionWriter::new(&output).write(&predictions)?;

            let summary = PredictOutput {
                kind: kind.kind,
                n_rows: predictions.len(),
                n_undefined: predictions.iter().filter(|p| p.is_undefined()).count(),
                oob,
                variance,
                output,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Merge { models, output } => {
            let forests = models
                .iter()
                .map(|path| {
                    Forest::load(path).with_context(|| format!("failed to load {}", path.display()))
                })
                .collect::<Result<Vec<Forest>>>()?;

            let merged = Forest::merge(&forests).context("merge failed")?;
            merged.save(&output).context("failed to save merged forest")?;

            let summary = MergeOutput {
                n_forests: forests.len(),
                n_trees: merged.num_trees(),
                model: output,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
