//! DenseNet Defect Classification CLI
//!
//! Entry point for splitting raw defect folders into label lists, training
//! DenseNet-BC with the Burn framework and evaluating checkpoints.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use densenet_defects::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use densenet_defects::dataset::{split_dataset, ClassMap, LabelListDataset};
use densenet_defects::training::{self, prepare_save_dir, EvaluationConfig, LATEST_WEIGHTS};
use densenet_defects::utils::format_duration;
use densenet_defects::utils::logging::{init_logging, LogConfig};
use densenet_defects::AppConfig;

/// DenseNet-BC Surface Defect Classification
///
/// Trains and evaluates DenseNet-BC classifiers on folder-organized
/// defect image datasets using the Burn framework.
#[derive(Parser, Debug)]
#[command(name = "densenet_defects")]
#[command(version)]
#[command(about = "DenseNet-BC defect classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false")]
    quiet: bool,

    /// TOML configuration file; command-line flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write train/validation label lists from a raw image tree
    Split {
        /// Root of the raw dataset
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Output training list
        #[arg(long)]
        train_out: Option<PathBuf>,

        /// Output validation list
        #[arg(long)]
        val_out: Option<PathBuf>,

        /// Fraction of every class moved to the validation list
        #[arg(long)]
        val_fraction: Option<f64>,

        /// Random seed for the per-class sampling
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Train a DenseNet-BC on a label list
    Train {
        /// Label list to train on
        #[arg(short, long)]
        list: Option<PathBuf>,

        /// Directory for weights and results.csv
        #[arg(short, long)]
        save: Option<PathBuf>,

        /// Network depth ((depth - 4) divisible by 3)
        #[arg(long)]
        depth: Option<usize>,

        /// Channels added per dense layer
        #[arg(long)]
        growth_rate: Option<usize>,

        /// Samples held out for validation (0 disables)
        #[arg(long)]
        valid_size: Option<usize>,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for training
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Initial learning rate
        #[arg(long)]
        lr: Option<f64>,

        /// Number of output classes
        #[arg(long)]
        num_classes: Option<usize>,

        /// Use the 3x3 stem for small images
        #[arg(long, default_value = "false")]
        small_inputs: bool,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        /// Label list evaluated once after training
        #[arg(long)]
        test_list: Option<PathBuf>,
    },

    /// Evaluate saved weights on a label list
    Evaluate {
        /// Directory written by `train`
        #[arg(long)]
        checkpoint_dir: PathBuf,

        /// Label list to evaluate
        #[arg(short, long)]
        list: PathBuf,

        /// Weights name (model_para or model_best)
        #[arg(short, long, default_value = LATEST_WEIGHTS)]
        weights: String,

        /// Batch size for evaluation
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Append the test error row to results.csv
        #[arg(long, default_value = "false")]
        append_results: bool,
    },

    /// Show per-class counts of a label list
    Stats {
        /// Label list to inspect
        #[arg(short, long)]
        list: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    let mut config = AppConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Split {
            data_dir,
            train_out,
            val_out,
            val_fraction,
            seed,
        } => {
            if let Some(path) = train_out {
                config.split.train_out = path;
            }
            if let Some(path) = val_out {
                config.split.val_out = path;
            }
            if let Some(fraction) = val_fraction {
                config.split.val_fraction = fraction;
            }
            if let Some(seed) = seed {
                config.split.seed = seed;
            }
            cmd_split(&data_dir, &config)?;
        }

        Commands::Train {
            list,
            save,
            depth,
            growth_rate,
            valid_size,
            epochs,
            batch_size,
            lr,
            num_classes,
            small_inputs,
            seed,
            test_list,
        } => {
            let training = &mut config.training;
            if let Some(list) = list {
                training.train_list = list;
            }
            if let Some(save) = save {
                training.save_dir = save;
            }
            if let Some(valid_size) = valid_size {
                training.valid_size = valid_size;
            }
            if let Some(epochs) = epochs {
                training.n_epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                training.batch_size = batch_size;
            }
            if let Some(lr) = lr {
                training.lr = lr;
            }
            if seed.is_some() {
                training.seed = seed;
            }
            if test_list.is_some() {
                training.test_list = test_list;
            }

            let model = &mut config.model;
            if let Some(depth) = depth {
                model.depth = depth;
            }
            if let Some(growth_rate) = growth_rate {
                model.growth_rate = growth_rate;
            }
            if let Some(num_classes) = num_classes {
                model.num_classes = num_classes;
            }
            model.small_inputs |= small_inputs;

            cmd_train(&config)?;
        }

        Commands::Evaluate {
            checkpoint_dir,
            list,
            weights,
            batch_size,
            append_results,
        } => {
            let eval_config = EvaluationConfig {
                checkpoint_dir,
                weights,
                list,
                batch_size: batch_size.unwrap_or(config.training.batch_size),
                num_workers: config.training.num_workers,
                print_freq: config.training.print_freq,
                append_results,
            };
            cmd_evaluate(&eval_config, &config)?;
        }

        Commands::Stats { list } => {
            cmd_stats(&list, &config)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +------------------------------------------------------------+
 |   DenseNet-BC Surface Defect Classification                |
 |   Training and evaluation with Burn + Rust                 |
 +------------------------------------------------------------+
  "#
        .green()
    );
}

fn cmd_split(data_dir: &Path, config: &AppConfig) -> Result<()> {
    info!("Splitting raw dataset at: {:?}", data_dir);

    let summary = split_dataset(data_dir, &config.split)
        .with_context(|| format!("Failed to split {}", data_dir.display()))?;

    println!("{}", "Label lists written:".cyan().bold());
    println!("  Train: {:?}", config.split.train_out);
    println!("  Val:   {:?}", config.split.val_out);
    println!();
    print!("{summary}");
    for folder in &summary.skipped_folders {
        println!("  {} no class rule for {:?}", "Skipped:".yellow(), folder);
    }

    Ok(())
}

fn cmd_train(config: &AppConfig) -> Result<()> {
    let training = &config.training;
    prepare_save_dir(&training.save_dir)?;

    let model_config = config
        .model
        .to_densenet_config()
        .context("Invalid model configuration")?;

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Backend:         {}", backend_name());
    println!("  Label list:      {:?}", training.train_list);
    println!("  Save dir:        {:?}", training.save_dir);
    println!("  Depth:           {}", model_config.depth());
    println!("  Growth rate:     {}", model_config.growth_rate);
    println!("  Classes:         {}", model_config.num_classes);
    println!("  Epochs:          {}", training.n_epochs);
    println!("  Batch size:      {}", training.batch_size);
    println!("  Learning rate:   {}", training.lr);
    println!("  Validation size: {}", training.valid_size);
    println!();

    println!("{}", "Starting Training...".green().bold());
    let device = default_device();
    let started = std::time::Instant::now();
    let report = training::train::<TrainingBackend>(training, &model_config, &config.transform, &device)?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  Parameters:        {}", report.num_parameters);
    println!("  Seed:              {}", report.seed);
    match report.best_epoch {
        Some(epoch) => println!(
            "  Best valid error:  {:.4} (epoch {})",
            report.best_error, epoch
        ),
        None => println!("  Best valid error:  n/a (no validation subset)"),
    }
    if let Some(test_error) = report.test_error {
        println!("  Test error:        {:.4}", test_error);
    }
    println!("  Duration:          {}", format_duration(started.elapsed().as_secs_f64()));
    println!("  Results:           {:?}", report.save_dir.join("results.csv"));
    println!();
    println!("Done!");

    Ok(())
}

fn cmd_evaluate(eval_config: &EvaluationConfig, config: &AppConfig) -> Result<()> {
    let device = default_device();
    let report = training::evaluate::<DefaultBackend>(eval_config, &config.transform, &device)
        .with_context(|| format!("Failed to evaluate {:?}", eval_config.checkpoint_dir))?;

    let names = ClassMap::new(config.split.classes.clone()).names();

    println!();
    println!("{}", "Evaluation Results:".cyan().bold());
    println!("  Samples:   {}", report.num_samples);
    println!("  Loss:      {:.4}", report.loss);
    println!("  Error:     {:.4}", report.error);
    println!("  Accuracy:  {:.2}%", report.accuracy() * 100.0);
    println!();
    println!("{}", "Per-class accuracy:".cyan());
    print!("{}", report.confusion.per_class_report(&names));

    Ok(())
}

fn cmd_stats(list: &Path, config: &AppConfig) -> Result<()> {
    info!("Computing label list statistics for: {:?}", list);

    let dataset = LabelListDataset::from_file(list)
        .with_context(|| format!("Failed to read {}", list.display()))?;
    let names = ClassMap::new(config.split.classes.clone()).names();
    let distribution = dataset.class_distribution();
    let total: usize = distribution.iter().sum();

    println!("{}", "Label list statistics:".cyan().bold());
    println!("  Entries: {}", total);
    println!("  Classes: {}", distribution.iter().filter(|&&c| c > 0).count());
    println!();
    for (label, count) in distribution.iter().enumerate() {
        let name = names.get(label).map(String::as_str).unwrap_or("unknown");
        let pct = if total > 0 {
            100.0 * *count as f64 / total as f64
        } else {
            0.0
        };
        println!("  {:>3}. {:12} {:>7}  ({:>5.1}%)", label, name, count, pct);
    }

    Ok(())
}
