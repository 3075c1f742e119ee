#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use ndarray::Array1;
use std::fs;
use std::process;

use simple_logit::{FitConfig, TrainedModel, analyze, load_dataset};

#[derive(Args)]
pub struct FitArgs {
    /// Path to a TSV file: label column first, regressor columns after it
    pub data: String,

    /// Regressor values to predict for, comma separated, in column order
    #[arg(long, value_name = "V1,V2,...", value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub predict: Vec<f64>,

    /// Where to write the fitted model
    #[arg(long, default_value = "model.toml")]
    pub model_out: String,

    /// Optional path for the diagnostics as TOML
    #[arg(long)]
    pub report_out: Option<String>,

    /// Stop once the largest coefficient change falls below this value
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Maximum number of IRLS iterations
    #[arg(long, default_value = "100")]
    pub max_iterations: usize,
}

#[derive(Args)]
pub struct PredictArgs {
    /// Path to a model file written by `fit`
    #[arg(long)]
    pub model: String,

    /// Regressor values, comma separated, in the model's column order
    #[arg(value_name = "V1,V2,...", value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub values: Vec<f64>,
}

#[derive(Parser)]
#[command(
    name = "simple-logit",
    about = "Binary logistic regression with Wald, likelihood-ratio and delta-method diagnostics",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a model, print its diagnostics and predict for one input
    #[command(about = "Fit a logit model (outputs: model.toml)")]
    Fit(FitArgs),

    /// Predict with a previously saved model
    #[command(about = "Predict with a saved model")]
    Predict(PredictArgs),
}

pub fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = load_dataset(&args.data)?;
    let config = FitConfig {
        convergence_tolerance: args.tolerance,
        max_iterations: args.max_iterations,
    };

    let x = Array1::from(args.predict);
    let analysis = analyze(&dataset, x.view(), &config)?;

    println!("{}", analysis.diagnostics);
    println!("Decision: {}", analysis.decision);

    analysis.trained.save(&args.model_out)?;
    println!("Model saved to: {}", args.model_out);

    if let Some(path) = args.report_out {
        fs::write(&path, toml::to_string_pretty(&analysis.diagnostics)?)?;
        println!("Diagnostics saved to: {path}");
    }
    Ok(())
}

pub fn predict(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    let model = TrainedModel::load(&args.model)?;
    let x = Array1::from(args.values);
    let prediction = model.predict(x.view())?;

    println!("Probability: {:.6}", prediction.probability);
    println!("Decision: {}", prediction.decision);
    println!("Standard Error: {:.6}", prediction.std_error);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();

    let result = match command {
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Predict(args)) => predict(args),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
