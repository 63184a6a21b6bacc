//! ecr-admission CLI entry point.
//!
//! Provides `review`, `images`, and `check` subcommands for answering an
//! AdmissionReview, listing a review's managed-registry images, or checking
//! image URIs directly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, warn};

use ecr_admission::admission::AdmissionController;
use ecr_admission::config::Config;
use ecr_admission::registry::filter::RegistryFilter;
use ecr_admission::webhook::{AdmissionReview, Webhook, WorkloadDecoders};

/// ecr-admission: ECR repository compliance admission webhook.
#[derive(Parser)]
#[command(name = "ecr-admission", version, about)]
struct Cli {
    /// Config file (default: $ECR_ADMISSION_CONFIG or ./ecr-admission.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Answer an AdmissionReview read from a file or stdin.
    Review {
        /// Review file; reads stdin when omitted.
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// List the managed-registry images referenced by an AdmissionReview.
    Images {
        /// Review file; reads stdin when omitted.
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Check fully-qualified image URIs against the compliance policy.
    Check {
        /// Image URIs, e.g. 123456789012.dkr.ecr.us-east-1.amazonaws.com/repo:tag.
        #[arg(required = true)]
        images: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: failed to load .env: {e}");
        }
    }

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let _logging_guard = ecr_admission::logging::init(&config.logging);
    debug!(?config, "configuration loaded");

    match cli.command {
        Command::Review { input } => handle_review(&config, input.as_deref()).await,
        Command::Images { input } => handle_images(&config, input.as_deref()),
        Command::Check { images } => handle_check(&config, &images).await,
    }
}

/// Read a review body from `input`, or stdin when absent.
fn read_input(input: Option<&Path>) -> anyhow::Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("failed to read stdin")?;
            Ok(body)
        }
    }
}

/// Answer one review and print the response review.
async fn handle_review(config: &Config, input: Option<&Path>) -> anyhow::Result<ExitCode> {
    let body = read_input(input)?;
    let controller = AdmissionController::from_config(config)?;
    let webhook = Webhook::new(controller, WorkloadDecoders::with_defaults());

    let response = webhook
        .review_json(&body)
        .await
        .context("failed to serialize admission response")?;
    println!("{response}");
    Ok(ExitCode::SUCCESS)
}

/// Print the managed-registry images of a review, one per line.
fn handle_images(config: &Config, input: Option<&Path>) -> anyhow::Result<ExitCode> {
    let body = read_input(input)?;
    let review: AdmissionReview =
        serde_json::from_str(&body).context("failed to parse admission review")?;
    let request = review
        .request
        .as_ref()
        .context("admission review has no request")?;

    let workload = WorkloadDecoders::with_defaults().decode(request)?;
    let filter = RegistryFilter::with_allowed_accounts(config.registry.allowed_accounts.clone())?;
    for image in filter.filter(&workload.images) {
        println!("{image}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Evaluate image URIs and print one line per image plus the verdict.
async fn handle_check(config: &Config, images: &[String]) -> anyhow::Result<ExitCode> {
    let controller = AdmissionController::from_config(config)?;

    let managed = controller.filter().filter(images);
    for image in images {
        if controller.filter().managed_path(image).is_none() {
            warn!(image = %image, "not a managed registry image, skipping");
            println!("SKIP  {image}");
        }
    }

    match controller.evaluate(&managed).await {
        Ok(verdict) => {
            for result in &verdict.results {
                match &result.reason {
                    None => println!("PASS  {}", result.image),
                    Some(reason) => println!("FAIL  {}: {reason}", result.image),
                }
            }
            if verdict.compliant {
                println!("compliant");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("not compliant");
                Ok(ExitCode::from(1))
            }
        }
        Err(e) => {
            println!("error: {e}");
            Ok(ExitCode::from(2))
        }
    }
}
