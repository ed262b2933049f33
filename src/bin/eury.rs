//! Eury CLI - train, watch and test models on a remote training backend
//!
//! Usage:
//!   eury <COMMAND> [OPTIONS]
//!
//! Example:
//!   eury train -m bert-base-uncased -d ag_news --method traditional
//!   eury predict -m bert-base-uncased -d ag_news --method traditional -t "Stocks rally"

use anyhow::{bail, Context, Result};
use colored::Colorize;
use eury::backend::{PredictOutcome, PredictRequest};
use eury::ingest::Ingested;
use eury::results::{ParsedResults, Verdict};
use eury::{
    Backend, ConsoleConfig, HttpBackend, RunOutcome, TrainRequest, TrainingMethod,
    TrainingSession,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn print_usage() {
    eprintln!(
        r#"
{} - Train and compare models on a remote training backend

{}
    eury <COMMAND> [OPTIONS]

{}
    train          Submit a training run and stream its output
    predict        Run inference with a trained model
    queue          Show the backend's GPU queue
    download       Download the most recently trained model
    profile        Show account details and credits
    add-credits    Add credits to the account

{}
    -m, --model <MODEL>         Model name (e.g. bert-base-uncased)
    -d, --dataset <DATASET>     Dataset name (e.g. ag_news)
    --method <METHOD>           dwl or traditional (default: dwl)
    --lr <RATE>                 Learning rate (default from config)
    --no-pretrained             Train from scratch (rejected by the backend today)
    --sample <TEXT>             Custom sample added to the test set
    --sample-label <N>          Class index of the custom sample
    -t, --text <TEXT>           Input text for predict
    -o, --output <FILE>         Destination for download (default: model.zip)
    --token <TOKEN>             Auth token (or set EURY_AUTH_TOKEN)
    --amount <AMOUNT>           Credits to add
    -c, --config <FILE>         Config file (TOML)
    -u, --backend-url <URL>     Backend URL (or set EURY_BACKEND_URL)
    -v, --verbose               Show debug logging
    -h, --help                  Print this help message

{}
    eury train -m distilbert-base-uncased -d imdb --method traditional
    eury train -m roberta-base -d ag_news --sample "Mars rover lands" --sample-label 3
    eury predict -m distilbert-base-uncased -d imdb --method traditional -t "Loved it"
    eury queue -u http://localhost:8000
"#,
        "Eury CLI".bold(),
        "USAGE:".bold(),
        "COMMANDS:".bold(),
        "OPTIONS:".bold(),
        "EXAMPLES:".bold(),
    );
}

struct CliArgs {
    command: String,
    model: Option<String>,
    dataset: Option<String>,
    method: TrainingMethod,
    learning_rate: Option<f64>,
    pretrained: bool,
    sample_text: Option<String>,
    sample_label: Option<u32>,
    text: Option<String>,
    output: PathBuf,
    token: Option<String>,
    amount: Option<f64>,
    config: Option<PathBuf>,
    backend_url: Option<String>,
    verbose: bool,
}

fn parse_args() -> Result<CliArgs> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        std::process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let mut cli = CliArgs {
        command: args[1].clone(),
        model: None,
        dataset: None,
        method: TrainingMethod::Primary,
        learning_rate: None,
        pretrained: true,
        sample_text: None,
        sample_label: None,
        text: None,
        output: PathBuf::from("model.zip"),
        token: std::env::var("EURY_AUTH_TOKEN").ok(),
        amount: None,
        config: None,
        backend_url: None,
        verbose: false,
    };

    let mut i = 2;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || -> Result<String> {
            i += 1;
            args.get(i)
                .cloned()
                .with_context(|| format!("Missing value for {}", flag))
        };

        match flag {
            "--model" | "-m" => cli.model = Some(value()?),
            "--dataset" | "-d" => cli.dataset = Some(value()?),
            "--method" => {
                cli.method = value()?
                    .parse::<TrainingMethod>()
                    .map_err(anyhow::Error::msg)?;
            }
            "--lr" => {
                let raw = value()?;
                cli.learning_rate = Some(
                    raw.parse()
                        .with_context(|| format!("Invalid learning rate: {}", raw))?,
                );
            }
            "--no-pretrained" => cli.pretrained = false,
            "--sample" => cli.sample_text = Some(value()?),
            "--sample-label" => {
                let raw = value()?;
                cli.sample_label = Some(
                    raw.parse()
                        .with_context(|| format!("Invalid class number: {}", raw))?,
                );
            }
            "--text" | "-t" => cli.text = Some(value()?),
            "--output" | "-o" => cli.output = PathBuf::from(value()?),
            "--token" => cli.token = Some(value()?),
            "--amount" => {
                let raw = value()?;
                cli.amount = Some(
                    raw.parse()
                        .with_context(|| format!("Invalid amount: {}", raw))?,
                );
            }
            "--config" | "-c" => cli.config = Some(PathBuf::from(value()?)),
            "--backend-url" | "-u" => cli.backend_url = Some(value()?),
            "--verbose" | "-v" => cli.verbose = true,
            other => {
                eprintln!("{} ignoring unknown option {}", "Warning:".yellow(), other);
            }
        }
        i += 1;
    }

    Ok(cli)
}

fn load_config(args: &CliArgs) -> Result<ConsoleConfig> {
    let mut config = match &args.config {
        Some(path) => ConsoleConfig::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => ConsoleConfig::default(),
    }
    .with_env_overrides();

    if let Some(url) = &args.backend_url {
        config.backend_url = url.clone();
    }
    Ok(config)
}

fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    match value {
        Some(v) => Ok(v.as_str()),
        None => bail!("--{} is required", name),
    }
}

fn print_header(request: &TrainRequest, backend_url: &str) {
    eprintln!();
    eprintln!(
        "{}",
        "╭──────────────────────────────────────────────────────────────╮".blue()
    );
    eprintln!("{}  {}", "│".blue(), "Eury Training Run".bold());
    eprintln!(
        "{}",
        "├──────────────────────────────────────────────────────────────┤".blue()
    );
    eprintln!("{}  {}  {}", "│".blue(), "Method: ".dimmed(), request.training_method);
    eprintln!("{}  {}  {}", "│".blue(), "Model:  ".dimmed(), request.model_name);
    eprintln!("{}  {}  {}", "│".blue(), "Dataset:".dimmed(), request.dataset_name);
    eprintln!("{}  {}  {}", "│".blue(), "LR:     ".dimmed(), request.learning_rate);
    eprintln!("{}  {}  {}", "│".blue(), "Backend:".dimmed(), backend_url);
    eprintln!(
        "{}",
        "╰──────────────────────────────────────────────────────────────╯".blue()
    );
    eprintln!();
}

fn print_item(item: &Ingested) {
    match item {
        Ingested::Log(line) => println!("{}", line.dimmed()),
        Ingested::Result(line) => println!("{}", line.cyan()),
        Ingested::Loss(sample) => eprintln!(
            "{} {:.4} {}",
            "  ▸ loss".yellow(),
            sample.value,
            format!("(+{:.1}s)", sample.elapsed_secs).dimmed()
        ),
        Ingested::Complete(line) => println!("{}", line.green().bold()),
    }
    let _ = std::io::stdout().flush();
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn print_results(outcome: &RunOutcome, parsed: &ParsedResults) {
    println!();
    println!("{}", "═══ Results ═══".bold());

    let series = &outcome.record.loss_series;
    if let (Some(first), Some(last)) = (series.first(), series.last()) {
        let total: f64 = series.iter().map(|s| s.elapsed_secs).sum();
        println!(
            "{} {} samples, {:.4} → {:.4} over {:.1}s",
            "Loss:".dimmed(),
            series.len(),
            first.value,
            last.value,
            total
        );
    }

    let s = &parsed.summary;
    if let Some(acc) = s.pretrained_accuracy {
        println!("{} {:.1}%", "Pretrained accuracy:".dimmed(), acc);
    }
    if let Some(acc) = s.fine_tuned_accuracy {
        println!("{} {:.1}%", "Fine-tuned accuracy:".dimmed(), acc);
    }
    if let Some(delta) = s.improvement {
        let text = format!("{:+.1}%", delta);
        let text = if delta >= 0.0 { text.green() } else { text.red() };
        println!("{} {}", "Improvement:".dimmed(), text);
    }
    if let (Some(changed), Some(total)) = (s.changed, s.total) {
        println!(
            "{} {}/{} ({:.1}%)",
            "Predictions changed:".dimmed(),
            changed,
            total,
            s.change_percentage.unwrap_or_default()
        );
    }

    if !parsed.rows.is_empty() {
        println!();
        println!(
            "{:<36} {:<14} {:<14} {:<14} {:<8} {}",
            "Text".bold(),
            "True".bold(),
            "Pretrained".bold(),
            "Fine-tuned".bold(),
            "Changed".bold(),
            "Verdict".bold()
        );
        for row in &parsed.rows {
            let verdict = match row.verdict {
                Verdict::Improved => "improved".green(),
                Verdict::Worsened => "worsened".red(),
                Verdict::Same => "same".dimmed(),
            };
            println!(
                "{:<36} {:<14} {:<14} {:<14} {:<8} {}",
                truncate(&row.text, 35),
                truncate(&row.true_label, 14),
                truncate(&row.prediction_a, 14),
                truncate(&row.prediction_b, 14),
                if row.changed { "✓" } else { "" },
                verdict
            );
        }
    }

    if let Some(custom) = &parsed.custom_sample {
        let mark = |ok: bool| if ok { "✓".green() } else { "✗".red() };
        println!();
        println!("{}", "Custom sample".bold());
        println!("  {} {}", "Text:".dimmed(), custom.sample_text.as_deref().unwrap_or("-"));
        println!("  {} {}", "True:".dimmed(), custom.true_label.as_deref().unwrap_or("-"));
        println!(
            "  {} {} {}",
            "Pretrained:".dimmed(),
            custom.prediction_a.as_deref().unwrap_or("-"),
            mark(custom.correct_a)
        );
        println!(
            "  {} {} {}",
            "Fine-tuned:".dimmed(),
            custom.prediction_b.as_deref().unwrap_or("-"),
            mark(custom.correct_b)
        );
    }
}

async fn cmd_train(args: &CliArgs, config: &ConsoleConfig) -> Result<()> {
    let mut request = TrainRequest::new(
        args.method,
        require(&args.model, "model")?,
        require(&args.dataset, "dataset")?,
    )
    .with_learning_rate(args.learning_rate.unwrap_or(config.defaults.learning_rate))
    .with_pretrained(args.pretrained);

    if let Some(text) = &args.sample_text {
        let label = args
            .sample_label
            .context("--sample-label is required with --sample")?;
        request = request.with_custom_sample(text, label);
    }

    let backend = Arc::new(HttpBackend::new(config)?);
    print_header(&request, backend.base_url());

    let session = TrainingSession::new(backend);
    let outcome = session.run(&request, print_item).await?;

    if let Some(error) = &outcome.error {
        eprintln!("{} {}", "Error:".red().bold(), error);
    } else if !outcome.completed {
        eprintln!(
            "{} stream ended before the backend reported completion",
            "Warning:".yellow()
        );
    }

    let parsed = outcome.parsed_results(&config.label_table());
    print_results(&outcome, &parsed);

    if outcome.error.is_some() {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_predict(args: &CliArgs, config: &ConsoleConfig) -> Result<()> {
    let request = PredictRequest {
        model_name: require(&args.model, "model")?.to_string(),
        dataset_name: require(&args.dataset, "dataset")?.to_string(),
        training_method: args.method,
        user_input: require(&args.text, "text")?.to_string(),
    };

    let session = TrainingSession::new(Arc::new(HttpBackend::new(config)?));
    let outcome = session.predict(&request).await?;
    let class_index = outcome.class_index();

    match outcome {
        PredictOutcome::Error { error } => bail!("Prediction failed: {}", error),
        PredictOutcome::Generated { generated_text, note } => {
            println!("{} {}", "Generated:".bold(), generated_text);
            if let Some(note) = note {
                eprintln!("{} {}", "Note:".yellow(), note);
            }
        }
        PredictOutcome::Class { prediction, note } => {
            println!("{} {}", "Predicted class:".bold(), prediction);
            let labels = config.label_table();
            if let Some(label) = class_index
                .and_then(|idx| labels.labels_for(&request.dataset_name).get(idx))
            {
                println!("{} {}", "Predicted category:".bold(), label.green());
            }
            if let Some(note) = note {
                eprintln!("{} {}", "Note:".yellow(), note);
            }
        }
    }
    Ok(())
}

async fn cmd_queue(config: &ConsoleConfig) -> Result<()> {
    let backend = HttpBackend::new(config)?;
    let status = backend.queue_status().await?;

    let gpu = if status.gpu_available {
        "available".green()
    } else {
        "busy".red()
    };
    println!("{} {}", "GPU:".bold(), gpu);
    if let Some(job) = &status.active_job {
        println!(
            "{} {} on {} ({})",
            "Active:".bold(),
            job.model_name.as_deref().unwrap_or("?"),
            job.dataset_name.as_deref().unwrap_or("?"),
            job.training_method.as_deref().unwrap_or("?")
        );
    }
    println!("{} {}", "Queued:".bold(), status.queue_length.max(status.queued_jobs.len()));
    for (n, job) in status.queued_jobs.iter().enumerate() {
        println!(
            "  {}. {} on {}",
            job.position.map(|p| p as usize).unwrap_or(n + 1),
            job.model_name.as_deref().unwrap_or("?"),
            job.dataset_name.as_deref().unwrap_or("?")
        );
    }
    Ok(())
}

async fn cmd_download(args: &CliArgs, config: &ConsoleConfig) -> Result<()> {
    if args.method == TrainingMethod::Primary {
        eprintln!(
            "{} dwl runs keep no trained weights; the file holds an untrained model",
            "Warning:".yellow()
        );
    }
    let backend = HttpBackend::new(config)?;
    let bytes = backend.download_model(&args.output).await?;
    println!("{} {} ({} bytes)", "Saved".green(), args.output.display(), bytes);
    Ok(())
}

async fn cmd_profile(args: &CliArgs, config: &ConsoleConfig) -> Result<()> {
    let token = require(&args.token, "token")?;
    let profile = HttpBackend::new(config)?.user_profile(token).await?;
    if let Some(name) = &profile.name {
        println!("{} {}", "Name:".bold(), name);
    }
    if let Some(email) = &profile.email {
        println!("{} {}", "Email:".bold(), email);
    }
    println!("{} ${:.2}", "Credits:".bold(), profile.credits);
    Ok(())
}

async fn cmd_add_credits(args: &CliArgs, config: &ConsoleConfig) -> Result<()> {
    let token = require(&args.token, "token")?;
    let amount = args.amount.context("--amount is required")?;
    if !(amount.is_finite() && amount > 0.0) {
        bail!("--amount must be a positive number");
    }
    let credits = HttpBackend::new(config)?.add_credits(token, amount).await?;
    println!("{} ${:.2}", "Credits:".bold(), credits);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;

    let result = match args.command.as_str() {
        "train" => cmd_train(&args, &config).await,
        "predict" => cmd_predict(&args, &config).await,
        "queue" => cmd_queue(&config).await,
        "download" => cmd_download(&args, &config).await,
        "profile" => cmd_profile(&args, &config).await,
        "add-credits" => cmd_add_credits(&args, &config).await,
        other => {
            print_usage();
            Err(anyhow::anyhow!("Unknown command: {}", other))
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}
