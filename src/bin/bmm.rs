use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bmm_rs::BernoulliMixture;
use bmm_rs::io::Dataset;
use bmm_rs::io::dataset::{read_dataset, write_dataset};
use bmm_rs::io::params::load_model;
use bmm_rs::progress;

#[derive(Parser, Debug)]
#[command(name = "bmm")]
#[command(about = "Bernoulli mixture scoring and EM updates with missing data", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    no_progress: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print log-likelihood, AIC and BIC of a dataset under a model
    Score { dataset: PathBuf, params: PathBuf },
    /// Write per-sample component assignments as TSV
    Assign {
        dataset: PathBuf,
        params: PathBuf,
        output: PathBuf,
        #[arg(long, help = "Write posterior probabilities instead of the argmax component")]
        soft: bool,
    },
    /// Run a single EM iteration and write the updated parameters
    Step {
        dataset: PathBuf,
        params: PathBuf,
        output: PathBuf,
    },
    /// Draw a fully observed dataset from a model
    Sample {
        params: PathBuf,
        size: usize,
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, help = "Also write the generating component of each sample")]
        labels: Option<PathBuf>,
    },
}

fn load_dataset(path: &Path, show_progress: bool) -> Result<Dataset> {
    let dataset = progress::with_spinner(show_progress, "IO", "Reading dataset", || {
        read_dataset(path)
    })?;
    log::info!(
        "read {} samples x {} features ({} missing cells) from {:?}",
        dataset.n_samples(),
        dataset.n_dimensions(),
        dataset.n_missing(),
        path
    );
    Ok(dataset)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let show_progress = !cli.no_progress;

    match cli.command {
        Command::Score { dataset, params } => {
            let model = load_model(&params)?;
            let data = load_dataset(&dataset, show_progress)?;
            if data.n_samples() == 0 {
                bail!("dataset {:?} contains no samples", dataset);
            }
            println!("log_likelihood\t{}", model.log_likelihood(&data)?);
            println!("aic\t{}", model.aic(&data)?);
            println!("bic\t{}", model.bic(&data)?);
        }
        Command::Assign {
            dataset,
            params,
            output,
            soft,
        } => {
            let model = load_model(&params)?;
            let data = load_dataset(&dataset, show_progress)?;
            write_assignments(&output, &model, &data, soft)?;
            println!("Assignments: {}", output.display());
        }
        Command::Step {
            dataset,
            params,
            output,
        } => {
            let model = load_model(&params)?;
            let data = load_dataset(&dataset, show_progress)?;
            if data.n_samples() == 0 {
                bail!("dataset {:?} contains no samples", dataset);
            }
            let (log_likelihood, next) = model.em_step(&data)?;
            next.save_params(&output)?;
            println!("EM loglike: {}", log_likelihood);
            println!("Updated parameters: {}", output.display());
        }
        Command::Sample {
            params,
            size,
            output,
            seed,
            labels,
        } => {
            let model = load_model(&params)?;
            let (data, components) = model.sample(size, seed);
            write_dataset(&output, &data)?;
            if let Some(labels) = labels {
                write_labels(&labels, &components)?;
            }
            println!("Sampled {} observations: {}", size, output.display());
        }
    }
    Ok(())
}

fn write_assignments(
    path: &Path,
    model: &BernoulliMixture,
    data: &Dataset,
    soft: bool,
) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut w = BufWriter::new(file);
    if soft {
        let probs = model.soft_assignment(data)?;
        let header: Vec<String> = (0..model.n_components()).map(|k| format!("c{k}")).collect();
        writeln!(w, "sample\t{}", header.join("\t"))?;
        for (n, row) in probs.outer_iter().enumerate() {
            let cells: Vec<String> = row.iter().map(|p| p.to_string()).collect();
            writeln!(w, "{n}\t{}", cells.join("\t"))?;
        }
    } else {
        writeln!(w, "sample\tcomponent")?;
        for (n, k) in model.hard_assignment(data)?.into_iter().enumerate() {
            writeln!(w, "{n}\t{k}")?;
        }
    }
    w.flush()
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

fn write_labels(path: &Path, components: &[usize]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut w = BufWriter::new(file);
    writeln!(w, "sample\tcomponent")?;
    for (n, k) in components.iter().enumerate() {
        writeln!(w, "{n}\t{k}")?;
    }
    w.flush()
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}
