mod cli;

use std::{path::Path, sync::Arc};

use action_reasoner::{
    ActionRecognizer, Config, Label, Prediction, PredictionRecord, TrainedModel, Trainer,
    TrainingEvent, dataset,
    reasoning::{
        AnnotatedPrediction, OpenAiReasoner, ReasoningAgent, StaticReasoner, TemporalReasoning,
        annotate,
    },
};
use anyhow::{Context, Result, bail};
use cli::{Cli, Commands};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

#[derive(Serialize)]
struct ClipResult {
    clip: String,
    #[serde(flatten)]
    prediction: Prediction,
}

#[derive(Serialize)]
struct AnnotatedClip {
    clip: String,
    #[serde(flatten)]
    prediction: AnnotatedPrediction,
}

#[derive(Serialize)]
struct ClassifyReport<T: Serialize> {
    clips: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<TemporalReasoning>,
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Commands::InitConfig { force } = cli.command {
        return run_init_config(cli.config.as_deref(), force);
    }
    let config = Config::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Commands::Train { data, output } => run_train(&data, &output, &config),
        Commands::Classify {
            data,
            model,
            reason,
            offline,
            temporal,
        } => run_classify(&data, &model, reason, offline, temporal, &config),
        Commands::Reason {
            action,
            sequence,
            offline,
        } => run_reason(action, sequence, offline, &config),
        Commands::InitConfig { .. } => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn reasoning_agent(offline: bool, config: &Config) -> Result<Box<dyn ReasoningAgent>> {
    if offline {
        return Ok(Box::new(StaticReasoner));
    }
    let agent = OpenAiReasoner::from_config(&config.reasoning)
        .context("failed to set up the reasoning endpoint")?;
    Ok(Box::new(agent))
}

fn create_progress_bar(max_epochs: usize) -> ProgressBar {
    let pb = ProgressBar::new(max_epochs as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] epoch {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    pb.set_style(style);
    pb
}

fn run_train(data: &Path, output: &Path, config: &Config) -> Result<()> {
    let clips = dataset::load_labelled_clips(data)
        .with_context(|| format!("failed to load training clips from {}", data.display()))?;

    let mut progress: Option<ProgressBar> = None;
    let model = Trainer::new(config)
        .train(&clips, |event| match event {
            TrainingEvent::Started { max_epochs, .. } => {
                progress = Some(create_progress_bar(max_epochs));
            }
            TrainingEvent::Epoch { epoch, loss } => {
                if let Some(pb) = progress.as_ref() {
                    pb.set_position(epoch as u64);
                    pb.set_message(format!("loss {loss:.4}"));
                }
            }
            TrainingEvent::Finished {
                epochs, converged, ..
            } => {
                if let Some(pb) = progress.take() {
                    let how = if converged { "converged" } else { "stopped" };
                    pb.finish_with_message(format!("{how} after {epochs} epochs"));
                }
            }
        })
        .context("training failed")?;

    model
        .save(output)
        .with_context(|| format!("failed to write model to {}", output.display()))?;
    print_json(model.summary())
}

fn run_classify(
    data: &Path,
    model_path: &Path,
    reason: bool,
    offline: bool,
    temporal: bool,
    config: &Config,
) -> Result<()> {
    let model = TrainedModel::load(model_path)
        .with_context(|| format!("failed to load model from {}", model_path.display()))?;
    let recognizer = ActionRecognizer::new(Arc::new(model), &config.aggregator);

    let clips = dataset::load_clips(data)
        .with_context(|| format!("failed to load clips from {}", data.display()))?;

    let mut predictions = Vec::with_capacity(clips.len());
    for (clip_id, sequence) in &clips {
        let prediction = recognizer.classify_clip(clip_id, sequence)?;
        log::info!("{clip_id}: {}", prediction.display_text());
        predictions.push((clip_id.clone(), prediction));
    }

    if !reason && !temporal {
        let clips = predictions
            .into_iter()
            .map(|(clip, prediction)| ClipResult { clip, prediction })
            .collect();
        return print_json(&ClassifyReport::<ClipResult> {
            clips,
            sequence: None,
        });
    }

    let agent = reasoning_agent(offline, config)?;
    let sequence = if temporal {
        let history: Vec<Label> = predictions.iter().map(|(_, p)| p.action).collect();
        Some(
            agent
                .reason_over_sequence(&history)
                .context("sequence reasoning failed")?,
        )
    } else {
        None
    };

    if reason {
        let clips = predictions
            .iter()
            .map(|(clip, prediction)| {
                annotate(agent.as_ref(), prediction)
                    .with_context(|| format!("reasoning failed for clip '{clip}'"))
                    .map(|prediction| AnnotatedClip {
                        clip: clip.clone(),
                        prediction,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        print_json(&ClassifyReport { clips, sequence })
    } else {
        let clips = predictions
            .into_iter()
            .map(|(clip, prediction)| ClipResult { clip, prediction })
            .collect();
        print_json(&ClassifyReport { clips, sequence })
    }
}

fn run_reason(
    action: Option<String>,
    sequence: Option<String>,
    offline: bool,
    config: &Config,
) -> Result<()> {
    let agent = reasoning_agent(offline, config)?;

    if let Some(sequence) = sequence {
        let history = sequence
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<Label>)
            .collect::<action_reasoner::Result<Vec<_>>>()?;
        let result = agent.reason_over_sequence(&history)?;
        return print_json(&result);
    }

    let Some(action) = action else {
        bail!("either --action or --sequence is required");
    };
    let label: Label = action.parse()?;
    let record = PredictionRecord {
        action: label,
        confidence: 1.0,
    };
    let result = agent.reason(&record)?;
    print_json(&result)
}

fn run_init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(Config::default_path);
    if path.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite",
            path.display()
        );
    }
    Config::default()
        .save(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    log::info!("wrote default configuration to {}", path.display());
    Ok(())
}
