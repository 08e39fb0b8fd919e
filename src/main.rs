use std::fs::File;
use std::io::Write;

use clap::Parser;
use parlametric::cli::{
    Cli, Command, SessionsCommand, SessionsOutputFormat, ShutdownController,
};
use parlametric::orchestrator::{ParlametricEngine, PipelineBuilder, SessionStage};
use parlametric::storage::SessionStore;
use parlametric::{PmError, PmResult, TextMetricsEngine};

fn main() {
    parlametric::logging::init();

    if let Err(e) = ShutdownController::install(None) {
        tracing::warn!("failed to install Ctrl+C handler: {e}");
    }

    if let Err(error) = run() {
        if ShutdownController::is_shutting_down() {
            eprintln!("interrupted");
            std::process::exit(ShutdownController::signal_exit_code());
        }
        eprintln!("error [{}]: {error}", error.error_code());
        std::process::exit(1);
    }

    if ShutdownController::is_shutting_down() {
        std::process::exit(ShutdownController::signal_exit_code());
    }
}

fn run() -> PmResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Analyze(args) => {
            let text = args.resolve_text()?;
            let engine = TextMetricsEngine::new(args.metrics_config())?;
            let result = engine.compute_metrics(&text, args.duration_minutes)?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "lemmas {} (unique {}) | wpm {:.1} | fluency {} | vocabulary {}",
                    result.total_lemmas,
                    result.unique_lemmas,
                    result.wpm,
                    result.fluency_score,
                    result.vocabulary_score
                );
            }
            Ok(())
        }
        Command::Run(args) => {
            let request = args.to_request()?;

            let mut builder = PipelineBuilder::new();
            if matches!(
                request.answer,
                parlametric::model::AnswerSource::AudioFile { .. }
            ) {
                builder = builder.stage(SessionStage::Transcribe);
            }
            builder = builder
                .stage(SessionStage::Metrics)
                .stage(SessionStage::Skills)
                .stage(SessionStage::Persist);

            let engine = ParlametricEngine::new().with_pipeline(builder.build()?);
            let report = engine.run(&request)?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "session {} | wpm {:.1} | fluency {} | vocabulary {}",
                    report.session_id,
                    report.metrics.wpm,
                    report.metrics.fluency_score,
                    report.metrics.vocabulary_score
                );
                for skill in &report.skills {
                    match skill.score {
                        Some(score) => println!("  {}: {}", skill.skill, score),
                        None => println!("  {}: no score", skill.skill),
                    }
                }
                for warning in &report.warnings {
                    eprintln!("warning: {warning}");
                }
            }
            Ok(())
        }
        Command::Sessions { command } => match command {
            SessionsCommand::List(args) => {
                let store = SessionStore::open(&args.db)?;
                let summaries = store.list_recent(args.limit)?;
                match args.format {
                    SessionsOutputFormat::Plain => {
                        for summary in summaries {
                            println!(
                                "{} | {} | {} | wpm {:.1} | F{} V{} | {}",
                                summary.started_at_rfc3339,
                                summary.session_id,
                                summary.username,
                                summary.wpm,
                                summary.fluency_score,
                                summary.vocabulary_score,
                                summary.transcript_preview
                            );
                        }
                    }
                    SessionsOutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&summaries)?);
                    }
                    SessionsOutputFormat::Ndjson => {
                        for summary in summaries {
                            println!("{}", serde_json::to_string(&summary)?);
                        }
                    }
                }
                Ok(())
            }
            SessionsCommand::Show(args) => {
                let store = SessionStore::open(&args.db)?;
                let report = match &args.id {
                    Some(id) => store.load_session(id)?.ok_or_else(|| {
                        PmError::InvalidRequest(format!("no session found with id `{id}`"))
                    })?,
                    None => store.load_latest()?.ok_or_else(|| {
                        PmError::InvalidRequest("no sessions stored yet".to_owned())
                    })?,
                };
                match args.format {
                    SessionsOutputFormat::Plain => {
                        println!(
                            "session {} | {} | {}",
                            report.session_id, report.username, report.started_at_rfc3339
                        );
                        println!(
                            "wpm {:.1} | fluency {} | vocabulary {} | {:.2} min",
                            report.metrics.wpm,
                            report.metrics.fluency_score,
                            report.metrics.vocabulary_score,
                            report.duration_minutes
                        );
                        for skill in &report.skills {
                            match skill.score {
                                Some(score) => println!("  {}: {}", skill.skill, score),
                                None => println!("  {}: no score", skill.skill),
                            }
                        }
                        println!("{}", report.transcript);
                    }
                    SessionsOutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    }
                    SessionsOutputFormat::Ndjson => {
                        println!("{}", serde_json::to_string(&report)?);
                    }
                }
                Ok(())
            }
            SessionsCommand::ExportCsv(args) => {
                let store = SessionStore::open(&args.db)?;
                let count = match &args.output {
                    Some(path) => {
                        let mut file = File::create(path)?;
                        let count = store.export_csv(&mut file)?;
                        file.flush()?;
                        count
                    }
                    None => {
                        let stdout = std::io::stdout();
                        let mut lock = stdout.lock();
                        store.export_csv(&mut lock)?
                    }
                };
                tracing::info!(rows = count, "csv export finished");
                Ok(())
            }
        },
    }
}
