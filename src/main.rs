//! SubGen CLI entry point. All terminal output lives here; the engine
//! itself only talks through the progress callback.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use subgen::cli::{Args, Commands};
use subgen::components::ComponentManager;
use subgen::config::Config;
use subgen::engine::{EmbedMode, ExportFormat, RunOptions, Stage, SubGenEngine};
use subgen::error::{Result, SubGenError};
use subgen::subtitle::SubtitleProject;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let _ = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    match dispatch(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(SubGenError::Cancelled) => {
            eprintln!("Cancelled.");
            ExitCode::from(6)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code().clamp(1, 127) as u8)
        }
    }
}

async fn dispatch(args: Args) -> Result<()> {
    match args.command {
        Commands::Run {
            input,
            target_lang,
            source_lang,
            sentence_aware,
            proofread,
            proofread_only,
            no_translate,
            bilingual,
            embed,
            force_transcribe,
            save_project,
            load_project,
            style_preset,
            primary_font,
            primary_color,
            secondary_font,
            secondary_color,
            output,
            format,
        } => {
            let mut config = Config::load(args.config.as_deref())?;
            if bilingual {
                config.output.bilingual = true;
            }
            if let Some(preset) = style_preset {
                config.styles.preset = preset;
            }
            if primary_font.is_some() {
                config.styles.primary_font = primary_font;
            }
            if primary_color.is_some() {
                config.styles.primary_color = primary_color;
            }
            if secondary_font.is_some() {
                config.styles.secondary_font = secondary_font;
            }
            if secondary_color.is_some() {
                config.styles.secondary_color = secondary_color;
            }
            if let Some(format) = &format {
                config.output.format = format.clone();
            }

            let options = RunOptions {
                source_lang,
                target_lang,
                no_translate,
                sentence_aware,
                proofread,
                proofread_only,
                force_transcribe,
            };

            run_pipeline(
                config,
                &input,
                options,
                output,
                save_project,
                load_project,
                embed,
            )
            .await
        }
        Commands::Install { component } => {
            let manager = ComponentManager::new()?;
            let bar = download_bar();
            let bar_ref = bar.clone();
            manager
                .install(
                    &component,
                    Some(Box::new(move |downloaded, total| {
                        if total > 0 {
                            bar_ref.set_length(total);
                        }
                        bar_ref.set_position(downloaded);
                    })),
                )
                .await?;
            bar.finish_and_clear();
            println!("Installed {}", component);
            Ok(())
        }
        Commands::Uninstall { component } => {
            let manager = ComponentManager::new()?;
            if manager.uninstall(&component)? {
                println!("Uninstalled {}", component);
            } else {
                println!("{} is not installed", component);
            }
            Ok(())
        }
        Commands::Components => {
            let manager = ComponentManager::new()?;
            println!("{:<28} {:<10} {:<10} Description", "Component", "Version", "Status");
            println!("{}", "-".repeat(90));
            for component in manager.list_available() {
                let status = if manager.is_installed(&component.id) {
                    "installed"
                } else {
                    "missing"
                };
                println!(
                    "{:<28} {:<10} {:<10} {}",
                    component.id, component.version, status, component.description
                );
            }
            Ok(())
        }
        Commands::Update { component } => {
            let config = Config::load(args.config.as_deref())?;
            let manager = ComponentManager::new()?;
            let targets: Vec<String> = match component {
                Some(id) => vec![id],
                None => manager
                    .list_installed()
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect(),
            };
            let outcomes = manager
                .update_many(&targets, config.advanced.download_concurrency)
                .await?;
            for (id, updated) in targets.iter().zip(outcomes) {
                if updated {
                    println!("Updated {}", id);
                } else {
                    println!("{} is up to date", id);
                }
            }
            Ok(())
        }
        Commands::Doctor => {
            let manager = ComponentManager::new()?;
            let report = manager.doctor_report();
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn run_pipeline(
    config: Config,
    input: &Path,
    options: RunOptions,
    output: Option<PathBuf>,
    save_project: Option<PathBuf>,
    load_project: Option<PathBuf>,
    embed: bool,
) -> Result<()> {
    let format = ExportFormat::from_name(&config.output.format)?;
    let bar = stage_bar();
    let bar_ref = bar.clone();
    let progress = Arc::new(move |stage: Stage, current: usize, total: usize| {
        bar_ref.set_message(stage.as_str().to_string());
        bar_ref.set_length(total.max(1) as u64);
        bar_ref.set_position(current as u64);
    });

    let mut engine = SubGenEngine::new(config)?.with_progress(progress);

    // Ctrl-C cancels cooperatively; every stage polls the token.
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut project = match load_project {
        Some(path) => {
            info!("loading project from {}", path.display());
            let loaded = SubtitleProject::load(&path)?;
            if !loaded.state.is_translated && !options.no_translate {
                engine.translate(loaded, &options).await?
            } else if options.proofread && !loaded.state.is_proofread {
                engine.proofread(loaded).await?
            } else {
                loaded
            }
        }
        None => engine.run(input, &options).await?,
    };
    bar.finish_and_clear();

    let output_path = match output {
        Some(path) => path,
        None if options.proofread_only => {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "subtitles".to_string());
            input.with_file_name(format!("{}.proofread.{}", stem, format.extension()))
        }
        None => input.with_extension(format.extension()),
    };

    engine.export(&project, &output_path, format, None)?;
    println!("Subtitles written to {}", output_path.display());

    if let Some(project_path) = save_project {
        project.save(&project_path)?;
        println!("Project saved to {}", project_path.display());
    }

    if embed {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let extension = input
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".to_string());
        let video_out = input.with_file_name(format!("{}_subbed.{}", stem, extension));
        engine
            .export_video(&project, input, &video_out, EmbedMode::Soft)
            .await?;
        println!("Video written to {}", video_out.display());
    }

    Ok(())
}

fn stage_bar() -> ProgressBar {
    let bar = ProgressBar::new(1);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:<14} [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("static template")
            .progress_chars("#>-"),
    );
    bar
}

fn download_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .expect("static template")
            .progress_chars("#>-"),
    );
    bar
}
