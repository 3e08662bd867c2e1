use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use photo_organizer::organizer_core::analysis::{FileReport, analyze};
use photo_organizer::organizer_core::cache::{MetadataCache, SqliteMetadataCache};
use photo_organizer::organizer_core::date::local_offset;
use photo_organizer::organizer_core::geocode;
use photo_organizer::organizer_core::journal::JsonLinesJournal;
use photo_organizer::organizer_core::organize::FileStatus;
use photo_organizer::organizer_core::progress::{CancellationToken, ProgressSink, percent_bar};
use photo_organizer::organizer_core::{
    CacheAction, Cli, Commands, ConfigAction, ConfigStore, Criterion, DateLayout, FileConfigStore,
    MetadataExtractor, OrganizeMode, OrganizeOptions, OrganizeResult, Organizer, OrganizerError,
    OutputFormat, TransferMode, classify, collect_media_files,
};
use simplelog::{CombinedLogger, Config, SharedLogger, TermLogger, WriteLogger};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The local offset can only be read reliably while single-threaded.
    local_offset();

    // Initialize loggers (terminal output goes to stderr)
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        cli.terminal_level(),
        Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )];

    if cli.log {
        loggers.push(WriteLogger::new(
            cli.log_level,
            Config::default(),
            File::create("photo-organizer.log")?,
        ));
    }

    CombinedLogger::init(loggers)?;

    let mut store = FileConfigStore::open_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Organize {
            sources,
            dest,
            by_date,
            by_camera,
            by_location,
            multilayer,
            order,
            date_format,
            r#move,
            dry_run,
            journal,
            no_cache,
            output,
        } => {
            let config = store.config();
            let enabled: Vec<Criterion> = if order.is_empty() {
                [
                    (by_date, Criterion::Date),
                    (by_camera, Criterion::Camera),
                    (by_location, Criterion::Location),
                ]
                .into_iter()
                .filter_map(|(on, criterion)| on.then_some(criterion))
                .collect()
            } else {
                order
            };
            let mode = OrganizeMode::select(&enabled, multilayer)
                .ok_or_else(|| anyhow!("Choose at least one of --by-date, --by-camera, --by-location"))?;

            let mut options = OrganizeOptions::from_settings(&dest, mode, &config.organize);
            if let Some(format) = date_format {
                options.date_layout = DateLayout::parse(&format);
            }
            if r#move {
                options.transfer = TransferMode::Move;
            }
            options.dry_run = dry_run;

            let files = collect_media_files(&sources)?;
            let organizer = Organizer::new(
                MetadataExtractor::from_config(config, !no_cache),
                geocode::from_config(config),
                options,
            );
            run_organizer(organizer, journal.as_deref(), files, output)?;
        }

        Commands::Group {
            sources,
            dest,
            max_distance_km,
            r#move,
            dry_run,
            journal,
            no_cache,
            output,
        } => {
            let config = store.config();
            let max_distance_km = max_distance_km.unwrap_or(config.organize.max_distance_km);
            if !max_distance_km.is_finite() || max_distance_km < 0.0 {
                bail!("--max-distance-km must be a non-negative number");
            }

            let mode = OrganizeMode::LocationGroups { max_distance_km };
            let mut options = OrganizeOptions::from_settings(&dest, mode, &config.organize);
            if r#move {
                options.transfer = TransferMode::Move;
            }
            options.dry_run = dry_run;

            let files = collect_media_files(&sources)?;
            let organizer = Organizer::new(
                MetadataExtractor::from_config(config, !no_cache),
                geocode::from_config(config),
                options,
            );
            run_organizer(organizer, journal.as_deref(), files, output)?;
        }

        Commands::Analyze {
            sources,
            no_cache,
            output,
        } => {
            let extractor = MetadataExtractor::from_config(store.config(), !no_cache);
            let files = collect_media_files(&sources)?;

            let bar = percent_bar();
            let report = analyze(&extractor, &files, &bar, &CancellationToken::new());
            bar.finish_and_clear();

            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Table => print!("{}", report.render_table()),
            }
        }

        Commands::Inspect {
            file,
            no_cache,
            output,
        } => {
            if !file.is_file() {
                return Err(OrganizerError::PathNotFound(file).into());
            }
            let extractor = MetadataExtractor::from_config(store.config(), !no_cache);
            let (report, metadata) = FileReport::build(&extractor, &file);

            match output {
                OutputFormat::Json => {
                    let value = serde_json::json!({ "report": report, "metadata": metadata });
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                OutputFormat::Table => {
                    let format = classify(&file);
                    println!("File:    {}", file.display());
                    println!(
                        "Format:  {} ({})",
                        format,
                        extractor.chain(format).strategy_names().join(" -> ")
                    );
                    println!("Date:    {} ({})", report.date.as_deref().unwrap_or("-"), report.date_origin);
                    println!("Camera:  {}", report.camera);
                    match (&report.gps, &report.maps_link) {
                        (Some(gps), Some(link)) => println!("GPS:     {} {}", gps, link),
                        _ if report.gps_unreadable => println!("GPS:     present but unreadable"),
                        _ => println!("GPS:     -"),
                    }
                    println!("─────────────────────────────────");
                    for (key, value) in &metadata {
                        println!("{:<32} {}", key, value);
                    }
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Get { key } => match store.get(&key)? {
                Some(value) => println!("{}", value),
                None => bail!("{} is not set", key),
            },
            ConfigAction::Set { key, value } => {
                store.set(&key, &value)?;
                store.save()?;
                println!("{} = {}", key, value.trim());
            }
            ConfigAction::Path => println!("{}", store.path().display()),
        },

        Commands::Cache { action } => {
            let settings = &store.config().cache;
            let path = settings
                .database_path()
                .ok_or_else(|| anyhow!("No cache directory available on this platform"))?;
            let cache = SqliteMetadataCache::new(&path, Duration::from_secs(settings.ttl_secs))
                .with_context(|| format!("Opening metadata cache {}", path.display()))?;

            match action {
                CacheAction::Stats => {
                    let stats = cache.stats()?;
                    println!("Cache:   {}", path.display());
                    println!("Entries: {}", stats.entries);
                    println!("TTL:     {}s", settings.ttl_secs);
                }
                CacheAction::Purge => println!("Removed {} expired entries", cache.purge_expired()?),
                CacheAction::Clear => println!("Removed {} entries", cache.clear()?),
            }
        }
    }

    Ok(())
}

/// Run a batch on a worker thread while drawing its progress, then report.
fn run_organizer(
    mut organizer: Organizer,
    journal: Option<&Path>,
    files: Vec<PathBuf>,
    output: OutputFormat,
) -> Result<()> {
    if let Some(path) = journal {
        organizer = organizer.with_journal(Box::new(JsonLinesJournal::open(path)?));
    }
    log::info!("{} files to organize", files.len());

    let bar = percent_bar();
    let handle = organizer.spawn(files);
    for update in handle.progress().iter() {
        ProgressSink::update(&bar, update.percent, &update.message);
    }
    bar.finish_and_clear();
    let result = handle.join()?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Table => print_summary(&result),
    }

    if result.errors > 0 {
        return Err(OrganizerError::TransferFailed(result.failures()).into());
    }
    Ok(())
}

fn print_summary(result: &OrganizeResult) {
    for outcome in &result.details {
        let destination = outcome
            .destination
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        match outcome.status {
            FileStatus::Processed => println!("{} -> {}", outcome.source.display(), destination),
            FileStatus::Skipped => println!("{} (skipped)", outcome.source.display()),
            FileStatus::Error => println!(
                "{} (error: {})",
                outcome.source.display(),
                outcome.message.as_deref().unwrap_or("unknown")
            ),
        }
    }
    for message in &result.messages {
        println!("{}", message);
    }

    if result.dry_run {
        println!("\nDry run, nothing was changed.");
    } else {
        println!("\nOrganization complete!");
    }
    println!("  {} files", result.total);
    println!("  {} processed", result.processed);
    if result.skipped > 0 {
        println!("  {} skipped", result.skipped);
    }
    if result.errors > 0 {
        println!("  {} errors", result.errors);
    }
    if result.cancelled {
        println!("  cancelled before completion");
    }
}
