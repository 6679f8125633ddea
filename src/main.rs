use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use rbv::cli::{show_progress, upload_progress_bar, Cli, Commands, Prompter};
use rbv::config::{default_config_path, remote_join, AuthConfig, Config, PathsConfig};
use rbv::pipe::{check_endpoint, ChannelPaths, Profile};
use rbv::pipeline::{run_on_host, Job, Pipeline};
use rbv::upload::dropbox::API_HOST;
use rbv::upload::{authorize_url, exchange_auth_code, ChunkedUploader, DropboxClient, WriteMode};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Process { files, live, yes } => process(&config_path, files, live, yes).await,
        Commands::Upload {
            file,
            remote,
            overwrite,
        } => upload(&config_path, &file, remote, overwrite).await,
        Commands::Init => init(&config_path).await,
        Commands::Doctor => doctor(&config_path).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "rbv=debug" } else { "rbv=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

async fn process(config_path: &Path, files: Vec<PathBuf>, live: bool, yes: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let auth = config.require_auth()?;
    config.require_upload_dir()?;

    // Local files if given, otherwise whatever is waiting remotely
    let local_jobs: Option<Vec<Job>> = if files.is_empty() {
        None
    } else {
        let profile = Profile::from_live(live);
        Some(files.into_iter().map(|f| Job::local(f, profile)).collect())
    };
    let folders = if local_jobs.is_some() {
        Vec::new()
    } else {
        config.require_preprocess_folders()?
    };
    let paths = ChannelPaths::from_config(&config.pipe);
    let config_ref = &config;

    let bar = upload_progress_bar();
    let report = run_on_host(
        &paths,
        config.pipe.response_timeout(),
        move || async move {
            let dropbox = DropboxClient::connect(auth).await?;
            let pipeline = Pipeline::from_config(dropbox, config_ref)?;
            let jobs = match local_jobs {
                Some(jobs) => jobs,
                None => {
                    let pending = pipeline.pending_jobs(&folders).await?;
                    if pending.is_empty() || yes || confirm_pending(&pending)? {
                        pending
                    } else {
                        Vec::new()
                    }
                }
            };
            Ok((pipeline, jobs))
        },
        |p| show_progress(&bar, p),
    )
    .await;
    bar.finish_and_clear();
    let report = report.context("Batch aborted")?;

    if report.uploaded.is_empty() && report.skipped.is_empty() {
        println!("Nothing to do");
    }
    for remote in &report.uploaded {
        println!("{} {}", "uploaded".green().bold(), remote);
    }
    for (input, reason) in &report.skipped {
        println!("{} {}: {}", "skipped".yellow().bold(), input, reason);
    }
    Ok(())
}

/// List fetched recordings and ask whether to go ahead.
fn confirm_pending(jobs: &[Job]) -> rbv::Result<bool> {
    let mut prompter = Prompter::stdio();
    prompter.say(&format!("\nFiles to process ({}):\n", jobs.len()))?;
    for job in jobs {
        prompter.say(&format!("  [{}] {}", job.profile.as_str(), job.source))?;
    }
    Ok(prompter.confirm("\nProceed?", true)?)
}

async fn upload(
    config_path: &Path,
    file: &Path,
    remote: Option<String>,
    overwrite: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let auth = config.require_auth()?;

    let remote = match remote {
        Some(remote) => remote,
        None => {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("Not a usable file name: {}", file.display()))?;
            remote_join(config.require_upload_dir()?, name)
        }
    };

    let dropbox = DropboxClient::connect(auth)
        .await
        .context("Failed to authenticate")?;
    let write_mode = if overwrite {
        WriteMode::Overwrite
    } else {
        WriteMode::Add
    };
    let uploader = ChunkedUploader::from_config(dropbox, &config.upload).with_write_mode(write_mode);

    let bar = upload_progress_bar();
    let result = uploader
        .upload_file(file, &remote, |p| show_progress(&bar, p))
        .await;
    bar.finish_and_clear();
    result.with_context(|| format!("Failed to upload {}", file.display()))?;

    println!("{} {}", "uploaded".green().bold(), remote);
    Ok(())
}

async fn init(config_path: &Path) -> Result<()> {
    let mut prompter = Prompter::stdio();

    if config_path.exists()
        && !prompter.confirm(
            &format!("{} already exists. Overwrite?", config_path.display()),
            false,
        )?
    {
        println!("Left {} unchanged", config_path.display());
        return Ok(());
    }

    let app_key = prompter.ask("App key")?;
    let app_secret = prompter.ask("App secret")?;
    prompter.say(&format!(
        "\nOpen this URL, allow access, and paste the code shown:\n\n  {}\n",
        authorize_url(&app_key)?
    ))?;
    let code = prompter.ask("Authorization code")?;
    let refresh_token = exchange_auth_code(API_HOST, &app_key, &app_secret, &code)
        .await
        .context("Failed to exchange authorization code")?;

    let paths = PathsConfig {
        postprocess_soundcloud: prompter.ask_or("Upload folder", "/automation/postprocessed")?,
        postprocess_archive: prompter.ask_or("Archive folder", "/automation/archive")?,
        preprocess_live: prompter.ask_or("Live recordings folder", "/automation/preprocessed/live")?,
        preprocess_prerecord: prompter
            .ask_or("Prerecorded shows folder", "/automation/preprocessed/prerecord")?,
    };

    let config = Config {
        auth: Some(AuthConfig {
            app_key,
            app_secret,
            refresh_token,
        }),
        paths,
        ..Default::default()
    };
    config
        .save(config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("{} {}", "wrote".green().bold(), config_path.display());
    Ok(())
}

async fn doctor(config_path: &Path) -> Result<()> {
    let mut ok = true;

    let config = match Config::load(config_path) {
        Ok(config) => {
            report_check("config", true, &config_path.display().to_string());
            config
        }
        Err(e) => {
            report_check("config", false, &e.to_string());
            anyhow::bail!("doctor checks failed");
        }
    };

    let paths = ChannelPaths::from_config(&config.pipe);
    for (label, path) in [("pipe to host", &paths.to_host), ("pipe from host", &paths.from_host)] {
        match check_endpoint(path) {
            Ok(()) => report_check(label, true, &path.display().to_string()),
            Err(e) => {
                ok = false;
                report_check(label, false, &e.to_string());
            }
        }
    }

    match config.require_upload_dir() {
        Ok(dir) => report_check("upload folder", true, dir),
        Err(e) => {
            ok = false;
            report_check("upload folder", false, &e.to_string());
        }
    }
    let archive = config.paths.postprocess_archive.trim();
    if archive.is_empty() {
        report_check("archive folder", true, "not set");
    } else {
        report_check("archive folder", true, archive);
    }
    let folders = config.preprocess_folders();
    if folders.is_empty() {
        report_check("preprocess", true, "not set (only local files can be processed)");
    }
    for (profile, folder) in folders {
        report_check(&format!("preprocess {}", profile.as_str()), true, folder);
    }

    match config.require_auth() {
        Ok(auth) => match DropboxClient::connect(auth).await {
            Ok(client) => match client.current_account().await {
                Ok(account) => report_check(
                    "account",
                    true,
                    &format!("{} ({})", account.name, account.email),
                ),
                Err(e) => {
                    ok = false;
                    report_check("account", false, &e.to_string());
                }
            },
            Err(e) => {
                ok = false;
                report_check("account", false, &e.to_string());
            }
        },
        Err(e) => {
            ok = false;
            report_check("account", false, &e.to_string());
        }
    }

    if !ok {
        anyhow::bail!("doctor checks failed");
    }
    Ok(())
}

fn report_check(label: &str, passed: bool, detail: &str) {
    let status = if passed { "ok".green().bold() } else { "FAIL".red().bold() };
    println!("{:>16}: {} {}", label, status, detail);
}
