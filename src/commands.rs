//! One handler per CLI subcommand. Handlers own configuration loading and
//! user-facing output; the orchestration itself lives in [`crate::orchestrator`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::Style;
use tracing::{info, warn};

use crate::cli::{Cli, Command, ConfigureArgs, ProcessArgs};
use crate::config::{RunSettings, Settings};
use crate::events::EventSink;
use crate::openai::{JobClient, OpenAiClient};
use crate::orchestrator::JobOrchestrator;
use crate::state_machine::JobStatus;
use crate::ui::{ProgressReporter, print_job_table, print_summary};

pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Process(args) => {
            let settings = Settings::load().context("failed to load configuration")?;
            process(args, settings).await
        }
        Command::Configure(args) => configure(&args, &Settings::path()),
        Command::ListJobs { limit, all } => {
            let client = client_from_config()?;
            list_jobs(&client, if all { None } else { Some(limit) }).await
        }
        Command::Cancel { job_id } => {
            let client = client_from_config()?;
            cancel(&client, &job_id).await
        }
        Command::Download {
            job_id,
            output_file,
        } => {
            let client = client_from_config()?;
            let output =
                output_file.unwrap_or_else(|| PathBuf::from(format!("{job_id}_results.jsonl")));
            download(&client, &job_id, &output).await.map(|_| ())
        }
    }
}

fn build_client(settings: &Settings) -> Result<OpenAiClient> {
    let key = settings.require_api_key()?;
    let client = OpenAiClient::with_base_url(key.to_string(), settings.base_url.clone())
        .context("failed to build HTTP client")?
        .with_batch_options(&settings.endpoint, &settings.completion_window);
    info!(base_url = client.base_url(), "using batch API");
    Ok(client)
}

fn client_from_config() -> Result<OpenAiClient> {
    let settings = Settings::load().context("failed to load configuration")?;
    build_client(&settings)
}

/// Command-line values win over the config file.
fn run_settings(args: &ProcessArgs, settings: &Settings) -> Result<RunSettings> {
    let run = RunSettings::new(
        args.max_concurrent_jobs.unwrap_or(settings.max_concurrent_jobs),
        args.check_interval.unwrap_or(settings.check_interval),
        args.resolved_output_dir(),
    )?;
    Ok(run)
}

async fn process(args: ProcessArgs, settings: Settings) -> Result<()> {
    let client = build_client(&settings)?;
    let run = run_settings(&args, &settings)?;
    let output_dir = run.output_dir.clone();

    let (events, rx) = EventSink::channel();
    let reporter = tokio::spawn(ProgressReporter::new().consume(rx));

    let orchestrator = JobOrchestrator::new(Arc::new(client), run).with_events(events);
    let result = orchestrator.run(&args.inputs, &settings.input_extension).await;
    // Closes the event channel so the reporter can finish.
    drop(orchestrator);

    if let Err(e) = reporter.await {
        warn!(error = %e, "progress reporter stopped early");
    }

    let report = result?;
    print_summary(&report, &output_dir);
    Ok(())
}

/// Where the key in use comes from, given the file contents and the
/// settings after environment overrides.
fn key_source(file: &Settings, effective: &Settings) -> &'static str {
    if effective.api_key.is_empty() {
        ""
    } else if effective.api_key != file.api_key {
        " (from OPENAI_API_KEY)"
    } else {
        " (from config file)"
    }
}

/// Lines printed by `configure --show`.
fn describe(path: &Path, file: &Settings, effective: &Settings) -> Vec<String> {
    vec![
        format!("Config file:         {}", path.display()),
        format!(
            "API key:             {}{}",
            effective.masked_api_key(),
            key_source(file, effective)
        ),
        format!("Base URL:            {}", effective.base_url),
        format!("Max concurrent jobs: {}", effective.max_concurrent_jobs),
        format!("Check interval:      {} seconds", effective.check_interval),
        format!("Endpoint:            {}", effective.endpoint),
        format!("Completion window:   {}", effective.completion_window),
        format!("Input extension:     .{}", effective.input_extension),
    ]
}

fn configure(args: &ConfigureArgs, path: &Path) -> Result<()> {
    let green = Style::new().green();
    let yellow = Style::new().yellow();

    if let Some(key) = &args.set_key {
        let mut settings = Settings::load_from(path)?;
        settings.api_key = key.clone();
        settings
            .save_to(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("{}", green.apply_to("API key set successfully."));
    } else if args.show {
        let file = Settings::load_from(path)?;
        let effective = file.clone().with_env_overrides();
        for line in describe(path, &file, &effective) {
            println!("{line}");
        }
    } else if args.reset {
        Settings::default()
            .save_to(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("{}", yellow.apply_to("Configuration reset to default values."));
    } else {
        println!("Use --set-key, --show, or --reset to manage configuration.");
    }
    Ok(())
}

async fn list_jobs(client: &dyn JobClient, limit: Option<u32>) -> Result<()> {
    let jobs = client
        .list_jobs(limit)
        .await
        .context("failed to list batch jobs")?;
    print_job_table(&jobs);
    Ok(())
}

async fn cancel(client: &dyn JobClient, job_id: &str) -> Result<()> {
    let batch = match client.cancel_job(job_id).await {
        Ok(batch) => batch,
        Err(e) if e.is_not_found() => bail!("no batch job with id {job_id}"),
        Err(e) => return Err(e).with_context(|| format!("failed to cancel job {job_id}")),
    };
    info!(job_id, status = %batch.status, "cancel requested");
    println!(
        "{}",
        Style::new()
            .green()
            .apply_to(format!("Job {job_id} cancelled successfully (status: {}).", batch.status))
    );
    Ok(())
}

/// Download a finished job's output to `output`. Returns `false`, after
/// telling the user why, when the job has not completed yet.
async fn download(client: &dyn JobClient, job_id: &str, output: &Path) -> Result<bool> {
    let batch = client
        .get_job(job_id)
        .await
        .with_context(|| format!("failed to fetch job {job_id}"))?;

    let status = JobStatus::from_remote(&batch.status);
    if status != JobStatus::Completed {
        println!(
            "{}",
            Style::new().yellow().apply_to(format!(
                "Job {job_id} is not completed (status: {status}). Cannot download results."
            ))
        );
        return Ok(false);
    }

    let Some(file_id) = batch.output_file_id else {
        bail!("job {job_id} completed but has no output file");
    };
    let content = client
        .download(&file_id)
        .await
        .with_context(|| format!("failed to download results for job {job_id}"))?;
    tokio::fs::write(output, content)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "{}",
        Style::new().green().apply_to(format!(
            "Results for job {job_id} downloaded successfully to {}",
            output.display()
        ))
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn configure_args() -> ConfigureArgs {
        ConfigureArgs {
            set_key: None,
            show: false,
            reset: false,
        }
    }

    async fn mock_batch(server: &MockServer, status: &str, output: Option<&str>) {
        Mock::given(method("GET"))
            .and(path("/batches/batch_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "batch_1",
                "status": status,
                "input_file_id": "file-in",
                "output_file_id": output,
                "created_at": 1711471533
            })))
            .mount(server)
            .await;
    }

    fn client_for(server: &MockServer) -> OpenAiClient {
        OpenAiClient::with_base_url("sk-test".into(), server.uri()).unwrap()
    }

    #[test]
    fn configure_sets_and_resets_key() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("batchctl.toml");

        let args = ConfigureArgs {
            set_key: Some("sk-configured".into()),
            ..configure_args()
        };
        configure(&args, &path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap().api_key, "sk-configured");

        let args = ConfigureArgs {
            reset: true,
            ..configure_args()
        };
        configure(&args, &path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), Settings::default());
    }

    #[test]
    fn configure_set_key_keeps_other_settings() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("batchctl.toml");
        std::fs::write(&path, "max_concurrent_jobs = 9\n").unwrap();

        let args = ConfigureArgs {
            set_key: Some("sk-new".into()),
            ..configure_args()
        };
        configure(&args, &path).unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.max_concurrent_jobs, 9);
        assert_eq!(settings.api_key, "sk-new");
    }

    #[test]
    fn show_reports_key_from_environment() {
        let path = Path::new("batchctl.toml");
        let file = Settings::default();
        let effective = file
            .clone()
            .with_overrides(Some("sk-environment-wxyz".into()), None);

        let lines = describe(path, &file, &effective);
        assert_eq!(lines[1], "API key:             sk-e...wxyz (from OPENAI_API_KEY)");

        let lines = describe(path, &file, &file);
        assert_eq!(lines[1], "API key:             Not set");

        let stored = Settings {
            api_key: "sk-stored-abcd".into(),
            ..Settings::default()
        };
        let lines = describe(path, &stored, &stored);
        assert_eq!(lines[1], "API key:             sk-s...abcd (from config file)");
    }

    fn process_args(tmp: &TempDir) -> ProcessArgs {
        ProcessArgs {
            inputs: vec![tmp.path().join("inputs")],
            output_dir: Some(tmp.path().join("results")),
            max_concurrent_jobs: None,
            check_interval: None,
        }
    }

    #[test]
    fn command_line_overrides_config_file() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings {
            max_concurrent_jobs: 9,
            check_interval: 30.0,
            ..Settings::default()
        };

        let from_file = run_settings(&process_args(&tmp), &settings).unwrap();
        assert_eq!(from_file.max_concurrent_jobs, 9);
        assert_eq!(from_file.check_interval, std::time::Duration::from_secs(30));

        let args = ProcessArgs {
            max_concurrent_jobs: Some(2),
            check_interval: Some(0.5),
            ..process_args(&tmp)
        };
        let from_cli = run_settings(&args, &settings).unwrap();
        assert_eq!(from_cli.max_concurrent_jobs, 2);
        assert_eq!(from_cli.check_interval, std::time::Duration::from_millis(500));
        assert_eq!(from_cli.output_dir, tmp.path().join("results"));
    }

    #[tokio::test]
    async fn process_without_key_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let args = process_args(&tmp);

        let err = process(args, Settings::default()).await.unwrap_err();
        assert!(err.to_string().contains("API key not set"));
        assert!(!tmp.path().join("results").exists());
    }

    #[test]
    fn build_client_requires_key() {
        let err = build_client(&Settings::default()).err().unwrap();
        assert!(err.to_string().contains("API key not set"));
    }

    #[tokio::test]
    async fn download_writes_completed_results() {
        let server = MockServer::start().await;
        mock_batch(&server, "completed", Some("file-out")).await;
        Mock::given(method("GET"))
            .and(path("/files/file-out/content"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{\"ok\":true}\n".to_vec()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("batch_1_results.jsonl");
        let done = download(&client_for(&server), "batch_1", &output)
            .await
            .unwrap();
        assert!(done);
        assert_eq!(std::fs::read(&output).unwrap(), b"{\"ok\":true}\n");
    }

    #[tokio::test]
    async fn download_refuses_unfinished_job() {
        let server = MockServer::start().await;
        mock_batch(&server, "In Progress", None).await;

        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("out.jsonl");
        let done = download(&client_for(&server), "batch_1", &output)
            .await
            .unwrap();
        assert!(!done);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn download_without_output_file_is_an_error() {
        let server = MockServer::start().await;
        mock_batch(&server, "completed", None).await;

        let tmp = TempDir::new().unwrap();
        let err = download(&client_for(&server), "batch_1", &tmp.path().join("o.jsonl"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no output file"));
    }

    #[tokio::test]
    async fn cancel_reports_api_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/batches/batch_1/cancel"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let err = cancel(&client_for(&server), "batch_1").await.unwrap_err();
        assert_eq!(err.to_string(), "no batch job with id batch_1");
    }
}
