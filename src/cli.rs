use dialoguer::Confirm;
use forge3d::client::{GenerationApi, HttpGenerationClient};
use forge3d::config::{default_config_path, Config};
use forge3d::error::{ErrorCode, ForgeError, Result};
use forge3d::job::{ImageUpload, JobId, JobRecord, JobRequest, JobStatus};
use forge3d::session::{Admission, GenerationSession, SessionEvent};
use forge3d::utils::sha256_hex;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::ui::{create_spinner, format_size_colored, UI};
use crate::version::format_version_info;
use crate::{Commands, ConfigArgs, ConfigCommand, ImageArgs, OutputArgs, TextArgs};

/// CLI handler for processing commands
pub struct CliHandler {
    config_path: Option<PathBuf>,
    ui: UI,
}

impl CliHandler {
    /// Create a new CLI handler with a custom config path
    pub fn with_config_path(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path,
            ui: UI::new(),
        }
    }

    fn config_file(&self) -> PathBuf {
        self.config_path.clone().unwrap_or_else(default_config_path)
    }

    async fn load_config(&self) -> Result<Config> {
        Config::load(self.config_path.as_deref()).await
    }

    /// Execute a CLI command
    pub async fn execute(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Text(args) => self.handle_text(args).await,
            Commands::Image(args) => self.handle_image(args).await,
            Commands::Backend => self.handle_backend().await,
            Commands::Config(args) => self.handle_config(args).await,
        }
    }

    async fn handle_text(&mut self, args: TextArgs) -> Result<()> {
        self.generate(JobRequest::text(args.caption), args.output).await
    }

    async fn handle_image(&mut self, args: ImageArgs) -> Result<()> {
        let upload = ImageUpload::from_path(&args.image_path).await?;
        self.generate(JobRequest::image(upload), args.output).await
    }

    /// Submit, follow the job to a terminal state, then save the model
    async fn generate(&mut self, request: JobRequest, output: OutputArgs) -> Result<()> {
        let config = self.load_config().await?;
        let client = HttpGenerationClient::new(config.client.clone())?;
        let session = GenerationSession::new(client, config.generation.clone())?;
        let mut events = session.subscribe();

        self.ui.info(&format!("Generating \"{}\"", request.prompt()));
        let job_id = match session.submit_job(request)? {
            Admission::Accepted(job_id) => job_id,
            Admission::AlreadySubmitting => {
                return Err(ForgeError::internal("A submission is already in flight"))
            }
        };

        let spinner = create_spinner("Submitting job...");
        let job_id = follow_job(&session, &mut events, job_id, |message| {
            spinner.set_message(message)
        })
        .await?;
        spinner.finish_and_clear();

        let record = session
            .record(&job_id)
            .ok_or_else(|| ForgeError::job_not_found(job_id.as_str()))?;

        if record.status == JobStatus::Failed {
            self.ui.job_card(&record, Vec::new());
            let reason = record.error.clone().unwrap_or_default();
            return Err(ForgeError::job_failed(job_id.as_str(), reason));
        }

        let saved = self.save_model(&session, &record, &output).await?;
        let mut extra = Vec::new();
        if let Some(url) = &record.url {
            let bytes = session.artifact_bytes(url)?;
            extra.push(("Size", format_size_colored(bytes.len() as u64)));
            extra.push(("SHA-256", sha256_hex(&bytes)));
        }
        if let Some(path) = &saved {
            extra.push(("Saved to", path.display().to_string()));
        }
        self.ui.job_card(&record, extra);

        if saved.is_some() {
            self.ui.success("Model generated successfully");
        }
        session.dispose();
        Ok(())
    }

    /// Export the model, asking before replacing an existing file
    async fn save_model<C: GenerationApi>(
        &self,
        session: &GenerationSession<C>,
        record: &JobRecord,
        output: &OutputArgs,
    ) -> Result<Option<PathBuf>> {
        match session
            .export_job(&record.job_id, &output.out, output.force)
            .await
        {
            Ok(path) => Ok(Some(path)),
            Err(e) if e.code() == ErrorCode::FileAlreadyExists => {
                let overwrite = Confirm::new()
                    .with_prompt(format!("{} Overwrite?", e.user_message()))
                    .default(false)
                    .interact()?;
                if overwrite {
                    let path = session.export_job(&record.job_id, &output.out, true).await?;
                    Ok(Some(path))
                } else {
                    self.ui.warning("Model not saved");
                    Ok(None)
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_backend(&mut self) -> Result<()> {
        let config = self.load_config().await?;
        let client = HttpGenerationClient::new(config.client.clone())?;

        let source = match &config.client.backend_url {
            Some(_) => "configured".to_string(),
            None => format!("discovery ({})", config.client.discovery_endpoint()),
        };
        let url = client.resolve_backend().await?;

        self.ui.card("Backend", vec![("URL", url), ("Source", source)]);
        Ok(())
    }

    async fn handle_config(&mut self, args: ConfigArgs) -> Result<()> {
        let path = self.config_file();
        match args.command {
            ConfigCommand::Show => {
                let config = self.load_config().await?;
                self.show_config(&config, &path);
            }
            ConfigCommand::Reset => {
                Config::default().save(&path).await?;
                self.ui
                    .success(&format!("Configuration reset: {}", path.display()));
            }
            ConfigCommand::SetTimeout { seconds } => {
                let mut config = self.load_config().await?;
                config.client.timeout = seconds;
                config.validate()?;
                config.save(&path).await?;
                self.ui
                    .success(&format!("Request timeout set to {}s", seconds));
            }
            ConfigCommand::SetBackend { url } => {
                let mut config = self.load_config().await?;
                config.client.backend_url = Some(url.trim_end_matches('/').to_string());
                config.validate()?;
                config.save(&path).await?;
                self.ui.success(&format!("Backend set to {}", url));
            }
        }
        Ok(())
    }

    fn show_config(&self, config: &Config, path: &std::path::Path) {
        let generation = &config.generation;
        self.ui.header(&format_version_info());
        self.ui.card(
            "Configuration",
            vec![
                ("File", path.display().to_string()),
                ("Discovery", config.client.discovery_endpoint()),
                (
                    "Backend",
                    config
                        .client
                        .backend_url
                        .clone()
                        .unwrap_or_else(|| "(discovered)".to_string()),
                ),
                ("Timeout", format!("{}s", config.client.timeout)),
                ("Proxy", config.client.use_proxy.to_string()),
                ("Poll interval", format!("{}ms", generation.poll_interval_ms)),
                (
                    "Rate limit",
                    format!(
                        "{} per {}s",
                        generation.max_requests, generation.rate_window_secs
                    ),
                ),
                ("Concurrent jobs", generation.max_concurrent_jobs.to_string()),
                (
                    "Poll failures",
                    generation.max_consecutive_poll_failures.to_string(),
                ),
                (
                    "Library capacity",
                    generation
                        .library_capacity
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "unbounded".to_string()),
                ),
            ],
        );
    }
}

/// Follow session events for `job_id` until it is terminal.
///
/// Returns the job's final id, which differs from the temporary one once the
/// backend has accepted it.
async fn follow_job<C, F>(
    session: &GenerationSession<C>,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    mut job_id: JobId,
    mut progress: F,
) -> Result<JobId>
where
    C: GenerationApi,
    F: FnMut(String),
{
    loop {
        match events.recv().await {
            Ok(SessionEvent::JobRenamed { from, to }) if from == job_id => {
                progress(format!("Job {} accepted", to));
                job_id = to;
            }
            Ok(SessionEvent::JobUpdated { job_id: id, status }) if id == job_id => {
                if status.is_terminal() {
                    return Ok(job_id);
                }
                progress(format!("Job {} {}...", job_id, status));
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "event stream lagged");
                let terminal = session
                    .record(&job_id)
                    .map(|r| r.status.is_terminal())
                    .unwrap_or(false);
                if terminal {
                    return Ok(job_id);
                }
            }
            Err(RecvError::Closed) => {
                return Err(ForgeError::internal("Session closed before the job finished"))
            }
        }
    }
}
