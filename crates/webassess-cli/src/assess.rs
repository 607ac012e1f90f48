use crate::fetch::{build_fetch_client, fetch_target, parse_target};
use reqwest::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;
use webassess_ai::{
    HtmlAnalysisPrompts, InferenceClient, ModelResolver, OllamaClient, OllamaClientConfig,
    OllamaLauncher, PullObserver, RecursiveAnalyzer, RuntimeSupervisor,
};
use webassess_core::{Result, UrlReport, WebAssessConfig};

/// What one run asks for, after CLI flags, environment and config are merged.
#[derive(Debug, Clone)]
pub struct AssessOptions {
    pub runtime_url: Option<String>,
    pub model: String,
    pub allow_download: bool,
}

impl AssessOptions {
    pub fn from_config(config: &WebAssessConfig) -> Self {
        Self {
            runtime_url: config.runtime.url.clone(),
            model: config.model.name.clone(),
            allow_download: config.model.allow_download,
        }
    }
}

/// Runs the whole assessment of one URL: runtime, model, fetch, analysis.
pub struct UrlAssessor {
    supervisor: RuntimeSupervisor,
    resolver: ModelResolver,
    analyzer: RecursiveAnalyzer,
    http: Client,
    options: AssessOptions,
    cancel: CancellationToken,
}

impl UrlAssessor {
    /// Assessor talking to a real Ollama runtime.
    pub fn new(
        config: &WebAssessConfig,
        observer: Arc<dyn PullObserver>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let client: Arc<dyn InferenceClient> = Arc::new(OllamaClient::new(OllamaClientConfig {
            probe_timeout: config.runtime.probe_timeout(),
            ..OllamaClientConfig::default()
        })?);
        let launcher = Arc::new(OllamaLauncher::new(config.runtime.executable.clone()));

        Ok(Self::with_components(
            RuntimeSupervisor::new(client.clone(), launcher, config.runtime.clone()),
            ModelResolver::new(client.clone(), config.download.clone()).with_observer(observer),
            RecursiveAnalyzer::new(client, &config.analysis),
            build_fetch_client(&config.fetch)?,
            AssessOptions::from_config(config),
            cancel,
        ))
    }

    pub fn with_components(
        supervisor: RuntimeSupervisor,
        resolver: ModelResolver,
        analyzer: RecursiveAnalyzer,
        http: Client,
        options: AssessOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            supervisor,
            resolver,
            analyzer,
            http,
            options,
            cancel,
        }
    }

    /// Always produces a report; the first failure ends the run and is
    /// recorded in it.
    pub async fn assess(&self, target: &str) -> UrlReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("assess", %run_id, url = %target);
        let mut report = UrlReport::new(target);

        match self.run(target).instrument(span).await {
            Ok(output) => {
                info!("Assessment of {} completed", target);
                report.output = Some(output);
            }
            Err(e) => {
                error!("Assessment of {} failed: {}", target, e);
                report.fail(e.to_string());
            }
        }

        report.complete();
        report
    }

    async fn run(&self, target: &str) -> Result<String> {
        // A malformed target should not start a runtime.
        parse_target(target)?;

        let mut handle = self
            .supervisor
            .ensure_running(self.options.runtime_url.as_deref(), &self.cancel)
            .await?;
        let ctx = handle.context(self.cancel.clone());

        handle
            .supervise(&ctx, async {
                let model = self
                    .resolver
                    .resolve(&ctx, &self.options.model, self.options.allow_download)
                    .await?;
                info!("Using model {} at {}", model.name, ctx.endpoint());

                let document = fetch_target(&self.http, target, ctx.cancel_token()).await?;

                self.analyzer
                    .analyze(&ctx, &model, &document, &HtmlAnalysisPrompts)
                    .await
            })
            .await
    }
}
