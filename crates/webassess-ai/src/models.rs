use crate::inference::InferenceClient;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webassess_core::{
    AllowList, AssessContext, AssessError, DownloadConfig, ModelDescriptor, PullStatus, Result,
};

/// Receives pull status records as they are decoded.
pub trait PullObserver: Send + Sync {
    fn on_status(&self, status: &PullStatus);
}

/// Emits each pull status as a log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPullObserver;

impl PullObserver for LogPullObserver {
    fn on_status(&self, status: &PullStatus) {
        match status.percent() {
            Some(percent) => info!("{} ({:.1}%)", status.status, percent),
            None => info!("{}", status.status),
        }
    }
}

/// Next action for a requested model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
    UsePresent,
    Download,
}

/// Decide how to obtain `name` from presence, operator consent and the allow-list.
pub fn plan_resolution(
    name: &str,
    present: bool,
    allow_download: bool,
    allow_list: &AllowList,
) -> Result<ResolutionStep> {
    if present {
        return Ok(ResolutionStep::UsePresent);
    }
    if !allow_download {
        return Err(AssessError::ModelUnavailable(name.to_string()));
    }
    if !allow_list.contains(name) {
        return Err(AssessError::ModelNotAllowed(name.to_string()));
    }
    Ok(ResolutionStep::Download)
}

/// Resolves model names to descriptors of models present on the runtime.
pub struct ModelResolver {
    client: Arc<dyn InferenceClient>,
    allow_list: AllowList,
    download: DownloadConfig,
    observer: Arc<dyn PullObserver>,
}

impl ModelResolver {
    pub fn new(client: Arc<dyn InferenceClient>, download: DownloadConfig) -> Self {
        Self {
            client,
            allow_list: AllowList::builtin(),
            download,
            observer: Arc::new(LogPullObserver),
        }
    }

    pub fn with_allow_list(mut self, allow_list: AllowList) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PullObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    pub async fn list_models(&self, ctx: &AssessContext) -> Result<Vec<ModelDescriptor>> {
        tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => Err(AssessError::Cancelled),
            models = self.client.list_models(ctx.endpoint()) => models,
        }
    }

    pub async fn is_present(&self, ctx: &AssessContext, name: &str) -> Result<bool> {
        Ok(self.describe(ctx, name).await?.is_some())
    }

    /// Descriptor of `name` from a fresh listing, if present.
    pub async fn describe(&self, ctx: &AssessContext, name: &str) -> Result<Option<ModelDescriptor>> {
        let models = self.list_models(ctx).await?;
        Ok(models.into_iter().find(|model| model.name == name))
    }

    pub async fn resolve(
        &self,
        ctx: &AssessContext,
        name: &str,
        allow_download: bool,
    ) -> Result<ModelDescriptor> {
        let present = self.is_present(ctx, name).await?;

        match plan_resolution(name, present, allow_download, &self.allow_list)? {
            ResolutionStep::UsePresent => {
                // The model can disappear between the two listings.
                self.describe(ctx, name)
                    .await?
                    .ok_or_else(|| AssessError::ModelUnavailable(name.to_string()))
            }
            ResolutionStep::Download => {
                info!("Model '{}' not present, downloading", name);
                self.download(ctx, name).await?;
                self.describe(ctx, name)
                    .await?
                    .ok_or_else(|| AssessError::ModelNotReadyAfterDownload(name.to_string()))
            }
        }
    }

    /// Pull `name`, forwarding every status record to the observer.
    ///
    /// A decoder task feeds a bounded queue; when the queue is full the decoder
    /// waits, so an endless status stream cannot grow memory. The whole pull is
    /// bounded by the configured download timeout and by cancellation.
    pub async fn download(&self, ctx: &AssessContext, name: &str) -> Result<()> {
        let mut stream = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => return Err(AssessError::Cancelled),
            stream = self.client.pull(ctx.endpoint(), name) => stream?,
        };

        let (tx, mut rx) = mpsc::channel::<Result<PullStatus>>(self.download.queue_depth.max(1));

        let producer = tokio::spawn(async move {
            while let Some(record) = stream.next().await {
                let failed = record.is_err();
                if tx.send(record).await.is_err() {
                    // Consumer gone: stop reading the network stream.
                    break;
                }
                if failed {
                    break;
                }
            }
        });

        let observer = Arc::clone(&self.observer);
        let consume = async move {
            let mut forwarded = 0usize;
            while let Some(record) = rx.recv().await {
                let status = record?;
                if let Some(error) = status.error {
                    return Err(AssessError::DownloadRejected(error));
                }
                observer.on_status(&status);
                forwarded += 1;
            }
            Ok::<usize, AssessError>(forwarded)
        };

        let timeout = self.download.timeout();
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => Err(AssessError::Cancelled),
            result = tokio::time::timeout(timeout, consume) => match result {
                Ok(result) => result,
                Err(_) => Err(AssessError::DownloadRejected(format!(
                    "download of '{}' did not finish within {:?}",
                    name, timeout
                ))),
            },
        };

        producer.abort();

        let forwarded = outcome?;
        debug!("Pull of '{}' finished after {} status records", name, forwarded);
        Ok(())
    }
}
