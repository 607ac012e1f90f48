use async_trait::async_trait;
use futures::stream::BoxStream;
use webassess_core::{ModelDescriptor, PullStatus, Result};

/// Decoded pull status records, in the order the runtime sent them.
pub type PullStream = BoxStream<'static, Result<PullStatus>>;

/// HTTP surface of a local inference runtime.
///
/// Every call names the endpoint explicitly so that probing candidate
/// endpoints and talking to the resolved one go through the same client.
/// Implementations never retry; callers race each call against cancellation.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// One lightweight liveness request with a short fixed timeout.
    async fn probe(&self, base_url: &str) -> bool;

    /// List the models present on the runtime.
    ///
    /// Fails with `RuntimeQueryFailed` on transport, status or parse errors.
    async fn list_models(&self, base_url: &str) -> Result<Vec<ModelDescriptor>>;

    /// Run one generation and return the full text.
    ///
    /// A prompt that does not fit the model fails with `ContextLengthExceeded`;
    /// any other failure is `InvocationFailed`.
    async fn generate(
        &self,
        base_url: &str,
        model: &ModelDescriptor,
        prompt: &str,
    ) -> Result<String>;

    /// Start pulling a model. A non-success initial response fails with
    /// `DownloadRejected`; the returned stream yields `DownloadDecodeFailed`
    /// if a record cannot be decoded.
    async fn pull(&self, base_url: &str, name: &str) -> Result<PullStream>;

    /// Get the name of this runtime
    fn provider_name(&self) -> &str;
}
