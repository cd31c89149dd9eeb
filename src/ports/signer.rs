use async_trait::async_trait;
use http::request::Parts;

/// Boxed error returned by signers.
pub type SignError = Box<dyn std::error::Error + Send + Sync>;

/// Port for per-request signing (for example cloud request signatures).
///
/// Runs after the URL, auth and user-agent have been applied, once per
/// attempt. The body is always buffered when a signer is configured.
#[async_trait]
pub trait Signer: Send + Sync + 'static {
    async fn sign_request(&self, parts: &mut Parts, body: &[u8]) -> Result<(), SignError>;
}
