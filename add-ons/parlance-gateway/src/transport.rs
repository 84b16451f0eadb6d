//! Call transport boundary.
//!
//! Placing calls and streaming audio belong to the telephony provider; this
//! module only defines the seam the dialer talks through. The loopback
//! transport stands in wherever no provider is wired, so the rest of the
//! pipeline can be exercised without placing real calls.

use parlance_core::LanguageProfile;
use tracing::info;
use uuid::Uuid;

pub type TransportResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Boundary to the telephony provider.
#[async_trait::async_trait]
pub trait CallTransport: Send + Sync {
    /// Places a call. Returns the conversation id correlating the call to
    /// its session, or `None` when the provider could not start the call.
    async fn start_call(
        &self,
        from: &str,
        to: &str,
        profile: &LanguageProfile,
    ) -> TransportResult<Option<String>>;
}

/// Transport stub: hands out a conversation id without touching a provider.
#[derive(Debug, Default)]
pub struct LoopbackTransport;

#[async_trait::async_trait]
impl CallTransport for LoopbackTransport {
    async fn start_call(
        &self,
        from: &str,
        to: &str,
        profile: &LanguageProfile,
    ) -> TransportResult<Option<String>> {
        let conversation_id = Uuid::new_v4().to_string();
        info!(
            %from,
            %to,
            voice = %profile.synthesizer_voice,
            conversation_id = %conversation_id,
            "loopback transport: pretending to place call"
        );
        Ok(Some(conversation_id))
    }
}
