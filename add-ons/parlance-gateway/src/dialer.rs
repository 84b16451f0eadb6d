//! Outbound dialer worker.
//!
//! Continuously takes the next un-called phonebook entry, places a call
//! through the transport boundary, and supervises it by polling the session
//! store until the session disappears (the call-ended signal) or a maximum
//! call duration passes. Finished entries are marked called with a timestamp
//! so the worker makes progress even when individual calls fail.

use crate::transport::CallTransport;
use parlance_core::{profile_for, CallDirection, CallStore, ConversationSession};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Dialer tunables.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | PARLANCE_DIALER_ENABLED | false | Run the outbound dial worker. |
/// | PARLANCE_DIALER_FROM | (unset) | Caller id for outbound calls. |
#[derive(Debug, Clone)]
pub struct DialerConfig {
    pub enabled: bool,
    /// Caller id presented on outbound calls.
    pub from_number: String,
    /// Delay between dial cycles.
    pub cycle_delay: Duration,
    /// Interval for polling the session store during a call.
    pub poll_interval: Duration,
    /// Ceiling on one call's supervision.
    pub max_call_duration: Duration,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            from_number: String::new(),
            cycle_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            max_call_duration: Duration::from_secs(300),
        }
    }
}

impl DialerConfig {
    pub fn from_env() -> Self {
        let enabled = std::env::var("PARLANCE_DIALER_ENABLED")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let from_number = std::env::var("PARLANCE_DIALER_FROM")
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        Self {
            enabled,
            from_number,
            ..Self::default()
        }
    }
}

/// The worker loop: one dial per cycle, forever.
pub async fn run_dialer(
    config: DialerConfig,
    store: Arc<CallStore>,
    transport: Arc<dyn CallTransport>,
) {
    info!("📞 outbound dialer worker started");
    loop {
        match dial_next(&config, &store, transport.as_ref()).await {
            Ok(true) => debug!("dial finished; waiting for the next cycle"),
            Ok(false) => debug!("phonebook has no un-called entries"),
            Err(err) => error!(error = %err, "dial cycle failed"),
        }
        tokio::time::sleep(config.cycle_delay).await;
    }
}

/// Dials the next un-called entry, if any. Returns whether a dial happened.
async fn dial_next(
    config: &DialerConfig,
    store: &CallStore,
    transport: &dyn CallTransport,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let Some(entry) = store.next_uncalled()? else {
        return Ok(false);
    };

    info!(phone = %entry.phone_number, language = entry.language.as_str(), "starting a dial");
    let profile = profile_for(entry.language, CallDirection::Outbound);
    let conversation_id = transport
        .start_call(&config.from_number, &entry.phone_number, &profile)
        .await?;

    let Some(conversation_id) = conversation_id else {
        warn!(phone = %entry.phone_number, "failed to start the call");
        // Mark anyway so a permanently failing number cannot wedge the queue.
        store.mark_called(entry.id)?;
        return Ok(true);
    };

    // Register the session so supervision has a record to poll; the call
    // handler owns it from here.
    let session = ConversationSession::with_thread_id(
        conversation_id.clone(),
        entry.language,
        CallDirection::Outbound,
    );
    store.save_session(&session)?;

    supervise_call(config, store, &conversation_id, &entry.phone_number).await?;

    store.delete_session(&conversation_id)?;
    store.mark_called(entry.id)?;
    info!(phone = %entry.phone_number, "call finished and entry marked called");
    Ok(true)
}

/// Polls the session store until the session is gone or the duration ceiling
/// is reached. Deletion of the session is the call-ended signal.
async fn supervise_call(
    config: &DialerConfig,
    store: &CallStore,
    thread_id: &str,
    phone_number: &str,
) -> Result<(), parlance_core::CoreError> {
    let mut elapsed = Duration::ZERO;
    loop {
        if !store.session_exists(thread_id)? {
            info!(phone = %phone_number, "call ended");
            return Ok(());
        }
        debug!(phone = %phone_number, "call in progress");
        tokio::time::sleep(config.poll_interval).await;
        elapsed += config.poll_interval;
        if elapsed >= config.max_call_duration {
            warn!(phone = %phone_number, "call exceeded maximum duration");
            return Ok(());
        }
    }
}
