//! # Parlance Core
//!
//! Shared foundation for the Parlance voice-call agent: conversation sessions,
//! language profiles, runtime settings, and the sled-backed call-record store.
//! The dialog orchestration engine itself lives in `parlance-dialog`; this
//! crate holds only the state it operates on and the plumbing around it.

pub mod error;
pub mod language;
pub mod session;
pub mod settings;
pub mod store;

pub use error::{CoreError, CoreResult};
pub use language::{profile_for, CallDirection, Language, LanguageProfile};
pub use session::{ConversationSession, Message, Role, ToolCall, PRIMARY_SKILL};
pub use settings::{CallSettings, SettingsFile};
pub use store::{CallStore, PhonebookEntry};
