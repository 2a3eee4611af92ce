// Cross-context message envelopes
// Shared by the injected provider, the content relay and the service worker

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Browser tab identifier as handed out by the host platform
pub type TabRef = u32;

/// Popup window identifier as handed out by the host platform
pub type WindowRef = u32;

/// The three isolated execution contexts of the extension
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextId {
    ServiceWorker,
    Content,
    Injected,
}

/// Request addressed to a single context (or, for CONTENT without a tab, all tabs)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub target: ContextId,
    pub method: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabRef>,
    pub correlation_id: Uuid,
}

impl Message {
    pub fn new(target: ContextId, method: impl Into<String>, payload: Value) -> Self {
        Self {
            target,
            method: method.into(),
            payload,
            tab_id: None,
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn with_tab(mut self, tab_id: Option<TabRef>) -> Self {
        self.tab_id = tab_id;
        self
    }
}

/// Reply to a [`Message`], matched by `correlation_id`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub correlation_id: Uuid,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

impl MessageResponse {
    pub fn success(correlation_id: Uuid, result: Value) -> Self {
        Self {
            correlation_id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Successful reply carrying no result (null)
    pub fn empty(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            ok: true,
            result: None,
            error: None,
        }
    }

    pub fn failure(correlation_id: Uuid, error: ErrorEnvelope) -> Self {
        Self {
            correlation_id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC style error returned to dApps
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub code: i64,
    pub message: String,
}

impl ErrorEnvelope {
    pub const USER_REJECTED: i64 = 4001;
    pub const INVALID_INPUT: i64 = -32000;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const INTERNAL: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(Self::USER_REJECTED, "User rejected the request")
    }

    pub fn invalid_input() -> Self {
        Self::new(Self::INVALID_INPUT, "Invalid input")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    pub fn internal() -> Self {
        Self::new(Self::INTERNAL, "Internal error")
    }
}
