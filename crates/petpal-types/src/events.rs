use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { uid: String, handle: String },

    /// Full contents of a subscribed path after the change numbered `seq`.
    /// `value` is `None` when nothing is stored there.
    Snapshot {
        path: String,
        seq: u64,
        value: Option<Value>,
    },

    /// A subscription stopped delivering; the client may subscribe again.
    SubscriptionFailed { path: String, message: String },

    /// A command was rejected
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving snapshots for a store path (e.g. `posts`, `notifications/{uid}`)
    Subscribe { path: String },

    /// Release a previously subscribed path
    Unsubscribe { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_shape() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"Subscribe","data":{"path":"posts"}}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::Subscribe { path } if path == "posts"));
    }
}
