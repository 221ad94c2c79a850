//! Node lifecycle events that move a server's status.

use serde_json::Value;

use dcsbus_core::protocol::Envelope;

use super::server::ServerStatus;

/// Commands that carry a status change.
pub const LIFECYCLE_COMMANDS: [&str; 6] = [
    "onMissionLoadBegin",
    "onMissionLoadEnd",
    "onSimulationPause",
    "onSimulationResume",
    "onSimulationStop",
    "onShutdown",
];

/// Status implied by a lifecycle event, `None` for every other command.
pub fn status_for_event(env: &Envelope) -> Option<ServerStatus> {
    let status = match env.command.as_str() {
        "onMissionLoadBegin" => ServerStatus::Loading,
        "onMissionLoadEnd" => {
            if env.get("pause").and_then(Value::as_bool).unwrap_or(false) {
                ServerStatus::Paused
            } else {
                ServerStatus::Running
            }
        }
        "onSimulationPause" => ServerStatus::Paused,
        "onSimulationResume" => ServerStatus::Running,
        "onSimulationStop" => ServerStatus::Stopped,
        "onShutdown" => ServerStatus::Shutdown,
        _ => return None,
    };
    Some(status)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn mission_load_end_respects_pause() {
        let paused = Envelope::new("Alpha", "onMissionLoadEnd").with_field("pause", json!(true));
        let running = Envelope::new("Alpha", "onMissionLoadEnd");
        assert_eq!(status_for_event(&paused), Some(ServerStatus::Paused));
        assert_eq!(status_for_event(&running), Some(ServerStatus::Running));
    }

    #[test]
    fn every_lifecycle_command_maps() {
        for cmd in LIFECYCLE_COMMANDS {
            assert!(status_for_event(&Envelope::new("Alpha", cmd)).is_some(), "{cmd}");
        }
        assert_eq!(status_for_event(&Envelope::new("Alpha", "getVariable")), None);
    }
}
