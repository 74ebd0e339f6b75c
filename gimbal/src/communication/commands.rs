use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    error::GimbalError,
    models::{AxisId, StatusReport},
};

pub const DEFAULT_SPRAY_SECONDS: f64 = 0.5;

/// One request on the command port. Serialized as a JSON object whose `cmd`
/// field selects the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum GimbalCommand {
    Move { axis: AxisId, position_degrees: f64 },
    Stop { axis: AxisId },
    Enable { axis: AxisId, on: bool },
    Laser { on: bool },
    Spray { duration_seconds: f64 },
    Status,
    Home,
}

/// Reply to a single request. Variant order matters for untagged decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Status(StatusReport),
    Error { error: String },
    Ok { status: String },
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ok {
            status: "ok".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            error: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Reply::error(GimbalError::CommandTimeout.to_string())
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Reply::Error { .. })
    }

    pub fn into_result(self) -> Result<Reply, GimbalError> {
        match self {
            Reply::Error { error } => Err(match error.as_str() {
                "timeout" => GimbalError::CommandTimeout,
                "unknown command" => GimbalError::UnknownCommand,
                _ => GimbalError::Rejected(error),
            }),
            reply => Ok(reply),
        }
    }

    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"failed to encode reply: {}"}}"#, e));
        line.push('\n');
        line
    }
}

#[derive(Deserialize)]
struct MoveParams {
    axis: AxisId,
    position_degrees: f64,
}

#[derive(Deserialize)]
struct AxisParams {
    axis: AxisId,
}

#[derive(Deserialize)]
struct SwitchParams {
    on: bool,
}

#[derive(Deserialize)]
struct SprayParams {
    #[serde(default = "default_spray_seconds")]
    duration_seconds: f64,
}

fn default_spray_seconds() -> f64 {
    DEFAULT_SPRAY_SECONDS
}

fn params<T: for<'de> Deserialize<'de>>(cmd: &str, request: Value) -> Result<T, GimbalError> {
    serde_json::from_value(request)
        .map_err(|e| GimbalError::Malformed(format!("invalid parameters for {}: {}", cmd, e)))
}

pub fn parse_command(line: &str) -> Result<GimbalCommand, GimbalError> {
    let request: Value = serde_json::from_str(line.trim())
        .map_err(|e| GimbalError::Malformed(format!("not a JSON object: {}", e)))?;

    let cmd = request
        .get("cmd")
        .and_then(Value::as_str)
        .ok_or(GimbalError::UnknownCommand)?
        .to_string();

    let command = match cmd.as_str() {
        "move" => {
            let MoveParams {
                axis,
                position_degrees,
            } = params(&cmd, request)?;
            if !position_degrees.is_finite() {
                return Err(GimbalError::Malformed(
                    "position_degrees must be finite".to_string(),
                ));
            }
            GimbalCommand::Move {
                axis,
                position_degrees,
            }
        }
        "stop" => {
            let AxisParams { axis } = params(&cmd, request)?;
            GimbalCommand::Stop { axis }
        }
        "enable1" | "enable2" => {
            let SwitchParams { on } = params(&cmd, request)?;
            let axis = if cmd == "enable1" {
                AxisId::One
            } else {
                AxisId::Two
            };
            GimbalCommand::Enable { axis, on }
        }
        "laser" => {
            let SwitchParams { on } = params(&cmd, request)?;
            GimbalCommand::Laser { on }
        }
        "spray" => {
            let SprayParams { duration_seconds } = params(&cmd, request)?;
            GimbalCommand::Spray { duration_seconds }
        }
        "status" => GimbalCommand::Status,
        "home" => GimbalCommand::Home,
        _ => return Err(GimbalError::UnknownCommand),
    };

    Ok(command)
}

impl GimbalCommand {
    pub fn to_json(&self) -> Value {
        match self {
            GimbalCommand::Move {
                axis,
                position_degrees,
            } => json!({ "cmd": "move", "axis": axis, "position_degrees": position_degrees }),
            GimbalCommand::Stop { axis } => json!({ "cmd": "stop", "axis": axis }),
            GimbalCommand::Enable { axis, on } => {
                json!({ "cmd": format!("enable{}", axis.number()), "on": on })
            }
            GimbalCommand::Laser { on } => json!({ "cmd": "laser", "on": on }),
            GimbalCommand::Spray { duration_seconds } => {
                json!({ "cmd": "spray", "duration_seconds": duration_seconds })
            }
            GimbalCommand::Status => json!({ "cmd": "status" }),
            GimbalCommand::Home => json!({ "cmd": "home" }),
        }
    }

    pub fn to_line(&self) -> String {
        self.to_json().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GimbalLinkState;

    #[test]
    fn parses_every_command() {
        assert_eq!(
            parse_command(r#"{"cmd":"move","axis":2,"position_degrees":-12.5}"#).unwrap(),
            GimbalCommand::Move {
                axis: AxisId::Two,
                position_degrees: -12.5
            }
        );
        assert_eq!(
            parse_command(r#"{"cmd":"enable1","on":false}"#).unwrap(),
            GimbalCommand::Enable {
                axis: AxisId::One,
                on: false
            }
        );
        assert_eq!(
            parse_command(r#"{"cmd":"laser","on":true}"#).unwrap(),
            GimbalCommand::Laser { on: true }
        );
        assert_eq!(
            parse_command("{\"cmd\":\"status\"}\n").unwrap(),
            GimbalCommand::Status
        );
        assert_eq!(
            parse_command(r#"{"cmd":"stop","axis":1}"#).unwrap(),
            GimbalCommand::Stop { axis: AxisId::One }
        );
    }

    #[test]
    fn spray_duration_defaults() {
        assert_eq!(
            parse_command(r#"{"cmd":"spray"}"#).unwrap(),
            GimbalCommand::Spray {
                duration_seconds: 0.5
            }
        );
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert!(matches!(
            parse_command(r#"{"cmd":"dance"}"#),
            Err(GimbalError::UnknownCommand)
        ));
        assert!(matches!(
            parse_command(r#"{"axis":1}"#),
            Err(GimbalError::UnknownCommand)
        ));
        assert!(matches!(
            parse_command("move 1 10"),
            Err(GimbalError::Malformed(_))
        ));
        assert!(matches!(
            parse_command(r#"{"cmd":"move","axis":3,"position_degrees":1.0}"#),
            Err(GimbalError::Malformed(_))
        ));
        assert!(matches!(
            parse_command(r#"{"cmd":"laser"}"#),
            Err(GimbalError::Malformed(_))
        ));
    }

    #[test]
    fn encoded_commands_parse_back() {
        let command = GimbalCommand::Enable {
            axis: AxisId::Two,
            on: true,
        };
        assert_eq!(command.to_line(), r#"{"cmd":"enable2","on":true}"#);
        assert_eq!(parse_command(&command.to_line()).unwrap(), command);
    }

    #[test]
    fn replies_decode_to_the_right_variant() {
        let decode = |line: &str| serde_json::from_str::<Reply>(line).unwrap();

        assert_eq!(decode(r#"{"status":"ok"}"#), Reply::ok());
        assert_eq!(decode(r#"{"error":"timeout"}"#), Reply::timeout());

        let status = decode(
            r#"{"axis1_degrees":1.5,"axis2_degrees":0.0,"laser_on":true,
                "link_state":"ready","sensor1":false,"sensor2":true}"#,
        );
        match status {
            Reply::Status(report) => {
                assert_eq!(report.link_state, GimbalLinkState::Ready);
                assert!(report.sensor2);
            }
            other => panic!("expected status, got {:?}", other),
        }

        assert_eq!(Reply::ok().to_line(), "{\"status\":\"ok\"}\n");
        assert!(matches!(
            Reply::timeout().into_result(),
            Err(GimbalError::CommandTimeout)
        ));
    }
}
