use serde_json::Value;

/// One line of operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// Tear down and relaunch the same executable.
    Restart,
    /// Clear the screen and print the status banner.
    Status,
    /// Execute a command handler by name or alias.
    Run { name: String, args: Vec<Value> },
    /// Dispatch an event to its listeners.
    Emit { event: String, args: Vec<Value> },
    /// Print data store collection statistics.
    Stats,
    /// Rediscover and reload every handler source.
    Reload,
    Help,
    Empty,
    Unknown(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return ConsoleCommand::Empty;
        };

        match head.to_lowercase().as_str() {
            "restart" => ConsoleCommand::Restart,
            "clear" | "status" => ConsoleCommand::Status,
            "stats" => ConsoleCommand::Stats,
            "reload" => ConsoleCommand::Reload,
            "help" => ConsoleCommand::Help,
            "run" | "emit" => {
                let Some(target) = words.next() else {
                    return ConsoleCommand::Unknown(line.trim().to_string());
                };
                let args = words.map(parse_arg).collect();
                if head.eq_ignore_ascii_case("run") {
                    ConsoleCommand::Run {
                        name: target.to_string(),
                        args,
                    }
                } else {
                    ConsoleCommand::Emit {
                        event: target.to_string(),
                        args,
                    }
                }
            }
            _ => ConsoleCommand::Unknown(line.trim().to_string()),
        }
    }
}

/// JSON literals stay typed, anything else is a string.
fn parse_arg(word: &str) -> Value {
    serde_json::from_str(word).unwrap_or_else(|_| Value::String(word.to_string()))
}
