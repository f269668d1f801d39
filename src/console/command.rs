//! Console command grammar.

/// One parsed console input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Exit,
    Unknown(String),
}

impl Command {
    /// Parse a line by exact, case-sensitive match of the trimmed text.
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "help" => Command::Help,
            "status" => Command::Status,
            "exit" => Command::Exit,
            other => Command::Unknown(other.to_string()),
        }
    }

    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::Status => "status",
            Command::Exit => "exit",
            Command::Unknown(_) => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_commands() {
        assert_eq!(Command::parse("help"), Command::Help);
        assert_eq!(Command::parse("status\r\n"), Command::Status);
        assert_eq!(Command::parse("  exit "), Command::Exit);
    }

    #[test]
    fn no_partial_or_case_insensitive_matches() {
        assert_eq!(Command::parse("HELP"), Command::Unknown("HELP".to_string()));
        assert_eq!(Command::parse("helpme"), Command::Unknown("helpme".to_string()));
        assert_eq!(Command::parse("exit now"), Command::Unknown("exit now".to_string()));
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
    }
}
