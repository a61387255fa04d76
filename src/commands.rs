use std::fmt;
use std::str::FromStr;

pub const HELP: &str = "Commands: p pause/resume, c cancel all, r retry failed, a URL add, s save settings, q quit";

/// One line typed on stdin while downloads run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    TogglePause,
    Cancel,
    Retry,
    Add(String),
    Save,
    Quit,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError(String);

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseCommandError {}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "p" | "pause" | "resume" => Command::TogglePause,
            "c" | "cancel" => Command::Cancel,
            "r" | "retry" => Command::Retry,
            "a" | "add" if rest.is_empty() => {
                return Err(ParseCommandError("Usage: a URL".to_string()))
            }
            "a" | "add" => Command::Add(rest.to_string()),
            "s" | "save" => Command::Save,
            "q" | "quit" | "exit" => Command::Quit,
            "h" | "help" | "?" => Command::Help,
            _ => {
                return Err(ParseCommandError(format!(
                    "Unknown command '{}'. {}",
                    line, HELP
                )))
            }
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_letter_commands() {
        assert_eq!("p".parse::<Command>(), Ok(Command::TogglePause));
        assert_eq!(" c ".parse::<Command>(), Ok(Command::Cancel));
        assert_eq!("r".parse::<Command>(), Ok(Command::Retry));
        assert_eq!("s".parse::<Command>(), Ok(Command::Save));
        assert_eq!("Q".parse::<Command>(), Ok(Command::Quit));
        assert_eq!("?".parse::<Command>(), Ok(Command::Help));
    }

    #[test]
    fn test_add_takes_url() {
        assert_eq!(
            "a  https://youtu.be/dQw4w9WgXcQ ".parse::<Command>(),
            Ok(Command::Add("https://youtu.be/dQw4w9WgXcQ".to_string()))
        );
        assert!("a".parse::<Command>().is_err());
    }

    #[test]
    fn test_unknown_command() {
        let err = "download".parse::<Command>().unwrap_err();
        assert!(err.to_string().starts_with("Unknown command 'download'"));
    }
}
