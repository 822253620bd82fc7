//! Game-role move commands.

use std::str::FromStr;

use bci_types::EventCode;
use protocol::{OutboundPayload, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown move '{0}', expected up, down, left or right")]
    UnknownMove(String),
    #[error("missing score")]
    MissingScore,
    #[error("invalid score '{0}'")]
    InvalidScore(String),
}

/// A player move with the score it leaves on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveCommand {
    pub code: EventCode,
    pub score: u32,
}

impl MoveCommand {
    /// Move event with a 32-bit score element.
    pub fn to_payload(self) -> Result<OutboundPayload, ProtocolError> {
        OutboundPayload::new(self.code as u8, 0, 32, vec![self.score])
    }
}

impl FromStr for MoveCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let word = words.next().ok_or(CommandError::Empty)?;
        let code = match word.to_ascii_lowercase().as_str() {
            "up" => EventCode::Up,
            "down" => EventCode::Down,
            "left" => EventCode::Left,
            "right" => EventCode::Right,
            _ => return Err(CommandError::UnknownMove(word.to_string())),
        };
        let score = words.next().ok_or(CommandError::MissingScore)?;
        let score = score
            .parse()
            .map_err(|_| CommandError::InvalidScore(score.to_string()))?;
        Ok(Self { code, score })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_moves() {
        let cmd: MoveCommand = "Right 2048".parse().unwrap();
        assert_eq!(
            cmd,
            MoveCommand {
                code: EventCode::Right,
                score: 2048
            }
        );

        let payload = cmd.to_payload().unwrap();
        assert_eq!(payload.event_code, 4);
        assert_eq!(payload.event_bits, 32);
        assert_eq!(payload.data_size, 4);
        assert_eq!(payload.data, vec![2048]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<MoveCommand>(), Err(CommandError::Empty));
        assert_eq!(
            "jump 4".parse::<MoveCommand>(),
            Err(CommandError::UnknownMove("jump".to_string()))
        );
        assert_eq!("up".parse::<MoveCommand>(), Err(CommandError::MissingScore));
        assert_eq!(
            "up -1".parse::<MoveCommand>(),
            Err(CommandError::InvalidScore("-1".to_string()))
        );
    }
}
