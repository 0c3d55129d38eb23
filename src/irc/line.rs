// IRC line codec (RFC 1459 / RFC 2812 message format)
// Parses `[@tags] [:prefix] COMMAND params... [:trailing]` and renders it back

use anyhow::{anyhow, Result};
use std::fmt;

/// RFC 2812 line limit, CR-LF included
pub const MAX_LINE_LEN: usize = 512;

// Room for the `:nick!user@host ` prefix the server adds when relaying a line
const RELAY_PREFIX_ALLOWANCE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Line {
    pub fn new(command: &str, params: Vec<String>) -> Self {
        Line {
            prefix: None,
            command: command.to_string(),
            params,
        }
    }

    /// Parse one line as received from the server. Trailing CR/LF is ignored.
    pub fn parse(raw: &str) -> Result<Line> {
        let mut rest = raw.trim_end_matches(['\r', '\n']);

        // IRCv3 message tags carry nothing the adapter uses
        if rest.starts_with('@') {
            rest = match rest.split_once(' ') {
                Some((_, after)) => after.trim_start(),
                None => return Err(anyhow!("Line has tags but no command: {}", raw)),
            };
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, after) = stripped
                .split_once(' ')
                .ok_or_else(|| anyhow!("Line has a prefix but no command: {}", raw))?;
            rest = after.trim_start();
            Some(prefix.to_string())
        } else {
            None
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };
        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words
            .next()
            .ok_or_else(|| anyhow!("Line has no command: {}", raw))?
            .to_ascii_uppercase();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Ok(Line {
            prefix,
            command,
            params,
        })
    }

    /// Nickname part of a `nick!user@host` prefix
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|prefix| prefix.split(['!', '@']).next().unwrap_or(prefix))
            .filter(|nick| !nick.is_empty())
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Line::new("PRIVMSG", vec![target.to_string(), text.to_string()])
    }

    /// Longest PRIVMSG text to `target` that still fits one line once relayed
    pub fn privmsg_text_budget(target: &str) -> usize {
        let overhead = RELAY_PREFIX_ALLOWANCE + "PRIVMSG ".len() + target.len() + " :".len() + "\r\n".len();
        MAX_LINE_LEN.saturating_sub(overhead)
    }

    pub fn join(channel: &str) -> Self {
        Line::new("JOIN", vec![channel.to_string()])
    }

    pub fn quit(reason: &str) -> Self {
        Line::new("QUIT", vec![reason.to_string()])
    }

    pub fn nick(nick: &str) -> Self {
        Line::new("NICK", vec![nick.to_string()])
    }

    pub fn user(user: &str, hostname: &str, server: &str, realname: &str) -> Self {
        Line::new(
            "USER",
            vec![
                user.to_string(),
                hostname.to_string(),
                server.to_string(),
                realname.to_string(),
            ],
        )
    }

    pub fn pong(token: &str) -> Self {
        Line::new("PONG", vec![token.to_string()])
    }

    pub fn cap(params: &[&str]) -> Self {
        Line::new("CAP", params.iter().map(|p| p.to_string()).collect())
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        f.write_str(&self.command)?;
        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                write!(f, " {}", param)?;
            }
            // Trailing form only when the last param needs it
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                write!(f, " :{}", last)?;
            } else {
                write!(f, " {}", last)?;
            }
        }
        Ok(())
    }
}
