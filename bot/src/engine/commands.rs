use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use super::events::ChannelId;

/// Prefix-free command text as typed by a user, e.g. `listen <#123>`.
///
/// Channel arguments are optional; `None` means the channel the command
/// was invoked in.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Listen(Option<ChannelId>),
    Announce(Option<ChannelId>),
    Channels,
    Ignore(Option<ChannelId>),
    /// Backfill the invoking channel. The argument is parsed by [`parse_since`]
    /// once the guild is known to be configured.
    Slurp(String),
}

/// Where a backfill starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlurpSince {
    All,
    After(DateTime<Utc>),
}

/// A rejected command. `Display` is the reply shown to the invoker.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    Empty,
    Unknown(String),
    BadChannel(String),
    MissingArgument(&'static str),
    UnexpectedArgument(String),
    UnparseableDatetime,
}

const USAGE: &str = "listen [#channel], announce [#channel], channels, ignore [#channel], slurp <datetime|all>";

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Empty => write!(f, "Commands: {USAGE}"),
            CommandError::Unknown(name) => write!(f, "Unknown command `{name}`. Commands: {USAGE}"),
            CommandError::BadChannel(arg) => {
                write!(f, "`{arg}` is not a channel. Use a #channel mention or a channel id.")
            }
            CommandError::MissingArgument(usage) => write!(f, "Usage: {usage}"),
            CommandError::UnexpectedArgument(name) => write!(f, "`{name}` takes no arguments."),
            CommandError::UnparseableDatetime => write!(f, "Datetime unparseable!"),
        }
    }
}

impl std::error::Error for CommandError {}

impl Command {
    /// Parse command text. A leading bot mention (`<@id>` or `<@!id>`) is skipped.
    pub fn parse(content: &str) -> Result<Self, CommandError> {
        let mut words = content.split_whitespace().peekable();
        if words.peek().is_some_and(|w| is_user_mention(w)) {
            words.next();
        }

        let Some(name) = words.next() else {
            return Err(CommandError::Empty);
        };
        let args: Vec<&str> = words.collect();

        match name.to_lowercase().as_str() {
            "listen" => Ok(Command::Listen(optional_channel(&args)?)),
            "announce" => Ok(Command::Announce(optional_channel(&args)?)),
            "ignore" => Ok(Command::Ignore(optional_channel(&args)?)),
            "channels" => {
                if args.is_empty() {
                    Ok(Command::Channels)
                } else {
                    Err(CommandError::UnexpectedArgument("channels".into()))
                }
            }
            "slurp" => {
                if args.is_empty() {
                    Err(CommandError::MissingArgument("slurp <datetime|all>"))
                } else {
                    Ok(Command::Slurp(args.join(" ")))
                }
            }
            _ => Err(CommandError::Unknown(name.to_string())),
        }
    }
}

fn is_user_mention(word: &str) -> bool {
    word.strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
        .map(|id| id.strip_prefix('!').unwrap_or(id))
        .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
}

fn optional_channel(args: &[&str]) -> Result<Option<ChannelId>, CommandError> {
    match args {
        [] => Ok(None),
        [arg] => parse_channel(arg).map(Some),
        _ => Err(CommandError::BadChannel(args.join(" "))),
    }
}

/// `<#123>` or a bare `123`.
pub fn parse_channel(arg: &str) -> Result<ChannelId, CommandError> {
    let id = arg
        .strip_prefix("<#")
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(arg);
    id.parse::<ChannelId>()
        .map_err(|_| CommandError::BadChannel(arg.to_string()))
}

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Parse a backfill start: `all`, RFC 3339, or a UTC `YYYY-MM-DD[ HH:MM[:SS]]`.
pub fn parse_since(arg: &str) -> Result<SlurpSince, CommandError> {
    let arg = arg.trim();
    if arg.eq_ignore_ascii_case("all") {
        return Ok(SlurpSince::All);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(arg) {
        return Ok(SlurpSince::After(dt.with_timezone(&Utc)));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(arg, format) {
            return Ok(SlurpSince::After(dt.and_utc()));
        }
    }
    NaiveDate::parse_from_str(arg, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| SlurpSince::After(dt.and_utc()))
        .ok_or(CommandError::UnparseableDatetime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_bare_commands() {
        assert_eq!(Command::parse("listen"), Ok(Command::Listen(None)));
        assert_eq!(Command::parse("announce"), Ok(Command::Announce(None)));
        assert_eq!(Command::parse("channels"), Ok(Command::Channels));
        assert_eq!(Command::parse("ignore"), Ok(Command::Ignore(None)));
    }

    #[test]
    fn test_parse_channel_arguments() {
        assert_eq!(Command::parse("listen <#42>"), Ok(Command::Listen(Some(42))));
        assert_eq!(Command::parse("announce 43"), Ok(Command::Announce(Some(43))));
        assert_eq!(Command::parse("IGNORE <#44>"), Ok(Command::Ignore(Some(44))));
    }

    #[test]
    fn test_parse_skips_bot_mention() {
        assert_eq!(Command::parse("<@99> listen"), Ok(Command::Listen(None)));
        assert_eq!(Command::parse("  <@!99>   channels "), Ok(Command::Channels));
        // a user mention as the channel argument is not a channel
        assert_eq!(
            Command::parse("<@99> listen <@12>"),
            Err(CommandError::BadChannel("<@12>".into()))
        );
    }

    #[test]
    fn test_parse_rejections() {
        assert_eq!(Command::parse(""), Err(CommandError::Empty));
        assert_eq!(Command::parse("<@99>"), Err(CommandError::Empty));
        assert_eq!(
            Command::parse("dance"),
            Err(CommandError::Unknown("dance".into()))
        );
        assert_eq!(
            Command::parse("listen #general"),
            Err(CommandError::BadChannel("#general".into()))
        );
        assert_eq!(
            Command::parse("listen <#1> <#2>"),
            Err(CommandError::BadChannel("<#1> <#2>".into()))
        );
        assert!(matches!(
            Command::parse("channels <#1>"),
            Err(CommandError::UnexpectedArgument(_))
        ));
        assert!(matches!(
            Command::parse("slurp"),
            Err(CommandError::MissingArgument(_))
        ));
    }

    #[test]
    fn test_slurp_keeps_whole_argument() {
        assert_eq!(
            Command::parse("slurp 2024-01-03 09:30"),
            Ok(Command::Slurp("2024-01-03 09:30".into()))
        );
    }

    #[test]
    fn test_parse_since_formats() {
        let expected = SlurpSince::After(Utc.with_ymd_and_hms(2024, 1, 3, 9, 30, 0).unwrap());
        assert_eq!(parse_since("2024-01-03 09:30"), Ok(expected));
        assert_eq!(parse_since("2024-01-03 09:30:00"), Ok(expected));
        assert_eq!(parse_since("2024-01-03T09:30"), Ok(expected));
        assert_eq!(parse_since("2024-01-03T09:30:00Z"), Ok(expected));
        assert_eq!(parse_since("2024-01-03T10:30:00+01:00"), Ok(expected));
        assert_eq!(
            parse_since("2024-01-03"),
            Ok(SlurpSince::After(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap()))
        );
        assert_eq!(parse_since("ALL"), Ok(SlurpSince::All));
    }

    #[test]
    fn test_parse_since_rejects_garbage() {
        for arg in ["yesterday", "2024-13-01", "03/01/2024", "2024-01-03 25:00"] {
            assert_eq!(parse_since(arg), Err(CommandError::UnparseableDatetime), "{arg}");
        }
    }

    #[test]
    fn test_error_replies() {
        assert_eq!(CommandError::UnparseableDatetime.to_string(), "Datetime unparseable!");
        assert!(CommandError::Unknown("x".into()).to_string().contains("slurp <datetime|all>"));
    }
}
