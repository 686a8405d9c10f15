use super::command_registry::{find_command, CommandKind};

/// One line of the interactive session, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Noop,
    Open { path: String },
    SetTone { value: String },
    SetModel { value: String },
    Analyze,
    Reset,
    Status,
    Captions,
    History,
    Load { id: String },
    Delete { id: String },
    ClearHistory,
    Help,
    Quit,
    MissingArgument { command: String },
    Unknown { command: String, arg: String },
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn single_arg(arg: &str) -> String {
    let parts = split_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

pub fn parse_command(text: &str) -> SessionCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return SessionCommand::Noop;
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return SessionCommand::Open {
            path: single_arg(raw_trimmed),
        };
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return SessionCommand::Open {
            path: single_arg(raw_trimmed),
        };
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let remainder = &slash_tail[command_len..];
    let arg = remainder.trim();

    let Some(spec) = find_command(&command) else {
        if remainder.starts_with(['/', '.']) {
            return SessionCommand::Open {
                path: single_arg(raw_trimmed),
            };
        }
        return SessionCommand::Unknown {
            command,
            arg: arg.to_string(),
        };
    };

    let value = match spec.kind {
        CommandKind::NoArg => String::new(),
        CommandKind::Path | CommandKind::EntryId => single_arg(arg),
        CommandKind::Value => arg.to_string(),
    };
    if matches!(spec.kind, CommandKind::Path | CommandKind::EntryId) && value.is_empty() {
        return SessionCommand::MissingArgument { command };
    }

    match spec.action {
        "open" => SessionCommand::Open { path: value },
        "set_tone" => SessionCommand::SetTone { value },
        "set_model" => SessionCommand::SetModel { value },
        "analyze" => SessionCommand::Analyze,
        "reset" => SessionCommand::Reset,
        "status" => SessionCommand::Status,
        "captions" => SessionCommand::Captions,
        "history" => SessionCommand::History,
        "load" => SessionCommand::Load { id: value },
        "delete" => SessionCommand::Delete { id: value },
        "clear_history" => SessionCommand::ClearHistory,
        "help" => SessionCommand::Help,
        "quit" => SessionCommand::Quit,
        _ => SessionCommand::Unknown {
            command,
            arg: arg.to_string(),
        },
    }
}
