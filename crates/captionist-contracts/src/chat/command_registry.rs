#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandKind {
    Path,
    Value,
    EntryId,
    NoArg,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub kind: CommandKind,
}

pub(crate) const SESSION_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "open",
        action: "open",
        kind: CommandKind::Path,
    },
    CommandSpec {
        command: "tone",
        action: "set_tone",
        kind: CommandKind::Value,
    },
    CommandSpec {
        command: "model",
        action: "set_model",
        kind: CommandKind::Value,
    },
    CommandSpec {
        command: "analyze",
        action: "analyze",
        kind: CommandKind::NoArg,
    },
    CommandSpec {
        command: "reset",
        action: "reset",
        kind: CommandKind::NoArg,
    },
    CommandSpec {
        command: "status",
        action: "status",
        kind: CommandKind::NoArg,
    },
    CommandSpec {
        command: "captions",
        action: "captions",
        kind: CommandKind::NoArg,
    },
    CommandSpec {
        command: "history",
        action: "history",
        kind: CommandKind::NoArg,
    },
    CommandSpec {
        command: "load",
        action: "load",
        kind: CommandKind::EntryId,
    },
    CommandSpec {
        command: "delete",
        action: "delete",
        kind: CommandKind::EntryId,
    },
    CommandSpec {
        command: "clear",
        action: "clear_history",
        kind: CommandKind::NoArg,
    },
    CommandSpec {
        command: "help",
        action: "help",
        kind: CommandKind::NoArg,
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        kind: CommandKind::NoArg,
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        kind: CommandKind::NoArg,
    },
];

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/open <path>",
    "/tone <instagram|facebook|linkedin|none>",
    "/model <modelA|modelB|none>",
    "/analyze",
    "/captions",
    "/status",
    "/reset",
    "/history",
    "/load <id>",
    "/delete <id>",
    "/clear",
    "/help",
    "/quit",
];

pub(crate) fn find_command(command: &str) -> Option<&'static CommandSpec> {
    SESSION_COMMANDS.iter().find(|spec| spec.command == command)
}
