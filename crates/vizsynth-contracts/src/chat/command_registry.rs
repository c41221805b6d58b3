#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "sources",
        action: "sources",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const SUGGEST_COMMAND: CommandSpec = CommandSpec {
    command: "suggest",
    action: "suggest",
};

pub(crate) const SAVE_COMMAND: CommandSpec = CommandSpec {
    command: "save",
    action: "save",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "<topic>",
    "/suggest [n]",
    "/save [direct|synthesis|both] [dir]",
    "/sources",
    "/status",
    "/reset",
    "/help",
    "/quit",
];
