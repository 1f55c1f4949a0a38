//! Operator command catalog shared by the parser and the `help` command.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Start,
    Config,
    Params,
    Enable,
    Disable,
    Remove,
    Status,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub usage: &'static str,
    pub summary: &'static str,
}

const COMMANDS: [CommandSpec; 8] = [
    CommandSpec {
        name: "start",
        tag: CommandTag::Start,
        usage: "start <conn>",
        summary: "begin negotiation with the capability exchange",
    },
    CommandSpec {
        name: "config",
        tag: CommandTag::Config,
        usage: "config <conn> [id=<0-3>] [role=initiator|reflector]",
        summary: "create a CS configuration",
    },
    CommandSpec {
        name: "params",
        tag: CommandTag::Params,
        usage: "params <conn>",
        summary: "send procedure parameters for the active configuration",
    },
    CommandSpec {
        name: "enable",
        tag: CommandTag::Enable,
        usage: "enable <conn>",
        summary: "start the ranging procedure",
    },
    CommandSpec {
        name: "disable",
        tag: CommandTag::Disable,
        usage: "disable <conn>",
        summary: "stop the ranging procedure",
    },
    CommandSpec {
        name: "remove",
        tag: CommandTag::Remove,
        usage: "remove <conn> id=<0-3>",
        summary: "remove a CS configuration",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        usage: "status [conn]",
        summary: "show negotiation state per connection",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        usage: "help [command]",
        summary: "list commands or describe one",
    },
];

/// Returns the full command catalog.
#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}
