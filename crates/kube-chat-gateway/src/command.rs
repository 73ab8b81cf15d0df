//! Command parsing and the catalog of known verbs.

use kube_chat_core::{Command, Verb};
use serde::Serialize;
use thiserror::Error;

/// Input rejected before anything is sent or stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("请输入命令")]
    Empty,
    #[error("不支持的命令: {0}")]
    UnknownCommand(String),
    #[error("命令缺少参数，用法: {example}")]
    MissingArguments { verb: Verb, example: &'static str },
    #[error("参数格式错误: {0}")]
    Malformed(String),
}

/// Catalog entry shown in command suggestions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub verb: Verb,
    pub description: &'static str,
    pub example: &'static str,
}

/// Known verbs in display order.
pub const CATALOG: [CommandSpec; 4] = [
    CommandSpec {
        verb: Verb::Diagnose,
        description: "诊断 Pod 问题",
        example: "/diagnose pod-name -n namespace",
    },
    CommandSpec {
        verb: Verb::Analyze,
        description: "分析资源使用情况",
        example: "/analyze deployment/name -n namespace",
    },
    CommandSpec {
        verb: Verb::Execute,
        description: "执行 Kubernetes 命令",
        example: "/execute get pods -n namespace",
    },
    CommandSpec {
        verb: Verb::Help,
        description: "显示帮助信息",
        example: "/help [command]",
    },
];

/// Catalog entry for `verb`.
#[must_use]
pub fn spec_for(verb: Verb) -> &'static CommandSpec {
    CATALOG
        .iter()
        .find(|spec| spec.verb == verb)
        .unwrap_or(&CATALOG[0])
}

/// Catalog entries whose name starts with `filter`.
///
/// A leading `/` is ignored and matching is case-insensitive.
#[must_use]
pub fn suggestions(filter: &str) -> Vec<CommandSpec> {
    let filter = filter.trim().trim_start_matches('/').to_ascii_lowercase();
    CATALOG
        .iter()
        .filter(|spec| spec.verb.as_str().starts_with(&filter))
        .copied()
        .collect()
}

/// Parse user input into a command.
///
/// Text without a leading `/` becomes an `execute` command carrying the raw
/// text. With a prefix, the verb must be known and carry arguments.
///
/// # Errors
/// Returns the reason the input cannot be sent.
pub fn parse_command(input: &str) -> Result<Command, ValidationError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ValidationError::Empty);
    }
    let Some(rest) = input.strip_prefix('/') else {
        return Ok(Command::execute(input));
    };

    let (name, args) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(name, args)| (name, args.trim()));
    let verb =
        Verb::from_name(name).ok_or_else(|| ValidationError::UnknownCommand(name.to_string()))?;

    if args.is_empty() {
        return Err(ValidationError::MissingArguments {
            verb,
            example: spec_for(verb).example,
        });
    }
    if shlex::split(args).is_none_or(|tokens| tokens.is_empty()) {
        return Err(ValidationError::Malformed(args.to_string()));
    }
    Ok(Command::new(verb, args, true))
}
