//! Routing of chat messages to modules.
//!
//! `!admin <module> <cmd>` (admin only) goes to one module's `admin`,
//! `!help` lists every module, `!help <module> [topic]` asks one module, and
//! anything else is offered to each module in turn until one answers.

use trinity_abi::Message;

use crate::manager::ModuleManager;

/// A chat message as seen by the host.
#[derive(Debug, Clone, Copy)]
pub struct Incoming<'a> {
    pub content: &'a str,
    pub author_id: &'a str,
    pub author_name: &'a str,
    pub room: &'a str,
}

pub fn handle_message(
    manager: &ModuleManager,
    admin_user_id: Option<&str>,
    msg: &Incoming<'_>,
) -> Vec<Message> {
    if admin_user_id == Some(msg.author_id) {
        if let Some(replies) = try_handle_admin(manager, msg) {
            tracing::trace!("handled by admin, skipping modules");
            return replies;
        }
    }

    if let Some(reply) = try_handle_help(manager, msg) {
        tracing::trace!("handled by help, skipping modules");
        return vec![reply];
    }

    for name in manager.module_names() {
        tracing::trace!("trying to handle message with {}...", name);
        match manager.on_msg(&name, msg.content, msg.author_id, msg.author_name, msg.room) {
            Ok(replies) if !replies.is_empty() => {
                tracing::trace!("{} returned a response", name);
                return replies;
            }
            Ok(_) => {}
            Err(err) => tracing::warn!("module {} ran into an error: {:#}", name, err),
        }
    }

    Vec::new()
}

fn try_handle_admin(manager: &ModuleManager, msg: &Incoming<'_>) -> Option<Vec<Message>> {
    let rest = msg.content.strip_prefix("!admin")?;
    tracing::trace!("trying admin for {}", msg.content);

    let Some(rest) = rest.strip_prefix(' ') else {
        return Some(vec![Message::new("missing module and command", msg.author_id)]);
    };
    let Some((module, cmd)) = rest.trim().split_once(' ') else {
        return Some(vec![Message::new("missing command", msg.author_id)]);
    };

    if !manager.module_names().iter().any(|name| name == module) {
        return None;
    }
    match manager.admin(module, cmd.trim(), msg.author_id) {
        Ok(replies) => Some(replies),
        Err(err) => {
            tracing::error!("error when handling admin command: {:#}", err);
            None
        }
    }
}

fn try_handle_help(manager: &ModuleManager, msg: &Incoming<'_>) -> Option<Message> {
    let rest = msg.content.strip_prefix("!help")?;

    let text = if rest.trim().is_empty() {
        let mut text = String::from("Available modules:");
        for name in manager.module_names() {
            let help = manager.help(&name, None).unwrap_or_else(|err| {
                tracing::error!("error when handling help command: {:#}", err);
                "<missing>".to_string()
            });
            text.push_str(&format!("\n- {name}: {help}"));
        }
        text
    } else if let Some(rest) = rest.strip_prefix(' ') {
        let rest = rest.trim();
        let (module, topic) = rest
            .split_once(' ')
            .map(|(l, r)| (l, Some(r.trim())))
            .unwrap_or((rest, None));
        manager
            .help(module, topic)
            .unwrap_or_else(|_| format!("module {module} not found"))
    } else {
        return None;
    };

    Some(Message::new(text, msg.author_id))
}
