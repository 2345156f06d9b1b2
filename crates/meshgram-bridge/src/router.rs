//! Chat command routing
//!
//! Each incoming chat command is a single-shot transition through
//! `RECEIVED → AUTHORIZED|UNAUTHORIZED → DISPATCHED|REJECTED → REPLIED`;
//! no per-user state survives beyond authorization membership. Every
//! path produces a reply, so operators can tell "rejected" from
//! "broken". Mesh-affecting commands are acknowledged immediately; the
//! router never blocks on mesh round trips.

use std::collections::HashSet;
use tracing::debug;

use meshgram_core::{ChatMessage, ChatPost, MeshMessage, MeshPayload, NodeId};

use crate::adapter::LinkState;
use crate::nodes::NodeRegistry;
use crate::translator::format_uptime;

/// Fixed reply for unauthorized mesh-affecting commands
pub const DENIAL_REPLY: &str = "You are not authorized to use this command.";

/// Chat user ids permitted to issue mesh-affecting commands.
/// Immutable after load.
#[derive(Debug, Clone)]
pub struct AuthorizationSet {
    users: HashSet<i64>,
}

impl AuthorizationSet {
    /// Build from the configured user list
    pub fn new(users: &[i64]) -> Self {
        Self {
            users: users.iter().copied().collect(),
        }
    }

    /// Whether this user may issue mesh-affecting commands
    pub fn is_authorized(&self, user_id: i64) -> bool {
        self.users.contains(&user_id)
    }
}

/// How a command resolved, for stats and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A mesh message was emitted
    Dispatched,
    /// Denied, unknown target, or malformed arguments
    Rejected,
    /// Read-only command answered from local state
    Info,
}

/// Result of routing one command
#[derive(Debug)]
pub struct CommandOutcome {
    /// Reply to post back to the chat
    pub reply: ChatPost,
    /// Mesh message to emit through the outbound path, if any
    pub dispatch: Option<MeshMessage>,
    /// How the command resolved
    pub disposition: Disposition,
}

impl CommandOutcome {
    fn info(reply: ChatPost) -> Self {
        Self {
            reply,
            dispatch: None,
            disposition: Disposition::Info,
        }
    }

    fn rejected(reply: ChatPost) -> Self {
        Self {
            reply,
            dispatch: None,
            disposition: Disposition::Rejected,
        }
    }

    fn dispatched(reply: ChatPost, message: MeshMessage) -> Self {
        Self {
            reply,
            dispatch: Some(message),
            disposition: Disposition::Dispatched,
        }
    }
}

/// Read-only engine state the router consults for replies
pub struct RouterContext<'a> {
    /// Node registry snapshot
    pub registry: &'a NodeRegistry,
    /// Mesh link state
    pub mesh_link: LinkState,
    /// Chat link state
    pub chat_link: LinkState,
    /// Bridge start time
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Current time
    pub now: chrono::DateTime<chrono::Utc>,
    /// Default target for commands issued without a node argument
    pub default_node: Option<NodeId>,
    /// Source id used for dispatched mesh messages
    pub local_node: NodeId,
}

/// Dispatcher for authorized chat commands
#[derive(Debug, Clone)]
pub struct CommandRouter {
    auth: AuthorizationSet,
}

/// Whether a chat message text is a command
pub fn is_command(text: &str) -> bool {
    text.starts_with('/')
}

impl CommandRouter {
    /// Create a router with the given authorization set
    pub fn new(auth: AuthorizationSet) -> Self {
        Self { auth }
    }

    /// Route one command message to its handler.
    ///
    /// Never faults: malformed input yields a usage reply.
    pub fn handle(&self, msg: &ChatMessage, ctx: &RouterContext<'_>) -> CommandOutcome {
        let mut tokens = msg.text.split_whitespace();
        let head = tokens.next().unwrap_or("");
        // Strip the /, lowercase, drop a trailing @botname
        let name = head
            .trim_start_matches('/')
            .split('@')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        let args: Vec<&str> = tokens.collect();

        debug!(command = %name, user_id = msg.user_id, "Routing chat command");

        let outcome = match name.as_str() {
            "status" => self.cmd_status(ctx),
            "bell" => self.cmd_bell(msg, &args, ctx),
            "node" => self.cmd_node(msg, &args, ctx),
            "user" => self.cmd_user(msg),
            "start" => CommandOutcome::info(ChatPost::text(WELCOME_TEXT)),
            "help" => CommandOutcome::info(ChatPost::text(HELP_TEXT)),
            other => CommandOutcome::rejected(ChatPost::text(format!(
                "Unknown command: /{other}\n\n{HELP_TEXT}"
            ))),
        };

        debug!(
            command = %name,
            user_id = msg.user_id,
            disposition = ?outcome.disposition,
            "Command resolved"
        );

        let CommandOutcome {
            reply,
            dispatch,
            disposition,
        } = outcome;
        CommandOutcome {
            reply: reply.in_reply_to(msg.message_id),
            dispatch,
            disposition,
        }
    }

    /// `/status`: no authorization required
    fn cmd_status(&self, ctx: &RouterContext<'_>) -> CommandOutcome {
        let uptime = ctx
            .now
            .signed_duration_since(ctx.started_at)
            .num_seconds()
            .max(0) as u64;

        let mut lines = vec![
            "📊 Meshgram Status:".to_string(),
            format!("⏱️ Uptime: {}", format_uptime(uptime)),
            format!("📡 Mesh link: {}", ctx.mesh_link),
            format!("💬 Chat link: {}", ctx.chat_link),
            format!("🔢 Known nodes: {}", ctx.registry.len()),
        ];
        lines.extend(ctx.registry.status_lines(ctx.now));

        CommandOutcome::info(ChatPost::text(lines.join("\n")))
    }

    /// `/bell <node_id>`: authorized senders only
    fn cmd_bell(
        &self,
        msg: &ChatMessage,
        args: &[&str],
        ctx: &RouterContext<'_>,
    ) -> CommandOutcome {
        if !self.auth.is_authorized(msg.user_id) {
            return CommandOutcome::rejected(ChatPost::text(DENIAL_REPLY));
        }

        let target = match self.resolve_target(args, ctx, "/bell <node_id>") {
            Ok(target) => target,
            Err(reply) => return CommandOutcome::rejected(reply),
        };

        let bell = MeshMessage::outgoing(
            ctx.local_node.clone(),
            Some(target.clone()),
            MeshPayload::Text("🔔".to_string()),
        );
        CommandOutcome::dispatched(
            ChatPost::text(format!("🔔 Bell sent to node {target}.")).silent(),
            bell,
        )
    }

    /// `/node <node_id>`: authorized senders only
    fn cmd_node(
        &self,
        msg: &ChatMessage,
        args: &[&str],
        ctx: &RouterContext<'_>,
    ) -> CommandOutcome {
        if !self.auth.is_authorized(msg.user_id) {
            return CommandOutcome::rejected(ChatPost::text(DENIAL_REPLY));
        }

        let target = match self.resolve_target(args, ctx, "/node <node_id>") {
            Ok(target) => target,
            Err(reply) => return CommandOutcome::rejected(reply),
        };

        let report = match ctx.registry.node_report(&target, ctx.now) {
            Some(report) => report,
            None => {
                return CommandOutcome::rejected(ChatPost::text(format!(
                    "Unknown node: {target}"
                )))
            }
        };

        // Probe the node for fresh routing info; the reply acknowledges
        // with the current snapshot, not the mesh round-trip result.
        let probe = MeshMessage::outgoing(
            ctx.local_node.clone(),
            Some(target.clone()),
            MeshPayload::Routing { route: Vec::new() },
        );
        CommandOutcome::dispatched(
            ChatPost::text(format!("{report}\n\nℹ️ Info query dispatched to {target}.")),
            probe,
        )
    }

    /// `/user`: no authorization required
    fn cmd_user(&self, msg: &ChatMessage) -> CommandOutcome {
        let authorized = if self.auth.is_authorized(msg.user_id) {
            "Yes"
        } else {
            "No"
        };
        CommandOutcome::info(ChatPost::text(format!(
            "User Information:\nID: {}\nName: {}\nIs Authorized: {authorized}",
            msg.user_id, msg.sender
        )))
    }

    /// Resolve a node argument: explicit id, else the configured
    /// default. Malformed ids and missing defaults reject with usage.
    fn resolve_target(
        &self,
        args: &[&str],
        ctx: &RouterContext<'_>,
        usage: &str,
    ) -> Result<NodeId, ChatPost> {
        match args.first() {
            Some(raw) => NodeId::parse(raw)
                .map_err(|_| ChatPost::text(format!("Invalid node ID '{raw}'. Usage: {usage}"))),
            None => ctx.default_node.clone().ok_or_else(|| {
                ChatPost::text("No node ID provided and no default node ID set.".to_string())
            }),
        }
    }
}

const WELCOME_TEXT: &str = "Welcome to Meshgram! 🌐📱\n\n\
    This bot bridges your chat with a mesh radio network.\n\
    Use /help to see available commands.";

const HELP_TEXT: &str = "Available commands:\n\n\
    /start - Start the bot and see welcome message\n\
    /help - Show this help message\n\
    /status - Check the bridge and node status\n\
    /bell <node_id> - Send a bell notification to a node\n\
    /node <node_id> - Get information about a specific node\n\
    /user - Get information about your chat user";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn node(raw: u32) -> NodeId {
        NodeId::from_u32(raw)
    }

    fn chat(text: &str, user_id: i64) -> ChatMessage {
        ChatMessage {
            sender: "tester".to_string(),
            user_id,
            text: text.to_string(),
            location: None,
            timestamp: Utc::now(),
            message_id: 1234,
        }
    }

    struct Fixture {
        registry: NodeRegistry,
        router: CommandRouter,
        started_at: chrono::DateTime<Utc>,
    }

    impl Fixture {
        fn new(local_nodes: &[NodeId]) -> Self {
            let started_at = Utc::now();
            Self {
                registry: NodeRegistry::new(local_nodes, Duration::from_secs(300), started_at),
                router: CommandRouter::new(AuthorizationSet::new(&[42])),
                started_at,
            }
        }

        fn ctx(&self) -> RouterContext<'_> {
            RouterContext {
                registry: &self.registry,
                mesh_link: LinkState::Connected,
                chat_link: LinkState::Connected,
                started_at: self.started_at,
                now: Utc::now(),
                default_node: Some(node(0xa1b2c3d4)),
                local_node: node(0x01020304),
            }
        }

        fn handle(&self, text: &str, user_id: i64) -> CommandOutcome {
            self.router.handle(&chat(text, user_id), &self.ctx())
        }
    }

    #[test]
    fn test_status_needs_no_authorization() {
        let fx = Fixture::new(&[node(0xa1b2c3d4)]);
        let outcome = fx.handle("/status", 999);
        assert_eq!(outcome.disposition, Disposition::Info);
        assert!(outcome.reply.text.contains("Meshgram Status"));
        assert!(outcome.reply.text.contains("Known nodes: 1"));
        assert!(outcome.dispatch.is_none());
    }

    #[test]
    fn test_status_lists_stale_local_nodes() {
        let mut fx = Fixture::new(&[node(1), node(2)]);
        let later = fx.started_at + chrono::Duration::seconds(600);
        fx.registry.scan_stale(later);

        let mut ctx = fx.ctx();
        ctx.now = later;
        let outcome = fx.router.handle(&chat("/status", 999), &ctx);
        assert_eq!(
            outcome.reply.text.matches("[stale]").count(),
            2,
            "both configured nodes listed stale"
        );
    }

    #[test]
    fn test_bell_denied_for_unauthorized() {
        let fx = Fixture::new(&[node(0xa1b2c3d4)]);
        let outcome = fx.handle("/bell !a1b2c3d4", 7);
        assert_eq!(outcome.disposition, Disposition::Rejected);
        assert_eq!(
            outcome.reply.text, DENIAL_REPLY,
            "fixed denial text expected"
        );
        assert!(outcome.dispatch.is_none(), "no mesh message on denial");
    }

    #[test]
    fn test_node_denied_for_unauthorized() {
        let fx = Fixture::new(&[node(0xa1b2c3d4)]);
        let outcome = fx.handle("/node !a1b2c3d4", 7);
        assert_eq!(outcome.disposition, Disposition::Rejected);
        assert_eq!(outcome.reply.text, DENIAL_REPLY);
        assert!(outcome.dispatch.is_none());
    }

    #[test]
    fn test_bell_dispatches_tone() {
        let fx = Fixture::new(&[node(0xa1b2c3d4)]);
        let outcome = fx.handle("/bell !a1b2c3d4", 42);
        assert_eq!(outcome.disposition, Disposition::Dispatched);
        assert!(outcome.reply.text.contains("Bell sent to node !a1b2c3d4"));

        let dispatch = outcome.dispatch.unwrap();
        assert_eq!(dispatch.destination, Some(node(0xa1b2c3d4)));
        assert_eq!(dispatch.payload, MeshPayload::Text("🔔".to_string()));
    }

    #[test]
    fn test_bell_falls_back_to_default_node() {
        let fx = Fixture::new(&[node(0xa1b2c3d4)]);
        let outcome = fx.handle("/bell", 42);
        assert_eq!(outcome.disposition, Disposition::Dispatched);
        assert_eq!(
            outcome.dispatch.unwrap().destination,
            Some(node(0xa1b2c3d4))
        );
    }

    #[test]
    fn test_bell_malformed_argument() {
        let fx = Fixture::new(&[node(0xa1b2c3d4)]);
        let outcome = fx.handle("/bell not-a-node", 42);
        assert_eq!(outcome.disposition, Disposition::Rejected);
        assert!(outcome.reply.text.contains("Usage: /bell <node_id>"));
        assert!(outcome.dispatch.is_none());
    }

    #[test]
    fn test_node_unknown_target() {
        let fx = Fixture::new(&[node(0xa1b2c3d4)]);
        let outcome = fx.handle("/node !deadbeef", 42);
        assert_eq!(outcome.disposition, Disposition::Rejected);
        assert!(outcome.reply.text.contains("Unknown node: !deadbeef"));
        assert!(outcome.dispatch.is_none());
    }

    #[test]
    fn test_node_known_target_dispatches_probe() {
        let fx = Fixture::new(&[node(0xa1b2c3d4)]);
        let outcome = fx.handle("/node !a1b2c3d4", 42);
        assert_eq!(outcome.disposition, Disposition::Dispatched);
        assert!(outcome.reply.text.contains("🔷 Node"));

        let dispatch = outcome.dispatch.unwrap();
        assert_eq!(
            dispatch.payload,
            MeshPayload::Routing { route: Vec::new() }
        );
    }

    #[test]
    fn test_user_reports_authorization() {
        let fx = Fixture::new(&[]);
        let outcome = fx.handle("/user", 42);
        assert!(outcome.reply.text.contains("Is Authorized: Yes"));

        let outcome = fx.handle("/user", 7);
        assert!(outcome.reply.text.contains("Is Authorized: No"));
    }

    #[test]
    fn test_case_insensitive_and_botname_suffix() {
        let fx = Fixture::new(&[node(0xa1b2c3d4)]);
        let outcome = fx.handle("/STATUS@meshgram_bot", 999);
        assert_eq!(outcome.disposition, Disposition::Info);
        assert!(outcome.reply.text.contains("Meshgram Status"));
    }

    #[test]
    fn test_unknown_command_lists_commands() {
        let fx = Fixture::new(&[]);
        let outcome = fx.handle("/frobnicate", 42);
        assert_eq!(outcome.disposition, Disposition::Rejected);
        assert!(outcome.reply.text.contains("Unknown command: /frobnicate"));
        assert!(outcome.reply.text.contains("Available commands"));
        assert!(outcome.dispatch.is_none(), "never forwarded to mesh");
    }

    #[test]
    fn test_replies_are_threaded() {
        let fx = Fixture::new(&[]);
        let outcome = fx.handle("/help", 1);
        assert_eq!(outcome.reply.reply_to, Some(1234));
    }
}
